//! Statebot - per-user conversational bot core
//!
//! Incoming events (messages, button presses, fired alarms) advance a
//! per-user dialog state machine. The [`runtime::Engine`] serializes work
//! per user and commits every step to durable storage; the
//! [`scheduler::AlarmScheduler`] turns timed alarms back into events.

pub mod achievements;
pub mod config;
pub mod console;
pub mod db;
pub mod error;
pub mod event;
pub mod poller;
pub mod runtime;
pub mod scheduler;
pub mod session;
pub mod state_machine;
