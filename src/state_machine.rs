//! Transition-table state machine
//!
//! A pure, synchronous evaluator: callbacks receive the caller's context
//! explicitly and perform no I/O of their own.

mod machine;
mod transition;

#[cfg(test)]
mod proptests;

pub use machine::{Machine, Step, StepError, TransitionTable, MAX_HOPS};
pub use transition::{composite, Callback, Predicate, Transition};
