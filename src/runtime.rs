//! Runtime for dispatching events to user sessions
//!
//! The [`Engine`] is the single entry point for live input and fired
//! alarms. It owns the [`SessionCache`] and serializes work per user with
//! [`UserLocks`]. Collaborators (chat transport, durable store) plug in
//! through the traits in [`traits`].

mod cache;
mod engine;
mod locks;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use cache::{CacheError, SessionCache};
pub use engine::Engine;
pub use locks::{UserGuard, UserLocks};
pub use traits::*;

use crate::db::Database;

/// Engine persisting to SQLite
pub type ProductionEngine<B, T> = Engine<B, Database, T>;
