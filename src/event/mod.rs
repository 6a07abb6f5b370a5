//! Event Module - deployment event sourcing
//!
//! - `EventLog`: thread-safe, append-only log shared by executor tasks
//! - `EventKind`: deployment, wave and module level events

mod log;

pub use log::{Event, EventKind, EventLog};
