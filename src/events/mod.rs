//! Lifecycle event streaming
//!
//! Components emit [`SyncEvent`]s to a shared [`EventBus`]; consumers
//! (presentation layers, loggers, tests) subscribe to receive them.

mod bus;
mod types;

pub use bus::{DEFAULT_CHANNEL_CAPACITY, EventBus};
pub use types::SyncEvent;
