//! Priority-weighted polling scheduler
//!
//! Owns a registry of named periodic fetch tasks, computes delays from
//! priority and failure history, executes with retry/backoff, and disables
//! tasks after exhausting retries. A liveness signal can pause and resume the
//! whole registry without losing per-task state.

mod config;
mod core;
mod task;

pub use config::{TaskConfig, TaskConfigUpdate};
pub use core::{SchedulerStats, TaskScheduler};
pub use task::{MAX_DELAY_MS, TaskStatus, compute_delay};
