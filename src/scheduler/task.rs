//! Task state types and delay computation

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use crate::domain::TaskPriority;

use super::config::TaskConfig;

/// Ceiling on the backoff-inflated delay, before the priority factor
pub const MAX_DELAY_MS: u64 = 300_000;

/// Compute the effective delay for a task's next execution
///
/// `min(interval * backoff^retry_count, 300_000 ms) * priority_factor` -
/// higher-priority tasks both start sooner and retry sooner under equal
/// failure history, with the worst case capped at five minutes before the
/// priority bias.
pub fn compute_delay(config: &TaskConfig, retry_count: u32) -> Duration {
    let backoff = config.backoff_multiplier.powi(retry_count as i32);
    let inflated = (config.interval_ms as f64 * backoff).min(MAX_DELAY_MS as f64);
    Duration::from_millis((inflated * config.priority.factor()).round() as u64)
}

/// Point-in-time view of one registered task
#[derive(Debug, Clone)]
pub struct TaskStatus {
    pub id: String,
    pub name: String,
    pub config: TaskConfig,
    pub retry_count: u32,
    pub is_running: bool,
    pub paused: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
}

impl TaskStatus {
    /// Shorthand for the configured priority
    pub fn priority(&self) -> TaskPriority {
        self.config.priority
    }
}

/// A pending fire queued for the driver loop
///
/// The generation is captured at scheduling time; entries whose generation no
/// longer matches the task's are stale and silently discarded when popped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct FireEntry {
    pub at: Instant,
    pub task_id: String,
    pub generation: u64,
}

impl Ord for FireEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.at
            .cmp(&other.at)
            .then_with(|| self.task_id.cmp(&other.task_id))
            .then_with(|| self.generation.cmp(&other.generation))
    }
}

impl PartialOrd for FireEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
