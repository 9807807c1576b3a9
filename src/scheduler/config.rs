//! Task configuration

use std::time::Duration;

use eyre::{Result, eyre};
use serde::{Deserialize, Serialize};

use crate::domain::TaskPriority;

/// Configuration for one scheduled fetch task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Base polling interval in milliseconds
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Consecutive failures tolerated before the task is disabled
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Exponential growth factor applied to the delay per consecutive failure
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Whether the task is eligible for scheduling
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Priority bias applied to every computed delay
    #[serde(default)]
    pub priority: TaskPriority,
}

fn default_interval_ms() -> u64 {
    60_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_enabled() -> bool {
    true
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            interval_ms: 60_000,
            max_retries: 3,
            backoff_multiplier: 2.0,
            enabled: true,
            priority: TaskPriority::Medium,
        }
    }
}

impl TaskConfig {
    /// Get the base interval as a Duration
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Reject configurations the delay algebra cannot handle
    pub fn validate(&self) -> Result<()> {
        if self.interval_ms == 0 {
            return Err(eyre!("interval_ms must be greater than zero"));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(eyre!(
                "backoff_multiplier must be a finite value >= 1.0, got {}",
                self.backoff_multiplier
            ));
        }
        Ok(())
    }
}

/// Partial update applied to an existing task's configuration
///
/// Absent fields leave the current value untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskConfigUpdate {
    pub interval_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub backoff_multiplier: Option<f64>,
    pub enabled: Option<bool>,
    pub priority: Option<TaskPriority>,
}

impl TaskConfigUpdate {
    /// Produce the updated configuration without mutating the original
    pub fn apply(&self, config: &TaskConfig) -> TaskConfig {
        TaskConfig {
            interval_ms: self.interval_ms.unwrap_or(config.interval_ms),
            max_retries: self.max_retries.unwrap_or(config.max_retries),
            backoff_multiplier: self.backoff_multiplier.unwrap_or(config.backoff_multiplier),
            enabled: self.enabled.unwrap_or(config.enabled),
            priority: self.priority.unwrap_or(config.priority),
        }
    }
}
