//! Coordinator configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Inbound subtype requesting a full refresh
pub const FULL_UPDATE_SUBTYPE: &str = "full_update";

/// Inbound subtype requesting a single-metric refresh
pub const METRIC_UPDATE_SUBTYPE: &str = "metric_update";

/// Coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Coarse full-refresh cadence in milliseconds; absent disables the timer
    ///
    /// Leave this off (and skip per-metric polling) when the push channel is
    /// the primary update path, otherwise the backend is refreshed twice.
    #[serde(default)]
    pub auto_refresh_interval_ms: Option<u64>,

    /// Envelope type whose messages carry refresh commands
    #[serde(default = "default_update_event_type")]
    pub update_event_type: String,
}

fn default_update_event_type() -> String {
    "metrics".to_string()
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            auto_refresh_interval_ms: None,
            update_event_type: default_update_event_type(),
        }
    }
}

impl CoordinatorConfig {
    /// Get the auto-refresh cadence as a Duration, if enabled
    pub fn auto_refresh_interval(&self) -> Option<Duration> {
        self.auto_refresh_interval_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_disables_auto_refresh() {
        let config = CoordinatorConfig::default();
        assert!(config.auto_refresh_interval().is_none());
        assert_eq!(config.update_event_type, "metrics");
    }

    #[test]
    fn test_auto_refresh_interval() {
        let config = CoordinatorConfig {
            auto_refresh_interval_ms: Some(5_000),
            ..Default::default()
        };
        assert_eq!(config.auto_refresh_interval(), Some(Duration::from_secs(5)));
    }
}
