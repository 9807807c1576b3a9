//! Shared metric snapshot read model

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// One metric's slot in the snapshot
///
/// A failed fetch records `last_error` but keeps the prior value and its
/// timestamp, so consumers render stale-but-present data instead of blanks.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricEntry {
    pub value: Option<Value>,
    pub last_updated: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Read model exposed to presentation layers
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncSnapshot {
    /// Metric key to current slot
    pub metrics: HashMap<String, MetricEntry>,

    /// True while a full refresh is in flight
    pub loading: bool,

    /// Metrics that failed on the most recent full refresh
    pub failed_count: usize,

    /// Aggregated summary when the most recent full refresh had failures
    pub error_summary: Option<String>,
}

impl SyncSnapshot {
    /// Look up one metric's slot
    pub fn metric(&self, key: &str) -> Option<&MetricEntry> {
        self.metrics.get(key)
    }

    /// Record a successful fetch for one metric
    pub fn record_success(&mut self, key: &str, value: Value) {
        let entry = self.metrics.entry(key.to_string()).or_default();
        entry.value = Some(value);
        entry.last_updated = Some(Utc::now());
        entry.last_error = None;
    }

    /// Record a failed fetch for one metric, retaining the prior value
    pub fn record_failure(&mut self, key: &str, error: String) {
        let entry = self.metrics.entry(key.to_string()).or_default();
        entry.last_error = Some(error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success_clears_error() {
        let mut snapshot = SyncSnapshot::default();
        snapshot.record_failure("cpu", "timeout".to_string());
        snapshot.record_success("cpu", json!(0.4));

        let entry = snapshot.metric("cpu").unwrap();
        assert_eq!(entry.value, Some(json!(0.4)));
        assert!(entry.last_error.is_none());
        assert!(entry.last_updated.is_some());
    }

    #[test]
    fn test_failure_retains_prior_value() {
        let mut snapshot = SyncSnapshot::default();
        snapshot.record_success("cpu", json!(0.4));
        let updated_at = snapshot.metric("cpu").unwrap().last_updated;

        snapshot.record_failure("cpu", "timeout".to_string());
        let entry = snapshot.metric("cpu").unwrap();
        assert_eq!(entry.value, Some(json!(0.4)), "stale value survives the failure");
        assert_eq!(entry.last_updated, updated_at);
        assert_eq!(entry.last_error.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_failure_on_never_fetched_metric() {
        let mut snapshot = SyncSnapshot::default();
        snapshot.record_failure("new", "boom".to_string());

        let entry = snapshot.metric("new").unwrap();
        assert!(entry.value.is_none());
        assert!(entry.last_updated.is_none());
    }
}
