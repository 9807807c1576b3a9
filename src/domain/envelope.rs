//! Wire envelope for push-channel messages
//!
//! Every frame on the push channel is a JSON envelope carrying an event type,
//! an opaque payload, and a millisecond Unix timestamp. Inbound dispatch keys
//! exclusively on `type`.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// A single push-channel message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Event type used for subscription dispatch
    #[serde(rename = "type")]
    pub event_type: String,

    /// Opaque payload; shape is agreed between peer and subscribers
    #[serde(default)]
    pub data: Value,

    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
}

impl Envelope {
    /// Create an envelope stamped with the current time
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// Outbound heartbeat frame
    pub fn ping() -> Self {
        let now = Utc::now().timestamp_millis();
        Self {
            event_type: "ping".to_string(),
            data: json!({ "timestamp": now }),
            timestamp: now,
        }
    }

    /// Parse an inbound frame
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Encode for transmission
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_roundtrip() {
        let envelope = Envelope::new("metrics", json!({ "metric": "cpu" }));
        let text = envelope.encode().unwrap();
        let parsed = Envelope::parse(&text).unwrap();
        assert_eq!(parsed, envelope);
    }

    #[test]
    fn test_envelope_parse_wire_shape() {
        let parsed = Envelope::parse(r#"{"type":"alert","data":{"level":3},"timestamp":1700000000000}"#).unwrap();
        assert_eq!(parsed.event_type, "alert");
        assert_eq!(parsed.data["level"], 3);
        assert_eq!(parsed.timestamp, 1_700_000_000_000);
    }

    #[test]
    fn test_envelope_data_defaults_to_null() {
        let parsed = Envelope::parse(r#"{"type":"ping","timestamp":0}"#).unwrap();
        assert_eq!(parsed.data, Value::Null);
    }

    #[test]
    fn test_envelope_parse_rejects_garbage() {
        assert!(Envelope::parse("not json").is_err());
        assert!(Envelope::parse(r#"{"data":{}}"#).is_err());
    }

    #[test]
    fn test_ping_carries_timestamp_payload() {
        let ping = Envelope::ping();
        assert_eq!(ping.event_type, "ping");
        assert_eq!(ping.data["timestamp"], ping.timestamp);
    }
}
