//! Push-channel configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Push-channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Endpoint the transport connects to
    #[serde(default = "default_url")]
    pub url: String,

    /// Base reconnect delay in milliseconds; doubles per failed attempt
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,

    /// Automatic reconnect attempts before giving up until a manual connect
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Heartbeat ping cadence in milliseconds; zero disables the heartbeat
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
}

fn default_url() -> String {
    "ws://127.0.0.1:8080/ws".to_string()
}

fn default_reconnect_interval_ms() -> u64 {
    1_000
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

fn default_heartbeat_interval_ms() -> u64 {
    30_000
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            reconnect_interval_ms: 1_000,
            max_reconnect_attempts: 10,
            heartbeat_interval_ms: 30_000,
        }
    }
}

impl ChannelConfig {
    /// Get the base reconnect delay as a Duration
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    /// Get the heartbeat cadence as a Duration
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}
