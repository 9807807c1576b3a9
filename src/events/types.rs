//! Event types emitted by the synchronization engine
//!
//! Task and channel lifecycle outcomes are reported as events rather than
//! captured callbacks, so consumers torn down mid-flight simply stop
//! listening instead of leaving dangling references behind.

/// An event emitted by the scheduler, the push channel, or the coordinator
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// A task's fetch operation began executing
    TaskStarted { task_id: String },

    /// A task's fetch operation completed successfully
    TaskSucceeded { task_id: String },

    /// A task's fetch operation failed; `retry_count` is the post-failure count
    TaskFailed {
        task_id: String,
        retry_count: u32,
        error: String,
    },

    /// A task exhausted its retries and was disabled
    TaskDisabled { task_id: String },

    /// The push channel completed a handshake
    ChannelOpened,

    /// The push channel connection ended
    ChannelClosed { manual: bool },

    /// A reconnect attempt was scheduled after an unintended drop
    ChannelReconnectScheduled { attempt: u32, delay_ms: u64 },

    /// Automatic reconnection gave up; only a manual connect revives the channel
    ChannelReconnectsExhausted { attempts: u32 },

    /// An inbound envelope was dispatched to subscribers
    MessageReceived { event_type: String },

    /// A targeted refresh updated one metric slot
    MetricRefreshed { metric: String },

    /// A full refresh settled; `failed` metrics kept their prior values
    RefreshCompleted { updated: usize, failed: usize },
}

impl SyncEvent {
    /// Short event type name for logging and filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::TaskStarted { .. } => "task_started",
            Self::TaskSucceeded { .. } => "task_succeeded",
            Self::TaskFailed { .. } => "task_failed",
            Self::TaskDisabled { .. } => "task_disabled",
            Self::ChannelOpened => "channel_opened",
            Self::ChannelClosed { .. } => "channel_closed",
            Self::ChannelReconnectScheduled { .. } => "channel_reconnect_scheduled",
            Self::ChannelReconnectsExhausted { .. } => "channel_reconnects_exhausted",
            Self::MessageReceived { .. } => "message_received",
            Self::MetricRefreshed { .. } => "metric_refreshed",
            Self::RefreshCompleted { .. } => "refresh_completed",
        }
    }

    /// Task id for task-scoped events
    pub fn task_id(&self) -> Option<&str> {
        match self {
            Self::TaskStarted { task_id }
            | Self::TaskSucceeded { task_id }
            | Self::TaskFailed { task_id, .. }
            | Self::TaskDisabled { task_id } => Some(task_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_names() {
        let event = SyncEvent::TaskFailed {
            task_id: "cpu".to_string(),
            retry_count: 1,
            error: "boom".to_string(),
        };
        assert_eq!(event.event_type(), "task_failed");
        assert_eq!(event.task_id(), Some("cpu"));

        assert_eq!(SyncEvent::ChannelOpened.event_type(), "channel_opened");
        assert_eq!(SyncEvent::ChannelOpened.task_id(), None);
    }
}
