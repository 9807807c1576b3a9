//! Event bus - pub/sub fan-out for engine lifecycle events
//!
//! The EventBus uses tokio broadcast channels to deliver events to all
//! subscribers with minimal latency. The scheduler, the push channel, and the
//! coordinator emit; consumers subscribe.

use tokio::sync::broadcast;
use tracing::debug;

use super::types::SyncEvent;

/// Default channel capacity (events)
///
/// Refresh cadences are measured in seconds, so a small buffer is plenty.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Central event bus for synchronization-engine activity
///
/// Cheap to clone; all clones share the same underlying channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    /// Create a new event bus with the given capacity
    pub fn new(capacity: usize) -> Self {
        debug!(capacity, "EventBus::new: creating event bus");
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Emit an event to all subscribers
    ///
    /// This is fire-and-forget: if there are no subscribers, the event is
    /// dropped. If the channel is full, oldest events are dropped.
    pub fn emit(&self, event: SyncEvent) {
        debug!(event_type = event.event_type(), "EventBus::emit");
        // Ignore send errors (no subscribers is OK)
        let _ = self.tx.send(event);
    }

    /// Subscribe to receive events
    ///
    /// Returns a receiver that will receive all events emitted after
    /// subscription. Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        debug!("EventBus::subscribe: new subscriber");
        self.tx.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}
