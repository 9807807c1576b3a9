//! DashSync - dashboard metric synchronization engine
//!
//! Keeps a client-side dashboard's metrics fresh without overwhelming the
//! backend, using two cooperating update channels: a priority-weighted
//! polling scheduler and a self-healing push-channel client, arbitrated by a
//! coordinator that owns the shared metric snapshot.
//!
//! # Core Concepts
//!
//! - **Explicit services**: the scheduler and channel client are constructed
//!   once at the application root and passed by reference; one task registry
//!   and one live connection per instance
//! - **Failure isolation**: one task's exhaustion, one handler's error, or
//!   one metric's failed fetch never affects its neighbors
//! - **Stale over blank**: a metric that fails to refresh keeps its last good
//!   value in the snapshot
//! - **Events, not callbacks**: lifecycle outcomes stream over a broadcast
//!   bus, so torn-down consumers just stop listening
//!
//! # Modules
//!
//! - [`scheduler`] - periodic fetch tasks with priority-biased delays and
//!   exponential retry backoff
//! - [`channel`] - reconnecting, heartbeat-maintained publish/subscribe
//!   push client
//! - [`coordinator`] - snapshot ownership, full and targeted refresh, and
//!   the bridge between both update channels
//! - [`liveness`] - host visibility signal to pause/resume translation
//! - [`events`] - lifecycle event bus
//! - [`fetch`] - the caller-supplied fetcher contract

pub mod channel;
pub mod coordinator;
pub mod domain;
pub mod events;
pub mod fetch;
pub mod liveness;
pub mod scheduler;

// Re-export commonly used types
pub use channel::{
    ChannelConfig, ChannelError, ChannelState, ChannelStats, MemoryPeer, MemoryTransport, PushChannelClient,
    Subscription, Transport, WsTransport,
};
pub use coordinator::{CoordinatorConfig, MetricEntry, RefreshSummary, SyncCoordinator, SyncSnapshot};
pub use domain::{Envelope, TaskPriority};
pub use events::{EventBus, SyncEvent};
pub use fetch::{Fetcher, fetch_fn};
pub use liveness::spawn_liveness_adapter;
pub use scheduler::{SchedulerStats, TaskConfig, TaskConfigUpdate, TaskScheduler, TaskStatus};
