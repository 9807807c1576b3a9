//! Self-healing push-channel client
//!
//! A reconnecting, heartbeat-maintained, publish/subscribe connection to a
//! push source. Inbound envelopes are dispatched to handlers by event type;
//! sends are best-effort and only succeed while the channel is open.

mod client;
mod config;
mod error;
mod transport;

pub use client::{ChannelState, ChannelStats, MAX_RECONNECT_DELAY_MS, PushChannelClient, Subscription, reconnect_delay};
pub use config::ChannelConfig;
pub use error::ChannelError;
pub use transport::{MemoryPeer, MemoryTransport, MessageSink, MessageStream, Transport, WsTransport};
