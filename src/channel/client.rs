//! Push-channel client implementation

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use eyre::Result;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::domain::Envelope;
use crate::events::{EventBus, SyncEvent};

use super::config::ChannelConfig;
use super::error::ChannelError;
use super::transport::{MessageSink, MessageStream, Transport};

/// Ceiling on the exponential reconnect delay
pub const MAX_RECONNECT_DELAY_MS: u64 = 30_000;

/// Delay before reconnect attempt number `attempt` (zero-based):
/// `min(base * 2^attempt, 30_000 ms)`
pub fn reconnect_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 2u64.saturating_pow(attempt);
    let delay_ms = (base.as_millis() as u64).saturating_mul(factor);
    Duration::from_millis(delay_ms.min(MAX_RECONNECT_DELAY_MS))
}

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Open,
    Closing,
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Open => write!(f, "open"),
            Self::Closing => write!(f, "closing"),
        }
    }
}

/// Counters exposed for diagnostics
#[derive(Debug, Default, Clone)]
pub struct ChannelStats {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub malformed_messages: u64,
    pub handler_errors: u64,
    pub reconnects_scheduled: u64,
}

/// Token returned by subscribe(); pass back to unsubscribe() to remove
/// exactly that handler
#[derive(Debug)]
pub struct Subscription {
    event_type: String,
    id: u64,
}

type Handler = Arc<dyn Fn(&Envelope) -> Result<()> + Send + Sync>;

/// Internal state protected by mutex
struct ClientInner {
    state: ChannelState,
    sink: Option<Box<dyn MessageSink>>,
    reconnect_attempts: u32,
    manual_disconnect: bool,
    /// Bumped on every successful open and on manual disconnect; reader,
    /// heartbeat, and pending reconnect timers check it and die when stale
    session: u64,
    handlers: HashMap<String, Vec<(u64, Handler)>>,
    next_handler_id: u64,
    stats: ChannelStats,
}

/// Reconnecting publish/subscribe client for a push source
///
/// One live connection per instance; construct at the application root and
/// multiplex consumers over the subscription registry rather than opening
/// independent connections.
pub struct PushChannelClient {
    config: ChannelConfig,
    transport: Arc<dyn Transport>,
    inner: Arc<Mutex<ClientInner>>,
    events: EventBus,
}

impl PushChannelClient {
    /// Create a client over the given transport
    pub fn new(config: ChannelConfig, transport: Arc<dyn Transport>, events: EventBus) -> Self {
        debug!(url = %config.url, "PushChannelClient::new: called");
        Self {
            config,
            transport,
            inner: Arc::new(Mutex::new(ClientInner {
                state: ChannelState::Disconnected,
                sink: None,
                reconnect_attempts: 0,
                manual_disconnect: false,
                session: 0,
                handlers: HashMap::new(),
                next_handler_id: 0,
                stats: ChannelStats::default(),
            })),
            events,
        }
    }

    /// Open the connection
    ///
    /// Idempotent while Open; rejects while a handshake is already in
    /// flight. Clears the manual-disconnect flag, re-arming automatic
    /// reconnection for future drops.
    pub async fn connect(self: &Arc<Self>) -> Result<(), ChannelError> {
        debug!("PushChannelClient::connect: called");
        {
            let mut inner = self.inner.lock().await;
            match inner.state {
                ChannelState::Open => {
                    debug!("PushChannelClient::connect: already open");
                    return Ok(());
                }
                ChannelState::Connecting => {
                    debug!("PushChannelClient::connect: handshake in flight, rejecting");
                    return Err(ChannelError::AlreadyConnecting);
                }
                ChannelState::Closing => {
                    debug!("PushChannelClient::connect: still closing, rejecting");
                    return Err(ChannelError::Closing);
                }
                ChannelState::Disconnected => {
                    inner.state = ChannelState::Connecting;
                    inner.manual_disconnect = false;
                }
            }
        }
        self.establish().await
    }

    /// Close the connection and suppress automatic reconnection
    ///
    /// The suppression flag is cleared only by a subsequent connect() call.
    pub async fn disconnect(self: &Arc<Self>) {
        debug!("PushChannelClient::disconnect: called");
        let sink = {
            let mut inner = self.inner.lock().await;
            inner.manual_disconnect = true;
            inner.session += 1;
            match inner.state {
                ChannelState::Open => inner.state = ChannelState::Closing,
                _ => {
                    inner.state = ChannelState::Disconnected;
                    return;
                }
            }
            inner.sink.take()
        };

        if let Some(mut sink) = sink
            && let Err(err) = sink.close().await
        {
            debug!(error = %err, "PushChannelClient::disconnect: close error ignored");
        }

        self.inner.lock().await.state = ChannelState::Disconnected;
        self.events.emit(SyncEvent::ChannelClosed { manual: true });
        info!("Push channel disconnected");
    }

    /// Best-effort send: transmits and returns true only while Open
    ///
    /// Never errors; any failure is logged and reported as false.
    pub async fn send(&self, envelope: &Envelope) -> bool {
        let Ok(frame) = envelope.encode() else {
            warn!(event_type = %envelope.event_type, "PushChannelClient::send: envelope failed to encode");
            return false;
        };

        let mut inner = self.inner.lock().await;
        if inner.state != ChannelState::Open {
            debug!(state = %inner.state, "PushChannelClient::send: not open, dropping");
            return false;
        }
        let Some(sink) = inner.sink.as_mut() else {
            return false;
        };
        match sink.send(frame).await {
            Ok(()) => {
                inner.stats.messages_sent += 1;
                true
            }
            Err(err) => {
                warn!(error = %err, "Push channel send failed");
                false
            }
        }
    }

    /// Register a handler for one inbound event type
    ///
    /// A handler that fails is logged and isolated; it never affects other
    /// handlers for the same message.
    pub async fn subscribe<F>(&self, event_type: &str, handler: F) -> Subscription
    where
        F: Fn(&Envelope) -> Result<()> + Send + Sync + 'static,
    {
        debug!(%event_type, "PushChannelClient::subscribe: called");
        let mut inner = self.inner.lock().await;
        let id = inner.next_handler_id;
        inner.next_handler_id += 1;
        inner
            .handlers
            .entry(event_type.to_string())
            .or_default()
            .push((id, Arc::new(handler)));
        Subscription {
            event_type: event_type.to_string(),
            id,
        }
    }

    /// Remove exactly the handler registered by this subscription
    pub async fn unsubscribe(&self, subscription: Subscription) {
        debug!(event_type = %subscription.event_type, "PushChannelClient::unsubscribe: called");
        let mut inner = self.inner.lock().await;
        if let Some(list) = inner.handlers.get_mut(&subscription.event_type) {
            list.retain(|(id, _)| *id != subscription.id);
            if list.is_empty() {
                inner.handlers.remove(&subscription.event_type);
            }
        }
    }

    /// Current connection state
    pub async fn state(&self) -> ChannelState {
        self.inner.lock().await.state
    }

    /// Get the channel statistics
    pub async fn stats(&self) -> ChannelStats {
        self.inner.lock().await.stats.clone()
    }

    /// Perform the handshake; assumes state is already Connecting
    ///
    /// Returns a boxed future because `establish` recurses through
    /// `schedule_reconnect`, which `tokio::spawn`s a task that awaits
    /// `establish` again; boxing gives the recursive call a concrete `Send`
    /// type so the compiler need not infer an opaque type within its own
    /// defining scope.
    fn establish<'a>(
        self: &'a Arc<Self>,
    ) -> Pin<Box<dyn Future<Output = Result<(), ChannelError>> + Send + 'a>> {
        Box::pin(async move {
            let session_at_start = self.inner.lock().await.session;

            match self.transport.connect(&self.config.url).await {
                Ok((sink, stream)) => {
                    let session = {
                        let mut inner = self.inner.lock().await;
                        if inner.session != session_at_start || inner.manual_disconnect {
                            debug!("PushChannelClient::establish: superseded mid-handshake, discarding");
                            return Err(ChannelError::Closing);
                        }
                        inner.state = ChannelState::Open;
                        inner.sink = Some(sink);
                        inner.reconnect_attempts = 0;
                        inner.session += 1;
                        inner.session
                    };

                    self.events.emit(SyncEvent::ChannelOpened);
                    info!(url = %self.config.url, "Push channel opened");

                    let client = Arc::clone(self);
                    tokio::spawn(run_reader(client, stream, session));
                    let client = Arc::clone(self);
                    tokio::spawn(run_heartbeat(client, session));
                    Ok(())
                }
                Err(err) => {
                    warn!(url = %self.config.url, error = %err, "Push channel handshake failed");
                    let schedule = {
                        let mut inner = self.inner.lock().await;
                        if inner.session == session_at_start && !inner.manual_disconnect {
                            inner.state = ChannelState::Disconnected;
                            true
                        } else {
                            false
                        }
                    };
                    if schedule {
                        // The peer never opened; treat it like an unintended drop
                        self.schedule_reconnect().await;
                    }
                    Err(err)
                }
            }
        })
    }

    /// Queue the next automatic reconnect attempt, if any remain
    async fn schedule_reconnect(self: &Arc<Self>) {
        let (session, attempt, delay) = {
            let mut inner = self.inner.lock().await;
            if inner.manual_disconnect {
                debug!("PushChannelClient::schedule_reconnect: manual disconnect, skipping");
                return;
            }
            if inner.reconnect_attempts >= self.config.max_reconnect_attempts {
                warn!(
                    attempts = inner.reconnect_attempts,
                    "Push channel reconnects exhausted; waiting for manual connect"
                );
                self.events.emit(SyncEvent::ChannelReconnectsExhausted {
                    attempts: inner.reconnect_attempts,
                });
                return;
            }
            let attempt = inner.reconnect_attempts;
            inner.reconnect_attempts += 1;
            inner.stats.reconnects_scheduled += 1;
            (
                inner.session,
                attempt,
                reconnect_delay(self.config.reconnect_interval(), attempt),
            )
        };

        debug!(attempt, delay_ms = delay.as_millis() as u64, "PushChannelClient: reconnect scheduled");
        self.events.emit(SyncEvent::ChannelReconnectScheduled {
            attempt,
            delay_ms: delay.as_millis() as u64,
        });

        let client = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let proceed = {
                let mut inner = client.inner.lock().await;
                if inner.session != session || inner.manual_disconnect || inner.state != ChannelState::Disconnected {
                    debug!("PushChannelClient: reconnect timer stale, skipping");
                    false
                } else {
                    inner.state = ChannelState::Connecting;
                    true
                }
            };
            if proceed {
                debug!(attempt, "PushChannelClient: attempting reconnect");
                // Failure schedules the next attempt from inside establish()
                let _ = client.establish().await;
            }
        });
    }

    /// React to an unintended connection drop observed by the reader
    async fn handle_drop(self: &Arc<Self>, session: u64) {
        {
            let mut inner = self.inner.lock().await;
            if inner.session != session {
                debug!("PushChannelClient::handle_drop: stale session, ignoring");
                return;
            }
            inner.state = ChannelState::Disconnected;
            inner.sink = None;
        }
        self.events.emit(SyncEvent::ChannelClosed { manual: false });
        warn!("Push channel connection dropped");
        self.schedule_reconnect().await;
    }

    /// Parse one inbound frame and dispatch it to subscribers
    async fn dispatch(&self, text: &str) {
        let envelope = match Envelope::parse(text) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(error = %err, "Dropping malformed push message");
                self.inner.lock().await.stats.malformed_messages += 1;
                return;
            }
        };

        let handlers: Vec<Handler> = {
            let mut inner = self.inner.lock().await;
            inner.stats.messages_received += 1;
            inner
                .handlers
                .get(&envelope.event_type)
                .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
                .unwrap_or_default()
        };

        self.events.emit(SyncEvent::MessageReceived {
            event_type: envelope.event_type.clone(),
        });

        for handler in handlers {
            if let Err(err) = handler(&envelope) {
                warn!(event_type = %envelope.event_type, error = %err, "Subscriber handler failed");
                self.inner.lock().await.stats.handler_errors += 1;
            }
        }
    }
}

/// Reader loop for one connection; ends when the stream does
async fn run_reader(client: Arc<PushChannelClient>, mut stream: Box<dyn MessageStream>, session: u64) {
    debug!(session, "PushChannelClient: reader started");
    loop {
        match stream.next_frame().await {
            Some(Ok(text)) => client.dispatch(&text).await,
            Some(Err(err)) => {
                warn!(error = %err, "Push channel read error");
                break;
            }
            None => {
                debug!(session, "PushChannelClient: stream ended");
                break;
            }
        }
    }
    client.handle_drop(session).await;
}

/// Heartbeat loop for one connection; pings on a fixed cadence while Open
async fn run_heartbeat(client: Arc<PushChannelClient>, session: u64) {
    let interval = client.config.heartbeat_interval();
    if interval.is_zero() {
        return;
    }
    debug!(session, "PushChannelClient: heartbeat started");
    loop {
        tokio::time::sleep(interval).await;

        let mut inner = client.inner.lock().await;
        if inner.session != session || inner.state != ChannelState::Open {
            break;
        }
        let Ok(frame) = Envelope::ping().encode() else {
            break;
        };
        let Some(sink) = inner.sink.as_mut() else {
            break;
        };
        if let Err(err) = sink.send(frame).await {
            // The reader observes the drop and drives reconnection
            warn!(error = %err, "Heartbeat send failed");
            break;
        }
        inner.stats.messages_sent += 1;
    }
    debug!(session, "PushChannelClient: heartbeat stopped");
}
