//! Transport seam for the push channel
//!
//! The client speaks to its peer through the [`Transport`] trait so the
//! connection machinery (state, reconnect, heartbeat, dispatch) stays
//! independent of the wire. [`WsTransport`] is the production WebSocket
//! implementation; [`MemoryTransport`] is an in-process pair for tests and
//! local development.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::debug;

use crate::domain::Envelope;

use super::error::ChannelError;

/// Connects to a push source and yields the two halves of the connection
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, url: &str) -> Result<(Box<dyn MessageSink>, Box<dyn MessageStream>), ChannelError>;
}

/// Write half of a connection
#[async_trait]
pub trait MessageSink: Send {
    /// Transmit one text frame
    async fn send(&mut self, text: String) -> Result<(), ChannelError>;

    /// Close the connection cleanly
    async fn close(&mut self) -> Result<(), ChannelError>;
}

/// Read half of a connection
#[async_trait]
pub trait MessageStream: Send {
    /// Next text frame; None once the connection has ended
    async fn next_frame(&mut self) -> Option<Result<String, ChannelError>>;
}

// === WebSocket transport ===

type WsConnection = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// WebSocket transport over tokio-tungstenite
#[derive(Debug, Default)]
pub struct WsTransport;

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self, url: &str) -> Result<(Box<dyn MessageSink>, Box<dyn MessageStream>), ChannelError> {
        debug!(%url, "WsTransport::connect: called");
        let (stream, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|err| ChannelError::Connect(err.to_string()))?;
        let (sink, stream) = stream.split();
        Ok((Box::new(WsSink { sink }), Box::new(WsStream { stream })))
    }
}

struct WsSink {
    sink: futures_util::stream::SplitSink<WsConnection, WsMessage>,
}

#[async_trait]
impl MessageSink for WsSink {
    async fn send(&mut self, text: String) -> Result<(), ChannelError> {
        self.sink
            .send(WsMessage::Text(text.into()))
            .await
            .map_err(|err| ChannelError::Transport(err.to_string()))
    }

    async fn close(&mut self) -> Result<(), ChannelError> {
        self.sink
            .close()
            .await
            .map_err(|err| ChannelError::Transport(err.to_string()))
    }
}

struct WsStream {
    stream: futures_util::stream::SplitStream<WsConnection>,
}

#[async_trait]
impl MessageStream for WsStream {
    async fn next_frame(&mut self) -> Option<Result<String, ChannelError>> {
        loop {
            match self.stream.next().await {
                Some(Ok(WsMessage::Text(text))) => return Some(Ok(text.to_string())),
                // The engine speaks JSON text frames; control and binary
                // frames are not part of the envelope protocol
                Some(Ok(WsMessage::Binary(_)))
                | Some(Ok(WsMessage::Ping(_)))
                | Some(Ok(WsMessage::Pong(_)))
                | Some(Ok(WsMessage::Frame(_))) => continue,
                Some(Ok(WsMessage::Close(_))) | None => return None,
                Some(Err(err)) => return Some(Err(ChannelError::Transport(err.to_string()))),
            }
        }
    }
}

// === In-memory transport ===

struct PeerShared {
    fail_connects: bool,
    connect_delay: Duration,
    connect_times: Vec<Instant>,
    to_client: Option<mpsc::UnboundedSender<String>>,
    from_client: Vec<String>,
}

/// In-memory transport; each connect() opens a fresh frame pair with the
/// matching [`MemoryPeer`]
pub struct MemoryTransport {
    shared: Arc<Mutex<PeerShared>>,
}

impl MemoryTransport {
    /// Create a transport and the peer handle controlling it
    pub fn new() -> (Arc<Self>, MemoryPeer) {
        let shared = Arc::new(Mutex::new(PeerShared {
            fail_connects: false,
            connect_delay: Duration::ZERO,
            connect_times: Vec::new(),
            to_client: None,
            from_client: Vec::new(),
        }));
        (
            Arc::new(Self {
                shared: Arc::clone(&shared),
            }),
            MemoryPeer { shared },
        )
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self, url: &str) -> Result<(Box<dyn MessageSink>, Box<dyn MessageStream>), ChannelError> {
        debug!(%url, "MemoryTransport::connect: called");
        let delay = {
            let mut shared = self.shared.lock().expect("peer lock poisoned");
            shared.connect_times.push(Instant::now());
            shared.connect_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut shared = self.shared.lock().expect("peer lock poisoned");
        if shared.fail_connects {
            return Err(ChannelError::Connect("peer refused connection".to_string()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        shared.to_client = Some(tx);
        Ok((
            Box::new(MemorySink {
                shared: Arc::clone(&self.shared),
            }),
            Box::new(MemoryStream { rx }),
        ))
    }
}

/// Test-side handle to the in-memory peer
pub struct MemoryPeer {
    shared: Arc<Mutex<PeerShared>>,
}

impl MemoryPeer {
    /// Deliver an envelope to the client
    pub fn push(&self, envelope: &Envelope) {
        if let Ok(text) = envelope.encode() {
            self.push_text(text);
        }
    }

    /// Deliver a raw frame to the client
    pub fn push_text(&self, text: String) {
        let shared = self.shared.lock().expect("peer lock poisoned");
        if let Some(tx) = &shared.to_client {
            let _ = tx.send(text);
        }
    }

    /// Frames the client has transmitted so far
    pub fn sent(&self) -> Vec<String> {
        self.shared.lock().expect("peer lock poisoned").from_client.clone()
    }

    /// Sever the live connection without the client asking for it
    pub fn drop_connection(&self) {
        self.shared.lock().expect("peer lock poisoned").to_client = None;
    }

    /// Make subsequent connect() calls fail
    pub fn set_fail_connects(&self, fail: bool) {
        self.shared.lock().expect("peer lock poisoned").fail_connects = fail;
    }

    /// Make subsequent connect() calls take this long
    pub fn set_connect_delay(&self, delay: Duration) {
        self.shared.lock().expect("peer lock poisoned").connect_delay = delay;
    }

    /// How many times connect() has been attempted
    pub fn connect_count(&self) -> usize {
        self.shared.lock().expect("peer lock poisoned").connect_times.len()
    }

    /// Monotonic instants of every connect() attempt
    pub fn connect_times(&self) -> Vec<Instant> {
        self.shared.lock().expect("peer lock poisoned").connect_times.clone()
    }
}

struct MemorySink {
    shared: Arc<Mutex<PeerShared>>,
}

#[async_trait]
impl MessageSink for MemorySink {
    async fn send(&mut self, text: String) -> Result<(), ChannelError> {
        let mut shared = self.shared.lock().expect("peer lock poisoned");
        if shared.to_client.is_none() {
            return Err(ChannelError::Transport("connection dropped".to_string()));
        }
        shared.from_client.push(text);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ChannelError> {
        self.shared.lock().expect("peer lock poisoned").to_client = None;
        Ok(())
    }
}

struct MemoryStream {
    rx: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl MessageStream for MemoryStream {
    async fn next_frame(&mut self) -> Option<Result<String, ChannelError>> {
        self.rx.recv().await.map(Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_transport_roundtrip() {
        let (transport, peer) = MemoryTransport::new();
        let (mut sink, mut stream) = transport.connect("mem://test").await.unwrap();

        sink.send("outbound".to_string()).await.unwrap();
        assert_eq!(peer.sent(), vec!["outbound".to_string()]);

        peer.push(&Envelope::new("metrics", json!({ "metric": "cpu" })));
        let frame = stream.next_frame().await.unwrap().unwrap();
        let envelope = Envelope::parse(&frame).unwrap();
        assert_eq!(envelope.event_type, "metrics");
    }

    #[tokio::test]
    async fn test_memory_transport_drop_ends_stream() {
        let (transport, peer) = MemoryTransport::new();
        let (_sink, mut stream) = transport.connect("mem://test").await.unwrap();

        peer.drop_connection();
        assert!(stream.next_frame().await.is_none());
    }

    #[tokio::test]
    async fn test_memory_transport_refusal() {
        let (transport, peer) = MemoryTransport::new();
        peer.set_fail_connects(true);
        assert!(transport.connect("mem://test").await.is_err());
        assert_eq!(peer.connect_count(), 1);
    }
}
