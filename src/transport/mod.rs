//! Engine.IO transports.
//!
//! Each transport runs as its own tokio task and reports back to the
//! engine through one shared event channel. The engine owns the handles
//! and decides which transport is active.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  PollingHandle::send   ┌──────────────────┐  GET / POST
//! │              │───────────────────────►│  polling tasks   │◄──────────►
//! │    Engine    │                        └──────────────────┘   server
//! │    actor     │  WebSocketHandle::send ┌──────────────────┐  frames
//! │              │───────────────────────►│  websocket task  │◄──────────►
//! └──────────────┘                        └──────────────────┘
//!        ▲                                          │
//!        └──────────── TransportEvent ◄─────────────┘
//! ```
//!
//! Every event carries the id of the transport instance that produced it,
//! so the engine can drop events from transports it already replaced.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `endpoint` | Polling and WebSocket URL construction |
//! | `polling` | HTTP long-polling over reqwest |
//! | `websocket` | WebSocket client over the crate's frame codec |

// ============================================================================
// Submodules
// ============================================================================

/// Endpoint URL construction.
pub mod endpoint;

/// HTTP long-polling transport.
pub mod polling;

/// WebSocket transport.
pub mod websocket;

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::protocol::EnginePacket;
use crate::security::TrustContext;

// ============================================================================
// Re-exports
// ============================================================================

pub use endpoint::Endpoints;
pub use polling::{PollingConfig, PollingHandle};
pub use websocket::{WebSocketConfig, WebSocketHandle};

// ============================================================================
// Stream Types
// ============================================================================

/// Byte stream a WebSocket can run over.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

/// Type-erased stream returned by a [`TlsConnector`].
pub type BoxedStream = Box<dyn AsyncStream>;

// ============================================================================
// TlsConnector
// ============================================================================

/// Establishes TLS over a connected TCP stream.
///
/// The connector performs the TLS handshake and reports the peer chain as a
/// [`TrustContext`]. When pins are configured the WebSocket transport
/// checks that context before sending the HTTP upgrade request.
#[async_trait]
pub trait TlsConnector: Send + Sync {
    /// Wraps `stream` in TLS for `domain`.
    ///
    /// # Errors
    ///
    /// Implementations return [`Error::Transport`] or [`Error::Io`] when the
    /// TLS handshake fails.
    async fn connect(&self, domain: &str, stream: TcpStream)
    -> Result<(BoxedStream, TrustContext)>;
}

// ============================================================================
// TransportEvent
// ============================================================================

/// Which transport produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// HTTP long-polling.
    Polling,
    /// WebSocket.
    WebSocket,
}

/// What happened on a transport.
#[derive(Debug)]
pub enum TransportEventKind {
    /// WebSocket opening handshake completed.
    Connected,
    /// Packets received, in arrival order.
    Packets(Vec<EnginePacket>),
    /// Transport ended without a local error.
    Closed {
        /// Close code sent by the peer, if any.
        code: Option<u16>,
        /// Human-readable reason.
        reason: String,
    },
    /// Transport failed; no further events follow.
    Error(Error),
}

/// Event delivered from a transport task to the engine.
#[derive(Debug)]
pub struct TransportEvent {
    /// Instance id assigned by the engine when the transport was started.
    pub id: u64,
    /// Transport type.
    pub transport: TransportKind,
    /// Event payload.
    pub kind: TransportEventKind,
}

/// Sender half of the engine's transport event channel.
pub type EventSender = mpsc::UnboundedSender<TransportEvent>;

/// Tags events with the producing transport.
#[derive(Debug, Clone)]
pub(crate) struct EventSink {
    id: u64,
    transport: TransportKind,
    tx: EventSender,
}

impl EventSink {
    pub(crate) fn new(id: u64, transport: TransportKind, tx: EventSender) -> Self {
        Self { id, transport, tx }
    }

    /// Sends an event; returns `false` once the engine is gone.
    pub(crate) fn emit(&self, kind: TransportEventKind) -> bool {
        self.tx
            .send(TransportEvent {
                id: self.id,
                transport: self.transport,
                kind,
            })
            .is_ok()
    }

    pub(crate) fn packets(&self, packets: Vec<EnginePacket>) -> bool {
        if packets.is_empty() {
            return true;
        }
        self.emit(TransportEventKind::Packets(packets))
    }

    pub(crate) fn error(&self, error: Error) -> bool {
        self.emit(TransportEventKind::Error(error))
    }

    pub(crate) fn closed(&self, code: Option<u16>, reason: impl Into<String>) -> bool {
        self.emit(TransportEventKind::Closed {
            code,
            reason: reason.into(),
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
