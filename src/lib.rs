//! Socket.IO Engine - Engine.IO client transport engine.
//!
//! This library connects to a Socket.IO server, negotiates an Engine.IO
//! session over HTTP long-polling, upgrades to WebSocket when the server
//! allows it, and hands decoded messages to the layer above.
//!
//! # Architecture
//!
//! The engine follows an actor model:
//!
//! - **Engine task**: owns the connection state machine, the transport
//!   handles and the heartbeat timers
//! - **Transport tasks**: one per polling session or WebSocket, reporting
//!   packets back as tagged events
//! - **Dispatcher task**: resolves acks and calls the [`EngineClient`] in
//!   order
//!
//! Key design principles:
//!
//! - Events from a replaced transport are dropped by id
//! - Writes made during an upgrade probe are queued and flushed in order
//! - WebSocket framing is done by the in-crate [`FrameCodec`]
//! - TLS is pluggable through [`TlsConnector`], with optional pinning
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use socketio_engine::{ConnectionStatus, EngineClient, Error, Result, SocketEngine};
//!
//! struct Handler;
//!
//! impl EngineClient for Handler {
//!     fn engine_did_close(&self, reason: &str) { println!("closed: {reason}"); }
//!     fn engine_did_error(&self, error: &Error) { eprintln!("{error}"); }
//!     fn parse_engine_message(&self, message: &str) { println!("<- {message}"); }
//!     fn parse_engine_binary_data(&self, data: &[u8]) { println!("<- {} bytes", data.len()); }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let engine = SocketEngine::builder("http://localhost:3000")
//!         .client(Arc::new(Handler))
//!         .build()?;
//!
//!     engine.open()?;
//!     engine.wait_for_status(ConnectionStatus::Connected).await?;
//!
//!     engine
//!         .emit_with_ack("hello", [serde_json::json!("world")], |reply| {
//!             println!("ack: {reply:?}");
//!         })
//!         .await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`engine`] | Engine handle, builder, options and state machine |
//! | [`ack`] | Ack callback registry |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`frame`] | RFC 6455 frame codec |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Engine.IO and Socket.IO packet formats |
//! | [`security`] | Certificate pinning |
//! | [`transport`] | Polling and WebSocket transports |

// ============================================================================
// Modules
// ============================================================================

/// Ack callback registry.
pub mod ack;

/// Engine handle, builder and state machine.
///
/// Use [`SocketEngine::builder()`] to create a configured engine.
pub mod engine;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// RFC 6455 WebSocket frame codec.
pub mod frame;

/// Type-safe identifiers for sessions and acks.
pub mod identifiers;

/// Engine.IO and Socket.IO packet formats.
pub mod protocol;

/// Certificate and public-key pinning.
pub mod security;

/// Polling and WebSocket transports.
///
/// Mostly internal; exposes the [`TlsConnector`] seam.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Engine types
pub use engine::{
    ConnectionStatus, EngineBuilder, EngineClient, EngineHandle, EngineOptions, EngineSnapshot,
    SocketEngine,
};

// Ack types
pub use ack::AckRegistry;

// Error types
pub use error::{Error, Result};

// Frame types
pub use frame::{CloseCode, CodecConfig, FrameCodec, Message, OpCode};

// Identifier types
pub use identifiers::{AckId, SessionId};

// Protocol types
pub use protocol::{EnginePacket, EnginePacketType, ProtocolVersion, SocketPacket, SocketPacketType};

// Security types
pub use security::{CertificateValidator, PeerCertificate, PinSet, TrustContext};

// Transport types
pub use transport::{AsyncStream, BoxedStream, TlsConnector};
