//! Error types for the Socket.IO engine.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use socketio_engine::{FrameCodec, Result};
//!
//! fn feed(codec: &mut FrameCodec, bytes: &[u8]) -> Result<()> {
//!     for message in codec.decode(bytes)? {
//!         println!("{message:?}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Framing | [`Error::Protocol`], [`Error::UnhandledType`], [`Error::MessageTooBig`] |
//! | Connection | [`Error::Transport`], [`Error::ConnectionClosed`], [`Error::Timeout`] |
//! | Security | [`Error::TrustRejected`] |
//! | Acknowledgement | [`Error::AckTimeout`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::Http`], [`Error::Url`], [`Error::WebSocket`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::frame::CloseCode;
use crate::identifiers::AckId;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when engine options are invalid or contradictory.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Framing Errors
    // ========================================================================
    /// Protocol violation.
    ///
    /// Malformed frame header, reserved bits set, invalid UTF-8 payload,
    /// or an Engine.IO / Socket.IO packet that cannot be parsed.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    /// Frame used a reserved opcode (0x3-0x7, 0xB-0xF).
    #[error("Unhandled frame type: opcode {opcode:#x}")]
    UnhandledType {
        /// The raw opcode nibble.
        opcode: u8,
    },

    /// Message exceeded the configured maximum size.
    #[error("Message too big: {size} bytes exceeds limit of {max}")]
    MessageTooBig {
        /// Size the message would have reached.
        size: u64,
        /// Configured maximum.
        max: usize,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Transport failure (socket or HTTP level).
    ///
    /// Returned when the polling or WebSocket transport cannot be used.
    #[error("Transport error: {message}")]
    Transport {
        /// Description of the transport failure.
        message: String,
    },

    /// Connection closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Operation timeout.
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout {
        /// Description of the operation that timed out.
        operation: String,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    // ========================================================================
    // Security Errors
    // ========================================================================
    /// TLS session rejected by certificate pinning.
    #[error("Trust rejected for domain: {domain}")]
    TrustRejected {
        /// Domain whose session was rejected.
        domain: String,
    },

    // ========================================================================
    // Acknowledgement Errors
    // ========================================================================
    /// Acknowledgement not received in time.
    ///
    /// Local only; never closes the connection.
    #[error("Ack {ack_id} timed out after {timeout_ms}ms")]
    AckTimeout {
        /// The ack that expired.
        ack_id: AckId,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP polling error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Invalid URL.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// WebSocket handshake error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates an unhandled frame type error.
    #[inline]
    pub fn unhandled_type(opcode: u8) -> Self {
        Self::UnhandledType { opcode }
    }

    /// Creates a message too big error.
    #[inline]
    pub fn message_too_big(size: u64, max: usize) -> Self {
        Self::MessageTooBig { size, max }
    }

    /// Creates a transport error.
    #[inline]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    #[inline]
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Creates a trust rejected error.
    #[inline]
    pub fn trust_rejected(domain: impl Into<String>) -> Self {
        Self::TrustRejected {
            domain: domain.into(),
        }
    }

    /// Creates an ack timeout error.
    #[inline]
    pub fn ack_timeout(ack_id: AckId, timeout_ms: u64) -> Self {
        Self::AckTimeout { ack_id, timeout_ms }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns the close code sent to the peer when this error ends a
    /// WebSocket connection.
    #[must_use]
    pub fn close_code(&self) -> Option<CloseCode> {
        match self {
            Self::Protocol { .. } => Some(CloseCode::ProtocolError),
            Self::UnhandledType { .. } => Some(CloseCode::ProtocolUnhandledType),
            Self::MessageTooBig { .. } => Some(CloseCode::MessageTooBig),
            Self::TrustRejected { .. } => Some(CloseCode::PolicyViolated),
            _ => None,
        }
    }

    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::AckTimeout { .. })
    }

    /// Returns `true` if this error came from frame decoding.
    #[inline]
    #[must_use]
    pub fn is_framing_error(&self) -> bool {
        matches!(
            self,
            Self::Protocol { .. } | Self::UnhandledType { .. } | Self::MessageTooBig { .. }
        )
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. }
                | Self::ConnectionClosed
                | Self::Timeout { .. }
                | Self::Io(_)
                | Self::Http(_)
                | Self::WebSocket(_)
        )
    }

    /// Returns `true` if this error must tear down the active connection.
    ///
    /// Ack timeouts and configuration errors never do.
    #[inline]
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.is_framing_error() || self.is_connection_error() || self.is_trust_error()
    }

    /// Returns `true` if this is a pinning rejection.
    #[inline]
    #[must_use]
    pub fn is_trust_error(&self) -> bool {
        matches!(self, Self::TrustRejected { .. })
    }

    /// Returns `true` if reopening the engine may succeed.
    ///
    /// A rejected pin set is never retried.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        self.is_connection_error()
    }
}

// ============================================================================
// Tests
// ============================================================================
