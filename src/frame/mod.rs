//! WebSocket framing layer (RFC 6455).
//!
//! Turns a raw byte stream into logical messages and back. The codec is
//! transport agnostic: it never touches a socket, it only consumes and
//! produces bytes.
//!
//! # Frame Header
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |                 Masking key (if MASK set)                     |
//! +---------------------------------------------------------------+
//! |                     Payload data                              |
//! +---------------------------------------------------------------+
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `codec` | [`FrameCodec`] encoder/decoder and the in-flight [`WsResponse`] |

// ============================================================================
// Submodules
// ============================================================================

/// Frame encoder/decoder.
pub mod codec;

// ============================================================================
// Imports
// ============================================================================

use crate::error::{Error, Result};

// ============================================================================
// Re-exports
// ============================================================================

pub use codec::{CodecConfig, FrameCodec, WsResponse};

// ============================================================================
// Constants
// ============================================================================

/// Maximum payload of a control frame.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

// ============================================================================
// OpCode
// ============================================================================

/// Frame type discriminator.
///
/// `0x3`-`0x7` and `0xB`-`0xF` are reserved and rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    /// Continuation of a fragmented message.
    Continuation = 0x0,
    /// UTF-8 text message.
    Text = 0x1,
    /// Binary message.
    Binary = 0x2,
    /// Connection close.
    Close = 0x8,
    /// Ping.
    Ping = 0x9,
    /// Pong.
    Pong = 0xA,
}

impl OpCode {
    /// Parses the low nibble of the first header byte.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnhandledType`] for reserved opcodes.
    #[inline]
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xA => Ok(Self::Pong),
            other => Err(Error::unhandled_type(other)),
        }
    }

    /// Returns the wire value.
    #[inline]
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Returns `true` for close, ping and pong.
    #[inline]
    #[must_use]
    pub const fn is_control(self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }

    /// Returns `true` for text and binary.
    #[inline]
    #[must_use]
    pub const fn is_data(self) -> bool {
        matches!(self, Self::Text | Self::Binary)
    }
}

// ============================================================================
// CloseCode
// ============================================================================

/// Status codes sent in close frames.
///
/// 1004 and 1006 are reserved and never sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum CloseCode {
    /// Normal closure.
    Normal = 1000,
    /// Endpoint going away.
    GoingAway = 1001,
    /// Protocol error.
    ProtocolError = 1002,
    /// Received a frame type it cannot handle.
    ProtocolUnhandledType = 1003,
    /// No status code was present.
    NoStatusReceived = 1005,
    /// Payload data inconsistent with message type.
    Encoding = 1007,
    /// Policy violated.
    PolicyViolated = 1008,
    /// Message too big to process.
    MessageTooBig = 1009,
}

impl CloseCode {
    /// Returns the numeric status code.
    #[inline]
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Maps a numeric status code to a known variant.
    #[must_use]
    pub const fn from_u16(code: u16) -> Option<Self> {
        match code {
            1000 => Some(Self::Normal),
            1001 => Some(Self::GoingAway),
            1002 => Some(Self::ProtocolError),
            1003 => Some(Self::ProtocolUnhandledType),
            1005 => Some(Self::NoStatusReceived),
            1007 => Some(Self::Encoding),
            1008 => Some(Self::PolicyViolated),
            1009 => Some(Self::MessageTooBig),
            _ => None,
        }
    }
}

// ============================================================================
// Message
// ============================================================================

/// A completed logical message produced by [`FrameCodec::decode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Reassembled text message.
    Text(String),
    /// Reassembled binary message.
    Binary(Vec<u8>),
    /// Close frame with optional status code and reason.
    Close {
        /// Raw status code from the first two payload bytes.
        code: Option<u16>,
        /// UTF-8 reason following the code.
        reason: String,
    },
    /// Ping with application data.
    Ping(Vec<u8>),
    /// Pong with application data.
    Pong(Vec<u8>),
}

impl Message {
    /// Returns the opcode this message was carried under.
    #[must_use]
    pub fn opcode(&self) -> OpCode {
        match self {
            Self::Text(_) => OpCode::Text,
            Self::Binary(_) => OpCode::Binary,
            Self::Close { .. } => OpCode::Close,
            Self::Ping(_) => OpCode::Ping,
            Self::Pong(_) => OpCode::Pong,
        }
    }

    /// Returns the payload bytes.
    ///
    /// For close messages this is the reason only.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(data) | Self::Ping(data) | Self::Pong(data) => data,
            Self::Close { reason, .. } => reason.as_bytes(),
        }
    }

    /// Returns the close code if this is a close message with a known code.
    #[must_use]
    pub fn close_code(&self) -> Option<CloseCode> {
        match self {
            Self::Close {
                code: Some(code), ..
            } => CloseCode::from_u16(*code),
            _ => None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_roundtrip() {
        for op in [
            OpCode::Continuation,
            OpCode::Text,
            OpCode::Binary,
            OpCode::Close,
            OpCode::Ping,
            OpCode::Pong,
        ] {
            assert_eq!(OpCode::from_u8(op.as_u8()).unwrap(), op);
        }
    }

    #[test]
    fn test_reserved_opcodes_rejected() {
        for raw in (0x3..=0x7).chain(0xB..=0xF) {
            let err = OpCode::from_u8(raw).unwrap_err();
            assert!(matches!(err, Error::UnhandledType { opcode } if opcode == raw));
        }
    }

    #[test]
    fn test_control_classification() {
        assert!(OpCode::Ping.is_control());
        assert!(OpCode::Close.is_control());
        assert!(!OpCode::Text.is_control());
        assert!(OpCode::Binary.is_data());
        assert!(!OpCode::Continuation.is_data());
    }

    #[test]
    fn test_close_code_values() {
        assert_eq!(CloseCode::Normal.as_u16(), 1000);
        assert_eq!(CloseCode::MessageTooBig.as_u16(), 1009);
        assert_eq!(CloseCode::from_u16(1003), Some(CloseCode::ProtocolUnhandledType));
        assert_eq!(CloseCode::from_u16(1004), None);
        assert_eq!(CloseCode::from_u16(1006), None);
    }

    #[test]
    fn test_message_close_code() {
        let msg = Message::Close {
            code: Some(1001),
            reason: "bye".into(),
        };
        assert_eq!(msg.close_code(), Some(CloseCode::GoingAway));
        assert_eq!(msg.payload(), b"bye");
        assert_eq!(msg.opcode(), OpCode::Close);
    }
}
