//! Engine.IO packets.
//!
//! Text packets are `<type digit><data>`. Binary packets are always of type
//! `message`; how their bytes travel depends on transport and version:
//!
//! | Transport | v3 | v4 |
//! |-----------|----|----|
//! | WebSocket | binary frame, leading `0x04` | binary frame, raw bytes |
//! | Polling | `b4<base64>` | `b<base64>` |

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::identifiers::SessionId;

use super::ProtocolVersion;

// ============================================================================
// Constants
// ============================================================================

/// Data carried by the upgrade probe ping/pong.
pub const PROBE: &str = "probe";

/// Transport name advertised in the handshake upgrade list.
pub const WEBSOCKET_UPGRADE: &str = "websocket";

// ============================================================================
// EnginePacketType
// ============================================================================

/// Engine.IO packet type, encoded as a single ASCII digit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EnginePacketType {
    /// Handshake.
    Open = 0,
    /// Transport close.
    Close = 1,
    /// Heartbeat or probe.
    Ping = 2,
    /// Heartbeat reply or probe echo.
    Pong = 3,
    /// Socket.IO payload.
    Message = 4,
    /// Transport upgrade.
    Upgrade = 5,
    /// No operation.
    Noop = 6,
}

impl EnginePacketType {
    /// Parses a type digit.
    ///
    /// # Errors
    ///
    /// [`Error::Protocol`] for anything other than `'0'..='6'`.
    pub fn from_char(c: char) -> Result<Self> {
        match c {
            '0' => Ok(Self::Open),
            '1' => Ok(Self::Close),
            '2' => Ok(Self::Ping),
            '3' => Ok(Self::Pong),
            '4' => Ok(Self::Message),
            '5' => Ok(Self::Upgrade),
            '6' => Ok(Self::Noop),
            other => Err(Error::protocol(format!(
                "unknown engine packet type {other:?}"
            ))),
        }
    }

    /// Returns the type digit.
    #[inline]
    #[must_use]
    pub const fn as_char(self) -> char {
        (b'0' + self as u8) as char
    }
}

// ============================================================================
// PacketData
// ============================================================================

/// Packet body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketData {
    /// Text following the type digit.
    Text(String),
    /// Binary message bytes.
    Binary(Vec<u8>),
}

// ============================================================================
// EnginePacket
// ============================================================================

/// One Engine.IO packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnginePacket {
    /// Packet type.
    pub packet_type: EnginePacketType,
    /// Packet body.
    pub data: PacketData,
}

impl EnginePacket {
    /// Creates a text packet.
    #[inline]
    #[must_use]
    pub fn text(packet_type: EnginePacketType, data: impl Into<String>) -> Self {
        Self {
            packet_type,
            data: PacketData::Text(data.into()),
        }
    }

    /// Creates a binary message packet.
    #[inline]
    #[must_use]
    pub fn binary(data: impl Into<Vec<u8>>) -> Self {
        Self {
            packet_type: EnginePacketType::Message,
            data: PacketData::Binary(data.into()),
        }
    }

    /// Returns `true` for a binary packet.
    #[inline]
    #[must_use]
    pub fn is_binary(&self) -> bool {
        matches!(self.data, PacketData::Binary(_))
    }

    /// Returns the text body, or `""` for binary packets.
    #[inline]
    #[must_use]
    pub fn text_data(&self) -> &str {
        match &self.data {
            PacketData::Text(text) => text,
            PacketData::Binary(_) => "",
        }
    }

    /// Returns `true` if this is `2probe` or `3probe`.
    #[inline]
    #[must_use]
    pub fn is_probe(&self, packet_type: EnginePacketType) -> bool {
        self.packet_type == packet_type && self.text_data() == PROBE
    }

    /// Parses a text packet (`<digit><data>`).
    ///
    /// # Errors
    ///
    /// [`Error::Protocol`] if the message is empty or the type digit is
    /// unknown.
    pub fn decode_text(message: &str) -> Result<Self> {
        let mut chars = message.chars();
        let first = chars
            .next()
            .ok_or_else(|| Error::protocol("empty engine packet"))?;
        let packet_type = EnginePacketType::from_char(first)?;
        Ok(Self::text(packet_type, chars.as_str()))
    }

    /// Parses a binary WebSocket message.
    ///
    /// # Errors
    ///
    /// [`Error::Protocol`] if a v3 binary message lacks its leading type byte.
    pub fn decode_ws_binary(mut data: Vec<u8>, version: ProtocolVersion) -> Result<Self> {
        if version == ProtocolVersion::V3 {
            match data.first() {
                Some(&byte) if byte == EnginePacketType::Message as u8 => {
                    data.remove(0);
                }
                _ => return Err(Error::protocol("binary message without type byte")),
            }
        }
        Ok(Self::binary(data))
    }

    /// Encodes for a WebSocket text frame. Binary packets return `None`.
    #[must_use]
    pub fn encode_text(&self) -> Option<String> {
        match &self.data {
            PacketData::Text(text) => {
                let mut out = String::with_capacity(1 + text.len());
                out.push(self.packet_type.as_char());
                out.push_str(text);
                Some(out)
            }
            PacketData::Binary(_) => None,
        }
    }

    /// Encodes a binary packet for a WebSocket binary frame.
    #[must_use]
    pub fn encode_ws_binary(&self, version: ProtocolVersion) -> Option<Vec<u8>> {
        let PacketData::Binary(data) = &self.data else {
            return None;
        };
        let mut out = Vec::with_capacity(1 + data.len());
        if version == ProtocolVersion::V3 {
            out.push(EnginePacketType::Message as u8);
        }
        out.extend_from_slice(data);
        Some(out)
    }

    /// Encodes for inclusion in a polling payload.
    #[must_use]
    pub fn encode_polling(&self, version: ProtocolVersion) -> String {
        match &self.data {
            PacketData::Text(_) => self.encode_text().unwrap_or_default(),
            PacketData::Binary(data) => {
                let prefix = match version {
                    ProtocolVersion::V3 => "b4",
                    ProtocolVersion::V4 => "b",
                };
                format!("{prefix}{}", BASE64.encode(data))
            }
        }
    }

    /// Parses one packet out of a polling payload.
    ///
    /// # Errors
    ///
    /// [`Error::Protocol`] on an unknown type or invalid base64.
    pub fn decode_polling(packet: &str, version: ProtocolVersion) -> Result<Self> {
        let Some(encoded) = packet.strip_prefix('b') else {
            return Self::decode_text(packet);
        };

        let encoded = match version {
            ProtocolVersion::V3 => encoded.strip_prefix('4').unwrap_or(encoded),
            ProtocolVersion::V4 => encoded,
        };
        let data = BASE64
            .decode(encoded)
            .map_err(|e| Error::protocol(format!("invalid base64 binary packet: {e}")))?;
        Ok(Self::binary(data))
    }
}

// ============================================================================
// Handshake
// ============================================================================

/// Body of the `open` packet.
///
/// ```json
/// {"sid":"lv_VI97HAXpY6yYWAAAC","upgrades":["websocket"],"pingInterval":25000,"pingTimeout":20000}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    /// Session id.
    pub sid: SessionId,

    /// Transports the server allows upgrading to.
    #[serde(default)]
    pub upgrades: Vec<String>,

    /// Heartbeat interval in milliseconds.
    pub ping_interval: u64,

    /// Heartbeat timeout in milliseconds.
    pub ping_timeout: u64,

    /// Largest payload the server accepts per polling request (v4).
    #[serde(default)]
    pub max_payload: Option<u64>,
}

impl Handshake {
    /// Parses the JSON body of an `open` packet.
    ///
    /// # Errors
    ///
    /// [`Error::Json`] if the body is not a valid handshake.
    pub fn parse(body: &str) -> Result<Self> {
        Ok(serde_json::from_str(body)?)
    }

    /// Returns `true` if the server advertises a WebSocket upgrade.
    #[inline]
    #[must_use]
    pub fn can_upgrade(&self) -> bool {
        self.upgrades.iter().any(|u| u == WEBSOCKET_UPGRADE)
    }

    /// Heartbeat interval.
    #[inline]
    #[must_use]
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval)
    }

    /// Heartbeat timeout.
    #[inline]
    #[must_use]
    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_type_digits() {
        for (digit, ty) in ('0'..='6').zip([
            EnginePacketType::Open,
            EnginePacketType::Close,
            EnginePacketType::Ping,
            EnginePacketType::Pong,
            EnginePacketType::Message,
            EnginePacketType::Upgrade,
            EnginePacketType::Noop,
        ]) {
            assert_eq!(EnginePacketType::from_char(digit).unwrap(), ty);
            assert_eq!(ty.as_char(), digit);
        }
        assert!(EnginePacketType::from_char('7').is_err());
    }

    #[test]
    fn test_decode_text() {
        let packet = EnginePacket::decode_text("4hello").unwrap();
        assert_eq!(packet.packet_type, EnginePacketType::Message);
        assert_eq!(packet.text_data(), "hello");

        let probe = EnginePacket::decode_text("3probe").unwrap();
        assert!(probe.is_probe(EnginePacketType::Pong));
        assert!(!probe.is_probe(EnginePacketType::Ping));

        assert!(EnginePacket::decode_text("").is_err());
    }

    #[test]
    fn test_encode_text() {
        let packet = EnginePacket::text(EnginePacketType::Ping, PROBE);
        assert_eq!(packet.encode_text().as_deref(), Some("2probe"));
        assert_eq!(EnginePacket::binary(vec![1]).encode_text(), None);
    }

    #[test]
    fn test_ws_binary_versions() {
        let packet = EnginePacket::binary(vec![1, 2, 3]);
        assert_eq!(packet.encode_ws_binary(ProtocolVersion::V4), Some(vec![1, 2, 3]));
        assert_eq!(packet.encode_ws_binary(ProtocolVersion::V3), Some(vec![4, 1, 2, 3]));

        let decoded = EnginePacket::decode_ws_binary(vec![4, 9], ProtocolVersion::V3).unwrap();
        assert_eq!(decoded.data, PacketData::Binary(vec![9]));
        assert!(EnginePacket::decode_ws_binary(vec![9], ProtocolVersion::V3).is_err());
    }

    #[test]
    fn test_polling_binary() {
        let packet = EnginePacket::binary(b"hi".to_vec());
        assert_eq!(packet.encode_polling(ProtocolVersion::V4), "baGk=");
        assert_eq!(packet.encode_polling(ProtocolVersion::V3), "b4aGk=");

        assert_eq!(
            EnginePacket::decode_polling("baGk=", ProtocolVersion::V4).unwrap(),
            packet
        );
        assert_eq!(
            EnginePacket::decode_polling("b4aGk=", ProtocolVersion::V3).unwrap(),
            packet
        );
        assert!(EnginePacket::decode_polling("b!!", ProtocolVersion::V4).is_err());
    }

    #[test]
    fn test_handshake_parse() {
        let body = r#"{"sid":"abc","upgrades":["websocket"],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#;
        let handshake = Handshake::parse(body).unwrap();
        assert_eq!(handshake.sid.as_str(), "abc");
        assert!(handshake.can_upgrade());
        assert_eq!(handshake.ping_interval(), Duration::from_secs(25));
        assert_eq!(handshake.ping_timeout(), Duration::from_secs(20));
        assert_eq!(handshake.max_payload, Some(1_000_000));
    }

    #[test]
    fn test_handshake_without_upgrades() {
        let body = r#"{"sid":"abc","pingInterval":1,"pingTimeout":2}"#;
        let handshake = Handshake::parse(body).unwrap();
        assert!(!handshake.can_upgrade());
        assert!(Handshake::parse("{}").is_err());
    }
}
