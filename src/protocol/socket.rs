//! Socket.IO packet envelope.
//!
//! Carried as the text of an Engine.IO `message` packet:
//!
//! ```text
//! <type>[<attachments>-][<namespace>,][<ack id>][<json>]
//! ```
//!
//! | Example | Meaning |
//! |---------|---------|
//! | `2["chat","hi"]` | event on `/` |
//! | `2/admin,7["chat","hi"]` | event on `/admin` expecting ack 7 |
//! | `37["ok"]` | ack 7 with one value |
//! | `51-["upload",{"_placeholder":true,"num":0}]` | binary event, one attachment |

// ============================================================================
// Imports
// ============================================================================

use serde_json::Value;

use crate::error::{Error, Result};
use crate::identifiers::AckId;

// ============================================================================
// Constants
// ============================================================================

/// Default namespace.
pub const DEFAULT_NAMESPACE: &str = "/";

// ============================================================================
// SocketPacketType
// ============================================================================

/// Socket.IO packet type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SocketPacketType {
    /// Namespace connect.
    Connect = 0,
    /// Namespace disconnect.
    Disconnect = 1,
    /// Event.
    Event = 2,
    /// Acknowledgement.
    Ack = 3,
    /// Connect error.
    Error = 4,
    /// Event with binary attachments.
    BinaryEvent = 5,
    /// Ack with binary attachments.
    BinaryAck = 6,
}

impl SocketPacketType {
    /// Parses a type digit.
    ///
    /// # Errors
    ///
    /// [`Error::Protocol`] for anything other than `'0'..='6'`.
    pub fn from_char(c: char) -> Result<Self> {
        match c {
            '0' => Ok(Self::Connect),
            '1' => Ok(Self::Disconnect),
            '2' => Ok(Self::Event),
            '3' => Ok(Self::Ack),
            '4' => Ok(Self::Error),
            '5' => Ok(Self::BinaryEvent),
            '6' => Ok(Self::BinaryAck),
            other => Err(Error::protocol(format!(
                "unknown socket packet type {other:?}"
            ))),
        }
    }

    /// Returns the type digit.
    #[inline]
    #[must_use]
    pub const fn as_char(self) -> char {
        (b'0' + self as u8) as char
    }

    /// Returns `true` for packet types carrying binary attachments.
    #[inline]
    #[must_use]
    pub const fn is_binary(self) -> bool {
        matches!(self, Self::BinaryEvent | Self::BinaryAck)
    }
}

// ============================================================================
// SocketPacket
// ============================================================================

/// A parsed Socket.IO packet.
#[derive(Debug, Clone, PartialEq)]
pub struct SocketPacket {
    /// Packet type.
    pub packet_type: SocketPacketType,
    /// Namespace, `/` by default.
    pub namespace: String,
    /// Ack id, if the sender expects or answers an ack.
    pub id: Option<AckId>,
    /// Number of binary attachments that follow (binary types only).
    pub attachments: usize,
    /// JSON body.
    pub data: Option<Value>,
}

impl SocketPacket {
    /// Creates an event packet: `data` is `[name, ...args]`.
    #[must_use]
    pub fn event(
        namespace: impl Into<String>,
        name: &str,
        args: impl IntoIterator<Item = Value>,
        id: Option<AckId>,
    ) -> Self {
        let mut items = vec![Value::String(name.to_string())];
        items.extend(args);
        Self {
            packet_type: SocketPacketType::Event,
            namespace: namespace.into(),
            id,
            attachments: 0,
            data: Some(Value::Array(items)),
        }
    }

    /// Creates an ack reply to a server event.
    #[must_use]
    pub fn ack(namespace: impl Into<String>, id: AckId, items: Vec<Value>) -> Self {
        Self {
            packet_type: SocketPacketType::Ack,
            namespace: namespace.into(),
            id: Some(id),
            attachments: 0,
            data: Some(Value::Array(items)),
        }
    }

    /// Parses the text of an Engine.IO message.
    ///
    /// # Errors
    ///
    /// [`Error::Protocol`] on an unknown type or malformed attachment count,
    /// [`Error::Json`] if the body is not JSON.
    pub fn parse(message: &str) -> Result<Self> {
        let mut chars = message.chars();
        let first = chars
            .next()
            .ok_or_else(|| Error::protocol("empty socket packet"))?;
        let packet_type = SocketPacketType::from_char(first)?;
        let mut rest = chars.as_str();

        let mut attachments = 0;
        if packet_type.is_binary() {
            let (count, tail) = rest
                .split_once('-')
                .ok_or_else(|| Error::protocol("binary packet missing attachment count"))?;
            attachments = count
                .parse()
                .map_err(|_| Error::protocol(format!("invalid attachment count {count:?}")))?;
            rest = tail;
        }

        let mut namespace = DEFAULT_NAMESPACE.to_string();
        if rest.starts_with('/') {
            match rest.split_once(',') {
                Some((nsp, tail)) => {
                    namespace = nsp.to_string();
                    rest = tail;
                }
                None => {
                    namespace = rest.to_string();
                    rest = "";
                }
            }
        }

        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        let id = if digits > 0 {
            let raw: u64 = rest[..digits]
                .parse()
                .map_err(|_| Error::protocol("ack id out of range"))?;
            rest = &rest[digits..];
            Some(AckId::new(raw))
        } else {
            None
        };

        let data = if rest.is_empty() {
            None
        } else {
            Some(serde_json::from_str(rest)?)
        };

        Ok(Self {
            packet_type,
            namespace,
            id,
            attachments,
            data,
        })
    }

    /// Encodes the packet as Engine.IO message text.
    #[must_use]
    pub fn encode(&self) -> String {
        let mut out = String::new();
        out.push(self.packet_type.as_char());

        if self.packet_type.is_binary() {
            out.push_str(&self.attachments.to_string());
            out.push('-');
        }

        if self.namespace != DEFAULT_NAMESPACE {
            out.push_str(&self.namespace);
            out.push(',');
        }

        if let Some(id) = self.id {
            out.push_str(&id.to_string());
        }

        if let Some(data) = &self.data {
            out.push_str(&data.to_string());
        }

        out
    }

    /// Returns the JSON array items, or the single non-array value.
    #[must_use]
    pub fn items(&self) -> Vec<Value> {
        match &self.data {
            Some(Value::Array(items)) => items.clone(),
            Some(other) => vec![other.clone()],
            None => Vec::new(),
        }
    }

    /// Returns the event name for event packets.
    #[must_use]
    pub fn event_name(&self) -> Option<&str> {
        match (&self.packet_type, &self.data) {
            (SocketPacketType::Event | SocketPacketType::BinaryEvent, Some(Value::Array(items))) => {
                items.first().and_then(Value::as_str)
            }
            _ => None,
        }
    }

    /// Returns `true` if this packet resolves a pending ack.
    #[inline]
    #[must_use]
    pub fn is_ack(&self) -> bool {
        self.packet_type == SocketPacketType::Ack && self.id.is_some()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_parse_event() {
        let packet = SocketPacket::parse(r#"2["chat","hi"]"#).unwrap();
        assert_eq!(packet.packet_type, SocketPacketType::Event);
        assert_eq!(packet.namespace, "/");
        assert_eq!(packet.id, None);
        assert_eq!(packet.event_name(), Some("chat"));
    }

    #[test]
    fn test_parse_ack_with_namespace() {
        let packet = SocketPacket::parse(r#"3/admin,12[1,2]"#).unwrap();
        assert!(packet.is_ack());
        assert_eq!(packet.namespace, "/admin");
        assert_eq!(packet.id, Some(AckId::new(12)));
        assert_eq!(packet.items(), vec![json!(1), json!(2)]);
    }

    #[test]
    fn test_parse_binary_event() {
        let packet =
            SocketPacket::parse(r#"52-["upload",{"_placeholder":true,"num":0}]"#).unwrap();
        assert_eq!(packet.packet_type, SocketPacketType::BinaryEvent);
        assert_eq!(packet.attachments, 2);
        assert!(SocketPacket::parse(r#"5["x"]"#).is_err());
    }

    #[test]
    fn test_parse_bare_connect() {
        let packet = SocketPacket::parse("0").unwrap();
        assert_eq!(packet.packet_type, SocketPacketType::Connect);
        assert!(packet.data.is_none());

        let packet = SocketPacket::parse("1/chat").unwrap();
        assert_eq!(packet.namespace, "/chat");
    }

    #[test]
    fn test_parse_invalid() {
        assert!(SocketPacket::parse("").is_err());
        assert!(SocketPacket::parse("9").is_err());
        assert!(matches!(SocketPacket::parse("2[oops"), Err(Error::Json(_))));
    }

    #[test]
    fn test_encode_event_with_ack() {
        let packet = SocketPacket::event("/admin", "chat", [json!("hi")], Some(AckId::new(7)));
        assert_eq!(packet.encode(), r#"2/admin,7["chat","hi"]"#);

        let reparsed = SocketPacket::parse(&packet.encode()).unwrap();
        assert_eq!(reparsed, packet);
    }

    #[test]
    fn test_encode_ack() {
        let packet = SocketPacket::ack("/", AckId::new(3), vec![json!({"ok": true})]);
        assert_eq!(packet.encode(), r#"33[{"ok":true}]"#);
    }
}
