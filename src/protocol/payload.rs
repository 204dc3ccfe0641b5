//! Polling payloads: several packets batched in one HTTP body.
//!
//! v4 joins packets with the record separator `\x1e`. v3 prefixes each
//! packet with its length in UTF-16 code units and a colon
//! (`6:4hello2:40`), matching how JavaScript servers measure strings.

// ============================================================================
// Imports
// ============================================================================

use crate::error::{Error, Result};

use super::{EnginePacket, ProtocolVersion};

// ============================================================================
// Constants
// ============================================================================

/// v4 packet separator.
pub const RECORD_SEPARATOR: &str = "\x1e";

// ============================================================================
// Encoding
// ============================================================================

/// Batches packets into one POST body.
#[must_use]
pub fn encode_payload(packets: &[EnginePacket], version: ProtocolVersion) -> String {
    match version {
        ProtocolVersion::V4 => packets
            .iter()
            .map(|p| p.encode_polling(version))
            .collect::<Vec<_>>()
            .join(RECORD_SEPARATOR),
        ProtocolVersion::V3 => packets
            .iter()
            .map(|p| {
                let encoded = p.encode_polling(version);
                format!("{}:{encoded}", encoded.encode_utf16().count())
            })
            .collect(),
    }
}

// ============================================================================
// Decoding
// ============================================================================

/// Splits a GET response body into packets.
///
/// # Errors
///
/// [`Error::Protocol`] if a length prefix is malformed or overruns the body,
/// or any packet fails to parse.
pub fn decode_payload(body: &str, version: ProtocolVersion) -> Result<Vec<EnginePacket>> {
    if body.is_empty() {
        return Ok(Vec::new());
    }

    match version {
        ProtocolVersion::V4 => body
            .split(RECORD_SEPARATOR)
            .map(|packet| EnginePacket::decode_polling(packet, version))
            .collect(),
        ProtocolVersion::V3 => decode_length_prefixed(body)?
            .into_iter()
            .map(|packet| EnginePacket::decode_polling(packet, version))
            .collect(),
    }
}

fn decode_length_prefixed(mut body: &str) -> Result<Vec<&str>> {
    let mut packets = Vec::new();

    while !body.is_empty() {
        let (len, rest) = body
            .split_once(':')
            .ok_or_else(|| Error::protocol("polling payload missing length prefix"))?;
        let len: usize = len
            .parse()
            .map_err(|_| Error::protocol(format!("invalid polling length prefix {len:?}")))?;

        let end = utf16_offset(rest, len).ok_or_else(|| {
            Error::protocol(format!("polling packet length {len} overruns payload"))
        })?;
        packets.push(&rest[..end]);
        body = &rest[end..];
    }

    Ok(packets)
}

/// Byte offset after `units` UTF-16 code units of `s`.
fn utf16_offset(s: &str, units: usize) -> Option<usize> {
    let mut counted = 0;
    for (offset, c) in s.char_indices() {
        if counted == units {
            return Some(offset);
        }
        counted += c.len_utf16();
    }
    (counted == units).then_some(s.len())
}

// ============================================================================
// UTF-8 Double Encoding
// ============================================================================

/// Maps each UTF-8 byte to one char (Latin-1 view), as old v3 servers expect
/// for polling text.
#[must_use]
pub fn double_encode_utf8(text: &str) -> String {
    text.bytes().map(char::from).collect()
}

/// Reverses [`double_encode_utf8`]; returns the input unchanged if it is not
/// a Latin-1 view of valid UTF-8.
#[must_use]
pub fn double_decode_utf8(text: &str) -> String {
    let bytes: Option<Vec<u8>> = text.chars().map(|c| u8::try_from(c).ok()).collect();
    bytes
        .and_then(|b| String::from_utf8(b).ok())
        .unwrap_or_else(|| text.to_string())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::protocol::{EnginePacketType, PacketData};

    fn message(text: &str) -> EnginePacket {
        EnginePacket::text(EnginePacketType::Message, text)
    }

    #[test]
    fn test_v4_batching() {
        let packets = [message("hello"), EnginePacket::binary(b"hi".to_vec())];
        let body = encode_payload(&packets, ProtocolVersion::V4);
        assert_eq!(body, "4hello\x1ebaGk=");
        assert_eq!(decode_payload(&body, ProtocolVersion::V4).unwrap(), packets);
    }

    #[test]
    fn test_v3_length_prefix() {
        let packets = [message("hello"), EnginePacket::text(EnginePacketType::Ping, "")];
        let body = encode_payload(&packets, ProtocolVersion::V3);
        assert_eq!(body, "6:4hello1:2");
        assert_eq!(decode_payload(&body, ProtocolVersion::V3).unwrap(), packets);
    }

    #[test]
    fn test_v3_length_counts_utf16_units() {
        // U+1F600 is two UTF-16 units.
        let packets = [message("\u{1F600}é"), message("x")];
        let body = encode_payload(&packets, ProtocolVersion::V3);
        assert!(body.starts_with("4:"));
        assert_eq!(decode_payload(&body, ProtocolVersion::V3).unwrap(), packets);
    }

    #[test]
    fn test_v3_binary_packet() {
        let decoded = decode_payload("6:b4aGk=", ProtocolVersion::V3).unwrap();
        assert_eq!(decoded[0].data, PacketData::Binary(b"hi".to_vec()));
    }

    #[test]
    fn test_v3_malformed() {
        assert!(decode_payload("4hello", ProtocolVersion::V3).is_err());
        assert!(decode_payload("x:4hello", ProtocolVersion::V3).is_err());
        assert!(decode_payload("9:4hi", ProtocolVersion::V3).is_err());
    }

    #[test]
    fn test_empty_payload() {
        assert!(decode_payload("", ProtocolVersion::V4).unwrap().is_empty());
        assert!(decode_payload("", ProtocolVersion::V3).unwrap().is_empty());
    }

    #[test]
    fn test_double_encoding() {
        let encoded = double_encode_utf8("né");
        assert_eq!(encoded.chars().count(), 3);
        assert_eq!(double_decode_utf8(&encoded), "né");
        assert_eq!(double_decode_utf8("\u{1F600}"), "\u{1F600}");
    }
}
