//! Frame encoder and decoder.
//!
//! [`FrameCodec::decode`] keeps a read buffer across calls because frames
//! arrive split across socket reads. A partially received frame is retained
//! and nothing is emitted until it completes. Control frames interleaved with
//! a fragmented data message are delivered immediately and leave the
//! in-flight message untouched.
//!
//! After any decode error the offending frame is skipped (including payload
//! bytes that have not arrived yet), so the codec stays usable for
//! subsequent frames. A 64-bit length with the top bit set has no frame
//! boundary; everything after it is dropped.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;

use tracing::{debug, trace};

use crate::error::{Error, Result};

use super::{CloseCode, MAX_CONTROL_PAYLOAD, Message, OpCode};

// ============================================================================
// Constants
// ============================================================================

/// Default upper bound for a reassembled message (16 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Default payload size above which data messages are fragmented (1 MiB).
pub const DEFAULT_FRAGMENT_THRESHOLD: usize = 1024 * 1024;

/// Largest possible header: 2 + 8 (extended length) + 4 (mask key).
const MAX_HEADER_LEN: usize = 14;

const FIN_BIT: u8 = 0x80;
const RSV_BITS: u8 = 0x70;
const OPCODE_BITS: u8 = 0x0F;
const MASK_BIT: u8 = 0x80;
const LEN_BITS: u8 = 0x7F;

/// 7-bit length marker for a 16-bit extended length.
const LEN_16: u8 = 126;

/// 7-bit length marker for a 64-bit extended length.
const LEN_64: u8 = 127;

/// Largest payload length a frame may declare; the 64-bit form keeps the top bit clear.
const MAX_PAYLOAD_LEN: u64 = i64::MAX as u64;

// ============================================================================
// CodecConfig
// ============================================================================

/// Size limits for a [`FrameCodec`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecConfig {
    /// Maximum reassembled message size in bytes.
    pub max_message_size: usize,

    /// Data payloads larger than this are split into continuation frames.
    ///
    /// `None` disables fragmentation.
    pub fragment_threshold: Option<usize>,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            fragment_threshold: Some(DEFAULT_FRAGMENT_THRESHOLD),
        }
    }
}

impl CodecConfig {
    /// Sets the maximum reassembled message size.
    #[inline]
    #[must_use]
    pub fn with_max_message_size(mut self, max: usize) -> Self {
        self.max_message_size = max;
        self
    }

    /// Sets the fragmentation threshold. Zero is clamped to one byte.
    #[inline]
    #[must_use]
    pub fn with_fragment_threshold(mut self, threshold: usize) -> Self {
        self.fragment_threshold = Some(threshold.max(1));
        self
    }

    /// Disables outgoing fragmentation.
    #[inline]
    #[must_use]
    pub fn without_fragmentation(mut self) -> Self {
        self.fragment_threshold = None;
        self
    }
}

// ============================================================================
// WsResponse
// ============================================================================

/// A data message being reassembled from one or more frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WsResponse {
    /// FIN bit of the most recently merged frame.
    pub is_final: bool,

    /// Opcode of the first frame (text or binary).
    pub opcode: OpCode,

    /// Payload bytes of the current frame not yet received.
    pub remaining_bytes: usize,

    /// Number of frames merged so far.
    pub fragment_count: usize,

    /// Reassembled payload.
    pub payload: Vec<u8>,
}

impl WsResponse {
    fn start(opcode: OpCode, fin: bool, payload: Vec<u8>) -> Self {
        Self {
            is_final: fin,
            opcode,
            remaining_bytes: 0,
            fragment_count: 1,
            payload,
        }
    }

    fn finish(self) -> Result<Message> {
        match self.opcode {
            OpCode::Text => String::from_utf8(self.payload)
                .map(Message::Text)
                .map_err(|_| Error::protocol("invalid UTF-8 in text message")),
            _ => Ok(Message::Binary(self.payload)),
        }
    }
}

// ============================================================================
// FrameHeader
// ============================================================================

/// Parsed fixed and extended header fields.
#[derive(Debug, Clone, Copy)]
struct FrameHeader {
    fin: bool,
    rsv: u8,
    opcode: u8,
    mask: Option<[u8; 4]>,
    payload_len: u64,
    header_len: usize,
}

impl FrameHeader {
    /// Parses a header, returning `None` while it is incomplete.
    fn parse(buf: &[u8]) -> Option<Self> {
        let (&byte0, rest) = buf.split_first()?;
        let &byte1 = rest.first()?;

        let (payload_len, mut header_len) = match byte1 & LEN_BITS {
            LEN_16 => {
                let bytes: [u8; 2] = buf.get(2..4)?.try_into().ok()?;
                (u64::from(u16::from_be_bytes(bytes)), 4)
            }
            LEN_64 => {
                let bytes: [u8; 8] = buf.get(2..10)?.try_into().ok()?;
                (u64::from_be_bytes(bytes), 10)
            }
            short => (u64::from(short), 2),
        };

        let mask = if byte1 & MASK_BIT != 0 {
            let key: [u8; 4] = buf.get(header_len..header_len + 4)?.try_into().ok()?;
            header_len += 4;
            Some(key)
        } else {
            None
        };

        Some(Self {
            fin: byte0 & FIN_BIT != 0,
            rsv: byte0 & RSV_BITS,
            opcode: byte0 & OPCODE_BITS,
            mask,
            payload_len,
            header_len,
        })
    }

    fn frame_len(&self) -> u64 {
        (self.header_len as u64).saturating_add(self.payload_len)
    }
}

// ============================================================================
// FrameCodec
// ============================================================================

/// Stateful WebSocket frame encoder/decoder.
///
/// One codec serves one connection. Decoding is not reentrant: the read
/// buffer and the in-flight message belong to the caller's parse context.
#[derive(Debug, Default)]
pub struct FrameCodec {
    config: CodecConfig,
    /// Bytes received but not yet consumed as a complete frame.
    read_buffer: Vec<u8>,
    /// Fragmented data message being reassembled.
    in_flight: Option<WsResponse>,
    /// Bytes of a rejected frame that still have to be dropped.
    skip_bytes: u64,
    /// Messages completed but not yet returned.
    ready: VecDeque<Message>,
}

impl FrameCodec {
    /// Creates a codec with the given limits.
    #[must_use]
    pub fn new(config: CodecConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Returns the codec configuration.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    /// Returns the message currently being reassembled, if any.
    #[inline]
    #[must_use]
    pub fn in_flight(&self) -> Option<&WsResponse> {
        self.in_flight.as_ref()
    }

    /// Returns the number of buffered bytes not yet forming a full frame.
    #[inline]
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.read_buffer.len()
    }

    /// Drops all buffered state.
    pub fn reset(&mut self) {
        self.read_buffer.clear();
        self.in_flight = None;
        self.skip_bytes = 0;
        self.ready.clear();
    }
}

// ============================================================================
// FrameCodec - Encoding
// ============================================================================

impl FrameCodec {
    /// Encodes a payload into one or more wire frames.
    ///
    /// Data payloads above the fragmentation threshold become an initial
    /// frame followed by continuation frames; control frames are always a
    /// single frame.
    ///
    /// # Errors
    ///
    /// [`Error::Protocol`] if `opcode` is [`OpCode::Continuation`] or a
    /// control payload exceeds 125 bytes.
    pub fn encode(&self, payload: &[u8], opcode: OpCode, masked: bool) -> Result<Vec<u8>> {
        if opcode == OpCode::Continuation {
            return Err(Error::protocol(
                "continuation frames are only produced by fragmentation",
            ));
        }

        if opcode.is_control() && payload.len() > MAX_CONTROL_PAYLOAD {
            return Err(Error::protocol(format!(
                "control frame payload of {} bytes exceeds {MAX_CONTROL_PAYLOAD}",
                payload.len()
            )));
        }

        let mut out = Vec::with_capacity(payload.len() + MAX_HEADER_LEN);

        match self.config.fragment_threshold {
            Some(threshold) if opcode.is_data() && payload.len() > threshold => {
                let count = payload.len().div_ceil(threshold);
                for (index, chunk) in payload.chunks(threshold).enumerate() {
                    let frame_opcode = if index == 0 {
                        opcode
                    } else {
                        OpCode::Continuation
                    };
                    write_frame(&mut out, index + 1 == count, frame_opcode, chunk, masked);
                }
                trace!(fragments = count, len = payload.len(), "Fragmented message");
            }
            _ => write_frame(&mut out, true, opcode, payload, masked),
        }

        Ok(out)
    }

    /// Encodes a close frame carrying a status code and reason.
    ///
    /// The reason is truncated to fit the control frame limit.
    ///
    /// # Errors
    ///
    /// Never fails for well-formed input; the signature mirrors [`Self::encode`].
    pub fn encode_close(&self, code: CloseCode, reason: &str, masked: bool) -> Result<Vec<u8>> {
        let mut payload = Vec::with_capacity(2 + reason.len());
        payload.extend_from_slice(&code.as_u16().to_be_bytes());

        let mut cut = reason.len().min(MAX_CONTROL_PAYLOAD - 2);
        while !reason.is_char_boundary(cut) {
            cut -= 1;
        }
        payload.extend_from_slice(&reason.as_bytes()[..cut]);

        self.encode(&payload, OpCode::Close, masked)
    }
}

// ============================================================================
// FrameCodec - Decoding
// ============================================================================

impl FrameCodec {
    /// Consumes newly arrived bytes and returns completed messages.
    ///
    /// Returns an empty vector while a frame is still incomplete.
    ///
    /// # Errors
    ///
    /// - [`Error::Protocol`] for reserved bits, malformed control frames,
    ///   unexpected continuation/data frames or invalid UTF-8
    /// - [`Error::UnhandledType`] for reserved opcodes
    /// - [`Error::MessageTooBig`] when the message would exceed the limit
    ///
    /// Messages completed earlier in the same call stay available through
    /// [`Self::drain_ready`].
    pub fn decode(&mut self, incoming: &[u8]) -> Result<Vec<Message>> {
        self.read_buffer.extend_from_slice(incoming);
        self.discard_skipped();

        while let Some(header) = FrameHeader::parse(&self.read_buffer) {
            let opcode = match self.check_header(&header) {
                Ok(opcode) => opcode,
                Err(err) => {
                    if matches!(err, Error::MessageTooBig { .. }) {
                        self.in_flight = None;
                    }
                    debug!(error = %err, "Rejecting frame");
                    self.skip_frame(header.frame_len());
                    return Err(err);
                }
            };

            let available = (self.read_buffer.len() - header.header_len) as u64;
            if available < header.payload_len {
                let remaining = header.payload_len - available;
                if opcode == OpCode::Continuation
                    && let Some(message) = self.in_flight.as_mut()
                {
                    message.remaining_bytes = usize::try_from(remaining).unwrap_or(usize::MAX);
                }
                trace!(?opcode, remaining, "Frame incomplete, waiting for more bytes");
                break;
            }

            // Bounded by max_message_size (or the control limit) in check_header.
            let payload_len = header.payload_len as usize;
            let end = header.header_len + payload_len;
            let mut payload = self.read_buffer[header.header_len..end].to_vec();
            self.read_buffer.drain(..end);

            if let Some(key) = header.mask {
                apply_mask(&mut payload, key);
            }

            self.complete_frame(header.fin, opcode, payload)?;
        }

        Ok(self.drain_ready())
    }

    /// Returns messages completed but not yet handed out.
    pub fn drain_ready(&mut self) -> Vec<Message> {
        self.ready.drain(..).collect()
    }

    /// Validates a header against the codec state.
    fn check_header(&self, header: &FrameHeader) -> Result<OpCode> {
        if header.payload_len > MAX_PAYLOAD_LEN {
            return Err(Error::protocol(format!(
                "payload length {:#x} has the most significant bit set",
                header.payload_len
            )));
        }

        if header.rsv != 0 {
            return Err(Error::protocol(format!(
                "reserved bits set: {:#04x}",
                header.rsv
            )));
        }

        let opcode = OpCode::from_u8(header.opcode)?;

        if opcode.is_control() {
            if !header.fin {
                return Err(Error::protocol("fragmented control frame"));
            }
            if header.payload_len > MAX_CONTROL_PAYLOAD as u64 {
                return Err(Error::protocol(format!(
                    "control frame payload of {} bytes exceeds {MAX_CONTROL_PAYLOAD}",
                    header.payload_len
                )));
            }
            return Ok(opcode);
        }

        let buffered = match (opcode, &self.in_flight) {
            (OpCode::Continuation, Some(message)) => message.payload.len() as u64,
            (OpCode::Continuation, None) => {
                return Err(Error::protocol("continuation frame without a message in flight"));
            }
            (_, Some(_)) => {
                return Err(Error::protocol("new data frame while a message is in flight"));
            }
            (_, None) => 0,
        };

        let size = buffered.saturating_add(header.payload_len);
        if size > self.config.max_message_size as u64 {
            return Err(Error::message_too_big(size, self.config.max_message_size));
        }

        Ok(opcode)
    }

    /// Applies a complete frame to the codec state.
    fn complete_frame(&mut self, fin: bool, opcode: OpCode, payload: Vec<u8>) -> Result<()> {
        match opcode {
            OpCode::Continuation => {
                let Some(mut message) = self.in_flight.take() else {
                    return Err(Error::protocol("continuation frame without a message in flight"));
                };
                message.payload.extend_from_slice(&payload);
                message.fragment_count += 1;
                message.remaining_bytes = 0;
                message.is_final = fin;

                if fin {
                    trace!(fragments = message.fragment_count, "Message reassembled");
                    self.ready.push_back(message.finish()?);
                } else {
                    self.in_flight = Some(message);
                }
            }
            OpCode::Text | OpCode::Binary => {
                let message = WsResponse::start(opcode, fin, payload);
                if fin {
                    self.ready.push_back(message.finish()?);
                } else {
                    self.in_flight = Some(message);
                }
            }
            OpCode::Close => self.ready.push_back(parse_close(payload)?),
            OpCode::Ping => self.ready.push_back(Message::Ping(payload)),
            OpCode::Pong => self.ready.push_back(Message::Pong(payload)),
        }
        Ok(())
    }

    /// Drops a rejected frame, remembering bytes that have not arrived yet.
    fn skip_frame(&mut self, frame_len: u64) {
        let available = self.read_buffer.len() as u64;
        if frame_len <= available {
            self.read_buffer.drain(..frame_len as usize);
        } else {
            self.read_buffer.clear();
            self.skip_bytes = frame_len - available;
        }
    }

    fn discard_skipped(&mut self) {
        if self.skip_bytes == 0 {
            return;
        }
        let n = self.skip_bytes.min(self.read_buffer.len() as u64);
        self.read_buffer.drain(..n as usize);
        self.skip_bytes -= n;
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Appends one frame to `out`.
fn write_frame(out: &mut Vec<u8>, fin: bool, opcode: OpCode, payload: &[u8], masked: bool) {
    let fin_bit = if fin { FIN_BIT } else { 0 };
    out.push(fin_bit | opcode.as_u8());

    let mask_bit = if masked { MASK_BIT } else { 0 };
    match payload.len() {
        len if len < usize::from(LEN_16) => out.push(mask_bit | len as u8),
        len if len <= usize::from(u16::MAX) => {
            out.push(mask_bit | LEN_16);
            out.extend_from_slice(&(len as u16).to_be_bytes());
        }
        len => {
            out.push(mask_bit | LEN_64);
            out.extend_from_slice(&(len as u64).to_be_bytes());
        }
    }

    if masked {
        let key: [u8; 4] = rand::random();
        out.extend_from_slice(&key);
        let start = out.len();
        out.extend_from_slice(payload);
        apply_mask(&mut out[start..], key);
    } else {
        out.extend_from_slice(payload);
    }
}

/// XORs every byte with the repeating 4-byte key.
pub(crate) fn apply_mask(data: &mut [u8], key: [u8; 4]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}

/// Reads the optional status code and reason of a close frame.
fn parse_close(payload: Vec<u8>) -> Result<Message> {
    match payload.len() {
        0 => Ok(Message::Close {
            code: None,
            reason: String::new(),
        }),
        1 => Err(Error::protocol("close frame with a one byte payload")),
        _ => {
            let code = u16::from_be_bytes([payload[0], payload[1]]);
            let reason = String::from_utf8(payload[2..].to_vec())
                .map_err(|_| Error::protocol("invalid UTF-8 in close reason"))?;
            Ok(Message::Close {
                code: Some(code),
                reason,
            })
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    fn unfragmented() -> FrameCodec {
        FrameCodec::new(CodecConfig::default().without_fragmentation())
    }

    fn decode_all(codec: &mut FrameCodec, bytes: &[u8]) -> Vec<Message> {
        codec.decode(bytes).expect("decode should succeed")
    }

    /// Splits encoded output into (fin, opcode, masked) triples per frame.
    fn frame_headers(mut bytes: &[u8]) -> Vec<(bool, u8, bool)> {
        let mut headers = Vec::new();
        while let Some(header) = FrameHeader::parse(bytes) {
            headers.push((header.fin, header.opcode, header.mask.is_some()));
            bytes = &bytes[header.frame_len() as usize..];
        }
        assert!(bytes.is_empty(), "trailing bytes after last frame");
        headers
    }

    fn mask_keys(mut bytes: &[u8]) -> Vec<[u8; 4]> {
        let mut keys = Vec::new();
        while let Some(header) = FrameHeader::parse(bytes) {
            keys.extend(header.mask);
            bytes = &bytes[header.frame_len() as usize..];
        }
        keys
    }

    #[test]
    fn test_roundtrip_length_encodings() {
        let codec = unfragmented();
        for len in [0usize, 1, 125, 126, 127, 65_535, 65_536, 70_000] {
            let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let encoded = codec.encode(&payload, OpCode::Binary, true).unwrap();

            let mut decoder = unfragmented();
            let messages = decode_all(&mut decoder, &encoded);
            assert_eq!(messages, vec![Message::Binary(payload)], "len {len}");
        }
    }

    #[test]
    fn test_header_length_branches() {
        let codec = unfragmented();

        let short = codec.encode(&[0u8; 125], OpCode::Binary, false).unwrap();
        assert_eq!(short[1], 125);
        assert_eq!(short.len(), 2 + 125);

        let medium = codec.encode(&[0u8; 126], OpCode::Binary, false).unwrap();
        assert_eq!(medium[1], 126);
        assert_eq!(&medium[2..4], &126u16.to_be_bytes());

        let long = codec.encode(&vec![0u8; 65_536], OpCode::Binary, false).unwrap();
        assert_eq!(long[1], 127);
        assert_eq!(&long[2..10], &65_536u64.to_be_bytes());
    }

    #[test]
    fn test_first_byte_layout() {
        let codec = unfragmented();
        let encoded = codec.encode(b"hi", OpCode::Text, true).unwrap();
        assert_eq!(encoded[0], 0x81);
        assert_eq!(encoded[1] & MASK_BIT, MASK_BIT);
    }

    #[test]
    fn test_text_roundtrip() {
        let codec = unfragmented();
        let encoded = codec.encode("héllo wörld".as_bytes(), OpCode::Text, true).unwrap();
        let mut decoder = unfragmented();
        assert_eq!(
            decode_all(&mut decoder, &encoded),
            vec![Message::Text("héllo wörld".into())]
        );
    }

    #[test]
    fn test_fragmentation_layout() {
        let codec = FrameCodec::new(CodecConfig::default().with_fragment_threshold(10));
        let payload: Vec<u8> = (0..35).collect();
        let encoded = codec.encode(&payload, OpCode::Binary, true).unwrap();

        let headers = frame_headers(&encoded);
        assert_eq!(headers.len(), 4);
        assert_eq!(headers[0], (false, OpCode::Binary.as_u8(), true));
        assert_eq!(headers[1], (false, OpCode::Continuation.as_u8(), true));
        assert_eq!(headers[2], (false, OpCode::Continuation.as_u8(), true));
        assert_eq!(headers[3], (true, OpCode::Continuation.as_u8(), true));

        let mut decoder = unfragmented();
        assert_eq!(decode_all(&mut decoder, &encoded), vec![Message::Binary(payload)]);
        assert!(decoder.in_flight().is_none());
    }

    #[test]
    fn test_payload_at_threshold_not_fragmented() {
        let codec = FrameCodec::new(CodecConfig::default().with_fragment_threshold(10));
        let encoded = codec.encode(&[7u8; 10], OpCode::Text, false).unwrap();
        assert_eq!(frame_headers(&encoded).len(), 1);
    }

    #[test]
    fn test_control_frames_never_fragmented() {
        let codec = FrameCodec::new(CodecConfig::default().with_fragment_threshold(4));
        let encoded = codec.encode(&[1u8; 100], OpCode::Ping, true).unwrap();
        assert_eq!(frame_headers(&encoded), vec![(true, OpCode::Ping.as_u8(), true)]);
    }

    #[test]
    fn test_control_payload_limit() {
        let codec = unfragmented();
        let err = codec.encode(&[0u8; 126], OpCode::Pong, false).unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
    }

    #[test]
    fn test_encode_continuation_rejected() {
        let codec = unfragmented();
        assert!(codec.encode(b"x", OpCode::Continuation, false).is_err());
    }

    #[test]
    fn test_mask_keys_distinct_across_frames() {
        let codec = FrameCodec::new(CodecConfig::default().with_fragment_threshold(1));
        let encoded = codec.encode(&[0u8; 64], OpCode::Binary, true).unwrap();
        let keys = mask_keys(&encoded);
        assert_eq!(keys.len(), 64);

        let mut unique = keys.clone();
        unique.sort_unstable();
        unique.dedup();
        // 64 draws from 2^32 keys; a collision is vanishingly unlikely.
        assert!(unique.len() >= 63);
    }

    #[test]
    fn test_masked_payload_differs_on_wire() {
        let codec = unfragmented();
        let payload = [0xAAu8; 32];
        let encoded = codec.encode(&payload, OpCode::Binary, true).unwrap();
        let key = mask_keys(&encoded)[0];
        let wire = &encoded[6..];

        let mut unmasked = wire.to_vec();
        apply_mask(&mut unmasked, key);
        assert_eq!(unmasked, payload);
    }

    #[test]
    fn test_byte_at_a_time_delivery() {
        let codec = FrameCodec::new(CodecConfig::default().with_fragment_threshold(50));
        let payload: Vec<u8> = (0..200u16).map(|i| i as u8).collect();
        let encoded = codec.encode(&payload, OpCode::Binary, true).unwrap();

        let mut decoder = unfragmented();
        let (last, head) = encoded.split_last().unwrap();
        for byte in head {
            assert!(decode_all(&mut decoder, std::slice::from_ref(byte)).is_empty());
        }
        assert_eq!(
            decode_all(&mut decoder, std::slice::from_ref(last)),
            vec![Message::Binary(payload)]
        );
        assert_eq!(decoder.buffered_len(), 0);
    }

    #[test]
    fn test_multiple_frames_in_one_read() {
        let codec = unfragmented();
        let mut bytes = codec.encode(b"one", OpCode::Text, false).unwrap();
        bytes.extend(codec.encode(b"two", OpCode::Text, false).unwrap());
        bytes.extend(codec.encode(b"th", OpCode::Text, false).unwrap()[..3].iter());

        let mut decoder = unfragmented();
        assert_eq!(
            decode_all(&mut decoder, &bytes),
            vec![Message::Text("one".into()), Message::Text("two".into())]
        );
        assert_eq!(decoder.buffered_len(), 3);
    }

    #[test]
    fn test_control_frame_interleaved_with_fragments() {
        let codec = FrameCodec::new(CodecConfig::default().with_fragment_threshold(4));
        let data = codec.encode(b"abcdefgh", OpCode::Text, false).unwrap();
        // Split after the first fragment (2-byte header + 4 bytes).
        let (first, rest) = data.split_at(6);
        let ping = codec.encode(b"p", OpCode::Ping, false).unwrap();

        let mut decoder = unfragmented();
        assert!(decode_all(&mut decoder, first).is_empty());
        assert_eq!(decoder.in_flight().map(|m| m.fragment_count), Some(1));

        assert_eq!(decode_all(&mut decoder, &ping), vec![Message::Ping(b"p".to_vec())]);
        assert_eq!(decoder.in_flight().map(|m| m.payload.as_slice()), Some(&b"abcd"[..]));

        assert_eq!(
            decode_all(&mut decoder, rest),
            vec![Message::Text("abcdefgh".into())]
        );
    }

    #[test]
    fn test_remaining_bytes_tracked_for_continuation() {
        let codec = FrameCodec::new(CodecConfig::default().with_fragment_threshold(10));
        let data = codec.encode(&[1u8; 20], OpCode::Binary, false).unwrap();

        let mut decoder = unfragmented();
        // First frame complete, second frame header plus 3 of 10 payload bytes.
        decode_all(&mut decoder, &data[..12 + 2 + 3]);
        let in_flight = decoder.in_flight().unwrap();
        assert_eq!(in_flight.remaining_bytes, 7);
        assert_eq!(in_flight.payload.len(), 10);
    }

    #[test]
    fn test_reserved_opcode_then_valid_frame() {
        let mut decoder = unfragmented();
        let mut bytes = vec![0x80 | 0x3, 2, b'x', b'y'];
        bytes.extend(unfragmented().encode(b"ok", OpCode::Text, true).unwrap());

        let err = decoder.decode(&bytes[..4]).unwrap_err();
        assert!(matches!(err, Error::UnhandledType { opcode: 0x3 }));
        assert_eq!(decoder.buffered_len(), 0);

        assert_eq!(
            decode_all(&mut decoder, &bytes[4..]),
            vec![Message::Text("ok".into())]
        );
    }

    #[test]
    fn test_reserved_opcode_keeps_in_flight_message() {
        let codec = FrameCodec::new(CodecConfig::default().with_fragment_threshold(3));
        let data = codec.encode(b"abcdef", OpCode::Text, false).unwrap();
        let (first, rest) = data.split_at(5);

        let mut decoder = unfragmented();
        decode_all(&mut decoder, first);

        // Reserved opcode whose payload straddles two reads.
        let err = decoder.decode(&[0x80 | 0xB, 4, 0, 0]).unwrap_err();
        assert!(matches!(err, Error::UnhandledType { opcode: 0xB }));
        assert!(decoder.in_flight().is_some());

        let mut tail = vec![0, 0];
        tail.extend_from_slice(rest);
        assert_eq!(
            decode_all(&mut decoder, &tail),
            vec![Message::Text("abcdef".into())]
        );
    }

    #[test]
    fn test_64bit_length_with_top_bit_rejected() {
        let mut header = vec![0x80 | 0x3, LEN_64];
        header.extend([0xFF; 8]);

        let mut decoder = unfragmented();
        let err = decoder.decode(&header).unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
        assert_eq!(err.close_code(), Some(CloseCode::ProtocolError));
        assert_eq!(decoder.buffered_len(), 0);
    }

    #[test]
    fn test_masked_max_length_binary_rejected() {
        let mut header = vec![0x80 | 0x2, MASK_BIT | LEN_64];
        header.extend([0xFF; 8]);
        header.extend([1, 2, 3, 4]);

        let mut decoder = unfragmented();
        let err = decoder.decode(&header).unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
    }

    #[test]
    fn test_largest_legal_length_is_too_big() {
        let mut header = vec![0x80 | 0x2, LEN_64];
        header.extend(MAX_PAYLOAD_LEN.to_be_bytes());

        let mut decoder = unfragmented();
        let err = decoder.decode(&header).unwrap_err();
        assert!(matches!(err, Error::MessageTooBig { .. }));
        assert_eq!(decoder.buffered_len(), 0);
    }

    #[test]
    fn test_malformed_length_byte_at_a_time() {
        let mut header = vec![0x80 | 0x3, LEN_64];
        header.extend([0xFF; 8]);

        let mut decoder = unfragmented();
        let (last, head) = header.split_last().unwrap();
        for byte in head {
            assert!(decode_all(&mut decoder, std::slice::from_ref(byte)).is_empty());
        }
        let err = decoder.decode(std::slice::from_ref(last)).unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
    }

    #[test]
    fn test_reserved_opcode_byte_at_a_time_then_valid_frame() {
        let bytes = [0x80 | 0x4, 3, b'a', b'b', b'c'];
        let valid = unfragmented().encode(b"ok", OpCode::Text, true).unwrap();

        let mut decoder = unfragmented();
        assert!(decode_all(&mut decoder, &bytes[..1]).is_empty());
        let err = decoder.decode(&bytes[1..2]).unwrap_err();
        assert!(matches!(err, Error::UnhandledType { opcode: 0x4 }));

        // Remaining payload of the rejected frame is dropped as it arrives.
        for byte in &bytes[2..] {
            assert!(decode_all(&mut decoder, std::slice::from_ref(byte)).is_empty());
        }
        assert_eq!(decode_all(&mut decoder, &valid), vec![Message::Text("ok".into())]);
    }

    #[test]
    fn test_reserved_bits_rejected() {
        let mut decoder = unfragmented();
        let err = decoder.decode(&[0x80 | 0x40 | 0x1, 0]).unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
        assert_eq!(err.close_code(), Some(CloseCode::ProtocolError));
    }

    #[test]
    fn test_message_too_big() {
        let config = CodecConfig::default().with_max_message_size(8);
        let encoder = FrameCodec::new(config.with_fragment_threshold(5));
        let encoded = encoder.encode(&[0u8; 10], OpCode::Binary, false).unwrap();

        let mut decoder = FrameCodec::new(config);
        let err = decoder.decode(&encoded).unwrap_err();
        assert!(matches!(err, Error::MessageTooBig { size: 10, max: 8 }));
        assert_eq!(err.close_code(), Some(CloseCode::MessageTooBig));
        assert!(decoder.in_flight().is_none());
    }

    #[test]
    fn test_invalid_utf8_text() {
        let encoded = unfragmented().encode(&[0xFF, 0xFE], OpCode::Text, false).unwrap();
        let mut decoder = unfragmented();
        let err = decoder.decode(&encoded).unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
    }

    #[test]
    fn test_continuation_without_message() {
        let mut decoder = unfragmented();
        let err = decoder.decode(&[0x80, 0]).unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
    }

    #[test]
    fn test_data_frame_while_in_flight() {
        let mut decoder = unfragmented();
        decode_all(&mut decoder, &[0x01, 1, b'a']);
        let err = decoder.decode(&[0x81, 1, b'b']).unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
    }

    #[test]
    fn test_fragmented_control_rejected() {
        let mut decoder = unfragmented();
        let err = decoder.decode(&[0x09, 0]).unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
    }

    #[test]
    fn test_close_frame_with_code() {
        let codec = unfragmented();
        let encoded = codec.encode_close(CloseCode::GoingAway, "bye", true).unwrap();
        let mut decoder = unfragmented();
        let messages = decode_all(&mut decoder, &encoded);
        assert_eq!(
            messages,
            vec![Message::Close {
                code: Some(1001),
                reason: "bye".into()
            }]
        );
        assert_eq!(messages[0].close_code(), Some(CloseCode::GoingAway));
    }

    #[test]
    fn test_close_frame_without_code() {
        let mut decoder = unfragmented();
        assert_eq!(
            decode_all(&mut decoder, &[0x88, 0]),
            vec![Message::Close {
                code: None,
                reason: String::new()
            }]
        );
    }

    #[test]
    fn test_close_reason_truncated() {
        let codec = unfragmented();
        let reason = "é".repeat(100);
        let encoded = codec.encode_close(CloseCode::Normal, &reason, false).unwrap();
        assert!(encoded.len() <= 2 + MAX_CONTROL_PAYLOAD);

        let mut decoder = unfragmented();
        assert_eq!(decode_all(&mut decoder, &encoded).len(), 1);
    }

    #[test]
    fn test_messages_before_error_are_drained() {
        let codec = unfragmented();
        let mut bytes = codec.encode(b"good", OpCode::Text, false).unwrap();
        bytes.extend_from_slice(&[0x80 | 0x4, 0]);

        let mut decoder = unfragmented();
        assert!(decoder.decode(&bytes).is_err());
        assert_eq!(decoder.drain_ready(), vec![Message::Text("good".into())]);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_roundtrip(payload in prop::collection::vec(any::<u8>(), 0..4096), masked in any::<bool>()) {
            let codec = unfragmented();
            let encoded = codec.encode(&payload, OpCode::Binary, masked).unwrap();
            let mut decoder = unfragmented();
            prop_assert_eq!(decoder.decode(&encoded).unwrap(), vec![Message::Binary(payload)]);
        }

        #[test]
        fn prop_fragmented_reassembly(
            payload in prop::collection::vec(any::<u8>(), 1..2048),
            threshold in 1usize..256,
        ) {
            let codec = FrameCodec::new(CodecConfig::default().with_fragment_threshold(threshold));
            let encoded = codec.encode(&payload, OpCode::Binary, true).unwrap();
            let headers = frame_headers(&encoded);

            prop_assert_eq!(headers.len(), payload.len().div_ceil(threshold));
            prop_assert_eq!(headers.iter().filter(|(fin, _, _)| *fin).count(), 1);
            prop_assert!(headers.last().unwrap().0);

            let mut decoder = unfragmented();
            prop_assert_eq!(decoder.decode(&encoded).unwrap(), vec![Message::Binary(payload)]);
        }

        #[test]
        fn prop_arbitrary_split_points(
            payload in prop::collection::vec(any::<u8>(), 0..1024),
            chunk in 1usize..64,
        ) {
            let codec = FrameCodec::new(CodecConfig::default().with_fragment_threshold(100));
            let encoded = codec.encode(&payload, OpCode::Binary, true).unwrap();

            let mut decoder = unfragmented();
            let mut messages = Vec::new();
            for piece in encoded.chunks(chunk) {
                messages.extend(decoder.decode(piece).unwrap());
            }
            prop_assert_eq!(messages, vec![Message::Binary(payload)]);
            prop_assert_eq!(decoder.buffered_len(), 0);
        }
    }
}
