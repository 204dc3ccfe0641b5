//! Engine.IO and Socket.IO packet formats.
//!
//! # Protocol Overview
//!
//! | Layer | Unit | Carried by |
//! |-------|------|------------|
//! | Engine.IO | [`EnginePacket`] | WebSocket message or polling payload |
//! | Socket.IO | [`SocketPacket`] | Text of an Engine.IO `message` packet |
//!
//! # Engine.IO Packet Types
//!
//! | Digit | Type | Purpose |
//! |-------|------|---------|
//! | `0` | open | Handshake JSON (sid, ping interval/timeout, upgrades) |
//! | `1` | close | Transport closing |
//! | `2` | ping | Heartbeat / `2probe` upgrade probe |
//! | `3` | pong | Heartbeat reply / `3probe` probe echo |
//! | `4` | message | Socket.IO packet |
//! | `5` | upgrade | Switch to the probed transport |
//! | `6` | noop | Flushes a pending long-poll |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `packet` | Engine.IO packets and the open handshake |
//! | `payload` | Polling payload batching (v3 length prefix, v4 separator) |
//! | `socket` | Socket.IO packet envelope |

// ============================================================================
// Submodules
// ============================================================================

/// Engine.IO packets and handshake.
pub mod packet;

/// Polling payload encoding.
pub mod payload;

/// Socket.IO packet envelope.
pub mod socket;

// ============================================================================
// Re-exports
// ============================================================================

pub use packet::{EnginePacket, EnginePacketType, Handshake, PacketData};
pub use payload::{decode_payload, encode_payload};
pub use socket::{SocketPacket, SocketPacketType};

// ============================================================================
// ProtocolVersion
// ============================================================================

/// Engine.IO protocol revision spoken with the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ProtocolVersion {
    /// Engine.IO 3: client-initiated heartbeat, length-prefixed polling
    /// payloads, `0x04`-prefixed binary frames.
    V3,
    /// Engine.IO 4: server-initiated heartbeat, `\x1e`-separated payloads.
    #[default]
    V4,
}

impl ProtocolVersion {
    /// Value of the `EIO` query parameter.
    #[inline]
    #[must_use]
    pub const fn eio(self) -> &'static str {
        match self {
            Self::V3 => "3",
            Self::V4 => "4",
        }
    }

    /// Returns `true` if the client sends heartbeat pings.
    #[inline]
    #[must_use]
    pub const fn client_pings(self) -> bool {
        matches!(self, Self::V3)
    }
}
