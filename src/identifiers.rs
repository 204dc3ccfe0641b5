//! Type-safe identifiers.
//!
//! Newtype wrappers prevent mixing an ack id with an arbitrary integer,
//! or a server session id with any other string.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

// ============================================================================
// AckId
// ============================================================================

/// Identifier correlating an emitted packet with the server's ack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AckId(u64);

impl AckId {
    /// Wraps a raw ack id.
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw numeric id.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for AckId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for AckId {
    #[inline]
    fn from(id: u64) -> Self {
        Self(id)
    }
}

// ============================================================================
// AckIdGenerator
// ============================================================================

/// Monotonic ack id source, starting at zero.
#[derive(Debug, Default)]
pub struct AckIdGenerator {
    next: AtomicU64,
}

impl AckIdGenerator {
    /// Creates a generator starting at zero.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next: AtomicU64::new(0),
        }
    }

    /// Returns the next id; never repeats within this generator.
    #[inline]
    pub fn next_id(&self) -> AckId {
        AckId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

// ============================================================================
// SessionId
// ============================================================================

/// Engine.IO session id (`sid`) assigned by the server during handshake.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Wraps a server-assigned sid.
    #[inline]
    #[must_use]
    pub fn new(sid: impl Into<String>) -> Self {
        Self(sid.into())
    }

    /// Returns the sid as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generator_is_monotonic() {
        let generator = AckIdGenerator::new();
        let first = generator.next_id();
        let second = generator.next_id();
        let third = generator.next_id();

        assert_eq!(first, AckId::new(0));
        assert!(first < second && second < third);
    }

    #[test]
    fn test_ack_id_display() {
        assert_eq!(AckId::new(42).to_string(), "42");
    }

    #[test]
    fn test_session_id_serde_transparent() {
        let sid: SessionId = serde_json::from_str("\"abc123\"").unwrap();
        assert_eq!(sid.as_str(), "abc123");
        assert_eq!(serde_json::to_string(&sid).unwrap(), "\"abc123\"");
    }
}
