//! Acknowledgement correlation.
//!
//! Pending acks are keyed by [`AckId`]. Each callback is a boxed `FnOnce`
//! owned by the registry until it is resolved by a matching server ack or
//! discarded on timeout; whichever happens first wins and the other is a
//! silent no-op.
//!
//! The registry never schedules its own timeouts. The engine arms one timer
//! per registered ack and calls [`AckRegistry::timeout_ack`] when it fires.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::time::Instant;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tracing::{debug, trace};

use crate::identifiers::{AckId, AckIdGenerator};

// ============================================================================
// Types
// ============================================================================

/// Callback invoked with the server's reply values.
pub type AckCallback = Box<dyn FnOnce(Vec<Value>) + Send + 'static>;

// ============================================================================
// PendingAck
// ============================================================================

/// A registered callback awaiting its ack.
pub struct PendingAck {
    /// Correlation id.
    pub id: AckId,
    /// When the ack was registered.
    pub created_at: Instant,
    callback: AckCallback,
}

impl fmt::Debug for PendingAck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingAck")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// AckRegistry
// ============================================================================

/// Map of outstanding acks, safe to share between the write path (insert)
/// and the dispatch path (resolve).
#[derive(Debug, Default)]
pub struct AckRegistry {
    pending: Mutex<FxHashMap<AckId, PendingAck>>,
    ids: AckIdGenerator,
}

impl AckRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates the next ack id.
    #[inline]
    pub fn next_id(&self) -> AckId {
        self.ids.next_id()
    }

    /// Registers `callback` under `id`.
    ///
    /// Ids must be unique among pending acks; use [`Self::next_id`].
    pub fn add_ack<F>(&self, id: AckId, callback: F)
    where
        F: FnOnce(Vec<Value>) + Send + 'static,
    {
        let pending = PendingAck {
            id,
            created_at: Instant::now(),
            callback: Box::new(callback),
        };

        let previous = self.pending.lock().insert(id, pending);
        debug_assert!(previous.is_none(), "ack id {id} registered twice");
        trace!(%id, "Ack registered");
    }

    /// Resolves `id` with the server's reply values.
    ///
    /// The callback runs outside the registry lock. Returns `false` if the
    /// id was unknown, already resolved or expired.
    pub fn execute_ack(&self, id: AckId, items: Vec<Value>) -> bool {
        let Some(pending) = self.pending.lock().remove(&id) else {
            debug!(%id, "Ack for unknown or expired id");
            return false;
        };

        trace!(%id, elapsed_ms = pending.created_at.elapsed().as_millis() as u64, "Ack resolved");
        (pending.callback)(items);
        true
    }

    /// Discards `id` without invoking its callback.
    ///
    /// Returns `false` if it was already resolved or never registered.
    pub fn timeout_ack(&self, id: AckId) -> bool {
        let removed = self.pending.lock().remove(&id).is_some();
        if removed {
            debug!(%id, "Ack timed out");
        }
        removed
    }

    /// Returns `true` if `id` is still outstanding.
    #[inline]
    #[must_use]
    pub fn is_pending(&self, id: AckId) -> bool {
        self.pending.lock().contains_key(&id)
    }

    /// Returns the number of outstanding acks.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

// ============================================================================
// Tests
// ============================================================================
