//! Callbacks from the engine to the layer above it.

// ============================================================================
// Imports
// ============================================================================

use crate::error::Error;
use crate::identifiers::SessionId;

// ============================================================================
// EngineClient
// ============================================================================

/// Receives engine notifications.
///
/// Called from the engine's dispatcher task, one notification at a time and
/// in the order the engine produced them. Implementations should return
/// quickly; long work belongs on a separate task.
pub trait EngineClient: Send + Sync + 'static {
    /// The handshake completed with session `sid`.
    fn engine_did_open(&self, sid: &SessionId) {
        let _ = sid;
    }

    /// The engine closed. Fired once per `open`.
    fn engine_did_close(&self, reason: &str);

    /// A transport or protocol error occurred.
    fn engine_did_error(&self, error: &Error);

    /// A text message arrived (Socket.IO packet text, acks already resolved).
    fn parse_engine_message(&self, message: &str);

    /// A binary message arrived.
    fn parse_engine_binary_data(&self, data: &[u8]);
}
