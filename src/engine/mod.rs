//! Engine.IO client engine.
//!
//! The engine opens a session over HTTP long-polling, probes a WebSocket
//! upgrade, keeps the heartbeat, and hands decoded messages to an
//! [`EngineClient`].
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`EngineHandle`] | Handle to a running engine (alias [`SocketEngine`]) |
//! | [`EngineBuilder`] | Fluent configuration builder |
//! | [`EngineOptions`] | Connection options |
//! | [`EngineClient`] | Notification callbacks |
//! | [`ConnectionStatus`] | Lifecycle status |
//! | [`EngineSnapshot`] | Transport flags at a point in time |
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use socketio_engine::{ConnectionStatus, EngineClient, SocketEngine};
//!
//! # async fn example(client: Arc<dyn EngineClient>) -> socketio_engine::Result<()> {
//! let engine = SocketEngine::builder("http://localhost:3000")
//!     .client(client)
//!     .build()?;
//!
//! engine.open()?;
//! engine.wait_for_status(ConnectionStatus::Connected).await?;
//! engine.emit("join", [serde_json::json!("lobby")]).await?;
//! engine.close("done")?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Submodules
// ============================================================================

/// Fluent builder pattern for engine configuration.
pub mod builder;

/// Notification callbacks.
pub mod client;

/// Engine actor and public handle.
pub mod core;

/// Engine options and defaults.
pub mod options;

/// Connection state machine.
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::EngineBuilder;
pub use client::EngineClient;
pub use self::core::{EngineHandle, SocketEngine};
pub use options::EngineOptions;
pub use state::{ConnectionStatus, EngineSnapshot};
