//! Builder pattern for engine configuration.
//!
//! Provides a fluent API for configuring and spawning [`EngineHandle`]
//! instances.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use socketio_engine::{EngineClient, SocketEngine};
//!
//! # fn example(client: Arc<dyn EngineClient>) -> socketio_engine::Result<()> {
//! let engine = SocketEngine::builder("https://chat.example.com")
//!     .namespace("/rooms")
//!     .connect_param("token", "abc")
//!     .ack_timeout(Duration::from_secs(5))
//!     .client(client)
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::error::{Error, Result};
use crate::protocol::ProtocolVersion;
use crate::security::PinSet;
use crate::transport::TlsConnector;

use super::client::EngineClient;
use super::core::EngineHandle;
use super::options::EngineOptions;

// ============================================================================
// EngineBuilder
// ============================================================================

/// Builder for configuring an [`EngineHandle`].
///
/// Use [`EngineHandle::builder()`] to create a new builder.
#[derive(Clone)]
pub struct EngineBuilder {
    /// Server URL.
    url: String,
    /// Engine options.
    options: EngineOptions,
    /// Notification target.
    client: Option<Arc<dyn EngineClient>>,
}

impl fmt::Debug for EngineBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineBuilder")
            .field("url", &self.url)
            .field("options", &self.options)
            .field("client", &self.client.is_some())
            .finish()
    }
}

// ============================================================================
// EngineBuilder Implementation
// ============================================================================

impl EngineBuilder {
    /// Creates a builder for `url` with default options.
    #[inline]
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            options: EngineOptions::default(),
            client: None,
        }
    }

    /// Sets the notification target. Required.
    #[inline]
    #[must_use]
    pub fn client(mut self, client: Arc<dyn EngineClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Replaces all options at once.
    #[inline]
    #[must_use]
    pub fn options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    /// Stays on polling.
    #[inline]
    #[must_use]
    pub fn force_polling(mut self) -> Self {
        self.options = self.options.with_force_polling();
        self
    }

    /// Connects over WebSocket directly.
    #[inline]
    #[must_use]
    pub fn force_websockets(mut self) -> Self {
        self.options = self.options.with_force_websockets();
        self
    }

    /// Sets the Engine.IO path (default `/socket.io/`).
    #[inline]
    #[must_use]
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.options = self.options.with_path(path);
        self
    }

    /// Sets the namespace used by `emit`.
    #[inline]
    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.options = self.options.with_namespace(namespace);
        self
    }

    /// Adds a query parameter to every request.
    #[inline]
    #[must_use]
    pub fn connect_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options = self.options.with_connect_param(key, value);
        self
    }

    /// Adds an HTTP header to polling requests and the WebSocket upgrade.
    #[inline]
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.options = self.options.with_header(name, value);
        self
    }

    /// Sets the `Cookie` header.
    #[inline]
    #[must_use]
    pub fn cookies(mut self, cookies: impl Into<String>) -> Self {
        self.options = self.options.with_cookies(cookies);
        self
    }

    /// Forces `https`/`wss`.
    #[inline]
    #[must_use]
    pub fn secure(mut self) -> Self {
        self.options = self.options.with_secure();
        self
    }

    /// Sets the default ack timeout.
    #[inline]
    #[must_use]
    pub fn ack_timeout(mut self, timeout: Duration) -> Self {
        self.options = self.options.with_ack_timeout(timeout);
        self
    }

    /// Sets the upgrade probe timeout.
    #[inline]
    #[must_use]
    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.options = self.options.with_probe_timeout(timeout);
        self
    }

    /// Sets the connect timeout for TCP, TLS and the upgrade handshake.
    #[inline]
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.options = self.options.with_connect_timeout(timeout);
        self
    }

    /// Sets the largest accepted WebSocket message.
    #[inline]
    #[must_use]
    pub fn max_message_size(mut self, max: usize) -> Self {
        self.options = self.options.with_max_message_size(max);
        self
    }

    /// Sets the Engine.IO protocol revision.
    #[inline]
    #[must_use]
    pub fn protocol(mut self, protocol: ProtocolVersion) -> Self {
        self.options = self.options.with_protocol(protocol);
        self
    }

    /// Enables Latin-1 double encoding of polling bodies (v3 servers).
    #[inline]
    #[must_use]
    pub fn double_encode_utf8(mut self) -> Self {
        self.options = self.options.with_double_encode_utf8();
        self
    }

    /// Sets certificate or public-key pins.
    #[inline]
    #[must_use]
    pub fn pins(mut self, pins: PinSet) -> Self {
        self.options = self.options.with_pins(pins);
        self
    }

    /// Sets the TLS connector used for `wss` endpoints.
    #[inline]
    #[must_use]
    pub fn tls_connector(mut self, connector: Arc<dyn TlsConnector>) -> Self {
        self.options = self.options.with_tls_connector(connector);
        self
    }

    /// Validates the configuration and spawns the engine.
    ///
    /// The engine starts idle; call [`EngineHandle::open`] to connect.
    /// Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if no client is set, or the options or URL are invalid
    /// - [`Error::Url`] if the URL cannot be parsed
    /// - [`Error::Http`] if the HTTP client cannot be created
    pub fn build(self) -> Result<EngineHandle> {
        let client = self.validate_client()?;
        self.options.validate()?;

        let url = Url::parse(&self.url)?;
        let endpoints = self.options.endpoints(&url)?;

        EngineHandle::spawn(self.options, endpoints, client)
    }
}

// ============================================================================
// Validation
// ============================================================================

impl EngineBuilder {
    fn validate_client(&self) -> Result<Arc<dyn EngineClient>> {
        self.client.clone().ok_or_else(|| {
            Error::config(
                "Engine client is required. Use .client() to set it.\n\
                 Example: SocketEngine::builder(url).client(Arc::new(handler))",
            )
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::identifiers::SessionId;

    struct Silent;

    impl EngineClient for Silent {
        fn engine_did_open(&self, _sid: &SessionId) {}
        fn engine_did_close(&self, _reason: &str) {}
        fn engine_did_error(&self, _error: &Error) {}
        fn parse_engine_message(&self, _message: &str) {}
        fn parse_engine_binary_data(&self, _data: &[u8]) {}
    }

    #[test]
    fn test_new_uses_default_options() {
        let builder = EngineBuilder::new("http://localhost:3000");
        assert_eq!(builder.url, "http://localhost:3000");
        assert!(builder.client.is_none());
        assert_eq!(builder.options.path, "/socket.io/");
    }

    #[test]
    fn test_fluent_methods_set_options() {
        let builder = EngineBuilder::new("http://localhost")
            .force_polling()
            .path("/engine/")
            .namespace("/chat")
            .connect_param("token", "abc")
            .header("X-Test", "1")
            .cookies("a=b")
            .ack_timeout(Duration::from_secs(3))
            .protocol(ProtocolVersion::V3)
            .double_encode_utf8();

        let options = &builder.options;
        assert!(options.force_polling);
        assert_eq!(options.path, "/engine/");
        assert_eq!(options.namespace, "/chat");
        assert_eq!(options.connect_params, vec![("token".to_string(), "abc".to_string())]);
        assert_eq!(options.extra_headers, vec![("X-Test".to_string(), "1".to_string())]);
        assert_eq!(options.cookies.as_deref(), Some("a=b"));
        assert_eq!(options.ack_timeout, Duration::from_secs(3));
        assert_eq!(options.protocol, ProtocolVersion::V3);
        assert!(options.double_encode_utf8);
    }

    #[test]
    fn test_build_fails_without_client() {
        let result = EngineBuilder::new("http://localhost").build();
        let err = result.unwrap_err();
        assert!(err.to_string().contains("client"));
    }

    #[test]
    fn test_build_fails_with_invalid_options() {
        let result = EngineBuilder::new("http://localhost")
            .client(Arc::new(Silent))
            .force_polling()
            .force_websockets()
            .build();
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[test]
    fn test_build_fails_with_unparsable_url() {
        let result = EngineBuilder::new("not a url")
            .client(Arc::new(Silent))
            .build();
        assert!(matches!(result, Err(Error::Url(_))));
    }

    #[test]
    fn test_build_fails_with_unsupported_scheme() {
        let result = EngineBuilder::new("ftp://localhost")
            .client(Arc::new(Silent))
            .build();
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[tokio::test]
    async fn test_build_spawns_idle_engine() {
        let engine = EngineBuilder::new("http://localhost:3000")
            .client(Arc::new(Silent))
            .build()
            .unwrap();

        assert_eq!(engine.status(), crate::engine::ConnectionStatus::NotConnected);
        assert_eq!(engine.pending_acks(), 0);
        engine.shutdown();
    }

    #[test]
    fn test_builder_is_clone() {
        let builder = EngineBuilder::new("http://localhost").namespace("/a");
        let cloned = builder.clone();
        assert_eq!(builder.options.namespace, cloned.options.namespace);
    }
}
