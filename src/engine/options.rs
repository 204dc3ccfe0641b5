//! Engine configuration.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use socketio_engine::{EngineOptions, ProtocolVersion};
//!
//! let options = EngineOptions::new()
//!     .with_connect_param("token", "abc")
//!     .with_ack_timeout(Duration::from_secs(5))
//!     .with_protocol(ProtocolVersion::V3);
//!
//! options.validate()?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::error::{Error, Result};
use crate::frame::CodecConfig;
use crate::frame::codec::{DEFAULT_FRAGMENT_THRESHOLD, DEFAULT_MAX_MESSAGE_SIZE};
use crate::protocol::ProtocolVersion;
use crate::protocol::socket::DEFAULT_NAMESPACE;
use crate::security::{CertificateValidator, PinSet};
use crate::transport::websocket::DEFAULT_CONNECT_TIMEOUT;
use crate::transport::{Endpoints, PollingConfig, TlsConnector, WebSocketConfig};

// ============================================================================
// Constants
// ============================================================================

/// Default Engine.IO path.
pub const DEFAULT_PATH: &str = "/socket.io/";

/// Default time an ack callback stays registered.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Default time allowed for the `2probe`/`3probe` exchange.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// EngineOptions
// ============================================================================

/// Engine configuration.
#[derive(Clone)]
pub struct EngineOptions {
    /// Never upgrade away from polling.
    pub force_polling: bool,

    /// Skip polling and connect over WebSocket directly.
    pub force_websockets: bool,

    /// Engine.IO endpoint path.
    pub path: String,

    /// Namespace used by `emit`.
    pub namespace: String,

    /// Extra query parameters sent on every request.
    pub connect_params: Vec<(String, String)>,

    /// Extra HTTP headers for polling requests and the WebSocket upgrade.
    pub extra_headers: Vec<(String, String)>,

    /// `Cookie` header value.
    pub cookies: Option<String>,

    /// Force `https`/`wss` regardless of the URL scheme.
    pub secure: bool,

    /// How long ack callbacks stay registered.
    pub ack_timeout: Duration,

    /// How long the upgrade probe may take.
    pub probe_timeout: Duration,

    /// How long TCP, TLS and the WebSocket upgrade may take.
    pub connect_timeout: Duration,

    /// Largest accepted WebSocket message.
    pub max_message_size: usize,

    /// Outgoing WebSocket messages above this size are fragmented.
    pub fragment_threshold: Option<usize>,

    /// Engine.IO protocol revision.
    pub protocol: ProtocolVersion,

    /// Latin-1 double encoding of polling bodies (v3 only).
    pub double_encode_utf8: bool,

    /// Certificate or public-key pins checked on every TLS session.
    pub pins: Option<PinSet>,

    /// TLS connector used for `wss` endpoints.
    pub tls_connector: Option<Arc<dyn TlsConnector>>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EngineOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineOptions")
            .field("force_polling", &self.force_polling)
            .field("force_websockets", &self.force_websockets)
            .field("path", &self.path)
            .field("namespace", &self.namespace)
            .field("connect_params", &self.connect_params)
            .field("extra_headers", &self.extra_headers)
            .field("cookies", &self.cookies.is_some())
            .field("secure", &self.secure)
            .field("ack_timeout", &self.ack_timeout)
            .field("probe_timeout", &self.probe_timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("max_message_size", &self.max_message_size)
            .field("fragment_threshold", &self.fragment_threshold)
            .field("protocol", &self.protocol)
            .field("double_encode_utf8", &self.double_encode_utf8)
            .field("pins", &self.pins.is_some())
            .field("tls_connector", &self.tls_connector.is_some())
            .finish()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl EngineOptions {
    /// Creates options with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            force_polling: false,
            force_websockets: false,
            path: DEFAULT_PATH.to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            connect_params: Vec::new(),
            extra_headers: Vec::new(),
            cookies: None,
            secure: false,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            fragment_threshold: Some(DEFAULT_FRAGMENT_THRESHOLD),
            protocol: ProtocolVersion::default(),
            double_encode_utf8: false,
            pins: None,
            tls_connector: None,
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl EngineOptions {
    /// Stays on polling.
    #[inline]
    #[must_use]
    pub fn with_force_polling(mut self) -> Self {
        self.force_polling = true;
        self
    }

    /// Connects over WebSocket without polling first.
    #[inline]
    #[must_use]
    pub fn with_force_websockets(mut self) -> Self {
        self.force_websockets = true;
        self
    }

    /// Sets the Engine.IO path.
    #[inline]
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Sets the namespace used by `emit`.
    #[inline]
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Adds a query parameter.
    #[inline]
    #[must_use]
    pub fn with_connect_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.connect_params.push((key.into(), value.into()));
        self
    }

    /// Adds an HTTP header.
    #[inline]
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.push((name.into(), value.into()));
        self
    }

    /// Sets the `Cookie` header.
    #[inline]
    #[must_use]
    pub fn with_cookies(mut self, cookies: impl Into<String>) -> Self {
        self.cookies = Some(cookies.into());
        self
    }

    /// Forces TLS.
    #[inline]
    #[must_use]
    pub fn with_secure(mut self) -> Self {
        self.secure = true;
        self
    }

    /// Sets the ack timeout.
    #[inline]
    #[must_use]
    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    /// Sets the probe timeout.
    #[inline]
    #[must_use]
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Sets the WebSocket connect timeout.
    #[inline]
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the largest accepted WebSocket message.
    #[inline]
    #[must_use]
    pub fn with_max_message_size(mut self, max: usize) -> Self {
        self.max_message_size = max;
        self
    }

    /// Sets the fragmentation threshold.
    #[inline]
    #[must_use]
    pub fn with_fragment_threshold(mut self, threshold: usize) -> Self {
        self.fragment_threshold = Some(threshold);
        self
    }

    /// Sends every message as a single frame.
    #[inline]
    #[must_use]
    pub fn without_fragmentation(mut self) -> Self {
        self.fragment_threshold = None;
        self
    }

    /// Sets the protocol revision.
    #[inline]
    #[must_use]
    pub fn with_protocol(mut self, protocol: ProtocolVersion) -> Self {
        self.protocol = protocol;
        self
    }

    /// Enables Latin-1 double encoding of polling bodies.
    #[inline]
    #[must_use]
    pub fn with_double_encode_utf8(mut self) -> Self {
        self.double_encode_utf8 = true;
        self
    }

    /// Sets the TLS pins.
    #[inline]
    #[must_use]
    pub fn with_pins(mut self, pins: PinSet) -> Self {
        self.pins = Some(pins);
        self
    }

    /// Sets the TLS connector.
    #[inline]
    #[must_use]
    pub fn with_tls_connector(mut self, connector: Arc<dyn TlsConnector>) -> Self {
        self.tls_connector = Some(connector);
        self
    }
}

// ============================================================================
// Validation and Conversion
// ============================================================================

impl EngineOptions {
    /// Validates the options.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] describing the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        if self.force_polling && self.force_websockets {
            return Err(Error::config(
                "force_polling and force_websockets are mutually exclusive",
            ));
        }

        if !self.path.starts_with('/') {
            return Err(Error::config(format!(
                "path must start with '/': {:?}",
                self.path
            )));
        }

        if !self.namespace.starts_with('/') {
            return Err(Error::config(format!(
                "namespace must start with '/': {:?}",
                self.namespace
            )));
        }

        if self.max_message_size == 0 {
            return Err(Error::config("max_message_size must be greater than zero"));
        }

        if self.fragment_threshold == Some(0) {
            return Err(Error::config("fragment_threshold must be greater than zero"));
        }

        if self.ack_timeout.is_zero() || self.probe_timeout.is_zero() {
            return Err(Error::config("timeouts must be greater than zero"));
        }

        if self.double_encode_utf8 && self.protocol != ProtocolVersion::V3 {
            return Err(Error::config(
                "double_encode_utf8 only applies to protocol v3",
            ));
        }

        Ok(())
    }

    /// Builds the transport endpoints for `url`.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] for unsupported schemes or a missing host.
    pub fn endpoints(&self, url: &Url) -> Result<Endpoints> {
        Endpoints::new(
            url,
            &self.path,
            self.protocol,
            &self.connect_params,
            self.secure,
        )
    }

    /// Frame codec limits.
    #[must_use]
    pub fn codec_config(&self) -> CodecConfig {
        let config = CodecConfig::default().with_max_message_size(self.max_message_size);
        match self.fragment_threshold {
            Some(threshold) => config.with_fragment_threshold(threshold),
            None => config.without_fragmentation(),
        }
    }

    /// Polling transport settings.
    #[must_use]
    pub fn polling_config(&self) -> PollingConfig {
        PollingConfig {
            version: self.protocol,
            extra_headers: self.extra_headers.clone(),
            cookies: self.cookies.clone(),
            double_encode_utf8: self.double_encode_utf8,
        }
    }

    /// WebSocket transport settings sharing `validator`.
    #[must_use]
    pub fn websocket_config(&self, validator: Option<Arc<CertificateValidator>>) -> WebSocketConfig {
        WebSocketConfig {
            version: self.protocol,
            codec: self.codec_config(),
            extra_headers: self.extra_headers.clone(),
            cookies: self.cookies.clone(),
            connect_timeout: self.connect_timeout,
            tls: self.tls_connector.clone(),
            validator,
        }
    }

    /// Validator for the configured pins, if any.
    #[must_use]
    pub fn validator(&self) -> Option<Arc<CertificateValidator>> {
        self.pins
            .clone()
            .map(|pins| Arc::new(CertificateValidator::new(pins)))
    }
}

// ============================================================================
// Tests
// ============================================================================
