//! Endpoint URLs for both transports.
//!
//! ```text
//! http://host/socket.io/?EIO=4&transport=polling[&sid=...]&<connect params>
//! ws://host/socket.io/?EIO=4&transport=websocket[&sid=...]&<connect params>
//! ```

// ============================================================================
// Imports
// ============================================================================

use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::SessionId;
use crate::protocol::ProtocolVersion;

// ============================================================================
// Endpoints
// ============================================================================

/// Builds polling and WebSocket URLs from one base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    base: Url,
    version: ProtocolVersion,
    params: Vec<(String, String)>,
    secure: bool,
}

impl Endpoints {
    /// Creates endpoints for `url` with the socket path replaced by `path`.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] if the scheme is not http(s)/ws(s) or there is no host.
    pub fn new(
        url: &Url,
        path: &str,
        version: ProtocolVersion,
        params: &[(String, String)],
        secure: bool,
    ) -> Result<Self> {
        if !matches!(url.scheme(), "http" | "https" | "ws" | "wss") {
            return Err(Error::config(format!(
                "unsupported URL scheme: {}",
                url.scheme()
            )));
        }
        if url.host_str().is_none() {
            return Err(Error::config(format!("URL has no host: {url}")));
        }

        let mut base = url.clone();
        base.set_path(path);
        base.set_query(None);
        base.set_fragment(None);

        let secure = secure || matches!(url.scheme(), "https" | "wss");

        Ok(Self {
            base,
            version,
            params: params.to_vec(),
            secure,
        })
    }

    /// Returns `true` if both transports use TLS.
    #[inline]
    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// Host name the TLS session is validated against.
    #[must_use]
    pub fn host(&self) -> &str {
        self.base.host_str().unwrap_or_default()
    }

    /// Long-polling URL.
    #[must_use]
    pub fn polling(&self, sid: Option<&SessionId>) -> Url {
        let scheme = if self.secure { "https" } else { "http" };
        self.build(scheme, "polling", sid)
    }

    /// WebSocket URL.
    #[must_use]
    pub fn websocket(&self, sid: Option<&SessionId>) -> Url {
        let scheme = if self.secure { "wss" } else { "ws" };
        self.build(scheme, "websocket", sid)
    }

    fn build(&self, scheme: &str, transport: &str, sid: Option<&SessionId>) -> Url {
        let mut url = self.base.clone();
        // http/https/ws/wss are all special schemes, so switching cannot fail.
        let _ = url.set_scheme(scheme);

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("EIO", self.version.eio());
            query.append_pair("transport", transport);
            if let Some(sid) = sid {
                query.append_pair("sid", sid.as_str());
            }
            for (key, value) in &self.params {
                query.append_pair(key, value);
            }
        }

        url
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoints(url: &str, secure: bool) -> Endpoints {
        Endpoints::new(
            &Url::parse(url).unwrap(),
            "/socket.io/",
            ProtocolVersion::V4,
            &[("token".to_string(), "abc".to_string())],
            secure,
        )
        .unwrap()
    }

    #[test]
    fn test_polling_url() {
        let url = endpoints("http://localhost:3000/ignored?x=1", false).polling(None);
        assert_eq!(
            url.as_str(),
            "http://localhost:3000/socket.io/?EIO=4&transport=polling&token=abc"
        );
    }

    #[test]
    fn test_websocket_url_with_sid() {
        let sid = SessionId::new("s1");
        let url = endpoints("http://localhost:3000", false).websocket(Some(&sid));
        assert_eq!(
            url.as_str(),
            "ws://localhost:3000/socket.io/?EIO=4&transport=websocket&sid=s1&token=abc"
        );
    }

    #[test]
    fn test_secure_schemes() {
        let e = endpoints("https://example.com", false);
        assert!(e.is_secure());
        assert_eq!(e.websocket(None).scheme(), "wss");

        let forced = endpoints("http://example.com", true);
        assert_eq!(forced.polling(None).scheme(), "https");
        assert_eq!(forced.host(), "example.com");
    }

    #[test]
    fn test_rejects_unsupported_scheme() {
        let url = Url::parse("ftp://example.com").unwrap();
        let err = Endpoints::new(&url, "/socket.io/", ProtocolVersion::V4, &[], false);
        assert!(matches!(err, Err(Error::Config { .. })));
    }
}
