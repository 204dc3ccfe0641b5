//! Certificate and public-key pinning.
//!
//! TLS session establishment is not done here. A [`TlsConnector`]
//! (see [`crate::transport::websocket`]) hands back the negotiated stream
//! together with a [`TrustContext`] describing the peer chain; the
//! [`CertificateValidator`] then decides whether that session is trusted
//! before the WebSocket handshake may proceed.
//!
//! # Modes
//!
//! | Mode | Compared bytes |
//! |------|----------------|
//! | Public keys | SubjectPublicKeyInfo of leaf (and intermediates unless `leaf_only`) |
//! | Certificates | DER encoding of every certificate in the chain |
//!
//! [`TlsConnector`]: crate::transport::TlsConnector

// ============================================================================
// Imports
// ============================================================================

use std::fs;
use std::path::Path;

use tracing::{debug, warn};

use crate::error::{Error, Result};

// ============================================================================
// PeerCertificate
// ============================================================================

/// One certificate of the peer chain as seen by the TLS layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerCertificate {
    /// DER encoding of the certificate.
    pub der: Vec<u8>,
    /// Encoded public key extracted by the TLS layer.
    pub public_key: Vec<u8>,
}

impl PeerCertificate {
    /// Creates a chain entry.
    #[inline]
    #[must_use]
    pub fn new(der: impl Into<Vec<u8>>, public_key: impl Into<Vec<u8>>) -> Self {
        Self {
            der: der.into(),
            public_key: public_key.into(),
        }
    }
}

// ============================================================================
// TrustContext
// ============================================================================

/// Result of a TLS trust evaluation: the peer chain and the evaluated domain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrustContext {
    /// Leaf first, then intermediates.
    chain: Vec<PeerCertificate>,
    /// Domain the chain was evaluated against.
    domain: Option<String>,
}

impl TrustContext {
    /// Creates a trust context from a leaf-first chain.
    #[must_use]
    pub fn new(chain: Vec<PeerCertificate>) -> Self {
        Self {
            chain,
            domain: None,
        }
    }

    /// Sets the evaluated domain.
    #[inline]
    #[must_use]
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Returns the chain, leaf first.
    #[inline]
    #[must_use]
    pub fn chain(&self) -> &[PeerCertificate] {
        &self.chain
    }

    /// Returns the evaluated domain, if the TLS layer reported one.
    #[inline]
    #[must_use]
    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }
}

// ============================================================================
// PinSet
// ============================================================================

/// Pins loaded by the configuration layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PinSet {
    /// Compare public keys instead of whole certificates.
    pub use_public_keys: bool,
    /// Also require the evaluated domain to match.
    pub validated_dn: bool,
    /// In public-key mode, only consider the leaf certificate.
    pub leaf_only: bool,
    /// Pinned public keys (public-key mode).
    pub public_keys: Vec<Vec<u8>>,
    /// Pinned DER certificates (certificate mode).
    pub certificates: Vec<Vec<u8>>,
}

impl PinSet {
    /// Creates a public-key pin set.
    #[must_use]
    pub fn public_keys(keys: impl IntoIterator<Item = Vec<u8>>) -> Self {
        Self {
            use_public_keys: true,
            public_keys: keys.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Creates a certificate pin set.
    #[must_use]
    pub fn certificates(certs: impl IntoIterator<Item = Vec<u8>>) -> Self {
        Self {
            use_public_keys: false,
            certificates: certs.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Reads DER certificates from disk into a certificate pin set.
    ///
    /// # Errors
    ///
    /// [`Error::Io`] if a file cannot be read, [`Error::Config`] if a file
    /// is empty.
    pub fn load_certificates<P: AsRef<Path>>(paths: impl IntoIterator<Item = P>) -> Result<Self> {
        let mut certs = Vec::new();
        for path in paths {
            let path = path.as_ref();
            let der = fs::read(path)?;
            if der.is_empty() {
                return Err(Error::config(format!(
                    "pinned certificate is empty: {}",
                    path.display()
                )));
            }
            certs.push(der);
        }
        debug!(count = certs.len(), "Loaded pinned certificates");
        Ok(Self::certificates(certs))
    }

    /// Requires the evaluated domain to match.
    #[inline]
    #[must_use]
    pub fn with_validated_dn(mut self) -> Self {
        self.validated_dn = true;
        self
    }

    /// Restricts public-key matching to the leaf certificate.
    #[inline]
    #[must_use]
    pub fn with_leaf_only(mut self) -> Self {
        self.leaf_only = true;
        self
    }
}

// ============================================================================
// CertificateValidator
// ============================================================================

/// Decides whether a TLS session is trusted under the loaded pins.
///
/// A default validator has no pins loaded and rejects everything.
#[derive(Debug, Clone, Default)]
pub struct CertificateValidator {
    pins: PinSet,
    is_ready: bool,
}

impl CertificateValidator {
    /// Creates a ready validator from a loaded pin set.
    #[must_use]
    pub fn new(pins: PinSet) -> Self {
        Self {
            pins,
            is_ready: true,
        }
    }

    /// Returns `true` once pins are loaded.
    #[inline]
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.is_ready
    }

    /// Returns the loaded pins.
    #[inline]
    #[must_use]
    pub fn pins(&self) -> &PinSet {
        &self.pins
    }

    /// Returns `true` if the session described by `trust` is trusted for
    /// `domain`.
    #[must_use]
    pub fn is_valid(&self, trust: &TrustContext, domain: &str) -> bool {
        if !self.is_ready {
            warn!(domain, "Pins not loaded, rejecting session");
            return false;
        }

        if self.pins.validated_dn && trust.domain() != Some(domain) {
            debug!(domain, evaluated = ?trust.domain(), "Domain mismatch");
            return false;
        }

        let matched = if self.pins.use_public_keys {
            self.match_public_keys(trust)
        } else {
            self.match_certificates(trust)
        };

        if !matched {
            debug!(domain, chain_len = trust.chain().len(), "No pin matched");
        }
        matched
    }

    /// Like [`Self::is_valid`], returning an error on rejection.
    ///
    /// # Errors
    ///
    /// [`Error::TrustRejected`] if the session is not trusted.
    pub fn validate(&self, trust: &TrustContext, domain: &str) -> Result<()> {
        if self.is_valid(trust, domain) {
            Ok(())
        } else {
            Err(Error::trust_rejected(domain))
        }
    }

    fn match_public_keys(&self, trust: &TrustContext) -> bool {
        let considered = if self.pins.leaf_only { 1 } else { usize::MAX };
        trust
            .chain()
            .iter()
            .take(considered)
            .any(|cert| self.pins.public_keys.iter().any(|pin| *pin == cert.public_key))
    }

    fn match_certificates(&self, trust: &TrustContext) -> bool {
        trust
            .chain()
            .iter()
            .any(|cert| self.pins.certificates.iter().any(|pin| *pin == cert.der))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;

    fn chain() -> TrustContext {
        TrustContext::new(vec![
            PeerCertificate::new(b"leaf-der".to_vec(), b"leaf-key".to_vec()),
            PeerCertificate::new(b"ca-der".to_vec(), b"ca-key".to_vec()),
        ])
        .with_domain("socket.example.com")
    }

    #[test]
    fn test_not_ready_rejects() {
        let validator = CertificateValidator::default();
        assert!(!validator.is_ready());
        assert!(!validator.is_valid(&chain(), "socket.example.com"));
    }

    #[test]
    fn test_leaf_key_match_accepted() {
        let validator = CertificateValidator::new(PinSet::public_keys([b"leaf-key".to_vec()]));
        assert!(validator.is_valid(&chain(), "socket.example.com"));
    }

    #[test]
    fn test_intermediate_key_match() {
        let pins = PinSet::public_keys([b"ca-key".to_vec()]);
        assert!(CertificateValidator::new(pins.clone()).is_valid(&chain(), "x"));
        assert!(!CertificateValidator::new(pins.with_leaf_only()).is_valid(&chain(), "x"));
    }

    #[test]
    fn test_no_match_rejected() {
        let by_key = CertificateValidator::new(PinSet::public_keys([b"other".to_vec()]));
        let by_cert = CertificateValidator::new(PinSet::certificates([b"other".to_vec()]));
        assert!(!by_key.is_valid(&chain(), "socket.example.com"));
        assert!(!by_cert.is_valid(&chain(), "socket.example.com"));
    }

    #[test]
    fn test_certificate_mode_ignores_keys() {
        // A public key pinned as a certificate must not match.
        let validator = CertificateValidator::new(PinSet::certificates([b"leaf-key".to_vec()]));
        assert!(!validator.is_valid(&chain(), "socket.example.com"));

        let validator = CertificateValidator::new(PinSet::certificates([b"ca-der".to_vec()]));
        assert!(validator.is_valid(&chain(), "socket.example.com"));
    }

    #[test]
    fn test_validated_dn_mismatch_rejected() {
        let pins = PinSet::public_keys([b"leaf-key".to_vec()]).with_validated_dn();
        let validator = CertificateValidator::new(pins);

        assert!(validator.is_valid(&chain(), "socket.example.com"));
        assert!(!validator.is_valid(&chain(), "evil.example.com"));
        assert!(!validator.is_valid(&chain(), "SOCKET.example.com"));
    }

    #[test]
    fn test_validated_dn_without_evaluated_domain() {
        let pins = PinSet::public_keys([b"leaf-key".to_vec()]).with_validated_dn();
        let trust = TrustContext::new(chain().chain().to_vec());
        assert!(!CertificateValidator::new(pins).is_valid(&trust, "socket.example.com"));
    }

    #[test]
    fn test_empty_chain_rejected() {
        let validator = CertificateValidator::new(PinSet::public_keys([b"leaf-key".to_vec()]));
        assert!(!validator.is_valid(&TrustContext::default(), "socket.example.com"));
    }

    #[test]
    fn test_validate_error() {
        let validator = CertificateValidator::new(PinSet::public_keys(Vec::new()));
        let err = validator.validate(&chain(), "socket.example.com").unwrap_err();
        assert!(err.is_trust_error());
    }

    #[test]
    fn test_load_certificates_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ca.der");
        fs::File::create(&path).unwrap().write_all(b"ca-der").unwrap();

        let pins = PinSet::load_certificates([&path]).unwrap();
        assert!(!pins.use_public_keys);
        assert!(CertificateValidator::new(pins).is_valid(&chain(), "socket.example.com"));
    }

    #[test]
    fn test_load_missing_certificate() {
        let err = PinSet::load_certificates(["/nonexistent/pin.der"]).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
