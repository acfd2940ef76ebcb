//! Certificate store and TLS server context construction.
//!
//! The certificate-issuing service pushes PEM material at runtime; the
//! [`CertificateStore`] holds it as an atomically swapped snapshot that
//! listeners read at (re)start. Consumers never mutate a bundle in place.
//!
//! Context construction restricts cipher suites to the ECDHE+AES-GCM
//! variants (plus their TLS 1.3 equivalents) and protocols to
//! {TLS 1.2, TLS 1.3}. The CA is installed as the trust anchor for client
//! certificates; devices that present no certificate are still accepted.
//!
//! Private keys arrive in whatever format the certificate service emits:
//! PKCS#8, passphrase-encrypted PKCS#8, or legacy PKCS#1. Everything is
//! normalized to PKCS#8 DER before it reaches rustls.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use parking_lot::RwLock;
use pkcs8::der::Encode;
use pkcs8::der::asn1::AnyRef;
use pkcs8::{AlgorithmIdentifierRef, Document, EncryptedPrivateKeyInfo, PrivateKeyInfo};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{CipherSuite, RootCertStore, ServerConfig};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info};

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Cipher suites the gateway is willing to negotiate.
const ALLOWED_SUITES: &[CipherSuite] = &[
    CipherSuite::TLS13_AES_128_GCM_SHA256,
    CipherSuite::TLS13_AES_256_GCM_SHA384,
    CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
    CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
    CipherSuite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
    CipherSuite::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
];

// ============================================================================
// CertBundle
// ============================================================================

/// One immutable set of certificate material.
///
/// Produced by the certificate-update callback and read as a snapshot;
/// never mutated after installation.
#[derive(Clone)]
pub struct CertBundle {
    /// CA certificate PEM, installed as the trust anchor.
    pub ca_pem: String,
    /// Device (server) certificate chain PEM.
    pub cert_pem: String,
    /// Private key PEM (PKCS#8, encrypted PKCS#8, or PKCS#1).
    pub key_pem: String,
    /// Passphrase for an encrypted private key; empty if none.
    pub key_password: String,
}

impl CertBundle {
    /// Returns `true` if the bundle carries enough material to build TLS.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.ca_pem.is_empty() && !self.cert_pem.is_empty() && !self.key_pem.is_empty()
    }
}

impl std::fmt::Debug for CertBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key material stays out of logs.
        f.debug_struct("CertBundle")
            .field("ca_pem_len", &self.ca_pem.len())
            .field("cert_pem_len", &self.cert_pem.len())
            .field("key_pem_len", &self.key_pem.len())
            .field("has_password", &!self.key_password.is_empty())
            .finish()
    }
}

// ============================================================================
// CertificateStore
// ============================================================================

/// Thread-safe holder of the current certificate bundle.
///
/// [`CertificateStore::install`] swaps the snapshot atomically; readers
/// get an `Arc` to the bundle that was current when they asked.
#[derive(Default)]
pub struct CertificateStore {
    current: RwLock<Option<Arc<CertBundle>>>,
}

impl CertificateStore {
    /// Creates an empty store. Not ready until material is installed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a new bundle, replacing any previous one.
    pub fn install(&self, bundle: CertBundle) {
        info!(bundle = ?bundle, "Certificate material installed");
        *self.current.write() = Some(Arc::new(bundle));
    }

    /// Returns the current bundle snapshot, if any.
    #[must_use]
    pub fn snapshot(&self) -> Option<Arc<CertBundle>> {
        self.current.read().clone()
    }

    /// Returns `true` if a complete bundle is installed.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.current
            .read()
            .as_ref()
            .is_some_and(|bundle| bundle.is_complete())
    }

    /// Builds a TLS acceptor from the current snapshot.
    ///
    /// Blocking work (parsing, key conversion) happens here; call at
    /// listener (re)start only, never on the IO path.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TlsContextBuild`] if no complete bundle is
    /// installed or the material does not parse.
    pub fn build_acceptor(&self) -> Result<TlsAcceptor> {
        let bundle = self
            .snapshot()
            .filter(|bundle| bundle.is_complete())
            .ok_or_else(|| Error::tls_context("certificate store not ready"))?;

        let config = build_server_config(&bundle)?;
        Ok(TlsAcceptor::from(config))
    }
}

// ============================================================================
// Server Config Construction
// ============================================================================

/// Builds a rustls server config from one bundle.
fn build_server_config(bundle: &CertBundle) -> Result<Arc<ServerConfig>> {
    let mut provider = rustls::crypto::ring::default_provider();
    provider
        .cipher_suites
        .retain(|suite| ALLOWED_SUITES.contains(&suite.suite()));
    let provider = Arc::new(provider);

    // CA as trust anchor for client certificates.
    let ca_certs = parse_certificates(bundle.ca_pem.as_bytes())?;
    if ca_certs.is_empty() {
        return Err(Error::tls_context("no CA certificates in bundle"));
    }

    let mut roots = RootCertStore::empty();
    for cert in &ca_certs {
        roots
            .add(cert.clone())
            .map_err(|e| Error::tls_context(format!("failed to add CA certificate: {e}")))?;
    }

    // Devices may present certificates; absence is tolerated.
    let verifier =
        WebPkiClientVerifier::builder_with_provider(Arc::new(roots), Arc::clone(&provider))
            .allow_unauthenticated()
            .build()
            .map_err(|e| Error::tls_context(format!("client verifier: {e}")))?;

    let certs = parse_certificates(bundle.cert_pem.as_bytes())?;
    if certs.is_empty() {
        return Err(Error::tls_context("no device certificates in bundle"));
    }

    let key = normalize_private_key(&bundle.key_pem, &bundle.key_password)?;

    let config = ServerConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS12, &rustls::version::TLS13])
        .map_err(|e| Error::tls_context(format!("protocol versions: {e}")))?
        .with_client_cert_verifier(verifier)
        .with_single_cert(certs, key)
        .map_err(|e| Error::tls_context(format!("server config: {e}")))?;

    debug!("TLS server context built");
    Ok(Arc::new(config))
}

fn parse_certificates(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>> {
    CertificateDer::pem_slice_iter(pem)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::tls_context(format!("certificate parse: {e:?}")))
}

// ============================================================================
// Private Key Normalization
// ============================================================================

/// Normalizes a private key PEM to PKCS#8 DER.
///
/// Handles plain PKCS#8 (`PRIVATE KEY`), passphrase-encrypted PKCS#8
/// (`ENCRYPTED PRIVATE KEY`), and legacy PKCS#1 (`RSA PRIVATE KEY`), which
/// gets wrapped in a PKCS#8 `PrivateKeyInfo` envelope.
///
/// # Errors
///
/// Returns [`Error::TlsContextBuild`] for unparseable PEM, an unsupported
/// label, or a wrong passphrase.
pub fn normalize_private_key(key_pem: &str, password: &str) -> Result<PrivateKeyDer<'static>> {
    let (label, doc) = Document::from_pem(key_pem)
        .map_err(|e| Error::tls_context(format!("private key PEM parse: {e}")))?;

    let pkcs8_der: Vec<u8> = match label {
        "PRIVATE KEY" => doc.as_bytes().to_vec(),

        "ENCRYPTED PRIVATE KEY" => {
            let encrypted = EncryptedPrivateKeyInfo::try_from(doc.as_bytes())
                .map_err(|e| Error::tls_context(format!("encrypted key parse: {e}")))?;
            let secret = encrypted
                .decrypt(password)
                .map_err(|e| Error::tls_context(format!("key decryption: {e}")))?;
            secret.as_bytes().to_vec()
        }

        "RSA PRIVATE KEY" => {
            let info = PrivateKeyInfo {
                algorithm: AlgorithmIdentifierRef {
                    oid: pkcs1::ALGORITHM_OID,
                    parameters: Some(AnyRef::NULL),
                },
                private_key: doc.as_bytes(),
                public_key: None,
            };
            info.to_der()
                .map_err(|e| Error::tls_context(format!("PKCS#1 to PKCS#8 wrap: {e}")))?
        }

        other => {
            return Err(Error::tls_context(format!(
                "unsupported private key label {other:?}"
            )));
        }
    };

    Ok(PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(pkcs8_der)))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle(ca: &str, cert: &str, key: &str) -> CertBundle {
        CertBundle {
            ca_pem: ca.into(),
            cert_pem: cert.into(),
            key_pem: key.into(),
            key_password: String::new(),
        }
    }

    #[test]
    fn test_store_not_ready_until_installed() {
        let store = CertificateStore::new();
        assert!(!store.is_ready());
        assert!(store.snapshot().is_none());

        store.install(bundle("ca", "cert", "key"));
        assert!(store.is_ready());
    }

    #[test]
    fn test_incomplete_bundle_is_not_ready() {
        let store = CertificateStore::new();
        store.install(bundle("ca", "", "key"));
        assert!(!store.is_ready());
    }

    #[test]
    fn test_install_swaps_snapshot() {
        let store = CertificateStore::new();
        store.install(bundle("ca-1", "cert", "key"));
        let first = store.snapshot().unwrap();

        store.install(bundle("ca-2", "cert", "key"));
        let second = store.snapshot().unwrap();

        // The first snapshot is unaffected by the swap.
        assert_eq!(first.ca_pem, "ca-1");
        assert_eq!(second.ca_pem, "ca-2");
    }

    #[test]
    fn test_build_acceptor_requires_ready_store() {
        let store = CertificateStore::new();
        let err = store.build_acceptor().err().unwrap();
        assert!(matches!(err, Error::TlsContextBuild { .. }));
    }

    #[test]
    fn test_build_acceptor_rejects_garbage_pem() {
        let store = CertificateStore::new();
        store.install(bundle("not pem", "not pem", "not pem"));
        assert!(store.build_acceptor().is_err());
    }

    #[test]
    fn test_normalize_rejects_garbage() {
        assert!(normalize_private_key("garbage", "").is_err());
    }

    #[test]
    fn test_normalize_rejects_unsupported_label() {
        // Valid PEM with a well-formed DER SEQUENCE body (empty), so the
        // parse succeeds and the label dispatch is what rejects it.
        let pem = "-----BEGIN EC PARAMETERS-----\nMAA=\n-----END EC PARAMETERS-----\n";
        let err = normalize_private_key(pem, "").unwrap_err();
        assert!(err.to_string().contains("unsupported private key label"));
    }

    #[test]
    fn test_debug_hides_key_material() {
        let bundle = CertBundle {
            ca_pem: "ca".into(),
            cert_pem: "cert".into(),
            key_pem: "very secret key".into(),
            key_password: "hunter2".into(),
        };
        let rendered = format!("{bundle:?}");
        assert!(!rendered.contains("very secret key"));
        assert!(!rendered.contains("hunter2"));
    }
}
