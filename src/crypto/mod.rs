//! Crypto provider
//!
//! Holds the private key and certificate used to sign published files.
//! Both are loaded lazily on first use and cached for the lifetime of the
//! provider, which is shared read-only between writer threads.

pub mod keys;

use std::fmt;
use std::path::PathBuf;

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

pub use keys::{
    compute_key_fingerprint, decode_certificate, decode_private_key, encode_private_key,
    generate_private_key, load_certificate, load_private_key, PrivateKey,
};

/// Errors from key handling and signing
#[derive(Debug, Error)]
pub enum SigningError {
    #[error("private key unavailable at {path}: {reason}")]
    KeyUnavailable { path: PathBuf, reason: String },

    #[error("certificate unavailable at {path}: {reason}")]
    CertificateUnavailable { path: PathBuf, reason: String },

    #[error("no {0} configured")]
    NotConfigured(&'static str),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),
}

pub type SigningResult<T> = Result<T, SigningError>;

/// Signature algorithm of the signing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignatureAlgorithm {
    /// ECDSA over P-256 with SHA-256, DER encoded signatures.
    #[default]
    EcdsaP256Sha256,
    Ed25519,
}

impl SignatureAlgorithm {
    /// ASN.1 OID published in the signature info.
    pub fn oid(&self) -> &'static str {
        match self {
            SignatureAlgorithm::EcdsaP256Sha256 => "1.2.840.10045.4.3.2",
            SignatureAlgorithm::Ed25519 => "1.3.101.112",
        }
    }
}

impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignatureAlgorithm::EcdsaP256Sha256 => write!(f, "ecdsa-p256-sha256"),
            SignatureAlgorithm::Ed25519 => write!(f, "ed25519"),
        }
    }
}

pub struct CryptoProvider {
    algorithm: SignatureAlgorithm,
    private_key_path: Option<PathBuf>,
    certificate_path: Option<PathBuf>,
    private_key: OnceCell<PrivateKey>,
    certificate: OnceCell<Vec<u8>>,
}

impl CryptoProvider {
    /// Provider reading its key and certificate from files on first use.
    pub fn from_files(
        algorithm: SignatureAlgorithm,
        private_key_path: impl Into<PathBuf>,
        certificate_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            algorithm,
            private_key_path: Some(private_key_path.into()),
            certificate_path: Some(certificate_path.into()),
            private_key: OnceCell::new(),
            certificate: OnceCell::new(),
        }
    }

    /// Provider over already loaded key material.
    pub fn from_material(private_key: PrivateKey, certificate_der: Vec<u8>) -> Self {
        Self {
            algorithm: private_key.algorithm(),
            private_key_path: None,
            certificate_path: None,
            private_key: OnceCell::with_value(private_key),
            certificate: OnceCell::with_value(certificate_der),
        }
    }

    pub fn algorithm(&self) -> SignatureAlgorithm {
        self.algorithm
    }

    pub fn private_key(&self) -> SigningResult<&PrivateKey> {
        self.private_key.get_or_try_init(|| {
            let path = self
                .private_key_path
                .as_ref()
                .ok_or(SigningError::NotConfigured("private key"))?;
            let key = load_private_key(path, self.algorithm)?;
            info!(
                path = %path.display(),
                algorithm = %self.algorithm,
                fingerprint = %key.fingerprint(),
                "loaded signing key"
            );
            Ok(key)
        })
    }

    /// DER encoded signing certificate.
    pub fn certificate(&self) -> SigningResult<&[u8]> {
        self.certificate
            .get_or_try_init(|| {
                let path = self
                    .certificate_path
                    .as_ref()
                    .ok_or(SigningError::NotConfigured("certificate"))?;
                load_certificate(path)
            })
            .map(Vec::as_slice)
    }

    pub fn sign(&self, payload: &[u8]) -> SigningResult<Vec<u8>> {
        Ok(self.private_key()?.sign(payload))
    }

    /// Load key and certificate now, so failures surface before a run.
    pub fn load(&self) -> SigningResult<()> {
        self.private_key()?;
        self.certificate()?;
        Ok(())
    }
}

impl fmt::Debug for CryptoProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptoProvider")
            .field("algorithm", &self.algorithm)
            .field("private_key_path", &self.private_key_path)
            .field("certificate_path", &self.certificate_path)
            .field("loaded", &self.private_key.get().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const CERTIFICATE_PEM: &str =
        "-----BEGIN CERTIFICATE-----\nAAECAwQFBgcICQ==\n-----END CERTIFICATE-----\n";

    #[test]
    fn test_lazy_load_from_files() {
        let dir = TempDir::new().unwrap();
        let key_path = dir.path().join("private.pem");
        let cert_path = dir.path().join("certificate.crt");
        let key = generate_private_key(SignatureAlgorithm::EcdsaP256Sha256);
        fs::write(&key_path, encode_private_key(&key).unwrap()).unwrap();
        fs::write(&cert_path, CERTIFICATE_PEM).unwrap();

        let provider =
            CryptoProvider::from_files(SignatureAlgorithm::EcdsaP256Sha256, &key_path, &cert_path);
        provider.load().unwrap();

        assert_eq!(provider.certificate().unwrap(), &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
        assert_eq!(provider.private_key().unwrap().fingerprint(), key.fingerprint());
    }

    #[test]
    fn test_missing_key_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let provider = CryptoProvider::from_files(
            SignatureAlgorithm::Ed25519,
            dir.path().join("missing.key"),
            dir.path().join("missing.crt"),
        );
        let err = provider.load().unwrap_err();
        assert!(matches!(err, SigningError::KeyUnavailable { .. }));
    }

    #[test]
    fn test_signatures_are_deterministic() {
        for algorithm in [SignatureAlgorithm::Ed25519, SignatureAlgorithm::EcdsaP256Sha256] {
            let provider = CryptoProvider::from_material(generate_private_key(algorithm), vec![1]);
            assert_eq!(provider.algorithm(), algorithm);
            assert_eq!(
                provider.sign(b"payload").unwrap(),
                provider.sign(b"payload").unwrap()
            );
        }
    }

    #[test]
    fn test_algorithm_oids() {
        assert_eq!(SignatureAlgorithm::EcdsaP256Sha256.oid(), "1.2.840.10045.4.3.2");
        assert_eq!(SignatureAlgorithm::Ed25519.oid(), "1.3.101.112");
    }
}
