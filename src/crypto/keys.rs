//! Key and certificate files.
//!
//! Ed25519 keys are stored as the base64 encoded 32-byte seed. ECDSA keys
//! are PEM files in PKCS#8 (`PRIVATE KEY`) or SEC1 (`EC PRIVATE KEY`) form.
//! Certificates are accepted as PEM or raw DER and always handed out as DER.

use std::fs;
use std::path::Path;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use p256::pkcs8::{DecodePrivateKey, EncodePrivateKey, LineEnding};
use sha2::{Digest, Sha256};

use super::{SignatureAlgorithm, SigningError, SigningResult};

const PEM_BEGIN: &str = "-----BEGIN";

/// A loaded signing key.
pub enum PrivateKey {
    Ed25519(ed25519_dalek::SigningKey),
    EcdsaP256(p256::ecdsa::SigningKey),
}

impl PrivateKey {
    pub fn algorithm(&self) -> SignatureAlgorithm {
        match self {
            PrivateKey::Ed25519(_) => SignatureAlgorithm::Ed25519,
            PrivateKey::EcdsaP256(_) => SignatureAlgorithm::EcdsaP256Sha256,
        }
    }

    /// Sign `payload`. ECDSA signatures are DER encoded.
    pub fn sign(&self, payload: &[u8]) -> Vec<u8> {
        match self {
            PrivateKey::Ed25519(key) => {
                use ed25519_dalek::Signer;
                key.sign(payload).to_bytes().to_vec()
            }
            PrivateKey::EcdsaP256(key) => {
                use p256::ecdsa::signature::Signer;
                let signature: p256::ecdsa::Signature = key.sign(payload);
                signature.to_der().as_bytes().to_vec()
            }
        }
    }

    /// Public key bytes, raw for Ed25519 and uncompressed SEC1 for P-256.
    pub fn public_key_bytes(&self) -> Vec<u8> {
        match self {
            PrivateKey::Ed25519(key) => key.verifying_key().as_bytes().to_vec(),
            PrivateKey::EcdsaP256(key) => key
                .verifying_key()
                .to_encoded_point(false)
                .as_bytes()
                .to_vec(),
        }
    }

    pub fn fingerprint(&self) -> String {
        compute_key_fingerprint(&self.public_key_bytes())
    }
}

/// SHA-256 fingerprint of a public key (hex-encoded)
pub fn compute_key_fingerprint(public_key: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(public_key);
    hex::encode(hasher.finalize())
}

/// Generate a fresh key for `algorithm`.
pub fn generate_private_key(algorithm: SignatureAlgorithm) -> PrivateKey {
    match algorithm {
        SignatureAlgorithm::Ed25519 => {
            PrivateKey::Ed25519(ed25519_dalek::SigningKey::generate(&mut rand::thread_rng()))
        }
        SignatureAlgorithm::EcdsaP256Sha256 => {
            PrivateKey::EcdsaP256(p256::ecdsa::SigningKey::random(&mut rand::thread_rng()))
        }
    }
}

/// Encode a key in the file format [`load_private_key`] reads.
pub fn encode_private_key(key: &PrivateKey) -> SigningResult<String> {
    match key {
        PrivateKey::Ed25519(key) => Ok(STANDARD.encode(key.to_bytes())),
        PrivateKey::EcdsaP256(key) => key
            .to_pkcs8_pem(LineEnding::LF)
            .map(|pem| pem.as_str().to_owned())
            .map_err(|e| SigningError::InvalidKey(e.to_string())),
    }
}

/// Parse a key in the file format of `algorithm`.
pub fn decode_private_key(content: &str, algorithm: SignatureAlgorithm) -> SigningResult<PrivateKey> {
    match algorithm {
        SignatureAlgorithm::Ed25519 => {
            let bytes = STANDARD.decode(content.trim())?;
            let seed: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
                SigningError::InvalidKey(format!("expected 32 bytes, got {}", bytes.len()))
            })?;
            Ok(PrivateKey::Ed25519(ed25519_dalek::SigningKey::from_bytes(&seed)))
        }
        SignatureAlgorithm::EcdsaP256Sha256 => {
            let key = if content.contains("BEGIN EC PRIVATE KEY") {
                p256::SecretKey::from_sec1_pem(content)
                    .map(p256::ecdsa::SigningKey::from)
                    .map_err(|e| SigningError::InvalidKey(e.to_string()))?
            } else {
                p256::ecdsa::SigningKey::from_pkcs8_pem(content)
                    .map_err(|e| SigningError::InvalidKey(e.to_string()))?
            };
            Ok(PrivateKey::EcdsaP256(key))
        }
    }
}

pub fn load_private_key(path: &Path, algorithm: SignatureAlgorithm) -> SigningResult<PrivateKey> {
    let content = fs::read_to_string(path).map_err(|e| SigningError::KeyUnavailable {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    decode_private_key(&content, algorithm).map_err(|e| SigningError::KeyUnavailable {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// DER bytes of a PEM or DER certificate.
pub fn decode_certificate(content: &[u8]) -> SigningResult<Vec<u8>> {
    let Ok(text) = std::str::from_utf8(content) else {
        return Ok(content.to_vec());
    };
    if !text.trim_start().starts_with(PEM_BEGIN) {
        return Ok(content.to_vec());
    }
    let body: String = text
        .lines()
        .map(str::trim)
        .skip_while(|line| !line.starts_with(PEM_BEGIN))
        .skip(1)
        .take_while(|line| !line.starts_with("-----END"))
        .collect();
    Ok(STANDARD.decode(body)?)
}

pub fn load_certificate(path: &Path) -> SigningResult<Vec<u8>> {
    let unavailable = |reason: String| SigningError::CertificateUnavailable {
        path: path.to_path_buf(),
        reason,
    };
    let content = fs::read(path).map_err(|e| unavailable(e.to_string()))?;
    let der = decode_certificate(&content).map_err(|e| unavailable(e.to_string()))?;
    if der.is_empty() {
        return Err(unavailable("empty certificate".to_string()));
    }
    Ok(der)
}
