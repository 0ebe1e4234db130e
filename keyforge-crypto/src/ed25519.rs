//! Ed25519 implementation of [`SignatureProvider`].
//!
//! The payload is first hashed with the configured digest and the digest
//! bytes are signed. Keys are the raw 32-byte seed / public point encoded as
//! standard base64.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ed25519_dalek::{
    Signature as DalekSignature, Signer as _, SigningKey as DalekSigningKey, Verifier as _,
    VerifyingKey as DalekVerifyingKey,
};
use rand::rngs::OsRng;

use crate::algorithm::{HashAlgorithm, SignatureAlgorithm};
use crate::error::{CryptoError, CryptoResult};
use crate::provider::{KeyPair, SignatureProvider};

/// Ed25519 key length in bytes (both secret seed and public key).
pub const ED25519_KEY_LEN: usize = 32;

/// Ed25519 signature length in bytes.
pub const ED25519_SIGNATURE_LEN: usize = 64;

/// Signature provider backed by `ed25519-dalek`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ed25519Provider;

impl Ed25519Provider {
    pub fn new() -> Self {
        Self
    }

    /// Derives the base64 public key for a base64 private key.
    pub fn public_key_for(private_key: &str) -> CryptoResult<String> {
        let signing = decode_signing_key(private_key)?;
        Ok(BASE64.encode(signing.verifying_key().to_bytes()))
    }

    /// Builds a key pair from a fixed 32-byte seed. Deterministic.
    #[must_use]
    pub fn key_pair_from_seed(seed: &[u8; ED25519_KEY_LEN]) -> KeyPair {
        let signing = DalekSigningKey::from_bytes(seed);
        KeyPair {
            public_key: BASE64.encode(signing.verifying_key().to_bytes()),
            private_key: BASE64.encode(signing.to_bytes()),
        }
    }
}

impl SignatureProvider for Ed25519Provider {
    fn sign(
        &self,
        payload: &[u8],
        private_key: &str,
        algorithm: SignatureAlgorithm,
        hash: HashAlgorithm,
    ) -> CryptoResult<String> {
        ensure_ed25519(algorithm)?;
        let signing = decode_signing_key(private_key)?;
        let signature = signing
            .try_sign(&hash.digest(payload))
            .map_err(|e| CryptoError::Signing(e.to_string()))?;
        Ok(BASE64.encode(signature.to_bytes()))
    }

    fn verify(
        &self,
        payload: &[u8],
        signature: &str,
        public_key: &str,
        algorithm: SignatureAlgorithm,
        hash: HashAlgorithm,
    ) -> CryptoResult<bool> {
        ensure_ed25519(algorithm)?;
        let verifying = decode_verifying_key(public_key)?;

        let Ok(sig_bytes) = BASE64.decode(signature.trim()) else {
            return Ok(false);
        };
        let Ok(sig_bytes): Result<[u8; ED25519_SIGNATURE_LEN], _> = sig_bytes.try_into() else {
            return Ok(false);
        };
        let signature = DalekSignature::from_bytes(&sig_bytes);

        Ok(verifying.verify(&hash.digest(payload), &signature).is_ok())
    }

    fn generate_key_pair(
        &self,
        algorithm: SignatureAlgorithm,
        key_size: u32,
    ) -> CryptoResult<KeyPair> {
        ensure_ed25519(algorithm)?;
        if key_size != algorithm.key_size_bits() {
            return Err(CryptoError::Unsupported(format!(
                "{algorithm} key size {key_size} (only {} bits)",
                algorithm.key_size_bits()
            )));
        }

        let signing = DalekSigningKey::generate(&mut OsRng);
        Ok(KeyPair {
            public_key: BASE64.encode(signing.verifying_key().to_bytes()),
            private_key: BASE64.encode(signing.to_bytes()),
        })
    }
}

fn ensure_ed25519(algorithm: SignatureAlgorithm) -> CryptoResult<()> {
    match algorithm {
        SignatureAlgorithm::Ed25519 => Ok(()),
    }
}

fn decode_key_bytes(encoded: &str) -> CryptoResult<[u8; ED25519_KEY_LEN]> {
    let bytes = BASE64
        .decode(encoded.trim())
        .map_err(|e| CryptoError::InvalidKey(format!("invalid base64: {e}")))?;
    let actual = bytes.len();
    bytes.try_into().map_err(|_| CryptoError::InvalidKeyLength {
        expected: ED25519_KEY_LEN,
        actual,
    })
}

fn decode_signing_key(encoded: &str) -> CryptoResult<DalekSigningKey> {
    Ok(DalekSigningKey::from_bytes(&decode_key_bytes(encoded)?))
}

fn decode_verifying_key(encoded: &str) -> CryptoResult<DalekVerifyingKey> {
    DalekVerifyingKey::from_bytes(&decode_key_bytes(encoded)?)
        .map_err(|_| CryptoError::InvalidKey("not a valid ed25519 point".to_string()))
}
