//! The signature provider seam.
//!
//! License issuance and validation only ever talk to this trait, so the
//! primitive behind it can be swapped (HSM, remote signer, test double).

use serde::{Deserialize, Serialize};

use crate::algorithm::{HashAlgorithm, SignatureAlgorithm};
use crate::error::CryptoResult;

/// A freshly generated key pair, both halves as standard base64 text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPair {
    pub public_key: String,
    pub private_key: String,
}

/// Signs, verifies and generates keys for license payloads.
pub trait SignatureProvider: Send + Sync {
    /// Signs `payload` and returns the signature as base64 text.
    fn sign(
        &self,
        payload: &[u8],
        private_key: &str,
        algorithm: SignatureAlgorithm,
        hash: HashAlgorithm,
    ) -> CryptoResult<String>;

    /// Verifies `signature` over `payload`.
    ///
    /// A signature that is not well-formed is reported as `Ok(false)`.
    /// An undecodable public key is an error: it is an operator mistake,
    /// not a property of the license being checked.
    fn verify(
        &self,
        payload: &[u8],
        signature: &str,
        public_key: &str,
        algorithm: SignatureAlgorithm,
        hash: HashAlgorithm,
    ) -> CryptoResult<bool>;

    /// Generates a new key pair.
    fn generate_key_pair(
        &self,
        algorithm: SignatureAlgorithm,
        key_size: u32,
    ) -> CryptoResult<KeyPair>;
}
