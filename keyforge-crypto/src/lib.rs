//! Signing layer for keyforge licenses.
//!
//! License payloads are signed by the issuer and verified on the client
//! through the [`SignatureProvider`] trait. The bundled [`Ed25519Provider`]
//! hashes the payload with the configured digest and signs the digest.

mod algorithm;
mod ed25519;
mod error;
mod provider;

pub use algorithm::{HashAlgorithm, SignatureAlgorithm};
pub use ed25519::{Ed25519Provider, ED25519_KEY_LEN, ED25519_SIGNATURE_LEN};
pub use error::{CryptoError, CryptoResult};
pub use provider::{KeyPair, SignatureProvider};
