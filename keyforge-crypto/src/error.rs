//! Error types for the signature layer.

use thiserror::Error;

/// Result type for signature operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors that can occur while signing, verifying or generating keys.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Algorithm, hash or key size combination is not supported.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Key material could not be decoded.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Invalid key length.
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    /// The signing operation itself failed.
    #[error("signing failed: {0}")]
    Signing(String),
}
