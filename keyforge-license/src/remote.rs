//! Remote license server seam.
//!
//! The engine only depends on [`RemoteLicenseClient`]; transport and auth
//! live in the implementation. With the `online` feature the crate ships
//! [`HttpRemoteClient`](crate::HttpRemoteClient).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The server's answer to a validation request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteValidation {
    pub valid: bool,
    #[serde(default)]
    pub revoked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<DateTime<Utc>>,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RemoteValidation {
    /// A plain "valid, not revoked" answer.
    #[must_use]
    pub fn accepted() -> Self {
        Self {
            valid: true,
            ..Self::default()
        }
    }

    /// A "revoked" answer.
    #[must_use]
    pub fn revoked() -> Self {
        Self {
            valid: false,
            revoked: true,
            ..Self::default()
        }
    }
}

/// The server's answer to a revocation request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevokeResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Failures talking to the license server. All of them fall through to
/// offline accounting during validation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("network error: {0}")]
    Network(String),

    #[error("remote call timed out")]
    Timeout,

    #[error("server error: {0}")]
    Server(String),
}

/// Network calls to the remote license server.
#[async_trait]
pub trait RemoteLicenseClient: Send + Sync {
    /// Asks the server whether `license_key` is currently good for `plugin_id`.
    async fn validate(
        &self,
        plugin_id: &str,
        license_key: &str,
    ) -> Result<RemoteValidation, RemoteError>;

    /// Asks the server to revoke `license_key`.
    async fn revoke(
        &self,
        plugin_id: &str,
        license_key: &str,
        reason: Option<&str>,
    ) -> Result<RevokeResponse, RemoteError>;
}
