//! Error types for the licensing module.
//!
//! Two families live here. [`LicenseError`] is returned as `Err` and covers
//! operator mistakes and infrastructure failures. [`ValidationError`] values
//! are collected inside a `ValidationResult` and describe why a particular
//! license is not usable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Licensing errors that abort an operation.
#[derive(Debug, Error)]
pub enum LicenseError {
    /// Missing or unusable configuration (keys, tier table, plugin entry).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The request names a tier that is not in the tier table.
    #[error("tier not found: {0}")]
    TierNotFound(String),

    /// The signature provider failed during issuance.
    #[error("signing failed: {0}")]
    SigningFailed(String),

    /// A license request is missing required fields.
    #[error("invalid license request: {0}")]
    InvalidRequest(String),

    /// License key text could not be decoded.
    #[error("malformed license key: {0}")]
    MalformedKey(String),

    /// Ledger persistence failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// Remote license server call failed where no fallback exists.
    #[error("remote error: {0}")]
    Remote(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for license operations.
pub type LicenseResult<T> = Result<T, LicenseError>;

/// A reason a license failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationError {
    #[error("malformed license key: {reason}")]
    MalformedKey { reason: String },

    #[error("license signature invalid")]
    SignatureInvalid,

    #[error("license expired on {expired_at}")]
    Expired { expired_at: DateTime<Utc> },

    #[error("license issued in the future ({issued_at})")]
    ClockSkew { issued_at: DateTime<Utc> },

    #[error("license expiry precedes its issue date")]
    InvalidDates,

    #[error("license is for plugin '{found}', not '{expected}'")]
    PluginMismatch { expected: String, found: String },

    #[error("license has been revoked")]
    Revoked,

    #[error("license server rejected the license: {reason}")]
    RemoteRejected { reason: String },

    #[error("offline for {days_used} days (limit {max_days})")]
    OfflineLimitExceeded { days_used: u32, max_days: u32 },

    #[error("license server unreachable: {reason}")]
    RemoteUnreachable { reason: String },
}

/// Field-less discriminant of [`ValidationError`], for matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationErrorKind {
    MalformedKey,
    SignatureInvalid,
    Expired,
    ClockSkew,
    InvalidDates,
    PluginMismatch,
    Revoked,
    RemoteRejected,
    OfflineLimitExceeded,
    RemoteUnreachable,
}

impl ValidationError {
    #[must_use]
    pub fn kind(&self) -> ValidationErrorKind {
        match self {
            Self::MalformedKey { .. } => ValidationErrorKind::MalformedKey,
            Self::SignatureInvalid => ValidationErrorKind::SignatureInvalid,
            Self::Expired { .. } => ValidationErrorKind::Expired,
            Self::ClockSkew { .. } => ValidationErrorKind::ClockSkew,
            Self::InvalidDates => ValidationErrorKind::InvalidDates,
            Self::PluginMismatch { .. } => ValidationErrorKind::PluginMismatch,
            Self::Revoked => ValidationErrorKind::Revoked,
            Self::RemoteRejected { .. } => ValidationErrorKind::RemoteRejected,
            Self::OfflineLimitExceeded { .. } => ValidationErrorKind::OfflineLimitExceeded,
            Self::RemoteUnreachable { .. } => ValidationErrorKind::RemoteUnreachable,
        }
    }

    /// Returns true if reconnecting to the license server may clear this error.
    #[must_use]
    pub fn is_recoverable_online(&self) -> bool {
        matches!(
            self,
            Self::OfflineLimitExceeded { .. } | Self::RemoteUnreachable { .. }
        )
    }
}
