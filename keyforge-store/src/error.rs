//! Error types for the license store.

use keyforge_license::{LicenseError, ValidationError};
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The key failed validation and was not stored.
    #[error("license for '{plugin_id}' rejected: {}", summarize(.errors))]
    LicenseRejected {
        plugin_id: String,
        errors: Vec<ValidationError>,
    },

    /// No license configuration is registered for the plugin.
    #[error("plugin not registered: {0}")]
    NotRegistered(String),

    /// The plugin has no installed license.
    #[error("no license installed for plugin: {0}")]
    NotInstalled(String),

    /// One of the tiers involved does not allow stacking.
    #[error("tier '{incoming}' cannot be stacked onto '{existing}'")]
    NotStackable { existing: String, incoming: String },

    /// The persisted document is unreadable or from a newer format.
    #[error("invalid store data: {0}")]
    InvalidData(String),

    /// Issuance, validation or configuration error from the license layer.
    #[error(transparent)]
    License(#[from] LicenseError),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error (file system).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn summarize(errors: &[ValidationError]) -> String {
    if errors.is_empty() {
        return "not valid".to_string();
    }
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
