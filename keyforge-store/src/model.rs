//! Persisted records and operation reports.

use chrono::{DateTime, Utc};
use keyforge_license::ValidationResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Current on-disk document version.
pub const STORE_VERSION: u32 = 1;

/// How a license reached this machine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LicenseSource {
    #[default]
    Manual,
    Purchase,
    Trial,
    Upgrade,
}

impl std::fmt::Display for LicenseSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Manual => "manual",
            Self::Purchase => "purchase",
            Self::Trial => "trial",
            Self::Upgrade => "upgrade",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for LicenseSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "manual" => Ok(Self::Manual),
            "purchase" => Ok(Self::Purchase),
            "trial" => Ok(Self::Trial),
            "upgrade" => Ok(Self::Upgrade),
            other => Err(format!("unknown license source: {other}")),
        }
    }
}

/// An add-on license combined with a plugin's primary license.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackedLicense {
    pub license_key: String,
    pub license_id: String,
    pub tier_id: String,
    pub installed_at: DateTime<Utc>,
    pub last_validated: DateTime<Utc>,
    pub validation: ValidationResult,
    #[serde(default)]
    pub source: LicenseSource,
}

/// The installed license for one plugin, with its cached validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredLicense {
    pub plugin_id: String,
    pub license_key: String,
    pub license_id: String,
    pub tier_id: String,
    pub installed_at: DateTime<Utc>,
    pub last_validated: DateTime<Utc>,
    pub validation: ValidationResult,
    #[serde(default)]
    pub source: LicenseSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stacked: Vec<StackedLicense>,
}

impl StoredLicense {
    /// Returns true if the primary license was valid when last checked.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.validation.valid
    }

    /// Cached results of the primary and every stacked license.
    pub fn validations(&self) -> impl Iterator<Item = &ValidationResult> {
        std::iter::once(&self.validation).chain(self.stacked.iter().map(|s| &s.validation))
    }
}

/// The whole persisted store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreDocument {
    #[serde(default)]
    pub licenses: BTreeMap<String, StoredLicense>,
    #[serde(default)]
    pub last_sync: Option<DateTime<Utc>>,
    pub version: u32,
}

impl Default for StoreDocument {
    fn default() -> Self {
        Self {
            licenses: BTreeMap::new(),
            last_sync: None,
            version: STORE_VERSION,
        }
    }
}

/// A plugin whose refresh did not complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshFailure {
    pub plugin_id: String,
    pub reason: String,
}

/// Per-plugin outcome of [`LicenseStore::refresh_all`](crate::LicenseStore::refresh_all).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshReport {
    pub updated: Vec<String>,
    pub failed: Vec<RefreshFailure>,
}

impl RefreshReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Why an imported entry was not installed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    MissingPluginId,
    MissingKey,
    AlreadyInstalled,
    NotRegistered,
    NotStackable { existing: String, incoming: String },
    Rejected { detail: String },
}

/// An imported entry that was skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSkip {
    /// Position of the entry in the imported list.
    pub index: usize,
    pub plugin_id: Option<String>,
    #[serde(flatten)]
    pub reason: SkipReason,
}

/// A stacked add-on that was left out of an imported entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DroppedAddon {
    /// Position of the owning entry in the imported list.
    pub index: usize,
    /// Position of the add-on within that entry's `stacked` list.
    pub addon_index: usize,
    pub plugin_id: String,
    #[serde(flatten)]
    pub reason: SkipReason,
}

/// Outcome of [`LicenseStore::import`](crate::LicenseStore::import).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportReport {
    pub imported: Vec<String>,
    pub skipped: Vec<ImportSkip>,
    #[serde(default)]
    pub dropped_addons: Vec<DroppedAddon>,
}

/// Export file format.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct ExportBundle<'a> {
    pub version: u32,
    pub exported_at: DateTime<Utc>,
    pub licenses: Vec<&'a StoredLicense>,
}

/// An entry read back from an export file. Fields are optional so that
/// incomplete entries can be reported rather than failing the whole import.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ImportEntry {
    #[serde(default)]
    pub plugin_id: Option<String>,
    #[serde(default)]
    pub license_key: Option<String>,
    #[serde(default)]
    pub source: LicenseSource,
    #[serde(default)]
    pub user_email: Option<String>,
    #[serde(default)]
    pub installed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub stacked: Vec<ImportStacked>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ImportStacked {
    #[serde(default)]
    pub license_key: Option<String>,
    #[serde(default)]
    pub source: LicenseSource,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ImportBundle {
    #[serde(default)]
    pub licenses: Vec<ImportEntry>,
}
