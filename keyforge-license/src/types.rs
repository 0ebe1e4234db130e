//! License data model: tiers, features, payloads and validation results.

use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{ValidationError, ValidationErrorKind};

/// Unit a tier's duration is counted in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TierDuration {
    /// Never expires.
    #[default]
    Perpetual,
    Days,
    Months,
    Years,
}

/// A named pricing/feature bundle licenses are issued against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LicenseTier {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub price: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub duration: TierDuration,
    /// Number of `duration` units. Ignored for perpetual tiers.
    #[serde(default)]
    pub duration_value: u32,
    #[serde(default = "default_max_users")]
    pub max_users: u32,
    #[serde(default)]
    pub features: BTreeSet<String>,
    /// Length of the trial window in days. Zero means no trial.
    #[serde(default)]
    pub trial_days: u32,
    /// Whether licenses of this tier combine with other valid licenses.
    #[serde(default)]
    pub stackable: bool,
}

fn default_currency() -> String {
    "USD".to_string()
}

fn default_max_users() -> u32 {
    1
}

impl LicenseTier {
    /// Computes the expiry for a license of this tier issued at `issued_at`.
    ///
    /// Returns `None` for perpetual tiers. Calendar overflow saturates to
    /// the maximum representable instant rather than becoming perpetual.
    #[must_use]
    pub fn expires_at(&self, issued_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let value = self.duration_value;
        let expiry = match self.duration {
            TierDuration::Perpetual => return None,
            TierDuration::Days => Duration::try_days(i64::from(value))
                .and_then(|d| issued_at.checked_add_signed(d)),
            TierDuration::Months => issued_at.checked_add_months(Months::new(value)),
            TierDuration::Years => value
                .checked_mul(12)
                .and_then(|m| issued_at.checked_add_months(Months::new(m))),
        };
        Some(expiry.unwrap_or(DateTime::<Utc>::MAX_UTC))
    }

    /// Returns true if this tier carries a trial window.
    #[must_use]
    pub fn has_trial(&self) -> bool {
        self.trial_days > 0
    }
}

/// A feature a plugin can gate behind a license.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginFeature {
    pub id: String,
    pub name: String,
    /// Always enabled, license or not.
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub premium: bool,
}

/// A primitive value in a payload's metadata bag.
///
/// Core logic never inspects these; they are carried through signing,
/// encoding and storage untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// The signed content of a license. Immutable once issued.
///
/// Unknown fields are rejected: anything in the payload must be covered by
/// the signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LicensePayload {
    /// Unique, opaque license id.
    pub id: String,
    pub plugin_id: String,
    pub tier_id: String,
    pub user_id: String,
    pub user_email: String,
    pub issued_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub features: BTreeSet<String>,
    #[serde(default = "default_max_users")]
    pub max_users: u32,
    #[serde(default)]
    pub metadata: BTreeMap<String, MetadataValue>,
}

impl LicensePayload {
    /// Returns true if the license never expires.
    #[must_use]
    pub fn is_perpetual(&self) -> bool {
        self.expires_at.is_none()
    }
}

/// An issued license: payload, its signature and the encoded key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct License {
    pub payload: LicensePayload,
    /// Base64 signature over the canonical payload bytes.
    pub signature: String,
    /// The encoded license key handed to the customer.
    pub key: String,
    #[serde(default)]
    pub revoked: bool,
}

/// What the issuer needs to mint a license.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LicenseRequest {
    pub plugin_id: String,
    pub tier_id: String,
    pub user_id: String,
    pub user_email: String,
    /// Replaces the tier's feature set when present.
    #[serde(default)]
    pub features: Option<BTreeSet<String>>,
    /// Replaces the tier's user limit when present.
    #[serde(default)]
    pub max_users: Option<u32>,
    #[serde(default)]
    pub metadata: BTreeMap<String, MetadataValue>,
}

impl LicenseRequest {
    pub fn new(
        plugin_id: impl Into<String>,
        tier_id: impl Into<String>,
        user_id: impl Into<String>,
        user_email: impl Into<String>,
    ) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            tier_id: tier_id.into(),
            user_id: user_id.into(),
            user_email: user_email.into(),
            ..Self::default()
        }
    }

    pub fn with_features<I, S>(mut self, features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.features = Some(features.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Outcome of validating one license key for one plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub expired: bool,
    pub revoked: bool,
    /// Granted features. Empty unless `valid`.
    #[serde(default)]
    pub features: BTreeSet<String>,
    #[serde(default)]
    pub errors: Vec<ValidationError>,
    pub last_checked: DateTime<Utc>,
    #[serde(default)]
    pub offline_days_used: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_trial_days: Option<u32>,
    /// Days left in the offline grace window, set only when the server
    /// could not be reached and offline use was allowed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offline_days_remaining: Option<u32>,
    /// True when running offline and close to the grace limit.
    #[serde(default)]
    pub offline_warning: bool,
    /// Why the license server could not be consulted. Set whenever remote
    /// validation is enabled and the call failed, even if offline grace
    /// kept the license valid.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_error: Option<String>,
}

impl ValidationResult {
    /// A result with no checks applied yet.
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            valid: false,
            expired: false,
            revoked: false,
            features: BTreeSet::new(),
            errors: Vec::new(),
            last_checked: now,
            offline_days_used: 0,
            remaining_trial_days: None,
            offline_days_remaining: None,
            offline_warning: false,
            remote_error: None,
        }
    }

    /// A terminal invalid result carrying a single error.
    #[must_use]
    pub fn rejected(error: ValidationError, now: DateTime<Utc>) -> Self {
        let mut result = Self::new(now);
        result.errors.push(error);
        result
    }

    /// Returns true if any collected error has the given kind.
    #[must_use]
    pub fn has_error(&self, kind: ValidationErrorKind) -> bool {
        self.errors.iter().any(|e| e.kind() == kind)
    }

    /// Returns true if the remote check was attempted and did not complete.
    #[must_use]
    pub fn remote_failed(&self) -> bool {
        self.remote_error.is_some()
    }

    /// Returns true if `feature_id` is granted by this result.
    #[must_use]
    pub fn grants(&self, feature_id: &str) -> bool {
        self.valid && self.features.contains(feature_id)
    }
}
