//! Per-plugin licensing configuration.
//!
//! Configuration is plain serde data, normally loaded from a TOML file:
//!
//! ```toml
//! [plugins.reverb-pro]
//! requires_license = true
//!
//! [plugins.reverb-pro.crypto]
//! algorithm = "ed25519"
//! hash_algorithm = "sha256"
//! public_key = "base64..."
//!
//! [[plugins.reverb-pro.features]]
//! id = "presets"
//! name = "Presets"
//! required = true
//!
//! [[plugins.reverb-pro.tiers]]
//! id = "pro"
//! name = "Pro"
//! duration = "months"
//! duration_value = 12
//! trial_days = 30
//! features = ["presets", "convolution"]
//! ```

use keyforge_crypto::{HashAlgorithm, SignatureAlgorithm};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::error::{LicenseError, LicenseResult};
use crate::types::{LicenseTier, PluginFeature};

/// Key material and algorithms used to sign and verify licenses.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CryptoConfig {
    #[serde(default)]
    pub algorithm: SignatureAlgorithm,
    #[serde(default = "default_key_size")]
    pub key_size: u32,
    #[serde(default)]
    pub hash_algorithm: HashAlgorithm,
    /// Base64 public key. Required for validation.
    #[serde(default)]
    pub public_key: String,
    /// Base64 private key. Only needed where licenses are issued.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
}

fn default_key_size() -> u32 {
    256
}

impl CryptoConfig {
    pub fn new(public_key: impl Into<String>) -> Self {
        Self {
            algorithm: SignatureAlgorithm::default(),
            key_size: default_key_size(),
            hash_algorithm: HashAlgorithm::default(),
            public_key: public_key.into(),
            private_key: None,
        }
    }

    pub fn with_private_key(mut self, private_key: impl Into<String>) -> Self {
        self.private_key = Some(private_key.into());
        self
    }

    /// Returns the public key, or a configuration error if none is set.
    pub fn require_public_key(&self) -> LicenseResult<&str> {
        let key = self.public_key.trim();
        if key.is_empty() {
            return Err(LicenseError::Configuration(
                "no public key configured".to_string(),
            ));
        }
        Ok(key)
    }

    /// Returns the private key, or a configuration error if none is set.
    pub fn require_private_key(&self) -> LicenseResult<&str> {
        match self.private_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => Ok(key),
            _ => Err(LicenseError::Configuration(
                "no private key configured; issuance requires one".to_string(),
            )),
        }
    }
}

impl fmt::Debug for CryptoConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptoConfig")
            .field("algorithm", &self.algorithm)
            .field("key_size", &self.key_size)
            .field("hash_algorithm", &self.hash_algorithm)
            .field("public_key", &self.public_key)
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// How long a license may go without a successful server check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfflinePolicy {
    #[serde(default = "default_true")]
    pub allow_offline: bool,
    #[serde(default = "default_max_offline_days")]
    pub max_offline_days: u32,
    /// Remaining grace days at or below which results carry a warning.
    #[serde(default = "default_warn_within_days")]
    pub warn_within_days: u32,
}

fn default_max_offline_days() -> u32 {
    7
}

fn default_warn_within_days() -> u32 {
    2
}

impl Default for OfflinePolicy {
    fn default() -> Self {
        Self {
            allow_offline: true,
            max_offline_days: default_max_offline_days(),
            warn_within_days: default_warn_within_days(),
        }
    }
}

/// Whether and how to consult the remote license server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemotePolicy {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    10
}

impl RemotePolicy {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for RemotePolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            server_url: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// The tier table licenses are issued against.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TierConfig {
    pub tiers: Vec<LicenseTier>,
}

impl TierConfig {
    pub fn new(tiers: Vec<LicenseTier>) -> Self {
        Self { tiers }
    }

    /// Looks up a tier by id.
    #[must_use]
    pub fn find(&self, tier_id: &str) -> Option<&LicenseTier> {
        self.tiers.iter().find(|t| t.id == tier_id)
    }
}

/// Licensing configuration for a single plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LicenseConfig {
    /// Master switch. When false every key validates.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// When false the plugin's licensing is optional and every key validates.
    #[serde(default = "default_true")]
    pub requires_license: bool,
    #[serde(default)]
    pub features: Vec<PluginFeature>,
    #[serde(default)]
    pub tiers: TierConfig,
    pub crypto: CryptoConfig,
    #[serde(default)]
    pub offline: OfflinePolicy,
    #[serde(default)]
    pub remote: RemotePolicy,
    /// How far in the future `issued_at` may be before it counts as skew.
    #[serde(default = "default_clock_skew_secs")]
    pub clock_skew_tolerance_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_clock_skew_secs() -> u64 {
    300
}

impl LicenseConfig {
    pub fn new(crypto: CryptoConfig) -> Self {
        Self {
            enabled: true,
            requires_license: true,
            features: Vec::new(),
            tiers: TierConfig::default(),
            crypto,
            offline: OfflinePolicy::default(),
            remote: RemotePolicy::default(),
            clock_skew_tolerance_secs: default_clock_skew_secs(),
        }
    }

    /// Returns true if keys must actually be checked.
    #[must_use]
    pub fn enforces_license(&self) -> bool {
        self.enabled && self.requires_license
    }

    #[must_use]
    pub fn tier(&self, tier_id: &str) -> Option<&LicenseTier> {
        self.tiers.find(tier_id)
    }

    #[must_use]
    pub fn feature(&self, feature_id: &str) -> Option<&PluginFeature> {
        self.features.iter().find(|f| f.id == feature_id)
    }

    /// Ids of features that are always enabled.
    #[must_use]
    pub fn required_features(&self) -> BTreeSet<String> {
        self.features
            .iter()
            .filter(|f| f.required)
            .map(|f| f.id.clone())
            .collect()
    }

    /// Ids of every feature in the table.
    #[must_use]
    pub fn all_features(&self) -> BTreeSet<String> {
        self.features.iter().map(|f| f.id.clone()).collect()
    }
}

/// Top-level configuration file: one [`LicenseConfig`] per plugin id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyforgeConfig {
    #[serde(default)]
    pub plugins: BTreeMap<String, LicenseConfig>,
}

impl KeyforgeConfig {
    /// Parses a configuration document from TOML text.
    pub fn from_toml_str(text: &str) -> LicenseResult<Self> {
        toml::from_str(text)
            .map_err(|e| LicenseError::Configuration(format!("invalid config: {e}")))
    }

    /// Loads a configuration document from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> LicenseResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            LicenseError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    /// Returns the configuration for a plugin, or a configuration error.
    pub fn plugin(&self, plugin_id: &str) -> LicenseResult<&LicenseConfig> {
        self.plugins.get(plugin_id).ok_or_else(|| {
            LicenseError::Configuration(format!("no license config for plugin '{plugin_id}'"))
        })
    }
}
