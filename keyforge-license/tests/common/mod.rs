//! Shared test helpers for license tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keyforge_crypto::{Ed25519Provider, KeyPair};
use keyforge_license::{
    CryptoConfig, License, LicenseConfig, LicenseIssuer, LicenseRequest, LicenseTier,
    MemoryLedger, PluginFeature, RemoteError, RemoteLicenseClient, RemoteValidation,
    RevokeResponse, TierConfig, TierDuration, ValidationEngine,
};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const PLUGIN: &str = "reverb-pro";

/// Returns a deterministic Ed25519 key pair from a fixed seed.
pub fn test_keypair() -> KeyPair {
    let seed: [u8; 32] = [
        1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24,
        25, 26, 27, 28, 29, 30, 31, 32,
    ];
    Ed25519Provider::key_pair_from_seed(&seed)
}

pub fn crypto_config() -> CryptoConfig {
    let pair = test_keypair();
    CryptoConfig::new(pair.public_key).with_private_key(pair.private_key)
}

pub fn features<const N: usize>(ids: [&str; N]) -> BTreeSet<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

pub fn tier(id: &str, duration: TierDuration, value: u32) -> LicenseTier {
    LicenseTier {
        id: id.to_string(),
        name: id.to_uppercase(),
        price: 49.0,
        currency: "USD".to_string(),
        duration,
        duration_value: value,
        max_users: 1,
        features: BTreeSet::new(),
        trial_days: 0,
        stackable: false,
    }
}

/// Tier table used across tests:
/// - `basic`: perpetual, `{presets}`
/// - `pro`: 12 months, 30-day trial, stackable, `{presets, convolution}`
/// - `trial`: 14 days, 14-day trial, `{convolution}`
/// - `broken`: 0 days, already expired at issuance
/// - `addon-a` / `addon-b`: stackable perpetual add-ons
pub fn tiers() -> TierConfig {
    let mut basic = tier("basic", TierDuration::Perpetual, 0);
    basic.features = features(["presets"]);

    let mut pro = tier("pro", TierDuration::Months, 12);
    pro.trial_days = 30;
    pro.stackable = true;
    pro.features = features(["presets", "convolution"]);

    let mut trial = tier("trial", TierDuration::Days, 14);
    trial.trial_days = 14;
    trial.features = features(["convolution"]);

    let broken = tier("broken", TierDuration::Days, 0);

    let mut addon_a = tier("addon-a", TierDuration::Perpetual, 0);
    addon_a.stackable = true;
    addon_a.features = features(["a", "b"]);

    let mut addon_b = tier("addon-b", TierDuration::Perpetual, 0);
    addon_b.stackable = true;
    addon_b.features = features(["b", "c"]);

    TierConfig::new(vec![basic, pro, trial, broken, addon_a, addon_b])
}

pub fn plugin_features() -> Vec<PluginFeature> {
    vec![
        PluginFeature {
            id: "presets".into(),
            name: "Presets".into(),
            required: true,
            premium: false,
        },
        PluginFeature {
            id: "convolution".into(),
            name: "Convolution".into(),
            required: false,
            premium: true,
        },
    ]
}

/// A config with offline validation only (no remote checks).
pub fn license_config() -> LicenseConfig {
    let mut config = LicenseConfig::new(crypto_config());
    config.tiers = tiers();
    config.features = plugin_features();
    config
}

/// A config with remote validation on and a 1-second timeout.
pub fn remote_config() -> LicenseConfig {
    let mut config = license_config();
    config.remote.enabled = true;
    config.remote.timeout_secs = 1;
    config
}

pub fn issuer() -> LicenseIssuer {
    LicenseIssuer::new(Arc::new(Ed25519Provider::new()), crypto_config()).unwrap()
}

pub fn issue(tier_id: &str) -> License {
    issue_for(PLUGIN, tier_id, Utc::now())
}

pub fn issue_at(tier_id: &str, at: DateTime<Utc>) -> License {
    issue_for(PLUGIN, tier_id, at)
}

pub fn issue_for(plugin_id: &str, tier_id: &str, at: DateTime<Utc>) -> License {
    let request = LicenseRequest::new(plugin_id, tier_id, "user-1", "user@example.com");
    issuer().generate_at(&request, &tiers(), at).unwrap()
}

pub fn engine() -> (ValidationEngine, Arc<MemoryLedger>) {
    let ledger = Arc::new(MemoryLedger::new());
    let engine = ValidationEngine::new(Arc::new(Ed25519Provider::new()), ledger.clone());
    (engine, ledger)
}

pub fn engine_with_remote(remote: Arc<MockRemote>) -> (ValidationEngine, Arc<MemoryLedger>) {
    let (engine, ledger) = engine();
    (engine.with_remote(remote), ledger)
}

/// How the mock server answers.
#[derive(Debug, Clone)]
pub enum RemoteMode {
    Accept,
    Revoked,
    Reject(String),
    NetworkDown,
    /// Never answers; exercises the timeout path.
    Hang,
}

/// Scriptable in-process license server.
pub struct MockRemote {
    mode: Mutex<RemoteMode>,
    pub validate_calls: AtomicUsize,
    pub revoke_calls: AtomicUsize,
}

impl MockRemote {
    pub fn new(mode: RemoteMode) -> Arc<Self> {
        Arc::new(Self {
            mode: Mutex::new(mode),
            validate_calls: AtomicUsize::new(0),
            revoke_calls: AtomicUsize::new(0),
        })
    }

    pub fn set_mode(&self, mode: RemoteMode) {
        *self.mode.lock().unwrap() = mode;
    }

    fn mode(&self) -> RemoteMode {
        self.mode.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteLicenseClient for MockRemote {
    async fn validate(
        &self,
        _plugin_id: &str,
        _license_key: &str,
    ) -> Result<RemoteValidation, RemoteError> {
        self.validate_calls.fetch_add(1, Ordering::SeqCst);
        match self.mode() {
            RemoteMode::Accept => Ok(RemoteValidation::accepted()),
            RemoteMode::Revoked => Ok(RemoteValidation::revoked()),
            RemoteMode::Reject(reason) => Ok(RemoteValidation {
                valid: false,
                error: Some(reason),
                ..RemoteValidation::default()
            }),
            RemoteMode::NetworkDown => Err(RemoteError::Network("connection refused".into())),
            RemoteMode::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(RemoteValidation::accepted())
            }
        }
    }

    async fn revoke(
        &self,
        _plugin_id: &str,
        _license_key: &str,
        _reason: Option<&str>,
    ) -> Result<RevokeResponse, RemoteError> {
        self.revoke_calls.fetch_add(1, Ordering::SeqCst);
        match self.mode() {
            RemoteMode::NetworkDown => Err(RemoteError::Network("connection refused".into())),
            _ => Ok(RevokeResponse {
                success: true,
                error: None,
            }),
        }
    }
}
