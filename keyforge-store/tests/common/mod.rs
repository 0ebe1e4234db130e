//! Shared test helpers for store tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keyforge_crypto::{Ed25519Provider, KeyPair};
use keyforge_license::{
    CryptoConfig, LicenseConfig, LicenseIssuer, LicenseRequest, LicenseTier, MemoryLedger,
    PluginFeature, RemoteError, RemoteLicenseClient, RemoteValidation, RevokeResponse,
    TierConfig, TierDuration, ValidationEngine,
};
use keyforge_store::{LicenseStore, MemoryBackend, StoreBackend};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const REVERB: &str = "reverb-pro";
pub const DELAY: &str = "delay-lite";
pub const CHORUS: &str = "chorus-x";

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

fn tier(id: &str, duration: TierDuration, value: u32, ids: &[&str]) -> LicenseTier {
    LicenseTier {
        id: id.to_string(),
        name: id.to_uppercase(),
        price: 29.0,
        currency: "USD".to_string(),
        duration,
        duration_value: value,
        max_users: 1,
        features: ids.iter().map(|s| s.to_string()).collect(),
        trial_days: 0,
        stackable: false,
    }
}

/// - `basic`: perpetual, `{presets}`
/// - `pro`: 12 months, stackable, `{presets, convolution}`
/// - `trial`: 14 days, `{convolution}`
/// - `broken`: 0 days, already expired at issuance
/// - `addon-a` / `addon-b`: stackable perpetual add-ons
pub fn tiers() -> TierConfig {
    let basic = tier("basic", TierDuration::Perpetual, 0, &["presets"]);
    let mut pro = tier("pro", TierDuration::Months, 12, &["presets", "convolution"]);
    pro.stackable = true;
    let mut trial = tier("trial", TierDuration::Days, 14, &["convolution"]);
    trial.trial_days = 14;
    let broken = tier("broken", TierDuration::Days, 0, &["convolution"]);
    let mut addon_a = tier("addon-a", TierDuration::Perpetual, 0, &["a", "b"]);
    addon_a.stackable = true;
    let mut addon_b = tier("addon-b", TierDuration::Perpetual, 0, &["b", "c"]);
    addon_b.stackable = true;
    TierConfig::new(vec![basic, pro, trial, broken, addon_a, addon_b])
}

pub fn license_config() -> LicenseConfig {
    let mut config = LicenseConfig::new(crypto_config());
    config.tiers = tiers();
    config.features = vec![
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
    ];
    config
}

/// Remote checks on with the default offline grace policy.
pub fn remote_config() -> LicenseConfig {
    let mut config = license_config();
    config.remote.enabled = true;
    config.remote.timeout_secs = 1;
    config
}

/// Remote checks on, offline use disallowed: an unreachable server is fatal.
pub fn strict_remote_config() -> LicenseConfig {
    let mut config = remote_config();
    config.offline.allow_offline = false;
    config
}

pub fn issue_for(plugin_id: &str, tier_id: &str, at: DateTime<Utc>) -> String {
    let issuer = LicenseIssuer::new(Arc::new(Ed25519Provider::new()), crypto_config()).unwrap();
    let request = LicenseRequest::new(plugin_id, tier_id, "user-1", "user@example.com");
    issuer.generate_at(&request, &tiers(), at).unwrap().key
}

pub fn issue(plugin_id: &str, tier_id: &str) -> String {
    issue_for(plugin_id, tier_id, Utc::now())
}

pub fn engine(remote: Option<Arc<ScriptedRemote>>) -> ValidationEngine {
    let engine = ValidationEngine::new(
        Arc::new(Ed25519Provider::new()),
        Arc::new(MemoryLedger::new()),
    );
    match remote {
        Some(remote) => engine.with_remote(remote),
        None => engine,
    }
}

/// A store over a memory backend with the three test plugins registered.
pub async fn store() -> (LicenseStore, Arc<MemoryBackend>) {
    store_with(license_config(), None).await
}

pub async fn store_with(
    config: LicenseConfig,
    remote: Option<Arc<ScriptedRemote>>,
) -> (LicenseStore, Arc<MemoryBackend>) {
    let backend = Arc::new(MemoryBackend::new());
    let store = open_store(backend.clone(), config, remote).await;
    (store, backend)
}

pub async fn open_store(
    backend: Arc<dyn StoreBackend>,
    config: LicenseConfig,
    remote: Option<Arc<ScriptedRemote>>,
) -> LicenseStore {
    let store = LicenseStore::open(engine(remote), backend).unwrap();
    for plugin in [REVERB, DELAY, CHORUS] {
        store.register(plugin, config.clone()).await;
    }
    store
}

/// License server that can be told to drop requests for chosen plugins.
#[derive(Default)]
pub struct ScriptedRemote {
    down: Mutex<BTreeSet<String>>,
    revoked: Mutex<BTreeSet<String>>,
    pub validate_calls: AtomicUsize,
}

impl ScriptedRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn take_down(&self, plugin_id: &str) {
        self.down.lock().unwrap().insert(plugin_id.to_string());
    }

    pub fn calls(&self) -> usize {
        self.validate_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteLicenseClient for ScriptedRemote {
    async fn validate(
        &self,
        plugin_id: &str,
        license_key: &str,
    ) -> Result<RemoteValidation, RemoteError> {
        self.validate_calls.fetch_add(1, Ordering::SeqCst);
        if self.down.lock().unwrap().contains(plugin_id) {
            return Err(RemoteError::Network("connection reset".into()));
        }
        if self.revoked.lock().unwrap().contains(license_key) {
            return Ok(RemoteValidation::revoked());
        }
        Ok(RemoteValidation::accepted())
    }

    async fn revoke(
        &self,
        _plugin_id: &str,
        license_key: &str,
        _reason: Option<&str>,
    ) -> Result<RevokeResponse, RemoteError> {
        self.revoked.lock().unwrap().insert(license_key.to_string());
        Ok(RevokeResponse {
            success: true,
            error: None,
        })
    }
}
