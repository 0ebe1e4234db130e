mod common;

use chrono::{Duration, Utc};
use common::{
    features, issue, issue_for, license_config, open_store, remote_config, store, store_with,
    strict_remote_config, ScriptedRemote, CHORUS, DELAY, REVERB,
};
use keyforge_license::{CryptoConfig, ValidationErrorKind};
use keyforge_store::{
    JsonFileBackend, LicenseSource, LicenseStore, MemoryBackend, StoreBackend, StoreError,
};
use std::sync::Arc;

// ── install ──────────────────────────────────────────────────────

#[tokio::test]
async fn install_valid_license() {
    let (store, backend) = store().await;
    let key = issue(REVERB, "pro");

    let stored = store
        .install(REVERB, &key, LicenseSource::Purchase, Some("a@b.c".into()))
        .await
        .unwrap();

    assert_eq!(stored.plugin_id, REVERB);
    assert_eq!(stored.license_key, key);
    assert_eq!(stored.tier_id, "pro");
    assert_eq!(stored.source, LicenseSource::Purchase);
    assert_eq!(stored.user_email.as_deref(), Some("a@b.c"));
    assert!(stored.is_valid());
    assert_eq!(store.get(REVERB).await, Some(stored.clone()));
    assert!(store.last_sync().await.is_some());

    let saved = backend.saved().unwrap();
    assert_eq!(saved.licenses.get(REVERB), Some(&stored));
}

#[tokio::test]
async fn install_rejects_expired_license() {
    let (store, backend) = store().await;
    let result = store
        .install(REVERB, &issue(REVERB, "broken"), LicenseSource::Manual, None)
        .await;

    match result {
        Err(StoreError::LicenseRejected { plugin_id, errors }) => {
            assert_eq!(plugin_id, REVERB);
            assert!(errors.iter().any(|e| e.kind() == ValidationErrorKind::Expired));
        }
        other => panic!("expected rejection, got {other:?}"),
    }
    assert!(store.get(REVERB).await.is_none());
    assert_eq!(backend.save_count(), 0);
}

#[tokio::test]
async fn install_rejects_key_for_other_plugin() {
    let (store, _) = store().await;
    let result = store
        .install(REVERB, &issue(DELAY, "basic"), LicenseSource::Manual, None)
        .await;
    assert!(matches!(result, Err(StoreError::LicenseRejected { .. })));
    assert!(store.get(REVERB).await.is_none());
}

#[tokio::test]
async fn install_rejects_garbage() {
    let (store, _) = store().await;
    let result = store
        .install(REVERB, "KFL1-garbage", LicenseSource::Manual, None)
        .await;
    assert!(matches!(result, Err(StoreError::LicenseRejected { .. })));
}

#[tokio::test]
async fn install_requires_registration() {
    let (store, _) = store().await;
    let result = store
        .install("unknown-plugin", &issue("unknown-plugin", "basic"), LicenseSource::Manual, None)
        .await;
    assert!(matches!(result, Err(StoreError::NotRegistered(_))));
}

#[tokio::test]
async fn reinstall_replaces_entry() {
    let (store, _) = store().await;
    let first = issue(REVERB, "basic");
    let second = issue(REVERB, "pro");

    store.install(REVERB, &first, LicenseSource::Manual, None).await.unwrap();
    store.install(REVERB, &second, LicenseSource::Upgrade, None).await.unwrap();

    let list = store.list().await;
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].license_key, second);
    assert_eq!(list[0].source, LicenseSource::Upgrade);
}

#[tokio::test]
async fn concurrent_installs_for_different_plugins_are_all_persisted() {
    let (store, backend) = store().await;
    let (a, b, c) = (issue(REVERB, "basic"), issue(DELAY, "basic"), issue(CHORUS, "pro"));

    let (ra, rb, rc) = tokio::join!(
        store.install(REVERB, &a, LicenseSource::Manual, None),
        store.install(DELAY, &b, LicenseSource::Manual, None),
        store.install(CHORUS, &c, LicenseSource::Manual, None),
    );
    ra.unwrap();
    rb.unwrap();
    rc.unwrap();

    let saved = backend.saved().unwrap();
    assert_eq!(saved.licenses.len(), 3);
    assert_eq!(backend.save_count(), 3);
}

// ── remove ───────────────────────────────────────────────────────

#[tokio::test]
async fn remove_is_idempotent() {
    let (store, backend) = store().await;
    store
        .install(REVERB, &issue(REVERB, "basic"), LicenseSource::Manual, None)
        .await
        .unwrap();

    assert!(store.remove(REVERB).await.unwrap());
    assert!(!store.remove(REVERB).await.unwrap());
    assert!(store.get(REVERB).await.is_none());
    assert!(backend.saved().unwrap().licenses.is_empty());
}

// ── refresh ──────────────────────────────────────────────────────

#[tokio::test]
async fn refresh_missing_plugin_is_none() {
    let (store, _) = store().await;
    assert!(store.refresh(REVERB).await.unwrap().is_none());
}

#[tokio::test]
async fn refresh_updates_cached_validation() {
    let (store, _) = store().await;
    let now = Utc::now();
    store
        .install_at(REVERB, &issue_for(REVERB, "trial", now), LicenseSource::Trial, None, now)
        .await
        .unwrap();
    assert!(store.feature_enabled(REVERB, "convolution").await);

    let later = now + Duration::days(20);
    let refreshed = store.refresh_at(REVERB, later).await.unwrap().unwrap();
    assert!(!refreshed.is_valid());
    assert!(refreshed.validation.expired);
    assert_eq!(refreshed.last_validated, later);
    assert_eq!(refreshed.installed_at, now);

    assert!(!store.feature_enabled(REVERB, "convolution").await);
    assert!(store.feature_enabled(REVERB, "presets").await);
}

#[tokio::test]
async fn refresh_all_isolates_failures() {
    let remote = ScriptedRemote::new();
    let (store, backend) = store_with(strict_remote_config(), Some(remote.clone())).await;
    let t0 = Utc::now();
    for plugin in [REVERB, DELAY, CHORUS] {
        store
            .install_at(plugin, &issue_for(plugin, "basic", t0), LicenseSource::Manual, None, t0)
            .await
            .unwrap();
    }
    let saves_before = backend.save_count();

    remote.take_down(DELAY);
    let t1 = t0 + Duration::hours(1);
    let report = store.refresh_all_at(t1).await.unwrap();

    assert_eq!(report.updated, vec![CHORUS.to_string(), REVERB.to_string()]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].plugin_id, DELAY);
    assert_eq!(backend.save_count(), saves_before + 1);

    for plugin in [REVERB, CHORUS] {
        let entry = store.get(plugin).await.unwrap();
        assert_eq!(entry.last_validated, t1);
        assert!(entry.is_valid());
    }
    let delay = store.get(DELAY).await.unwrap();
    assert!(!delay.is_valid());
    assert!(delay
        .validation
        .has_error(ValidationErrorKind::RemoteUnreachable));
}

#[tokio::test]
async fn refresh_all_reports_remote_failure_within_offline_grace() {
    let remote = ScriptedRemote::new();
    let (store, backend) = store_with(remote_config(), Some(remote.clone())).await;
    let t0 = Utc::now();
    for plugin in [REVERB, DELAY, CHORUS] {
        store
            .install_at(plugin, &issue_for(plugin, "basic", t0), LicenseSource::Manual, None, t0)
            .await
            .unwrap();
    }
    let saves_before = backend.save_count();

    remote.take_down(DELAY);
    let t1 = t0 + Duration::hours(1);
    let report = store.refresh_all_at(t1).await.unwrap();

    assert_eq!(report.updated, vec![CHORUS.to_string(), REVERB.to_string()]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].plugin_id, DELAY);
    assert!(report.failed[0].reason.contains("unreachable"));
    assert_eq!(backend.save_count(), saves_before + 1);

    // Offline grace keeps the license usable; the cached result is still updated.
    let delay = store.get(DELAY).await.unwrap();
    assert_eq!(delay.last_validated, t1);
    assert!(delay.is_valid());
    assert!(delay.validation.remote_failed());
    assert_eq!(delay.validation.offline_days_remaining, Some(7));

    let reverb = store.get(REVERB).await.unwrap();
    assert!(!reverb.validation.remote_failed());
}

#[tokio::test]
async fn refresh_all_leaves_erroring_entry_untouched() {
    let (store, _) = store().await;
    let t0 = Utc::now();
    for plugin in [REVERB, DELAY] {
        store
            .install_at(plugin, &issue_for(plugin, "basic", t0), LicenseSource::Manual, None, t0)
            .await
            .unwrap();
    }

    let mut broken = license_config();
    broken.crypto = CryptoConfig::new("");
    store.register(DELAY, broken).await;

    let t1 = t0 + Duration::days(1);
    let report = store.refresh_all_at(t1).await.unwrap();
    assert_eq!(report.updated, vec![REVERB.to_string()]);
    assert_eq!(report.failed.len(), 1);
    assert!(!report.is_clean());

    let delay = store.get(DELAY).await.unwrap();
    assert_eq!(delay.last_validated, t0);
    assert!(delay.is_valid());
}

#[tokio::test]
async fn refresh_all_on_empty_store() {
    let (store, backend) = store().await;
    let report = store.refresh_all().await.unwrap();
    assert!(report.updated.is_empty());
    assert!(report.is_clean());
    assert_eq!(backend.save_count(), 0);
}

// ── features and stacking ────────────────────────────────────────

#[tokio::test]
async fn features_follow_license() {
    let (store, _) = store().await;
    assert!(store.feature_enabled(REVERB, "presets").await);
    assert!(!store.feature_enabled(REVERB, "convolution").await);

    store
        .install(REVERB, &issue(REVERB, "pro"), LicenseSource::Purchase, None)
        .await
        .unwrap();
    assert!(store.feature_enabled(REVERB, "convolution").await);
    assert!(!store.feature_enabled(DELAY, "convolution").await);
    assert!(!store.feature_enabled("unregistered", "presets").await);
}

#[tokio::test]
async fn stacked_licenses_union_features() {
    let (store, _) = store().await;
    store
        .install(REVERB, &issue(REVERB, "addon-a"), LicenseSource::Purchase, None)
        .await
        .unwrap();
    let updated = store
        .stack(REVERB, &issue(REVERB, "addon-b"), LicenseSource::Purchase)
        .await
        .unwrap();

    assert_eq!(updated.stacked.len(), 1);
    assert_eq!(
        store.effective_features(REVERB).await,
        features(["a", "b", "c", "presets"])
    );
    assert!(store.feature_enabled(REVERB, "c").await);
}

#[tokio::test]
async fn expired_addon_does_not_remove_primary_features() {
    let (store, _) = store().await;
    let now = Utc::now();
    store
        .install_at(REVERB, &issue_for(REVERB, "addon-a", now), LicenseSource::Purchase, None, now)
        .await
        .unwrap();
    store
        .stack_at(REVERB, &issue_for(REVERB, "pro", now), LicenseSource::Purchase, now)
        .await
        .unwrap();

    store.refresh_at(REVERB, now + Duration::days(400)).await.unwrap();
    let enabled = store.effective_features(REVERB).await;
    assert_eq!(enabled, features(["a", "b", "presets"]));
}

#[tokio::test]
async fn stacking_requires_stackable_tiers() {
    let (store, _) = store().await;
    store
        .install(REVERB, &issue(REVERB, "basic"), LicenseSource::Manual, None)
        .await
        .unwrap();
    let result = store
        .stack(REVERB, &issue(REVERB, "addon-a"), LicenseSource::Manual)
        .await;
    assert!(matches!(result, Err(StoreError::NotStackable { .. })));
    assert!(store.get(REVERB).await.unwrap().stacked.is_empty());
}

#[tokio::test]
async fn stacking_needs_installed_license() {
    let (store, _) = store().await;
    let result = store
        .stack(REVERB, &issue(REVERB, "addon-a"), LicenseSource::Manual)
        .await;
    assert!(matches!(result, Err(StoreError::NotInstalled(_))));
}

#[tokio::test]
async fn reinstall_drops_stacked_addons() {
    let (store, _) = store().await;
    store
        .install(REVERB, &issue(REVERB, "addon-a"), LicenseSource::Manual, None)
        .await
        .unwrap();
    store
        .stack(REVERB, &issue(REVERB, "addon-b"), LicenseSource::Manual)
        .await
        .unwrap();
    store
        .install(REVERB, &issue(REVERB, "basic"), LicenseSource::Manual, None)
        .await
        .unwrap();
    assert!(store.get(REVERB).await.unwrap().stacked.is_empty());
}

// ── revocation ───────────────────────────────────────────────────

#[tokio::test]
async fn revoke_disables_license() {
    let remote = ScriptedRemote::new();
    let (store, _) = store_with(strict_remote_config(), Some(remote)).await;
    store
        .install(REVERB, &issue(REVERB, "pro"), LicenseSource::Purchase, None)
        .await
        .unwrap();

    assert!(store.revoke(REVERB, Some("refund")).await.unwrap());
    let entry = store.get(REVERB).await.unwrap();
    assert!(entry.validation.revoked);
    assert!(!entry.is_valid());
    assert!(!store.feature_enabled(REVERB, "convolution").await);
}

#[tokio::test]
async fn revoke_without_license() {
    let remote = ScriptedRemote::new();
    let (store, _) = store_with(strict_remote_config(), Some(remote)).await;
    assert!(matches!(
        store.revoke(REVERB, None).await,
        Err(StoreError::NotInstalled(_))
    ));
}

// ── persistence ──────────────────────────────────────────────────

#[tokio::test]
async fn file_backend_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("licenses.json");
    let key = issue(REVERB, "pro");

    {
        let backend: Arc<dyn StoreBackend> = Arc::new(JsonFileBackend::new(&path));
        let store = open_store(backend, license_config(), None).await;
        store
            .install(REVERB, &key, LicenseSource::Purchase, None)
            .await
            .unwrap();
        store.shutdown().await.unwrap();
    }

    let backend: Arc<dyn StoreBackend> = Arc::new(JsonFileBackend::new(&path));
    let store = open_store(backend, license_config(), None).await;
    let entry = store.get(REVERB).await.unwrap();
    assert_eq!(entry.license_key, key);
    assert!(store.feature_enabled(REVERB, "convolution").await);
}

#[tokio::test]
async fn shutdown_flushes() {
    let (store, backend) = store().await;
    store.shutdown().await.unwrap();
    assert_eq!(backend.save_count(), 1);
}

struct FailingBackend;

impl StoreBackend for FailingBackend {
    fn load(&self) -> keyforge_store::StoreResult<Option<keyforge_store::StoreDocument>> {
        Ok(None)
    }

    fn save(&self, _document: &keyforge_store::StoreDocument) -> keyforge_store::StoreResult<()> {
        Err(StoreError::Io(std::io::Error::other("disk full")))
    }
}

#[tokio::test]
async fn failed_flush_leaves_store_unchanged() {
    let store = open_store(Arc::new(FailingBackend), license_config(), None).await;
    let result = store
        .install(REVERB, &issue(REVERB, "basic"), LicenseSource::Manual, None)
        .await;
    assert!(matches!(result, Err(StoreError::Io(_))));
    assert!(store.get(REVERB).await.is_none());
    assert!(store.last_sync().await.is_none());
}

#[tokio::test]
async fn open_loads_existing_document() {
    let (source, backend) = store().await;
    source
        .install(DELAY, &issue(DELAY, "basic"), LicenseSource::Manual, None)
        .await
        .unwrap();

    let copy = Arc::new(MemoryBackend::with_document(backend.saved().unwrap()));
    let reopened = LicenseStore::open(common::engine(None), copy).unwrap();
    assert_eq!(reopened.list().await.len(), 1);
}
