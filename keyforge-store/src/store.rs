//! The license store.
//!
//! Holds at most one [`StoredLicense`] per plugin id. Every mutation is
//! applied to a copy of the document, flushed through the backend, and only
//! then made visible, all under one lock, so concurrent installs for
//! different plugins cannot lose each other's updates.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use keyforge_license::{
    can_stack, decode, effective_features, feature_enabled, KeyforgeConfig, LicenseConfig,
    LicenseResult, ValidationEngine, ValidationResult,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::backend::StoreBackend;
use crate::error::{StoreError, StoreResult};
use crate::model::{
    DroppedAddon, ExportBundle, ImportBundle, ImportReport, ImportSkip, LicenseSource, RefreshFailure,
    RefreshReport, SkipReason, StackedLicense, StoreDocument, StoredLicense, STORE_VERSION,
};

/// Persistent map from plugin id to its installed license.
pub struct LicenseStore {
    engine: ValidationEngine,
    backend: Arc<dyn StoreBackend>,
    configs: RwLock<BTreeMap<String, Arc<LicenseConfig>>>,
    state: Mutex<StoreDocument>,
}

impl LicenseStore {
    /// Opens the store, loading whatever the backend has persisted.
    pub fn open(engine: ValidationEngine, backend: Arc<dyn StoreBackend>) -> StoreResult<Self> {
        let document = backend.load()?.unwrap_or_default();
        info!(licenses = document.licenses.len(), "License store opened");
        Ok(Self {
            engine,
            backend,
            configs: RwLock::new(BTreeMap::new()),
            state: Mutex::new(document),
        })
    }

    /// Registers (or replaces) the license configuration for a plugin.
    pub async fn register(&self, plugin_id: impl Into<String>, config: LicenseConfig) {
        let plugin_id = plugin_id.into();
        debug!(plugin_id = %plugin_id, "Registered plugin license config");
        self.configs.write().await.insert(plugin_id, Arc::new(config));
    }

    /// Registers every plugin in a configuration file.
    pub async fn register_all(&self, config: &KeyforgeConfig) {
        for (plugin_id, plugin) in &config.plugins {
            self.register(plugin_id.clone(), plugin.clone()).await;
        }
    }

    pub async fn is_registered(&self, plugin_id: &str) -> bool {
        self.configs.read().await.contains_key(plugin_id)
    }

    async fn config(&self, plugin_id: &str) -> StoreResult<Arc<LicenseConfig>> {
        self.configs
            .read()
            .await
            .get(plugin_id)
            .cloned()
            .ok_or_else(|| StoreError::NotRegistered(plugin_id.to_string()))
    }

    // ── Install / remove ─────────────────────────────────────────

    /// Validates `key` and installs it as the plugin's license, replacing any
    /// previous entry. Invalid keys are rejected and never stored.
    pub async fn install(
        &self,
        plugin_id: &str,
        key: &str,
        source: LicenseSource,
        user_email: Option<String>,
    ) -> StoreResult<StoredLicense> {
        self.install_at(plugin_id, key, source, user_email, Utc::now())
            .await
    }

    /// [`install`](Self::install) as of `now`.
    pub async fn install_at(
        &self,
        plugin_id: &str,
        key: &str,
        source: LicenseSource,
        user_email: Option<String>,
        now: DateTime<Utc>,
    ) -> StoreResult<StoredLicense> {
        let config = self.config(plugin_id).await?;
        let key = key.trim();
        let validation = self.require_valid(plugin_id, key, &config, now).await?;
        let (license_id, tier_id) = identify(key);

        let stored = StoredLicense {
            plugin_id: plugin_id.to_string(),
            license_key: key.to_string(),
            license_id,
            tier_id,
            installed_at: now,
            last_validated: now,
            validation,
            source,
            user_email,
            stacked: Vec::new(),
        };

        let replaced = self
            .commit(now, |doc| {
                Ok(doc
                    .licenses
                    .insert(plugin_id.to_string(), stored.clone())
                    .is_some())
            })
            .await?;

        info!(
            plugin_id,
            license_id = %stored.license_id,
            tier_id = %stored.tier_id,
            %source,
            replaced,
            "License installed"
        );
        Ok(stored)
    }

    /// Removes the plugin's license. Returns whether anything was removed.
    pub async fn remove(&self, plugin_id: &str) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        if !state.licenses.contains_key(plugin_id) {
            return Ok(false);
        }
        let mut next = state.clone();
        next.licenses.remove(plugin_id);
        next.last_sync = Some(Utc::now());
        self.backend.save(&next)?;
        *state = next;
        info!(plugin_id, "License removed");
        Ok(true)
    }

    // ── Stacking ─────────────────────────────────────────────────

    /// Validates `key` and stacks it onto the plugin's installed license.
    ///
    /// Both the installed tier and the new key's tier must be stackable.
    pub async fn stack(
        &self,
        plugin_id: &str,
        key: &str,
        source: LicenseSource,
    ) -> StoreResult<StoredLicense> {
        self.stack_at(plugin_id, key, source, Utc::now()).await
    }

    /// [`stack`](Self::stack) as of `now`.
    pub async fn stack_at(
        &self,
        plugin_id: &str,
        key: &str,
        source: LicenseSource,
        now: DateTime<Utc>,
    ) -> StoreResult<StoredLicense> {
        let config = self.config(plugin_id).await?;
        let key = key.trim();
        let primary = self
            .get(plugin_id)
            .await
            .ok_or_else(|| StoreError::NotInstalled(plugin_id.to_string()))?;
        if primary.license_key == key {
            return Ok(primary);
        }

        let validation = self.require_valid(plugin_id, key, &config, now).await?;
        let (license_id, tier_id) = identify(key);
        if !can_stack(&config, &primary.tier_id, &tier_id) {
            return Err(StoreError::NotStackable {
                existing: primary.tier_id,
                incoming: tier_id,
            });
        }

        let addon = StackedLicense {
            license_key: key.to_string(),
            license_id,
            tier_id,
            installed_at: now,
            last_validated: now,
            validation,
            source,
        };

        let updated = self
            .commit(now, |doc| {
                let entry = doc
                    .licenses
                    .get_mut(plugin_id)
                    .filter(|e| e.license_key == primary.license_key)
                    .ok_or_else(|| StoreError::NotInstalled(plugin_id.to_string()))?;
                entry.stacked.retain(|s| s.license_key != addon.license_key);
                entry.stacked.push(addon.clone());
                Ok(entry.clone())
            })
            .await?;

        info!(
            plugin_id,
            license_id = %addon.license_id,
            tier_id = %addon.tier_id,
            stacked = updated.stacked.len(),
            "License stacked"
        );
        Ok(updated)
    }

    // ── Refresh ──────────────────────────────────────────────────

    /// Re-validates the plugin's stored license(s) and updates the cached
    /// results. Returns `None` if the plugin has no license.
    pub async fn refresh(&self, plugin_id: &str) -> StoreResult<Option<StoredLicense>> {
        self.refresh_at(plugin_id, Utc::now()).await
    }

    /// [`refresh`](Self::refresh) as of `now`.
    pub async fn refresh_at(
        &self,
        plugin_id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<StoredLicense>> {
        let Some(entry) = self.get(plugin_id).await else {
            return Ok(None);
        };
        let config = self.config(plugin_id).await?;
        let refreshed = self.revalidate(entry, &config, now).await?;

        let current = self
            .commit(now, |doc| Ok(apply_refresh(doc, refreshed)))
            .await?;
        debug!(plugin_id, valid = current.as_ref().is_some_and(StoredLicense::is_valid), "License refreshed");
        Ok(current)
    }

    /// Refreshes every stored license. Validations run concurrently; one
    /// plugin's failure never blocks the others. Results are flushed once.
    pub async fn refresh_all(&self) -> StoreResult<RefreshReport> {
        self.refresh_all_at(Utc::now()).await
    }

    /// [`refresh_all`](Self::refresh_all) as of `now`.
    pub async fn refresh_all_at(&self, now: DateTime<Utc>) -> StoreResult<RefreshReport> {
        let entries = self.list().await;
        if entries.is_empty() {
            return Ok(RefreshReport::default());
        }

        let outcomes = join_all(entries.into_iter().map(|entry| async move {
            let plugin_id = entry.plugin_id.clone();
            let outcome = match self.config(&plugin_id).await {
                Ok(config) => self
                    .revalidate(entry, &config, now)
                    .await
                    .map_err(StoreError::from),
                Err(e) => Err(e),
            };
            (plugin_id, outcome)
        }))
        .await;

        let mut report = RefreshReport::default();
        let mut refreshed = Vec::new();
        for (plugin_id, outcome) in outcomes {
            match outcome {
                Ok(entry) => {
                    match remote_failure(&entry) {
                        Some(reason) => report.failed.push(RefreshFailure {
                            plugin_id: plugin_id.clone(),
                            reason,
                        }),
                        None => report.updated.push(plugin_id.clone()),
                    }
                    refreshed.push(entry);
                }
                Err(e) => {
                    warn!(plugin_id = %plugin_id, error = %e, "License refresh failed");
                    report.failed.push(RefreshFailure {
                        plugin_id,
                        reason: e.to_string(),
                    });
                }
            }
        }

        if !refreshed.is_empty() {
            self.commit(now, |doc| {
                for entry in refreshed {
                    apply_refresh(doc, entry);
                }
                Ok(())
            })
            .await?;
        }

        info!(
            updated = report.updated.len(),
            failed = report.failed.len(),
            "Refreshed stored licenses"
        );
        Ok(report)
    }

    // ── Revocation ───────────────────────────────────────────────

    /// Asks the license server to revoke the plugin's primary license, then
    /// refreshes the entry so the revocation is reflected locally.
    pub async fn revoke(&self, plugin_id: &str, reason: Option<&str>) -> StoreResult<bool> {
        let config = self.config(plugin_id).await?;
        let entry = self
            .get(plugin_id)
            .await
            .ok_or_else(|| StoreError::NotInstalled(plugin_id.to_string()))?;

        let accepted = self
            .engine
            .revoke(&entry.license_key, plugin_id, reason, &config)
            .await?;
        if accepted {
            self.refresh(plugin_id).await?;
        }
        Ok(accepted)
    }

    // ── Queries ──────────────────────────────────────────────────

    /// Returns true if the feature is enabled for the plugin.
    ///
    /// Required features of a registered plugin are always enabled. Other
    /// features need a currently valid primary or stacked license granting them.
    pub async fn feature_enabled(&self, plugin_id: &str, feature_id: &str) -> bool {
        let config = self.configs.read().await.get(plugin_id).cloned();
        let state = self.state.lock().await;
        let entry = state.licenses.get(plugin_id);
        let mut results = entry.into_iter().flat_map(StoredLicense::validations);
        match config {
            Some(config) => feature_enabled(&config, results, feature_id),
            None => results.any(|r| r.grants(feature_id)),
        }
    }

    /// Every feature currently enabled for the plugin.
    pub async fn effective_features(&self, plugin_id: &str) -> BTreeSet<String> {
        let config = self.configs.read().await.get(plugin_id).cloned();
        let state = self.state.lock().await;
        let entry = state.licenses.get(plugin_id);
        let results = entry.into_iter().flat_map(StoredLicense::validations);
        match config {
            Some(config) => effective_features(&config, results),
            None => results
                .filter(|r| r.valid)
                .flat_map(|r| r.features.iter().cloned())
                .collect(),
        }
    }

    pub async fn get(&self, plugin_id: &str) -> Option<StoredLicense> {
        self.state.lock().await.licenses.get(plugin_id).cloned()
    }

    /// All stored licenses, ordered by plugin id.
    pub async fn list(&self) -> Vec<StoredLicense> {
        self.state.lock().await.licenses.values().cloned().collect()
    }

    /// When the store last changed.
    pub async fn last_sync(&self) -> Option<DateTime<Utc>> {
        self.state.lock().await.last_sync
    }

    // ── Export / import ──────────────────────────────────────────

    /// Serializes every stored license to JSON.
    pub async fn export(&self) -> StoreResult<String> {
        let state = self.state.lock().await;
        let bundle = ExportBundle {
            version: STORE_VERSION,
            exported_at: Utc::now(),
            licenses: state.licenses.values().collect(),
        };
        Ok(serde_json::to_string_pretty(&bundle)?)
    }

    /// Installs licenses from an export. Entries are re-validated; existing
    /// plugins are never overwritten. Every skipped entry is reported.
    pub async fn import(&self, json: &str) -> StoreResult<ImportReport> {
        self.import_at(json, Utc::now()).await
    }

    /// [`import`](Self::import) as of `now`.
    pub async fn import_at(&self, json: &str, now: DateTime<Utc>) -> StoreResult<ImportReport> {
        let bundle: ImportBundle = serde_json::from_str(json)?;
        let installed: BTreeSet<String> = self.state.lock().await.licenses.keys().cloned().collect();

        let mut report = ImportReport::default();
        let mut accepted: Vec<(usize, StoredLicense)> = Vec::new();

        for (index, entry) in bundle.licenses.into_iter().enumerate() {
            let plugin_id = entry
                .plugin_id
                .as_deref()
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string);
            let key = entry
                .license_key
                .as_deref()
                .map(str::trim)
                .filter(|k| !k.is_empty());

            let skip = |reason| ImportSkip {
                index,
                plugin_id: plugin_id.clone(),
                reason,
            };

            let Some(id) = plugin_id.clone() else {
                report.skipped.push(skip(SkipReason::MissingPluginId));
                continue;
            };
            let Some(key) = key else {
                report.skipped.push(skip(SkipReason::MissingKey));
                continue;
            };
            if installed.contains(&id) || accepted.iter().any(|(_, a)| a.plugin_id == id) {
                report.skipped.push(skip(SkipReason::AlreadyInstalled));
                continue;
            }
            let Ok(config) = self.config(&id).await else {
                report.skipped.push(skip(SkipReason::NotRegistered));
                continue;
            };

            let validation = match self.engine.validate_at(key, &id, &config, now).await {
                Ok(v) if v.valid => v,
                Ok(v) => {
                    report.skipped.push(skip(SkipReason::Rejected {
                        detail: describe(&v),
                    }));
                    continue;
                }
                Err(e) => {
                    report.skipped.push(skip(SkipReason::Rejected {
                        detail: e.to_string(),
                    }));
                    continue;
                }
            };

            let (license_id, tier_id) = identify(key);
            let mut stacked: Vec<StackedLicense> = Vec::new();
            for (addon_index, addon) in entry.stacked.into_iter().enumerate() {
                let dropped = |reason| DroppedAddon {
                    index,
                    addon_index,
                    plugin_id: id.clone(),
                    reason,
                };
                let Some(addon_key) = addon
                    .license_key
                    .as_deref()
                    .map(str::trim)
                    .filter(|k| !k.is_empty())
                else {
                    report.dropped_addons.push(dropped(SkipReason::MissingKey));
                    continue;
                };
                if addon_key == key || stacked.iter().any(|s| s.license_key == addon_key) {
                    continue;
                }
                let (addon_id, addon_tier) = identify(addon_key);
                if !can_stack(&config, &tier_id, &addon_tier) {
                    warn!(plugin_id = %id, tier_id = %addon_tier, "Dropping non-stackable add-on from import");
                    report.dropped_addons.push(dropped(SkipReason::NotStackable {
                        existing: tier_id.clone(),
                        incoming: addon_tier,
                    }));
                    continue;
                }
                match self.engine.validate_at(addon_key, &id, &config, now).await {
                    Ok(v) if v.valid => stacked.push(StackedLicense {
                        license_key: addon_key.to_string(),
                        license_id: addon_id,
                        tier_id: addon_tier,
                        installed_at: now,
                        last_validated: now,
                        validation: v,
                        source: addon.source,
                    }),
                    outcome => {
                        let detail = match outcome {
                            Ok(v) => describe(&v),
                            Err(e) => e.to_string(),
                        };
                        warn!(plugin_id = %id, %detail, "Dropping invalid add-on from import");
                        report.dropped_addons.push(dropped(SkipReason::Rejected { detail }));
                    }
                }
            }

            accepted.push((index, StoredLicense {
                plugin_id: id,
                license_key: key.to_string(),
                license_id,
                tier_id,
                installed_at: entry.installed_at.unwrap_or(now),
                last_validated: now,
                validation,
                source: entry.source,
                user_email: entry.user_email,
                stacked,
            }));
        }

        if !accepted.is_empty() {
            let raced = self
                .commit(now, |doc| {
                    let mut raced = Vec::new();
                    for (index, stored) in accepted {
                        if doc.licenses.contains_key(&stored.plugin_id) {
                            raced.push((index, stored.plugin_id));
                        } else {
                            report.imported.push(stored.plugin_id.clone());
                            doc.licenses.insert(stored.plugin_id.clone(), stored);
                        }
                    }
                    Ok(raced)
                })
                .await?;
            for (index, plugin_id) in raced {
                report.skipped.push(ImportSkip {
                    index,
                    plugin_id: Some(plugin_id),
                    reason: SkipReason::AlreadyInstalled,
                });
            }
        }

        info!(
            imported = report.imported.len(),
            skipped = report.skipped.len(),
            "Imported licenses"
        );
        Ok(report)
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Writes the current document through the backend.
    pub async fn flush(&self) -> StoreResult<()> {
        let state = self.state.lock().await;
        self.backend.save(&state)
    }

    /// Final flush before the store is dropped.
    pub async fn shutdown(self) -> StoreResult<()> {
        self.flush().await?;
        info!("License store shut down");
        Ok(())
    }

    // ── Internals ────────────────────────────────────────────────

    async fn require_valid(
        &self,
        plugin_id: &str,
        key: &str,
        config: &LicenseConfig,
        now: DateTime<Utc>,
    ) -> StoreResult<ValidationResult> {
        let result = self.engine.validate_at(key, plugin_id, config, now).await?;
        if !result.valid {
            warn!(plugin_id, errors = %describe(&result), "License rejected");
            return Err(StoreError::LicenseRejected {
                plugin_id: plugin_id.to_string(),
                errors: result.errors,
            });
        }
        Ok(result)
    }

    /// Re-validates an entry's primary and stacked keys.
    async fn revalidate(
        &self,
        mut entry: StoredLicense,
        config: &LicenseConfig,
        now: DateTime<Utc>,
    ) -> LicenseResult<StoredLicense> {
        entry.validation = self
            .engine
            .validate_at(&entry.license_key, &entry.plugin_id, config, now)
            .await?;
        entry.last_validated = now;
        for addon in &mut entry.stacked {
            addon.validation = self
                .engine
                .validate_at(&addon.license_key, &entry.plugin_id, config, now)
                .await?;
            addon.last_validated = now;
        }
        Ok(entry)
    }

    /// Applies `mutate` to a copy of the document, persists it, then swaps
    /// it in. Nothing changes if `mutate` or the save fails.
    async fn commit<T, F>(&self, now: DateTime<Utc>, mutate: F) -> StoreResult<T>
    where
        F: FnOnce(&mut StoreDocument) -> StoreResult<T>,
    {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        let out = mutate(&mut next)?;
        next.last_sync = Some(now);
        self.backend.save(&next)?;
        *state = next;
        Ok(out)
    }
}

/// Copies refreshed validation results into the document, unless the entry
/// was replaced or removed while validation ran.
fn apply_refresh(doc: &mut StoreDocument, refreshed: StoredLicense) -> Option<StoredLicense> {
    let current = doc.licenses.get_mut(&refreshed.plugin_id)?;
    if current.license_key != refreshed.license_key {
        return Some(current.clone());
    }
    current.validation = refreshed.validation;
    current.last_validated = refreshed.last_validated;
    for addon in &mut current.stacked {
        if let Some(fresh) = refreshed
            .stacked
            .iter()
            .find(|s| s.license_key == addon.license_key)
        {
            addon.validation = fresh.validation.clone();
            addon.last_validated = fresh.last_validated;
        }
    }
    Some(current.clone())
}

/// License id and tier id from a key, empty if the key does not decode.
fn identify(key: &str) -> (String, String) {
    decode(key)
        .map(|d| (d.payload.id, d.payload.tier_id))
        .unwrap_or_default()
}

/// Why the license server could not be consulted for any of the entry's
/// keys, whether or not offline grace kept them valid.
fn remote_failure(entry: &StoredLicense) -> Option<String> {
    entry
        .validations()
        .find_map(|v| v.remote_error.as_deref())
        .map(|reason| format!("license server unreachable: {reason}"))
}

fn describe(result: &ValidationResult) -> String {
    if result.errors.is_empty() {
        return "not valid".to_string();
    }
    result
        .errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
