//! License key validation.
//!
//! # Validation Steps
//!
//! 1. Bypass when licensing is disabled or optional for the plugin
//! 2. Decode the key (terminal on failure)
//! 3. Verify the signature (terminal on failure, fails closed)
//! 4. Expiry, issue date and plugin binding checks
//! 5. Remote check, falling back to offline accounting
//! 6. Derive `valid`, granted features and trial days
//!
//! Steps 4 and 5 accumulate every error instead of stopping at the first.

use chrono::{DateTime, Utc};
use keyforge_crypto::SignatureProvider;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::accounting::{remaining_trial_days, short, OfflineTracker};
use crate::codec::{self, canonical_payload_bytes, key_fingerprint, DecodedKey};
use crate::config::LicenseConfig;
use crate::error::{LicenseError, LicenseResult, ValidationError};
use crate::ledger::OfflineLedger;
use crate::remote::{RemoteError, RemoteLicenseClient, RemoteValidation};
use crate::types::ValidationResult;

/// Runs the validation pipeline for license keys.
///
/// The engine holds no per-plugin state; the plugin's [`LicenseConfig`] is
/// passed on every call so one engine can serve many plugins.
#[derive(Clone)]
pub struct ValidationEngine {
    provider: Arc<dyn SignatureProvider>,
    remote: Option<Arc<dyn RemoteLicenseClient>>,
    offline: OfflineTracker,
}

impl ValidationEngine {
    pub fn new(provider: Arc<dyn SignatureProvider>, ledger: Arc<dyn OfflineLedger>) -> Self {
        Self {
            provider,
            remote: None,
            offline: OfflineTracker::new(ledger),
        }
    }

    /// Attaches a remote license server client.
    #[must_use]
    pub fn with_remote(mut self, remote: Arc<dyn RemoteLicenseClient>) -> Self {
        self.remote = Some(remote);
        self
    }

    #[must_use]
    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    /// Validates `key` for `plugin_id` now.
    ///
    /// # Errors
    ///
    /// Only configuration problems are returned as `Err`; every property of
    /// the license itself is reported inside the [`ValidationResult`].
    pub async fn validate(
        &self,
        key: &str,
        plugin_id: &str,
        config: &LicenseConfig,
    ) -> LicenseResult<ValidationResult> {
        self.validate_at(key, plugin_id, config, Utc::now()).await
    }

    /// Validates `key` for `plugin_id` as of `now`.
    pub async fn validate_at(
        &self,
        key: &str,
        plugin_id: &str,
        config: &LicenseConfig,
        now: DateTime<Utc>,
    ) -> LicenseResult<ValidationResult> {
        if !config.enforces_license() {
            debug!(plugin_id, "Licensing not enforced, granting all features");
            let mut result = ValidationResult::new(now);
            result.valid = true;
            result.features = config.all_features();
            return Ok(result);
        }

        let public_key = config.crypto.require_public_key()?;

        let decoded = match codec::decode(key) {
            Ok(decoded) => decoded,
            Err(LicenseError::MalformedKey(reason)) => {
                warn!(plugin_id, %reason, "License key malformed");
                return Ok(ValidationResult::rejected(
                    ValidationError::MalformedKey { reason },
                    now,
                ));
            }
            Err(e) => return Err(e),
        };

        if !self.signature_verifies(&decoded, public_key, config)? {
            warn!(plugin_id, license_id = %decoded.payload.id, "License signature verification failed");
            return Ok(ValidationResult::rejected(ValidationError::SignatureInvalid, now));
        }

        let payload = &decoded.payload;
        let fingerprint = key_fingerprint(key);
        let mut result = ValidationResult::new(now);

        if let Some(expires_at) = payload.expires_at {
            if expires_at < payload.issued_at {
                result.errors.push(ValidationError::InvalidDates);
            }
            if now >= expires_at {
                result.expired = true;
                result.errors.push(ValidationError::Expired { expired_at: expires_at });
            }
        }

        let tolerance = i64::try_from(config.clock_skew_tolerance_secs).unwrap_or(i64::MAX);
        if (payload.issued_at - now).num_seconds() > tolerance {
            result.errors.push(ValidationError::ClockSkew {
                issued_at: payload.issued_at,
            });
        }

        if payload.plugin_id != plugin_id {
            result.errors.push(ValidationError::PluginMismatch {
                expected: plugin_id.to_string(),
                found: payload.plugin_id.clone(),
            });
        }

        let mut revoked = self.offline.is_revoked(&fingerprint)?;

        if config.remote.enabled {
            match self.call_remote(key, plugin_id, config).await? {
                Ok(answer) => {
                    self.offline.record_success(&fingerprint, now)?;
                    result.offline_days_used = 0;
                    if answer.revoked {
                        if !revoked {
                            info!(plugin_id, license_id = %payload.id, "Server reports license revoked");
                            self.offline.mark_revoked(&fingerprint, now)?;
                        }
                        revoked = true;
                    } else if !answer.valid {
                        result.errors.push(ValidationError::RemoteRejected {
                            reason: answer
                                .error
                                .unwrap_or_else(|| "license rejected by server".to_string()),
                        });
                    }
                }
                Err(e) => {
                    warn!(plugin_id, key = %short(&fingerprint), error = %e, "Remote license check failed");
                    self.account_offline(&mut result, &fingerprint, config, e, now)?;
                }
            }
        }

        if revoked {
            result.revoked = true;
            result.errors.push(ValidationError::Revoked);
        }

        result.valid = result.errors.is_empty() && !result.expired && !result.revoked;
        if result.valid {
            result.features = payload.features.clone();
        }
        result.remaining_trial_days = config
            .tier(&payload.tier_id)
            .and_then(|tier| remaining_trial_days(tier, payload.issued_at, now));

        debug!(
            plugin_id,
            license_id = %payload.id,
            valid = result.valid,
            errors = result.errors.len(),
            offline_days = result.offline_days_used,
            "License validated"
        );
        Ok(result)
    }

    /// Asks the server to revoke `key` and records the revocation locally.
    ///
    /// Returns whether the server accepted the revocation.
    pub async fn revoke(
        &self,
        key: &str,
        plugin_id: &str,
        reason: Option<&str>,
        config: &LicenseConfig,
    ) -> LicenseResult<bool> {
        let remote = self.require_remote()?;
        let response = tokio::time::timeout(
            config.remote.timeout(),
            remote.revoke(plugin_id, key.trim(), reason),
        )
        .await
        .unwrap_or(Err(RemoteError::Timeout))
        .map_err(|e| LicenseError::Remote(e.to_string()))?;

        if response.success {
            let fingerprint = key_fingerprint(key);
            self.offline.mark_revoked(&fingerprint, Utc::now())?;
            info!(plugin_id, key = %short(&fingerprint), "License revoked");
        } else {
            warn!(plugin_id, error = ?response.error, "Server refused revocation");
        }
        Ok(response.success)
    }

    fn require_remote(&self) -> LicenseResult<&Arc<dyn RemoteLicenseClient>> {
        self.remote.as_ref().ok_or_else(|| {
            LicenseError::Configuration(
                "remote validation enabled but no remote client configured".to_string(),
            )
        })
    }

    /// Calls the server with the configured timeout. A timeout is reported
    /// the same way as any other transport failure.
    async fn call_remote(
        &self,
        key: &str,
        plugin_id: &str,
        config: &LicenseConfig,
    ) -> LicenseResult<Result<RemoteValidation, RemoteError>> {
        let remote = self.require_remote()?;
        Ok(
            tokio::time::timeout(config.remote.timeout(), remote.validate(plugin_id, key.trim()))
                .await
                .unwrap_or(Err(RemoteError::Timeout)),
        )
    }

    fn account_offline(
        &self,
        result: &mut ValidationResult,
        fingerprint: &str,
        config: &LicenseConfig,
        error: RemoteError,
        now: DateTime<Utc>,
    ) -> LicenseResult<()> {
        let reason = error.to_string();
        result.remote_error = Some(reason.clone());
        if !config.offline.allow_offline {
            result.errors.push(ValidationError::RemoteUnreachable { reason });
            return Ok(());
        }

        let days = self.offline.offline_days(fingerprint, now)?;
        let max = config.offline.max_offline_days;
        result.offline_days_used = days;

        if days > max {
            result.errors.push(ValidationError::OfflineLimitExceeded {
                days_used: days,
                max_days: max,
            });
        } else {
            let remaining = max - days;
            result.offline_days_remaining = Some(remaining);
            result.offline_warning = remaining <= config.offline.warn_within_days;
        }
        Ok(())
    }

    fn signature_verifies(
        &self,
        decoded: &DecodedKey,
        public_key: &str,
        config: &LicenseConfig,
    ) -> LicenseResult<bool> {
        if decoded.algorithm != config.crypto.algorithm {
            return Ok(false);
        }
        let signable = canonical_payload_bytes(&decoded.payload)?;
        self.provider
            .verify(
                &signable,
                &decoded.signature,
                public_key,
                config.crypto.algorithm,
                config.crypto.hash_algorithm,
            )
            .map_err(|e| LicenseError::Configuration(format!("public key unusable: {e}")))
    }
}
