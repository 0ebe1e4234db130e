//! License issuance.
//!
//! Builds a payload from a tier and a request, signs its canonical bytes
//! once through the configured [`SignatureProvider`] and encodes the key.

use chrono::{DateTime, Utc};
use keyforge_crypto::SignatureProvider;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::codec::{canonical_payload_bytes, encode};
use crate::config::{CryptoConfig, TierConfig};
use crate::error::{LicenseError, LicenseResult};
use crate::types::{License, LicensePayload, LicenseRequest};

/// Mints signed licenses.
pub struct LicenseIssuer {
    provider: Arc<dyn SignatureProvider>,
    crypto: CryptoConfig,
}

impl LicenseIssuer {
    /// Creates an issuer. The crypto config must carry a private key.
    pub fn new(provider: Arc<dyn SignatureProvider>, crypto: CryptoConfig) -> LicenseResult<Self> {
        crypto.require_private_key()?;
        Ok(Self { provider, crypto })
    }

    /// Issues a license for `request` against the tier table.
    pub fn generate(&self, request: &LicenseRequest, tiers: &TierConfig) -> LicenseResult<License> {
        self.generate_at(request, tiers, Utc::now())
    }

    /// Issues a license as of `now`.
    pub fn generate_at(
        &self,
        request: &LicenseRequest,
        tiers: &TierConfig,
        now: DateTime<Utc>,
    ) -> LicenseResult<License> {
        check_request(request)?;

        let tier = tiers
            .find(&request.tier_id)
            .ok_or_else(|| LicenseError::TierNotFound(request.tier_id.clone()))?;

        let payload = LicensePayload {
            id: Uuid::new_v4().to_string(),
            plugin_id: request.plugin_id.clone(),
            tier_id: tier.id.clone(),
            user_id: request.user_id.clone(),
            user_email: request.user_email.clone(),
            issued_at: now,
            expires_at: tier.expires_at(now),
            features: request
                .features
                .clone()
                .unwrap_or_else(|| tier.features.clone()),
            max_users: request.max_users.unwrap_or(tier.max_users),
            metadata: request.metadata.clone(),
        };

        let signable = canonical_payload_bytes(&payload)?;
        let private_key = self.crypto.require_private_key()?;
        let signature = self
            .provider
            .sign(
                &signable,
                private_key,
                self.crypto.algorithm,
                self.crypto.hash_algorithm,
            )
            .map_err(|e| LicenseError::SigningFailed(e.to_string()))?;
        debug!(license_id = %payload.id, bytes = signable.len(), "Signed license payload");

        let key = encode(&payload, &signature, self.crypto.algorithm)?;

        info!(
            license_id = %payload.id,
            plugin_id = %payload.plugin_id,
            tier_id = %payload.tier_id,
            perpetual = payload.is_perpetual(),
            "Issued license"
        );

        Ok(License {
            payload,
            signature,
            key,
            revoked: false,
        })
    }
}

fn check_request(request: &LicenseRequest) -> LicenseResult<()> {
    if request.plugin_id.trim().is_empty() {
        return Err(LicenseError::InvalidRequest("plugin_id is required".to_string()));
    }
    if request.tier_id.trim().is_empty() {
        return Err(LicenseError::InvalidRequest("tier_id is required".to_string()));
    }
    Ok(())
}
