//! License issuance and validation for host-application plugins.
//!
//! This crate handles:
//! - Issuing signed licenses against a per-plugin tier table
//! - Encoding/decoding license keys
//! - Validating keys: signature, expiry, plugin binding, revocation
//! - Offline grace accounting and trial countdowns
//! - Feature gating across stacked licenses
//!
//! # License Key Format
//!
//! ```text
//! KFL1-<base64(json {payload, signature, version, algorithm})>
//! ```
//!
//! The signature covers the canonical (sorted-key) JSON of the payload and is
//! produced by a [`keyforge_crypto::SignatureProvider`].
//!
//! # Design Principles
//!
//! - **Fail closed**: a key whose signature does not verify is never valid
//! - **Every reason at once**: license problems are collected into a
//!   [`ValidationResult`], only configuration mistakes are `Err`
//! - **Bounded offline use**: without a server answer a key stays valid for
//!   `max_offline_days` after its last successful check
//! - **Monotonic revocation**: a key once seen revoked stays revoked

mod accounting;
mod codec;
mod config;
mod error;
mod gating;
#[cfg(feature = "online")]
mod http;
mod issuer;
mod ledger;
mod remote;
mod types;
mod validator;

pub use accounting::{remaining_trial_days, whole_days_between, OfflineTracker, SECS_PER_DAY};
pub use codec::{
    canonical_payload_bytes, decode, encode, key_fingerprint, DecodedKey, KEY_FORMAT_VERSION,
    KEY_PREFIX,
};
pub use config::{
    CryptoConfig, KeyforgeConfig, LicenseConfig, OfflinePolicy, RemotePolicy, TierConfig,
};
pub use error::{LicenseError, LicenseResult, ValidationError, ValidationErrorKind};
pub use gating::{can_stack, effective_features, feature_enabled};
pub use issuer::LicenseIssuer;
pub use ledger::{FileLedger, LedgerState, MemoryLedger, OfflineLedger};
pub use remote::{RemoteError, RemoteLicenseClient, RemoteValidation, RevokeResponse};
pub use types::{
    License, LicensePayload, LicenseRequest, LicenseTier, MetadataValue, PluginFeature,
    TierDuration, ValidationResult,
};
pub use validator::ValidationEngine;

#[cfg(feature = "online")]
pub use http::HttpRemoteClient;
