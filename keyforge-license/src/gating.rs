//! Feature gating and license stacking.
//!
//! A feature is enabled when the plugin marks it `required`, or when any
//! currently valid license for the plugin grants it. Valid licenses combine
//! by union, so adding a lesser license never takes a feature away.

use std::collections::BTreeSet;

use crate::config::LicenseConfig;
use crate::types::ValidationResult;

/// Features enabled for a plugin given the results of all its licenses.
pub fn effective_features<'a, I>(config: &LicenseConfig, results: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = &'a ValidationResult>,
{
    let mut enabled = config.required_features();
    for result in results.into_iter().filter(|r| r.valid) {
        enabled.extend(result.features.iter().cloned());
    }
    enabled
}

/// Returns true if `feature_id` is enabled for the plugin.
pub fn feature_enabled<'a, I>(config: &LicenseConfig, results: I, feature_id: &str) -> bool
where
    I: IntoIterator<Item = &'a ValidationResult>,
{
    if config.feature(feature_id).is_some_and(|f| f.required) {
        return true;
    }
    results.into_iter().any(|r| r.grants(feature_id))
}

/// Returns true if a license of `incoming_tier` may be stacked onto one of
/// `existing_tier`. Both tiers must exist and be stackable.
#[must_use]
pub fn can_stack(config: &LicenseConfig, existing_tier: &str, incoming_tier: &str) -> bool {
    let stackable = |id: &str| config.tier(id).is_some_and(|t| t.stackable);
    stackable(existing_tier) && stackable(incoming_tier)
}
