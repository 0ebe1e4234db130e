//! Offline-day and trial-day accounting.
//!
//! Offline days are derived from the ledger's last successful online check.
//! Trial days are stateless: they depend only on `issued_at` and the tier.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;

use crate::error::LicenseResult;
use crate::ledger::OfflineLedger;
use crate::types::LicenseTier;

/// Seconds in one accounting day.
pub const SECS_PER_DAY: i64 = 24 * 60 * 60;

/// Whole days elapsed from `from` to `to`, floored, never negative.
#[must_use]
pub fn whole_days_between(from: DateTime<Utc>, to: DateTime<Utc>) -> u32 {
    let secs = (to - from).num_seconds();
    if secs <= 0 {
        return 0;
    }
    u32::try_from(secs / SECS_PER_DAY).unwrap_or(u32::MAX)
}

/// Trial days left for a license of `tier` issued at `issued_at`.
///
/// `None` when the tier has no trial; otherwise clamped at zero.
#[must_use]
pub fn remaining_trial_days(
    tier: &LicenseTier,
    issued_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Option<u32> {
    if !tier.has_trial() {
        return None;
    }
    Some(tier.trial_days.saturating_sub(whole_days_between(issued_at, now)))
}

/// Offline-day bookkeeping on top of an [`OfflineLedger`].
#[derive(Clone)]
pub struct OfflineTracker {
    ledger: Arc<dyn OfflineLedger>,
}

impl OfflineTracker {
    pub fn new(ledger: Arc<dyn OfflineLedger>) -> Self {
        Self { ledger }
    }

    /// Records a successful online check; offline days restart from zero.
    pub fn record_success(&self, fingerprint: &str, now: DateTime<Utc>) -> LicenseResult<()> {
        self.ledger.record_online(fingerprint, now)
    }

    /// Days since the last successful online check.
    ///
    /// A key with no record gets `now` stored and reports zero.
    pub fn offline_days(&self, fingerprint: &str, now: DateTime<Utc>) -> LicenseResult<u32> {
        match self.ledger.last_online(fingerprint)? {
            Some(last) => Ok(whole_days_between(last, now)),
            None => {
                debug!(key = %short(fingerprint), "First offline check, starting grace window");
                self.ledger.record_online(fingerprint, now)?;
                Ok(0)
            }
        }
    }

    pub fn is_revoked(&self, fingerprint: &str) -> LicenseResult<bool> {
        self.ledger.is_revoked(fingerprint)
    }

    pub fn mark_revoked(&self, fingerprint: &str, now: DateTime<Utc>) -> LicenseResult<()> {
        self.ledger.mark_revoked(fingerprint, now)
    }
}

pub(crate) fn short(fingerprint: &str) -> &str {
    fingerprint.get(..12).unwrap_or(fingerprint)
}
