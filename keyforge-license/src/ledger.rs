//! Per-key persistence for offline accounting and known revocations.
//!
//! Entries are keyed by [`key_fingerprint`](crate::codec::key_fingerprint),
//! never by the raw license key.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::error::{LicenseError, LicenseResult};

/// Stores the last successful online check and the revoked set per key.
pub trait OfflineLedger: Send + Sync {
    /// When the key last passed a remote check, if ever.
    fn last_online(&self, fingerprint: &str) -> LicenseResult<Option<DateTime<Utc>>>;

    /// Records a successful remote check at `at`.
    fn record_online(&self, fingerprint: &str, at: DateTime<Utc>) -> LicenseResult<()>;

    /// Returns true if the key was ever seen revoked.
    fn is_revoked(&self, fingerprint: &str) -> LicenseResult<bool>;

    /// Marks the key revoked. There is no inverse operation.
    fn mark_revoked(&self, fingerprint: &str, at: DateTime<Utc>) -> LicenseResult<()>;
}

/// Serialized ledger contents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerState {
    #[serde(default)]
    pub last_online: BTreeMap<String, DateTime<Utc>>,
    #[serde(default)]
    pub revoked: BTreeMap<String, DateTime<Utc>>,
}

fn lock(state: &Mutex<LedgerState>) -> LicenseResult<MutexGuard<'_, LedgerState>> {
    state
        .lock()
        .map_err(|_| LicenseError::Storage("ledger lock poisoned".to_string()))
}

/// In-memory ledger. Forgets everything on drop.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    state: Mutex<LedgerState>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the current contents.
    pub fn snapshot(&self) -> LicenseResult<LedgerState> {
        Ok(lock(&self.state)?.clone())
    }
}

impl OfflineLedger for MemoryLedger {
    fn last_online(&self, fingerprint: &str) -> LicenseResult<Option<DateTime<Utc>>> {
        Ok(lock(&self.state)?.last_online.get(fingerprint).copied())
    }

    fn record_online(&self, fingerprint: &str, at: DateTime<Utc>) -> LicenseResult<()> {
        lock(&self.state)?.last_online.insert(fingerprint.to_string(), at);
        Ok(())
    }

    fn is_revoked(&self, fingerprint: &str) -> LicenseResult<bool> {
        Ok(lock(&self.state)?.revoked.contains_key(fingerprint))
    }

    fn mark_revoked(&self, fingerprint: &str, at: DateTime<Utc>) -> LicenseResult<()> {
        lock(&self.state)?
            .revoked
            .entry(fingerprint.to_string())
            .or_insert(at);
        Ok(())
    }
}

/// Ledger persisted as a JSON file, rewritten on every change.
#[derive(Debug)]
pub struct FileLedger {
    path: PathBuf,
    state: Mutex<LedgerState>,
}

impl FileLedger {
    /// Opens the ledger at `path`, starting empty if the file does not exist.
    pub fn open(path: impl AsRef<Path>) -> LicenseResult<Self> {
        let path = path.as_ref().to_path_buf();
        let state = if path.exists() {
            let json = std::fs::read_to_string(&path)
                .map_err(|e| LicenseError::Storage(e.to_string()))?;
            serde_json::from_str(&json)?
        } else {
            LedgerState::default()
        };
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, state: &LedgerState) -> LicenseResult<()> {
        let json = serde_json::to_vec_pretty(state)?;
        write_atomic(&self.path, &json)
    }
}

impl OfflineLedger for FileLedger {
    fn last_online(&self, fingerprint: &str) -> LicenseResult<Option<DateTime<Utc>>> {
        Ok(lock(&self.state)?.last_online.get(fingerprint).copied())
    }

    fn record_online(&self, fingerprint: &str, at: DateTime<Utc>) -> LicenseResult<()> {
        let mut state = lock(&self.state)?;
        state.last_online.insert(fingerprint.to_string(), at);
        self.persist(&state)
    }

    fn is_revoked(&self, fingerprint: &str) -> LicenseResult<bool> {
        Ok(lock(&self.state)?.revoked.contains_key(fingerprint))
    }

    fn mark_revoked(&self, fingerprint: &str, at: DateTime<Utc>) -> LicenseResult<()> {
        let mut state = lock(&self.state)?;
        if state.revoked.contains_key(fingerprint) {
            return Ok(());
        }
        state.revoked.insert(fingerprint.to_string(), at);
        self.persist(&state)
    }
}

/// Writes `bytes` to a sibling temp file and renames it over `path`.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> LicenseResult<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| LicenseError::Storage(e.to_string()))?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes).map_err(|e| LicenseError::Storage(e.to_string()))?;
    std::fs::rename(&tmp, path).map_err(|e| LicenseError::Storage(e.to_string()))?;
    Ok(())
}
