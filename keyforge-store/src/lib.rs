//! Local license store for keyforge.
//!
//! Keeps one installed license per plugin, with its cached validation
//! result, behind an injected [`StoreBackend`]. All validation goes through
//! a [`keyforge_license::ValidationEngine`]; the store never accepts a key
//! the engine rejects.
//!
//! # Layout on disk
//!
//! ```text
//! <data dir>/keyforge/
//!   licenses.json         StoreDocument (version 1)
//!   offline-ledger.json   last-online timestamps and known revocations
//! ```

mod backend;
mod error;
mod model;
mod store;

pub use backend::{JsonFileBackend, MemoryBackend, StoreBackend};
pub use error::{StoreError, StoreResult};
pub use model::{
    DroppedAddon, ImportReport, ImportSkip, LicenseSource, RefreshFailure, RefreshReport,
    SkipReason, StackedLicense, StoreDocument, StoredLicense, STORE_VERSION,
};
pub use store::LicenseStore;

use std::path::{Path, PathBuf};

/// File name of the store document inside the store directory.
pub const LICENSES_FILE: &str = "licenses.json";

/// File name of the offline ledger inside the store directory.
pub const LEDGER_FILE: &str = "offline-ledger.json";

/// Default store directory: the platform's local data dir plus `keyforge`.
pub fn default_store_dir() -> Option<PathBuf> {
    dirs::data_local_dir().map(|dir| dir.join("keyforge"))
}

/// Paths of the files kept in a store directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorePaths {
    pub licenses: PathBuf,
    pub ledger: PathBuf,
}

impl StorePaths {
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            licenses: dir.join(LICENSES_FILE),
            ledger: dir.join(LEDGER_FILE),
        }
    }
}
