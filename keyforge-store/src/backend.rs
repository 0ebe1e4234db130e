//! Persistence backends for the license store.
//!
//! A backend loads and saves the whole [`StoreDocument`] at once; the store
//! never writes partial updates.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::model::{StoreDocument, STORE_VERSION};

/// Durable storage for the store document.
pub trait StoreBackend: Send + Sync {
    /// Loads the persisted document, or `None` if nothing was saved yet.
    fn load(&self) -> StoreResult<Option<StoreDocument>>;

    /// Replaces the persisted document.
    fn save(&self, document: &StoreDocument) -> StoreResult<()>;
}

/// Keeps the document in a JSON file, replaced atomically on every save.
#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StoreBackend for JsonFileBackend {
    fn load(&self) -> StoreResult<Option<StoreDocument>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let json = std::fs::read_to_string(&self.path)?;
        let document: StoreDocument = serde_json::from_str(&json)?;
        if document.version > STORE_VERSION {
            return Err(StoreError::InvalidData(format!(
                "store version {} is newer than supported version {STORE_VERSION}",
                document.version
            )));
        }
        debug!(path = %self.path.display(), licenses = document.licenses.len(), "Loaded license store");
        Ok(Some(document))
    }

    fn save(&self, document: &StoreDocument) -> StoreResult<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(document)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// Keeps the document in memory. Counts saves so callers can observe flushes.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    document: Mutex<Option<StoreDocument>>,
    saves: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from an existing document.
    pub fn with_document(document: StoreDocument) -> Self {
        Self {
            document: Mutex::new(Some(document)),
            ..Self::default()
        }
    }

    /// Number of completed saves.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// The most recently saved document.
    pub fn saved(&self) -> Option<StoreDocument> {
        self.document.lock().ok().and_then(|d| d.clone())
    }
}

impl StoreBackend for MemoryBackend {
    fn load(&self) -> StoreResult<Option<StoreDocument>> {
        let guard = self
            .document
            .lock()
            .map_err(|_| StoreError::InvalidData("memory backend lock poisoned".to_string()))?;
        Ok(guard.clone())
    }

    fn save(&self, document: &StoreDocument) -> StoreResult<()> {
        let mut guard = self
            .document
            .lock()
            .map_err(|_| StoreError::InvalidData("memory backend lock poisoned".to_string()))?;
        *guard = Some(document.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
