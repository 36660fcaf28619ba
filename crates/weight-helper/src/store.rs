//! Key-value persistence for the history ledger.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use indexmap::IndexMap;
use thiserror::Error;
use tracing::warn;
use weight_helper_core::{HistoryEntry, Ledger, LedgerSnapshot};

pub const HISTORIES_KEY: &str = "histories";
pub const LOCKS_KEY: &str = "locks";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to access {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("stored value is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Flat string store, in the manner of browser local storage.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&mut self, key: &str, value: String) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    values: IndexMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.values.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: String) -> Result<(), StoreError> {
        self.values.insert(key.to_string(), value);
        Ok(())
    }
}

/// Every key in one JSON object file. A missing file reads as empty.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<IndexMap<String, String>, StoreError> {
        match fs::read_to_string(&self.path) {
            Ok(contents) if contents.trim().is_empty() => Ok(IndexMap::new()),
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(IndexMap::new()),
            Err(source) => Err(StoreError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.read_all()?.shift_remove(key))
    }

    /// A file holding invalid JSON is replaced by a fresh table.
    fn set(&mut self, key: &str, value: String) -> Result<(), StoreError> {
        let mut all = match self.read_all() {
            Ok(all) => all,
            Err(StoreError::Json(e)) => {
                warn!(path = ?self.path, error = %e, "store file is not valid JSON; starting a fresh table");
                IndexMap::new()
            }
            Err(e) => return Err(e),
        };
        all.insert(key.to_string(), value);
        let json = serde_json::to_string_pretty(&all)?;
        fs::write(&self.path, json).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

/// Reads both ledger tables and merges them into `ledger`.
pub fn load_ledger(store: &dyn KeyValueStore, ledger: &mut Ledger) -> Result<(), StoreError> {
    let mut snapshot = LedgerSnapshot::default();
    if let Some(raw) = store.get(HISTORIES_KEY)? {
        snapshot.histories = serde_json::from_str::<IndexMap<String, Vec<HistoryEntry>>>(&raw)?;
    }
    if let Some(raw) = store.get(LOCKS_KEY)? {
        snapshot.locks = serde_json::from_str::<IndexMap<String, Vec<String>>>(&raw)?;
    }
    ledger.merge(snapshot);
    Ok(())
}

/// Writes both ledger tables.
pub fn save_ledger(store: &mut dyn KeyValueStore, ledger: &Ledger) -> Result<(), StoreError> {
    let snapshot = ledger.snapshot();
    store.set(HISTORIES_KEY, serde_json::to_string(&snapshot.histories)?)?;
    store.set(LOCKS_KEY, serde_json::to_string(&snapshot.locks)?)?;
    Ok(())
}
