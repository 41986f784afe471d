//! Pluggable persistence for the cache's durable tier.
//!
//! The store only needs a small string key/value capability, so the backend is
//! a trait: production uses a JSON document on disk, tests use the in-memory
//! backend. Backend failures are reported, never fatal; the cache degrades to
//! memory-only behavior.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Durable string key/value capability used by the cache's persistent tier.
pub trait StorageBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
    fn keys(&self) -> Result<Vec<String>, StorageError>;
}

/// In-memory backend for tests and persistence-disabled setups.
#[derive(Default)]
pub struct MemoryStorage {
    records: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.records.lock().unwrap().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.records
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.records.lock().unwrap().remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.records.lock().unwrap().keys().cloned().collect())
    }
}

/// File-backed storage: the whole record map lives in one JSON document,
/// rewritten on every mutation. A corrupt or missing document starts empty
/// rather than failing construction.
pub struct FileStorage {
    path: PathBuf,
    records: Mutex<HashMap<String, String>>,
}

impl FileStorage {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let records = match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(map) => map,
                Err(e) => {
                    warn!(path = %path.display(), "discarding corrupt storage file: {}", e);
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };
        Self {
            path,
            records: Mutex::new(records),
        }
    }

    fn flush(&self, records: &HashMap<String, String>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string(records)?;
        std::fs::write(&self.path, contents)?;
        Ok(())
    }
}

impl StorageBackend for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.records.lock().unwrap().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut records = self.records.lock().unwrap();
        records.insert(key.to_string(), value.to_string());
        self.flush(&records)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut records = self.records.lock().unwrap();
        records.remove(key);
        self.flush(&records)
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.records.lock().unwrap().keys().cloned().collect())
    }
}
