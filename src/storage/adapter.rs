//! Pluggable key-value persistence backends
//!
//! The token store talks to a [`StorageAdapter`]: string keys, string
//! values, and a whole-backend `clear`. Backends never fail outward —
//! persistence problems are logged and the adapter keeps serving from
//! memory, because a client that cannot persist tokens should degrade to
//! cookie-only operation rather than break authentication entirely.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Key-value persistence contract for the token store.
pub trait StorageAdapter: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
    /// Remove every stored key. Must be atomic with respect to readers:
    /// a concurrent `get` observes either the full old state or nothing.
    fn clear(&self);
}

/// Volatile in-process storage. The default for tests and for hosts that
/// only want cookie-based sessions.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageAdapter for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
    }

    fn remove(&self, key: &str) {
        self.entries.lock().unwrap().remove(key);
    }

    fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }
}

/// On-disk persisted envelope for [`FileStorage`].
#[derive(Debug, Serialize, Deserialize)]
struct StorageEnvelope {
    saved_at: DateTime<Utc>,
    entries: HashMap<String, String>,
}

/// Durable storage backed by a single JSON document.
///
/// Every mutation rewrites the document via a temp-file rename, so a crash
/// mid-write leaves the previous document intact rather than a torn one.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    entries: Mutex<HashMap<String, String>>,
}

impl FileStorage {
    const FILE_NAME: &'static str = "keeprs-storage.json";

    /// Open (or create) file-backed storage under `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created. A present but
    /// unreadable or corrupt document is logged and treated as empty.
    pub fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(Self::FILE_NAME);
        let entries = Self::load_entries(&path);
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    fn load_entries(path: &std::path::Path) -> HashMap<String, String> {
        match std::fs::read_to_string(path) {
            Ok(raw) => match serde_json::from_str::<StorageEnvelope>(&raw) {
                Ok(envelope) => envelope.entries,
                Err(e) => {
                    log::warn!("Discarding unreadable storage document {path:?}: {e}");
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        }
    }

    /// Persist the current entries. Called with the entry lock held so
    /// writers serialize.
    fn persist(&self, entries: &HashMap<String, String>) {
        let envelope = StorageEnvelope {
            saved_at: Utc::now(),
            entries: entries.clone(),
        };
        let serialized = match serde_json::to_vec_pretty(&envelope) {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("Failed to serialize storage document: {e}");
                return;
            }
        };
        let tmp_path = self.path.with_extension("json.tmp");
        if let Err(e) = std::fs::write(&tmp_path, serialized) {
            log::warn!("Failed to write storage document {tmp_path:?}: {e}");
            return;
        }
        if let Err(e) = std::fs::rename(&tmp_path, &self.path) {
            log::warn!("Failed to replace storage document {:?}: {e}", self.path);
        }
    }
}

impl StorageAdapter for FileStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(key.to_string(), value.to_string());
        self.persist(&entries);
    }

    fn remove(&self, key: &str) {
        let mut entries = self.entries.lock().unwrap();
        if entries.remove(key).is_some() {
            self.persist(&entries);
        }
    }

    fn clear(&self) {
        let mut entries = self.entries.lock().unwrap();
        entries.clear();
        self.persist(&entries);
    }
}

/// Storage that persists nothing: every read is absent, every write a
/// no-op. Used where no durable location exists, so the client behaves
/// like a cookie-only browser session.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullStorage;

impl StorageAdapter for NullStorage {
    fn get(&self, _key: &str) -> Option<String> {
        None
    }

    fn set(&self, _key: &str, _value: &str) {}

    fn remove(&self, _key: &str) {}

    fn clear(&self) {}
}

/// Pick the default adapter for a host-supplied storage directory.
///
/// With a directory, file storage is attempted; without one, or when the
/// directory is unusable, storage degrades to [`NullStorage`] instead of
/// failing construction.
#[must_use]
pub fn default_adapter(storage_dir: Option<PathBuf>) -> Arc<dyn StorageAdapter> {
    match storage_dir {
        Some(dir) => match FileStorage::new(&dir) {
            Ok(storage) => Arc::new(storage),
            Err(e) => {
                log::warn!("Storage directory {dir:?} unavailable ({e}), tokens will not persist");
                Arc::new(NullStorage)
            }
        },
        None => Arc::new(NullStorage),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_storage_round_trips() {
        let storage = MemoryStorage::new();
        assert!(storage.get("k").is_none());
        storage.set("k", "v");
        assert_eq!(storage.get("k").unwrap(), "v");
        storage.remove("k");
        assert!(storage.get("k").is_none());
    }

    #[test]
    fn memory_storage_clear_removes_everything() {
        let storage = MemoryStorage::new();
        storage.set("a", "1");
        storage.set("b", "2");
        storage.clear();
        assert!(storage.get("a").is_none());
        assert!(storage.get("b").is_none());
    }

    #[test]
    fn null_storage_is_a_no_op() {
        let storage = NullStorage;
        storage.set("k", "v");
        assert!(storage.get("k").is_none());
        storage.remove("k");
        storage.clear();
    }

    #[test]
    fn default_adapter_without_dir_degrades_to_null() {
        let adapter = default_adapter(None);
        adapter.set("k", "v");
        assert!(adapter.get("k").is_none());
    }
}
