//! Durable per-scope cache of collection items.
//!
//! The cache is the fallback of record: it is what the view shows before the
//! first fetch, after a failed fetch, and always in local-only mode. Callers
//! never see its errors; failures are logged and the call becomes a no-op.

use crate::error::StorageError;
use crate::{Item, OwnerId};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Version of the cache entry format.
pub const CACHE_FORMAT_VERSION: u32 = 1;

/// Key of one cache entry: the collection's cache key, joined with the owner
/// identity when there is one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopeKey(String);

impl ScopeKey {
    /// Build the key for a collection and optional owner.
    pub fn new(cache_key: &str, owner: Option<&OwnerId>) -> Self {
        match owner {
            Some(owner) => Self(format!("{cache_key}:{owner}")),
            None => Self(cache_key.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Minimal durable key/value primitive the cache is built on.
pub trait KvStore: Send + Sync {
    /// Read the raw value stored under `key`.
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Replace the value stored under `key`.
    fn set(&self, key: &str, value: String) -> Result<(), StorageError>;
}

/// In-memory store. Contents vanish with the process.
#[derive(Debug, Default)]
pub struct MemoryKv {
    entries: DashMap<String, String>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KvStore for MemoryKv {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    fn set(&self, key: &str, value: String) -> Result<(), StorageError> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }
}

/// Directory-backed store: one JSON file per key.
///
/// Writes go to a temporary sibling first and are renamed into place, so a
/// crash mid-write leaves the previous value intact.
#[derive(Debug, Clone)]
pub struct FileKv {
    dir: PathBuf,
}

impl FileKv {
    /// Open (and create if needed) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| StorageError::Io(e.to_string()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File for `key`. Bytes outside `[A-Za-z0-9_-]` are percent-encoded,
    /// `%` included, so distinct keys never share a file.
    fn path_for(&self, key: &str) -> PathBuf {
        let mut name = String::with_capacity(key.len());
        for byte in key.bytes() {
            if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
                name.push(char::from(byte));
            } else {
                name.push_str(&format!("%{byte:02X}"));
            }
        }
        self.dir.join(format!("{name}.json"))
    }
}

impl KvStore for FileKv {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io(e.to_string())),
        }
    }

    fn set(&self, key: &str, value: String) -> Result<(), StorageError> {
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");

        let write = || -> std::io::Result<()> {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(value.as_bytes())?;
            file.sync_all()?;
            fs::rename(&tmp, &path)
        };

        write().map_err(|e| StorageError::Io(e.to_string()))
    }
}

/// On-disk shape of one cache entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Entry format version
    pub version: u32,
    /// Items in display order
    pub items: Vec<Item>,
}

impl CacheEntry {
    pub fn new(items: Vec<Item>) -> Self {
        Self {
            version: CACHE_FORMAT_VERSION,
            items,
        }
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, StorageError> {
        serde_json::to_string(self).map_err(|e| StorageError::Serialize(e.to_string()))
    }

    /// Deserialize from JSON, rejecting formats newer than this build understands.
    pub fn from_json(json: &str) -> Result<Self, StorageError> {
        let entry: Self =
            serde_json::from_str(json).map_err(|e| StorageError::Corrupt(e.to_string()))?;

        if entry.version > CACHE_FORMAT_VERSION {
            return Err(StorageError::Corrupt(format!(
                "unsupported cache format version: {} (max supported: {})",
                entry.version, CACHE_FORMAT_VERSION
            )));
        }

        Ok(entry)
    }
}

/// Item cache scoped by (collection, owner).
///
/// Cheap to clone; clones share the backing store.
#[derive(Clone)]
pub struct PersistentCache {
    store: Arc<dyn KvStore>,
}

impl PersistentCache {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Cache backed by a fresh [`MemoryKv`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryKv::new()))
    }

    /// Items stored for `scope`, or `None` if nothing readable is stored.
    pub fn get(&self, scope: &ScopeKey) -> Option<Vec<Item>> {
        let raw = match self.store.get(scope.as_str()) {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::warn!(scope = %scope, error = %e, "cache read failed");
                return None;
            }
        };

        match CacheEntry::from_json(&raw) {
            Ok(entry) => Some(entry.items),
            Err(e) => {
                tracing::warn!(scope = %scope, error = %e, "ignoring unreadable cache entry");
                None
            }
        }
    }

    /// Replace the items stored for `scope`. Failures are logged and dropped.
    pub fn set(&self, scope: &ScopeKey, items: &[Item]) {
        let result = CacheEntry::new(items.to_vec())
            .to_json()
            .and_then(|json| self.store.set(scope.as_str(), json));

        if let Err(e) = result {
            tracing::warn!(scope = %scope, error = %e, "cache write failed");
        }
    }
}

impl fmt::Debug for PersistentCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistentCache").finish_non_exhaustive()
    }
}
