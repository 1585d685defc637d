//! Cache store adapter.
//!
//! The engine talks to an externally supplied key/value backend through
//! `CacheStore`: batched get, batched set, single get/set/delete, no
//! transactional guarantees. The backend may evict entries at any time, so
//! absence always means "unknown/stale", never "definitely nonexistent".
//!
//! `MemoryStore` is the in-process implementation: an LRU-bounded map,
//! suitable as the default backend for single-process deployments and tests.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use lru::LruCache;

use crate::config::CacheConfig;
use crate::error::StoreError;
use crate::lock::{rw_read, rw_write};

const SOURCE: &str = "store";

/// Key/value backend for encoded cache payloads.
///
/// Values are opaque strings (the engine stores JSON documents). Missing keys
/// are simply absent from `get_many`'s result, never present-as-null.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn get_many(&self, keys: &[String]) -> Result<HashMap<String, String>, StoreError>;
    async fn set(&self, key: &str, value: String) -> Result<(), StoreError>;
    async fn set_many(&self, entries: HashMap<String, String>) -> Result<(), StoreError>;
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// In-process LRU-bounded store.
pub struct MemoryStore {
    entries: RwLock<LruCache<String, String>>,
}

impl MemoryStore {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(config.memory_entry_limit_non_zero())),
        }
    }

    /// Number of entries currently held.
    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry.
    pub fn clear(&self) {
        rw_write(&self.entries, SOURCE, "clear").clear();
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(rw_write(&self.entries, SOURCE, "get").get(key).cloned())
    }

    async fn get_many(&self, keys: &[String]) -> Result<HashMap<String, String>, StoreError> {
        let mut entries = rw_write(&self.entries, SOURCE, "get_many");
        let mut found = HashMap::new();
        for key in keys {
            if let Some(value) = entries.get(key) {
                found.insert(key.clone(), value.clone());
            }
        }
        Ok(found)
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        rw_write(&self.entries, SOURCE, "set").put(key.to_string(), value);
        Ok(())
    }

    async fn set_many(&self, entries: HashMap<String, String>) -> Result<(), StoreError> {
        let mut guard = rw_write(&self.entries, SOURCE, "set_many");
        for (key, value) in entries {
            guard.put(key, value);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        rw_write(&self.entries, SOURCE, "delete").pop(key);
        Ok(())
    }
}
