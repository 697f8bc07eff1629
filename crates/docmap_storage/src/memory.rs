//! In-memory cache backend.

use crate::cache::Cache;
use crate::error::StorageResult;
use docmap_codec::Value;
use parking_lot::RwLock;
use std::collections::HashMap;

/// An in-memory cache.
///
/// This backend stores all entries in memory and is suitable for:
/// - Unit tests
/// - Single-process deployments that do not need the cache to survive a
///   restart
///
/// # Thread Safety
///
/// This backend is thread-safe and can be shared across threads.
#[derive(Debug, Default)]
pub struct InMemoryCache {
    entries: RwLock<HashMap<String, Value>>,
}

impl InMemoryCache {
    /// Creates a new empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns whether the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Cache for InMemoryCache {
    fn has(&self, key: &str) -> StorageResult<bool> {
        Ok(self.entries.read().contains_key(key))
    }

    fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> StorageResult<()> {
        self.entries.write().insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    fn clear(&self) -> StorageResult<()> {
        self.entries.write().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_new_is_empty() {
        let cache = InMemoryCache::new();
        assert!(cache.is_empty());
        assert!(!cache.has("k").unwrap());
    }

    #[test]
    fn memory_lifecycle() {
        let cache = InMemoryCache::new();

        cache.set("k", Value::from("v1")).unwrap();
        assert!(cache.has("k").unwrap());
        assert_eq!(cache.get("k").unwrap(), Some(Value::from("v1")));

        cache.remove("k").unwrap();
        assert!(!cache.has("k").unwrap());
        assert_eq!(cache.get("k").unwrap(), None);

        cache.set("k", Value::from("v2")).unwrap();
        cache.clear().unwrap();
        assert!(!cache.has("k").unwrap());
    }

    #[test]
    fn memory_set_overwrites() {
        let cache = InMemoryCache::new();
        cache.set("k", Value::from(1i64)).unwrap();
        cache.set("k", Value::from(2i64)).unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("k").unwrap(), Some(Value::from(2i64)));
    }

    #[test]
    fn memory_remove_missing_is_ok() {
        let cache = InMemoryCache::new();
        assert!(cache.remove("nothing").is_ok());
    }
}
