//! Eager in-memory shadow over another cache.

use crate::cache::Cache;
use crate::error::StorageResult;
use docmap_codec::Value;
use parking_lot::RwLock;
use std::collections::HashMap;

/// A cache that shadows a delegate in memory.
///
/// Reads are served from the shadow, which is filled lazily from the
/// delegate. Misses are remembered too, so a key the delegate does not hold
/// is only asked for once. Every mutation is applied to the delegate first
/// and then to the shadow; when the delegate fails the shadow is left
/// untouched and the error is returned.
pub struct EagerCache<C: Cache> {
    delegate: C,
    shadow: RwLock<HashMap<String, Option<Value>>>,
}

impl<C: Cache> EagerCache<C> {
    /// Wraps `delegate` with an empty shadow.
    pub fn new(delegate: C) -> Self {
        Self {
            delegate,
            shadow: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the wrapped cache.
    pub fn delegate(&self) -> &C {
        &self.delegate
    }

    /// Returns the number of keys (hits and remembered misses) in the
    /// shadow.
    pub fn shadowed(&self) -> usize {
        self.shadow.read().len()
    }
}

impl<C: Cache> Cache for EagerCache<C> {
    fn has(&self, key: &str) -> StorageResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        if let Some(entry) = self.shadow.read().get(key) {
            return Ok(entry.clone());
        }
        let loaded = self.delegate.get(key)?;
        self.shadow.write().insert(key.to_string(), loaded.clone());
        Ok(loaded)
    }

    fn set(&self, key: &str, value: Value) -> StorageResult<()> {
        self.delegate.set(key, value.clone())?;
        self.shadow.write().insert(key.to_string(), Some(value));
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        self.delegate.remove(key)?;
        self.shadow.write().insert(key.to_string(), None);
        Ok(())
    }

    fn clear(&self) -> StorageResult<()> {
        self.delegate.clear()?;
        self.shadow.write().clear();
        Ok(())
    }
}

impl<C: Cache + std::fmt::Debug> std::fmt::Debug for EagerCache<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EagerCache")
            .field("delegate", &self.delegate)
            .field("shadowed", &self.shadowed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use crate::memory::InMemoryCache;
    use proptest::prelude::*;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Delegate that counts reads and can be told to fail writes.
    #[derive(Default)]
    struct CountingCache {
        inner: InMemoryCache,
        reads: AtomicUsize,
        fail_writes: bool,
    }

    impl Cache for CountingCache {
        fn has(&self, key: &str) -> StorageResult<bool> {
            self.inner.has(key)
        }

        fn get(&self, key: &str) -> StorageResult<Option<Value>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: Value) -> StorageResult<()> {
            if self.fail_writes {
                return Err(StorageError::Io(std::io::Error::other("disk full")));
            }
            self.inner.set(key, value)
        }

        fn remove(&self, key: &str) -> StorageResult<()> {
            self.inner.remove(key)
        }

        fn clear(&self) -> StorageResult<()> {
            self.inner.clear()
        }
    }

    #[test]
    fn eager_lifecycle() {
        let cache = EagerCache::new(InMemoryCache::new());

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
    fn eager_remembers_misses() {
        let cache = EagerCache::new(CountingCache::default());

        assert_eq!(cache.get("missing").unwrap(), None);
        assert!(!cache.has("missing").unwrap());
        assert_eq!(cache.get("missing").unwrap(), None);

        assert_eq!(cache.delegate().reads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn eager_serves_hits_from_shadow() {
        let delegate = CountingCache::default();
        delegate.inner.set("k", Value::from(7i64)).unwrap();
        let cache = EagerCache::new(delegate);

        for _ in 0..3 {
            assert_eq!(cache.get("k").unwrap(), Some(Value::from(7i64)));
        }
        assert_eq!(cache.delegate().reads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn eager_writes_through_to_delegate() {
        let cache = EagerCache::new(InMemoryCache::new());

        cache.set("k", Value::from("v")).unwrap();
        assert_eq!(cache.delegate().get("k").unwrap(), Some(Value::from("v")));

        cache.remove("k").unwrap();
        assert!(!cache.delegate().has("k").unwrap());
    }

    #[test]
    fn eager_failed_write_leaves_shadow_untouched() {
        let cache = EagerCache::new(CountingCache {
            fail_writes: true,
            ..CountingCache::default()
        });

        assert!(cache.set("k", Value::Null).is_err());
        assert_eq!(cache.shadowed(), 0);
        assert!(!cache.has("k").unwrap());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Set(String, i64),
        Remove(String),
        Get(String),
        Clear,
    }

    fn op() -> impl Strategy<Value = Op> {
        let key = "[a-d]";
        prop_oneof![
            4 => (key, any::<i64>()).prop_map(|(k, v)| Op::Set(k, v)),
            2 => key.prop_map(Op::Remove),
            4 => key.prop_map(Op::Get),
            1 => Just(Op::Clear),
        ]
    }

    proptest! {
        #[test]
        fn eager_agrees_with_delegate_and_model(
            seeded in prop::collection::btree_map("[a-d]", any::<i64>(), 0..4),
            ops in prop::collection::vec(op(), 1..40),
        ) {
            let delegate = InMemoryCache::new();
            for (key, value) in &seeded {
                delegate.set(key, Value::Integer(*value)).unwrap();
            }
            let cache = EagerCache::new(delegate);
            let mut model: BTreeMap<String, i64> = seeded;

            for op in ops {
                match op {
                    Op::Set(key, value) => {
                        cache.set(&key, Value::Integer(value)).unwrap();
                        model.insert(key, value);
                    }
                    Op::Remove(key) => {
                        cache.remove(&key).unwrap();
                        model.remove(&key);
                    }
                    Op::Get(key) => {
                        let expected = model.get(&key).map(|v| Value::Integer(*v));
                        prop_assert_eq!(cache.get(&key).unwrap(), expected);
                    }
                    Op::Clear => {
                        cache.clear().unwrap();
                        model.clear();
                    }
                }
            }

            for key in ["a", "b", "c", "d"] {
                let expected = model.get(key).map(|v| Value::Integer(*v));
                prop_assert_eq!(cache.has(key).unwrap(), expected.is_some());
                prop_assert_eq!(cache.delegate().get(key).unwrap(), expected.clone());
                prop_assert_eq!(cache.get(key).unwrap(), expected);
            }
        }
    }
}
