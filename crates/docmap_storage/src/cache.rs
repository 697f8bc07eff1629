//! Cache trait definition.

use crate::error::StorageResult;
use docmap_codec::Value;

/// A key-value cache for docmap.
///
/// # Invariants
///
/// - `get` returns the value from the last successful `set` for that key
/// - after `remove` or `clear`, `has` is `false` and `get` is `None`
/// - a failed mutation is reported to the caller, never ignored
/// - caches must be `Send + Sync` so sessions can share them
///
/// # Implementors
///
/// - [`super::InMemoryCache`] - For testing
/// - [`super::FileCache`] - For persistent caching
/// - [`super::EagerCache`] - In-memory shadow over another cache
pub trait Cache: Send + Sync {
    /// Returns whether a value is stored for `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be inspected.
    fn has(&self, key: &str) -> StorageResult<bool>;

    /// Returns the value stored for `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read or the stored entry
    /// cannot be decoded.
    fn get(&self, key: &str) -> StorageResult<Option<Value>>;

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be written.
    fn set(&self, key: &str, value: Value) -> StorageResult<()>;

    /// Removes the value stored under `key`. Removing a missing key is not an
    /// error.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry exists but cannot be deleted.
    fn remove(&self, key: &str) -> StorageResult<()>;

    /// Removes every entry.
    ///
    /// # Errors
    ///
    /// Returns an error if any entry cannot be deleted.
    fn clear(&self) -> StorageResult<()>;
}
