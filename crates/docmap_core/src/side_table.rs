//! Per-instance auxiliary storage.
//!
//! The side table associates arbitrary typed values with an instance handle
//! and a string key. It holds bookkeeping that is not part of an entity's
//! persisted data: query hashes of a root document, the position of an
//! embedded document, the recorded original of a replaced embedded slot,
//! and the wiring of a relation group.
//!
//! Entries live until [`SideTable::remove_owner`] is called for their owner,
//! which the session does whenever an instance is disposed.

use crate::error::{CoreError, CoreResult};
use crate::types::InstanceId;
use std::any::Any;
use std::collections::HashMap;

/// Well-known side-table keys.
pub mod keys {
    /// `RootAndPath` of an embedded document or embedded group.
    pub const ROOT_AND_PATH: &str = "root_and_path";
    /// `Vec<String>` of query hashes a root document was loaded through.
    pub const QUERY_HASHES: &str = "query_hashes";
    /// `String` class of the members of a group.
    pub const DOCUMENT_CLASS: &str = "document_class";
    /// `String` discriminator field of a polymorphic reference group.
    pub const DISCRIMINATOR_FIELD: &str = "discriminator_field";
    /// `BTreeMap<String, String>` discriminator value to class map.
    pub const DISCRIMINATOR_MAP: &str = "discriminator_map";
    /// `EntityRef` owning a group.
    pub const PARENT: &str = "parent";
    /// `String` raw field (references) or slot name (embedded) of a group.
    pub const FIELD: &str = "field";
    /// `String` relation name of a reference group.
    pub const REFERENCE: &str = "reference";
    /// `Vec<Value>` raw members of an embedded group, before materializing.
    pub const SAVED_DATA: &str = "saved_data";

    /// Key recording the original occupant of a replaced embedded-one slot.
    #[must_use]
    pub fn embedded_one(name: &str) -> String {
        format!("embedded_one.{name}")
    }
}

type Entries = HashMap<String, Box<dyn Any + Send>>;

/// Map from instance to keyed values.
#[derive(Default)]
pub struct SideTable {
    owners: HashMap<InstanceId, Entries>,
}

impl SideTable {
    /// Creates an empty side table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a value, replacing any previous value under the key.
    pub fn set<T: Any + Send>(
        &mut self,
        owner: impl Into<InstanceId>,
        key: impl Into<String>,
        value: T,
    ) {
        self.owners
            .entry(owner.into())
            .or_default()
            .insert(key.into(), Box::new(value));
    }

    /// Returns the value stored under the key.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when nothing is stored, or the stored value has a
    /// different type.
    pub fn get<T: Any>(&self, owner: impl Into<InstanceId>, key: &str) -> CoreResult<&T> {
        let owner = owner.into();
        self.owners
            .get(&owner)
            .and_then(|entries| entries.get(key))
            .and_then(|value| value.downcast_ref::<T>())
            .ok_or_else(|| CoreError::not_found(format!("side-table key {key} of {owner}")))
    }

    /// Returns a copy of the stored value, or `default` when absent.
    pub fn get_or_default<T: Any + Clone>(
        &self,
        owner: impl Into<InstanceId>,
        key: &str,
        default: T,
    ) -> T {
        self.get::<T>(owner, key).cloned().unwrap_or(default)
    }

    /// Returns a mutable reference to the stored value, seeding it with
    /// `default` first when absent.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` when a value of another type is stored.
    pub fn get_by_reference<T: Any + Send>(
        &mut self,
        owner: impl Into<InstanceId>,
        key: &str,
        default: T,
    ) -> CoreResult<&mut T> {
        let owner = owner.into();
        self.owners
            .entry(owner)
            .or_default()
            .entry(key.to_string())
            .or_insert_with(|| Box::new(default))
            .downcast_mut::<T>()
            .ok_or_else(|| {
                CoreError::invalid_state(format!(
                    "side-table key {key} of {owner} holds another type"
                ))
            })
    }

    /// Returns true when a value is stored under the key.
    pub fn has(&self, owner: impl Into<InstanceId>, key: &str) -> bool {
        self.owners
            .get(&owner.into())
            .is_some_and(|entries| entries.contains_key(key))
    }

    /// Removes one entry, returning whether it existed.
    pub fn remove(&mut self, owner: impl Into<InstanceId>, key: &str) -> bool {
        let owner = owner.into();
        let Some(entries) = self.owners.get_mut(&owner) else {
            return false;
        };
        let removed = entries.remove(key).is_some();
        if entries.is_empty() {
            self.owners.remove(&owner);
        }
        removed
    }

    /// Removes every entry whose key starts with `prefix`.
    pub fn remove_prefixed(&mut self, owner: impl Into<InstanceId>, prefix: &str) {
        let owner = owner.into();
        if let Some(entries) = self.owners.get_mut(&owner) {
            entries.retain(|key, _| !key.starts_with(prefix));
            if entries.is_empty() {
                self.owners.remove(&owner);
            }
        }
    }

    /// Purges all entries of an owner, returning how many were removed.
    pub fn remove_owner(&mut self, owner: impl Into<InstanceId>) -> usize {
        self.owners
            .remove(&owner.into())
            .map_or(0, |entries| entries.len())
    }

    /// Number of owners with at least one entry.
    #[must_use]
    pub fn owner_count(&self) -> usize {
        self.owners.len()
    }

    /// Total number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.owners.values().map(HashMap::len).sum()
    }

    /// Returns true when no entries are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    /// Drops every entry.
    pub fn clear(&mut self) {
        self.owners.clear();
    }
}

impl std::fmt::Debug for SideTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SideTable")
            .field("owners", &self.owners.len())
            .field("entries", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: InstanceId = InstanceId::new(1);
    const B: InstanceId = InstanceId::new(2);

    #[test]
    fn set_and_get() {
        let mut table = SideTable::new();
        table.set(A, "name", String::from("alpha"));
        assert_eq!(table.get::<String>(A, "name").unwrap(), "alpha");
        assert!(table.has(A, "name"));
        assert!(!table.has(B, "name"));
    }

    #[test]
    fn get_missing_is_not_found() {
        let table = SideTable::new();
        let err = table.get::<String>(A, "name").unwrap_err();
        assert!(matches!(err, CoreError::NotFound { .. }));
    }

    #[test]
    fn get_with_wrong_type_is_not_found() {
        let mut table = SideTable::new();
        table.set(A, "n", 1u32);
        assert!(table.get::<String>(A, "n").is_err());
    }

    #[test]
    fn get_or_default_does_not_store() {
        let table = SideTable::new();
        assert_eq!(table.get_or_default(A, "n", 7u32), 7);
        assert!(!table.has(A, "n"));
    }

    #[test]
    fn get_by_reference_seeds_and_mutates() {
        let mut table = SideTable::new();
        table
            .get_by_reference(A, "hashes", Vec::<String>::new())
            .unwrap()
            .push("h1".into());
        table
            .get_by_reference(A, "hashes", Vec::<String>::new())
            .unwrap()
            .push("h2".into());
        assert_eq!(
            table.get::<Vec<String>>(A, "hashes").unwrap(),
            &vec!["h1".to_string(), "h2".to_string()]
        );
    }

    #[test]
    fn get_by_reference_rejects_other_type() {
        let mut table = SideTable::new();
        table.set(A, "n", 1u32);
        assert!(table.get_by_reference(A, "n", String::new()).is_err());
    }

    #[test]
    fn remove_owner_purges_only_that_owner() {
        let mut table = SideTable::new();
        table.set(A, "x", 1u8);
        table.set(A, "y", 2u8);
        table.set(B, "x", 3u8);
        assert_eq!(table.len(), 3);
        assert_eq!(table.remove_owner(A), 2);
        assert_eq!(table.owner_count(), 1);
        assert!(!table.has(A, "x"));
        assert!(table.has(B, "x"));
        assert_eq!(table.remove_owner(A), 0);
    }

    #[test]
    fn remove_prefixed_keeps_others() {
        let mut table = SideTable::new();
        table.set(A, keys::embedded_one("source"), 1u8);
        table.set(A, keys::embedded_one("info"), 1u8);
        table.set(A, keys::QUERY_HASHES, Vec::<String>::new());
        table.remove_prefixed(A, "embedded_one.");
        assert_eq!(table.len(), 1);
        assert!(table.has(A, keys::QUERY_HASHES));
    }

    #[test]
    fn remove_single_entry() {
        let mut table = SideTable::new();
        table.set(A, "x", 1u8);
        assert!(table.remove(A, "x"));
        assert!(!table.remove(A, "x"));
        assert!(table.is_empty());
    }
}
