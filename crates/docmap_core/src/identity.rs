//! Identity map: one in-memory instance per persisted document.

use crate::types::{DocumentId, EntityRef};
use std::collections::HashMap;

/// Maps `(collection, id)` to the instance loaded in this session.
#[derive(Debug, Default)]
pub struct IdentityMap {
    entries: HashMap<(String, DocumentId), EntityRef>,
}

impl IdentityMap {
    /// Creates an empty identity map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the instance registered for a document.
    #[must_use]
    pub fn get(&self, collection: &str, id: DocumentId) -> Option<EntityRef> {
        self.entries.get(&(collection.to_string(), id)).copied()
    }

    /// Returns true if the document is registered.
    #[must_use]
    pub fn contains(&self, collection: &str, id: DocumentId) -> bool {
        self.get(collection, id).is_some()
    }

    /// Registers an instance, returning the one it replaced.
    pub fn insert(
        &mut self,
        collection: &str,
        id: DocumentId,
        entity: EntityRef,
    ) -> Option<EntityRef> {
        self.entries.insert((collection.to_string(), id), entity)
    }

    /// Unregisters a document.
    pub fn remove(&mut self, collection: &str, id: DocumentId) -> Option<EntityRef> {
        self.entries.remove(&(collection.to_string(), id))
    }

    /// Number of registered documents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every registered `(collection, id, instance)` triple, in no
    /// particular order.
    pub fn all(&self) -> impl Iterator<Item = (&str, DocumentId, EntityRef)> + '_ {
        self.entries
            .iter()
            .map(|((collection, id), entity)| (collection.as_str(), *id, *entity))
    }

    /// Forgets every document.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
