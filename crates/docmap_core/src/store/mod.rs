//! Document store abstraction.
//!
//! The session never talks to a database directly. Everything it reads or
//! writes goes through a [`DocumentStore`]: batched inserts, per-document
//! updates, batched removals and filtered finds with optional projections.

mod memory;

pub use memory::{MemoryStore, StoreOp};

use crate::error::CoreResult;
use crate::types::DocumentId;
use docmap_codec::{Map, Value};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Key holding the id of every stored root document.
pub const ID_FIELD: &str = "_id";

/// Filter understood by a document store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum StoreFilter {
    /// Every document of the collection.
    All,
    /// Documents whose id is in the list.
    IdIn(Vec<DocumentId>),
    /// Documents whose value at a dotted path equals the value.
    Eq(String, Value),
    /// Documents matching every filter.
    And(Vec<StoreFilter>),
}

impl StoreFilter {
    /// Returns true if the document matches.
    #[must_use]
    pub fn matches(&self, document: &Map) -> bool {
        match self {
            StoreFilter::All => true,
            StoreFilter::IdIn(ids) => document
                .get(ID_FIELD)
                .and_then(Value::as_id)
                .is_some_and(|id| ids.contains(&id)),
            StoreFilter::Eq(path, expected) => {
                let (head, rest) = path.split_once('.').unwrap_or((path.as_str(), ""));
                let found = document.get(head).and_then(|v| {
                    if rest.is_empty() {
                        Some(v)
                    } else {
                        v.get_path(rest)
                    }
                });
                found == Some(expected)
            }
            StoreFilter::And(filters) => filters.iter().all(|f| f.matches(document)),
        }
    }
}

/// Changes applied to one stored document.
///
/// Operations are applied in the order `set`, `unset`, `pull_all`,
/// `push_all`. Keys are dotted paths from the document root.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    /// Values to assign.
    pub set: BTreeMap<String, Value>,
    /// Keys to remove.
    pub unset: BTreeSet<String>,
    /// Elements to remove from arrays.
    pub pull_all: BTreeMap<String, Vec<Value>>,
    /// Elements to append to arrays.
    pub push_all: BTreeMap<String, Vec<Value>>,
}

impl Update {
    /// Creates an empty update.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the update changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
            && self.unset.is_empty()
            && self.pull_all.is_empty()
            && self.push_all.is_empty()
    }

    /// Merges the operations of another update.
    pub fn merge(&mut self, other: Update) {
        self.set.extend(other.set);
        self.unset.extend(other.unset);
        for (path, values) in other.pull_all {
            self.pull_all.entry(path).or_default().extend(values);
        }
        for (path, values) in other.push_all {
            self.push_all.entry(path).or_default().extend(values);
        }
    }

    /// Applies the update to a document.
    pub fn apply_to(&self, document: &mut Map) {
        let mut root = Value::Map(std::mem::take(document));
        for (path, value) in &self.set {
            root.set_path(path, value.clone());
        }
        for path in &self.unset {
            root.remove_path(path);
        }
        for (path, values) in &self.pull_all {
            if let Some(Value::Array(items)) = root.get_path_mut(path) {
                items.retain(|item| !values.contains(item));
            }
        }
        for (path, values) in &self.push_all {
            match root.get_path_mut(path) {
                Some(Value::Array(items)) => items.extend(values.iter().cloned()),
                _ => {
                    root.set_path(path, Value::Array(values.clone()));
                }
            }
        }
        if let Value::Map(map) = root {
            *document = map;
        }
    }
}

/// Persistence backend for documents.
///
/// Implementations must be safe to share between sessions.
pub trait DocumentStore: Send + Sync {
    /// Inserts documents into a collection. Every document carries `_id`.
    fn insert_many(&self, collection: &str, documents: Vec<Map>) -> CoreResult<()>;

    /// Applies an update to one document, returning whether it existed.
    fn update(&self, collection: &str, id: DocumentId, update: &Update) -> CoreResult<bool>;

    /// Removes documents by id, returning how many existed.
    fn remove(&self, collection: &str, ids: &[DocumentId]) -> CoreResult<usize>;

    /// Finds documents. A projection limits the returned keys to the listed
    /// dotted paths plus `_id`.
    fn find(
        &self,
        collection: &str,
        filter: &StoreFilter,
        projection: Option<&[String]>,
    ) -> CoreResult<Vec<Map>>;

    /// Finds one document by id.
    fn find_one(
        &self,
        collection: &str,
        id: DocumentId,
        projection: Option<&[String]>,
    ) -> CoreResult<Option<Map>> {
        Ok(self
            .find(collection, &StoreFilter::IdIn(vec![id]), projection)?
            .into_iter()
            .next())
    }
}
