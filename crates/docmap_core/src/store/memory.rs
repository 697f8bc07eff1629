//! In-memory document store.

use super::{DocumentStore, StoreFilter, Update, ID_FIELD};
use crate::error::{CoreError, CoreResult};
use crate::types::DocumentId;
use docmap_codec::{Map, Value};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use tracing::trace;

/// One round-trip recorded by [`MemoryStore`].
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOp {
    /// A batch insert.
    Insert {
        /// Target collection.
        collection: String,
        /// Number of documents.
        count: usize,
    },
    /// An update of one document.
    Update {
        /// Target collection.
        collection: String,
        /// Updated document.
        id: DocumentId,
        /// Applied changes.
        update: Update,
    },
    /// A batch removal.
    Remove {
        /// Target collection.
        collection: String,
        /// Removed ids.
        ids: Vec<DocumentId>,
    },
    /// A find.
    Find {
        /// Searched collection.
        collection: String,
        /// Applied filter.
        filter: StoreFilter,
        /// Requested projection.
        projection: Option<Vec<String>>,
    },
}

/// Document store keeping every collection in memory.
///
/// Documents keep insertion order. Every round-trip is recorded so callers
/// can assert how many reads and writes an operation needed.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Vec<Map>>>,
    log: Mutex<Vec<StoreOp>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every recorded round-trip.
    pub fn log(&self) -> Vec<StoreOp> {
        self.log.lock().clone()
    }

    /// Forgets the recorded round-trips.
    pub fn clear_log(&self) {
        self.log.lock().clear();
    }

    /// Number of recorded finds.
    pub fn find_count(&self) -> usize {
        self.log
            .lock()
            .iter()
            .filter(|op| matches!(op, StoreOp::Find { .. }))
            .count()
    }

    /// Number of documents in a collection.
    pub fn count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .get(collection)
            .map_or(0, Vec::len)
    }

    /// Returns a stored document as it is, bypassing the log.
    pub fn get(&self, collection: &str, id: DocumentId) -> Option<Map> {
        self.collections
            .read()
            .get(collection)
            .and_then(|docs| docs.iter().find(|d| id_of(d) == Some(id)).cloned())
    }

    fn record(&self, op: StoreOp) {
        self.log.lock().push(op);
    }
}

fn id_of(document: &Map) -> Option<DocumentId> {
    document.get(ID_FIELD).and_then(Value::as_id)
}

fn project(document: &Map, paths: &[String]) -> Map {
    let mut projected = Value::empty_map();
    let source = Value::Map(document.clone());
    if let Some(id) = document.get(ID_FIELD) {
        projected.set_path(ID_FIELD, id.clone());
    }
    for path in paths {
        if let Some(value) = source.get_path(path) {
            projected.set_path(path, value.clone());
        }
    }
    match projected {
        Value::Map(map) => map,
        _ => Map::new(),
    }
}

impl DocumentStore for MemoryStore {
    fn insert_many(&self, collection: &str, documents: Vec<Map>) -> CoreResult<()> {
        let mut collections = self.collections.write();
        let stored = collections.entry(collection.to_string()).or_default();
        for document in &documents {
            let id = id_of(document).ok_or_else(|| {
                CoreError::invalid_argument(format!("document without {ID_FIELD} for {collection}"))
            })?;
            if stored.iter().any(|d| id_of(d) == Some(id)) {
                return Err(CoreError::already_exists(format!("{collection}/{id}")));
            }
        }
        let count = documents.len();
        stored.extend(documents);
        drop(collections);

        trace!(collection, count, "memory store insert");
        self.record(StoreOp::Insert {
            collection: collection.to_string(),
            count,
        });
        Ok(())
    }

    fn update(&self, collection: &str, id: DocumentId, update: &Update) -> CoreResult<bool> {
        let found = {
            let mut collections = self.collections.write();
            match collections
                .get_mut(collection)
                .and_then(|docs| docs.iter_mut().find(|d| id_of(d) == Some(id)))
            {
                Some(document) => {
                    update.apply_to(document);
                    true
                }
                None => false,
            }
        };

        trace!(collection, %id, found, "memory store update");
        self.record(StoreOp::Update {
            collection: collection.to_string(),
            id,
            update: update.clone(),
        });
        Ok(found)
    }

    fn remove(&self, collection: &str, ids: &[DocumentId]) -> CoreResult<usize> {
        let removed = {
            let mut collections = self.collections.write();
            collections.get_mut(collection).map_or(0, |docs| {
                let before = docs.len();
                docs.retain(|d| id_of(d).map_or(true, |id| !ids.contains(&id)));
                before - docs.len()
            })
        };

        trace!(collection, removed, "memory store remove");
        self.record(StoreOp::Remove {
            collection: collection.to_string(),
            ids: ids.to_vec(),
        });
        Ok(removed)
    }

    fn find(
        &self,
        collection: &str,
        filter: &StoreFilter,
        projection: Option<&[String]>,
    ) -> CoreResult<Vec<Map>> {
        let found: Vec<Map> = {
            let collections = self.collections.read();
            let docs = collections.get(collection).map(Vec::as_slice).unwrap_or(&[]);
            let matching = docs.iter().filter(|d| filter.matches(d));
            match projection {
                Some(paths) => matching.map(|d| project(d, paths)).collect(),
                None => matching.cloned().collect(),
            }
        };

        trace!(collection, count = found.len(), "memory store find");
        self.record(StoreOp::Find {
            collection: collection.to_string(),
            filter: filter.clone(),
            projection: projection.map(<[String]>::to_vec),
        });
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(n: u64, title: &str) -> Map {
        let mut map = Map::new();
        map.insert(ID_FIELD.into(), Value::Id(DocumentId::from_u64(n)));
        map.insert("title".into(), Value::from(title));
        map.insert(
            "source".into(),
            Value::map([("name", Value::from("wire")), ("url", Value::from("u"))]),
        );
        map
    }

    #[test]
    fn insert_find_remove() {
        let store = MemoryStore::new();
        store
            .insert_many("articles", vec![doc(1, "a"), doc(2, "b")])
            .unwrap();
        assert_eq!(store.count("articles"), 2);

        let all = store.find("articles", &StoreFilter::All, None).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].get("title"), Some(&Value::from("a")));

        let removed = store
            .remove("articles", &[DocumentId::from_u64(1), DocumentId::from_u64(9)])
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.count("articles"), 1);
    }

    #[test]
    fn duplicate_insert_rejected() {
        let store = MemoryStore::new();
        store.insert_many("articles", vec![doc(1, "a")]).unwrap();
        let err = store.insert_many("articles", vec![doc(1, "a")]).unwrap_err();
        assert!(matches!(err, CoreError::AlreadyExists { .. }));
    }

    #[test]
    fn projection_keeps_id_and_paths() {
        let store = MemoryStore::new();
        store.insert_many("articles", vec![doc(1, "a")]).unwrap();
        let found = store
            .find_one(
                "articles",
                DocumentId::from_u64(1),
                Some(&["source.name".to_string()]),
            )
            .unwrap()
            .unwrap();
        assert!(found.contains_key(ID_FIELD));
        assert!(!found.contains_key("title"));
        assert_eq!(
            found.get("source"),
            Some(&Value::map([("name", Value::from("wire"))]))
        );
    }

    #[test]
    fn update_applies_changes() {
        let store = MemoryStore::new();
        store.insert_many("articles", vec![doc(1, "a")]).unwrap();
        let mut update = Update::new();
        update.set.insert("title".into(), Value::from("changed"));
        assert!(store
            .update("articles", DocumentId::from_u64(1), &update)
            .unwrap());
        assert!(!store
            .update("articles", DocumentId::from_u64(2), &update)
            .unwrap());
        let stored = store.get("articles", DocumentId::from_u64(1)).unwrap();
        assert_eq!(stored.get("title"), Some(&Value::from("changed")));
    }

    #[test]
    fn log_records_round_trips() {
        let store = MemoryStore::new();
        store.insert_many("articles", vec![doc(1, "a")]).unwrap();
        store.find("articles", &StoreFilter::All, None).unwrap();
        store.find("missing", &StoreFilter::All, None).unwrap();
        assert_eq!(store.find_count(), 2);
        assert_eq!(store.log().len(), 3);
        store.clear_log();
        assert!(store.log().is_empty());
    }
}
