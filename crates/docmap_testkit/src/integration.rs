//! Cross-crate integration test helpers.
//!
//! Provides a harness that saves documents through a session and checks
//! the outcome against the store and against a fresh session.

use crate::fixtures::TestSession;
use docmap_codec::{Map, Value};
use docmap_core::{EntityRef, SaveOptions, Session, StoreOp, ID_FIELD};

/// A test harness for save round-trips.
pub struct IntegrationHarness {
    /// The session under test, with its store and cache.
    pub t: TestSession,
}

impl IntegrationHarness {
    /// Creates a harness over an empty blog store.
    pub fn new() -> Self {
        Self {
            t: TestSession::new(),
        }
    }

    /// Wraps an existing test session.
    pub fn from_session(t: TestSession) -> Self {
        Self { t }
    }

    /// Saves a document and checks it ends up clean and persisted.
    pub fn save(&mut self, document: EntityRef) {
        self.t
            .save(document, SaveOptions::default())
            .expect("Failed to save document");
        assert!(!self.t.is_new(document).expect("not a document"));
        assert!(
            !self.t.is_modified(document).expect("disposed document"),
            "{document} is still modified after save"
        );
    }

    /// Raw stored record of a persisted document.
    pub fn stored(&self, document: EntityRef) -> Map {
        let class = self.t.class_of(document).expect("disposed document");
        let collection = class.collection_name().expect("not a document");
        let id = self
            .t
            .id(document)
            .expect("not a document")
            .expect("document is new");
        self.t
            .store
            .get(collection, id)
            .expect("document missing from the store")
    }

    /// Loads the document in a fresh session and asserts that every field
    /// it has loaded here matches the stored state.
    pub fn verify_fields(&mut self, document: EntityRef) {
        let mut fresh = self.t.reopen();
        let class = self.t.class_of(document).expect("disposed document");
        let id = self
            .t
            .id(document)
            .expect("not a document")
            .expect("document is new");
        let reloaded = fresh
            .find_by_id(&class.name, id)
            .expect("Failed to reload")
            .expect("document missing from the store");

        let expected = section(&mut self.t, document, "fields");
        let actual = section(&mut fresh, reloaded, "fields");
        for (name, value) in &expected {
            let found = actual.get(name).cloned().unwrap_or(Value::Null);
            assert_eq!(&found, value, "field {name} of {document} after reload");
        }
    }

    /// Number of recorded store operations matching the predicate.
    pub fn count_ops(&self, predicate: impl Fn(&StoreOp) -> bool) -> usize {
        self.t.store.log().iter().filter(|op| predicate(op)).count()
    }

    /// Number of recorded inserts.
    pub fn inserts(&self) -> usize {
        self.count_ops(|op| matches!(op, StoreOp::Insert { .. }))
    }

    /// Number of recorded updates.
    pub fn updates(&self) -> usize {
        self.count_ops(|op| matches!(op, StoreOp::Update { .. }))
    }

    /// Number of recorded finds.
    pub fn finds(&self) -> usize {
        self.t.store.find_count()
    }
}

impl Default for IntegrationHarness {
    fn default() -> Self {
        Self::new()
    }
}

fn section(session: &mut Session, entity: EntityRef, name: &str) -> Map {
    session
        .debug(entity)
        .expect("Failed to dump entity")
        .get(name)
        .and_then(Value::as_map)
        .cloned()
        .unwrap_or_default()
}

/// Stored record without its `_id`, for comparing with expected literals.
pub fn without_id(mut record: Map) -> Map {
    record.remove(ID_FIELD);
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{json_value, ARTICLES};
    use serde_json::json;

    #[test]
    fn test_save_and_verify() {
        let mut h = IntegrationHarness::new();
        let article = h.t.create("Article").unwrap();
        h.t.set_field(article, "title", "hello").unwrap();
        h.t.set_field(article, "views", 3).unwrap();
        h.save(article);

        let Value::Map(expected) =
            json_value(&json!({"title": "hello", "is_active": true, "nb_views": 3}))
        else {
            unreachable!()
        };
        assert_eq!(without_id(h.stored(article)), expected);
        assert_eq!(h.inserts(), 1);
        assert_eq!(h.t.store.count(ARTICLES), 1);
        h.verify_fields(article);
    }

    #[test]
    fn test_unmodified_save_writes_nothing() {
        let mut h = IntegrationHarness::new();
        let article = h.t.create("Article").unwrap();
        h.save(article);
        h.t.store.clear_log();
        h.save(article);
        assert!(h.t.store.log().is_empty());
    }
}
