//! Saving, deleting and lifecycle hooks.

use docmap_codec::Value;
use docmap_core::{
    CoreError, CoreResult, DocumentId, DocumentStore, EntityRef, LifecycleEvent, LifecycleHook,
    MemoryStore, SaveOptions, SaveQuery, Session, SessionConfig, StoreFilter, StoreOp, Update,
};
use docmap_testkit::prelude::*;
use docmap_testkit::scenarios::{self, ARTICLE, AUTHOR};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

fn stored_article(t: &mut TestSession) -> EntityRef {
    t.find_by_id("Article", doc_id(ARTICLE)).unwrap().unwrap()
}

fn map(json: serde_json::Value) -> docmap_codec::Map {
    match json_value(&json) {
        Value::Map(map) => map,
        other => panic!("expected an object, got {other:?}"),
    }
}

fn single_update(t: &TestSession) -> Update {
    let log = t.store.log();
    match log.as_slice() {
        [StoreOp::Update { update, .. }] => update.clone(),
        other => panic!("expected one update, got {other:?}"),
    }
}

/// Hook recording every event it sees.
#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<(LifecycleEvent, EntityRef)>>,
}

impl Recorder {
    fn events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().unwrap().iter().map(|(e, _)| *e).collect()
    }

    fn push(&self, event: LifecycleEvent, document: EntityRef) -> CoreResult<()> {
        self.events.lock().unwrap().push((event, document));
        Ok(())
    }
}

impl LifecycleHook for Recorder {
    fn pre_insert(&self, _session: &mut Session, document: EntityRef) -> CoreResult<()> {
        self.push(LifecycleEvent::PreInsert, document)
    }

    fn post_insert(&self, session: &mut Session, document: EntityRef) -> CoreResult<()> {
        // The id is already assigned.
        assert!(!session.is_new(document)?);
        self.push(LifecycleEvent::PostInsert, document)
    }

    fn pre_update(&self, _session: &mut Session, document: EntityRef) -> CoreResult<()> {
        self.push(LifecycleEvent::PreUpdate, document)
    }

    fn post_update(&self, _session: &mut Session, document: EntityRef) -> CoreResult<()> {
        self.push(LifecycleEvent::PostUpdate, document)
    }

    fn pre_delete(&self, _session: &mut Session, document: EntityRef) -> CoreResult<()> {
        self.push(LifecycleEvent::PreDelete, document)
    }

    fn post_delete(&self, _session: &mut Session, document: EntityRef) -> CoreResult<()> {
        self.push(LifecycleEvent::PostDelete, document)
    }
}

#[test]
fn inserts_are_batched_per_collection() {
    let mut h = IntegrationHarness::new();
    let first = h.t.create("Article").unwrap();
    let author = h.t.create("Author").unwrap();
    let second = h.t.create("Article").unwrap();
    h.t.save_all(&[first, author, second], SaveOptions::default())
        .unwrap();

    assert_eq!(
        h.t.store.log(),
        vec![
            StoreOp::Insert {
                collection: ARTICLES.to_string(),
                count: 2,
            },
            StoreOp::Insert {
                collection: AUTHORS.to_string(),
                count: 1,
            },
        ]
    );
    for document in [first, author, second] {
        assert!(!h.t.is_new(document).unwrap());
        assert!(!h.t.is_modified(document).unwrap());
        let class = h.t.class_of(document).unwrap();
        let id = h.t.id(document).unwrap().unwrap();
        assert_eq!(
            h.t.identity_map().get(class.collection_name().unwrap(), id),
            Some(document)
        );
    }
}

#[test]
fn repeated_document_is_saved_once() {
    let mut h = IntegrationHarness::new();
    let article = h.t.create("Article").unwrap();
    h.t.save_all(&[article, article], SaveOptions::default())
        .unwrap();
    assert_eq!(h.inserts(), 1);
    assert_eq!(h.t.store.count(ARTICLES), 1);
}

#[test]
fn new_document_is_inserted_with_embedded_documents() {
    let mut h = IntegrationHarness::new();
    let article = h.t.create("Article").unwrap();
    h.t.set_field(article, "title", "hello").unwrap();
    h.t.set_field(article, "views", 1).unwrap();
    let source = h.t.create("Source").unwrap();
    h.t.set_field(source, "name", "wire").unwrap();
    let info = h.t.create("Info").unwrap();
    h.t.set_field(info, "note", "n").unwrap();
    h.t.set_embedded_one(source, "info", Some(info)).unwrap();
    h.t.set_embedded_one(article, "source", Some(source)).unwrap();

    assert_eq!(
        h.t.query_for_save(article).unwrap(),
        SaveQuery::Insert(map(json!({
            "title": "hello",
            "is_active": true,
            "nb_views": 1,
            "source": {"name": "wire", "info": {"note": "n"}}
        })))
    );
    h.save(article);
    assert_eq!(
        without_id(h.stored(article)),
        map(json!({
            "title": "hello",
            "is_active": true,
            "nb_views": 1,
            "source": {"name": "wire", "info": {"note": "n"}}
        }))
    );
    assert!(!h.t.is_modified(info).unwrap());
    h.verify_fields(article);
}

#[test]
fn update_writes_only_modified_fields() {
    let mut h = IntegrationHarness::from_session(scenarios::blog());
    let article = stored_article(&mut h.t);
    h.t.set_field(article, "title", "New title").unwrap();
    h.t.set_field(article, "views", 8).unwrap();
    h.t.set_field(article, "content", Value::Null).unwrap();

    let Ok(SaveQuery::Update(planned)) = h.t.query_for_save(article) else {
        panic!("expected an update");
    };
    h.t.store.clear_log();
    h.save(article);
    let update = single_update(&h.t);
    assert_eq!(update, planned);
    assert_eq!(
        update.set,
        BTreeMap::from([
            ("nb_views".to_string(), Value::Integer(8)),
            ("title".to_string(), Value::from("New title")),
        ])
    );
    assert_eq!(update.unset, BTreeSet::from(["content".to_string()]));
    assert!(update.pull_all.is_empty() && update.push_all.is_empty());

    let stored = h.stored(article);
    assert_eq!(stored.get("title"), Some(&Value::from("New title")));
    assert!(stored.get("content").is_none());
    h.verify_fields(article);
}

#[test]
fn unmodified_document_is_not_written() {
    let mut h = IntegrationHarness::from_session(scenarios::blog());
    let article = stored_article(&mut h.t);
    h.t.get_field(article, "title").unwrap();
    h.t.store.clear_log();
    h.save(article);
    assert!(h.t.store.log().is_empty());
    assert_eq!(
        h.t.query_for_save(article).unwrap(),
        SaveQuery::Update(Update::new())
    );
}

#[test]
fn replaced_embedded_one_is_set_whole() {
    let mut h = IntegrationHarness::from_session(scenarios::blog());
    let article = stored_article(&mut h.t);
    let source = h.t.create("Source").unwrap();
    h.t.set_embedded_one(article, "source", Some(source)).unwrap();
    // Fields set after attaching are part of the replacement.
    h.t.set_field(source, "name", "other").unwrap();
    h.t.store.clear_log();
    h.save(article);

    let update = single_update(&h.t);
    assert_eq!(
        update.set.get("source"),
        Some(&Value::map([("name", Value::from("other"))]))
    );
    assert_eq!(update.set.len(), 1);
    assert_eq!(
        h.stored(article).get("source"),
        Some(&Value::map([("name", Value::from("other"))]))
    );
    assert!(!h.t.is_embedded_one_changed(article, "source").unwrap());
}

#[test]
fn cleared_embedded_one_is_unset() {
    let mut h = IntegrationHarness::from_session(scenarios::blog());
    let article = stored_article(&mut h.t);
    h.t.set_embedded_one(article, "source", None).unwrap();
    h.t.store.clear_log();
    h.save(article);

    let update = single_update(&h.t);
    assert_eq!(update.unset, BTreeSet::from(["source".to_string()]));
    assert!(h.stored(article).get("source").is_none());
}

#[test]
fn nested_embedded_field_is_set_by_path() {
    let mut h = IntegrationHarness::from_session(scenarios::blog());
    let article = stored_article(&mut h.t);
    let source = h.t.embedded_one(article, "source").unwrap().unwrap();
    let info = h.t.embedded_one(source, "info").unwrap().unwrap();
    h.t.set_field(source, "name", "agency").unwrap();
    h.t.set_field(info, "note", "checked").unwrap();
    h.t.store.clear_log();
    h.save(article);

    let update = single_update(&h.t);
    assert_eq!(
        update.set,
        BTreeMap::from([
            ("source.info.note".to_string(), Value::from("checked")),
            ("source.name".to_string(), Value::from("agency")),
        ])
    );
    let stored = Value::Map(h.stored(article));
    assert_eq!(stored.get_path("source.url"), Some(&Value::from("https://example.com")));
    assert!(!h.t.is_modified(info).unwrap());
}

#[test]
fn defaults_are_clean_after_insert() {
    let mut h = IntegrationHarness::new();
    let article = h.t.create("Article").unwrap();
    h.save(article);
    assert!(!h.t.is_field_modified(article, "is_active").unwrap());
    assert_eq!(h.t.get_field(article, "is_active").unwrap(), Value::Bool(true));

    h.t.set_field(article, "is_active", false).unwrap();
    h.t.store.clear_log();
    h.save(article);
    assert_eq!(
        single_update(&h.t).set.get("is_active"),
        Some(&Value::Bool(false))
    );
}

#[test]
fn sequence_generator_assigns_counting_ids() {
    let mut t = TestSession::with_config(SessionConfig::default().id_generator("sequence"));
    let first = t.create("Article").unwrap();
    let second = t.create("Author").unwrap();
    t.save_all(&[first, second], SaveOptions::default()).unwrap();
    assert_eq!(t.id(first).unwrap(), Some(doc_id(1)));
    assert_eq!(t.id(second).unwrap(), Some(doc_id(2)));
    assert!(t.store.get(AUTHORS, doc_id(2)).is_some());
}

#[test]
fn unknown_id_generator_fails_at_build() {
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
    let result = Session::builder(blog_metadata(), store)
        .config(SessionConfig::default().id_generator("nope"))
        .build();
    assert!(matches!(result, Err(CoreError::NotFound { .. })));
}

#[test]
fn delete_makes_document_new_again() {
    let mut t = scenarios::blog();
    let query = docmap_core::Query::new("Article");
    let article = t.execute(&query).unwrap()[0];
    t.store.clear_log();

    t.delete(article).unwrap();
    assert_eq!(
        t.store.log(),
        vec![StoreOp::Remove {
            collection: ARTICLES.to_string(),
            ids: vec![doc_id(ARTICLE)],
        }]
    );
    assert_eq!(t.store.count(ARTICLES), 0);
    assert!(t.is_new(article).unwrap());
    assert!(t.query_hashes(article).unwrap().is_empty());
    assert!(!t.identity_map().contains(ARTICLES, doc_id(ARTICLE)));
    assert!(t.find_by_id("Article", doc_id(ARTICLE)).unwrap().is_none());
}

#[test]
fn delete_all_removes_per_collection() {
    let mut t = scenarios::articles(3);
    let found = t.execute(&docmap_core::Query::new("Article")).unwrap();
    let fresh = t.create("Article").unwrap();
    t.store.clear_log();

    t.delete_all(&[found[0], fresh, found[2]]).unwrap();
    assert_eq!(
        t.store.log(),
        vec![StoreOp::Remove {
            collection: ARTICLES.to_string(),
            ids: vec![doc_id(1), doc_id(3)],
        }]
    );
    assert_eq!(t.store.count(ARTICLES), 1);
    assert!(!t.is_new(found[1]).unwrap());
}

/// Store whose removals always fail.
struct RejectingRemoveStore(Arc<MemoryStore>);

impl DocumentStore for RejectingRemoveStore {
    fn insert_many(&self, collection: &str, documents: Vec<docmap_codec::Map>) -> CoreResult<()> {
        self.0.insert_many(collection, documents)
    }

    fn update(&self, collection: &str, id: DocumentId, update: &Update) -> CoreResult<bool> {
        self.0.update(collection, id, update)
    }

    fn remove(&self, _collection: &str, _ids: &[DocumentId]) -> CoreResult<usize> {
        Err(CoreError::invalid_state("store is read-only"))
    }

    fn find(
        &self,
        collection: &str,
        filter: &StoreFilter,
        projection: Option<&[String]>,
    ) -> CoreResult<Vec<docmap_codec::Map>> {
        self.0.find(collection, filter, projection)
    }
}

#[test]
fn failed_delete_keeps_document_persisted() {
    let seeded = scenarios::blog();
    let store = Arc::new(RejectingRemoveStore(Arc::clone(&seeded.store)));
    let mut session = Session::builder(blog_metadata(), store as Arc<dyn DocumentStore>)
        .build()
        .unwrap();
    let article = session
        .find_by_id("Article", doc_id(ARTICLE))
        .unwrap()
        .unwrap();

    assert!(session.delete(article).is_err());
    assert!(!session.is_new(article).unwrap());
    assert_eq!(session.id(article).unwrap(), Some(doc_id(ARTICLE)));
    assert!(session.identity_map().contains(ARTICLES, doc_id(ARTICLE)));
    assert_eq!(seeded.store.count(ARTICLES), 1);
}

#[test]
fn hooks_fire_around_each_write() {
    let mut t = TestSession::new();
    let recorder = Arc::new(Recorder::default());
    t.add_hook("Article", Arc::clone(&recorder) as Arc<dyn LifecycleHook>)
        .unwrap();

    let article = t.create("Article").unwrap();
    t.save(article, SaveOptions::default()).unwrap();
    t.save(article, SaveOptions::default()).unwrap();
    t.set_field(article, "title", "changed").unwrap();
    t.save(article, SaveOptions::default()).unwrap();
    t.delete(article).unwrap();

    assert_eq!(
        recorder.events(),
        vec![
            LifecycleEvent::PreInsert,
            LifecycleEvent::PostInsert,
            LifecycleEvent::PreUpdate,
            LifecycleEvent::PostUpdate,
            LifecycleEvent::PreDelete,
            LifecycleEvent::PostDelete,
        ]
    );
    assert!(recorder
        .events
        .lock()
        .unwrap()
        .iter()
        .all(|(_, document)| *document == article));
}

#[test]
fn hooks_on_base_class_fire_for_subclasses() {
    let mut t = TestSession::new();
    let recorder = Arc::new(Recorder::default());
    t.add_hook("Element", Arc::clone(&recorder) as Arc<dyn LifecycleHook>)
        .unwrap();
    let text = t.create("TextElement").unwrap();
    let article = t.create("Article").unwrap();
    t.save_all(&[text, article], SaveOptions::default()).unwrap();

    assert_eq!(
        recorder.events(),
        vec![LifecycleEvent::PreInsert, LifecycleEvent::PostInsert]
    );
    assert!(matches!(
        t.add_hook("Missing", recorder),
        Err(CoreError::UnknownClass { .. })
    ));
}

struct Stamp;

impl LifecycleHook for Stamp {
    fn pre_insert(&self, session: &mut Session, document: EntityRef) -> CoreResult<()> {
        session.set_field(document, "note", "stamped")
    }
}

#[test]
fn pre_insert_changes_are_written() {
    let mut h = IntegrationHarness::new();
    h.t.add_hook("Article", Arc::new(Stamp)).unwrap();
    let article = h.t.create("Article").unwrap();
    h.save(article);
    assert_eq!(h.stored(article).get("note"), Some(&Value::from("stamped")));
}

struct Veto;

impl LifecycleHook for Veto {
    fn pre_update(&self, _session: &mut Session, document: EntityRef) -> CoreResult<()> {
        Err(CoreError::invalid_state(format!("{document} is read-only")))
    }
}

#[test]
fn failing_hook_aborts_the_write() {
    let mut t = scenarios::blog();
    t.add_hook("Article", Arc::new(Veto)).unwrap();
    let article = stored_article(&mut t);
    t.set_field(article, "title", "blocked").unwrap();
    t.store.clear_log();

    let err = t.save(article, SaveOptions::default()).unwrap_err();
    assert!(matches!(err, CoreError::InvalidState { .. }));
    assert!(t.store.log().is_empty());
    assert!(t.is_field_modified(article, "title").unwrap());
    assert_eq!(
        t.store.get(ARTICLES, doc_id(ARTICLE)).unwrap().get("title"),
        Some(&Value::from("Stored title"))
    );
}

#[test]
fn new_reference_target_is_saved_first() {
    let mut h = IntegrationHarness::new();
    let author = h.t.create("Author").unwrap();
    h.t.set_field(author, "name", "Ada").unwrap();
    let article = h.t.create("Article").unwrap();
    h.t.set_reference_one(article, "author", Some(author)).unwrap();
    h.save(article);

    assert_eq!(
        h.t.store.log(),
        vec![
            StoreOp::Insert {
                collection: AUTHORS.to_string(),
                count: 1,
            },
            StoreOp::Insert {
                collection: ARTICLES.to_string(),
                count: 1,
            },
        ]
    );
    let author_id = h.t.id(author).unwrap().unwrap();
    assert_eq!(h.stored(article).get("author_id"), Some(&Value::Id(author_id)));
    assert!(!h.t.is_field_modified(article, "author_id").unwrap());
}

#[test]
fn modified_reference_target_is_updated() {
    let mut h = IntegrationHarness::from_session(scenarios::blog());
    let article = stored_article(&mut h.t);
    let author = h.t.reference_one(article, "author").unwrap().unwrap();
    h.t.set_field(author, "email", "ada@lovelace.org").unwrap();
    h.t.store.clear_log();
    h.save(article);

    assert_eq!(h.updates(), 1);
    assert_eq!(
        h.t.store.get(AUTHORS, doc_id(AUTHOR)).unwrap().get("email"),
        Some(&Value::from("ada@lovelace.org"))
    );
    assert!(!h.t.is_modified(author).unwrap());
}

#[test]
fn references_can_be_left_unsaved() {
    let mut t = TestSession::new();
    let author = t.create("Author").unwrap();
    let article = t.create("Article").unwrap();
    t.set_reference_one(article, "author", Some(author)).unwrap();
    t.save(article, SaveOptions::new().save_references(false))
        .unwrap();

    assert!(t.is_new(author).unwrap());
    assert_eq!(t.store.count(AUTHORS), 0);
    let id = t.id(article).unwrap().unwrap();
    assert!(t.store.get(ARTICLES, id).unwrap().get("author_id").is_none());

    // Saving the author later and the article again fills the raw field.
    t.save(author, SaveOptions::default()).unwrap();
    t.save(article, SaveOptions::default()).unwrap();
    assert_eq!(
        t.store.get(ARTICLES, id).unwrap().get("author_id"),
        Some(&Value::Id(t.id(author).unwrap().unwrap()))
    );
}

#[test]
fn reassigning_a_reference_changes_the_raw_field() {
    let mut t = scenarios::blog();
    let article = stored_article(&mut t);
    assert_eq!(
        t.get_field(article, "author_id").unwrap(),
        Value::Id(doc_id(AUTHOR))
    );
    t.set_reference_one(article, "author", None).unwrap();
    assert_eq!(t.get_field(article, "author_id").unwrap(), Value::Null);
    assert_eq!(t.reference_one(article, "author").unwrap(), None);
    t.save(article, SaveOptions::default()).unwrap();
    assert!(t
        .store
        .get(ARTICLES, doc_id(ARTICLE))
        .unwrap()
        .get("author_id")
        .is_none());

    // Writing the raw field drops the stale resolution.
    t.set_field(article, "author_id", doc_id(AUTHOR)).unwrap();
    let author = t.reference_one(article, "author").unwrap().unwrap();
    assert_eq!(t.id(author).unwrap(), Some(doc_id(AUTHOR)));
}
