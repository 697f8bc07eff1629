//! The field cache over every cache backend.

use docmap_codec::Value;
use docmap_core::{
    CoreError, DocumentStore, MemoryStore, Query, Session, StoreFilter, StoreOp,
};
use docmap_storage::{Cache, EagerCache, FileCache, InMemoryCache};
use docmap_testkit::init_tracing;
use docmap_testkit::prelude::*;
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

fn seeded_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store
        .insert_many(
            ARTICLES,
            (1..=3)
                .map(|i| record(i, json!({"title": format!("article {i}"), "content": "body"})))
                .collect(),
        )
        .unwrap();
    store.clear_log();
    store
}

fn open(store: &Arc<MemoryStore>, cache: Arc<dyn Cache>) -> Session {
    init_tracing();
    Session::builder(blog_metadata(), Arc::clone(store) as Arc<dyn DocumentStore>)
        .cache(cache)
        .build()
        .unwrap()
}

/// Records a field in one session and checks that a later session, built
/// by `reopen`, projects the query on it.
fn projection_survives(first: Arc<dyn Cache>, reopen: impl FnOnce() -> Arc<dyn Cache>) {
    let store = seeded_store();
    let query = Query::new("Article");

    let mut session = open(&store, first);
    let found = session.execute(&query).unwrap();
    session.add_field_cache(found[0], "title").unwrap();
    let hash = session.query_hash(&query).unwrap();
    drop(session);

    let mut session = open(&store, reopen());
    store.clear_log();
    let found = session.execute(&query).unwrap();
    assert_eq!(found.len(), 3);
    assert_eq!(
        store.log(),
        vec![StoreOp::Find {
            collection: ARTICLES.to_string(),
            filter: StoreFilter::All,
            projection: Some(vec!["title".to_string()]),
        }]
    );

    // Lazy reads extend the entry for the next session.
    assert_eq!(
        session.get_field(found[2], "content").unwrap(),
        Value::from("body")
    );
    let entry = session.cache().get(&hash).unwrap().unwrap();
    assert_eq!(
        entry.get("fields"),
        Some(&Value::map([
            ("content", Value::Integer(1)),
            ("title", Value::Integer(1)),
        ]))
    );
}

#[test]
fn in_memory_cache_is_shared_between_sessions() {
    let cache: Arc<dyn Cache> = Arc::new(InMemoryCache::new());
    let shared = Arc::clone(&cache);
    projection_survives(cache, move || shared);
}

#[test]
fn file_cache_survives_reopening() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("fields");
    let first: Arc<dyn Cache> = Arc::new(FileCache::open(&path).unwrap());
    projection_survives(first, || -> Arc<dyn Cache> {
        Arc::new(FileCache::open(&path).unwrap())
    });
}

#[test]
fn eager_cache_over_file_cache() {
    let dir = TempDir::new().unwrap();
    let first: Arc<dyn Cache> = Arc::new(EagerCache::new(FileCache::open(dir.path()).unwrap()));
    let probe = Arc::new(EagerCache::new(FileCache::open(dir.path()).unwrap()));
    let second: Arc<dyn Cache> = Arc::clone(&probe) as Arc<dyn Cache>;
    projection_survives(first, move || second);

    // One entry, read once from disk and then served from memory.
    assert_eq!(probe.shadowed(), 1);
    let files = std::fs::read_dir(probe.delegate().dir()).unwrap().count();
    assert_eq!(files, 1);
}

#[test]
fn cache_failure_is_reported() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cache");
    let cache = Arc::new(FileCache::open(&path).unwrap());
    let store = seeded_store();
    let mut session = open(&store, cache);
    let found = session.execute(&Query::new("Article")).unwrap();

    std::fs::remove_dir_all(&path).unwrap();
    std::fs::write(&path, b"not a directory").unwrap();
    let err = session.add_field_cache(found[0], "title").unwrap_err();
    assert!(matches!(err, CoreError::Storage(_)));
}
