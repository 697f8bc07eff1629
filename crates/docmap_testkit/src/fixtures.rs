//! Test fixtures and session helpers.
//!
//! Provides the blog schema used across the test suites, sessions sharing
//! one in-memory store and cache, and builders for raw stored records.

use docmap_codec::{Map, ObjectId, Value};
use docmap_core::{
    ClassMetadata, CoreResult, DocumentStore, FieldMeta, MemoryStore, MetadataRegistry,
    Polymorphism, Session, SessionConfig,
};
use docmap_storage::InMemoryCache;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Collection of `Article` documents.
pub const ARTICLES: &str = "articles";
/// Collection of `Author` documents.
pub const AUTHORS: &str = "authors";
/// Collection of `Category` documents.
pub const CATEGORIES: &str = "categories";
/// Collection shared by the `Element` hierarchy.
pub const ELEMENTS: &str = "elements";

fn build_blog_metadata() -> CoreResult<MetadataRegistry> {
    let elements = Polymorphism {
        discriminator_field: "type".to_string(),
        discriminator_map: Some(BTreeMap::from([
            ("element".to_string(), "Element".to_string()),
            ("text".to_string(), "TextElement".to_string()),
            ("image".to_string(), "ImageElement".to_string()),
        ])),
    };

    MetadataRegistry::new()
        .with(
            ClassMetadata::document("Author", AUTHORS)
                .field("name", "string")
                .field("email", "string"),
        )?
        .with(ClassMetadata::document("Category", CATEGORIES).field("name", "string"))?
        .with(
            ClassMetadata::document("Element", ELEMENTS)
                .field("label", "string")
                .discriminator("type"),
        )?
        .with(
            ClassMetadata::document("TextElement", ELEMENTS)
                .field("body", "string")
                .extends("Element", "text"),
        )?
        .with(
            ClassMetadata::document("ImageElement", ELEMENTS)
                .field("src", "string")
                .extends("Element", "image"),
        )?
        .with(ClassMetadata::embedded("Info").field("note", "string"))?
        .with(
            ClassMetadata::embedded("Source")
                .field("name", "string")
                .field("url", "string")
                .embedded_one("info", "Info"),
        )?
        .with(ClassMetadata::embedded("CommentAuthor").field("name", "string"))?
        .with(
            ClassMetadata::embedded("Comment")
                .field("name", "string")
                .field("text", "string")
                .embedded_one("author", "CommentAuthor"),
        )?
        .with(
            ClassMetadata::document("Article", ARTICLES)
                .field("title", "string")
                .field("content", "string")
                .field("note", "string")
                .field_with(FieldMeta::new("is_active", "boolean").default_value(true))
                .field_with(FieldMeta::new("views", "integer").db_name("nb_views"))
                .field("published_at", "date")
                .embedded_one("source", "Source")
                .embedded_many("comments", "Comment")
                .reference_one("author", "Author", "author_id")
                .reference_many("categories", "Category", "category_ids")
                .polymorphic_reference_many("elements", "Element", "element_refs", elements),
        )
}

/// The blog schema.
///
/// - `Article` (`articles`): fields `title`, `content`, `note`, `is_active`
///   (default `true`), `views` (stored as `nb_views`) and `published_at`;
///   embedded `source` and `comments`; references `author`, `categories`
///   and the polymorphic `elements`.
/// - `Author`, `Category`: plain documents.
/// - `Element` with subclasses `TextElement` and `ImageElement`, sharing
///   the `elements` collection through the `type` discriminator.
/// - Embedded `Source` (with embedded `Info`), `Comment` (with embedded
///   `CommentAuthor`).
pub fn blog_metadata() -> Arc<MetadataRegistry> {
    Arc::new(build_blog_metadata().expect("blog schema is valid"))
}

/// A session over the blog schema with its store and cache exposed.
///
/// Dereferences to the [`Session`].
pub struct TestSession {
    /// The session.
    pub session: Session,
    /// Store shared by every session opened from this one.
    pub store: Arc<MemoryStore>,
    /// Query cache shared by every session opened from this one.
    pub cache: Arc<InMemoryCache>,
    metadata: Arc<MetadataRegistry>,
}

impl TestSession {
    /// Creates a session with default configuration.
    pub fn new() -> Self {
        Self::with_config(SessionConfig::default())
    }

    /// Creates a session with the given configuration.
    pub fn with_config(config: SessionConfig) -> Self {
        crate::init_tracing();
        let metadata = blog_metadata();
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(InMemoryCache::new());
        let session = open_session(&metadata, &store, &cache, config);
        Self {
            session,
            store,
            cache,
            metadata,
        }
    }

    /// Opens another session over the same store, cache and schema.
    pub fn reopen(&self) -> Session {
        open_session(
            &self.metadata,
            &self.store,
            &self.cache,
            self.session.config().clone(),
        )
    }

    /// Replaces the session with a fresh one over the same store and cache,
    /// dropping every loaded entity.
    pub fn restart(&mut self) {
        self.session = self.reopen();
    }

    /// Inserts raw records straight into the store.
    pub fn seed(&self, collection: &str, records: Vec<Map>) {
        self.store
            .insert_many(collection, records)
            .expect("Failed to seed records");
        self.store.clear_log();
    }
}

impl Default for TestSession {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestSession {
    type Target = Session;

    fn deref(&self) -> &Self::Target {
        &self.session
    }
}

impl std::ops::DerefMut for TestSession {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.session
    }
}

fn open_session(
    metadata: &Arc<MetadataRegistry>,
    store: &Arc<MemoryStore>,
    cache: &Arc<InMemoryCache>,
    config: SessionConfig,
) -> Session {
    Session::builder(Arc::clone(metadata), Arc::clone(store) as Arc<dyn DocumentStore>)
        .config(config)
        .cache(Arc::clone(cache) as Arc<dyn docmap_storage::Cache>)
        .build()
        .expect("Failed to open session")
}

/// Runs a test with a fresh blog session.
///
/// # Example
///
/// ```rust
/// use docmap_testkit::with_session;
///
/// with_session(|t| {
///     let article = t.create("Article").unwrap();
///     assert!(t.is_new(article).unwrap());
/// });
/// ```
pub fn with_session<F, R>(f: F) -> R
where
    F: FnOnce(&mut TestSession) -> R,
{
    let mut t = TestSession::new();
    f(&mut t)
}

/// Deterministic document id for seeded records.
#[must_use]
pub const fn doc_id(n: u64) -> ObjectId {
    ObjectId::from_u64(n)
}

/// Converts a JSON literal to a document value.
///
/// Integral numbers become integers, other numbers floats.
pub fn json_value(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Integer(i),
            None => n.as_f64().map_or(Value::Null, Value::Float),
        },
        serde_json::Value::String(s) => Value::Text(s.clone()),
        serde_json::Value::Array(items) => Value::Array(items.iter().map(json_value).collect()),
        serde_json::Value::Object(entries) => Value::Map(
            entries
                .iter()
                .map(|(k, v)| (k.clone(), json_value(v)))
                .collect(),
        ),
    }
}

/// A raw stored record with `_id` set to [`doc_id`]`(id)`.
///
/// Panics if `json` is not an object.
pub fn record(id: u64, json: serde_json::Value) -> Map {
    let Value::Map(mut map) = json_value(&json) else {
        panic!("record literal must be a JSON object");
    };
    map.insert(docmap_core::ID_FIELD.to_string(), Value::Id(doc_id(id)));
    map
}

/// A polymorphic reference element: `{_id, type}`.
pub fn element_ref(id: u64, kind: &str) -> Value {
    Value::map([
        (docmap_core::ID_FIELD, Value::Id(doc_id(id))),
        ("type", Value::from(kind)),
    ])
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;
    use serde_json::json;

    /// Id of the author seeded by [`blog`].
    pub const AUTHOR: u64 = 100;
    /// Ids of the categories seeded by [`blog`].
    pub const CATEGORIES_IDS: [u64; 2] = [200, 201];
    /// Id of the article seeded by [`blog`].
    pub const ARTICLE: u64 = 1;

    /// One stored article with an author, two categories, a source and two
    /// comments, the second carrying an embedded author.
    pub fn blog() -> TestSession {
        let t = TestSession::new();
        t.seed(
            AUTHORS,
            vec![record(AUTHOR, json!({"name": "Ada", "email": "ada@example.com"}))],
        );
        t.seed(
            CATEGORIES,
            CATEGORIES_IDS
                .iter()
                .enumerate()
                .map(|(i, id)| record(*id, json!({ "name": format!("category {i}") })))
                .collect(),
        );

        let mut article = record(
            ARTICLE,
            json!({
                "title": "Stored title",
                "content": "Stored content",
                "is_active": true,
                "nb_views": 7,
                "source": {"name": "wire", "url": "https://example.com", "info": {"note": "n"}},
                "comments": [
                    {"name": "first", "text": "one"},
                    {"name": "second", "text": "two", "author": {"name": "Grace"}}
                ]
            }),
        );
        article.insert("author_id".to_string(), Value::Id(doc_id(AUTHOR)));
        article.insert(
            "category_ids".to_string(),
            Value::Array(CATEGORIES_IDS.iter().map(|id| Value::Id(doc_id(*id))).collect()),
        );
        t.seed(ARTICLES, vec![article]);
        t
    }

    /// `count` stored articles titled `article <i>`, with ids `1..=count`.
    pub fn articles(count: u64) -> TestSession {
        let t = TestSession::new();
        t.seed(
            ARTICLES,
            (1..=count)
                .map(|i| record(i, json!({ "title": format!("article {i}"), "nb_views": i })))
                .collect(),
        );
        t
    }

    /// Stored elements of every class, in the order text, image, text,
    /// image, plain, with ids `10..=14`, and an article referencing them in
    /// that order.
    pub fn elements() -> TestSession {
        let t = TestSession::new();
        t.seed(
            ELEMENTS,
            vec![
                record(10, json!({"type": "text", "label": "t1", "body": "b1"})),
                record(11, json!({"type": "image", "label": "i1", "src": "a.png"})),
                record(12, json!({"type": "text", "label": "t2", "body": "b2"})),
                record(13, json!({"type": "image", "label": "i2", "src": "b.png"})),
                record(14, json!({"type": "element", "label": "e1"})),
            ],
        );
        let mut article = record(ARTICLE, json!({"title": "with elements"}));
        article.insert(
            "element_refs".to_string(),
            Value::Array(vec![
                element_ref(10, "text"),
                element_ref(11, "image"),
                element_ref(12, "text"),
                element_ref(13, "image"),
                element_ref(14, "element"),
            ]),
        );
        t.seed(ARTICLES, vec![article]);
        t
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_blog_schema_is_valid() {
        let metadata = blog_metadata();
        assert!(metadata.validate().is_ok());
        let article = metadata.get("Article").unwrap();
        assert!(article.field_meta("author_id").is_some());
        assert_eq!(article.field_meta("views").unwrap().db_name, "nb_views");
    }

    #[test]
    fn test_record_sets_id() {
        let raw = record(5, json!({"title": "x", "n": 1.5, "tags": ["a"]}));
        assert_eq!(raw.get("_id"), Some(&Value::Id(doc_id(5))));
        assert_eq!(raw.get("n"), Some(&Value::Float(1.5)));
        assert_eq!(
            raw.get("tags"),
            Some(&Value::Array(vec![Value::from("a")]))
        );
    }

    #[test]
    fn test_with_session() {
        with_session(|t| {
            let article = t.create("Article").unwrap();
            assert!(t.is_new(article).unwrap());
        });
    }

    #[test]
    fn test_blog_scenario_is_seeded() {
        let t = scenarios::blog();
        assert_eq!(t.store.count(ARTICLES), 1);
        assert_eq!(t.store.count(CATEGORIES), 2);
        assert!(t.store.log().is_empty());
    }

    #[test]
    fn test_reopen_shares_store() {
        let t = scenarios::articles(3);
        let other = t.reopen();
        assert_eq!(other.identity_map().len(), 0);
        assert_eq!(t.store.count(ARTICLES), 3);
    }
}
