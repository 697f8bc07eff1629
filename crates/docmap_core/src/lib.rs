//! # docmap Core
//!
//! Object-document mapping with a session-scoped unit of work.
//!
//! A [`Session`] owns every entity it creates or loads. Entities are
//! addressed by copyable [`EntityRef`] handles and described by
//! [`ClassMetadata`]. The session provides:
//!
//! - Dirty tracking of fields, embedded documents and relation groups
//! - Lazy loading of unloaded fields with projected reads
//! - An identity map: one entity per stored document
//! - Query hashing with a field cache that narrows later projections
//! - Change-set saves: inserts batched per collection, minimal updates
//! - Polymorphic classes resolved through a discriminator field
//!
//! ## Example
//!
//! ```rust
//! use docmap_core::{
//!     ClassMetadata, MemoryStore, MetadataRegistry, SaveOptions, Session,
//! };
//! use std::sync::Arc;
//!
//! let metadata = MetadataRegistry::new()
//!     .with(ClassMetadata::document("Article", "articles").field("title", "string"))
//!     .unwrap();
//! let store = Arc::new(MemoryStore::new());
//! let mut session = Session::new(Arc::new(metadata), store.clone()).unwrap();
//!
//! let article = session.create("Article").unwrap();
//! session.set_field(article, "title", "hello").unwrap();
//! session.save(article, SaveOptions::default()).unwrap();
//!
//! assert!(!session.is_new(article).unwrap());
//! assert_eq!(store.count("articles"), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
pub mod convert;
mod entity;
mod error;
mod group;
mod hooks;
mod identity;
mod metadata;
mod query;
mod repository;
mod session;
mod side_table;
pub mod store;
mod types;

pub use config::{SessionConfig, DEFAULT_ID_GENERATOR};
pub use convert::{TypeConverter, TypeRegistry};
pub use entity::{generator_by_name, IdGenerator, SequenceGenerator, UuidGenerator};
pub use error::{CoreError, CoreResult};
pub use group::{GroupKind, GroupMut, Members, SavedDataLoader, StaticLoader};
pub use hooks::{LifecycleEvent, LifecycleHook};
pub use identity::IdentityMap;
pub use metadata::{
    ClassMetadata, EmbeddedMeta, FieldMeta, MetadataRegistry, Polymorphism, ReferenceManyMeta,
    ReferenceOneMeta,
};
pub use query::{Filter, Query};
pub use repository::{SaveOptions, SaveQuery};
pub use session::{Session, SessionBuilder};
pub use side_table::{keys, SideTable};
pub use store::{DocumentStore, MemoryStore, StoreFilter, StoreOp, Update, ID_FIELD};
pub use types::{DocumentId, EntityRef, GroupRef, InstanceId, RootAndPath};

pub use docmap_codec::{Map, ObjectId, Value};
pub use docmap_storage::{Cache, EagerCache, FileCache, InMemoryCache};
