//! # docmap Storage
//!
//! Key-value cache backends for docmap.
//!
//! The mapping layer records, per query fingerprint, which fields and
//! references a query shape has already needed. Those records live in a
//! [`Cache`]. Backends are plain key-value stores: they do not interpret
//! the values they hold.
//!
//! ## Available Backends
//!
//! - [`InMemoryCache`] - For testing and single-process use
//! - [`FileCache`] - One file per key under a directory
//! - [`EagerCache`] - Wrapper that shadows any cache in memory
//!
//! ## Example
//!
//! ```rust
//! use docmap_codec::Value;
//! use docmap_storage::{Cache, InMemoryCache};
//!
//! let cache = InMemoryCache::new();
//! cache.set("k", Value::from("v1")).unwrap();
//! assert!(cache.has("k").unwrap());
//! assert_eq!(cache.get("k").unwrap(), Some(Value::from("v1")));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod eager;
mod error;
mod file;
mod memory;

pub use cache::Cache;
pub use eager::EagerCache;
pub use error::{StorageError, StorageResult};
pub use file::FileCache;
pub use memory::InMemoryCache;
