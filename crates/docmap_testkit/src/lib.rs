//! # docmap Testkit
//!
//! Test utilities for docmap.
//!
//! This crate provides:
//! - A blog schema exercising every relation kind, and sessions wired to a
//!   shared in-memory store and cache
//! - Raw record builders written as JSON literals
//! - Property-based test generators using proptest
//! - An integration harness that checks saved state against the store
//!
//! ## Usage
//!
//! ```rust
//! use docmap_core::SaveOptions;
//! use docmap_testkit::prelude::*;
//!
//! let mut t = TestSession::new();
//! let article = t.create("Article").unwrap();
//! t.set_field(article, "title", "hello").unwrap();
//! t.save(article, SaveOptions::default()).unwrap();
//! assert_eq!(t.store.count("articles"), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod integration;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
}

pub use fixtures::*;
pub use generators::*;
pub use integration::*;

use std::sync::Once;
use tracing_subscriber::EnvFilter;

/// Installs a test-friendly `tracing` subscriber once per process.
///
/// The filter comes from `RUST_LOG`; nothing is printed when it is unset.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}
