//! Error types for cache operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for cache operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during cache operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred while reading, writing or deleting an entry.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The cache directory could not be created.
    #[error("cannot create cache directory {path:?}: {source}")]
    CreateDir {
        /// Directory that was requested.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },

    /// A cached entry could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] docmap_codec::CodecError),

    /// A cached entry is corrupted.
    #[error("cache entry corrupted: {0}")]
    Corrupted(String),
}
