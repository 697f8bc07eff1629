//! Error types for docmap core.

use crate::types::DocumentId;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in docmap core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Cache backend error.
    #[error("storage error: {0}")]
    Storage(#[from] docmap_storage::StorageError),

    /// Value encoding error.
    #[error("codec error: {0}")]
    Codec(#[from] docmap_codec::CodecError),

    /// Operation not permitted in the current state.
    #[error("invalid state: {message}")]
    InvalidState {
        /// Description of why the operation is not permitted.
        message: String,
    },

    /// A named item (type, side-table key, field, instance) does not exist.
    #[error("not found: {what}")]
    NotFound {
        /// What was looked up.
        what: String,
    },

    /// A named item is already registered.
    #[error("already exists: {what}")]
    AlreadyExists {
        /// What was registered twice.
        what: String,
    },

    /// An argument does not satisfy the required contract.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the violated contract.
        message: String,
    },

    /// No metadata is registered for a class.
    #[error("unknown class: {name}")]
    UnknownClass {
        /// Name of the class.
        name: String,
    },

    /// A persisted document could not be found in the store.
    #[error("document {id} not found in collection {collection}")]
    DocumentNotFound {
        /// The collection searched.
        collection: String,
        /// The id that was not found.
        id: DocumentId,
    },

    /// A value could not be converted by a type converter.
    #[error("cannot convert {found} with type {type_name}")]
    Conversion {
        /// Name of the converter.
        type_name: String,
        /// Kind of the value that was rejected.
        found: &'static str,
    },
}

impl CoreError {
    /// Creates an invalid state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Creates a not found error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Creates an already exists error.
    pub fn already_exists(what: impl Into<String>) -> Self {
        Self::AlreadyExists { what: what.into() }
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates an unknown class error.
    pub fn unknown_class(name: impl Into<String>) -> Self {
        Self::UnknownClass { name: name.into() }
    }

    /// Creates a conversion error.
    pub fn conversion(type_name: impl Into<String>, found: &'static str) -> Self {
        Self::Conversion {
            type_name: type_name.into(),
            found,
        }
    }
}
