//! Per-module error enums, in the style of the rest of this pack: small
//! `thiserror` enums named after the module they belong to, rather than one
//! crate-wide catch-all.

use thiserror::Error;

/// Errors raised while resolving or mutating a dotted path against a
/// [`crate::path`] tree.
#[derive(Debug, Error)]
pub enum PathError {
    #[error("path segment {0:?} is not addressable (matches a prototype-pollution guard)")]
    ForbiddenSegment(String),

    #[error("path {path:?} does not resolve: no value at segment {segment:?}")]
    NotFound { path: String, segment: String },

    #[error("path {path:?} cannot be set: segment {segment:?} is not a container")]
    NotAContainer { path: String, segment: String },

    #[error("array index {index} out of bounds for path {path:?} (length {length})")]
    IndexOutOfBounds { path: String, index: usize, length: usize },
}

/// Errors raised by [`crate::sync_engine`] while walking a class instance or
/// applying an incoming change batch.
#[derive(Debug, Error)]
pub enum SyncEngineError {
    #[error("field {field:?} has no registered sync schema entry")]
    UnknownField { field: String },

    #[error("cannot sync field {field:?}: nested class instance has no id field")]
    MissingId { field: String },

    #[error(transparent)]
    Path(#[from] PathError),

    #[error("transform for field {field:?} panicked or returned an error: {message}")]
    TransformFailed { field: String, message: String },
}

/// Errors raised by [`crate::load`] while applying a load payload or
/// producing a snapshot.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Path(#[from] PathError),

    #[error("load payload references class type {class_type:?} with no registered constructor")]
    UnknownClassType { class_type: String },

    #[error("collection entry at {path:?} is missing an id field required to key it")]
    MissingCollectionId { path: String },

    #[error("value at {path:?} could not be converted: {message}")]
    InvalidValue { path: String, message: String },
}

/// Errors raised by a [`crate::storage::Storage`] implementation.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("shard {0:?} not found")]
    NotFound(String),

    #[error("io error on shard {shard:?}: {source}")]
    Io { shard: String, #[source] source: std::io::Error },

    #[error("shard {shard:?} failed to (de)serialize: {source}")]
    Serialization { shard: String, #[source] source: serde_json::Error },
}
