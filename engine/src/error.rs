//! Error types for the Stash engine.

use crate::ItemId;
use thiserror::Error;

/// Failure of the durable key/value store behind the cache.
///
/// Never reaches callers of [`crate::PersistentCache`]; it is logged and the
/// operation degrades to a no-op.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("storage io failure: {0}")]
    Io(String),

    #[error("cache entry could not be serialized: {0}")]
    Serialize(String),

    #[error("cache entry is corrupt: {0}")]
    Corrupt(String),
}

/// Failure reported by a [`crate::RemoteAdapter`], already classified by the
/// adapter so callers never inspect backend wording.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Transport failure, or the remote is not configured at all.
    #[error("network error: {0}")]
    Network(String),

    /// The remote accepted the request but could not answer the query.
    #[error("query error: {0}")]
    Query(String),

    /// The remote store has no column for `field`.
    #[error("unknown field '{field}'")]
    Schema { field: String },

    /// No remote row matches the id.
    #[error("item not found: {0}")]
    NotFound(ItemId),
}

impl RemoteError {
    /// The offending field name for schema errors.
    pub fn schema_field(&self) -> Option<&str> {
        match self {
            RemoteError::Schema { field } => Some(field),
            _ => None,
        }
    }
}

/// Invalid remote configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid remote endpoint '{0}'")]
    InvalidEndpoint(String),

    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: String, value: String },

    #[error("http client could not be built: {0}")]
    Client(String),
}

/// All errors surfaced by the engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The remote rejected `field` and the payload without it was rejected too.
    #[error("remote schema has no column '{field}': {cause}")]
    SchemaDrift { field: String, cause: RemoteError },

    /// The collection instance was torn down before the call.
    #[error("collection instance is no longer attached")]
    Detached,

    /// The background write task was cancelled or panicked.
    #[error("remote write aborted: {0}")]
    WriteAborted(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
