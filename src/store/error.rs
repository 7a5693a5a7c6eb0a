//! Storage-specific error types.

use thiserror::Error;

use crate::model::SerializationError;

/// Errors that can occur in the storage layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(#[from] duckdb::Error),

    /// Record could not be serialized for persistence.
    #[error(transparent)]
    Serialization(#[from] SerializationError),

    /// The store worker is no longer running.
    #[error("store worker is gone")]
    WorkerGone,

    /// Internal error (e.g., thread spawn failure).
    #[error("internal error: {0}")]
    Internal(String),
}
