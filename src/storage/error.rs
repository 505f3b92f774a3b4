//! Storage layer error types

use thiserror::Error;

/// Errors that can occur in the storage tiers
#[derive(Error, Debug)]
pub enum StorageError {
    /// Caller violated a precondition (empty id, unsorted block input, ...)
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Hot tier is at its series cardinality cap
    #[error("series limit exceeded: {0}")]
    SeriesLimitExceeded(usize),

    /// Series unknown to all tiers
    #[error("series not found: {0}")]
    NotFound(String),

    /// Warm tier disk operation failed
    #[error("io failure: {0}")]
    Io(#[from] std::io::Error),

    /// Block serialization/deserialization or compression failure
    #[error("codec failure: {0}")]
    Codec(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Codec(err.to_string())
    }
}

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
