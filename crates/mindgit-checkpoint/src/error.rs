//! Error types for checkpoint storage operations

use thiserror::Error;

use crate::checkpoint::CheckpointStatus;

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur while serializing or storing checkpoints
#[derive(Error, Debug)]
pub enum StoreError {
    /// Checkpoint or branch not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Binary serialization error
    #[error("binary serialization error: {0}")]
    BinarySerialization(#[from] bincode::Error),

    /// I/O error
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Database error
    #[error("database error: {0}")]
    Sql(#[from] sqlx::Error),

    /// Rejected status transition
    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: CheckpointStatus,
        to: CheckpointStatus,
    },

    /// Stored data that cannot be decoded
    #[error("corrupt store: {0}")]
    Corrupt(String),

    /// Invalid argument or record
    #[error("invalid: {0}")]
    Invalid(String),
}
