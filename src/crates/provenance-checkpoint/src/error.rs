//! Error types for checkpoint operations

use thiserror::Error;

/// Result type for checkpoint operations
pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Errors that can occur during checkpoint operations
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// No checkpoint exists for the requested run
    #[error("Checkpoint not found: {0}")]
    NotFound(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Binary serialization error
    #[error("Binary serialization error: {0}")]
    BinarySerialization(#[from] bincode::Error),

    /// Storage backend error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Checkpoint record is malformed or missing mandatory fields
    #[error("Invalid checkpoint: {0}")]
    Invalid(String),

    /// Checkpoint cannot be resumed against the current graph
    #[error("Checkpoint incompatible: {0}")]
    Incompatible(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
