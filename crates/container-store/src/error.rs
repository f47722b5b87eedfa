//! Error types for the record store

use thiserror::Error;

/// Record store error type
#[derive(Error, Debug)]
pub enum Error {
    /// Record not found
    #[error("Record not found: {0}")]
    RecordNotFound(String),

    /// Underlying sled failure
    #[error("Storage error: {0}")]
    Storage(#[from] sled::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
