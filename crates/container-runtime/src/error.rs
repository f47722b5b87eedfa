//! Error types for runtime operations

use std::time::Duration;
use thiserror::Error;

/// Container runtime error type
#[derive(Error, Debug)]
pub enum Error {
    /// The engine binary is missing or its daemon cannot be reached
    #[error("container runtime unavailable: {0}")]
    Unavailable(String),

    /// The call did not finish in time; its outcome is unknown
    #[error("container runtime timed out during {operation} after {after:?}")]
    Timeout {
        /// Operation that timed out
        operation: &'static str,
        /// Deadline that passed
        after: Duration,
    },

    /// The engine does not know the container
    #[error("container not found: {0}")]
    NotFound(String),

    /// The engine rejected the operation
    #[error("container runtime {operation} failed: {message}")]
    Failed {
        /// Operation that failed
        operation: &'static str,
        /// Engine output explaining the failure
        message: String,
    },

    /// The project spec cannot be materialized
    #[error("invalid project spec: {0}")]
    InvalidSpec(String),

    /// Engine output could not be understood
    #[error("failed to parse runtime output: {0}")]
    Parse(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the error leaves the outcome of the operation unknown
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
