//! Error types for orchestration operations

use container_store::{ContainerRecord, ContainerStatus};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Orchestration error type
#[derive(Error, Debug)]
pub enum Error {
    /// The container engine cannot be reached
    #[error("container runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    /// A runtime call ran out of time; its outcome is unknown until the next
    /// reconciliation
    #[error("container runtime timed out during {operation}")]
    RuntimeTimeout {
        /// Runtime operation that timed out
        operation: &'static str,
    },

    /// Every port in the configured range is taken
    #[error("no ports available in {start}-{end}")]
    NoPortsAvailable {
        /// First port of the range
        start: u16,
        /// Last port of the range
        end: u16,
    },

    /// The record moved under us or the transition is not allowed
    #[error("invalid transition of {id} from {from} to {to}")]
    InvalidTransition {
        /// Record id
        id: String,
        /// Status found in the store
        from: ContainerStatus,
        /// Requested status
        to: ContainerStatus,
    },

    /// The project already has an active container
    #[error("project {project_id} already has an active container {id}")]
    AlreadyRunning {
        /// Project id
        project_id: String,
        /// Id of the active record
        id: String,
    },

    /// The operation needs a running container
    #[error("container {id} is {status}, not running")]
    NotRunning {
        /// Record id
        id: String,
        /// Current status
        status: ContainerStatus,
    },

    /// Unknown record or project
    #[error("{0} not found")]
    NotFound(String),

    /// The project spec cannot be used
    #[error("invalid project spec: {0}")]
    InvalidSpec(String),

    /// The engine rejected an operation
    #[error("container runtime {operation} failed: {message}")]
    RuntimeFailure {
        /// Runtime operation that failed
        operation: &'static str,
        /// Engine output
        message: String,
    },

    /// Record store failure
    #[error("record store error: {0}")]
    Store(#[source] container_store::Error),
}

/// Machine-readable error category, stable on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// See [`Error::RuntimeUnavailable`]
    RuntimeUnavailable,
    /// See [`Error::RuntimeTimeout`]
    RuntimeTimeout,
    /// See [`Error::NoPortsAvailable`]
    NoPortsAvailable,
    /// See [`Error::InvalidTransition`]
    InvalidTransition,
    /// See [`Error::AlreadyRunning`]
    AlreadyRunning,
    /// See [`Error::NotRunning`]
    NotRunning,
    /// See [`Error::NotFound`]
    NotFound,
    /// See [`Error::InvalidSpec`]
    InvalidSpec,
    /// See [`Error::RuntimeFailure`]
    RuntimeFailure,
    /// See [`Error::Store`]
    Store,
}

impl ErrorKind {
    /// HTTP-equivalent status code
    pub fn status_code(self) -> u16 {
        match self {
            ErrorKind::RuntimeUnavailable | ErrorKind::NoPortsAvailable => 503,
            ErrorKind::RuntimeTimeout => 504,
            ErrorKind::InvalidTransition | ErrorKind::AlreadyRunning | ErrorKind::NotRunning => {
                409
            }
            ErrorKind::NotFound => 404,
            ErrorKind::InvalidSpec => 422,
            ErrorKind::RuntimeFailure => 502,
            ErrorKind::Store => 500,
        }
    }

    /// Wire name of the kind
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::RuntimeUnavailable => "runtime_unavailable",
            ErrorKind::RuntimeTimeout => "runtime_timeout",
            ErrorKind::NoPortsAvailable => "no_ports_available",
            ErrorKind::InvalidTransition => "invalid_transition",
            ErrorKind::AlreadyRunning => "already_running",
            ErrorKind::NotRunning => "not_running",
            ErrorKind::NotFound => "not_found",
            ErrorKind::InvalidSpec => "invalid_spec",
            ErrorKind::RuntimeFailure => "runtime_failure",
            ErrorKind::Store => "store",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Category of the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::RuntimeUnavailable(_) => ErrorKind::RuntimeUnavailable,
            Error::RuntimeTimeout { .. } => ErrorKind::RuntimeTimeout,
            Error::NoPortsAvailable { .. } => ErrorKind::NoPortsAvailable,
            Error::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            Error::AlreadyRunning { .. } => ErrorKind::AlreadyRunning,
            Error::NotRunning { .. } => ErrorKind::NotRunning,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::InvalidSpec(_) => ErrorKind::InvalidSpec,
            Error::RuntimeFailure { .. } => ErrorKind::RuntimeFailure,
            Error::Store(_) => ErrorKind::Store,
        }
    }

    /// HTTP-equivalent status code
    pub fn status_code(&self) -> u16 {
        self.kind().status_code()
    }
}

impl From<container_store::Error> for Error {
    fn from(err: container_store::Error) -> Self {
        match err {
            container_store::Error::RecordNotFound(id) => Error::NotFound(format!("container {}", id)),
            other => Error::Store(other),
        }
    }
}

impl From<container_runtime::Error> for Error {
    fn from(err: container_runtime::Error) -> Self {
        use container_runtime::Error as Runtime;

        match err {
            Runtime::Unavailable(message) => Error::RuntimeUnavailable(message),
            Runtime::Timeout { operation, .. } => Error::RuntimeTimeout { operation },
            Runtime::NotFound(reference) => {
                Error::NotFound(format!("runtime container {}", reference))
            }
            Runtime::Failed { operation, message } => Error::RuntimeFailure { operation, message },
            Runtime::InvalidSpec(message) => Error::InvalidSpec(message),
            Runtime::Parse(message) => Error::RuntimeFailure {
                operation: "parse",
                message,
            },
            Runtime::Io(e) => Error::RuntimeFailure {
                operation: "io",
                message: e.to_string(),
            },
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// A failed orchestrator operation together with the record as it was
/// persisted afterwards, when there is one
#[derive(Error, Debug)]
#[error("{}{}", .error, stop_suffix(.stop_error))]
pub struct OperationError {
    /// What went wrong
    pub error: Error,
    /// Current persisted record
    pub record: Option<ContainerRecord>,
    /// Failure to stop the previous container during a restart
    pub stop_error: Option<Error>,
}

fn stop_suffix(stop_error: &Option<Error>) -> String {
    match stop_error {
        Some(e) => format!(" (stopping the previous container also failed: {})", e),
        None => String::new(),
    }
}

impl OperationError {
    /// Wrap an error that left `record` behind
    pub fn with_record(error: impl Into<Error>, record: Option<ContainerRecord>) -> Self {
        Self {
            error: error.into(),
            record,
            stop_error: None,
        }
    }

    /// Attach the error of an earlier stop that the operation carried on past
    pub fn with_stop_error(mut self, stop_error: Option<Error>) -> Self {
        self.stop_error = stop_error;
        self
    }

    /// Category of the underlying error
    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }
}

impl From<Error> for OperationError {
    fn from(error: Error) -> Self {
        Self::with_record(error, None)
    }
}

impl From<container_store::Error> for OperationError {
    fn from(error: container_store::Error) -> Self {
        Error::from(error).into()
    }
}

impl From<container_runtime::Error> for OperationError {
    fn from(error: container_runtime::Error) -> Self {
        Error::from(error).into()
    }
}

/// Result of a public orchestrator operation
pub type OperationResult<T> = std::result::Result<T, OperationError>;
