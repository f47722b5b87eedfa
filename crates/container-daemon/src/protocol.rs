//! Protocol types for daemon communication
//!
//! One JSON text frame per request and one per response, both tagged by
//! `type`.

use chrono::{DateTime, Utc};
use container_orchestration::{Error, ErrorKind, OperationError};
use container_store::{ContainerRecord, ContainerStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Request messages from client to daemon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    /// Start the project's container
    StartContainer {
        /// Owning project
        project_id: String,
        /// Relative path to file content
        #[serde(default)]
        source_tree: BTreeMap<String, String>,
        /// Environment passed to the container
        #[serde(default)]
        env: BTreeMap<String, String>,
        /// Preferred host port
        #[serde(default)]
        port: Option<u16>,
        /// Replace an active container
        #[serde(default)]
        force: bool,
    },

    /// Stop a container
    StopContainer {
        /// Record id
        id: String,
        /// Grace period before the process is killed
        #[serde(default)]
        timeout_secs: Option<u64>,
    },

    /// Replace a container with a fresh one from the stored spec
    RestartContainer {
        /// Record id
        id: String,
    },

    /// Status of one container
    ContainerStatus {
        /// Record id
        id: String,
    },

    /// Status of a project's current container
    ProjectStatus {
        /// Project id
        project_id: String,
    },

    /// Recent log lines of a running container
    ContainerLogs {
        /// Record id
        id: String,
        /// Number of lines
        #[serde(default)]
        tail: Option<usize>,
    },

    /// Stop and delete a container
    RemoveContainer {
        /// Record id
        id: String,
    },

    /// Every known container
    ListContainers,
}

/// A container record as clients see it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerView {
    /// Record id
    pub id: String,
    /// Owning project
    pub project_id: String,
    /// Lifecycle status
    pub status: ContainerStatus,
    /// Host port
    pub port: Option<u16>,
    /// Where the project is served, while running
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Last observed failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// When the container entered `running`
    pub started_at: Option<DateTime<Utc>>,
    /// When the container stopped
    pub stopped_at: Option<DateTime<Utc>>,
}

impl ContainerView {
    /// Present a record, linking it under `public_host` while it runs
    pub fn new(record: &ContainerRecord, public_host: &str) -> Self {
        let url = match (record.status, record.port) {
            (ContainerStatus::Running, Some(port)) => {
                Some(format!("http://{}:{}", public_host, port))
            }
            _ => None,
        };

        Self {
            id: record.id.clone(),
            project_id: record.project_id.clone(),
            status: record.status,
            port: record.port,
            url,
            last_error: record.last_error.clone(),
            started_at: record.started_at,
            stopped_at: record.stopped_at,
        }
    }
}

/// A failure that did not abort the whole request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Machine-readable category
    pub kind: ErrorKind,
    /// HTTP-equivalent status code
    pub status_code: u16,
    /// Human-readable description
    pub message: String,
}

impl From<&Error> for ErrorInfo {
    fn from(error: &Error) -> Self {
        Self {
            kind: error.kind(),
            status_code: error.status_code(),
            message: error.to_string(),
        }
    }
}

/// Response messages from daemon to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    /// The container after the operation
    Container {
        /// Current view
        container: ContainerView,
    },

    /// Outcome of a restart
    Restarted {
        /// The new container
        container: ContainerView,
        /// Why stopping the old container failed, if it did
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stop_error: Option<ErrorInfo>,
    },

    /// Log lines, oldest first
    Logs {
        /// Record id
        id: String,
        /// Lines
        lines: Vec<String>,
    },

    /// Every known container
    Containers {
        /// Views, oldest first
        containers: Vec<ContainerView>,
    },

    /// The operation failed
    Error {
        /// Machine-readable category
        kind: ErrorKind,
        /// HTTP-equivalent status code
        status_code: u16,
        /// Human-readable description
        message: String,
        /// The record as persisted after the failure
        #[serde(default, skip_serializing_if = "Option::is_none")]
        container: Option<ContainerView>,
        /// Why stopping the previous container failed, on a failed restart
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stop_error: Option<ErrorInfo>,
    },

    /// The frame could not be parsed as a request
    BadRequest {
        /// Parser error
        message: String,
    },
}

impl Response {
    /// Translate an orchestrator failure
    pub fn from_error(error: &OperationError, public_host: &str) -> Self {
        let info = ErrorInfo::from(&error.error);
        Response::Error {
            kind: info.kind,
            status_code: info.status_code,
            message: info.message,
            container: error
                .record
                .as_ref()
                .map(|record| ContainerView::new(record, public_host)),
            stop_error: error.stop_error.as_ref().map(ErrorInfo::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_format() {
        let json = r#"{"type":"StartContainer","project_id":"p1","source_tree":{"index.js":"x"}}"#;
        let request: Request = serde_json::from_str(json).unwrap();
        match request {
            Request::StartContainer {
                project_id,
                source_tree,
                env,
                port,
                force,
            } => {
                assert_eq!(project_id, "p1");
                assert_eq!(source_tree.len(), 1);
                assert!(env.is_empty());
                assert_eq!(port, None);
                assert!(!force);
            }
            other => panic!("unexpected request {:?}", other),
        }

        let list: Request = serde_json::from_str(r#"{"type":"ListContainers"}"#).unwrap();
        assert_eq!(list, Request::ListContainers);
    }

    #[test]
    fn test_view_links_running_containers_only() {
        let mut record = ContainerRecord::new_pending("p1");
        record.port = Some(3004);
        assert_eq!(ContainerView::new(&record, "localhost").url, None);

        record.status = ContainerStatus::Running;
        record.runtime_ref = Some("abc".to_string());
        let view = ContainerView::new(&record, "preview.example.com");
        assert_eq!(view.url.as_deref(), Some("http://preview.example.com:3004"));
    }

    #[test]
    fn test_error_response_shape() {
        let error = OperationError::from(Error::NotFound("container x".into()));
        let response = Response::from_error(&error, "localhost");
        let json = serde_json::to_value(&response).unwrap();

        assert_eq!(json["type"], "Error");
        assert_eq!(json["kind"], "not_found");
        assert_eq!(json["status_code"], 404);
        assert_eq!(json["message"], "container x not found");
        assert!(json.get("container").is_none());
        assert!(json.get("stop_error").is_none());
    }

    #[test]
    fn test_error_response_carries_stop_error() {
        let error = OperationError::from(Error::RuntimeFailure {
            operation: "create",
            message: "image missing".into(),
        })
        .with_stop_error(Some(Error::RuntimeTimeout { operation: "stop" }));
        let json = serde_json::to_value(Response::from_error(&error, "localhost")).unwrap();

        assert_eq!(json["kind"], "runtime_failure");
        assert_eq!(json["stop_error"]["kind"], "runtime_timeout");
        assert_eq!(json["stop_error"]["status_code"], 504);

        let parsed: Response = serde_json::from_value(json).unwrap();
        assert!(matches!(parsed, Response::Error { stop_error: Some(_), .. }));
    }
}
