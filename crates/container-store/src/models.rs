//! Data models for container records and project specs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Component, Path};

/// Everything needed to materialize a project's container.
///
/// Produced upstream by the generation pipeline. The orchestrator keeps the
/// latest spec per project so a restart can recreate the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSpec {
    /// Owning project
    pub project_id: String,

    /// Generated source files, relative path to file content
    #[serde(default)]
    pub source_tree: BTreeMap<String, String>,

    /// Environment variables passed to the container
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Explicit host port request
    #[serde(default)]
    pub port: Option<u16>,
}

impl ProjectSpec {
    /// Create a spec with no files, env or port
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            source_tree: BTreeMap::new(),
            env: BTreeMap::new(),
            port: None,
        }
    }

    /// Add a source file
    pub fn with_file(mut self, path: impl Into<String>, content: impl Into<String>) -> Self {
        self.source_tree.insert(path.into(), content.into());
        self
    }

    /// Add an environment variable
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Request a specific host port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Find the first source path that could escape the project directory.
    ///
    /// Returns the offending path and the reason it was rejected.
    pub fn invalid_path(&self) -> Option<(&str, &'static str)> {
        self.source_tree.keys().find_map(|path| {
            if path.is_empty() {
                return Some((path.as_str(), "empty path"));
            }
            let parsed = Path::new(path);
            if parsed.is_absolute() {
                return Some((path.as_str(), "absolute path"));
            }
            parsed.components().find_map(|component| match component {
                Component::ParentDir => Some((path.as_str(), "parent directory component")),
                Component::RootDir | Component::Prefix(_) => {
                    Some((path.as_str(), "absolute path"))
                }
                _ => None,
            })
        })
    }
}

/// Lifecycle status of a container record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerStatus {
    /// Record created, nothing exists in the runtime yet
    Pending,
    /// Container created, start issued
    Starting,
    /// Container is up; the only state traffic may be routed to
    Running,
    /// Stop issued
    Stopping,
    /// Container stopped but still present in the runtime
    Stopped,
    /// Something failed; see `last_error`
    Error,
    /// Container deleted from the runtime
    Removed,
}

impl ContainerStatus {
    /// All statuses, in lifecycle order
    pub const ALL: [ContainerStatus; 7] = [
        ContainerStatus::Pending,
        ContainerStatus::Starting,
        ContainerStatus::Running,
        ContainerStatus::Stopping,
        ContainerStatus::Stopped,
        ContainerStatus::Error,
        ContainerStatus::Removed,
    ];

    /// Whether a record in this status counts toward the one-per-project limit
    pub fn is_active(self) -> bool {
        !matches!(
            self,
            ContainerStatus::Stopped | ContainerStatus::Removed | ContainerStatus::Error
        )
    }

    /// Whether a record in this status must carry a runtime reference
    pub fn holds_runtime_ref(self) -> bool {
        matches!(
            self,
            ContainerStatus::Starting
                | ContainerStatus::Running
                | ContainerStatus::Stopping
                | ContainerStatus::Stopped
        )
    }

    /// Wire name of the status
    pub fn as_str(self) -> &'static str {
        match self {
            ContainerStatus::Pending => "pending",
            ContainerStatus::Starting => "starting",
            ContainerStatus::Running => "running",
            ContainerStatus::Stopping => "stopping",
            ContainerStatus::Stopped => "stopped",
            ContainerStatus::Error => "error",
            ContainerStatus::Removed => "removed",
        }
    }
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A project's container as the orchestrator last persisted it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRecord {
    /// Internal identifier, stable across runtime restarts
    pub id: String,

    /// Identifier returned by the container runtime
    pub runtime_ref: Option<String>,

    /// Owning project
    pub project_id: String,

    /// Current lifecycle status
    pub status: ContainerStatus,

    /// Host port bound to the container
    pub port: Option<u16>,

    /// When the container entered `running`
    pub started_at: Option<DateTime<Utc>>,

    /// When the container left the runtime's running set
    pub stopped_at: Option<DateTime<Utc>>,

    /// Last observed failure
    pub last_error: Option<String>,

    /// When the record was created
    pub created_at: DateTime<Utc>,

    /// Last write to the record
    pub updated_at: DateTime<Utc>,
}

impl ContainerRecord {
    /// Create a fresh `pending` record for a project
    pub fn new_pending(project_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            runtime_ref: None,
            project_id: project_id.into(),
            status: ContainerStatus::Pending,
            port: None,
            started_at: None,
            stopped_at: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether this record counts as the project's active container
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// `runtime_ref` is present exactly when the status requires one
    pub fn runtime_ref_consistent(&self) -> bool {
        let has_ref = self
            .runtime_ref
            .as_deref()
            .is_some_and(|reference| !reference.is_empty());
        has_ref == self.status.holds_runtime_ref()
    }
}
