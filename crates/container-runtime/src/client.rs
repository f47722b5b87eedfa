//! The runtime client contract and the values that cross it.

use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use container_store::ProjectSpec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Opaque identifier the engine hands back for a container
pub type RuntimeRef = String;

/// Label marking containers this orchestrator created
pub const MANAGED_LABEL: &str = "io.container-orchestrator.managed";
/// Label carrying the owning record id
pub const RECORD_LABEL: &str = "io.container-orchestrator.record-id";
/// Label carrying the owning project id
pub const PROJECT_LABEL: &str = "io.container-orchestrator.project-id";

/// Everything the engine needs to create one project container
#[derive(Debug, Clone)]
pub struct CreateRequest {
    /// Deterministic container name; also accepted as a reference for
    /// cleanup when the engine id is unknown
    pub name: String,
    /// Project to materialize
    pub spec: ProjectSpec,
    /// Host port to publish the container port on
    pub host_port: u16,
    /// Environment passed to the container
    pub env: BTreeMap<String, String>,
    /// Labels attached to the container
    pub labels: BTreeMap<String, String>,
}

impl CreateRequest {
    /// Build a request carrying the orchestrator's ownership labels
    pub fn new(name: impl Into<String>, spec: ProjectSpec, host_port: u16, record_id: &str) -> Self {
        let labels = BTreeMap::from([
            (MANAGED_LABEL.to_string(), "true".to_string()),
            (RECORD_LABEL.to_string(), record_id.to_string()),
            (PROJECT_LABEL.to_string(), spec.project_id.clone()),
        ]);
        let env = spec.env.clone();

        Self {
            name: name.into(),
            spec,
            host_port,
            env,
            labels,
        }
    }
}

/// What the engine reports about one container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeStatus {
    /// Engine-specific state string, e.g. `running` or `exited`
    pub state: String,
    /// Exit code once the main process ended
    pub exit_code: Option<i64>,
    /// Engine-side error message
    pub error: Option<String>,
    /// Killed by the kernel OOM killer
    pub oom_killed: bool,
    /// When the container last started
    pub started_at: Option<DateTime<Utc>>,
}

impl RuntimeStatus {
    /// A status carrying only the engine state string
    pub fn from_state(state: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            exit_code: None,
            error: None,
            oom_killed: false,
            started_at: None,
        }
    }
}

/// A running container as listed by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningContainer {
    /// Engine identifier
    pub runtime_ref: RuntimeRef,
    /// Host ports the container publishes
    pub host_ports: Vec<u16>,
    /// Container labels
    pub labels: BTreeMap<String, String>,
}

impl RunningContainer {
    /// Record id label, if the orchestrator created the container
    pub fn record_id(&self) -> Option<&str> {
        self.labels.get(RECORD_LABEL).map(String::as_str)
    }

    /// Project id label, if the orchestrator created the container
    pub fn project_id(&self) -> Option<&str> {
        self.labels.get(PROJECT_LABEL).map(String::as_str)
    }
}

/// Typed interface to the container engine.
///
/// All mutating calls are "fire, then verify": after a
/// [`crate::Error::Timeout`] the operation may or may not have happened.
#[async_trait]
pub trait RuntimeClient: Send + Sync {
    /// Check the engine is reachable; returns its version string
    async fn ping(&self, timeout: Duration) -> Result<String>;

    /// Materialize the project and create (but not start) its container
    async fn create(&self, request: &CreateRequest, timeout: Duration) -> Result<RuntimeRef>;

    /// Start a created or stopped container
    async fn start(&self, runtime_ref: &str, timeout: Duration) -> Result<()>;

    /// Stop a container, giving its process `grace` to exit
    async fn stop(&self, runtime_ref: &str, grace: Duration, timeout: Duration) -> Result<()>;

    /// Remove a container, killing it if needed. Removing a container the
    /// engine no longer knows succeeds.
    async fn remove(&self, runtime_ref: &str, timeout: Duration) -> Result<()>;

    /// Report the container's current state
    async fn inspect(&self, runtime_ref: &str, timeout: Duration) -> Result<RuntimeStatus>;

    /// Return the last `tail` log lines, oldest first
    async fn logs(&self, runtime_ref: &str, tail: usize, timeout: Duration) -> Result<Vec<String>>;

    /// List the running containers this orchestrator manages, one entry per
    /// runtime reference
    async fn list_running(&self, timeout: Duration) -> Result<Vec<RunningContainer>>;
}
