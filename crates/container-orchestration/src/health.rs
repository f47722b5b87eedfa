//! Liveness observations and log retrieval
//!
//! Translates whatever the engine says into the record vocabulary and keeps
//! log responses bounded.

use crate::{LogConfig, Result};
use container_runtime::{RuntimeClient, RuntimeStatus};
use container_store::ContainerStatus;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// What the runtime reported about one container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    /// Canonical status; [`ContainerStatus::Removed`] when missing
    pub status: ContainerStatus,
    /// The runtime no longer knows the container
    pub missing: bool,
    /// Raw engine state
    pub raw_state: Option<String>,
    /// Exit code of the main process
    pub exit_code: Option<i64>,
    /// Engine-side error text
    pub error: Option<String>,
    /// Killed for exceeding its memory limit
    pub oom_killed: bool,
}

impl Observation {
    /// Observation of a container the runtime does not know
    pub fn missing() -> Self {
        Self {
            status: ContainerStatus::Removed,
            missing: true,
            raw_state: None,
            exit_code: None,
            error: None,
            oom_killed: false,
        }
    }

    /// Observation built from an inspect result
    pub fn from_runtime(status: &RuntimeStatus) -> Self {
        Self {
            status: canonical_status(&status.state),
            missing: false,
            raw_state: Some(status.state.clone()),
            exit_code: status.exit_code,
            error: status.error.clone(),
            oom_killed: status.oom_killed,
        }
    }

    /// Whether the container is up
    pub fn is_running(&self) -> bool {
        !self.missing && self.status == ContainerStatus::Running
    }

    /// Human-readable reason a container is no longer running
    pub fn describe_exit(&self) -> String {
        if self.missing {
            return "container disappeared from the runtime".to_string();
        }

        let mut message = match (self.raw_state.as_deref(), self.exit_code) {
            (Some(state), Some(code)) => format!("container {} with code {}", state, code),
            (Some(state), None) => format!("container is {}", state),
            (None, _) => "container is not running".to_string(),
        };
        if self.oom_killed {
            message.push_str(" (out of memory)");
        }
        if let Some(error) = &self.error {
            message.push_str(": ");
            message.push_str(error);
        }
        message
    }
}

/// Map an engine state string onto the record vocabulary
pub fn canonical_status(state: &str) -> ContainerStatus {
    match state.trim().to_ascii_lowercase().as_str() {
        "created" | "restarting" => ContainerStatus::Starting,
        "running" | "paused" => ContainerStatus::Running,
        "removing" => ContainerStatus::Stopping,
        "exited" => ContainerStatus::Stopped,
        _ => ContainerStatus::Error,
    }
}

/// Keep the most recent lines that fit in `max_lines` and `max_bytes`.
///
/// Trailing `\r` is stripped. A single line longer than the byte budget is
/// cut at a character boundary.
pub fn truncate_logs(lines: Vec<String>, max_lines: usize, max_bytes: usize) -> Vec<String> {
    let mut kept = Vec::new();
    let mut budget = max_bytes;

    for mut line in lines.into_iter().rev() {
        if kept.len() >= max_lines || budget == 0 {
            break;
        }
        if line.ends_with('\r') {
            line.pop();
        }

        if line.len() <= budget {
            budget -= line.len();
            kept.push(line);
            continue;
        }

        // Only the newest line may be cut; older ones would leave a gap
        if kept.is_empty() {
            let mut cut = budget;
            while !line.is_char_boundary(cut) {
                cut -= 1;
            }
            line.truncate(cut);
            kept.push(line);
        }
        break;
    }

    kept.reverse();
    kept
}

/// Reads container state and logs through the runtime client
pub struct HealthAccessor {
    runtime: Arc<dyn RuntimeClient>,
    timeout: Duration,
    limits: LogConfig,
}

impl HealthAccessor {
    /// Create an accessor bounded by `timeout` per runtime call
    pub fn new(runtime: Arc<dyn RuntimeClient>, timeout: Duration, limits: LogConfig) -> Self {
        Self {
            runtime,
            timeout,
            limits,
        }
    }

    /// Inspect a container; an unknown container is reported as missing
    pub async fn observe(&self, runtime_ref: &str) -> Result<Observation> {
        match self.runtime.inspect(runtime_ref, self.timeout).await {
            Ok(status) => {
                let observation = Observation::from_runtime(&status);
                debug!(
                    "Observed {} as {} ({})",
                    runtime_ref, observation.status, status.state
                );
                Ok(observation)
            }
            Err(container_runtime::Error::NotFound(_)) => {
                debug!("Observed {} as missing", runtime_ref);
                Ok(Observation::missing())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Fetch the last `tail` log lines (or the configured default), bounded
    /// by the configured ceilings
    pub async fn logs(&self, runtime_ref: &str, tail: Option<usize>) -> Result<Vec<String>> {
        let tail = tail
            .unwrap_or(self.limits.default_tail)
            .min(self.limits.max_lines);
        let lines = self.runtime.logs(runtime_ref, tail, self.timeout).await?;
        Ok(truncate_logs(lines, tail, self.limits.max_bytes))
    }
}
