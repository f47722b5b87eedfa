//! Runtime client backed by the `docker` CLI

use crate::{
    CreateRequest, Error, MANAGED_LABEL, PROJECT_LABEL, RECORD_LABEL, Result, RunningContainer,
    RuntimeClient, RuntimeRef, RuntimeStatus,
    process::{CommandOutput, CommandRunner},
};
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// How project containers are built from a spec
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerConfig {
    /// Engine binary
    pub binary: String,
    /// Base image the project runs in
    pub image: String,
    /// Command run inside the container
    pub command: Vec<String>,
    /// Port the project listens on inside the container
    pub container_port: u16,
    /// Mount point of the project source inside the container
    pub workdir: String,
    /// Host directory project sources are written under
    pub workspace_dir: PathBuf,
    /// Memory limit, e.g. `512m`
    pub memory: Option<String>,
    /// CPU limit, e.g. `1.5`
    pub cpus: Option<String>,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            binary: "docker".to_string(),
            image: "node:20-alpine".to_string(),
            command: vec![
                "sh".to_string(),
                "-c".to_string(),
                "npm install && npm start".to_string(),
            ],
            container_port: 3000,
            workdir: "/app".to_string(),
            workspace_dir: std::env::temp_dir().join("container-orchestrator"),
            memory: None,
            cpus: None,
        }
    }
}

/// [`RuntimeClient`] that shells out to the docker CLI
pub struct DockerCli {
    config: DockerConfig,
    runner: CommandRunner,
}

/// `.State` as printed by `docker inspect`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectState {
    status: String,
    #[serde(default)]
    exit_code: Option<i64>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default, rename = "OOMKilled")]
    oom_killed: bool,
    #[serde(default)]
    started_at: Option<String>,
}

impl DockerCli {
    /// Create a client with the given container template
    pub fn new(config: DockerConfig) -> Self {
        let runner = CommandRunner::new(config.binary.clone());
        Self { config, runner }
    }

    /// The container template in use
    pub fn config(&self) -> &DockerConfig {
        &self.config
    }

    async fn exec(
        &self,
        operation: &'static str,
        args: Vec<String>,
        timeout: Duration,
    ) -> Result<CommandOutput> {
        let output = self.runner.run(operation, &args, timeout).await?;
        if output.success() {
            Ok(output)
        } else {
            Err(classify(operation, &output))
        }
    }

    fn project_dir(&self, name: &str) -> PathBuf {
        self.config.workspace_dir.join(name)
    }

    async fn write_sources(&self, request: &CreateRequest) -> Result<PathBuf> {
        if let Some((path, reason)) = request.spec.invalid_path() {
            return Err(Error::InvalidSpec(format!("{}: {}", path, reason)));
        }

        let dir = self.project_dir(&request.name);
        if async_fs::metadata(&dir).await.is_ok() {
            async_fs::remove_dir_all(&dir).await?;
        }
        async_fs::create_dir_all(&dir).await?;

        for (path, content) in &request.spec.source_tree {
            let target = dir.join(path);
            if let Some(parent) = target.parent() {
                async_fs::create_dir_all(parent).await?;
            }
            async_fs::write(&target, content).await?;
        }

        debug!(
            "Wrote {} source files for {} to {:?}",
            request.spec.source_tree.len(),
            request.name,
            dir
        );
        Ok(dir)
    }

    fn create_args(&self, request: &CreateRequest, source_dir: &Path) -> Vec<String> {
        let mut args = vec![
            "create".to_string(),
            "--name".to_string(),
            request.name.clone(),
        ];

        for (key, value) in &request.labels {
            args.push("--label".to_string());
            args.push(format!("{}={}", key, value));
        }

        args.push("-p".to_string());
        args.push(format!(
            "{}:{}",
            request.host_port, self.config.container_port
        ));

        for (key, value) in &request.env {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }
        args.push("-e".to_string());
        args.push(format!("PORT={}", self.config.container_port));

        args.push("-v".to_string());
        args.push(format!(
            "{}:{}",
            source_dir.display(),
            self.config.workdir
        ));
        args.push("-w".to_string());
        args.push(self.config.workdir.clone());

        if let Some(memory) = &self.config.memory {
            args.push("--memory".to_string());
            args.push(memory.clone());
        }
        if let Some(cpus) = &self.config.cpus {
            args.push("--cpus".to_string());
            args.push(cpus.clone());
        }

        args.push(self.config.image.clone());
        args.extend(self.config.command.iter().cloned());
        args
    }
}

/// Map a failed CLI invocation onto the runtime error taxonomy
fn classify(operation: &'static str, output: &CommandOutput) -> Error {
    let message = output.failure_message();

    if message.contains("Cannot connect to the Docker daemon")
        || message.contains("error during connect")
    {
        Error::Unavailable(message)
    } else if message.contains("No such container") || message.contains("No such object") {
        Error::NotFound(message)
    } else {
        Error::Failed { operation, message }
    }
}

fn parse_state(raw: &str) -> Result<RuntimeStatus> {
    let state: InspectState =
        serde_json::from_str(raw.trim()).map_err(|e| Error::Parse(e.to_string()))?;

    // Docker reports never-started containers with a zero timestamp
    let started_at = state
        .started_at
        .as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
        .filter(|t| t.year() > 1);

    Ok(RuntimeStatus {
        state: state.status,
        exit_code: state.exit_code,
        error: state.error.filter(|e| !e.is_empty()),
        oom_killed: state.oom_killed,
        started_at,
    })
}

/// Merge timestamped stdout and stderr lines into one chronological stream
fn merge_logs(stdout: &str, stderr: &str, tail: usize) -> Vec<String> {
    let mut lines: Vec<(&str, &str)> = stdout
        .lines()
        .chain(stderr.lines())
        .map(|line| line.split_once(' ').unwrap_or((line, "")))
        .collect();
    // RFC 3339 timestamps with fixed precision sort lexicographically
    lines.sort_by(|a, b| a.0.cmp(b.0));

    let skip = lines.len().saturating_sub(tail);
    lines
        .into_iter()
        .skip(skip)
        .map(|(_, text)| text.to_string())
        .collect()
}

/// Host ports from a `docker ps` ports column like
/// `0.0.0.0:3001->3000/tcp, :::3001->3000/tcp`
fn parse_host_ports(column: &str) -> Vec<u16> {
    let mut ports = Vec::new();
    for binding in column.split(',') {
        let Some((host, _)) = binding.trim().split_once("->") else {
            continue;
        };
        if let Some(port) = host
            .rsplit_once(':')
            .and_then(|(_, port)| port.parse::<u16>().ok())
            && !ports.contains(&port)
        {
            ports.push(port);
        }
    }
    ports
}

/// `docker ps --format` template: id, published ports, then one column per
/// label so label values may contain any character but a newline
fn ps_format() -> String {
    format!(
        "{{{{.ID}}}}\t{{{{.Ports}}}}\t{{{{.Label \"{}\"}}}}\t{{{{.Label \"{}\"}}}}",
        RECORD_LABEL, PROJECT_LABEL
    )
}

fn parse_ps(output: &str) -> Vec<RunningContainer> {
    let mut containers: Vec<RunningContainer> = Vec::new();
    for line in output.lines().filter(|l| !l.trim().is_empty()) {
        let mut columns = line.splitn(4, '\t');
        let runtime_ref = columns.next().unwrap_or_default().trim().to_string();
        let ports = columns.next().unwrap_or_default();

        if runtime_ref.is_empty() || containers.iter().any(|c| c.runtime_ref == runtime_ref) {
            continue;
        }

        // Only managed containers are listed
        let mut labels = BTreeMap::from([(MANAGED_LABEL.to_string(), "true".to_string())]);
        for key in [RECORD_LABEL, PROJECT_LABEL] {
            let value = columns.next().unwrap_or_default();
            if !value.is_empty() {
                labels.insert(key.to_string(), value.to_string());
            }
        }

        containers.push(RunningContainer {
            runtime_ref,
            host_ports: parse_host_ports(ports),
            labels,
        });
    }
    containers
}

fn args(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

#[async_trait]
impl RuntimeClient for DockerCli {
    async fn ping(&self, timeout: Duration) -> Result<String> {
        let output = self
            .exec(
                "ping",
                args(&["version", "--format", "{{.Server.Version}}"]),
                timeout,
            )
            .await?;
        Ok(output.stdout.trim().to_string())
    }

    async fn create(&self, request: &CreateRequest, timeout: Duration) -> Result<RuntimeRef> {
        info!(
            "Creating container {} for project {} on port {}",
            request.name, request.spec.project_id, request.host_port
        );

        let source_dir = self.write_sources(request).await?;
        let output = self
            .exec("create", self.create_args(request, &source_dir), timeout)
            .await?;

        let runtime_ref = output.stdout.trim().to_string();
        if runtime_ref.is_empty() {
            return Err(Error::Parse("docker create printed no container id".to_string()));
        }
        Ok(runtime_ref)
    }

    async fn start(&self, runtime_ref: &str, timeout: Duration) -> Result<()> {
        self.exec("start", args(&["start", runtime_ref]), timeout)
            .await?;
        Ok(())
    }

    async fn stop(&self, runtime_ref: &str, grace: Duration, timeout: Duration) -> Result<()> {
        let grace = grace.as_secs().to_string();
        self.exec("stop", args(&["stop", "-t", &grace, runtime_ref]), timeout)
            .await?;
        Ok(())
    }

    async fn remove(&self, runtime_ref: &str, timeout: Duration) -> Result<()> {
        // Resolve the name first so the materialized sources can go too
        let name = match self
            .exec(
                "inspect",
                args(&["inspect", "--format", "{{.Name}}", runtime_ref]),
                timeout,
            )
            .await
        {
            Ok(output) => output.stdout.trim().trim_start_matches('/').to_string(),
            Err(Error::NotFound(_)) => runtime_ref.to_string(),
            Err(e) => return Err(e),
        };

        match self
            .exec("remove", args(&["rm", "-f", runtime_ref]), timeout)
            .await
        {
            Ok(_) | Err(Error::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let dir = self.project_dir(&name);
        if !name.is_empty() && async_fs::metadata(&dir).await.is_ok() {
            if let Err(e) = async_fs::remove_dir_all(&dir).await {
                warn!("Failed to clean up sources at {:?}: {}", dir, e);
            }
        }
        Ok(())
    }

    async fn inspect(&self, runtime_ref: &str, timeout: Duration) -> Result<RuntimeStatus> {
        let output = self
            .exec(
                "inspect",
                args(&["inspect", "--format", "{{json .State}}", runtime_ref]),
                timeout,
            )
            .await?;
        parse_state(&output.stdout)
    }

    async fn logs(&self, runtime_ref: &str, tail: usize, timeout: Duration) -> Result<Vec<String>> {
        let tail_arg = tail.to_string();
        let output = self
            .exec(
                "logs",
                args(&["logs", "--timestamps", "--tail", &tail_arg, runtime_ref]),
                timeout,
            )
            .await?;
        Ok(merge_logs(&output.stdout, &output.stderr, tail))
    }

    async fn list_running(&self, timeout: Duration) -> Result<Vec<RunningContainer>> {
        let managed = format!("label={}=true", MANAGED_LABEL);
        let format = ps_format();
        let output = self
            .exec(
                "list",
                args(&[
                    "ps",
                    "--no-trunc",
                    "--filter",
                    &managed,
                    "--filter",
                    "status=running",
                    "--format",
                    &format,
                ]),
                timeout,
            )
            .await?;
        Ok(parse_ps(&output.stdout))
    }
}
