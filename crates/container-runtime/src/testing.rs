//! In-memory runtime for tests
//!
//! [`FakeRuntime`] keeps containers in a map and lets tests inject
//! timeouts, failures, delays, crashes and orphans.

use crate::{
    CreateRequest, Error, MANAGED_LABEL, Result, RunningContainer, RuntimeClient, RuntimeRef,
    RuntimeStatus,
};
use async_runtime_compat::runtime_utils::sleep;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

/// Runtime operations a test can observe or interfere with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// `ping`
    Ping,
    /// `create`
    Create,
    /// `start`
    Start,
    /// `stop`
    Stop,
    /// `remove`
    Remove,
    /// `inspect`
    Inspect,
    /// `logs`
    Logs,
    /// `list_running`
    ListRunning,
}

impl Operation {
    fn name(self) -> &'static str {
        match self {
            Operation::Ping => "ping",
            Operation::Create => "create",
            Operation::Start => "start",
            Operation::Stop => "stop",
            Operation::Remove => "remove",
            Operation::Inspect => "inspect",
            Operation::Logs => "logs",
            Operation::ListRunning => "list",
        }
    }
}

/// A fault to apply to the next call of an operation
#[derive(Debug, Clone)]
pub enum Injected {
    /// Report a timeout; `applied` decides whether the engine did the work
    Timeout {
        /// Whether the operation took effect before the timeout
        applied: bool,
    },
    /// Fail with the given engine message
    Failure(String),
    /// Fail as if the engine were down
    Unavailable,
}

#[derive(Debug, Clone)]
struct FakeContainer {
    id: String,
    name: String,
    state: String,
    host_port: Option<u16>,
    labels: BTreeMap<String, String>,
    logs: Vec<String>,
    exit_code: Option<i64>,
    oom_killed: bool,
}

#[derive(Default)]
struct Inner {
    containers: BTreeMap<String, FakeContainer>,
    next_id: u64,
    injected: HashMap<Operation, VecDeque<Injected>>,
    delays: HashMap<Operation, Duration>,
    calls: Vec<(Operation, String)>,
    removed: Vec<String>,
    unavailable: bool,
}

impl Inner {
    fn next_id(&mut self) -> String {
        self.next_id += 1;
        format!("fake{:012x}", self.next_id)
    }

    fn resolve(&self, runtime_ref: &str) -> Option<String> {
        if self.containers.contains_key(runtime_ref) {
            return Some(runtime_ref.to_string());
        }
        self.containers
            .values()
            .find(|c| c.name == runtime_ref)
            .map(|c| c.id.clone())
    }

    fn container_mut(&mut self, runtime_ref: &str) -> Result<&mut FakeContainer> {
        let id = self
            .resolve(runtime_ref)
            .ok_or_else(|| Error::NotFound(runtime_ref.to_string()))?;
        self.containers
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(runtime_ref.to_string()))
    }

    fn create(&mut self, request: &CreateRequest) -> Result<RuntimeRef> {
        if let Some((path, reason)) = request.spec.invalid_path() {
            return Err(Error::InvalidSpec(format!("{}: {}", path, reason)));
        }
        if self.resolve(&request.name).is_some() {
            return Err(Error::Failed {
                operation: "create",
                message: format!("container name {} is already in use", request.name),
            });
        }

        let id = self.next_id();
        self.containers.insert(
            id.clone(),
            FakeContainer {
                id: id.clone(),
                name: request.name.clone(),
                state: "created".to_string(),
                host_port: Some(request.host_port),
                labels: request.labels.clone(),
                logs: Vec::new(),
                exit_code: None,
                oom_killed: false,
            },
        );
        Ok(id)
    }

    fn start(&mut self, runtime_ref: &str) -> Result<()> {
        let id = self
            .resolve(runtime_ref)
            .ok_or_else(|| Error::NotFound(runtime_ref.to_string()))?;
        let port = self.containers.get(&id).and_then(|c| c.host_port);

        let collision = self
            .containers
            .values()
            .any(|c| c.id != id && c.state == "running" && port.is_some() && c.host_port == port);
        if collision {
            return Err(Error::Failed {
                operation: "start",
                message: "port is already allocated".to_string(),
            });
        }

        let container = self.container_mut(&id)?;
        container.state = "running".to_string();
        container.exit_code = None;
        Ok(())
    }

    fn stop(&mut self, runtime_ref: &str) -> Result<()> {
        let container = self.container_mut(runtime_ref)?;
        if container.state == "running" {
            container.state = "exited".to_string();
            container.exit_code = Some(0);
        }
        Ok(())
    }

    fn remove(&mut self, runtime_ref: &str) -> Result<()> {
        if let Some(id) = self.resolve(runtime_ref) {
            self.containers.remove(&id);
            self.removed.push(id);
        }
        Ok(())
    }

    fn inspect(&mut self, runtime_ref: &str) -> Result<RuntimeStatus> {
        let container = self.container_mut(runtime_ref)?;
        let mut status = RuntimeStatus::from_state(container.state.clone());
        status.exit_code = container.exit_code;
        status.oom_killed = container.oom_killed;
        if container.state == "running" {
            status.started_at = Some(Utc::now());
        }
        Ok(status)
    }

    fn logs(&mut self, runtime_ref: &str, tail: usize) -> Result<Vec<String>> {
        let container = self.container_mut(runtime_ref)?;
        let skip = container.logs.len().saturating_sub(tail);
        Ok(container.logs[skip..].to_vec())
    }

    fn list_running(&self) -> Vec<RunningContainer> {
        self.containers
            .values()
            .filter(|c| c.state == "running")
            .filter(|c| c.labels.get(MANAGED_LABEL).map(String::as_str) == Some("true"))
            .map(|c| RunningContainer {
                runtime_ref: c.id.clone(),
                host_ports: c.host_port.into_iter().collect(),
                labels: c.labels.clone(),
            })
            .collect()
    }
}

enum Plan {
    Apply,
    ApplyThenTimeout,
    Fail(Error),
}

/// In-memory [`RuntimeClient`]
#[derive(Default)]
pub struct FakeRuntime {
    inner: Mutex<Inner>,
}

impl FakeRuntime {
    /// Create an empty runtime
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a fault for the next call of `operation`
    pub fn fail_next(&self, operation: Operation, injected: Injected) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .injected
            .entry(operation)
            .or_default()
            .push_back(injected);
    }

    /// Make every call fail as if the engine were down
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.lock().unwrap().unavailable = unavailable;
    }

    /// Delay every call of `operation`
    pub fn set_delay(&self, operation: Operation, delay: Duration) {
        self.inner.lock().unwrap().delays.insert(operation, delay);
    }

    /// Force a container into an engine state, e.g. `exited` for a crash
    pub fn set_state(&self, runtime_ref: &str, state: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Ok(container) = inner.container_mut(runtime_ref) {
            container.state = state.to_string();
            if state == "exited" {
                container.exit_code = Some(1);
            }
        }
    }

    /// Simulate the kernel killing a container for exceeding its memory
    pub fn oom_kill(&self, runtime_ref: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Ok(container) = inner.container_mut(runtime_ref) {
            container.state = "exited".to_string();
            container.exit_code = Some(137);
            container.oom_killed = true;
        }
    }

    /// Add a running managed container that no call to `create` produced
    pub fn insert_orphan(
        &self,
        record_id: Option<&str>,
        project_id: Option<&str>,
        host_port: Option<u16>,
    ) -> RuntimeRef {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id();

        let mut labels = BTreeMap::from([(MANAGED_LABEL.to_string(), "true".to_string())]);
        if let Some(record_id) = record_id {
            labels.insert(crate::RECORD_LABEL.to_string(), record_id.to_string());
        }
        if let Some(project_id) = project_id {
            labels.insert(crate::PROJECT_LABEL.to_string(), project_id.to_string());
        }

        inner.containers.insert(
            id.clone(),
            FakeContainer {
                id: id.clone(),
                name: format!("orphan-{}", id),
                state: "running".to_string(),
                host_port,
                labels,
                logs: Vec::new(),
                exit_code: None,
                oom_killed: false,
            },
        );
        id
    }

    /// Append log lines to a container
    pub fn push_logs<I, S>(&self, runtime_ref: &str, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut inner = self.inner.lock().unwrap();
        if let Ok(container) = inner.container_mut(runtime_ref) {
            container.logs.extend(lines.into_iter().map(Into::into));
        }
    }

    /// Engine state of a container, `None` if it does not exist
    pub fn state_of(&self, runtime_ref: &str) -> Option<String> {
        let inner = self.inner.lock().unwrap();
        inner
            .resolve(runtime_ref)
            .and_then(|id| inner.containers.get(&id))
            .map(|c| c.state.clone())
    }

    /// Number of containers the engine knows
    pub fn container_count(&self) -> usize {
        self.inner.lock().unwrap().containers.len()
    }

    /// Ids of running containers
    pub fn running(&self) -> Vec<RuntimeRef> {
        let inner = self.inner.lock().unwrap();
        inner
            .containers
            .values()
            .filter(|c| c.state == "running")
            .map(|c| c.id.clone())
            .collect()
    }

    /// How many times `operation` was called
    pub fn calls(&self, operation: Operation) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.calls.iter().filter(|(op, _)| *op == operation).count()
    }

    /// References passed to `operation`, in call order
    pub fn call_refs(&self, operation: Operation) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        inner
            .calls
            .iter()
            .filter(|(op, _)| *op == operation)
            .map(|(_, r)| r.clone())
            .collect()
    }

    /// Ids of containers actually removed, in removal order
    pub fn removed(&self) -> Vec<RuntimeRef> {
        self.inner.lock().unwrap().removed.clone()
    }

    async fn plan(&self, operation: Operation, target: &str, timeout: Duration) -> Plan {
        let (unavailable, delay, injected) = {
            let mut inner = self.inner.lock().unwrap();
            inner.calls.push((operation, target.to_string()));
            let injected = inner
                .injected
                .get_mut(&operation)
                .and_then(|queue| queue.pop_front());
            (
                inner.unavailable,
                inner.delays.get(&operation).copied(),
                injected,
            )
        };

        if unavailable {
            return Plan::Fail(Error::Unavailable("fake runtime is down".to_string()));
        }

        if let Some(delay) = delay {
            if delay >= timeout {
                sleep(timeout).await;
                return Plan::ApplyThenTimeout;
            }
            sleep(delay).await;
        }

        match injected {
            None => Plan::Apply,
            Some(Injected::Timeout { applied: true }) => Plan::ApplyThenTimeout,
            Some(Injected::Timeout { applied: false }) => Plan::Fail(Error::Timeout {
                operation: operation.name(),
                after: timeout,
            }),
            Some(Injected::Failure(message)) => Plan::Fail(Error::Failed {
                operation: operation.name(),
                message,
            }),
            Some(Injected::Unavailable) => {
                Plan::Fail(Error::Unavailable("fake runtime is down".to_string()))
            }
        }
    }

    fn finish<T>(
        &self,
        plan: Plan,
        operation: Operation,
        timeout: Duration,
        apply: impl FnOnce(&mut Inner) -> Result<T>,
    ) -> Result<T> {
        match plan {
            Plan::Fail(e) => Err(e),
            Plan::Apply => apply(&mut *self.inner.lock().unwrap()),
            Plan::ApplyThenTimeout => {
                let _ = apply(&mut *self.inner.lock().unwrap());
                Err(Error::Timeout {
                    operation: operation.name(),
                    after: timeout,
                })
            }
        }
    }
}

#[async_trait]
impl RuntimeClient for FakeRuntime {
    async fn ping(&self, timeout: Duration) -> Result<String> {
        let plan = self.plan(Operation::Ping, "", timeout).await;
        self.finish(plan, Operation::Ping, timeout, |_| Ok("fake".to_string()))
    }

    async fn create(&self, request: &CreateRequest, timeout: Duration) -> Result<RuntimeRef> {
        let plan = self.plan(Operation::Create, &request.name, timeout).await;
        self.finish(plan, Operation::Create, timeout, |inner| {
            inner.create(request)
        })
    }

    async fn start(&self, runtime_ref: &str, timeout: Duration) -> Result<()> {
        let plan = self.plan(Operation::Start, runtime_ref, timeout).await;
        self.finish(plan, Operation::Start, timeout, |inner| {
            inner.start(runtime_ref)
        })
    }

    async fn stop(&self, runtime_ref: &str, _grace: Duration, timeout: Duration) -> Result<()> {
        let plan = self.plan(Operation::Stop, runtime_ref, timeout).await;
        self.finish(plan, Operation::Stop, timeout, |inner| inner.stop(runtime_ref))
    }

    async fn remove(&self, runtime_ref: &str, timeout: Duration) -> Result<()> {
        let plan = self.plan(Operation::Remove, runtime_ref, timeout).await;
        self.finish(plan, Operation::Remove, timeout, |inner| {
            inner.remove(runtime_ref)
        })
    }

    async fn inspect(&self, runtime_ref: &str, timeout: Duration) -> Result<RuntimeStatus> {
        let plan = self.plan(Operation::Inspect, runtime_ref, timeout).await;
        self.finish(plan, Operation::Inspect, timeout, |inner| {
            inner.inspect(runtime_ref)
        })
    }

    async fn logs(&self, runtime_ref: &str, tail: usize, timeout: Duration) -> Result<Vec<String>> {
        let plan = self.plan(Operation::Logs, runtime_ref, timeout).await;
        self.finish(plan, Operation::Logs, timeout, |inner| {
            inner.logs(runtime_ref, tail)
        })
    }

    async fn list_running(&self, timeout: Duration) -> Result<Vec<RunningContainer>> {
        let plan = self.plan(Operation::ListRunning, "", timeout).await;
        self.finish(plan, Operation::ListRunning, timeout, |inner| {
            Ok(inner.list_running())
        })
    }
}
