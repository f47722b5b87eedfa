//! The orchestrator: one active container per project
//!
//! All mutating operations on a project run under that project's lock. The
//! runtime is driven in one direction only; whether an operation took effect
//! is confirmed by inspecting afterwards, never by callbacks.

use crate::{
    Error, HealthAccessor, OperationError, OperationResult, OrchestratorConfig, PortAllocator,
    ProjectLocks, StateMachine, locks::ProjectGuard,
};
use container_runtime::{CreateRequest, RunningContainer, RuntimeClient};
use container_store::{ContainerRecord, ContainerStatus, ProjectSpec, RecordStore};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Options of [`Orchestrator::start_container`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StartOptions {
    /// Replace an active container instead of failing with `AlreadyRunning`
    pub force: bool,
}

impl StartOptions {
    /// Options that replace an active container
    pub fn forced() -> Self {
        Self { force: true }
    }
}

/// Result of [`Orchestrator::restart_container`]
#[derive(Debug)]
pub struct RestartOutcome {
    /// The new record
    pub record: ContainerRecord,
    /// Why stopping the old container failed, if it did
    pub stop_error: Option<Error>,
}

/// Coordinates the runtime, the record store and the port allocator
pub struct Orchestrator {
    runtime: Arc<dyn RuntimeClient>,
    store: Arc<dyn RecordStore>,
    states: StateMachine,
    ports: PortAllocator,
    locks: ProjectLocks,
    health: HealthAccessor,
    config: OrchestratorConfig,
}

impl Orchestrator {
    /// Create an orchestrator over a runtime and a record store
    pub fn new(
        runtime: Arc<dyn RuntimeClient>,
        store: Arc<dyn RecordStore>,
        config: OrchestratorConfig,
    ) -> Self {
        let health = HealthAccessor::new(
            runtime.clone(),
            config.call_timeout(),
            config.logs.clone(),
        );

        Self {
            states: StateMachine::new(store.clone()),
            ports: PortAllocator::new(config.ports),
            locks: ProjectLocks::new(),
            runtime,
            store,
            health,
            config,
        }
    }

    /// Configuration in use
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// The port allocator
    pub fn ports(&self) -> &PortAllocator {
        &self.ports
    }

    /// The runtime client
    pub fn runtime(&self) -> &Arc<dyn RuntimeClient> {
        &self.runtime
    }

    /// The record store
    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub(crate) async fn lock_project(&self, project_id: &str) -> ProjectGuard {
        self.locks.lock(project_id).await
    }

    /// Deterministic container name of a record
    pub fn container_name(&self, record: &ContainerRecord) -> String {
        let project: String = record
            .project_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '-'
                }
            })
            .collect();
        format!("{}-{}-{}", self.config.container_prefix, project, record.id)
    }

    /// Restore in-memory state after a process restart.
    ///
    /// Re-leases the ports of active records and fails records left
    /// `pending` by a start that never finished. Returns the number of
    /// restored leases.
    pub async fn recover(&self) -> OperationResult<usize> {
        let mut restored = 0;

        for record in self.store.list().await? {
            if record.status == ContainerStatus::Pending {
                let _guard = self.lock_project(&record.project_id).await;
                let current = self.store.require(&record.id).await?;
                if current.status == ContainerStatus::Pending {
                    warn!("Failing record {} left pending by a restart", record.id);
                    self.states
                        .mark_error(&record.id, "orchestrator restarted before the container was created")
                        .await?;
                }
                continue;
            }

            if record.is_active()
                && let Some(port) = record.port
            {
                self.ports.restore(port, &record.id);
                restored += 1;
            }
        }

        info!("Recovered {} port leases", restored);
        Ok(restored)
    }

    /// Start a container for a project.
    ///
    /// Fails with `AlreadyRunning` when the project has an active container,
    /// unless `options.force` is set, in which case that container is stopped
    /// first.
    pub async fn start_container(
        &self,
        spec: ProjectSpec,
        options: StartOptions,
    ) -> OperationResult<ContainerRecord> {
        if spec.project_id.trim().is_empty() {
            return Err(Error::InvalidSpec("project_id must not be empty".to_string()).into());
        }
        // Runtime listings are line oriented
        if spec.project_id.chars().any(char::is_control) {
            return Err(Error::InvalidSpec(
                "project_id must not contain control characters".to_string(),
            )
            .into());
        }
        if let Some((path, reason)) = spec.invalid_path() {
            return Err(Error::InvalidSpec(format!("{}: {}", path, reason)).into());
        }

        let _guard = self.lock_project(&spec.project_id).await;
        self.start_locked(spec, options).await
    }

    async fn start_locked(
        &self,
        spec: ProjectSpec,
        options: StartOptions,
    ) -> OperationResult<ContainerRecord> {
        if let Some(active) = self.active_record(&spec.project_id).await? {
            if !options.force {
                return Err(OperationError::with_record(
                    Error::AlreadyRunning {
                        project_id: spec.project_id.clone(),
                        id: active.id.clone(),
                    },
                    Some(active),
                ));
            }

            info!(
                "Replacing active container {} of project {}",
                active.id, spec.project_id
            );
            let replaced = match self.stop_locked(active, self.config.stop_timeout()).await {
                Ok(record) => record,
                Err(e) => match e.record {
                    Some(record) if !record.is_active() => record,
                    _ => return Err(e),
                },
            };
            debug!("Replaced record {} is {}", replaced.id, replaced.status);
        }

        self.store.put_spec(&spec).await?;
        let record = self.states.create_pending(&spec.project_id).await?;
        self.launch(record, &spec).await
    }

    /// Lease a port, create and start the container of a `pending` record
    async fn launch(
        &self,
        record: ContainerRecord,
        spec: &ProjectSpec,
    ) -> OperationResult<ContainerRecord> {
        let timeout = self.config.call_timeout();

        let occupied: HashSet<u16> = match self.runtime.list_running(timeout).await {
            Ok(running) => running
                .iter()
                .flat_map(|c| c.host_ports.iter().copied())
                .collect(),
            Err(e) => return Err(self.fail_start(&record.id, None, e.into()).await),
        };

        let port = match self.ports.lease(spec.port, &record.id, &occupied) {
            Ok(port) => port,
            Err(e) => return Err(self.fail_start(&record.id, None, e).await),
        };

        let name = self.container_name(&record);
        let request = CreateRequest::new(&name, spec.clone(), port, &record.id);

        let runtime_ref = match self.runtime.create(&request, timeout).await {
            Ok(runtime_ref) => runtime_ref,
            Err(e) => return Err(self.fail_start(&record.id, Some(&name), e.into()).await),
        };

        let record = match self.states.mark_starting(&record.id, &runtime_ref, port).await {
            Ok(record) => record,
            Err(e) => return Err(self.fail_start(&record.id, Some(&runtime_ref), e).await),
        };

        match self.runtime.start(&runtime_ref, timeout).await {
            Ok(()) => {}
            Err(e) if e.is_timeout() => {
                warn!(
                    "Start of {} timed out, probing runtime once",
                    record.id
                );
                match self.health.observe(&runtime_ref).await {
                    Ok(observation) if observation.is_running() => {
                        debug!("Inspect after timeout found {} running", record.id);
                    }
                    _ => {
                        return Err(self
                            .fail_start(&record.id, Some(&runtime_ref), e.into())
                            .await);
                    }
                }
            }
            Err(e) => {
                return Err(self
                    .fail_start(&record.id, Some(&runtime_ref), e.into())
                    .await);
            }
        }

        self.ports.confirm(port);
        let record = self
            .states
            .mark_running(&record.id)
            .await
            .map_err(|e| OperationError::with_record(e, Some(record.clone())))?;

        info!(
            "Project {} running as {} on port {}",
            record.project_id, record.id, port
        );
        Ok(record)
    }

    /// Record a failed start: mark the record `error`, give back its port and
    /// remove whatever the runtime already created
    async fn fail_start(&self, id: &str, cleanup: Option<&str>, error: Error) -> OperationError {
        warn!("Start of {} failed: {}", id, error);

        let record = match self.states.mark_error(id, &error.to_string()).await {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Could not mark {} as failed: {}", id, e);
                self.store.get(id).await.ok().flatten()
            }
        };
        self.ports.release_for(id);

        if let Some(target) = cleanup {
            self.discard(target).await;
        }

        OperationError::with_record(error, record)
    }

    /// Best-effort removal of a runtime container
    async fn discard(&self, runtime_ref: &str) {
        if let Err(e) = self
            .runtime
            .remove(runtime_ref, self.config.call_timeout())
            .await
        {
            warn!("Failed to remove container {}: {}", runtime_ref, e);
        }
    }

    /// Record `error` on `record` without changing its status and wrap it
    /// with the record as persisted afterwards
    async fn fail_with(&self, error: Error, record: ContainerRecord) -> OperationError {
        let record = match self.states.record_error(&record.id, &error.to_string()).await {
            Ok(updated) => updated,
            Err(e) => {
                warn!("Could not record error on {}: {}", record.id, e);
                record
            }
        };
        OperationError::with_record(error, Some(record))
    }

    /// Stop a container, giving its process `grace` (or the configured stop
    /// timeout) to exit.
    ///
    /// Stopping a `stopped`, `removed` or `error` record returns it unchanged.
    pub async fn stop_container(
        &self,
        id: &str,
        grace: Option<Duration>,
    ) -> OperationResult<ContainerRecord> {
        let record = self.store.require(id).await?;
        let _guard = self.lock_project(&record.project_id).await;
        let record = self.store.require(id).await?;

        self.stop_locked(record, grace.unwrap_or(self.config.stop_timeout()))
            .await
    }

    async fn stop_locked(
        &self,
        record: ContainerRecord,
        grace: Duration,
    ) -> OperationResult<ContainerRecord> {
        let record = match record.status {
            ContainerStatus::Stopped | ContainerStatus::Removed | ContainerStatus::Error => {
                debug!("Container {} already {}", record.id, record.status);
                return Ok(record);
            }
            ContainerStatus::Pending => {
                // Only a start that died midway leaves a pending record behind
                let failed = self
                    .states
                    .mark_error(&record.id, "stopped before the container was created")
                    .await
                    .map_err(keep(&record))?;
                self.ports.release_for(&record.id);
                self.discard(&self.container_name(&record)).await;
                return Ok(failed);
            }
            // A previous stop was interrupted; issue it again
            ContainerStatus::Stopping => record,
            ContainerStatus::Starting | ContainerStatus::Running => {
                self.states
                    .mark_stopping(&record.id)
                    .await
                    .map_err(keep(&record))?
            }
        };

        let result = self.stop_runtime(&record, grace).await;
        self.ports.release_for(&record.id);
        result
    }

    async fn stop_runtime(
        &self,
        record: &ContainerRecord,
        grace: Duration,
    ) -> OperationResult<ContainerRecord> {
        let Some(runtime_ref) = record.runtime_ref.clone() else {
            let failed = self
                .states
                .mark_error(&record.id, "stopping record has no runtime reference")
                .await
                .map_err(keep(record))?;
            return Ok(failed);
        };

        let deadline = self.config.call_timeout() + grace;
        match self.runtime.stop(&runtime_ref, grace, deadline).await {
            Ok(()) | Err(container_runtime::Error::NotFound(_)) => self
                .states
                .mark_stopped(&record.id)
                .await
                .map_err(keep(record)),
            Err(e) if e.is_timeout() => {
                warn!("Stop of {} timed out, inspecting runtime once", record.id);
                let observed = self.health.observe(&runtime_ref).await;
                match observed {
                    Ok(observation)
                        if observation.missing
                            || observation.status == ContainerStatus::Stopped =>
                    {
                        self.states
                            .mark_stopped(&record.id)
                            .await
                            .map_err(keep(record))
                    }
                    _ => {
                        let error = Error::from(e);
                        let failed = self
                            .states
                            .mark_error(&record.id, &error.to_string())
                            .await
                            .map_err(keep(record))?;
                        self.discard(&runtime_ref).await;
                        Err(OperationError::with_record(error, Some(failed)))
                    }
                }
            }
            Err(e) => {
                let error = Error::from(e);
                warn!("Stop of {} failed: {}", record.id, error);
                let failed = self
                    .states
                    .mark_error(&record.id, &error.to_string())
                    .await
                    .map_err(keep(record))?;
                self.discard(&runtime_ref).await;
                Err(OperationError::with_record(error, Some(failed)))
            }
        }
    }

    /// Stop a project's container and start a fresh one from the last spec.
    ///
    /// A failed stop does not prevent the new start; it is reported in
    /// [`RestartOutcome::stop_error`], or in [`OperationError::stop_error`]
    /// when the start fails as well.
    pub async fn restart_container(&self, id: &str) -> OperationResult<RestartOutcome> {
        let record = self.store.require(id).await?;
        let _guard = self.lock_project(&record.project_id).await;
        let record = self.store.require(id).await?;

        let Some(spec) = self.store.get_spec(&record.project_id).await? else {
            return Err(OperationError::with_record(
                Error::InvalidSpec(format!("no stored spec for project {}", record.project_id)),
                Some(record),
            ));
        };

        let mut stop_error = None;
        let record = if record.is_active() {
            match self.stop_locked(record, self.config.stop_timeout()).await {
                Ok(record) => record,
                Err(e) => {
                    warn!("Restart: stop of {} failed: {}", id, e.error);
                    stop_error = Some(e.error);
                    self.store.require(id).await?
                }
            }
        } else {
            record
        };

        if let Err(e) = self.remove_locked(record, true).await {
            warn!("Restart: removal of {} failed: {}", id, e.error);
        }

        match self.start_locked(spec, StartOptions::default()).await {
            Ok(record) => Ok(RestartOutcome { record, stop_error }),
            Err(e) => Err(e.with_stop_error(stop_error)),
        }
    }

    /// Stop (if needed) and delete a container, marking its record `removed`
    pub async fn remove_container(&self, id: &str) -> OperationResult<ContainerRecord> {
        let record = self.store.require(id).await?;
        let _guard = self.lock_project(&record.project_id).await;
        let record = self.store.require(id).await?;

        self.remove_locked(record, false).await
    }

    async fn remove_locked(
        &self,
        record: ContainerRecord,
        best_effort: bool,
    ) -> OperationResult<ContainerRecord> {
        if record.status == ContainerStatus::Removed {
            return Ok(record);
        }

        let record = if record.is_active() {
            match self.stop_locked(record, self.config.stop_timeout()).await {
                Ok(record) => record,
                Err(e) => match e.record {
                    Some(record) if !record.is_active() => record,
                    _ => return Err(e),
                },
            }
        } else {
            record
        };

        if let Some(runtime_ref) = &record.runtime_ref {
            match self
                .runtime
                .remove(runtime_ref, self.config.call_timeout())
                .await
            {
                Ok(()) => {}
                Err(e) if best_effort => {
                    warn!("Failed to remove container {}: {}", runtime_ref, e);
                }
                Err(e) => return Err(self.fail_with(e.into(), record).await),
            }
        }

        let removed = self
            .states
            .mark_removed(&record.id)
            .await
            .map_err(keep(&record))?;
        self.ports.release_for(&removed.id);
        info!("Removed container {} of {}", removed.id, removed.project_id);
        Ok(removed)
    }

    /// Current state of a record.
    ///
    /// Records in `starting`, `running` or `stopping` that have not been
    /// written for longer than the freshness threshold are checked against
    /// the runtime first.
    pub async fn status(&self, id: &str) -> OperationResult<ContainerRecord> {
        let record = self.store.require(id).await?;
        if !self.is_stale(&record) {
            return Ok(record);
        }
        self.refresh(id).await
    }

    /// Check a record against the runtime regardless of its age
    pub async fn refresh(&self, id: &str) -> OperationResult<ContainerRecord> {
        let record = self.store.require(id).await?;
        let _guard = self.lock_project(&record.project_id).await;
        let record = self.store.require(id).await?;

        self.refresh_locked(record).await
    }

    fn is_stale(&self, record: &ContainerRecord) -> bool {
        let observed = matches!(
            record.status,
            ContainerStatus::Starting | ContainerStatus::Running | ContainerStatus::Stopping
        );
        let age = chrono::Utc::now() - record.updated_at;
        observed && age.to_std().unwrap_or_default() >= self.config.freshness()
    }

    async fn refresh_locked(&self, record: ContainerRecord) -> OperationResult<ContainerRecord> {
        if !matches!(
            record.status,
            ContainerStatus::Starting | ContainerStatus::Running | ContainerStatus::Stopping
        ) {
            return Ok(record);
        }
        let Some(runtime_ref) = record.runtime_ref.clone() else {
            return Ok(record);
        };

        let observation = match self.health.observe(&runtime_ref).await {
            Ok(observation) => observation,
            Err(e) => {
                // Status is left alone; the next read or sweep retries
                warn!("Could not inspect {}: {}", record.id, e);
                return Err(self.fail_with(e, record).await);
            }
        };

        let updated = self
            .states
            .reconcile(&record, &observation)
            .await
            .map_err(|e| OperationError::with_record(e, Some(record.clone())))?;

        match updated.status {
            ContainerStatus::Error if record.status != ContainerStatus::Error => {
                self.ports.release_for(&updated.id);
                if !observation.missing {
                    self.discard(&runtime_ref).await;
                }
            }
            ContainerStatus::Stopped => {
                self.ports.release_for(&updated.id);
            }
            _ => {}
        }
        Ok(updated)
    }

    /// The last `tail` log lines of a running (or stopping) container
    pub async fn logs(&self, id: &str, tail: Option<usize>) -> OperationResult<Vec<String>> {
        let record = self.store.require(id).await?;

        let runtime_ref = match (&record.status, &record.runtime_ref) {
            (ContainerStatus::Running | ContainerStatus::Stopping, Some(runtime_ref)) => {
                runtime_ref.clone()
            }
            _ => {
                return Err(OperationError::with_record(
                    Error::NotRunning {
                        id: record.id.clone(),
                        status: record.status,
                    },
                    Some(record),
                ));
            }
        };

        match self.health.logs(&runtime_ref, tail).await {
            Ok(lines) => Ok(lines),
            Err(e) => Err(self.fail_with(e, record).await),
        }
    }

    /// The project's active record, or its most recent one
    pub async fn project_status(&self, project_id: &str) -> OperationResult<ContainerRecord> {
        let records = self.store.find_by_project(project_id).await?;
        let current = records
            .iter()
            .rev()
            .find(|r| r.is_active())
            .or_else(|| records.last())
            .ok_or_else(|| Error::NotFound(format!("project {}", project_id)))?;

        self.status(&current.id).await
    }

    /// Every record, oldest first
    pub async fn list(&self) -> OperationResult<Vec<ContainerRecord>> {
        Ok(self.store.list().await?)
    }

    /// Remove a running container no live record accounts for.
    ///
    /// When the container names its project the decision is re-checked under
    /// that project's lock. Returns whether the container was removed.
    pub(crate) async fn remove_orphan(&self, container: &RunningContainer) -> OperationResult<bool> {
        let _guard = match container.project_id() {
            Some(project_id) => {
                let guard = self.lock_project(project_id).await;
                let tracked = self
                    .store
                    .find_by_project(project_id)
                    .await?
                    .into_iter()
                    .any(|r| tracks(&r, &container.runtime_ref));
                if tracked {
                    debug!("Container {} was claimed meanwhile", container.runtime_ref);
                    return Ok(false);
                }
                Some(guard)
            }
            None => None,
        };

        info!(
            "Removing orphaned container {} (record {:?})",
            container.runtime_ref,
            container.record_id()
        );
        self.runtime
            .remove(&container.runtime_ref, self.config.call_timeout())
            .await?;
        Ok(true)
    }

    async fn active_record(&self, project_id: &str) -> OperationResult<Option<ContainerRecord>> {
        let records = self.store.find_by_project(project_id).await?;
        Ok(records.into_iter().rev().find(|r| r.is_active()))
    }
}

/// Attach `record` to a failed write so callers still see the persisted state
fn keep(record: &ContainerRecord) -> impl FnOnce(Error) -> OperationError + '_ {
    move |e| OperationError::with_record(e, Some(record.clone()))
}

/// Whether `record` is a live owner of the runtime container `runtime_ref`
pub(crate) fn tracks(record: &ContainerRecord, runtime_ref: &str) -> bool {
    matches!(
        record.status,
        ContainerStatus::Starting | ContainerStatus::Running | ContainerStatus::Stopping
    ) && record.runtime_ref.as_deref() == Some(runtime_ref)
}
