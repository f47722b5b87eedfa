//! The container state machine
//!
//! The only code that writes [`ContainerRecord`]s. Every write re-reads the
//! persisted record, checks the transition table and swaps atomically
//! against what it read, so a concurrent writer makes the transition fail
//! instead of silently winning.

use crate::{Error, Observation, Result};
use chrono::Utc;
use container_store::{ContainerRecord, ContainerStatus, RecordStore};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Check if a status transition is valid
pub fn is_valid_transition(from: ContainerStatus, to: ContainerStatus) -> bool {
    use ContainerStatus::*;

    match (from, to) {
        // Forward path
        (Pending, Starting) => true,
        (Starting, Running) => true,
        (Running, Stopping) => true,
        (Starting, Stopping) => true,
        (Stopping, Stopped) => true,

        // Any non-terminal state can fail
        (Pending | Starting | Running | Stopping, Error) => true,

        // Removal
        (Stopped | Error, Removed) => true,

        _ => false,
    }
}

/// Persists record lifecycle changes
#[derive(Clone)]
pub struct StateMachine {
    store: Arc<dyn RecordStore>,
}

impl StateMachine {
    /// Create a state machine writing through `store`
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// The store records are written to
    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Create and persist a `pending` record for a project
    pub async fn create_pending(&self, project_id: &str) -> Result<ContainerRecord> {
        let record = ContainerRecord::new_pending(project_id);
        self.store.put(&record).await?;
        debug!("Created pending record {} for {}", record.id, project_id);
        Ok(record)
    }

    /// `pending → starting` once the runtime created the container
    pub async fn mark_starting(
        &self,
        id: &str,
        runtime_ref: &str,
        port: u16,
    ) -> Result<ContainerRecord> {
        self.transition(id, ContainerStatus::Starting, |record| {
            record.runtime_ref = Some(runtime_ref.to_string());
            record.port = Some(port);
        })
        .await
    }

    /// `starting → running`
    pub async fn mark_running(&self, id: &str) -> Result<ContainerRecord> {
        self.transition(id, ContainerStatus::Running, |record| {
            record.started_at = Some(Utc::now());
            record.last_error = None;
        })
        .await
    }

    /// `running|starting → stopping`
    pub async fn mark_stopping(&self, id: &str) -> Result<ContainerRecord> {
        self.transition(id, ContainerStatus::Stopping, |_| {}).await
    }

    /// `stopping → stopped`
    pub async fn mark_stopped(&self, id: &str) -> Result<ContainerRecord> {
        self.transition(id, ContainerStatus::Stopped, |record| {
            record.stopped_at = Some(Utc::now());
            record.port = None;
        })
        .await
    }

    /// Any non-terminal state `→ error`
    pub async fn mark_error(&self, id: &str, message: &str) -> Result<ContainerRecord> {
        self.transition(id, ContainerStatus::Error, |record| {
            record.last_error = Some(message.to_string());
            record.stopped_at = Some(Utc::now());
            record.port = None;
        })
        .await
    }

    /// `stopped|error → removed`
    pub async fn mark_removed(&self, id: &str) -> Result<ContainerRecord> {
        self.transition(id, ContainerStatus::Removed, |record| {
            record.stopped_at.get_or_insert_with(Utc::now);
            record.port = None;
        })
        .await
    }

    /// Refresh `updated_at` without changing the status.
    ///
    /// Losing the race to another writer is fine here; the newer record is
    /// returned.
    pub async fn touch(&self, id: &str) -> Result<ContainerRecord> {
        let current = self.store.require(id).await?;
        let mut next = current.clone();
        next.updated_at = Utc::now();

        if self.store.compare_and_put(&current, &next).await? {
            Ok(next)
        } else {
            Ok(self.store.require(id).await?)
        }
    }

    /// Store `message` as the record's `last_error`, keeping its status.
    ///
    /// Fails with `InvalidTransition` if another writer got there first.
    pub async fn record_error(&self, id: &str, message: &str) -> Result<ContainerRecord> {
        let current = self.store.require(id).await?;
        let mut next = current.clone();
        next.last_error = Some(message.to_string());
        next.updated_at = Utc::now();

        if !self.store.compare_and_put(&current, &next).await? {
            return Err(Error::InvalidTransition {
                id: id.to_string(),
                from: current.status,
                to: current.status,
            });
        }

        debug!("Recorded error on {}: {}", id, message);
        Ok(next)
    }

    /// Bring a persisted record in line with what the runtime reports
    pub async fn reconcile(
        &self,
        record: &ContainerRecord,
        observation: &Observation,
    ) -> Result<ContainerRecord> {
        use ContainerStatus::*;

        match (record.status, observation.status) {
            (Running, Running) if !observation.missing => self.touch(&record.id).await,
            (Running, _) => {
                let message = observation.describe_exit();
                warn!("Container {} died: {}", record.id, message);
                self.mark_error(&record.id, &message).await
            }
            (Starting, Running) if !observation.missing => {
                info!("Container {} came up", record.id);
                self.mark_running(&record.id).await
            }
            (Starting, _) if observation.missing || observation.status != Starting => {
                let message = observation.describe_exit();
                warn!("Container {} failed to start: {}", record.id, message);
                self.mark_error(&record.id, &message).await
            }
            (Stopping, Stopped) => self.mark_stopped(&record.id).await,
            (Stopping, _) if observation.missing => self.mark_stopped(&record.id).await,
            (Stopped, Running) if !observation.missing => {
                warn!(
                    "Container {} is stopped but still running in the runtime",
                    record.id
                );
                self.touch(&record.id).await
            }
            _ => self.touch(&record.id).await,
        }
    }

    async fn transition(
        &self,
        id: &str,
        to: ContainerStatus,
        update: impl FnOnce(&mut ContainerRecord),
    ) -> Result<ContainerRecord> {
        let current = self.store.require(id).await?;
        let from = current.status;

        let invalid = || Error::InvalidTransition {
            id: id.to_string(),
            from,
            to,
        };

        if !is_valid_transition(from, to) {
            return Err(invalid());
        }

        let mut next = current.clone();
        next.status = to;
        next.updated_at = Utc::now();
        update(&mut next);

        if !to.holds_runtime_ref() {
            next.runtime_ref = None;
        }
        if !next.runtime_ref_consistent() {
            return Err(invalid());
        }

        if !self.store.compare_and_put(&current, &next).await? {
            warn!("Record {} changed during {} -> {}", id, from, to);
            return Err(invalid());
        }

        info!(
            "Container {} ({}) {} -> {}",
            id, next.project_id, from, to
        );
        Ok(next)
    }
}
