//! Periodic cleanup of expired, dead and orphaned containers

use crate::{Orchestrator, ReaperConfig, orchestrator::tracks};
use async_runtime_compat::{Spawner, runtime_utils::sleep};
use chrono::{DateTime, Utc};
use container_store::{ContainerRecord, ContainerStatus};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// What one sweep did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Active records stopped and removed for exceeding their lifetime
    pub expired: Vec<String>,
    /// Stopped records removed after their retention period
    pub retired: Vec<String>,
    /// Running records checked against the runtime
    pub refreshed: usize,
    /// Runtime references of orphaned containers that were removed
    pub orphans_removed: Vec<String>,
    /// Ports whose unconfirmed leases were reclaimed
    pub leases_reclaimed: Vec<u16>,
    /// Failures encountered along the way
    pub errors: Vec<String>,
}

impl SweepReport {
    /// Whether the sweep changed anything
    pub fn is_empty(&self) -> bool {
        self.expired.is_empty()
            && self.retired.is_empty()
            && self.orphans_removed.is_empty()
            && self.leases_reclaimed.is_empty()
            && self.errors.is_empty()
    }
}

/// Handle to a running reaper task
#[derive(Debug, Clone)]
pub struct ReaperHandle {
    stopped: Arc<AtomicBool>,
}

impl ReaperHandle {
    /// Ask the reaper to exit; it finishes the sweep it is in
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    /// Whether a stop was requested
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// Sweeps the orchestrator's records and the runtime on an interval
pub struct Reaper {
    orchestrator: Arc<Orchestrator>,
    config: ReaperConfig,
}

fn older_than(since: DateTime<Utc>, limit: Duration, now: DateTime<Utc>) -> bool {
    (now - since).to_std().is_ok_and(|age| age > limit)
}

impl Reaper {
    /// Create a reaper over an orchestrator
    pub fn new(orchestrator: Arc<Orchestrator>, config: ReaperConfig) -> Self {
        Self {
            orchestrator,
            config,
        }
    }

    /// Run sweeps in the background until the handle is stopped
    pub fn spawn(self, spawner: &dyn Spawner) -> ReaperHandle {
        let handle = ReaperHandle {
            stopped: Arc::new(AtomicBool::new(false)),
        };

        let stopped = handle.stopped.clone();
        spawner.spawn(Box::pin(async move {
            self.run(stopped).await;
        }));

        handle
    }

    async fn run(self, stopped: Arc<AtomicBool>) {
        let interval = self.config.interval();
        info!("Reaper started with interval {:?}", interval);

        loop {
            sleep(interval).await;
            if stopped.load(Ordering::SeqCst) {
                break;
            }

            let report = self.sweep().await;
            if report.is_empty() {
                debug!("Sweep found nothing to do ({} refreshed)", report.refreshed);
            } else {
                info!(
                    "Sweep: {} expired, {} retired, {} orphans, {} leases reclaimed, {} errors",
                    report.expired.len(),
                    report.retired.len(),
                    report.orphans_removed.len(),
                    report.leases_reclaimed.len(),
                    report.errors.len()
                );
            }
        }

        info!("Reaper stopped");
    }

    /// Run one sweep
    pub async fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();

        match self.orchestrator.list().await {
            Ok(records) => self.sweep_records(records, &mut report).await,
            Err(e) => {
                error!("Reaper could not list records: {}", e);
                report.errors.push(format!("list records: {}", e));
            }
        }

        self.sweep_orphans(&mut report).await;
        self.reclaim_leases(&mut report).await;
        report
    }

    async fn sweep_records(&self, records: Vec<ContainerRecord>, report: &mut SweepReport) {
        let now = Utc::now();

        for record in records {
            if record.is_active() {
                let since = record.started_at.unwrap_or(record.created_at);
                if older_than(since, self.config.max_lifetime(), now) {
                    self.expire(&record, report).await;
                } else if record.status == ContainerStatus::Running {
                    match self.orchestrator.refresh(&record.id).await {
                        Ok(_) => report.refreshed += 1,
                        Err(e) => report.errors.push(format!("refresh {}: {}", record.id, e)),
                    }
                }
            } else if record.status == ContainerStatus::Stopped {
                let since = record.stopped_at.unwrap_or(record.updated_at);
                if older_than(since, self.config.stopped_retention(), now) {
                    match self.orchestrator.remove_container(&record.id).await {
                        Ok(_) => report.retired.push(record.id.clone()),
                        Err(e) => report.errors.push(format!("retire {}: {}", record.id, e)),
                    }
                }
            }
        }
    }

    async fn expire(&self, record: &ContainerRecord, report: &mut SweepReport) {
        info!(
            "Container {} of {} exceeded its lifetime",
            record.id, record.project_id
        );

        if let Err(e) = self.orchestrator.stop_container(&record.id, None).await {
            warn!("Stopping expired container {} failed: {}", record.id, e);
        }
        match self.orchestrator.remove_container(&record.id).await {
            Ok(_) => report.expired.push(record.id.clone()),
            Err(e) => report.errors.push(format!("expire {}: {}", record.id, e)),
        }
    }

    async fn sweep_orphans(&self, report: &mut SweepReport) {
        let timeout = self.orchestrator.config().call_timeout();
        let running = match self.orchestrator.runtime().list_running(timeout).await {
            Ok(running) => running,
            Err(e) => {
                warn!("Reaper could not list running containers: {}", e);
                report.errors.push(format!("list running: {}", e));
                return;
            }
        };

        let records = match self.orchestrator.list().await {
            Ok(records) => records,
            Err(e) => {
                report.errors.push(format!("list records: {}", e));
                return;
            }
        };

        let tracked: HashSet<&str> = records
            .iter()
            .filter_map(|r| {
                r.runtime_ref
                    .as_deref()
                    .filter(|runtime_ref| tracks(r, runtime_ref))
            })
            .collect();

        let mut seen = HashSet::new();
        for container in running {
            if tracked.contains(container.runtime_ref.as_str())
                || !seen.insert(container.runtime_ref.clone())
            {
                continue;
            }

            match self.orchestrator.remove_orphan(&container).await {
                Ok(true) => report.orphans_removed.push(container.runtime_ref.clone()),
                Ok(false) => {}
                Err(e) => report
                    .errors
                    .push(format!("orphan {}: {}", container.runtime_ref, e)),
            }
        }
    }

    async fn reclaim_leases(&self, report: &mut SweepReport) {
        let live: HashSet<String> = match self.orchestrator.list().await {
            Ok(records) => records
                .into_iter()
                .filter(|r| r.is_active())
                .map(|r| r.id)
                .collect(),
            Err(e) => {
                report.errors.push(format!("list records: {}", e));
                return;
            }
        };

        report.leases_reclaimed = self
            .orchestrator
            .ports()
            .reclaim_stale(self.config.lease_timeout(), &live);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_older_than() {
        let now = Utc::now();
        let hour_ago = now - chrono::Duration::hours(1);
        assert!(older_than(hour_ago, Duration::from_secs(60), now));
        assert!(!older_than(hour_ago, Duration::from_secs(7200), now));
        // Clock skew: a timestamp in the future is never old
        assert!(!older_than(now + chrono::Duration::hours(1), Duration::ZERO, now));
    }

    #[test]
    fn test_empty_report() {
        let mut report = SweepReport::default();
        assert!(report.is_empty());
        report.refreshed = 3;
        assert!(report.is_empty());
        report.orphans_removed.push("abc".to_string());
        assert!(!report.is_empty());
    }
}
