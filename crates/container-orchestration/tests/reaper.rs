//! Reaper sweeps: orphans, expiry, retention, crash detection, lease reclaim

mod common;

use common::{assert_consistent, harness, harness_with, spec};
use container_orchestration::{OrchestratorConfig, Reaper, ReaperConfig, StartOptions};
use container_runtime::testing::{Injected, Operation};
use container_store::ContainerStatus;
use std::collections::HashSet;
use std::time::Duration;

fn reaper_config() -> ReaperConfig {
    ReaperConfig::default()
}

#[smol_potat::test]
async fn test_orphan_without_record_is_removed_exactly_once() {
    let h = harness();
    let orphan = h.runtime.insert_orphan(None, None, Some(3000));
    let reaper = Reaper::new(h.orchestrator.clone(), reaper_config());

    let report = reaper.sweep().await;
    assert_eq!(report.orphans_removed, vec![orphan.clone()]);
    assert_eq!(h.runtime.call_refs(Operation::Remove), vec![orphan.clone()]);

    let report = reaper.sweep().await;
    assert!(report.orphans_removed.is_empty());
    assert_eq!(h.runtime.removed(), vec![orphan]);
}

#[smol_potat::test]
async fn test_tracked_containers_are_left_alone() {
    let h = harness();
    let record = h
        .orchestrator
        .start_container(spec("p1"), StartOptions::default())
        .await
        .unwrap();
    let reaper = Reaper::new(h.orchestrator.clone(), reaper_config());

    let report = reaper.sweep().await;
    assert!(report.is_empty(), "{:?}", report);
    assert_eq!(report.refreshed, 1);
    assert_eq!(h.runtime.calls(Operation::Remove), 0);
    let runtime_ref = record.runtime_ref.unwrap();
    assert_eq!(h.runtime.state_of(&runtime_ref).as_deref(), Some("running"));
}

#[smol_potat::test]
async fn test_running_container_of_stopped_record_is_killed() {
    let h = harness();
    let record = h
        .orchestrator
        .start_container(spec("p1"), StartOptions::default())
        .await
        .unwrap();
    let runtime_ref = record.runtime_ref.clone().unwrap();
    h.orchestrator.stop_container(&record.id, None).await.unwrap();

    // Something restarted it behind our back
    h.runtime.set_state(&runtime_ref, "running");

    let reaper = Reaper::new(h.orchestrator.clone(), reaper_config());
    let report = reaper.sweep().await;

    assert_eq!(report.orphans_removed, vec![runtime_ref.clone()]);
    assert!(h.runtime.state_of(&runtime_ref).is_none());
    assert_eq!(
        h.store.require(&record.id).await.unwrap().status,
        ContainerStatus::Stopped
    );
}

#[smol_potat::test]
async fn test_labelled_orphan_of_other_record() {
    let h = harness();
    h.orchestrator
        .start_container(spec("p1"), StartOptions::default())
        .await
        .unwrap();
    let orphan = h
        .runtime
        .insert_orphan(Some("forgotten-record"), Some("p1"), Some(3500));

    let reaper = Reaper::new(h.orchestrator.clone(), reaper_config());
    let report = reaper.sweep().await;

    assert_eq!(report.orphans_removed, vec![orphan]);
    assert_eq!(h.runtime.running().len(), 1);
}

#[smol_potat::test]
async fn test_expired_containers_are_stopped_and_removed() {
    let h = harness();
    let record = h
        .orchestrator
        .start_container(spec("p1"), StartOptions::default())
        .await
        .unwrap();
    smol::Timer::after(Duration::from_millis(20)).await;

    let reaper = Reaper::new(
        h.orchestrator.clone(),
        ReaperConfig {
            max_lifetime_secs: 0,
            ..reaper_config()
        },
    );
    let report = reaper.sweep().await;

    assert_eq!(report.expired, vec![record.id.clone()]);
    let removed = h.store.require(&record.id).await.unwrap();
    assert_eq!(removed.status, ContainerStatus::Removed);
    assert_eq!(h.runtime.container_count(), 0);
    assert_eq!(h.orchestrator.ports().leased_count(), 0);
    assert_consistent(&h.store).await;
}

#[smol_potat::test]
async fn test_stopped_containers_are_retired() {
    let h = harness();
    let record = h
        .orchestrator
        .start_container(spec("p1"), StartOptions::default())
        .await
        .unwrap();
    h.orchestrator.stop_container(&record.id, None).await.unwrap();
    smol::Timer::after(Duration::from_millis(20)).await;

    let reaper = Reaper::new(
        h.orchestrator.clone(),
        ReaperConfig {
            stopped_retention_secs: 0,
            ..reaper_config()
        },
    );
    let report = reaper.sweep().await;

    assert_eq!(report.retired, vec![record.id.clone()]);
    assert_eq!(
        h.store.require(&record.id).await.unwrap().status,
        ContainerStatus::Removed
    );
    assert_eq!(h.runtime.container_count(), 0);
}

#[smol_potat::test]
async fn test_sweep_detects_crashes() {
    let h = harness();
    let record = h
        .orchestrator
        .start_container(spec("p1"), StartOptions::default())
        .await
        .unwrap();
    h.runtime
        .set_state(record.runtime_ref.as_deref().unwrap(), "dead");

    let reaper = Reaper::new(h.orchestrator.clone(), reaper_config());
    let report = reaper.sweep().await;

    assert_eq!(report.refreshed, 1);
    let failed = h.store.require(&record.id).await.unwrap();
    assert_eq!(failed.status, ContainerStatus::Error);
    assert!(failed.last_error.is_some());
    assert_eq!(h.orchestrator.ports().leased_count(), 0);
}

#[smol_potat::test]
async fn test_unconfirmed_leases_are_reclaimed() {
    let h = harness();
    let port = h
        .orchestrator
        .ports()
        .lease(None, "never-started", &HashSet::new())
        .unwrap();
    smol::Timer::after(Duration::from_millis(20)).await;

    let reaper = Reaper::new(
        h.orchestrator.clone(),
        ReaperConfig {
            lease_timeout_secs: 0,
            ..reaper_config()
        },
    );
    let report = reaper.sweep().await;

    assert_eq!(report.leases_reclaimed, vec![port]);
    assert!(!h.orchestrator.ports().is_leased(port));
}

#[smol_potat::test]
async fn test_sweep_survives_runtime_outage() {
    let h = harness();
    h.orchestrator
        .start_container(spec("p1"), StartOptions::default())
        .await
        .unwrap();
    h.runtime.fail_next(Operation::ListRunning, Injected::Unavailable);

    let reaper = Reaper::new(h.orchestrator.clone(), reaper_config());
    let report = reaper.sweep().await;

    assert!(report.orphans_removed.is_empty());
    assert!(report.errors.iter().any(|e| e.contains("list running")));
}

#[smol_potat::test]
async fn test_spawned_reaper_runs_until_stopped() {
    let h = harness_with(OrchestratorConfig::default());
    let orphan = h.runtime.insert_orphan(None, None, None);

    let reaper = Reaper::new(
        h.orchestrator.clone(),
        ReaperConfig {
            interval_secs: 1,
            ..reaper_config()
        },
    );
    let handle = reaper.spawn(&async_runtime_compat::smol::SmolSpawner);

    smol::Timer::after(Duration::from_millis(1500)).await;
    handle.stop();
    assert!(handle.is_stopped());
    assert_eq!(h.runtime.removed(), vec![orphan]);
}
