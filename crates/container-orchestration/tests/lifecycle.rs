//! Start, stop, restart, remove and status against the fake runtime

mod common;

use common::{assert_consistent, eager_config, harness, harness_with, running_records, spec};
use container_orchestration::{ErrorKind, Orchestrator, OrchestratorConfig, StartOptions};
use container_runtime::testing::{FakeRuntime, Operation};
use container_store::{ContainerStatus, RecordStore, SledStore};
use std::sync::Arc;

#[smol_potat::test]
async fn test_start_runs_container_with_leased_port() {
    let h = harness();

    let record = h
        .orchestrator
        .start_container(spec("p1"), StartOptions::default())
        .await
        .unwrap();

    assert_eq!(record.status, ContainerStatus::Running);
    assert_eq!(record.port, Some(3000));
    assert!(record.started_at.is_some());
    let runtime_ref = record.runtime_ref.clone().unwrap();
    assert_eq!(h.runtime.state_of(&runtime_ref).as_deref(), Some("running"));

    let lease = h.orchestrator.ports().lease_of(3000).unwrap();
    assert_eq!(lease.container_id, record.id);
    assert!(lease.confirmed);

    // The project spec is kept for restarts
    assert_eq!(h.store.get_spec("p1").await.unwrap(), Some(spec("p1")));
}

#[smol_potat::test]
async fn test_second_start_is_already_running() {
    let h = harness();
    let first = h
        .orchestrator
        .start_container(spec("p1"), StartOptions::default())
        .await
        .unwrap();

    let err = h
        .orchestrator
        .start_container(spec("p1"), StartOptions::default())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::AlreadyRunning);
    assert_eq!(err.record.as_ref(), Some(&first));
    assert_eq!(h.store.require(&first.id).await.unwrap(), first);
    assert_eq!(h.runtime.calls(Operation::Create), 1);
}

#[smol_potat::test]
async fn test_forced_start_replaces_active_container() {
    let h = harness();
    let first = h
        .orchestrator
        .start_container(spec("p1"), StartOptions::default())
        .await
        .unwrap();

    let second = h
        .orchestrator
        .start_container(spec("p1"), StartOptions::forced())
        .await
        .unwrap();

    assert_ne!(first.id, second.id);
    let old = h.store.require(&first.id).await.unwrap();
    assert_eq!(old.status, ContainerStatus::Stopped);
    assert_eq!(running_records(&h.store, "p1").await.len(), 1);
    // The old port was released and handed out again
    assert_eq!(second.port, Some(3000));
    assert_consistent(&h.store).await;
}

#[smol_potat::test]
async fn test_stop_releases_port_and_is_idempotent() {
    let h = harness();
    let record = h
        .orchestrator
        .start_container(spec("p1"), StartOptions::default())
        .await
        .unwrap();
    let runtime_ref = record.runtime_ref.clone().unwrap();

    let stopped = h.orchestrator.stop_container(&record.id, None).await.unwrap();
    assert_eq!(stopped.status, ContainerStatus::Stopped);
    assert!(stopped.stopped_at.is_some());
    assert_eq!(stopped.runtime_ref.as_deref(), Some(runtime_ref.as_str()));
    assert!(!h.orchestrator.ports().is_leased(3000));
    assert_eq!(h.runtime.state_of(&runtime_ref).as_deref(), Some("exited"));

    // Stopping again changes nothing and never reaches the runtime
    let again = h.orchestrator.stop_container(&record.id, None).await.unwrap();
    assert_eq!(again, stopped);
    assert_eq!(h.runtime.calls(Operation::Stop), 1);
}

#[smol_potat::test]
async fn test_restart_starts_new_record_from_stored_spec() {
    let h = harness();
    let first = h
        .orchestrator
        .start_container(spec("p1"), StartOptions::default())
        .await
        .unwrap();
    let old_ref = first.runtime_ref.clone().unwrap();

    let outcome = h.orchestrator.restart_container(&first.id).await.unwrap();

    assert!(outcome.stop_error.is_none());
    assert_ne!(outcome.record.id, first.id);
    assert_eq!(outcome.record.status, ContainerStatus::Running);
    assert_eq!(
        h.store.require(&first.id).await.unwrap().status,
        ContainerStatus::Removed
    );
    assert!(h.runtime.state_of(&old_ref).is_none());
    assert_eq!(h.runtime.container_count(), 1);
    assert_consistent(&h.store).await;
}

#[smol_potat::test]
async fn test_restart_of_removed_record() {
    let h = harness();
    let first = h
        .orchestrator
        .start_container(spec("p1"), StartOptions::default())
        .await
        .unwrap();
    h.orchestrator.remove_container(&first.id).await.unwrap();

    let outcome = h.orchestrator.restart_container(&first.id).await.unwrap();
    assert_eq!(outcome.record.status, ContainerStatus::Running);
    assert_eq!(running_records(&h.store, "p1").await.len(), 1);
}

#[smol_potat::test]
async fn test_remove_container() {
    let h = harness();
    let record = h
        .orchestrator
        .start_container(spec("p1"), StartOptions::default())
        .await
        .unwrap();

    let removed = h.orchestrator.remove_container(&record.id).await.unwrap();
    assert_eq!(removed.status, ContainerStatus::Removed);
    assert!(removed.runtime_ref.is_none());
    assert_eq!(h.runtime.container_count(), 0);
    assert_eq!(h.orchestrator.ports().leased_count(), 0);

    let again = h.orchestrator.remove_container(&record.id).await.unwrap();
    assert_eq!(again, removed);

    let err = h.orchestrator.remove_container("missing").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[smol_potat::test]
async fn test_logs_only_for_running_containers() {
    let h = harness();
    let record = h
        .orchestrator
        .start_container(spec("p1"), StartOptions::default())
        .await
        .unwrap();
    h.runtime
        .push_logs(record.runtime_ref.as_deref().unwrap(), ["npm start", "listening on 3000"]);

    let lines = h.orchestrator.logs(&record.id, Some(1)).await.unwrap();
    assert_eq!(lines, vec!["listening on 3000".to_string()]);

    h.orchestrator.stop_container(&record.id, None).await.unwrap();
    let err = h.orchestrator.logs(&record.id, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotRunning);
    assert_eq!(err.record.unwrap().status, ContainerStatus::Stopped);
}

#[smol_potat::test]
async fn test_status_detects_crashed_container() {
    let h = harness_with(eager_config());
    let record = h
        .orchestrator
        .start_container(spec("p1"), StartOptions::default())
        .await
        .unwrap();
    let runtime_ref = record.runtime_ref.clone().unwrap();

    h.runtime.set_state(&runtime_ref, "exited");
    let status = h.orchestrator.status(&record.id).await.unwrap();

    assert_eq!(status.status, ContainerStatus::Error);
    assert_eq!(
        status.last_error.as_deref(),
        Some("container exited with code 1")
    );
    assert!(status.runtime_ref.is_none());
    assert!(!h.orchestrator.ports().is_leased(3000));
    // The dead container is cleaned up
    assert!(h.runtime.state_of(&runtime_ref).is_none());

    // A new start is allowed once the old container failed
    let next = h
        .orchestrator
        .start_container(spec("p1"), StartOptions::default())
        .await
        .unwrap();
    assert_eq!(next.status, ContainerStatus::Running);
}

#[smol_potat::test]
async fn test_status_detects_oom_kill() {
    let h = harness_with(eager_config());
    let record = h
        .orchestrator
        .start_container(spec("p1"), StartOptions::default())
        .await
        .unwrap();

    h.runtime.oom_kill(record.runtime_ref.as_deref().unwrap());
    let status = h.orchestrator.status(&record.id).await.unwrap();

    assert_eq!(status.status, ContainerStatus::Error);
    assert!(status.last_error.unwrap().contains("out of memory"));
}

#[smol_potat::test]
async fn test_fresh_status_does_not_touch_runtime() {
    let h = harness();
    let record = h
        .orchestrator
        .start_container(spec("p1"), StartOptions::default())
        .await
        .unwrap();
    let inspects = h.runtime.calls(Operation::Inspect);

    let status = h.orchestrator.status(&record.id).await.unwrap();
    assert_eq!(status, record);
    assert_eq!(h.runtime.calls(Operation::Inspect), inspects);
}

#[smol_potat::test]
async fn test_status_reports_runtime_outage() {
    let h = harness_with(eager_config());
    let record = h
        .orchestrator
        .start_container(spec("p1"), StartOptions::default())
        .await
        .unwrap();

    h.runtime.set_unavailable(true);
    let err = h.orchestrator.status(&record.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RuntimeUnavailable);

    // The outage is recorded but the container is not declared dead
    let attached = err.record.expect("record attached");
    assert_eq!(attached.status, ContainerStatus::Running);
    assert!(attached.last_error.is_some());
    assert_eq!(h.store.get(&record.id).await.unwrap(), Some(attached));
    assert!(h.orchestrator.ports().is_leased(record.port.unwrap()));

    h.runtime.set_unavailable(false);
    let status = h.orchestrator.status(&record.id).await.unwrap();
    assert_eq!(status.status, ContainerStatus::Running);
}

#[smol_potat::test]
async fn test_records_survive_restart_with_sled() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = Arc::new(FakeRuntime::new());
    // One handle for both lifetimes; sled holds an exclusive lock on the path
    let sled = Arc::new(SledStore::open(dir.path().join("records")).await.unwrap());

    let record = {
        let store: Arc<dyn RecordStore> = sled.clone();
        let orchestrator =
            Orchestrator::new(runtime.clone(), store, OrchestratorConfig::default());
        orchestrator
            .start_container(spec("p1"), StartOptions::default())
            .await
            .unwrap()
    };

    let store: Arc<dyn RecordStore> = sled;
    let orchestrator = Orchestrator::new(runtime.clone(), store, OrchestratorConfig::default());
    assert_eq!(orchestrator.recover().await.unwrap(), 1);
    assert!(orchestrator.ports().is_leased(record.port.unwrap()));

    // The restored lease keeps the port from being handed out twice
    let other = orchestrator
        .start_container(spec("p2"), StartOptions::default())
        .await
        .unwrap();
    assert_ne!(other.port, record.port);

    let outcome = orchestrator.restart_container(&record.id).await.unwrap();
    assert_eq!(outcome.record.status, ContainerStatus::Running);
}
