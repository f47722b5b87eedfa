//! Shared setup for orchestration tests

#![allow(dead_code)]

use container_orchestration::{Orchestrator, OrchestratorConfig};
use container_runtime::testing::FakeRuntime;
use container_store::{ContainerRecord, ContainerStatus, MemoryStore, ProjectSpec, RecordStore};
use std::sync::Arc;

pub struct Harness {
    pub orchestrator: Arc<Orchestrator>,
    pub runtime: Arc<FakeRuntime>,
    pub store: Arc<dyn RecordStore>,
}

pub fn harness() -> Harness {
    harness_with(OrchestratorConfig::default())
}

pub fn harness_with(config: OrchestratorConfig) -> Harness {
    let runtime = Arc::new(FakeRuntime::new());
    let store: Arc<dyn RecordStore> = Arc::new(MemoryStore::new());
    let orchestrator = Arc::new(Orchestrator::new(runtime.clone(), store.clone(), config));
    Harness {
        orchestrator,
        runtime,
        store,
    }
}

/// Config whose `status()` always asks the runtime
pub fn eager_config() -> OrchestratorConfig {
    OrchestratorConfig {
        freshness_secs: 0,
        ..OrchestratorConfig::default()
    }
}

pub fn spec(project_id: &str) -> ProjectSpec {
    ProjectSpec::new(project_id)
        .with_file("package.json", r#"{"scripts":{"start":"node index.js"}}"#)
        .with_file("index.js", "require('http').createServer().listen(3000)")
}

pub async fn assert_consistent(store: &Arc<dyn RecordStore>) {
    for record in store.list().await.unwrap() {
        assert!(
            record.runtime_ref_consistent(),
            "record {} is {} with runtime_ref {:?}",
            record.id,
            record.status,
            record.runtime_ref
        );
    }
}

pub async fn running_records(store: &Arc<dyn RecordStore>, project_id: &str) -> Vec<ContainerRecord> {
    store
        .find_by_project(project_id)
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.status == ContainerStatus::Running)
        .collect()
}
