//! In-memory record store

use super::RecordStore;
use crate::{
    error::Result,
    models::{ContainerRecord, ProjectSpec},
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

/// In-memory record store
///
/// Nothing survives the process. Used by tests and by the daemon's
/// `--ephemeral` mode.
pub struct MemoryStore {
    records: RwLock<HashMap<String, ContainerRecord>>,
    specs: RwLock<HashMap<String, ProjectSpec>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            specs: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn oldest_first(mut records: Vec<ContainerRecord>) -> Vec<ContainerRecord> {
    records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
    records
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn put(&self, record: &ContainerRecord) -> Result<()> {
        let mut records = self.records.write().unwrap();
        records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<ContainerRecord>> {
        let records = self.records.read().unwrap();
        Ok(records.get(id).cloned())
    }

    async fn delete(&self, id: &str) -> Result<Option<ContainerRecord>> {
        let mut records = self.records.write().unwrap();
        Ok(records.remove(id))
    }

    async fn list(&self) -> Result<Vec<ContainerRecord>> {
        let records = self.records.read().unwrap();
        Ok(oldest_first(records.values().cloned().collect()))
    }

    async fn find_by_project(&self, project_id: &str) -> Result<Vec<ContainerRecord>> {
        let records = self.records.read().unwrap();
        Ok(oldest_first(
            records
                .values()
                .filter(|r| r.project_id == project_id)
                .cloned()
                .collect(),
        ))
    }

    async fn compare_and_put(
        &self,
        expected: &ContainerRecord,
        next: &ContainerRecord,
    ) -> Result<bool> {
        let mut records = self.records.write().unwrap();
        match records.get(&expected.id) {
            Some(current) if current == expected => {
                records.insert(next.id.clone(), next.clone());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn put_spec(&self, spec: &ProjectSpec) -> Result<()> {
        let mut specs = self.specs.write().unwrap();
        specs.insert(spec.project_id.clone(), spec.clone());
        Ok(())
    }

    async fn get_spec(&self, project_id: &str) -> Result<Option<ProjectSpec>> {
        let specs = self.specs.read().unwrap();
        Ok(specs.get(project_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ContainerStatus;

    #[smol_potat::test]
    async fn test_compare_and_put_detects_concurrent_write() {
        let store = MemoryStore::new();
        let record = ContainerRecord::new_pending("p1");
        store.put(&record).await.unwrap();

        let mut first = record.clone();
        first.status = ContainerStatus::Error;
        first.last_error = Some("boom".to_string());
        assert!(store.compare_and_put(&record, &first).await.unwrap());

        // A second writer still holding the old snapshot loses
        let mut second = record.clone();
        second.status = ContainerStatus::Error;
        assert!(!store.compare_and_put(&record, &second).await.unwrap());

        let stored = store.require(&record.id).await.unwrap();
        assert_eq!(stored.last_error.as_deref(), Some("boom"));
    }

    #[smol_potat::test]
    async fn test_compare_and_put_on_missing_record() {
        let store = MemoryStore::new();
        let record = ContainerRecord::new_pending("p1");
        assert!(!store.compare_and_put(&record, &record).await.unwrap());
        assert!(store.get(&record.id).await.unwrap().is_none());
    }

    #[smol_potat::test]
    async fn test_require_reports_missing_id() {
        let store = MemoryStore::new();
        let err = store.require("nope").await.unwrap_err();
        assert!(matches!(err, crate::Error::RecordNotFound(id) if id == "nope"));
    }
}
