//! Sled database backend for container records

use super::RecordStore;
use crate::{
    error::Result,
    models::{ContainerRecord, ProjectSpec},
};
use async_trait::async_trait;
use std::path::Path;
use tracing::{debug, error, info};

/// Sled-based record store
///
/// Three trees: `records` (id to record JSON), `projects` (a key-only index
/// of `project_id \0 record_id`) and `specs` (project id to spec JSON).
pub struct SledStore {
    db: sled::Db,
    records: sled::Tree,
    projects: sled::Tree,
    specs: sled::Tree,
}

fn project_prefix(project_id: &str) -> Vec<u8> {
    let mut key = project_id.as_bytes().to_vec();
    key.push(0);
    key
}

fn project_key(project_id: &str, record_id: &str) -> Vec<u8> {
    let mut key = project_prefix(project_id);
    key.extend_from_slice(record_id.as_bytes());
    key
}

impl SledStore {
    /// Open (or create) a store at `path`
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        info!("Opening sled record store at {:?}", path);
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Create a temporary store that is deleted on drop (for testing)
    pub async fn temporary() -> Result<Self> {
        info!("Creating temporary sled record store");
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> Result<Self> {
        let records = db.open_tree("records")?;
        let projects = db.open_tree("projects")?;
        let specs = db.open_tree("specs")?;

        Ok(Self {
            db,
            records,
            projects,
            specs,
        })
    }

    fn decode_all(
        values: impl Iterator<Item = sled::Result<sled::IVec>>,
    ) -> Result<Vec<ContainerRecord>> {
        let mut records: Vec<ContainerRecord> = Vec::new();
        for value in values {
            records.push(serde_json::from_slice(&value?)?);
        }
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(records)
    }
}

#[async_trait]
impl RecordStore for SledStore {
    async fn init(&self) -> Result<()> {
        self.db.flush_async().await?;
        Ok(())
    }

    async fn put(&self, record: &ContainerRecord) -> Result<()> {
        debug!("Storing record {} ({})", record.id, record.status);

        let value = serde_json::to_vec(record)?;
        // Index first: a dangling index key is harmless, a record missing
        // from the index would be invisible to find_by_project.
        self.projects
            .insert(project_key(&record.project_id, &record.id), Vec::<u8>::new())?;
        self.records.insert(record.id.as_bytes(), value)?;

        self.db.flush_async().await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<ContainerRecord>> {
        match self.records.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn delete(&self, id: &str) -> Result<Option<ContainerRecord>> {
        debug!("Deleting record {}", id);

        let Some(bytes) = self.records.remove(id.as_bytes())? else {
            return Ok(None);
        };
        let record: ContainerRecord = serde_json::from_slice(&bytes)?;
        self.projects
            .remove(project_key(&record.project_id, &record.id))?;

        self.db.flush_async().await?;
        Ok(Some(record))
    }

    async fn list(&self) -> Result<Vec<ContainerRecord>> {
        Self::decode_all(self.records.iter().values())
    }

    async fn find_by_project(&self, project_id: &str) -> Result<Vec<ContainerRecord>> {
        let prefix = project_prefix(project_id);
        let mut values = Vec::new();

        for key in self.projects.scan_prefix(&prefix).keys() {
            let key = key?;
            let record_id = &key[prefix.len()..];
            if let Some(value) = self.records.get(record_id)? {
                values.push(Ok(value));
            }
        }

        let records = Self::decode_all(values.into_iter())?;
        Ok(records
            .into_iter()
            .filter(|r| r.project_id == project_id)
            .collect())
    }

    async fn compare_and_put(
        &self,
        expected: &ContainerRecord,
        next: &ContainerRecord,
    ) -> Result<bool> {
        let key = expected.id.as_bytes();

        let Some(current_bytes) = self.records.get(key)? else {
            return Ok(false);
        };
        let current: ContainerRecord = serde_json::from_slice(&current_bytes)?;
        if &current != expected {
            return Ok(false);
        }

        // Swap against the raw stored bytes so the check does not depend on
        // serialization being byte-for-byte stable.
        let next_bytes = serde_json::to_vec(next)?;
        match self
            .records
            .compare_and_swap(key, Some(current_bytes), Some(next_bytes))?
        {
            Ok(()) => {
                debug!(
                    "Record {} swapped {} -> {}",
                    next.id, expected.status, next.status
                );
                self.db.flush_async().await?;
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    async fn put_spec(&self, spec: &ProjectSpec) -> Result<()> {
        debug!("Storing spec for project {}", spec.project_id);

        let value = serde_json::to_vec(spec)?;
        self.specs.insert(spec.project_id.as_bytes(), value)?;
        self.db.flush_async().await?;
        Ok(())
    }

    async fn get_spec(&self, project_id: &str) -> Result<Option<ProjectSpec>> {
        match self.specs.get(project_id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}

impl Drop for SledStore {
    fn drop(&mut self) {
        if let Err(e) = self.db.flush() {
            error!("Failed to flush record store on drop: {}", e);
        }
    }
}
