//! Record store backends

pub mod memory;
pub mod sled;

pub use memory::MemoryStore;
pub use self::sled::SledStore;

use crate::{
    error::{Error, Result},
    models::{ContainerRecord, ProjectSpec},
};
use async_trait::async_trait;

/// Durable key-value storage for container records and project specs.
///
/// Records are keyed by their `id`. Every lifecycle write goes through
/// [`RecordStore::compare_and_put`] so two writers racing on one record
/// cannot both win.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Initialize the backend
    async fn init(&self) -> Result<()>;

    /// Store a record unconditionally
    async fn put(&self, record: &ContainerRecord) -> Result<()>;

    /// Get a record by id
    async fn get(&self, id: &str) -> Result<Option<ContainerRecord>>;

    /// Remove a record, returning it if it existed
    async fn delete(&self, id: &str) -> Result<Option<ContainerRecord>>;

    /// List all records, oldest first
    async fn list(&self) -> Result<Vec<ContainerRecord>>;

    /// List a project's records, oldest first
    async fn find_by_project(&self, project_id: &str) -> Result<Vec<ContainerRecord>>;

    /// Replace `expected` with `next` only if the stored record still equals
    /// `expected`. Returns `false` when it does not (or is gone).
    async fn compare_and_put(
        &self,
        expected: &ContainerRecord,
        next: &ContainerRecord,
    ) -> Result<bool>;

    /// Store the latest spec of a project
    async fn put_spec(&self, spec: &ProjectSpec) -> Result<()>;

    /// Get the latest spec of a project
    async fn get_spec(&self, project_id: &str) -> Result<Option<ProjectSpec>>;

    /// Get a record that must exist
    async fn require(&self, id: &str) -> Result<ContainerRecord> {
        self.get(id)
            .await?
            .ok_or_else(|| Error::RecordNotFound(id.to_string()))
    }
}
