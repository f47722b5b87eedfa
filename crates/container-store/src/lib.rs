//! Durable state for the container orchestrator
//!
//! This crate owns the persisted data model ([`ContainerRecord`],
//! [`ProjectSpec`]) and the [`RecordStore`] trait the orchestrator writes it
//! through. Two backends ship with it:
//!
//! - [`MemoryStore`] for tests and throwaway deployments
//! - [`SledStore`] for durable storage on local disk
//!
//! # Example
//!
//! ```no_run
//! use container_store::{ContainerRecord, RecordStore, SledStore};
//!
//! # async fn example() -> container_store::Result<()> {
//! let store = SledStore::open("/var/lib/orchestrator/records").await?;
//! store.init().await?;
//!
//! let record = ContainerRecord::new_pending("project-42");
//! store.put(&record).await?;
//!
//! let active = store.find_by_project("project-42").await?;
//! assert_eq!(active.len(), 1);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod backend;
pub mod error;
pub mod models;

pub use backend::{MemoryStore, RecordStore, SledStore};
pub use error::{Error, Result};
pub use models::{ContainerRecord, ContainerStatus, ProjectSpec};
