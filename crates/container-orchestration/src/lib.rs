//! # Container orchestration
//!
//! Provisions one container per user project and keeps the persisted view of
//! it honest. The [`Orchestrator`] drives the container runtime, the
//! [`StateMachine`] owns every record write, the [`PortAllocator`] hands out
//! host ports and the [`Reaper`] sweeps up what dies, expires or leaks.
//!
//! ## Example
//!
//! ```no_run
//! use container_orchestration::{Orchestrator, OrchestratorConfig, StartOptions};
//! use container_runtime::{DockerCli, DockerConfig};
//! use container_store::{MemoryStore, ProjectSpec};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), container_orchestration::OperationError> {
//! let orchestrator = Orchestrator::new(
//!     Arc::new(DockerCli::new(DockerConfig::default())),
//!     Arc::new(MemoryStore::new()),
//!     OrchestratorConfig::default(),
//! );
//!
//! let spec = ProjectSpec::new("project-42")
//!     .with_file("package.json", r#"{"scripts":{"start":"node index.js"}}"#)
//!     .with_file("index.js", "require('http').createServer().listen(3000)");
//!
//! let record = orchestrator
//!     .start_container(spec, StartOptions::default())
//!     .await?;
//! println!("{} running on port {:?}", record.id, record.port);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(unsafe_code)]

mod config;
mod error;
mod health;
mod locks;
mod orchestrator;
mod ports;
mod reaper;
mod state;

pub use config::{LogConfig, OrchestratorConfig, PortRange, ReaperConfig};
pub use error::{Error, ErrorKind, OperationError, OperationResult, Result};
pub use health::{HealthAccessor, Observation, canonical_status, truncate_logs};
pub use locks::ProjectLocks;
pub use orchestrator::{Orchestrator, RestartOutcome, StartOptions};
pub use ports::{PortAllocator, PortLease};
pub use reaper::{Reaper, ReaperHandle, SweepReport};
pub use state::{StateMachine, is_valid_transition};
