//! Runtime-agnostic async utilities
//!
//! The orchestrator crates never name an executor directly. Background work
//! (the reaper loop, connection handlers) is handed to a [`Spawner`], and
//! deadlines on container runtime calls go through [`runtime_utils::timeout`].
//!
//! # Examples
//!
//! ```no_run
//! use async_runtime_compat::prelude::*;
//!
//! fn start_background<S: Spawner>(spawner: &S) {
//!     spawner.spawn(Box::pin(async {
//!         sleep(std::time::Duration::from_secs(1)).await;
//!     }));
//! }
//! ```

#![warn(missing_docs)]

use std::future::Future;
use std::pin::Pin;

/// A boxed, sendable background task
pub type BoxedTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// A spawner that can run futures on an async runtime
pub trait Spawner: Send + Sync {
    /// Spawn a future on the runtime; it runs to completion in the background.
    fn spawn(&self, task: BoxedTask);
}

#[cfg(feature = "tokio")]
pub mod tokio;

#[cfg(feature = "smol")]
pub mod smol;

pub mod runtime_utils;

/// Prelude for common imports
pub mod prelude {
    pub use crate::runtime_utils::{Elapsed, sleep, timeout};
    pub use crate::{BoxedTask, Spawner};

    #[cfg(feature = "tokio")]
    pub use crate::tokio::TokioSpawner;

    #[cfg(feature = "smol")]
    pub use crate::smol::SmolSpawner;
}
