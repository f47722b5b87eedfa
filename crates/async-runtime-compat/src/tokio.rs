//! Tokio runtime spawner implementation

use crate::{BoxedTask, Spawner};

/// Spawner for the Tokio runtime
///
/// Must be used from inside a tokio runtime.
#[derive(Debug, Clone, Copy)]
pub struct TokioSpawner;

impl Spawner for TokioSpawner {
    fn spawn(&self, task: BoxedTask) {
        tokio::spawn(task);
    }
}
