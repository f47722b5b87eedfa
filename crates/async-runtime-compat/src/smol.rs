//! Smol runtime spawner implementation

use crate::{BoxedTask, Spawner};

/// Spawner for the Smol runtime
///
/// Spawned tasks are detached; they run until they finish on their own.
#[derive(Debug, Clone, Copy)]
pub struct SmolSpawner;

impl Spawner for SmolSpawner {
    fn spawn(&self, task: BoxedTask) {
        smol::spawn(task).detach();
    }
}
