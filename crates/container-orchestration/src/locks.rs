//! Per-project serialization of mutating operations

use futures::lock::{Mutex as AsyncMutex, OwnedMutexGuard};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Guard held while operating on one project
pub type ProjectGuard = OwnedMutexGuard<()>;

/// One async mutex per project id.
///
/// Guards are owned so they can be held across awaits; dropping the guard
/// on any exit path releases the project. Different projects never contend.
#[derive(Default)]
pub struct ProjectLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl ProjectLocks {
    /// Create an empty lock table
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `project_id`
    pub async fn lock(&self, project_id: &str) -> ProjectGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap();
            // Entries nobody holds or waits on can go
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks
                .entry(project_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Number of projects currently tracked
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap().len()
    }

    /// Whether no project is tracked
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
