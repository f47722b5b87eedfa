//! Host port allocation for project containers

use crate::{Error, PortRange, Result};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info};

/// A port handed to a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortLease {
    /// Leased host port
    pub port: u16,
    /// Record id of the holder
    pub container_id: String,
    /// When the lease was handed out
    pub leased_at: DateTime<Utc>,
    /// Set once the container actually started on the port
    pub confirmed: bool,
}

/// Hands out host ports from a fixed range.
///
/// The lease table only lives in memory; callers pass the ports the runtime
/// reports as published so a restarted process never hands one out twice.
pub struct PortAllocator {
    range: PortRange,
    leases: Mutex<BTreeMap<u16, PortLease>>,
}

impl PortAllocator {
    /// Create an allocator over `range`
    pub fn new(range: PortRange) -> Self {
        Self {
            range,
            leases: Mutex::new(BTreeMap::new()),
        }
    }

    /// The range ports are taken from
    pub fn range(&self) -> PortRange {
        self.range
    }

    /// Lease a port for `container_id`.
    ///
    /// `preferred` is honoured when it is inside the range and free;
    /// otherwise the range is scanned from its start so released ports are
    /// reused first.
    pub fn lease(
        &self,
        preferred: Option<u16>,
        container_id: &str,
        occupied: &HashSet<u16>,
    ) -> Result<u16> {
        let mut leases = self.leases.lock().unwrap();
        let free = |port: u16| !leases.contains_key(&port) && !occupied.contains(&port);

        let port = match preferred {
            Some(port) if self.range.contains(port) && free(port) => Some(port),
            Some(port) => {
                debug!("Preferred port {} unavailable, scanning", port);
                (self.range.start..=self.range.end).find(|p| free(*p))
            }
            None => (self.range.start..=self.range.end).find(|p| free(*p)),
        };

        let Some(port) = port else {
            return Err(Error::NoPortsAvailable {
                start: self.range.start,
                end: self.range.end,
            });
        };

        leases.insert(
            port,
            PortLease {
                port,
                container_id: container_id.to_string(),
                leased_at: Utc::now(),
                confirmed: false,
            },
        );
        debug!("Leased port {} to {}", port, container_id);
        Ok(port)
    }

    /// Release a port. Releasing a port nobody holds does nothing.
    pub fn release(&self, port: u16) -> Option<PortLease> {
        let released = self.leases.lock().unwrap().remove(&port);
        if let Some(lease) = &released {
            debug!("Released port {} from {}", port, lease.container_id);
        }
        released
    }

    /// Release whatever port `container_id` holds
    pub fn release_for(&self, container_id: &str) -> Option<u16> {
        let mut leases = self.leases.lock().unwrap();
        let port = leases
            .values()
            .find(|lease| lease.container_id == container_id)
            .map(|lease| lease.port)?;
        leases.remove(&port);
        debug!("Released port {} from {}", port, container_id);
        Some(port)
    }

    /// Mark a lease as in use by a started container
    pub fn confirm(&self, port: u16) -> bool {
        match self.leases.lock().unwrap().get_mut(&port) {
            Some(lease) => {
                lease.confirmed = true;
                true
            }
            None => false,
        }
    }

    /// Drop unconfirmed leases older than `max_age`, except those whose
    /// holder is in `keep`. Returns the reclaimed ports.
    pub fn reclaim_stale(&self, max_age: Duration, keep: &HashSet<String>) -> Vec<u16> {
        let max_age =
            chrono::Duration::from_std(max_age).unwrap_or_else(|_| chrono::Duration::days(36500));
        let cutoff = Utc::now() - max_age;
        let mut leases = self.leases.lock().unwrap();

        let stale: Vec<u16> = leases
            .values()
            .filter(|lease| !lease.confirmed && lease.leased_at <= cutoff)
            .filter(|lease| !keep.contains(&lease.container_id))
            .map(|lease| lease.port)
            .collect();

        for port in &stale {
            if let Some(lease) = leases.remove(port) {
                info!(
                    "Reclaimed port {} never confirmed by {}",
                    port, lease.container_id
                );
            }
        }
        stale
    }

    /// Re-register the lease of a container that survived a restart
    pub fn restore(&self, port: u16, container_id: &str) {
        self.leases.lock().unwrap().insert(
            port,
            PortLease {
                port,
                container_id: container_id.to_string(),
                leased_at: Utc::now(),
                confirmed: true,
            },
        );
    }

    /// Whether `port` is currently leased
    pub fn is_leased(&self, port: u16) -> bool {
        self.leases.lock().unwrap().contains_key(&port)
    }

    /// The lease on `port`, if any
    pub fn lease_of(&self, port: u16) -> Option<PortLease> {
        self.leases.lock().unwrap().get(&port).cloned()
    }

    /// Number of leased ports
    pub fn leased_count(&self) -> usize {
        self.leases.lock().unwrap().len()
    }
}
