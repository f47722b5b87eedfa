//! Orchestrator configuration
//!
//! Every field has a default, so a partial YAML document is enough.
//! Durations are whole seconds.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Inclusive range of host ports handed to containers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    /// First port of the range
    pub start: u16,
    /// Last port of the range
    pub end: u16,
}

impl PortRange {
    /// Create a range; `start` and `end` are both included
    pub fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    /// Whether `port` falls inside the range
    pub fn contains(&self, port: u16) -> bool {
        (self.start..=self.end).contains(&port)
    }

    /// Number of ports in the range
    pub fn len(&self) -> usize {
        if self.end < self.start {
            0
        } else {
            usize::from(self.end - self.start) + 1
        }
    }

    /// Whether the range holds no ports at all
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self::new(3000, 9999)
    }
}

/// Resource reaper schedule and limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaperConfig {
    /// Seconds between sweeps
    pub interval_secs: u64,
    /// Maximum lifetime of an active container
    pub max_lifetime_secs: u64,
    /// How long stopped containers are kept before removal
    pub stopped_retention_secs: u64,
    /// How long a port lease may stay unconfirmed
    pub lease_timeout_secs: u64,
}

impl ReaperConfig {
    /// Time between sweeps
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Maximum lifetime of an active container
    pub fn max_lifetime(&self) -> Duration {
        Duration::from_secs(self.max_lifetime_secs)
    }

    /// Retention of stopped containers
    pub fn stopped_retention(&self) -> Duration {
        Duration::from_secs(self.stopped_retention_secs)
    }

    /// Age after which an unconfirmed lease is reclaimed
    pub fn lease_timeout(&self) -> Duration {
        Duration::from_secs(self.lease_timeout_secs)
    }
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            max_lifetime_secs: 4 * 60 * 60,
            stopped_retention_secs: 60 * 60,
            lease_timeout_secs: 120,
        }
    }
}

/// Log retrieval limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Lines returned when the caller does not ask for a tail
    pub default_tail: usize,
    /// Hard ceiling on returned lines
    pub max_lines: usize,
    /// Hard ceiling on returned bytes
    pub max_bytes: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            default_tail: 100,
            max_lines: 500,
            max_bytes: 64 * 1024,
        }
    }
}

/// Top-level orchestrator configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Host ports available to containers
    pub ports: PortRange,
    /// Deadline for every runtime call
    pub call_timeout_secs: u64,
    /// Grace period given to a container's process on stop
    pub stop_timeout_secs: u64,
    /// Records younger than this are served without asking the runtime
    pub freshness_secs: u64,
    /// Prefix of container names
    pub container_prefix: String,
    /// Reaper settings
    pub reaper: ReaperConfig,
    /// Log settings
    pub logs: LogConfig,
}

impl OrchestratorConfig {
    /// Deadline for every runtime call
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    /// Default stop grace period
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    /// Freshness threshold of `status()`
    pub fn freshness(&self) -> Duration {
        Duration::from_secs(self.freshness_secs)
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            ports: PortRange::default(),
            call_timeout_secs: 30,
            stop_timeout_secs: 10,
            freshness_secs: 5,
            container_prefix: "project".to_string(),
            reaper: ReaperConfig::default(),
            logs: LogConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_range() {
        let range = PortRange::new(3000, 3002);
        assert_eq!(range.len(), 3);
        assert!(range.contains(3000));
        assert!(range.contains(3002));
        assert!(!range.contains(3003));
        assert!(PortRange::new(10, 9).is_empty());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
ports:
  start: 4000
  end: 4010
reaper:
  interval_secs: 5
"#;
        let config: OrchestratorConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.ports, PortRange::new(4000, 4010));
        assert_eq!(config.reaper.interval(), Duration::from_secs(5));
        assert_eq!(config.reaper.lease_timeout_secs, 120);
        assert_eq!(config.call_timeout(), Duration::from_secs(30));
        assert_eq!(config.logs, LogConfig::default());
    }
}
