//! Daemon configuration
//!
//! Loaded from an optional YAML file; every section falls back to its
//! defaults so an empty file (or none at all) is a valid configuration.
//!
//! ```yaml
//! listen: 0.0.0.0:9010
//! public_host: preview.example.com
//! docker:
//!   image: node:20-alpine
//!   memory: 512m
//! orchestrator:
//!   ports: { start: 4000, end: 4999 }
//!   reaper:
//!     max_lifetime_secs: 7200
//! ```

use anyhow::{Context, Result};
use container_orchestration::OrchestratorConfig;
use container_runtime::DockerConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level daemon configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Address the WebSocket server binds to
    pub listen: String,

    /// Host name used to build container URLs
    pub public_host: String,

    /// Directory for durable state; defaults to the user's data directory
    pub data_dir: Option<PathBuf>,

    /// How project containers are built
    pub docker: DockerConfig,

    /// Ports, timeouts, reaper and log limits
    pub orchestrator: OrchestratorConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:9010".to_string(),
            public_host: "localhost".to_string(),
            data_dir: None,
            docker: DockerConfig::default(),
            orchestrator: OrchestratorConfig::default(),
        }
    }
}

impl DaemonConfig {
    /// Load a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Parse a configuration from YAML
    pub fn parse(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Where the record database lives
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("container-orchestrator")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use container_orchestration::PortRange;

    #[test]
    fn test_empty_config_is_default() {
        assert_eq!(DaemonConfig::parse("").unwrap(), DaemonConfig::default());
    }

    #[test]
    fn test_partial_config() {
        let yaml = r#"
listen: 0.0.0.0:9999
public_host: preview.example.com
docker:
  memory: 512m
orchestrator:
  ports: { start: 4000, end: 4099 }
  reaper:
    max_lifetime_secs: 60
"#;
        let config = DaemonConfig::parse(yaml).unwrap();
        assert_eq!(config.listen, "0.0.0.0:9999");
        assert_eq!(config.public_host, "preview.example.com");
        assert_eq!(config.docker.memory.as_deref(), Some("512m"));
        assert_eq!(config.docker.image, DockerConfig::default().image);
        assert_eq!(config.orchestrator.ports, PortRange::new(4000, 4099));
        assert_eq!(config.orchestrator.reaper.max_lifetime_secs, 60);
        assert_eq!(config.orchestrator.reaper.interval_secs, 60);
    }

    #[test]
    fn test_unknown_section_type_is_rejected() {
        assert!(DaemonConfig::parse("listen: [1, 2]").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.yaml");
        std::fs::write(&path, "data_dir: /srv/orchestrator\n").unwrap();

        let config = DaemonConfig::load(&path).unwrap();
        assert_eq!(config.data_dir(), PathBuf::from("/srv/orchestrator"));

        let missing = DaemonConfig::load(&dir.path().join("missing.yaml"));
        assert!(missing.is_err());
    }
}
