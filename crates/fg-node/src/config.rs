use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{NodeError, NodeResult};

/// Node settings, usually read from a TOML file.
///
/// ```toml
/// in_memory = false
/// data_dir = "/var/lib/feedgraph"
/// publish_capacity = 64
/// tick_interval_ms = 1000
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Keep blobs in memory instead of under `data_dir`.
    pub in_memory: bool,
    pub data_dir: PathBuf,
    /// Roots buffered per feed subscription before slow subscribers lag.
    pub publish_capacity: usize,
    /// Period of the write loop.
    pub tick_interval_ms: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            in_memory: true,
            data_dir: PathBuf::from("feedgraph-data"),
            publish_capacity: 64,
            tick_interval_ms: 1000,
        }
    }
}

impl NodeConfig {
    pub fn from_toml_str(s: &str) -> NodeResult<Self> {
        let config: Self = toml::from_str(s).map_err(|e| NodeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> NodeResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| NodeError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> NodeResult<()> {
        if self.publish_capacity == 0 {
            return Err(NodeError::Config("publish_capacity must be positive".into()));
        }
        if self.tick_interval_ms == 0 {
            return Err(NodeError::Config("tick_interval_ms must be positive".into()));
        }
        if !self.in_memory && self.data_dir.as_os_str().is_empty() {
            return Err(NodeError::Config("data_dir is required when in_memory is false".into()));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Where the filesystem blob store lives.
    pub fn blob_dir(&self) -> PathBuf {
        self.data_dir.join("blobs")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = NodeConfig::default();
        assert!(c.in_memory);
        assert_eq!(c.publish_capacity, 64);
        assert_eq!(c.tick_interval(), Duration::from_secs(1));
        assert!(c.validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let c = NodeConfig::from_toml_str("tick_interval_ms = 250\n").unwrap();
        assert_eq!(c.tick_interval_ms, 250);
        assert!(c.in_memory);
        assert_eq!(c.publish_capacity, 64);
    }

    #[test]
    fn full_toml() {
        let c = NodeConfig::from_toml_str(
            r#"
            in_memory = false
            data_dir = "/tmp/fg"
            publish_capacity = 8
            tick_interval_ms = 10
            "#,
        )
        .unwrap();
        assert!(!c.in_memory);
        assert_eq!(c.blob_dir(), PathBuf::from("/tmp/fg/blobs"));
        assert_eq!(c.publish_capacity, 8);
    }

    #[test]
    fn zero_values_rejected() {
        assert!(matches!(
            NodeConfig::from_toml_str("publish_capacity = 0"),
            Err(NodeError::Config(_))
        ));
        assert!(matches!(
            NodeConfig::from_toml_str("tick_interval_ms = 0"),
            Err(NodeError::Config(_))
        ));
    }

    #[test]
    fn malformed_toml_rejected() {
        assert!(matches!(
            NodeConfig::from_toml_str("in_memory = \"yes\""),
            Err(NodeError::Config(_))
        ));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.toml");
        std::fs::write(&path, "publish_capacity = 3\n").unwrap();
        assert_eq!(NodeConfig::load(&path).unwrap().publish_capacity, 3);
        assert!(matches!(
            NodeConfig::load(dir.path().join("missing.toml")),
            Err(NodeError::ConfigRead { .. })
        ));
    }
}
