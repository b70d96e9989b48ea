//! Configuration for the sharding control plane

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Cluster-wide sharding configuration.
///
/// Every participant (servers, frontends, the assigner) must be constructed
/// with identical values; the shard count and replication factor are fixed
/// for the lifetime of the cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Key prefix in the discovery store under which all control-plane
    /// records live
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Number of logical shards
    #[serde(default = "default_num_shards")]
    pub num_shards: u64,

    /// Replicas per shard (in addition to the master)
    #[serde(default = "default_num_replicas")]
    pub num_replicas: u64,

    /// Heartbeat lease duration in seconds; records are refreshed at half
    /// this interval
    #[serde(default = "default_hold_ttl")]
    pub hold_ttl_secs: u64,
}

fn default_namespace() -> String {
    "/shardplane".to_string()
}
fn default_num_shards() -> u64 {
    32
}
fn default_num_replicas() -> u64 {
    1
}
fn default_hold_ttl() -> u64 {
    20
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            num_shards: default_num_shards(),
            num_replicas: default_num_replicas(),
            hold_ttl_secs: default_hold_ttl(),
        }
    }
}

impl ClusterConfig {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ClusterConfig = serde_json::from_str(&content)
            .map_err(|e| crate::Error::InvalidConfig(format!("failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Save to file
    pub fn to_file(&self, path: impl AsRef<std::path::Path>) -> crate::Result<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| crate::Error::InvalidConfig(format!("failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.namespace.is_empty() {
            return Err(crate::Error::InvalidConfig("namespace is required".into()));
        }
        if self.num_shards == 0 {
            return Err(crate::Error::InvalidConfig(
                "num_shards must be positive".into(),
            ));
        }
        if self.hold_ttl_secs < 2 {
            return Err(crate::Error::InvalidConfig(
                "hold_ttl_secs must be at least 2 so heartbeats can refresh at half the lease"
                    .into(),
            ));
        }
        Ok(())
    }

    /// Lease duration for heartbeat records
    pub fn hold_ttl(&self) -> Duration {
        Duration::from_secs(self.hold_ttl_secs)
    }

    /// Heartbeat refresh interval: half the lease, leaving one retry window
    /// before the lease expires
    pub fn refresh_interval(&self) -> Duration {
        self.hold_ttl() / 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClusterConfig::default();
        assert_eq!(config.hold_ttl_secs, 20);
        assert_eq!(config.refresh_interval(), Duration::from_secs(10));
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ClusterConfig::default();
        config.num_shards = 0;
        assert!(config.validate().is_err());

        let mut config = ClusterConfig::default();
        config.namespace = String::new();
        assert!(config.validate().is_err());

        let mut config = ClusterConfig::default();
        config.hold_ttl_secs = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cluster.json");

        let mut config = ClusterConfig::default();
        config.num_shards = 64;
        config.num_replicas = 2;
        config.to_file(&path).unwrap();

        let loaded = ClusterConfig::from_file(&path).unwrap();
        assert_eq!(loaded.num_shards, 64);
        assert_eq!(loaded.num_replicas, 2);
        assert_eq!(loaded.namespace, config.namespace);
    }

    #[test]
    fn test_partial_file_gets_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cluster.json");
        std::fs::write(&path, r#"{"num_shards": 8}"#).unwrap();

        let loaded = ClusterConfig::from_file(&path).unwrap();
        assert_eq!(loaded.num_shards, 8);
        assert_eq!(loaded.hold_ttl_secs, 20);
        assert_eq!(loaded.namespace, "/shardplane");
    }
}
