//! Pool configuration model
//!
//! The pool itself only consumes already-open connection handles; this
//! module carries the resolved settings an external connection constructor
//! needs (which driver, which nodes, what weights) plus the pool's own
//! tuning knobs. Validation is eager so a bad configuration fails at load
//! time, not on first use.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Adapter name reserved for the pool itself; it cannot appear as the
/// underlying adapter of its own nodes
pub const POOL_ADAPTER_NAME: &str = "replica_pool";

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("database configuration does not specify an adapter")]
    MissingAdapter,

    #[error("a replica pool cannot be built on top of another replica pool")]
    RecursivePool,
}

/// One underlying database node (master or replica)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Label used in logs and by the connection constructor
    pub name: String,

    /// Host the connection constructor should dial
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Selection weight; 0 removes the node from the read pool entirely.
    /// Ignored for the master, which never joins the read rotation.
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    1
}

/// Full pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSettings {
    /// Underlying driver adapter name (e.g. "postgresql")
    pub adapter: Option<String>,

    /// The single read-write master node
    pub master: NodeConfig,

    /// Read-only replica nodes with selection weights
    #[serde(default)]
    pub read_pool: Vec<NodeConfig>,

    /// How long a failing replica stays out of rotation, in seconds
    #[serde(default = "default_suppression_ttl_secs")]
    pub suppression_ttl_secs: u64,

    /// Connect timeout handed to the connection constructor, in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_suppression_ttl_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    1
}

impl PoolSettings {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.adapter.as_deref() {
            None | Some("") => Err(ConfigError::MissingAdapter),
            Some(POOL_ADAPTER_NAME) => Err(ConfigError::RecursivePool),
            Some(_) => Ok(()),
        }
    }

    /// The replica nodes that participate in read selection (weight > 0)
    pub fn weighted_read_pool(&self) -> Vec<&NodeConfig> {
        self.read_pool.iter().filter(|node| node.weight > 0).collect()
    }

    /// Suppression window as a duration
    pub fn suppression_ttl(&self) -> Duration {
        Duration::from_secs(self.suppression_ttl_secs)
    }

    /// Connect timeout as a duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Parse and validate settings from a YAML string
pub fn load_from_str(content: &str) -> Result<PoolSettings> {
    let settings: PoolSettings =
        serde_yaml::from_str(content).context("Failed to parse YAML pool configuration")?;
    settings.validate()?;
    Ok(settings)
}

/// Load and validate settings from a YAML file
pub fn load_from_yaml<P: AsRef<Path>>(path: P) -> Result<PoolSettings> {
    let content = std::fs::read_to_string(path.as_ref())
        .context(format!("Failed to read config file: {:?}", path.as_ref()))?;
    load_from_str(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = load_from_str(
            r#"
adapter: postgresql
master:
  name: db-master
read_pool:
  - name: db-replica-1
"#,
        )
        .unwrap();

        assert_eq!(settings.master.weight, 1);
        assert_eq!(settings.suppression_ttl(), Duration::from_secs(30));
        assert_eq!(settings.connect_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn test_missing_adapter_rejected() {
        let result = load_from_str(
            r#"
master:
  name: db-master
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_recursive_pool_rejected() {
        let settings = PoolSettings {
            adapter: Some(POOL_ADAPTER_NAME.to_string()),
            master: NodeConfig {
                name: "db-master".to_string(),
                host: None,
                weight: 1,
            },
            read_pool: Vec::new(),
            suppression_ttl_secs: 30,
            connect_timeout_secs: 1,
        };
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::RecursivePool)
        ));
    }

    #[test]
    fn test_weight_zero_filtered() {
        let settings = load_from_str(
            r#"
adapter: mysql
master:
  name: db-master
read_pool:
  - name: db-replica-1
    weight: 0
  - name: db-replica-2
    weight: 2
"#,
        )
        .unwrap();

        let weighted = settings.weighted_read_pool();
        assert_eq!(weighted.len(), 1);
        assert_eq!(weighted[0].name, "db-replica-2");
    }
}
