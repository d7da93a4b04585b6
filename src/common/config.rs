//! Configuration for minifs components

use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Global configuration, as read from `minifs.toml` and `MINIFS__*` env vars
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Coordinator-specific config
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordinator: Option<CoordinatorConfig>,

    /// Volume-specific config
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<VolumeConfig>,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            coordinator: None,
            volume: None,
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load the optional config file and environment overrides.
    ///
    /// A missing file is not an error; a present but unparseable one is.
    pub fn load() -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name("minifs").required(false))
            .add_source(config::Environment::with_prefix("MINIFS").separator("__"))
            .build()?;
        Ok(settings.try_deserialize()?)
    }
}

/// Coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Bind address for the line protocol listener
    #[serde(default = "default_coordinator_addr")]
    pub bind_addr: SocketAddr,

    /// Replication factor (R)
    #[serde(default = "default_replication_factor")]
    pub replication_factor: usize,

    /// Deadline for a store or remove to reach quorum
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Rebalance period (accepted for compatibility, rebalancing is not run)
    #[serde(default = "default_rebalance_period")]
    pub rebalance_period_secs: u64,
}

fn default_coordinator_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 12345))
}
fn default_replication_factor() -> usize {
    3
}
fn default_timeout_ms() -> u64 {
    1000
}
fn default_rebalance_period() -> u64 {
    30
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_coordinator_addr(),
            replication_factor: default_replication_factor(),
            timeout_ms: default_timeout_ms(),
            rebalance_period_secs: default_rebalance_period(),
        }
    }
}

impl CoordinatorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.replication_factor == 0 {
            return Err(Error::InvalidConfig(
                "replication_factor must be at least 1".into(),
            ));
        }
        if self.timeout_ms == 0 {
            return Err(Error::InvalidConfig("timeout_ms must be positive".into()));
        }
        Ok(())
    }
}

/// Volume (storage node) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeConfig {
    /// Bind address for client data transfers; its port is announced on JOIN
    #[serde(default = "default_volume_addr")]
    pub bind_addr: SocketAddr,

    /// Coordinator address to join
    #[serde(default = "default_coordinator_connect")]
    pub coordinator_addr: SocketAddr,

    /// Directory holding stored files
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Deadline for a client to finish sending file bytes
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_volume_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 12346))
}
fn default_coordinator_connect() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 12345))
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("./volume-data")
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_volume_addr(),
            coordinator_addr: default_coordinator_connect(),
            data_dir: default_data_dir(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl VolumeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout_ms == 0 {
            return Err(Error::InvalidConfig("timeout_ms must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.replication_factor, 3);
        assert_eq!(config.timeout(), Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate() {
        let config = CoordinatorConfig {
            replication_factor: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let volume = VolumeConfig {
            timeout_ms: 0,
            ..Default::default()
        };
        assert!(volume.validate().is_err());
    }
}
