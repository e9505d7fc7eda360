//! Configuration types for parley-node.
//! Parsed from ~/.parley/config.toml.

use parley_storage::Durability;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub node: NodeSection,
    #[serde(default)]
    pub timeouts: TimeoutSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSection {
    #[serde(default = "default_name")]
    pub name: String,
    /// Stable node id. Generated and persisted under `data_dir` when unset.
    pub id: Option<String>,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Address peers should use to reach us. Defaults to the listen ip.
    pub advertise_ip: Option<String>,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default)]
    pub durability: Durability,
}

/// Deadlines for every blocking phase of a connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutSection {
    #[serde(default = "default_5")]
    pub connect_secs: u64,
    #[serde(default = "default_10")]
    pub handshake_secs: u64,
    #[serde(default = "default_10")]
    pub history_sync_secs: u64,
    #[serde(default = "default_500")]
    pub probe_ms: u64,
    #[serde(default = "default_1000")]
    pub shutdown_grace_ms: u64,
}

impl Default for TimeoutSection {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            handshake_secs: 10,
            history_sync_secs: 10,
            probe_ms: 500,
            shutdown_grace_ms: 1000,
        }
    }
}

impl TimeoutSection {
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }
    pub fn handshake(&self) -> Duration {
        Duration::from_secs(self.handshake_secs)
    }
    pub fn history_sync(&self) -> Duration {
        Duration::from_secs(self.history_sync_secs)
    }
    pub fn probe(&self) -> Duration {
        Duration::from_millis(self.probe_ms)
    }
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

// Default value functions
fn default_name() -> String {
    "anonymous".into()
}
fn default_listen_addr() -> String {
    "0.0.0.0:5000".into()
}
fn default_data_dir() -> String {
    "~/.parley/data".into()
}
fn default_5() -> u64 {
    5
}
fn default_10() -> u64 {
    10
}
fn default_500() -> u64 {
    500
}
fn default_1000() -> u64 {
    1000
}

impl NodeConfig {
    /// Load config from file, or create default if missing.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: NodeConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node: NodeSection {
                name: default_name(),
                id: None,
                listen_addr: default_listen_addr(),
                advertise_ip: None,
                data_dir: default_data_dir(),
                durability: Durability::default(),
            },
            timeouts: TimeoutSection::default(),
        }
    }
}
