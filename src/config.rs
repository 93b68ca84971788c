// src/config.rs

//! Per-binary configuration: one struct per role (storage node, coordinator,
//! load balancer, admin console), each loadable from a TOML file via
//! `from_file`, each with a `validate()` pass, following the
//! `Config::from_file`/`validate()` pattern used elsewhere in this codebase.
//!
//! The documented CLI surface only covers a handful of flags per binary
//! (`-p`/`-s`/`-e` for the storage node, `-s`/`-b` for the coordinator, a
//! positional front-end count for the load balancer); the rest of what a
//! process needs to run (peer addresses, coordinator address, persistence
//! directory, timeouts) comes from an optional TOML file, with CLI flags
//! overriding individual fields exactly as `main.rs` lets `--port` override
//! a loaded `Config`.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

fn default_log_level() -> String {
    "info".to_string()
}

fn default_prepare_timeout_ms() -> u64 {
    2_000
}

fn default_node_ping_interval_ms() -> u64 {
    2_000
}

fn default_liveness_timeout_ms() -> u64 {
    5_000
}

fn default_health_check_interval_ms() -> u64 {
    500
}

/// Which role this storage node plays within its replica group.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "role")]
pub enum NodeRole {
    Primary { secondary_addrs: Vec<String> },
    Secondary { primary_addr: String },
}

/// A single contiguous key range, as configured by `-s`/`-e`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    pub start: String,
    pub end: String,
}

/// `pennkv-node`'s configuration: `src/bin/storage_node.rs`.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct NodeConfig {
    #[serde(default = "default_bind_host")]
    pub host: String,
    pub port: u16,
    /// A node may own more than one contiguous range.
    pub ranges: Vec<KeyRange>,
    pub role: NodeRole,
    /// `None` disables persistence entirely (useful for tests).
    pub persistence_dir: Option<PathBuf>,
    pub coordinator_addr: Option<String>,
    #[serde(default = "default_prepare_timeout_ms")]
    pub prepare_timeout_ms: u64,
    #[serde(default = "default_node_ping_interval_ms")]
    pub coordinator_ping_interval_ms: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_bind_host() -> String {
    "127.0.0.1".to_string()
}

impl NodeConfig {
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let raw = fs::read_to_string(path.as_ref())
            .with_context(|| format!("reading config file {}", path.as_ref().display()))?;
        let config: NodeConfig = toml::from_str(&raw).context("parsing node config as TOML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.ranges.is_empty() {
            return Err(anyhow!("a storage node needs at least one key range"));
        }
        for range in &self.ranges {
            if range.start.is_empty() || range.end.is_empty() {
                return Err(anyhow!("key range bounds must be non-empty"));
            }
            if range.start > range.end {
                return Err(anyhow!(
                    "key range start {:?} must not be greater than end {:?}",
                    range.start,
                    range.end
                ));
            }
        }
        if let NodeRole::Secondary { primary_addr } = &self.role
            && primary_addr.is_empty()
        {
            return Err(anyhow!("a secondary must be configured with its primary's address"));
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn prepare_timeout(&self) -> Duration {
        Duration::from_millis(self.prepare_timeout_ms)
    }

    pub fn coordinator_ping_interval(&self) -> Duration {
        Duration::from_millis(self.coordinator_ping_interval_ms)
    }
}

/// `pennkv-coordinator`'s configuration: `src/bin/coordinator.rs`. Covers
/// the static partition parameters (`-s <num_groups> -b
/// <backups_per_group>`) plus the addressing/liveness knobs a real
/// deployment needs and the CLI alone does not carry.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CoordinatorConfig {
    #[serde(default = "default_bind_host")]
    pub client_host: String,
    #[serde(default = "default_coordinator_client_port")]
    pub client_port: u16,
    #[serde(default = "default_bind_host")]
    pub node_host: String,
    /// Storage nodes send their `PING <port>\r\n` liveness heartbeat here,
    /// separate from the client lookup port.
    #[serde(default = "default_coordinator_heartbeat_port")]
    pub heartbeat_port: u16,
    /// Number of replica groups (`-s`).
    pub num_groups: usize,
    /// Backups per group (`-b`).
    pub backups_per_group: usize,
    /// Base TCP port used to derive each group/replica's deterministic
    /// address, per `original_source/coordinator/src/coordinator.cc`'s
    /// `"127.0.0.1:5" + group + replica + "0"` scheme, generalized past a
    /// single digit per field.
    #[serde(default = "default_node_base_port")]
    pub node_base_port: u16,
    pub admin_addr: Option<String>,
    #[serde(default = "default_liveness_timeout_ms")]
    pub liveness_timeout_ms: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_coordinator_client_port() -> u16 {
    4000
}

fn default_coordinator_heartbeat_port() -> u16 {
    4999
}

fn default_node_base_port() -> u16 {
    5000
}

impl CoordinatorConfig {
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let raw = fs::read_to_string(path.as_ref())
            .with_context(|| format!("reading config file {}", path.as_ref().display()))?;
        let config: CoordinatorConfig =
            toml::from_str(&raw).context("parsing coordinator config as TOML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_groups == 0 {
            return Err(anyhow!("number of KVS server groups must be at least 1"));
        }
        if self.backups_per_group == 0 {
            return Err(anyhow!("number of KVS backups per server group must be at least 1"));
        }
        Ok(())
    }

    pub fn client_bind_addr(&self) -> String {
        format!("{}:{}", self.client_host, self.client_port)
    }

    pub fn heartbeat_bind_addr(&self) -> String {
        format!("{}:{}", self.node_host, self.heartbeat_port)
    }

    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_millis(self.liveness_timeout_ms)
    }
}

/// `pennkv-lb`'s configuration: `src/bin/load_balancer.rs`.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LoadBalancerConfig {
    #[serde(default = "default_bind_host")]
    pub host: String,
    /// Clients connect here to be redirected to a live front-end.
    #[serde(default = "default_lb_client_port")]
    pub client_port: u16,
    /// Front-ends send `PING <port>\r\n` heartbeats here.
    #[serde(default = "default_lb_heartbeat_port")]
    pub heartbeat_port: u16,
    /// Number of front-ends the pool is initialized to track (the
    /// positional `<num_front_ends>` CLI argument); front-ends are assumed
    /// to run on consecutive ports starting at `front_end_base_port`.
    pub num_front_ends: usize,
    #[serde(default = "default_fe_base_port")]
    pub front_end_base_port: u16,
    #[serde(default = "default_liveness_timeout_ms")]
    pub liveness_timeout_ms: u64,
    #[serde(default = "default_health_check_interval_ms")]
    pub health_check_interval_ms: u64,
    pub admin_addr: Option<String>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_lb_client_port() -> u16 {
    5000
}

fn default_lb_heartbeat_port() -> u16 {
    4000
}

fn default_fe_base_port() -> u16 {
    6000
}

impl LoadBalancerConfig {
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let raw = fs::read_to_string(path.as_ref())
            .with_context(|| format!("reading config file {}", path.as_ref().display()))?;
        let config: LoadBalancerConfig =
            toml::from_str(&raw).context("parsing load balancer config as TOML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_front_ends == 0 {
            return Err(anyhow!("number of front-ends must be at least 1"));
        }
        Ok(())
    }

    pub fn client_bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.client_port)
    }

    pub fn heartbeat_bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.heartbeat_port)
    }

    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_millis(self.liveness_timeout_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }
}

/// `pennkv-admin`'s configuration: `src/bin/admin.rs`.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AdminConfig {
    #[serde(default = "default_bind_host")]
    pub host: String,
    #[serde(default = "default_admin_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_admin_port() -> u16 {
    7000
}

impl Default for AdminConfig {
    fn default() -> Self {
        AdminConfig { host: default_bind_host(), port: default_admin_port(), log_level: default_log_level() }
    }
}

impl AdminConfig {
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let raw = fs::read_to_string(path.as_ref())
            .with_context(|| format!("reading config file {}", path.as_ref().display()))?;
        toml::from_str(&raw).context("parsing admin config as TOML")
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_config_rejects_empty_ranges() {
        let config = NodeConfig {
            host: "127.0.0.1".into(),
            port: 5000,
            ranges: vec![],
            role: NodeRole::Primary { secondary_addrs: vec![] },
            persistence_dir: None,
            coordinator_addr: None,
            prepare_timeout_ms: 2000,
            coordinator_ping_interval_ms: 2000,
            log_level: "info".into(),
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn node_config_rejects_inverted_range() {
        let config = NodeConfig {
            host: "127.0.0.1".into(),
            port: 5000,
            ranges: vec![KeyRange { start: "m".into(), end: "a".into() }],
            role: NodeRole::Primary { secondary_addrs: vec![] },
            persistence_dir: None,
            coordinator_addr: None,
            prepare_timeout_ms: 2000,
            coordinator_ping_interval_ms: 2000,
            log_level: "info".into(),
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn coordinator_config_requires_positive_counts() {
        let config = CoordinatorConfig {
            client_host: "127.0.0.1".into(),
            client_port: 4000,
            node_host: "127.0.0.1".into(),
            heartbeat_port: 4999,
            num_groups: 0,
            backups_per_group: 2,
            node_base_port: 5000,
            admin_addr: None,
            liveness_timeout_ms: 5000,
            log_level: "info".into(),
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_balancer_config_requires_at_least_one_front_end() {
        let config = LoadBalancerConfig {
            host: "127.0.0.1".into(),
            client_port: 5000,
            heartbeat_port: 4000,
            num_front_ends: 0,
            front_end_base_port: 6000,
            liveness_timeout_ms: 5000,
            health_check_interval_ms: 500,
            admin_addr: None,
            log_level: "info".into(),
        };
        assert!(config.validate().is_err());
    }
}
