//! statgrid.toml configuration parser.
//!
//! Every section is optional; missing fields fall back to the defaults the
//! service has always run with. [`StatgridConfig::validate`] rejects values
//! the daemon cannot start with.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::packet::{DEFAULT_KEY_ARITY, MAX_KEY_ARITY, MIN_KEY_ARITY, PacketCodec};

/// Configuration values the daemon refuses to start with.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("packets.key_arity must be between 5 and 8, got {0}")]
    KeyArity(usize),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("invalid listen host: {0}")]
    Host(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StatgridConfig {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub packets: PacketsConfig,
    pub jobs: JobsConfig,
    pub save: SaveConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: Ipv4Addr::LOCALHOST.to_string(),
            port: 8081,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding the redb database file.
    pub data_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/statgrid"),
        }
    }
}

impl StoreConfig {
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("statgrid.redb")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PacketsConfig {
    /// Number of `:`-separated key parts the deployed protocol uses.
    pub key_arity: usize,
    /// Sliding expiry of a session's packet set.
    pub expire_secs: u64,
}

impl Default for PacketsConfig {
    fn default() -> Self {
        Self {
            key_arity: DEFAULT_KEY_ARITY,
            expire_secs: 1800,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct JobsConfig {
    /// Execution timeout for every job.
    pub timeout_secs: u64,
    /// Retention applied to a compute result each time it is read.
    pub result_cache_secs: u64,
    /// Result retention of save jobs.
    pub save_result_ttl_secs: u64,
    /// Retention of failed job records.
    pub failure_ttl_secs: u64,
    pub calc_workers: usize,
    pub save_workers: usize,
    /// How often expired packet sets and job records are purged.
    pub janitor_interval_secs: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            result_cache_secs: 24 * 3600,
            save_result_ttl_secs: 30,
            failure_ttl_secs: 24 * 3600,
            calc_workers: 2,
            save_workers: 1,
            janitor_interval_secs: 60,
        }
    }
}

impl JobsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn janitor_interval(&self) -> Duration {
        Duration::from_secs(self.janitor_interval_secs)
    }
}

/// Durable sink used by save jobs.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    /// Append batches to the store's archive table.
    #[default]
    Archive,
    /// Log batches and drop them.
    Discard,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SaveConfig {
    pub sink: SinkKind,
}

impl StatgridConfig {
    /// Parse and validate a config file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: StatgridConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let arity = self.packets.key_arity;
        if !(MIN_KEY_ARITY..=MAX_KEY_ARITY).contains(&arity) {
            return Err(ConfigError::KeyArity(arity));
        }
        if self.packets.expire_secs == 0 {
            return Err(ConfigError::Zero("packets.expire_secs"));
        }
        if self.jobs.timeout_secs == 0 {
            return Err(ConfigError::Zero("jobs.timeout_secs"));
        }
        if self.jobs.result_cache_secs == 0 {
            return Err(ConfigError::Zero("jobs.result_cache_secs"));
        }
        if self.jobs.calc_workers == 0 {
            return Err(ConfigError::Zero("jobs.calc_workers"));
        }
        if self.jobs.save_workers == 0 {
            return Err(ConfigError::Zero("jobs.save_workers"));
        }
        if self.jobs.janitor_interval_secs == 0 {
            return Err(ConfigError::Zero("jobs.janitor_interval_secs"));
        }
        self.listen_addr()?;
        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self
            .server
            .host
            .parse()
            .map_err(|_| ConfigError::Host(self.server.host.clone()))?;
        Ok(SocketAddr::new(ip, self.server.port))
    }

    /// Codec for the configured protocol version.
    pub fn packet_codec(&self) -> PacketCodec {
        PacketCodec::new(self.packets.key_arity)
    }
}
