//! Broker and agent configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default broker port when a host:port string omits it.
pub const DEFAULT_PORT: u16 = 8889;
/// Path the JSON-RPC endpoint is served on.
pub const RPC_PATH: &str = "/jsonrpc";

/// Broker process configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    /// Records not checked in for this long are purged. Must be several
    /// times the follower checkin interval.
    pub record_lifetime: Duration,
    /// How often the server runs the reaper on its own.
    pub reap_interval: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: DEFAULT_PORT,
            record_lifetime: Duration::from_secs(30),
            reap_interval: Duration::from_secs(5),
        }
    }
}

impl BrokerConfig {
    /// Build from the positional bind address plus environment overrides.
    pub fn from_env(host: &str, port: u16) -> Self {
        let defaults = Self::default();
        Self {
            host: host.to_string(),
            port,
            record_lifetime: env_secs("MULTIMPI_RECORD_LIFETIME_SECS")
                .unwrap_or(defaults.record_lifetime),
            reap_interval: env_secs("MULTIMPI_REAP_INTERVAL_SECS")
                .unwrap_or(defaults.reap_interval),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Leader/follower agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Full JSON-RPC URL of the broker, e.g. `http://head.example.org:8889/jsonrpc`.
    pub url: String,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub leader_poll_interval: Duration,
    pub follower_poll_interval: Duration,
    /// Consecutive transport failures tolerated before an agent gives up.
    pub max_consecutive_failures: u32,
    /// Checkins a finished leader spends waiting for the broker to ack `exiting`.
    pub exit_ack_attempts: u32,
    /// Directory holding `id_rsa.pub` and `authorized_keys`.
    pub ssh_dir: PathBuf,
    /// Where launcher configuration files are written.
    pub work_dir: PathBuf,
}

impl AgentConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: Duration::from_secs(4),
            read_timeout: Duration::from_secs(1),
            leader_poll_interval: Duration::from_millis(100),
            follower_poll_interval: Duration::from_secs(1),
            max_consecutive_failures: 100,
            exit_ack_attempts: 100,
            ssh_dir: default_ssh_dir(),
            work_dir: PathBuf::from("."),
        }
    }

    /// Create configuration from the environment. `MULTIMPI_SERVER_URL` is required.
    pub fn from_env() -> Result<Self> {
        let url = std::env::var("MULTIMPI_SERVER_URL")
            .map_err(|_| Error::Config("missing MULTIMPI_SERVER_URL".into()))?;
        let mut config = Self::new(url);
        if let Ok(dir) = std::env::var("MULTIMPI_SSH_DIR") {
            config.ssh_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("MULTIMPI_WORK_DIR") {
            config.work_dir = PathBuf::from(dir);
        }
        Ok(config)
    }
}

fn default_ssh_dir() -> PathBuf {
    std::env::var("HOME")
        .map(|home| PathBuf::from(home).join(".ssh"))
        .unwrap_or_else(|_| PathBuf::from(".ssh"))
}

fn env_secs(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
}
