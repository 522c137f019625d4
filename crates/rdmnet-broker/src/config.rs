// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Broker configuration: listen addresses, scope, and capacity limits.
//!
//! Grounded in the teacher's `ServerConfig`: a serde-`Default`-derived
//! struct loadable from a JSON file via `from_file`, with a `validate()`
//! pass that the broker runs once at startup rather than scattering checks
//! through `run()`.

use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Broker configuration (`spec.md` §6's `Startup` parameters plus the
/// capacity/timing tunables `spec.md` §4.7/§5 leave to the implementation).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// RDMnet scope this broker serves; clients whose `Connect` names a
    /// different scope are rejected and disconnected.
    #[serde(default = "default_scope")]
    pub scope: String,

    /// Addresses to listen on. Must be non-empty; `validate()` rejects an
    /// empty list rather than silently falling back to "all interfaces".
    #[serde(default = "default_listen_addrs")]
    pub listen_addrs: Vec<IpAddr>,

    /// TCP port to listen on. `0` (OS-assigned) is only legal when exactly
    /// one listen address is configured, per `spec.md` §6's `Startup`.
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_max_controllers")]
    pub max_controllers: usize,

    #[serde(default = "default_max_devices")]
    pub max_devices: usize,

    /// Depth of each client's outbound queue before further sends are
    /// dropped or answered with a status PDU, per `spec.md` §7's capacity
    /// error handling.
    #[serde(default = "default_send_queue_depth")]
    pub send_queue_depth: usize,

    /// Capacity, in bytes, of each connection's resumable receive buffer.
    #[serde(default = "default_recv_buffer_capacity")]
    pub recv_buffer_capacity: usize,

    /// Outgoing heartbeat (`Null` PDU) interval, in milliseconds
    /// (`spec.md`'s "send timer", ≥ 7.5s since last transmit).
    #[serde(default = "default_heartbeat_interval_millis")]
    pub heartbeat_interval_millis: u64,

    #[serde(default = "default_main_tick_interval")]
    pub main_tick_interval_millis: u64,
}

fn default_scope() -> String {
    rdmnet_core::ids::DEFAULT_SCOPE.to_string()
}

fn default_listen_addrs() -> Vec<IpAddr> {
    vec!["0.0.0.0".parse().unwrap()]
}

fn default_port() -> u16 {
    rdmnet_core::config::DEFAULT_PORT
}

fn default_max_controllers() -> usize {
    20
}

fn default_max_devices() -> usize {
    2000
}

fn default_send_queue_depth() -> usize {
    256
}

fn default_recv_buffer_capacity() -> usize {
    8192
}

fn default_heartbeat_interval_millis() -> u64 {
    7_500
}

fn default_main_tick_interval() -> u64 {
    300
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            scope: default_scope(),
            listen_addrs: default_listen_addrs(),
            port: default_port(),
            max_controllers: default_max_controllers(),
            max_devices: default_max_devices(),
            send_queue_depth: default_send_queue_depth(),
            recv_buffer_capacity: default_recv_buffer_capacity(),
            heartbeat_interval_millis: default_heartbeat_interval_millis(),
            main_tick_interval_millis: default_main_tick_interval(),
        }
    }
}

impl BrokerConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::Serialize(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::Io(e.to_string()))
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_millis)
    }

    pub fn main_tick_interval(&self) -> Duration {
        Duration::from_millis(self.main_tick_interval_millis)
    }

    pub fn socket_addrs(&self) -> Vec<SocketAddr> {
        self.listen_addrs
            .iter()
            .map(|ip| SocketAddr::new(*ip, self.port))
            .collect()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen_addrs.is_empty() {
            return Err(ConfigError::InvalidValue(
                "listen_addrs must not be empty".into(),
            ));
        }
        if self.port == 0 && self.listen_addrs.len() != 1 {
            return Err(ConfigError::InvalidValue(
                "port 0 (OS-assigned) is only valid with exactly one listen address".into(),
            ));
        }
        if self.max_controllers == 0 && self.max_devices == 0 {
            return Err(ConfigError::InvalidValue(
                "max_controllers and max_devices cannot both be 0".into(),
            ));
        }
        if rdmnet_core::ids::Scope::new(self.scope.clone()).is_err() {
            return Err(ConfigError::InvalidValue(format!(
                "scope {:?} is empty or longer than {} bytes",
                self.scope,
                rdmnet_core::ids::SCOPE_MAX_LEN
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    Serialize(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(s) => write!(f, "I/O error: {s}"),
            Self::Parse(s) => write!(f, "parse error: {s}"),
            Self::Serialize(s) => write!(f, "serialize error: {s}"),
            Self::InvalidValue(s) => write!(f, "invalid value: {s}"),
        }
    }
}

impl std::error::Error for ConfigError {}
