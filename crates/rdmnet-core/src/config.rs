// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Runtime configuration and protocol constants.
//!
//! Mirrors the teacher's `hdds::config` pattern of a small set of
//! `const` protocol constants plus `Default`-implementing config structs
//! that a caller can override field-by-field.

use std::time::Duration;

/// Default RDMnet TCP port (`spec.md` §6).
pub const DEFAULT_PORT: u16 = 8888;

/// ACN root-layer preamble, 16 bytes (`spec.md` §6).
pub const ROOT_PREAMBLE_SIZE: usize = 16;
pub const ROOT_POSTAMBLE_SIZE: u16 = 0;
pub const ROOT_PACKET_IDENTIFIER: &[u8; 12] = b"ASC-E1.17\0\0\0";

pub const VECTOR_ROOT_BROKER: u32 = 0x0000_0009;
pub const VECTOR_ROOT_RPT: u32 = 0x0000_0005;
pub const VECTOR_ROOT_EPT: u32 = 0x0000_000B;

/// mDNS UDP port (`spec.md` §6).
pub const MDNS_PORT: u16 = 5353;
pub const DEFAULT_DISCOVERY_DOMAIN: &str = "local.";
pub const DNS_SD_SERVICE_TYPE: &str = "_rdmnet._tcp";

/// Connection-level timing and sizing, grounded in `spec.md` §4.6.
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    /// Interval between outgoing heartbeats (ACN `Null` PDUs) while idle.
    pub heartbeat_send_interval: Duration,
    /// How long to tolerate silence from the peer before declaring a
    /// heartbeat timeout.
    pub heartbeat_timeout: Duration,
    /// Initial backoff delay after a failed connect.
    pub backoff_start: Duration,
    /// Maximum backoff delay.
    pub backoff_cap: Duration,
    /// Capacity of the resumable receive buffer, in bytes.
    pub recv_buffer_capacity: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            heartbeat_send_interval: Duration::from_millis(7500),
            heartbeat_timeout: Duration::from_millis(15_000),
            backoff_start: Duration::from_millis(3000),
            backoff_cap: Duration::from_millis(30_000),
            recv_buffer_capacity: 8192,
        }
    }
}

/// mDNS query scheduling and socket configuration, grounded in `spec.md`
/// §4.3 ("Query scheduling").
#[derive(Clone, Debug)]
pub struct MdnsConfig {
    /// Initial per-scope query interval.
    pub query_interval_start: Duration,
    /// Query interval multiplier applied after each query.
    pub query_interval_multiplier: u32,
    /// Clamp on the query interval.
    pub query_interval_cap: Duration,
    /// mDNS UDP port.
    pub port: u16,
    /// DNS-SD domain suffix (default `local.`).
    pub domain: String,
    /// Interfaces to bind to; empty means "all multicast-capable
    /// interfaces" per `spec.md` §4.4.
    pub interfaces: Vec<std::net::IpAddr>,
}

impl Default for MdnsConfig {
    fn default() -> Self {
        Self {
            query_interval_start: Duration::from_millis(1000),
            query_interval_multiplier: 3,
            query_interval_cap: Duration::from_millis(360_000),
            port: MDNS_PORT,
            domain: DEFAULT_DISCOVERY_DOMAIN.to_string(),
            interfaces: Vec::new(),
        }
    }
}
