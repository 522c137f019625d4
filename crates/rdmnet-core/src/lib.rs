// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # rdmnet-core
//!
//! Transport-agnostic building blocks for ANSI E1.33 (RDMnet): wire codec,
//! connection state machine, and lightweight mDNS/DNS-SD broker discovery.
//!
//! This crate does not itself decide who connects to whom — that policy
//! lives in the broker and controller binaries built on top of it. What it
//! provides is everything those binaries need to speak the wire protocol
//! correctly and track connection/discovery state without re-deriving the
//! ACN framing rules or the mDNS record formats each time:
//!
//! - [`codec`] — ACN root-layer framing plus the broker, RPT, and
//!   client-entry inner PDUs.
//! - [`buffer`] — a resumable parser that turns a byte stream into a queue
//!   of fully decoded [`codec::RdmnetMessage`] values.
//! - [`connection`] — the per-connection state machine (connect, handshake,
//!   heartbeat, backoff, disconnect).
//! - [`poll`] — a single-threaded `mio` dispatch loop that drives one or
//!   more connections against real sockets.
//! - [`mdns`] — DNS-SD record parsing and the scope-query scheduler used to
//!   discover brokers without a full resolver stack.
//! - [`netint`] — multicast interface enumeration and refcounted socket
//!   binding for the mDNS engine.
//! - [`ids`] — `Cid`, `Uid`, and `Scope`, the identifiers threaded through
//!   every layer above.
//! - [`config`] — wire constants and the tunables (`ConnectionConfig`,
//!   `MdnsConfig`) that govern timing behavior.
//!
//! ## Architecture
//!
//! ```text
//! +-----------------------------------------------------------------+
//! |                    Broker / Controller Binary                    |
//! +-----------------------------------------------------------------+
//! |  poll (mio dispatch)   |   mdns (discovery engine)               |
//! +-------------------------+----------------------------------------+
//! |  connection (state machine)   |   netint (multicast interfaces)  |
//! +-----------------------------------------------------------------+
//! |  buffer (resumable parser)                                      |
//! +-----------------------------------------------------------------+
//! |  codec (ACN root layer, broker PDUs, RPT PDUs, client entries)   |
//! +-----------------------------------------------------------------+
//! ```

pub mod buffer;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod ids;
pub mod mdns;
pub mod netint;
pub mod poll;

pub use buffer::RecvBuffer;
pub use codec::RdmnetMessage;
pub use connection::{Connection, ConnectionAction, ConnectionState, LocalIdentity};
pub use error::{Error, Result};
pub use ids::{Cid, Scope, Uid};
pub use poll::{PollCommand, PollDispatcher, PollEvent, PollHandle};
