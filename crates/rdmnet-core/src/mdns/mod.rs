// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Lightweight mDNS/DNS-SD broker discovery (`spec.md` §4.3): multicast
//! query scheduling, resource-record parsing, and TXT-record
//! interpretation, kept transport-agnostic like [`crate::connection`].

pub mod discovered;
pub mod engine;
pub mod message;
pub mod names;
pub mod query;
pub mod records;
pub mod txt;

pub use discovered::{BrokerTable, DiscoveredBroker, DiscoveryNotification};
pub use engine::{DiscoveryEngine, OutgoingQuery};
pub use query::QueryScheduler;
pub use records::{RecordType, ResourceRecord};
pub use txt::BrokerTxtInfo;
