// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Discovered-broker table and the notifications the discovery engine emits
//! as brokers come, change, and go (`spec.md` §4.3), grounded in the
//! original stack's `DiscoveredBroker` lifecycle in `rdmnet/disc/common.h`.

use std::net::SocketAddr;
use std::time::Instant;

use crate::ids::Cid;
use crate::mdns::txt::BrokerTxtInfo;

/// One broker known to the discovery engine, built up from a PTR match plus
/// its SRV/TXT/address records.
#[derive(Clone, Debug, PartialEq)]
pub struct DiscoveredBroker {
    /// The PTR target, e.g. `my-broker._rdmnet._tcp.local.`.
    pub service_name: String,
    pub scope: String,
    pub host_name: String,
    pub port: u16,
    pub listen_addrs: Vec<SocketAddr>,
    pub txt: BrokerTxtInfo,
}

impl DiscoveredBroker {
    pub fn cid(&self) -> Option<Cid> {
        self.txt.cid
    }
}

/// Notifications the discovery engine delivers to its owner. Mirrors the
/// three original callback points (`broker_found`/`broker_updated`/
/// `broker_lost`) as a single enum so a poll-driven caller can match once.
#[derive(Clone, Debug, PartialEq)]
pub enum DiscoveryNotification {
    BrokerFound(DiscoveredBroker),
    BrokerUpdated(DiscoveredBroker),
    BrokerLost { service_name: String },
}

/// Tracks discovered brokers for one monitored scope, including the last
/// time each was refreshed so a stale entry (no PTR re-advertisement within
/// its TTL) can be aged out and reported lost.
#[derive(Debug, Default)]
pub struct BrokerTable {
    entries: Vec<(DiscoveredBroker, Instant)>,
}

impl BrokerTable {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn iter(&self) -> impl Iterator<Item = &DiscoveredBroker> {
        self.entries.iter().map(|(b, _)| b)
    }

    /// Insert or replace a broker, returning the notification the caller
    /// should emit: `BrokerFound` the first time, `BrokerUpdated` if any
    /// field changed, or `None` if this is an unchanged refresh.
    pub fn upsert(&mut self, broker: DiscoveredBroker, now: Instant) -> Option<DiscoveryNotification> {
        if let Some(slot) = self.entries.iter_mut().find(|(b, _)| b.service_name == broker.service_name) {
            let changed = slot.0 != broker;
            slot.0 = broker.clone();
            slot.1 = now;
            return changed.then_some(DiscoveryNotification::BrokerUpdated(broker));
        }
        self.entries.push((broker.clone(), now));
        Some(DiscoveryNotification::BrokerFound(broker))
    }

    /// Drop any broker not refreshed within `max_age`, returning a
    /// `BrokerLost` notification for each.
    pub fn expire_stale(&mut self, now: Instant, max_age: std::time::Duration) -> Vec<DiscoveryNotification> {
        let mut lost = Vec::new();
        self.entries.retain(|(broker, last_seen)| {
            if now.duration_since(*last_seen) > max_age {
                lost.push(DiscoveryNotification::BrokerLost {
                    service_name: broker.service_name.clone(),
                });
                false
            } else {
                true
            }
        });
        lost
    }

    pub fn remove(&mut self, service_name: &str) -> Option<DiscoveryNotification> {
        let idx = self.entries.iter().position(|(b, _)| b.service_name == service_name)?;
        self.entries.remove(idx);
        Some(DiscoveryNotification::BrokerLost {
            service_name: service_name.to_string(),
        })
    }
}
