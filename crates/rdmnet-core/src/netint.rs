// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Multicast interface enumeration and refcounted send sockets
//! (`spec.md` §4.4), grounded in the teacher's
//! `transport::multicast::get_multicast_interfaces`
//! (`local_ip_address`-backed, non-loopback IPv4 enumeration) and
//! `transport::ports` (per-socket refcounting idiom — here keyed on
//! interface rather than on a formula-derived port).

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use socket2::{Domain, Protocol, Socket, Type};

use crate::config::MdnsConfig;
use crate::error::{Error, Result};

/// Non-loopback IPv4 interfaces available for multicast, honoring an
/// explicit override list from [`MdnsConfig::interfaces`] when non-empty.
pub fn enumerate_multicast_interfaces(cfg: &MdnsConfig) -> Result<Vec<Ipv4Addr>> {
    if !cfg.interfaces.is_empty() {
        return Ok(cfg
            .interfaces
            .iter()
            .filter_map(|a| match a {
                IpAddr::V4(v4) => Some(*v4),
                IpAddr::V6(_) => None,
            })
            .collect());
    }

    let interfaces = local_ip_address::list_afinet_netifas()
        .map_err(|e| Error::DiscoveryInit(format!("interface enumeration failed: {e}")))?;

    let addrs = interfaces
        .into_iter()
        .filter_map(|(_name, ip)| match ip {
            IpAddr::V4(v4) if !v4.is_loopback() => Some(v4),
            _ => None,
        })
        .collect();
    Ok(addrs)
}

/// Bind one UDP socket per interface for mDNS send/receive, each joined to
/// the mDNS multicast group `224.0.0.251:5353`. Mirrors the teacher's
/// per-interface join loop, but fails loudly if not a single interface
/// could be bound (the teacher falls back to `UNSPECIFIED`; a discovery
/// engine with zero usable sockets can't do its job at all).
pub fn bind_multicast_sockets(cfg: &MdnsConfig) -> Result<Vec<(Ipv4Addr, std::net::UdpSocket)>> {
    const MDNS_GROUP: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 251);

    let interfaces = enumerate_multicast_interfaces(cfg)?;
    let mut sockets = Vec::new();

    for iface in interfaces {
        match bind_one(iface, MDNS_GROUP, cfg.port) {
            Ok(sock) => sockets.push((iface, sock)),
            Err(e) => log::debug!("mdns: skipping interface {iface}: {e}"),
        }
    }

    if sockets.is_empty() {
        return Err(Error::DiscoveryInit(
            "no usable multicast interface for mDNS discovery".into(),
        ));
    }
    Ok(sockets)
}

fn bind_one(iface: Ipv4Addr, group: Ipv4Addr, port: u16) -> Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.bind(&SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port).into())?;
    socket.join_multicast_v4(&group, &iface)?;
    socket.set_multicast_loop_v4(true)?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

/// Tracks how many logical owners (monitored scopes) are currently relying
/// on the multicast socket for a given interface, so the last owner to
/// leave can tear the socket down instead of every caller managing its own
/// lifetime bookkeeping.
#[derive(Default)]
pub struct InterfaceRefCounts {
    counts: HashMap<Ipv4Addr, usize>,
}

impl InterfaceRefCounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if this is the first reference (caller should bind).
    pub fn acquire(&mut self, iface: Ipv4Addr) -> bool {
        let count = self.counts.entry(iface).or_insert(0);
        *count += 1;
        *count == 1
    }

    /// Returns `true` if this was the last reference (caller should tear
    /// down the socket).
    pub fn release(&mut self, iface: Ipv4Addr) -> bool {
        match self.counts.get_mut(&iface) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                self.counts.remove(&iface);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_acquire_reports_bind_needed() {
        let mut refs = InterfaceRefCounts::new();
        let iface = Ipv4Addr::new(10, 0, 0, 1);
        assert!(refs.acquire(iface));
        assert!(!refs.acquire(iface));
    }

    #[test]
    fn last_release_reports_teardown_needed() {
        let mut refs = InterfaceRefCounts::new();
        let iface = Ipv4Addr::new(10, 0, 0, 1);
        refs.acquire(iface);
        refs.acquire(iface);
        assert!(!refs.release(iface));
        assert!(refs.release(iface));
    }

    #[test]
    fn release_without_acquire_is_a_no_op() {
        let mut refs = InterfaceRefCounts::new();
        assert!(!refs.release(Ipv4Addr::new(10, 0, 0, 1)));
    }

    #[test]
    fn explicit_interface_override_is_honored() {
        let mut cfg = MdnsConfig::default();
        cfg.interfaces = vec![IpAddr::V4(Ipv4Addr::new(192, 168, 1, 5))];
        let ifaces = enumerate_multicast_interfaces(&cfg).unwrap();
        assert_eq!(ifaces, vec![Ipv4Addr::new(192, 168, 1, 5)]);
    }
}
