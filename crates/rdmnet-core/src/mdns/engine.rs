// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Ties the mDNS submodules together into a transport-agnostic discovery
//! engine: builds outgoing PTR queries per monitored scope and turns
//! incoming UDP datagrams into [`DiscoveryNotification`]s.
//!
//! Grounded in `rdmnet_disc_lightweight.c`'s module init/per-scope
//! monitor API, reshaped (per `spec.md` §4.3) around an explicit `Vec` of
//! monitored scopes rather than the original's intrusive linked list, and
//! kept socket-free like [`crate::connection::Connection`] so a caller can
//! drive it from either the `mio` poll loop or a `tokio` task.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::config::MdnsConfig;
use crate::error::Result;
use crate::mdns::discovered::{BrokerTable, DiscoveredBroker, DiscoveryNotification};
use crate::mdns::message::{build_query, DnsHeader};
use crate::mdns::names::parse_domain_name;
use crate::mdns::query::QueryScheduler;
use crate::mdns::records::{parse_resource_record, RecordType, ResourceRecord};
use crate::mdns::txt::{parse_txt_record, BrokerTxtInfo};

/// How long a `DiscoveredBroker` is kept without a refreshing PTR before it
/// is aged out as lost, independent of an explicit TTL=0 removal.
const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(3600);

/// Retry cadence for a still-incomplete per-broker service/host query;
/// unlike the per-scope PTR interval this doesn't back off, since a missing
/// SRV/TXT/address is expected to resolve quickly once the broker actually
/// answers.
const FOLLOWUP_QUERY_INTERVAL: Duration = Duration::from_secs(2);

/// An outgoing datagram the caller should send on the mDNS multicast
/// socket(s) for every monitored interface.
pub struct OutgoingQuery {
    pub scope: String,
    pub packet: Vec<u8>,
}

/// A broker seen via PTR but not yet fully resolved: `spec.md` §3's
/// per-broker platform attributes (`srv_record_received`,
/// `txt_record_received`, `sent_service_query`, `sent_host_query`) tracked
/// while SRV/TXT/address records accrue across separate datagrams, since a
/// real mDNS responder routinely answers PTR, SRV, TXT, and A/AAAA in
/// different packets rather than all at once.
#[derive(Debug)]
struct PendingBroker {
    service_name: String,
    scope: String,
    host_name: Option<String>,
    port: Option<u16>,
    listen_addrs: Vec<SocketAddr>,
    txt: Option<BrokerTxtInfo>,
    srv_record_received: bool,
    txt_record_received: bool,
    sent_service_query: bool,
    sent_host_query: bool,
    next_service_query_due: Instant,
    next_host_query_due: Instant,
    first_seen: Instant,
}

impl PendingBroker {
    fn new(service_name: String, scope: String, now: Instant) -> Self {
        Self {
            service_name,
            scope,
            host_name: None,
            port: None,
            listen_addrs: Vec::new(),
            txt: None,
            srv_record_received: false,
            txt_record_received: false,
            sent_service_query: false,
            sent_host_query: false,
            next_service_query_due: now,
            next_host_query_due: now,
            first_seen: now,
        }
    }

    fn needs_service_query(&self) -> bool {
        !(self.srv_record_received && self.txt_record_received)
    }

    fn needs_host_query(&self) -> bool {
        self.srv_record_received && self.listen_addrs.is_empty()
    }

    fn is_complete(&self) -> bool {
        self.srv_record_received && self.txt_record_received && !self.listen_addrs.is_empty()
    }

    fn into_discovered(self) -> Option<DiscoveredBroker> {
        Some(DiscoveredBroker {
            service_name: self.service_name,
            scope: self.scope,
            host_name: self.host_name?,
            port: self.port?,
            listen_addrs: self.listen_addrs,
            txt: self.txt?,
        })
    }
}

/// Query-only mDNS/DNS-SD discovery engine: no registration/advertisement
/// side (that is explicitly out of scope, `spec.md` §1).
pub struct DiscoveryEngine {
    cfg: MdnsConfig,
    scheduler: QueryScheduler,
    tables: HashMap<String, BrokerTable>,
    /// Keyed by PTR target (instance name), brokers seen but not yet fully
    /// resolved.
    pending: HashMap<String, PendingBroker>,
}

impl DiscoveryEngine {
    pub fn new(cfg: MdnsConfig) -> Self {
        Self {
            cfg,
            scheduler: QueryScheduler::new(),
            tables: HashMap::new(),
            pending: HashMap::new(),
        }
    }

    pub fn monitor_scope(&mut self, scope: impl Into<String>, now: Instant) {
        let scope = scope.into();
        self.scheduler.monitor_scope(scope.clone(), &self.cfg, now);
        self.tables.entry(scope).or_insert_with(BrokerTable::new);
    }

    pub fn stop_monitoring(&mut self, scope: &str) {
        self.scheduler.stop_monitoring(scope);
        self.tables.remove(scope);
        self.pending.retain(|_, p| p.scope != scope);
    }

    fn service_subtype(&self, scope: &str) -> String {
        format!("_{scope}._sub._rdmnet._tcp.{}", self.cfg.domain)
    }

    /// Build (and mark sent) one PTR query per scope whose interval has
    /// elapsed, plus follow-up per-broker SRV/TXT queries for any pending
    /// broker still missing one of those records and per-broker A/AAAA
    /// queries for any pending broker with a known host but no address yet
    /// (`spec.md` §4.3).
    pub fn due_queries(&mut self, now: Instant) -> Result<Vec<OutgoingQuery>> {
        let mut out = Vec::new();
        for scope in self.scheduler.due_scopes(now) {
            let packet = build_query(&self.service_subtype(&scope), RecordType::Ptr)?;
            self.scheduler.note_sent(&scope, now);
            out.push(OutgoingQuery { scope, packet });
        }

        for broker in self.pending.values_mut() {
            if broker.needs_service_query() && now >= broker.next_service_query_due {
                out.push(OutgoingQuery {
                    scope: broker.scope.clone(),
                    packet: build_query(&broker.service_name, RecordType::Srv)?,
                });
                out.push(OutgoingQuery {
                    scope: broker.scope.clone(),
                    packet: build_query(&broker.service_name, RecordType::Txt)?,
                });
                broker.sent_service_query = true;
                broker.next_service_query_due = now + FOLLOWUP_QUERY_INTERVAL;
            }
            if broker.needs_host_query() && now >= broker.next_host_query_due {
                if let Some(host_name) = &broker.host_name {
                    out.push(OutgoingQuery {
                        scope: broker.scope.clone(),
                        packet: build_query(host_name, RecordType::A)?,
                    });
                    out.push(OutgoingQuery {
                        scope: broker.scope.clone(),
                        packet: build_query(host_name, RecordType::Aaaa)?,
                    });
                    broker.sent_host_query = true;
                    broker.next_host_query_due = now + FOLLOWUP_QUERY_INTERVAL;
                }
            }
        }
        Ok(out)
    }

    /// Drop brokers that haven't been refreshed recently across every
    /// monitored scope, and give up on a pending broker whose SRV/TXT/
    /// address records never arrived within the same window.
    pub fn expire_stale(&mut self, now: Instant) -> Vec<DiscoveryNotification> {
        self.pending
            .retain(|_, p| now.duration_since(p.first_seen) <= DEFAULT_STALE_AFTER);
        self.tables
            .values_mut()
            .flat_map(|t| t.expire_stale(now, DEFAULT_STALE_AFTER))
            .collect()
    }

    /// Process one received UDP datagram, returning whatever
    /// found/updated/lost notifications it produced. A datagram with
    /// records this engine doesn't care about (wrong class, malformed
    /// fields in an unrelated record) is not fatal; only a truncated
    /// header is an error.
    ///
    /// A real mDNS exchange is staggered: the PTR typically arrives in one
    /// datagram and the SRV/TXT/address records that resolve it in others,
    /// prompted by the follow-up queries [`Self::due_queries`] issues. Each
    /// record type is therefore folded into whichever [`PendingBroker`]
    /// it resolves (creating one on a fresh PTR), and a broker is only
    /// promoted into its scope's [`BrokerTable`] once SRV, TXT, and at
    /// least one address record have all been seen.
    pub fn process_packet(&mut self, buf: &[u8], now: Instant) -> Result<Vec<DiscoveryNotification>> {
        let (header, mut cur) = DnsHeader::parse(buf)?;

        for _ in 0..header.question_count {
            let (_, next) = parse_domain_name(buf, cur)?;
            cur = next + 4; // QTYPE + QCLASS
        }

        let total_records = header.answer_count as usize
            + header.authority_count as usize
            + header.additional_count as usize;

        let mut records: Vec<ResourceRecord> = Vec::new();
        let mut record_offsets: Vec<usize> = Vec::new();
        for _ in 0..total_records {
            if cur >= buf.len() {
                break;
            }
            let record_start = cur;
            let (rr, next) = parse_resource_record(buf, cur)?;
            cur = next;
            if let Some(rr) = rr {
                records.push(rr);
                record_offsets.push(record_start);
            }
        }

        let mut notifications = Vec::new();

        for (ptr, &ptr_offset) in records
            .iter()
            .zip(record_offsets.iter())
            .filter(|(rr, _)| rr.record_type == RecordType::Ptr)
            .map(|(rr, off)| (rr, off))
            .collect::<Vec<_>>()
        {
            let Some(scope) = extract_scope_from_subtype(&ptr.name) else { continue };
            let rdata_offset = find_rdata_offset(buf, ptr_offset)?;
            let instance_name = ptr.as_ptr_name(buf, rdata_offset)?;

            if ptr.ttl == 0 {
                self.pending.remove(&instance_name);
                if let Some(table) = self.tables.get_mut(&scope) {
                    if let Some(notif) = table.remove(&instance_name) {
                        notifications.push(notif);
                    }
                }
                continue;
            }

            if self.has_broker(&instance_name) {
                // Already resolved; a periodic re-announcement often carries
                // the full record set in one datagram, so try a same-packet
                // refresh instead of restarting the pending-accrual path
                // (which would otherwise requery a broker we already know).
                if let Some(declared_scope) = declared_scope_of(&records, &instance_name)? {
                    if declared_scope != scope {
                        if let Some(table) = self.tables.get_mut(&scope) {
                            if let Some(notif) = table.remove(&instance_name) {
                                notifications.push(notif);
                            }
                        }
                        continue;
                    }
                }
                if let Some(broker) =
                    resolve_from_records(buf, &records, &record_offsets, &instance_name, &scope)?
                {
                    let table = self.tables.entry(scope.clone()).or_insert_with(BrokerTable::new);
                    if let Some(notif) = table.upsert(broker, now) {
                        notifications.push(notif);
                    }
                }
                continue;
            }
            self.pending
                .entry(instance_name.clone())
                .or_insert_with(|| PendingBroker::new(instance_name, scope, now));
        }

        for (srv, &srv_offset) in records
            .iter()
            .zip(record_offsets.iter())
            .filter(|(rr, _)| rr.record_type == RecordType::Srv)
            .map(|(rr, off)| (rr, off))
            .collect::<Vec<_>>()
        {
            let Some(pending) = self.pending.get_mut(&srv.name) else { continue };
            let (_priority, _weight, port) = srv.as_srv_fixed_fields()?;
            let srv_rdata_offset = find_rdata_offset(buf, srv_offset)?;
            let (host_name, _) = parse_domain_name(buf, srv_rdata_offset + 6)?;
            pending.host_name = Some(host_name);
            pending.port = Some(port);
            pending.srv_record_received = true;
        }

        let mut scope_mismatches = Vec::new();
        for txt in records.iter().filter(|r| r.record_type == RecordType::Txt) {
            let Some(pending) = self.pending.get_mut(&txt.name) else { continue };
            let txt_info = parse_txt_record(&txt.rdata)?;
            let Some(declared_scope) = &txt_info.scope else { continue };
            if *declared_scope != pending.scope {
                scope_mismatches.push(txt.name.clone());
                continue;
            }
            pending.txt = Some(txt_info);
            pending.txt_record_received = true;
        }
        for instance_name in scope_mismatches {
            self.pending.remove(&instance_name);
        }

        for rec in records
            .iter()
            .filter(|r| matches!(r.record_type, RecordType::A | RecordType::Aaaa))
        {
            for pending in self.pending.values_mut() {
                if pending.host_name.as_deref() != Some(rec.name.as_str()) {
                    continue;
                }
                let Some(port) = pending.port else { continue };
                let addr = match rec.record_type {
                    RecordType::A => rec.as_a().ok().map(|ip| SocketAddr::new(ip.into(), port)),
                    RecordType::Aaaa => rec.as_aaaa().ok().map(|ip| SocketAddr::new(ip.into(), port)),
                    _ => None,
                };
                if let Some(addr) = addr {
                    if !pending.listen_addrs.contains(&addr) {
                        pending.listen_addrs.push(addr);
                    }
                }
            }
        }

        let ready: Vec<String> = self
            .pending
            .values()
            .filter(|p| p.is_complete())
            .map(|p| p.service_name.clone())
            .collect();
        for service_name in ready {
            let Some(pending) = self.pending.remove(&service_name) else { continue };
            let scope = pending.scope.clone();
            let Some(broker) = pending.into_discovered() else { continue };
            let table = self.tables.entry(scope).or_insert_with(BrokerTable::new);
            if let Some(notif) = table.upsert(broker, now) {
                notifications.push(notif);
            }
        }

        Ok(notifications)
    }

    fn has_broker(&self, service_name: &str) -> bool {
        self.tables.values().any(|t| t.iter().any(|b| b.service_name == service_name))
    }
}

/// `_<scope>._sub._rdmnet._tcp.<domain>` -> `<scope>`, or `None` if `name`
/// isn't a scope subtype PTR query name at all.
fn extract_scope_from_subtype(name: &str) -> Option<String> {
    let suffix = "._sub._rdmnet._tcp";
    let idx = name.find(suffix)?;
    let label = &name[..idx];
    label.strip_prefix('_').map(|s| s.to_string())
}

/// Re-derive the byte offset of a record's RDATA by re-walking its name and
/// fixed fields from `record_start` — `parse_resource_record` doesn't hand
/// this back directly since most callers only need the already-sliced
/// `rdata`, but PTR/SRV names inside RDATA may use compression back into
/// the full message and so must be parsed with the message, not the slice.
fn find_rdata_offset(buf: &[u8], record_start: usize) -> Result<usize> {
    let (_, after_name) = parse_domain_name(buf, record_start)?;
    Ok(after_name + 2 + 2 + 4 + 2) // TYPE + CLASS + TTL + RDLENGTH
}

/// The `E133Scope` a TXT record for `instance_name` declares, if this
/// datagram carries one.
fn declared_scope_of(records: &[ResourceRecord], instance_name: &str) -> Result<Option<String>> {
    let Some(txt) = records
        .iter()
        .find(|r| r.record_type == RecordType::Txt && r.name == instance_name)
    else {
        return Ok(None);
    };
    Ok(parse_txt_record(&txt.rdata)?.scope)
}

/// Resolve a broker from SRV/TXT/address records for `instance_name`
/// present in this same datagram, or `None` if any of the three is
/// missing here — used to refresh an already-known broker without
/// restarting the pending-accrual path.
fn resolve_from_records(
    buf: &[u8],
    records: &[ResourceRecord],
    record_offsets: &[usize],
    instance_name: &str,
    scope: &str,
) -> Result<Option<DiscoveredBroker>> {
    let Some((srv, &srv_offset)) = records
        .iter()
        .zip(record_offsets.iter())
        .find(|(r, _)| r.record_type == RecordType::Srv && r.name == instance_name)
    else {
        return Ok(None);
    };
    let Some(txt) = records
        .iter()
        .find(|r| r.record_type == RecordType::Txt && r.name == instance_name)
    else {
        return Ok(None);
    };

    let (_priority, _weight, port) = srv.as_srv_fixed_fields()?;
    let srv_rdata_offset = find_rdata_offset(buf, srv_offset)?;
    let (host_name, _) = parse_domain_name(buf, srv_rdata_offset + 6)?;

    let txt_info = parse_txt_record(&txt.rdata)?;
    let Some(declared_scope) = &txt_info.scope else { return Ok(None) };
    if declared_scope != scope {
        return Ok(None);
    }

    let mut listen_addrs: Vec<SocketAddr> = Vec::new();
    for rec in records.iter().filter(|r| r.name == host_name) {
        match rec.record_type {
            RecordType::A => {
                if let Ok(ip) = rec.as_a() {
                    listen_addrs.push(SocketAddr::new(ip.into(), port));
                }
            }
            RecordType::Aaaa => {
                if let Ok(ip) = rec.as_aaaa() {
                    listen_addrs.push(SocketAddr::new(ip.into(), port));
                }
            }
            _ => {}
        }
    }
    if listen_addrs.is_empty() {
        return Ok(None);
    }

    Ok(Some(DiscoveredBroker {
        service_name: instance_name.to_string(),
        scope: scope.to_string(),
        host_name,
        port,
        listen_addrs,
        txt: txt_info,
    }))
}
