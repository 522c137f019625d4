// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The client registry: a central arena of connections keyed by a
//! monotonically increasing handle, with secondary indices for UID lookup
//! and controller/device membership (`spec.md` §4.7, §9).
//!
//! Grounded in the teacher's `ParticipantRegistry`, which keeps a primary
//! `HashMap<GuidPrefix, ParticipantInfo>` plus a `topic_index` and
//! `domain_index` in sync on every insert/remove. Here the primary key is a
//! synthetic handle rather than a GUID prefix (connections don't have a
//! stable wire identity until `Connect` arrives), and the secondary indices
//! store only handles rather than cloned data, per the arena+handle
//! guidance in `spec.md` §9: "routing is a lookup, never a pointer
//! dereference."

use std::collections::HashMap;

use rdmnet_core::ids::Uid;

use crate::client::{Client, ClientRecord, OutboundMessage, Role};

/// Opaque handle identifying one connection for the lifetime of the
/// registry. Never reused; a closed connection's handle becomes a dangling
/// key that simply fails every lookup.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(u64);

pub struct ClientRegistry {
    clients: HashMap<Handle, ClientRecord>,
    uid_index: HashMap<Uid, Handle>,
    controllers: Vec<Handle>,
    devices: Vec<Handle>,
    destruction_queue: Vec<Handle>,
    next_handle: u64,
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self {
            clients: HashMap::new(),
            uid_index: HashMap::new(),
            controllers: Vec::new(),
            devices: Vec::new(),
            destruction_queue: Vec::new(),
            next_handle: 1,
        }
    }

    /// Allocate a handle for a newly accepted socket, before it has sent
    /// `Connect` and before anything is known about it beyond its outbound
    /// queue. Not yet a member of `uid_index`, `controllers`, or `devices`.
    pub fn insert_pending(
        &mut self,
        outbound: tokio::sync::mpsc::Sender<OutboundMessage>,
    ) -> Handle {
        let handle = Handle(self.next_handle);
        self.next_handle += 1;
        self.clients.insert(
            handle,
            ClientRecord {
                handle,
                client: None,
                outbound,
                connected_at: std::time::Instant::now(),
                marked_for_destruction: false,
            },
        );
        handle
    }

    /// Promote a pending connection to a full client after a successful
    /// handshake (`spec.md` §4.7's "promote" step), indexing it by UID if it
    /// is an RPT client and recording controller/device membership.
    pub fn promote(&mut self, handle: Handle, client: Client) {
        if let Client::Rpt(ref rpt) = client {
            self.uid_index.insert(rpt.uid, handle);
            match rpt.role {
                Role::Controller => self.controllers.push(handle),
                Role::Device => self.devices.push(handle),
                Role::Unknown => {}
            }
        }
        if let Some(record) = self.clients.get_mut(&handle) {
            record.client = Some(client);
        }
    }

    pub fn get(&self, handle: Handle) -> Option<&ClientRecord> {
        self.clients.get(&handle)
    }

    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut ClientRecord> {
        self.clients.get_mut(&handle)
    }

    pub fn handle_for_uid(&self, uid: Uid) -> Option<Handle> {
        self.uid_index.get(&uid).copied()
    }

    pub fn controllers(&self) -> impl Iterator<Item = Handle> + '_ {
        self.controllers.iter().copied()
    }

    pub fn devices(&self) -> impl Iterator<Item = Handle> + '_ {
        self.devices.iter().copied()
    }

    pub fn controller_count(&self) -> usize {
        self.controllers.len()
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// All promoted clients sharing a client-protocol with `handle`'s own
    /// client, per `spec.md` §4.7's client-list fetch and add/remove
    /// broadcast scoping ("every other client sharing the same
    /// client-protocol"). Returns an empty vec for an unpromoted or unknown
    /// handle.
    pub fn peers_sharing_protocol(&self, handle: Handle) -> Vec<Handle> {
        let Some(record) = self.clients.get(&handle) else {
            return Vec::new();
        };
        let Some(client) = &record.client else {
            return Vec::new();
        };
        let is_rpt = matches!(client, Client::Rpt(_));
        self.clients
            .iter()
            .filter(|(h, r)| {
                **h != handle
                    && !r.marked_for_destruction
                    && matches!(&r.client, Some(c) if matches!(c, Client::Rpt(_)) == is_rpt)
            })
            .map(|(h, _)| *h)
            .collect()
    }

    pub fn all_promoted(&self) -> impl Iterator<Item = &ClientRecord> {
        self.clients
            .values()
            .filter(|r| r.client.is_some() && !r.marked_for_destruction)
    }

    /// Idempotent: flags a handle for removal on the next sweep rather than
    /// removing it immediately, so routing code already holding the handle
    /// this tick doesn't race a concurrent removal (`spec.md` §4.7's
    /// `MarkConnForDestruction`).
    pub fn mark_for_destruction(&mut self, handle: Handle) {
        if let Some(record) = self.clients.get_mut(&handle) {
            if record.marked_for_destruction {
                return;
            }
            record.marked_for_destruction = true;
            self.destruction_queue.push(handle);
        }
    }

    pub fn is_marked_for_destruction(&self, handle: Handle) -> bool {
        self.clients
            .get(&handle)
            .map(|r| r.marked_for_destruction)
            .unwrap_or(true)
    }

    /// Drain and remove every handle marked for destruction, returning the
    /// `Client` each one held (if promoted) so the caller can broadcast
    /// `ClientRemove` before the handle disappears from every index.
    pub fn sweep(&mut self) -> Vec<(Handle, Option<Client>)> {
        let handles = std::mem::take(&mut self.destruction_queue);
        let mut removed = Vec::with_capacity(handles.len());
        for handle in handles {
            let Some(record) = self.clients.remove(&handle) else {
                continue;
            };
            if let Some(Client::Rpt(ref rpt)) = record.client {
                self.uid_index.remove(&rpt.uid);
                self.controllers.retain(|h| *h != handle);
                self.devices.retain(|h| *h != handle);
            }
            removed.push((handle, record.client));
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender() -> tokio::sync::mpsc::Sender<OutboundMessage> {
        tokio::sync::mpsc::channel(8).0
    }

    fn rpt_client(uid: Uid, role: Role) -> Client {
        Client::Rpt(crate::client::RptClient {
            cid: rdmnet_core::ids::Cid::new([1; 16]),
            uid,
            role,
            binding_cid: rdmnet_core::ids::Cid::new([0; 16]),
        })
    }

    #[test]
    fn promote_indexes_by_uid_and_role() {
        let mut reg = ClientRegistry::new();
        let handle = reg.insert_pending(sender());
        let uid = Uid::new(0x6574, 1);
        reg.promote(handle, rpt_client(uid, Role::Controller));

        assert_eq!(reg.handle_for_uid(uid), Some(handle));
        assert_eq!(reg.controller_count(), 1);
        assert_eq!(reg.device_count(), 0);
    }

    #[test]
    fn mark_for_destruction_is_idempotent() {
        let mut reg = ClientRegistry::new();
        let handle = reg.insert_pending(sender());
        reg.mark_for_destruction(handle);
        reg.mark_for_destruction(handle);
        let removed = reg.sweep();
        assert_eq!(removed.len(), 1);
        assert!(reg.get(handle).is_none());
    }

    #[test]
    fn sweep_removes_uid_index_entry() {
        let mut reg = ClientRegistry::new();
        let handle = reg.insert_pending(sender());
        let uid = Uid::new(0x6574, 2);
        reg.promote(handle, rpt_client(uid, Role::Device));
        reg.mark_for_destruction(handle);
        reg.sweep();
        assert_eq!(reg.handle_for_uid(uid), None);
        assert_eq!(reg.device_count(), 0);
    }

    #[test]
    fn peers_sharing_protocol_excludes_self_and_other_protocol() {
        let mut reg = ClientRegistry::new();
        let a = reg.insert_pending(sender());
        let b = reg.insert_pending(sender());
        reg.promote(a, rpt_client(Uid::new(0x6574, 1), Role::Controller));
        reg.promote(b, rpt_client(Uid::new(0x6574, 2), Role::Device));

        let peers = reg.peers_sharing_protocol(a);
        assert_eq!(peers, vec![b]);
    }
}
