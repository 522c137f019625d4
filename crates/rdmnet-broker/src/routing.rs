// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The routing engine: handshake completion, client-list fetch, and RPT
//! message delivery (`spec.md` §4.7).
//!
//! Grounded in the teacher's `RelayRouter`, which keeps a
//! `HashMap<GuidPrefix, mpsc::Sender<Message>>` and forwards a payload to
//! one registered peer (`relay_data`) or every registered peer but one
//! (`broadcast`). The RDMnet routing engine plays the same role one layer
//! up: instead of forwarding an opaque payload, it has to decide *whether*
//! and *where* a decoded PDU goes, so each handler below returns the
//! outbound messages for the caller to hand to [`ClientRegistry`]'s queues
//! rather than sending anything itself — keeping the routing decisions
//! synchronous and independently testable, the same separation the teacher
//! gets almost for free by forwarding raw bytes.

use rdmnet_core::codec::client_entry::ClientEntry;
use rdmnet_core::codec::rpt::{RptHeader, RptPdu, RptStatusCode, RptVector};
use rdmnet_core::codec::BrokerPdu;
use rdmnet_core::codec::broker::ConnectStatusCode;
use rdmnet_core::ids::{Cid, Scope, Uid};

use crate::client::{Client, OutboundMessage, Role};
use crate::registry::{ClientRegistry, Handle};

/// One queued delivery: send `message` to `handle`'s outbound queue.
pub type Delivery = (Handle, OutboundMessage);

pub struct RoutingEngine {
    pub registry: ClientRegistry,
    scope: Scope,
    max_controllers: usize,
    max_devices: usize,
    broker_cid: Cid,
    broker_uid: Uid,
}

impl RoutingEngine {
    pub fn new(
        scope: Scope,
        max_controllers: usize,
        max_devices: usize,
        broker_cid: Cid,
        broker_uid: Uid,
    ) -> Self {
        Self {
            registry: ClientRegistry::new(),
            scope,
            max_controllers,
            max_devices,
            broker_cid,
            broker_uid,
        }
    }

    /// `spec.md` §4.7 handshake completion: scope check, then capacity
    /// check, then promote, then `ConnectReply`, then broadcast
    /// `ClientAdd` to every other client sharing this client's protocol.
    /// `ConnectReply` is pushed before the `ClientAdd` broadcasts so a
    /// caller that sends deliveries in order never shows a peer's
    /// `ClientAdd` before the new client's own `ConnectReply`. A rejection
    /// (wrong scope or over capacity) is answered with a `ConnectReply`
    /// carrying the matching non-`Ok` status, not a `Disconnect` — the
    /// caller closes the socket once that reply has been flushed, same as
    /// `send_connect_reply` followed by a teardown in the original broker.
    pub fn handle_connect(
        &mut self,
        handle: Handle,
        msg_scope: &Scope,
        entry: ClientEntry,
    ) -> Vec<Delivery> {
        if msg_scope.as_str() != self.scope.as_str() {
            self.registry.mark_for_destruction(handle);
            return vec![self.connect_reply_to(handle, ConnectStatusCode::ScopeMismatch)];
        }

        let client = Client::from_wire(entry);
        let role = match &client {
            Client::Rpt(r) => Some(r.role),
            Client::Ept(_) => None,
        };
        let at_capacity = match role {
            Some(Role::Controller) => self.registry.controller_count() >= self.max_controllers,
            _ => self.registry.device_count() >= self.max_devices,
        };
        if at_capacity {
            self.registry.mark_for_destruction(handle);
            return vec![self.connect_reply_to(handle, ConnectStatusCode::Capacity)];
        }

        let wire_entry = client.to_wire_entry();
        self.registry.promote(handle, client);

        let mut out = vec![self.connect_reply_to(handle, ConnectStatusCode::Ok)];
        for peer in self.registry.peers_sharing_protocol(handle) {
            out.push((
                peer,
                OutboundMessage::Broker(BrokerPdu::ClientAdd {
                    client_entries: vec![wire_entry.clone()],
                }),
            ));
        }
        out
    }

    fn connect_reply_to(&self, handle: Handle, code: ConnectStatusCode) -> Delivery {
        (
            handle,
            OutboundMessage::Broker(BrokerPdu::ConnectReply {
                code,
                e133_version: 1,
                broker_cid: self.broker_cid,
                broker_uid: self.broker_uid,
            }),
        )
    }

    /// `spec.md` §4.7 client-list fetch: respond with every currently
    /// connected client sharing the requester's protocol, including the
    /// requester itself.
    pub fn handle_fetch_client_list(&self, handle: Handle) -> Vec<Delivery> {
        let Some(record) = self.registry.get(handle) else {
            return Vec::new();
        };
        let Some(own) = &record.client else {
            return Vec::new();
        };

        let mut entries = vec![own.to_wire_entry()];
        for peer in self.registry.peers_sharing_protocol(handle) {
            if let Some(r) = self.registry.get(peer) {
                if let Some(c) = &r.client {
                    entries.push(c.to_wire_entry());
                }
            }
        }
        vec![(
            handle,
            OutboundMessage::Broker(BrokerPdu::ConnectedClientList {
                client_entries: entries,
            }),
        )]
    }

    /// `spec.md` §4.7 RPT routing: routed by destination UID, with an
    /// unknown destination answered with `UnknownRptUid` and a
    /// `BroadcastComplete` status dropped rather than forwarded.
    pub fn handle_rpt(&self, source_handle: Handle, pdu: RptPdu) -> Vec<Delivery> {
        let Some(header) = pdu.header else {
            return vec![self.status_to(
                source_handle,
                None,
                RptStatusCode::InvalidMessage,
                "missing RPT header",
            )];
        };

        if let RptVector::Status {
            code: RptStatusCode::BroadcastComplete,
            ..
        } = &pdu.vector
        {
            return Vec::new();
        }

        if header.dest_uid.is_any_broadcast() {
            return self.broadcast_rpt(header, pdu);
        }

        let Some(dest_handle) = self.registry.handle_for_uid(header.dest_uid) else {
            return vec![self.status_to(
                source_handle,
                Some(header),
                RptStatusCode::UnknownRdmUid,
                "no client registered for destination UID",
            )];
        };

        vec![(dest_handle, OutboundMessage::Rpt(RptPdu { header: Some(header), ..pdu }))]
    }

    fn broadcast_rpt(&self, header: RptHeader, pdu: RptPdu) -> Vec<Delivery> {
        let targets: Vec<Handle> = if header.dest_uid.is_manufacturer_broadcast() {
            self.registry
                .devices()
                .filter(|h| {
                    self.registry
                        .get(*h)
                        .and_then(|r| r.client.as_ref())
                        .and_then(Client::uid)
                        .is_some_and(|uid| uid.manufacturer_id == header.dest_uid.manufacturer_id)
                })
                .collect()
        } else if header.dest_uid.is_broadcast_all_controllers() {
            self.registry.controllers().collect()
        } else {
            // Broadcast-all-devices form.
            self.registry.devices().collect()
        };

        targets
            .into_iter()
            .map(|h| {
                (
                    h,
                    OutboundMessage::Rpt(RptPdu {
                        header: Some(header),
                        vector: pdu.vector.clone(),
                    }),
                )
            })
            .collect()
    }

    fn status_to(
        &self,
        handle: Handle,
        request_header: Option<RptHeader>,
        code: RptStatusCode,
        message: &str,
    ) -> Delivery {
        let header = request_header.map(|h| RptHeader {
            source_uid: h.dest_uid,
            source_endpoint: h.dest_endpoint,
            dest_uid: h.source_uid,
            dest_endpoint: h.source_endpoint,
            seqnum: h.seqnum,
        });
        (
            handle,
            OutboundMessage::Rpt(RptPdu {
                header,
                vector: RptVector::Status {
                    code,
                    message: message.to_string(),
                },
            }),
        )
    }

    /// `spec.md` §4.7 disconnect: flag the handle for removal; the actual
    /// teardown and `ClientRemove` broadcast happen on the next [`Self::sweep`].
    pub fn disconnect(&mut self, handle: Handle) {
        self.registry.mark_for_destruction(handle);
    }

    /// Drain the destruction queue and broadcast `ClientRemove` to every
    /// remaining peer that shared a removed client's protocol.
    pub fn sweep(&mut self) -> Vec<Delivery> {
        let mut out = Vec::new();
        for (handle, client) in self.registry.sweep() {
            let Some(client) = client else { continue };
            let wire_entry = client.to_wire_entry();
            let is_rpt = matches!(client, Client::Rpt(_));
            for record in self.registry.all_promoted() {
                if record.handle == handle {
                    continue;
                }
                let same_protocol = matches!(&record.client, Some(c) if matches!(c, Client::Rpt(_)) == is_rpt);
                if same_protocol {
                    out.push((
                        record.handle,
                        OutboundMessage::Broker(BrokerPdu::ClientRemove {
                            client_entries: vec![wire_entry.clone()],
                        }),
                    ));
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdmnet_core::codec::client_entry::{ClientEntryData, ClientType};
    use rdmnet_core::codec::rdm::RdmCommandBuffer;

    fn sender() -> tokio::sync::mpsc::Sender<OutboundMessage> {
        tokio::sync::mpsc::channel(8).0
    }

    fn engine() -> RoutingEngine {
        RoutingEngine::new(
            Scope::default_scope(),
            5,
            5,
            Cid::new([9; 16]),
            Uid::new(0x6574, 0),
        )
    }

    fn rpt_entry(uid: Uid, client_type: ClientType) -> ClientEntry {
        ClientEntry {
            cid: Cid::new([1; 16]),
            data: ClientEntryData::Rpt {
                uid,
                client_type,
                binding_cid: Cid::new([0; 16]),
            },
        }
    }

    #[test]
    fn connect_with_matching_scope_promotes_and_replies_ok() {
        let mut eng = engine();
        let handle = eng.registry.insert_pending(sender());
        let out = eng.handle_connect(
            handle,
            &Scope::default_scope(),
            rpt_entry(Uid::new(0x6574, 1), ClientType::Controller),
        );
        assert_eq!(out.len(), 1);
        match &out[0].1 {
            OutboundMessage::Broker(BrokerPdu::ConnectReply { code, .. }) => {
                assert_eq!(*code, ConnectStatusCode::Ok);
            }
            other => panic!("expected ConnectReply, got {other:?}"),
        }
    }

    #[test]
    fn connect_broadcasts_client_add_to_existing_peer() {
        let mut eng = engine();
        let first = eng.registry.insert_pending(sender());
        eng.handle_connect(
            first,
            &Scope::default_scope(),
            rpt_entry(Uid::new(0x6574, 1), ClientType::Controller),
        );

        let second = eng.registry.insert_pending(sender());
        let out = eng.handle_connect(
            second,
            &Scope::default_scope(),
            rpt_entry(Uid::new(0x6574, 2), ClientType::Device),
        );

        assert!(out.iter().any(|(h, msg)| {
            *h == first && matches!(msg, OutboundMessage::Broker(BrokerPdu::ClientAdd { .. }))
        }));
    }

    #[test]
    fn connect_with_wrong_scope_is_rejected() {
        let mut eng = engine();
        let handle = eng.registry.insert_pending(sender());
        let bad_scope = Scope::new("other-scope").unwrap();
        let out = eng.handle_connect(
            handle,
            &bad_scope,
            rpt_entry(Uid::new(0x6574, 1), ClientType::Controller),
        );
        assert_eq!(out.len(), 1);
        match &out[0].1 {
            OutboundMessage::Broker(BrokerPdu::ConnectReply { code, .. }) => {
                assert_eq!(*code, ConnectStatusCode::ScopeMismatch);
            }
            other => panic!("expected ConnectReply, got {other:?}"),
        }
        assert!(eng.registry.is_marked_for_destruction(handle));
    }

    #[test]
    fn connect_past_controller_capacity_is_rejected() {
        let mut eng = RoutingEngine::new(Scope::default_scope(), 1, 5, Cid::new([9; 16]), Uid::new(0x6574, 0));
        let first = eng.registry.insert_pending(sender());
        eng.handle_connect(
            first,
            &Scope::default_scope(),
            rpt_entry(Uid::new(0x6574, 1), ClientType::Controller),
        );

        let second = eng.registry.insert_pending(sender());
        let out = eng.handle_connect(
            second,
            &Scope::default_scope(),
            rpt_entry(Uid::new(0x6574, 2), ClientType::Controller),
        );
        match &out[0].1 {
            OutboundMessage::Broker(BrokerPdu::ConnectReply { code, .. }) => {
                assert_eq!(*code, ConnectStatusCode::Capacity);
            }
            other => panic!("expected ConnectReply, got {other:?}"),
        }
    }

    #[test]
    fn request_routed_to_known_device() {
        let mut eng = engine();
        let controller = eng.registry.insert_pending(sender());
        eng.handle_connect(
            controller,
            &Scope::default_scope(),
            rpt_entry(Uid::new(0x6574, 1), ClientType::Controller),
        );
        let device = eng.registry.insert_pending(sender());
        eng.handle_connect(
            device,
            &Scope::default_scope(),
            rpt_entry(Uid::new(0x6574, 2), ClientType::Device),
        );

        let pdu = RptPdu {
            header: Some(RptHeader {
                source_uid: Uid::new(0x6574, 1),
                source_endpoint: 0,
                dest_uid: Uid::new(0x6574, 2),
                dest_endpoint: 0,
                seqnum: 1,
            }),
            vector: RptVector::Request(RdmCommandBuffer::new(vec![0xAA; 26]).unwrap()),
        };
        let out = eng.handle_rpt(controller, pdu);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].0, device);
    }

    #[test]
    fn request_to_unknown_uid_gets_status_reply() {
        let mut eng = engine();
        let controller = eng.registry.insert_pending(sender());
        eng.handle_connect(
            controller,
            &Scope::default_scope(),
            rpt_entry(Uid::new(0x6574, 1), ClientType::Controller),
        );

        let pdu = RptPdu {
            header: Some(RptHeader {
                source_uid: Uid::new(0x6574, 1),
                source_endpoint: 0,
                dest_uid: Uid::new(0x6574, 99),
                dest_endpoint: 0,
                seqnum: 1,
            }),
            vector: RptVector::Request(RdmCommandBuffer::new(vec![0xAA; 26]).unwrap()),
        };
        let out = eng.handle_rpt(controller, pdu);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].0, controller);
        match &out[0].1 {
            OutboundMessage::Rpt(RptPdu {
                vector: RptVector::Status { code, .. },
                ..
            }) => assert_eq!(*code, RptStatusCode::UnknownRdmUid),
            other => panic!("expected status, got {other:?}"),
        }
    }

    #[test]
    fn broadcast_complete_status_is_dropped() {
        let mut eng = engine();
        let source = eng.registry.insert_pending(sender());
        let pdu = RptPdu {
            header: Some(RptHeader {
                source_uid: Uid::new(0x6574, 2),
                source_endpoint: 0,
                dest_uid: Uid::new(0x6574, 1),
                dest_endpoint: 0,
                seqnum: 1,
            }),
            vector: RptVector::Status {
                code: RptStatusCode::BroadcastComplete,
                message: String::new(),
            },
        };
        let out = eng.handle_rpt(source, pdu);
        assert!(out.is_empty());
    }

    #[test]
    fn sweep_broadcasts_client_remove_to_remaining_peer() {
        let mut eng = engine();
        let first = eng.registry.insert_pending(sender());
        eng.handle_connect(
            first,
            &Scope::default_scope(),
            rpt_entry(Uid::new(0x6574, 1), ClientType::Controller),
        );
        let second = eng.registry.insert_pending(sender());
        eng.handle_connect(
            second,
            &Scope::default_scope(),
            rpt_entry(Uid::new(0x6574, 2), ClientType::Device),
        );

        eng.disconnect(second);
        let out = eng.sweep();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].0, first);
        assert!(matches!(
            out[0].1,
            OutboundMessage::Broker(BrokerPdu::ClientRemove { .. })
        ));
    }
}
