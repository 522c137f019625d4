// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Live-connection client state: what the broker knows about a socket once
//! it has sent a valid `Connect` and been promoted out of the pending set.
//!
//! Distinct from [`rdmnet_core::codec::client_entry::ClientEntry`], which is
//! only the wire-level self-description a client sends during handshake and
//! receives back describing peers. `Client` is the broker's own view of a
//! live connection: its handle, its send queue, and (for RPT clients) the
//! UID and role used for routing decisions.

use std::time::Instant;

use rdmnet_core::codec::client_entry::{ClientEntry, ClientEntryData, ClientType, EptSubProtocol};
use rdmnet_core::ids::{Cid, Uid};
use tokio::sync::mpsc;

use crate::registry::Handle;

/// An RPT client's role, mirroring the wire-level [`ClientType`] but scoped
/// to what routing decisions actually need (`spec.md` §4.7, §9).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Controller,
    Device,
    Unknown,
}

impl From<ClientType> for Role {
    fn from(t: ClientType) -> Self {
        match t {
            ClientType::Controller => Role::Controller,
            ClientType::Device => Role::Device,
            ClientType::Unknown => Role::Unknown,
        }
    }
}

impl From<Role> for ClientType {
    fn from(r: Role) -> Self {
        match r {
            Role::Controller => ClientType::Controller,
            Role::Device => ClientType::Device,
            Role::Unknown => ClientType::Unknown,
        }
    }
}

/// Messages queued for a connection's write-side task. The routing engine
/// and housekeeping sweep only ever reach a client's socket through this
/// queue; nothing outside the connection task writes to the stream directly.
#[derive(Clone, Debug)]
pub enum OutboundMessage {
    Broker(rdmnet_core::codec::BrokerPdu),
    Rpt(rdmnet_core::codec::rpt::RptPdu),
    /// Ask the connection task to close the socket after flushing whatever
    /// is already queued ahead of this.
    Close,
}

/// A promoted RPT client: a controller or device that completed handshake.
#[derive(Clone, Debug)]
pub struct RptClient {
    pub cid: Cid,
    pub uid: Uid,
    pub role: Role,
    pub binding_cid: Cid,
}

/// A promoted EPT client.
#[derive(Clone, Debug)]
pub struct EptClient {
    pub cid: Cid,
    pub protocols: Vec<EptSubProtocol>,
}

/// Sum type over the two client protocols a broker can host, per `spec.md`
/// §9's guidance to model this as a tagged union rather than a lowest-
/// common-denominator struct with optional fields.
#[derive(Clone, Debug)]
pub enum Client {
    Rpt(RptClient),
    Ept(EptClient),
}

impl Client {
    pub fn from_wire(entry: ClientEntry) -> Self {
        match entry.data {
            ClientEntryData::Rpt {
                uid,
                client_type,
                binding_cid,
            } => Client::Rpt(RptClient {
                cid: entry.cid,
                uid,
                role: client_type.into(),
                binding_cid,
            }),
            ClientEntryData::Ept { protocols } => Client::Ept(EptClient {
                cid: entry.cid,
                protocols,
            }),
        }
    }

    pub fn cid(&self) -> Cid {
        match self {
            Client::Rpt(c) => c.cid,
            Client::Ept(c) => c.cid,
        }
    }

    pub fn uid(&self) -> Option<Uid> {
        match self {
            Client::Rpt(c) => Some(c.uid),
            Client::Ept(_) => None,
        }
    }

    /// The wire-level self-description for this client, as sent back to
    /// peers in `ConnectedClientList`/`ClientAdd`/`ClientRemove`.
    pub fn to_wire_entry(&self) -> ClientEntry {
        match self {
            Client::Rpt(c) => ClientEntry {
                cid: c.cid,
                data: ClientEntryData::Rpt {
                    uid: c.uid,
                    client_type: c.role.into(),
                    binding_cid: c.binding_cid,
                },
            },
            Client::Ept(c) => ClientEntry {
                cid: c.cid,
                data: ClientEntryData::Ept {
                    protocols: c.protocols.clone(),
                },
            },
        }
    }
}

/// Everything the registry keeps about one connection, promoted or not.
pub struct ClientRecord {
    pub handle: Handle,
    /// `None` until the connection completes handshake; the destination for
    /// the `FetchClientList`/routing logic, never for the pending-connect set.
    pub client: Option<Client>,
    pub outbound: mpsc::Sender<OutboundMessage>,
    pub connected_at: Instant,
    /// Set by `mark_for_destruction`; sweeping removes records with this set
    /// rather than tearing down state the moment a socket error is observed,
    /// so in-flight routing decisions referencing this handle don't panic.
    pub marked_for_destruction: bool,
}
