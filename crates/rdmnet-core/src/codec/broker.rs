// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The broker PDU family: connection handshake, client-list maintenance,
//! dynamic UID assignment, and the `Null` heartbeat (`spec.md` §4.1, §6).

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::codec::client_entry::ClientEntry;
use crate::codec::cursor::{Cursor, CursorMut};
use crate::error::{Error, Result};
use crate::ids::{Cid, Scope, Uid};

pub const VECTOR_BROKER_CONNECT: u32 = 0x0000_0001;
pub const VECTOR_BROKER_CONNECT_REPLY: u32 = 0x0000_0002;
pub const VECTOR_BROKER_CLIENT_ENTRY_UPDATE: u32 = 0x0000_0003;
pub const VECTOR_BROKER_CLIENT_REDIRECT: u32 = 0x0000_0004;
pub const VECTOR_BROKER_FETCH_CLIENT_LIST: u32 = 0x0000_0005;
pub const VECTOR_BROKER_CONNECTED_CLIENT_LIST: u32 = 0x0000_0006;
pub const VECTOR_BROKER_CLIENT_ADD: u32 = 0x0000_0007;
pub const VECTOR_BROKER_CLIENT_REMOVE: u32 = 0x0000_0008;
pub const VECTOR_BROKER_CLIENT_ENTRY_CHANGE: u32 = 0x0000_0009;
pub const VECTOR_BROKER_REQUEST_DYNAMIC_UIDS: u32 = 0x0000_000A;
pub const VECTOR_BROKER_ASSIGNED_DYNAMIC_UIDS: u32 = 0x0000_000B;
pub const VECTOR_BROKER_FETCH_DYNAMIC_UID_LIST: u32 = 0x0000_000C;
pub const VECTOR_BROKER_DISCONNECT: u32 = 0x0000_000D;
pub const VECTOR_BROKER_NULL: u32 = 0x0000_000E;

/// Result code carried in a `ConnectReply`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectStatusCode {
    Ok,
    ScopeMismatch,
    Capacity,
    DuplicateUid,
    InvalidClientEntry,
    InvalidUid,
}

impl ConnectStatusCode {
    fn to_wire(self) -> u16 {
        match self {
            ConnectStatusCode::Ok => 0,
            ConnectStatusCode::ScopeMismatch => 1,
            ConnectStatusCode::Capacity => 2,
            ConnectStatusCode::DuplicateUid => 3,
            ConnectStatusCode::InvalidClientEntry => 4,
            ConnectStatusCode::InvalidUid => 5,
        }
    }

    fn from_wire(v: u16) -> Result<Self> {
        Ok(match v {
            0 => ConnectStatusCode::Ok,
            1 => ConnectStatusCode::ScopeMismatch,
            2 => ConnectStatusCode::Capacity,
            3 => ConnectStatusCode::DuplicateUid,
            4 => ConnectStatusCode::InvalidClientEntry,
            5 => ConnectStatusCode::InvalidUid,
            other => return Err(Error::MalformedPdu(format!("unknown connect status {other}"))),
        })
    }
}

/// Reason code carried in a `Disconnect`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisconnectReason {
    ShuttingDown,
    Capacity,
    HardwareFault,
    SoftwareFault,
    SoftwareReset,
    IncorrectScope,
    RptSameIpAddr,
    RptNoConnectedSlots,
}

impl DisconnectReason {
    fn to_wire(self) -> u16 {
        match self {
            DisconnectReason::ShuttingDown => 0,
            DisconnectReason::Capacity => 1,
            DisconnectReason::HardwareFault => 2,
            DisconnectReason::SoftwareFault => 3,
            DisconnectReason::SoftwareReset => 4,
            DisconnectReason::IncorrectScope => 5,
            DisconnectReason::RptSameIpAddr => 6,
            DisconnectReason::RptNoConnectedSlots => 7,
        }
    }

    fn from_wire(v: u16) -> Result<Self> {
        Ok(match v {
            0 => DisconnectReason::ShuttingDown,
            1 => DisconnectReason::Capacity,
            2 => DisconnectReason::HardwareFault,
            3 => DisconnectReason::SoftwareFault,
            4 => DisconnectReason::SoftwareReset,
            5 => DisconnectReason::IncorrectScope,
            6 => DisconnectReason::RptSameIpAddr,
            7 => DisconnectReason::RptNoConnectedSlots,
            other => return Err(Error::MalformedPdu(format!("unknown disconnect reason {other}"))),
        })
    }
}

/// Outcome of a dynamic UID assignment request, carried per-mapping in
/// `AssignedDynamicUids`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DynamicUidStatus {
    Ok,
    DuplicateRid,
    CapacityExhausted,
    InvalidRequest,
}

impl DynamicUidStatus {
    fn to_wire(self) -> u16 {
        match self {
            DynamicUidStatus::Ok => 0,
            DynamicUidStatus::DuplicateRid => 1,
            DynamicUidStatus::CapacityExhausted => 2,
            DynamicUidStatus::InvalidRequest => 3,
        }
    }

    fn from_wire(v: u16) -> Result<Self> {
        Ok(match v {
            0 => DynamicUidStatus::Ok,
            1 => DynamicUidStatus::DuplicateRid,
            2 => DynamicUidStatus::CapacityExhausted,
            3 => DynamicUidStatus::InvalidRequest,
            other => return Err(Error::MalformedPdu(format!("unknown dynamic UID status {other}"))),
        })
    }
}

/// One resolved (or rejected) dynamic UID mapping.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DynamicUidMapping {
    pub uid: Uid,
    pub rid: Cid,
    pub status: DynamicUidStatus,
}

fn write_socket_addr(cur: &mut CursorMut<'_>, addr: SocketAddr) -> Result<()> {
    match addr.ip() {
        IpAddr::V4(v4) => {
            cur.write_u8(4)?;
            cur.write_bytes(&v4.octets())?;
            cur.write_bytes(&[0u8; 12])?;
        }
        IpAddr::V6(v6) => {
            cur.write_u8(6)?;
            cur.write_bytes(&v6.octets())?;
        }
    }
    cur.write_u16(addr.port())
}

fn read_socket_addr(cur: &mut Cursor<'_>) -> Result<SocketAddr> {
    let family = cur.read_u8()?;
    let ip = match family {
        4 => {
            let bytes = cur.read_bytes(16)?;
            let v4 = Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]);
            IpAddr::V4(v4)
        }
        6 => {
            let bytes: [u8; 16] = cur.read_bytes(16)?.try_into().unwrap();
            IpAddr::V6(Ipv6Addr::from(bytes))
        }
        other => return Err(Error::MalformedPdu(format!("unknown address family {other}"))),
    };
    let port = cur.read_u16()?;
    Ok(SocketAddr::new(ip, port))
}

fn write_scope(cur: &mut CursorMut<'_>, scope: &Scope) -> Result<()> {
    let bytes = scope.as_str().as_bytes();
    cur.write_u8(bytes.len() as u8)?;
    cur.write_bytes(bytes)
}

fn read_scope(cur: &mut Cursor<'_>) -> Result<Scope> {
    let len = cur.read_u8()? as usize;
    let bytes = cur.read_bytes(len)?;
    let s = String::from_utf8_lossy(bytes).into_owned();
    Scope::new(s)
}

fn write_client_entries(cur: &mut CursorMut<'_>, entries: &[ClientEntry]) -> Result<()> {
    for entry in entries {
        entry.pack(cur)?;
    }
    Ok(())
}

fn read_client_entries(cur: &mut Cursor<'_>, block_end: usize) -> Result<Vec<ClientEntry>> {
    let mut entries = Vec::new();
    while cur.offset() < block_end {
        entries.push(ClientEntry::unpack(cur)?);
    }
    Ok(entries)
}

/// The full broker PDU family (`spec.md` §4.1).
#[derive(Clone, Debug, PartialEq)]
pub enum BrokerPdu {
    Connect {
        scope: Scope,
        e133_version: u16,
        client_entry: ClientEntry,
    },
    ConnectReply {
        code: ConnectStatusCode,
        e133_version: u16,
        broker_cid: Cid,
        broker_uid: Uid,
    },
    ClientEntryUpdate {
        client_entry: ClientEntry,
    },
    ClientRedirect {
        cid: Cid,
        addr: SocketAddr,
    },
    FetchClientList,
    ConnectedClientList {
        client_entries: Vec<ClientEntry>,
    },
    ClientAdd {
        client_entries: Vec<ClientEntry>,
    },
    ClientRemove {
        client_entries: Vec<ClientEntry>,
    },
    ClientEntryChange {
        client_entries: Vec<ClientEntry>,
    },
    RequestDynamicUids {
        manufacturer_id: u16,
        rids: Vec<Cid>,
    },
    AssignedDynamicUids {
        mappings: Vec<DynamicUidMapping>,
    },
    FetchDynamicUidAssignmentList {
        uids: Vec<Uid>,
    },
    Disconnect {
        reason: DisconnectReason,
    },
    Null,
}

impl BrokerPdu {
    fn vector(&self) -> u32 {
        match self {
            BrokerPdu::Connect { .. } => VECTOR_BROKER_CONNECT,
            BrokerPdu::ConnectReply { .. } => VECTOR_BROKER_CONNECT_REPLY,
            BrokerPdu::ClientEntryUpdate { .. } => VECTOR_BROKER_CLIENT_ENTRY_UPDATE,
            BrokerPdu::ClientRedirect { .. } => VECTOR_BROKER_CLIENT_REDIRECT,
            BrokerPdu::FetchClientList => VECTOR_BROKER_FETCH_CLIENT_LIST,
            BrokerPdu::ConnectedClientList { .. } => VECTOR_BROKER_CONNECTED_CLIENT_LIST,
            BrokerPdu::ClientAdd { .. } => VECTOR_BROKER_CLIENT_ADD,
            BrokerPdu::ClientRemove { .. } => VECTOR_BROKER_CLIENT_REMOVE,
            BrokerPdu::ClientEntryChange { .. } => VECTOR_BROKER_CLIENT_ENTRY_CHANGE,
            BrokerPdu::RequestDynamicUids { .. } => VECTOR_BROKER_REQUEST_DYNAMIC_UIDS,
            BrokerPdu::AssignedDynamicUids { .. } => VECTOR_BROKER_ASSIGNED_DYNAMIC_UIDS,
            BrokerPdu::FetchDynamicUidAssignmentList { .. } => VECTOR_BROKER_FETCH_DYNAMIC_UID_LIST,
            BrokerPdu::Disconnect { .. } => VECTOR_BROKER_DISCONNECT,
            BrokerPdu::Null => VECTOR_BROKER_NULL,
        }
    }

    pub fn pack(&self, cur: &mut CursorMut<'_>) -> Result<()> {
        let header_offset = cur.offset();
        cur.write_bytes(&[0, 0, 0])?;
        cur.write_u32(self.vector())?;

        match self {
            BrokerPdu::Connect {
                scope,
                e133_version,
                client_entry,
            } => {
                write_scope(cur, scope)?;
                cur.write_u16(*e133_version)?;
                client_entry.pack(cur)?;
            }
            BrokerPdu::ConnectReply {
                code,
                e133_version,
                broker_cid,
                broker_uid,
            } => {
                cur.write_u16(code.to_wire())?;
                cur.write_u16(*e133_version)?;
                cur.write_bytes(&broker_cid.0)?;
                cur.write_bytes(&broker_uid.to_bytes())?;
            }
            BrokerPdu::ClientEntryUpdate { client_entry } => {
                client_entry.pack(cur)?;
            }
            BrokerPdu::ClientRedirect { cid, addr } => {
                cur.write_bytes(&cid.0)?;
                write_socket_addr(cur, *addr)?;
            }
            BrokerPdu::FetchClientList => {}
            BrokerPdu::ConnectedClientList { client_entries }
            | BrokerPdu::ClientAdd { client_entries }
            | BrokerPdu::ClientRemove { client_entries }
            | BrokerPdu::ClientEntryChange { client_entries } => {
                write_client_entries(cur, client_entries)?;
            }
            BrokerPdu::RequestDynamicUids {
                manufacturer_id,
                rids,
            } => {
                cur.write_u16(*manufacturer_id)?;
                for rid in rids {
                    cur.write_bytes(&rid.0)?;
                }
            }
            BrokerPdu::AssignedDynamicUids { mappings } => {
                for m in mappings {
                    cur.write_bytes(&m.uid.to_bytes())?;
                    cur.write_bytes(&m.rid.0)?;
                    cur.write_u16(m.status.to_wire())?;
                }
            }
            BrokerPdu::FetchDynamicUidAssignmentList { uids } => {
                for uid in uids {
                    cur.write_bytes(&uid.to_bytes())?;
                }
            }
            BrokerPdu::Disconnect { reason } => {
                cur.write_u16(reason.to_wire())?;
            }
            BrokerPdu::Null => {}
        }

        let len = (cur.offset() - header_offset) as u32;
        cur.patch_flags_and_length(header_offset, 0, len);
        Ok(())
    }

    pub fn unpack(cur: &mut Cursor<'_>) -> Result<Self> {
        let (_flags, length) = cur.read_flags_and_length()?;
        let vector = cur.read_u32()?;
        let body_start = cur.offset();
        let body_end = body_start + (length as usize) - (3 + 4);

        let pdu = match vector {
            VECTOR_BROKER_CONNECT => {
                let scope = read_scope(cur)?;
                let e133_version = cur.read_u16()?;
                let client_entry = ClientEntry::unpack(cur)?;
                BrokerPdu::Connect {
                    scope,
                    e133_version,
                    client_entry,
                }
            }
            VECTOR_BROKER_CONNECT_REPLY => {
                let code = ConnectStatusCode::from_wire(cur.read_u16()?)?;
                let e133_version = cur.read_u16()?;
                let broker_cid = Cid::new(cur.read_bytes(16)?.try_into().unwrap());
                let broker_uid = Uid::from_bytes(cur.read_bytes(6)?.try_into().unwrap());
                BrokerPdu::ConnectReply {
                    code,
                    e133_version,
                    broker_cid,
                    broker_uid,
                }
            }
            VECTOR_BROKER_CLIENT_ENTRY_UPDATE => BrokerPdu::ClientEntryUpdate {
                client_entry: ClientEntry::unpack(cur)?,
            },
            VECTOR_BROKER_CLIENT_REDIRECT => {
                let cid = Cid::new(cur.read_bytes(16)?.try_into().unwrap());
                let addr = read_socket_addr(cur)?;
                BrokerPdu::ClientRedirect { cid, addr }
            }
            VECTOR_BROKER_FETCH_CLIENT_LIST => BrokerPdu::FetchClientList,
            VECTOR_BROKER_CONNECTED_CLIENT_LIST => BrokerPdu::ConnectedClientList {
                client_entries: read_client_entries(cur, body_end)?,
            },
            VECTOR_BROKER_CLIENT_ADD => BrokerPdu::ClientAdd {
                client_entries: read_client_entries(cur, body_end)?,
            },
            VECTOR_BROKER_CLIENT_REMOVE => BrokerPdu::ClientRemove {
                client_entries: read_client_entries(cur, body_end)?,
            },
            VECTOR_BROKER_CLIENT_ENTRY_CHANGE => BrokerPdu::ClientEntryChange {
                client_entries: read_client_entries(cur, body_end)?,
            },
            VECTOR_BROKER_REQUEST_DYNAMIC_UIDS => {
                let manufacturer_id = cur.read_u16()?;
                let mut rids = Vec::new();
                while cur.offset() + 16 <= body_end {
                    rids.push(Cid::new(cur.read_bytes(16)?.try_into().unwrap()));
                }
                BrokerPdu::RequestDynamicUids {
                    manufacturer_id,
                    rids,
                }
            }
            VECTOR_BROKER_ASSIGNED_DYNAMIC_UIDS => {
                let mut mappings = Vec::new();
                while cur.offset() + 6 + 16 + 2 <= body_end {
                    let uid = Uid::from_bytes(cur.read_bytes(6)?.try_into().unwrap());
                    let rid = Cid::new(cur.read_bytes(16)?.try_into().unwrap());
                    let status = DynamicUidStatus::from_wire(cur.read_u16()?)?;
                    mappings.push(DynamicUidMapping { uid, rid, status });
                }
                BrokerPdu::AssignedDynamicUids { mappings }
            }
            VECTOR_BROKER_FETCH_DYNAMIC_UID_LIST => {
                let mut uids = Vec::new();
                while cur.offset() + 6 <= body_end {
                    uids.push(Uid::from_bytes(cur.read_bytes(6)?.try_into().unwrap()));
                }
                BrokerPdu::FetchDynamicUidAssignmentList { uids }
            }
            VECTOR_BROKER_DISCONNECT => BrokerPdu::Disconnect {
                reason: DisconnectReason::from_wire(cur.read_u16()?)?,
            },
            VECTOR_BROKER_NULL => BrokerPdu::Null,
            other => return Err(Error::UnknownVector(other)),
        };

        Ok(pdu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::client_entry::{ClientEntryData, ClientType};

    fn sample_client_entry() -> ClientEntry {
        ClientEntry {
            cid: Cid::new([9; 16]),
            data: ClientEntryData::Rpt {
                uid: Uid::new(0x6574, 1),
                client_type: ClientType::Controller,
                binding_cid: Cid::new([0; 16]),
            },
        }
    }

    fn round_trip(pdu: BrokerPdu) -> BrokerPdu {
        let mut buf = vec![0u8; 512];
        let written = {
            let mut w = CursorMut::new(&mut buf);
            pdu.pack(&mut w).unwrap();
            w.offset()
        };
        BrokerPdu::unpack(&mut Cursor::new(&buf[..written])).unwrap()
    }

    #[test]
    fn connect_round_trips() {
        let pdu = BrokerPdu::Connect {
            scope: Scope::default_scope(),
            e133_version: 1,
            client_entry: sample_client_entry(),
        };
        assert_eq!(round_trip(pdu.clone()), pdu);
    }

    #[test]
    fn connect_reply_round_trips() {
        let pdu = BrokerPdu::ConnectReply {
            code: ConnectStatusCode::ScopeMismatch,
            e133_version: 1,
            broker_cid: Cid::new([7; 16]),
            broker_uid: Uid::new(0x6574, 99),
        };
        assert_eq!(round_trip(pdu.clone()), pdu);
    }

    #[test]
    fn client_redirect_round_trips_v4_and_v6() {
        let v4 = BrokerPdu::ClientRedirect {
            cid: Cid::new([1; 16]),
            addr: "10.0.0.5:8888".parse().unwrap(),
        };
        assert_eq!(round_trip(v4.clone()), v4);

        let v6 = BrokerPdu::ClientRedirect {
            cid: Cid::new([2; 16]),
            addr: "[fe80::1]:8888".parse().unwrap(),
        };
        assert_eq!(round_trip(v6.clone()), v6);
    }

    #[test]
    fn client_list_round_trips_with_multiple_entries() {
        let pdu = BrokerPdu::ConnectedClientList {
            client_entries: vec![sample_client_entry(), sample_client_entry()],
        };
        assert_eq!(round_trip(pdu.clone()), pdu);
    }

    #[test]
    fn null_and_fetch_client_list_have_no_payload() {
        assert_eq!(round_trip(BrokerPdu::Null), BrokerPdu::Null);
        assert_eq!(
            round_trip(BrokerPdu::FetchClientList),
            BrokerPdu::FetchClientList
        );
    }

    #[test]
    fn assigned_dynamic_uids_round_trips() {
        let pdu = BrokerPdu::AssignedDynamicUids {
            mappings: vec![DynamicUidMapping {
                uid: Uid::new(0x6574, 5),
                rid: Cid::new([3; 16]),
                status: DynamicUidStatus::Ok,
            }],
        };
        assert_eq!(round_trip(pdu.clone()), pdu);
    }

    #[test]
    fn disconnect_round_trips() {
        let pdu = BrokerPdu::Disconnect {
            reason: DisconnectReason::IncorrectScope,
        };
        assert_eq!(round_trip(pdu.clone()), pdu);
    }
}
