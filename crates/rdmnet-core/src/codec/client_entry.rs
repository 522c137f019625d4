// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The `ClientEntry` PDU: client-protocol tag plus protocol-specific fields.

use crate::codec::cursor::{Cursor, CursorMut};
use crate::error::{Error, Result};
use crate::ids::{Cid, Uid};

pub const VECTOR_CLIENT_RPT: u32 = 0x0000_0001;
pub const VECTOR_CLIENT_EPT: u32 = 0x0000_0002;

/// RPT client role, carried in the RPT client-entry sub-fields.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientType {
    Controller,
    Device,
    Unknown,
}

impl ClientType {
    fn to_wire(self) -> u8 {
        match self {
            ClientType::Controller => 0,
            ClientType::Device => 1,
            ClientType::Unknown => 0xFF,
        }
    }

    fn from_wire(v: u8) -> Self {
        match v {
            0 => ClientType::Controller,
            1 => ClientType::Device,
            _ => ClientType::Unknown,
        }
    }
}

/// One (manufacturer, protocol-id) pair in an EPT client entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EptSubProtocol {
    pub manufacturer_id: u16,
    pub protocol_id: u32,
}

/// `ClientProtocol` tag distinguishing RPT from EPT client entries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientProtocol {
    Rpt,
    Ept,
}

/// Protocol-specific fields of a `ClientEntry`.
#[derive(Clone, Debug, PartialEq)]
pub enum ClientEntryData {
    Rpt {
        uid: Uid,
        client_type: ClientType,
        binding_cid: Cid,
    },
    Ept {
        protocols: Vec<EptSubProtocol>,
    },
}

/// A client entry: CID plus protocol-specific sub-fields (`spec.md` §4.1).
#[derive(Clone, Debug, PartialEq)]
pub struct ClientEntry {
    pub cid: Cid,
    pub data: ClientEntryData,
}

impl ClientEntry {
    pub fn protocol(&self) -> ClientProtocol {
        match self.data {
            ClientEntryData::Rpt { .. } => ClientProtocol::Rpt,
            ClientEntryData::Ept { .. } => ClientProtocol::Ept,
        }
    }

    pub fn wire_len(&self) -> usize {
        let body_len = match &self.data {
            ClientEntryData::Rpt { .. } => 6 + 1 + 16,
            ClientEntryData::Ept { protocols } => protocols.len() * (2 + 4),
        };
        3 + 4 + 16 + body_len
    }

    pub fn pack(&self, cur: &mut CursorMut<'_>) -> Result<()> {
        let header_offset = cur.offset();
        cur.write_bytes(&[0, 0, 0])?; // patched below
        let vector = match self.protocol() {
            ClientProtocol::Rpt => VECTOR_CLIENT_RPT,
            ClientProtocol::Ept => VECTOR_CLIENT_EPT,
        };
        cur.write_u32(vector)?;
        cur.write_bytes(&self.cid.0)?;
        match &self.data {
            ClientEntryData::Rpt {
                uid,
                client_type,
                binding_cid,
            } => {
                cur.write_bytes(&uid.to_bytes())?;
                cur.write_u8(client_type.to_wire())?;
                cur.write_bytes(&binding_cid.0)?;
            }
            ClientEntryData::Ept { protocols } => {
                for p in protocols {
                    cur.write_u16(p.manufacturer_id)?;
                    cur.write_u32(p.protocol_id)?;
                }
            }
        }
        let len = (cur.offset() - header_offset) as u32;
        cur.patch_flags_and_length(header_offset, 0, len);
        Ok(())
    }

    pub fn unpack(cur: &mut Cursor<'_>) -> Result<Self> {
        let (_flags, length) = cur.read_flags_and_length()?;
        let vector = cur.read_u32()?;
        let cid = Cid::new(cur.read_bytes(16)?.try_into().unwrap());
        let body_len = (length as usize)
            .checked_sub(3 + 4 + 16)
            .ok_or_else(|| Error::MalformedPdu("client entry length underflow".into()))?;

        let data = match vector {
            VECTOR_CLIENT_RPT => {
                let uid = Uid::from_bytes(cur.read_bytes(6)?.try_into().unwrap());
                let client_type = ClientType::from_wire(cur.read_u8()?);
                let binding_cid = Cid::new(cur.read_bytes(16)?.try_into().unwrap());
                ClientEntryData::Rpt {
                    uid,
                    client_type,
                    binding_cid,
                }
            }
            VECTOR_CLIENT_EPT => {
                let mut protocols = Vec::new();
                let mut remaining = body_len;
                while remaining >= 6 {
                    let manufacturer_id = cur.read_u16()?;
                    let protocol_id = cur.read_u32()?;
                    protocols.push(EptSubProtocol {
                        manufacturer_id,
                        protocol_id,
                    });
                    remaining -= 6;
                }
                ClientEntryData::Ept { protocols }
            }
            other => return Err(Error::UnknownVector(other)),
        };

        Ok(Self { cid, data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_rpt_entry() -> ClientEntry {
        ClientEntry {
            cid: Cid::new([1; 16]),
            data: ClientEntryData::Rpt {
                uid: Uid::new(0x6574, 1),
                client_type: ClientType::Controller,
                binding_cid: Cid::new([2; 16]),
            },
        }
    }

    #[test]
    fn rpt_entry_round_trips() {
        let entry = sample_rpt_entry();
        let mut buf = vec![0u8; entry.wire_len()];
        entry.pack(&mut CursorMut::new(&mut buf)).unwrap();
        let decoded = ClientEntry::unpack(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn ept_entry_round_trips() {
        let entry = ClientEntry {
            cid: Cid::new([3; 16]),
            data: ClientEntryData::Ept {
                protocols: vec![
                    EptSubProtocol {
                        manufacturer_id: 1,
                        protocol_id: 2,
                    },
                    EptSubProtocol {
                        manufacturer_id: 3,
                        protocol_id: 4,
                    },
                ],
            },
        };
        let mut buf = vec![0u8; entry.wire_len()];
        entry.pack(&mut CursorMut::new(&mut buf)).unwrap();
        let decoded = ClientEntry::unpack(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(decoded, entry);
    }
}
