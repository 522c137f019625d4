// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The ACN root layer: 16-byte preamble, then a root-layer PDU block
//! carrying a sequence of broker or RPT PDUs under one root vector
//! (`spec.md` §4.1, §6).

use crate::codec::cursor::{Cursor, CursorMut};
use crate::codec::rpt::RptPdu;
use crate::codec::BrokerPdu;
use crate::config::{
    ROOT_PACKET_IDENTIFIER, ROOT_POSTAMBLE_SIZE, ROOT_PREAMBLE_SIZE, VECTOR_ROOT_BROKER,
    VECTOR_ROOT_EPT, VECTOR_ROOT_RPT,
};
use crate::error::{Error, Result};
use crate::ids::Cid;

/// Root-layer vector: which sub-protocol block follows the sender CID.
#[derive(Clone, Debug, PartialEq)]
pub enum RootVector {
    Broker(Vec<BrokerPdu>),
    Rpt(Vec<RptPdu>),
}

/// One complete root-layer message: the ACN preamble, a sender CID, and a
/// block of one or more sibling PDUs of the same sub-protocol.
#[derive(Clone, Debug, PartialEq)]
pub struct RootPdu {
    pub sender_cid: Cid,
    pub vector: RootVector,
}

fn write_preamble(cur: &mut CursorMut<'_>) -> Result<()> {
    cur.write_u16(ROOT_PREAMBLE_SIZE as u16)?;
    cur.write_u16(ROOT_POSTAMBLE_SIZE)?;
    cur.write_bytes(ROOT_PACKET_IDENTIFIER)
}

fn read_preamble(cur: &mut Cursor<'_>) -> Result<()> {
    let preamble_size = cur.read_u16()?;
    if preamble_size as usize != ROOT_PREAMBLE_SIZE {
        return Err(Error::MalformedPdu(format!(
            "unexpected ACN preamble size {preamble_size}"
        )));
    }
    let _postamble_size = cur.read_u16()?;
    let identifier = cur.read_bytes(12)?;
    if identifier != ROOT_PACKET_IDENTIFIER {
        return Err(Error::MalformedPdu("bad ACN packet identifier".into()));
    }
    Ok(())
}

impl RootPdu {
    pub fn pack(&self, cur: &mut CursorMut<'_>) -> Result<()> {
        write_preamble(cur)?;

        let header_offset = cur.offset();
        cur.write_bytes(&[0, 0, 0])?;
        let root_vector = match &self.vector {
            RootVector::Broker(_) => VECTOR_ROOT_BROKER,
            RootVector::Rpt(_) => VECTOR_ROOT_RPT,
        };
        cur.write_u32(root_vector)?;
        cur.write_bytes(&self.sender_cid.0)?;

        match &self.vector {
            RootVector::Broker(pdus) => {
                for pdu in pdus {
                    pdu.pack(cur)?;
                }
            }
            RootVector::Rpt(pdus) => {
                for pdu in pdus {
                    pdu.pack(cur)?;
                }
            }
        }

        let len = (cur.offset() - header_offset) as u32;
        cur.patch_flags_and_length(header_offset, 0, len);
        Ok(())
    }

    pub fn unpack(cur: &mut Cursor<'_>) -> Result<Self> {
        read_preamble(cur)?;

        let (_flags, length) = cur.read_flags_and_length()?;
        let vector = cur.read_u32()?;
        let block_start_before_cid = cur.offset();
        let sender_cid = Cid::new(cur.read_bytes(16)?.try_into().unwrap());
        let block_end = block_start_before_cid + (length as usize) - 7;

        let root_vector = match vector {
            VECTOR_ROOT_BROKER => {
                let mut pdus = Vec::new();
                while cur.offset() < block_end {
                    pdus.push(BrokerPdu::unpack(cur)?);
                }
                RootVector::Broker(pdus)
            }
            VECTOR_ROOT_RPT => {
                let mut pdus = Vec::new();
                let mut last_header = None;
                while cur.offset() < block_end {
                    let pdu = RptPdu::unpack(cur, last_header)?;
                    if pdu.header.is_some() {
                        last_header = pdu.header;
                    }
                    pdus.push(pdu);
                }
                RootVector::Rpt(pdus)
            }
            VECTOR_ROOT_EPT => {
                return Err(Error::MalformedPdu(
                    "EPT root vector parsing is not implemented".into(),
                ))
            }
            other => return Err(Error::UnknownVector(other)),
        };

        Ok(Self {
            sender_cid,
            vector: root_vector,
        })
    }
}

/// Total encoded size, in bytes, of an all-headers root PDU wrapping a
/// single child PDU whose own encoded size is `child_len`. Callers size
/// their outgoing buffer with this before calling [`RootPdu::pack`].
pub fn framed_len(child_len: usize) -> usize {
    ROOT_PREAMBLE_SIZE + 3 + 4 + 16 + child_len
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::client_entry::{ClientEntry, ClientEntryData, ClientType};
    use crate::codec::rpt::{RptHeader, RptVector};
    use crate::codec::rdm::RdmCommandBuffer;
    use crate::ids::Uid;

    fn sample_client_entry() -> ClientEntry {
        ClientEntry {
            cid: Cid::new([4; 16]),
            data: ClientEntryData::Rpt {
                uid: Uid::new(0x6574, 1),
                client_type: ClientType::Controller,
                binding_cid: Cid::new([0; 16]),
            },
        }
    }

    #[test]
    fn broker_root_pdu_round_trips() {
        let root = RootPdu {
            sender_cid: Cid::new([1; 16]),
            vector: RootVector::Broker(vec![BrokerPdu::Connect {
                scope: crate::ids::Scope::default_scope(),
                e133_version: 1,
                client_entry: sample_client_entry(),
            }]),
        };
        let mut buf = vec![0u8; 512];
        let written = {
            let mut w = CursorMut::new(&mut buf);
            root.pack(&mut w).unwrap();
            w.offset()
        };
        let decoded = RootPdu::unpack(&mut Cursor::new(&buf[..written])).unwrap();
        assert_eq!(decoded, root);
    }

    #[test]
    fn rpt_root_pdu_with_inherited_header_round_trips() {
        let header = RptHeader {
            source_uid: Uid::new(0x6574, 1),
            source_endpoint: 0,
            dest_uid: Uid::new(0x6574, 2),
            dest_endpoint: 0,
            seqnum: 1,
        };
        let first = RptPdu {
            header: Some(header),
            vector: RptVector::Request(RdmCommandBuffer::new(vec![0xAA; 26]).unwrap()),
        };
        let second = RptPdu {
            header: None,
            vector: RptVector::Request(RdmCommandBuffer::new(vec![0xBB; 26]).unwrap()),
        };
        let root = RootPdu {
            sender_cid: Cid::new([2; 16]),
            vector: RootVector::Rpt(vec![first, second]),
        };
        let mut buf = vec![0u8; 512];
        let written = {
            let mut w = CursorMut::new(&mut buf);
            root.pack(&mut w).unwrap();
            w.offset()
        };
        let decoded = RootPdu::unpack(&mut Cursor::new(&buf[..written])).unwrap();
        match decoded.vector {
            RootVector::Rpt(ref pdus) => {
                assert_eq!(pdus.len(), 2);
                assert_eq!(pdus[1].header, Some(header));
            }
            _ => panic!("expected RPT vector"),
        }
    }

    #[test]
    fn rejects_bad_preamble() {
        let mut buf = [0u8; 32];
        buf[1] = 5; // corrupt preamble size
        assert!(RootPdu::unpack(&mut Cursor::new(&buf)).is_err());
    }
}
