// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RPT (RDM Packet Transport) sub-protocol: header plus the
//! Request/Notification/Status PDU family (`spec.md` §4.1).

use crate::codec::cursor::{Cursor, CursorMut};
use crate::codec::rdm::RdmCommandBuffer;
use crate::codec::FLAG_HEADER_INHERIT;
use crate::error::{Error, Result};
use crate::ids::Uid;

pub const VECTOR_RPT_REQUEST: u32 = 0x0000_0001;
pub const VECTOR_RPT_STATUS: u32 = 0x0000_0002;
pub const VECTOR_RPT_NOTIFICATION: u32 = 0x0000_0003;

const RPT_HEADER_SIZE: usize = 6 + 2 + 6 + 2 + 4;

/// Source/destination UID+endpoint pair and sequence number shared by every
/// RPT PDU.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RptHeader {
    pub source_uid: Uid,
    pub source_endpoint: u16,
    pub dest_uid: Uid,
    pub dest_endpoint: u16,
    pub seqnum: u32,
}

impl RptHeader {
    pub fn pack(&self, cur: &mut CursorMut<'_>) -> Result<()> {
        cur.write_bytes(&self.source_uid.to_bytes())?;
        cur.write_u16(self.source_endpoint)?;
        cur.write_bytes(&self.dest_uid.to_bytes())?;
        cur.write_u16(self.dest_endpoint)?;
        cur.write_u32(self.seqnum)
    }

    pub fn unpack(cur: &mut Cursor<'_>) -> Result<Self> {
        let source_uid = Uid::from_bytes(cur.read_bytes(6)?.try_into().unwrap());
        let source_endpoint = cur.read_u16()?;
        let dest_uid = Uid::from_bytes(cur.read_bytes(6)?.try_into().unwrap());
        let dest_endpoint = cur.read_u16()?;
        let seqnum = cur.read_u32()?;
        Ok(Self {
            source_uid,
            source_endpoint,
            dest_uid,
            dest_endpoint,
            seqnum,
        })
    }
}

/// RPT status codes (`spec.md` §4.1, "Status" vector).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RptStatusCode {
    UnknownRptVector,
    InvalidMessage,
    InvalidCommandClass,
    UnknownRdmUid,
    UnknownRdmResponder,
    BroadcastComplete,
}

impl RptStatusCode {
    fn to_wire(self) -> u16 {
        match self {
            RptStatusCode::UnknownRptVector => 0x0000,
            RptStatusCode::InvalidMessage => 0x0001,
            RptStatusCode::InvalidCommandClass => 0x0002,
            RptStatusCode::UnknownRdmUid => 0x0003,
            RptStatusCode::UnknownRdmResponder => 0x0004,
            RptStatusCode::BroadcastComplete => 0x0005,
        }
    }

    fn from_wire(v: u16) -> Result<Self> {
        Ok(match v {
            0x0000 => RptStatusCode::UnknownRptVector,
            0x0001 => RptStatusCode::InvalidMessage,
            0x0002 => RptStatusCode::InvalidCommandClass,
            0x0003 => RptStatusCode::UnknownRdmUid,
            0x0004 => RptStatusCode::UnknownRdmResponder,
            0x0005 => RptStatusCode::BroadcastComplete,
            other => return Err(Error::MalformedPdu(format!("unknown RPT status code {other}"))),
        })
    }
}

/// The RPT vector tag and its vector-specific payload.
#[derive(Clone, Debug, PartialEq)]
pub enum RptVector {
    Request(RdmCommandBuffer),
    Notification(Vec<RdmCommandBuffer>),
    Status {
        code: RptStatusCode,
        message: String,
    },
}

/// A full RPT PDU: header plus vector-tagged payload.
///
/// `header` is `None` when the flags carry [`FLAG_HEADER_INHERIT`] and the
/// caller must substitute the previous sibling's header (the message buffer
/// does this before a `RptPdu` ever reaches an observer).
#[derive(Clone, Debug, PartialEq)]
pub struct RptPdu {
    pub header: Option<RptHeader>,
    pub vector: RptVector,
}

impl RptPdu {
    pub fn pack(&self, cur: &mut CursorMut<'_>) -> Result<()> {
        let header_offset = cur.offset();
        cur.write_bytes(&[0, 0, 0])?;
        let vector_code = match &self.vector {
            RptVector::Request(_) => VECTOR_RPT_REQUEST,
            RptVector::Notification(_) => VECTOR_RPT_NOTIFICATION,
            RptVector::Status { .. } => VECTOR_RPT_STATUS,
        };
        cur.write_u32(vector_code)?;

        let flags = match &self.header {
            Some(h) => {
                h.pack(cur)?;
                0
            }
            None => FLAG_HEADER_INHERIT,
        };

        match &self.vector {
            RptVector::Request(cmd) => cmd.pack(cur)?,
            RptVector::Notification(cmds) => {
                for cmd in cmds {
                    cmd.pack(cur)?;
                }
            }
            RptVector::Status { code, message } => {
                cur.write_u16(code.to_wire())?;
                let bytes = message.as_bytes();
                cur.write_u16(bytes.len() as u16)?;
                cur.write_bytes(bytes)?;
            }
        }

        let len = (cur.offset() - header_offset) as u32;
        cur.patch_flags_and_length(header_offset, flags, len);
        Ok(())
    }

    pub fn unpack(cur: &mut Cursor<'_>, inherited_header: Option<RptHeader>) -> Result<Self> {
        let (flags, length) = cur.read_flags_and_length()?;
        let vector_code = cur.read_u32()?;
        let pdu_end = cur.offset() + (length as usize) - (3 + 4);

        let header = if flags & FLAG_HEADER_INHERIT != 0 {
            inherited_header
        } else {
            Some(RptHeader::unpack(cur)?)
        };

        let vector = match vector_code {
            VECTOR_RPT_REQUEST => RptVector::Request(RdmCommandBuffer::unpack(cur)?),
            VECTOR_RPT_NOTIFICATION => {
                let mut cmds = Vec::new();
                while cur.offset() < pdu_end {
                    cmds.push(RdmCommandBuffer::unpack(cur)?);
                }
                RptVector::Notification(cmds)
            }
            VECTOR_RPT_STATUS => {
                let code = RptStatusCode::from_wire(cur.read_u16()?)?;
                let msg_len = cur.read_u16()? as usize;
                let bytes = cur.read_bytes(msg_len)?;
                let message = String::from_utf8_lossy(bytes).into_owned();
                RptVector::Status { code, message }
            }
            other => return Err(Error::UnknownVector(other)),
        };

        Ok(Self { header, vector })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> RptHeader {
        RptHeader {
            source_uid: Uid::new(0x6574, 1),
            source_endpoint: 0,
            dest_uid: Uid::new(0x6574, 2),
            dest_endpoint: 0,
            seqnum: 42,
        }
    }

    #[test]
    fn request_round_trips() {
        let pdu = RptPdu {
            header: Some(sample_header()),
            vector: RptVector::Request(RdmCommandBuffer::new(vec![0xAA; 26]).unwrap()),
        };
        let mut buf = vec![0u8; RPT_HEADER_SIZE + 7 + 1 + 26 + 8];
        let written = {
            let mut w = CursorMut::new(&mut buf);
            pdu.pack(&mut w).unwrap();
            w.offset()
        };
        let decoded = RptPdu::unpack(&mut Cursor::new(&buf[..written]), None).unwrap();
        assert_eq!(decoded, pdu);
    }

    #[test]
    fn inherited_header_is_substituted() {
        let pdu = RptPdu {
            header: None,
            vector: RptVector::Status {
                code: RptStatusCode::BroadcastComplete,
                message: "done".into(),
            },
        };
        let mut buf = vec![0u8; 64];
        let written = {
            let mut w = CursorMut::new(&mut buf);
            pdu.pack(&mut w).unwrap();
            w.offset()
        };
        let inherited = sample_header();
        let decoded = RptPdu::unpack(&mut Cursor::new(&buf[..written]), Some(inherited)).unwrap();
        assert_eq!(decoded.header, Some(inherited));
    }

    #[test]
    fn notification_with_multiple_commands_round_trips() {
        let pdu = RptPdu {
            header: Some(sample_header()),
            vector: RptVector::Notification(vec![
                RdmCommandBuffer::new(vec![0x11; 26]).unwrap(),
                RdmCommandBuffer::new(vec![0x22; 30]).unwrap(),
            ]),
        };
        let mut buf = vec![0u8; 128];
        let written = {
            let mut w = CursorMut::new(&mut buf);
            pdu.pack(&mut w).unwrap();
            w.offset()
        };
        let decoded = RptPdu::unpack(&mut Cursor::new(&buf[..written]), None).unwrap();
        assert_eq!(decoded, pdu);
    }
}
