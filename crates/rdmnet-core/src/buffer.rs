// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Stateful, resumable receive buffer for RDMnet root-layer messages.
//!
//! TCP delivers a byte stream, not message boundaries. [`RecvBuffer`]
//! accumulates bytes across however many `feed()` calls it takes to see a
//! complete root PDU and never exposes a partial one to its caller, mirroring
//! the nested block-parsing state (`block_size`/`size_parsed`/
//! `consuming_bad_block`) the original RDMnet stack keeps per PDU layer.

use crate::codec::root::RootPdu;
use crate::codec::{RdmnetMessage, RootVector, ROOT_HEADER_MIN_SIZE};
use crate::config::ROOT_PREAMBLE_SIZE;
use crate::error::{Error, Result};

/// Outcome of one [`RecvBuffer::try_parse`] call.
#[derive(Debug)]
pub enum ParseOutcome {
    /// A complete message was parsed and removed from the buffer.
    Message(RdmnetMessage),
    /// Not enough bytes buffered yet; call `feed()` again before retrying.
    Incomplete,
    /// A malformed PDU of known length was skipped; the buffer has already
    /// advanced past it and a subsequent `try_parse` may still yield a
    /// message. The caller should log this and keep going rather than tear
    /// the connection down.
    SkippedBadBlock(Error),
}

/// Accumulates bytes fed from a socket and parses complete root-layer PDUs
/// out of them one at a time.
pub struct RecvBuffer {
    capacity: usize,
    data: Vec<u8>,
    /// Sibling PDUs from the most recently parsed root-layer block that
    /// haven't been handed to the caller yet; a single feed can unpack a
    /// block containing several messages (e.g. a batch of RPT requests
    /// sharing one inherited header).
    pending: std::collections::VecDeque<RdmnetMessage>,
}

impl RecvBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            data: Vec::with_capacity(capacity.min(8192)),
            pending: std::collections::VecDeque::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn buffered_len(&self) -> usize {
        self.data.len()
    }

    /// Append freshly-read bytes. Errors with [`Error::BufferOverflow`] if
    /// this would exceed `capacity`; the caller must tear down the
    /// connection in that case, it cannot safely resynchronize a broken
    /// length-prefixed stream.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<()> {
        if self.data.len() + bytes.len() > self.capacity {
            return Err(Error::BufferOverflow);
        }
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    /// Attempt to extract one complete message from the currently buffered
    /// bytes. Call this in a loop after each `feed()` until it returns
    /// [`ParseOutcome::Incomplete`].
    pub fn try_parse(&mut self) -> Result<ParseOutcome> {
        if let Some(message) = self.pending.pop_front() {
            return Ok(ParseOutcome::Message(message));
        }

        if self.data.len() < ROOT_PREAMBLE_SIZE + ROOT_HEADER_MIN_SIZE {
            return Ok(ParseOutcome::Incomplete);
        }

        let header = &self.data[ROOT_PREAMBLE_SIZE..ROOT_PREAMBLE_SIZE + 3];
        let length = (((header[0] & 0x0F) as usize) << 16)
            | ((header[1] as usize) << 8)
            | header[2] as usize;

        let total_len = ROOT_PREAMBLE_SIZE + length;
        if length < 3 + 4 + 16 {
            // Header claims a length that can't even hold its own fields;
            // there's no recoverable framing here.
            self.data.clear();
            return Err(Error::MalformedPdu(format!(
                "root PDU length {length} smaller than header size"
            )));
        }
        if self.data.len() < total_len {
            return Ok(ParseOutcome::Incomplete);
        }

        let frame = &self.data[..total_len];
        let result = RootPdu::unpack(&mut crate::codec::cursor::Cursor::new(frame));

        match result {
            Ok(root) => {
                self.data.drain(..total_len);
                match root.vector {
                    RootVector::Broker(pdus) => {
                        self.pending.extend(pdus.into_iter().map(RdmnetMessage::Broker));
                    }
                    RootVector::Rpt(pdus) => {
                        self.pending.extend(pdus.into_iter().map(RdmnetMessage::Rpt));
                    }
                }
                match self.pending.pop_front() {
                    Some(message) => Ok(ParseOutcome::Message(message)),
                    None => Err(Error::MalformedPdu("empty root-layer block".into())),
                }
            }
            Err(e) => {
                // The length was well-formed even though the contents
                // weren't; skip exactly this block and let the caller keep
                // reading rather than tearing the whole connection down.
                self.data.drain(..total_len);
                Ok(ParseOutcome::SkippedBadBlock(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::client_entry::{ClientEntry, ClientEntryData, ClientType};
    use crate::codec::cursor::CursorMut;
    use crate::codec::root::RootPdu;
    use crate::codec::BrokerPdu;
    use crate::ids::{Cid, Scope, Uid};

    fn sample_connect_message() -> Vec<u8> {
        let root = RootPdu {
            sender_cid: Cid::new([5; 16]),
            vector: RootVector::Broker(vec![BrokerPdu::Connect {
                scope: Scope::default_scope(),
                e133_version: 1,
                client_entry: ClientEntry {
                    cid: Cid::new([6; 16]),
                    data: ClientEntryData::Rpt {
                        uid: Uid::new(0x6574, 1),
                        client_type: ClientType::Controller,
                        binding_cid: Cid::new([0; 16]),
                    },
                },
            }]),
        };
        let mut buf = vec![0u8; 256];
        let written = {
            let mut w = CursorMut::new(&mut buf);
            root.pack(&mut w).unwrap();
            w.offset()
        };
        buf.truncate(written);
        buf
    }

    #[test]
    fn parses_message_fed_in_one_shot() {
        let mut rb = RecvBuffer::new(8192);
        rb.feed(&sample_connect_message()).unwrap();
        match rb.try_parse().unwrap() {
            ParseOutcome::Message(RdmnetMessage::Broker(BrokerPdu::Connect { .. })) => {}
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(rb.buffered_len(), 0);
    }

    #[test]
    fn parses_message_fed_byte_by_byte() {
        let mut rb = RecvBuffer::new(8192);
        let msg = sample_connect_message();
        for byte in &msg[..msg.len() - 1] {
            rb.feed(&[*byte]).unwrap();
            assert!(matches!(rb.try_parse().unwrap(), ParseOutcome::Incomplete));
        }
        rb.feed(&msg[msg.len() - 1..]).unwrap();
        assert!(matches!(
            rb.try_parse().unwrap(),
            ParseOutcome::Message(RdmnetMessage::Broker(BrokerPdu::Connect { .. }))
        ));
    }

    #[test]
    fn parses_two_back_to_back_messages() {
        let mut rb = RecvBuffer::new(8192);
        let msg = sample_connect_message();
        let mut combined = msg.clone();
        combined.extend_from_slice(&msg);
        rb.feed(&combined).unwrap();

        assert!(matches!(
            rb.try_parse().unwrap(),
            ParseOutcome::Message(RdmnetMessage::Broker(BrokerPdu::Connect { .. }))
        ));
        assert!(matches!(
            rb.try_parse().unwrap(),
            ParseOutcome::Message(RdmnetMessage::Broker(BrokerPdu::Connect { .. }))
        ));
        assert!(matches!(rb.try_parse().unwrap(), ParseOutcome::Incomplete));
    }

    #[test]
    fn overflow_beyond_capacity_is_rejected() {
        let mut rb = RecvBuffer::new(4);
        assert!(matches!(
            rb.feed(&[0u8; 8]),
            Err(Error::BufferOverflow)
        ));
    }

    #[test]
    fn bad_block_with_known_length_is_skipped_not_fatal() {
        let mut rb = RecvBuffer::new(8192);
        let mut msg = sample_connect_message();
        // Corrupt the broker vector field (first 4 bytes right after the
        // root header + sender CID) so the inner PDU fails to parse while
        // the outer length stays valid.
        let corrupt_at = ROOT_PREAMBLE_SIZE + 3 + 4 + 16 + 3;
        msg[corrupt_at] = 0xFF;
        msg[corrupt_at + 1] = 0xFF;
        msg[corrupt_at + 2] = 0xFF;
        msg[corrupt_at + 3] = 0xFF;
        rb.feed(&msg).unwrap();
        match rb.try_parse().unwrap() {
            ParseOutcome::SkippedBadBlock(_) => {}
            other => panic!("expected a skipped bad block, got {other:?}"),
        }
        assert_eq!(rb.buffered_len(), 0);
    }
}
