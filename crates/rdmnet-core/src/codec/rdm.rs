// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The opaque RDM command buffer carried inside RPT PDUs.
//!
//! RDM (ANSI E1.20) parameter semantics are out of scope (`spec.md` §1);
//! the broker and connection layers treat this as an opaque byte range with
//! one length-prefix convention for embedding.

use crate::codec::cursor::{Cursor, CursorMut};
use crate::error::{Error, Result};

/// Minimum and maximum sizes of a raw RDM command buffer, per `spec.md`
/// §4.1.
pub const RDM_CMD_MIN_SIZE: usize = 26;
pub const RDM_CMD_MAX_SIZE: usize = 257;
pub const RDM_CMD_MAX_PARAM_DATA_LEN: usize = 231;

/// An opaque RDM command, 26-257 bytes, preceded on the wire (when embedded
/// in an RPT PDU) by a 1-byte length.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RdmCommandBuffer(Vec<u8>);

impl RdmCommandBuffer {
    pub fn new(bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() < RDM_CMD_MIN_SIZE || bytes.len() > RDM_CMD_MAX_SIZE {
            return Err(Error::MalformedPdu(format!(
                "RDM command buffer length {} out of range [{RDM_CMD_MIN_SIZE}, {RDM_CMD_MAX_SIZE}]",
                bytes.len()
            )));
        }
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn wire_len(&self) -> usize {
        1 + self.0.len()
    }

    pub fn pack(&self, cur: &mut CursorMut<'_>) -> Result<()> {
        // The length prefix is a single byte, so a 256- or 257-byte command
        // (both within `RDM_CMD_MAX_SIZE`) can't be embedded this way; reject
        // rather than silently truncate or wrap the prefix.
        if self.0.len() > u8::MAX as usize {
            return Err(Error::MalformedPdu(format!(
                "RDM command buffer length {} exceeds the 1-byte wire length prefix (max 255)",
                self.0.len()
            )));
        }
        cur.write_u8(self.0.len() as u8)?;
        cur.write_bytes(&self.0)
    }

    pub fn unpack(cur: &mut Cursor<'_>) -> Result<Self> {
        let len = cur.read_u8()? as usize;
        let bytes = cur.read_bytes(len)?.to_vec();
        Self::new(bytes)
    }
}
