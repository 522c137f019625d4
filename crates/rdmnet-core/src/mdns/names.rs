// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! DNS domain-name parsing, including name-compression pointers.
//!
//! Grounded in the original RDMnet lightweight mDNS stack's
//! `lwmdns_parse_domain_name`: a pointer must target a byte strictly before
//! the label sequence currently being parsed (never forward, never into
//! itself), each label is at most 63 bytes, and the fully expanded name is
//! at most 254 bytes.

use crate::error::{Error, Result};

pub const DNS_LABEL_MAX_LEN: usize = 63;
pub const DNS_NAME_MAX_LEN: usize = 254;
const POINTER_TAG_MASK: u8 = 0xC0;
const POINTER_OFFSET_MASK: u16 = 0x3FFF;

/// Parse a (possibly compressed) domain name starting at `offset` within
/// `buf`. Returns the dot-joined label string and the offset just past the
/// name *as it appeared in the stream* (i.e. past the first pointer, not
/// its target).
pub fn parse_domain_name(buf: &[u8], offset: usize) -> Result<(String, usize)> {
    let mut labels: Vec<String> = Vec::new();
    let mut cur = offset;
    let mut total_len = 0usize;
    let mut hops = 0u32;
    let mut end_of_first_pass: Option<usize> = None;

    loop {
        if cur >= buf.len() {
            return Err(Error::MalformedPdu("domain name runs past end of buffer".into()));
        }
        let tag = buf[cur];
        if tag == 0 {
            if end_of_first_pass.is_none() {
                end_of_first_pass = Some(cur + 1);
            }
            break;
        }
        if tag & POINTER_TAG_MASK == POINTER_TAG_MASK {
            if cur + 1 >= buf.len() {
                return Err(Error::MalformedPdu("truncated name compression pointer".into()));
            }
            let pointer = (((tag as u16) << 8) | buf[cur + 1] as u16) & POINTER_OFFSET_MASK;
            let target = pointer as usize;
            if end_of_first_pass.is_none() {
                end_of_first_pass = Some(cur + 2);
            }
            if target >= cur {
                return Err(Error::MalformedPdu(
                    "domain name compression pointer does not point strictly backward".into(),
                ));
            }
            hops += 1;
            if hops > 64 {
                return Err(Error::MalformedPdu("too many domain name compression hops".into()));
            }
            cur = target;
            continue;
        }
        if tag & POINTER_TAG_MASK != 0 {
            return Err(Error::MalformedPdu("reserved domain name label tag bits set".into()));
        }
        let len = tag as usize;
        if len > DNS_LABEL_MAX_LEN {
            return Err(Error::MalformedPdu(format!("domain name label longer than {DNS_LABEL_MAX_LEN} bytes")));
        }
        let label_start = cur + 1;
        let label_end = label_start + len;
        if label_end > buf.len() {
            return Err(Error::MalformedPdu("domain name label runs past end of buffer".into()));
        }
        let label = String::from_utf8_lossy(&buf[label_start..label_end]).into_owned();
        total_len += label.len() + 1;
        if total_len > DNS_NAME_MAX_LEN {
            return Err(Error::MalformedPdu(format!("domain name longer than {DNS_NAME_MAX_LEN} bytes")));
        }
        labels.push(label);
        cur = label_end;
    }

    let name = labels.join(".");
    Ok((name, end_of_first_pass.unwrap()))
}

/// Encode an uncompressed domain name (used for outgoing queries, which
/// never use compression).
pub fn encode_domain_name(name: &str, out: &mut Vec<u8>) -> Result<()> {
    for label in name.split('.').filter(|l| !l.is_empty()) {
        if label.len() > DNS_LABEL_MAX_LEN {
            return Err(Error::MalformedPdu(format!("label '{label}' longer than {DNS_LABEL_MAX_LEN} bytes")));
        }
        out.push(label.len() as u8);
        out.extend_from_slice(label.as_bytes());
    }
    out.push(0);
    Ok(())
}
