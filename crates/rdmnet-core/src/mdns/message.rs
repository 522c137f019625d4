// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! DNS message header parsing/building (`spec.md` §4.3), grounded in the
//! original lightweight stack's `lwmdns_parse_dns_header`.

use crate::error::{Error, Result};
use crate::mdns::names::encode_domain_name;
use crate::mdns::records::RecordType;

pub const DNS_HEADER_BYTES: usize = 12;
const FLAG_RESPONSE: u16 = 0x8000;
const FLAG_TRUNCATED: u16 = 0x0200;

/// Parsed DNS message header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DnsHeader {
    pub is_response: bool,
    pub truncated: bool,
    pub question_count: u16,
    pub answer_count: u16,
    pub authority_count: u16,
    pub additional_count: u16,
}

impl DnsHeader {
    pub fn parse(buf: &[u8]) -> Result<(Self, usize)> {
        if buf.len() < DNS_HEADER_BYTES {
            return Err(Error::MalformedPdu("DNS message shorter than header".into()));
        }
        let flags = u16::from_be_bytes([buf[2], buf[3]]);
        let header = Self {
            is_response: flags & FLAG_RESPONSE != 0,
            truncated: flags & FLAG_TRUNCATED != 0,
            question_count: u16::from_be_bytes([buf[4], buf[5]]),
            answer_count: u16::from_be_bytes([buf[6], buf[7]]),
            authority_count: u16::from_be_bytes([buf[8], buf[9]]),
            additional_count: u16::from_be_bytes([buf[10], buf[11]]),
        };
        Ok((header, DNS_HEADER_BYTES))
    }
}

/// Build a one-question mDNS query packet: ID 0, standard query, QU bit
/// unset (we ask for multicast replies only, matching `spec.md` §4.3's
/// "lightweight" stance of not supporting unicast-response optimization).
pub fn build_query(qname: &str, qtype: RecordType) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(32 + qname.len());
    buf.extend_from_slice(&0u16.to_be_bytes()); // ID
    buf.extend_from_slice(&0u16.to_be_bytes()); // flags: standard query
    buf.extend_from_slice(&1u16.to_be_bytes()); // QDCOUNT
    buf.extend_from_slice(&0u16.to_be_bytes()); // ANCOUNT
    buf.extend_from_slice(&0u16.to_be_bytes()); // NSCOUNT
    buf.extend_from_slice(&0u16.to_be_bytes()); // ARCOUNT

    encode_domain_name(qname, &mut buf)?;
    buf.extend_from_slice(&(qtype as u16).to_be_bytes());
    buf.extend_from_slice(&0x0001u16.to_be_bytes()); // QCLASS IN

    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_response_flag() {
        let mut buf = vec![0u8; 12];
        buf[2] = 0x84; // response + authoritative, but only response bit matters here
        buf[5] = 2; // question count 2
        let (header, consumed) = DnsHeader::parse(&buf).unwrap();
        assert!(header.is_response);
        assert_eq!(header.question_count, 2);
        assert_eq!(consumed, 12);
    }

    #[test]
    fn build_query_has_one_question_and_no_answers() {
        let packet = build_query("_rdmnet._tcp.local.", RecordType::Ptr).unwrap();
        let (header, _) = DnsHeader::parse(&packet).unwrap();
        assert_eq!(header.question_count, 1);
        assert_eq!(header.answer_count, 0);
        assert!(!header.is_response);
    }
}
