// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! TXT record parsing into the structured fields RDMnet brokers advertise
//! (`spec.md` §4.3), grounded in the original stack's
//! `lwmdns_txt_record_to_broker_info`.
//!
//! The `TxtVers` key-value pair must be the first item in the record; this
//! engine rejects a record that opens with anything else rather than trying
//! to guess at a future on-the-wire format revision.

use crate::error::{Error, Result};
use crate::ids::{Cid, Uid};

const TXT_VERS_KEY: &str = "TxtVers";
const E133_DNSSD_TXTVERS: &str = "1";
const SCOPE_KEY: &str = "E133Scope";
const E133VERS_KEY: &str = "E133Vers";
const CID_KEY: &str = "CID";
const UID_KEY: &str = "UID";
const MODEL_KEY: &str = "Model";
const MANUFACTURER_KEY: &str = "Manuf";

fn parse_hex_bytes(s: &str, expected_len: usize) -> Option<Vec<u8>> {
    if s.len() != expected_len * 2 {
        return None;
    }
    let mut bytes = Vec::with_capacity(expected_len);
    for chunk in s.as_bytes().chunks(2) {
        let hi = (chunk[0] as char).to_digit(16)?;
        let lo = (chunk[1] as char).to_digit(16)?;
        bytes.push(((hi << 4) | lo) as u8);
    }
    Some(bytes)
}

fn parse_uid(s: &str) -> Option<Uid> {
    let bytes = parse_hex_bytes(s, 6)?;
    let arr: [u8; 6] = bytes.try_into().ok()?;
    Some(Uid::from_bytes(arr))
}

fn format_uid(uid: Uid) -> String {
    uid.to_bytes().iter().map(|b| format!("{b:02x}")).collect()
}

/// Structured broker fields recovered from a TXT record.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BrokerTxtInfo {
    pub scope: Option<String>,
    pub e133_version: Option<u16>,
    pub cid: Option<Cid>,
    pub uid: Option<Uid>,
    pub model: Option<String>,
    pub manufacturer: Option<String>,
}

fn split_items(data: &[u8]) -> Result<Vec<(&[u8], Option<&[u8]>)>> {
    let mut items = Vec::new();
    let mut cur = 0usize;
    while cur < data.len() {
        let len = data[cur] as usize;
        cur += 1;
        if cur + len > data.len() {
            return Err(Error::MalformedPdu("TXT item runs past end of record".into()));
        }
        let item = &data[cur..cur + len];
        cur += len;
        match item.iter().position(|&b| b == b'=') {
            Some(eq) => items.push((&item[..eq], Some(&item[eq + 1..]))),
            None => items.push((item, None)),
        }
    }
    Ok(items)
}

/// Parse a TXT record's raw bytes into [`BrokerTxtInfo`]. The caller
/// supplies `data` without the enclosing resource-record header (just the
/// sequence of length-prefixed strings).
pub fn parse_txt_record(data: &[u8]) -> Result<BrokerTxtInfo> {
    let items = split_items(data)?;
    let mut iter = items.into_iter();

    match iter.next() {
        Some((key, Some(value))) if key == TXT_VERS_KEY.as_bytes() => {
            if value != E133_DNSSD_TXTVERS.as_bytes() {
                return Err(Error::MalformedPdu(format!(
                    "unsupported TxtVers value {:?}",
                    String::from_utf8_lossy(value)
                )));
            }
        }
        _ => {
            return Err(Error::MalformedPdu("TXT record must open with TxtVers=1".into()));
        }
    }

    let mut info = BrokerTxtInfo::default();
    for (key, value) in iter {
        let Some(value) = value else { continue };
        let value_str = String::from_utf8_lossy(value).into_owned();
        if key == SCOPE_KEY.as_bytes() {
            info.scope = Some(value_str);
        } else if key == E133VERS_KEY.as_bytes() {
            info.e133_version = value_str.parse().ok();
        } else if key == CID_KEY.as_bytes() {
            info.cid = Cid::from_hex(&value_str);
        } else if key == UID_KEY.as_bytes() {
            info.uid = parse_uid(&value_str);
        } else if key == MODEL_KEY.as_bytes() {
            info.model = Some(value_str);
        } else if key == MANUFACTURER_KEY.as_bytes() {
            info.manufacturer = Some(value_str);
        }
        // Unrecognized keys are kept for forward compatibility but not
        // surfaced as a typed field.
    }

    Ok(info)
}

/// Encode [`BrokerTxtInfo`] back into TXT-record wire bytes (used by the
/// broker when advertising itself).
pub fn encode_txt_record(info: &BrokerTxtInfo) -> Vec<u8> {
    let mut out = Vec::new();
    push_item(&mut out, TXT_VERS_KEY, E133_DNSSD_TXTVERS);
    if let Some(scope) = &info.scope {
        push_item(&mut out, SCOPE_KEY, scope);
    }
    if let Some(v) = info.e133_version {
        push_item(&mut out, E133VERS_KEY, &v.to_string());
    }
    if let Some(cid) = &info.cid {
        push_item(&mut out, CID_KEY, &cid.to_hex());
    }
    if let Some(uid) = info.uid {
        push_item(&mut out, UID_KEY, &format_uid(uid));
    }
    if let Some(model) = &info.model {
        push_item(&mut out, MODEL_KEY, model);
    }
    if let Some(m) = &info.manufacturer {
        push_item(&mut out, MANUFACTURER_KEY, m);
    }
    out
}

fn push_item(out: &mut Vec<u8>, key: &str, value: &str) {
    let item = format!("{key}={value}");
    out.push(item.len() as u8);
    out.extend_from_slice(item.as_bytes());
}
