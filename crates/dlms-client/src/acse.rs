// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of the FluxION DLMS/COSEM bridge.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

//! Association control (AARQ / AARE / RLRQ) for LN referencing

use crate::axdr::{decode_length, encode_length};
use crate::error::{DlmsError, DlmsResult};
use tracing::debug;

const AARQ: u8 = 0x60;
const AARE: u8 = 0x61;
const RLRQ: u8 = 0x62;
const RLRE: u8 = 0x63;

/// Logical name referencing, no ciphering
const APPLICATION_CONTEXT_LN: [u8; 7] = [0x60, 0x85, 0x74, 0x05, 0x08, 0x01, 0x01];
/// Low level security mechanism name
const MECHANISM_LLS: [u8; 7] = [0x60, 0x85, 0x74, 0x05, 0x08, 0x02, 0x01];

const DLMS_VERSION: u8 = 6;
/// get, set, action, selective access, block transfer with get/set, multiple references
pub const PROPOSED_CONFORMANCE: u32 = 0x00_7E_1F;
pub const CLIENT_MAX_RECEIVE_PDU: u16 = 0xFFFF;

pub const RELEASE_REQUEST: [u8; 5] = [RLRQ, 0x03, 0x80, 0x01, 0x00];

/// Negotiated xDLMS context from the AARE
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AssociationInfo {
    pub conformance: Option<u32>,
    pub server_max_receive_pdu: Option<u16>,
}

/// AARQ for a public or LLS association
pub fn build_aarq(password: Option<&[u8]>) -> Vec<u8> {
    let mut content = Vec::with_capacity(64);

    content.extend_from_slice(&[0xA1, 0x09, 0x06, 0x07]);
    content.extend_from_slice(&APPLICATION_CONTEXT_LN);

    if let Some(secret) = password.filter(|p| !p.is_empty()) {
        // sender-acse-requirements: authentication
        content.extend_from_slice(&[0x8A, 0x02, 0x07, 0x80]);
        content.extend_from_slice(&[0x8B, 0x07]);
        content.extend_from_slice(&MECHANISM_LLS);

        let mut value = vec![0x80];
        encode_length(&mut value, secret.len());
        value.extend_from_slice(secret);
        content.push(0xAC);
        encode_length(&mut content, value.len());
        content.extend_from_slice(&value);
    }

    let initiate = initiate_request();
    content.push(0xBE);
    encode_length(&mut content, initiate.len() + 2);
    content.push(0x04);
    encode_length(&mut content, initiate.len());
    content.extend_from_slice(&initiate);

    let mut aarq = vec![AARQ];
    encode_length(&mut aarq, content.len());
    aarq.extend_from_slice(&content);
    aarq
}

fn initiate_request() -> Vec<u8> {
    let conformance = PROPOSED_CONFORMANCE.to_be_bytes();
    let max_pdu = CLIENT_MAX_RECEIVE_PDU.to_be_bytes();
    vec![
        0x01, // InitiateRequest
        0x00, // dedicated-key absent
        0x00, // response-allowed default
        0x00, // proposed-quality-of-service absent
        DLMS_VERSION,
        0x5F,
        0x1F,
        0x04,
        conformance[0],
        conformance[1],
        conformance[2],
        conformance[3],
        max_pdu[0],
        max_pdu[1],
    ]
}

/// Parse an AARE, failing unless the association was accepted
pub fn parse_aare(apdu: &[u8]) -> DlmsResult<AssociationInfo> {
    let content = unwrap_tlv(apdu, AARE)?;

    let mut result = None;
    let mut diagnostic = 0;
    let mut info = AssociationInfo::default();

    for (tag, value) in Tlvs::new(content) {
        match tag {
            0xA2 => result = value.last().copied(),
            0xA3 => diagnostic = value.last().copied().unwrap_or(0),
            0xBE => info = parse_initiate_response(value),
            _ => {}
        }
    }

    match result {
        Some(0) => {
            debug!("Association accepted: {:?}", info);
            Ok(info)
        }
        Some(result) => Err(DlmsError::AssociationRejected { result, diagnostic }),
        None => Err(DlmsError::UnexpectedResponse("AARE without association result".to_string())),
    }
}

pub fn parse_rlre(apdu: &[u8]) -> DlmsResult<()> {
    unwrap_tlv(apdu, RLRE).map(|_| ())
}

fn parse_initiate_response(user_information: &[u8]) -> AssociationInfo {
    let mut info = AssociationInfo::default();

    // octet string wrapper
    let Some((0x04, inner)) = Tlvs::new(user_information).next() else {
        return info;
    };
    let Some((&kind, rest)) = inner.split_first() else {
        return info;
    };
    if kind != 0x08 {
        return info;
    }

    // negotiated-quality-of-service is optional
    let rest = match rest.first() {
        Some(0x00) => &rest[1..],
        Some(_) if rest.len() >= 2 => &rest[2..],
        _ => return info,
    };
    // dlms version, conformance tag 5F 1F, length 04
    if rest.len() < 1 + 3 + 4 + 2 || rest[1..4] != [0x5F, 0x1F, 0x04] {
        return info;
    }
    let conformance = &rest[4..8];
    info.conformance = Some(u32::from_be_bytes([
        conformance[0],
        conformance[1],
        conformance[2],
        conformance[3],
    ]));
    info.server_max_receive_pdu = Some(u16::from_be_bytes([rest[8], rest[9]]));
    info
}

fn unwrap_tlv(apdu: &[u8], expected: u8) -> DlmsResult<&[u8]> {
    match Tlvs::new(apdu).next() {
        Some((tag, value)) if tag == expected => Ok(value),
        Some((tag, _)) => Err(DlmsError::UnexpectedResponse(format!(
            "expected APDU {expected:#04x}, got {tag:#04x}"
        ))),
        None => Err(DlmsError::UnexpectedResponse(format!("truncated APDU {apdu:02X?}"))),
    }
}

/// Iterator over single-byte-tag BER TLVs
struct Tlvs<'a> {
    data: &'a [u8],
}

impl<'a> Tlvs<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data }
    }
}

impl<'a> Iterator for Tlvs<'a> {
    type Item = (u8, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        let (&tag, rest) = self.data.split_first()?;
        let (len, used) = decode_length(rest).ok()?;
        let value = rest.get(used..used + len)?;
        self.data = &rest[used + len..];
        Some((tag, value))
    }
}
