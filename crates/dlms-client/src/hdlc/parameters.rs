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

//! HDLC parameter negotiation carried in SNRM and UA frames

use crate::error::HdlcError;
use bytes::BufMut;

const FORMAT_ID: u8 = 0x81;
const GROUP_ID: u8 = 0x80;

const MAX_INFO_TX: u8 = 0x05;
const MAX_INFO_RX: u8 = 0x06;
const WINDOW_TX: u8 = 0x07;
const WINDOW_RX: u8 = 0x08;

pub const DEFAULT_MAX_INFO_LENGTH: u16 = 128;
pub const DEFAULT_WINDOW_SIZE: u32 = 1;

/// Link parameters from the point of view of the station that sends them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HdlcParameters {
    pub max_info_tx: u16,
    pub max_info_rx: u16,
    pub window_tx: u32,
    pub window_rx: u32,
}

impl Default for HdlcParameters {
    fn default() -> Self {
        Self {
            max_info_tx: DEFAULT_MAX_INFO_LENGTH,
            max_info_rx: DEFAULT_MAX_INFO_LENGTH,
            window_tx: DEFAULT_WINDOW_SIZE,
            window_rx: DEFAULT_WINDOW_SIZE,
        }
    }
}

impl HdlcParameters {
    pub fn encode(&self) -> Vec<u8> {
        let mut params = Vec::new();
        put_u16_param(&mut params, MAX_INFO_TX, self.max_info_tx);
        put_u16_param(&mut params, MAX_INFO_RX, self.max_info_rx);
        params.put_u8(WINDOW_TX);
        params.put_u8(4);
        params.put_u32(self.window_tx);
        params.put_u8(WINDOW_RX);
        params.put_u8(4);
        params.put_u32(self.window_rx);

        let mut out = Vec::with_capacity(params.len() + 3);
        out.put_u8(FORMAT_ID);
        out.put_u8(GROUP_ID);
        out.put_u8(params.len() as u8);
        out.extend_from_slice(&params);
        out
    }

    /// Parse a parameter field; missing parameters keep their defaults
    pub fn decode(bytes: &[u8]) -> Result<Self, HdlcError> {
        let mut result = Self::default();
        if bytes.is_empty() {
            return Ok(result);
        }
        if bytes.len() < 3 || bytes[0] != FORMAT_ID || bytes[1] != GROUP_ID {
            return Err(HdlcError::UnexpectedFrame {
                expected: "HDLC parameter field",
                actual: format!("{bytes:02X?}"),
            });
        }

        let group_len = usize::from(bytes[2]);
        let group = bytes.get(3..3 + group_len).ok_or(HdlcError::Truncated)?;

        let mut pos = 0;
        while pos + 2 <= group.len() {
            let id = group[pos];
            let len = usize::from(group[pos + 1]);
            let value = group
                .get(pos + 2..pos + 2 + len)
                .ok_or(HdlcError::Truncated)?;
            let number = value.iter().fold(0, |acc, &b| (acc << 8) | u32::from(b));

            match id {
                MAX_INFO_TX => result.max_info_tx = number as u16,
                MAX_INFO_RX => result.max_info_rx = number as u16,
                WINDOW_TX => result.window_tx = number,
                WINDOW_RX => result.window_rx = number,
                _ => {}
            }
            pos += 2 + len;
        }

        Ok(result)
    }

    /// Client-side view of the parameters a server answered with
    pub fn from_peer(peer: &Self) -> Self {
        Self {
            max_info_tx: peer.max_info_rx,
            max_info_rx: peer.max_info_tx,
            window_tx: peer.window_rx,
            window_rx: peer.window_tx,
        }
    }
}

fn put_u16_param(out: &mut Vec<u8>, id: u8, value: u16) {
    out.put_u8(id);
    if let Ok(short) = u8::try_from(value) {
        out.put_u8(1);
        out.put_u8(short);
    } else {
        out.put_u8(2);
        out.put_u16(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_defaults() {
        assert_eq!(
            HdlcParameters::default().encode(),
            vec![
                0x81, 0x80, 0x12, 0x05, 0x01, 0x80, 0x06, 0x01, 0x80, 0x07, 0x04, 0x00, 0x00,
                0x00, 0x01, 0x08, 0x04, 0x00, 0x00, 0x00, 0x01
            ]
        );
    }

    #[test]
    fn test_decode_typical_ua() {
        let ua = [
            0x81, 0x80, 0x14, 0x05, 0x02, 0x00, 0xF8, 0x06, 0x02, 0x00, 0x80, 0x07, 0x04, 0x00,
            0x00, 0x00, 0x01, 0x08, 0x04, 0x00, 0x00, 0x00, 0x01,
        ];
        let peer = HdlcParameters::decode(&ua).unwrap();
        assert_eq!(peer.max_info_tx, 248);
        assert_eq!(peer.max_info_rx, 128);

        let ours = HdlcParameters::from_peer(&peer);
        assert_eq!(ours.max_info_rx, 248);
        assert_eq!(ours.max_info_tx, 128);
    }

    #[test]
    fn test_decode_empty_keeps_defaults() {
        assert_eq!(
            HdlcParameters::decode(&[]).unwrap(),
            HdlcParameters::default()
        );
    }

    #[test]
    fn test_decode_rejects_truncated_group() {
        assert!(HdlcParameters::decode(&[0x81, 0x80, 0x10, 0x05]).is_err());
    }

    #[test]
    fn test_large_info_length_uses_two_bytes() {
        let params = HdlcParameters {
            max_info_tx: 1024,
            ..HdlcParameters::default()
        };
        let encoded = params.encode();
        assert_eq!(&encoded[3..7], &[0x05, 0x02, 0x04, 0x00]);
        assert_eq!(HdlcParameters::decode(&encoded).unwrap(), params);
    }
}
