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

//! HDLC frame format type 3

use super::address::{AddressKind, HdlcAddress};
use super::crc::crc16_bytes;
use crate::error::HdlcError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;

pub const FLAG: u8 = 0x7E;

const FORMAT_TYPE_3: u8 = 0xA0;
const SEGMENTATION_BIT: u8 = 0x08;
const POLL_FINAL: u8 = 0x10;
const MAX_FRAME_LENGTH: usize = 0x7FF;

/// Control field, transmitted with the poll/final bit set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Snrm,
    Ua,
    Disc,
    Dm,
    Frmr,
    Ui,
    Rr { recv_seq: u8 },
    Rnr { recv_seq: u8 },
    Information { send_seq: u8, recv_seq: u8 },
}

impl Control {
    pub fn to_byte(self) -> u8 {
        match self {
            Self::Snrm => 0x93,
            Self::Ua => 0x73,
            Self::Disc => 0x53,
            Self::Dm => 0x1F,
            Self::Frmr => 0x97,
            Self::Ui => 0x13,
            Self::Rr { recv_seq } => ((recv_seq & 0x07) << 5) | POLL_FINAL | 0x01,
            Self::Rnr { recv_seq } => ((recv_seq & 0x07) << 5) | POLL_FINAL | 0x05,
            Self::Information { send_seq, recv_seq } => {
                ((recv_seq & 0x07) << 5) | POLL_FINAL | ((send_seq & 0x07) << 1)
            }
        }
    }

    pub fn from_byte(byte: u8) -> Result<Self, HdlcError> {
        if byte & 0x01 == 0 {
            return Ok(Self::Information {
                send_seq: (byte >> 1) & 0x07,
                recv_seq: byte >> 5,
            });
        }

        match byte & !POLL_FINAL {
            0x83 => Ok(Self::Snrm),
            0x63 => Ok(Self::Ua),
            0x43 => Ok(Self::Disc),
            0x0F => Ok(Self::Dm),
            0x87 => Ok(Self::Frmr),
            0x03 => Ok(Self::Ui),
            _ => match byte & 0x0F {
                0x01 => Ok(Self::Rr {
                    recv_seq: byte >> 5,
                }),
                0x05 => Ok(Self::Rnr {
                    recv_seq: byte >> 5,
                }),
                _ => Err(HdlcError::UnknownControl(byte)),
            },
        }
    }
}

impl fmt::Display for Control {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Snrm => write!(f, "SNRM"),
            Self::Ua => write!(f, "UA"),
            Self::Disc => write!(f, "DISC"),
            Self::Dm => write!(f, "DM"),
            Self::Frmr => write!(f, "FRMR"),
            Self::Ui => write!(f, "UI"),
            Self::Rr { recv_seq } => write!(f, "RR(nr={recv_seq})"),
            Self::Rnr { recv_seq } => write!(f, "RNR(nr={recv_seq})"),
            Self::Information { send_seq, recv_seq } => {
                write!(f, "I(ns={send_seq}, nr={recv_seq})")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HdlcFrame {
    pub destination: HdlcAddress,
    pub source: HdlcAddress,
    pub control: Control,
    pub segmented: bool,
    pub information: Vec<u8>,
}

impl HdlcFrame {
    pub fn new(destination: HdlcAddress, source: HdlcAddress, control: Control) -> Self {
        Self {
            destination,
            source,
            control,
            segmented: false,
            information: Vec::new(),
        }
    }

    pub fn with_information(mut self, information: Vec<u8>, segmented: bool) -> Self {
        self.information = information;
        self.segmented = segmented;
        self
    }

    pub fn encode(&self) -> Vec<u8> {
        let destination = self.destination.to_bytes();
        let source = self.source.to_bytes();
        let header_len = 2 + destination.len() + source.len() + 1;
        let info_len = if self.information.is_empty() {
            0
        } else {
            2 + self.information.len()
        };
        let length = header_len + info_len + 2;

        let mut inner = BytesMut::with_capacity(length);
        let segmentation = if self.segmented { SEGMENTATION_BIT } else { 0 };
        inner.put_u8(FORMAT_TYPE_3 | segmentation | ((length >> 8) as u8 & 0x07));
        inner.put_u8((length & 0xFF) as u8);
        inner.put_slice(&destination);
        inner.put_slice(&source);
        inner.put_u8(self.control.to_byte());

        if !self.information.is_empty() {
            let hcs = crc16_bytes(&inner);
            inner.put_slice(&hcs);
            inner.put_slice(&self.information);
        }

        let fcs = crc16_bytes(&inner);
        inner.put_slice(&fcs);

        let mut frame = Vec::with_capacity(length + 2);
        frame.push(FLAG);
        frame.extend_from_slice(&inner);
        frame.push(FLAG);
        frame
    }

    /// Decode a complete frame including both flags
    ///
    /// `destination_kind` is the role of the receiving station.
    pub fn decode(bytes: &[u8], destination_kind: AddressKind) -> Result<Self, HdlcError> {
        if bytes.len() < 2 || bytes[0] != FLAG || bytes[bytes.len() - 1] != FLAG {
            return Err(HdlcError::BadFlag);
        }

        let inner = &bytes[1..bytes.len() - 1];
        if inner.len() < 7 {
            return Err(HdlcError::Truncated);
        }
        if inner[0] & 0xF0 != FORMAT_TYPE_3 {
            return Err(HdlcError::BadFormat(inner[0]));
        }

        let declared = (usize::from(inner[0] & 0x07) << 8) | usize::from(inner[1]);
        if declared != inner.len() {
            return Err(HdlcError::BadLength {
                declared,
                actual: inner.len(),
            });
        }

        let fcs_at = inner.len() - 2;
        if crc16_bytes(&inner[..fcs_at]) != inner[fcs_at..] {
            return Err(HdlcError::FcsMismatch);
        }

        let source_kind = match destination_kind {
            AddressKind::Client => AddressKind::Server,
            AddressKind::Server => AddressKind::Client,
        };

        let mut pos = 2;
        let (destination, used) = HdlcAddress::parse(&inner[pos..fcs_at], destination_kind)?;
        pos += used;
        let (source, used) = HdlcAddress::parse(&inner[pos..fcs_at], source_kind)?;
        pos += used;
        if pos >= fcs_at {
            return Err(HdlcError::Truncated);
        }
        let control = Control::from_byte(inner[pos])?;
        pos += 1;

        let information = if pos == fcs_at {
            Vec::new()
        } else {
            if pos + 2 > fcs_at {
                return Err(HdlcError::Truncated);
            }
            if crc16_bytes(&inner[..pos]) != inner[pos..pos + 2] {
                return Err(HdlcError::HcsMismatch);
            }
            inner[pos + 2..fcs_at].to_vec()
        };

        Ok(Self {
            destination,
            source,
            control,
            segmented: inner[0] & SEGMENTATION_BIT != 0,
            information,
        })
    }
}

/// Split the next complete frame off a receive buffer
///
/// Garbage before the opening flag and repeated inter-frame flags are
/// discarded. Returns `None` until enough bytes are buffered.
pub fn split_frame(buffer: &mut BytesMut) -> Option<Bytes> {
    loop {
        let start = buffer.iter().position(|b| *b == FLAG)?;
        buffer.advance(start);

        while buffer.len() >= 2 && buffer[1] == FLAG {
            buffer.advance(1);
        }
        if buffer.len() < 3 {
            return None;
        }

        if buffer[1] & 0xF0 != FORMAT_TYPE_3 {
            // Not a frame start, resynchronise on the next flag
            buffer.advance(1);
            continue;
        }

        let length = (usize::from(buffer[1] & 0x07) << 8) | usize::from(buffer[2]);
        if length > MAX_FRAME_LENGTH || length < 7 {
            buffer.advance(1);
            continue;
        }

        let total = length + 2;
        if buffer.len() < total {
            return None;
        }
        return Some(buffer.split_to(total).freeze());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> HdlcAddress {
        HdlcAddress::client(16)
    }

    fn server() -> HdlcAddress {
        HdlcAddress::server(1, None)
    }

    #[test]
    fn test_encode_snrm() {
        let frame = HdlcFrame::new(server(), client(), Control::Snrm);
        assert_eq!(
            frame.encode(),
            vec![0x7E, 0xA0, 0x07, 0x03, 0x21, 0x93, 0x0F, 0x01, 0x7E]
        );
    }

    #[test]
    fn test_decode_information_frame() {
        let payload = vec![0xE6, 0xE7, 0x00, 0xC4, 0x01, 0xC1, 0x00, 0x11, 0x05];
        let control = Control::Information {
            send_seq: 2,
            recv_seq: 3,
        };
        let sent =
            HdlcFrame::new(client(), server(), control).with_information(payload.clone(), false);

        let decoded = HdlcFrame::decode(&sent.encode(), AddressKind::Client).unwrap();
        assert_eq!(decoded.control, control);
        assert_eq!(decoded.information, payload);
        assert_eq!(decoded.destination.logical, 16);
        assert!(!decoded.segmented);
    }

    #[test]
    fn test_decode_detects_corruption() {
        let control = Control::Information {
            send_seq: 0,
            recv_seq: 1,
        };
        let frame =
            HdlcFrame::new(client(), server(), control).with_information(vec![1, 2, 3, 4], false);
        let mut bytes = frame.encode();

        bytes[10] ^= 0xFF;
        assert_eq!(
            HdlcFrame::decode(&bytes, AddressKind::Client),
            Err(HdlcError::FcsMismatch)
        );

        let mut bytes = frame.encode();
        bytes[2] = bytes[2].wrapping_add(1);
        assert!(matches!(
            HdlcFrame::decode(&bytes, AddressKind::Client),
            Err(HdlcError::BadLength { .. })
        ));
    }

    #[test]
    fn test_control_round_trip_and_pf_bit() {
        assert_eq!(Control::from_byte(0x73).unwrap(), Control::Ua);
        assert_eq!(Control::from_byte(0x63).unwrap(), Control::Ua);
        assert_eq!(Control::from_byte(0x1F).unwrap(), Control::Dm);
        assert_eq!(Control::Rr { recv_seq: 5 }.to_byte(), 0xB1);
        assert_eq!(
            Control::from_byte(0xB1).unwrap(),
            Control::Rr { recv_seq: 5 }
        );
        assert_eq!(
            Control::Information {
                send_seq: 0,
                recv_seq: 0,
            }
            .to_byte(),
            0x10
        );
    }

    #[test]
    fn test_split_frame_handles_noise_and_partial_data() {
        let frame = HdlcFrame::new(client(), server(), Control::Ua).encode();

        let mut buffer = BytesMut::new();
        buffer.put_slice(&[0x00, 0x13, FLAG, FLAG]);
        buffer.put_slice(&frame[1..5]);
        assert!(split_frame(&mut buffer).is_none());

        buffer.put_slice(&frame[5..]);
        let split = split_frame(&mut buffer).unwrap();
        assert_eq!(&split[..], &frame[..]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_segmented_flag_preserved() {
        let control = Control::Information {
            send_seq: 1,
            recv_seq: 1,
        };
        let frame =
            HdlcFrame::new(client(), server(), control).with_information(vec![0xAA; 10], true);
        let bytes = frame.encode();
        assert_eq!(bytes[1] & 0x08, 0x08);
        let decoded = HdlcFrame::decode(&bytes, AddressKind::Client).unwrap();
        assert!(decoded.segmented);
    }
}
