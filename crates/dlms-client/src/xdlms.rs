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

//! xDLMS GET service (LN referencing)

use crate::axdr;
use crate::error::{DlmsError, DlmsResult};
use bytes::BufMut;
use dlms_types::{CosemAttribute, CosemInterface, Obis};
use std::fmt;

const GET_REQUEST: u8 = 0xC0;
const GET_RESPONSE: u8 = 0xC4;
const EXCEPTION_RESPONSE: u8 = 0xD8;
const CONFIRMED_SERVICE_ERROR: u8 = 0x0E;

const NORMAL: u8 = 0x01;
const NEXT: u8 = 0x02;
const WITH_DATABLOCK: u8 = 0x02;

/// High priority, confirmed service class
const PRIORITY_CONFIRMED: u8 = 0xC0;

/// Result codes carried in place of data (IEC 62056-5-3)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataAccessResult {
    Success,
    HardwareFault,
    TemporaryFailure,
    ReadWriteDenied,
    ObjectUndefined,
    ObjectClassInconsistent,
    ObjectUnavailable,
    TypeUnmatched,
    ScopeOfAccessViolated,
    DataBlockUnavailable,
    LongGetAborted,
    NoLongGetInProgress,
    DataBlockNumberInvalid,
    OtherReason,
    Unknown(u8),
}

impl DataAccessResult {
    pub fn from_byte(code: u8) -> Self {
        match code {
            0 => Self::Success,
            1 => Self::HardwareFault,
            2 => Self::TemporaryFailure,
            3 => Self::ReadWriteDenied,
            4 => Self::ObjectUndefined,
            9 => Self::ObjectClassInconsistent,
            11 => Self::ObjectUnavailable,
            12 => Self::TypeUnmatched,
            13 => Self::ScopeOfAccessViolated,
            14 => Self::DataBlockUnavailable,
            15 => Self::LongGetAborted,
            16 => Self::NoLongGetInProgress,
            19 => Self::DataBlockNumberInvalid,
            250 => Self::OtherReason,
            other => Self::Unknown(other),
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::HardwareFault => 1,
            Self::TemporaryFailure => 2,
            Self::ReadWriteDenied => 3,
            Self::ObjectUndefined => 4,
            Self::ObjectClassInconsistent => 9,
            Self::ObjectUnavailable => 11,
            Self::TypeUnmatched => 12,
            Self::ScopeOfAccessViolated => 13,
            Self::DataBlockUnavailable => 14,
            Self::LongGetAborted => 15,
            Self::NoLongGetInProgress => 16,
            Self::DataBlockNumberInvalid => 19,
            Self::OtherReason => 250,
            Self::Unknown(code) => code,
        }
    }
}

impl fmt::Display for DataAccessResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Success => "success",
            Self::HardwareFault => "hardware fault",
            Self::TemporaryFailure => "temporary failure",
            Self::ReadWriteDenied => "read-write denied",
            Self::ObjectUndefined => "object undefined",
            Self::ObjectClassInconsistent => "object class inconsistent",
            Self::ObjectUnavailable => "object unavailable",
            Self::TypeUnmatched => "type unmatched",
            Self::ScopeOfAccessViolated => "scope of access violated",
            Self::DataBlockUnavailable => "data block unavailable",
            Self::LongGetAborted => "long get aborted",
            Self::NoLongGetInProgress => "no long get in progress",
            Self::DataBlockNumberInvalid => "data block number invalid",
            Self::OtherReason => "other reason",
            Self::Unknown(code) => return write!(f, "unknown result {code}"),
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GetRequest {
    Normal {
        invoke_id: u8,
        attribute: CosemAttribute,
    },
    Next {
        invoke_id: u8,
        block_number: u32,
    },
}

impl GetRequest {
    pub fn invoke_id(&self) -> u8 {
        match self {
            Self::Normal { invoke_id, .. } | Self::Next { invoke_id, .. } => *invoke_id,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(13);
        out.put_u8(GET_REQUEST);
        match self {
            Self::Normal {
                invoke_id,
                attribute,
            } => {
                out.put_u8(NORMAL);
                out.put_u8(PRIORITY_CONFIRMED | (invoke_id & 0x0F));
                out.put_u16(attribute.interface.class_id());
                out.put_slice(&attribute.instance.to_bytes());
                out.put_i8(attribute.attribute);
                // no selective access
                out.put_u8(0x00);
            }
            Self::Next {
                invoke_id,
                block_number,
            } => {
                out.put_u8(NEXT);
                out.put_u8(PRIORITY_CONFIRMED | (invoke_id & 0x0F));
                out.put_u32(*block_number);
            }
        }
        out
    }

    /// Server side parsing, used by the in-memory meter
    pub fn decode(apdu: &[u8]) -> DlmsResult<Self> {
        let bad = || DlmsError::UnexpectedResponse(format!("malformed GET request {apdu:02X?}"));
        match apdu {
            [GET_REQUEST, NORMAL, invoke, rest @ ..] if rest.len() >= 9 => {
                let class_id = u16::from_be_bytes([rest[0], rest[1]]);
                let interface = CosemInterface::from_class_id(class_id).map_err(|_| bad())?;
                let instance = Obis::from_bytes(&rest[2..8]).map_err(|_| bad())?;
                Ok(Self::Normal {
                    invoke_id: invoke & 0x0F,
                    attribute: CosemAttribute::new(interface, instance, rest[8] as i8),
                })
            }
            [GET_REQUEST, NEXT, invoke, b0, b1, b2, b3] => Ok(Self::Next {
                invoke_id: invoke & 0x0F,
                block_number: u32::from_be_bytes([*b0, *b1, *b2, *b3]),
            }),
            _ => Err(bad()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GetResponse {
    /// Raw A-XDR data or the access result
    Normal {
        invoke_id: u8,
        result: Result<Vec<u8>, DataAccessResult>,
    },
    Block {
        invoke_id: u8,
        last: bool,
        block_number: u32,
        result: Result<Vec<u8>, DataAccessResult>,
    },
}

impl GetResponse {
    pub fn invoke_id(&self) -> u8 {
        match self {
            Self::Normal { invoke_id, .. } | Self::Block { invoke_id, .. } => *invoke_id,
        }
    }

    pub fn decode(apdu: &[u8]) -> DlmsResult<Self> {
        match apdu {
            [EXCEPTION_RESPONSE, state_error, service_error, ..] => Err(DlmsError::Exception {
                state_error: *state_error,
                service_error: *service_error,
            }),
            [CONFIRMED_SERVICE_ERROR, ..] => Err(DlmsError::UnexpectedResponse(format!(
                "confirmed service error {apdu:02X?}"
            ))),
            [GET_RESPONSE, NORMAL, invoke, 0x00, data @ ..] => Ok(Self::Normal {
                invoke_id: invoke & 0x0F,
                result: Ok(data.to_vec()),
            }),
            [GET_RESPONSE, NORMAL, invoke, 0x01, code, ..] => Ok(Self::Normal {
                invoke_id: invoke & 0x0F,
                result: Err(DataAccessResult::from_byte(*code)),
            }),
            [GET_RESPONSE, WITH_DATABLOCK, invoke, last, b0, b1, b2, b3, rest @ ..] => {
                let block_number = u32::from_be_bytes([*b0, *b1, *b2, *b3]);
                let result = match rest {
                    [0x00, raw @ ..] => {
                        let (len, used) = axdr::decode_length(raw)?;
                        let block = raw.get(used..used + len).ok_or_else(|| {
                            DlmsError::UnexpectedResponse(format!(
                                "data block {block_number} shorter than {len} bytes"
                            ))
                        })?;
                        Ok(block.to_vec())
                    }
                    [0x01, code, ..] => Err(DataAccessResult::from_byte(*code)),
                    _ => {
                        return Err(DlmsError::UnexpectedResponse(format!(
                            "malformed data block {apdu:02X?}"
                        )));
                    }
                };
                Ok(Self::Block {
                    invoke_id: invoke & 0x0F,
                    last: *last != 0,
                    block_number,
                    result,
                })
            }
            _ => Err(DlmsError::UnexpectedResponse(format!("not a GET response {apdu:02X?}"))),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![GET_RESPONSE];
        match self {
            Self::Normal { invoke_id, result } => {
                out.put_u8(NORMAL);
                out.put_u8(PRIORITY_CONFIRMED | invoke_id);
                match result {
                    Ok(data) => {
                        out.put_u8(0x00);
                        out.extend_from_slice(data);
                    }
                    Err(code) => {
                        out.put_u8(0x01);
                        out.put_u8(code.to_byte());
                    }
                }
            }
            Self::Block {
                invoke_id,
                last,
                block_number,
                result,
            } => {
                out.put_u8(WITH_DATABLOCK);
                out.put_u8(PRIORITY_CONFIRMED | invoke_id);
                out.put_u8(u8::from(*last));
                out.put_u32(*block_number);
                match result {
                    Ok(raw) => {
                        out.put_u8(0x00);
                        axdr::encode_length(&mut out, raw.len());
                        out.extend_from_slice(raw);
                    }
                    Err(code) => {
                        out.put_u8(0x01);
                        out.put_u8(code.to_byte());
                    }
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dlms_types::EQUIPMENT_ID;

    #[test]
    fn test_encode_get_request_normal() {
        let request = GetRequest::Normal {
            invoke_id: 1,
            attribute: EQUIPMENT_ID,
        };
        assert_eq!(
            request.encode(),
            [
                0xC0, 0x01, 0xC1, 0x00, 0x01, 0x00, 0x00, 0x60, 0x01, 0x00, 0xFF, 0x02, 0x00
            ]
        );
        assert_eq!(GetRequest::decode(&request.encode()).unwrap(), request);
    }

    #[test]
    fn test_encode_get_request_next() {
        let request = GetRequest::Next {
            invoke_id: 3,
            block_number: 2,
        };
        let expected: [u8; 7] = [0xC0, 0x02, 0xC3, 0x00, 0x00, 0x00, 0x02];
        assert_eq!(request.encode(), expected);
    }

    #[test]
    fn test_decode_normal_data() {
        let response =
            GetResponse::decode(&[0xC4, 0x01, 0xC1, 0x00, 0x06, 0x00, 0x00, 0x59, 0xE7]).unwrap();
        assert_eq!(
            response,
            GetResponse::Normal {
                invoke_id: 1,
                result: Ok(vec![0x06, 0x00, 0x00, 0x59, 0xE7]),
            }
        );
    }

    #[test]
    fn test_decode_data_access_result() {
        let response = GetResponse::decode(&[0xC4, 0x01, 0xC2, 0x01, 0x04]).unwrap();
        assert_eq!(
            response,
            GetResponse::Normal {
                invoke_id: 2,
                result: Err(DataAccessResult::ObjectUndefined),
            }
        );
    }

    #[test]
    fn test_decode_data_block() {
        let apdu = [
            0xC4, 0x02, 0xC1, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x03, 0x09, 0x04, 0x41,
        ];
        match GetResponse::decode(&apdu).unwrap() {
            GetResponse::Block {
                last,
                block_number,
                result,
                ..
            } => {
                assert!(!last);
                assert_eq!(block_number, 1);
                assert_eq!(result.unwrap(), vec![0x09, 0x04, 0x41]);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_decode_exception() {
        assert!(matches!(
            GetResponse::decode(&[0xD8, 0x01, 0x02]),
            Err(DlmsError::Exception {
                state_error: 1,
                service_error: 2,
            })
        ));
        assert!(matches!(
            GetResponse::decode(&[0xC5, 0x01]),
            Err(DlmsError::UnexpectedResponse(_))
        ));
    }

    #[test]
    fn test_data_access_result_codes() {
        for code in [0_u8, 1, 3, 4, 11, 14, 250, 77] {
            assert_eq!(DataAccessResult::from_byte(code).to_byte(), code);
        }
        assert_eq!(
            DataAccessResult::ReadWriteDenied.to_string(),
            "read-write denied"
        );
    }
}
