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

//! A-XDR codec for the COSEM `Data` type

use crate::error::AxdrError;
use bytes::BufMut;
use dlms_types::{DlmsDateTime, DlmsValue};

mod tag {
    pub const NULL: u8 = 0;
    pub const ARRAY: u8 = 1;
    pub const STRUCTURE: u8 = 2;
    pub const BOOLEAN: u8 = 3;
    pub const BIT_STRING: u8 = 4;
    pub const DOUBLE_LONG: u8 = 5;
    pub const DOUBLE_LONG_UNSIGNED: u8 = 6;
    pub const OCTET_STRING: u8 = 9;
    pub const VISIBLE_STRING: u8 = 10;
    pub const UTF8_STRING: u8 = 12;
    pub const BCD: u8 = 13;
    pub const INTEGER: u8 = 15;
    pub const LONG: u8 = 16;
    pub const UNSIGNED: u8 = 17;
    pub const LONG_UNSIGNED: u8 = 18;
    pub const LONG64: u8 = 20;
    pub const LONG64_UNSIGNED: u8 = 21;
    pub const ENUM: u8 = 22;
    pub const FLOAT32: u8 = 23;
    pub const FLOAT64: u8 = 24;
    pub const DATE_TIME: u8 = 25;
    pub const DATE: u8 = 26;
    pub const TIME: u8 = 27;
}

/// Decode one value, ignoring anything after it
pub fn decode(data: &[u8]) -> Result<DlmsValue, AxdrError> {
    let mut reader = Reader { data, pos: 0 };
    reader.value()
}

/// Decode one value and return the number of bytes it occupied
pub fn decode_prefix(data: &[u8]) -> Result<(DlmsValue, usize), AxdrError> {
    let mut reader = Reader { data, pos: 0 };
    let value = reader.value()?;
    Ok((value, reader.pos))
}

/// Read a BER-style length (short form or 0x81..0x84 long form)
pub fn decode_length(data: &[u8]) -> Result<(usize, usize), AxdrError> {
    let mut reader = Reader { data, pos: 0 };
    let len = reader.length()?;
    Ok((len, reader.pos))
}

pub fn encode_length(out: &mut Vec<u8>, len: usize) {
    if len < 0x80 {
        out.put_u8(len as u8);
    } else if len <= 0xFF {
        out.put_u8(0x81);
        out.put_u8(len as u8);
    } else if len <= 0xFFFF {
        out.put_u8(0x82);
        out.put_u16(len as u16);
    } else {
        out.put_u8(0x84);
        out.put_u32(len as u32);
    }
}

pub fn encode(value: &DlmsValue) -> Vec<u8> {
    let mut out = Vec::new();
    encode_into(&mut out, value);
    out
}

fn encode_into(out: &mut Vec<u8>, value: &DlmsValue) {
    match value {
        DlmsValue::Null => out.put_u8(tag::NULL),
        DlmsValue::Array(items) | DlmsValue::Structure(items) => {
            let t = if matches!(value, DlmsValue::Array(_)) {
                tag::ARRAY
            } else {
                tag::STRUCTURE
            };
            out.put_u8(t);
            encode_length(out, items.len());
            for item in items {
                encode_into(out, item);
            }
        }
        DlmsValue::Boolean(b) => {
            out.put_u8(tag::BOOLEAN);
            out.put_u8(u8::from(*b));
        }
        DlmsValue::BitString { bits, bytes } => {
            out.put_u8(tag::BIT_STRING);
            encode_length(out, *bits);
            out.put_slice(bytes);
        }
        DlmsValue::DoubleLong(v) => {
            out.put_u8(tag::DOUBLE_LONG);
            out.put_i32(*v);
        }
        DlmsValue::DoubleLongUnsigned(v) => {
            out.put_u8(tag::DOUBLE_LONG_UNSIGNED);
            out.put_u32(*v);
        }
        DlmsValue::OctetString(bytes) => put_string(out, tag::OCTET_STRING, bytes),
        DlmsValue::VisibleString(s) => put_string(out, tag::VISIBLE_STRING, s.as_bytes()),
        DlmsValue::Utf8String(s) => put_string(out, tag::UTF8_STRING, s.as_bytes()),
        DlmsValue::Bcd(v) => {
            out.put_u8(tag::BCD);
            out.put_i8(*v);
        }
        DlmsValue::Integer(v) => {
            out.put_u8(tag::INTEGER);
            out.put_i8(*v);
        }
        DlmsValue::Long(v) => {
            out.put_u8(tag::LONG);
            out.put_i16(*v);
        }
        DlmsValue::Unsigned(v) => {
            out.put_u8(tag::UNSIGNED);
            out.put_u8(*v);
        }
        DlmsValue::LongUnsigned(v) => {
            out.put_u8(tag::LONG_UNSIGNED);
            out.put_u16(*v);
        }
        DlmsValue::Long64(v) => {
            out.put_u8(tag::LONG64);
            out.put_i64(*v);
        }
        DlmsValue::Long64Unsigned(v) => {
            out.put_u8(tag::LONG64_UNSIGNED);
            out.put_u64(*v);
        }
        DlmsValue::Enum(v) => {
            out.put_u8(tag::ENUM);
            out.put_u8(*v);
        }
        DlmsValue::Float32(v) => {
            out.put_u8(tag::FLOAT32);
            out.put_f32(*v);
        }
        DlmsValue::Float64(v) => {
            out.put_u8(tag::FLOAT64);
            out.put_f64(*v);
        }
        DlmsValue::DateTime(dt) => {
            out.put_u8(tag::DATE_TIME);
            out.put_slice(&dt.to_bytes());
        }
        DlmsValue::Date(d) => {
            out.put_u8(tag::DATE);
            out.put_slice(d);
        }
        DlmsValue::Time(t) => {
            out.put_u8(tag::TIME);
            out.put_slice(t);
        }
    }
}

fn put_string(out: &mut Vec<u8>, t: u8, bytes: &[u8]) {
    out.put_u8(t);
    encode_length(out, bytes.len());
    out.put_slice(bytes);
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize, what: &'static str) -> Result<&'a [u8], AxdrError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.data.len())
            .ok_or(AxdrError::UnexpectedEnd(what))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self, what: &'static str) -> Result<[u8; N], AxdrError> {
        let mut out = [0_u8; N];
        out.copy_from_slice(self.take(N, what)?);
        Ok(out)
    }

    fn length(&mut self) -> Result<usize, AxdrError> {
        let first = self.take(1, "length")?[0];
        if first < 0x80 {
            return Ok(usize::from(first));
        }

        let count = usize::from(first & 0x7F);
        if count == 0 || count > 4 {
            return Err(AxdrError::BadLength);
        }
        Ok(self
            .take(count, "length")?
            .iter()
            .fold(0_usize, |acc, b| (acc << 8) | usize::from(*b)))
    }

    fn value(&mut self) -> Result<DlmsValue, AxdrError> {
        let t = self.take(1, "tag")?[0];
        let value = match t {
            tag::NULL => DlmsValue::Null,
            tag::ARRAY | tag::STRUCTURE => {
                let count = self.length()?;
                let mut items = Vec::with_capacity(count.min(64));
                for _ in 0..count {
                    items.push(self.value()?);
                }
                if t == tag::ARRAY {
                    DlmsValue::Array(items)
                } else {
                    DlmsValue::Structure(items)
                }
            }
            tag::BOOLEAN => DlmsValue::Boolean(self.take(1, "boolean")?[0] != 0),
            tag::BIT_STRING => {
                let bits = self.length()?;
                let bytes = self.take(bits.div_ceil(8), "bit-string")?.to_vec();
                DlmsValue::BitString { bits, bytes }
            }
            tag::DOUBLE_LONG => {
                DlmsValue::DoubleLong(i32::from_be_bytes(self.array("double-long")?))
            }
            tag::DOUBLE_LONG_UNSIGNED => {
                let raw = self.array("double-long-unsigned")?;
                DlmsValue::DoubleLongUnsigned(u32::from_be_bytes(raw))
            }
            tag::OCTET_STRING => {
                let len = self.length()?;
                DlmsValue::OctetString(self.take(len, "octet-string")?.to_vec())
            }
            tag::VISIBLE_STRING => {
                let len = self.length()?;
                let bytes = self.take(len, "visible-string")?;
                DlmsValue::VisibleString(String::from_utf8_lossy(bytes).into_owned())
            }
            tag::UTF8_STRING => {
                let len = self.length()?;
                let bytes = self.take(len, "utf8-string")?;
                DlmsValue::Utf8String(String::from_utf8_lossy(bytes).into_owned())
            }
            tag::BCD => DlmsValue::Bcd(i8::from_be_bytes(self.array("bcd")?)),
            tag::INTEGER => DlmsValue::Integer(i8::from_be_bytes(self.array("integer")?)),
            tag::LONG => DlmsValue::Long(i16::from_be_bytes(self.array("long")?)),
            tag::UNSIGNED => DlmsValue::Unsigned(self.take(1, "unsigned")?[0]),
            tag::LONG_UNSIGNED => {
                DlmsValue::LongUnsigned(u16::from_be_bytes(self.array("long-unsigned")?))
            }
            tag::LONG64 => DlmsValue::Long64(i64::from_be_bytes(self.array("long64")?)),
            tag::LONG64_UNSIGNED => {
                DlmsValue::Long64Unsigned(u64::from_be_bytes(self.array("long64-unsigned")?))
            }
            tag::ENUM => DlmsValue::Enum(self.take(1, "enum")?[0]),
            tag::FLOAT32 => DlmsValue::Float32(f32::from_be_bytes(self.array("float32")?)),
            tag::FLOAT64 => DlmsValue::Float64(f64::from_be_bytes(self.array("float64")?)),
            tag::DATE_TIME => {
                let bytes = self.take(DlmsDateTime::LEN, "date-time")?;
                DlmsValue::DateTime(
                    DlmsDateTime::from_bytes(bytes).map_err(|_| AxdrError::BadDateTime)?,
                )
            }
            tag::DATE => DlmsValue::Date(self.array("date")?),
            tag::TIME => DlmsValue::Time(self.array("time")?),
            other => return Err(AxdrError::UnknownTag(other)),
        };
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_register_value() {
        // double-long-unsigned 23015 (230.15 V with scaler -2)
        let value = decode(&[0x06, 0x00, 0x00, 0x59, 0xE7]).unwrap();
        assert_eq!(value, DlmsValue::DoubleLongUnsigned(23015));
    }

    #[test]
    fn test_decode_logical_device_name() {
        let mut data = vec![0x09, 0x10];
        data.extend_from_slice(b"INC234ART2123456");
        let value = decode(&data).unwrap();
        assert_eq!(value.as_text().as_deref(), Some("INC234ART2123456"));
    }

    #[test]
    fn test_decode_nested_structure() {
        // Register scaler_unit: structure { integer -2, enum 35 (V) }
        let data = [0x02, 0x02, 0x0F, 0xFE, 0x16, 0x23];
        let (value, used) = decode_prefix(&data).unwrap();
        assert_eq!(used, data.len());
        assert_eq!(
            value,
            DlmsValue::Structure(vec![DlmsValue::Integer(-2), DlmsValue::Enum(35)])
        );
    }

    #[test]
    fn test_decode_bit_string() {
        let value = decode(&[0x04, 0x0C, 0b1000_0000, 0b0001_0000]).unwrap();
        assert_eq!(
            value,
            DlmsValue::BitString {
                bits: 12,
                bytes: vec![0x80, 0x10]
            }
        );
    }

    #[test]
    fn test_long_form_length() {
        let payload = vec![0xAB; 300];
        let encoded = encode(&DlmsValue::OctetString(payload.clone()));
        assert_eq!(&encoded[..4], &[0x09, 0x82, 0x01, 0x2C]);
        assert_eq!(decode(&encoded).unwrap(), DlmsValue::OctetString(payload));
    }

    #[test]
    fn test_errors() {
        let truncated = AxdrError::UnexpectedEnd("double-long-unsigned");
        assert_eq!(decode(&[0x06, 0x00]), Err(truncated));
        assert_eq!(decode(&[0x63]), Err(AxdrError::UnknownTag(0x63)));
        let oversized = [0x09, 0x85, 0, 0, 0, 0, 0];
        assert_eq!(decode(&oversized), Err(AxdrError::BadLength));
        assert_eq!(decode(&[]), Err(AxdrError::UnexpectedEnd("tag")));
    }

    #[test]
    fn test_encode_matches_decode_for_signed_values() {
        let value = DlmsValue::Structure(vec![
            DlmsValue::Long(-1234),
            DlmsValue::DoubleLong(-5),
            DlmsValue::Boolean(true),
            DlmsValue::Null,
        ]);
        assert_eq!(decode(&encode(&value)).unwrap(), value);
    }
}
