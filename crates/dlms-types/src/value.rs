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

//! A-XDR encoded COSEM data values

use crate::datetime::DlmsDateTime;
use serde::{Deserialize, Serialize};

/// Decoded `Data` CHOICE (IEC 62056-6-2)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DlmsValue {
    Null,
    Array(Vec<DlmsValue>),
    Structure(Vec<DlmsValue>),
    Boolean(bool),
    BitString { bits: usize, bytes: Vec<u8> },
    DoubleLong(i32),
    DoubleLongUnsigned(u32),
    OctetString(Vec<u8>),
    VisibleString(String),
    Utf8String(String),
    Bcd(i8),
    Integer(i8),
    Long(i16),
    Unsigned(u8),
    LongUnsigned(u16),
    Long64(i64),
    Long64Unsigned(u64),
    Enum(u8),
    Float32(f32),
    Float64(f64),
    DateTime(DlmsDateTime),
    Date([u8; 5]),
    Time([u8; 4]),
}

impl DlmsValue {
    /// Numeric view of integer, enum, boolean and float values
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            Self::DoubleLong(v) => Some(f64::from(*v)),
            Self::DoubleLongUnsigned(v) => Some(f64::from(*v)),
            Self::Bcd(v) | Self::Integer(v) => Some(f64::from(*v)),
            Self::Long(v) => Some(f64::from(*v)),
            Self::Unsigned(v) | Self::Enum(v) => Some(f64::from(*v)),
            Self::LongUnsigned(v) => Some(f64::from(*v)),
            Self::Long64(v) => Some(*v as f64),
            Self::Long64Unsigned(v) => Some(*v as f64),
            Self::Float32(v) => Some(f64::from(*v)),
            Self::Float64(v) => Some(*v),
            Self::Null
            | Self::Array(_)
            | Self::Structure(_)
            | Self::BitString { .. }
            | Self::OctetString(_)
            | Self::VisibleString(_)
            | Self::Utf8String(_)
            | Self::DateTime(_)
            | Self::Date(_)
            | Self::Time(_) => None,
        }
    }

    /// Raw octets of string-like values
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::OctetString(b) | Self::BitString { bytes: b, .. } => Some(b.as_slice()),
            Self::VisibleString(s) | Self::Utf8String(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    /// Little-endian bytes of integer values, as wide as their A-XDR type
    pub fn integer_le_bytes(&self) -> Option<Vec<u8>> {
        match self {
            Self::Boolean(b) => Some(vec![u8::from(*b)]),
            Self::Bcd(v) | Self::Integer(v) => Some(v.to_le_bytes().to_vec()),
            Self::Unsigned(v) | Self::Enum(v) => Some(vec![*v]),
            Self::Long(v) => Some(v.to_le_bytes().to_vec()),
            Self::LongUnsigned(v) => Some(v.to_le_bytes().to_vec()),
            Self::DoubleLong(v) => Some(v.to_le_bytes().to_vec()),
            Self::DoubleLongUnsigned(v) => Some(v.to_le_bytes().to_vec()),
            Self::Long64(v) => Some(v.to_le_bytes().to_vec()),
            Self::Long64Unsigned(v) => Some(v.to_le_bytes().to_vec()),
            _ => None,
        }
    }

    /// Text view, octet strings must be valid UTF-8
    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::VisibleString(s) | Self::Utf8String(s) => Some(s.clone()),
            Self::OctetString(b) => String::from_utf8(b.clone()).ok(),
            _ => None,
        }
    }

    /// Date-time view; meters commonly send it as a 12-byte octet string
    pub fn as_datetime(&self) -> Option<DlmsDateTime> {
        match self {
            Self::DateTime(dt) => Some(*dt),
            Self::OctetString(b) => DlmsDateTime::from_bytes(b).ok(),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Short type name for logging
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null-data",
            Self::Array(_) => "array",
            Self::Structure(_) => "structure",
            Self::Boolean(_) => "boolean",
            Self::BitString { .. } => "bit-string",
            Self::DoubleLong(_) => "double-long",
            Self::DoubleLongUnsigned(_) => "double-long-unsigned",
            Self::OctetString(_) => "octet-string",
            Self::VisibleString(_) => "visible-string",
            Self::Utf8String(_) => "utf8-string",
            Self::Bcd(_) => "bcd",
            Self::Integer(_) => "integer",
            Self::Long(_) => "long",
            Self::Unsigned(_) => "unsigned",
            Self::LongUnsigned(_) => "long-unsigned",
            Self::Long64(_) => "long64",
            Self::Long64Unsigned(_) => "long64-unsigned",
            Self::Enum(_) => "enum",
            Self::Float32(_) => "float32",
            Self::Float64(_) => "float64",
            Self::DateTime(_) => "date-time",
            Self::Date(_) => "date",
            Self::Time(_) => "time",
        }
    }
}
