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

//! HDLC address field encoding (IEC 62056-46 §6.4.2.2)

use crate::error::HdlcError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressKind {
    Client,
    Server,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HdlcAddress {
    pub logical: u16,
    pub physical: Option<u16>,
    pub kind: AddressKind,
}

impl HdlcAddress {
    pub const fn client(logical: u16) -> Self {
        Self {
            logical,
            physical: None,
            kind: AddressKind::Client,
        }
    }

    pub const fn server(logical: u16, physical: Option<u16>) -> Self {
        Self {
            logical,
            physical,
            kind: AddressKind::Server,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let byte = |value: u16| ((value & 0x7F) as u8) << 1;

        match (self.kind, self.physical) {
            (AddressKind::Client, _) | (AddressKind::Server, None) => {
                vec![byte(self.logical) | 1]
            }
            (AddressKind::Server, Some(physical)) if self.logical <= 0x7F && physical <= 0x7F => {
                vec![byte(self.logical), byte(physical) | 1]
            }
            (AddressKind::Server, Some(physical)) => vec![
                byte(self.logical >> 7),
                byte(self.logical),
                byte(physical >> 7),
                byte(physical) | 1,
            ],
        }
    }

    /// Parse an address at the start of `bytes`, returning it with the consumed length
    pub fn parse(bytes: &[u8], kind: AddressKind) -> Result<(Self, usize), HdlcError> {
        let end = bytes
            .iter()
            .take(4)
            .position(|b| b & 1 == 1)
            .ok_or(HdlcError::BadAddress)?;

        let groups: Vec<u16> = bytes[..=end].iter().map(|b| u16::from(b >> 1)).collect();
        let (logical, physical) = match groups.as_slice() {
            [logical] => (*logical, None),
            [upper, lower] => (*upper, Some(*lower)),
            [u_hi, u_lo, l_hi, l_lo] => ((u_hi << 7) | u_lo, Some((l_hi << 7) | l_lo)),
            _ => return Err(HdlcError::BadAddress),
        };

        Ok((
            Self {
                logical,
                physical,
                kind,
            },
            end + 1,
        ))
    }
}
