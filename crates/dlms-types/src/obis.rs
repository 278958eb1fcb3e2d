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

//! OBIS logical names (IEC 62056-6-1)

use crate::error::{TypesError, TypesResult};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Six-group object identifier `A-B:C.D.E.F`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Obis([u8; 6]);

impl Obis {
    /// Build a logical name with the billing-period group set to 255
    pub const fn new(medium: u8, channel: u8, quantity: u8, processing: u8, tariff: u8) -> Self {
        Self([medium, channel, quantity, processing, tariff, 255])
    }

    /// Replace the billing-period group
    pub const fn with_billing_period(self, period: u8) -> Self {
        let mut groups = self.0;
        groups[5] = period;
        Self(groups)
    }

    pub const fn to_bytes(self) -> [u8; 6] {
        self.0
    }

    pub fn from_bytes(bytes: &[u8]) -> TypesResult<Self> {
        <[u8; 6]>::try_from(bytes)
            .map(Self)
            .map_err(|_| TypesError::InvalidObis(format!("expected 6 bytes, got {}", bytes.len())))
    }

    /// Dotted form used in entity identifiers, e.g. `1.0.31.7.0.255`
    pub fn dotted(&self) -> String {
        self.0.map(|group| group.to_string()).join(".")
    }
}

impl fmt::Display for Obis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [medium, channel, quantity, processing, tariff, period] = self.0;
        write!(
            f,
            "{medium}-{channel}:{quantity}.{processing}.{tariff}.{period}"
        )
    }
}

impl FromStr for Obis {
    type Err = TypesError;

    /// Accepts `1-0:31.7.0.255`, `1.0.31.7.0.255` and `1.0.31.7.0`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parsed = s
            .trim()
            .split(['-', ':', '.'])
            .map(str::parse::<u8>)
            .collect::<Result<Vec<u8>, _>>()
            .map_err(|_| TypesError::InvalidObis(s.to_string()))?;

        if parsed.len() == 5 {
            parsed.push(255);
        }
        Self::from_bytes(&parsed).map_err(|_| TypesError::InvalidObis(s.to_string()))
    }
}

impl Serialize for Obis {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Obis {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
