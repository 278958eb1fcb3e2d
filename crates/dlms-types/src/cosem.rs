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

//! COSEM interface classes and attribute descriptors

use crate::error::{TypesError, TypesResult};
use crate::obis::Obis;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Attribute index holding the value of Data, Register and Clock objects
pub const DEFAULT_ATTRIBUTE: i8 = 2;

/// COSEM interface classes read by the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CosemInterface {
    Data,
    Register,
    ExtendedRegister,
    DemandRegister,
    ProfileGeneric,
    Clock,
    AssociationLn,
}

impl CosemInterface {
    pub const fn class_id(self) -> u16 {
        match self {
            Self::Data => 1,
            Self::Register => 3,
            Self::ExtendedRegister => 4,
            Self::DemandRegister => 5,
            Self::ProfileGeneric => 7,
            Self::Clock => 8,
            Self::AssociationLn => 15,
        }
    }

    pub fn from_class_id(class_id: u16) -> TypesResult<Self> {
        match class_id {
            1 => Ok(Self::Data),
            3 => Ok(Self::Register),
            4 => Ok(Self::ExtendedRegister),
            5 => Ok(Self::DemandRegister),
            7 => Ok(Self::ProfileGeneric),
            8 => Ok(Self::Clock),
            15 => Ok(Self::AssociationLn),
            other => Err(TypesError::UnknownInterface(other)),
        }
    }
}

impl fmt::Display for CosemInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Data => "Data",
            Self::Register => "Register",
            Self::ExtendedRegister => "ExtendedRegister",
            Self::DemandRegister => "DemandRegister",
            Self::ProfileGeneric => "ProfileGeneric",
            Self::Clock => "Clock",
            Self::AssociationLn => "AssociationLN",
        };
        write!(f, "{name}({})", self.class_id())
    }
}

/// Reference to a single attribute of a COSEM object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CosemAttribute {
    pub interface: CosemInterface,
    pub instance: Obis,
    pub attribute: i8,
}

impl CosemAttribute {
    pub const fn new(interface: CosemInterface, instance: Obis, attribute: i8) -> Self {
        Self {
            interface,
            instance,
            attribute,
        }
    }

    /// Value attribute of an object
    pub const fn value_of(interface: CosemInterface, instance: Obis) -> Self {
        Self::new(interface, instance, DEFAULT_ATTRIBUTE)
    }
}

impl fmt::Display for CosemAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.interface, self.instance, self.attribute)
    }
}

pub const LOGICAL_DEVICE_NAME: CosemAttribute =
    CosemAttribute::value_of(CosemInterface::Data, Obis::new(0, 0, 42, 0, 0));

pub const SOFTWARE_PACKAGE: CosemAttribute =
    CosemAttribute::value_of(CosemInterface::Data, Obis::new(0, 0, 96, 1, 2));

pub const EQUIPMENT_ID: CosemAttribute =
    CosemAttribute::value_of(CosemInterface::Data, Obis::new(0, 0, 96, 1, 0));

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_ids() {
        assert_eq!(CosemInterface::Data.class_id(), 1);
        assert_eq!(CosemInterface::Register.class_id(), 3);
        assert_eq!(CosemInterface::Clock.class_id(), 8);
        assert_eq!(
            CosemInterface::from_class_id(8).unwrap(),
            CosemInterface::Clock
        );
        assert_eq!(
            CosemInterface::from_class_id(70),
            Err(TypesError::UnknownInterface(70))
        );
    }

    #[test]
    fn test_well_known_attributes() {
        assert_eq!(LOGICAL_DEVICE_NAME.instance, Obis::new(0, 0, 42, 0, 0));
        assert_eq!(LOGICAL_DEVICE_NAME.attribute, 2);
        assert_eq!(EQUIPMENT_ID.interface, CosemInterface::Data);
        assert_eq!(SOFTWARE_PACKAGE.to_string(), "Data(1) 0-0:96.1.2.255/2");
    }
}
