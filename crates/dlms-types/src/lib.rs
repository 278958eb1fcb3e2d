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

//! Shared COSEM data model for the DLMS bridge
//!
//! Logical names (OBIS), interface classes, attribute descriptors and the
//! A-XDR value tree returned by the meter.

pub mod cosem;
pub mod datetime;
pub mod error;
pub mod obis;
pub mod value;

pub use cosem::{
    CosemAttribute, CosemInterface, DEFAULT_ATTRIBUTE, EQUIPMENT_ID, LOGICAL_DEVICE_NAME,
    SOFTWARE_PACKAGE,
};
pub use datetime::DlmsDateTime;
pub use error::{TypesError, TypesResult};
pub use obis::Obis;
pub use value::DlmsValue;
