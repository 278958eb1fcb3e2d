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

//! HDLC data link layer (IEC 62056-46)

pub mod address;
pub mod crc;
pub mod frame;
pub mod parameters;
pub mod transport;

pub use address::{AddressKind, HdlcAddress};
pub use frame::{Control, HdlcFrame};
pub use parameters::HdlcParameters;
pub use transport::HdlcTransport;
