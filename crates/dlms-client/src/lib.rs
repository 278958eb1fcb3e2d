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

//! DLMS/COSEM client over HDLC (IEC 62056-46 / 62056-5-3)
//!
//! Supports LN referencing with lowest or low level security and the GET
//! service, including block transfer.

pub mod acse;
pub mod axdr;
pub mod client;
pub mod error;
pub mod hdlc;
pub mod io;
pub mod xdlms;

#[cfg(any(test, feature = "test-util"))]
pub mod fake;

pub use client::{ClientSettings, DlmsClient};
pub use error::{AxdrError, DlmsError, DlmsResult, HdlcError};
pub use xdlms::DataAccessResult;
