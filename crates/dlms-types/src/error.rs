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

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypesError {
    #[error("invalid OBIS code: {0}")]
    InvalidObis(String),

    #[error("invalid COSEM date-time: expected 12 bytes, got {0}")]
    InvalidDateTimeLength(usize),

    #[error("unknown COSEM interface class {0}")]
    UnknownInterface(u16),
}

pub type TypesResult<T> = Result<T, TypesError>;
