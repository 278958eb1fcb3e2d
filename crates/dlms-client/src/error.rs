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

//! Error types for the DLMS client

use crate::xdlms::DataAccessResult;
use thiserror::Error;

/// HDLC framing errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HdlcError {
    #[error("frame does not start and end with 0x7E")]
    BadFlag,

    #[error("frame format field {0:#04x} is not type 3")]
    BadFormat(u8),

    #[error("frame length field {declared} does not match {actual} received bytes")]
    BadLength { declared: usize, actual: usize },

    #[error("frame truncated")]
    Truncated,

    #[error("invalid HDLC address")]
    BadAddress,

    #[error("header check sequence mismatch")]
    HcsMismatch,

    #[error("frame check sequence mismatch")]
    FcsMismatch,

    #[error("unknown control field {0:#04x}")]
    UnknownControl(u8),

    #[error("unexpected frame: expected {expected}, got {actual}")]
    UnexpectedFrame {
        expected: &'static str,
        actual: String,
    },

    #[error("frame not addressed to this client")]
    WrongAddress,

    #[error("information field without LLC header")]
    MissingLlc,
}

/// A-XDR decoding errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AxdrError {
    #[error("unexpected end of data while decoding {0}")]
    UnexpectedEnd(&'static str),

    #[error("unknown data tag {0}")]
    UnknownTag(u8),

    #[error("invalid length encoding")]
    BadLength,

    #[error("invalid date-time")]
    BadDateTime,
}

#[derive(Debug, Error)]
pub enum DlmsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("HDLC error: {0}")]
    Hdlc(#[from] HdlcError),

    #[error("A-XDR error: {0}")]
    Axdr(#[from] AxdrError),

    #[error("meter refused the HDLC connection")]
    ConnectionRefused,

    #[error("association rejected (result {result}, diagnostic {diagnostic})")]
    AssociationRejected { result: u8, diagnostic: u8 },

    #[error("data access failed: {0}")]
    DataAccess(DataAccessResult),

    #[error("meter returned exception (state error {state_error}, service error {service_error})")]
    Exception { state_error: u8, service_error: u8 },

    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("client is not connected")]
    NotConnected,
}

impl DlmsError {
    /// Transport level failure; the link must be rebuilt before the next request
    pub fn is_communication_error(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Timeout(_) | Self::Hdlc(_) | Self::NotConnected
        )
    }
}

pub type DlmsResult<T> = Result<T, DlmsError>;
