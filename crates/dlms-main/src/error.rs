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

use dlms_client::DlmsError;
use dlms_ha::HaError;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("DLMS error: {0}")]
    Dlms(#[from] DlmsError),

    #[error("Home Assistant error: {0}")]
    HomeAssistant(#[from] HaError),

    #[error("meter identification failed: {0}")]
    IdentifyFailed(String),

    #[error("meter identification timed out after {0:?}")]
    IdentifyTimeout(Duration),

    #[error("failed to load flag id database: {0}")]
    FlagIds(String),
}

pub type BridgeResult<T> = Result<T, BridgeError>;
