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

//! Meter identification from the COSEM name plate objects

use crate::error::{BridgeError, BridgeResult};
use crate::flagids::FlagIdDatabase;
use dlms_client::{DlmsClient, DlmsError};
use dlms_types::{CosemAttribute, DlmsValue, EQUIPMENT_ID, LOGICAL_DEVICE_NAME, SOFTWARE_PACKAGE};
use serde::Serialize;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info};

const UNKNOWN_MANUFACTURER: &str = "unknown";
const GENERIC_MODEL: &str = "Smart meter";
/// Incotex, maker of the Mercury meters
const INCOTEX_FLAG_ID: &str = "INC";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub manufacturer: String,
    pub model: String,
    pub equipment_id: String,
    pub sw_version: Option<String>,
    pub logical_device_name: String,
}

impl DeviceInfo {
    pub fn name(&self) -> String {
        format!("{} {}", self.manufacturer, self.model)
    }

    /// Stable identifier shared by every entity of the meter
    pub fn unique_id(&self) -> &str {
        &self.equipment_id
    }
}

/// Manufacturer and model encoded in a logical device name
///
/// The name starts with the three letter FLAG ID; Mercury meters follow it
/// with the model number.
pub fn decode_logical_device_name(name: &str, db: &FlagIdDatabase) -> (String, String) {
    let flag_id = name.get(0..3).unwrap_or_default();

    let Some(manufacturer) = db.manufacturer(flag_id) else {
        return (UNKNOWN_MANUFACTURER.to_string(), GENERIC_MODEL.to_string());
    };

    let model = match name.get(3..6) {
        Some(number) if flag_id.eq_ignore_ascii_case(INCOTEX_FLAG_ID) => {
            format!("Mercury {number}")
        }
        _ => GENERIC_MODEL.to_string(),
    };
    (manufacturer.to_string(), model)
}

/// Read the name plate objects; bounded by `timeout` as a whole
pub async fn identify<IO>(
    client: &mut DlmsClient<IO>,
    db: &FlagIdDatabase,
    timeout: Duration,
) -> BridgeResult<DeviceInfo>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send,
{
    tokio::time::timeout(timeout, read_identity(client, db))
        .await
        .map_err(|_| BridgeError::IdentifyTimeout(timeout))?
}

async fn read_identity<IO>(
    client: &mut DlmsClient<IO>,
    db: &FlagIdDatabase,
) -> BridgeResult<DeviceInfo>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send,
{
    let logical_device_name = read_text(client, &LOGICAL_DEVICE_NAME).await?;
    let (manufacturer, model) = decode_logical_device_name(&logical_device_name, db);
    debug!(
        "Logical device name {} -> {} {}",
        logical_device_name, manufacturer, model
    );

    let equipment_id = read_text(client, &EQUIPMENT_ID).await?;
    if equipment_id.is_empty() {
        return Err(BridgeError::IdentifyFailed(
            "meter reported an empty equipment identifier".to_string(),
        ));
    }

    let sw_version = match read_text(client, &SOFTWARE_PACKAGE).await {
        Ok(version) => Some(version),
        Err(BridgeError::Dlms(DlmsError::DataAccess(result))) => {
            debug!("Software package not readable: {}", result);
            None
        }
        Err(e) => return Err(e),
    };

    let info = DeviceInfo {
        manufacturer,
        model,
        equipment_id,
        sw_version,
        logical_device_name,
    };
    info!(
        "🔎 Identified {} (equipment id {}, firmware {})",
        info.name(),
        info.equipment_id,
        info.sw_version.as_deref().unwrap_or("n/a")
    );
    Ok(info)
}

async fn read_text<IO>(
    client: &mut DlmsClient<IO>,
    attribute: &CosemAttribute,
) -> BridgeResult<String>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send,
{
    let value = client.get_value(attribute).await?;
    value_to_text(&value).ok_or_else(|| {
        BridgeError::IdentifyFailed(format!(
            "{} returned {} instead of a string",
            attribute,
            value.type_name()
        ))
    })
}

fn value_to_text(value: &DlmsValue) -> Option<String> {
    match value.as_text() {
        Some(text) => Some(text.trim_end_matches('\0').trim().to_string()),
        // Some meters encode the identifiers as numbers
        None => match value {
            DlmsValue::DoubleLongUnsigned(v) => Some(v.to_string()),
            DlmsValue::Long64Unsigned(v) => Some(v.to_string()),
            _ => None,
        },
    }
}
