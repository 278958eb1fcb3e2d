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

//! Publishing entity states to Home Assistant

use crate::entities::{CosemEntityDescription, EntityValue};
use crate::error::BridgeResult;
use crate::identity::DeviceInfo;
use async_trait::async_trait;
use dlms_ha::{EntityStatePayload, HomeAssistantClient};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::trace;

/// Latest known state of one entity
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EntityState {
    /// `None` until the first successful read
    pub value: Option<EntityValue>,
    pub available: bool,
    pub attributes: Map<String, Value>,
}

impl EntityState {
    pub fn state_text(&self) -> String {
        match (&self.value, self.available) {
            (_, false) => "unavailable".to_string(),
            (None, true) => "unknown".to_string(),
            (Some(value), true) => value.to_string(),
        }
    }
}

#[async_trait]
pub trait StatePublisher: Send + Sync {
    async fn publish(
        &self,
        entity: &CosemEntityDescription,
        state: &EntityState,
    ) -> BridgeResult<()>;

    /// Publisher name for logging
    fn name(&self) -> &str;
}

/// Writes states through the HA REST API
#[derive(Debug, Clone)]
pub struct HaStatePublisher {
    client: Arc<HomeAssistantClient>,
    device: DeviceInfo,
    prefix: String,
}

impl HaStatePublisher {
    pub fn new(client: Arc<HomeAssistantClient>, device: DeviceInfo, prefix: &str) -> Self {
        Self {
            client,
            device,
            prefix: prefix.to_string(),
        }
    }

    pub fn entity_id(&self, entity: &CosemEntityDescription) -> String {
        entity.entity_id(&self.prefix, self.device.unique_id())
    }

    pub fn payload(
        &self,
        entity: &CosemEntityDescription,
        state: &EntityState,
    ) -> EntityStatePayload {
        let device = &self.device;
        let friendly_name = format!("{} {}", device.name(), entity.name);
        let mut payload = EntityStatePayload::new(state.state_text())
            .with_attribute("friendly_name", friendly_name)
            .with_attribute("unique_id", entity.unique_id(device.unique_id()))
            .with_optional_attribute("unit_of_measurement", entity.unit)
            .with_optional_attribute("device_class", entity.device_class)
            .with_optional_attribute("state_class", entity.state_class)
            .with_optional_attribute("suggested_display_precision", entity.precision)
            .with_optional_attribute("icon", entity.icon)
            .with_optional_attribute("entity_category", entity.entity_category)
            .with_attribute("manufacturer", device.manufacturer.as_str())
            .with_attribute("model", device.model.as_str())
            .with_attribute("serial_number", device.equipment_id.as_str())
            .with_optional_attribute("sw_version", device.sw_version.as_deref());

        if state.available {
            for (key, value) in &state.attributes {
                payload.attributes.insert(key.clone(), value.clone());
            }
        }
        payload
    }
}

#[async_trait]
impl StatePublisher for HaStatePublisher {
    async fn publish(
        &self,
        entity: &CosemEntityDescription,
        state: &EntityState,
    ) -> BridgeResult<()> {
        let entity_id = self.entity_id(entity);
        let payload = self.payload(entity, state);
        trace!("Publishing {} = {}", entity_id, payload.state);
        self.client.set_state(&entity_id, &payload).await?;
        Ok(())
    }

    fn name(&self) -> &str {
        "Home Assistant"
    }
}
