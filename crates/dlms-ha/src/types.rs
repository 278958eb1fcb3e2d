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

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Body of `POST /api/states/<entity_id>`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityStatePayload {
    pub state: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub attributes: Map<String, Value>,
}

impl EntityStatePayload {
    pub fn new(state: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            attributes: Map::new(),
        }
    }

    /// State HA shows for an entity whose source is unreachable
    pub fn unavailable() -> Self {
        Self::new("unavailable")
    }

    #[must_use]
    pub fn with_attribute(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    #[must_use]
    pub fn with_optional_attribute(self, key: &str, value: Option<impl Into<Value>>) -> Self {
        match value {
            Some(value) => self.with_attribute(key, value),
            None => self,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_serialization() {
        let payload = EntityStatePayload::new("230.1")
            .with_attribute("unit_of_measurement", "V")
            .with_attribute("device_class", "voltage")
            .with_optional_attribute("state_class", None::<&str>);

        assert_eq!(
            serde_json::to_value(&payload).unwrap(),
            json!({
                "state": "230.1",
                "attributes": {
                    "unit_of_measurement": "V",
                    "device_class": "voltage"
                }
            })
        );
    }

    #[test]
    fn test_unavailable_has_no_attributes() {
        assert_eq!(
            serde_json::to_string(&EntityStatePayload::unavailable()).unwrap(),
            r#"{"state":"unavailable"}"#
        );
    }
}
