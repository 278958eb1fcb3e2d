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

//! Catalog of published meter objects and value conversion

use chrono::{DateTime, FixedOffset};
use chrono_tz::Tz;
use dlms_types::{CosemAttribute, CosemInterface, DEFAULT_ATTRIBUTE, DlmsValue, Obis};
use serde_json::{Map, Value};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Sensor,
    BinarySensor,
}

impl Platform {
    /// Home Assistant entity domain
    pub fn domain(self) -> &'static str {
        match self {
            Self::Sensor => "sensor",
            Self::BinarySensor => "binary_sensor",
        }
    }
}

/// How a raw attribute value becomes an entity state
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValueTransform {
    /// Integer register divided by a fixed factor
    Scale(f64),
    Identity,
    /// COSEM date-time octet string
    Timestamp,
    /// On when any octet is non-zero
    AnyNonZero,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EntityValue {
    Number(f64),
    Text(String),
    Timestamp(DateTime<FixedOffset>),
    Bool(bool),
}

impl fmt::Display for EntityValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(v) => write!(f, "{v}"),
            Self::Text(s) => f.write_str(s),
            Self::Timestamp(ts) => f.write_str(&ts.to_rfc3339()),
            Self::Bool(true) => f.write_str("on"),
            Self::Bool(false) => f.write_str("off"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CosemEntityDescription {
    pub key: &'static str,
    pub name: &'static str,
    pub platform: Platform,
    pub interface: CosemInterface,
    pub obis: Obis,
    pub attribute: i8,
    pub device_class: Option<&'static str>,
    pub unit: Option<&'static str>,
    pub state_class: Option<&'static str>,
    pub precision: Option<u8>,
    pub entity_category: Option<&'static str>,
    pub enabled_by_default: bool,
    pub icon: Option<&'static str>,
    pub transform: ValueTransform,
}

impl CosemEntityDescription {
    const fn sensor(key: &'static str, name: &'static str, obis: Obis) -> Self {
        Self {
            key,
            name,
            platform: Platform::Sensor,
            interface: CosemInterface::Register,
            obis,
            attribute: DEFAULT_ATTRIBUTE,
            device_class: None,
            unit: None,
            state_class: None,
            precision: None,
            entity_category: None,
            enabled_by_default: true,
            icon: None,
            transform: ValueTransform::Identity,
        }
    }

    const fn binary_sensor(key: &'static str, name: &'static str, obis: Obis) -> Self {
        let mut description = Self::sensor(key, name, obis);
        description.platform = Platform::BinarySensor;
        description.interface = CosemInterface::Data;
        description
    }

    /// Instantaneous register value with a unit
    const fn measurement(
        mut self,
        device_class: &'static str,
        unit: Option<&'static str>,
        divisor: f64,
        precision: u8,
    ) -> Self {
        self.device_class = Some(device_class);
        self.unit = unit;
        self.state_class = Some("measurement");
        self.transform = ValueTransform::Scale(divisor);
        self.precision = Some(precision);
        self
    }

    const fn energy(mut self) -> Self {
        self.device_class = Some("energy");
        self.unit = Some("kWh");
        self.state_class = Some("total_increasing");
        self.transform = ValueTransform::Scale(1000.0);
        self.precision = Some(2);
        self
    }

    /// Event time stamp kept in a Data object
    const fn timestamp(mut self, icon: Option<&'static str>) -> Self {
        self.interface = CosemInterface::Data;
        self.device_class = Some("timestamp");
        self.transform = ValueTransform::Timestamp;
        self.icon = icon;
        self.diagnostic().disabled()
    }

    const fn interface(mut self, interface: CosemInterface) -> Self {
        self.interface = interface;
        self
    }

    const fn diagnostic(mut self) -> Self {
        self.entity_category = Some("diagnostic");
        self
    }

    const fn disabled(mut self) -> Self {
        self.enabled_by_default = false;
        self
    }

    pub fn cosem_attribute(&self) -> CosemAttribute {
        CosemAttribute::new(self.interface, self.obis, self.attribute)
    }

    /// `sensor.dlms_47001234_voltage_l1`
    pub fn entity_id(&self, prefix: &str, equipment_id: &str) -> String {
        format!(
            "{}.{}_{}_{}",
            self.platform.domain(),
            slugify(prefix),
            slugify(equipment_id),
            self.key
        )
    }

    pub fn unique_id(&self, equipment_id: &str) -> String {
        format!("{}-{}", equipment_id, self.key)
    }

    /// Convert a decoded attribute; `None` when the value does not fit the entity
    pub fn convert(&self, value: &DlmsValue, timezone: Option<Tz>) -> Option<EntityValue> {
        match self.transform {
            ValueTransform::Scale(divisor) => {
                value.as_f64().map(|v| EntityValue::Number(v / divisor))
            }
            ValueTransform::Identity => match value.as_f64() {
                Some(v) => Some(EntityValue::Number(v)),
                None => value.as_text().map(EntityValue::Text),
            },
            ValueTransform::Timestamp => value
                .as_datetime()
                .and_then(|dt| dt.to_datetime(timezone))
                .map(EntityValue::Timestamp),
            ValueTransform::AnyNonZero => match value.as_bytes() {
                Some(bytes) => Some(EntityValue::Bool(bytes.iter().any(|b| *b != 0))),
                None => value.as_f64().map(|v| EntityValue::Bool(v != 0.0)),
            },
        }
    }

    /// Extra state attributes derived from the raw value
    pub fn extra_attributes(&self, value: &DlmsValue) -> Map<String, Value> {
        let mut attributes = Map::new();
        if self.key == SELF_TEST_KEY {
            // Integer registers are numbered from their least significant byte
            let codes = match value.as_bytes() {
                Some(bytes) => extract_error_codes(bytes),
                None => value
                    .integer_le_bytes()
                    .map(|bytes| extract_error_codes(&bytes))
                    .unwrap_or_default(),
            };
            if !codes.is_empty() {
                attributes.insert("error_codes".to_string(), Value::from(codes.join(", ")));
            }
        }
        attributes
    }
}

const SELF_TEST_KEY: &str = "self_test";

/// `E-NN` for every set bit, first octet first, least significant bit first
pub fn extract_error_codes(bytes: &[u8]) -> Vec<String> {
    bytes
        .iter()
        .enumerate()
        .flat_map(|(index, byte)| {
            (0..8)
                .filter(move |bit| byte & (1 << bit) != 0)
                .map(move |bit| format!("E-{:02}", index * 8 + bit + 1))
        })
        .collect()
}

/// Lowercase ascii alphanumerics, everything else collapsed to `_`
fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('_') {
            slug.push('_');
        }
    }
    slug.trim_matches('_').to_string()
}

use CosemEntityDescription as D;

pub static ENTITY_DESCRIPTIONS: &[CosemEntityDescription] = &[
    D::sensor("current_l1", "Current L1", Obis::new(1, 0, 31, 7, 0))
        .measurement("current", Some("A"), 1000.0, 3),
    D::sensor("current_l2", "Current L2", Obis::new(1, 0, 51, 7, 0))
        .measurement("current", Some("A"), 1000.0, 3),
    D::sensor("current_l3", "Current L3", Obis::new(1, 0, 71, 7, 0))
        .measurement("current", Some("A"), 1000.0, 3),
    D::sensor("voltage_l1", "Voltage L1", Obis::new(1, 0, 32, 7, 0))
        .measurement("voltage", Some("V"), 100.0, 1),
    D::sensor("voltage_l2", "Voltage L2", Obis::new(1, 0, 52, 7, 0))
        .measurement("voltage", Some("V"), 100.0, 1),
    D::sensor("voltage_l3", "Voltage L3", Obis::new(1, 0, 72, 7, 0))
        .measurement("voltage", Some("V"), 100.0, 1),
    D::sensor(
        "active_power_total",
        "Active power",
        Obis::new(1, 0, 1, 7, 0),
    )
    .measurement("power", Some("W"), 100.0, 1),
    D::sensor(
        "active_power_l1",
        "Active power L1",
        Obis::new(1, 0, 21, 7, 0),
    )
    .measurement("power", Some("W"), 100.0, 1),
    D::sensor(
        "active_power_l2",
        "Active power L2",
        Obis::new(1, 0, 41, 7, 0),
    )
    .measurement("power", Some("W"), 100.0, 1),
    D::sensor(
        "active_power_l3",
        "Active power L3",
        Obis::new(1, 0, 61, 7, 0),
    )
    .measurement("power", Some("W"), 100.0, 1),
    D::sensor(
        "apparent_power_l1",
        "Apparent power L1",
        Obis::new(1, 0, 29, 7, 0),
    )
    .measurement("apparent_power", Some("VA"), 100.0, 1),
    D::sensor(
        "apparent_power_l2",
        "Apparent power L2",
        Obis::new(1, 0, 49, 7, 0),
    )
    .measurement("apparent_power", Some("VA"), 100.0, 1),
    D::sensor(
        "apparent_power_l3",
        "Apparent power L3",
        Obis::new(1, 0, 69, 7, 0),
    )
    .measurement("apparent_power", Some("VA"), 100.0, 1),
    D::sensor(
        "apparent_power_total",
        "Apparent power",
        Obis::new(1, 0, 9, 7, 0),
    )
    .measurement("apparent_power", Some("VA"), 100.0, 1),
    D::sensor(
        "power_factor_total",
        "Power factor",
        Obis::new(1, 0, 13, 7, 0),
    )
    .measurement("power_factor", None, 1000.0, 3),
    D::sensor(
        "power_factor_l1",
        "Power factor L1",
        Obis::new(1, 0, 33, 7, 0),
    )
    .measurement("power_factor", None, 1000.0, 3),
    D::sensor(
        "power_factor_l2",
        "Power factor L2",
        Obis::new(1, 0, 53, 7, 0),
    )
    .measurement("power_factor", None, 1000.0, 3),
    D::sensor(
        "power_factor_l3",
        "Power factor L3",
        Obis::new(1, 0, 73, 7, 0),
    )
    .measurement("power_factor", None, 1000.0, 3),
    D::sensor(
        "active_energy_total",
        "Active energy",
        Obis::new(1, 0, 1, 8, 0),
    )
    .energy(),
    D::sensor(
        "active_energy_tariff1",
        "Active energy tariff 1",
        Obis::new(1, 0, 1, 8, 1),
    )
    .energy(),
    D::sensor(
        "active_energy_tariff2",
        "Active energy tariff 2",
        Obis::new(1, 0, 1, 8, 2),
    )
    .energy(),
    D::sensor("frequency", "Frequency", Obis::new(1, 0, 14, 7, 0))
        .measurement("frequency", Some("Hz"), 100.0, 2),
    CosemEntityDescription {
        icon: Some("mdi:progress-clock"),
        ..D::sensor("active_tariff", "Active tariff", Obis::new(0, 0, 96, 14, 0))
            .interface(CosemInterface::Data)
    },
    CosemEntityDescription {
        transform: ValueTransform::Identity,
        ..D::sensor(
            "internal_temperature",
            "Internal temperature",
            Obis::new(0, 0, 96, 9, 0),
        )
        .measurement("temperature", Some("°C"), 1.0, 0)
        .diagnostic()
    },
    CosemEntityDescription {
        transform: ValueTransform::Identity,
        ..D::sensor("uptime", "Uptime", Obis::new(0, 0, 96, 8, 0))
            .measurement("duration", Some("s"), 1.0, 0)
            .diagnostic()
            .disabled()
    },
    D::sensor("local_time", "Local time", Obis::new(0, 0, 1, 0, 0))
        .timestamp(None)
        .interface(CosemInterface::Clock),
    D::sensor(
        "clock_synced",
        "Clock synchronized",
        Obis::new(0, 0, 96, 2, 12),
    )
    .timestamp(None),
    D::sensor(
        "front_cover_opened",
        "Front cover opened",
        Obis::new(0, 0, 96, 20, 1),
    )
    .timestamp(Some("mdi:meter-electric-outline")),
    D::sensor(
        "terminals_cover_opened",
        "Terminals cover opened",
        Obis::new(0, 0, 96, 20, 6),
    )
    .timestamp(Some("mdi:screwdriver")),
    D::sensor(
        "magnetic_field_detected",
        "Magnetic field detected",
        Obis::new(0, 0, 96, 20, 16),
    )
    .timestamp(Some("mdi:magnet-on")),
    CosemEntityDescription {
        device_class: Some("problem"),
        transform: ValueTransform::AnyNonZero,
        ..D::binary_sensor(SELF_TEST_KEY, "Self test", Obis::new(0, 0, 97, 97, 0)).diagnostic()
    },
];

/// Entities to publish, honouring the enabled-by-default flags
pub fn enabled_entities(enable_all: bool) -> Vec<&'static CosemEntityDescription> {
    ENTITY_DESCRIPTIONS
        .iter()
        .filter(|d| enable_all || d.enabled_by_default)
        .collect()
}

#[cfg(test)]
pub fn find(key: &str) -> Option<&'static CosemEntityDescription> {
    ENTITY_DESCRIPTIONS.iter().find(|d| d.key == key)
}
