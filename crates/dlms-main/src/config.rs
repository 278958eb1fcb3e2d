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

mod validation;

pub use validation::ValidationResult;

use crate::connection::RECONNECT_DELAY;
use anyhow::{Context, Result};
use dlms_client::ClientSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Options written by the HA Supervisor for the add-on
const ADDON_OPTIONS_PATH: &str = "/data/options.json";

const MAX_PHYSICAL_ADDRESS: u16 = 0x3FFF;
const DEFAULT_PASSWORD: &str = "111111";

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Meter connection
    pub meter: MeterConfig,

    /// Home Assistant connection
    #[serde(default)]
    pub home_assistant: HomeAssistantConfig,

    /// System configuration
    #[serde(default)]
    pub system: SystemConfig,
}

/// DLMS/COSEM meter reachable over TCP (directly or via a serial gateway)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeterConfig {
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// HDLC server physical address, usually derived from the serial number
    #[serde(default)]
    pub physical_address: Option<u16>,

    /// Low level security secret; empty for a public association
    #[serde(default = "default_password")]
    pub password: String,

    #[serde(default = "default_client_address")]
    pub client_address: u16,

    #[serde(default = "default_logical_address")]
    pub logical_address: u16,

    /// Per-frame response timeout (seconds)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HomeAssistantConfig {
    /// Home Assistant base URL (optional, defaults to supervisor)
    #[serde(default)]
    pub base_url: Option<String>,

    /// Home Assistant token (optional, uses SUPERVISOR_TOKEN if not set)
    #[serde(default)]
    pub token: Option<String>,

    /// First part of every published entity id
    #[serde(default = "default_entity_prefix")]
    pub entity_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    /// Polling interval (seconds)
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,

    /// Debug logging, including the protocol layer
    #[serde(default)]
    pub debug_mode: bool,

    /// Pause between reconnect attempts (seconds)
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,

    /// Upper bound for reading the meter identity at startup (seconds)
    #[serde(default = "default_identify_timeout_secs")]
    pub identify_timeout_secs: u64,

    /// Replacement for the built-in FLAG ID table
    #[serde(default)]
    pub flag_ids_path: Option<PathBuf>,

    /// Also publish entities that are disabled by default
    #[serde(default)]
    pub enable_all_entities: bool,
}

fn default_port() -> u16 {
    23
}

fn default_password() -> String {
    DEFAULT_PASSWORD.to_string()
}

fn default_client_address() -> u16 {
    32
}

fn default_logical_address() -> u16 {
    1
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_entity_prefix() -> String {
    "dlms".to_string()
}

fn default_scan_interval_secs() -> u64 {
    30
}

fn default_reconnect_delay_secs() -> u64 {
    RECONNECT_DELAY.as_secs()
}

fn default_identify_timeout_secs() -> u64 {
    10
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_port(),
            physical_address: None,
            password: default_password(),
            client_address: default_client_address(),
            logical_address: default_logical_address(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for HomeAssistantConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            token: None,
            entity_prefix: default_entity_prefix(),
        }
    }
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: default_scan_interval_secs(),
            debug_mode: false,
            reconnect_delay_secs: default_reconnect_delay_secs(),
            identify_timeout_secs: default_identify_timeout_secs(),
            flag_ids_path: None,
            enable_all_entities: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from an explicit file, HA addon options or a config file,
    /// then apply environment variable overrides
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        Self::load_with(explicit, |key| std::env::var(key).ok())
    }

    fn load_with(explicit: Option<&Path>, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => {
                let config = Self::from_file(path)?;
                info!("✅ Loaded configuration from {}", path.display());
                config
            }
            None => Self::discover()?,
        };

        config.apply_env_overrides(lookup);
        config.validate()?;
        Ok(config)
    }

    fn discover() -> Result<Self> {
        for candidate in [ADDON_OPTIONS_PATH, "config.toml", "config.json"] {
            let path = Path::new(candidate);
            if path.exists() {
                let config = Self::from_file(path)?;
                info!("✅ Loaded configuration from {candidate}");
                return Ok(config);
            }
        }

        warn!("No configuration file found, using defaults with environment overrides");
        Ok(Self::default())
    }

    /// Parse a TOML or JSON file, chosen by extension
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;

        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))
        } else {
            toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
        }
    }

    /// Environment variables take precedence over file values (development/testing)
    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(host) = lookup("DLMS_HOST") {
            self.meter.host = host;
        }
        if let Some(port) = lookup("DLMS_PORT")
            && let Ok(port) = port.parse::<u16>()
        {
            self.meter.port = port;
        }
        if let Some(address) = lookup("DLMS_PHYSICAL_ADDRESS")
            && let Ok(address) = address.parse::<u16>()
        {
            self.meter.physical_address = Some(address);
        }
        if let Some(password) = lookup("DLMS_PASSWORD") {
            self.meter.password = password;
        }

        if let Some(debug_mode) = lookup("DEBUG_MODE")
            && let Ok(enabled) = debug_mode.parse::<bool>()
        {
            self.system.debug_mode = enabled;
        }

        if let Some(url) = lookup("HA_BASE_URL") {
            self.home_assistant.base_url = Some(url);
        }
        if let Some(token) = lookup("HA_TOKEN") {
            self.home_assistant.token = Some(token);
        }
    }

    /// Validate configuration with detailed error reporting
    pub fn validate_detailed(&self) -> ValidationResult {
        let mut result = ValidationResult::success();

        if self.meter.host.trim().is_empty() {
            result.add_error("meter.host", "Meter host cannot be empty");
        }
        if self.meter.port == 0 {
            result.add_error("meter.port", "Port must be between 1 and 65535");
        }
        if let Some(address) = self.meter.physical_address
            && address > MAX_PHYSICAL_ADDRESS
        {
            result.add_error(
                "meter.physical_address",
                format!("Physical address {address} exceeds {MAX_PHYSICAL_ADDRESS}"),
            );
        }
        if self.meter.client_address == 0 || self.meter.client_address > 0x7F {
            result.add_error(
                "meter.client_address",
                "Client address must be between 1 and 127",
            );
        }
        if self.meter.logical_address > MAX_PHYSICAL_ADDRESS {
            result.add_error(
                "meter.logical_address",
                format!("Logical address exceeds {MAX_PHYSICAL_ADDRESS}"),
            );
        }
        if self.meter.password.len() > 255 {
            result.add_error("meter.password", "Password is longer than 255 bytes");
        } else if self.meter.password == DEFAULT_PASSWORD {
            result.add_warning(
                "meter.password",
                "Using the factory default password, consider changing it on the meter",
            );
        }
        if self.meter.timeout_secs == 0 {
            result.add_error("meter.timeout_secs", "Timeout must be at least 1 second");
        }

        if self.home_assistant.entity_prefix.is_empty() {
            result.add_error(
                "home_assistant.entity_prefix",
                "Entity prefix cannot be empty",
            );
        }

        if self.system.scan_interval_secs == 0 {
            result.add_error(
                "system.scan_interval_secs",
                "Scan interval must be at least 1 second",
            );
        } else if self.system.scan_interval_secs < 5 {
            result.add_warning(
                "system.scan_interval_secs",
                "Scan intervals below 5 seconds may not finish before the next poll",
            );
        }
        if self.system.identify_timeout_secs == 0 {
            result.add_error(
                "system.identify_timeout_secs",
                "Identify timeout must be at least 1 second",
            );
        }

        result
    }

    /// Validate configuration, logging warnings and failing on errors
    pub fn validate(&self) -> Result<()> {
        let result = self.validate_detailed();
        for issue in &result.warnings {
            warn!("⚠️ Config: {}", issue);
        }
        if result.has_errors() {
            anyhow::bail!("Invalid configuration: {}", result.error_summary());
        }
        Ok(())
    }

    /// DLMS client parameters derived from the meter section
    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            host: self.meter.host.clone(),
            port: self.meter.port,
            client_logical_address: self.meter.client_address,
            server_logical_address: self.meter.logical_address,
            server_physical_address: self.meter.physical_address,
            password: Some(self.meter.password.clone()).filter(|p| !p.is_empty()),
            timeout: Duration::from_secs(self.meter.timeout_secs),
        }
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.system.scan_interval_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.system.reconnect_delay_secs)
    }

    pub fn identify_timeout(&self) -> Duration {
        Duration::from_secs(self.system.identify_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn valid_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.meter.host = "192.168.1.50".to_string();
        config.meter.physical_address = Some(17);
        config
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();

        assert_eq!(config.meter.port, 23);
        assert_eq!(config.meter.password, "111111");
        assert_eq!(config.meter.client_address, 32);
        assert_eq!(config.meter.logical_address, 1);
        assert_eq!(config.home_assistant.entity_prefix, "dlms");
        assert_eq!(config.scan_interval(), Duration::from_secs(30));
        assert_eq!(config.reconnect_delay(), RECONNECT_DELAY);
        assert_eq!(RECONNECT_DELAY, Duration::from_secs(3));
        assert!(!config.system.debug_mode);

        // No host configured
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_valid_config_warns_about_default_password() {
        let result = valid_config().validate_detailed();
        assert!(result.valid);
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.warnings[0].field, "meter.password");
    }

    #[test]
    fn test_validate_errors() {
        let mut config = valid_config();
        config.meter.port = 0;
        config.meter.physical_address = Some(0x4000);
        config.meter.password = "x".repeat(256);
        config.system.scan_interval_secs = 0;

        let result = config.validate_detailed();
        assert!(!result.valid);
        let fields: Vec<&str> = result.errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            [
                "meter.port",
                "meter.physical_address",
                "meter.password",
                "system.scan_interval_secs"
            ]
        );
        assert!(
            config
                .validate()
                .unwrap_err()
                .to_string()
                .contains("meter.port")
        );
    }

    #[test]
    fn test_client_settings() {
        let mut config = valid_config();
        let settings = config.client_settings();
        assert_eq!(settings.host, "192.168.1.50");
        assert_eq!(settings.server_physical_address, Some(17));
        assert_eq!(settings.password.as_deref(), Some("111111"));
        assert_eq!(settings.timeout, Duration::from_secs(10));

        config.meter.password.clear();
        assert_eq!(config.client_settings().password, None);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("DLMS_HOST", "meter.local"),
            ("DLMS_PORT", "4059"),
            ("DLMS_PHYSICAL_ADDRESS", "4321"),
            ("DLMS_PASSWORD", "secret"),
            ("DEBUG_MODE", "true"),
            ("HA_TOKEN", "token"),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config.apply_env_overrides(|key| env.get(key).map(ToString::to_string));
        assert_eq!(config.meter.host, "meter.local");
        assert_eq!(config.meter.port, 4059);
        assert_eq!(config.meter.physical_address, Some(4321));
        assert_eq!(config.meter.password, "secret");
        assert!(config.system.debug_mode);
        assert_eq!(config.home_assistant.token.as_deref(), Some("token"));
        assert_eq!(config.home_assistant.base_url, None);
    }

    #[test]
    fn test_load_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[meter]
host = "10.0.0.7"
physical_address = 123

[system]
scan_interval_secs = 60
"#
        )
        .unwrap();

        let config = AppConfig::load_with(Some(file.path()), |_| None).unwrap();
        assert_eq!(config.meter.host, "10.0.0.7");
        assert_eq!(config.meter.physical_address, Some(123));
        assert_eq!(config.meter.port, 23);
        assert_eq!(config.system.scan_interval_secs, 60);
        assert_eq!(config.home_assistant.entity_prefix, "dlms");
    }

    #[test]
    fn test_env_overrides_file_values() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[meter]
host = "10.0.0.7"
port = 4059
physical_address = 123
password = "222222"
"#
        )
        .unwrap();

        let env: HashMap<&str, &str> = [("DLMS_HOST", "meter.local"), ("HA_TOKEN", "token")]
            .into_iter()
            .collect();
        let lookup = |key: &str| env.get(key).map(ToString::to_string);
        let config = AppConfig::load_with(Some(file.path()), lookup).unwrap();

        assert_eq!(config.meter.host, "meter.local");
        assert_eq!(config.home_assistant.token.as_deref(), Some("token"));
        assert_eq!(config.meter.port, 4059);
        assert_eq!(config.meter.physical_address, Some(123));
        assert_eq!(config.meter.password, "222222");
    }

    /// Shape of /data/options.json written by the Supervisor
    #[test]
    fn test_ha_addon_options_format() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{
                "meter": {{
                    "host": "192.168.1.50",
                    "port": 8000,
                    "physical_address": 17,
                    "password": "222222"
                }},
                "home_assistant": {{ "entity_prefix": "elektromer" }},
                "system": {{ "debug_mode": true, "enable_all_entities": true }}
            }}"#
        )
        .unwrap();

        let config = AppConfig::from_file(file.path()).unwrap();
        assert_eq!(config.meter.port, 8000);
        assert_eq!(config.meter.password, "222222");
        assert_eq!(config.home_assistant.entity_prefix, "elektromer");
        assert!(config.system.debug_mode);
        assert!(config.system.enable_all_entities);
        assert!(config.validate_detailed().warnings.is_empty());
    }

    #[test]
    fn test_load_invalid_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[meter\nhost = ").unwrap();
        assert!(AppConfig::load_with(Some(file.path()), |_| None).is_err());
    }
}
