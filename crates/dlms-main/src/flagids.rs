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

//! DLMS UA manufacturer FLAG ID registry

use crate::error::{BridgeError, BridgeResult};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// Registry snapshot refreshed by `update-flagids`
const BUNDLED: &str = include_str!("../../../data/dlms_flagids.json");

#[derive(Debug, Clone, Default)]
pub struct FlagIdDatabase {
    manufacturers: HashMap<String, String>,
}

impl FlagIdDatabase {
    pub fn bundled() -> BridgeResult<Self> {
        Self::from_json(BUNDLED)
    }

    /// The file at `path` when given, the bundled registry otherwise
    pub fn load(path: Option<&Path>) -> BridgeResult<Self> {
        let Some(path) = path else {
            return Self::bundled();
        };

        let content = std::fs::read_to_string(path)
            .map_err(|e| BridgeError::FlagIds(format!("{}: {e}", path.display())))?;
        let db = Self::from_json(&content)?;
        info!("Loaded {} FLAG IDs from {}", db.len(), path.display());
        Ok(db)
    }

    pub fn from_json(content: &str) -> BridgeResult<Self> {
        // Registry rows without a manufacturer are exported as null
        let raw: HashMap<String, Option<String>> =
            serde_json::from_str(content).map_err(|e| BridgeError::FlagIds(e.to_string()))?;

        let manufacturers: HashMap<String, String> = raw
            .into_iter()
            .filter_map(|(flag_id, name)| Some((flag_id.to_ascii_uppercase(), name?)))
            .collect();
        let db = Self { manufacturers };
        if db.is_empty() {
            warn!("FLAG ID database is empty, manufacturers will be reported as unknown");
        }
        debug!("FLAG ID database has {} entries", db.len());
        Ok(db)
    }

    /// Manufacturer registered for a three letter FLAG ID
    pub fn manufacturer(&self, flag_id: &str) -> Option<&str> {
        self.manufacturers
            .get(&flag_id.to_ascii_uppercase())
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.manufacturers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.manufacturers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_bundled_database() {
        let db = FlagIdDatabase::bundled().unwrap();
        assert!(!db.is_empty());
        assert_eq!(db.manufacturer("INC"), Some("Incotex"));
        assert_eq!(
            db.manufacturer("KFM"),
            Some("Shenzhen Kaifa Technology Co., Ltd.")
        );
        assert_eq!(db.manufacturer("lgz"), Some("Landis+Gyr"));
        assert_eq!(db.manufacturer("XXX"), None);
    }

    #[test]
    fn test_null_manufacturers_are_skipped() {
        let db = FlagIdDatabase::from_json(r#"{"AAA": "Alpha", "BBB": null}"#).unwrap();
        assert_eq!(db.len(), 1);
        assert_eq!(db.manufacturer("BBB"), None);
    }

    #[test]
    fn test_load_override_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"QQQ": "Custom Meters s.r.o."}}"#).unwrap();

        let db = FlagIdDatabase::load(Some(file.path())).unwrap();
        assert_eq!(db.manufacturer("QQQ"), Some("Custom Meters s.r.o."));
        assert_eq!(db.manufacturer("INC"), None);

        assert!(matches!(
            FlagIdDatabase::load(Some(Path::new("/nonexistent/flagids.json"))),
            Err(BridgeError::FlagIds(_))
        ));
    }
}
