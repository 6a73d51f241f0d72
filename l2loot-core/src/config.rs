//! User settings loaded from a TOML file.
//!
//! ```toml
//! database = "l2loot.sqlite"
//! data_dir = "data"
//!
//! [query]
//! min_level = 20
//! max_level = 40
//! chronicle = "interlude"
//! limit = 50
//! hp_multipliers = [1.0, 2.0]
//! include_special_zone = false
//! price_source = "managed"
//! ```

use crate::error::{LootError, Result};
use crate::models::{HpMultiplier, PriceSource};
use crate::query::QueryParams;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default filter values for income queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryDefaults {
    pub min_level: i32,
    pub max_level: i32,
    pub chronicle: String,
    pub limit: usize,
    pub hp_multipliers: Vec<HpMultiplier>,
    pub include_special_zone: bool,
    pub price_source: PriceSource,
}

impl Default for QueryDefaults {
    fn default() -> Self {
        Self {
            min_level: 1,
            max_level: 85,
            chronicle: "interlude".to_string(),
            limit: 50,
            hp_multipliers: Vec::new(),
            include_special_zone: false,
            price_source: PriceSource::Base,
        }
    }
}

impl QueryDefaults {
    pub fn to_params(&self) -> QueryParams {
        QueryParams {
            min_level: self.min_level,
            max_level: self.max_level,
            chronicle: self.chronicle.clone(),
            hp_multipliers: if self.hp_multipliers.is_empty() {
                None
            } else {
                Some(self.hp_multipliers.clone())
            },
            include_special_zone: self.include_special_zone,
            limit: self.limit,
            price_source: self.price_source,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database: PathBuf,
    pub data_dir: PathBuf,
    pub query: QueryDefaults,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database: PathBuf::from("./l2loot.sqlite"),
            data_dir: PathBuf::from("./data"),
            query: QueryDefaults::default(),
        }
    }
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            LootError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to read settings from {:?}: {}", path, e),
            ))
        })?;

        Self::from_str(&content)
    }

    /// Load settings from `path`, or defaults when the file does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            tracing::debug!("No settings at {:?}, using defaults", path);
            Ok(Self::default())
        }
    }

    /// Parse settings from a TOML string.
    pub fn from_str(content: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(content)
            .map_err(|e| LootError::Config(format!("Failed to parse settings TOML: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| LootError::Config(format!("Failed to serialize settings: {}", e)))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        let query = &self.query;
        if query.min_level > query.max_level {
            return Err(LootError::Config(format!(
                "query.min_level ({}) is above query.max_level ({})",
                query.min_level, query.max_level
            )));
        }
        if query.chronicle.trim().is_empty() {
            return Err(LootError::Config("query.chronicle must not be empty".to_string()));
        }
        Ok(())
    }
}
