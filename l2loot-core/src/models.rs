//! Data models for L2Loot game data.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Drop chances are stored in millionths: 1_000_000 means a guaranteed drop.
pub const CHANCE_SCALE: f64 = 1_000_000.0;

/// Tolerance used when classifying a stored HP multiplier into a tier.
pub const HP_TIER_TOLERANCE: f64 = 1e-6;

/// Monster hit-point scaling tier used by some server rule-sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub enum HpMultiplier {
    X0_25,
    X0_5,
    X1,
    X2,
    X3,
    X4,
    X5,
    X6,
    X10,
}

impl HpMultiplier {
    pub const ALL: [HpMultiplier; 9] = [
        HpMultiplier::X0_25,
        HpMultiplier::X0_5,
        HpMultiplier::X1,
        HpMultiplier::X2,
        HpMultiplier::X3,
        HpMultiplier::X4,
        HpMultiplier::X5,
        HpMultiplier::X6,
        HpMultiplier::X10,
    ];

    pub fn value(self) -> f64 {
        match self {
            HpMultiplier::X0_25 => 0.25,
            HpMultiplier::X0_5 => 0.5,
            HpMultiplier::X1 => 1.0,
            HpMultiplier::X2 => 2.0,
            HpMultiplier::X3 => 3.0,
            HpMultiplier::X4 => 4.0,
            HpMultiplier::X5 => 5.0,
            HpMultiplier::X6 => 6.0,
            HpMultiplier::X10 => 10.0,
        }
    }

    /// Stable position of the tier, persisted in the `hp_tier` column.
    pub fn ordinal(self) -> u8 {
        match self {
            HpMultiplier::X0_25 => 0,
            HpMultiplier::X0_5 => 1,
            HpMultiplier::X1 => 2,
            HpMultiplier::X2 => 3,
            HpMultiplier::X3 => 4,
            HpMultiplier::X4 => 5,
            HpMultiplier::X5 => 6,
            HpMultiplier::X6 => 7,
            HpMultiplier::X10 => 8,
        }
    }

    pub fn from_ordinal(ordinal: u8) -> Option<Self> {
        Self::ALL.get(ordinal as usize).copied()
    }

    /// Classify a raw multiplier. Returns `None` when no tier is within tolerance.
    pub fn from_value(value: f64) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|tier| (tier.value() - value).abs() <= HP_TIER_TOLERANCE)
    }

    /// Bitmask with one bit per tier ordinal, as bound by the HP-filtered queries.
    pub fn mask(tiers: &[HpMultiplier]) -> i64 {
        tiers.iter().fold(0i64, |acc, tier| acc | (1i64 << tier.ordinal()))
    }
}

impl TryFrom<f64> for HpMultiplier {
    type Error = String;

    fn try_from(value: f64) -> std::result::Result<Self, Self::Error> {
        HpMultiplier::from_value(value)
            .ok_or_else(|| format!("{} is not a known HP multiplier tier", value))
    }
}

impl From<HpMultiplier> for f64 {
    fn from(tier: HpMultiplier) -> f64 {
        tier.value()
    }
}

impl FromStr for HpMultiplier {
    type Err = String;

    /// Accepts `2`, `x2`, `X0.25` and `0.25`.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let trimmed = s.trim();
        let number = trimmed
            .strip_prefix('x')
            .or_else(|| trimmed.strip_prefix('X'))
            .unwrap_or(trimmed);
        let value: f64 = number
            .parse()
            .map_err(|_| format!("Invalid HP multiplier: {:?}", s))?;
        HpMultiplier::try_from(value)
    }
}

impl fmt::Display for HpMultiplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "x{}", self.value())
    }
}

/// Loot category of a drop entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DropCategory {
    Spoil,
    Adena,
    Equipment,
    Material,
}

impl DropCategory {
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_ascii_uppercase().as_str() {
            "SPOIL" => Some(DropCategory::Spoil),
            "ADENA" => Some(DropCategory::Adena),
            "EQUIPMENT" => Some(DropCategory::Equipment),
            "MATERIAL" => Some(DropCategory::Material),
            _ => None,
        }
    }

    pub fn as_code(self) -> &'static str {
        match self {
            DropCategory::Spoil => "SPOIL",
            DropCategory::Adena => "ADENA",
            DropCategory::Equipment => "EQUIPMENT",
            DropCategory::Material => "MATERIAL",
        }
    }
}

impl fmt::Display for DropCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_code())
    }
}

/// Which price column a query reads as the current price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceSource {
    #[default]
    Base,
    Managed,
}

impl PriceSource {
    pub fn from_managed_flag(use_managed: bool) -> Self {
        if use_managed {
            PriceSource::Managed
        } else {
            PriceSource::Base
        }
    }

    pub fn is_managed(self) -> bool {
        self == PriceSource::Managed
    }
}

/// Database model for items table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SellableItem {
    pub key: String,
    pub name: String,
    pub price: i64,
    pub managed_price: Option<i64>,
    pub price_updated_at: Option<String>,
}

impl SellableItem {
    /// Managed price falls back to the base price when none was imported.
    pub fn current_price(&self, source: PriceSource) -> i64 {
        match source {
            PriceSource::Base => self.price,
            PriceSource::Managed => self.managed_price.unwrap_or(self.price),
        }
    }
}

/// Database model for monsters table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Monster {
    pub id: i64,
    pub name: String,
    pub level: i32,
    pub exp: i64,
    pub chronicle: String,
    pub in_special_zone: bool,
    pub hp_multiplier: HpMultiplier,
}

/// A drop of a monster joined with its item and the price chosen for the query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropEntry {
    pub item_key: String,
    pub item_name: String,
    pub price: i64,
    pub min_amount: i64,
    pub max_amount: i64,
    pub chance: i64,
    pub category: DropCategory,
}

impl DropEntry {
    /// Chance as a probability in `0.0..=1.0`.
    pub fn probability(&self) -> f64 {
        self.chance as f64 / CHANCE_SCALE
    }

    pub fn average_amount(&self) -> f64 {
        (self.min_amount + self.max_amount) as f64 / 2.0
    }
}

/// Item entry of the bundled items snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemRecord {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub price: i64,
}

/// Monster entry of the bundled monsters snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonsterRecord {
    pub id: i64,
    pub name: String,
    pub level: i32,
    #[serde(alias = "experience")]
    pub exp: i64,
    pub chronicle: String,
    #[serde(default, alias = "isInSpecialZone")]
    pub in_special_zone: bool,
    pub hp_multiplier: f64,
}

/// Drop entry of the bundled drops snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DropRecord {
    pub monster_id: i64,
    pub item_key: String,
    #[serde(alias = "min")]
    pub min_amount: i64,
    #[serde(alias = "max")]
    pub max_amount: i64,
    pub chance: i64,
    /// Raw category code, validated during seeding.
    pub category: String,
}
