//! Monster income queries.
//!
//! A request is served by one of four static statements, chosen by whether an
//! HP-tier filter is present and whether special-zone monsters are included.
//! The joined rows (one per monster and drop) are grouped per monster, scored
//! and ranked by [`crate::income::rank`].

use crate::database::{Database, row_to_drop, row_to_monster};
use crate::error::{LootError, Result};
use crate::income::{MonsterResult, rank};
use crate::models::{DropEntry, HpMultiplier, Monster, PriceSource};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Filter for an income ranking request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryParams {
    pub min_level: i32,
    pub max_level: i32,
    pub chronicle: String,
    /// Restrict to these HP tiers. `None` or empty means no restriction.
    pub hp_multipliers: Option<Vec<HpMultiplier>>,
    pub include_special_zone: bool,
    pub limit: usize,
    pub price_source: PriceSource,
}

impl QueryParams {
    fn hp_filter(&self) -> Option<&[HpMultiplier]> {
        self.hp_multipliers
            .as_deref()
            .filter(|tiers| !tiers.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Basic,
    HpFiltered,
    ZoneIncluded,
    HpFilteredZoneIncluded,
}

/// Pick the statement for a request. Depends only on the HP filter and the zone flag.
pub fn select_strategy(params: &QueryParams) -> Strategy {
    match (params.hp_filter().is_some(), params.include_special_zone) {
        (false, false) => Strategy::Basic,
        (true, false) => Strategy::HpFiltered,
        (false, true) => Strategy::ZoneIncluded,
        (true, true) => Strategy::HpFilteredZoneIncluded,
    }
}

/// Builds a statement over monsters left-joined with their drops and items.
///
/// Binds: ?1 min level, ?2 max level, ?3 chronicle, ?4 use managed price,
/// ?5 HP tier bitmask (HP-filtered statements only).
macro_rules! income_query {
    ($filter:literal) => {
        concat!(
            "SELECT m.id, m.name, m.level, m.exp, m.chronicle, m.in_special_zone, m.hp_tier,
                    d.item_key, i.name,
                    CASE WHEN ?4 THEN COALESCE(i.managed_price, i.price) ELSE i.price END,
                    d.min_amount, d.max_amount, d.chance, d.category
             FROM monsters m
             LEFT JOIN drops d ON d.monster_id = m.id
             LEFT JOIN items i ON i.key = d.item_key
             WHERE m.level BETWEEN ?1 AND ?2
               AND m.chronicle = ?3 ",
            $filter,
            " ORDER BY m.id, d.id"
        )
    };
}

const BASIC_QUERY: &str = income_query!("AND m.in_special_zone = 0");
const HP_FILTERED_QUERY: &str =
    income_query!("AND m.in_special_zone = 0 AND ((?5 >> m.hp_tier) & 1) = 1");
const ZONE_INCLUDED_QUERY: &str = income_query!("");
const HP_FILTERED_ZONE_INCLUDED_QUERY: &str = income_query!("AND ((?5 >> m.hp_tier) & 1) = 1");

impl Strategy {
    pub fn sql(self) -> &'static str {
        match self {
            Strategy::Basic => BASIC_QUERY,
            Strategy::HpFiltered => HP_FILTERED_QUERY,
            Strategy::ZoneIncluded => ZONE_INCLUDED_QUERY,
            Strategy::HpFilteredZoneIncluded => HP_FILTERED_ZONE_INCLUDED_QUERY,
        }
    }

    pub fn filters_hp(self) -> bool {
        matches!(self, Strategy::HpFiltered | Strategy::HpFilteredZoneIncluded)
    }

    /// Run the statement and return one row per monster and drop.
    fn fetch(
        self,
        conn: &Connection,
        filter: &QueryParams,
    ) -> rusqlite::Result<Vec<(Monster, Option<DropEntry>)>> {
        let mut stmt = conn.prepare_cached(self.sql())?;
        let managed = filter.price_source.is_managed();

        let rows = if self.filters_hp() {
            let tiers = filter.hp_filter().unwrap_or_default();
            assert!(
                !tiers.is_empty(),
                "HP-filtered strategy selected without HP tiers"
            );
            stmt.query_map(
                params![
                    filter.min_level,
                    filter.max_level,
                    filter.chronicle,
                    managed,
                    HpMultiplier::mask(tiers)
                ],
                joined_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?
        } else {
            stmt.query_map(
                params![filter.min_level, filter.max_level, filter.chronicle, managed],
                joined_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?
        };
        Ok(rows)
    }
}

fn joined_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(Monster, Option<DropEntry>)> {
    Ok((row_to_monster(row)?, row_to_drop(row)?))
}

/// Collapse joined rows into one result per monster, in order of first appearance.
pub fn group_rows(rows: Vec<(Monster, Option<DropEntry>)>) -> Vec<MonsterResult> {
    let mut index: HashMap<i64, usize> = HashMap::new();
    let mut results: Vec<MonsterResult> = Vec::new();

    for (monster, drop) in rows {
        let position = *index.entry(monster.id).or_insert_with(|| {
            results.push(MonsterResult::new(monster, Vec::new()));
            results.len() - 1
        });
        if let Some(drop) = drop {
            results[position].drops.push(drop);
        }
    }
    results
}

/// Rank monsters matching `params` by expected income per kill.
pub fn rank_monsters(db: &Database, params: &QueryParams) -> Result<Vec<MonsterResult>> {
    if params.min_level > params.max_level {
        return Err(LootError::Validation(format!(
            "Minimum level {} is above maximum level {}",
            params.min_level, params.max_level
        )));
    }

    let strategy = select_strategy(params);
    let conn = db.connection()?;
    let rows = strategy.fetch(&conn, params)?;
    let row_count = rows.len();

    let grouped = group_rows(rows);
    tracing::debug!(
        "{:?} returned {} rows for {} monsters",
        strategy,
        row_count,
        grouped.len()
    );
    Ok(rank(grouped, params.limit))
}
