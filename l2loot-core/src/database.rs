use crate::error::{LootError, Result};
use crate::income::MonsterResult;
use crate::models::{DropCategory, DropEntry, HpMultiplier, Monster, PriceSource, SellableItem};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, params};
use rusqlite_migration::{M, Migrations};
use std::collections::HashMap;
use std::time::Duration;

/// Columns of a monster, in the order expected by [`row_to_monster`].
pub(crate) const MONSTER_COLUMNS: &str =
    "m.id, m.name, m.level, m.exp, m.chronicle, m.in_special_zone, m.hp_tier";

/// Number of columns in [`MONSTER_COLUMNS`]; drop columns start here.
pub(crate) const MONSTER_COLUMN_COUNT: usize = 7;

const SEEDED_AT_KEY: &str = "seeded_at";

fn migrations() -> Migrations<'static> {
    Migrations::new(vec![M::up(
        r#"
        CREATE TABLE items (
            key TEXT PRIMARY KEY NOT NULL,
            name TEXT NOT NULL,
            price INTEGER NOT NULL DEFAULT 0,
            managed_price INTEGER,
            price_updated_at TEXT
        );

        CREATE TABLE monsters (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            level INTEGER NOT NULL,
            exp INTEGER NOT NULL,
            chronicle TEXT NOT NULL,
            in_special_zone INTEGER NOT NULL DEFAULT 0,
            hp_tier INTEGER NOT NULL CHECK(hp_tier BETWEEN 0 AND 8)
        );

        CREATE TABLE drops (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            monster_id INTEGER NOT NULL,
            item_key TEXT NOT NULL,
            min_amount INTEGER NOT NULL DEFAULT 1,
            max_amount INTEGER NOT NULL DEFAULT 1,
            chance INTEGER NOT NULL CHECK(chance BETWEEN 0 AND 1000000),
            category TEXT NOT NULL CHECK(category IN ('SPOIL', 'ADENA', 'EQUIPMENT', 'MATERIAL')),
            UNIQUE(monster_id, item_key, category)
        );

        CREATE TABLE app_meta (
            key TEXT PRIMARY KEY NOT NULL,
            value TEXT NOT NULL
        );

        CREATE INDEX idx_monsters_chronicle_level ON monsters(chronicle, level);
        CREATE INDEX idx_drops_monster_id ON drops(monster_id);
        CREATE INDEX idx_drops_item_key ON drops(item_key);
        "#,
    )])
}

fn conversion_error(column: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, Type::Integer, message.into())
}

/// Read a monster from the first [`MONSTER_COLUMN_COUNT`] columns of a row.
pub(crate) fn row_to_monster(row: &rusqlite::Row<'_>) -> rusqlite::Result<Monster> {
    let tier: u8 = row.get(6)?;
    let hp_multiplier = HpMultiplier::from_ordinal(tier)
        .ok_or_else(|| conversion_error(6, format!("Unknown HP tier ordinal {}", tier)))?;
    Ok(Monster {
        id: row.get(0)?,
        name: row.get(1)?,
        level: row.get(2)?,
        exp: row.get(3)?,
        chronicle: row.get(4)?,
        in_special_zone: row.get(5)?,
        hp_multiplier,
    })
}

/// Read the drop columns that follow the monster columns.
///
/// Returns `None` for the null side of a monster without drops.
pub(crate) fn row_to_drop(row: &rusqlite::Row<'_>) -> rusqlite::Result<Option<DropEntry>> {
    let base = MONSTER_COLUMN_COUNT;
    let item_key: Option<String> = row.get(base)?;
    let Some(item_key) = item_key else {
        return Ok(None);
    };
    let category_code: String = row.get(base + 6)?;
    let category = DropCategory::from_code(&category_code).ok_or_else(|| {
        conversion_error(base + 6, format!("Unknown drop category {:?}", category_code))
    })?;
    let item_name: Option<String> = row.get(base + 1)?;
    Ok(Some(DropEntry {
        item_name: item_name.unwrap_or_else(|| item_key.clone()),
        item_key,
        price: row.get::<_, Option<i64>>(base + 2)?.unwrap_or(0),
        min_amount: row.get(base + 3)?,
        max_amount: row.get(base + 4)?,
        chance: row.get(base + 5)?,
        category,
    }))
}

fn row_to_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<SellableItem> {
    Ok(SellableItem {
        key: row.get(0)?,
        name: row.get(1)?,
        price: row.get(2)?,
        managed_price: row.get(3)?,
        price_updated_at: row.get(4)?,
    })
}

#[derive(Clone)]
pub struct Database {
    pool: Pool<SqliteConnectionManager>,
}

impl Database {
    pub fn new(path: &std::path::Path) -> Result<Self> {
        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.busy_timeout(Duration::from_secs(30))?;
            conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
            Ok(())
        });
        let pool = Pool::builder()
            .max_size(10)
            .build(manager)
            .map_err(LootError::Pool)?;

        let db = Self { pool };
        db.run_migrations()?;
        Ok(db)
    }

    pub fn connection(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(LootError::Pool)
    }

    fn run_migrations(&self) -> Result<()> {
        let mut conn = self.connection()?;
        migrations().to_latest(&mut conn)?;
        Ok(())
    }

    /// Timestamp of the last completed seed, if any.
    pub fn seeded_at(&self) -> Result<Option<String>> {
        let conn = self.connection()?;
        let value = conn
            .query_row(
                "SELECT value FROM app_meta WHERE key = ?1",
                params![SEEDED_AT_KEY],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub(crate) fn mark_seeded(&self, timestamp: &str) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO app_meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![SEEDED_AT_KEY, timestamp],
        )?;
        Ok(())
    }

    fn count(&self, table: &str) -> Result<usize> {
        let conn = self.connection()?;
        let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
            row.get(0)
        })?;
        Ok(count as usize)
    }

    pub fn count_items(&self) -> Result<usize> {
        self.count("items")
    }

    pub fn count_monsters(&self) -> Result<usize> {
        self.count("monsters")
    }

    pub fn count_drops(&self) -> Result<usize> {
        self.count("drops")
    }

    /// Distinct chronicle tags present in the monsters table.
    pub fn chronicles(&self) -> Result<Vec<String>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare("SELECT DISTINCT chronicle FROM monsters ORDER BY chronicle")?;
        let chronicles = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(chronicles)
    }

    // Price list

    /// List sellable items, optionally filtered by a case-insensitive name or key fragment.
    pub fn list_items(&self, search: Option<&str>) -> Result<Vec<SellableItem>> {
        let conn = self.connection()?;
        let pattern = format!("%{}%", search.unwrap_or("").trim());
        let mut stmt = conn.prepare(
            "SELECT key, name, price, managed_price, price_updated_at
             FROM items
             WHERE name LIKE ?1 OR key LIKE ?1
             ORDER BY name, key",
        )?;
        let items = stmt
            .query_map(params![pattern], row_to_item)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(items)
    }

    pub fn get_item(&self, key: &str) -> Result<SellableItem> {
        let conn = self.connection()?;
        conn.query_row(
            "SELECT key, name, price, managed_price, price_updated_at FROM items WHERE key = ?1",
            params![key],
            row_to_item,
        )
        .optional()?
        .ok_or_else(|| LootError::NotFound(format!("Item {:?}", key)))
    }

    /// Set the user's base price for an item.
    pub fn update_item_price(&self, key: &str, price: i64) -> Result<()> {
        if price < 0 {
            return Err(LootError::Validation(format!(
                "Price for {:?} must not be negative (got {})",
                key, price
            )));
        }
        let conn = self.connection()?;
        let updated = conn.execute(
            "UPDATE items SET price = ?1, price_updated_at = ?2 WHERE key = ?3",
            params![price, chrono::Utc::now().to_rfc3339(), key],
        )?;
        if updated == 0 {
            return Err(LootError::NotFound(format!("Item {:?}", key)));
        }
        tracing::debug!("Set price of {} to {}", key, price);
        Ok(())
    }

    /// Replace managed prices for the given keys. Returns number of items updated.
    ///
    /// Keys with no matching item are skipped with a warning.
    pub fn import_managed_prices(&self, prices: &HashMap<String, i64>, quiet: u8) -> Result<usize> {
        let mut conn = self.connection()?;
        let tx = conn.transaction()?;
        let now = chrono::Utc::now().to_rfc3339();

        let mut updated_count = 0;
        let mut unknown_count = 0;
        {
            let mut stmt = tx.prepare(
                "UPDATE items SET managed_price = ?1, price_updated_at = ?2 WHERE key = ?3",
            )?;
            for (key, price) in prices {
                if *price < 0 {
                    return Err(LootError::Validation(format!(
                        "Managed price for {:?} must not be negative (got {})",
                        key, price
                    )));
                }
                if stmt.execute(params![price, now, key])? == 0 {
                    unknown_count += 1;
                    if quiet < 2 {
                        tracing::warn!("Managed price for unknown item {:?} ignored", key);
                    }
                } else {
                    updated_count += 1;
                }
            }
        }

        tx.commit()?;

        if quiet == 0 {
            tracing::info!(
                "Imported {} managed prices, {} unknown keys",
                updated_count,
                unknown_count
            );
        }
        Ok(updated_count)
    }

    /// Drop all managed prices. Returns number of items affected.
    pub fn clear_managed_prices(&self) -> Result<usize> {
        let conn = self.connection()?;
        let cleared = conn.execute(
            "UPDATE items SET managed_price = NULL WHERE managed_price IS NOT NULL",
            (),
        )?;
        Ok(cleared)
    }

    // Monster detail

    pub fn get_monster(&self, id: i64) -> Result<Monster> {
        let conn = self.connection()?;
        conn.query_row(
            &format!("SELECT {} FROM monsters m WHERE m.id = ?1", MONSTER_COLUMNS),
            params![id],
            row_to_monster,
        )
        .optional()?
        .ok_or_else(|| LootError::NotFound(format!("Monster {}", id)))
    }

    /// A single monster with all of its drops priced from `source`.
    pub fn get_monster_drops(&self, id: i64, source: PriceSource) -> Result<MonsterResult> {
        let monster = self.get_monster(id)?;
        let conn = self.connection()?;
        let drops = query_drops(&conn, id, source)?;
        Ok(MonsterResult::new(monster, drops))
    }
}

fn query_drops(conn: &Connection, monster_id: i64, source: PriceSource) -> Result<Vec<DropEntry>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {},
                d.item_key, i.name,
                CASE WHEN ?2 THEN COALESCE(i.managed_price, i.price) ELSE i.price END,
                d.min_amount, d.max_amount, d.chance, d.category
         FROM monsters m
         JOIN drops d ON d.monster_id = m.id
         LEFT JOIN items i ON i.key = d.item_key
         WHERE m.id = ?1
         ORDER BY d.id",
        MONSTER_COLUMNS
    ))?;
    let drops = stmt
        .query_map(params![monster_id, source.is_managed()], row_to_drop)?
        .filter_map(|row| row.transpose())
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(drops)
}
