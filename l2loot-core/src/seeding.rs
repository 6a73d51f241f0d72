//! First-run seeding of the store from bundled JSON snapshots.
//!
//! Items, monsters and drops are loaded by three concurrent loaders. Each
//! loader inserts its records in chunks of [`SEED_CHUNK_SIZE`], one
//! transaction per chunk, and reports every committed chunk to a shared
//! [`SeedProgress`]. Inserts ignore rows that already exist, so a re-seed
//! never overwrites prices the user has edited.

use crate::database::Database;
use crate::error::{LootError, Result};
use crate::file_utils::{find_files_with_extension, read_json_records};
use crate::models::{CHANCE_SCALE, DropCategory, DropRecord, HpMultiplier, ItemRecord, MonsterRecord};
use rusqlite::{Transaction, TransactionBehavior, params};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;

pub const SEED_CHUNK_SIZE: usize = 100;

/// The three datasets that make up a seed.
#[derive(Debug, Clone, Default)]
pub struct SeedSnapshot {
    pub items: Vec<ItemRecord>,
    pub monsters: Vec<MonsterRecord>,
    pub drops: Vec<DropRecord>,
}

impl SeedSnapshot {
    /// Load every `items*.json`, `monsters*.json` and `drops*.json` below `dir`.
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let mut snapshot = SeedSnapshot::default();
        let (mut item_files, mut monster_files, mut drop_files) = (0, 0, 0);

        for path in find_files_with_extension(dir, "json")? {
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().to_ascii_lowercase())
                .unwrap_or_default();
            if stem.starts_with("items") {
                snapshot.items.extend(read_json_records::<ItemRecord>(&path)?);
                item_files += 1;
            } else if stem.starts_with("monsters") {
                snapshot.monsters.extend(read_json_records::<MonsterRecord>(&path)?);
                monster_files += 1;
            } else if stem.starts_with("drops") {
                snapshot.drops.extend(read_json_records::<DropRecord>(&path)?);
                drop_files += 1;
            } else {
                tracing::debug!("Ignoring {} while loading seed data", path.display());
            }
        }

        for (kind, files) in [("items", item_files), ("monsters", monster_files), ("drops", drop_files)] {
            if files == 0 {
                return Err(LootError::NotFound(format!(
                    "No {}*.json snapshot in {}",
                    kind,
                    dir.display()
                )));
            }
        }

        Ok(snapshot)
    }

    pub fn total_rows(&self) -> usize {
        self.items.len() + self.monsters.len() + self.drops.len()
    }

    /// Check uniqueness, drop references and value ranges before anything is
    /// written.
    pub fn validate(&self) -> Result<()> {
        let mut monster_ids = HashSet::with_capacity(self.monsters.len());
        for monster in &self.monsters {
            if !monster_ids.insert(monster.id) {
                return Err(LootError::Validation(format!(
                    "Monster {} appears more than once",
                    monster.id
                )));
            }
        }

        let mut item_keys = HashSet::with_capacity(self.items.len());
        for item in &self.items {
            if !item_keys.insert(item.key.as_str()) {
                return Err(LootError::Validation(format!(
                    "Item {:?} appears more than once",
                    item.key
                )));
            }
        }

        let mut drop_keys = HashSet::with_capacity(self.drops.len());
        for drop in &self.drops {
            if !drop_keys.insert((drop.monster_id, drop.item_key.as_str(), drop.category.as_str())) {
                return Err(LootError::Validation(format!(
                    "Drop {:?} ({}) of monster {} appears more than once",
                    drop.item_key, drop.category, drop.monster_id
                )));
            }
            if !monster_ids.contains(&drop.monster_id) {
                return Err(LootError::Validation(format!(
                    "Drop of {:?} references unknown monster {}",
                    drop.item_key, drop.monster_id
                )));
            }
            if !item_keys.contains(drop.item_key.as_str()) {
                return Err(LootError::Validation(format!(
                    "Drop of monster {} references unknown item {:?}",
                    drop.monster_id, drop.item_key
                )));
            }
            if drop.min_amount < 0 || drop.max_amount < drop.min_amount {
                return Err(LootError::Validation(format!(
                    "Drop {:?} of monster {} has invalid amount range {}..{}",
                    drop.item_key, drop.monster_id, drop.min_amount, drop.max_amount
                )));
            }
            if drop.chance < 0 || drop.chance > CHANCE_SCALE as i64 {
                return Err(LootError::Validation(format!(
                    "Drop {:?} of monster {} has chance {} outside 0..=1000000",
                    drop.item_key, drop.monster_id, drop.chance
                )));
            }
        }
        Ok(())
    }
}

/// Rows loaded so far out of a total fixed before loading starts.
#[derive(Debug)]
pub struct SeedProgress {
    loaded: Mutex<usize>,
    total: usize,
}

impl SeedProgress {
    pub fn new(total: usize) -> Self {
        Self {
            loaded: Mutex::new(0),
            total,
        }
    }

    pub fn for_snapshot(snapshot: &SeedSnapshot) -> Self {
        Self::new(snapshot.total_rows())
    }

    pub fn advance(&self, rows: usize) {
        let mut loaded = self.loaded.lock().unwrap_or_else(|e| e.into_inner());
        *loaded = (*loaded + rows).min(self.total);
    }

    pub fn loaded(&self) -> usize {
        *self.loaded.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// Fraction in `0.0..=1.0`. An empty seed counts as complete.
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        self.loaded() as f64 / self.total as f64
    }
}

/// Outcome of a seed run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub items: usize,
    pub monsters: usize,
    pub drops: usize,
    pub skipped_drops: usize,
    /// The store was already seeded and nothing was loaded.
    pub already_seeded: bool,
}

struct DropLoad {
    inserted: usize,
    skipped: usize,
}

impl Database {
    /// Seed the store from `snapshot`, reporting progress to `progress`.
    ///
    /// Does nothing when a previous seed completed, unless `force` is set.
    pub fn seed(
        &self,
        snapshot: &SeedSnapshot,
        progress: &SeedProgress,
        force: bool,
        quiet: u8,
    ) -> Result<SeedReport> {
        if !force {
            if let Some(seeded_at) = self.seeded_at()? {
                if quiet == 0 {
                    tracing::info!("Store already seeded at {}, skipping", seeded_at);
                }
                progress.advance(progress.total());
                return Ok(SeedReport {
                    already_seeded: true,
                    ..SeedReport::default()
                });
            }
        }

        snapshot.validate()?;

        if quiet == 0 {
            tracing::info!(
                "Seeding {} items, {} monsters, {} drops",
                snapshot.items.len(),
                snapshot.monsters.len(),
                snapshot.drops.len()
            );
        }

        let (items, (monsters, drops)) = rayon::join(
            || self.load_items(&snapshot.items, progress),
            || {
                rayon::join(
                    || self.load_monsters(&snapshot.monsters, progress),
                    || self.load_drops(&snapshot.drops, progress, quiet),
                )
            },
        );

        for (loader, result) in [
            ("items", items.as_ref().err()),
            ("monsters", monsters.as_ref().err()),
            ("drops", drops.as_ref().err()),
        ] {
            if let Some(e) = result {
                if quiet < 2 {
                    tracing::warn!("Seeding {} failed: {}", loader, e);
                }
            }
        }

        let items = items?;
        let monsters = monsters?;
        let drops = drops?;

        self.mark_seeded(&chrono::Utc::now().to_rfc3339())?;

        let report = SeedReport {
            items,
            monsters,
            drops: drops.inserted,
            skipped_drops: drops.skipped,
            already_seeded: false,
        };

        if quiet == 0 {
            tracing::info!(
                "Seeded {} items, {} monsters, {} drops ({} drops skipped)",
                report.items,
                report.monsters,
                report.drops,
                report.skipped_drops
            );
        }
        Ok(report)
    }

    /// Run `insert` over `records` in chunks, one immediate transaction per chunk.
    fn load_chunks<T>(
        &self,
        records: &[T],
        progress: &SeedProgress,
        mut insert: impl FnMut(&Transaction<'_>, &[T]) -> Result<usize>,
    ) -> Result<usize> {
        let mut conn = self.connection()?;
        let mut inserted = 0;
        for chunk in records.chunks(SEED_CHUNK_SIZE) {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            inserted += insert(&tx, chunk)?;
            tx.commit()?;
            progress.advance(chunk.len());
        }
        Ok(inserted)
    }

    fn load_items(&self, items: &[ItemRecord], progress: &SeedProgress) -> Result<usize> {
        self.load_chunks(items, progress, |tx, chunk| {
            let mut stmt =
                tx.prepare("INSERT OR IGNORE INTO items (key, name, price) VALUES (?1, ?2, ?3)")?;
            let mut inserted = 0;
            for item in chunk {
                inserted += stmt.execute(params![item.key, item.name, item.price])?;
            }
            Ok(inserted)
        })
    }

    fn load_monsters(&self, monsters: &[MonsterRecord], progress: &SeedProgress) -> Result<usize> {
        self.load_chunks(monsters, progress, |tx, chunk| {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO monsters
                    (id, name, level, exp, chronicle, in_special_zone, hp_tier)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            let mut inserted = 0;
            for monster in chunk {
                let tier = HpMultiplier::from_value(monster.hp_multiplier).ok_or(
                    LootError::InvalidHpMultiplier {
                        monster_id: monster.id,
                        value: monster.hp_multiplier,
                    },
                )?;
                inserted += stmt.execute(params![
                    monster.id,
                    monster.name,
                    monster.level,
                    monster.exp,
                    monster.chronicle,
                    monster.in_special_zone,
                    tier.ordinal(),
                ])?;
            }
            Ok(inserted)
        })
    }

    fn load_drops(&self, drops: &[DropRecord], progress: &SeedProgress, quiet: u8) -> Result<DropLoad> {
        let mut skipped = 0;
        let inserted = self.load_chunks(drops, progress, |tx, chunk| {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO drops
                    (monster_id, item_key, min_amount, max_amount, chance, category)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            let mut inserted = 0;
            for drop in chunk {
                let Some(category) = DropCategory::from_code(&drop.category) else {
                    skipped += 1;
                    if quiet < 2 {
                        tracing::warn!(
                            "Skipping drop {:?} of monster {}: unknown category {:?}",
                            drop.item_key,
                            drop.monster_id,
                            drop.category
                        );
                    }
                    continue;
                };
                inserted += stmt.execute(params![
                    drop.monster_id,
                    drop.item_key,
                    drop.min_amount,
                    drop.max_amount,
                    drop.chance,
                    category.as_code(),
                ])?;
            }
            Ok(inserted)
        })?;

        if skipped > 0 && quiet < 2 {
            tracing::warn!("Skipped {} drops with unknown categories", skipped);
        }
        Ok(DropLoad { inserted, skipped })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::database::tests::test_database;
    use serde_json::json;

    pub(crate) fn monster_json(id: i64, level: i32, chronicle: &str, zone: bool, hp: f64) -> serde_json::Value {
        json!({
            "id": id,
            "name": format!("Monster {}", id),
            "level": level,
            "exp": level * 100,
            "chronicle": chronicle,
            "inSpecialZone": zone,
            "hpMultiplier": hp,
        })
    }

    fn write_snapshot(dir: &Path, items: serde_json::Value, monsters: serde_json::Value, drops: serde_json::Value) {
        std::fs::write(dir.join("items.json"), items.to_string()).unwrap();
        std::fs::write(dir.join("monsters.json"), monsters.to_string()).unwrap();
        std::fs::write(dir.join("drops.json"), drops.to_string()).unwrap();
    }

    fn small_snapshot() -> SeedSnapshot {
        SeedSnapshot {
            items: serde_json::from_value(json!([
                {"key": "adena", "name": "Adena", "price": 1},
                {"key": "coal", "name": "Coal", "price": 100},
            ]))
            .unwrap(),
            monsters: serde_json::from_value(json!([
                monster_json(1, 20, "c5", false, 1.0),
                monster_json(2, 25, "c5", true, 2.0),
            ]))
            .unwrap(),
            drops: serde_json::from_value(json!([
                {"monsterId": 1, "itemKey": "adena", "min": 10, "max": 20, "chance": 700000, "category": "ADENA"},
                {"monsterId": 1, "itemKey": "coal", "min": 1, "max": 1, "chance": 500000, "category": "SPOIL"},
                {"monsterId": 2, "itemKey": "coal", "min": 1, "max": 2, "chance": 300000, "category": "HERB"},
            ]))
            .unwrap(),
        }
    }

    #[test]
    fn test_snapshot_from_dir_merges_split_files() {
        let dir = tempfile::tempdir().unwrap();
        write_snapshot(
            dir.path(),
            json!([{"key": "coal", "name": "Coal", "price": 5}]),
            json!([monster_json(1, 10, "c5", false, 1.0)]),
            json!([]),
        );
        std::fs::write(
            dir.path().join("monsters_interlude.json"),
            json!([monster_json(2, 12, "interlude", false, 0.5)]).to_string(),
        )
        .unwrap();
        std::fs::write(dir.path().join("readme.json"), "{}").unwrap();

        let snapshot = SeedSnapshot::from_dir(dir.path()).unwrap();
        assert_eq!(snapshot.items.len(), 1);
        assert_eq!(snapshot.monsters.len(), 2);
        assert_eq!(snapshot.drops.len(), 0);
        assert_eq!(snapshot.total_rows(), 3);
    }

    #[test]
    fn test_snapshot_from_dir_requires_all_datasets() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("items.json"), "[]").unwrap();
        assert!(matches!(
            SeedSnapshot::from_dir(dir.path()),
            Err(LootError::NotFound(_))
        ));
    }

    #[test]
    fn test_seed_loads_all_collections() {
        let (_dir, db) = test_database();
        let snapshot = small_snapshot();
        let progress = SeedProgress::for_snapshot(&snapshot);

        let report = db.seed(&snapshot, &progress, false, 2).unwrap();
        assert_eq!(report.items, 2);
        assert_eq!(report.monsters, 2);
        assert_eq!(report.drops, 2);
        assert_eq!(report.skipped_drops, 1);
        assert!(!report.already_seeded);

        assert_eq!(progress.loaded(), 7);
        assert_eq!(progress.fraction(), 1.0);
        assert_eq!(db.count_drops().unwrap(), 2);
        assert!(db.seeded_at().unwrap().is_some());
        assert_eq!(db.chronicles().unwrap(), vec!["c5".to_string()]);
    }

    #[test]
    fn test_seed_is_idempotent_and_keeps_user_prices() {
        let (_dir, db) = test_database();
        let snapshot = small_snapshot();

        db.seed(&snapshot, &SeedProgress::for_snapshot(&snapshot), false, 2)
            .unwrap();
        db.update_item_price("coal", 777).unwrap();

        let again = db
            .seed(&snapshot, &SeedProgress::for_snapshot(&snapshot), false, 2)
            .unwrap();
        assert!(again.already_seeded);

        let forced = db
            .seed(&snapshot, &SeedProgress::for_snapshot(&snapshot), true, 2)
            .unwrap();
        assert_eq!(forced.items, 0);
        assert_eq!(forced.monsters, 0);
        assert_eq!(forced.drops, 0);
        assert_eq!(db.count_monsters().unwrap(), 2);
        assert_eq!(db.get_item("coal").unwrap().price, 777);
    }

    #[test]
    fn test_seed_in_chunks() {
        let (_dir, db) = test_database();
        let monsters: Vec<serde_json::Value> = (1..=250)
            .map(|id| monster_json(id, 40, "interlude", false, 1.0))
            .collect();
        let snapshot = SeedSnapshot {
            items: Vec::new(),
            monsters: serde_json::from_value(json!(monsters)).unwrap(),
            drops: Vec::new(),
        };
        let progress = SeedProgress::for_snapshot(&snapshot);

        let report = db.seed(&snapshot, &progress, false, 2).unwrap();
        assert_eq!(report.monsters, 250);
        assert_eq!(progress.loaded(), 250);
        assert_eq!(db.count_monsters().unwrap(), 250);
    }

    #[test]
    fn test_invalid_hp_multiplier_fails_loudly() {
        let (_dir, db) = test_database();
        let mut snapshot = small_snapshot();
        snapshot.monsters[1].hp_multiplier = 1.5;
        let progress = SeedProgress::for_snapshot(&snapshot);

        let err = db.seed(&snapshot, &progress, false, 2).unwrap_err();
        assert!(matches!(
            err,
            LootError::InvalidHpMultiplier { monster_id: 2, .. }
        ));
        assert_eq!(db.seeded_at().unwrap(), None);
        assert_eq!(db.count_monsters().unwrap(), 0);
        assert_eq!(progress.total(), 7);
    }

    #[test]
    fn test_unresolved_drop_reference_is_rejected() {
        let (_dir, db) = test_database();
        let mut snapshot = small_snapshot();
        snapshot.drops[0].monster_id = 99;

        let err = db
            .seed(&snapshot, &SeedProgress::for_snapshot(&snapshot), false, 2)
            .unwrap_err();
        assert!(matches!(err, LootError::Validation(_)));
        assert_eq!(db.count_items().unwrap(), 0);
    }

    #[test]
    fn test_invalid_amount_range_is_rejected() {
        let mut snapshot = small_snapshot();
        snapshot.drops[1].min_amount = 3;
        snapshot.drops[1].max_amount = 2;
        assert!(matches!(snapshot.validate(), Err(LootError::Validation(_))));
    }

    #[test]
    fn test_monster_repeated_across_chronicle_files_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_snapshot(
            dir.path(),
            json!([{"key": "coal", "name": "Coal", "price": 100}]),
            json!([monster_json(1, 20, "c5", false, 1.0)]),
            json!([]),
        );
        std::fs::write(
            dir.path().join("monsters_interlude.json"),
            json!([monster_json(1, 20, "interlude", false, 1.0)]).to_string(),
        )
        .unwrap();

        let (_db_dir, db) = test_database();
        let snapshot = SeedSnapshot::from_dir(dir.path()).unwrap();
        let err = db
            .seed(&snapshot, &SeedProgress::for_snapshot(&snapshot), false, 2)
            .unwrap_err();
        assert!(matches!(err, LootError::Validation(_)));
        assert_eq!(db.count_monsters().unwrap(), 0);
        assert_eq!(db.seeded_at().unwrap(), None);
    }

    #[test]
    fn test_duplicate_item_key_is_rejected() {
        let mut snapshot = small_snapshot();
        let mut coal = snapshot.items[1].clone();
        coal.price = 250;
        snapshot.items.push(coal);
        assert!(matches!(snapshot.validate(), Err(LootError::Validation(_))));
    }

    #[test]
    fn test_duplicate_drop_is_rejected() {
        let (_dir, db) = test_database();
        let mut snapshot = small_snapshot();
        let mut second_coal = snapshot.drops[1].clone();
        second_coal.min_amount = 5;
        second_coal.max_amount = 5;
        snapshot.drops.push(second_coal);

        let err = db
            .seed(&snapshot, &SeedProgress::for_snapshot(&snapshot), false, 2)
            .unwrap_err();
        assert!(matches!(err, LootError::Validation(_)));
        assert_eq!(db.count_drops().unwrap(), 0);

        // Same item under another category is a distinct drop.
        let mut snapshot = small_snapshot();
        let mut material_coal = snapshot.drops[1].clone();
        material_coal.category = "MATERIAL".to_string();
        snapshot.drops.push(material_coal);
        snapshot.validate().unwrap();
    }

    #[test]
    fn test_bundled_data_is_valid() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("../data");
        let snapshot = SeedSnapshot::from_dir(&dir).unwrap();
        snapshot.validate().unwrap();
        assert!(
            snapshot
                .monsters
                .iter()
                .all(|m| HpMultiplier::from_value(m.hp_multiplier).is_some())
        );
        assert!(
            snapshot
                .drops
                .iter()
                .all(|d| DropCategory::from_code(&d.category).is_some())
        );
    }

    #[test]
    fn test_progress_fraction() {
        let progress = SeedProgress::new(200);
        assert_eq!(progress.fraction(), 0.0);
        progress.advance(50);
        assert_eq!(progress.fraction(), 0.25);
        progress.advance(500);
        assert_eq!(progress.loaded(), 200);
        assert_eq!(SeedProgress::new(0).fraction(), 1.0);
    }
}
