//! Expected income per kill.
//!
//! Income is split into three parts. Spoil and adena drops are independent
//! events, so their expected value is `price * probability * average amount`.
//! Material drops compete for a single slot per kill: their chances (as
//! percentages, each capped at 100) are normalized against
//! `max(sum of chances, 100)` before weighting the item values.
//!
//! Every part is summed in floating point and truncated once.

use crate::models::{DropCategory, DropEntry, Monster};
use serde::Serialize;
use std::cmp::Reverse;

/// A monster together with every drop it can yield.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonsterResult {
    pub monster: Monster,
    pub drops: Vec<DropEntry>,
}

impl MonsterResult {
    pub fn new(monster: Monster, drops: Vec<DropEntry>) -> Self {
        Self { monster, drops }
    }

    pub fn drops_in(&self, category: DropCategory) -> impl Iterator<Item = &DropEntry> {
        self.drops.iter().filter(move |d| d.category == category)
    }

    pub fn spoil_income(&self) -> i64 {
        spoil_income(&self.drops)
    }

    pub fn adena_income(&self) -> i64 {
        adena_income(&self.drops)
    }

    pub fn material_income(&self) -> i64 {
        material_income(&self.drops)
    }

    pub fn average_income(&self) -> i64 {
        self.spoil_income() + self.adena_income() + self.material_income()
    }
}

fn expected_value(drop: &DropEntry) -> f64 {
    drop.price as f64 * drop.probability() * drop.average_amount()
}

/// Expected value of all spoil drops with a positive price.
pub fn spoil_income(drops: &[DropEntry]) -> i64 {
    let total: f64 = drops
        .iter()
        .filter(|d| d.category == DropCategory::Spoil && d.price > 0)
        .map(expected_value)
        .sum();
    total as i64
}

/// Expected value of the adena drop. Only the first one counts.
pub fn adena_income(drops: &[DropEntry]) -> i64 {
    drops
        .iter()
        .find(|d| d.category == DropCategory::Adena)
        .filter(|d| d.price > 0)
        .map(|d| expected_value(d) as i64)
        .unwrap_or(0)
}

/// Chance of a material drop as a percentage, capped at 100.
pub fn balanced_chance(drop: &DropEntry) -> f64 {
    (drop.probability() * 100.0).min(100.0)
}

/// Expected value of the material slot.
pub fn material_income(drops: &[DropEntry]) -> i64 {
    let materials: Vec<&DropEntry> = drops
        .iter()
        .filter(|d| d.category == DropCategory::Material)
        .collect();
    if materials.is_empty() {
        return 0;
    }

    let total_balanced_chance = materials
        .iter()
        .map(|d| balanced_chance(d))
        .sum::<f64>()
        .max(100.0);

    let total_income: f64 = materials
        .iter()
        .map(|d| {
            let item_value = if d.price > 0 {
                d.price as f64 * d.average_amount()
            } else {
                0.0
            };
            balanced_chance(d) / total_balanced_chance * item_value
        })
        .sum();

    total_income as i64
}

/// Sort by average income, highest first, and keep at most `limit` results.
///
/// Equal incomes keep their incoming order.
pub fn rank(mut results: Vec<MonsterResult>, limit: usize) -> Vec<MonsterResult> {
    results.sort_by_cached_key(|r| Reverse(r.average_income()));
    results.truncate(limit);
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HpMultiplier;

    fn drop(category: DropCategory, price: i64, chance: i64, min: i64, max: i64) -> DropEntry {
        DropEntry {
            item_key: format!("{}-{}", category.as_code().to_lowercase(), price),
            item_name: format!("{} {}", category, price),
            price,
            min_amount: min,
            max_amount: max,
            chance,
            category,
        }
    }

    fn monster(id: i64) -> Monster {
        Monster {
            id,
            name: format!("Monster {}", id),
            level: 40,
            exp: 1000,
            chronicle: "c5".to_string(),
            in_special_zone: false,
            hp_multiplier: HpMultiplier::X1,
        }
    }

    #[test]
    fn test_single_spoil_drop() {
        let drops = vec![drop(DropCategory::Spoil, 1000, 500_000, 1, 1)];
        assert_eq!(spoil_income(&drops), 500);
    }

    #[test]
    fn test_spoil_ignores_unpriced_and_other_categories() {
        let drops = vec![
            drop(DropCategory::Spoil, 0, 1_000_000, 1, 1),
            drop(DropCategory::Spoil, -5, 1_000_000, 1, 1),
            drop(DropCategory::Equipment, 50_000, 1_000_000, 1, 1),
            drop(DropCategory::Spoil, 300, 250_000, 2, 4),
        ];
        // 300 * 0.25 * 3
        assert_eq!(spoil_income(&drops), 225);
    }

    #[test]
    fn test_spoil_truncates_after_summing() {
        let drops = vec![
            drop(DropCategory::Spoil, 1, 600_000, 1, 1),
            drop(DropCategory::Spoil, 1, 600_000, 1, 1),
        ];
        // 0.6 + 0.6 = 1.2, truncating each term first would give 0
        assert_eq!(spoil_income(&drops), 1);
    }

    #[test]
    fn test_adena_uses_first_drop_only() {
        let drops = vec![
            drop(DropCategory::Adena, 1, 500_000, 100, 200),
            drop(DropCategory::Adena, 1, 1_000_000, 1000, 1000),
        ];
        assert_eq!(adena_income(&drops), 75);
        assert_eq!(adena_income(&[]), 0);
    }

    #[test]
    fn test_material_below_hundred_percent_is_unscaled() {
        let drops = vec![
            drop(DropCategory::Material, 100, 250_000, 1, 1),
            drop(DropCategory::Material, 400, 500_000, 2, 2),
        ];
        // naive: 100 * 0.25 * 1 + 400 * 0.5 * 2 = 25 + 400
        assert_eq!(material_income(&drops), 425);
    }

    #[test]
    fn test_material_above_hundred_percent_is_normalized() {
        let drops = vec![
            drop(DropCategory::Material, 100, 600_000, 1, 1),
            drop(DropCategory::Material, 200, 700_000, 1, 1),
        ];
        // 60/130 * 100 + 70/130 * 200 = 153.84...
        assert_eq!(material_income(&drops), 153);
    }

    #[test]
    fn test_material_chance_is_capped_per_item() {
        let drops = vec![drop(DropCategory::Material, 10, 3_000_000, 5, 5)];
        assert_eq!(balanced_chance(&drops[0]), 100.0);
        assert_eq!(material_income(&drops), 50);
    }

    #[test]
    fn test_material_unpriced_items_still_take_share() {
        let drops = vec![
            drop(DropCategory::Material, 0, 750_000, 1, 1),
            drop(DropCategory::Material, 100, 750_000, 1, 1),
        ];
        // the unpriced item absorbs half of the slot
        assert_eq!(material_income(&drops), 50);
    }

    #[test]
    fn test_average_income_is_sum_of_parts() {
        let result = MonsterResult::new(
            monster(1),
            vec![
                drop(DropCategory::Spoil, 1000, 500_000, 1, 1),
                drop(DropCategory::Adena, 1, 500_000, 50, 70),
                drop(DropCategory::Material, 100, 600_000, 1, 1),
                drop(DropCategory::Material, 200, 700_000, 1, 1),
                drop(DropCategory::Equipment, 99_999, 1_000_000, 1, 1),
            ],
        );
        assert_eq!(result.spoil_income(), 500);
        assert_eq!(result.adena_income(), 30);
        assert_eq!(result.material_income(), 153);
        assert_eq!(
            result.average_income(),
            result.spoil_income() + result.adena_income() + result.material_income()
        );
        assert_eq!(result.average_income(), 683);
    }

    #[test]
    fn test_rank_orders_and_limits() {
        let results: Vec<MonsterResult> = [(1, 100), (2, 900), (3, 500), (4, 900)]
            .into_iter()
            .map(|(id, price)| {
                MonsterResult::new(
                    monster(id),
                    vec![drop(DropCategory::Spoil, price, 1_000_000, 1, 1)],
                )
            })
            .collect();

        let ranked = rank(results, 3);
        let ids: Vec<i64> = ranked.iter().map(|r| r.monster.id).collect();
        assert_eq!(ids, vec![2, 4, 3]);

        let reranked = rank(ranked.clone(), 3);
        assert_eq!(reranked, ranked);
    }

    #[test]
    fn test_monster_without_drops_earns_nothing() {
        let result = MonsterResult::new(monster(7), Vec::new());
        assert_eq!(result.average_income(), 0);
        assert_eq!(rank(vec![result], 0).len(), 0);
    }
}
