//! Core library for L2Loot monster income ranking and price management.

pub mod config;
pub mod database;
pub mod error;
pub mod file_utils;
pub mod income;
pub mod models;
pub mod query;
pub mod seeding;

pub use error::{LootError, Result};
pub use income::MonsterResult;
pub use query::{QueryParams, Strategy, rank_monsters, select_strategy};
pub use seeding::{SeedProgress, SeedReport, SeedSnapshot};
