use anyhow::Result;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use l2loot_core::config::Settings;
use l2loot_core::database::Database;
use l2loot_core::models::{HpMultiplier, PriceSource};
use l2loot_core::{MonsterResult, QueryParams, SeedProgress, SeedSnapshot, rank_monsters};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(
    name = "l2loot",
    version = "0.1.0",
    about = "Rank monsters by expected income and manage material prices",
    long_about = None
)]
struct Cli {
    /// Path to settings TOML file
    #[arg(long = "config", global = true, default_value = "l2loot.toml")]
    settings_file: PathBuf,

    /// Path to SQLite database file (overrides settings)
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Path to log file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Verbosity level (repeat for more verbose output)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load bundled JSON snapshots into the database
    Seed {
        /// Directory containing items*.json, monsters*.json and drops*.json
        #[arg(long)]
        data_dir: Option<PathBuf>,
        /// Seed again even if a previous seed completed
        #[arg(long, default_value_t = false)]
        force: bool,
        /// Quiet mode (0=show messages/warnings, 1=suppress messages, 2=suppress both)
        #[arg(long, default_value_t = 0)]
        quiet: u8,
    },

    /// Rank monsters by expected income per kill
    Rank {
        #[arg(long)]
        min_level: Option<i32>,
        #[arg(long)]
        max_level: Option<i32>,
        /// Chronicle tag, e.g. c5 or interlude
        #[arg(long)]
        chronicle: Option<String>,
        /// Maximum number of monsters to list
        #[arg(long)]
        limit: Option<usize>,
        /// HP multiplier tiers to include, e.g. --hp x1,x2
        #[arg(long, value_delimiter = ',')]
        hp: Vec<HpMultiplier>,
        /// Include monsters of special zones
        #[arg(long, overrides_with = "exclude_special_zone")]
        include_special_zone: bool,
        /// Leave out monsters of special zones
        #[arg(long, overrides_with = "include_special_zone")]
        exclude_special_zone: bool,
        /// Price source: base or managed
        #[arg(long, value_parser = parse_price_source)]
        price_source: Option<PriceSource>,
        /// Also write the ranking to a CSV file
        #[arg(long)]
        csv: Option<PathBuf>,
    },

    /// Show a monster's drops and income breakdown
    Monster {
        #[arg(long)]
        id: i64,
        /// Use managed prices instead of base prices
        #[arg(long, default_value_t = false)]
        managed: bool,
    },

    /// Manage the material price list
    Prices {
        #[command(subcommand)]
        command: PricesCommand,
    },

    /// Manage the settings file
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Subcommand)]
enum PricesCommand {
    /// List items and their prices
    List {
        /// Only items whose name or key contains this text
        #[arg(long)]
        search: Option<String>,
    },
    /// Set the base price of an item
    Set {
        #[arg(long)]
        key: String,
        #[arg(long)]
        price: i64,
    },
    /// Import managed prices from a JSON object of item key to price
    ImportManaged {
        #[arg(long)]
        file: PathBuf,
        #[arg(long, default_value_t = 0)]
        quiet: u8,
    },
    /// Remove all managed prices
    ClearManaged,
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Write a settings file with default values
    Init {
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Print the effective settings
    Show,
}

/// Special-zone choice given on the command line, if any.
fn zone_override(include: bool, exclude: bool) -> Option<bool> {
    match (include, exclude) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    }
}

fn parse_price_source(value: &str) -> std::result::Result<PriceSource, String> {
    match value.to_ascii_lowercase().as_str() {
        "base" => Ok(PriceSource::Base),
        "managed" => Ok(PriceSource::Managed),
        other => Err(format!("Unknown price source {:?} (expected base or managed)", other)),
    }
}

fn setup_logging(verbose: u8, log_file: &Path) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    let filter_level = match verbose {
        0 => tracing::Level::ERROR,
        1 => tracing::Level::WARN,
        2 => tracing::Level::INFO,
        3 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    let filter = EnvFilter::from_default_env().add_directive(filter_level.into());

    let file_appender = tracing_appender::rolling::never(
        log_file.parent().unwrap_or(Path::new(".")),
        log_file.file_name().unwrap_or(std::ffi::OsStr::new("l2loot.log")),
    );
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::Layer::new().with_writer(std::io::stderr).with_ansi(true))
        .with(fmt::Layer::new().with_writer(non_blocking).with_ansi(false));

    tracing::subscriber::set_global_default(subscriber)?;

    Ok(guard)
}

async fn seed(db: Database, data_dir: &Path, force: bool, quiet: u8) -> Result<()> {
    if !data_dir.exists() {
        anyhow::bail!("Data directory not found at {:?}", data_dir);
    }

    let snapshot = SeedSnapshot::from_dir(data_dir)?;
    let progress = Arc::new(SeedProgress::for_snapshot(&snapshot));

    let bar = if quiet == 0 {
        ProgressBar::new(progress.total() as u64)
    } else {
        ProgressBar::hidden()
    };
    bar.set_style(ProgressStyle::with_template(
        "{spinner} [{bar:40}] {pos}/{len} rows ({percent}%)",
    )?);

    let handle = tokio::task::spawn_blocking({
        let progress = Arc::clone(&progress);
        move || db.seed(&snapshot, &progress, force, quiet)
    });

    while !handle.is_finished() {
        bar.set_position(progress.loaded() as u64);
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    bar.set_position(progress.loaded() as u64);
    bar.finish_and_clear();

    let report = handle.await??;
    if report.already_seeded {
        info!("Database already seeded, use --force to load the snapshots again");
    } else {
        info!(
            "Seeded {} items, {} monsters, {} drops ({} skipped)",
            report.items, report.monsters, report.drops, report.skipped_drops
        );
    }
    Ok(())
}

fn print_ranking(results: &[MonsterResult]) {
    println!(
        "{:>4}  {:<28} {:>5} {:>6} {:>10} {:>10} {:>10} {:>12}",
        "#", "Monster", "Lvl", "HP", "Spoil", "Adena", "Material", "Income"
    );
    for (position, result) in results.iter().enumerate() {
        let monster = &result.monster;
        let zone = if monster.in_special_zone { "*" } else { "" };
        println!(
            "{:>4}  {:<28} {:>5} {:>6} {:>10} {:>10} {:>10} {:>12}",
            position + 1,
            format!("{}{}", monster.name, zone),
            monster.level,
            monster.hp_multiplier.to_string(),
            result.spoil_income(),
            result.adena_income(),
            result.material_income(),
            result.average_income(),
        );
    }
}

fn write_ranking_csv(path: &Path, results: &[MonsterResult]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record([
        "rank",
        "monster_id",
        "name",
        "level",
        "chronicle",
        "hp_multiplier",
        "special_zone",
        "spoil_income",
        "adena_income",
        "material_income",
        "average_income",
    ])?;
    for (position, result) in results.iter().enumerate() {
        let monster = &result.monster;
        writer.write_record([
            (position + 1).to_string(),
            monster.id.to_string(),
            monster.name.clone(),
            monster.level.to_string(),
            monster.chronicle.clone(),
            monster.hp_multiplier.value().to_string(),
            monster.in_special_zone.to_string(),
            result.spoil_income().to_string(),
            result.adena_income().to_string(),
            result.material_income().to_string(),
            result.average_income().to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

fn print_monster(result: &MonsterResult) {
    let monster = &result.monster;
    println!(
        "{} (id {}, level {}, {}, HP {}{})",
        monster.name,
        monster.id,
        monster.level,
        monster.chronicle,
        monster.hp_multiplier,
        if monster.in_special_zone { ", special zone" } else { "" }
    );
    println!("Experience: {}", monster.exp);
    println!();
    println!(
        "{:<10} {:<32} {:>9} {:>11} {:>10}",
        "Category", "Item", "Chance", "Amount", "Price"
    );
    for drop in &result.drops {
        println!(
            "{:<10} {:<32} {:>8.4}% {:>11} {:>10}",
            drop.category.as_code(),
            drop.item_name,
            drop.probability() * 100.0,
            format!("{}-{}", drop.min_amount, drop.max_amount),
            drop.price,
        );
    }
    println!();
    println!("Spoil income:    {}", result.spoil_income());
    println!("Adena income:    {}", result.adena_income());
    println!("Material income: {}", result.material_income());
    println!("Average income:  {}", result.average_income());
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_file = cli
        .log_file
        .clone()
        .unwrap_or_else(|| std::env::temp_dir().join("l2loot.log"));
    let _guard = setup_logging(cli.verbose, &log_file)?;

    info!("Starting l2loot CLI");

    let settings = Settings::load_or_default(&cli.settings_file)?;
    let db_path = cli.database.clone().unwrap_or_else(|| settings.database.clone());

    match cli.command {
        Commands::Seed { data_dir, force, quiet } => {
            let data_dir = data_dir.unwrap_or_else(|| settings.data_dir.clone());
            let db = Database::new(&db_path)?;
            seed(db, &data_dir, force, quiet).await?;
        }
        Commands::Rank {
            min_level,
            max_level,
            chronicle,
            limit,
            hp,
            include_special_zone,
            exclude_special_zone,
            price_source,
            csv,
        } => {
            let db = Database::new(&db_path)?;
            if db.seeded_at()?.is_none() {
                tracing::warn!("Database has not been seeded yet, run `l2loot seed` first");
            }

            let defaults = settings.query.to_params();
            let params = QueryParams {
                min_level: min_level.unwrap_or(defaults.min_level),
                max_level: max_level.unwrap_or(defaults.max_level),
                chronicle: chronicle.unwrap_or(defaults.chronicle),
                hp_multipliers: if hp.is_empty() { defaults.hp_multipliers } else { Some(hp) },
                include_special_zone: zone_override(include_special_zone, exclude_special_zone)
                    .unwrap_or(defaults.include_special_zone),
                limit: limit.unwrap_or(defaults.limit),
                price_source: price_source.unwrap_or(defaults.price_source),
            };
            info!("Ranking monsters with {:?}", params);

            let results = rank_monsters(&db, &params)?;
            if results.is_empty() {
                info!("No monsters match the filter");
            }
            print_ranking(&results);

            if let Some(csv_path) = csv {
                write_ranking_csv(&csv_path, &results)?;
                info!("Wrote {} rows to {:?}", results.len(), csv_path);
            }
        }
        Commands::Monster { id, managed } => {
            let db = Database::new(&db_path)?;
            let result = db.get_monster_drops(id, PriceSource::from_managed_flag(managed))?;
            print_monster(&result);
        }
        Commands::Prices { command } => {
            let db = Database::new(&db_path)?;
            match command {
                PricesCommand::List { search } => {
                    let items = db.list_items(search.as_deref())?;
                    println!("{:<24} {:<32} {:>10} {:>10}", "Key", "Name", "Price", "Managed");
                    for item in &items {
                        println!(
                            "{:<24} {:<32} {:>10} {:>10}",
                            item.key,
                            item.name,
                            item.price,
                            item.managed_price.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string()),
                        );
                    }
                    info!("Listed {} items", items.len());
                }
                PricesCommand::Set { key, price } => {
                    db.update_item_price(&key, price)?;
                    info!("Set price of {} to {}", key, price);
                }
                PricesCommand::ImportManaged { file, quiet } => {
                    if !file.exists() {
                        anyhow::bail!("Managed price file not found: {:?}", file);
                    }
                    let content = std::fs::read_to_string(&file)?;
                    let prices: HashMap<String, i64> = serde_json::from_str(&content)?;
                    let updated = db.import_managed_prices(&prices, quiet)?;
                    info!("Updated managed prices of {} items", updated);
                }
                PricesCommand::ClearManaged => {
                    let cleared = db.clear_managed_prices()?;
                    info!("Cleared managed prices of {} items", cleared);
                }
            }
        }
        Commands::Config { command } => match command {
            ConfigCommand::Init { force } => {
                if cli.settings_file.exists() && !force {
                    anyhow::bail!(
                        "Settings file {:?} already exists, use --force to overwrite",
                        cli.settings_file
                    );
                }
                Settings::default().save(&cli.settings_file)?;
                info!("Wrote default settings to {:?}", cli.settings_file);
            }
            ConfigCommand::Show => {
                print!("{}", settings.to_toml()?);
            }
        },
    }

    info!("l2loot CLI finished");
    Ok(())
}
