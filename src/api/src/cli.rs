//! CLI commands for bettracker.
//!
//! Supports API server mode, PMU snapshot import and the horse merge job.

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::config::AppConfig;
use crate::import::{import_snapshot, load_snapshot};
use crate::merge::{CanonicalHorse, FailurePolicy, HorseResolver, MergeReport};
use crate::scheduler::{run_weekly, shutdown_channel, spawn_ctrl_c_listener};
use crate::storage::HorseRepository;

#[derive(Parser)]
#[command(name = "bettracker")]
#[command(
    version,
    about = "BetTracker: PMU horse registry, merge job and admin API",
    long_about = None
)]
pub struct Cli {
    /// Database path override
    #[arg(long, global = true, value_name = "FILE")]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the API server (and the weekly merge, if enabled)
    Serve {
        /// Host to bind to [default: server.host from config]
        #[arg(short = 'H', long)]
        host: Option<String>,

        /// Port to bind to [default: server.port from config]
        #[arg(short, long)]
        port: Option<u16>,

        /// Do not run the weekly merge alongside the server
        #[arg(long)]
        no_schedule: bool,
    },

    /// Import a PMU program snapshot JSON file
    Import {
        /// Path to snapshot JSON file
        #[arg(value_name = "FILE")]
        input: PathBuf,
    },

    /// Merge raw horse records into unique horses now
    Merge {
        /// Keep going past a failing horse instead of aborting
        #[arg(long)]
        skip_failures: bool,

        /// Output format (json, table)
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Run the weekly merge in the foreground until Ctrl-C
    Schedule,

    /// Show one unique horse
    Horse {
        /// Exact horse name
        name: String,

        /// Output format (json, table)
        #[arg(short, long, default_value = "table")]
        format: String,
    },
}

/// Load configuration, applying the `--db` override.
pub fn load_config(db: Option<PathBuf>) -> anyhow::Result<AppConfig> {
    let mut config = AppConfig::load()?;
    if let Some(path) = db {
        config.database.path = path.to_string_lossy().to_string();
    }
    Ok(config)
}

/// Open the configured database.
pub fn open_repository(config: &AppConfig) -> anyhow::Result<HorseRepository> {
    let path = Path::new(&config.database.path);
    HorseRepository::new(path)
        .with_context(|| format!("Failed to open database {}", path.display()))
}

/// Import a snapshot file into the store.
pub fn run_import(input: PathBuf, db: Option<PathBuf>) -> anyhow::Result<()> {
    let config = load_config(db)?;
    let repo = open_repository(&config)?;

    eprintln!("Loading snapshot from: {}", input.display());
    let snapshot = load_snapshot(&input)?;
    let summary = import_snapshot(&repo, &snapshot, Utc::now())?;

    println!(
        "Imported {} races, {} horses, {} performances ({} skipped, {} races already present)",
        summary.races,
        summary.horses,
        summary.performances,
        summary.skipped,
        summary.skipped_races
    );
    eprintln!("Raw horse records in store: {}", repo.raw_horse_count()?);
    Ok(())
}

/// Run the merge once.
pub fn run_merge_now(
    skip_failures: bool,
    format: String,
    db: Option<PathBuf>,
) -> anyhow::Result<()> {
    let config = load_config(db)?;
    let repo = open_repository(&config)?;

    let policy = if skip_failures {
        FailurePolicy::SkipAndContinue
    } else {
        config.merge.failure_policy
    };

    let report = match HorseResolver::new(&repo).with_policy(policy).resolve_all() {
        Ok(report) => report,
        Err(e) => {
            if let Some(partial) = e.partial_report() {
                eprintln!("Merge aborted; written before the failure:");
                print_merge_table(partial);
            }
            return Err(e).context("Horse merge failed");
        }
    };
    eprintln!("Unique horses in store: {}", repo.unique_horse_count()?);

    match format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        "table" => print_merge_table(&report),
        _ => {
            eprintln!("Unknown format: {}. Using table.", format);
            print_merge_table(&report);
        }
    }

    Ok(())
}

/// Run the weekly trigger loop.
pub async fn run_schedule(db: Option<PathBuf>) -> anyhow::Result<()> {
    let config = load_config(db)?;
    let schedule = config.merge.schedule()?;
    let repo = Arc::new(Mutex::new(open_repository(&config)?));

    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    spawn_ctrl_c_listener(shutdown_tx);

    run_weekly(repo, schedule, config.merge.failure_policy, shutdown_rx).await;
    Ok(())
}

/// Print one unique horse.
pub fn run_show_horse(
    name: String,
    format: String,
    db: Option<PathBuf>,
) -> anyhow::Result<()> {
    let config = load_config(db)?;
    let repo = open_repository(&config)?;

    let horse = repo
        .get_unique_horse(&name)?
        .with_context(|| format!("No unique horse named {:?}", name))?;

    match format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&horse)?),
        _ => print_horse_table(&horse),
    }

    Ok(())
}

fn print_merge_table(report: &MergeReport) {
    println!("=== Horse Merge ===");
    println!("  Raw records:   {:>6}", report.raw_records);
    println!("  Unique horses: {:>6}", report.groups);
    println!("  Created:       {:>6}", report.created);
    println!("  Updated:       {:>6}", report.updated);
    println!("  Failed:        {:>6}", report.failures.len());

    if !report.failures.is_empty() {
        println!();
        println!("=== Failures ===");
        for failure in &report.failures {
            println!("  {}: {}", failure.name, failure.error);
        }
    }
}

fn print_horse_table(horse: &CanonicalHorse) {
    fn or_dash<T: ToString>(value: &Option<T>) -> String {
        value.as_ref().map_or_else(|| "-".to_string(), |v| v.to_string())
    }

    println!("=== {} ===", horse.name);
    println!("  Age:        {}", or_dash(&horse.age));
    println!("  Sex:        {}", or_dash(&horse.sex));
    println!("  Jockey:     {}", or_dash(&horse.current_jockey));
    println!("  Trainer:    {}", or_dash(&horse.current_trainer));
    println!("  Earnings:   {:.2}", horse.total_earnings);
    println!(
        "  Career:     {} starts, {} wins, {} places",
        horse.career_starts, horse.career_wins, horse.career_places
    );
    println!("  Musique:    {}", or_dash(&horse.recent_form));
    println!("  Last race:  {}", or_dash(&horse.last_race_date));
}
