//! Horse identity resolution.
//!
//! PMU sync creates one raw horse record per race appearance, so the same
//! horse shows up many times. The merge job groups those records by exact
//! name and folds every group into a single canonical horse with career
//! statistics pooled from all of the group's past performances.

pub mod aggregate;
pub mod resolver;

pub use resolver::{FailurePolicy, HorseResolver, MergeError, MergeReport};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One horse record as ingested for a single race appearance.
#[derive(Debug, Clone, PartialEq)]
pub struct RawHorseRecord {
    pub id: i64,
    /// Join key for identity resolution. Never normalized.
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub age: Option<u8>,
    pub sex: Option<String>,
    pub jockey: Option<String>,
    pub trainer: Option<String>,
    pub total_earnings: Option<f64>,
    /// PMU "musique"
    pub recent_form: Option<String>,
    /// Date of the race this record was ingested for
    pub race_date: Option<NaiveDate>,
}

/// A past race of a horse, attached to one raw record.
#[derive(Debug, Clone, PartialEq)]
pub struct RacePerformance {
    pub id: i64,
    pub horse_id: i64,
    pub date: NaiveDate,
    pub arrival_position: Option<u32>,
    pub jockey: Option<String>,
    pub trainer: Option<String>,
}

/// Deduplicated horse, one per distinct name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalHorse {
    pub name: String,
    pub age: Option<u8>,
    pub sex: Option<String>,
    pub current_jockey: Option<String>,
    pub current_trainer: Option<String>,
    pub total_earnings: f64,
    pub career_starts: u32,
    pub career_wins: u32,
    pub career_places: u32,
    pub recent_form: Option<String>,
    pub last_race_date: Option<NaiveDate>,
}

/// Whether an upsert inserted a new canonical horse or overwrote one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

/// Errors raised by store adapters.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Failed to create database directory: {0}")]
    CreateDir(std::io::Error),
}

/// Store the resolver reads raw data from and writes canonical horses to.
pub trait HorseStore {
    /// All raw horse records, most recently created first.
    fn list_raw_horses(&self) -> Result<Vec<RawHorseRecord>, StoreError>;

    /// Performances attached to any of `horse_ids`, latest race first.
    fn list_performances_for(&self, horse_ids: &[i64]) -> Result<Vec<RacePerformance>, StoreError>;

    /// Insert or fully overwrite the canonical horse keyed by its name.
    fn upsert_canonical_horse(&self, horse: &CanonicalHorse) -> Result<UpsertOutcome, StoreError>;
}
