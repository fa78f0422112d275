//! PMU program snapshot import.
//!
//! A snapshot is the JSON dump of one or more PMU race programs. Every
//! participant becomes a raw horse record tied to its race, and every item of
//! the participant's history becomes a past performance of that record.
//!
//! Each race is written in its own transaction. A race already in the store
//! is skipped whole, so importing the same snapshot again adds no raw records.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::storage::{HorseRepository, NewPerformance, NewRace, NewRawHorse};

#[derive(Debug, Clone, Deserialize)]
pub struct PmuSnapshot {
    #[serde(default)]
    pub races: Vec<SnapshotRace>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotRace {
    pub race_id: String,
    pub date: NaiveDate,
    pub hippodrome: Option<String>,
    pub race_name: Option<String>,
    #[serde(default)]
    pub participants: Vec<Participant>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Participant {
    pub name: String,
    pub age: Option<u8>,
    pub sex: Option<String>,
    pub jockey: Option<String>,
    pub trainer: Option<String>,
    pub total_earnings: Option<f64>,
    pub musique: Option<String>,
    #[serde(default)]
    pub history: Vec<HistoryItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryItem {
    pub date: NaiveDate,
    pub arrival_position: Option<u32>,
    pub jockey: Option<String>,
    pub trainer: Option<String>,
}

/// Counts of rows written by an import
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportSummary {
    pub races: usize,
    pub horses: usize,
    pub performances: usize,
    /// Unnamed participants
    pub skipped: usize,
    /// Races already in the store
    pub skipped_races: usize,
}

impl ImportSummary {
    fn add(&mut self, other: &ImportSummary) {
        self.races += other.races;
        self.horses += other.horses;
        self.performances += other.performances;
        self.skipped += other.skipped;
        self.skipped_races += other.skipped_races;
    }
}

/// Read a snapshot file
pub fn load_snapshot(path: &Path) -> Result<PmuSnapshot> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
}

/// Write a snapshot into the store, stamping every raw record with `ingested_at`
pub fn import_snapshot(
    repo: &HorseRepository,
    snapshot: &PmuSnapshot,
    ingested_at: DateTime<Utc>,
) -> Result<ImportSummary> {
    let mut summary = ImportSummary::default();

    for race in &snapshot.races {
        if repo.race_exists(&race.race_id)? {
            info!("Race {} already imported, skipping", race.race_id);
            summary.skipped_races += 1;
            continue;
        }

        let written = repo
            .in_transaction(|repo| import_race(repo, race, ingested_at))
            .with_context(|| format!("failed to import race {}", race.race_id))?;
        summary.add(&written);

        debug!(
            "Imported race {} ({} participants)",
            race.race_id,
            race.participants.len()
        );
    }

    info!(
        "Imported {} races, {} horses, {} performances ({} races already present)",
        summary.races, summary.horses, summary.performances, summary.skipped_races
    );

    Ok(summary)
}

fn import_race(
    repo: &HorseRepository,
    race: &SnapshotRace,
    ingested_at: DateTime<Utc>,
) -> Result<ImportSummary> {
    let mut summary = ImportSummary::default();

    repo.insert_race(&NewRace {
        race_id: race.race_id.clone(),
        race_date: race.date,
        hippodrome: race.hippodrome.clone(),
        race_name: race.race_name.clone(),
    })
    .with_context(|| format!("failed to store race {}", race.race_id))?;
    summary.races += 1;

    for participant in &race.participants {
        // An empty name cannot join any group
        if participant.name.is_empty() {
            warn!("Skipping unnamed participant in race {}", race.race_id);
            summary.skipped += 1;
            continue;
        }

        let horse_id = repo
            .insert_raw_horse(&NewRawHorse {
                race_id: Some(race.race_id.clone()),
                name: participant.name.clone(),
                age: participant.age,
                sex: participant.sex.clone(),
                jockey: participant.jockey.clone(),
                trainer: participant.trainer.clone(),
                total_earnings: participant.total_earnings,
                recent_form: participant.musique.clone(),
                created_at: ingested_at,
            })
            .with_context(|| format!("failed to store horse {}", participant.name))?;
        summary.horses += 1;

        for item in &participant.history {
            repo.insert_performance(
                horse_id,
                &NewPerformance {
                    date: item.date,
                    arrival_position: item.arrival_position,
                    jockey: item.jockey.clone(),
                    trainer: item.trainer.clone(),
                },
            )?;
            summary.performances += 1;
        }
    }

    Ok(summary)
}
