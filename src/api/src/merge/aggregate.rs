//! Grouping raw records by name and folding each group into a canonical horse.

use std::collections::{BTreeMap, HashSet};

use super::{CanonicalHorse, RacePerformance, RawHorseRecord};

/// All raw records sharing one exact name, most recent first.
#[derive(Debug, Clone)]
pub struct HorseGroup {
    pub name: String,
    pub records: Vec<RawHorseRecord>,
}

impl HorseGroup {
    /// The record with the greatest `(created_at, id)`.
    pub fn latest(&self) -> Option<&RawHorseRecord> {
        self.records.first()
    }

    /// Ids of every raw record in the group.
    pub fn horse_ids(&self) -> Vec<i64> {
        self.records.iter().map(|r| r.id).collect()
    }
}

/// Partition records by exact name.
///
/// Groups come back ordered by name, and records inside a group are ordered
/// by `created_at` descending with the higher id winning ties, regardless of
/// the order the store returned them in.
pub fn group_by_name(records: Vec<RawHorseRecord>) -> Vec<HorseGroup> {
    let mut by_name: BTreeMap<String, Vec<RawHorseRecord>> = BTreeMap::new();
    for record in records {
        by_name.entry(record.name.clone()).or_default().push(record);
    }

    by_name
        .into_iter()
        .map(|(name, mut records)| {
            records.sort_by(|a, b| {
                b.created_at
                    .cmp(&a.created_at)
                    .then_with(|| b.id.cmp(&a.id))
            });
            HorseGroup { name, records }
        })
        .collect()
}

/// Fold a group and its pooled performances into one canonical horse.
///
/// Performances not attached to one of the group's records are ignored.
pub fn aggregate_group(group: &HorseGroup, performances: &[RacePerformance]) -> CanonicalHorse {
    let ids: HashSet<i64> = group.records.iter().map(|r| r.id).collect();
    let pooled: Vec<&RacePerformance> = performances
        .iter()
        .filter(|p| ids.contains(&p.horse_id))
        .collect();

    let latest_record = group.latest();
    let latest_race = pooled
        .iter()
        .copied()
        .max_by(|a, b| a.date.cmp(&b.date).then_with(|| a.id.cmp(&b.id)));

    let career_wins = pooled
        .iter()
        .filter(|p| p.arrival_position == Some(1))
        .count();
    let career_places = pooled
        .iter()
        .filter(|p| matches!(p.arrival_position, Some(2..=3)))
        .count();

    let total_earnings: f64 = group
        .records
        .iter()
        .map(|r| r.total_earnings.unwrap_or(0.0))
        .sum();

    let current_jockey = latest_race
        .and_then(|p| p.jockey.clone())
        .or_else(|| latest_record.and_then(|r| r.jockey.clone()));
    let current_trainer = latest_race
        .and_then(|p| p.trainer.clone())
        .or_else(|| latest_record.and_then(|r| r.trainer.clone()));
    let last_race_date = latest_race
        .map(|p| p.date)
        .or_else(|| latest_record.and_then(|r| r.race_date));

    CanonicalHorse {
        name: group.name.clone(),
        age: latest_record.and_then(|r| r.age),
        sex: latest_record.and_then(|r| r.sex.clone()),
        current_jockey,
        current_trainer,
        total_earnings,
        career_starts: saturating_u32(pooled.len()),
        career_wins: saturating_u32(career_wins),
        career_places: saturating_u32(career_places),
        recent_form: latest_record.and_then(|r| r.recent_form.clone()),
        last_race_date,
    }
}

fn saturating_u32(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}
