//! Runs one full merge pass against a [`HorseStore`].

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::aggregate::{aggregate_group, group_by_name, HorseGroup};
use super::{HorseStore, StoreError, UpsertOutcome};

/// What to do when reading or writing one group fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Abort the run on the first failing group. Groups already upserted stay.
    #[default]
    FailFast,
    /// Record the failure in the report and move on to the next group.
    SkipAndContinue,
}

/// Errors that abort a merge run.
#[derive(Debug, Error)]
pub enum MergeError {
    #[error("failed to list raw horses: {0}")]
    ListRawHorses(#[source] StoreError),

    /// Fail-fast abort. `partial` counts the groups upserted before `name`.
    #[error("failed to merge horse {name:?}: {source}")]
    Group {
        name: String,
        #[source]
        source: StoreError,
        partial: Box<MergeReport>,
    },
}

impl MergeError {
    /// What was already written when the run aborted, if anything was attempted.
    pub fn partial_report(&self) -> Option<&MergeReport> {
        match self {
            MergeError::ListRawHorses(_) => None,
            MergeError::Group { partial, .. } => Some(&**partial),
        }
    }
}

/// A group skipped under [`FailurePolicy::SkipAndContinue`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupFailure {
    pub name: String,
    pub error: String,
}

/// Outcome of a merge run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MergeReport {
    pub raw_records: usize,
    pub groups: usize,
    pub created: usize,
    pub updated: usize,
    pub failures: Vec<GroupFailure>,
}

/// Resolves every raw horse record into canonical horses.
pub struct HorseResolver<'a, S: HorseStore + ?Sized> {
    store: &'a S,
    policy: FailurePolicy,
}

impl<'a, S: HorseStore + ?Sized> HorseResolver<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self {
            store,
            policy: FailurePolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Group all raw records by name and upsert one canonical horse per group.
    ///
    /// Groups are processed one after another in name order.
    pub fn resolve_all(&self) -> Result<MergeReport, MergeError> {
        let raw = self
            .store
            .list_raw_horses()
            .map_err(MergeError::ListRawHorses)?;
        let raw_records = raw.len();
        let groups = group_by_name(raw);

        info!(
            "Merging {} raw horse records into {} unique horses",
            raw_records,
            groups.len()
        );

        let mut report = MergeReport {
            raw_records,
            groups: groups.len(),
            ..Default::default()
        };

        for group in &groups {
            match self.resolve_group(group) {
                Ok(UpsertOutcome::Created) => report.created += 1,
                Ok(UpsertOutcome::Updated) => report.updated += 1,
                Err(e) => match self.policy {
                    FailurePolicy::FailFast => {
                        error!(
                            "Merge aborted at {:?} after {} created, {} updated: {}",
                            group.name, report.created, report.updated, e
                        );
                        return Err(MergeError::Group {
                            name: group.name.clone(),
                            source: e,
                            partial: Box::new(report),
                        });
                    }
                    FailurePolicy::SkipAndContinue => {
                        warn!("Skipping {:?}: {}", group.name, e);
                        report.failures.push(GroupFailure {
                            name: group.name.clone(),
                            error: e.to_string(),
                        });
                    }
                },
            }
        }

        info!(
            "Merge finished: {} created, {} updated, {} failed",
            report.created,
            report.updated,
            report.failures.len()
        );

        Ok(report)
    }

    fn resolve_group(&self, group: &HorseGroup) -> Result<UpsertOutcome, StoreError> {
        let performances = self.store.list_performances_for(&group.horse_ids())?;
        let horse = aggregate_group(group, &performances);
        debug!(
            "{}: {} records, {} starts, {} wins",
            horse.name,
            group.records.len(),
            horse.career_starts,
            horse.career_wins
        );
        self.store.upsert_canonical_horse(&horse)
    }
}
