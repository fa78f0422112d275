//! Weekly trigger for the horse merge job.

use anyhow::{anyhow, Context};
use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Utc, Weekday};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{error, info};

use crate::merge::{FailurePolicy, HorseResolver, MergeReport};
use crate::storage::HorseRepository;

/// A fixed weekly slot, in UTC
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeeklySchedule {
    weekday: Weekday,
    time: NaiveTime,
}

impl WeeklySchedule {
    pub fn new(weekday: Weekday, hour: u32, minute: u32) -> anyhow::Result<Self> {
        let time = NaiveTime::from_hms_opt(hour, minute, 0)
            .ok_or_else(|| anyhow!("invalid merge time {:02}:{:02}", hour, minute))?;
        Ok(Self { weekday, time })
    }

    /// First slot strictly after `now`
    pub fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = now.date_naive();
        let target = self.weekday.num_days_from_monday();
        let current = today.weekday().num_days_from_monday();
        let days_ahead = (7 + target - current) % 7;
        let date = today + Duration::days(i64::from(days_ahead));
        let candidate = Utc.from_utc_datetime(&date.and_time(self.time));

        if candidate > now {
            candidate
        } else {
            candidate + Duration::weeks(1)
        }
    }
}

/// Shutdown flag shared by the server and the merge loop.
pub fn shutdown_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// Flip the shutdown flag on the first Ctrl-C.
///
/// This is the only place the process listens for SIGINT.
pub fn spawn_ctrl_c_listener(shutdown: watch::Sender<bool>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            let _ = shutdown.send(true);
        }
    });
}

/// Resolves once shutdown is requested or every sender is gone.
pub async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            break;
        }
    }
}

/// Run one merge pass against the shared repository.
///
/// The SQLite work runs on the blocking pool while the repository lock is held.
pub async fn run_merge(
    repo: Arc<Mutex<HorseRepository>>,
    policy: FailurePolicy,
) -> anyhow::Result<MergeReport> {
    let guard = repo.lock_owned().await;
    let report = tokio::task::spawn_blocking(move || {
        HorseResolver::new(&*guard).with_policy(policy).resolve_all()
    })
    .await
    .context("merge task did not complete")??;
    Ok(report)
}

/// Merge on every weekly slot until shutdown is requested.
pub async fn run_weekly(
    repo: Arc<Mutex<HorseRepository>>,
    schedule: WeeklySchedule,
    policy: FailurePolicy,
    shutdown: watch::Receiver<bool>,
) {
    run_on_schedule(repo, policy, shutdown, move |now| schedule.next_after(now)).await
}

/// Merge loop driven by `next_slot`, checked between runs for shutdown.
pub async fn run_on_schedule<F>(
    repo: Arc<Mutex<HorseRepository>>,
    policy: FailurePolicy,
    shutdown: watch::Receiver<bool>,
    mut next_slot: F,
) where
    F: FnMut(DateTime<Utc>) -> DateTime<Utc>,
{
    loop {
        let now = Utc::now();
        let next = next_slot(now);
        let wait = (next - now).to_std().unwrap_or_default();
        info!("Next horse merge scheduled at {}", next);

        tokio::select! {
            _ = wait_for_shutdown(shutdown.clone()) => {
                info!("Stopping merge scheduler");
                break;
            }
            _ = tokio::time::sleep(wait) => {
                match run_merge(repo.clone(), policy).await {
                    Ok(report) => info!(
                        "Scheduled merge done: {} created, {} updated, {} failed",
                        report.created,
                        report.updated,
                        report.failures.len()
                    ),
                    Err(e) => error!("Scheduled merge failed: {:#}", e),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::NewRawHorse;
    use std::time::Duration as StdDuration;

    fn utc(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        // June 2024: the 2nd is a Sunday
        Utc.with_ymd_and_hms(2024, 6, day, hour, minute, 0).unwrap()
    }

    fn repo_with_one_horse() -> Arc<Mutex<HorseRepository>> {
        let repo = HorseRepository::in_memory().unwrap();
        repo.insert_raw_horse(&NewRawHorse {
            race_id: None,
            name: "GALOPIN DES CHAMPS".to_string(),
            age: Some(8),
            sex: Some("H".to_string()),
            jockey: None,
            trainer: None,
            total_earnings: Some(42.0),
            recent_form: None,
            created_at: utc(1, 10, 0),
        })
        .unwrap();
        Arc::new(Mutex::new(repo))
    }

    #[test]
    fn test_next_after_later_in_week() {
        let schedule = WeeklySchedule::new(Weekday::Sun, 0, 0).unwrap();
        assert_eq!(schedule.next_after(utc(5, 14, 30)), utc(9, 0, 0));
    }

    #[test]
    fn test_next_after_same_day_before_slot() {
        let schedule = WeeklySchedule::new(Weekday::Wed, 18, 45).unwrap();
        assert_eq!(schedule.next_after(utc(5, 9, 0)), utc(5, 18, 45));
    }

    #[test]
    fn test_next_after_exactly_on_slot_moves_a_week() {
        let schedule = WeeklySchedule::new(Weekday::Sun, 0, 0).unwrap();
        assert_eq!(schedule.next_after(utc(2, 0, 0)), utc(9, 0, 0));
    }

    #[test]
    fn test_next_after_same_day_past_slot() {
        let schedule = WeeklySchedule::new(Weekday::Mon, 6, 0).unwrap();
        assert_eq!(schedule.next_after(utc(3, 7, 0)), utc(10, 6, 0));
    }

    #[test]
    fn test_invalid_time_rejected() {
        assert!(WeeklySchedule::new(Weekday::Sun, 24, 0).is_err());
        assert!(WeeklySchedule::new(Weekday::Sun, 0, 60).is_err());
    }

    #[tokio::test]
    async fn test_run_merge_uses_shared_repository() {
        let repo = repo_with_one_horse();

        let report = run_merge(repo.clone(), FailurePolicy::FailFast)
            .await
            .unwrap();
        assert_eq!(report.created, 1);

        let guard = repo.lock().await;
        assert_eq!(guard.unique_horse_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_wait_for_shutdown_returns_once_flag_is_set() {
        let (tx, rx) = shutdown_channel();
        tx.send(true).unwrap();

        tokio::time::timeout(StdDuration::from_secs(1), wait_for_shutdown(rx))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_for_shutdown_returns_when_sender_dropped() {
        let (tx, rx) = shutdown_channel();
        drop(tx);

        tokio::time::timeout(StdDuration::from_secs(1), wait_for_shutdown(rx))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_weekly_loop_stops_on_shutdown() {
        let repo = repo_with_one_horse();
        let schedule = WeeklySchedule::new(Weekday::Sun, 0, 0).unwrap();
        let (tx, rx) = shutdown_channel();

        let handle = tokio::spawn(run_weekly(
            repo.clone(),
            schedule,
            FailurePolicy::FailFast,
            rx,
        ));
        tx.send(true).unwrap();

        tokio::time::timeout(StdDuration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();

        // Stopped before the next weekly slot, so nothing was merged
        assert_eq!(repo.lock().await.unique_horse_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_scheduled_slot_runs_merge_then_stops() {
        let repo = repo_with_one_horse();
        let (tx, rx) = shutdown_channel();

        // First slot is imminent; asking for the second means the first merge finished
        let mut slots = 0;
        let next_slot = move |now: DateTime<Utc>| {
            slots += 1;
            if slots == 1 {
                now + Duration::milliseconds(20)
            } else {
                let _ = tx.send(true);
                now + Duration::hours(1)
            }
        };

        tokio::time::timeout(
            StdDuration::from_secs(5),
            run_on_schedule(repo.clone(), FailurePolicy::FailFast, rx, next_slot),
        )
        .await
        .unwrap();

        let guard = repo.lock().await;
        assert_eq!(guard.unique_horse_count().unwrap(), 1);
        assert!(guard.get_unique_horse("GALOPIN DES CHAMPS").unwrap().is_some());
    }
}
