//! SQLite repository for raw horse records and canonical horses

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::path::Path;

use super::schema::create_tables;
use crate::merge::{
    CanonicalHorse, HorseStore, RacePerformance, RawHorseRecord, StoreError, UpsertOutcome,
};

type StoreResult<T> = std::result::Result<T, StoreError>;

/// PMU race a batch of raw horse records belongs to
#[derive(Debug, Clone)]
pub struct NewRace {
    pub race_id: String,
    pub race_date: NaiveDate,
    pub hippodrome: Option<String>,
    pub race_name: Option<String>,
}

/// Raw horse record to insert
#[derive(Debug, Clone)]
pub struct NewRawHorse {
    pub race_id: Option<String>,
    pub name: String,
    pub age: Option<u8>,
    pub sex: Option<String>,
    pub jockey: Option<String>,
    pub trainer: Option<String>,
    pub total_earnings: Option<f64>,
    pub recent_form: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Past race to attach to a raw horse record
#[derive(Debug, Clone)]
pub struct NewPerformance {
    pub date: NaiveDate,
    pub arrival_position: Option<u32>,
    pub jockey: Option<String>,
    pub trainer: Option<String>,
}

/// Repository for the horse registry
pub struct HorseRepository {
    conn: Connection,
}

impl HorseRepository {
    /// Create a new repository, initializing the database if needed
    pub fn new(db_path: &Path) -> StoreResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(StoreError::CreateDir)?;
        }

        let conn = Connection::open(db_path)?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        create_tables(&conn)?;

        Ok(Self { conn })
    }

    /// Create an in-memory repository (for testing)
    #[cfg(test)]
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        create_tables(&conn)?;
        Ok(Self { conn })
    }

    // ==================== Insert Operations ====================

    /// Insert a race (upsert)
    pub fn insert_race(&self, race: &NewRace) -> StoreResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO races (race_id, race_date, hippodrome, race_name)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(race_id) DO UPDATE SET
                race_date = excluded.race_date,
                hippodrome = excluded.hippodrome,
                race_name = excluded.race_name
            "#,
            params![
                race.race_id,
                race.race_date,
                race.hippodrome,
                race.race_name
            ],
        )?;
        Ok(())
    }

    /// Insert a raw horse record, returning its id
    pub fn insert_raw_horse(&self, horse: &NewRawHorse) -> StoreResult<i64> {
        self.conn.execute(
            r#"
            INSERT INTO horses
            (race_id, name, age, sex, jockey, trainer, total_earnings, recent_form, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                horse.race_id,
                horse.name,
                horse.age,
                horse.sex,
                horse.jockey,
                horse.trainer,
                horse.total_earnings,
                horse.recent_form,
                horse.created_at,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Attach a past performance to a raw horse record, returning its id
    pub fn insert_performance(&self, horse_id: i64, perf: &NewPerformance) -> StoreResult<i64> {
        self.conn.execute(
            r#"
            INSERT INTO horse_performances
            (horse_id, race_date, arrival_position, jockey, trainer)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                horse_id,
                perf.date,
                perf.arrival_position,
                perf.jockey,
                perf.trainer,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Run `f` in one transaction; nothing it wrote is kept if it returns an error.
    ///
    /// `f` must not call `upsert_canonical_horse`, which opens its own transaction.
    pub fn in_transaction<T, E>(&self, f: impl FnOnce(&Self) -> Result<T, E>) -> Result<T, E>
    where
        E: From<rusqlite::Error>,
    {
        let tx = self.conn.unchecked_transaction()?;
        let value = f(self)?;
        tx.commit()?;
        Ok(value)
    }

    // ==================== Query Operations ====================

    /// Check if a race exists
    pub fn race_exists(&self, race_id: &str) -> StoreResult<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM races WHERE race_id = ?1",
            [race_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Get a canonical horse by exact name
    pub fn get_unique_horse(&self, name: &str) -> StoreResult<Option<CanonicalHorse>> {
        let horse = self
            .conn
            .query_row(
                &format!("{} WHERE name = ?1", SELECT_UNIQUE_HORSES),
                [name],
                canonical_from_row,
            )
            .optional()?;
        Ok(horse)
    }

    /// List all canonical horses ordered by name
    pub fn list_unique_horses(&self) -> StoreResult<Vec<CanonicalHorse>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{} ORDER BY name", SELECT_UNIQUE_HORSES))?;
        let horses = stmt
            .query_map([], canonical_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(horses)
    }

    /// Get raw horse record count
    pub fn raw_horse_count(&self) -> StoreResult<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM horses", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Get canonical horse count
    pub fn unique_horse_count(&self) -> StoreResult<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM unique_horses", [], |row| row.get(0))?;
        Ok(count)
    }
}

const SELECT_UNIQUE_HORSES: &str = r#"
    SELECT name, age, sex, current_jockey, current_trainer, total_earnings,
           career_starts, career_wins, career_places, recent_form, last_race_date
    FROM unique_horses
"#;

fn canonical_from_row(row: &Row<'_>) -> rusqlite::Result<CanonicalHorse> {
    Ok(CanonicalHorse {
        name: row.get(0)?,
        age: row.get(1)?,
        sex: row.get(2)?,
        current_jockey: row.get(3)?,
        current_trainer: row.get(4)?,
        total_earnings: row.get(5)?,
        career_starts: row.get(6)?,
        career_wins: row.get(7)?,
        career_places: row.get(8)?,
        recent_form: row.get(9)?,
        last_race_date: row.get(10)?,
    })
}

impl HorseStore for HorseRepository {
    fn list_raw_horses(&self) -> StoreResult<Vec<RawHorseRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT h.id, h.name, h.created_at, h.age, h.sex, h.jockey, h.trainer,
                   h.total_earnings, h.recent_form, r.race_date
            FROM horses h
            LEFT JOIN races r ON r.race_id = h.race_id
            ORDER BY h.created_at DESC, h.id DESC
            "#,
        )?;

        let records = stmt
            .query_map([], |row| {
                Ok(RawHorseRecord {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    created_at: row.get(2)?,
                    age: row.get(3)?,
                    sex: row.get(4)?,
                    jockey: row.get(5)?,
                    trainer: row.get(6)?,
                    total_earnings: row.get(7)?,
                    recent_form: row.get(8)?,
                    race_date: row.get(9)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(records)
    }

    fn list_performances_for(&self, horse_ids: &[i64]) -> StoreResult<Vec<RacePerformance>> {
        if horse_ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; horse_ids.len()].join(", ");
        let mut stmt = self.conn.prepare(&format!(
            r#"
            SELECT id, horse_id, race_date, arrival_position, jockey, trainer
            FROM horse_performances
            WHERE horse_id IN ({})
            ORDER BY race_date DESC, id DESC
            "#,
            placeholders
        ))?;

        let performances = stmt
            .query_map(params_from_iter(horse_ids.iter()), |row| {
                Ok(RacePerformance {
                    id: row.get(0)?,
                    horse_id: row.get(1)?,
                    date: row.get(2)?,
                    arrival_position: row.get(3)?,
                    jockey: row.get(4)?,
                    trainer: row.get(5)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(performances)
    }

    fn upsert_canonical_horse(&self, horse: &CanonicalHorse) -> StoreResult<UpsertOutcome> {
        let tx = self.conn.unchecked_transaction()?;

        let exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM unique_horses WHERE name = ?1)",
            [&horse.name],
            |row| row.get(0),
        )?;

        tx.execute(
            r#"
            INSERT INTO unique_horses
            (name, age, sex, current_jockey, current_trainer, total_earnings,
             career_starts, career_wins, career_places, recent_form, last_race_date)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT(name) DO UPDATE SET
                age = excluded.age,
                sex = excluded.sex,
                current_jockey = excluded.current_jockey,
                current_trainer = excluded.current_trainer,
                total_earnings = excluded.total_earnings,
                career_starts = excluded.career_starts,
                career_wins = excluded.career_wins,
                career_places = excluded.career_places,
                recent_form = excluded.recent_form,
                last_race_date = excluded.last_race_date,
                updated_at = datetime('now')
            "#,
            params![
                horse.name,
                horse.age,
                horse.sex,
                horse.current_jockey,
                horse.current_trainer,
                horse.total_earnings,
                horse.career_starts,
                horse.career_wins,
                horse.career_places,
                horse.recent_form,
                horse.last_race_date,
            ],
        )?;

        tx.commit()?;

        Ok(if exists {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Created
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::HorseResolver;
    use chrono::TimeZone;

    fn create_test_race(race_id: &str, day: u32) -> NewRace {
        NewRace {
            race_id: race_id.to_string(),
            race_date: NaiveDate::from_ymd_opt(2024, 6, day).unwrap(),
            hippodrome: Some("VINCENNES".to_string()),
            race_name: Some("PRIX DE BELGIQUE".to_string()),
        }
    }

    fn create_test_horse(name: &str, race_id: &str, hour: u32) -> NewRawHorse {
        NewRawHorse {
            race_id: Some(race_id.to_string()),
            name: name.to_string(),
            age: Some(6),
            sex: Some("M".to_string()),
            jockey: None,
            trainer: None,
            total_earnings: None,
            recent_form: Some("Da1a2a".to_string()),
            created_at: Utc.with_ymd_and_hms(2024, 6, 10, hour, 0, 0).unwrap(),
        }
    }

    fn perf(day: u32, position: Option<u32>, jockey: Option<&str>) -> NewPerformance {
        NewPerformance {
            date: NaiveDate::from_ymd_opt(2024, 5, day).unwrap(),
            arrival_position: position,
            jockey: jockey.map(str::to_string),
            trainer: None,
        }
    }

    #[test]
    fn test_new_creates_database_directory() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("nested").join("bettracker.db");

        let repo = HorseRepository::new(&db_path).unwrap();
        assert!(db_path.exists());
        assert_eq!(repo.raw_horse_count().unwrap(), 0);
    }

    #[test]
    fn test_list_raw_horses_newest_first_with_race_date() {
        let repo = HorseRepository::in_memory().unwrap();
        repo.insert_race(&create_test_race("R1", 1)).unwrap();
        repo.insert_race(&create_test_race("R2", 8)).unwrap();

        repo.insert_raw_horse(&create_test_horse("IDAO DE TILLARD", "R1", 8))
            .unwrap();
        repo.insert_raw_horse(&create_test_horse("IDAO DE TILLARD", "R2", 9))
            .unwrap();

        let records = repo.list_raw_horses().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].race_date, NaiveDate::from_ymd_opt(2024, 6, 8));
        assert_eq!(records[1].race_date, NaiveDate::from_ymd_opt(2024, 6, 1));
        assert!(records[0].created_at > records[1].created_at);
    }

    #[test]
    fn test_raw_horse_without_race_has_no_race_date() {
        let repo = HorseRepository::in_memory().unwrap();
        let mut horse = create_test_horse("HOKU", "unused", 8);
        horse.race_id = None;
        repo.insert_raw_horse(&horse).unwrap();

        let records = repo.list_raw_horses().unwrap();
        assert_eq!(records[0].race_date, None);
    }

    #[test]
    fn test_list_performances_for_ids() {
        let repo = HorseRepository::in_memory().unwrap();
        repo.insert_race(&create_test_race("R1", 1)).unwrap();
        let a = repo
            .insert_raw_horse(&create_test_horse("A", "R1", 8))
            .unwrap();
        let b = repo
            .insert_raw_horse(&create_test_horse("B", "R1", 8))
            .unwrap();
        let c = repo
            .insert_raw_horse(&create_test_horse("C", "R1", 8))
            .unwrap();

        repo.insert_performance(a, &perf(3, Some(1), None)).unwrap();
        repo.insert_performance(b, &perf(9, Some(2), None)).unwrap();
        repo.insert_performance(c, &perf(5, Some(3), None)).unwrap();

        let perfs = repo.list_performances_for(&[a, b]).unwrap();
        assert_eq!(perfs.len(), 2);
        assert_eq!(perfs[0].horse_id, b);
        assert_eq!(perfs[1].horse_id, a);

        assert!(repo.list_performances_for(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_upsert_reports_created_then_updated() {
        let repo = HorseRepository::in_memory().unwrap();
        let mut horse = CanonicalHorse {
            name: "FACE TIME BOURBON".to_string(),
            age: Some(9),
            sex: Some("M".to_string()),
            current_jockey: Some("B. Goop".to_string()),
            current_trainer: None,
            total_earnings: 3_500_000.0,
            career_starts: 40,
            career_wins: 25,
            career_places: 8,
            recent_form: Some("1a1a".to_string()),
            last_race_date: NaiveDate::from_ymd_opt(2024, 1, 28),
        };

        assert_eq!(
            repo.upsert_canonical_horse(&horse).unwrap(),
            UpsertOutcome::Created
        );

        horse.current_jockey = None;
        horse.career_starts = 41;
        assert_eq!(
            repo.upsert_canonical_horse(&horse).unwrap(),
            UpsertOutcome::Updated
        );

        assert_eq!(repo.unique_horse_count().unwrap(), 1);
        let stored = repo.get_unique_horse("FACE TIME BOURBON").unwrap().unwrap();
        assert_eq!(stored, horse);
    }

    #[test]
    fn test_race_exists() {
        let repo = HorseRepository::in_memory().unwrap();
        assert!(!repo.race_exists("R1").unwrap());

        repo.insert_race(&create_test_race("R1", 1)).unwrap();
        assert!(repo.race_exists("R1").unwrap());
        assert!(!repo.race_exists("R2").unwrap());
    }

    #[test]
    fn test_in_transaction_rolls_back_on_error() {
        let repo = HorseRepository::in_memory().unwrap();

        let result: StoreResult<()> = repo.in_transaction(|repo| {
            repo.insert_race(&create_test_race("R1", 1))?;
            repo.insert_raw_horse(&create_test_horse("HOKU", "R1", 8))?;
            Err(StoreError::Sqlite(rusqlite::Error::QueryReturnedNoRows))
        });
        assert!(result.is_err());

        assert!(!repo.race_exists("R1").unwrap());
        assert_eq!(repo.raw_horse_count().unwrap(), 0);

        let id = repo
            .in_transaction(|repo| {
                repo.insert_race(&create_test_race("R1", 1))?;
                repo.insert_raw_horse(&create_test_horse("HOKU", "R1", 8))
            })
            .unwrap();
        assert!(id > 0);
        assert_eq!(repo.raw_horse_count().unwrap(), 1);
    }

    #[test]
    fn test_get_unique_horse_missing() {
        let repo = HorseRepository::in_memory().unwrap();
        assert!(repo.get_unique_horse("NOBODY").unwrap().is_none());
    }

    #[test]
    fn test_resolver_end_to_end_on_sqlite() {
        let repo = HorseRepository::in_memory().unwrap();
        repo.insert_race(&create_test_race("R1", 1)).unwrap();
        repo.insert_race(&create_test_race("R2", 2)).unwrap();

        let mut older = create_test_horse("IGOR", "R1", 8);
        older.jockey = Some("A".to_string());
        older.total_earnings = Some(100.0);
        let t1 = repo.insert_raw_horse(&older).unwrap();

        let mut newer = create_test_horse("IGOR", "R2", 9);
        newer.jockey = Some("B".to_string());
        newer.total_earnings = Some(50.0);
        let t2 = repo.insert_raw_horse(&newer).unwrap();

        repo.insert_raw_horse(&create_test_horse("JAG DE BELLOUET", "R2", 9))
            .unwrap();

        repo.insert_performance(t2, &perf(20, Some(1), None))
            .unwrap();
        repo.insert_performance(t1, &perf(10, Some(3), Some("A")))
            .unwrap();

        let report = HorseResolver::new(&repo).resolve_all().unwrap();
        assert_eq!(report.groups, 2);
        assert_eq!(report.created, 2);

        let igor = repo.get_unique_horse("IGOR").unwrap().unwrap();
        assert_eq!(igor.total_earnings, 150.0);
        assert_eq!(igor.career_starts, 2);
        assert_eq!(igor.career_wins, 1);
        assert_eq!(igor.career_places, 1);
        assert_eq!(igor.current_jockey.as_deref(), Some("B"));
        assert_eq!(igor.last_race_date, NaiveDate::from_ymd_opt(2024, 5, 20));

        let jag = repo.get_unique_horse("JAG DE BELLOUET").unwrap().unwrap();
        assert_eq!(jag.career_starts, 0);
        assert_eq!(jag.last_race_date, NaiveDate::from_ymd_opt(2024, 6, 2));

        // Second run overwrites with identical values
        let before = repo.list_unique_horses().unwrap();
        let again = HorseResolver::new(&repo).resolve_all().unwrap();
        assert_eq!(again.created, 0);
        assert_eq!(again.updated, 2);
        assert_eq!(repo.list_unique_horses().unwrap(), before);
    }
}
