//! SQLite schema definitions for the horse registry
//!
//! Tables:
//! - races: PMU races the raw horse records were synced from
//! - horses: Raw horse records, one per race appearance (names repeat)
//! - horse_performances: Past races attached to a raw horse record
//! - unique_horses: Canonical horses produced by the merge job

use rusqlite::{Connection, Result};

/// Create all tables in the database
pub fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS races (
            race_id TEXT PRIMARY KEY,
            race_date TEXT NOT NULL,
            hippodrome TEXT,
            race_name TEXT,
            created_at TEXT DEFAULT (datetime('now'))
        )
        "#,
        [],
    )?;

    // Raw records: one row per horse per synced race
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS horses (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            race_id TEXT REFERENCES races(race_id),
            name TEXT NOT NULL,
            age INTEGER,
            sex TEXT,
            jockey TEXT,
            trainer TEXT,
            total_earnings REAL,
            recent_form TEXT,
            created_at TEXT NOT NULL
        )
        "#,
        [],
    )?;

    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS horse_performances (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            horse_id INTEGER NOT NULL REFERENCES horses(id),
            race_date TEXT NOT NULL,
            arrival_position INTEGER,
            jockey TEXT,
            trainer TEXT
        )
        "#,
        [],
    )?;

    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS unique_horses (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            age INTEGER,
            sex TEXT,
            current_jockey TEXT,
            current_trainer TEXT,
            total_earnings REAL NOT NULL DEFAULT 0,
            career_starts INTEGER NOT NULL DEFAULT 0,
            career_wins INTEGER NOT NULL DEFAULT 0,
            career_places INTEGER NOT NULL DEFAULT 0,
            recent_form TEXT,
            last_race_date TEXT,
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now'))
        )
        "#,
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_horses_name ON horses(name)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_horses_race ON horses(race_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_performances_horse ON horse_performances(horse_id)",
        [],
    )?;

    Ok(())
}
