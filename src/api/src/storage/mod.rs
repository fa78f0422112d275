//! SQLite storage module for the horse registry
//!
//! Holds synced PMU races, raw horse records with their past performances,
//! and the canonical horses written by the merge job.

pub mod repository;
pub mod schema;

pub use repository::{HorseRepository, NewPerformance, NewRace, NewRawHorse};
