//! Request and response types for the BetTracker API.

use serde::{Deserialize, Serialize};

use crate::merge::CanonicalHorse;

/// Query parameters for the admin merge endpoint
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MergeQuery {
    /// Keep going past a failing horse instead of aborting the run
    #[serde(default)]
    pub skip_failures: bool,
}

/// Canonical horse listing
#[derive(Debug, Clone, Serialize)]
pub struct UniqueHorsesResponse {
    pub count: usize,
    pub horses: Vec<CanonicalHorse>,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}
