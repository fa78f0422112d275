//! API route handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::merge::{CanonicalHorse, FailurePolicy, MergeError, MergeReport};
use crate::scheduler::run_merge;
use crate::storage::HorseRepository;
use crate::types::{ErrorResponse, HealthResponse, MergeQuery, UniqueHorsesResponse};

/// Application state shared across handlers.
pub struct AppState {
    pub repo: Arc<Mutex<HorseRepository>>,
    pub config: AppConfig,
}

/// Error type for API handlers.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: msg.into(),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: msg.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            error: self.status.to_string(),
            message: self.message,
        });
        (self.status, body).into_response()
    }
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/admin/horses/merge", post(merge_horses))
        .route("/horses/unique", get(list_unique_horses))
        .route("/horses/unique/:name", get(get_unique_horse))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Run the horse merge now.
pub async fn merge_horses(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MergeQuery>,
) -> Result<Json<MergeReport>, ApiError> {
    let policy = if query.skip_failures {
        FailurePolicy::SkipAndContinue
    } else {
        state.config.merge.failure_policy
    };

    tracing::info!("Admin merge requested ({:?})", policy);
    let report = run_merge(state.repo.clone(), policy)
        .await
        .map_err(merge_failure)?;

    Ok(Json(report))
}

fn merge_failure(e: anyhow::Error) -> ApiError {
    let partial = e
        .downcast_ref::<MergeError>()
        .and_then(MergeError::partial_report);
    match partial {
        Some(report) => ApiError::internal(format!(
            "Horse merge failed after {} created, {} updated: {:#}",
            report.created, report.updated, e
        )),
        None => ApiError::internal(format!("Horse merge failed: {:#}", e)),
    }
}

/// List canonical horses.
pub async fn list_unique_horses(
    State(state): State<Arc<AppState>>,
) -> Result<Json<UniqueHorsesResponse>, ApiError> {
    let horses = state
        .repo
        .lock()
        .await
        .list_unique_horses()
        .map_err(|e| ApiError::internal(e.to_string()))?;

    Ok(Json(UniqueHorsesResponse {
        count: horses.len(),
        horses,
    }))
}

/// Get one canonical horse by exact name.
pub async fn get_unique_horse(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<CanonicalHorse>, ApiError> {
    let horse = state
        .repo
        .lock()
        .await
        .get_unique_horse(&name)
        .map_err(|e| ApiError::internal(e.to_string()))?;

    horse
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("No horse named {:?}", name)))
}
