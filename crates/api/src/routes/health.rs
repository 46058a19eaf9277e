use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::invalidator::InvalidatorStatus;
use crate::state::AppState;

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// `ok`, or `degraded` when a collaborator is unavailable.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    /// Whether the SQL capability answers.
    pub sql_healthy: bool,
    /// Downstream cache invalidation, when configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invalidation: Option<InvalidatorStatus>,
}

/// GET /health -- service, database and invalidation health.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let sql_healthy = state.sql.health_check().await.is_ok();
    let invalidation_healthy = state
        .invalidator
        .as_ref()
        .map_or(true, |invalidator| invalidator.is_healthy());

    let status = if sql_healthy && invalidation_healthy {
        "ok"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        sql_healthy,
        invalidation: state.invalidator.as_ref().map(|i| i.status()),
    })
}

/// Mount health check routes (root level, not under `/api/v1`).
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
