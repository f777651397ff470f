use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Overall service status.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    /// Whether the job store is reachable.
    pub db_healthy: bool,
    pub engine: EngineHealth,
}

/// Whether the engine connection is configured. Values are never echoed.
#[derive(Serialize)]
pub struct EngineHealth {
    pub base_url_set: bool,
    pub api_key_set: bool,
}

/// GET /health -- returns service, store and engine configuration health.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let db_healthy = match state.jobs.ping().await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "Health check: job store unreachable");
            false
        }
    };
    let engine = EngineHealth {
        base_url_set: !state.config.engine_base_url.trim().is_empty(),
        api_key_set: !state.config.engine_api_key.trim().is_empty(),
    };

    let status = if db_healthy && engine.base_url_set && engine.api_key_set {
        "ok"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        db_healthy,
        engine,
    })
}

/// Mount health check routes (intended for root-level, NOT under `/api/v1`).
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
