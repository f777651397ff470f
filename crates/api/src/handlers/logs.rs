//! Handlers for the mirrored engine conversation logs.

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use longrun_db::models::engine_log::DEFAULT_LIMIT;
use serde::Deserialize;
use serde_json::json;

use crate::error::AppResult;
use crate::state::AppState;

/// Query parameters for `GET /logs`.
#[derive(Debug, Default, Deserialize)]
pub struct LogListQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

/// GET /api/v1/logs
///
/// One page of logs, newest first. `page` is 1-based; `limit` is clamped
/// by the store.
pub async fn list_logs(
    State(state): State<AppState>,
    Query(params): Query<LogListQuery>,
) -> AppResult<impl IntoResponse> {
    let page = state
        .logs
        .page(params.page.unwrap_or(1), params.limit.unwrap_or(DEFAULT_LIMIT))
        .await?;
    Ok(Json(page))
}

/// POST /api/v1/logs/fetch
///
/// Run one sync cycle now instead of waiting for the background task.
pub async fn fetch_logs(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let report = state.log_sync.run_once().await?;

    let message = if report.skipped {
        "Log fetching is only available for chat apps".to_string()
    } else {
        format!(
            "Fetched {} messages from {} conversations",
            report.messages, report.conversations
        )
    };

    Ok(Json(json!({
        "success": true,
        "message": message,
        "fetched": report.messages,
        "timestamp": Utc::now(),
    })))
}
