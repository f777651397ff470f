pub mod health;
pub mod jobs;
pub mod logs;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /jobs                          list
/// /jobs/start                    start (POST)
/// /jobs/{id}                     status (GET), cancel (DELETE)
/// /jobs/{id}/events              progress stream (SSE)
///
/// /logs                          mirrored engine logs (paginated)
/// /logs/fetch                    run a log sync now (POST)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        // Job lifecycle.
        .nest("/jobs", jobs::router())
        // Engine conversation logs.
        .nest("/logs", logs::router())
}
