//! Route definitions for the `/logs` resource.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::logs;
use crate::state::AppState;

/// Routes mounted at `/logs`.
///
/// ```text
/// GET    /                -> list_logs
/// POST   /fetch           -> fetch_logs
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(logs::list_logs))
        .route("/fetch", post(logs::fetch_logs))
}
