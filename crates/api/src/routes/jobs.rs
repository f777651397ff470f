//! Route definitions for the `/jobs` resource.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::jobs;
use crate::state::AppState;

/// Routes mounted at `/jobs`.
///
/// ```text
/// GET    /                -> list_jobs
/// POST   /start           -> start_job
/// GET    /{id}            -> get_job
/// DELETE /{id}            -> cancel_job
/// GET    /{id}/events     -> job_events
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(jobs::list_jobs))
        .route("/start", post(jobs::start_job))
        .route("/{id}", get(jobs::get_job).delete(jobs::cancel_job))
        .route("/{id}/events", get(jobs::job_events))
}
