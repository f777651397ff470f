//! Handlers for the `/jobs` resource.
//!
//! Starting a job returns as soon as the `pending` record exists; the work
//! itself runs in the orchestrator. Clients follow progress by polling
//! `GET /jobs/{id}` or by subscribing to `GET /jobs/{id}/events`.

use std::convert::Infallible;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use longrun_core::error::CoreError;
use longrun_core::job::StartJobRequest;
use serde_json::json;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// Consecutive not-found polls tolerated by the event stream before it
/// gives up. Covers a client subscribing before the record is visible.
pub const MAX_NOT_FOUND_POLLS: u32 = 10;

fn not_found(id: String) -> AppError {
    AppError::Core(CoreError::NotFound { entity: "Job", id })
}

// ---------------------------------------------------------------------------
// Start
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs/start
///
/// Validate the request, persist a `pending` job and schedule it.
/// Invalid requests are rejected with 400 and no job is created.
pub async fn start_job(
    State(state): State<AppState>,
    payload: Result<Json<StartJobRequest>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    let Json(request) = payload?;
    let job = state.orchestrator.submit(request).await?;

    Ok(Json(json!({
        "success": true,
        "jobId": job.id,
        "message": "Job started successfully",
    })))
}

// ---------------------------------------------------------------------------
// Get
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs/{id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    match state.orchestrator.status(&job_id).await? {
        Some(job) => Ok(Json(job)),
        None => Err(not_found(job_id)),
    }
}

// ---------------------------------------------------------------------------
// Cancel
// ---------------------------------------------------------------------------

/// DELETE /api/v1/jobs/{id}
///
/// Marks a running or pending job as failed. Finished jobs are reported
/// as not found and left untouched.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    match state.orchestrator.cancel(&job_id).await? {
        Some(_) => Ok(Json(json!({
            "success": true,
            "message": "Job cancelled",
        }))),
        None => Err(not_found(job_id)),
    }
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs
///
/// All jobs, newest first.
pub async fn list_jobs(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let jobs = state.orchestrator.list().await?;
    let total = jobs.len();

    Ok(Json(json!({
        "success": true,
        "jobs": jobs,
        "total": total,
    })))
}

// ---------------------------------------------------------------------------
// Progress stream
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs/{id}/events
///
/// Server-sent events carrying the job snapshot on every poll. A `job`
/// event is emitted per poll; the stream ends after the first terminal
/// snapshot. While the job cannot be found an `error` event is emitted,
/// and after [`MAX_NOT_FOUND_POLLS`] consecutive misses the stream ends
/// with `permanent: true`.
pub async fn job_events(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let store = state.jobs.clone();
    let period = state.config.sse_poll_interval();

    tracing::debug!(job_id = %job_id, "Job event stream opened");

    let stream = async_stream::stream! {
        let mut interval = tokio::time::interval(period);
        let mut misses = 0u32;

        loop {
            interval.tick().await;

            match store.get(&job_id).await {
                Ok(Some(job)) => {
                    misses = 0;
                    let terminal = job.status.is_terminal();
                    let data = serde_json::to_string(&job).unwrap_or_default();
                    yield Ok(Event::default().event("job").data(data));

                    if terminal {
                        tracing::debug!(job_id = %job_id, status = %job.status, "Job event stream closed");
                        break;
                    }
                }
                Ok(None) => {
                    misses += 1;
                    let permanent = misses > MAX_NOT_FOUND_POLLS;
                    let data = json!({ "error": "Job not found", "permanent": permanent });
                    yield Ok(Event::default().event("error").data(data.to_string()));

                    if permanent {
                        tracing::warn!(job_id = %job_id, misses, "Job not found, closing event stream");
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(job_id = %job_id, error = %e, "Job event stream poll failed");
                }
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}
