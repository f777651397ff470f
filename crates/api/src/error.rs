use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use longrun_core::error::CoreError;
use longrun_db::store::StoreError;
use longrun_engine::api::EngineError;
use longrun_pipeline::error::PipelineError;
use serde_json::json;

/// Application-level error type for HTTP handlers.
///
/// Wraps the lower layers' errors and adds HTTP-specific variants.
/// Implements [`IntoResponse`] to produce consistent JSON error responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `longrun_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A job or log store failure that survived the store's retries.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The engine rejected or never answered a request made on behalf of
    /// the caller.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// A request body that could not be read as JSON of the expected shape.
    #[error("Bad request: {0}")]
    BadRequest(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Core(e) => AppError::Core(e),
            PipelineError::Store(e) => AppError::Store(e),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            // --- CoreError variants ---
            AppError::Core(core) => match core {
                CoreError::NotFound { entity, id } => (
                    StatusCode::NOT_FOUND,
                    "NOT_FOUND",
                    format!("{entity} with id {id} not found"),
                ),
                CoreError::Validation(msg) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
                }
            },

            // --- Store errors ---
            AppError::Store(err) => classify_store_error(err),

            // --- Engine errors ---
            AppError::Engine(err) => {
                tracing::warn!(error = %err, "Engine request failed");
                (StatusCode::BAD_GATEWAY, "ENGINE_ERROR", err.to_string())
            }

            // --- HTTP-specific errors ---
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

fn internal() -> (StatusCode, &'static str, String) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "An internal error occurred".to_string(),
    )
}

/// Classify a store error into an HTTP status, error code, and message.
///
/// - Exhausted transient failures map to 503.
/// - `RowNotFound` maps to 404.
/// - Everything else maps to 500 with a sanitized message.
fn classify_store_error(err: &StoreError) -> (StatusCode, &'static str, String) {
    if err.is_transient() {
        tracing::error!(error = %err, "Store unavailable after retries");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            "SERVICE_UNAVAILABLE",
            "Job store is temporarily unavailable".to_string(),
        );
    }

    match err {
        StoreError::Database(sqlx::Error::RowNotFound) => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            "Resource not found".to_string(),
        ),
        other => {
            tracing::error!(error = %other, "Store error");
            internal()
        }
    }
}
