//! Classification of job failures into operator-facing messages.
//!
//! The engine client maps its own errors onto [`FailureClass`]; the
//! orchestrator turns the class into the `errorMessage` and `errorDetails`
//! stored on the failed job.

use serde_json::{json, Value};

use crate::types::Timestamp;

/// HTTP statuses treated as "the engine is still busy" rather than a hard
/// rejection.
pub const TIMEOUT_STATUSES: [u16; 3] = [408, 429, 504];

/// What went wrong, from the operator's point of view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureClass {
    /// The engine (or a gateway in front of it) timed out or throttled us.
    /// The workload is likely still running upstream.
    UpstreamTimeout { status: Option<u16>, detail: String },
    /// The engine answered with a non-success status.
    UpstreamStatus { status: u16, body: String },
    /// No response arrived at all.
    NoResponse { detail: String },
    /// Anything else.
    Unexpected { detail: String },
}

impl FailureClass {
    /// Classify an HTTP error status and its body.
    pub fn from_status(status: u16, body: String) -> Self {
        if TIMEOUT_STATUSES.contains(&status) {
            Self::UpstreamTimeout {
                status: Some(status),
                detail: body,
            }
        } else {
            Self::UpstreamStatus { status, body }
        }
    }

    /// Short machine-readable label stored in `errorDetails.class`.
    pub fn label(&self) -> &'static str {
        match self {
            Self::UpstreamTimeout { .. } => "upstream_timeout",
            Self::UpstreamStatus { .. } => "upstream_status",
            Self::NoResponse { .. } => "no_response",
            Self::Unexpected { .. } => "unexpected",
        }
    }

    /// The message stored in the job's `errorMessage`.
    pub fn message(&self) -> String {
        match self {
            Self::UpstreamTimeout {
                status: Some(status),
                ..
            } => format!(
                "Engine API timeout ({status}): the workflow is taking too long to respond. \
                 It may still be running on the engine; check the engine dashboard for its status."
            ),
            Self::UpstreamTimeout { status: None, .. } => "Request timeout: the engine did not \
                 finish in time. It may still be running on the engine; check the engine \
                 dashboard for its status."
                .to_string(),
            Self::UpstreamStatus { status, body } => format!("Engine API error ({status}): {body}"),
            Self::NoResponse { .. } => {
                "No response from engine API. Check your network connection and API URL.".to_string()
            }
            Self::Unexpected { detail } => detail.clone(),
        }
    }

    /// Structured context stored in the job's `errorDetails`.
    pub fn details(&self, at: Timestamp) -> Value {
        let mut details = json!({
            "class": self.label(),
            "message": self.message(),
            "timestamp": at,
        });
        match self {
            Self::UpstreamTimeout { status, detail } => {
                details["httpStatus"] = json!(status);
                details["detail"] = json!(detail);
            }
            Self::UpstreamStatus { status, body } => {
                details["httpStatus"] = json!(status);
                details["responseBody"] = json!(body);
            }
            Self::NoResponse { detail } => {
                details["noResponse"] = json!(true);
                details["detail"] = json!(detail);
            }
            Self::Unexpected { .. } => {}
        }
        details
    }
}
