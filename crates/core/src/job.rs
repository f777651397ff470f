//! The job record, its lifecycle enums and the merge rules every store
//! backend applies on update.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::{Validate, ValidationErrors};

use crate::error::CoreError;
use crate::types::{JobId, Timestamp};

// ---------------------------------------------------------------------------
// Job kind
// ---------------------------------------------------------------------------

/// The engine capability a job targets. Closed set; immutable per job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Chat,
    Workflow,
    Completion,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Workflow => "workflow",
            Self::Completion => "completion",
        }
    }

    /// Workflow jobs consume the engine's streaming feed; the rest block.
    pub fn is_streaming(self) -> bool {
        matches!(self, Self::Workflow)
    }
}

impl FromStr for JobKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chat" => Ok(Self::Chat),
            "workflow" => Ok(Self::Workflow),
            "completion" => Ok(Self::Completion),
            other => Err(CoreError::Validation(format!(
                "Unknown job type '{other}' (expected chat, workflow or completion)"
            ))),
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Job status
// ---------------------------------------------------------------------------

/// Lifecycle state. Advances `pending -> processing -> completed | failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Processing => 1,
            Self::Completed | Self::Failed => 2,
        }
    }

    /// Whether moving from `self` to `next` is a forward transition.
    pub fn can_advance_to(self, next: JobStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }
}

impl FromStr for JobStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(CoreError::Validation(format!("Unknown job status '{other}'"))),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Caller-supplied job input. Which fields matter depends on the job kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inputs: Option<serde_json::Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

/// One normalized engine event as kept in `streamingLogs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamLogEntry {
    pub sequence: u64,
    pub timestamp: Timestamp,
    pub event_kind: String,
    pub payload: Value,
}

/// A job as persisted and returned by the status endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: JobKind,
    pub status: JobStatus,
    pub progress: i16,
    pub input: JobInput,
    pub result: Option<Value>,
    pub error_message: Option<String>,
    pub error_details: Option<Value>,
    pub streaming_logs: Vec<StreamLogEntry>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub completed_at: Option<Timestamp>,
}

/// Everything needed to create a job record.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub kind: JobKind,
    pub user_id: String,
    pub input: JobInput,
}

impl NewJob {
    /// Materialize the initial `pending` record.
    pub fn into_job(self, id: JobId, now: Timestamp) -> Job {
        Job {
            id,
            user_id: self.user_id,
            kind: self.kind,
            status: JobStatus::Pending,
            progress: 0,
            input: self.input,
            result: None,
            error_message: None,
            error_details: None,
            streaming_logs: Vec::new(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}

/// A partial update. Only `Some` fields are merged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub progress: Option<i16>,
    pub result: Option<Value>,
    pub error_message: Option<String>,
    pub error_details: Option<Value>,
    /// Full snapshot of the log, not a delta.
    pub streaming_logs: Option<Vec<StreamLogEntry>>,
    pub completed_at: Option<Timestamp>,
}

impl JobPatch {
    pub fn progress(value: i16) -> Self {
        Self {
            progress: Some(value),
            ..Default::default()
        }
    }

    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_some_and(JobStatus::is_terminal)
    }
}

impl Job {
    /// Merge `patch` into this record.
    ///
    /// Returns `false` without touching anything when the job is already
    /// terminal. Otherwise status only moves forward, progress never
    /// decreases (and is 100 once completed), the log snapshot never
    /// shrinks, and `completed_at` is stamped on the first terminal
    /// transition.
    pub fn apply(&mut self, patch: JobPatch, now: Timestamp) -> bool {
        if self.status.is_terminal() {
            return false;
        }

        if let Some(status) = patch.status {
            if self.status.can_advance_to(status) {
                self.status = status;
            }
        }
        if let Some(progress) = patch.progress {
            self.progress = self.progress.max(progress.clamp(0, 100));
        }
        if let Some(logs) = patch.streaming_logs {
            if logs.len() >= self.streaming_logs.len() {
                self.streaming_logs = logs;
            }
        }
        if let Some(result) = patch.result {
            self.result = Some(result);
        }
        if let Some(message) = patch.error_message {
            self.error_message = Some(message);
        }
        if let Some(details) = patch.error_details {
            self.error_details = Some(details);
        }

        if self.status == JobStatus::Completed {
            self.progress = 100;
        }
        if self.status.is_terminal() && self.completed_at.is_none() {
            self.completed_at = Some(patch.completed_at.unwrap_or(now));
        }

        self.updated_at = now;
        true
    }
}

// ---------------------------------------------------------------------------
// Start request
// ---------------------------------------------------------------------------

/// Body of `POST /api/v1/jobs/start`.
///
/// Fields are optional at the serde level so that a missing field surfaces
/// as a validation error rather than a deserialization rejection.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct StartJobRequest {
    #[serde(rename = "type")]
    #[validate(required(message = "type is required"))]
    pub kind: Option<String>,

    #[validate(
        required(message = "userId is required"),
        length(min = 1, message = "userId must not be empty")
    )]
    pub user_id: Option<String>,

    #[validate(required(message = "input is required"))]
    pub input: Option<Value>,
}

impl StartJobRequest {
    /// Validate the request and convert it into a [`NewJob`].
    pub fn into_new_job(self) -> Result<NewJob, CoreError> {
        self.validate()
            .map_err(|e| CoreError::Validation(validation_message(&e)))?;

        let (Some(kind), Some(user_id), Some(input)) = (self.kind, self.user_id, self.input)
        else {
            return Err(CoreError::Validation(
                "type, userId and input are required".into(),
            ));
        };

        let kind: JobKind = kind.parse()?;
        if !input.is_object() {
            return Err(CoreError::Validation("input must be a JSON object".into()));
        }
        let input: JobInput = serde_json::from_value(input)
            .map_err(|e| CoreError::Validation(format!("Invalid input: {e}")))?;

        Ok(NewJob {
            kind,
            user_id,
            input,
        })
    }
}

fn validation_message(errors: &ValidationErrors) -> String {
    let mut messages: Vec<String> = errors
        .field_errors()
        .values()
        .flat_map(|errs| errs.iter())
        .map(|e| match &e.message {
            Some(message) => message.to_string(),
            None => e.code.to_string(),
        })
        .collect();
    messages.sort();
    messages.join("; ")
}
