//! Engine stream record types and parser.
//!
//! The engine streams one JSON object per line, each prefixed with
//! `data: ` and carrying its kind in the `"event"` field, e.g.
//! `data: {"event":"text_chunk","data":{"text":"Hi"}}`. Records are kept as
//! raw JSON objects because payload shapes vary per kind and are persisted
//! verbatim.

use serde_json::{Map, Value};

/// Prefix that marks a line as an event record.
pub const RECORD_PREFIX: &str = "data: ";

/// Known event kinds. Anything else is preserved as [`EventKind::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    WorkflowStarted,
    NodeStarted,
    NodeFinished,
    TextChunk,
    WorkflowFinished,
    Error,
    Ping,
    Other(String),
}

impl EventKind {
    pub fn parse(name: &str) -> Self {
        match name {
            "workflow_started" => Self::WorkflowStarted,
            "node_started" => Self::NodeStarted,
            "node_finished" => Self::NodeFinished,
            "text_chunk" => Self::TextChunk,
            "workflow_finished" => Self::WorkflowFinished,
            "error" => Self::Error,
            "ping" => Self::Ping,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::WorkflowStarted => "workflow_started",
            Self::NodeStarted => "node_started",
            Self::NodeFinished => "node_finished",
            Self::TextChunk => "text_chunk",
            Self::WorkflowFinished => "workflow_finished",
            Self::Error => "error",
            Self::Ping => "ping",
            Self::Other(name) => name,
        }
    }

    /// Start, finish and any error-like kind. Milestones are persisted
    /// immediately regardless of the write throttle.
    pub fn is_milestone(&self) -> bool {
        matches!(self, Self::WorkflowStarted | Self::WorkflowFinished)
            || self.as_str().contains("error")
    }
}

/// One parsed record: its kind and the full JSON object.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineRecord {
    pub kind: EventKind,
    pub body: Map<String, Value>,
}

impl EngineRecord {
    /// `data.text` of a `text_chunk` record.
    pub fn text(&self) -> Option<&str> {
        if self.kind != EventKind::TextChunk {
            return None;
        }
        self.body.get("data")?.get("text")?.as_str()
    }

    pub fn workflow_run_id(&self) -> Option<&str> {
        self.body.get("workflow_run_id")?.as_str()
    }
}

/// Why a prefixed line could not be turned into a record.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("record is not an object with a string `event` field")]
    MissingEvent,
}

/// Parse one line of the feed.
///
/// Returns `None` for lines that are not records at all (blank lines,
/// comments, other SSE fields).
pub fn parse_record(line: &str) -> Option<Result<EngineRecord, RecordError>> {
    let json = line.strip_prefix(RECORD_PREFIX)?;
    Some(parse_body(json))
}

fn parse_body(json: &str) -> Result<EngineRecord, RecordError> {
    let Value::Object(body) = serde_json::from_str::<Value>(json)? else {
        return Err(RecordError::MissingEvent);
    };
    let kind = match body.get("event") {
        Some(Value::String(name)) => EventKind::parse(name),
        _ => return Err(RecordError::MissingEvent),
    };
    Ok(EngineRecord { kind, body })
}
