//! Stream adapter: engine byte feed in, ordered events and a terminal
//! summary out.
//!
//! Chunk boundaries carry no meaning. Bytes are buffered until a newline
//! completes a line (so UTF-8 sequences split across chunks are
//! reassembled), each `data: ` line is parsed into an [`EngineRecord`], and
//! every record becomes a [`StreamEvent`] with a sequence number starting
//! at 1. Text chunks and the `workflow_finished` payload are accumulated
//! along the way for the [`StreamSummary`].
//!
//! A transport fault that looks like a dropped connection ends the feed
//! with a partial summary instead of an error: the engine usually keeps
//! running server-side and the events received so far are still worth
//! keeping.

use std::collections::VecDeque;
use std::io;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use futures::StreamExt;
use longrun_core::job::StreamLogEntry;
use serde_json::{json, Map, Value};

use crate::api::EngineError;
use crate::messages::{parse_record, EngineRecord, EventKind};

/// Raw engine feed.
pub type ByteStream = BoxStream<'static, Result<Bytes, StreamFault>>;

/// Warning attached to a summary whose feed was cut short.
pub const INTERRUPTED_WARNING: &str =
    "Connection was interrupted. The workflow may still be running on the engine.";

/// Placeholder `text_output` when no text chunk arrived.
pub const NO_TEXT_OUTPUT: &str = "(No text output)";

/// Longest raw line echoed into a parse warning.
const MAX_LOGGED_LINE: usize = 200;

// ---------------------------------------------------------------------------
// Transport faults
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Connection dropped or timed out mid-feed; the upstream run may
    /// still complete.
    Interrupted,
    /// Anything else.
    Fatal,
}

/// A failure while reading the feed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct StreamFault {
    pub kind: FaultKind,
    pub message: String,
}

impl StreamFault {
    pub fn interrupted(message: impl Into<String>) -> Self {
        Self {
            kind: FaultKind::Interrupted,
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            kind: FaultKind::Fatal,
            message: message.into(),
        }
    }

    /// Classify a body read error from the HTTP client.
    pub fn from_transport(err: &reqwest::Error) -> Self {
        if err.is_timeout() || is_connection_drop(err) {
            Self::interrupted(err.to_string())
        } else {
            Self::fatal(err.to_string())
        }
    }
}

fn is_connection_drop(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut source = Some(err);
    while let Some(current) = source {
        if let Some(io_err) = current.downcast_ref::<io::Error>() {
            if matches!(
                io_err.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::TimedOut
            ) {
                return true;
            }
        }
        let text = current.to_string().to_lowercase();
        if ["aborted", "reset", "connection closed", "incomplete"]
            .iter()
            .any(|needle| text.contains(needle))
        {
            return true;
        }
        source = current.source();
    }
    false
}

// ---------------------------------------------------------------------------
// Line decoding
// ---------------------------------------------------------------------------

/// Splits a chunked byte feed into complete lines.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buf: Vec<u8>,
}

impl LineDecoder {
    /// Append a chunk and return every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(pos) = self.buf[start..].iter().position(|&b| b == b'\n') {
            let end = start + pos;
            lines.push(decode_line(&self.buf[start..end]));
            start = end + 1;
        }
        self.buf.drain(..start);
        lines
    }

    /// Whatever is left after the final newline.
    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buf);
        Some(decode_line(&rest))
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

// ---------------------------------------------------------------------------
// Events and summary
// ---------------------------------------------------------------------------

/// One engine event in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEvent {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    pub payload: Value,
}

impl StreamEvent {
    pub fn to_log_entry(&self) -> StreamLogEntry {
        StreamLogEntry {
            sequence: self.sequence,
            timestamp: self.timestamp,
            event_kind: self.kind.as_str().to_string(),
            payload: self.payload.clone(),
        }
    }
}

/// Terminal result of one feed.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSummary {
    pub success: bool,
    pub total_events: u64,
    pub text_output: String,
    /// Body of the last `workflow_finished` record.
    pub final_event: Option<Map<String, Value>>,
    pub workflow_run_id: Option<String>,
    pub completed_at: DateTime<Utc>,
    /// Set when the feed was cut short.
    pub warning: Option<String>,
}

impl StreamSummary {
    pub fn is_partial(&self) -> bool {
        self.warning.is_some()
    }

    fn workflow_data(&self) -> Value {
        self.final_event
            .as_ref()
            .and_then(|event| event.get("data"))
            .cloned()
            .unwrap_or_else(|| json!({}))
    }

    fn text_or_placeholder(&self) -> &str {
        if self.text_output.is_empty() {
            NO_TEXT_OUTPUT
        } else {
            &self.text_output
        }
    }

    /// Build the JSON stored as the job result.
    pub fn into_result(self) -> Value {
        if let Some(warning) = &self.warning {
            return json!({
                "success": self.success,
                "message": "Workflow started but the event stream was interrupted",
                "total_events": self.total_events,
                "events_received": self.total_events,
                "partial_result": {
                    "workflow_run_id": self.workflow_run_id,
                    "text_output": self.text_or_placeholder(),
                    "workflow_data": self.workflow_data(),
                },
                "note": warning,
            });
        }

        let mut result = json!({
            "success": self.success,
            "workflow_run_id": self.workflow_run_id,
            "total_events": self.total_events,
            "text_output": self.text_or_placeholder(),
            "workflow_data": self.workflow_data(),
            "completed_at": self.completed_at,
        });
        if let (Some(final_event), Value::Object(fields)) = (self.final_event, &mut result) {
            for (key, value) in final_event {
                fields.entry(key).or_insert(value);
            }
        }
        result
    }
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

/// Synchronous core of the adapter. Feed it chunks, get events back.
#[derive(Debug, Default)]
pub struct StreamAdapter {
    decoder: LineDecoder,
    sequence: u64,
    text: String,
    final_event: Option<Map<String, Value>>,
    run_id: Option<String>,
}

impl StreamAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events accepted so far.
    pub fn events_seen(&self) -> u64 {
        self.sequence
    }

    /// Consume one chunk.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.decoder
            .push(chunk)
            .into_iter()
            .filter_map(|line| self.accept_line(&line))
            .collect()
    }

    /// End of feed: flush a trailing unterminated record and summarize.
    pub fn finish(&mut self) -> (Vec<StreamEvent>, StreamSummary) {
        let tail: Vec<StreamEvent> = self
            .decoder
            .finish()
            .and_then(|line| self.accept_line(&line))
            .into_iter()
            .collect();
        (tail, self.summary(None))
    }

    /// Feed failed. Interruptions become a partial summary; anything else
    /// is an error. An unterminated trailing line is dropped.
    pub fn interrupt(&mut self, fault: StreamFault) -> Result<StreamSummary, EngineError> {
        match fault.kind {
            FaultKind::Interrupted => {
                tracing::warn!(
                    events = self.sequence,
                    error = %fault,
                    "Engine stream interrupted, keeping partial result",
                );
                Ok(self.summary(Some(INTERRUPTED_WARNING.to_string())))
            }
            FaultKind::Fatal => Err(EngineError::Stream(fault.message)),
        }
    }

    fn accept_line(&mut self, line: &str) -> Option<StreamEvent> {
        let record = match parse_record(line)? {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    raw_line = %truncate(line, MAX_LOGGED_LINE),
                    "Dropping unparseable stream record",
                );
                return None;
            }
        };
        Some(self.accept_record(record))
    }

    fn accept_record(&mut self, record: EngineRecord) -> StreamEvent {
        self.sequence += 1;

        if let Some(text) = record.text() {
            self.text.push_str(text);
        }
        if self.run_id.is_none() {
            self.run_id = record.workflow_run_id().map(str::to_string);
        }
        if record.kind == EventKind::WorkflowFinished {
            self.final_event = Some(record.body.clone());
        }

        StreamEvent {
            sequence: self.sequence,
            timestamp: Utc::now(),
            kind: record.kind,
            payload: Value::Object(record.body),
        }
    }

    fn summary(&self, warning: Option<String>) -> StreamSummary {
        let workflow_run_id = self
            .final_event
            .as_ref()
            .and_then(|event| event.get("workflow_run_id"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| self.run_id.clone());

        StreamSummary {
            success: true,
            total_events: self.sequence,
            text_output: self.text.clone(),
            final_event: self.final_event.clone(),
            workflow_run_id,
            completed_at: Utc::now(),
            warning,
        }
    }
}

fn truncate(line: &str, max: usize) -> &str {
    match line.char_indices().nth(max) {
        Some((idx, _)) => &line[..idx],
        None => line,
    }
}

// ---------------------------------------------------------------------------
// Async reader
// ---------------------------------------------------------------------------

/// What [`EventReader::next`] yields.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    Event(StreamEvent),
    /// Always the last item.
    Finished(StreamSummary),
}

/// Pulls chunks from a [`ByteStream`] on demand and yields events, then
/// exactly one summary (or one error), then `None`.
pub struct EventReader {
    source: ByteStream,
    adapter: StreamAdapter,
    pending: VecDeque<StreamEvent>,
    summary: Option<StreamSummary>,
    done: bool,
}

impl EventReader {
    pub fn new(source: ByteStream) -> Self {
        Self {
            source,
            adapter: StreamAdapter::new(),
            pending: VecDeque::new(),
            summary: None,
            done: false,
        }
    }

    pub async fn next(&mut self) -> Option<Result<StreamItem, EngineError>> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(Ok(StreamItem::Event(event)));
            }
            if let Some(summary) = self.summary.take() {
                self.done = true;
                return Some(Ok(StreamItem::Finished(summary)));
            }
            if self.done {
                return None;
            }

            match self.source.next().await {
                Some(Ok(chunk)) => self.pending.extend(self.adapter.push(&chunk)),
                Some(Err(fault)) => match self.adapter.interrupt(fault) {
                    Ok(summary) => self.summary = Some(summary),
                    Err(e) => {
                        self.done = true;
                        return Some(Err(e));
                    }
                },
                None => {
                    let (tail, summary) = self.adapter.finish();
                    self.pending.extend(tail);
                    self.summary = Some(summary);
                }
            }
        }
    }
}
