//! In-process engine double that replays canned replies.
//!
//! Each call to [`WorkflowEngine`] pops the next [`Reply`]. An optional
//! gate holds every call until the test releases it, which makes "the job
//! is mid-flight" states observable.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use futures::StreamExt;
use longrun_core::job::{JobInput, JobKind};
use serde_json::Value;
use tokio::sync::Notify;

use crate::api::EngineError;
use crate::engine::{ConversationLog, WorkflowEngine};
use crate::stream::{ByteStream, StreamFault};

/// One canned engine behaviour.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Blocking call returns this body.
    Blocking(Value),
    /// Streaming call yields these chunks, then optionally fails.
    Stream {
        chunks: Vec<Bytes>,
        fault: Option<StreamFault>,
    },
    /// The engine answers with a non-success status.
    Reject { status: u16, body: String },
    /// The engine never answers.
    Unreachable(String),
}

impl Reply {
    /// A streaming reply from complete feed text, delivered in one chunk.
    pub fn stream(feed: impl Into<String>) -> Self {
        Reply::Stream {
            chunks: vec![Bytes::from(feed.into())],
            fault: None,
        }
    }

    fn into_error(self) -> EngineError {
        match self {
            Reply::Reject { status, body } => EngineError::Api { status, body },
            Reply::Unreachable(detail) => EngineError::Unreachable(detail),
            other => EngineError::Decode(format!("scripted reply does not fit this call: {other:?}")),
        }
    }
}

/// Scripted [`WorkflowEngine`] and [`ConversationLog`].
#[derive(Default)]
pub struct ScriptedEngine {
    replies: Mutex<VecDeque<Reply>>,
    calls: AtomicUsize,
    gate: Option<Arc<Notify>>,
    conversations: Vec<Value>,
    messages: HashMap<String, Vec<Value>>,
    history_error: Option<(u16, String)>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for the next job call.
    pub fn reply(self, reply: Reply) -> Self {
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(reply);
        self
    }

    /// Hold every job call until `gate` is notified.
    pub fn with_gate(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Conversation history served by [`ConversationLog`].
    pub fn with_history(mut self, conversations: Vec<Value>, messages: HashMap<String, Vec<Value>>) -> Self {
        self.conversations = conversations;
        self.messages = messages;
        self
    }

    /// Make the history endpoints fail with this status and body.
    pub fn with_history_error(mut self, status: u16, body: impl Into<String>) -> Self {
        self.history_error = Some((status, body.into()));
        self
    }

    /// Job calls received so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn next_reply(&self) -> Reply {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| Reply::Unreachable("no scripted reply left".into()))
    }

    fn history_error(&self) -> Option<EngineError> {
        self.history_error
            .as_ref()
            .map(|(status, body)| EngineError::Api {
                status: *status,
                body: body.clone(),
            })
    }
}

#[async_trait]
impl WorkflowEngine for ScriptedEngine {
    async fn run_blocking(
        &self,
        _kind: JobKind,
        _input: &JobInput,
        _user: &str,
    ) -> Result<Value, EngineError> {
        match self.next_reply().await {
            Reply::Blocking(body) => Ok(body),
            other => Err(other.into_error()),
        }
    }

    async fn run_streaming(&self, _input: &JobInput, _user: &str) -> Result<ByteStream, EngineError> {
        match self.next_reply().await {
            Reply::Stream { chunks, fault } => {
                let items = chunks
                    .into_iter()
                    .map(Ok)
                    .chain(fault.map(Err))
                    .collect::<Vec<Result<Bytes, StreamFault>>>();
                Ok(stream::iter(items).boxed())
            }
            other => Err(other.into_error()),
        }
    }
}

#[async_trait]
impl ConversationLog for ScriptedEngine {
    async fn conversations(&self, _user: &str, limit: u32) -> Result<Vec<Value>, EngineError> {
        if let Some(err) = self.history_error() {
            return Err(err);
        }
        Ok(self.conversations.iter().take(limit as usize).cloned().collect())
    }

    async fn messages(
        &self,
        conversation_id: &str,
        _user: &str,
        limit: u32,
    ) -> Result<Vec<Value>, EngineError> {
        if let Some(err) = self.history_error() {
            return Err(err);
        }
        Ok(self
            .messages
            .get(conversation_id)
            .map(|messages| messages.iter().take(limit as usize).cloned().collect())
            .unwrap_or_default())
    }
}
