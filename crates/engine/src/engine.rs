//! Capability traits over the engine, and their HTTP implementation.
//!
//! The orchestrator only needs "run this and give me the answer" and "run
//! this and give me the feed"; the log sync only needs conversation
//! history. Keeping those behind traits lets tests substitute
//! [`ScriptedEngine`](crate::scripted::ScriptedEngine).

use async_trait::async_trait;
use longrun_core::job::{JobInput, JobKind};
use serde_json::Value;

use crate::api::{EngineApi, EngineError};
use crate::stream::ByteStream;

/// Job execution against the engine.
#[async_trait]
pub trait WorkflowEngine: Send + Sync {
    /// Run a chat or completion job in blocking mode and return the
    /// engine's full response. Workflow jobs go through `run_streaming`.
    async fn run_blocking(
        &self,
        kind: JobKind,
        input: &JobInput,
        user: &str,
    ) -> Result<Value, EngineError>;

    /// Start a workflow in streaming mode and return its raw feed.
    async fn run_streaming(&self, input: &JobInput, user: &str) -> Result<ByteStream, EngineError>;
}

/// Read access to the engine's conversation history.
#[async_trait]
pub trait ConversationLog: Send + Sync {
    async fn conversations(&self, user: &str, limit: u32) -> Result<Vec<Value>, EngineError>;

    async fn messages(
        &self,
        conversation_id: &str,
        user: &str,
        limit: u32,
    ) -> Result<Vec<Value>, EngineError>;
}

#[async_trait]
impl WorkflowEngine for EngineApi {
    async fn run_blocking(
        &self,
        kind: JobKind,
        input: &JobInput,
        user: &str,
    ) -> Result<Value, EngineError> {
        match kind {
            JobKind::Chat => self.chat_message(input, user).await,
            JobKind::Completion => self.completion_message(input, user).await,
            JobKind::Workflow => Err(EngineError::Unsupported(
                "workflow jobs run in streaming mode".into(),
            )),
        }
    }

    async fn run_streaming(&self, input: &JobInput, user: &str) -> Result<ByteStream, EngineError> {
        self.stream_workflow(input, user).await
    }
}

#[async_trait]
impl ConversationLog for EngineApi {
    async fn conversations(&self, user: &str, limit: u32) -> Result<Vec<Value>, EngineError> {
        Ok(self.list_conversations(user, limit).await?.data)
    }

    async fn messages(
        &self,
        conversation_id: &str,
        user: &str,
        limit: u32,
    ) -> Result<Vec<Value>, EngineError> {
        Ok(self.list_messages(conversation_id, user, limit).await?.data)
    }
}
