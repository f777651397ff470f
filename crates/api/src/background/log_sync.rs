//! Periodic mirroring of engine conversation messages.
//!
//! Each cycle lists the most recent conversations of the system user, pulls
//! their messages and upserts every message into the engine log store. The
//! engine only keeps conversations for chat apps; a workflow app answers
//! with `not_chat_app`, which is treated as "nothing to sync".

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use longrun_db::models::engine_log::NewEngineLog;
use longrun_db::store::EngineLogStore;
use longrun_engine::api::EngineError;
use longrun_engine::engine::ConversationLog;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Engine user the sync reads conversations as.
pub const SYSTEM_USER: &str = "system";

/// Page size for both conversations and messages.
pub const PAGE_LIMIT: u32 = 50;

/// Engine error code returned by apps without conversation history.
pub const NOT_CHAT_APP: &str = "not_chat_app";

/// Outcome of one sync cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub conversations: usize,
    pub messages: usize,
    /// The engine does not keep conversations for this app.
    pub skipped: bool,
}

/// Pulls conversation messages from the engine into the log store.
pub struct LogSync {
    engine: Arc<dyn ConversationLog>,
    logs: Arc<dyn EngineLogStore>,
}

impl LogSync {
    pub fn new(engine: Arc<dyn ConversationLog>, logs: Arc<dyn EngineLogStore>) -> Self {
        Self { engine, logs }
    }

    /// Run one sync cycle.
    ///
    /// Engine failures abort the cycle. A message that cannot be stored is
    /// logged and skipped.
    pub async fn run_once(&self) -> Result<SyncReport, EngineError> {
        match self.sync().await {
            Err(e) if e.api_code().as_deref() == Some(NOT_CHAT_APP) => {
                tracing::info!("Engine app has no conversation history, skipping log sync");
                Ok(SyncReport {
                    skipped: true,
                    ..Default::default()
                })
            }
            other => other,
        }
    }

    async fn sync(&self) -> Result<SyncReport, EngineError> {
        let conversations = self.engine.conversations(SYSTEM_USER, PAGE_LIMIT).await?;
        let mut report = SyncReport {
            conversations: conversations.len(),
            ..Default::default()
        };

        for conversation in &conversations {
            let Some(conversation_id) = conversation.get("id").and_then(Value::as_str) else {
                tracing::warn!("Skipping conversation without an id");
                continue;
            };

            let messages = self
                .engine
                .messages(conversation_id, SYSTEM_USER, PAGE_LIMIT)
                .await?;

            for message in messages {
                let Some(log) = message_to_log(conversation, message) else {
                    tracing::warn!(conversation_id, "Skipping message without an id");
                    continue;
                };
                let engine_log_id = log.engine_log_id.clone();
                match self.logs.upsert(log).await {
                    Ok(_) => report.messages += 1,
                    Err(e) => tracing::error!(
                        engine_log_id = %engine_log_id,
                        error = %e,
                        "Failed to store engine message",
                    ),
                }
            }
        }

        tracing::info!(
            conversations = report.conversations,
            messages = report.messages,
            "Engine log sync finished",
        );
        Ok(report)
    }
}

/// Map one engine message to a log row. `None` when the message has no id.
fn message_to_log(conversation: &Value, message: Value) -> Option<NewEngineLog> {
    let engine_log_id = message.get("id")?.as_str()?.to_string();
    let user_id = conversation
        .get("user_id")
        .and_then(Value::as_str)
        .unwrap_or(SYSTEM_USER)
        .to_string();
    let status = message
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();
    let created_at = message
        .get("created_at")
        .and_then(Value::as_i64)
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .unwrap_or_else(Utc::now);

    Some(NewEngineLog {
        engine_log_id,
        log_type: "message".to_string(),
        content: message,
        user_id: Some(user_id),
        status: Some(status),
        created_at,
    })
}

/// Run the log sync loop every `period` until `cancel` is triggered.
pub async fn run(sync: Arc<LogSync>, period: Duration, cancel: CancellationToken) {
    tracing::info!(interval_secs = period.as_secs(), "Engine log sync started");

    let mut interval = tokio::time::interval(period);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Engine log sync stopping");
                break;
            }
            _ = interval.tick() => {
                if let Err(e) = sync.run_once().await {
                    tracing::error!(error = %e, "Engine log sync failed");
                }
            }
        }
    }
}
