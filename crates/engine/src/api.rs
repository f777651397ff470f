//! REST API client for the engine's HTTP endpoints.
//!
//! Wraps chat, completion and workflow execution plus the conversation
//! history endpoints using [`reqwest`]. All requests carry the API key as a
//! bearer token.

use std::time::Duration;

use futures::StreamExt;
use longrun_core::failure::FailureClass;
use longrun_core::job::JobInput;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::stream::{ByteStream, StreamFault};

/// Default client timeout. Workflows can legitimately run for a long time.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2 * 60 * 60);

/// Connection settings for one engine deployment.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Base URL including the API version path, e.g. `https://api.example.com/v1`.
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
}

impl EngineConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Key with everything but the first and last four characters hidden,
    /// for health reports and logs.
    pub fn masked_key(&self) -> String {
        let chars: Vec<char> = self.api_key.chars().collect();
        if chars.len() <= 8 {
            return "*".repeat(chars.len());
        }
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{head}...{tail}")
    }
}

/// Whether a blocking call should ask for a streamed or a buffered reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMode {
    Blocking,
    Streaming,
}

impl ResponseMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Blocking => "blocking",
            Self::Streaming => "streaming",
        }
    }
}

/// Errors from the engine REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The request exceeded the client timeout.
    #[error("Engine request timed out: {0}")]
    Timeout(String),

    /// The request never got a response (DNS, connect, TLS, reset).
    #[error("No response from engine: {0}")]
    Unreachable(String),

    /// The engine returned a non-2xx status code.
    #[error("Engine API error ({status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// A success response whose body could not be decoded.
    #[error("Malformed engine response: {0}")]
    Decode(String),

    /// The event stream failed in a way that cannot be treated as a
    /// partial result.
    #[error("Engine stream failed: {0}")]
    Stream(String),

    /// The call does not apply to this kind of job.
    #[error("Unsupported engine call: {0}")]
    Unsupported(String),
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            EngineError::Timeout(err.to_string())
        } else if err.is_decode() {
            EngineError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            EngineError::Api {
                status: status.as_u16(),
                body: err.to_string(),
            }
        } else {
            EngineError::Unreachable(err.to_string())
        }
    }
}

impl EngineError {
    /// Map onto the operator-facing failure classes.
    pub fn failure_class(&self) -> FailureClass {
        match self {
            EngineError::Timeout(detail) => FailureClass::UpstreamTimeout {
                status: None,
                detail: detail.clone(),
            },
            EngineError::Unreachable(detail) => FailureClass::NoResponse {
                detail: detail.clone(),
            },
            EngineError::Api { status, body } => FailureClass::from_status(*status, body.clone()),
            EngineError::Decode(_) | EngineError::Stream(_) | EngineError::Unsupported(_) => {
                FailureClass::Unexpected {
                    detail: self.to_string(),
                }
            }
        }
    }

    /// The engine's own error code (`{"code": "..."}` in the body), if any.
    pub fn api_code(&self) -> Option<String> {
        let EngineError::Api { body, .. } = self else {
            return None;
        };
        let parsed: Value = serde_json::from_str(body).ok()?;
        parsed.get("code")?.as_str().map(str::to_string)
    }
}

/// One page of a list endpoint (`/conversations`, `/messages`).
#[derive(Debug, Deserialize)]
pub struct ListPage {
    #[serde(default)]
    pub data: Vec<Value>,
    #[serde(default)]
    pub has_more: bool,
}

/// HTTP client for a single engine deployment.
pub struct EngineApi {
    client: reqwest::Client,
    config: EngineConfig,
}

impl EngineApi {
    /// Create a new API client with its own connection pool.
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Send a chat message and wait for the full answer.
    ///
    /// Sends `POST /chat-messages` in blocking mode.
    pub async fn chat_message(&self, input: &JobInput, user: &str) -> Result<Value, EngineError> {
        let response = self
            .post("/chat-messages")
            .json(&chat_body(input, user))
            .send()
            .await?;
        Self::parse_response(response).await
    }

    /// Run a text completion and wait for the full answer.
    ///
    /// Sends `POST /completion-messages` in blocking mode.
    pub async fn completion_message(
        &self,
        input: &JobInput,
        user: &str,
    ) -> Result<Value, EngineError> {
        let response = self
            .post("/completion-messages")
            .json(&completion_body(input, user))
            .send()
            .await?;
        Self::parse_response(response).await
    }

    /// Start a workflow and return its raw event feed.
    ///
    /// Sends `POST /workflows/run` in streaming mode. The returned stream
    /// yields body chunks as they arrive; transport failures are mapped to
    /// [`StreamFault`]s so the adapter can decide whether the partial feed
    /// is still usable.
    pub async fn stream_workflow(
        &self,
        input: &JobInput,
        user: &str,
    ) -> Result<ByteStream, EngineError> {
        let response = self
            .post("/workflows/run")
            .json(&workflow_body(input, user, ResponseMode::Streaming))
            .send()
            .await?;
        let response = Self::ensure_success(response).await?;

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| StreamFault::from_transport(&e)))
            .boxed())
    }

    /// List conversations visible to `user`.
    ///
    /// Sends `GET /conversations`.
    pub async fn list_conversations(&self, user: &str, limit: u32) -> Result<ListPage, EngineError> {
        let limit = limit.to_string();
        let response = self
            .get("/conversations")
            .query(&[("user", user), ("limit", limit.as_str())])
            .send()
            .await?;
        Self::parse_response(response).await
    }

    /// List messages of one conversation.
    ///
    /// Sends `GET /messages`.
    pub async fn list_messages(
        &self,
        conversation_id: &str,
        user: &str,
        limit: u32,
    ) -> Result<ListPage, EngineError> {
        let limit = limit.to_string();
        let response = self
            .get("/messages")
            .query(&[
                ("conversation_id", conversation_id),
                ("user", user),
                ("limit", limit.as_str()),
            ])
            .send()
            .await?;
        Self::parse_response(response).await
    }

    // ---- private helpers ----

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}{}", self.config.base_url, path))
            .bearer_auth(&self.config.api_key)
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .get(format!("{}{}", self.config.base_url, path))
            .bearer_auth(&self.config.api_key)
    }

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or an [`EngineError::Api`]
    /// containing the status and body text on failure.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, EngineError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(EngineError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, EngineError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}

// ---------------------------------------------------------------------------
// Request bodies
// ---------------------------------------------------------------------------

fn inputs_or_empty(input: &JobInput) -> Value {
    Value::Object(input.inputs.clone().unwrap_or_default())
}

/// Body for `POST /chat-messages`.
pub fn chat_body(input: &JobInput, user: &str) -> Value {
    json!({
        "query": input.query.clone().unwrap_or_default(),
        "inputs": inputs_or_empty(input),
        "conversation_id": input.conversation_id.clone().unwrap_or_default(),
        "response_mode": ResponseMode::Blocking.as_str(),
        "user": user,
    })
}

/// Body for `POST /completion-messages`. Without explicit inputs the query
/// is sent as the `query` input variable.
pub fn completion_body(input: &JobInput, user: &str) -> Value {
    let inputs = match &input.inputs {
        Some(inputs) => Value::Object(inputs.clone()),
        None => {
            let mut inputs = Map::new();
            inputs.insert(
                "query".into(),
                Value::String(input.query.clone().unwrap_or_default()),
            );
            Value::Object(inputs)
        }
    };
    json!({
        "inputs": inputs,
        "response_mode": ResponseMode::Blocking.as_str(),
        "user": user,
    })
}

/// Body for `POST /workflows/run`.
pub fn workflow_body(input: &JobInput, user: &str, mode: ResponseMode) -> Value {
    json!({
        "inputs": inputs_or_empty(input),
        "response_mode": mode.as_str(),
        "user": user,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(query: Option<&str>, inputs: Option<Value>) -> JobInput {
        JobInput {
            query: query.map(str::to_string),
            inputs: inputs.and_then(|v| v.as_object().cloned()),
            conversation_id: None,
        }
    }

    #[test]
    fn chat_body_defaults_missing_fields() {
        let body = chat_body(&input(Some("hi"), None), "user-1");
        assert_eq!(body["query"], "hi");
        assert_eq!(body["inputs"], json!({}));
        assert_eq!(body["conversation_id"], "");
        assert_eq!(body["response_mode"], "blocking");
        assert_eq!(body["user"], "user-1");
    }

    #[test]
    fn completion_body_falls_back_to_query_input() {
        let body = completion_body(&input(Some("write a poem"), None), "u");
        assert_eq!(body["inputs"], json!({ "query": "write a poem" }));

        let body = completion_body(&input(Some("ignored"), Some(json!({ "topic": "sea" }))), "u");
        assert_eq!(body["inputs"], json!({ "topic": "sea" }));
    }

    #[test]
    fn workflow_body_carries_mode() {
        let body = workflow_body(
            &input(None, Some(json!({ "topic": "rust" }))),
            "u",
            ResponseMode::Streaming,
        );
        assert_eq!(body["response_mode"], "streaming");
        assert_eq!(body["inputs"]["topic"], "rust");
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let config = EngineConfig::new("https://engine.test/v1/", "key");
        assert_eq!(config.base_url, "https://engine.test/v1");
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
    }

    #[test]
    fn masked_key_hides_the_middle() {
        assert_eq!(
            EngineConfig::new("x", "app-1234567890abcd").masked_key(),
            "app-...abcd"
        );
        assert_eq!(EngineConfig::new("x", "short").masked_key(), "*****");
    }

    #[test]
    fn api_code_is_read_from_json_body() {
        let err = EngineError::Api {
            status: 400,
            body: r#"{"code":"not_chat_app","message":"App mode mismatch"}"#.into(),
        };
        assert_eq!(err.api_code().as_deref(), Some("not_chat_app"));

        let err = EngineError::Api {
            status: 502,
            body: "Bad Gateway".into(),
        };
        assert_eq!(err.api_code(), None);
    }

    #[test]
    fn failure_classes() {
        assert!(matches!(
            EngineError::Timeout("t".into()).failure_class(),
            FailureClass::UpstreamTimeout { status: None, .. }
        ));
        assert!(matches!(
            EngineError::Unreachable("refused".into()).failure_class(),
            FailureClass::NoResponse { .. }
        ));
        assert!(matches!(
            EngineError::Api { status: 504, body: String::new() }.failure_class(),
            FailureClass::UpstreamTimeout { status: Some(504), .. }
        ));
        assert!(matches!(
            EngineError::Api { status: 401, body: "nope".into() }.failure_class(),
            FailureClass::UpstreamStatus { status: 401, .. }
        ));
        assert!(matches!(
            EngineError::Stream("boom".into()).failure_class(),
            FailureClass::Unexpected { .. }
        ));
    }
}
