#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, Response, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use longrun_db::memory::{MemoryEngineLogStore, MemoryJobStore};
use longrun_db::retry::RetryPolicy;
use longrun_db::store::JobStore;
use longrun_engine::scripted::ScriptedEngine;
use longrun_pipeline::orchestrator::{JobOrchestrator, OrchestratorConfig};
use serde_json::Value;
use tower::ServiceExt;

use longrun_api::background::log_sync::LogSync;
use longrun_api::config::ServerConfig;
use longrun_api::router::build_app_router;
use longrun_api::state::AppState;

/// Build a test `ServerConfig` with safe defaults.
///
/// Uses `http://localhost:5173` as CORS origin (matching the dev default),
/// a 30-second request timeout and a fast progress stream poll.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 30,
        database_url: "postgres://unused".to_string(),
        engine_base_url: "http://engine.test/v1".to_string(),
        engine_api_key: "app-test-key".to_string(),
        engine_timeout_secs: 7200,
        stream_persist_every: 100,
        sse_poll_interval_ms: 10,
        log_sync_interval_secs: 0,
    }
}

/// The application router plus handles on its in-memory collaborators.
pub struct TestApp {
    pub router: Router,
    pub jobs: Arc<MemoryJobStore>,
    pub logs: Arc<MemoryEngineLogStore>,
    pub engine: Arc<ScriptedEngine>,
}

impl TestApp {
    /// Poll the store until the job reaches a terminal state.
    pub async fn wait_for_terminal(&self, id: &str) -> longrun_core::job::Job {
        for _ in 0..500 {
            if let Some(job) = self.jobs.get(id).await.unwrap() {
                if job.status.is_terminal() {
                    return job;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("job {id} did not reach a terminal state");
    }
}

/// Build the full application router over memory stores and `engine`.
///
/// Uses the same middleware stack as the binary (CORS, request ID,
/// timeout, tracing, panic recovery).
pub fn build_test_app(engine: ScriptedEngine) -> TestApp {
    build_test_app_with(engine, test_config())
}

pub fn build_test_app_with(engine: ScriptedEngine, config: ServerConfig) -> TestApp {
    let jobs = Arc::new(MemoryJobStore::new().with_retry(RetryPolicy::immediate(3)));
    let logs = Arc::new(MemoryEngineLogStore::new());
    let engine = Arc::new(engine);

    let orchestrator = JobOrchestrator::new(
        jobs.clone(),
        engine.clone(),
        OrchestratorConfig {
            terminal_retry: RetryPolicy::immediate(5),
            ..config.orchestrator_config()
        },
    );
    let log_sync = Arc::new(LogSync::new(engine.clone(), logs.clone()));

    let state = AppState {
        config: Arc::new(config.clone()),
        jobs: jobs.clone(),
        logs: logs.clone(),
        orchestrator,
        log_sync,
    };

    TestApp {
        router: build_app_router(state, &config),
        jobs,
        logs,
        engine,
    }
}

pub async fn get(app: &Router, uri: &str) -> Response<Body> {
    send(app, Method::GET, uri, Body::empty()).await
}

pub async fn delete(app: &Router, uri: &str) -> Response<Body> {
    send(app, Method::DELETE, uri, Body::empty()).await
}

pub async fn post_json(app: &Router, uri: &str, body: Value) -> Response<Body> {
    send(app, Method::POST, uri, Body::from(body.to_string())).await
}

/// POST a body verbatim, for payloads that are not valid JSON.
pub async fn post_raw(app: &Router, uri: &str, body: &'static str) -> Response<Body> {
    send(app, Method::POST, uri, Body::from(body)).await
}

async fn send(app: &Router, method: Method, uri: &str, body: Body) -> Response<Body> {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body)
        .unwrap();
    app.clone().oneshot(request).await.unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// Assert the response is the standard `{error, code}` envelope.
pub async fn assert_error(response: Response<Body>, status: StatusCode, code: &str) -> Value {
    assert_eq!(response.status(), status);
    let json = body_json(response).await;
    assert_eq!(json["code"], code);
    assert!(json["error"].is_string());
    json
}
