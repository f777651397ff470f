//! Integration tests for the `/api/v1/logs` endpoints.

mod common;

use std::collections::HashMap;

use axum::http::StatusCode;
use common::{assert_error, body_json, build_test_app, get, post_json};
use longrun_engine::scripted::ScriptedEngine;
use serde_json::json;

fn engine_with_history(messages_in_conversation: usize) -> ScriptedEngine {
    let messages: Vec<_> = (0..messages_in_conversation)
        .map(|i| json!({ "id": format!("msg-{i}"), "created_at": 1_700_000_000 + i as i64 }))
        .collect();
    ScriptedEngine::new().with_history(
        vec![json!({ "id": "conv-1", "user_id": "alice" })],
        HashMap::from([("conv-1".to_string(), messages)]),
    )
}

// ---------------------------------------------------------------------------
// Test: fetch then page through the mirrored logs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fetch_then_list_logs() {
    let app = build_test_app(engine_with_history(5));

    let response = post_json(&app.router, "/api/v1/logs/fetch", json!({})).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["fetched"], 5);
    assert!(json["timestamp"].is_string());

    let response = get(&app.router, "/api/v1/logs?page=2&limit=2").await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["pagination"]["page"], 2);
    assert_eq!(json["pagination"]["limit"], 2);
    assert_eq!(json["pagination"]["total"], 5);
    assert_eq!(json["pagination"]["totalPages"], 3);

    let logs = json["logs"].as_array().unwrap();
    assert_eq!(logs.len(), 2);
    // Newest first: msg-4, msg-3 | msg-2, msg-1 | msg-0
    assert_eq!(logs[0]["engineLogId"], "msg-2");
    assert_eq!(logs[1]["engineLogId"], "msg-1");
}

#[tokio::test]
async fn list_logs_defaults_to_first_page() {
    let app = build_test_app(ScriptedEngine::new());

    let json = body_json(get(&app.router, "/api/v1/logs").await).await;
    assert_eq!(json["pagination"]["page"], 1);
    assert_eq!(json["pagination"]["total"], 0);
    assert_eq!(json["pagination"]["totalPages"], 0);
    assert!(json["logs"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn huge_page_number_returns_an_empty_page() {
    let app = build_test_app(ScriptedEngine::new());

    let uri = format!("/api/v1/logs?page={}&limit=100", i64::MAX);
    let response = get(&app.router, &uri).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["pagination"]["page"], i64::MAX);
    assert!(json["logs"].as_array().unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Test: workflow apps have no history; fetch is a successful no-op
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fetch_on_workflow_app_is_a_no_op() {
    let app = build_test_app(
        ScriptedEngine::new().with_history_error(400, r#"{"code":"not_chat_app"}"#),
    );

    let response = post_json(&app.router, "/api/v1/logs/fetch", json!({})).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["fetched"], 0);
    assert!(app.logs.is_empty().await);
}

// ---------------------------------------------------------------------------
// Test: other engine failures surface as 502
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fetch_reports_engine_failure() {
    let app = build_test_app(ScriptedEngine::new().with_history_error(401, "invalid api key"));

    let response = post_json(&app.router, "/api/v1/logs/fetch", json!({})).await;
    assert_error(response, StatusCode::BAD_GATEWAY, "ENGINE_ERROR").await;
}
