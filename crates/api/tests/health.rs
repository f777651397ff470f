//! Integration tests for the health check endpoint and general HTTP behaviour.

mod common;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use common::{body_json, build_test_app, build_test_app_with, get, test_config};
use longrun_engine::scripted::ScriptedEngine;
use tower::ServiceExt;

// ---------------------------------------------------------------------------
// Test: GET /health returns 200 with expected JSON fields
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_check_returns_ok_with_json() {
    let app = build_test_app(ScriptedEngine::new());
    let response = get(&app.router, "/health").await;

    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
    assert_eq!(json["db_healthy"], true);
    assert_eq!(json["engine"]["base_url_set"], true);
    assert_eq!(json["engine"]["api_key_set"], true);
}

// ---------------------------------------------------------------------------
// Test: unreachable store or missing engine settings degrade the status
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_check_reports_unreachable_store() {
    let app = build_test_app(ScriptedEngine::new());
    app.jobs.fail_next_ops(1);

    let json = body_json(get(&app.router, "/health").await).await;
    assert_eq!(json["status"], "degraded");
    assert_eq!(json["db_healthy"], false);
}

#[tokio::test]
async fn health_check_reports_missing_engine_key() {
    let mut config = test_config();
    config.engine_api_key = String::new();
    let app = build_test_app_with(ScriptedEngine::new(), config);

    let json = body_json(get(&app.router, "/health").await).await;
    assert_eq!(json["status"], "degraded");
    assert_eq!(json["engine"]["api_key_set"], false);
    assert!(!json.to_string().contains("app-test-key"));
}

// ---------------------------------------------------------------------------
// Test: Unknown route returns 404
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_route_returns_404() {
    let app = build_test_app(ScriptedEngine::new());
    let response = get(&app.router, "/this-route-does-not-exist").await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// Test: x-request-id header is present in response
// ---------------------------------------------------------------------------

#[tokio::test]
async fn response_contains_x_request_id_header() {
    let app = build_test_app(ScriptedEngine::new());
    let response = get(&app.router, "/health").await;

    let request_id = response
        .headers()
        .get("x-request-id")
        .expect("Response must contain an x-request-id header");
    assert_eq!(request_id.to_str().unwrap().len(), 36, "x-request-id should be a UUID string");
}

// ---------------------------------------------------------------------------
// Test: CORS preflight OPTIONS request returns correct headers
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cors_preflight_returns_correct_headers() {
    let app = build_test_app(ScriptedEngine::new());

    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/api/v1/jobs/start")
        .header("Origin", "http://localhost:5173")
        .header("Access-Control-Request-Method", "POST")
        .header("Access-Control-Request-Headers", "content-type")
        .body(Body::empty())
        .unwrap();

    let response = app.router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let headers = response.headers();
    let allow_origin = headers
        .get("access-control-allow-origin")
        .expect("Missing Access-Control-Allow-Origin header")
        .to_str()
        .unwrap();
    assert_eq!(allow_origin, "http://localhost:5173");

    let allow_methods = headers
        .get("access-control-allow-methods")
        .expect("Missing Access-Control-Allow-Methods header")
        .to_str()
        .unwrap();
    assert!(
        allow_methods.contains("POST"),
        "Allow-Methods should contain POST, got: {allow_methods}"
    );
}
