//! HTTP API integration tests
//!
//! Tests for the dispatch endpoints:
//! - POST /v1/dispatch
//! - POST /v1/route
//! - GET /v1/targets
//! - GET /v1/audit
//! - GET /metrics

use axum::http::StatusCode;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tiered_dispatch::testing::ScriptedBackend;

use crate::common::{TestApp, CLOUD, LOCAL, OCR};

fn cloud_profile() -> Value {
    json!({
        "complexity_level": "complex",
        "domain_type": "ai",
        "privacy_level": "normal",
        "response_time": "normal"
    })
}

#[tokio::test]
async fn test_dispatch_returns_terminal_response() {
    let app = TestApp::healthy();
    let server = app.server();

    let response = server
        .post("/v1/dispatch")
        .json(&json!({
            "profile": cloud_profile(),
            "payload": {"query": "latest release notes"}
        }))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["target"], CLOUD);
    assert_eq!(body["result"]["served_by"], CLOUD);
    assert_eq!(
        body["tier_trace"],
        json!(["product", "workflow", "coordinator", "workflow_component", "adapter"])
    );
    assert!(body["correlation_id"].is_string());
    assert!(body["decision_id"].is_string());
    assert_eq!(app.backend(CLOUD).seen()[0].payload["query"], "latest release notes");
}

#[tokio::test]
async fn test_dispatch_invalid_profile_is_bad_request() {
    let app = TestApp::healthy();
    let server = app.server();

    let response = server
        .post("/v1/dispatch")
        .json(&json!({"profile": {"complexity_level": "galactic"}}))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["status"], "error");
    assert_eq!(body["error_detail"]["code"], "INVALID_PROFILE");
    assert_eq!(body["tier_trace"], json!([]));
    assert!(body["correlation_id"].is_string());
    assert_eq!(app.total_calls(), 0);
}

#[tokio::test]
async fn test_dispatch_zero_timeout_is_rejected() {
    let app = TestApp::healthy();
    let server = app.server();

    let response = server
        .post("/v1/dispatch")
        .json(&json!({"profile": cloud_profile(), "timeout_ms": 0}))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["status"], "error");
    assert_eq!(body["error_detail"]["code"], "BAD_REQUEST");
    assert!(body["error_detail"]["message"]
        .as_str()
        .unwrap()
        .contains("timeout_ms"));
}

#[tokio::test]
async fn test_dispatch_failure_carries_status_and_detail() {
    let app = TestApp::with_backends(vec![(CLOUD, ScriptedBackend::failing(CLOUD))]);
    let server = app.server();

    let response = server
        .post("/v1/dispatch")
        .json(&json!({"profile": cloud_profile()}))
        .await;

    response.assert_status(StatusCode::BAD_GATEWAY);
    let body: Value = response.json();
    assert_eq!(body["status"], "error");
    assert_eq!(body["error_detail"]["code"], "BACKEND_ERROR");
    assert_eq!(body["error_detail"]["failing_tier"], "adapter");
    assert!(body.get("result").is_none());
}

#[tokio::test]
async fn test_dispatch_with_all_targets_down_is_unavailable() {
    let app = TestApp::healthy();
    for target in [LOCAL, CLOUD, OCR] {
        app.take_down(target).await;
    }
    let server = app.server();

    let response = server
        .post("/v1/dispatch")
        .json(&json!({"profile": {"special_category": "traditional_chinese_ocr"}}))
        .await;

    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = response.json();
    assert_eq!(body["error_detail"]["code"], "FALLBACK_EXHAUSTED");
    assert_eq!(body["tier_trace"], json!([]));
}

#[tokio::test]
async fn test_dispatch_unknown_component_is_bad_request() {
    let app = TestApp::healthy();
    let server = app.server();

    let response = server
        .post("/v1/dispatch")
        .json(&json!({
            "profile": cloud_profile(),
            "components": ["test_manager_mcp", "coffee_machine"]
        }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["error_detail"]["code"], "BAD_REQUEST");
    assert_eq!(app.total_calls(), 0);
}

#[tokio::test]
async fn test_route_explains_without_dispatching() {
    let app = TestApp::healthy();
    let server = app.server();

    let response = server
        .post("/v1/route")
        .json(&json!({
            "profile": {
                "complexity_level": "simple",
                "language_type": "chinese",
                "privacy_level": "sensitive"
            }
        }))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["chosen_target"], LOCAL);
    assert_eq!(body["is_special_override"], false);
    assert_eq!(
        body["contributing_dimensions"],
        json!(["complexity_level", "language_type", "privacy_level"])
    );
    let local = body["score_per_target"][LOCAL].as_f64().unwrap();
    assert!((local - 0.65).abs() < 1e-9);
    assert_eq!(app.total_calls(), 0);
    assert!(app.state.audit.is_empty());
}

#[tokio::test]
async fn test_route_rejects_unknown_fields() {
    let app = TestApp::healthy();
    let server = app.server();

    let response = server
        .post("/v1/route")
        .json(&json!({"profile": {"mood": "cheerful"}}))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_targets_lists_every_record() {
    let app = TestApp::healthy();
    app.take_down(OCR).await;
    let server = app.server();

    let response = server.get("/v1/targets").await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["privacy_target"], LOCAL);
    assert_eq!(body["capability_target"], CLOUD);
    let targets = body["targets"].as_array().unwrap();
    assert_eq!(targets.len(), 6);
    let ocr = targets.iter().find(|t| t["target_id"] == OCR).unwrap();
    assert_eq!(ocr["state"], "unreachable");
}

#[tokio::test]
async fn test_audit_lists_recent_dispatches() {
    let app = TestApp::healthy();
    let server = app.server();

    server
        .post("/v1/dispatch")
        .json(&json!({"profile": cloud_profile()}))
        .await
        .assert_status_ok();
    server
        .post("/v1/dispatch")
        .json(&json!({"profile": {"special_category": "traditional_chinese_ocr"}}))
        .await
        .assert_status_ok();

    let response = server.get("/v1/audit").add_query_param("limit", 1).await;

    response.assert_status_ok();
    let body: Value = response.json();
    let entries = body["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["special_category"], "traditional_chinese_ocr");
    assert_eq!(entries[0]["resolved_target"], OCR);
    assert_eq!(entries[0]["status"], "ok");

    let all: Value = server.get("/v1/audit").await.json();
    assert_eq!(all["entries"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_metrics_endpoint_renders() {
    tiered_dispatch::routes::metrics::init_metrics();
    let app = TestApp::healthy();
    let server = app.server();

    server
        .post("/v1/dispatch")
        .json(&json!({"profile": cloud_profile()}))
        .await
        .assert_status_ok();

    let response = server.get("/metrics").await;

    response.assert_status_ok();
    assert!(response.text().contains("dispatch_requests_total"));
}
