//! HTTP-level tests for the REST API, driven through the router without a socket.

mod common;

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use common::*;

fn app(h: &Harness) -> Router {
    infraflow::api::router(h.engine.clone(), 1024 * 1024)
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn delete(uri: &str) -> Request<Body> {
    Request::builder()
        .method("DELETE")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn default_harness() -> Harness {
    harness(Arc::new(reasoner()), FixedValidator::always(90.0, 0))
}

#[tokio::test]
async fn health_reports_ok() {
    let h = default_harness();
    let (status, body) = send(app(&h), get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn start_without_approval_completes() {
    let h = default_harness();
    let (status, body) = send(
        app(&h),
        post(
            "/executions",
            json!({
                "request": "a storage account in westeurope",
                "execution_id": "api-done",
                "config": { "require_approval": false }
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["code"], "completed");
    assert_eq!(body["execution_id"], "api-done");
    assert_eq!(body["output"]["status"], "completed");
    assert!(
        body["output"]["summary"]
            .as_str()
            .unwrap()
            .contains("Approval not required.")
    );
}

#[tokio::test]
async fn approval_suspends_and_resume_completes() {
    let h = default_harness();
    let (status, body) = send(
        app(&h),
        post(
            "/executions",
            json!({ "request": "a storage account", "execution_id": "api-wait" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["code"], "suspended");
    assert_eq!(body["resume_stage"], "approval_decision");
    assert_eq!(body["answer_slot"], "approval_response");
    assert!(body["reason"].as_str().unwrap().starts_with("Approval required for tf-"));

    let (status, view) = send(app(&h), get("/executions/api-wait")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["status"], "suspended");
    assert_eq!(view["resume_stage"], "approval_decision");

    let (status, body) = send(
        app(&h),
        post("/executions/api-wait/resume", json!({ "answer": "approve" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["code"], "completed");
    assert!(
        body["output"]["summary"]
            .as_str()
            .unwrap()
            .contains("Approved by reviewer.")
    );
}

#[tokio::test]
async fn start_rejects_unknown_config_keys() {
    let h = default_harness();
    let (status, body) = send(
        app(&h),
        post(
            "/executions",
            json!({ "request": "anything", "config": { "turbo": true } }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().starts_with("Invalid request body"));
}

#[tokio::test]
async fn start_rejects_empty_request() {
    let h = default_harness();
    let (status, _) = send(app(&h), post("/executions", json!({ "request": "   " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_execution_is_not_found() {
    let h = default_harness();
    let (status, _) = send(app(&h), get("/executions/nope")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        app(&h),
        post("/executions/nope/resume", json!({ "answer": "yes" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn cancel_suspended_then_conflict() {
    let h = default_harness();
    send(
        app(&h),
        post(
            "/executions",
            json!({ "request": "a storage account", "execution_id": "api-cancel" }),
        ),
    )
    .await;

    let (status, view) = send(app(&h), delete("/executions/api-cancel")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["status"], "cancelled");
    assert_eq!(
        view["final_output"]["summary"],
        "Execution cancelled while waiting for approval_response"
    );

    let (status, _) = send(app(&h), delete("/executions/api-cancel")).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn list_filters_by_status() {
    let h = default_harness();
    send(
        app(&h),
        post(
            "/executions",
            json!({ "request": "waits", "execution_id": "api-list-a" }),
        ),
    )
    .await;
    send(
        app(&h),
        post(
            "/executions",
            json!({
                "request": "finishes",
                "execution_id": "api-list-b",
                "config": { "require_approval": false }
            }),
        ),
    )
    .await;

    let (status, body) = send(app(&h), get("/executions")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 2);

    let (status, body) = send(app(&h), get("/executions?status=suspended")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
    assert_eq!(body["executions"][0]["execution_id"], "api-list-a");

    let (status, _) = send(app(&h), get("/executions?status=sleeping")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn graph_describes_the_pipeline() {
    let h = default_harness();
    let (status, body) = send(app(&h), get("/graph")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["entry"], "requirements");

    let stages = body["stages"].as_array().unwrap();
    assert_eq!(stages.len(), 9);
    let consultation = stages
        .iter()
        .find(|s| s["id"] == "consultation")
        .unwrap();
    assert_eq!(consultation["critical"], false);
    assert_eq!(consultation["phase"], "planning");
    assert_eq!(consultation["successors"], json!(["generation"]));

    assert!(body["invocation_bound"].as_u64().unwrap() > 0);
    assert!(!body["edges"].as_array().unwrap().is_empty());
}
