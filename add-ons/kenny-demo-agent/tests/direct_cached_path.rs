//! Exercises spec.md §8 scenario 1 ("Direct cached path") against the
//! in-process router: the first `messages.search` call misses every cache
//! tier and executes the handler; an immediate repeat with identical
//! parameters is served from L1.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use kenny_agent::AgentConfig;
use kenny_demo_agent::{build_app, build_base};
use serde_json::{json, Value};
use tower::ServiceExt;

fn test_config() -> AgentConfig {
    AgentConfig::load("mail-agent", "http://127.0.0.1:1").expect("load AgentConfig")
}

async fn call_capability(app: &axum::Router, verb: &str, input: Value) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/capabilities/{verb}"))
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&json!({ "input": input })).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn first_call_misses_then_repeat_serves_from_cache() {
    let base = build_base(&test_config()).await;
    let app = build_app(base);

    let params = json!({ "mailbox": "Inbox", "limit": 3 });

    let (status, first) = call_capability(&app, "messages.search", params.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["items"].as_array().unwrap().len(), 3);

    let (status, second) = call_capability(&app, "messages.search", params).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second, first, "repeat call with identical parameters must return the same cached result");
}

#[tokio::test]
async fn unknown_verb_returns_capability_unknown() {
    let base = build_base(&test_config()).await;
    let app = build_app(base);

    let (status, body) = call_capability(&app, "messages.unknown", json!({})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error_kind"], "capability_unknown");
}

#[tokio::test]
async fn capabilities_listing_includes_all_reference_verbs() {
    let base = build_base(&test_config()).await;
    let app = build_app(base);

    let response = app
        .oneshot(Request::builder().uri("/capabilities").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let catalog: Value = serde_json::from_slice(&body).unwrap();
    let verbs: Vec<&str> = catalog.as_array().unwrap().iter().map(|c| c["verb"].as_str().unwrap()).collect();
    assert!(verbs.contains(&"messages.search"));
    assert!(verbs.contains(&"messages.list"));
    assert!(verbs.contains(&"contacts.resolve"));
}
