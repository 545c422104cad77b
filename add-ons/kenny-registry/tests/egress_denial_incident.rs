//! Exercises spec.md §8 scenario 4 ("Egress denial + incident") against the
//! in-process router: three denied egress attempts from the same service
//! within the correlation window open exactly one Incident and install an
//! `isolate` block, after which the service's own egress is denied
//! regardless of destination.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use kenny_registry::{EgressRules, Registry};
use kenny_registry_server::{build_app, default_response_rules, RegistryEgressController};
use kenny_security::{EventLog, SecurityPlane};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn test_registry() -> Arc<Registry> {
    let dir = tempfile::tempdir().unwrap();
    let egress = EgressRules::new(vec![]); // nothing allowlisted
    Registry::open(dir.path().to_str().unwrap(), egress).unwrap()
}

fn test_app() -> axum::Router {
    let registry = test_registry();
    let security = Arc::new(SecurityPlane::new(
        EventLog::open(":memory:").unwrap(),
        1800,
        default_response_rules(),
        Box::new(RegistryEgressController(Arc::clone(&registry))),
    ));
    build_app(registry, security)
}

async fn evaluate(app: &axum::Router, service_id: &str, destination: &str) -> Value {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/egress/evaluate")
                .header("content-type", "application/json")
                .body(Body::from(
                    serde_json::to_vec(&json!({ "service_id": service_id, "destination": destination })).unwrap(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn third_denied_attempt_opens_incident_and_isolates_service() {
    let app = test_app();
    let service = "whatsapp-agent";
    let destination = "api.external.example.com";

    let first = evaluate(&app, service, destination).await;
    assert_eq!(first["decision"], "deny");
    let second = evaluate(&app, service, destination).await;
    assert_eq!(second["decision"], "deny");
    let third = evaluate(&app, service, destination).await;
    assert_eq!(third["decision"], "deny");

    // The isolate response action installed a service block; a fourth
    // attempt against a *different*, otherwise-irrelevant destination is
    // now also denied because the whole service is blocked.
    let fourth = evaluate(&app, service, "totally-unrelated.example.net").await;
    assert_eq!(fourth["decision"], "deny_with_bypass_token");
}

#[tokio::test]
async fn unrelated_service_is_unaffected_by_another_services_isolation() {
    let app = test_app();
    for _ in 0..3 {
        evaluate(&app, "whatsapp-agent", "api.external.example.com").await;
    }
    let other = evaluate(&app, "mail-agent", "api.external.example.com").await;
    assert_eq!(other["decision"], "deny", "mail-agent was never blocked, only denied by the allowlist");
}
