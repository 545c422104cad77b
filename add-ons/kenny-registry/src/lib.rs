//! Agent Registry HTTP service: manifest validation, capability
//! indexing with health-aware tie-break, health polling, and the egress
//! allowlist + security-plane response actions. Exposed as a library so
//! integration tests can build the router against an in-process,
//! temp-directory-backed `Registry` without binding a real socket.

use async_stream::stream;
use axum::extract::{Path, State};
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use kenny_core::error::KennyError;
use kenny_core::manifest::AgentManifest;
use kenny_core::security::{EgressDecision as CoreEgressDecision, ResponseAction, ResponseRule, Severity};
use kenny_registry::Registry;
use kenny_security::response_actions::EgressController;
use kenny_security::SecurityPlane;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

pub struct RegistryEgressController(pub Arc<Registry>);

impl EgressController for RegistryEgressController {
    fn block_service(&self, service_id: &str, ttl: Option<Duration>) {
        self.0.egress().block_service(service_id, ttl);
    }

    fn block_destination(&self, destination: &str, ttl: Option<Duration>) {
        self.0.egress().block_destination(destination, ttl);
    }
}

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub security: Arc<SecurityPlane>,
}

#[derive(Deserialize)]
struct RegisterRequest {
    manifest: AgentManifest,
    base_url: String,
    health_endpoint: String,
}

#[derive(Serialize)]
struct RegisterResponse {
    agent_id: String,
    registered_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Deserialize)]
struct EgressCheckRequest {
    service_id: String,
    destination: String,
    #[serde(default)]
    port: Option<u16>,
}

/// Default response rules until an operator supplies their own.
pub fn default_response_rules() -> Vec<ResponseRule> {
    vec![ResponseRule {
        priority: 0,
        event_kind_pattern: "egress_attempt".to_string(),
        min_severity: Severity::High,
        actions: vec![ResponseAction::Block, ResponseAction::Isolate, ResponseAction::Notify],
    }]
}

pub fn build_app(registry: Arc<Registry>, security: Arc<SecurityPlane>) -> Router {
    let state = AppState { registry, security };
    Router::new()
        .route("/agents/register", post(register))
        .route("/agents/{agent_id}", delete(deregister).get(get_agent))
        .route("/agents", get(list_agents))
        .route("/capabilities", get(list_capabilities))
        .route("/capabilities/{verb}", get(lookup_capability))
        .route("/egress/evaluate", post(evaluate_egress))
        .route("/system/health", get(system_health))
        .route("/system/health/stream", get(system_health_stream))
        .with_state(state)
}

async fn register(State(state): State<AppState>, Json(req): Json<RegisterRequest>) -> impl IntoResponse {
    match state.registry.register(req.manifest, req.base_url, req.health_endpoint).await {
        Ok(agent_id) => {
            let registered_at = state.registry.get_agent(&agent_id).map(|r| r.registered_at).unwrap_or_else(chrono::Utc::now);
            Json(RegisterResponse { agent_id, registered_at }).into_response()
        }
        Err(err) => err.into_response(),
    }
}

async fn deregister(State(state): State<AppState>, Path(agent_id): Path<String>) -> impl IntoResponse {
    match state.registry.deregister(&agent_id).await {
        Ok(()) => axum::http::StatusCode::NO_CONTENT.into_response(),
        Err(err) => err.into_response(),
    }
}

async fn list_agents(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.registry.list_agents())
}

async fn get_agent(State(state): State<AppState>, Path(agent_id): Path<String>) -> impl IntoResponse {
    match state.registry.get_agent(&agent_id) {
        Some(record) => Json(record).into_response(),
        None => KennyError::AgentUnknown { agent_id }.into_response(),
    }
}

async fn list_capabilities(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.registry.list_capabilities())
}

async fn lookup_capability(State(state): State<AppState>, Path(verb): Path<String>) -> impl IntoResponse {
    let candidates = state.registry.lookup_capability(&verb);
    if candidates.is_empty() {
        KennyError::CapabilityUnknown { verb }.into_response()
    } else {
        Json(candidates).into_response()
    }
}

/// Not part of its core endpoint list but required for the security
/// plane's correlation to observe real egress attempts rather than only the
/// ones made on an agent's behalf by its own process.
async fn evaluate_egress(State(state): State<AppState>, Json(req): Json<EgressCheckRequest>) -> impl IntoResponse {
    let decision = state.registry.evaluate_egress(&req.service_id, &req.destination, req.port);
    state.security.record_egress_attempt(&req.service_id, &req.destination, decision);
    Json(EgressDecisionResponse::from(decision))
}

#[derive(Serialize)]
struct EgressDecisionResponse {
    decision: &'static str,
}

impl From<CoreEgressDecision> for EgressDecisionResponse {
    fn from(d: CoreEgressDecision) -> Self {
        let decision = match d {
            CoreEgressDecision::Allow => "allow",
            CoreEgressDecision::Deny => "deny",
            CoreEgressDecision::DenyWithBypassToken => "deny_with_bypass_token",
        };
        Self { decision }
    }
}

async fn system_health(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.registry.system_health())
}

async fn system_health_stream(State(state): State<AppState>) -> impl IntoResponse {
    let stream = stream! {
        let mut interval = tokio::time::interval(Duration::from_secs(5));
        loop {
            interval.tick().await;
            let snapshot = state.registry.system_health();
            yield Ok::<_, std::convert::Infallible>(Event::default().json_data(snapshot).unwrap_or_else(|_| Event::default().data("{}")));
        }
    };
    Sse::new(stream)
}
