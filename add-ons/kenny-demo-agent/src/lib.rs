//! Reference capability-providing service built on `kenny-agent`'s
//! `AgentServiceBase`: advertises `messages.search`, `messages.list`, and
//! `contacts.resolve`. Exposed as a library so integration tests can build
//! the router in-process without a live registry or Redis.

use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use kenny_agent::{AgentConfig, AgentServiceBase, CapabilityHandler};
use kenny_core::error::KennyError;
use kenny_core::manifest::{AgentManifest, AgentType, CapabilityDescriptor, HealthCheckSpec, SafetyAnnotation, Sla};
use kenny_core::plan::ConfidenceResult;
use serde::Deserialize;
use std::sync::Arc;

pub struct MessagesSearch;

#[async_trait]
impl CapabilityHandler for MessagesSearch {
    async fn handle(&self, params: serde_json::Value) -> Result<ConfidenceResult, KennyError> {
        let mailbox = params.get("mailbox").and_then(|v| v.as_str()).unwrap_or("Inbox");
        let limit = params.get("limit").and_then(|v| v.as_u64()).unwrap_or(10) as usize;
        let owner = params.get("owner").and_then(|v| v.as_str());

        let mut items: Vec<serde_json::Value> = (1..=3)
            .map(|i| {
                serde_json::json!({
                    "id": format!("msg-{i}"),
                    "mailbox": mailbox,
                    "from": owner.unwrap_or("someone@example.com"),
                    "subject": format!("Re: project update {i}"),
                })
            })
            .collect();
        items.truncate(limit.max(1));

        Ok(ConfidenceResult {
            value: serde_json::json!({ "items": items }),
            confidence: 0.95,
            fallback_used: false,
            fallback_reason: None,
        })
    }
}

pub struct MessagesList;

#[async_trait]
impl CapabilityHandler for MessagesList {
    async fn handle(&self, params: serde_json::Value) -> Result<ConfidenceResult, KennyError> {
        let mailbox = params.get("mailbox").and_then(|v| v.as_str()).unwrap_or("Inbox");
        Ok(ConfidenceResult {
            value: serde_json::json!({ "items": [{"id": "msg-1", "mailbox": mailbox}] }),
            confidence: 0.6,
            fallback_used: false,
            fallback_reason: None,
        })
    }
}

pub struct ContactsResolve;

#[async_trait]
impl CapabilityHandler for ContactsResolve {
    async fn handle(&self, params: serde_json::Value) -> Result<ConfidenceResult, KennyError> {
        let name = params.get("name").and_then(|v| v.as_str()).unwrap_or_default();
        if name.is_empty() {
            return Ok(ConfidenceResult {
                value: serde_json::Value::Null,
                confidence: 0.2,
                fallback_used: false,
                fallback_reason: None,
            });
        }
        Ok(ConfidenceResult {
            value: serde_json::json!({ "name": name, "email": format!("{}@example.com", name.to_lowercase()) }),
            confidence: 0.9,
            fallback_used: false,
            fallback_reason: None,
        })
    }
}

pub fn capability_descriptors() -> Vec<CapabilityDescriptor> {
    vec![
        CapabilityDescriptor {
            verb: "messages.search".to_string(),
            input_schema: serde_json::json!({"type": "object", "properties": {"mailbox": {"type": "string"}, "limit": {"type": "integer"}, "owner": {"type": "string"}}}),
            output_schema: serde_json::json!({"type": "object", "properties": {"items": {"type": "array"}}}),
            safety_annotations: [SafetyAnnotation::ReadOnly, SafetyAnnotation::LocalOnly].into_iter().collect(),
            description: "Search messages in a mailbox".to_string(),
            sla: Sla { target_ms: 200, max_ms: 2000 },
        },
        CapabilityDescriptor {
            verb: "messages.list".to_string(),
            input_schema: serde_json::json!({"type": "object", "properties": {"mailbox": {"type": "string"}}}),
            output_schema: serde_json::json!({"type": "object", "properties": {"items": {"type": "array"}}}),
            safety_annotations: [SafetyAnnotation::ReadOnly, SafetyAnnotation::LocalOnly].into_iter().collect(),
            description: "List recent messages in a mailbox".to_string(),
            sla: Sla { target_ms: 150, max_ms: 1500 },
        },
        CapabilityDescriptor {
            verb: "contacts.resolve".to_string(),
            input_schema: serde_json::json!({"type": "object", "required": ["name"], "properties": {"name": {"type": "string"}}}),
            output_schema: serde_json::json!({"type": "object", "properties": {"name": {"type": "string"}, "email": {"type": "string"}}}),
            safety_annotations: [SafetyAnnotation::ReadOnly].into_iter().collect(),
            description: "Resolve a contact name to an address".to_string(),
            sla: Sla { target_ms: 100, max_ms: 1000 },
        },
    ]
}

pub fn manifest(agent_id: &str, base_url: &str) -> AgentManifest {
    AgentManifest {
        agent_id: agent_id.to_string(),
        display_name: "Demo Mail & Contacts Agent".to_string(),
        version: "1.0.0".to_string(),
        description: "Reference agent exercising messages.search/list and contacts.resolve".to_string(),
        agent_type: AgentType::IntelligentService,
        capabilities: capability_descriptors(),
        data_scopes: ["mail:inbox".to_string(), "contacts:live".to_string()].into_iter().collect(),
        tool_access: Default::default(),
        egress_domains: Default::default(),
        health_check: HealthCheckSpec { endpoint: format!("{base_url}/health"), interval_s: 30 },
    }
}

#[derive(Clone)]
pub struct AppState {
    pub base: Arc<AgentServiceBase>,
}

#[derive(Deserialize)]
struct CapabilityRequest {
    input: serde_json::Value,
}

#[derive(Deserialize)]
struct QueryRequest {
    query: String,
    #[serde(default)]
    context: Option<String>,
}

/// Builds a ready-to-register `AgentServiceBase` with all three reference
/// handlers wired in. Callers decide whether to self-register with a
/// Registry and whether to spawn the cache warmer.
pub async fn build_base(config: &AgentConfig) -> Arc<AgentServiceBase> {
    let mut base = AgentServiceBase::new(config, capability_descriptors()).await;
    base.register_handler("messages.search", Arc::new(MessagesSearch));
    base.register_handler("messages.list", Arc::new(MessagesList));
    base.register_handler("contacts.resolve", Arc::new(ContactsResolve));
    Arc::new(base)
}

pub fn build_app(base: Arc<AgentServiceBase>) -> Router {
    let state = AppState { base };
    Router::new()
        .route("/capabilities/{verb}", post(handle_capability))
        .route("/query", post(query))
        .route("/health", get(health))
        .route("/capabilities", get(capabilities))
        .with_state(state)
}

/// Best-effort self-registration: logged and otherwise ignored on failure, since
/// an operator may start the registry after the agent during local development.
pub async fn register_with_registry(registry_base_url: &str, manifest: &AgentManifest, base_url: &str) {
    let client = reqwest::Client::new();
    let body = serde_json::json!({
        "manifest": manifest,
        "base_url": base_url,
        "health_endpoint": manifest.health_check.endpoint,
    });
    match client.post(format!("{registry_base_url}/agents/register")).json(&body).send().await {
        Ok(resp) if resp.status().is_success() => tracing::info!(agent_id = %manifest.agent_id, "registered with registry"),
        Ok(resp) => tracing::warn!(status = %resp.status(), "registry rejected registration"),
        Err(err) => tracing::warn!(error = %err, "registry unreachable at startup; continuing unregistered"),
    }
}

async fn handle_capability(State(state): State<AppState>, Path(verb): Path<String>, Json(req): Json<CapabilityRequest>) -> Response {
    let descriptor = match state.base.capability(&verb) {
        Some(d) => d,
        None => return KennyError::CapabilityUnknown { verb }.into_response(),
    };
    let timeout_ms = descriptor.sla.max_ms;
    match state.base.handle_capability(&verb, req.input, timeout_ms).await {
        Ok(value) => Json(value).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn query(State(state): State<AppState>, Json(req): Json<QueryRequest>) -> Response {
    match state.base.query(&req.query, req.context.as_deref()).await {
        Ok(result) => Json(result).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn health(State(state): State<AppState>) -> Response {
    Json(state.base.health()).into_response()
}

async fn capabilities(State(state): State<AppState>) -> Response {
    Json(state.base.catalog()).into_response()
}
