//! Gateway HTTP service: unified `/query` entry point that
//! classifies each request as a direct capability call or an orchestrated
//! Coordinator plan, an SSE facade over the Coordinator's progressive stream,
//! and aggregated `/health` / `/agents` / `/capabilities` views built from the
//! Registry's last-known-good snapshot.

use async_stream::stream;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::HeaderValue;
use axum::response::sse::Event;
use axum::response::{IntoResponse, Response, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use kenny_core::client::{AgentClient, RegistryClient};
use kenny_core::error::KennyError;
use kenny_core::sse::{ChunkType, StreamChunk};
use kenny_gateway_server::{classify, ClassificationCache, GatewayConfig, RouteDecision, SnapshotCache};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use uuid::Uuid;

#[derive(Clone)]
struct AppState {
    config: Arc<GatewayConfig>,
    registry: RegistryClient,
    agent_client: AgentClient,
    http: reqwest::Client,
    snapshot: Arc<SnapshotCache>,
    classification_cache: Arc<ClassificationCache>,
    inflight: Arc<Semaphore>,
}

#[derive(Deserialize)]
struct QueryRequest {
    query: String,
    #[serde(default)]
    context: Option<String>,
}

#[derive(Serialize)]
struct QueryResponse {
    result: serde_json::Value,
    execution_path: Vec<String>,
    duration_ms: u64,
    classification: &'static str,
}

#[derive(Deserialize)]
struct StreamQuery {
    query: String,
    #[serde(default)]
    context: Option<String>,
}

#[tokio::main]
async fn main() {
    kenny_core::config::load_dotenv();
    kenny_core::config::init_tracing();

    let config = GatewayConfig::load().expect("load GatewayConfig");
    let registry = RegistryClient::new(config.registry_base_url.clone());
    let agent_client = AgentClient::new();
    let http = reqwest::Client::builder().timeout(Duration::from_secs(60)).build().expect("build reqwest client");
    let snapshot = Arc::new(SnapshotCache::new(Duration::from_secs(config.agent_snapshot_ttl_s)));
    let classification_cache = Arc::new(ClassificationCache::new(Duration::from_secs(config.classification_cache_ttl_s)));
    let inflight = Arc::new(Semaphore::new(config.inflight_max));
    let bind_addr = config.bind_addr.clone();

    let state = AppState { config: Arc::new(config), registry, agent_client, http, snapshot, classification_cache, inflight };

    let app = Router::new()
        .route("/query", post(query))
        .route("/stream", get(stream))
        .route("/health", get(health))
        .route("/agents", get(agents))
        .route("/capabilities", get(capabilities))
        .route("/agent/{agent_id}/{verb}", post(direct_agent_call))
        .with_state(state);

    let addr: std::net::SocketAddr = bind_addr.parse().expect("valid bind_addr");
    tracing::info!(%addr, "kenny-gateway listening");
    let listener = tokio::net::TcpListener::bind(addr).await.expect("bind gateway listener");
    axum::serve(listener, app).await.expect("gateway server error");
}

/// Acquires an admission slot or fails fast with `overloaded`.
fn try_admit(state: &AppState) -> Result<tokio::sync::OwnedSemaphorePermit, KennyError> {
    Arc::clone(&state.inflight).try_acquire_owned().map_err(|_| KennyError::Overloaded)
}

async fn resolve_route(state: &AppState, query: &str) -> RouteDecision {
    if let Some(cached) = state.classification_cache.get(query) {
        return cached;
    }
    let decision = match state.snapshot.get_or_refresh(&state.registry).await {
        Ok(snap) => classify(query, state.config.rule_threshold, &snap.agents, &snap.capabilities),
        Err(_) => RouteDecision::Coordinator,
    };
    state.classification_cache.put(query, decision.clone());
    decision
}

async fn query(State(state): State<AppState>, Json(req): Json<QueryRequest>) -> Response {
    let _permit = match try_admit(&state) {
        Ok(p) => p,
        Err(err) => return err.into_response(),
    };

    let started = Instant::now();
    let decision = resolve_route(&state, &req.query).await;

    let (response, trace) = match decision {
        RouteDecision::Direct { agent_id, verb, base_url } => {
            let result = state
                .agent_client
                .call_capability(&base_url, &verb, serde_json::json!({ "query": req.query }), 30_000)
                .await;
            match result {
                Ok(value) => {
                    let body = QueryResponse {
                        result: value,
                        execution_path: vec![format!("{agent_id}:{verb}")],
                        duration_ms: started.elapsed().as_millis() as u64,
                        classification: "direct",
                    };
                    (Json(body).into_response(), format!("direct:{agent_id}:{verb}"))
                }
                Err(err) => (err.into_response(), format!("direct:{agent_id}:{verb}:error")),
            }
        }
        RouteDecision::Coordinator => match coordinator_process(&state, &req).await {
            Ok(body) => (Json(body).into_response(), "coordinator".to_string()),
            Err(err) => match best_effort_direct_fallback(&state, &req).await {
                Some(body) => (Json(body).into_response(), "coordinator_unavailable:direct_fallback".to_string()),
                None => (err.into_response(), "coordinator_unavailable".to_string()),
            },
        },
    };

    let mut response = response;
    if let Ok(value) = HeaderValue::from_str(&trace) {
        response.headers_mut().insert("x-kenny-route", value);
    }
    response
}

async fn coordinator_process(state: &AppState, req: &QueryRequest) -> Result<QueryResponse, KennyError> {
    let started = Instant::now();
    let url = format!("{}/process", state.config.coordinator_base_url);
    let body = serde_json::json!({ "query": req.query, "context": req.context });
    let resp = state
        .http
        .post(&url)
        .json(&body)
        .send()
        .await
        .map_err(|e| KennyError::Internal(format!("coordinator unreachable: {e}")))?;
    if !resp.status().is_success() {
        return Err(KennyError::Internal(format!("coordinator returned {}", resp.status())));
    }
    let value: serde_json::Value =
        resp.json().await.map_err(|e| KennyError::Internal(format!("coordinator response: {e}")))?;
    let execution_path = value
        .get("plan")
        .and_then(|p| p.get("calls"))
        .and_then(|c| c.as_array())
        .map(|calls| calls.iter().filter_map(|c| c.get("verb").and_then(|v| v.as_str()).map(str::to_string)).collect())
        .unwrap_or_default();
    Ok(QueryResponse { result: value, execution_path, duration_ms: started.elapsed().as_millis() as u64, classification: "coordinator" })
}

/// Gateway failure semantics: when the Coordinator is unreachable,
/// degrade to best-effort direct routing for an utterance the rule table can
/// confidently classify, rather than always surfacing `coordinator_unavailable`.
async fn best_effort_direct_fallback(state: &AppState, req: &QueryRequest) -> Option<QueryResponse> {
    let snap = state.snapshot.get_or_refresh(&state.registry).await.ok()?;
    match classify(&req.query, state.config.rule_threshold, &snap.agents, &snap.capabilities) {
        RouteDecision::Direct { agent_id, verb, base_url } => {
            let started = Instant::now();
            let value = state
                .agent_client
                .call_capability(&base_url, &verb, serde_json::json!({ "query": req.query }), 30_000)
                .await
                .ok()?;
            Some(QueryResponse {
                result: value,
                execution_path: vec![format!("{agent_id}:{verb}")],
                duration_ms: started.elapsed().as_millis() as u64,
                classification: "direct",
            })
        }
        RouteDecision::Coordinator => None,
    }
}

async fn stream(State(state): State<AppState>, Query(params): Query<StreamQuery>) -> Response {
    let _permit = match try_admit(&state) {
        Ok(p) => p,
        Err(err) => return err.into_response(),
    };

    let decision = resolve_route(&state, &params.query).await;
    match decision {
        RouteDecision::Direct { agent_id, verb, base_url } => {
            direct_call_stream(state.agent_client.clone(), agent_id, verb, base_url, params.query).await.into_response()
        }
        RouteDecision::Coordinator => proxy_coordinator_stream(&state, &params).await,
    }
}

/// Synthesizes the same chunk shape the Coordinator emits for a
/// direct-routed query, so SSE consumers don't need to special-case the path.
async fn direct_call_stream(
    client: AgentClient,
    agent_id: String,
    verb: String,
    base_url: String,
    query: String,
) -> Sse<impl futures_util::Stream<Item = Result<Event, std::convert::Infallible>>> {
    let correlation_id = Uuid::new_v4();
    let body = stream! {
        yield Ok(Event::default().data(StreamChunk::new(ChunkType::AgentCallStart, correlation_id, serde_json::json!({ "agent_id": agent_id, "verb": verb })).to_sse_json()));
        let outcome = client.call_capability(&base_url, &verb, serde_json::json!({ "query": query }), 30_000).await;
        match outcome {
            Ok(value) => {
                yield Ok(Event::default().data(StreamChunk::new(ChunkType::AgentCallComplete, correlation_id, value.clone()).to_sse_json()));
                yield Ok(Event::default().data(StreamChunk::new(ChunkType::FinalResult, correlation_id, value).to_sse_json()));
            }
            Err(err) => {
                yield Ok(Event::default().data(StreamChunk::new(ChunkType::Error, correlation_id, serde_json::json!({ "error_kind": err.kind(), "message": err.to_string() })).to_sse_json()));
            }
        }
    };
    Sse::new(body)
}

/// Proxies the Coordinator's `/process-stream` SSE body through verbatim,
/// preserving chunk ordering; dropping the gateway's own connection propagates
/// as a dropped upstream connection, satisfying the cancellation contract.
async fn proxy_coordinator_stream(state: &AppState, params: &StreamQuery) -> Response {
    let url = format!("{}/process-stream", state.config.coordinator_base_url);
    let body = serde_json::json!({ "query": params.query, "context": params.context });
    let upstream = state.http.post(&url).json(&body).send().await;
    match upstream {
        Ok(resp) if resp.status().is_success() => {
            let byte_stream = resp.bytes_stream();
            let mut response = Response::new(Body::from_stream(byte_stream));
            response.headers_mut().insert(axum::http::header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
            response
        }
        _ => KennyError::Internal("coordinator_unavailable".to_string()).into_response(),
    }
}

async fn health(State(state): State<AppState>) -> Response {
    match state.registry.system_health().await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn agents(State(state): State<AppState>) -> Response {
    match state.snapshot.get_or_refresh(&state.registry).await {
        Ok(snap) => Json(snap.agents).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn capabilities(State(state): State<AppState>) -> Response {
    match state.snapshot.get_or_refresh(&state.registry).await {
        Ok(snap) => Json(snap.capabilities).into_response(),
        Err(err) => err.into_response(),
    }
}

#[derive(Deserialize)]
struct DirectCallBody {
    parameters: serde_json::Value,
}

/// `POST /agent/{agent_id}/{verb}`: explicit direct-routed call with no intent
/// classification.
async fn direct_agent_call(State(state): State<AppState>, Path((agent_id, verb)): Path<(String, String)>, Json(req): Json<DirectCallBody>) -> Response {
    let _permit = match try_admit(&state) {
        Ok(p) => p,
        Err(err) => return err.into_response(),
    };
    let candidates = match state.registry.lookup_capability(&verb).await {
        Ok(c) => c,
        Err(err) => return err.into_response(),
    };
    let Some(target) = candidates.into_iter().find(|c| c.agent_id == agent_id) else {
        return KennyError::CapabilityUnknown { verb }.into_response();
    };
    match state.agent_client.call_capability(&target.base_url, &verb, req.parameters, 30_000).await {
        Ok(value) => Json(value).into_response(),
        Err(err) => err.into_response(),
    }
}
