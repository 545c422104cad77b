//! Coordinator HTTP service: exposes the Router -> Planner ->
//! Executor -> Reviewer pipeline synchronously (`/process`) and as a
//! progressive SSE stream (`/process-stream`).

use axum::extract::State;
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::StreamExt;
use kenny_core::client::{AgentClient, RegistryClient};
use kenny_coordinator::{
    CoordinatorConfig, IntentClassifier, NoIntentClassifier, OpenRouterIntentClassifier, Pipeline, PipelineConfig,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone)]
struct AppState {
    pipeline: Arc<Pipeline>,
    registry: RegistryClient,
}

#[derive(Deserialize)]
struct ProcessRequest {
    query: String,
    #[serde(default)]
    context: Option<String>,
}

#[tokio::main]
async fn main() {
    kenny_core::config::load_dotenv();
    kenny_core::config::init_tracing();

    let config = CoordinatorConfig::load().expect("load CoordinatorConfig");
    let registry = RegistryClient::new(config.registry_base_url.clone());
    let agent_client = AgentClient::new();

    let classifier: Arc<dyn IntentClassifier> = OpenRouterIntentClassifier::from_env(&config.llm_model, config.llm_timeout_ms)
        .map(|c| Arc::new(c) as Arc<dyn IntentClassifier>)
        .unwrap_or_else(|| Arc::new(NoIntentClassifier));

    let pipeline_config = PipelineConfig {
        fanout_max: config.fanout_max,
        plan_max_calls: config.plan_size_max,
        plan_max_depth: config.plan_depth_max,
        call_timeout_ms: config.call_timeout_ms,
        plans_max: config.plans_max,
    };
    let pipeline = Arc::new(Pipeline::new(registry.clone(), agent_client, classifier, pipeline_config));

    let state = AppState { pipeline, registry };

    let app = Router::new()
        .route("/process", post(process))
        .route("/process-stream", post(process_stream))
        .route("/agents", get(list_agents))
        .route("/capabilities", get(list_capabilities))
        .with_state(state);

    let addr: std::net::SocketAddr = config.bind_addr.parse().expect("valid bind_addr");
    tracing::info!(%addr, "kenny-coordinator listening");
    let listener = tokio::net::TcpListener::bind(addr).await.expect("bind coordinator listener");
    axum::serve(listener, app).await.expect("coordinator server error");
}

async fn process(State(state): State<AppState>, Json(req): Json<ProcessRequest>) -> impl IntoResponse {
    let correlation_id = Uuid::new_v4();
    match state.pipeline.process(&req.query, req.context.as_deref(), correlation_id).await {
        Ok(outcome) => Json(outcome).into_response(),
        Err(err) => kenny_core::error::KennyError::from(err).into_response(),
    }
}

async fn process_stream(State(state): State<AppState>, Json(req): Json<ProcessRequest>) -> impl IntoResponse {
    let correlation_id = Uuid::new_v4();
    let chunks = state.pipeline.process_stream(&req.query, req.context.as_deref(), correlation_id);
    let stream = chunks.map(|chunk| Ok::<_, std::convert::Infallible>(Event::default().data(chunk.to_sse_json())));
    Sse::new(stream)
}

async fn list_agents(State(state): State<AppState>) -> impl IntoResponse {
    match state.registry.list_agents().await {
        Ok(agents) => Json(agents).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn list_capabilities(State(state): State<AppState>) -> impl IntoResponse {
    match state.registry.list_capabilities().await {
        Ok(caps) => Json(caps).into_response(),
        Err(err) => err.into_response(),
    }
}
