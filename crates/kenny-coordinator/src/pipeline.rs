//! Ties Router -> Planner -> Executor -> Reviewer into the request pipeline,
//! emitting the progressive `StreamChunk` sequence
//! (`router_start`, `router_done`, `planner_start`, `planner_done`,
//! `agent_call_start`, `agent_call_complete`, `reviewer_done`, `final_result`)
//! and honoring cooperative cancellation: dropping the stream's receiver closes
//! the channel, which the Executor observes at its next suspension point and
//! stops dispatching further calls; the Reviewer is then never invoked.

use crate::executor::{AgentLocator, Executor, ExecutorEvent};
use crate::planner::{self, PlannerBounds, PlannerError, ProposedCall};
use crate::reviewer::{self, EgressDenials};
use crate::router::{self, IntentClassifier};
use crate::state_machine::{RequestLifecycle, RequestState};
use kenny_core::client::{AgentClient, RegistryClient};
use kenny_core::error::KennyError;
use kenny_core::plan::Plan;
use kenny_core::registry_types::CapabilityRef;
use kenny_core::sse::{ChunkType, StreamChunk};
use std::sync::Arc;
use tokio::sync::mpsc::Sender;
use tokio::sync::Semaphore;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub fanout_max: usize,
    pub plan_max_calls: usize,
    pub plan_max_depth: usize,
    pub call_timeout_ms: u64,
    /// Ceiling on concurrently in-flight Plans; beyond it admission is refused
    /// with `overloaded` rather than queued unboundedly.
    pub plans_max: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { fanout_max: 8, plan_max_calls: 16, plan_max_depth: 4, call_timeout_ms: 30_000, plans_max: 64 }
    }
}

pub struct Pipeline {
    registry: RegistryClient,
    agent_client: AgentClient,
    classifier: Arc<dyn IntentClassifier>,
    config: PipelineConfig,
    /// Admission gate sized from `config.plans_max`, shared across every
    /// `snapshot()` taken off this `Pipeline` so the bound applies service-wide.
    inflight: Arc<Semaphore>,
}

/// Resolves a `CapabilityCall.agent_id` to a base URL from the capability
/// catalog snapshot the Planner resolved the plan against, so the Executor
/// never needs a live Registry round trip per dispatch.
struct CatalogLocator {
    catalog: Vec<CapabilityRef>,
}

#[async_trait::async_trait]
impl AgentLocator for CatalogLocator {
    async fn base_url_for(&self, agent_id: &str) -> Option<String> {
        self.catalog.iter().find(|c| c.agent_id == agent_id).map(|c| c.base_url.clone())
    }
}

#[derive(Debug, serde::Serialize)]
pub struct PipelineOutcome {
    pub plan: Plan,
    pub results: Vec<kenny_core::plan::ExecutionResult>,
    pub compliance: reviewer::ComplianceReport,
}

impl Pipeline {
    pub fn new(registry: RegistryClient, agent_client: AgentClient, classifier: Arc<dyn IntentClassifier>, config: PipelineConfig) -> Self {
        let inflight = Arc::new(Semaphore::new(config.plans_max));
        Self { registry, agent_client, classifier, config, inflight }
    }

    /// Non-streaming entry point: runs the full pipeline and returns once
    /// `reviewer_done` would have fired. Fails fast with `PipelineError::Overloaded`
    /// once `plans_max` Plans are already in flight.
    pub async fn process(&self, utterance: &str, context: Option<&str>, correlation_id: Uuid) -> Result<PipelineOutcome, PipelineError> {
        let permit = Arc::clone(&self.inflight).try_acquire_owned().map_err(|_| PipelineError::Overloaded)?;
        let (tx, mut rx) = tokio::sync::mpsc::channel(256);
        let handle = {
            let pipeline = self.snapshot();
            let utterance = utterance.to_string();
            let context = context.map(str::to_string);
            tokio::spawn(async move {
                let _permit = permit;
                pipeline.run(&utterance, context.as_deref(), correlation_id, tx).await
            })
        };
        while rx.recv().await.is_some() {}
        handle.await.map_err(|e| PipelineError::Internal(e.to_string()))?
    }

    /// Streaming entry point: the returned stream yields `StreamChunk`s as the
    /// pipeline progresses. Dropping it cancels the in-flight request. When
    /// `plans_max` Plans are already in flight, the stream yields a single
    /// `error` chunk and closes rather than starting the pipeline.
    pub fn process_stream(&self, utterance: &str, context: Option<&str>, correlation_id: Uuid) -> ReceiverStream<StreamChunk> {
        let (tx, rx) = tokio::sync::mpsc::channel(256);
        match Arc::clone(&self.inflight).try_acquire_owned() {
            Ok(permit) => {
                let pipeline = self.snapshot();
                let utterance = utterance.to_string();
                let context = context.map(str::to_string);
                tokio::spawn(async move {
                    let _permit = permit;
                    let _ = pipeline.run(&utterance, context.as_deref(), correlation_id, tx).await;
                });
            }
            Err(_) => {
                tokio::spawn(async move {
                    let err = KennyError::Overloaded;
                    emit(&tx, ChunkType::Error, correlation_id, serde_json::json!({ "error_kind": err.kind(), "message": err.to_string() })).await;
                });
            }
        }
        ReceiverStream::new(rx)
    }

    fn snapshot(&self) -> Pipeline {
        Pipeline {
            registry: self.registry.clone(),
            agent_client: self.agent_client.clone(),
            classifier: Arc::clone(&self.classifier),
            config: self.config.clone(),
            inflight: Arc::clone(&self.inflight),
        }
    }

    async fn run(&self, utterance: &str, context: Option<&str>, correlation_id: Uuid, tx: Sender<StreamChunk>) -> Result<PipelineOutcome, PipelineError> {
        let mut lifecycle = RequestLifecycle::new();

        let catalog = self.registry.list_capabilities().await.map_err(|e| PipelineError::Internal(e.to_string()))?;

        emit(&tx, ChunkType::RouterStart, correlation_id, serde_json::json!({ "utterance": utterance })).await;
        let router_output = router::route(utterance, context, &catalog, self.classifier.as_ref()).await;
        lifecycle.advance(RequestState::Routed).ok();
        emit(&tx, ChunkType::RouterDone, correlation_id, serde_json::to_value(&router_output).unwrap_or_default()).await;
        if tx.is_closed() {
            return Err(PipelineError::Cancelled);
        }

        emit(&tx, ChunkType::PlannerStart, correlation_id, serde_json::json!({ "intent_label": router_output.intent_label })).await;
        let bounds = PlannerBounds::new(self.config.plan_max_calls, self.config.plan_max_depth);
        let plan = if router_output.intent_label == "unknown" || router_output.confidence < 0.5 {
            planner::best_effort_single(&router_output, utterance, &catalog, self.config.call_timeout_ms, &bounds)
        } else if router_output.intent_label == "cross_platform_compose" {
            let proposed = planner::decompose_cross_platform_compose(utterance);
            planner::build_plan(&router_output.intent_label, proposed, &catalog, self.config.call_timeout_ms, &bounds)
        } else {
            let proposed = vec![ProposedCall {
                verb: router_output.direct_verb.clone().unwrap_or_default(),
                parameters: serde_json::json!({ "query": utterance }),
                depends_on_indices: vec![],
            }];
            planner::build_plan(&router_output.intent_label, proposed, &catalog, self.config.call_timeout_ms, &bounds)
        }
        .map_err(PipelineError::Planner)?;
        lifecycle.advance(RequestState::Planned).ok();
        emit(&tx, ChunkType::PlannerDone, correlation_id, serde_json::to_value(&plan).unwrap_or_default()).await;
        if tx.is_closed() {
            return Err(PipelineError::Cancelled);
        }

        lifecycle.advance(RequestState::Executing).ok();
        let (exec_tx, mut exec_rx) = tokio::sync::mpsc::channel(256);
        let locator = CatalogLocator { catalog: catalog.clone() };
        let executor = Executor::new(self.agent_client.clone(), self.config.fanout_max);
        let plan_for_exec = plan.clone();
        let outer_tx = tx.clone();
        let forward = tokio::spawn(async move {
            while let Some(event) = exec_rx.recv().await {
                if outer_tx.is_closed() {
                    break;
                }
                match event {
                    ExecutorEvent::CallStart { call_id, verb, agent_id } => {
                        emit(&outer_tx, ChunkType::AgentCallStart, correlation_id, serde_json::json!({ "call_id": call_id, "verb": verb, "agent_id": agent_id })).await;
                    }
                    ExecutorEvent::CallComplete { result } => {
                        emit(&outer_tx, ChunkType::AgentCallComplete, correlation_id, serde_json::to_value(&result).unwrap_or_default()).await;
                    }
                }
            }
        });
        let results = executor.execute(&plan_for_exec, &locator, exec_tx).await;
        let _ = forward.await;

        if tx.is_closed() {
            return Err(PipelineError::Cancelled);
        }

        lifecycle.advance(RequestState::Reviewing).ok();
        let (results, compliance) = reviewer::review(&plan, results, &EgressDenials::new());
        emit(&tx, ChunkType::ReviewerDone, correlation_id, serde_json::to_value(&compliance).unwrap_or_default()).await;

        lifecycle.advance(RequestState::Done).ok();
        let outcome = PipelineOutcome { plan, results, compliance };
        emit(&tx, ChunkType::FinalResult, correlation_id, serde_json::to_value(&outcome).unwrap_or_default()).await;
        Ok(outcome)
    }
}

async fn emit(tx: &Sender<StreamChunk>, chunk_type: ChunkType, correlation_id: Uuid, data: serde_json::Value) {
    let _ = tx.send(StreamChunk::new(chunk_type, correlation_id, data)).await;
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("planner error: {0}")]
    Planner(#[from] PlannerError),
    #[error("request cancelled")]
    Cancelled,
    #[error("internal error: {0}")]
    Internal(String),
    #[error("overloaded")]
    Overloaded,
}

impl From<PipelineError> for KennyError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Overloaded => KennyError::Overloaded,
            other => KennyError::Internal(other.to_string()),
        }
    }
}
