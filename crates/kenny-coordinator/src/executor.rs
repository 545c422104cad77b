//! Executor: topologically walks a `Plan`, dispatching
//! `parallel_ok`-hinted ready calls concurrently (bounded by `coord.fanout_max`,
//! default 8) and `sequential`-hinted ready calls one at a time, interpreting
//! each HTTP response into an `ExecutionResult`. Before each dispatch,
//! `"$ref:<call_id>"` parameters are resolved against already-completed
//! dependency results, so a call can consume what an upstream call in its
//! `depends_on` set actually produced. No automatic retry at this layer; a
//! hard failure marks every transitive dependent `skipped_due_to_dep_failure`.

use kenny_core::client::AgentClient;
use kenny_core::error::KennyError;
use kenny_core::plan::{CapabilityCall, ExecutionResult, ExecutionStatus, Plan, StrategyHint};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::Sender;
use tokio::sync::Semaphore;
use uuid::Uuid;

/// Progress events the Executor emits; the coordinator pipeline translates these
/// into `StreamChunk`s.
pub enum ExecutorEvent {
    CallStart { call_id: Uuid, verb: String, agent_id: String },
    CallComplete { result: ExecutionResult },
}

/// Resolves a `CapabilityCall`'s agent to a base URL. Implemented by the
/// Registry client in the running binary; kept as a trait so the Executor's
/// dispatch logic is unit-testable without an HTTP server.
#[async_trait::async_trait]
pub trait AgentLocator: Send + Sync {
    async fn base_url_for(&self, agent_id: &str) -> Option<String>;
}

pub struct Executor {
    client: AgentClient,
    fanout_max: usize,
}

impl Executor {
    pub fn new(client: AgentClient, fanout_max: usize) -> Self {
        Self { client, fanout_max: fanout_max.max(1) }
    }

    /// Executes `plan` to completion (or until `events` is closed, signalling
    /// client cancellation), returning every `ExecutionResult` produced.
    /// Dropping the receiving end of `events` is this layer's cooperative
    /// cancellation signal: the next suspension point (the top of the dispatch
    /// loop) sees the channel closed and stops issuing further calls.
    pub async fn execute(&self, plan: &Plan, locator: &dyn AgentLocator, events: Sender<ExecutorEvent>) -> Vec<ExecutionResult> {
        let mut results: HashMap<Uuid, ExecutionResult> = HashMap::new();
        let mut failed: HashSet<Uuid> = HashSet::new();

        loop {
            if events.is_closed() {
                break;
            }
            let completed: std::collections::BTreeSet<Uuid> = results.keys().copied().collect();
            let ready = plan.ready_calls(&completed);
            if ready.is_empty() {
                break;
            }

            let mut to_dispatch_parallel = Vec::new();
            let mut to_dispatch_sequential = Vec::new();
            for call in ready {
                if call.depends_on.iter().any(|d| failed.contains(d)) {
                    let skipped = ExecutionResult {
                        call_id: call.call_id,
                        status: ExecutionStatus::SkippedDueToDepFailure,
                        value: serde_json::Value::Null,
                        latency_ms: 0,
                        attempt_count: 0,
                        error_kind: Some("dependency_unavailable".to_string()),
                        agent_id: call.agent_id.clone(),
                        cache_tier_hit: None,
                    };
                    failed.insert(call.call_id);
                    let _ = events.send(ExecutorEvent::CallComplete { result: skipped.clone() }).await;
                    results.insert(call.call_id, skipped);
                    continue;
                }
                match call.strategy_hint {
                    StrategyHint::ParallelOk => to_dispatch_parallel.push(call),
                    StrategyHint::Sequential => to_dispatch_sequential.push(call),
                }
            }

            for call in to_dispatch_sequential {
                if events.is_closed() {
                    break;
                }
                let mut call = call.clone();
                call.parameters = resolve_placeholders(&call.parameters, &results);
                let result = self.dispatch_one(&call, locator, &events).await;
                if matches!(result.status, ExecutionStatus::Error | ExecutionStatus::Timeout) {
                    failed.insert(call.call_id);
                }
                results.insert(call.call_id, result);
            }

            if !to_dispatch_parallel.is_empty() {
                let semaphore = Arc::new(Semaphore::new(self.fanout_max));
                let mut handles = Vec::new();
                for call in to_dispatch_parallel {
                    let permit = Arc::clone(&semaphore);
                    let events = events.clone();
                    let client = self.client.clone();
                    let mut call = call.clone();
                    call.parameters = resolve_placeholders(&call.parameters, &results);
                    let base_url = locator.base_url_for(&call.agent_id).await;
                    handles.push(tokio::spawn(async move {
                        let _permit = permit.acquire_owned().await.ok();
                        let result = dispatch_call(&client, &call, base_url, &events).await;
                        (call.call_id, result)
                    }));
                }
                for handle in handles {
                    if let Ok((call_id, result)) = handle.await {
                        if matches!(result.status, ExecutionStatus::Error | ExecutionStatus::Timeout) {
                            failed.insert(call_id);
                        }
                        results.insert(call_id, result);
                    }
                }
            }

            // Anything never dispatched (e.g. cancellation mid-plan) is simply
            // absent from the returned set; partial results already emitted remain
            // valid for the client.
        }
        plan.calls.iter().filter_map(|c| results.remove(&c.call_id)).collect()
    }

    async fn dispatch_one(&self, call: &CapabilityCall, locator: &dyn AgentLocator, events: &Sender<ExecutorEvent>) -> ExecutionResult {
        let base_url = locator.base_url_for(&call.agent_id).await;
        dispatch_call(&self.client, call, base_url, events).await
    }
}

/// Resolves `"$ref:<call_id>"` (optionally `"$ref:<call_id>.<field>"`) string
/// parameters against already-completed dependency results, recursing into
/// nested objects/arrays. A placeholder naming a call that hasn't completed
/// (or a field it lacks) resolves to `null` rather than panicking; the
/// dependent call simply sees a missing value, the same as any other
/// best-effort parameter.
fn resolve_placeholders(value: &serde_json::Value, results: &HashMap<Uuid, ExecutionResult>) -> serde_json::Value {
    match value {
        serde_json::Value::String(s) => match s.strip_prefix("$ref:") {
            Some(rest) => {
                let (id_part, field) = match rest.split_once('.') {
                    Some((id, field)) => (id, Some(field)),
                    None => (rest, None),
                };
                let resolved = Uuid::parse_str(id_part).ok().and_then(|call_id| results.get(&call_id)).map(|result| match field {
                    Some(f) => result.value.get(f).cloned().unwrap_or(serde_json::Value::Null),
                    None => result.value.clone(),
                });
                resolved.unwrap_or(serde_json::Value::Null)
            }
            None => value.clone(),
        },
        serde_json::Value::Object(map) => {
            serde_json::Value::Object(map.iter().map(|(k, v)| (k.clone(), resolve_placeholders(v, results))).collect())
        }
        serde_json::Value::Array(arr) => serde_json::Value::Array(arr.iter().map(|v| resolve_placeholders(v, results)).collect()),
        other => other.clone(),
    }
}

async fn dispatch_call(
    client: &AgentClient,
    call: &CapabilityCall,
    base_url: Option<String>,
    events: &Sender<ExecutorEvent>,
) -> ExecutionResult {
    let _ = events
        .send(ExecutorEvent::CallStart { call_id: call.call_id, verb: call.verb.clone(), agent_id: call.agent_id.clone() })
        .await;

    let started = Instant::now();
    let outcome = match base_url {
        Some(base_url) => client.call_capability(&base_url, &call.verb, call.parameters.clone(), call.timeout_ms).await,
        None => Err(KennyError::AgentUnknown { agent_id: call.agent_id.clone() }),
    };
    let latency_ms = started.elapsed().as_millis() as u64;

    let result = match outcome {
        Ok(value) => ExecutionResult {
            call_id: call.call_id,
            status: ExecutionStatus::Ok,
            value,
            latency_ms,
            attempt_count: 1,
            error_kind: None,
            agent_id: call.agent_id.clone(),
            cache_tier_hit: None,
        },
        Err(KennyError::Timeout) => ExecutionResult {
            call_id: call.call_id,
            status: ExecutionStatus::Timeout,
            value: serde_json::Value::Null,
            latency_ms,
            attempt_count: 1,
            error_kind: Some("timeout".to_string()),
            agent_id: call.agent_id.clone(),
            cache_tier_hit: None,
        },
        Err(e) => ExecutionResult {
            call_id: call.call_id,
            status: ExecutionStatus::Error,
            value: serde_json::Value::Null,
            latency_ms,
            attempt_count: 1,
            error_kind: Some(e.kind().to_string()),
            agent_id: call.agent_id.clone(),
            cache_tier_hit: None,
        },
    };

    let _ = events.send(ExecutorEvent::CallComplete { result: result.clone() }).await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use kenny_core::plan::PlanStrategy;

    struct NoAgents;
    #[async_trait::async_trait]
    impl AgentLocator for NoAgents {
        async fn base_url_for(&self, _agent_id: &str) -> Option<String> {
            None
        }
    }

    fn call(id: Uuid, deps: &[Uuid]) -> CapabilityCall {
        CapabilityCall {
            call_id: id,
            verb: "x.y".into(),
            agent_id: "missing-agent".into(),
            parameters: serde_json::json!({}),
            depends_on: deps.iter().copied().collect(),
            strategy_hint: StrategyHint::ParallelOk,
            timeout_ms: 1000,
        }
    }

    #[tokio::test]
    async fn unresolvable_agent_yields_error_and_skips_dependents() {
        let c1 = Uuid::new_v4();
        let c2 = Uuid::new_v4();
        let plan = Plan {
            plan_id: Uuid::new_v4(),
            intent_label: "test".into(),
            calls: vec![call(c1, &[]), call(c2, &[c1])],
            strategy: PlanStrategy::Sequential,
            approval_required: false,
        };
        let (tx, mut rx) = tokio::sync::mpsc::channel(32);
        let executor = Executor::new(AgentClient::new(), 8);
        let handle = tokio::spawn(async move { executor.execute(&plan, &NoAgents, tx).await });
        while rx.recv().await.is_some() {}
        let results = handle.await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].status, ExecutionStatus::Error);
        assert_eq!(results[1].status, ExecutionStatus::SkippedDueToDepFailure);
    }

    #[tokio::test]
    async fn cancellation_stops_further_dispatch() {
        let c1 = Uuid::new_v4();
        let c2 = Uuid::new_v4();
        let plan = Plan {
            plan_id: Uuid::new_v4(),
            intent_label: "test".into(),
            calls: vec![call(c1, &[]), call(c2, &[])],
            strategy: PlanStrategy::Parallel,
            approval_required: false,
        };
        let (tx, rx) = tokio::sync::mpsc::channel(32);
        drop(rx);
        let executor = Executor::new(AgentClient::new(), 8);
        let results = executor.execute(&plan, &NoAgents, tx).await;
        assert!(results.is_empty());
    }
}
