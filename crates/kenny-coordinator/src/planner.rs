//! Planner: turns a Router output + the Registry's capability
//! catalog into a validated `Plan` (DAG of `CapabilityCall`s). Decision table:
//! 1 capability -> `single`; N independent -> `parallel`; N linear ->
//! `sequential`; N partially-dependent -> `mixed` (Executor resolves order from
//! the emitted dependency edges).

use crate::router::RouterOutput;
use kenny_core::manifest::SafetyAnnotation;
use kenny_core::plan::{CapabilityCall, Plan, PlanStrategy, PlanValidationError, StrategyHint};
use kenny_core::registry_types::{CapabilityRef, HealthStatus};
use std::collections::BTreeSet;
use uuid::Uuid;

#[derive(Debug, Clone, thiserror::Error)]
pub enum PlannerError {
    #[error("no healthy-or-degraded agent advertises capability {0}")]
    NoCapableAgent(String),
    #[error("plan failed validation: {0}")]
    Invalid(#[from] PlanValidationError),
    #[error("intent {0} could not be resolved to any capability; clarification needed")]
    ClarificationNeeded(String),
}

#[derive(Debug, Clone, Default)]
pub struct PlannerBounds {
    pub max_calls: usize,
    pub max_depth: usize,
}

impl PlannerBounds {
    pub fn new(max_calls: usize, max_depth: usize) -> Self {
        Self { max_calls, max_depth }
    }
}

/// One proposed call before agent resolution: a verb, its parameters, and the
/// `call_id`s (by position in this slice) it depends on. A parameter value of
/// `"$ref:<index>"` (or `"$ref:<index>.<field>"`) references another call in
/// this same slice by position; `build_plan` rewrites the index to that call's
/// resolved `call_id` once assigned, and the Executor resolves the reference
/// against the dependency's actual result at dispatch time.
#[derive(Debug, Clone)]
pub struct ProposedCall {
    pub verb: String,
    pub parameters: serde_json::Value,
    pub depends_on_indices: Vec<usize>,
}

/// Decomposes a "resolve a person, then search their mail and propose time
/// with them" intent into three `ProposedCall`s: an independent
/// `contacts.resolve`, and a `messages.search` + `calendar.propose_event` pair
/// that both depend on it and reference its result via `$ref:0`.
pub fn decompose_cross_platform_compose(utterance: &str) -> Vec<ProposedCall> {
    vec![
        ProposedCall {
            verb: "contacts.resolve".to_string(),
            parameters: serde_json::json!({ "query": utterance }),
            depends_on_indices: vec![],
        },
        ProposedCall {
            verb: "messages.search".to_string(),
            parameters: serde_json::json!({ "owner": "$ref:0.contact_id", "query": utterance }),
            depends_on_indices: vec![0],
        },
        ProposedCall {
            verb: "calendar.propose_event".to_string(),
            parameters: serde_json::json!({ "attendee": "$ref:0.contact_id", "query": utterance }),
            depends_on_indices: vec![0],
        },
    ]
}

/// Rewrites every `"$ref:<index>[.field]"` string in `value` to
/// `"$ref:<call_id>[.field]"` using `call_ids`'s positional mapping, recursing
/// into nested objects/arrays. Strings that aren't a `$ref:` placeholder, or
/// whose index doesn't parse, pass through unchanged.
fn rewrite_refs(value: &serde_json::Value, call_ids: &[Uuid]) -> serde_json::Value {
    match value {
        serde_json::Value::String(s) => match s.strip_prefix("$ref:") {
            Some(rest) => {
                let (idx_part, field) = match rest.split_once('.') {
                    Some((idx, field)) => (idx, Some(field)),
                    None => (rest, None),
                };
                match idx_part.parse::<usize>().ok().and_then(|idx| call_ids.get(idx)) {
                    Some(call_id) => match field {
                        Some(f) => serde_json::Value::String(format!("$ref:{call_id}.{f}")),
                        None => serde_json::Value::String(format!("$ref:{call_id}")),
                    },
                    None => value.clone(),
                }
            }
            None => value.clone(),
        },
        serde_json::Value::Object(map) => {
            serde_json::Value::Object(map.iter().map(|(k, v)| (k.clone(), rewrite_refs(v, call_ids))).collect())
        }
        serde_json::Value::Array(arr) => serde_json::Value::Array(arr.iter().map(|v| rewrite_refs(v, call_ids)).collect()),
        other => other.clone(),
    }
}

/// Picks the best (healthy-preferred) capability ref for `verb`, consistent with
/// the Registry's own tie-break, filtered to healthy-or-degraded
/// agents only.
fn resolve_agent(verb: &str, catalog: &[CapabilityRef]) -> Option<CapabilityRef> {
    let mut candidates: Vec<CapabilityRef> = catalog
        .iter()
        .filter(|c| c.verb == verb && matches!(c.health_status, HealthStatus::Healthy | HealthStatus::Degraded))
        .cloned()
        .collect();
    candidates.sort_by(|a, b| {
        a.health_status
            .preference_rank()
            .cmp(&b.health_status.preference_rank())
            .then(a.p95_latency_ms.cmp(&b.p95_latency_ms))
            .then(a.agent_id.cmp(&b.agent_id))
    });
    candidates.into_iter().next()
}

/// Builds a `Plan` from a sequence of `ProposedCall`s, resolving each to an
/// agent, deriving `strategy_hint` from whether it has any dependency, and the
/// overall `Plan.strategy` from the decision table.
pub fn build_plan(
    intent_label: &str,
    proposed: Vec<ProposedCall>,
    catalog: &[CapabilityRef],
    timeout_ms: u64,
    bounds: &PlannerBounds,
) -> Result<Plan, PlannerError> {
    if proposed.is_empty() {
        return Err(PlannerError::ClarificationNeeded(intent_label.to_string()));
    }

    let mut call_ids = Vec::with_capacity(proposed.len());
    for _ in &proposed {
        call_ids.push(Uuid::new_v4());
    }

    let mut calls = Vec::with_capacity(proposed.len());
    let mut approval_required = false;
    for (i, p) in proposed.iter().enumerate() {
        let agent = resolve_agent(&p.verb, catalog).ok_or_else(|| PlannerError::NoCapableAgent(p.verb.clone()))?;
        if catalog
            .iter()
            .find(|c| c.verb == p.verb && c.agent_id == agent.agent_id)
            .map(|c| c.safety_annotations.contains(&SafetyAnnotation::WriteRequiresApproval))
            .unwrap_or(false)
        {
            approval_required = true;
        }
        let depends_on: BTreeSet<Uuid> = p.depends_on_indices.iter().map(|&idx| call_ids[idx]).collect();
        let strategy_hint = if depends_on.is_empty() { StrategyHint::ParallelOk } else { StrategyHint::Sequential };
        calls.push(CapabilityCall {
            call_id: call_ids[i],
            verb: p.verb.clone(),
            agent_id: agent.agent_id,
            parameters: rewrite_refs(&p.parameters, &call_ids),
            depends_on,
            strategy_hint,
            timeout_ms,
        });
    }

    let strategy = derive_strategy(&calls);
    let plan = Plan { plan_id: Uuid::new_v4(), intent_label: intent_label.to_string(), calls, strategy, approval_required };
    plan.validate(bounds.max_calls, bounds.max_depth)?;
    Ok(plan)
}

/// Decision table for strategy assignment, applied after dependency edges are known.
fn derive_strategy(calls: &[CapabilityCall]) -> PlanStrategy {
    if calls.len() == 1 {
        return PlanStrategy::Single;
    }
    let any_deps = calls.iter().any(|c| !c.depends_on.is_empty());
    if !any_deps {
        return PlanStrategy::Parallel;
    }
    let all_have_exactly_one_chain = {
        // Linear: every non-root call depends on exactly one other call, and the
        // dependency graph forms a single chain (each call has at most one
        // dependent).
        let mut dependents_count = std::collections::HashMap::new();
        for call in calls {
            for dep in &call.depends_on {
                *dependents_count.entry(*dep).or_insert(0u32) += 1;
            }
        }
        calls.iter().all(|c| c.depends_on.len() <= 1) && dependents_count.values().all(|&n| n <= 1)
    };
    if all_have_exactly_one_chain {
        PlanStrategy::Sequential
    } else {
        PlanStrategy::Mixed
    }
}

/// Best-effort single-agent plan for an `unknown`/low-confidence Router output
/// with a resolvable `direct_verb`.
pub fn best_effort_single(
    router_output: &RouterOutput,
    utterance: &str,
    catalog: &[CapabilityRef],
    timeout_ms: u64,
    bounds: &PlannerBounds,
) -> Result<Plan, PlannerError> {
    let verb = router_output
        .direct_verb
        .clone()
        .or_else(|| catalog.first().map(|c| c.verb.clone()))
        .ok_or_else(|| PlannerError::ClarificationNeeded(router_output.intent_label.clone()))?;
    let proposed = vec![ProposedCall {
        verb,
        parameters: serde_json::json!({ "query": utterance }),
        depends_on_indices: vec![],
    }];
    build_plan(&router_output.intent_label, proposed, catalog, timeout_ms, bounds)
}
