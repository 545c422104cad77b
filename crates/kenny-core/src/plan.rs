//! CapabilityCall, Plan, and ExecutionResult: the Coordinator's unit of work.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyHint {
    ParallelOk,
    Sequential,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityCall {
    pub call_id: Uuid,
    pub verb: String,
    pub agent_id: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
    #[serde(default)]
    pub depends_on: BTreeSet<Uuid>,
    pub strategy_hint: StrategyHint,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStrategy {
    Single,
    Parallel,
    Sequential,
    Mixed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub plan_id: Uuid,
    pub intent_label: String,
    pub calls: Vec<CapabilityCall>,
    pub strategy: PlanStrategy,
    pub approval_required: bool,
}

/// Error returned when a proposed `Plan` violates the DAG invariant: every
/// referenced call_id in depends_on must precede the referring call in
/// topological order.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanValidationError {
    #[error("call {0} depends on unknown call {1}")]
    UnknownDependency(Uuid, Uuid),
    #[error("call {0} depends on {1}, which does not precede it")]
    DependencyNotPreceding(Uuid, Uuid),
    #[error("duplicate call_id {0} in plan")]
    DuplicateCallId(Uuid),
    #[error("plan exceeds size bound: {0} calls (max {1})")]
    TooManyCalls(usize, usize),
    #[error("plan exceeds sequential depth bound: {0} (max {1})")]
    TooDeep(usize, usize),
}

impl Plan {
    /// Validates the DAG invariant and the Planner's size/depth bounds.
    pub fn validate(&self, max_calls: usize, max_depth: usize) -> Result<(), PlanValidationError> {
        if self.calls.len() > max_calls {
            return Err(PlanValidationError::TooManyCalls(self.calls.len(), max_calls));
        }
        let mut seen: BTreeSet<Uuid> = BTreeSet::new();
        for call in &self.calls {
            if !seen.insert(call.call_id) {
                return Err(PlanValidationError::DuplicateCallId(call.call_id));
            }
            for dep in &call.depends_on {
                if *dep == call.call_id {
                    return Err(PlanValidationError::DependencyNotPreceding(call.call_id, *dep));
                }
                if !seen.contains(dep) {
                    // Either never appears later in the list (unknown) or appears
                    // after this call (not preceding) — disambiguate below.
                    if self.calls.iter().any(|c| c.call_id == *dep) {
                        return Err(PlanValidationError::DependencyNotPreceding(call.call_id, *dep));
                    }
                    return Err(PlanValidationError::UnknownDependency(call.call_id, *dep));
                }
            }
        }
        let depth = self.sequential_depth();
        if depth > max_depth {
            return Err(PlanValidationError::TooDeep(depth, max_depth));
        }
        Ok(())
    }

    /// Longest dependency chain length, used against `coord.plan_depth_max`.
    pub fn sequential_depth(&self) -> usize {
        let by_id: HashMap<Uuid, &CapabilityCall> = self.calls.iter().map(|c| (c.call_id, c)).collect();
        fn depth_of(id: Uuid, by_id: &HashMap<Uuid, &CapabilityCall>, memo: &mut HashMap<Uuid, usize>) -> usize {
            if let Some(&d) = memo.get(&id) {
                return d;
            }
            let call = match by_id.get(&id) {
                Some(c) => c,
                None => return 0,
            };
            let d = 1 + call.depends_on.iter().map(|dep| depth_of(*dep, by_id, memo)).max().unwrap_or(0);
            memo.insert(id, d);
            d
        }
        let mut memo = HashMap::new();
        self.calls.iter().map(|c| depth_of(c.call_id, &by_id, &mut memo)).max().unwrap_or(0)
    }

    /// Calls whose dependencies are all satisfied in `completed`, ready to dispatch.
    pub fn ready_calls<'a>(&'a self, completed: &BTreeSet<Uuid>) -> Vec<&'a CapabilityCall> {
        self.calls
            .iter()
            .filter(|c| !completed.contains(&c.call_id) && c.depends_on.iter().all(|d| completed.contains(d)))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Ok,
    Error,
    Timeout,
    SkippedDueToDepFailure,
    BlockedByPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CacheTier {
    L1,
    L2,
    L3,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub call_id: Uuid,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub value: serde_json::Value,
    pub latency_ms: u64,
    pub attempt_count: u32,
    #[serde(default)]
    pub error_kind: Option<String>,
    pub agent_id: String,
    #[serde(default)]
    pub cache_tier_hit: Option<CacheTier>,
}

/// Returned by intelligent capability handlers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidenceResult {
    pub value: serde_json::Value,
    pub confidence: f64,
    #[serde(default)]
    pub fallback_used: bool,
    #[serde(default)]
    pub fallback_reason: Option<String>,
}
