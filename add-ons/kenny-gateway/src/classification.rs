//! Classification cache and the direct-vs-coordinator decision
//! rule itself.

use dashmap::DashMap;
use kenny_core::manifest::{AgentType, SafetyAnnotation};
use kenny_core::registry_types::{AgentSummary, CapabilityRef};
use kenny_coordinator::router::rule_table_match;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "path", rename_all = "snake_case")]
pub enum RouteDecision {
    Direct { agent_id: String, verb: String, base_url: String },
    Coordinator,
}

pub struct ClassificationCache {
    entries: DashMap<String, (RouteDecision, Instant)>,
    ttl: Duration,
}

impl ClassificationCache {
    pub fn new(ttl: Duration) -> Self {
        Self { entries: DashMap::new(), ttl }
    }

    pub fn get(&self, utterance: &str) -> Option<RouteDecision> {
        let hit = self.entries.get(utterance)?;
        let (decision, at) = hit.value();
        if at.elapsed() <= self.ttl {
            Some(decision.clone())
        } else {
            drop(hit);
            self.entries.remove(utterance);
            None
        }
    }

    pub fn put(&self, utterance: &str, decision: RouteDecision) {
        self.entries.insert(utterance.to_string(), (decision, Instant::now()));
    }
}

/// A capability is safe to direct-route when its agent is `basic`, or it is an
/// `intelligent_service` capability explicitly annotated `read_only`.
fn is_direct_routable(agent_type: AgentType, cap: &CapabilityRef) -> bool {
    agent_type == AgentType::Basic || cap.safety_annotations.contains(&SafetyAnnotation::ReadOnly)
}

/// Classifies `utterance` against the rule table and, on a confident match,
/// resolves it to a directly-routable capability if one exists in `agents` /
/// `capabilities`. Returns `Coordinator` for anything ambiguous or requiring
/// composition of multiple capabilities.
pub fn classify(utterance: &str, rule_threshold: f64, agents: &[AgentSummary], capabilities: &[CapabilityRef]) -> RouteDecision {
    let Some(hit) = rule_table_match(utterance) else { return RouteDecision::Coordinator };
    if hit.confidence < rule_threshold {
        return RouteDecision::Coordinator;
    }
    let Some(verb) = hit.direct_verb else { return RouteDecision::Coordinator };

    let mut candidates: Vec<&CapabilityRef> = capabilities.iter().filter(|c| c.verb == verb).collect();
    candidates.sort_by_key(|c| c.p95_latency_ms);
    for cap in candidates {
        let Some(agent) = agents.iter().find(|a| a.agent_id == cap.agent_id) else { continue };
        if is_direct_routable(agent.agent_type, cap) {
            return RouteDecision::Direct { agent_id: cap.agent_id.clone(), verb: verb.clone(), base_url: cap.base_url.clone() };
        }
    }
    RouteDecision::Coordinator
}
