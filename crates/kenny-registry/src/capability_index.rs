//! Capability index: `verb -> [agent_id]` multimap with the tie-break ordering
//! ("prefer healthy > degraded > unhealthy; within a tier, prefer
//! lower observed p95 latency; final tie broken by lexicographic agent_id").

use dashmap::DashMap;
use kenny_core::registry_types::{CapabilityRef, HealthStatus};
use std::collections::BTreeSet;

#[derive(Default)]
pub struct CapabilityIndex {
    by_verb: DashMap<String, BTreeSet<String>>,
}

impl CapabilityIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn index_agent(&self, agent_id: &str, verbs: impl IntoIterator<Item = String>) {
        for verb in verbs {
            self.by_verb.entry(verb).or_default().insert(agent_id.to_string());
        }
    }

    /// Removes `agent_id` from every verb it was indexed under.
    pub fn remove_agent(&self, agent_id: &str) {
        self.by_verb.retain(|_, agents| {
            agents.remove(agent_id);
            !agents.is_empty()
        });
    }

    pub fn agents_for_verb(&self, verb: &str) -> Vec<String> {
        self.by_verb.get(verb).map(|set| set.iter().cloned().collect()).unwrap_or_default()
    }

    pub fn verbs(&self) -> Vec<String> {
        self.by_verb.iter().map(|e| e.key().clone()).collect()
    }
}

/// Orders candidate refs for the same verb per the tie-break rule.
pub fn rank_candidates(mut candidates: Vec<CapabilityRef>) -> Vec<CapabilityRef> {
    candidates.sort_by(|a, b| {
        a.health_status
            .preference_rank()
            .cmp(&b.health_status.preference_rank())
            .then(a.p95_latency_ms.cmp(&b.p95_latency_ms))
            .then(a.agent_id.cmp(&b.agent_id))
    });
    candidates
}

/// Best candidate for a verb, or `None` if nothing is registered for it.
pub fn best_candidate(candidates: Vec<CapabilityRef>) -> Option<CapabilityRef> {
    rank_candidates(candidates).into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet as Set;

    fn cap_ref(agent_id: &str, status: HealthStatus, p95: u64) -> CapabilityRef {
        CapabilityRef {
            verb: "messages.search".to_string(),
            agent_id: agent_id.to_string(),
            base_url: format!("http://{agent_id}"),
            safety_annotations: Set::new(),
            health_status: status,
            p95_latency_ms: p95,
        }
    }

    #[test]
    fn index_and_lookup_round_trips() {
        let index = CapabilityIndex::new();
        index.index_agent("mail-agent", ["messages.search".to_string()]);
        assert_eq!(index.agents_for_verb("messages.search"), vec!["mail-agent".to_string()]);
    }

    #[test]
    fn remove_agent_clears_its_entries() {
        let index = CapabilityIndex::new();
        index.index_agent("mail-agent", ["messages.search".to_string()]);
        index.remove_agent("mail-agent");
        assert!(index.agents_for_verb("messages.search").is_empty());
    }

    #[test]
    fn ranking_prefers_healthy_then_latency_then_agent_id() {
        let candidates = vec![
            cap_ref("zeta-agent", HealthStatus::Healthy, 50),
            cap_ref("alpha-agent", HealthStatus::Healthy, 20),
            cap_ref("mail-agent", HealthStatus::Degraded, 10),
        ];
        let ranked = rank_candidates(candidates);
        assert_eq!(ranked[0].agent_id, "alpha-agent");
        assert_eq!(ranked[1].agent_id, "zeta-agent");
        assert_eq!(ranked[2].agent_id, "mail-agent");
    }

    #[test]
    fn ranking_breaks_final_tie_lexicographically() {
        let candidates = vec![cap_ref("bravo", HealthStatus::Healthy, 10), cap_ref("alpha", HealthStatus::Healthy, 10)];
        let best = best_candidate(candidates).unwrap();
        assert_eq!(best.agent_id, "alpha");
    }
}
