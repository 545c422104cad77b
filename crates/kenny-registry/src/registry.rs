//! `Registry`: the Agent Registry's public contract, composing the
//! capability index, sled-backed store, egress rules, and per-agent health
//! pollers.

use crate::capability_index::{best_candidate, CapabilityIndex};
use crate::egress::EgressRules;
use crate::health::{apply_observation, poll_once};
use crate::manifest_validation;
use crate::store::RegistryStore;
use chrono::Utc;
use dashmap::DashMap;
use kenny_core::error::KennyError;
use kenny_core::manifest::AgentManifest;
use kenny_core::registry_types::{
    AgentSummary, CapabilityRef, HealthStatus, OverallHealth, RegistryRecord, SlaViolation, SystemHealthSnapshot,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

pub struct Registry {
    store: RegistryStore,
    records: DashMap<String, RegistryRecord>,
    index: CapabilityIndex,
    egress: EgressRules,
    pollers: DashMap<String, JoinHandle<()>>,
    /// Serializes register/deregister mutations.
    write_lock: Mutex<()>,
}

impl Registry {
    pub fn open(store_path: &str, egress: EgressRules) -> sled::Result<Arc<Self>> {
        let store = RegistryStore::open(store_path)?;
        let records = DashMap::new();
        let index = CapabilityIndex::new();
        for record in store.load_all()? {
            index.index_agent(&record.manifest.agent_id, record.manifest.verbs().map(str::to_string));
            records.insert(record.manifest.agent_id.clone(), record);
        }
        let registry = Arc::new(Self { store, records, index, egress, pollers: DashMap::new(), write_lock: Mutex::new(()) });
        for entry in registry.records.iter() {
            registry.spawn_poller(entry.key().clone());
        }
        Ok(registry)
    }

    /// `Register(manifest, base_url, health_endpoint)`.
    pub async fn register(
        self: &Arc<Self>,
        manifest: AgentManifest,
        base_url: String,
        health_endpoint: String,
    ) -> Result<String, KennyError> {
        manifest_validation::validate(&manifest)
            .map_err(|reason| KennyError::ManifestInvalid { path: manifest.agent_id.clone(), reason })?;
        if !self.egress.domains_allowed(manifest.egress_domains.iter()) {
            return Err(KennyError::EgressForbidden {
                reason: format!("{} requests egress outside the allowlist", manifest.agent_id),
            });
        }

        let _guard = self.write_lock.lock().await;
        let agent_id = manifest.agent_id.clone();
        // Re-register while unhealthy resets status to unknown, re-evaluated after one poll.
        let _was_unhealthy =
            self.records.get(&agent_id).map(|r| r.health_status == HealthStatus::Unhealthy).unwrap_or(false);

        let record = RegistryRecord {
            manifest: manifest.clone(),
            health_endpoint,
            base_url,
            registered_at: Utc::now(),
            last_health_check_at: None,
            health_status: HealthStatus::Unknown,
            health_history: Default::default(),
            performance: Default::default(),
        };

        self.store.put(&record).map_err(|e| KennyError::Internal(format!("registry store write failed: {e}")))?;
        if let Some(old) = self.records.get(&agent_id) {
            self.index.remove_agent(&old.manifest.agent_id);
        }
        self.index.index_agent(&agent_id, manifest.verbs().map(str::to_string));
        self.records.insert(agent_id.clone(), record);
        self.spawn_poller(agent_id.clone());
        Ok(agent_id)
    }

    /// `Deregister(agent_id)`.
    pub async fn deregister(&self, agent_id: &str) -> Result<(), KennyError> {
        let _guard = self.write_lock.lock().await;
        let existed = self.store.remove(agent_id).map_err(|e| KennyError::Internal(e.to_string()))?;
        self.records.remove(agent_id);
        self.index.remove_agent(agent_id);
        if let Some((_, handle)) = self.pollers.remove(agent_id) {
            handle.abort();
        }
        if existed {
            Ok(())
        } else {
            Err(KennyError::NotFound)
        }
    }

    pub fn list_agents(&self) -> Vec<AgentSummary> {
        self.records.iter().map(|r| AgentSummary::from(r.value())).collect()
    }

    pub fn get_agent(&self, agent_id: &str) -> Option<RegistryRecord> {
        self.records.get(agent_id).map(|r| r.value().clone())
    }

    fn capability_refs_for_verb(&self, verb: &str) -> Vec<CapabilityRef> {
        self.index
            .agents_for_verb(verb)
            .into_iter()
            .filter_map(|agent_id| {
                let record = self.records.get(&agent_id)?;
                let cap = record.manifest.capabilities.iter().find(|c| c.verb == verb)?;
                Some(CapabilityRef {
                    verb: verb.to_string(),
                    agent_id: agent_id.clone(),
                    base_url: record.base_url.clone(),
                    safety_annotations: cap.safety_annotations.clone(),
                    health_status: record.health_status,
                    p95_latency_ms: record.performance.p95_latency_ms,
                })
            })
            .collect()
    }

    pub fn list_capabilities(&self) -> Vec<CapabilityRef> {
        self.index.verbs().iter().flat_map(|v| self.capability_refs_for_verb(v)).collect()
    }

    /// `LookupCapability(verb)`, ranked per its tie-break rule.
    pub fn lookup_capability(&self, verb: &str) -> Vec<CapabilityRef> {
        crate::capability_index::rank_candidates(self.capability_refs_for_verb(verb))
    }

    pub fn resolve_best(&self, verb: &str) -> Option<CapabilityRef> {
        best_candidate(self.capability_refs_for_verb(verb))
    }

    /// `SystemHealth`.
    pub fn system_health(&self) -> SystemHealthSnapshot {
        let per_agent: Vec<AgentSummary> = self.list_agents();
        let unhealthy = per_agent.iter().filter(|a| a.health_status == HealthStatus::Unhealthy).count();
        let degraded = per_agent.iter().filter(|a| a.health_status == HealthStatus::Degraded).count();
        let overall = if unhealthy > 0 {
            OverallHealth::Critical
        } else if degraded > 0 {
            OverallHealth::Degraded
        } else {
            OverallHealth::Healthy
        };
        let mut sla_violations = Vec::new();
        for record in self.records.iter() {
            if record.performance.sla_violations > 0 {
                for cap in &record.manifest.capabilities {
                    sla_violations.push(SlaViolation {
                        agent_id: record.manifest.agent_id.clone(),
                        verb: cap.verb.clone(),
                        count: record.performance.sla_violations,
                    });
                }
            }
        }
        let mut recommendations = Vec::new();
        if unhealthy > 0 {
            recommendations.push(format!("{unhealthy} agent(s) unhealthy; consider restarting or deregistering"));
        }
        SystemHealthSnapshot { overall, per_agent, sla_violations, recommendations, generated_at: Utc::now() }
    }

    pub fn evaluate_egress(&self, service_id: &str, destination: &str, port: Option<u16>) -> crate::egress::EgressDecision {
        self.egress.evaluate(service_id, destination, port)
    }

    pub fn egress(&self) -> &EgressRules {
        &self.egress
    }

    fn spawn_poller(self: &Arc<Self>, agent_id: String) {
        if let Some(existing) = self.pollers.get(&agent_id) {
            existing.abort();
        }
        let registry = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let client = reqwest::Client::new();
            loop {
                let (endpoint, interval_s, sla_target_ms) = {
                    let Some(record) = registry.records.get(&agent_id) else { break };
                    let target_ms = record.manifest.capabilities.first().map(|c| c.sla.target_ms).unwrap_or(1000);
                    (record.health_endpoint.clone(), record.manifest.health_check.interval_s, target_ms)
                };
                tokio::time::sleep(std::time::Duration::from_secs(interval_s.max(1))).await;
                let obs = poll_once(&client, &endpoint).await;
                if let Some(mut record) = registry.records.get_mut(&agent_id) {
                    let current = record.health_status;
                    let new_status =
                        apply_observation(current, &mut record.health_history, &mut record.performance, obs, sla_target_ms);
                    record.health_status = new_status;
                    record.last_health_check_at = Some(Utc::now());
                    let _ = registry.store.put(&record);
                } else {
                    break;
                }
            }
        });
        self.pollers.insert(agent_id, handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::egress::AllowlistEntry;
    use kenny_core::manifest::{AgentType, CapabilityDescriptor, HealthCheckSpec, SafetyAnnotation, Sla};
    use std::collections::BTreeSet;

    fn manifest(agent_id: &str, verb: &str, egress_domains: &[&str]) -> AgentManifest {
        AgentManifest {
            agent_id: agent_id.to_string(),
            display_name: agent_id.to_string(),
            version: "1.0.0".to_string(),
            description: String::new(),
            agent_type: AgentType::Basic,
            capabilities: vec![CapabilityDescriptor {
                verb: verb.to_string(),
                input_schema: serde_json::json!({"type": "object"}),
                output_schema: serde_json::json!({"type": "object"}),
                safety_annotations: [SafetyAnnotation::ReadOnly].into_iter().collect(),
                description: "test".to_string(),
                sla: Sla { target_ms: 200, max_ms: 2000 },
            }],
            data_scopes: BTreeSet::new(),
            tool_access: BTreeSet::new(),
            egress_domains: egress_domains.iter().map(|s| s.to_string()).collect(),
            health_check: HealthCheckSpec { endpoint: "/health".to_string(), interval_s: 30 },
        }
    }

    fn test_registry() -> Arc<Registry> {
        let dir = tempfile::tempdir().unwrap();
        let egress = EgressRules::new(vec![AllowlistEntry {
            domain: "allowed.example.com".to_string(),
            port: None,
            cidr_bits: None,
        }]);
        Registry::open(dir.path().to_str().unwrap(), egress).unwrap()
    }

    #[tokio::test]
    async fn register_then_get_agent_round_trips() {
        let registry = test_registry();
        let m = manifest("mail-agent", "messages.search", &[]);
        let id = registry.register(m, "http://127.0.0.1:9001".to_string(), "/health".to_string()).await.unwrap();
        assert_eq!(id, "mail-agent");
        let record = registry.get_agent("mail-agent").expect("present");
        assert_eq!(record.health_status, HealthStatus::Unknown);
    }

    #[tokio::test]
    async fn register_rejects_egress_outside_allowlist() {
        let registry = test_registry();
        let m = manifest("bad-agent", "messages.search", &["evil.example.com"]);
        let err = registry.register(m, "http://127.0.0.1:9002".to_string(), "/health".to_string()).await.unwrap_err();
        assert_eq!(err.kind(), "egress_forbidden");
    }

    #[tokio::test]
    async fn deregister_then_register_resets_to_unknown() {
        let registry = test_registry();
        let m = manifest("mail-agent", "messages.search", &[]);
        registry.register(m.clone(), "http://127.0.0.1:9003".to_string(), "/health".to_string()).await.unwrap();
        registry.deregister("mail-agent").await.unwrap();
        registry.register(m, "http://127.0.0.1:9003".to_string(), "/health".to_string()).await.unwrap();
        assert_eq!(registry.get_agent("mail-agent").unwrap().health_status, HealthStatus::Unknown);
    }

    #[tokio::test]
    async fn deregister_unknown_agent_is_not_found() {
        let registry = test_registry();
        let err = registry.deregister("ghost-agent").await.unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn lookup_capability_resolves_registered_verb() {
        let registry = test_registry();
        let m = manifest("mail-agent", "messages.search", &[]);
        registry.register(m, "http://127.0.0.1:9004".to_string(), "/health".to_string()).await.unwrap();
        let refs = registry.lookup_capability("messages.search");
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].agent_id, "mail-agent");
    }

    #[tokio::test]
    async fn register_with_same_agent_id_supersedes_prior_capability_set() {
        let registry = test_registry();
        let v1 = manifest("mail-agent", "messages.search", &[]);
        registry.register(v1, "http://127.0.0.1:9006".to_string(), "/health".to_string()).await.unwrap();
        assert_eq!(registry.lookup_capability("messages.search").len(), 1);

        let v2 = manifest("mail-agent", "messages.list", &[]);
        registry.register(v2, "http://127.0.0.1:9006".to_string(), "/health".to_string()).await.unwrap();

        // The old verb no longer resolves to this agent_id...
        assert!(registry.lookup_capability("messages.search").is_empty());
        // ...and the new manifest's verb does, with exactly one owner.
        let refs = registry.lookup_capability("messages.list");
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].agent_id, "mail-agent");
    }

    #[tokio::test]
    async fn system_health_is_healthy_with_no_unhealthy_agents() {
        let registry = test_registry();
        let m = manifest("mail-agent", "messages.search", &[]);
        registry.register(m, "http://127.0.0.1:9005".to_string(), "/health".to_string()).await.unwrap();
        let snapshot = registry.system_health();
        assert_eq!(snapshot.overall, OverallHealth::Healthy);
    }
}
