//! Inter-agent dependency calls: declares which other agents' capabilities
//! this agent needs, then resolves and invokes them through the Registry
//! rather than a hardcoded base URL.

use kenny_core::client::{AgentClient, RegistryClient};
use kenny_core::error::KennyError;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// One declared need: either required (its absence or failure surfaces to the
/// caller) or optional.
#[derive(Debug, Clone)]
pub struct DependencyDeclaration {
    pub other_agent_id: String,
    pub required_capabilities: Vec<String>,
    pub required: bool,
    pub timeout_ms: u64,
}

/// Tracks declared dependencies and performs registry-mediated calls to them.
pub struct DependencyManager {
    registry: RegistryClient,
    agent_client: AgentClient,
    declarations: RwLock<HashMap<String, DependencyDeclaration>>,
}

impl DependencyManager {
    pub fn new(registry_base_url: &str) -> Self {
        Self {
            registry: RegistryClient::new(registry_base_url),
            agent_client: AgentClient::new(),
            declarations: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register_dependency(&self, decl: DependencyDeclaration) {
        self.declarations.write().await.insert(decl.other_agent_id.clone(), decl);
    }

    pub async fn is_required(&self, other_agent_id: &str) -> bool {
        self.declarations.read().await.get(other_agent_id).map(|d| d.required).unwrap_or(false)
    }

    /// Resolves `other_agent_id`'s base URL via the Registry's capability index,
    /// then issues the call. A required dependency's failure propagates as-is; an
    /// optional dependency's failure is the caller's to recover from.
    pub async fn query_agent(
        &self,
        other_agent_id: &str,
        verb: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, KennyError> {
        let timeout_ms = self
            .declarations
            .read()
            .await
            .get(other_agent_id)
            .map(|d| d.timeout_ms)
            .unwrap_or(30_000);

        let refs = self.registry.lookup_capability(verb).await?;
        let target = refs
            .into_iter()
            .find(|r| r.agent_id == other_agent_id)
            .ok_or_else(|| KennyError::AgentUnknown { agent_id: other_agent_id.to_string() })?;

        self.agent_client.call_capability(&target.base_url, verb, params, timeout_ms).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> DependencyManager {
        DependencyManager::new("http://127.0.0.1:1")
    }

    #[tokio::test]
    async fn is_required_defaults_false_for_undeclared_agent() {
        let mgr = manager();
        assert!(!mgr.is_required("contacts-agent").await);
    }

    #[tokio::test]
    async fn register_dependency_records_required_flag() {
        let mgr = manager();
        mgr.register_dependency(DependencyDeclaration {
            other_agent_id: "contacts-agent".to_string(),
            required_capabilities: vec!["contacts.resolve".to_string()],
            required: true,
            timeout_ms: 5_000,
        })
        .await;
        assert!(mgr.is_required("contacts-agent").await);
    }

    #[tokio::test]
    async fn registering_again_overwrites_prior_declaration() {
        let mgr = manager();
        let base = DependencyDeclaration {
            other_agent_id: "contacts-agent".to_string(),
            required_capabilities: vec![],
            required: true,
            timeout_ms: 5_000,
        };
        mgr.register_dependency(base).await;
        mgr.register_dependency(DependencyDeclaration {
            other_agent_id: "contacts-agent".to_string(),
            required_capabilities: vec![],
            required: false,
            timeout_ms: 1_000,
        })
        .await;
        assert!(!mgr.is_required("contacts-agent").await);
    }

    #[tokio::test]
    async fn query_agent_surfaces_dependency_unavailable_when_registry_unreachable() {
        let mgr = manager();
        let err = mgr.query_agent("contacts-agent", "contacts.resolve", serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, KennyError::DependencyUnavailable { .. } | KennyError::Internal(_) | KennyError::Timeout));
    }
}
