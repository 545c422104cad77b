//! Registry snapshot cache.

use kenny_core::client::RegistryClient;
use kenny_core::error::KennyError;
use kenny_core::registry_types::{AgentSummary, CapabilityRef};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

#[derive(Clone)]
pub struct Snapshot {
    pub agents: Vec<AgentSummary>,
    pub capabilities: Vec<CapabilityRef>,
    fetched_at: Instant,
}

pub struct SnapshotCache {
    inner: RwLock<Option<Snapshot>>,
    ttl: Duration,
}

impl SnapshotCache {
    pub fn new(ttl: Duration) -> Self {
        Self { inner: RwLock::new(None), ttl }
    }

    /// Fetches fresh agents/capabilities from the Registry. On success, caches
    /// and returns them. On failure, falls back to the last cached snapshot if
    /// it is still within `ttl`; otherwise propagates the error.
    pub async fn get_or_refresh(&self, registry: &RegistryClient) -> Result<Snapshot, KennyError> {
        match Self::fetch(registry).await {
            Ok(snapshot) => {
                *self.inner.write().await = Some(snapshot.clone());
                Ok(snapshot)
            }
            Err(err) => {
                let cached = self.inner.read().await;
                match cached.as_ref() {
                    Some(snapshot) if snapshot.fetched_at.elapsed() <= self.ttl => Ok(snapshot.clone()),
                    _ => Err(err),
                }
            }
        }
    }

    async fn fetch(registry: &RegistryClient) -> Result<Snapshot, KennyError> {
        let agents = registry.list_agents().await?;
        let capabilities = registry.list_capabilities().await?;
        Ok(Snapshot { agents, capabilities, fetched_at: Instant::now() })
    }
}
