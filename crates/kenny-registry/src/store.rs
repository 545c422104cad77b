//! Sled-backed persistence for `RegistryRecord`s. One tree
//! holds one record per `agent_id`, grounded on the teacher's one-tree-per-domain
//! `KnowledgeStore` (`pagi-core/src/knowledge/store.rs`).

use kenny_core::registry_types::RegistryRecord;
use sled::Db;

const TREE_NAME: &str = "registry_records";

pub struct RegistryStore {
    db: Db,
}

impl RegistryStore {
    pub fn open(path: &str) -> sled::Result<Self> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    fn tree(&self) -> sled::Result<sled::Tree> {
        self.db.open_tree(TREE_NAME)
    }

    pub fn put(&self, record: &RegistryRecord) -> sled::Result<()> {
        let tree = self.tree()?;
        let bytes = serde_json::to_vec(record).map_err(|e| sled::Error::Unsupported(e.to_string()))?;
        tree.insert(record.manifest.agent_id.as_bytes(), bytes)?;
        tree.flush()?;
        Ok(())
    }

    pub fn get(&self, agent_id: &str) -> sled::Result<Option<RegistryRecord>> {
        let tree = self.tree()?;
        match tree.get(agent_id.as_bytes())? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes).ok()),
            None => Ok(None),
        }
    }

    pub fn remove(&self, agent_id: &str) -> sled::Result<bool> {
        let tree = self.tree()?;
        let existed = tree.remove(agent_id.as_bytes())?.is_some();
        tree.flush()?;
        Ok(existed)
    }

    /// Recovers every persisted record at startup, in no particular order; callers
    /// rebuild the in-memory capability index from this.
    pub fn load_all(&self) -> sled::Result<Vec<RegistryRecord>> {
        let tree = self.tree()?;
        let mut out = Vec::new();
        for entry in tree.iter() {
            let (_, bytes) = entry?;
            if let Ok(record) = serde_json::from_slice(&bytes) {
                out.push(record);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kenny_core::manifest::{AgentManifest, AgentType, HealthCheckSpec};
    use kenny_core::registry_types::HealthStatus;
    use std::collections::BTreeSet;

    fn manifest(agent_id: &str) -> AgentManifest {
        AgentManifest {
            agent_id: agent_id.to_string(),
            display_name: agent_id.to_string(),
            version: "1.0.0".to_string(),
            description: String::new(),
            agent_type: AgentType::Basic,
            capabilities: vec![],
            data_scopes: BTreeSet::new(),
            tool_access: BTreeSet::new(),
            egress_domains: BTreeSet::new(),
            health_check: HealthCheckSpec { endpoint: "/health".to_string(), interval_s: 30 },
        }
    }

    fn record(agent_id: &str) -> RegistryRecord {
        RegistryRecord {
            manifest: manifest(agent_id),
            health_endpoint: "/health".to_string(),
            base_url: format!("http://{agent_id}"),
            registered_at: chrono::Utc::now(),
            last_health_check_at: None,
            health_status: HealthStatus::Unknown,
            health_history: Default::default(),
            performance: Default::default(),
        }
    }

    #[test]
    fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = RegistryStore::open(dir.path().to_str().unwrap()).unwrap();
        store.put(&record("mail-agent")).unwrap();
        let got = store.get("mail-agent").unwrap().expect("present");
        assert_eq!(got.manifest.agent_id, "mail-agent");
    }

    #[test]
    fn load_all_recovers_every_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = RegistryStore::open(dir.path().to_str().unwrap()).unwrap();
        store.put(&record("mail-agent")).unwrap();
        store.put(&record("calendar-agent")).unwrap();
        let all = store.load_all().unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn remove_deletes_the_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = RegistryStore::open(dir.path().to_str().unwrap()).unwrap();
        store.put(&record("mail-agent")).unwrap();
        assert!(store.remove("mail-agent").unwrap());
        assert!(store.get("mail-agent").unwrap().is_none());
    }
}
