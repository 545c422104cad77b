//! Agent Manifest and CapabilityDescriptor: the registration payload every agent
//! presents to the Registry.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// `basic` agents expose only direct, single-capability calls; `intelligent_service`
/// agents additionally expose the NL `/query` path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    Basic,
    IntelligentService,
}

/// Safety annotations drawn from a fixed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyAnnotation {
    ReadOnly,
    WriteRequiresApproval,
    LocalOnly,
    NoEgress,
}

/// Target latency SLA for a capability, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sla {
    pub target_ms: u64,
    pub max_ms: u64,
}

/// A single capability an agent advertises.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    /// Namespaced verb, e.g. `messages.search`.
    pub verb: String,
    pub input_schema: serde_json::Value,
    pub output_schema: serde_json::Value,
    #[serde(default)]
    pub safety_annotations: BTreeSet<SafetyAnnotation>,
    #[serde(default)]
    pub description: String,
    pub sla: Sla,
}

impl CapabilityDescriptor {
    pub fn is_write_requiring_approval(&self) -> bool {
        self.safety_annotations.contains(&SafetyAnnotation::WriteRequiresApproval)
    }

    pub fn is_no_egress(&self) -> bool {
        self.safety_annotations.contains(&SafetyAnnotation::NoEgress)
    }
}

/// Health-check endpoint declared by an agent's manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckSpec {
    pub endpoint: String,
    #[serde(default = "default_health_interval_s")]
    pub interval_s: u64,
}

fn default_health_interval_s() -> u64 {
    30
}

/// Self-description an agent presents on `POST /agents/register`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentManifest {
    pub agent_id: String,
    pub display_name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    pub agent_type: AgentType,
    pub capabilities: Vec<CapabilityDescriptor>,
    #[serde(default)]
    pub data_scopes: BTreeSet<String>,
    #[serde(default)]
    pub tool_access: BTreeSet<String>,
    #[serde(default)]
    pub egress_domains: BTreeSet<String>,
    pub health_check: HealthCheckSpec,
}

impl AgentManifest {
    /// Round-trips structurally modulo server-added fields, which this type
    /// does not carry (those live on `RegistryRecord`).
    pub fn verbs(&self) -> impl Iterator<Item = &str> {
        self.capabilities.iter().map(|c| c.verb.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AgentManifest {
        AgentManifest {
            agent_id: "mail-agent".into(),
            display_name: "Mail Agent".into(),
            version: "1.0.0".into(),
            description: String::new(),
            agent_type: AgentType::IntelligentService,
            capabilities: vec![CapabilityDescriptor {
                verb: "messages.search".into(),
                input_schema: serde_json::json!({"type": "object"}),
                output_schema: serde_json::json!({"type": "object"}),
                safety_annotations: [SafetyAnnotation::ReadOnly].into_iter().collect(),
                description: "search mail".into(),
                sla: Sla { target_ms: 200, max_ms: 2000 },
            }],
            data_scopes: ["mail:inbox".to_string()].into_iter().collect(),
            tool_access: BTreeSet::new(),
            egress_domains: BTreeSet::new(),
            health_check: HealthCheckSpec { endpoint: "/health".into(), interval_s: 30 },
        }
    }

    #[test]
    fn manifest_round_trips_through_json() {
        let m = sample();
        let bytes = serde_json::to_vec(&m).unwrap();
        let back: AgentManifest = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back.agent_id, m.agent_id);
        assert_eq!(back.verbs().collect::<Vec<_>>(), vec!["messages.search"]);
    }
}
