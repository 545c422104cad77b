//! RegistryRecord and the views the Registry exposes over it.

use crate::manifest::{AgentManifest, SafetyAnnotation};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Unknown,
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Tie-break ordering for capability lookup: healthy > degraded >
    /// unhealthy > unknown. Lower rank wins.
    pub fn preference_rank(self) -> u8 {
        match self {
            HealthStatus::Healthy => 0,
            HealthStatus::Degraded => 1,
            HealthStatus::Unhealthy => 2,
            HealthStatus::Unknown => 3,
        }
    }
}

/// One poll result appended to a `RegistryRecord`'s bounded health ring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthObservation {
    pub at: DateTime<Utc>,
    pub success: bool,
    pub latency_ms: Option<u64>,
}

/// Bounded ring buffer of health observations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthRing {
    capacity: usize,
    observations: VecDeque<HealthObservation>,
}

impl HealthRing {
    pub fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), observations: VecDeque::with_capacity(capacity) }
    }

    pub fn push(&mut self, obs: HealthObservation) {
        if self.observations.len() >= self.capacity {
            self.observations.pop_front();
        }
        self.observations.push_back(obs);
    }

    pub fn last_n(&self, n: usize) -> impl Iterator<Item = &HealthObservation> {
        let len = self.observations.len();
        self.observations.iter().skip(len.saturating_sub(n))
    }

    pub fn consecutive_failures(&self) -> usize {
        self.observations.iter().rev().take_while(|o| !o.success).count()
    }

    pub fn consecutive_successes(&self) -> usize {
        self.observations.iter().rev().take_while(|o| o.success).count()
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }
}

/// Sliding-window performance stats used for capability tie-break and SLA reporting.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceStats {
    pub success_count: u64,
    pub failure_count: u64,
    pub p50_latency_ms: u64,
    pub p95_latency_ms: u64,
    pub sla_violations: u64,
}

impl PerformanceStats {
    pub fn success_rate(&self) -> f64 {
        let total = self.success_count + self.failure_count;
        if total == 0 {
            1.0
        } else {
            self.success_count as f64 / total as f64
        }
    }
}

/// The Registry's record of one registered agent.
/// Exclusively owned by `kenny-registry`'s store; this type is the shared shape used
/// to serialize it to sled and to the wire (`AgentSummary`/`GetAgent` responses).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryRecord {
    pub manifest: AgentManifest,
    pub health_endpoint: String,
    pub base_url: String,
    pub registered_at: DateTime<Utc>,
    pub last_health_check_at: Option<DateTime<Utc>>,
    pub health_status: HealthStatus,
    #[serde(default)]
    pub health_history: HealthRing,
    #[serde(default)]
    pub performance: PerformanceStats,
}

/// `ListAgents` view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSummary {
    pub agent_id: String,
    pub display_name: String,
    pub agent_type: crate::manifest::AgentType,
    pub health_status: HealthStatus,
    pub capability_verbs: Vec<String>,
}

impl From<&RegistryRecord> for AgentSummary {
    fn from(r: &RegistryRecord) -> Self {
        Self {
            agent_id: r.manifest.agent_id.clone(),
            display_name: r.manifest.display_name.clone(),
            agent_type: r.manifest.agent_type,
            health_status: r.health_status,
            capability_verbs: r.manifest.verbs().map(str::to_string).collect(),
        }
    }
}

/// `ListCapabilities`/`LookupCapability` view: one entry per (verb, agent) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityRef {
    pub verb: String,
    pub agent_id: String,
    pub base_url: String,
    pub safety_annotations: BTreeSet<SafetyAnnotation>,
    pub health_status: HealthStatus,
    pub p95_latency_ms: u64,
}

/// `SystemHealth` aggregate snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallHealth {
    Healthy,
    Degraded,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlaViolation {
    pub agent_id: String,
    pub verb: String,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemHealthSnapshot {
    pub overall: OverallHealth,
    pub per_agent: Vec<AgentSummary>,
    pub sla_violations: Vec<SlaViolation>,
    pub recommendations: Vec<String>,
    pub generated_at: DateTime<Utc>,
}
