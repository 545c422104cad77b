//! Security plane wire types: events, incidents, egress decisions, and the
//! enumerated automated response actions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub kind: String,
    pub severity: Severity,
    pub service_id: String,
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub details: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    Open,
    Acknowledged,
    Resolved,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub incident_id: Uuid,
    pub service_id: String,
    pub kind: String,
    pub severity: Severity,
    pub status: IncidentStatus,
    pub window_start: DateTime<Utc>,
    pub event_ids: Vec<Uuid>,
}

/// Result of `EvaluateEgress`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EgressDecision {
    Allow,
    Deny,
    DenyWithBypassToken,
}

/// The enumerated automated response actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseAction {
    Alert,
    Notify,
    Audit,
    Escalate,
    Block,
    Isolate,
    Quarantine,
    Freeze,
    RateLimit,
    Monitor,
    Review,
}

/// A declarative rule `{event_pattern -> actions[]}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseRule {
    pub priority: i32,
    pub event_kind_pattern: String,
    pub min_severity: Severity,
    pub actions: Vec<ResponseAction>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_ordering_runs_info_to_critical() {
        assert!(Severity::Info < Severity::Low);
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn severity_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&Severity::High).unwrap(), "\"high\"");
    }

    #[test]
    fn egress_decision_round_trips_through_json() {
        let decision = EgressDecision::DenyWithBypassToken;
        let json = serde_json::to_string(&decision).unwrap();
        assert_eq!(json, "\"deny_with_bypass_token\"");
        let parsed: EgressDecision = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, decision);
    }
}
