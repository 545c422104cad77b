//! Security plane: egress enforcement support, event collection,
//! incident correlation, and automated response actions. The egress allowlist
//! itself is owned by `kenny-registry`; this crate observes every
//! egress attempt, correlates events into incidents, and drives the response
//! actions enumerated in [`response_actions::EgressController`]
//! seam so it never needs a direct dependency on the registry's storage.

pub mod bypass;
pub mod correlator;
pub mod events;
pub mod incidents;
pub mod rate_limit;
pub mod response_actions;

use chrono::Utc;
use kenny_core::security::{EgressDecision, ResponseRule, SecurityEvent, Severity};
use response_actions::{ActionContext, ActionDefaults, EgressController, NotificationSink, TracingNotificationSink};
use std::collections::HashMap;
use uuid::Uuid;

pub use bypass::{BypassStore, BypassToken};
pub use correlator::{Correlator, CorrelationOutcome};
pub use events::EventLog;
pub use incidents::Incidents;
pub use rate_limit::RateLimiters;

/// Ties the security plane's stores and the rule engine together behind a single
/// `record_egress_attempt`/`record_event` entry point, matching the shape
/// `kenny-registry`'s binary wires up around an `Arc<Registry>` `EgressController`.
pub struct SecurityPlane {
    correlator: Correlator,
    rate_limiters: RateLimiters,
    bypass: BypassStore,
    rules: Vec<ResponseRule>,
    defaults: ActionDefaults,
    egress: Box<dyn EgressController>,
    notifications: Box<dyn NotificationSink>,
}

impl SecurityPlane {
    pub fn new(event_log: EventLog, correlation_window_s: i64, rules: Vec<ResponseRule>, egress: Box<dyn EgressController>) -> Self {
        Self {
            correlator: Correlator::new(event_log, correlation_window_s),
            rate_limiters: RateLimiters::new(),
            bypass: BypassStore::new(),
            rules,
            defaults: ActionDefaults::default(),
            egress,
            notifications: Box::new(TracingNotificationSink),
        }
    }

    pub fn rate_limiters(&self) -> &RateLimiters {
        &self.rate_limiters
    }

    pub fn bypass(&self) -> &BypassStore {
        &self.bypass
    }

    pub fn incidents(&self) -> &Incidents {
        self.correlator.incidents()
    }

    /// `EvaluateEgress`'s security-plane half: records the event and, on denial,
    /// folds it into correlation and fires any matching response rules. Returns
    /// the correlation outcome so callers (e.g. the registry's `/agents/register`
    /// egress check) can log whether an incident opened.
    pub fn record_egress_attempt(&self, service_id: &str, destination: &str, decision: EgressDecision) -> CorrelationOutcome {
        let severity = match decision {
            EgressDecision::Allow => Severity::Info,
            EgressDecision::Deny => Severity::High,
            EgressDecision::DenyWithBypassToken => Severity::Medium,
        };
        let event = SecurityEvent {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            kind: "egress_attempt".to_string(),
            severity,
            service_id: service_id.to_string(),
            destination: Some(destination.to_string()),
            details: HashMap::new(),
        };
        self.record_event(event)
    }

    /// Generic entry point for any `SecurityEvent` kind (data_access,
    /// policy_violation, …), not just egress.
    pub fn record_event(&self, event: SecurityEvent) -> CorrelationOutcome {
        let service_id = event.service_id.clone();
        let destination = event.destination.clone();
        let kind = event.kind.clone();

        let outcome = self.correlator.record(event);

        // Response actions are keyed to Incidents (spec §4.5), not individual
        // events: a lone denied attempt must not itself isolate a service,
        // only the correlated pattern of >=3 that opens or mutates one.
        let Some(incident) = outcome.incident.as_ref() else {
            return outcome;
        };

        let matching: Vec<ResponseRule> = response_actions::rules_matching(&self.rules, &kind).into_iter().cloned().collect();
        if matching.is_empty() {
            return outcome;
        }

        let ctx = ActionContext {
            service_id: &service_id,
            destination: destination.as_deref(),
            severity: incident.severity,
            egress: self.egress.as_ref(),
            notifications: self.notifications.as_ref(),
            rate_limiters: &self.rate_limiters,
            bypass: &self.bypass,
            event_log: self.correlator.event_log(),
            incident_id: Some(incident.incident_id),
            incidents: self.correlator.incidents(),
        };
        response_actions::apply_rules(&matching, &ctx, &self.defaults);

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    struct RecordingEgress {
        destinations: Mutex<Vec<String>>,
        services: Mutex<Vec<String>>,
    }

    impl EgressController for RecordingEgress {
        fn block_service(&self, service_id: &str, _ttl: Option<Duration>) {
            self.services.lock().unwrap().push(service_id.to_string());
        }
        fn block_destination(&self, destination: &str, _ttl: Option<Duration>) {
            self.destinations.lock().unwrap().push(destination.to_string());
        }
    }

    fn plane() -> SecurityPlane {
        use kenny_core::security::ResponseAction;
        let egress = Box::new(RecordingEgress { destinations: Mutex::new(vec![]), services: Mutex::new(vec![]) });
        let rules = vec![ResponseRule {
            priority: 0,
            event_kind_pattern: "egress_attempt".to_string(),
            min_severity: Severity::High,
            actions: vec![ResponseAction::Block, ResponseAction::Isolate],
        }];
        SecurityPlane::new(EventLog::open(":memory:").unwrap(), 1800, rules, egress)
    }

    #[test]
    fn egress_denial_scenario_opens_incident_on_third_attempt() {
        let plane = plane();
        assert!(!plane.record_egress_attempt("whatsapp-agent", "api.external.example.com", EgressDecision::Deny).newly_created);
        assert!(!plane.record_egress_attempt("whatsapp-agent", "api.external.example.com", EgressDecision::Deny).newly_created);
        let third = plane.record_egress_attempt("whatsapp-agent", "api.external.example.com", EgressDecision::Deny);
        assert!(third.newly_created);
        assert_eq!(plane.incidents().list_open().len(), 1);
    }
}
