//! Automated response actions: a declarative rule
//! `{event_pattern -> actions[]}` fires against each recorded `SecurityEvent` (and
//! any `Incident` it opens or mutates); actions are idempotent — re-firing
//! `block` for an already-blocked destination extends its expiry rather than
//! stacking.
//!
//! The egress block/unblock primitives live in `kenny-registry::EgressRules`;
//! this crate never depends on the registry crate directly, so response
//! actions reach it through the [`EgressController`] trait the registry
//! binary implements over its `Arc<Registry>`.

use crate::bypass::BypassStore;
use crate::rate_limit::RateLimiters;
use kenny_core::security::{ResponseAction, ResponseRule, Severity};
use std::time::Duration;

/// Effects a `block`/`isolate`/`unblock` action has on the egress plane. Kept
/// separate from `kenny-registry::EgressRules` so this crate stays decoupled
/// from the registry's storage choices.
pub trait EgressController: Send + Sync {
    fn block_service(&self, service_id: &str, ttl: Option<Duration>);
    fn block_destination(&self, destination: &str, ttl: Option<Duration>);
}

/// Where `alert`/`notify` actions surface; the default just logs, matching the
/// teacher's `tracing::warn!` idiom for anything without a dedicated dashboard.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, message: &str);
}

pub struct TracingNotificationSink;

impl NotificationSink for TracingNotificationSink {
    fn notify(&self, message: &str) {
        tracing::warn!(target: "kenny_security::notify", "{message}");
    }
}

/// Context one action application needs: the event/incident that triggered it
/// plus the shared stores every action type may touch.
pub struct ActionContext<'a> {
    pub service_id: &'a str,
    pub destination: Option<&'a str>,
    pub severity: Severity,
    pub egress: &'a dyn EgressController,
    pub notifications: &'a dyn NotificationSink,
    pub rate_limiters: &'a RateLimiters,
    pub bypass: &'a BypassStore,
    pub event_log: &'a crate::events::EventLog,
    pub incident_id: Option<uuid::Uuid>,
    pub incidents: &'a crate::incidents::Incidents,
}

/// Default block/rate-limit durations used when a rule doesn't carry its own.
pub struct ActionDefaults {
    pub block_ttl: Duration,
    pub rate_limit_per_s: u32,
    pub rate_limit_burst: u32,
}

impl Default for ActionDefaults {
    fn default() -> Self {
        Self { block_ttl: Duration::from_secs(3600), rate_limit_per_s: 5, rate_limit_burst: 10 }
    }
}

/// Evaluates `rules` in priority order (lower fires first) against `ctx.severity`
/// and applies every action of every matching rule. A rule matches when its
/// `min_severity` is met; `event_kind_pattern` matching against the triggering
/// event kind is the caller's responsibility via [`rules_matching`].
pub fn apply_rules(rules: &[ResponseRule], ctx: &ActionContext<'_>, defaults: &ActionDefaults) {
    let mut ordered: Vec<&ResponseRule> = rules.iter().collect();
    ordered.sort_by_key(|r| r.priority);
    for rule in ordered {
        if ctx.severity < rule.min_severity {
            continue;
        }
        for action in &rule.actions {
            apply_action(*action, ctx, defaults);
        }
    }
}

/// Selects the rules whose `event_kind_pattern` glob-matches `kind`.
pub fn rules_matching<'a>(rules: &'a [ResponseRule], kind: &str) -> Vec<&'a ResponseRule> {
    rules
        .iter()
        .filter(|r| glob::Pattern::new(&r.event_kind_pattern).map(|p| p.matches(kind)).unwrap_or(r.event_kind_pattern == kind))
        .collect()
}

fn apply_action(action: ResponseAction, ctx: &ActionContext<'_>, defaults: &ActionDefaults) {
    match action {
        ResponseAction::Alert => {
            ctx.notifications.notify(&format!("ALERT: {} severity event on {}", severity_label(ctx.severity), ctx.service_id));
        }
        ResponseAction::Notify => {
            ctx.notifications.notify(&format!("security event on {}: severity {}", ctx.service_id, severity_label(ctx.severity)));
        }
        ResponseAction::Audit => {
            ctx.event_log.audit(ctx.incident_id, &format!("response action audit for {}", ctx.service_id));
        }
        ResponseAction::Escalate => {
            if let Some(incident_id) = ctx.incident_id {
                ctx.incidents.escalate(incident_id);
                ctx.notifications.notify(&format!("incident {incident_id} escalated"));
            }
        }
        ResponseAction::Block => {
            if let Some(destination) = ctx.destination {
                // Idempotent: installing a block for an already-blocked destination
                // simply extends its expiry.
                ctx.egress.block_destination(destination, Some(defaults.block_ttl));
            }
        }
        ResponseAction::Isolate => {
            ctx.egress.block_service(ctx.service_id, Some(defaults.block_ttl));
        }
        ResponseAction::Quarantine => {
            // Marks the service's recent outputs tainted; the Coordinator is
            // expected to re-review via the same incident-lookup path used for
            // `blocked_by_policy` results.
            ctx.event_log.audit(ctx.incident_id, &format!("quarantine: {} outputs require Coordinator re-review", ctx.service_id));
        }
        ResponseAction::Freeze => {
            // Pausing new Gateway accepts for the service is a Gateway-side
            // admission-control concern; this plane records the directive so the
            // Gateway's periodic policy poll picks it up.
            ctx.event_log.audit(ctx.incident_id, &format!("freeze: {} new accepts paused at Gateway", ctx.service_id));
        }
        ResponseAction::RateLimit => {
            ctx.rate_limiters.install(ctx.service_id, defaults.rate_limit_per_s, defaults.rate_limit_burst);
        }
        ResponseAction::Monitor => {
            ctx.event_log.audit(ctx.incident_id, &format!("monitor: shortened health interval + verbose logging for {}", ctx.service_id));
        }
        ResponseAction::Review => {
            ctx.event_log.audit(ctx.incident_id, &format!("queued {} for human review", ctx.service_id));
        }
    }
}

fn severity_label(s: Severity) -> &'static str {
    match s {
        Severity::Info => "info",
        Severity::Low => "low",
        Severity::Medium => "medium",
        Severity::High => "high",
        Severity::Critical => "critical",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventLog;
    use crate::incidents::Incidents;
    use std::sync::Mutex;

    struct RecordingEgress {
        blocked_services: Mutex<Vec<String>>,
        blocked_destinations: Mutex<Vec<String>>,
    }

    impl EgressController for RecordingEgress {
        fn block_service(&self, service_id: &str, _ttl: Option<Duration>) {
            self.blocked_services.lock().unwrap().push(service_id.to_string());
        }
        fn block_destination(&self, destination: &str, _ttl: Option<Duration>) {
            self.blocked_destinations.lock().unwrap().push(destination.to_string());
        }
    }

    struct NoopSink;
    impl NotificationSink for NoopSink {
        fn notify(&self, _message: &str) {}
    }

    #[test]
    fn critical_incident_triggers_block_and_isolate() {
        let egress = RecordingEgress { blocked_services: Mutex::new(vec![]), blocked_destinations: Mutex::new(vec![]) };
        let sink = NoopSink;
        let rate_limiters = RateLimiters::new();
        let bypass = BypassStore::new();
        let event_log = EventLog::open(":memory:").unwrap();
        let incidents = Incidents::new();

        let rules = vec![ResponseRule {
            priority: 10,
            event_kind_pattern: "egress_attempt".to_string(),
            min_severity: Severity::High,
            actions: vec![ResponseAction::Block, ResponseAction::Isolate],
        }];

        let ctx = ActionContext {
            service_id: "whatsapp-agent",
            destination: Some("api.external.example.com"),
            severity: Severity::Critical,
            egress: &egress,
            notifications: &sink,
            rate_limiters: &rate_limiters,
            bypass: &bypass,
            event_log: &event_log,
            incident_id: None,
            incidents: &incidents,
        };

        let matching: Vec<ResponseRule> = rules_matching(&rules, "egress_attempt").into_iter().cloned().collect();
        apply_rules(&matching, &ctx, &ActionDefaults::default());
        assert_eq!(egress.blocked_destinations.lock().unwrap().len(), 1);
        assert_eq!(egress.blocked_services.lock().unwrap().len(), 1);
    }

    #[test]
    fn below_threshold_severity_does_not_fire() {
        let egress = RecordingEgress { blocked_services: Mutex::new(vec![]), blocked_destinations: Mutex::new(vec![]) };
        let sink = NoopSink;
        let rate_limiters = RateLimiters::new();
        let bypass = BypassStore::new();
        let event_log = EventLog::open(":memory:").unwrap();
        let incidents = Incidents::new();

        let rules = vec![ResponseRule {
            priority: 10,
            event_kind_pattern: "egress_attempt".to_string(),
            min_severity: Severity::Critical,
            actions: vec![ResponseAction::Isolate],
        }];

        let ctx = ActionContext {
            service_id: "mail-agent",
            destination: Some("api.external.example.com"),
            severity: Severity::Medium,
            egress: &egress,
            notifications: &sink,
            rate_limiters: &rate_limiters,
            bypass: &bypass,
            event_log: &event_log,
            incident_id: None,
            incidents: &incidents,
        };

        apply_rules(&rules, &ctx, &ActionDefaults::default());
        assert!(egress.blocked_services.lock().unwrap().is_empty());
    }
}
