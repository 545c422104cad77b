//! Event correlation: groups `SecurityEvent`s by `(service_id, kind)`
//! within a rolling window; three or more events opens an Incident, further
//! events within the window mutate it rather than opening a duplicate.

use crate::events::EventLog;
use crate::incidents::Incidents;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use kenny_core::security::{Incident, SecurityEvent};

pub struct Correlator {
    log: EventLog,
    incidents: Incidents,
    window_s: i64,
    /// Minimum related-event count before an Incident opens (spec: "≥3 events").
    threshold: usize,
}

pub struct CorrelationOutcome {
    pub incident: Option<Incident>,
    pub newly_created: bool,
}

impl Correlator {
    pub fn new(log: EventLog, window_s: i64) -> Self {
        Self { log, incidents: Incidents::new(), window_s, threshold: 3 }
    }

    pub fn incidents(&self) -> &Incidents {
        &self.incidents
    }

    pub fn event_log(&self) -> &EventLog {
        &self.log
    }

    /// Records `event` and folds it into correlation state; returns the
    /// resulting Incident if the event opened or mutated one.
    pub fn record(&self, event: SecurityEvent) -> CorrelationOutcome {
        self.log.append(&event);

        if let Some(open) = self.incidents.open_for(&event.service_id, &event.kind) {
            let mutated = self.incidents.mutate(open.incident_id, event.event_id, event.severity);
            return CorrelationOutcome { incident: mutated, newly_created: false };
        }

        let since: DateTime<Utc> = Utc::now() - ChronoDuration::seconds(self.window_s);
        let matching = self.log.events_since(&event.service_id, &event.kind, since);
        if matching.len() < self.threshold {
            return CorrelationOutcome { incident: None, newly_created: false };
        }
        let severity = matching.iter().map(|e| e.severity).max().unwrap_or(event.severity);
        let window_start = matching.iter().map(|e| e.timestamp).min().unwrap_or(event.timestamp);
        let event_ids = matching.iter().map(|e| e.event_id).collect();
        let incident = self.incidents.create(&event.service_id, &event.kind, severity, window_start, event_ids);
        CorrelationOutcome { incident: Some(incident), newly_created: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kenny_core::security::Severity;
    use std::collections::HashMap;
    use uuid::Uuid;

    fn event(kind: &str, severity: Severity) -> SecurityEvent {
        SecurityEvent {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            kind: kind.to_string(),
            severity,
            service_id: "whatsapp-agent".to_string(),
            destination: Some("api.external.example.com".to_string()),
            details: HashMap::new(),
        }
    }

    #[test]
    fn third_matching_event_opens_exactly_one_incident() {
        let correlator = Correlator::new(EventLog::open(":memory:").unwrap(), 1800);
        assert!(correlator.record(event("egress_attempt", Severity::High)).incident.is_none());
        assert!(correlator.record(event("egress_attempt", Severity::High)).incident.is_none());
        let third = correlator.record(event("egress_attempt", Severity::High));
        assert!(third.newly_created);
        assert!(third.incident.is_some());
    }

    #[test]
    fn fourth_event_mutates_rather_than_duplicates() {
        let correlator = Correlator::new(EventLog::open(":memory:").unwrap(), 1800);
        for _ in 0..3 {
            correlator.record(event("egress_attempt", Severity::Medium));
        }
        let fourth = correlator.record(event("egress_attempt", Severity::Critical));
        assert!(!fourth.newly_created);
        let incident = fourth.incident.unwrap();
        assert_eq!(incident.severity, Severity::Critical);
        assert_eq!(incident.event_ids.len(), 4);
        assert_eq!(correlator.incidents.list_open().len(), 1);
    }
}
