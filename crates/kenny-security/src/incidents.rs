//! In-memory incident index, keyed by `(service_id, kind)`. An incident stays "open" for
//! correlation purposes — new matching events mutate it rather than opening a
//! duplicate — until explicitly acknowledged/resolved by an operator.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use kenny_core::security::{Incident, IncidentStatus, Severity};
use uuid::Uuid;

#[derive(Default)]
pub struct Incidents {
    by_id: DashMap<Uuid, Incident>,
    open_key: DashMap<(String, String), Uuid>,
}

impl Incidents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_for(&self, service_id: &str, kind: &str) -> Option<Incident> {
        let id = *self.open_key.get(&(service_id.to_string(), kind.to_string()))?;
        self.by_id.get(&id).map(|r| r.value().clone())
    }

    pub fn get(&self, incident_id: Uuid) -> Option<Incident> {
        self.by_id.get(&incident_id).map(|r| r.value().clone())
    }

    pub fn create(&self, service_id: &str, kind: &str, severity: Severity, window_start: DateTime<Utc>, event_ids: Vec<Uuid>) -> Incident {
        let incident = Incident {
            incident_id: Uuid::new_v4(),
            service_id: service_id.to_string(),
            kind: kind.to_string(),
            severity,
            status: IncidentStatus::Open,
            window_start,
            event_ids,
        };
        self.by_id.insert(incident.incident_id, incident.clone());
        self.open_key.insert((service_id.to_string(), kind.to_string()), incident.incident_id);
        incident
    }

    /// Folds a new event into the existing incident for this `(service_id, kind)`:
    /// severity becomes the max of constituent events, event_ids grows.
    pub fn mutate(&self, incident_id: Uuid, new_event: Uuid, new_severity: Severity) -> Option<Incident> {
        let mut entry = self.by_id.get_mut(&incident_id)?;
        entry.event_ids.push(new_event);
        if new_severity > entry.severity {
            entry.severity = new_severity;
        }
        Some(entry.clone())
    }

    pub fn acknowledge(&self, incident_id: Uuid) -> Option<Incident> {
        let mut entry = self.by_id.get_mut(&incident_id)?;
        entry.status = IncidentStatus::Acknowledged;
        Some(entry.clone())
    }

    pub fn escalate(&self, incident_id: Uuid) -> Option<Incident> {
        let mut entry = self.by_id.get_mut(&incident_id)?;
        entry.severity = match entry.severity {
            Severity::Info => Severity::Low,
            Severity::Low => Severity::Medium,
            Severity::Medium => Severity::High,
            Severity::High | Severity::Critical => Severity::Critical,
        };
        Some(entry.clone())
    }

    pub fn resolve(&self, incident_id: Uuid) -> Option<Incident> {
        let mut entry = self.by_id.get_mut(&incident_id)?;
        entry.status = IncidentStatus::Resolved;
        let incident = entry.clone();
        drop(entry);
        self.open_key.remove(&(incident.service_id.clone(), incident.kind.clone()));
        Some(incident)
    }

    pub fn list_open(&self) -> Vec<Incident> {
        self.by_id
            .iter()
            .filter(|r| r.status != IncidentStatus::Resolved)
            .map(|r| r.value().clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_mutate_tracks_open_incident() {
        let incidents = Incidents::new();
        let e1 = Uuid::new_v4();
        let created = incidents.create("whatsapp-agent", "egress_attempt", Severity::Medium, Utc::now(), vec![e1]);
        assert_eq!(incidents.open_for("whatsapp-agent", "egress_attempt").unwrap().incident_id, created.incident_id);

        let e2 = Uuid::new_v4();
        let mutated = incidents.mutate(created.incident_id, e2, Severity::High).unwrap();
        assert_eq!(mutated.severity, Severity::High);
        assert_eq!(mutated.event_ids.len(), 2);
    }

    #[test]
    fn resolve_clears_open_key_so_next_event_opens_a_new_incident() {
        let incidents = Incidents::new();
        let created = incidents.create("mail-agent", "egress_attempt", Severity::Low, Utc::now(), vec![Uuid::new_v4()]);
        incidents.resolve(created.incident_id);
        assert!(incidents.open_for("mail-agent", "egress_attempt").is_none());
    }

    #[test]
    fn escalate_raises_severity_one_level() {
        let incidents = Incidents::new();
        let created = incidents.create("mail-agent", "egress_attempt", Severity::Medium, Utc::now(), vec![Uuid::new_v4()]);
        let escalated = incidents.escalate(created.incident_id).unwrap();
        assert_eq!(escalated.severity, Severity::High);
    }
}
