//! Append-only security event log, backed by `rusqlite` in the same idiom as
//! `kenny-agent`'s L3 cache tier.

use chrono::{DateTime, Utc};
use kenny_core::security::{Severity, SecurityEvent};
use rusqlite::{params, Connection};
use std::sync::Mutex;
use uuid::Uuid;

pub struct EventLog {
    conn: Mutex<Connection>,
}

fn severity_to_i64(s: Severity) -> i64 {
    match s {
        Severity::Info => 0,
        Severity::Low => 1,
        Severity::Medium => 2,
        Severity::High => 3,
        Severity::Critical => 4,
    }
}

fn severity_from_i64(v: i64) -> Severity {
    match v {
        0 => Severity::Info,
        1 => Severity::Low,
        2 => Severity::Medium,
        3 => Severity::High,
        _ => Severity::Critical,
    }
}

impl EventLog {
    pub fn open(path: &str) -> rusqlite::Result<Self> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(path)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS security_events (
                event_id TEXT PRIMARY KEY,
                timestamp TEXT NOT NULL,
                kind TEXT NOT NULL,
                severity INTEGER NOT NULL,
                service_id TEXT NOT NULL,
                destination TEXT,
                details TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_events_service_kind_ts ON security_events(service_id, kind, timestamp)",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS audit_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                incident_id TEXT,
                message TEXT NOT NULL
            )",
            [],
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// `audit` response action: append a high-detail audit record.
    pub fn audit(&self, incident_id: Option<Uuid>, message: &str) {
        let Ok(conn) = self.conn.lock() else { return };
        let _ = conn.execute(
            "INSERT INTO audit_records (timestamp, incident_id, message) VALUES (?1, ?2, ?3)",
            params![Utc::now().to_rfc3339(), incident_id.map(|id| id.to_string()), message],
        );
    }

    pub fn append(&self, event: &SecurityEvent) {
        let Ok(conn) = self.conn.lock() else { return };
        let Ok(details) = serde_json::to_string(&event.details) else { return };
        let _ = conn.execute(
            "INSERT INTO security_events (event_id, timestamp, kind, severity, service_id, destination, details)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                event.event_id.to_string(),
                event.timestamp.to_rfc3339(),
                event.kind,
                severity_to_i64(event.severity),
                event.service_id,
                event.destination,
                details,
            ],
        );
    }

    /// Events for `(service_id, kind)` with `timestamp >= since`.
    pub fn events_since(&self, service_id: &str, kind: &str, since: DateTime<Utc>) -> Vec<SecurityEvent> {
        let Ok(conn) = self.conn.lock() else { return Vec::new() };
        let Ok(mut stmt) = conn.prepare(
            "SELECT event_id, timestamp, kind, severity, service_id, destination, details
             FROM security_events WHERE service_id = ?1 AND kind = ?2 AND timestamp >= ?3
             ORDER BY timestamp ASC",
        ) else {
            return Vec::new();
        };
        let rows = stmt.query_map(params![service_id, kind, since.to_rfc3339()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, String>(6)?,
            ))
        });
        let Ok(rows) = rows else { return Vec::new() };
        rows.filter_map(Result::ok)
            .filter_map(|(id, ts, kind, sev, service_id, destination, details)| {
                Some(SecurityEvent {
                    event_id: Uuid::parse_str(&id).ok()?,
                    timestamp: DateTime::parse_from_rfc3339(&ts).ok()?.with_timezone(&Utc),
                    kind,
                    severity: severity_from_i64(sev),
                    service_id,
                    destination,
                    details: serde_json::from_str(&details).unwrap_or_default(),
                })
            })
            .collect()
    }
}
