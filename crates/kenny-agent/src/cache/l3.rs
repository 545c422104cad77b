//! L3: local persistent, indexed store. Backed by `rusqlite`, matching the teacher's embedded-SQLite
//! idiom in `add-ons/pagi-gateway/src/chronos_sqlite.rs`.

use chrono::{DateTime, Utc};
use kenny_core::cache::CacheEntry;
use kenny_core::plan::CacheTier;
use rusqlite::{params, Connection};
use std::sync::Mutex;

pub struct L3Cache {
    ttl_ms: u64,
    conn: Mutex<Connection>,
}

impl L3Cache {
    pub fn open(path: &str, ttl_ms: u64) -> rusqlite::Result<Self> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(path)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS cache_entries (
                fingerprint TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                stored_at TEXT NOT NULL,
                ttl_ms INTEGER NOT NULL,
                access_count INTEGER NOT NULL,
                last_access_at TEXT NOT NULL,
                confidence REAL NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_cache_stored_at ON cache_entries(stored_at)",
            [],
        )?;
        Ok(Self { ttl_ms, conn: Mutex::new(conn) })
    }

    fn row_to_entry(
        fingerprint: String,
        value: String,
        stored_at: String,
        ttl_ms: u64,
        access_count: u64,
        last_access_at: String,
        confidence: f64,
    ) -> Option<CacheEntry> {
        Some(CacheEntry {
            fingerprint,
            value: serde_json::from_str(&value).ok()?,
            stored_at: DateTime::parse_from_rfc3339(&stored_at).ok()?.with_timezone(&Utc),
            tier: CacheTier::L3,
            ttl_ms,
            access_count,
            last_access_at: DateTime::parse_from_rfc3339(&last_access_at).ok()?.with_timezone(&Utc),
            confidence,
        })
    }

    /// Synchronous read; callers on an async executor should wrap this in
    /// `spawn_blocking`.
    pub fn get(&self, fingerprint: &str) -> Option<CacheEntry> {
        let conn = self.conn.lock().ok()?;
        let row = conn
            .query_row(
                "SELECT fingerprint, value, stored_at, ttl_ms, access_count, last_access_at, confidence
                 FROM cache_entries WHERE fingerprint = ?1",
                params![fingerprint],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)? as u64,
                        row.get::<_, i64>(4)? as u64,
                        row.get::<_, String>(5)?,
                        row.get::<_, f64>(6)?,
                    ))
                },
            )
            .ok()?;
        let entry = Self::row_to_entry(row.0, row.1, row.2, row.3, row.4, row.5, row.6)?;
        if entry.is_expired(Utc::now()) {
            self.invalidate(fingerprint);
            return None;
        }
        let new_count = entry.access_count + 1;
        let now = Utc::now().to_rfc3339();
        let _ = conn.execute(
            "UPDATE cache_entries SET access_count = ?1, last_access_at = ?2 WHERE fingerprint = ?3",
            params![new_count as i64, now, fingerprint],
        );
        Some(CacheEntry { access_count: new_count, last_access_at: Utc::now(), ..entry })
    }

    pub fn put(&self, mut entry: CacheEntry) {
        entry.ttl_ms = entry.ttl_ms.min(self.ttl_ms);
        let Ok(conn) = self.conn.lock() else { return };
        let Ok(value) = serde_json::to_string(&entry.value) else { return };
        let _ = conn.execute(
            "INSERT INTO cache_entries (fingerprint, value, stored_at, ttl_ms, access_count, last_access_at, confidence)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(fingerprint) DO UPDATE SET
                value = excluded.value,
                stored_at = excluded.stored_at,
                ttl_ms = excluded.ttl_ms,
                access_count = excluded.access_count,
                last_access_at = excluded.last_access_at,
                confidence = excluded.confidence",
            params![
                entry.fingerprint,
                value,
                entry.stored_at.to_rfc3339(),
                entry.ttl_ms as i64,
                entry.access_count as i64,
                entry.last_access_at.to_rfc3339(),
                entry.confidence,
            ],
        );
    }

    pub fn invalidate(&self, fingerprint: &str) {
        if let Ok(conn) = self.conn.lock() {
            let _ = conn.execute("DELETE FROM cache_entries WHERE fingerprint = ?1", params![fingerprint]);
        }
    }

    pub fn invalidate_glob(&self, pattern: &glob::Pattern) {
        let Ok(conn) = self.conn.lock() else { return };
        let Ok(mut stmt) = conn.prepare("SELECT fingerprint FROM cache_entries") else { return };
        let matching: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map(|rows| rows.filter_map(Result::ok).filter(|fp| pattern.matches(fp)).collect())
            .unwrap_or_default();
        drop(stmt);
        for fp in matching {
            let _ = conn.execute("DELETE FROM cache_entries WHERE fingerprint = ?1", params![fp]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kenny_core::plan::CacheTier as Tier;

    fn entry(fp: &str) -> CacheEntry {
        CacheEntry {
            fingerprint: fp.to_string(),
            value: serde_json::json!({"hits": 3}),
            stored_at: Utc::now(),
            tier: Tier::L3,
            ttl_ms: 3_600_000,
            access_count: 0,
            last_access_at: Utc::now(),
            confidence: 1.0,
        }
    }

    #[test]
    fn put_then_get_round_trips_in_memory() {
        let l3 = L3Cache::open(":memory:", 3_600_000).unwrap();
        l3.put(entry("fp-a"));
        let got = l3.get("fp-a").expect("hit");
        assert_eq!(got.value, serde_json::json!({"hits": 3}));
        assert_eq!(got.access_count, 1);
    }

    #[test]
    fn invalidate_removes_entry() {
        let l3 = L3Cache::open(":memory:", 3_600_000).unwrap();
        l3.put(entry("fp-b"));
        l3.invalidate("fp-b");
        assert!(l3.get("fp-b").is_none());
    }
}
