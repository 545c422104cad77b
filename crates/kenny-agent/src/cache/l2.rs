//! L2: shared key-value store with a connection pool. Backed by
//! Redis via `redis::aio::ConnectionManager`, which multiplexes one connection
//! across concurrent callers (the "pool" of the table).

use chrono::Utc;
use kenny_core::cache::CacheEntry;
use redis::AsyncCommands;
use tokio::sync::Mutex;

pub struct L2Cache {
    ttl_ms: u64,
    conn: Option<Mutex<redis::aio::ConnectionManager>>,
}

impl L2Cache {
    /// Connects to `endpoint`; on failure, L2 degrades to always-miss rather than
    /// taking the agent down.
    pub async fn connect(endpoint: &str, ttl_ms: u64) -> Self {
        match redis::Client::open(endpoint) {
            Ok(client) => match client.get_connection_manager().await {
                Ok(mgr) => Self { ttl_ms, conn: Some(Mutex::new(mgr)) },
                Err(e) => {
                    tracing::warn!(error = %e, endpoint, "L2 cache: redis connection failed, disabling tier");
                    Self { ttl_ms, conn: None }
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, endpoint, "L2 cache: invalid redis endpoint, disabling tier");
                Self { ttl_ms, conn: None }
            }
        }
    }

    pub fn disabled(ttl_ms: u64) -> Self {
        Self { ttl_ms, conn: None }
    }

    pub async fn get(&self, fingerprint: &str) -> Option<CacheEntry> {
        let conn = self.conn.as_ref()?;
        let mut guard = conn.lock().await;
        let raw: Option<String> = guard.get(l2_key(fingerprint)).await.ok().flatten();
        let mut entry: CacheEntry = raw.and_then(|s| serde_json::from_str(&s).ok())?;
        if entry.is_expired(Utc::now()) {
            drop(guard);
            self.invalidate(fingerprint).await;
            return None;
        }
        entry.access_count += 1;
        entry.last_access_at = Utc::now();
        Some(entry)
    }

    pub async fn put(&self, mut entry: CacheEntry) {
        let Some(conn) = self.conn.as_ref() else { return };
        entry.ttl_ms = entry.ttl_ms.min(self.ttl_ms);
        let Ok(raw) = serde_json::to_string(&entry) else { return };
        let ttl_s = (entry.ttl_ms / 1000).max(1);
        let mut guard = conn.lock().await;
        let _: Result<(), _> = guard.set_ex(l2_key(&entry.fingerprint), raw, ttl_s).await;
    }

    pub async fn invalidate(&self, fingerprint: &str) {
        let Some(conn) = self.conn.as_ref() else { return };
        let mut guard = conn.lock().await;
        let _: Result<(), _> = guard.del(l2_key(fingerprint)).await;
    }

    /// Glob invalidation requires a key scan; Redis `SCAN` with `MATCH` is used
    /// instead of `KEYS` to avoid blocking the server.
    pub async fn invalidate_glob(&self, pattern: &str) {
        let Some(conn) = self.conn.as_ref() else { return };
        let mut guard = conn.lock().await;
        let scan_pattern = l2_key(pattern);
        let keys: Vec<String> = match guard.scan_match(scan_pattern).await {
            Ok(iter) => {
                use futures_util::StreamExt;
                iter.collect().await
            }
            Err(_) => return,
        };
        if !keys.is_empty() {
            let _: Result<(), _> = guard.del(keys).await;
        }
    }
}

fn l2_key(fingerprint: &str) -> String {
    format!("kenny:cache:l2:{fingerprint}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_to_unreachable_endpoint_degrades_to_disabled() {
        let cache = L2Cache::connect("redis://127.0.0.1:1", 30_000).await;
        assert!(cache.conn.is_none());
    }

    #[tokio::test]
    async fn disabled_cache_misses_every_get() {
        let cache = L2Cache::disabled(30_000);
        assert!(cache.get("fp-1").await.is_none());
    }

    #[tokio::test]
    async fn disabled_cache_put_and_invalidate_are_no_ops() {
        let cache = L2Cache::disabled(30_000);
        let entry = CacheEntry {
            fingerprint: "fp-1".to_string(),
            value: serde_json::json!({"v": 1}),
            stored_at: Utc::now(),
            tier: kenny_core::plan::CacheTier::L2,
            ttl_ms: 30_000,
            access_count: 0,
            last_access_at: Utc::now(),
            confidence: 0.9,
        };
        cache.put(entry).await;
        cache.invalidate("fp-1").await;
        cache.invalidate_glob("*").await;
        assert!(cache.get("fp-1").await.is_none());
    }

    #[test]
    fn l2_key_namespaces_the_fingerprint() {
        assert_eq!(l2_key("fp-1"), "kenny:cache:l2:fp-1");
    }
}
