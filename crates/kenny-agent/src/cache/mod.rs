//! Tiered semantic cache: L1 in-process, L2 shared Redis, L3 local
//! persistent SQLite. Read order is L1 -> L2 -> L3 -> handler; a hit at a slower
//! tier promotes into every faster tier it skipped, capped at that tier's own TTL.
//! Invalidation (exact key, glob, or time-bucket) removes from all three tiers
//! before returning, so a caller never observes a stale entry from one tier after
//! invalidating another.

mod l1;
mod l2;
mod l3;

use crate::config::{L1Config, L2Config, L3Config};
use chrono::Utc;
use kenny_core::cache::CacheEntry;
use kenny_core::error::KennyError;
use kenny_core::plan::CacheTier;
use l1::L1Cache;
use l2::L2Cache;
use l3::L3Cache;
use std::sync::atomic::{AtomicU64, Ordering};

pub struct TieredCache {
    l1: L1Cache,
    l2: L2Cache,
    l3: L3Cache,
    /// Bumped by every invalidation call. `get()` snapshots this before reading a
    /// slower tier and rechecks it before writing the promoted copy upward; a
    /// mismatch means an invalidation raced the promotion, so the promotion is
    /// dropped rather than risk resurrecting state a concurrent invalidator just
    /// removed (spec's `cache_stale_invalidated` row: discard, let the caller miss
    /// and re-execute).
    invalidation_epoch: AtomicU64,
}

/// Where a lookup was satisfied, used by the caller to decide whether to run the
/// handler and whether the served value counts as a cache hit for telemetry.
pub enum Lookup {
    Hit { entry: CacheEntry, tier: CacheTier },
    Miss,
}

impl TieredCache {
    pub async fn connect(l1_cfg: &L1Config, l2_cfg: &L2Config, l3_cfg: &L3Config) -> Self {
        let l1 = L1Cache::new(l1_cfg.capacity, l1_cfg.ttl_ms, l1_cfg.lfu_weight);
        let l2 = L2Cache::connect(&l2_cfg.endpoint, l2_cfg.ttl_ms).await;
        let l3 = match L3Cache::open(&l3_cfg.path, l3_cfg.ttl_ms) {
            Ok(l3) => l3,
            Err(e) => {
                tracing::error!(error = %e, path = %l3_cfg.path, "L3 cache: failed to open sqlite store, falling back to in-memory");
                L3Cache::open(":memory:", l3_cfg.ttl_ms).expect("in-memory sqlite always opens")
            }
        };
        Self { l1, l2, l3, invalidation_epoch: AtomicU64::new(0) }
    }

    /// Reads L1, then L2, then L3, promoting into every faster tier on a hit at a
    /// slower one. Promotion rewrites `stored_at = now` on the promoted copy (each
    /// tier's `put` still clamps the TTL to that tier's own maximum, so it can
    /// only shorten an entry's remaining life, never lengthen it) and aborts if an
    /// invalidation raced the read.
    pub async fn get(&self, fingerprint: &str) -> Lookup {
        if let Some(entry) = self.l1.get(fingerprint) {
            return Lookup::Hit { entry, tier: CacheTier::L1 };
        }

        let epoch_before_read = self.invalidation_epoch.load(Ordering::SeqCst);

        if let Some(mut entry) = self.l2.get(fingerprint).await {
            if self.invalidation_raced(epoch_before_read, fingerprint) {
                return Lookup::Miss;
            }
            entry.stored_at = Utc::now();
            self.l1.put(entry.clone());
            return Lookup::Hit { entry, tier: CacheTier::L2 };
        }
        if let Some(mut entry) = self.l3.get(fingerprint) {
            if self.invalidation_raced(epoch_before_read, fingerprint) {
                return Lookup::Miss;
            }
            entry.stored_at = Utc::now();
            self.l1.put(entry.clone());
            self.l2.put(entry.clone()).await;
            return Lookup::Hit { entry, tier: CacheTier::L3 };
        }
        Lookup::Miss
    }

    fn invalidation_raced(&self, epoch_before_read: u64, fingerprint: &str) -> bool {
        if self.invalidation_epoch.load(Ordering::SeqCst) == epoch_before_read {
            return false;
        }
        let err = KennyError::CacheStaleInvalidated;
        tracing::debug!(fingerprint, error_kind = err.kind(), "cache: promotion aborted, racing invalidation won");
        true
    }

    /// Write-through on a fresh handler result: the entry lands in all three tiers
    /// at once.
    pub async fn put(&self, fingerprint: &str, value: serde_json::Value, ttl_ms: u64, confidence: f64) {
        let entry = CacheEntry {
            fingerprint: fingerprint.to_string(),
            value,
            stored_at: Utc::now(),
            tier: CacheTier::L1,
            ttl_ms,
            access_count: 0,
            last_access_at: Utc::now(),
            confidence,
        };
        self.l1.put(entry.clone());
        self.l2.put(entry.clone()).await;
        self.l3.put(entry);
    }

    pub async fn invalidate(&self, fingerprint: &str) {
        self.invalidation_epoch.fetch_add(1, Ordering::SeqCst);
        self.l1.invalidate(fingerprint);
        self.l2.invalidate(fingerprint).await;
        self.l3.invalidate(fingerprint);
    }

    pub async fn invalidate_glob(&self, pattern: &str) {
        self.invalidation_epoch.fetch_add(1, Ordering::SeqCst);
        match glob::Pattern::new(pattern) {
            Ok(compiled) => {
                self.l1.invalidate_glob(&compiled);
                self.l3.invalidate_glob(&compiled);
            }
            Err(e) => tracing::warn!(error = %e, pattern, "cache: invalid glob pattern, skipping L1/L3 invalidation"),
        }
        self.l2.invalidate_glob(pattern).await;
    }

    pub fn l1_len(&self) -> usize {
        self.l1.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_promotes_to_l1_and_get_hits_there() {
        let cache = TieredCache::connect(
            &L1Config::default(),
            &L2Config { endpoint: "redis://127.0.0.1:1".to_string(), ..L2Config::default() },
            &L3Config { path: ":memory:".to_string(), ..L3Config::default() },
        )
        .await;
        cache.put("fp-x", serde_json::json!({"v": 1}), 30_000, 0.9).await;
        match cache.get("fp-x").await {
            Lookup::Hit { tier, .. } => assert!(matches!(tier, CacheTier::L1)),
            Lookup::Miss => panic!("expected hit"),
        }
    }

    #[tokio::test]
    async fn promotion_from_l3_rewrites_stored_at_to_now() {
        let cache = TieredCache::connect(
            &L1Config::default(),
            &L2Config { endpoint: "redis://127.0.0.1:1".to_string(), ..L2Config::default() },
            &L3Config { path: ":memory:".to_string(), ..L3Config::default() },
        )
        .await;
        // A long-lived L3 entry stored well in the past; L1's get already dropped
        // it, so the next get() must promote from L3 and rewrite stored_at rather
        // than carry the original, already-aged timestamp forward.
        let stale_stored_at = Utc::now() - chrono::Duration::minutes(45);
        cache.l3.put(CacheEntry {
            fingerprint: "fp-stale".to_string(),
            value: serde_json::json!({"v": 1}),
            stored_at: stale_stored_at,
            tier: CacheTier::L3,
            ttl_ms: 3_600_000,
            access_count: 0,
            last_access_at: stale_stored_at,
            confidence: 0.9,
        });

        match cache.get("fp-stale").await {
            Lookup::Hit { entry, tier } => {
                assert!(matches!(tier, CacheTier::L3));
                assert!(Utc::now().signed_duration_since(entry.stored_at).num_seconds() < 5, "promoted entry must carry a fresh stored_at");
            }
            Lookup::Miss => panic!("expected hit"),
        }

        // The promoted copy now lives in L1 with the same fresh stored_at.
        match cache.get("fp-stale").await {
            Lookup::Hit { tier, .. } => assert!(matches!(tier, CacheTier::L1)),
            Lookup::Miss => panic!("expected L1 hit after promotion"),
        }
    }

    #[tokio::test]
    async fn invalidate_clears_entry() {
        let cache = TieredCache::connect(
            &L1Config::default(),
            &L2Config { endpoint: "redis://127.0.0.1:1".to_string(), ..L2Config::default() },
            &L3Config { path: ":memory:".to_string(), ..L3Config::default() },
        )
        .await;
        cache.put("fp-y", serde_json::json!({"v": 1}), 30_000, 0.9).await;
        cache.invalidate("fp-y").await;
        assert!(matches!(cache.get("fp-y").await, Lookup::Miss));
    }
}
