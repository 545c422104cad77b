//! L1: in-process, size-bounded, LFU/LRU hybrid tier.

use chrono::Utc;
use dashmap::DashMap;
use kenny_core::cache::CacheEntry;
use std::sync::atomic::{AtomicU64, Ordering};

struct L1Slot {
    entry: CacheEntry,
    /// Monotonic counter snapshot at last access, used for the LRU half of the score.
    last_access_tick: u64,
}

/// Lock-striped (via `DashMap`'s internal sharding) in-process cache. Eviction picks
/// the lowest-scored entry under `lfu_weight * frequency_norm + (1 - lfu_weight) *
/// recency_norm`, per its "0.3 frequency weight" default.
pub struct L1Cache {
    capacity: usize,
    ttl_ms: u64,
    lfu_weight: f64,
    slots: DashMap<String, L1Slot>,
    tick: AtomicU64,
}

impl L1Cache {
    pub fn new(capacity: usize, ttl_ms: u64, lfu_weight: f64) -> Self {
        Self { capacity, ttl_ms, lfu_weight, slots: DashMap::new(), tick: AtomicU64::new(0) }
    }

    fn next_tick(&self) -> u64 {
        self.tick.fetch_add(1, Ordering::Relaxed)
    }

    pub fn get(&self, fingerprint: &str) -> Option<CacheEntry> {
        let now = Utc::now();
        let mut remove = false;
        let result = self.slots.get_mut(fingerprint).and_then(|mut slot| {
            if slot.entry.is_expired(now) {
                remove = true;
                None
            } else {
                slot.entry.access_count += 1;
                slot.entry.last_access_at = now;
                slot.last_access_tick = self.next_tick();
                Some(slot.entry.clone())
            }
        });
        if remove {
            self.slots.remove(fingerprint);
        }
        result
    }

    /// Inserts or refreshes an entry, never extending its TTL beyond `ttl_ms`.
    pub fn put(&self, mut entry: CacheEntry) {
        entry.ttl_ms = entry.ttl_ms.min(self.ttl_ms);
        let tick = self.next_tick();
        self.slots.insert(entry.fingerprint.clone(), L1Slot { entry, last_access_tick: tick });
        self.evict_if_over_capacity();
    }

    pub fn invalidate(&self, fingerprint: &str) {
        self.slots.remove(fingerprint);
    }

    pub fn invalidate_glob(&self, pattern: &glob::Pattern) {
        self.slots.retain(|k, _| !pattern.matches(k));
    }

    fn evict_if_over_capacity(&self) {
        if self.slots.len() <= self.capacity {
            return;
        }
        let max_freq = self.slots.iter().map(|s| s.entry.access_count).max().unwrap_or(1).max(1) as f64;
        let max_tick = self.tick.load(Ordering::Relaxed).max(1) as f64;
        let mut worst_key: Option<String> = None;
        let mut worst_score = f64::MAX;
        for entry in self.slots.iter() {
            let freq_norm = entry.entry.access_count as f64 / max_freq;
            let recency_norm = entry.last_access_tick as f64 / max_tick;
            let score = self.lfu_weight * freq_norm + (1.0 - self.lfu_weight) * recency_norm;
            if score < worst_score {
                worst_score = score;
                worst_key = Some(entry.key().clone());
            }
        }
        if let Some(k) = worst_key {
            self.slots.remove(&k);
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kenny_core::plan::CacheTier;

    fn entry(fp: &str) -> CacheEntry {
        CacheEntry {
            fingerprint: fp.to_string(),
            value: serde_json::json!({"ok": true}),
            stored_at: Utc::now(),
            tier: CacheTier::L1,
            ttl_ms: 30_000,
            access_count: 0,
            last_access_at: Utc::now(),
            confidence: 1.0,
        }
    }

    #[test]
    fn put_then_get_round_trips() {
        let cache = L1Cache::new(10, 30_000, 0.3);
        cache.put(entry("fp1"));
        let got = cache.get("fp1").expect("hit");
        assert_eq!(got.fingerprint, "fp1");
        assert_eq!(got.access_count, 1);
    }

    #[test]
    fn evicts_when_over_capacity() {
        let cache = L1Cache::new(2, 30_000, 0.3);
        cache.put(entry("a"));
        cache.put(entry("b"));
        cache.put(entry("c"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn invalidate_glob_removes_matching_keys() {
        let cache = L1Cache::new(10, 30_000, 0.3);
        cache.put(entry("mail:inbox:1"));
        cache.put(entry("mail:inbox:2"));
        cache.put(entry("calendar:today"));
        let pattern = glob::Pattern::new("mail:inbox:*").unwrap();
        cache.invalidate_glob(&pattern);
        assert!(cache.get("mail:inbox:1").is_none());
        assert!(cache.get("calendar:today").is_some());
    }
}
