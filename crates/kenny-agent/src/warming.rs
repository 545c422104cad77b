//! Background cache warming: a single
//! long-lived task re-executes a set of warming patterns on an interval, bypassing
//! the cache so every tier gets a fresh value. Tick-loop grounded on the teacher's
//! `pagi-daemon/src/main.rs` (`tokio::select!` over `interval.tick` / `ctrl_c`).

use crate::cache::TieredCache;
use chrono::{Datelike, Timelike, Utc};
use dashmap::DashMap;
use kenny_core::cache::fingerprint;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A single thing worth keeping warm: a capability call plus how often it has
/// actually been observed (for the learned top-K set).
#[derive(Debug, Clone)]
pub struct WarmingPattern {
    pub verb: String,
    pub params: serde_json::Value,
    pub schema: Option<serde_json::Value>,
    /// `true` for patterns whose text contains a relative time reference
    /// ("today", "now"); these are re-warmed on every wall-clock hour/day
    /// transition in addition to the regular interval.
    pub time_sensitive: bool,
}

/// Tracks observed `(verb, params)` calls so the warmer can promote the top-K
/// most frequent into its pattern set, alongside the statically configured ones.
pub struct PatternLearner {
    max_learned: usize,
    counts: DashMap<String, (WarmingPattern, u64)>,
}

impl PatternLearner {
    pub fn new(max_learned: usize) -> Self {
        Self { max_learned, counts: DashMap::new() }
    }

    pub fn observe(&self, pattern: WarmingPattern) {
        let key = format!("{}\0{}", pattern.verb, pattern.params);
        self.counts
            .entry(key)
            .and_modify(|(_, n)| *n += 1)
            .or_insert_with(|| (pattern, 1));
    }

    /// Top-K patterns by observed frequency over the learner's lifetime.
    pub fn top_k(&self) -> Vec<WarmingPattern> {
        let mut all: Vec<(WarmingPattern, u64)> = self.counts.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| b.1.cmp(&a.1));
        all.truncate(self.max_learned);
        all.into_iter().map(|(p, _)| p).collect()
    }

    pub fn reset(&self) {
        self.counts.clear();
    }
}

/// Something that can re-execute a warming pattern's capability call, bypassing
/// the cache read but still writing through on success. Implemented by
/// [`crate::base::AgentServiceBase`]; kept as a trait here so the warmer loop can
/// be unit-tested against a stub.
#[async_trait::async_trait]
pub trait WarmTarget: Send + Sync {
    async fn warm_one(&self, verb: &str, params: serde_json::Value) -> bool;
}

pub struct CacheWarmer<T: WarmTarget> {
    agent_id: String,
    target: Arc<T>,
    cache: Arc<TieredCache>,
    static_patterns: Vec<WarmingPattern>,
    learner: Arc<PatternLearner>,
    last_hour_bucket: AtomicU64,
    last_day_bucket: AtomicU64,
}

impl<T: WarmTarget> CacheWarmer<T> {
    pub fn new(
        agent_id: impl Into<String>,
        target: Arc<T>,
        cache: Arc<TieredCache>,
        static_patterns: Vec<WarmingPattern>,
        learner: Arc<PatternLearner>,
    ) -> Self {
        let now = Utc::now();
        Self {
            agent_id: agent_id.into(),
            target,
            cache,
            static_patterns,
            learner,
            last_hour_bucket: AtomicU64::new(now.hour() as u64),
            last_day_bucket: AtomicU64::new(now.ordinal() as u64),
        }
    }

    /// One warming pass: static patterns plus the current learned top-K. Every
    /// pattern's handler call runs regardless of individual failures ("warming
    /// failures are logged, never surfaced to users").
    pub async fn warm_once(&self) {
        let mut patterns = self.static_patterns.clone();
        patterns.extend(self.learner.top_k());
        for pattern in patterns {
            let fp = fingerprint(&self.agent_id, &pattern.verb, &pattern.params, pattern.schema.as_ref());
            self.cache.invalidate(&fp).await;
            if !self.target.warm_one(&pattern.verb, pattern.params.clone()).await {
                tracing::debug!(verb = %pattern.verb, "cache warmer: pattern failed, skipping");
            }
        }
    }

    fn time_sensitive_patterns(&self) -> Vec<WarmingPattern> {
        self.static_patterns.iter().filter(|p| p.time_sensitive).cloned().collect()
    }

    /// Checks whether the wall clock has crossed into a new hour or day since the
    /// last check, and if so re-warms the time-sensitive subset immediately.
    async fn maybe_warm_time_sensitive(&self) {
        let now = Utc::now();
        let hour = now.hour() as u64;
        let day = now.ordinal() as u64;
        let crossed_hour = self.last_hour_bucket.swap(hour, Ordering::Relaxed) != hour;
        let crossed_day = self.last_day_bucket.swap(day, Ordering::Relaxed) != day;
        if !crossed_hour && !crossed_day {
            return;
        }
        for pattern in self.time_sensitive_patterns() {
            let fp = fingerprint(&self.agent_id, &pattern.verb, &pattern.params, pattern.schema.as_ref());
            self.cache.invalidate(&fp).await;
            let _ = self.target.warm_one(&pattern.verb, pattern.params.clone()).await;
        }
    }

    /// Runs until `ctrl_c` or the caller drops the returned handle's owning task.
    pub async fn run(self: Arc<Self>, interval_s: u64) {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_s.max(1)));
        // A transition check at a shorter cadence catches the top of the hour even
        // when the main interval is much longer than an hour.
        let mut transition_check = tokio::time::interval(Duration::from_secs(60));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.warm_once().await;
                }
                _ = transition_check.tick() => {
                    self.maybe_warm_time_sensitive().await;
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!(agent_id = %self.agent_id, "cache warmer: shutting down");
                    break;
                }
            }
        }
    }
}
