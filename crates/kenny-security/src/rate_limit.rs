//! Per-service token buckets for the `rate_limit` response action.
//! Uses `governor`, the rate-limiting crate the retrieval pack reaches for
//! where the teacher has no equivalent.

use dashmap::DashMap;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

#[derive(Default)]
pub struct RateLimiters {
    by_service: DashMap<String, Arc<DirectLimiter>>,
}

impl RateLimiters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&self, service_id: &str, rate_per_s: u32, burst: u32) {
        let quota = Quota::per_second(NonZeroU32::new(rate_per_s.max(1)).unwrap())
            .allow_burst(NonZeroU32::new(burst.max(1)).unwrap());
        self.by_service.insert(service_id.to_string(), Arc::new(RateLimiter::direct(quota)));
    }

    pub fn remove(&self, service_id: &str) {
        self.by_service.remove(service_id);
    }

    /// `true` if a call for `service_id` is currently permitted. Services with
    /// no installed limiter are unrestricted.
    pub fn check(&self, service_id: &str) -> bool {
        self.by_service.get(service_id).map(|l| l.check().is_ok()).unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uninstalled_service_is_unrestricted() {
        let limiters = RateLimiters::new();
        assert!(limiters.check("mail-agent"));
    }

    #[test]
    fn installed_limiter_eventually_rejects_bursts() {
        let limiters = RateLimiters::new();
        limiters.install("whatsapp-agent", 1, 1);
        assert!(limiters.check("whatsapp-agent"));
        assert!(!limiters.check("whatsapp-agent"));
    }
}
