//! Per-agent health poller: one independent poller
//! per `RegistryRecord`, firing at `health_check.interval` (default 30s), 5s
//! timeout, no retries -- a miss is itself a datapoint.

use kenny_core::registry_types::{HealthObservation, HealthStatus, PerformanceStats};
use std::time::Duration;

/// Applies one observation to a record's ring/performance stats and returns the
/// possibly-updated status, per the transition rules in:
/// `healthy -> degraded` after 2 consecutive failures or p95-window latency >
/// SLA x2 over the last 10 observations; `degraded -> unhealthy` after 5
/// consecutive failures; `unhealthy -> healthy` after 3 consecutive successes.
pub fn apply_observation(
    current: HealthStatus,
    history: &mut kenny_core::registry_types::HealthRing,
    performance: &mut PerformanceStats,
    obs: HealthObservation,
    sla_target_ms: u64,
) -> HealthStatus {
    if obs.success {
        performance.success_count += 1;
    } else {
        performance.failure_count += 1;
    }
    if let Some(latency) = obs.latency_ms {
        if latency > sla_target_ms {
            performance.sla_violations += 1;
        }
    }
    history.push(obs);

    let last10: Vec<&HealthObservation> = history.last_n(10).collect();
    let breaches_latency_2x = last10.iter().any(|o| o.latency_ms.map(|l| l > sla_target_ms * 2).unwrap_or(false));

    match current {
        HealthStatus::Healthy | HealthStatus::Unknown => {
            if history.consecutive_failures() >= 2 || breaches_latency_2x {
                HealthStatus::Degraded
            } else if current == HealthStatus::Unknown && history.consecutive_successes() >= 1 {
                HealthStatus::Healthy
            } else {
                current
            }
        }
        HealthStatus::Degraded => {
            if history.consecutive_failures() >= 5 {
                HealthStatus::Unhealthy
            } else if history.consecutive_successes() >= 3 {
                HealthStatus::Healthy
            } else {
                HealthStatus::Degraded
            }
        }
        HealthStatus::Unhealthy => {
            if history.consecutive_successes() >= 3 {
                HealthStatus::Healthy
            } else {
                HealthStatus::Unhealthy
            }
        }
    }
}

/// Polls `health_endpoint` once with a 5s timeout, folding the outcome into a
/// `HealthObservation`. A transport error or non-2xx response is a failed
/// observation, never a propagated error.
pub async fn poll_once(client: &reqwest::Client, health_endpoint: &str) -> HealthObservation {
    let started = std::time::Instant::now();
    let result = tokio::time::timeout(Duration::from_secs(5), client.get(health_endpoint).send()).await;
    match result {
        Ok(Ok(resp)) if resp.status().is_success() => {
            HealthObservation { at: chrono::Utc::now(), success: true, latency_ms: Some(started.elapsed().as_millis() as u64) }
        }
        _ => HealthObservation { at: chrono::Utc::now(), success: false, latency_ms: None },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kenny_core::registry_types::HealthRing;

    fn obs(success: bool, latency_ms: Option<u64>) -> HealthObservation {
        HealthObservation { at: chrono::Utc::now(), success, latency_ms }
    }

    #[test]
    fn two_consecutive_failures_degrade_from_healthy() {
        let mut history = HealthRing::new(100);
        let mut perf = PerformanceStats::default();
        let mut status = HealthStatus::Healthy;
        status = apply_observation(status, &mut history, &mut perf, obs(false, None), 200);
        assert_eq!(status, HealthStatus::Healthy);
        status = apply_observation(status, &mut history, &mut perf, obs(false, None), 200);
        assert_eq!(status, HealthStatus::Degraded);
    }

    #[test]
    fn five_consecutive_failures_from_degraded_go_unhealthy() {
        let mut history = HealthRing::new(100);
        let mut perf = PerformanceStats::default();
        let mut status = HealthStatus::Degraded;
        for _ in 0..4 {
            status = apply_observation(status, &mut history, &mut perf, obs(false, None), 200);
        }
        assert_eq!(status, HealthStatus::Degraded);
        status = apply_observation(status, &mut history, &mut perf, obs(false, None), 200);
        assert_eq!(status, HealthStatus::Unhealthy);
    }

    #[test]
    fn three_consecutive_successes_recover_to_healthy() {
        let mut history = HealthRing::new(100);
        let mut perf = PerformanceStats::default();
        let mut status = HealthStatus::Unhealthy;
        status = apply_observation(status, &mut history, &mut perf, obs(true, Some(10)), 200);
        status = apply_observation(status, &mut history, &mut perf, obs(true, Some(10)), 200);
        assert_eq!(status, HealthStatus::Unhealthy);
        status = apply_observation(status, &mut history, &mut perf, obs(true, Some(10)), 200);
        assert_eq!(status, HealthStatus::Healthy);
    }
}
