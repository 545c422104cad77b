//! `GatewayConfig`: environment/config knobs for the Gateway, loaded the way `kenny-registry`'s `RegistryConfig` is.

use kenny_core::config::builder;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_registry_base_url")]
    pub registry_base_url: String,
    #[serde(default = "default_coordinator_base_url")]
    pub coordinator_base_url: String,
    #[serde(default = "default_inflight_max")]
    pub inflight_max: usize,
    #[serde(default = "default_classification_cache_ttl_s")]
    pub classification_cache_ttl_s: u64,
    #[serde(default = "default_agent_snapshot_ttl_s")]
    pub agent_snapshot_ttl_s: u64,
    #[serde(default = "default_rule_threshold")]
    pub rule_threshold: f64,
}

fn default_bind_addr() -> String {
    "127.0.0.1:8080".to_string()
}
fn default_registry_base_url() -> String {
    "http://127.0.0.1:8081".to_string()
}
fn default_coordinator_base_url() -> String {
    "http://127.0.0.1:8082".to_string()
}
fn default_inflight_max() -> usize {
    256
}
fn default_classification_cache_ttl_s() -> u64 {
    60
}
fn default_agent_snapshot_ttl_s() -> u64 {
    300
}
fn default_rule_threshold() -> f64 {
    0.8
}

impl GatewayConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        let built = builder("KENNY_GATEWAY_CONFIG", "config/gateway.toml", "KENNY_GATEWAY").build()?;
        built.try_deserialize()
    }
}
