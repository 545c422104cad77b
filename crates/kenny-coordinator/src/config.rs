//! `CoordinatorConfig`: environment/config knobs for the Coordinator, loaded the
//! way `kenny-registry`'s `RegistryConfig` is.

use kenny_core::config::builder;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_registry_base_url")]
    pub registry_base_url: String,
    #[serde(default = "default_fanout_max")]
    pub fanout_max: usize,
    #[serde(default = "default_plan_size_max")]
    pub plan_size_max: usize,
    #[serde(default = "default_plan_depth_max")]
    pub plan_depth_max: usize,
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    #[serde(default = "default_llm_model")]
    pub llm_model: String,
    #[serde(default = "default_llm_timeout_ms")]
    pub llm_timeout_ms: u64,
    #[serde(default = "default_plans_max")]
    pub plans_max: usize,
}

fn default_bind_addr() -> String {
    "127.0.0.1:8082".to_string()
}
fn default_registry_base_url() -> String {
    "http://127.0.0.1:8081".to_string()
}
fn default_fanout_max() -> usize {
    8
}
fn default_plan_size_max() -> usize {
    16
}
fn default_plan_depth_max() -> usize {
    4
}
fn default_call_timeout_ms() -> u64 {
    30_000
}
fn default_llm_model() -> String {
    "openrouter/auto".to_string()
}
fn default_llm_timeout_ms() -> u64 {
    8_000
}
fn default_plans_max() -> usize {
    64
}

impl CoordinatorConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        let built = builder("KENNY_COORDINATOR_CONFIG", "config/coordinator.toml", "KENNY_COORDINATOR").build()?;
        built.try_deserialize()
    }
}
