//! `AgentConfig`: the environment/config knobs for the Agent Service Base,
//! loaded via TOML file + `KENNY_AGENT__`-prefixed environment overrides.

use kenny_core::config::builder;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct L1Config {
    #[serde(default = "default_l1_capacity")]
    pub capacity: usize,
    #[serde(default = "default_l1_ttl_ms")]
    pub ttl_ms: u64,
    /// Frequency-weight in the LFU/LRU hybrid.
    #[serde(default = "default_lfu_weight")]
    pub lfu_weight: f64,
}

fn default_l1_capacity() -> usize {
    2048
}
fn default_l1_ttl_ms() -> u64 {
    30_000
}
fn default_lfu_weight() -> f64 {
    0.3
}

impl Default for L1Config {
    fn default() -> Self {
        Self { capacity: default_l1_capacity(), ttl_ms: default_l1_ttl_ms(), lfu_weight: default_lfu_weight() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct L2Config {
    #[serde(default = "default_l2_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_l2_pool_size")]
    pub pool_size: u32,
    #[serde(default = "default_l2_ttl_ms")]
    pub ttl_ms: u64,
}

fn default_l2_endpoint() -> String {
    "redis://127.0.0.1:6379".to_string()
}
fn default_l2_pool_size() -> u32 {
    8
}
fn default_l2_ttl_ms() -> u64 {
    5 * 60_000
}

impl Default for L2Config {
    fn default() -> Self {
        Self { endpoint: default_l2_endpoint(), pool_size: default_l2_pool_size(), ttl_ms: default_l2_ttl_ms() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct L3Config {
    #[serde(default = "default_l3_path")]
    pub path: String,
    #[serde(default = "default_l3_ttl_ms")]
    pub ttl_ms: u64,
}

fn default_l3_path() -> String {
    "./data/cache_l3.sqlite3".to_string()
}
fn default_l3_ttl_ms() -> u64 {
    60 * 60_000
}

impl Default for L3Config {
    fn default() -> Self {
        Self { path: default_l3_path(), ttl_ms: default_l3_ttl_ms() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_llm_model() -> String {
    "meta-llama/llama-3.3-70b-instruct".to_string()
}
fn default_llm_timeout_ms() -> u64 {
    20_000
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self { model: default_llm_model(), timeout_ms: default_llm_timeout_ms() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub agent_id: String,
    #[serde(default)]
    pub registry_base_url: String,
    #[serde(default)]
    pub cache_l1: L1Config,
    #[serde(default)]
    pub cache_l2: L2Config,
    #[serde(default)]
    pub cache_l3: L3Config,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    #[serde(default = "default_warm_interval_s")]
    pub warm_interval_s: u64,
}

fn default_min_confidence() -> f64 {
    0.7
}
fn default_warm_interval_s() -> u64 {
    3600
}

impl AgentConfig {
    /// Loads from `config/agent.toml` (or `KENNY_AGENT_CONFIG`), overridden by
    /// `KENNY_AGENT__*` environment variables, with `agent_id`/`registry_base_url`
    /// filled in by the concrete binary before calling `load`.
    pub fn load(agent_id: &str, registry_base_url: &str) -> Result<Self, config::ConfigError> {
        let built = builder("KENNY_AGENT_CONFIG", "config/agent.toml", "KENNY_AGENT")
            .set_default("agent_id", agent_id)?
            .set_default("registry_base_url", registry_base_url)?
            .set_default("min_confidence", default_min_confidence())?
            .set_default("warm_interval_s", default_warm_interval_s() as i64)?
            .build()?;
        built.try_deserialize()
    }
}
