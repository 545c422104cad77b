//! `RegistryConfig`: environment/config knobs for the Agent Registry,
//! loaded the way `kenny-agent`'s `AgentConfig` is.

use crate::egress::AllowlistEntry;
use kenny_core::config::builder;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllowlistEntryConfig {
    pub domain: String,
    #[serde(default)]
    pub port: Option<u16>,
    /// CIDR prefix length for a plain-IP `domain` entry, e.g. `cidr = 24` to
    /// allow the whole `domain`'s /24.
    #[serde(default)]
    pub cidr: Option<u8>,
}

impl From<AllowlistEntryConfig> for AllowlistEntry {
    fn from(c: AllowlistEntryConfig) -> Self {
        Self { domain: c.domain, port: c.port, cidr_bits: c.cidr }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_store_path")]
    pub store_path: String,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default)]
    pub egress_allowlist: Vec<AllowlistEntryConfig>,
    #[serde(default = "default_snapshot_interval_s")]
    pub snapshot_interval_s: u64,
}

fn default_store_path() -> String {
    "./data/registry.sled".to_string()
}
fn default_bind_addr() -> String {
    "127.0.0.1:8081".to_string()
}
fn default_snapshot_interval_s() -> u64 {
    300
}

impl RegistryConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        let built = builder("KENNY_REGISTRY_CONFIG", "config/registry.toml", "KENNY_REGISTRY").build()?;
        built.try_deserialize()
    }
}
