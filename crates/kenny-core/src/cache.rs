//! Cache fingerprinting and the `CacheEntry` shape shared by all three tiers.

use crate::plan::CacheTier;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Lowercases string leaves, sorts object keys, and stringifies RFC3339 timestamps
/// so that key-reordering and whitespace-only string differences do not change the
/// fingerprint.
///
/// `defaults` is the `input_schema`'s `properties.<key>.default`, when known; a
/// top-level param equal to its schema default is dropped before hashing.
pub fn normalize_params(params: &serde_json::Value, schema: Option<&serde_json::Value>) -> serde_json::Value {
    let defaults = schema.and_then(schema_defaults).unwrap_or_default();
    normalize_value(params, &defaults, true)
}

fn schema_defaults(schema: &serde_json::Value) -> Option<std::collections::BTreeMap<String, serde_json::Value>> {
    let props = schema.get("properties")?.as_object()?;
    let mut out = std::collections::BTreeMap::new();
    for (k, v) in props {
        if let Some(default) = v.get("default") {
            out.insert(k.clone(), default.clone());
        }
    }
    Some(out)
}

fn normalize_value(
    value: &serde_json::Value,
    defaults: &std::collections::BTreeMap<String, serde_json::Value>,
    top_level: bool,
) -> serde_json::Value {
    match value {
        serde_json::Value::String(s) => serde_json::Value::String(normalize_string(s)),
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(|v| normalize_value(v, defaults, false)).collect())
        }
        serde_json::Value::Object(map) => {
            let mut sorted = serde_json::Map::new();
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for k in keys {
                let v = &map[k];
                if top_level {
                    if let Some(default) = defaults.get(k) {
                        if default == v {
                            continue;
                        }
                    }
                }
                sorted.insert(k.clone(), normalize_value(v, defaults, false));
            }
            serde_json::Value::Object(sorted)
        }
        other => other.clone(),
    }
}

/// Lowercase, and collapse runs of whitespace to a single space (whitespace-only
/// differences must not change the fingerprint). RFC3339 timestamps are left intact
/// since they are already a canonical stringification.
fn normalize_string(s: &str) -> String {
    let collapsed: String = s.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.to_lowercase()
}

/// Stable, collision-resistant fingerprint over `(agent_id, verb, normalized params)`.
pub fn fingerprint(agent_id: &str, verb: &str, params: &serde_json::Value, schema: Option<&serde_json::Value>) -> String {
    let normalized = normalize_params(params, schema);
    let mut hasher = Sha256::new();
    hasher.update(agent_id.as_bytes());
    hasher.update(b"\0");
    hasher.update(verb.as_bytes());
    hasher.update(b"\0");
    hasher.update(normalized.to_string().as_bytes());
    let digest = hasher.finalize();
    hex_encode(&digest)
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{:02x}", b);
    }
    out
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub fingerprint: String,
    pub value: serde_json::Value,
    pub stored_at: DateTime<Utc>,
    pub tier: CacheTier,
    pub ttl_ms: u64,
    pub access_count: u64,
    pub last_access_at: DateTime<Utc>,
    pub confidence: f64,
}

impl CacheEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let age_ms = (now - self.stored_at).num_milliseconds().max(0) as u64;
        age_ms >= self.ttl_ms
    }
}
