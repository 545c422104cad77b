//! Egress allowlist and temporary-block store: `EvaluateEgress(service_id, destination, port)` against the
//! global allowlist, with the security plane able to install TTL'd or explicit
//! blocks on top.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
pub use kenny_core::security::EgressDecision;
use std::net::IpAddr;

#[derive(Debug, Clone)]
pub struct AllowlistEntry {
    pub domain: String,
    pub port: Option<u16>,
    /// CIDR prefix length for a plain-IP `domain`, when present.
    pub cidr_bits: Option<u8>,
}

struct Block {
    expires_at: Option<DateTime<Utc>>,
}

/// Global allowlist plus transient blocks, keyed by `(service_id, destination)` or
/// destination-only for a system-wide block.
pub struct EgressRules {
    allowlist: Vec<AllowlistEntry>,
    service_blocks: DashMap<String, Block>,
    destination_blocks: DashMap<String, Block>,
}

impl EgressRules {
    pub fn new(allowlist: Vec<AllowlistEntry>) -> Self {
        Self { allowlist, service_blocks: DashMap::new(), destination_blocks: DashMap::new() }
    }

    /// Validates a manifest's `egress_domains` are each covered by the allowlist.
    pub fn domains_allowed(&self, domains: impl IntoIterator<Item = impl AsRef<str>>) -> bool {
        domains.into_iter().all(|d| self.domain_allowed(d.as_ref()))
    }

    fn domain_allowed(&self, domain: &str) -> bool {
        self.allowlist.iter().any(|e| domain_matches(&e.domain, domain, e.cidr_bits))
    }

    pub fn block_service(&self, service_id: &str, ttl: Option<std::time::Duration>) {
        let expires_at = ttl.map(|d| Utc::now() + chrono::Duration::from_std(d).unwrap_or_default());
        self.service_blocks.insert(service_id.to_string(), Block { expires_at });
    }

    pub fn unblock_service(&self, service_id: &str) {
        self.service_blocks.remove(service_id);
    }

    pub fn block_destination(&self, destination: &str, ttl: Option<std::time::Duration>) {
        let expires_at = ttl.map(|d| Utc::now() + chrono::Duration::from_std(d).unwrap_or_default());
        self.destination_blocks.insert(destination.to_string(), Block { expires_at });
    }

    pub fn unblock_destination(&self, destination: &str) {
        self.destination_blocks.remove(destination);
    }

    fn is_blocked(blocks: &DashMap<String, Block>, key: &str) -> bool {
        match blocks.get(key) {
            Some(block) => match block.expires_at {
                Some(exp) if exp <= Utc::now() => {
                    drop(block);
                    blocks.remove(key);
                    false
                }
                _ => true,
            },
            None => false,
        }
    }

    /// `EvaluateEgress(service_id, destination, port)`.
    pub fn evaluate(&self, service_id: &str, destination: &str, port: Option<u16>) -> EgressDecision {
        if Self::is_blocked(&self.service_blocks, service_id) || Self::is_blocked(&self.destination_blocks, destination) {
            return EgressDecision::DenyWithBypassToken;
        }
        let covered = self.allowlist.iter().any(|e| {
            domain_matches(&e.domain, destination, e.cidr_bits) && e.port.map(|p| Some(p) == port).unwrap_or(true)
        });
        if covered {
            EgressDecision::Allow
        } else {
            EgressDecision::Deny
        }
    }
}

/// Exact match, a `*.` wildcard prefix match, or — for a plain-IP `pattern`
/// with a `cidr_bits` prefix length — real subnet containment of `candidate`.
/// Without a `cidr_bits`, two IP literals must match exactly.
fn domain_matches(pattern: &str, candidate: &str, cidr_bits: Option<u8>) -> bool {
    if pattern == candidate {
        return true;
    }
    if let Some(suffix) = pattern.strip_prefix("*.") {
        return candidate.ends_with(suffix) && candidate.len() > suffix.len();
    }
    if let (Ok(network), Ok(candidate_ip)) = (pattern.parse::<IpAddr>(), candidate.parse::<IpAddr>()) {
        return match cidr_bits {
            Some(bits) => ip_in_subnet(network, candidate_ip, bits),
            None => network == candidate_ip,
        };
    }
    false
}

/// Whether `candidate` falls within the `prefix_bits`-long subnet rooted at
/// `network`. Mixed IPv4/IPv6 pairs never match.
fn ip_in_subnet(network: IpAddr, candidate: IpAddr, prefix_bits: u8) -> bool {
    match (network, candidate) {
        (IpAddr::V4(n), IpAddr::V4(c)) => {
            let bits = prefix_bits.min(32);
            let mask = if bits == 0 { 0u32 } else { u32::MAX << (32 - bits) };
            (u32::from(n) & mask) == (u32::from(c) & mask)
        }
        (IpAddr::V6(n), IpAddr::V6(c)) => {
            let bits = prefix_bits.min(128);
            let mask = if bits == 0 { 0u128 } else { u128::MAX << (128 - bits) };
            (u128::from(n) & mask) == (u128::from(c) & mask)
        }
        _ => false,
    }
}
