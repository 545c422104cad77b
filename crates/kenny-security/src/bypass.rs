//! Admin-issued bypass tokens allow specific exemptions to an egress block.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use uuid::Uuid;

const MAX_TTL_MINUTES: i64 = 60;

#[derive(Debug, Clone)]
pub struct BypassToken {
    pub token: Uuid,
    pub service_id: String,
    pub destination: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct BypassStore {
    by_key: DashMap<(String, String), BypassToken>,
}

impl BypassStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(&self, service_id: &str, destination: &str, ttl_minutes: i64) -> BypassToken {
        let ttl = ttl_minutes.clamp(1, MAX_TTL_MINUTES);
        let issued_at = Utc::now();
        let token = BypassToken {
            token: Uuid::new_v4(),
            service_id: service_id.to_string(),
            destination: destination.to_string(),
            issued_at,
            expires_at: issued_at + Duration::minutes(ttl),
        };
        self.by_key
            .insert((service_id.to_string(), destination.to_string()), token.clone());
        token
    }

    pub fn revoke(&self, service_id: &str, destination: &str) {
        self.by_key.remove(&(service_id.to_string(), destination.to_string()));
    }

    pub fn is_valid(&self, service_id: &str, destination: &str) -> bool {
        match self.by_key.get(&(service_id.to_string(), destination.to_string())) {
            Some(entry) => entry.expires_at > Utc::now(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_is_valid_for_its_service_and_destination() {
        let store = BypassStore::new();
        store.issue("mail-agent", "api.external.example.com", 30);
        assert!(store.is_valid("mail-agent", "api.external.example.com"));
        assert!(!store.is_valid("mail-agent", "other.example.com"));
    }

    #[test]
    fn ttl_is_clamped_to_sixty_minutes() {
        let store = BypassStore::new();
        let token = store.issue("mail-agent", "api.external.example.com", 999);
        assert!(token.expires_at - token.issued_at <= Duration::minutes(MAX_TTL_MINUTES));
    }

    #[test]
    fn revoked_token_is_no_longer_valid() {
        let store = BypassStore::new();
        store.issue("mail-agent", "api.external.example.com", 10);
        store.revoke("mail-agent", "api.external.example.com");
        assert!(!store.is_valid("mail-agent", "api.external.example.com"));
    }
}
