//! Thin reqwest-based clients for the Registry and Agent HTTP contracts,
//! shared by the Gateway and Coordinator: one `reqwest::Client`, explicit
//! timeout, JSON in/out.

use crate::error::KennyError;
use crate::plan::ConfidenceResult;
use crate::registry_types::{AgentSummary, CapabilityRef, SystemHealthSnapshot};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;

#[derive(Clone)]
pub struct RegistryClient {
    base_url: String,
    client: reqwest::Client,
}

impl RegistryClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { base_url: base_url.into(), client }
    }

    pub async fn list_agents(&self) -> Result<Vec<AgentSummary>, KennyError> {
        get_json(&self.client, &format!("{}/agents", self.base_url)).await
    }

    pub async fn list_capabilities(&self) -> Result<Vec<CapabilityRef>, KennyError> {
        get_json(&self.client, &format!("{}/capabilities", self.base_url)).await
    }

    pub async fn lookup_capability(&self, verb: &str) -> Result<Vec<CapabilityRef>, KennyError> {
        get_json(&self.client, &format!("{}/capabilities/{}", self.base_url, verb)).await
    }

    pub async fn system_health(&self) -> Result<SystemHealthSnapshot, KennyError> {
        get_json(&self.client, &format!("{}/system/health", self.base_url)).await
    }
}

#[derive(Clone)]
pub struct AgentClient {
    client: reqwest::Client,
}

impl Default for AgentClient {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentClient {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }

    /// `POST {base_url}/capabilities/{verb}` with `{input:...}` and an explicit
    /// per-call deadline.
    pub async fn call_capability(
        &self,
        base_url: &str,
        verb: &str,
        input: serde_json::Value,
        timeout_ms: u64,
    ) -> Result<serde_json::Value, KennyError> {
        let url = format!("{}/capabilities/{}", base_url.trim_end_matches('/'), verb);
        let body = serde_json::json!({ "input": input });
        post_json_with_timeout(&self.client, &url, &body, timeout_ms).await
    }

    /// `POST {base_url}/query` — the intelligent NL path.
    pub async fn query(
        &self,
        base_url: &str,
        query: &str,
        context: Option<serde_json::Value>,
        timeout_ms: u64,
    ) -> Result<ConfidenceResult, KennyError> {
        let url = format!("{}/query", base_url.trim_end_matches('/'));
        let body = serde_json::json!({ "query": query, "context": context });
        post_json_with_timeout(&self.client, &url, &body, timeout_ms).await
    }

    pub async fn health(&self, base_url: &str) -> Result<serde_json::Value, KennyError> {
        let url = format!("{}/health", base_url.trim_end_matches('/'));
        get_json(&self.client, &url).await
    }
}

async fn get_json<T: DeserializeOwned>(client: &reqwest::Client, url: &str) -> Result<T, KennyError> {
    let resp = client
        .get(url)
        .send()
        .await
        .map_err(|e| classify_reqwest_error(&e))?;
    if !resp.status().is_success() {
        return Err(KennyError::Internal(format!("GET {url} -> {}", resp.status())));
    }
    resp.json::<T>().await.map_err(|e| KennyError::Internal(e.to_string()))
}

async fn post_json_with_timeout<T: DeserializeOwned, B: Serialize>(
    client: &reqwest::Client,
    url: &str,
    body: &B,
    timeout_ms: u64,
) -> Result<T, KennyError> {
    let fut = client.post(url).json(body).send();
    let resp = tokio::time::timeout(Duration::from_millis(timeout_ms.max(1)), fut)
        .await
        .map_err(|_| KennyError::Timeout)?
        .map_err(|e| classify_reqwest_error(&e))?;
    if !resp.status().is_success() {
        return Err(KennyError::Internal(format!("POST {url} -> {}", resp.status())));
    }
    resp.json::<T>().await.map_err(|e| KennyError::Internal(e.to_string()))
}

fn classify_reqwest_error(e: &reqwest::Error) -> KennyError {
    if e.is_timeout() {
        KennyError::Timeout
    } else if e.is_connect() {
        KennyError::Internal(format!("connect failed: {e}"))
    } else {
        KennyError::Internal(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registry_client_surfaces_connect_failure_as_internal() {
        let client = RegistryClient::new("http://127.0.0.1:1");
        let err = client.list_agents().await.unwrap_err();
        assert_eq!(err.kind(), "internal");
    }

    #[tokio::test]
    async fn registry_client_lookup_capability_builds_verb_path() {
        let client = RegistryClient::new("http://127.0.0.1:1");
        let err = client.lookup_capability("messages.search").await.unwrap_err();
        assert_eq!(err.kind(), "internal");
    }

    #[tokio::test]
    async fn agent_client_call_capability_surfaces_connect_failure() {
        let client = AgentClient::new();
        let err = client
            .call_capability("http://127.0.0.1:1", "messages.search", serde_json::json!({}), 1000)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "internal");
    }

    #[tokio::test]
    async fn agent_client_call_capability_times_out_against_an_unroutable_address() {
        let client = AgentClient::new();
        let err = client
            .call_capability("http://10.255.255.1", "messages.search", serde_json::json!({}), 50)
            .await
            .unwrap_err();
        assert!(matches!(err, KennyError::Timeout | KennyError::Internal(_)));
    }

    #[test]
    fn agent_client_default_matches_new() {
        let _default = AgentClient::default();
    }
}
