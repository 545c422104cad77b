//! `AgentServiceBase`: the uniform shape every capability-providing
//! service takes. Implementers register a [`CapabilityHandler`] per verb; the
//! base supplies caching, timeouts, NL interpretation, confidence fallback, and
//! dependency resolution around it.

use crate::cache::{Lookup, TieredCache};
use crate::config::AgentConfig;
use crate::confidence::{best_effort, broaden_params, pick_alternative};
use crate::dependency::{DependencyDeclaration, DependencyManager};
use crate::llm::{classify_by_keyword, CatalogEntry, Interpretation, LlmClient, LlmSelection, NoLlmClient, OpenRouterLlmClient};
use async_trait::async_trait;
use kenny_core::cache::fingerprint;
use kenny_core::error::KennyError;
use kenny_core::manifest::CapabilityDescriptor;
use kenny_core::plan::ConfidenceResult;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Implemented once per capability a concrete agent exposes. `handle` always
/// returns a confidence (basic, non-intelligent capabilities report `1.0`).
#[async_trait]
pub trait CapabilityHandler: Send + Sync {
    async fn handle(&self, params: serde_json::Value) -> Result<ConfidenceResult, KennyError>;
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthCheckResult {
    pub name: String,
    pub healthy: bool,
    pub detail: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct AgentHealthReport {
    pub agent_id: String,
    pub state: &'static str,
    pub checks: Vec<HealthCheckResult>,
}

pub struct AgentServiceBase {
    pub agent_id: String,
    capabilities: HashMap<String, CapabilityDescriptor>,
    handlers: HashMap<String, Arc<dyn CapabilityHandler>>,
    cache: Arc<TieredCache>,
    llm: Arc<dyn LlmClient>,
    dependencies: Arc<DependencyManager>,
    min_confidence: f64,
    baseline_ttl_ms: u64,
}

impl AgentServiceBase {
    pub async fn new(config: &AgentConfig, capabilities: Vec<CapabilityDescriptor>) -> Self {
        let cache = Arc::new(TieredCache::connect(&config.cache_l1, &config.cache_l2, &config.cache_l3).await);
        let llm: Arc<dyn LlmClient> = match OpenRouterLlmClient::from_env(&config.llm.model, config.llm.timeout_ms) {
            Some(client) => Arc::new(client),
            None => {
                tracing::warn!("OPENROUTER_API_KEY not set; Query will use the rule-based classifier only");
                Arc::new(NoLlmClient)
            }
        };
        Self {
            agent_id: config.agent_id.clone(),
            capabilities: capabilities.into_iter().map(|c| (c.verb.clone(), c)).collect(),
            handlers: HashMap::new(),
            cache,
            llm,
            dependencies: Arc::new(DependencyManager::new(&config.registry_base_url)),
            min_confidence: config.min_confidence,
            baseline_ttl_ms: config.cache_l3.ttl_ms,
        }
    }

    pub fn register_handler(&mut self, verb: impl Into<String>, handler: Arc<dyn CapabilityHandler>) {
        self.handlers.insert(verb.into(), handler);
    }

    pub fn cache(&self) -> Arc<TieredCache> {
        Arc::clone(&self.cache)
    }

    pub fn dependencies(&self) -> Arc<DependencyManager> {
        Arc::clone(&self.dependencies)
    }

    pub fn capability(&self, verb: &str) -> Option<&CapabilityDescriptor> {
        self.capabilities.get(verb)
    }

    pub fn catalog(&self) -> Vec<CatalogEntry> {
        self.capabilities.values().map(CatalogEntry::from).collect()
    }

    /// `HandleCapability(verb, params)`: cache-checked, timeout-enforced dispatch
    /// to the registered handler.
    pub async fn handle_capability(
        &self,
        verb: &str,
        params: serde_json::Value,
        timeout_ms: u64,
    ) -> Result<serde_json::Value, KennyError> {
        let result = self.invoke_cached(verb, params, timeout_ms).await?;
        Ok(result.value)
    }

    /// Looks the verb up in cache first; on miss, calls the handler under a
    /// timeout and writes the result through to every cache tier.
    async fn invoke_cached(
        &self,
        verb: &str,
        params: serde_json::Value,
        timeout_ms: u64,
    ) -> Result<ConfidenceResult, KennyError> {
        let descriptor = self.capabilities.get(verb).ok_or_else(|| KennyError::CapabilityUnknown { verb: verb.to_string() })?;
        let handler = self.handlers.get(verb).ok_or_else(|| KennyError::CapabilityUnknown { verb: verb.to_string() })?;
        let fp = fingerprint(&self.agent_id, verb, &params, Some(&descriptor.input_schema));

        if let Lookup::Hit { entry, .. } = self.cache.get(&fp).await {
            return Ok(ConfidenceResult { value: entry.value, confidence: entry.confidence, fallback_used: false, fallback_reason: None });
        }

        let result = tokio::time::timeout(Duration::from_millis(timeout_ms.max(1)), handler.handle(params))
            .await
            .map_err(|_| KennyError::Timeout)??;

        self.cache.put(&fp, result.value.clone(), self.baseline_ttl_ms, result.confidence).await;
        Ok(result)
    }

    /// `Query(natural_language, context?)`: interprets via LLM (or the rule-based
    /// fallback), executes the selection, and applies the confidence-shortfall
    /// fallback chain.
    pub async fn query(&self, utterance: &str, context: Option<&str>) -> Result<ConfidenceResult, KennyError> {
        let catalog = self.catalog();
        let selection = self.interpret(utterance, context, &catalog).await?;

        match self.invoke_cached(&selection.verb, selection.parameters.clone(), 30_000).await {
            Ok(result) if result.confidence >= self.min_confidence => Ok(result),
            Ok(result) => Ok(self.fallback_chain(utterance, &catalog, &selection.verb, &selection.parameters, result).await),
            Err(_) => Ok(self.recover_from_handler_error(utterance, &catalog, &selection.verb, &selection.parameters).await),
        }
    }

    async fn interpret(&self, utterance: &str, context: Option<&str>, catalog: &[CatalogEntry]) -> Result<LlmSelection, KennyError> {
        match self.llm.interpret(utterance, context, catalog).await {
            Interpretation::Llm(selection) => Ok(selection),
            Interpretation::Fallback => {
                let (verb, confidence) = classify_by_keyword(utterance, catalog)
                    .ok_or_else(|| KennyError::LlmInterpretationFailed { reason: "no capability matched any keyword".to_string() })?;
                Ok(LlmSelection { verb, parameters: serde_json::json!({}), confidence, reasoning: None })
            }
        }
    }

    /// (a) broader parameters, (b) alternative capability, (c) best-effort.
    async fn fallback_chain(
        &self,
        utterance: &str,
        catalog: &[CatalogEntry],
        verb: &str,
        params: &serde_json::Value,
        shortfall: ConfidenceResult,
    ) -> ConfidenceResult {
        if let Some(broadened) = broaden_params(params) {
            if let Ok(result) = self.invoke_cached(verb, broadened, 30_000).await {
                if result.confidence >= self.min_confidence {
                    return best_effort(result, "confidence shortfall recovered with broader parameters");
                }
            }
        }

        if let Some(alt_verb) = pick_alternative(utterance, catalog, verb) {
            if let Ok(result) = self.invoke_cached(&alt_verb, serde_json::json!({}), 30_000).await {
                if result.confidence >= self.min_confidence {
                    return best_effort(result, format!("confidence shortfall recovered via alternative capability {alt_verb}"));
                }
            }
        }

        best_effort(shortfall, "confidence below threshold; returning best-effort result")
    }

    async fn recover_from_handler_error(
        &self,
        utterance: &str,
        catalog: &[CatalogEntry],
        verb: &str,
        params: &serde_json::Value,
    ) -> ConfidenceResult {
        if let Some(alt_verb) = pick_alternative(utterance, catalog, verb) {
            if let Ok(result) = self.invoke_cached(&alt_verb, serde_json::json!({}), 30_000).await {
                return best_effort(result, format!("primary capability {verb} errored; used alternative {alt_verb}"));
            }
        }
        if let Some(broadened) = broaden_params(params) {
            if let Ok(result) = self.invoke_cached(verb, broadened, 30_000).await {
                return best_effort(result, "primary capability errored; retried with broader parameters");
            }
        }
        best_effort(
            ConfidenceResult { value: serde_json::Value::Null, confidence: 0.0, fallback_used: false, fallback_reason: None },
            format!("capability {verb} failed and no fallback succeeded"),
        )
    }

    pub async fn register_dependency(&self, decl: DependencyDeclaration) {
        self.dependencies.register_dependency(decl).await;
    }

    /// `QueryAgent(other_agent_id, verb, params)`.
    pub async fn query_agent(&self, other_agent_id: &str, verb: &str, params: serde_json::Value) -> Result<serde_json::Value, KennyError> {
        self.dependencies
            .query_agent(other_agent_id, verb, params)
            .await
            .map_err(|e| KennyError::DependencyUnavailable { agent_id: other_agent_id.to_string(), reason: e.to_string() })
    }

    pub async fn cache_lookup(&self, fingerprint: &str) -> Option<serde_json::Value> {
        match self.cache.get(fingerprint).await {
            Lookup::Hit { entry, .. } => Some(entry.value),
            Lookup::Miss => None,
        }
    }

    pub async fn cache_put(&self, fingerprint: &str, value: serde_json::Value, ttl_ms: u64, confidence: f64) {
        self.cache.put(fingerprint, value, ttl_ms, confidence).await;
    }

    pub async fn invalidate_pattern(&self, pattern: &str) {
        self.cache.invalidate_glob(pattern).await;
    }

    /// `Health → {state, checks[]}`. A capability-providing service is healthy
    /// when it can reach its own cache tiers and has at least one registered
    /// handler; concrete agents may layer domain-specific checks on top.
    pub fn health(&self) -> AgentHealthReport {
        let has_handlers = !self.handlers.is_empty();
        let checks = vec![HealthCheckResult {
            name: "handlers_registered".to_string(),
            healthy: has_handlers,
            detail: format!("{} capability handler(s) registered", self.handlers.len()),
        }];
        let state = if has_handlers { "healthy" } else { "degraded" };
        AgentHealthReport { agent_id: self.agent_id.clone(), state, checks }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{L1Config, L2Config, L3Config, LlmConfig};
    use kenny_core::manifest::{Sla, SafetyAnnotation};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_config(agent_id: &str) -> AgentConfig {
        AgentConfig {
            agent_id: agent_id.to_string(),
            registry_base_url: "http://127.0.0.1:1".to_string(),
            cache_l1: L1Config::default(),
            cache_l2: L2Config { endpoint: "redis://127.0.0.1:1".to_string(), ..L2Config::default() },
            cache_l3: L3Config { path: ":memory:".to_string(), ..L3Config::default() },
            llm: LlmConfig::default(),
            min_confidence: 0.7,
            warm_interval_s: 3600,
        }
    }

    fn descriptor(verb: &str) -> CapabilityDescriptor {
        CapabilityDescriptor {
            verb: verb.to_string(),
            input_schema: serde_json::json!({"type": "object"}),
            output_schema: serde_json::json!({"type": "object"}),
            safety_annotations: [SafetyAnnotation::ReadOnly].into_iter().collect(),
            description: format!("test capability {verb}"),
            sla: Sla { target_ms: 500, max_ms: 2000 },
        }
    }

    struct FixedHandler {
        confidence: f64,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl CapabilityHandler for FixedHandler {
        async fn handle(&self, params: serde_json::Value) -> Result<ConfidenceResult, KennyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ConfidenceResult { value: serde_json::json!({"echo": params}), confidence: self.confidence, fallback_used: false, fallback_reason: None })
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl CapabilityHandler for FailingHandler {
        async fn handle(&self, _params: serde_json::Value) -> Result<ConfidenceResult, KennyError> {
            Err(KennyError::Internal("boom".to_string()))
        }
    }

    async fn base_with(verb: &str, confidence: f64) -> (AgentServiceBase, Arc<AtomicUsize>) {
        let config = test_config("test-agent");
        let mut base = AgentServiceBase::new(&config, vec![descriptor(verb)]).await;
        let calls = Arc::new(AtomicUsize::new(0));
        base.register_handler(verb, Arc::new(FixedHandler { confidence, calls: calls.clone() }));
        (base, calls)
    }

    #[tokio::test]
    async fn handle_capability_unknown_verb_is_surfaced() {
        let (base, _) = base_with("messages.search", 1.0).await;
        let err = base.handle_capability("messages.unknown", serde_json::json!({}), 1000).await.unwrap_err();
        assert_eq!(err.kind(), "capability_unknown");
    }

    #[tokio::test]
    async fn handle_capability_caches_second_call() {
        let (base, calls) = base_with("messages.search", 1.0).await;
        let params = serde_json::json!({"mailbox": "Inbox", "limit": 3});
        base.handle_capability("messages.search", params.clone(), 1000).await.unwrap();
        base.handle_capability("messages.search", params, 1000).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1, "second call should be served from cache, not re-invoke the handler");
    }

    #[tokio::test]
    async fn query_below_min_confidence_marks_fallback_used() {
        let (base, _) = base_with("messages.search", 0.2).await;
        let result = base.query("search my messages", None).await.unwrap();
        assert!(result.fallback_used);
        assert!(result.confidence < base.min_confidence || result.fallback_used);
    }

    #[tokio::test]
    async fn query_above_min_confidence_does_not_fall_back() {
        let (base, _) = base_with("messages.search", 0.95).await;
        let result = base.query("please search my messages", None).await.unwrap();
        assert!(!result.fallback_used);
        assert_eq!(result.confidence, 0.95);
    }

    #[tokio::test]
    async fn handler_error_recovers_via_best_effort() {
        let config = test_config("test-agent-2");
        let mut base = AgentServiceBase::new(&config, vec![descriptor("messages.search")]).await;
        base.register_handler("messages.search", Arc::new(FailingHandler));
        let result = base.query("search my messages", None).await.unwrap();
        assert!(result.fallback_used);
    }

    #[tokio::test]
    async fn health_reports_degraded_with_no_handlers() {
        let config = test_config("test-agent-3");
        let base = AgentServiceBase::new(&config, vec![descriptor("messages.search")]).await;
        let report = base.health();
        assert_eq!(report.state, "degraded");
    }

    #[tokio::test]
    async fn health_reports_healthy_once_a_handler_is_registered() {
        let (base, _) = base_with("messages.search", 1.0).await;
        let report = base.health();
        assert_eq!(report.state, "healthy");
    }

    #[tokio::test]
    async fn invalidate_pattern_forces_handler_re_invocation() {
        let (base, calls) = base_with("messages.search", 1.0).await;
        let params = serde_json::json!({"mailbox": "Inbox"});
        base.handle_capability("messages.search", params.clone(), 1000).await.unwrap();
        base.invalidate_pattern("*").await;
        base.handle_capability("messages.search", params, 1000).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}

/// Lets [`crate::warming::CacheWarmer`] re-execute a pattern's call directly
/// against this base's own handlers, bypassing `invoke_cached`'s read path
/// (the warmer already invalidates before calling) but still writing through
/// on success.
#[async_trait]
impl crate::warming::WarmTarget for AgentServiceBase {
    async fn warm_one(&self, verb: &str, params: serde_json::Value) -> bool {
        let Some(descriptor) = self.capabilities.get(verb) else { return false };
        let Some(handler) = self.handlers.get(verb) else { return false };
        let fp = fingerprint(&self.agent_id, verb, &params, Some(&descriptor.input_schema));
        match handler.handle(params).await {
            Ok(result) => {
                self.cache.put(&fp, result.value, self.baseline_ttl_ms, result.confidence).await;
                true
            }
            Err(err) => {
                tracing::debug!(%verb, error = %err, "cache warmer: handler failed");
                false
            }
        }
    }
}
