//! NL interpretation layer: pass the agent's own capability catalog to
//! an LLM, constrain its output to a meta-schema `{verb, parameters, confidence,
//! reasoning?}`, validate, re-ask once on failure, then fall back to a rule-based
//! keyword classifier. An OpenAI-compatible chat-completions call over
//! `reqwest`, reading `OPENROUTER_API_KEY` from the environment.

use async_trait::async_trait;
use kenny_core::manifest::CapabilityDescriptor;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const OPENROUTER_API_BASE: &str = "https://openrouter.ai/api/v1";

/// One catalog entry exposed to the LLM: verb, schema, and description, nothing
/// else.
#[derive(Debug, Clone, Serialize)]
pub struct CatalogEntry {
    pub verb: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

impl From<&CapabilityDescriptor> for CatalogEntry {
    fn from(cap: &CapabilityDescriptor) -> Self {
        Self { verb: cap.verb.clone(), description: cap.description.clone(), input_schema: cap.input_schema.clone() }
    }
}

/// The LLM's structured selection, validated against the meta-schema below.
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSelection {
    pub verb: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: Option<String>,
}

static META_SCHEMA: Lazy<serde_json::Value> = Lazy::new(|| {
    serde_json::json!({
        "type": "object",
        "required": ["verb", "confidence"],
        "properties": {
            "verb": {"type": "string", "minLength": 1},
            "parameters": {"type": "object"},
            "confidence": {"type": "number", "minimum": 0.0, "maximum": 1.0},
            "reasoning": {"type": "string"}
        }
    })
});

/// Validates a raw LLM completion against the meta-schema and parses it.
fn validate_and_parse(raw: &str) -> Option<LlmSelection> {
    let value: serde_json::Value = extract_json_object(raw)?;
    let compiled = jsonschema::JSONSchema::compile(&META_SCHEMA).ok()?;
    if !compiled.is_valid(&value) {
        return None;
    }
    serde_json::from_value(value).ok()
}

/// LLMs routinely wrap JSON in prose or code fences; pull out the first balanced
/// `{...}` object rather than requiring the entire completion to be bare JSON.
fn extract_json_object(raw: &str) -> Option<serde_json::Value> {
    if let Ok(v) = serde_json::from_str(raw.trim()) {
        return Some(v);
    }
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&raw[start..=end]).ok()
}

/// Outcome of a `Query` interpretation: either the LLM (or its re-ask) produced a
/// valid selection, or both attempts failed and the caller should fall back to
/// [`classify_by_keyword`].
pub enum Interpretation {
    Llm(LlmSelection),
    Fallback,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn interpret(&self, utterance: &str, context: Option<&str>, catalog: &[CatalogEntry]) -> Interpretation;
}

/// Default `LlmClient`: OpenAI-compatible chat completions over OpenRouter.
pub struct OpenRouterLlmClient {
    api_key: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Serialize, Clone)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    content: String,
}

impl OpenRouterLlmClient {
    /// `None` when `OPENROUTER_API_KEY` is unset; the caller falls back to the
    /// rule-based classifier for every query rather than failing to start.
    pub fn from_env(model: &str, timeout_ms: u64) -> Option<Self> {
        let api_key = std::env::var("OPENROUTER_API_KEY").ok()?.trim().to_string();
        if api_key.is_empty() {
            return None;
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Some(Self { api_key, model: model.to_string(), client })
    }

    fn system_prompt(catalog: &[CatalogEntry]) -> String {
        let catalog_json = serde_json::to_string_pretty(catalog).unwrap_or_default();
        format!(
            "You select exactly one capability to invoke for a user request. \
            Available capabilities (verb, description, JSON Schema for parameters):\n{catalog_json}\n\n\
            Respond with a single JSON object matching this shape and nothing else: \
            {{\"verb\": <one of the verbs above>, \"parameters\": <object matching that verb's schema>, \
            \"confidence\": <0..1>, \"reasoning\": <short string, optional>}}."
        )
    }

    async fn complete(&self, system: &str, user: &str) -> Option<String> {
        let body = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage { role: "system".to_string(), content: system.to_string() },
                ChatMessage { role: "user".to_string(), content: user.to_string() },
            ],
            temperature: 0.0,
            max_tokens: Some(512),
        };
        let res = self
            .client
            .post(format!("{OPENROUTER_API_BASE}/chat/completions"))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| tracing::warn!(error = %e, "llm: request failed"))
            .ok()?;
        if !res.status().is_success() {
            tracing::warn!(status = %res.status(), "llm: non-success response");
            return None;
        }
        let parsed: ChatResponse = res.json().await.ok()?;
        parsed.choices.into_iter().next().map(|c| c.message.content)
    }
}

#[async_trait]
impl LlmClient for OpenRouterLlmClient {
    async fn interpret(&self, utterance: &str, context: Option<&str>, catalog: &[CatalogEntry]) -> Interpretation {
        let system = Self::system_prompt(catalog);
        let mut user = format!("User request: {utterance}");
        if let Some(ctx) = context {
            user.push_str("\n\nContext:\n");
            user.push_str(ctx);
        }

        if let Some(raw) = self.complete(&system, &user).await {
            if let Some(selection) = validate_and_parse(&raw) {
                return Interpretation::Llm(selection);
            }
        }

        // One re-ask with a strict restatement.
        let strict_user = format!(
            "{user}\n\nYour previous answer did not match the required JSON shape. \
            Reply with ONLY the JSON object, no prose, no code fences."
        );
        if let Some(raw) = self.complete(&system, &strict_user).await {
            if let Some(selection) = validate_and_parse(&raw) {
                return Interpretation::Llm(selection);
            }
        }

        Interpretation::Fallback
    }
}

/// Always falls back; used when no `OPENROUTER_API_KEY` is configured so the
/// agent still answers `Query` via the rule-based classifier.
pub struct NoLlmClient;

#[async_trait]
impl LlmClient for NoLlmClient {
    async fn interpret(&self, _utterance: &str, _context: Option<&str>, _catalog: &[CatalogEntry]) -> Interpretation {
        Interpretation::Fallback
    }
}

/// Rule-based keyword classifier: picks the capability
/// whose verb or description shares the most whitespace-delimited keyword tokens
/// with the utterance. Returns `None` only when the catalog is empty.
pub fn classify_by_keyword(utterance: &str, catalog: &[CatalogEntry]) -> Option<(String, f64)> {
    let tokens: Vec<String> = utterance.to_lowercase().split_whitespace().map(|s| s.to_string()).collect();
    if tokens.is_empty() || catalog.is_empty() {
        return None;
    }
    let mut best: Option<(&str, usize)> = None;
    for entry in catalog {
        let haystack = format!("{} {}", entry.verb, entry.description).to_lowercase();
        let score = tokens.iter().filter(|t| haystack.contains(t.as_str())).count();
        if best.map(|(_, s)| score > s).unwrap_or(score > 0) {
            best = Some((entry.verb.as_str(), score));
        }
    }
    best.map(|(verb, _)| (verb.to_string(), 0.4))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> Vec<CatalogEntry> {
        vec![
            CatalogEntry {
                verb: "messages.search".to_string(),
                description: "search mail messages".to_string(),
                input_schema: serde_json::json!({"type": "object"}),
            },
            CatalogEntry {
                verb: "calendar.today".to_string(),
                description: "list today's calendar events".to_string(),
                input_schema: serde_json::json!({"type": "object"}),
            },
        ]
    }

    #[test]
    fn extracts_json_embedded_in_prose() {
        let raw = "Sure, here you go:\n```json\n{\"verb\": \"messages.search\", \"confidence\": 0.9}\n```";
        let parsed = validate_and_parse(raw).expect("valid selection");
        assert_eq!(parsed.verb, "messages.search");
    }

    #[test]
    fn rejects_selection_missing_confidence() {
        let raw = "{\"verb\": \"messages.search\"}";
        assert!(validate_and_parse(raw).is_none());
    }

    #[test]
    fn keyword_classifier_matches_search_to_messages_search() {
        let (verb, confidence) = classify_by_keyword("please search my inbox for sarah", &catalog()).unwrap();
        assert_eq!(verb, "messages.search");
        assert_eq!(confidence, 0.4);
    }
}
