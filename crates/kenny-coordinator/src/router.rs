//! Router: classifies the raw utterance into an `intent_label` +
//! confidence + suggested strategy. Rule table first (short-circuit for
//! clearly-scoped verbs), LLM classifier next (bounded system prompt enumerating
//! known intents from the Registry's capability catalog), `unknown` if both fail.

use async_trait::async_trait;
use kenny_core::plan::PlanStrategy;
use kenny_core::registry_types::CapabilityRef;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouterOutput {
    pub intent_label: String,
    pub confidence: f64,
    pub suggested_strategy: PlanStrategy,
    /// The verb a rule-table or single-capability match resolved directly to,
    /// so the Planner can skip synthesis entirely for the common case.
    #[serde(default)]
    pub direct_verb: Option<String>,
}

/// One rule-table entry: an utterance substring/regex and the intent it maps to.
pub struct RuleEntry {
    pub pattern: regex::Regex,
    pub intent_label: &'static str,
    pub verb: &'static str,
    pub strategy: PlanStrategy,
}

/// Static rule table for clearly-scoped single-capability requests.
static RULE_TABLE: Lazy<Vec<RuleEntry>> = Lazy::new(|| {
    vec![
        RuleEntry {
            pattern: regex::Regex::new(r"(?i)\b(search|find)\b.*\b(mail|email|message)s?\b").unwrap(),
            intent_label: "mail_search",
            verb: "messages.search",
            strategy: PlanStrategy::Single,
        },
        RuleEntry {
            pattern: regex::Regex::new(r"(?i)\b(today'?s?|upcoming)\b.*\bcalendar|events?\b").unwrap(),
            intent_label: "calendar_lookup",
            verb: "calendar.list_events",
            strategy: PlanStrategy::Single,
        },
        RuleEntry {
            pattern: regex::Regex::new(r"(?i)\bresolve\b.*\bcontact\b").unwrap(),
            intent_label: "contact_resolve",
            verb: "contacts.resolve",
            strategy: PlanStrategy::Single,
        },
    ]
});

pub fn rule_table_match(utterance: &str) -> Option<RouterOutput> {
    RULE_TABLE.iter().find(|r| r.pattern.is_match(utterance)).map(|r| RouterOutput {
        intent_label: r.intent_label.to_string(),
        confidence: 0.95,
        suggested_strategy: r.strategy,
        direct_verb: Some(r.verb.to_string()),
    })
}

static NAME_REF: Lazy<regex::Regex> = Lazy::new(|| regex::Regex::new(r"(?i)\b[a-z]+'s\b").unwrap());
static MAIL_REF: Lazy<regex::Regex> = Lazy::new(|| regex::Regex::new(r"(?i)\b(mail|email|message)s?\b").unwrap());
static SCHEDULE_REF: Lazy<regex::Regex> = Lazy::new(|| regex::Regex::new(r"(?i)\b(schedule|propose|follow-?up|meeting)\b").unwrap());

/// Recognizes a "look up a person, then pull mail and propose time with them"
/// composite utterance — the one shape in the rule table's single-capability
/// scope that genuinely needs more than one capability. Checked before
/// `rule_table_match` since a sentence like "find Sarah's emails and schedule a
/// follow-up" would otherwise short-circuit on the `mail_search` rule alone.
pub fn composite_match(utterance: &str) -> Option<RouterOutput> {
    if NAME_REF.is_match(utterance) && MAIL_REF.is_match(utterance) && SCHEDULE_REF.is_match(utterance) {
        Some(RouterOutput {
            intent_label: "cross_platform_compose".to_string(),
            confidence: 0.9,
            suggested_strategy: PlanStrategy::Mixed,
            direct_verb: None,
        })
    } else {
        None
    }
}

/// Outcome of an LLM classification attempt.
pub enum IntentInterpretation {
    Llm(RouterOutput),
    Fallback,
}

#[async_trait]
pub trait IntentClassifier: Send + Sync {
    async fn classify(&self, utterance: &str, context: Option<&str>, catalog: &[CapabilityRef]) -> IntentInterpretation;
}

/// Always falls back; used when no LLM backend is configured.
pub struct NoIntentClassifier;

#[async_trait]
impl IntentClassifier for NoIntentClassifier {
    async fn classify(&self, _utterance: &str, _context: Option<&str>, _catalog: &[CapabilityRef]) -> IntentInterpretation {
        IntentInterpretation::Fallback
    }
}

/// OpenRouter-backed classifier, mirroring `kenny-agent::llm::OpenRouterLlmClient`:
/// a bounded system prompt enumerates the known verbs as candidate intents and
/// asks for one structured selection.
pub struct OpenRouterIntentClassifier {
    api_key: String,
    model: String,
    client: reqwest::Client,
}

const OPENROUTER_API_BASE: &str = "https://openrouter.ai/api/v1";

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
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

#[derive(Deserialize)]
struct RawIntentSelection {
    intent_label: String,
    #[serde(default)]
    verb: Option<String>,
    confidence: f64,
    #[serde(default)]
    strategy: Option<String>,
}

impl OpenRouterIntentClassifier {
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

    fn system_prompt(catalog: &[CapabilityRef]) -> String {
        let verbs: Vec<&str> = catalog.iter().map(|c| c.verb.as_str()).collect();
        format!(
            "You classify a user's request into an intent for a personal-assistant fabric. \
            Known capability verbs: {}.\n\
            Respond with a single JSON object and nothing else: \
            {{\"intent_label\": <short snake_case label>, \"verb\": <a known verb this maps to most directly, or null \
            if the request needs more than one capability>, \"confidence\": <0..1>, \
            \"strategy\": <one of \"single\", \"parallel\", \"sequential\", \"mixed\">}}.",
            verbs.join(", ")
        )
    }
}

#[async_trait]
impl IntentClassifier for OpenRouterIntentClassifier {
    async fn classify(&self, utterance: &str, context: Option<&str>, catalog: &[CapabilityRef]) -> IntentInterpretation {
        let system = Self::system_prompt(catalog);
        let mut user = format!("User request: {utterance}");
        if let Some(ctx) = context {
            user.push_str("\n\nContext:\n");
            user.push_str(ctx);
        }

        let body = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage { role: "system".to_string(), content: system },
                ChatMessage { role: "user".to_string(), content: user },
            ],
            temperature: 0.0,
            max_tokens: 256,
        };

        let response = self
            .client
            .post(format!("{OPENROUTER_API_BASE}/chat/completions"))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await;

        let Ok(response) = response else { return IntentInterpretation::Fallback };
        if !response.status().is_success() {
            return IntentInterpretation::Fallback;
        }
        let Ok(parsed) = response.json::<ChatResponse>().await else { return IntentInterpretation::Fallback };
        let Some(content) = parsed.choices.into_iter().next().map(|c| c.message.content) else {
            return IntentInterpretation::Fallback;
        };
        let Some(raw) = extract_json_object(&content) else { return IntentInterpretation::Fallback };
        let Ok(selection) = serde_json::from_value::<RawIntentSelection>(raw) else { return IntentInterpretation::Fallback };

        let strategy = match selection.strategy.as_deref() {
            Some("parallel") => PlanStrategy::Parallel,
            Some("sequential") => PlanStrategy::Sequential,
            Some("mixed") => PlanStrategy::Mixed,
            _ => PlanStrategy::Single,
        };
        IntentInterpretation::Llm(RouterOutput {
            intent_label: selection.intent_label,
            confidence: selection.confidence.clamp(0.0, 1.0),
            suggested_strategy: strategy,
            direct_verb: selection.verb,
        })
    }
}

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

/// Rule table, then LLM classifier, then `unknown`. An `unknown` result still
/// carries a `suggested_strategy` of `single` so the Planner can attempt a
/// best-effort single-agent plan rather than failing outright.
pub async fn route(
    utterance: &str,
    context: Option<&str>,
    catalog: &[CapabilityRef],
    classifier: &dyn IntentClassifier,
) -> RouterOutput {
    if let Some(hit) = composite_match(utterance) {
        return hit;
    }
    if let Some(hit) = rule_table_match(utterance) {
        return hit;
    }
    match classifier.classify(utterance, context, catalog).await {
        IntentInterpretation::Llm(output) => output,
        IntentInterpretation::Fallback => {
            RouterOutput { intent_label: "unknown".to_string(), confidence: 0.0, suggested_strategy: PlanStrategy::Single, direct_verb: None }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rule_table_short_circuits_mail_search() {
        let output = route("please search my email for the invoice", None, &[], &NoIntentClassifier).await;
        assert_eq!(output.intent_label, "mail_search");
        assert_eq!(output.direct_verb.as_deref(), Some("messages.search"));
    }

    #[tokio::test]
    async fn unmatched_utterance_with_no_llm_is_unknown() {
        let output = route("do the thing with the stuff", None, &[], &NoIntentClassifier).await;
        assert_eq!(output.intent_label, "unknown");
        assert_eq!(output.suggested_strategy, PlanStrategy::Single);
    }

    #[tokio::test]
    async fn cross_platform_utterance_is_recognized_before_the_single_capability_rule_table() {
        let output = route("Find Sarah's emails and schedule a follow-up", None, &[], &NoIntentClassifier).await;
        assert_eq!(output.intent_label, "cross_platform_compose");
        assert_eq!(output.suggested_strategy, PlanStrategy::Mixed);
        assert_eq!(output.direct_verb, None);
    }
}
