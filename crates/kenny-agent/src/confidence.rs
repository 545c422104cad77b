//! Execute-with-confidence fallback chain: on a confidence shortfall,
//! try (a) broader parameters, then (b) an alternative capability, then (c)
//! surface the best-effort result with `fallback_used = true`. The orchestration
//! that drives handler calls lives in [`crate::base`]; this module holds the pure
//! decision helpers so they can be tested without a handler registry.

use crate::llm::CatalogEntry;
use kenny_core::plan::ConfidenceResult;

/// Drops the parameter judged most "specific": among object keys, the one whose
/// value is a string, array, or nested object (a filter) rather than a bare
/// scalar flag, breaking ties by longest key name. Returns `None` once there is
/// nothing left to drop.
pub fn broaden_params(params: &serde_json::Value) -> Option<serde_json::Value> {
    let map = params.as_object()?;
    if map.is_empty() {
        return None;
    }
    let mut candidates: Vec<&String> = map.keys().collect();
    candidates.sort_by_key(|k| {
        let specificity = match &map[*k] {
            serde_json::Value::String(_) | serde_json::Value::Array(_) | serde_json::Value::Object(_) => 1,
            _ => 0,
        };
        (std::cmp::Reverse(specificity), std::cmp::Reverse(k.len()))
    });
    let drop_key = candidates.first()?.to_string();
    let mut narrowed = map.clone();
    narrowed.remove(&drop_key);
    Some(serde_json::Value::Object(narrowed))
}

/// Picks the next-best capability for the same utterance, excluding `exclude`
/// (the capability whose result fell short), by keyword overlap.
pub fn pick_alternative(utterance: &str, catalog: &[CatalogEntry], exclude: &str) -> Option<String> {
    let remaining: Vec<CatalogEntry> = catalog.iter().filter(|c| c.verb != exclude).cloned().collect();
    crate::llm::classify_by_keyword(utterance, &remaining).map(|(verb, _)| verb)
}

/// Degrades a result to best-effort: keeps the value but flags the shortfall.
pub fn best_effort(mut result: ConfidenceResult, reason: impl Into<String>) -> ConfidenceResult {
    result.fallback_used = true;
    result.fallback_reason = Some(reason.into());
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broaden_params_drops_the_most_specific_filter_first() {
        let params = serde_json::json!({"mailbox": "Inbox", "limit": 10, "sender": "sarah@example.com"});
        let broadened = broaden_params(&params).unwrap();
        let obj = broadened.as_object().unwrap();
        assert_eq!(obj.len(), 2);
        assert!(!obj.contains_key("sender") || !obj.contains_key("mailbox"));
    }

    #[test]
    fn broaden_params_returns_none_once_empty() {
        let empty = serde_json::json!({});
        assert!(broaden_params(&empty).is_none());
    }

    #[test]
    fn pick_alternative_excludes_the_failed_capability() {
        let catalog = vec![
            CatalogEntry {
                verb: "messages.search".to_string(),
                description: "search mail messages".to_string(),
                input_schema: serde_json::json!({}),
            },
            CatalogEntry {
                verb: "messages.list".to_string(),
                description: "list mail messages".to_string(),
                input_schema: serde_json::json!({}),
            },
        ];
        let alt = pick_alternative("search my messages", &catalog, "messages.search");
        assert_eq!(alt, Some("messages.list".to_string()));
    }
}
