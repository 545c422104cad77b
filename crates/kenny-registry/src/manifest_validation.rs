//! Manifest validation: structural checks plus JSON-Schema well-formedness of every
//! capability's `input_schema`/`output_schema`.

use kenny_core::manifest::AgentManifest;

pub fn validate(manifest: &AgentManifest) -> Result<(), String> {
    if manifest.agent_id.trim().is_empty() {
        return Err("agent_id must not be empty".to_string());
    }
    if manifest.capabilities.is_empty() {
        return Err("manifest must advertise at least one capability".to_string());
    }
    let mut seen_verbs = std::collections::HashSet::new();
    for cap in &manifest.capabilities {
        if !seen_verbs.insert(cap.verb.as_str()) {
            return Err(format!("duplicate verb {} within manifest", cap.verb));
        }
        jsonschema::JSONSchema::compile(&cap.input_schema)
            .map_err(|e| format!("capability {}: invalid input_schema: {e}", cap.verb))?;
        jsonschema::JSONSchema::compile(&cap.output_schema)
            .map_err(|e| format!("capability {}: invalid output_schema: {e}", cap.verb))?;
        if cap.sla.target_ms > cap.sla.max_ms {
            return Err(format!("capability {}: sla.target_ms exceeds sla.max_ms", cap.verb));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kenny_core::manifest::{AgentType, CapabilityDescriptor, HealthCheckSpec, Sla};
    use std::collections::BTreeSet;

    fn base_manifest() -> AgentManifest {
        AgentManifest {
            agent_id: "mail-agent".to_string(),
            display_name: "Mail Agent".to_string(),
            version: "1.0.0".to_string(),
            description: String::new(),
            agent_type: AgentType::Basic,
            capabilities: vec![CapabilityDescriptor {
                verb: "messages.search".to_string(),
                input_schema: serde_json::json!({"type": "object"}),
                output_schema: serde_json::json!({"type": "object"}),
                safety_annotations: BTreeSet::new(),
                description: "search mail".to_string(),
                sla: Sla { target_ms: 200, max_ms: 2000 },
            }],
            data_scopes: BTreeSet::new(),
            tool_access: BTreeSet::new(),
            egress_domains: BTreeSet::new(),
            health_check: HealthCheckSpec { endpoint: "/health".to_string(), interval_s: 30 },
        }
    }

    #[test]
    fn accepts_a_well_formed_manifest() {
        assert!(validate(&base_manifest()).is_ok());
    }

    #[test]
    fn rejects_manifest_with_no_capabilities() {
        let mut m = base_manifest();
        m.capabilities.clear();
        assert!(validate(&m).is_err());
    }

    #[test]
    fn rejects_invalid_input_schema() {
        let mut m = base_manifest();
        m.capabilities[0].input_schema = serde_json::json!({"type": "not-a-real-type"});
        assert!(validate(&m).is_err());
    }

    #[test]
    fn rejects_sla_target_above_max() {
        let mut m = base_manifest();
        m.capabilities[0].sla = Sla { target_ms: 3000, max_ms: 2000 };
        assert!(validate(&m).is_err());
    }
}
