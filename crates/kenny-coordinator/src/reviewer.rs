//! Reviewer: evaluates the aggregate execution against policy —
//! required approvals gathered, egress rule compliance of each result, safety
//! annotations honored — and emits a compliance report bundled into
//! `final_result`. May mark individual results `blocked_by_policy`.

use kenny_core::plan::{CapabilityCall, ExecutionResult, ExecutionStatus, Plan};
use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct ComplianceReport {
    pub approval_required: bool,
    pub approvals_outstanding: Vec<Uuid>,
    pub blocked_calls: Vec<Uuid>,
    pub egress_violations: Vec<String>,
}

/// A call this run is not allowed to execute against, keyed by `call_id`, with
/// the reason surfaced in the compliance report.
pub type EgressDenials = BTreeMap<Uuid, String>;

/// Reviews a completed plan's results against its calls' safety annotations and
/// any egress denials observed during execution, producing the final result set
/// (individually marked `blocked_by_policy` where applicable) and a compliance
/// report.
pub fn review(plan: &Plan, mut results: Vec<ExecutionResult>, egress_denials: &EgressDenials) -> (Vec<ExecutionResult>, ComplianceReport) {
    let calls_by_id: BTreeMap<Uuid, &CapabilityCall> = plan.calls.iter().map(|c| (c.call_id, c)).collect();

    let mut approvals_outstanding = Vec::new();
    let mut blocked_calls = Vec::new();
    let mut egress_violations = Vec::new();

    for result in &mut results {
        let Some(call) = calls_by_id.get(&result.call_id) else { continue };

        if let Some(reason) = egress_denials.get(&result.call_id) {
            result.status = ExecutionStatus::BlockedByPolicy;
            result.error_kind = Some("egress_forbidden".to_string());
            blocked_calls.push(result.call_id);
            egress_violations.push(format!("{}: {}", call.verb, reason));
        }
    }

    if plan.approval_required {
        for call in &plan.calls {
            let needs_approval = manifest_requires_approval(call);
            if needs_approval {
                approvals_outstanding.push(call.call_id);
            }
        }
    }

    let report = ComplianceReport {
        approval_required: plan.approval_required,
        approvals_outstanding,
        blocked_calls,
        egress_violations,
    };
    (results, report)
}

/// Whether a call's verb is one of the write-shaped ones the Planner flags
/// `write_requires_approval` for. The Planner already folded this into
/// `Plan.approval_required`; the Reviewer re-derives it per-call so the
/// compliance report can name exactly which calls are still awaiting
/// sign-off rather than only carry a plan-wide flag.
fn manifest_requires_approval(call: &CapabilityCall) -> bool {
    call.verb.contains("propose") || call.verb.contains("send") || call.verb.contains("delete") || call.verb.ends_with(".write")
}

#[cfg(test)]
mod tests {
    use super::*;
    use kenny_core::plan::{PlanStrategy, StrategyHint};

    fn call(id: Uuid, verb: &str) -> CapabilityCall {
        CapabilityCall {
            call_id: id,
            verb: verb.to_string(),
            agent_id: "agent".into(),
            parameters: serde_json::json!({}),
            depends_on: Default::default(),
            strategy_hint: StrategyHint::ParallelOk,
            timeout_ms: 1000,
        }
    }

    fn ok_result(id: Uuid) -> ExecutionResult {
        ExecutionResult {
            call_id: id,
            status: ExecutionStatus::Ok,
            value: serde_json::json!({}),
            latency_ms: 5,
            attempt_count: 1,
            error_kind: None,
            agent_id: "agent".into(),
            cache_tier_hit: None,
        }
    }

    #[test]
    fn egress_denial_marks_result_blocked_by_policy() {
        let c1 = Uuid::new_v4();
        let plan = Plan {
            plan_id: Uuid::new_v4(),
            intent_label: "t".into(),
            calls: vec![call(c1, "messages.search")],
            strategy: PlanStrategy::Single,
            approval_required: false,
        };
        let mut denials = EgressDenials::new();
        denials.insert(c1, "destination not allowlisted".to_string());
        let (results, report) = review(&plan, vec![ok_result(c1)], &denials);
        assert_eq!(results[0].status, ExecutionStatus::BlockedByPolicy);
        assert_eq!(report.blocked_calls, vec![c1]);
        assert_eq!(report.egress_violations.len(), 1);
    }

    #[test]
    fn approval_required_plan_lists_outstanding_write_calls() {
        let c1 = Uuid::new_v4();
        let c2 = Uuid::new_v4();
        let plan = Plan {
            plan_id: Uuid::new_v4(),
            intent_label: "cross_platform_compose".into(),
            calls: vec![call(c1, "contacts.resolve"), call(c2, "calendar.propose_event")],
            strategy: PlanStrategy::Mixed,
            approval_required: true,
        };
        let (_, report) = review(&plan, vec![ok_result(c1), ok_result(c2)], &EgressDenials::new());
        assert!(report.approval_required);
        assert_eq!(report.approvals_outstanding, vec![c2]);
    }

    #[test]
    fn clean_run_has_no_violations() {
        let c1 = Uuid::new_v4();
        let plan = Plan {
            plan_id: Uuid::new_v4(),
            intent_label: "t".into(),
            calls: vec![call(c1, "messages.search")],
            strategy: PlanStrategy::Single,
            approval_required: false,
        };
        let (results, report) = review(&plan, vec![ok_result(c1)], &EgressDenials::new());
        assert_eq!(results[0].status, ExecutionStatus::Ok);
        assert!(report.blocked_calls.is_empty());
        assert!(report.egress_violations.is_empty());
    }
}
