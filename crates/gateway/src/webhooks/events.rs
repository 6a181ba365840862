use serde_json::json;

use aegis_common::types::{
    EvaluationScores, PolicyAction, Violation, WebhookEvent, WebhookEventType,
};
use aegis_common::{OrgId, RequestId};

/// Map a pipeline outcome to its event type. Deterministic: one outcome,
/// one event.
pub fn event_type_for_action(action: PolicyAction) -> WebhookEventType {
    match action {
        PolicyAction::Block => WebhookEventType::ContentBlocked,
        PolicyAction::Rewrite => WebhookEventType::ContentRewritten,
        PolicyAction::Flag => WebhookEventType::PolicyViolation,
        PolicyAction::Pass => WebhookEventType::EvaluationCompleted,
    }
}

/// Build the outbound event for a finished request.
pub fn pipeline_event(
    org_id: &OrgId,
    request_id: RequestId,
    action: PolicyAction,
    scores: &EvaluationScores,
    violations: &[Violation],
    applied_rules: &[String],
) -> WebhookEvent {
    WebhookEvent::new(
        event_type_for_action(action),
        org_id.clone(),
        json!({
            "requestId": request_id,
            "action": action,
            "scores": scores,
            "violationCount": violations.len(),
            "violationTypes": violations
                .iter()
                .map(|v| v.violation_type.as_str())
                .collect::<Vec<_>>(),
            "appliedRules": applied_rules,
        }),
    )
}

/// Synthetic event for endpoint test fires.
pub fn test_event(org_id: &OrgId) -> WebhookEvent {
    WebhookEvent::new(
        WebhookEventType::EvaluationCompleted,
        org_id.clone(),
        json!({
            "test": true,
            "message": "endpoint test delivery",
        }),
    )
}
