use std::sync::Arc;

use chrono::{NaiveTime, Weekday};

use aegis_common::types::{
    EvaluationScores, PolicyAction, PolicyRule, RuleScope, Severity, Violation,
};
use aegis_common::{GatewayError, OrgId, Result, RuleId};

use crate::store::{scan_json, set_json, KeyValueStore};

use super::dsl::{self, DslContext};

const POLICY_DISCLAIMER: &str = "This response has been reviewed for policy compliance.";
const ACCURACY_DISCLAIMER: &str = "Please verify this information independently.";

/// Who is asking, and when.
#[derive(Clone, Debug)]
pub struct PolicyContext {
    pub org_id: OrgId,
    pub user_id: Option<String>,
    pub user_role: Option<String>,
    pub time_of_day: NaiveTime,
    pub weekday: Weekday,
}

impl PolicyContext {
    pub fn now(org_id: OrgId, user_id: Option<String>, user_role: Option<String>) -> Self {
        let now = chrono::Local::now();
        Self {
            org_id,
            user_id,
            user_role,
            time_of_day: now.time(),
            weekday: chrono::Datelike::weekday(&now),
        }
    }
}

/// The verdict for one request.
#[derive(Clone, Debug)]
pub struct PolicyDecision {
    pub action: PolicyAction,
    /// Names of every rule that matched, in evaluation order.
    pub applied_rules: Vec<String>,
    pub confidence: f64,
    /// Replacement response content when action is REWRITE.
    pub rewrite: Option<String>,
}

/// Evaluates tenant + global rules against an evaluation and applies the
/// business overrides.
pub struct PolicyEngine {
    store: Arc<dyn KeyValueStore>,
}

fn rule_key(rule: &PolicyRule) -> String {
    let scope = match &rule.scope {
        RuleScope::Global(_) => "GLOBAL".to_string(),
        RuleScope::Org(org) => org.to_string(),
    };
    format!("rules:{}:{}", scope, rule.id)
}

impl PolicyEngine {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Persist a rule. Rejects an empty name or a condition no DSL atom
    /// recognizes (run-time evaluation still never fails).
    pub async fn create_rule(&self, rule: PolicyRule) -> Result<PolicyRule> {
        if rule.name.trim().is_empty() {
            return Err(GatewayError::BadRequest("rule name must not be empty".into()));
        }
        if !dsl::is_recognizable(&rule.condition) {
            return Err(GatewayError::BadRequest(format!(
                "unrecognizable rule condition: '{}'",
                rule.condition
            )));
        }

        set_json(self.store.as_ref(), &rule_key(&rule), &rule).await?;
        tracing::info!(rule = %rule.name, rule_id = %rule.id, "Policy rule created");
        Ok(rule)
    }

    pub async fn delete_rule(&self, org_id: &OrgId, id: RuleId) -> Result<bool> {
        // A tenant can delete its own rules, not the global set.
        let removed = self
            .store
            .delete(&format!("rules:{}:{}", org_id, id))
            .await?;
        Ok(removed)
    }

    /// Union of GLOBAL and tenant rules in insertion (creation) order.
    pub async fn rules_for(&self, org_id: &OrgId) -> Result<Vec<PolicyRule>> {
        let mut rules: Vec<PolicyRule> = scan_json(self.store.as_ref(), "rules:GLOBAL:").await?;
        rules.extend(
            scan_json::<PolicyRule>(self.store.as_ref(), &format!("rules:{}:", org_id)).await?,
        );
        rules.sort_by_key(|r| r.created_at);
        Ok(rules)
    }

    /// Run the decision pipeline: rule pass starting from the mesh's
    /// preview action (strongest action wins, short-circuit on BLOCK),
    /// then business overrides, then rewrite generation.
    pub async fn decide(
        &self,
        initial_action: PolicyAction,
        response_text: &str,
        scores: &EvaluationScores,
        violations: &[Violation],
        evaluation_confidence: f64,
        ctx: &PolicyContext,
    ) -> Result<PolicyDecision> {
        let rules = self.rules_for(&ctx.org_id).await?;

        let dsl_ctx = DslContext {
            scores: *scores,
            confidence: evaluation_confidence,
            violations: violations.to_vec(),
            time_of_day: ctx.time_of_day,
            weekday: ctx.weekday,
            user_role: ctx.user_role.clone(),
        };

        let mut action = initial_action;
        let mut applied_rules = Vec::new();
        // The rule that set the current strongest action; its template
        // drives the rewrite.
        let mut deciding_rule: Option<PolicyRule> = None;

        for rule in rules {
            if action == PolicyAction::Block {
                break;
            }
            if !rule.enabled || !rule.scope.applies_to(&ctx.org_id) {
                continue;
            }
            if !dsl::evaluate(&rule.condition, &dsl_ctx) {
                continue;
            }

            applied_rules.push(rule.name.clone());
            metrics::counter!("policy.rule_matches", "rule" => rule.name.clone()).increment(1);

            if rule.action > action {
                action = rule.action;
                deciding_rule = Some(rule.clone());
            }
            if action == PolicyAction::Block {
                break;
            }
        }

        // Business overrides, applied after the rule pass.
        if action == PolicyAction::Block
            && is_business_hours(ctx.time_of_day)
            && scores.overall > 0.3
        {
            tracing::debug!("Business-hours override: BLOCK downgraded to REWRITE");
            action = PolicyAction::Rewrite;
        }
        if action == PolicyAction::Block
            && ctx.user_role.as_deref() == Some("admin")
            && scores.toxicity > 0.1
        {
            tracing::debug!("Admin override: BLOCK downgraded to FLAG");
            action = PolicyAction::Flag;
        }
        if action == PolicyAction::Flag && evaluation_confidence > 0.9 {
            tracing::debug!("High-confidence override: FLAG upgraded to REWRITE");
            action = PolicyAction::Rewrite;
        }

        let rewrite = if action == PolicyAction::Rewrite {
            Some(render_rewrite(
                response_text,
                scores,
                violations,
                deciding_rule.as_ref(),
            ))
        } else {
            None
        };

        let confidence = match action {
            PolicyAction::Block => 0.95,
            PolicyAction::Rewrite => 0.8,
            PolicyAction::Flag => 0.7,
            PolicyAction::Pass => 1.0,
        };

        Ok(PolicyDecision {
            action,
            applied_rules,
            confidence,
            rewrite,
        })
    }
}

fn is_business_hours(time: NaiveTime) -> bool {
    let start = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
    let end = NaiveTime::from_hms_opt(17, 0, 0).unwrap();
    time >= start && time < end
}

/// Produce the rewritten response content.
///
/// A matched rule's template wins, with `{rule_name}`, `{violations}`, and
/// `{score}` substituted. Without a template: redact located severe toxic
/// spans, then append the disclaimer matching the dominant violation kind.
fn render_rewrite(
    response_text: &str,
    scores: &EvaluationScores,
    violations: &[Violation],
    deciding_rule: Option<&PolicyRule>,
) -> String {
    if let Some(template) = deciding_rule.and_then(|r| r.rewrite_template.as_deref()) {
        let rule_name = deciding_rule.map(|r| r.name.as_str()).unwrap_or_default();
        let violation_summary = violations
            .iter()
            .map(|v| v.message.as_str())
            .collect::<Vec<_>>()
            .join("; ");
        return template
            .replace("{rule_name}", rule_name)
            .replace("{violations}", &violation_summary)
            .replace("{score}", &format!("{:.2}", scores.overall));
    }

    let mut text = redact_severe_spans(response_text, violations);

    let has_accuracy_issue = violations
        .iter()
        .any(|v| v.violation_type.contains("accura") || v.message.to_lowercase().contains("inaccura"));

    let disclaimer = if has_accuracy_issue {
        ACCURACY_DISCLAIMER
    } else {
        POLICY_DISCLAIMER
    };

    if !text.is_empty() {
        text.push_str("\n\n");
    }
    text.push_str(disclaimer);
    text
}

/// Replace the located span of every HIGH/CRITICAL toxicity violation with
/// "[REDACTED]". Spans apply right-to-left so earlier offsets stay valid.
fn redact_severe_spans(response_text: &str, violations: &[Violation]) -> String {
    let mut spans: Vec<(usize, usize)> = violations
        .iter()
        .filter(|v| {
            v.severity >= Severity::High && v.violation_type.contains("toxic")
        })
        .filter_map(|v| v.location.map(|l| (l.start, l.end)))
        .filter(|(start, end)| start < end && *end <= response_text.len())
        .collect();

    spans.sort_by(|a, b| b.0.cmp(&a.0));

    let mut text = response_text.to_string();
    for (start, end) in spans {
        if text.is_char_boundary(start) && text.is_char_boundary(end) {
            text.replace_range(start..end, "[REDACTED]");
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use aegis_common::types::TextSpan;

    fn engine() -> PolicyEngine {
        PolicyEngine::new(Arc::new(MemoryStore::new()))
    }

    fn ctx(org: &str) -> PolicyContext {
        PolicyContext {
            org_id: OrgId::new(org),
            user_id: Some("user-1".into()),
            user_role: None,
            // Outside business hours so the block override stays out of
            // the way unless a test opts in.
            time_of_day: NaiveTime::from_hms_opt(20, 0, 0).unwrap(),
            weekday: Weekday::Tue,
        }
    }

    fn violation(kind: &str, message: &str, severity: Severity) -> Violation {
        Violation {
            violation_type: kind.into(),
            severity,
            message: message.into(),
            confidence: 0.9,
            location: None,
            suggestions: Vec::new(),
        }
    }

    async fn seed_rule(engine: &PolicyEngine, rule: PolicyRule) {
        engine.create_rule(rule).await.unwrap();
    }

    #[tokio::test]
    async fn test_no_rules_passes() {
        let engine = engine();
        let decision = engine
            .decide(
                PolicyAction::Pass,
                "fine content",
                &EvaluationScores::perfect(),
                &[],
                1.0,
                &ctx("acme"),
            )
            .await
            .unwrap();
        assert_eq!(decision.action, PolicyAction::Pass);
        assert!(decision.applied_rules.is_empty());
        assert_eq!(decision.confidence, 1.0);
    }

    #[tokio::test]
    async fn test_block_short_circuits_and_wins() {
        let engine = engine();
        seed_rule(
            &engine,
            PolicyRule::new(
                RuleScope::global(),
                "flag-low-accuracy",
                "accuracy < 0.6",
                PolicyAction::Flag,
                Severity::Low,
            ),
        )
        .await;
        seed_rule(
            &engine,
            PolicyRule::new(
                RuleScope::org(OrgId::new("acme")),
                "block-toxic",
                "toxicity < 0.3",
                PolicyAction::Block,
                Severity::Critical,
            ),
        )
        .await;

        let scores = EvaluationScores::new(0.1, 1.0, 0.4, 1.0);
        let decision = engine
            .decide(PolicyAction::Pass, "bad", &scores, &[], 0.8, &ctx("acme"))
            .await
            .unwrap();

        assert_eq!(decision.action, PolicyAction::Block);
        assert_eq!(decision.confidence, 0.95);
        assert_eq!(
            decision.applied_rules,
            vec!["flag-low-accuracy".to_string(), "block-toxic".to_string()]
        );
    }

    #[tokio::test]
    async fn test_tenant_isolation() {
        let engine = engine();
        seed_rule(
            &engine,
            PolicyRule::new(
                RuleScope::org(OrgId::new("other")),
                "other-tenant-block",
                "toxicity < 0.9",
                PolicyAction::Block,
                Severity::High,
            ),
        )
        .await;

        let scores = EvaluationScores::new(0.1, 1.0, 1.0, 1.0);
        let decision = engine
            .decide(PolicyAction::Pass, "text", &scores, &[], 0.8, &ctx("acme"))
            .await
            .unwrap();
        assert_eq!(decision.action, PolicyAction::Pass);
    }

    #[tokio::test]
    async fn test_disabled_rules_ignored() {
        let engine = engine();
        let mut rule = PolicyRule::new(
            RuleScope::global(),
            "disabled-block",
            "toxicity < 0.9",
            PolicyAction::Block,
            Severity::High,
        );
        rule.enabled = false;
        seed_rule(&engine, rule).await;

        let scores = EvaluationScores::new(0.1, 1.0, 1.0, 1.0);
        let decision = engine
            .decide(PolicyAction::Pass, "text", &scores, &[], 0.8, &ctx("acme"))
            .await
            .unwrap();
        assert_eq!(decision.action, PolicyAction::Pass);
    }

    #[tokio::test]
    async fn test_business_hours_downgrade() {
        let engine = engine();
        seed_rule(
            &engine,
            PolicyRule::new(
                RuleScope::global(),
                "block-toxic",
                "toxicity < 0.3",
                PolicyAction::Block,
                Severity::Critical,
            ),
        )
        .await;

        let mut daytime = ctx("acme");
        daytime.time_of_day = NaiveTime::from_hms_opt(11, 0, 0).unwrap();

        // overall > 0.3 → downgrade to REWRITE.
        let scores = EvaluationScores::new(0.2, 0.9, 0.9, 0.9);
        let decision = engine
            .decide(PolicyAction::Pass, "text", &scores, &[], 0.8, &daytime)
            .await
            .unwrap();
        assert_eq!(decision.action, PolicyAction::Rewrite);
        assert!(decision.rewrite.is_some());

        // overall <= 0.3 → stays blocked.
        let scores = EvaluationScores::new(0.0, 0.2, 0.2, 0.2);
        let decision = engine
            .decide(PolicyAction::Pass, "text", &scores, &[], 0.8, &daytime)
            .await
            .unwrap();
        assert_eq!(decision.action, PolicyAction::Block);
    }

    #[tokio::test]
    async fn test_admin_downgrade_to_flag() {
        let engine = engine();
        seed_rule(
            &engine,
            PolicyRule::new(
                RuleScope::global(),
                "block-toxic",
                "toxicity < 0.5",
                PolicyAction::Block,
                Severity::Critical,
            ),
        )
        .await;

        let mut admin = ctx("acme");
        admin.user_role = Some("admin".into());

        let scores = EvaluationScores::new(0.2, 0.2, 0.2, 0.2);
        let decision = engine
            .decide(PolicyAction::Pass, "text", &scores, &[], 0.8, &admin)
            .await
            .unwrap();
        assert_eq!(decision.action, PolicyAction::Flag);
        assert_eq!(decision.confidence, 0.7);
    }

    #[tokio::test]
    async fn test_high_confidence_flag_upgrades_to_rewrite() {
        let engine = engine();
        seed_rule(
            &engine,
            PolicyRule::new(
                RuleScope::global(),
                "flag-any-violation",
                "contains violations",
                PolicyAction::Flag,
                Severity::Medium,
            ),
        )
        .await;

        let scores = EvaluationScores::new(0.9, 0.9, 0.9, 0.9);
        let violations = [violation("policy_violation", "questionable", Severity::Medium)];
        let decision = engine
            .decide(PolicyAction::Pass, "text", &scores, &violations, 0.95, &ctx("acme"))
            .await
            .unwrap();
        assert_eq!(decision.action, PolicyAction::Rewrite);
    }

    #[tokio::test]
    async fn test_rewrite_template_substitution() {
        let engine = engine();
        let mut rule = PolicyRule::new(
            RuleScope::global(),
            "accuracy-rewrite",
            "accuracy < 0.6",
            PolicyAction::Rewrite,
            Severity::Medium,
        );
        rule.rewrite_template =
            Some("Flagged by {rule_name}: {violations} (score {score})".into());
        seed_rule(&engine, rule).await;

        let scores = EvaluationScores::new(1.0, 1.0, 0.4, 1.0);
        let violations = [violation("factual_accuracy", "unsupported claim", Severity::Medium)];
        let decision = engine
            .decide(PolicyAction::Pass, "text", &scores, &violations, 0.8, &ctx("acme"))
            .await
            .unwrap();

        let rewrite = decision.rewrite.unwrap();
        assert!(rewrite.starts_with("Flagged by accuracy-rewrite"));
        assert!(rewrite.contains("unsupported claim"));
    }

    #[tokio::test]
    async fn test_canned_accuracy_disclaimer() {
        let engine = engine();
        seed_rule(
            &engine,
            PolicyRule::new(
                RuleScope::global(),
                "accuracy-rewrite",
                "accuracy < 0.6",
                PolicyAction::Rewrite,
                Severity::Medium,
            ),
        )
        .await;

        let scores = EvaluationScores::new(1.0, 1.0, 0.4, 1.0);
        let violations = [violation("factual_accuracy", "factually inaccurate", Severity::Medium)];
        let decision = engine
            .decide(PolicyAction::Pass, "The moon is cheese.", &scores, &violations, 0.8, &ctx("acme"))
            .await
            .unwrap();

        let rewrite = decision.rewrite.unwrap();
        assert!(rewrite.starts_with("The moon is cheese."));
        assert!(rewrite.ends_with(ACCURACY_DISCLAIMER));
    }

    #[test]
    fn test_redaction_replaces_located_spans() {
        let text = "you are a nitwit friend";
        let violations = [Violation {
            violation_type: "toxic_content".into(),
            severity: Severity::High,
            message: "insult".into(),
            confidence: 0.9,
            location: Some(TextSpan { start: 10, end: 16 }),
            suggestions: Vec::new(),
        }];
        assert_eq!(
            redact_severe_spans(text, &violations),
            "you are a [REDACTED] friend"
        );
    }

    #[tokio::test]
    async fn test_create_rule_rejects_unrecognizable_condition() {
        let engine = engine();
        let rule = PolicyRule::new(
            RuleScope::global(),
            "bad",
            "utter gibberish condition",
            PolicyAction::Flag,
            Severity::Low,
        );
        assert!(engine.create_rule(rule).await.is_err());
    }
}
