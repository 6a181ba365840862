use serde::{Deserialize, Serialize};

use crate::ids::DocumentId;

/// Violation severity, ordered LOW < MEDIUM < HIGH < CRITICAL.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Character span within the evaluated response.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextSpan {
    pub start: usize,
    pub end: usize,
}

/// A single policy/safety violation reported by an evaluator.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Violation {
    /// Machine-readable violation category ("toxic_content", "off_brand", ...).
    #[serde(rename = "type")]
    pub violation_type: String,
    pub severity: Severity,
    pub message: String,
    /// Evaluator confidence in [0,1].
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<TextSpan>,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

/// Per-dimension scores, all in [0,1] where 1 = safe/good.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationScores {
    pub factual_accuracy: f64,
    pub policy_compliance: f64,
    pub brand_alignment: f64,
    pub toxicity: f64,
    pub overall: f64,
}

impl EvaluationScores {
    /// Weighted overall score. The weights are part of the wire contract:
    /// 0.30 toxicity + 0.30 compliance + 0.25 accuracy + 0.15 brand.
    pub fn weighted_overall(
        toxicity: f64,
        policy_compliance: f64,
        factual_accuracy: f64,
        brand_alignment: f64,
    ) -> f64 {
        0.30 * toxicity
            + 0.30 * policy_compliance
            + 0.25 * factual_accuracy
            + 0.15 * brand_alignment
    }

    pub fn new(
        toxicity: f64,
        policy_compliance: f64,
        factual_accuracy: f64,
        brand_alignment: f64,
    ) -> Self {
        Self {
            factual_accuracy,
            policy_compliance,
            brand_alignment,
            toxicity,
            overall: Self::weighted_overall(
                toxicity,
                policy_compliance,
                factual_accuracy,
                brand_alignment,
            ),
        }
    }

    /// All-safe scores — the neutral starting point before evaluators run.
    pub fn perfect() -> Self {
        Self::new(1.0, 1.0, 1.0, 1.0)
    }
}

impl Default for EvaluationScores {
    fn default() -> Self {
        Self::perfect()
    }
}

/// Final action over a prompt–response pair. Precedence when rules
/// disagree: BLOCK > REWRITE > FLAG > PASS.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum PolicyAction {
    Pass,
    Flag,
    Rewrite,
    Block,
}

impl PolicyAction {
    /// The stronger of two actions.
    pub fn max(self, other: Self) -> Self {
        if other > self {
            other
        } else {
            self
        }
    }
}

/// Aggregated output of the evaluator mesh plus the policy verdict.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResult {
    /// Equal to `evaluation_scores.overall`.
    pub score: f64,
    pub violations: Vec<Violation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rewrite: Option<String>,
    pub action: PolicyAction,
    pub evaluation_scores: EvaluationScores,
    pub confidence: f64,
    #[serde(default)]
    pub documents_used: Vec<DocumentId>,
}

impl EvaluationResult {
    /// Neutral result used when an evaluator bank produces nothing at all.
    pub fn neutral() -> Self {
        let scores = EvaluationScores::perfect();
        Self {
            score: scores.overall,
            violations: Vec::new(),
            rewrite: None,
            action: PolicyAction::Pass,
            evaluation_scores: scores,
            confidence: 1.0,
            documents_used: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overall_weighting() {
        let scores = EvaluationScores::new(0.5, 1.0, 0.8, 0.4);
        let expected = 0.30 * 0.5 + 0.30 * 1.0 + 0.25 * 0.8 + 0.15 * 0.4;
        assert!((scores.overall - expected).abs() < 1e-9);
    }

    #[test]
    fn test_action_precedence() {
        assert_eq!(PolicyAction::Pass.max(PolicyAction::Flag), PolicyAction::Flag);
        assert_eq!(PolicyAction::Flag.max(PolicyAction::Rewrite), PolicyAction::Rewrite);
        assert_eq!(PolicyAction::Block.max(PolicyAction::Rewrite), PolicyAction::Block);
        assert!(PolicyAction::Block > PolicyAction::Rewrite);
        assert!(PolicyAction::Rewrite > PolicyAction::Flag);
        assert!(PolicyAction::Flag > PolicyAction::Pass);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
    }

    #[test]
    fn test_severity_wire_casing() {
        assert_eq!(serde_json::to_string(&Severity::Critical).unwrap(), "\"CRITICAL\"");
        assert_eq!(serde_json::to_string(&PolicyAction::Block).unwrap(), "\"BLOCK\"");
    }
}
