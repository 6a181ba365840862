use chrono::{NaiveTime, Weekday};

use aegis_common::types::{CmpOperator, EvaluationScores, Violation};

/// Everything a condition can reference: the evaluation, the clock, and
/// the requesting user. Shared by policy rules and evaluator triggers.
#[derive(Clone, Debug)]
pub struct DslContext {
    pub scores: EvaluationScores,
    pub confidence: f64,
    pub violations: Vec<Violation>,
    /// Local time of day ("HH:MM" granularity).
    pub time_of_day: NaiveTime,
    pub weekday: Weekday,
    /// Role reported by the auth collaborator ("admin", "guest", ...).
    pub user_role: Option<String>,
}

impl DslContext {
    /// Context with all-safe scores, used to evaluate triggers before any
    /// evaluator has run.
    pub fn pre_evaluation(
        time_of_day: NaiveTime,
        weekday: Weekday,
        user_role: Option<String>,
    ) -> Self {
        Self {
            scores: EvaluationScores::perfect(),
            confidence: 1.0,
            violations: Vec::new(),
            time_of_day,
            weekday,
            user_role,
        }
    }
}

/// Evaluate a condition string against the context.
///
/// Grammar (case-insensitive, no parentheses): atoms composed with infix
/// `and` / `or`, where `and` binds tighter and both associate left.
/// Unknown or malformed conditions evaluate to false and never error.
pub fn evaluate(condition: &str, ctx: &DslContext) -> bool {
    let normalized = condition.to_lowercase();
    let tokens: Vec<&str> = normalized.split_whitespace().collect();
    if tokens.is_empty() {
        return false;
    }

    // `or` branches, each an `and` chain of atoms.
    tokens
        .split(|t| *t == "or")
        .any(|branch| !branch.is_empty() && branch.split(|t| *t == "and").all(|atom| eval_atom(atom, ctx)))
}

/// Quick parse-time triage used by rule validation: does at least the first
/// atom look like something the evaluator understands?
pub fn is_recognizable(condition: &str) -> bool {
    let normalized = condition.to_lowercase();
    let tokens: Vec<&str> = normalized.split_whitespace().collect();

    tokens
        .split(|t| *t == "or")
        .flat_map(|branch| branch.split(|t| *t == "and"))
        .all(|atom| atom_shape_known(atom))
        && !tokens.is_empty()
}

fn atom_shape_known(atom: &[&str]) -> bool {
    match atom {
        ["business", "hours"]
        | ["after", "hours"]
        | ["weekend"]
        | ["weekday"]
        | ["user", _]
        | ["contains", "violations"] => true,
        ["violations", "count", op, n] => parse_op(op).is_some() && n.parse::<i64>().is_ok(),
        [metric, op, value] => {
            metric_value_by_name(metric, &DslContext::pre_evaluation(
                NaiveTime::default(),
                Weekday::Mon,
                None,
            ))
            .is_some()
                && parse_op(op).is_some()
                && value.parse::<f64>().is_ok()
        }
        _ => false,
    }
}

fn eval_atom(atom: &[&str], ctx: &DslContext) -> bool {
    match atom {
        ["business", "hours"] => is_business_hours(ctx.time_of_day),
        ["after", "hours"] => !is_business_hours(ctx.time_of_day),
        ["weekend"] => is_weekend(ctx.weekday),
        ["weekday"] => !is_weekend(ctx.weekday),
        ["user", role] => ctx
            .user_role
            .as_deref()
            .is_some_and(|r| r.eq_ignore_ascii_case(role)),
        ["contains", "violations"] => !ctx.violations.is_empty(),
        ["violations", "count", op, n] => match (parse_op(op), n.parse::<f64>()) {
            (Some(op), Ok(n)) => op.compare(ctx.violations.len() as f64, n),
            _ => false,
        },
        [metric, op, value] => {
            match (
                metric_value_by_name(metric, ctx),
                parse_op(op),
                value.parse::<f64>(),
            ) {
                (Some(left), Some(op), Ok(right)) => op.compare(left, right),
                _ => false,
            }
        }
        _ => false,
    }
}

fn metric_value_by_name(name: &str, ctx: &DslContext) -> Option<f64> {
    match name {
        "toxicity" => Some(ctx.scores.toxicity),
        "policycompliance" | "compliance" => Some(ctx.scores.policy_compliance),
        "factualaccuracy" | "accuracy" => Some(ctx.scores.factual_accuracy),
        "brandalignment" | "brand" => Some(ctx.scores.brand_alignment),
        "overall" => Some(ctx.scores.overall),
        "confidence" => Some(ctx.confidence),
        _ => None,
    }
}

fn parse_op(raw: &str) -> Option<CmpOperator> {
    match raw {
        "<" => Some(CmpOperator::Lt),
        "<=" => Some(CmpOperator::Le),
        ">" => Some(CmpOperator::Gt),
        ">=" => Some(CmpOperator::Ge),
        "=" | "==" => Some(CmpOperator::Eq),
        "!=" => Some(CmpOperator::Ne),
        _ => None,
    }
}

fn is_business_hours(time: NaiveTime) -> bool {
    let start = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
    let end = NaiveTime::from_hms_opt(17, 0, 0).unwrap();
    time >= start && time < end
}

fn is_weekend(weekday: Weekday) -> bool {
    matches!(weekday, Weekday::Sat | Weekday::Sun)
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_common::types::Severity;

    fn ctx() -> DslContext {
        DslContext {
            scores: EvaluationScores::new(0.2, 0.9, 0.5, 0.8),
            confidence: 0.85,
            violations: vec![Violation {
                violation_type: "toxic_content".into(),
                severity: Severity::High,
                message: "toxic content detected".into(),
                confidence: 0.9,
                location: None,
                suggestions: Vec::new(),
            }],
            time_of_day: NaiveTime::from_hms_opt(10, 30, 0).unwrap(),
            weekday: Weekday::Wed,
            user_role: Some("admin".into()),
        }
    }

    #[test]
    fn test_score_comparisons() {
        let ctx = ctx();
        assert!(evaluate("toxicity < 0.3", &ctx));
        assert!(!evaluate("toxicity < 0.2", &ctx)); // strict as written
        assert!(evaluate("toxicity <= 0.2", &ctx));
        assert!(evaluate("compliance >= 0.9", &ctx));
        assert!(evaluate("accuracy == 0.5", &ctx));
        assert!(evaluate("brand != 0.5", &ctx));
        assert!(evaluate("confidence > 0.8", &ctx));
    }

    #[test]
    fn test_metric_aliases() {
        let ctx = ctx();
        assert!(evaluate("policyCompliance > 0.8", &ctx));
        assert!(evaluate("factualAccuracy = 0.5", &ctx));
        assert!(evaluate("brandAlignment > 0.7", &ctx));
    }

    #[test]
    fn test_violation_predicates() {
        let ctx = ctx();
        assert!(evaluate("contains violations", &ctx));
        assert!(evaluate("violations count >= 1", &ctx));
        assert!(!evaluate("violations count > 1", &ctx));
    }

    #[test]
    fn test_time_predicates() {
        let ctx = ctx();
        assert!(evaluate("business hours", &ctx));
        assert!(!evaluate("after hours", &ctx));
        assert!(evaluate("weekday", &ctx));
        assert!(!evaluate("weekend", &ctx));

        let mut evening = ctx.clone();
        evening.time_of_day = NaiveTime::from_hms_opt(17, 0, 0).unwrap();
        assert!(evaluate("after hours", &evening)); // 17:00 is already after
    }

    #[test]
    fn test_user_predicates() {
        let ctx = ctx();
        assert!(evaluate("user admin", &ctx));
        assert!(!evaluate("user guest", &ctx));

        let mut anonymous = ctx.clone();
        anonymous.user_role = None;
        assert!(!evaluate("user admin", &anonymous));
    }

    #[test]
    fn test_and_binds_tighter_than_or() {
        let ctx = ctx();
        // weekend and toxicity < 0.3 → false; left branch true.
        assert!(evaluate("business hours or weekend and toxicity > 0.9", &ctx));
        // (toxicity > 0.9 and business hours) or weekend → false.
        assert!(!evaluate("toxicity > 0.9 and business hours or weekend", &ctx));
    }

    #[test]
    fn test_malformed_conditions_are_false() {
        let ctx = ctx();
        assert!(!evaluate("", &ctx));
        assert!(!evaluate("garbage", &ctx));
        assert!(!evaluate("toxicity <", &ctx));
        assert!(!evaluate("unknownmetric > 0.5", &ctx));
        assert!(!evaluate("toxicity >> 0.5", &ctx));
        assert!(!evaluate("toxicity > abc", &ctx));
    }

    #[test]
    fn test_case_insensitive() {
        let ctx = ctx();
        assert!(evaluate("TOXICITY < 0.3 AND Business Hours", &ctx));
    }

    #[test]
    fn test_recognizable_triage() {
        assert!(is_recognizable("toxicity < 0.5"));
        assert!(is_recognizable("business hours and user admin"));
        assert!(!is_recognizable("complete nonsense here"));
        assert!(!is_recognizable(""));
    }
}
