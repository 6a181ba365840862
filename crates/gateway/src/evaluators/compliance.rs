use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use aegis_common::types::{Severity, TextSpan, Violation};
use aegis_common::Result;

use super::scoring::{clamp01, hit_violation, scan_terms, term, Term};
use super::{EvaluationContext, Evaluator, EvaluatorVerdict, ScoreDimension};

/// Policy-sensitive phrasing: disclosure of internal material, advice the
/// tenant is not licensed to give.
const LEXICON: &[Term] = &[
    term("confidential", 0.3, Severity::High),
    term("internal only", 0.35, Severity::High),
    term("trade secret", 0.35, Severity::High),
    term("do not share", 0.3, Severity::Medium),
    term("medical advice", 0.25, Severity::Medium),
    term("legal advice", 0.25, Severity::Medium),
    term("guaranteed returns", 0.4, Severity::High),
    term("insider", 0.3, Severity::High),
];

/// Digit-shaped identifiers that must never leave the tenant boundary.
/// `#` matches any ASCII digit, other characters match literally.
const IDENTIFIER_PATTERNS: &[(&str, &str)] = &[
    ("###-##-####", "social security number"),
    ("####-####-####-####", "payment card number"),
    ("#########", "routing or account number"),
];

/// Scores regulatory and data-handling compliance of the response.
pub struct ComplianceEvaluator;

impl Evaluator for ComplianceEvaluator {
    fn id(&self) -> &str {
        "policy_compliance"
    }

    fn dimension(&self) -> ScoreDimension {
        ScoreDimension::PolicyCompliance
    }

    fn priority(&self) -> u8 {
        8
    }

    fn evaluate(
        &self,
        ctx: Arc<EvaluationContext>,
    ) -> Pin<Box<dyn Future<Output = Result<EvaluatorVerdict>> + Send>> {
        Box::pin(async move {
            let mut violations: Vec<Violation> = Vec::new();
            let mut penalty = 0.0;

            for hit in scan_terms(&ctx.response, LEXICON) {
                penalty += hit.entry.penalty;
                violations.push(hit_violation(
                    "policy_violation",
                    &hit,
                    format!("non-compliant phrasing: \"{}\"", hit.entry.term),
                    vec!["remove or rephrase the flagged passage".to_string()],
                ));
            }

            for (pattern, label) in IDENTIFIER_PATTERNS {
                for span in find_digit_pattern(&ctx.response, pattern) {
                    penalty += 0.5;
                    violations.push(Violation {
                        violation_type: "pii_disclosure".into(),
                        severity: Severity::Critical,
                        message: format!("possible {} in response", label),
                        confidence: 0.8,
                        location: Some(span),
                        suggestions: vec!["redact the identifier".to_string()],
                    });
                }
            }

            Ok(EvaluatorVerdict {
                score: clamp01(1.0 - penalty),
                violations,
            })
        })
    }
}

/// Find occurrences of a digit-shape pattern (`#` = digit, else literal).
/// Matches must not be embedded in a longer digit run.
fn find_digit_pattern(text: &str, pattern: &str) -> Vec<TextSpan> {
    let bytes = text.as_bytes();
    let pattern_bytes = pattern.as_bytes();
    let mut spans = Vec::new();

    if pattern_bytes.is_empty() || bytes.len() < pattern_bytes.len() {
        return spans;
    }

    let mut i = 0;
    while i + pattern_bytes.len() <= bytes.len() {
        let window = &bytes[i..i + pattern_bytes.len()];
        let matched = window.iter().zip(pattern_bytes.iter()).all(|(&b, &p)| {
            if p == b'#' {
                b.is_ascii_digit()
            } else {
                b == p
            }
        });

        let digit_before = i > 0 && bytes[i - 1].is_ascii_digit();
        let end = i + pattern_bytes.len();
        let digit_after = end < bytes.len() && bytes[end].is_ascii_digit();

        if matched && !digit_before && !digit_after {
            spans.push(TextSpan { start: i, end });
            i = end;
        } else {
            i += 1;
        }
    }

    spans
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_common::OrgId;

    fn ctx(response: &str) -> Arc<EvaluationContext> {
        Arc::new(EvaluationContext {
            org_id: OrgId::new("acme"),
            prompt: "prompt".into(),
            response: response.into(),
            documents: Vec::new(),
        })
    }

    #[tokio::test]
    async fn test_clean_response_compliant() {
        let verdict = ComplianceEvaluator
            .evaluate(ctx("Our office hours are nine to five."))
            .await
            .unwrap();
        assert_eq!(verdict.score, 1.0);
        assert!(verdict.violations.is_empty());
    }

    #[tokio::test]
    async fn test_ssn_shape_is_critical() {
        let verdict = ComplianceEvaluator
            .evaluate(ctx("The SSN on file is 123-45-6789."))
            .await
            .unwrap();
        assert!(verdict.score <= 0.5);
        assert_eq!(verdict.violations.len(), 1);
        assert_eq!(verdict.violations[0].severity, Severity::Critical);
        assert_eq!(verdict.violations[0].violation_type, "pii_disclosure");
    }

    #[tokio::test]
    async fn test_disclosure_phrases_flagged() {
        let verdict = ComplianceEvaluator
            .evaluate(ctx("This is confidential, do not share it."))
            .await
            .unwrap();
        assert!(verdict.score < 1.0);
        assert_eq!(verdict.violations.len(), 2);
    }

    #[test]
    fn test_digit_pattern_boundaries() {
        // Embedded in a longer digit run — not a match.
        assert!(find_digit_pattern("1234-45-67890", "###-##-####").is_empty());
        assert_eq!(
            find_digit_pattern("id 123-45-6789 end", "###-##-####"),
            vec![TextSpan { start: 3, end: 14 }]
        );
    }
}
