use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use aegis_common::types::{Severity, Violation};
use aegis_common::Result;

use super::scoring::{clamp01, hit_violation, scan_terms, term, Term};
use super::{EvaluationContext, Evaluator, EvaluatorVerdict, ScoreDimension};

/// Phrasing that clashes with a professional brand voice.
const LEXICON: &[Term] = &[
    term("lol", 0.15, Severity::Low),
    term("lmao", 0.2, Severity::Low),
    term("whatever", 0.1, Severity::Low),
    term("damn", 0.2, Severity::Medium),
    term("sucks", 0.25, Severity::Medium),
    term("crap", 0.25, Severity::Medium),
    term("cheap knockoff", 0.3, Severity::Medium),
    term("our competitor", 0.2, Severity::Low),
];

/// Scores tone and voice alignment of the response.
pub struct BrandEvaluator;

impl Evaluator for BrandEvaluator {
    fn id(&self) -> &str {
        "brand_alignment"
    }

    fn dimension(&self) -> ScoreDimension {
        ScoreDimension::BrandAlignment
    }

    fn priority(&self) -> u8 {
        4
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
                    "off_brand",
                    &hit,
                    format!("off-brand phrasing: \"{}\"", hit.entry.term),
                    vec!["rephrase in a professional tone".to_string()],
                ));
            }

            // Shouting: a mostly-uppercase response is off-voice even
            // without any lexicon hit.
            let shout = shouting_ratio(&ctx.response);
            if shout > 0.5 {
                penalty += 0.3;
                violations.push(Violation {
                    violation_type: "off_brand".into(),
                    severity: Severity::Low,
                    message: "excessive capitalization".into(),
                    confidence: 0.6,
                    location: None,
                    suggestions: vec!["use sentence case".to_string()],
                });
            }

            Ok(EvaluatorVerdict {
                score: clamp01(1.0 - penalty),
                violations,
            })
        })
    }
}

/// Uppercase share of alphabetic characters.
fn shouting_ratio(text: &str) -> f64 {
    let letters: Vec<char> = text.chars().filter(|c| c.is_alphabetic()).collect();
    if letters.len() < 12 {
        return 0.0;
    }
    letters.iter().filter(|c| c.is_uppercase()).count() as f64 / letters.len() as f64
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
    async fn test_professional_tone_scores_one() {
        let verdict = BrandEvaluator
            .evaluate(ctx("Thank you for reaching out. Here is the summary."))
            .await
            .unwrap();
        assert_eq!(verdict.score, 1.0);
    }

    #[tokio::test]
    async fn test_slang_penalized() {
        let verdict = BrandEvaluator
            .evaluate(ctx("lol whatever, that product sucks"))
            .await
            .unwrap();
        assert!(verdict.score < 0.6);
        assert_eq!(verdict.violations.len(), 3);
    }

    #[tokio::test]
    async fn test_shouting_detected() {
        let verdict = BrandEvaluator
            .evaluate(ctx("BUY OUR PRODUCT RIGHT NOW TODAY"))
            .await
            .unwrap();
        assert!(verdict.score <= 0.7);
        assert!(verdict
            .violations
            .iter()
            .any(|v| v.message.contains("capitalization")));
    }
}
