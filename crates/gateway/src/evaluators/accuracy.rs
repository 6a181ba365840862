use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use aegis_common::types::{Severity, Violation};
use aegis_common::Result;

use super::scoring::{clamp01, content_words, scan_terms, term, Term};
use super::{EvaluationContext, Evaluator, EvaluatorVerdict, ScoreDimension};

/// Overconfident phrasing that tends to accompany unsupported claims.
const CERTAINTY_MARKERS: &[Term] = &[
    term("definitely", 0.1, Severity::Low),
    term("guaranteed", 0.15, Severity::Medium),
    term("always", 0.08, Severity::Low),
    term("never", 0.08, Severity::Low),
    term("100%", 0.15, Severity::Medium),
    term("certainly", 0.1, Severity::Low),
    term("undeniable", 0.12, Severity::Medium),
];

/// Scores factual grounding of the response against the retrieved tenant
/// context. With no context available only the overconfidence heuristics
/// apply.
pub struct AccuracyEvaluator;

impl Evaluator for AccuracyEvaluator {
    fn id(&self) -> &str {
        "factual_accuracy"
    }

    fn dimension(&self) -> ScoreDimension {
        ScoreDimension::FactualAccuracy
    }

    fn priority(&self) -> u8 {
        6
    }

    fn evaluate(
        &self,
        ctx: Arc<EvaluationContext>,
    ) -> Pin<Box<dyn Future<Output = Result<EvaluatorVerdict>> + Send>> {
        Box::pin(async move {
            let mut violations: Vec<Violation> = Vec::new();
            let mut penalty = 0.0;

            for hit in scan_terms(&ctx.response, CERTAINTY_MARKERS) {
                penalty += hit.entry.penalty;
                violations.push(Violation {
                    violation_type: "factual_accuracy".into(),
                    severity: hit.entry.severity,
                    message: format!(
                        "overconfident phrasing: \"{}\"",
                        hit.entry.term
                    ),
                    confidence: 0.6,
                    location: Some(hit.span),
                    suggestions: vec!["hedge or cite a source".to_string()],
                });
            }

            // Grounding check: share of response content words present in
            // the retrieved context. Only meaningful when context exists.
            if !ctx.documents.is_empty() {
                let support = context_support(&ctx.response, &ctx);
                if support < 0.3 {
                    penalty += 0.4;
                    violations.push(Violation {
                        violation_type: "factual_accuracy".into(),
                        severity: Severity::Medium,
                        message: "response is factually inaccurate or unsupported by tenant context"
                            .into(),
                        confidence: clamp01(0.5 + (0.3 - support)),
                        location: None,
                        suggestions: vec![
                            "restrict claims to the retrieved documents".to_string()
                        ],
                    });
                } else if support < 0.6 {
                    penalty += 0.15;
                }
            }

            Ok(EvaluatorVerdict {
                score: clamp01(1.0 - penalty),
                violations,
            })
        })
    }
}

/// Fraction of the response's content words that appear somewhere in the
/// retrieved context excerpts.
fn context_support(response: &str, ctx: &EvaluationContext) -> f64 {
    let response_words = content_words(response);
    if response_words.is_empty() {
        return 1.0;
    }

    let context_words: HashSet<String> = ctx
        .documents
        .iter()
        .flat_map(|d| content_words(&d.excerpt))
        .collect();

    let supported = response_words
        .iter()
        .filter(|w| context_words.contains(*w))
        .count();

    supported as f64 / response_words.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_common::types::{ContextDocument, RetrievedDocument, Sensitivity};
    use aegis_common::{DocumentId, OrgId};

    fn doc(excerpt: &str) -> RetrievedDocument {
        RetrievedDocument {
            document: ContextDocument {
                id: DocumentId::new(),
                org_id: OrgId::new("acme"),
                filename: "handbook.md".into(),
                department: None,
                sensitivity: Sensitivity::Internal,
                last_updated: chrono::Utc::now(),
            },
            excerpt: excerpt.into(),
            chunk_index: 0,
            score: 0.9,
            degraded: false,
        }
    }

    fn ctx(response: &str, documents: Vec<RetrievedDocument>) -> Arc<EvaluationContext> {
        Arc::new(EvaluationContext {
            org_id: OrgId::new("acme"),
            prompt: "prompt".into(),
            response: response.into(),
            documents,
        })
    }

    #[tokio::test]
    async fn test_hedged_answer_without_context_is_clean() {
        let verdict = AccuracyEvaluator
            .evaluate(ctx("The report suggests revenue grew last year.", vec![]))
            .await
            .unwrap();
        assert_eq!(verdict.score, 1.0);
    }

    #[tokio::test]
    async fn test_overconfident_phrasing_penalized() {
        let verdict = AccuracyEvaluator
            .evaluate(ctx(
                "This is definitely guaranteed to succeed, always.",
                vec![],
            ))
            .await
            .unwrap();
        assert!(verdict.score < 1.0);
        assert_eq!(verdict.violations.len(), 3);
    }

    #[tokio::test]
    async fn test_supported_response_scores_high() {
        let documents = vec![doc(
            "Vacation policy grants twenty days annually for employees.",
        )];
        let verdict = AccuracyEvaluator
            .evaluate(ctx(
                "Employees receive twenty vacation days annually.",
                documents,
            ))
            .await
            .unwrap();
        assert!(verdict.score >= 0.85);
        assert!(verdict.violations.is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_response_flagged() {
        let documents = vec![doc("Vacation policy grants twenty days annually.")];
        let verdict = AccuracyEvaluator
            .evaluate(ctx(
                "Our quantum widget teleports cargo across dimensions instantly.",
                documents,
            ))
            .await
            .unwrap();
        assert!(verdict.score <= 0.6);
        assert!(verdict
            .violations
            .iter()
            .any(|v| v.message.contains("factually inaccurate")));
    }
}
