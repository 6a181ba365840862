mod accuracy;
mod brand;
mod compliance;
pub mod plugins;
pub mod scoring;
mod toxicity;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use aegis_common::config::EvaluatorsConfig;
use aegis_common::types::{
    EvaluationScores, PolicyAction, RetrievedDocument, Severity, Violation,
};
use aegis_common::{OrgId, Result};

use crate::policy::dsl::{self, DslContext};

pub use accuracy::AccuracyEvaluator;
pub use brand::BrandEvaluator;
pub use compliance::ComplianceEvaluator;
pub use toxicity::ToxicityEvaluator;

/// Violation text that forces a BLOCK preview regardless of scores.
const CRITICAL_KEYWORDS: &[&str] = &["toxic", "harmful", "illegal", "discriminatory"];

/// Violation text that suggests the response needs a rewrite.
const MAJOR_KEYWORDS: &[&str] = &[
    "inaccurate",
    "misleading",
    "unsupported",
    "non-compliant",
    "inappropriate",
    "off-brand",
];

/// Everything an evaluator may look at for one request.
pub struct EvaluationContext {
    pub org_id: OrgId,
    pub prompt: String,
    pub response: String,
    pub documents: Vec<RetrievedDocument>,
}

/// A single evaluator's output.
pub struct EvaluatorVerdict {
    /// In [0,1], 1 = safe/good.
    pub score: f64,
    pub violations: Vec<Violation>,
}

/// Which aggregate score slot an evaluator feeds. Auxiliary evaluators
/// (plugins) contribute violations and confidence spread only.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScoreDimension {
    Toxicity,
    PolicyCompliance,
    FactualAccuracy,
    BrandAlignment,
    Auxiliary,
}

/// A scoring component in the mesh. Object-safe via boxed futures; the
/// context rides in an Arc so implementations can be spawned as tasks.
pub trait Evaluator: Send + Sync {
    fn id(&self) -> &str;

    fn dimension(&self) -> ScoreDimension;

    /// Violation ordering weight, 1-10.
    fn priority(&self) -> u8;

    /// DSL condition controlling whether this evaluator runs; None = always.
    fn trigger(&self) -> Option<&str> {
        None
    }

    fn evaluate(
        &self,
        ctx: Arc<EvaluationContext>,
    ) -> Pin<Box<dyn Future<Output = Result<EvaluatorVerdict>> + Send>>;
}

/// Aggregated mesh output, before the policy engine has its say.
pub struct MeshEvaluation {
    pub scores: EvaluationScores,
    /// Sorted by (evaluator priority desc, insertion order).
    pub violations: Vec<Violation>,
    pub confidence: f64,
    /// The mesh's preliminary action; the policy engine may override.
    pub preview_action: PolicyAction,
    /// How many evaluators crashed or timed out into the neutral result.
    pub failed_evaluators: usize,
}

/// The parallel evaluator bank. Settle-all semantics: a failing evaluator
/// contributes a neutral defaulted result and never aborts its peers.
pub struct EvaluatorMesh {
    evaluators: Vec<Arc<dyn Evaluator>>,
    timeout: Duration,
}

impl EvaluatorMesh {
    /// Mesh with the four built-in evaluators plus any plugins found in the
    /// configured plugin directory.
    pub fn with_builtins(config: &EvaluatorsConfig) -> Self {
        let mut mesh = Self {
            evaluators: vec![
                Arc::new(ToxicityEvaluator),
                Arc::new(ComplianceEvaluator),
                Arc::new(AccuracyEvaluator),
                Arc::new(BrandEvaluator),
            ],
            timeout: Duration::from_secs(config.timeout_seconds),
        };

        if let Some(ref dir) = config.plugin_dir {
            for evaluator in plugins::load_plugins(std::path::Path::new(dir)) {
                mesh.register(evaluator);
            }
        }

        mesh
    }

    #[cfg(test)]
    pub fn bare(timeout: Duration) -> Self {
        Self {
            evaluators: Vec::new(),
            timeout,
        }
    }

    pub fn register(&mut self, evaluator: Arc<dyn Evaluator>) {
        self.evaluators.push(evaluator);
    }

    /// Run every triggered evaluator concurrently and aggregate.
    pub async fn evaluate(
        &self,
        ctx: EvaluationContext,
        trigger_ctx: &DslContext,
    ) -> MeshEvaluation {
        let start = std::time::Instant::now();
        let ctx = Arc::new(ctx);

        // Dispatch. Skipped evaluators leave their dimension at the
        // missing-value default of 1.0.
        let mut tasks = Vec::new();
        for evaluator in &self.evaluators {
            if let Some(trigger) = evaluator.trigger() {
                if !dsl::evaluate(trigger, trigger_ctx) {
                    continue;
                }
            }

            let id = evaluator.id().to_string();
            let dimension = evaluator.dimension();
            let priority = evaluator.priority();
            let future = evaluator.evaluate(Arc::clone(&ctx));
            let timeout = self.timeout;

            tasks.push((
                id,
                dimension,
                priority,
                tokio::spawn(async move { tokio::time::timeout(timeout, future).await }),
            ));
        }

        // Settle all: every task resolves to a verdict, defaulted on
        // timeout, error, or panic.
        let mut settled = Vec::with_capacity(tasks.len());
        let mut failed = 0usize;

        for (id, dimension, priority, handle) in tasks {
            let verdict = match handle.await {
                Ok(Ok(Ok(verdict))) => verdict,
                Ok(Ok(Err(e))) => {
                    tracing::warn!(evaluator = id.as_str(), error = %e, "Evaluator failed");
                    failed += 1;
                    neutral_verdict(&id, "evaluator error")
                }
                Ok(Err(_)) => {
                    tracing::warn!(evaluator = id.as_str(), "Evaluator timed out");
                    failed += 1;
                    neutral_verdict(&id, "evaluator timed out")
                }
                Err(e) => {
                    tracing::error!(evaluator = id.as_str(), error = %e, "Evaluator panicked");
                    failed += 1;
                    neutral_verdict(&id, "evaluator crashed")
                }
            };
            settled.push((dimension, priority, verdict));
        }

        let evaluation = aggregate(settled, failed);

        metrics::histogram!("evaluators.mesh.latency").record(start.elapsed().as_secs_f64());
        metrics::histogram!("evaluators.mesh.violations")
            .record(evaluation.violations.len() as f64);
        if failed > 0 {
            metrics::counter!("evaluators.mesh.failures").increment(failed as u64);
        }

        evaluation
    }
}

fn neutral_verdict(evaluator_id: &str, reason: &str) -> EvaluatorVerdict {
    EvaluatorVerdict {
        score: 0.5,
        violations: vec![Violation {
            violation_type: "evaluation_error".into(),
            severity: Severity::Medium,
            message: format!("{}: {}", evaluator_id, reason),
            confidence: 0.5,
            location: None,
            suggestions: Vec::new(),
        }],
    }
}

fn aggregate(
    settled: Vec<(ScoreDimension, u8, EvaluatorVerdict)>,
    failed_evaluators: usize,
) -> MeshEvaluation {
    // Missing dimensions default to the safe 1.0; multiple evaluators on
    // one dimension keep the most conservative score.
    let mut toxicity = 1.0f64;
    let mut compliance = 1.0f64;
    let mut accuracy = 1.0f64;
    let mut brand = 1.0f64;

    let mut all_scores = Vec::with_capacity(settled.len());
    let mut ordered: Vec<(u8, usize, Violation)> = Vec::new();

    for (index, (dimension, priority, verdict)) in settled.into_iter().enumerate() {
        all_scores.push(verdict.score);
        match dimension {
            ScoreDimension::Toxicity => toxicity = toxicity.min(verdict.score),
            ScoreDimension::PolicyCompliance => compliance = compliance.min(verdict.score),
            ScoreDimension::FactualAccuracy => accuracy = accuracy.min(verdict.score),
            ScoreDimension::BrandAlignment => brand = brand.min(verdict.score),
            ScoreDimension::Auxiliary => {}
        }
        for violation in verdict.violations {
            ordered.push((priority, index, violation));
        }
    }

    ordered.sort_by_key(|(priority, index, _)| (std::cmp::Reverse(*priority), *index));
    let violations: Vec<Violation> = ordered.into_iter().map(|(_, _, v)| v).collect();

    let scores = EvaluationScores::new(toxicity, compliance, accuracy, brand);

    let confidence = (1.0 - 2.0 * scoring::variance(&all_scores) - 0.1 * violations.len() as f64)
        .max(0.1)
        .clamp(0.0, 1.0);

    let preview_action = preview_action(&scores, &violations);

    MeshEvaluation {
        scores,
        violations,
        confidence,
        preview_action,
        failed_evaluators,
    }
}

/// The mesh's preliminary action. The policy engine may strengthen,
/// downgrade, or replace it.
fn preview_action(scores: &EvaluationScores, violations: &[Violation]) -> PolicyAction {
    let text_contains = |keywords: &[&str]| {
        violations.iter().any(|v| {
            let text = v.message.to_lowercase();
            let kind = v.violation_type.to_lowercase();
            keywords.iter().any(|k| text.contains(k) || kind.contains(k))
        })
    };

    if scores.toxicity < 0.3 || text_contains(CRITICAL_KEYWORDS) {
        PolicyAction::Block
    } else if scores.overall < 0.6 || text_contains(MAJOR_KEYWORDS) {
        PolicyAction::Rewrite
    } else {
        PolicyAction::Pass
    }
}
