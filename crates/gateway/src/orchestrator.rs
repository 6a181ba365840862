use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use aegis_common::config::SystemConfig;
use aegis_common::types::{
    AuditInfo, ChatMessage, ChatRole, Choice, FinishReason, LlmRequest, LlmResponse, PolicyAction,
};
use aegis_common::{GatewayError, OrgId, RequestId, Result};

use crate::alerts::{
    MetricsBuffer, METRIC_BLOCKED_COUNT, METRIC_EVALUATION_FAILURE_RATE, METRIC_LATENCY_MS,
    METRIC_VIOLATION_RATE,
};
use crate::audit::{AuditLog, CompletionRecord};
use crate::auth::AuthContext;
use crate::evaluators::{EvaluationContext, EvaluatorMesh};
use crate::policy::dsl::DslContext;
use crate::policy::{PolicyContext, PolicyEngine};
use crate::providers::ProviderRateLimiter;
use crate::relay::ProviderRelay;
use crate::retrieval::{ContextRetriever, SearchOptions};
use crate::webhooks::{events, WebhookDispatcher};

/// Wires every subsystem into the per-request pipeline and enforces the
/// request deadline.
pub struct Orchestrator {
    relay: Arc<ProviderRelay>,
    retriever: Arc<ContextRetriever>,
    mesh: Arc<EvaluatorMesh>,
    policy: Arc<PolicyEngine>,
    audit: Arc<AuditLog>,
    webhooks: Arc<WebhookDispatcher>,
    metrics: Arc<MetricsBuffer>,
    config: Arc<SystemConfig>,
    /// Back-pressure: requests beyond this are rejected, not queued.
    in_flight: Arc<tokio::sync::Semaphore>,
    /// Per-tenant request quota buckets. std Mutex — never held across
    /// await points.
    tenant_limits: Mutex<HashMap<OrgId, Arc<ProviderRateLimiter>>>,
}

struct StageOutcome {
    response: LlmResponse,
    original_content: String,
    action: PolicyAction,
    evaluation: crate::evaluators::MeshEvaluation,
    applied_rules: Vec<String>,
    documents_used: Vec<String>,
    cached: bool,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        relay: Arc<ProviderRelay>,
        retriever: Arc<ContextRetriever>,
        mesh: Arc<EvaluatorMesh>,
        policy: Arc<PolicyEngine>,
        audit: Arc<AuditLog>,
        webhooks: Arc<WebhookDispatcher>,
        metrics: Arc<MetricsBuffer>,
        config: Arc<SystemConfig>,
    ) -> Self {
        let max_in_flight = config.server.max_in_flight_requests;
        Self {
            relay,
            retriever,
            mesh,
            policy,
            audit,
            webhooks,
            metrics,
            config,
            in_flight: Arc::new(tokio::sync::Semaphore::new(max_in_flight)),
            tenant_limits: Mutex::new(HashMap::new()),
        }
    }

    fn tenant_limiter(&self, org_id: &OrgId) -> Arc<ProviderRateLimiter> {
        let mut limits = self.tenant_limits.lock().unwrap();
        Arc::clone(limits.entry(org_id.clone()).or_insert_with(|| {
            Arc::new(ProviderRateLimiter::new(
                self.config.limits.requests_per_minute,
                u32::MAX,
            ))
        }))
    }

    /// The full request pipeline. Returns the response the caller gets;
    /// BLOCK is a normal terminal state, not an error.
    pub async fn handle_chat(
        &self,
        auth: &AuthContext,
        request: LlmRequest,
        return_audit: bool,
    ) -> Result<LlmResponse> {
        let start = std::time::Instant::now();
        request.validate()?;

        // Shed load instead of queueing unboundedly.
        let _permit = self
            .in_flight
            .clone()
            .try_acquire_owned()
            .map_err(|_| GatewayError::ServerBusy)?;

        if let Err(wait) = self.tenant_limiter(&auth.org_id).try_acquire(0) {
            return Err(GatewayError::RateLimited {
                retry_after: Some(wait.as_secs().max(1)),
            });
        }

        let request_id = RequestId::new();

        // The audit invariant: no pipeline work before the REQUEST entry
        // is durable. Failure here fails the request closed.
        self.audit
            .log_request(request_id, &auth.org_id, &request, Some(&auth.user_id))
            .await?;

        let deadline = Duration::from_secs(self.config.server.request_deadline_seconds);
        let staged = tokio::time::timeout(deadline, self.run_stages(auth, &request)).await;

        let outcome = match staged {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(error)) => {
                self.record_failure(request_id, auth, &error).await;
                return Err(error);
            }
            Err(_) => {
                let error = GatewayError::Deadline(format!(
                    "request exceeded {}s deadline",
                    deadline.as_secs()
                ));
                self.record_failure(request_id, auth, &error).await;
                return Err(error);
            }
        };

        let latency_ms = start.elapsed().as_millis() as u64;

        // Terminal audit entry must be durable before webhooks fire.
        self.audit
            .log_complete(
                request_id,
                CompletionRecord {
                    org_id: &auth.org_id,
                    user_id: Some(&auth.user_id),
                    request: &request,
                    original_response: &outcome.original_content,
                    final_response: outcome.response.primary_content(),
                    action: outcome.action,
                    scores: &outcome.evaluation.scores,
                    violations: &outcome.evaluation.violations,
                    applied_rules: &outcome.applied_rules,
                    latency_ms,
                    documents_used: outcome.documents_used.clone(),
                    cached: outcome.cached,
                },
            )
            .await?;

        self.record_metrics(&auth.org_id, &outcome, latency_ms);

        let event = events::pipeline_event(
            &auth.org_id,
            request_id,
            outcome.action,
            &outcome.evaluation.scores,
            &outcome.evaluation.violations,
            &outcome.applied_rules,
        );
        if let Err(e) = self.webhooks.dispatch(event).await {
            // Fan-out is best-effort; the audit record already exists.
            tracing::warn!(error = %e, "Webhook dispatch failed");
        }

        let mut response = outcome.response;
        if return_audit {
            response.audit_info = Some(AuditInfo {
                request_id: request_id.to_string(),
                action: outcome.action,
                scores: outcome.evaluation.scores,
                violation_count: outcome.evaluation.violations.len(),
                applied_rules: outcome.applied_rules,
                cached: outcome.cached,
            });
        }

        metrics::histogram!("gateway.request.latency").record(start.elapsed().as_secs_f64());
        Ok(response)
    }

    /// Provider call (through cache/dedup/breaker) concurrent with context
    /// retrieval, then evaluation, then policy.
    async fn run_stages(&self, auth: &AuthContext, request: &LlmRequest) -> Result<StageOutcome> {
        let query = request.latest_user_content().to_string();

        let (relay_result, retrieval_result) = tokio::join!(
            self.relay.execute(&auth.org_id, request),
            self.retriever
                .search(&auth.org_id, &query, SearchOptions::default()),
        );

        let relayed = relay_result?;
        // Retrieval is best-effort: an empty context degrades evaluation
        // quality, never availability.
        let documents = retrieval_result.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Context retrieval failed");
            Vec::new()
        });
        let documents_used: Vec<String> =
            documents.iter().map(|d| d.document.id.to_string()).collect();

        let mut response = relayed.response;
        let original_content = response.primary_content().to_string();

        let policy_ctx = PolicyContext::now(
            auth.org_id.clone(),
            Some(auth.user_id.clone()),
            Some(auth.role.clone()),
        );
        let trigger_ctx = DslContext::pre_evaluation(
            policy_ctx.time_of_day,
            policy_ctx.weekday,
            policy_ctx.user_role.clone(),
        );

        let evaluation = self
            .mesh
            .evaluate(
                EvaluationContext {
                    org_id: auth.org_id.clone(),
                    prompt: query,
                    response: original_content.clone(),
                    documents,
                },
                &trigger_ctx,
            )
            .await;

        let decision = self
            .policy
            .decide(
                evaluation.preview_action,
                &original_content,
                &evaluation.scores,
                &evaluation.violations,
                evaluation.confidence,
                &policy_ctx,
            )
            .await?;

        apply_action(&mut response, decision.action, decision.rewrite.as_deref());

        Ok(StageOutcome {
            response,
            original_content,
            action: decision.action,
            evaluation,
            applied_rules: decision.applied_rules,
            documents_used,
            cached: relayed.cached,
        })
    }

    async fn record_failure(&self, request_id: RequestId, auth: &AuthContext, error: &GatewayError) {
        // Terminal ERROR entry; if even that fails there is nothing left
        // to do but log.
        if let Err(audit_error) = self
            .audit
            .log_error(request_id, &auth.org_id, Some(&auth.user_id), error)
            .await
        {
            tracing::error!(error = %audit_error, "Failed to audit pipeline error");
        }
        metrics::counter!("gateway.request.errors").increment(1);
    }

    fn record_metrics(&self, org_id: &OrgId, outcome: &StageOutcome, latency_ms: u64) {
        self.metrics.record(
            org_id,
            METRIC_VIOLATION_RATE,
            if outcome.evaluation.violations.is_empty() {
                0.0
            } else {
                1.0
            },
        );
        if outcome.action == PolicyAction::Block {
            self.metrics.record(org_id, METRIC_BLOCKED_COUNT, 1.0);
        }
        self.metrics.record(
            org_id,
            METRIC_EVALUATION_FAILURE_RATE,
            if outcome.evaluation.failed_evaluators > 0 {
                1.0
            } else {
                0.0
            },
        );
        self.metrics.record(org_id, METRIC_LATENCY_MS, latency_ms as f64);
    }
}

/// Mutate the provider response per the final action.
fn apply_action(response: &mut LlmResponse, action: PolicyAction, rewrite: Option<&str>) {
    match action {
        PolicyAction::Block => {
            // Blocked responses reach the caller with the content stripped.
            if response.choices.is_empty() {
                response.choices.push(Choice {
                    index: 0,
                    message: ChatMessage {
                        role: ChatRole::Assistant,
                        content: String::new(),
                    },
                    finish_reason: FinishReason::ContentFilter,
                });
            } else {
                response.set_primary_content(String::new());
                if let Some(choice) = response.choices.first_mut() {
                    choice.finish_reason = FinishReason::ContentFilter;
                }
            }
        }
        PolicyAction::Rewrite => {
            if let Some(rewrite) = rewrite {
                response.set_primary_content(rewrite.to_string());
            }
        }
        PolicyAction::Flag | PolicyAction::Pass => {}
    }
}
