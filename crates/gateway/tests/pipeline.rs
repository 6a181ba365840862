//! End-to-end pipeline tests against in-memory collaborators and a mock
//! provider adapter. No network, no external services.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use aegis_common::config::SystemConfig;
use aegis_common::types::{
    AuditEntryType, AuditQuery, ChatMessage, Choice, FinishReason, LlmRequest, LlmResponse,
    PolicyAction, Usage,
};
use aegis_common::{GatewayError, OrgId};

use aegis_gateway::alerts::MetricsBuffer;
use aegis_gateway::audit::AuditLog;
use aegis_gateway::auth::AuthContext;
use aegis_gateway::evaluators::EvaluatorMesh;
use aegis_gateway::orchestrator::Orchestrator;
use aegis_gateway::policy::PolicyEngine;
use aegis_gateway::providers::{
    ProviderAdapter, ProviderError, ProviderRegistry, ProviderType, RateLimitStatus,
};
use aegis_gateway::relay::{BreakerRegistry, ProviderRelay, ResponseCache};
use aegis_gateway::retrieval::{ContextRetriever, EmbeddingClient};
use aegis_gateway::store::{KeyValueStore, MemoryStore, MemoryVectorStore};
use aegis_gateway::webhooks::WebhookDispatcher;

/// Upstream stand-in: returns fixed content, counts calls, optional delay.
struct MockProvider {
    calls: AtomicU32,
    content: String,
    delay: Duration,
}

impl MockProvider {
    fn new(content: &str) -> Self {
        Self {
            calls: AtomicU32::new(0),
            content: content.into(),
            delay: Duration::from_millis(20),
        }
    }
}

impl ProviderAdapter for MockProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::OpenAi
    }

    fn call<'a>(
        &'a self,
        request: &'a LlmRequest,
    ) -> Pin<Box<dyn Future<Output = Result<LlmResponse, ProviderError>> + Send + 'a>> {
        let model = request.model.clone();
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(LlmResponse {
                id: "mock-response".into(),
                created: 1_700_000_000,
                model,
                choices: vec![Choice {
                    index: 0,
                    message: ChatMessage::assistant(self.content.clone()),
                    finish_reason: FinishReason::Stop,
                }],
                usage: Usage {
                    prompt_tokens: 10,
                    completion_tokens: 20,
                    total_tokens: 30,
                },
                audit_info: None,
            })
        })
    }

    fn health_check<'a>(&'a self) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        Box::pin(async { true })
    }

    fn rate_limit_status(&self) -> RateLimitStatus {
        RateLimitStatus {
            requests_remaining: 1000,
            tokens_remaining: 1_000_000,
            reset_at: chrono::Utc::now(),
        }
    }
}

struct Harness {
    orchestrator: Arc<Orchestrator>,
    audit: Arc<AuditLog>,
    webhooks: Arc<WebhookDispatcher>,
    provider: Arc<MockProvider>,
    policy: Arc<PolicyEngine>,
}

fn harness_with(provider: MockProvider, config: SystemConfig) -> Harness {
    let config = Arc::new(config);
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let provider = Arc::new(provider);

    let mut registry = ProviderRegistry::from_config(&config.providers, &config.retry);
    registry.register(
        vec!["gpt-".into()],
        Arc::clone(&provider) as Arc<dyn ProviderAdapter>,
    );

    let relay = Arc::new(ProviderRelay::new(
        registry,
        ResponseCache::in_memory(config.cache.ttl_seconds, config.cache.max_entries),
        BreakerRegistry::new(config.breaker.clone()),
    ));

    let embedding_config = aegis_common::config::EmbeddingConfig {
        api_key_env: "AEGIS_TEST_UNSET_EMBEDDING_KEY".into(),
        ..config.retrieval.embedding.clone()
    };
    let retriever = Arc::new(ContextRetriever::new(
        Arc::clone(&store),
        Arc::new(MemoryVectorStore::new()),
        Arc::new(EmbeddingClient::new(embedding_config, config.retry.clone())),
        config.retrieval.clone(),
    ));

    let mesh = Arc::new(EvaluatorMesh::with_builtins(&config.evaluators));
    let policy = Arc::new(PolicyEngine::new(Arc::clone(&store)));
    let audit = Arc::new(AuditLog::new(Arc::clone(&store), b"integration-test-key"));
    let webhooks = Arc::new(WebhookDispatcher::new(
        Arc::clone(&store),
        config.webhooks.clone(),
    ));
    let metrics = Arc::new(MetricsBuffer::new(60));

    let orchestrator = Arc::new(Orchestrator::new(
        relay,
        retriever,
        mesh,
        Arc::clone(&policy),
        Arc::clone(&audit),
        Arc::clone(&webhooks),
        metrics,
        config,
    ));

    Harness {
        orchestrator,
        audit,
        webhooks,
        provider,
        policy,
    }
}

fn harness(content: &str) -> Harness {
    harness_with(MockProvider::new(content), SystemConfig::default())
}

fn caller(org: &str) -> AuthContext {
    AuthContext {
        user_id: "user-1".into(),
        org_id: OrgId::new(org),
        role: "member".into(),
    }
}

fn request(content: &str) -> LlmRequest {
    LlmRequest {
        model: "gpt-4".into(),
        messages: vec![ChatMessage::user(content)],
        temperature: None,
        max_tokens: None,
        stream: None,
        user: None,
        metadata: None,
    }
}

#[tokio::test]
async fn test_clean_pass() {
    let harness = harness("Hello! Happy to help with that.");
    let auth = caller("acme");

    let response = harness
        .orchestrator
        .handle_chat(&auth, request("Hello"), true)
        .await
        .unwrap();

    assert_eq!(harness.provider.calls.load(Ordering::SeqCst), 1);
    assert_eq!(response.primary_content(), "Hello! Happy to help with that.");
    assert_eq!(response.choices[0].finish_reason, FinishReason::Stop);

    let audit_info = response.audit_info.unwrap();
    assert_eq!(audit_info.action, PolicyAction::Pass);
    assert_eq!(audit_info.violation_count, 0);

    // Exactly one REQUEST and one terminal PASS entry.
    let trail = harness
        .audit
        .get_audit_trail(&auth.org_id, &AuditQuery::default())
        .await
        .unwrap();
    assert_eq!(trail.len(), 2);
    assert_eq!(trail[0].entry_type, AuditEntryType::Request);
    assert_eq!(trail[1].entry_type, AuditEntryType::Pass);

    // The chain verifies end to end.
    assert!(harness.audit.verify_chain(&auth.org_id).await.unwrap().ok);

    // No webhook endpoints registered: nothing stored as failed either.
    assert!(harness
        .webhooks
        .failed_deliveries(&auth.org_id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_block_on_toxic_response() {
    // Toxic + non-compliant + off-brand + overconfident: the overall score
    // lands low enough that no business-hours override can downgrade it.
    let harness = harness(
        "I hate you, worthless idiot. kill them. This trade secret is confidential and \
         internal only, do not share. lol whatever, it sucks. definitely guaranteed \
         100% always never.",
    );
    let auth = caller("acme");

    let response = harness
        .orchestrator
        .handle_chat(&auth, request("Tell me something"), true)
        .await
        .unwrap();

    // Blocked responses are 200s with stripped content.
    assert_eq!(response.primary_content(), "");
    assert_eq!(
        response.choices[0].finish_reason,
        FinishReason::ContentFilter
    );
    let audit_info = response.audit_info.unwrap();
    assert_eq!(audit_info.action, PolicyAction::Block);
    assert!(audit_info.violation_count > 0);

    let trail = harness
        .audit
        .get_audit_trail(&auth.org_id, &AuditQuery::default())
        .await
        .unwrap();
    assert_eq!(trail.len(), 2);
    assert_eq!(trail[1].entry_type, AuditEntryType::Block);
}

#[tokio::test]
async fn test_block_dispatches_signed_webhook() {
    let harness = harness(
        "I hate you, worthless idiot. kill them. This trade secret is confidential and \
         internal only, do not share. lol whatever, it sucks. definitely guaranteed \
         100% always never.",
    );
    let auth = caller("acme");

    // Unroutable endpoint with no retries: the delivery fails fast and is
    // stored, which proves dispatch fired exactly once with the event.
    harness
        .webhooks
        .create_endpoint(aegis_common::types::WebhookEndpoint {
            id: aegis_common::EndpointId::new(),
            org_id: auth.org_id.clone(),
            url: "http://127.0.0.1:1/hook".into(),
            secret: "whsec_test".into(),
            events: vec![aegis_common::types::WebhookEventType::ContentBlocked],
            enabled: true,
            retry_config: aegis_common::types::RetryPolicy {
                max_retries: 0,
                backoff_multiplier: 2.0,
                max_backoff_seconds: 60,
            },
            headers: None,
        })
        .await
        .unwrap();

    harness
        .orchestrator
        .handle_chat(&auth, request("Tell me something"), false)
        .await
        .unwrap();

    // Delivery task runs in the background; wait for it to settle.
    let mut failed = Vec::new();
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        failed = harness.webhooks.failed_deliveries(&auth.org_id).await.unwrap();
        if !failed.is_empty() {
            break;
        }
    }
    assert_eq!(failed.len(), 1);
    assert_eq!(
        failed[0].event.event_type,
        aegis_common::types::WebhookEventType::ContentBlocked
    );
}

#[tokio::test]
async fn test_rewrite_appends_accuracy_disclaimer() {
    // Overconfident content drives factual accuracy below the rule
    // threshold; the tenant rule rewrites it.
    let harness = harness(
        "It is definitely guaranteed that returns are 100% certain, always and never otherwise.",
    );
    let auth = caller("acme");

    harness
        .policy
        .create_rule(aegis_common::types::PolicyRule::new(
            aegis_common::types::RuleScope::org(auth.org_id.clone()),
            "rewrite-low-accuracy",
            "accuracy < 0.6",
            PolicyAction::Rewrite,
            aegis_common::types::Severity::Medium,
        ))
        .await
        .unwrap();

    let response = harness
        .orchestrator
        .handle_chat(&auth, request("Are returns guaranteed?"), true)
        .await
        .unwrap();

    let audit_info = response.audit_info.clone().unwrap();
    assert_eq!(audit_info.action, PolicyAction::Rewrite);
    assert!(audit_info
        .applied_rules
        .contains(&"rewrite-low-accuracy".to_string()));
    assert!(response
        .primary_content()
        .ends_with("Please verify this information independently."));

    let trail = harness
        .audit
        .get_audit_trail(&auth.org_id, &AuditQuery::default())
        .await
        .unwrap();
    assert_eq!(trail[1].entry_type, AuditEntryType::Rewrite);
}

#[tokio::test]
async fn test_concurrent_identical_requests_call_upstream_once() {
    let harness = harness("Deduplicated answer.");
    let auth = caller("acme");

    let mut handles = Vec::new();
    for _ in 0..3 {
        let orchestrator = Arc::clone(&harness.orchestrator);
        let auth = caller("acme");
        handles.push(tokio::spawn(async move {
            orchestrator
                .handle_chat(&auth, request("same prompt"), false)
                .await
        }));
    }

    let mut contents = Vec::new();
    for handle in handles {
        let response = handle.await.unwrap().unwrap();
        contents.push(response.primary_content().to_string());
    }

    assert_eq!(harness.provider.calls.load(Ordering::SeqCst), 1);
    assert!(contents.iter().all(|c| c == "Deduplicated answer."));

    // Three REQUEST entries and three terminal entries.
    let trail = harness
        .audit
        .get_audit_trail(&auth.org_id, &AuditQuery::default())
        .await
        .unwrap();
    assert_eq!(trail.len(), 6);
    assert!(harness.audit.verify_chain(&auth.org_id).await.unwrap().ok);
}

#[tokio::test]
async fn test_second_request_is_served_from_cache() {
    let harness = harness("Cacheable answer.");
    let auth = caller("acme");

    let first = harness
        .orchestrator
        .handle_chat(&auth, request("cache me"), true)
        .await
        .unwrap();
    assert!(!first.audit_info.unwrap().cached);

    let second = harness
        .orchestrator
        .handle_chat(&auth, request("cache me"), true)
        .await
        .unwrap();
    assert!(second.audit_info.unwrap().cached);
    assert_eq!(harness.provider.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_invalid_request_rejected_before_audit() {
    let harness = harness("irrelevant");
    let auth = caller("acme");

    let mut bad = request("hi");
    bad.temperature = Some(3.0);
    let err = harness
        .orchestrator
        .handle_chat(&auth, bad, false)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::BadRequest(_)));

    // No audit entries for a request that never validated.
    let trail = harness
        .audit
        .get_audit_trail(&auth.org_id, &AuditQuery::default())
        .await
        .unwrap();
    assert!(trail.is_empty());
}

#[tokio::test]
async fn test_deadline_cancels_pipeline() {
    let mut config = SystemConfig::default();
    config.server.request_deadline_seconds = 1;

    let mut provider = MockProvider::new("too slow");
    provider.delay = Duration::from_millis(1500);
    let harness = harness_with(provider, config);
    let auth = caller("acme");

    let err = harness
        .orchestrator
        .handle_chat(&auth, request("hurry"), false)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Deadline(_)));

    // REQUEST entry plus a terminal ERROR entry.
    let trail = harness
        .audit
        .get_audit_trail(&auth.org_id, &AuditQuery::default())
        .await
        .unwrap();
    assert_eq!(trail.len(), 2);
    assert_eq!(trail[1].entry_type, AuditEntryType::Error);
}

#[tokio::test]
async fn test_tenant_chains_stay_separate() {
    let harness = harness("Fine answer.");

    harness
        .orchestrator
        .handle_chat(&caller("acme"), request("hello"), false)
        .await
        .unwrap();
    harness
        .orchestrator
        .handle_chat(&caller("globex"), request("hello"), false)
        .await
        .unwrap();

    assert!(harness
        .audit
        .verify_chain(&OrgId::new("acme"))
        .await
        .unwrap()
        .ok);
    assert!(harness
        .audit
        .verify_chain(&OrgId::new("globex"))
        .await
        .unwrap()
        .ok);
    assert_eq!(
        harness
            .audit
            .get_audit_trail(&OrgId::new("acme"), &AuditQuery::default())
            .await
            .unwrap()
            .len(),
        2
    );
}
