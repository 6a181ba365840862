use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;

use aegis_gateway::alerts::{AlertEngine, MetricsBuffer};
use aegis_gateway::audit::AuditLog;
use aegis_gateway::auth::TokenAuthValidator;
use aegis_gateway::config;
use aegis_gateway::evaluators::EvaluatorMesh;
use aegis_gateway::http::{build_router, AppState};
use aegis_gateway::orchestrator::Orchestrator;
use aegis_gateway::policy::PolicyEngine;
use aegis_gateway::providers::ProviderRegistry;
use aegis_gateway::relay::{BreakerRegistry, ProviderRelay, ResponseCache};
use aegis_gateway::retrieval::{ContextRetriever, EmbeddingClient};
use aegis_gateway::store::{KeyValueStore, MemoryStore, MemoryVectorStore, RedisStore};
use aegis_gateway::webhooks::WebhookDispatcher;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Aegis gateway starting");

    // Load configuration — fail loudly on misconfiguration.
    let config_path = std::env::var("AEGIS_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config/gateway.toml"));

    let system_config = match config::load_system_config(&config_path) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            tracing::error!(error = %e, "Failed to load configuration — refusing to start");
            std::process::exit(1);
        }
    };

    // The audit integration key is non-negotiable: without it the chain
    // cannot be signed.
    let integration_key = match std::env::var("AUDIT_INTEGRATION_KEY") {
        Ok(key) if !key.is_empty() => key,
        _ => {
            tracing::error!("AUDIT_INTEGRATION_KEY not set — refusing to start");
            std::process::exit(2);
        }
    };

    let jwt_secret = std::env::var("JWT_SECRET").unwrap_or_else(|_| {
        tracing::warn!("JWT_SECRET not set — bearer tokens will not validate");
        String::new()
    });

    // Install Prometheus metrics recorder.
    let metrics_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");

    // Persistence collaborators and response cache: Redis when configured,
    // memory otherwise.
    let (store, response_cache): (Arc<dyn KeyValueStore>, ResponseCache) =
        match std::env::var("REDIS_URL") {
            Ok(url) if !url.is_empty() => match RedisStore::connect(&url).await {
                Ok(redis) => {
                    let cache =
                        ResponseCache::redis(redis.connection(), system_config.cache.ttl_seconds);
                    (Arc::new(redis), cache)
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to connect to Redis");
                    std::process::exit(1);
                }
            },
            _ => {
                tracing::info!("REDIS_URL not set — using in-memory store and cache");
                (
                    Arc::new(MemoryStore::new()),
                    ResponseCache::in_memory(
                        system_config.cache.ttl_seconds,
                        system_config.cache.max_entries,
                    ),
                )
            }
        };
    let vectors = Arc::new(MemoryVectorStore::new());

    // Embedding client (degrades gracefully without an API key).
    let embedding_client = Arc::new(EmbeddingClient::new(
        system_config.retrieval.embedding.clone(),
        system_config.retry.clone(),
    ));
    let embedding_enabled = embedding_client.is_enabled();

    let retriever = Arc::new(ContextRetriever::new(
        Arc::clone(&store),
        vectors,
        embedding_client,
        system_config.retrieval.clone(),
    ));

    // Provider relay: registry + cache + breakers.
    let registry = ProviderRegistry::from_config(&system_config.providers, &system_config.retry);
    if registry.is_empty() {
        tracing::warn!("No provider API keys configured — chat requests will fail");
    }
    let breakers = BreakerRegistry::new(system_config.breaker.clone());
    let relay = Arc::new(ProviderRelay::new(registry, response_cache, breakers));

    let mesh = Arc::new(EvaluatorMesh::with_builtins(&system_config.evaluators));
    let policy = Arc::new(PolicyEngine::new(Arc::clone(&store)));
    let audit = Arc::new(AuditLog::new(
        Arc::clone(&store),
        integration_key.as_bytes(),
    ));
    let webhooks = Arc::new(WebhookDispatcher::new(
        Arc::clone(&store),
        system_config.webhooks.clone(),
    ));

    // Metric buffer + alert engine background tasks.
    let metrics_buffer = Arc::new(MetricsBuffer::new(
        system_config.alerting.sample_retention_minutes,
    ));
    let _pruner = metrics_buffer.spawn_pruner(Duration::from_secs(
        system_config.alerting.prune_interval_seconds,
    ));

    let alerts = Arc::new(AlertEngine::new(
        Arc::clone(&store),
        Arc::clone(&metrics_buffer),
        Arc::clone(&webhooks),
    ));
    let _alert_task = Arc::clone(&alerts).spawn(Duration::from_secs(
        system_config.alerting.evaluation_interval_seconds,
    ));

    // Breaker state gauges.
    {
        let relay = Arc::clone(&relay);
        tokio::spawn(async move {
            let interval = Duration::from_secs(30);
            loop {
                tokio::time::sleep(interval).await;
                relay.breakers().report_metrics();
            }
        });
    }

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&relay),
        Arc::clone(&retriever),
        mesh,
        Arc::clone(&policy),
        Arc::clone(&audit),
        Arc::clone(&webhooks),
        Arc::clone(&metrics_buffer),
        Arc::clone(&system_config),
    ));

    let auth = Arc::new(TokenAuthValidator::new(&jwt_secret, Arc::clone(&store)));

    let state = Arc::new(AppState {
        config: system_config,
        orchestrator,
        retriever,
        audit,
        policy,
        webhooks,
        alerts,
        auth,
        relay,
        store,
        embedding_enabled,
        metrics_handle,
    });

    let app = build_router(state);

    let bind_addr = std::env::var("AEGIS_BIND").unwrap_or_else(|_| "0.0.0.0:8080".into());
    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(bind_addr = bind_addr.as_str(), error = %e, "Failed to bind");
            std::process::exit(3);
        }
    };

    tracing::info!(bind_addr = bind_addr.as_str(), "Aegis gateway listening");

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(error = %e, "HTTP server error");
        std::process::exit(1);
    }
}
