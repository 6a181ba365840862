mod alerts;
mod audit;
mod chat;
mod documents;
mod error;
mod health;
mod policies;
mod webhooks;

use std::sync::Arc;

use axum::http::HeaderMap;
use axum::routing::{delete, get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;

use aegis_common::config::SystemConfig;
use aegis_common::OrgId;

use crate::alerts::AlertEngine;
use crate::audit::AuditLog;
use crate::auth::{AuthContext, AuthValidator};
use crate::orchestrator::Orchestrator;
use crate::policy::PolicyEngine;
use crate::relay::ProviderRelay;
use crate::retrieval::ContextRetriever;
use crate::store::KeyValueStore;
use crate::webhooks::WebhookDispatcher;

pub use error::{ApiError, ApiResult};

/// Shared application state accessible from axum handlers.
pub struct AppState {
    pub config: Arc<SystemConfig>,
    pub orchestrator: Arc<Orchestrator>,
    pub retriever: Arc<ContextRetriever>,
    pub audit: Arc<AuditLog>,
    pub policy: Arc<PolicyEngine>,
    pub webhooks: Arc<WebhookDispatcher>,
    pub alerts: Arc<AlertEngine>,
    pub auth: Arc<dyn AuthValidator>,
    pub relay: Arc<ProviderRelay>,
    pub store: Arc<dyn KeyValueStore>,
    pub embedding_enabled: bool,
    pub metrics_handle: PrometheusHandle,
}

/// Build the public HTTP surface.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(chat::chat_completions))
        .route("/v1/documents", post(documents::add_document))
        .route("/v1/documents/{id}", delete(documents::remove_document))
        .route("/v1/search", get(documents::search))
        .route("/v1/audit", get(audit::trail))
        .route("/v1/audit/verify", get(audit::verify))
        .route("/v1/audit/stats", get(audit::stats))
        .route(
            "/v1/policies/rules",
            get(policies::list).post(policies::create),
        )
        .route("/v1/policies/rules/{id}", delete(policies::remove))
        .route(
            "/v1/webhooks",
            get(webhooks::list).post(webhooks::create),
        )
        .route("/v1/webhooks/{id}", delete(webhooks::remove))
        .route("/v1/webhooks/{id}/test", post(webhooks::test_fire))
        .route(
            "/v1/webhooks/{id}/replay/{event_id}",
            post(webhooks::replay),
        )
        .route(
            "/v1/alerts/rules",
            get(alerts::list_rules).post(alerts::create_rule),
        )
        .route("/v1/alerts", get(alerts::list))
        .route("/v1/alerts/{id}/resolve", post(alerts::resolve))
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz))
        .route("/metrics", get(health::metrics))
        .with_state(state)
}

/// Resolve the caller through the auth collaborator. Rejections are
/// recorded as failed-auth audit events.
pub(crate) async fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<AuthContext, ApiError> {
    let bearer = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    let api_key = headers.get("x-api-key").and_then(|v| v.to_str().ok());

    match state.auth.validate(bearer, api_key).await {
        Ok(ctx) => Ok(ctx),
        Err(e) => {
            metrics::counter!("gateway.auth.failures").increment(1);
            // Failed credentials carry no tenant; the event lands on a
            // reserved chain.
            if let Err(audit_error) = state
                .audit
                .log_auth_failure(&OrgId::new("unauthenticated"), &e.to_string())
                .await
            {
                tracing::error!(error = %audit_error, "Failed to audit auth rejection");
            }
            Err(ApiError(e))
        }
    }
}
