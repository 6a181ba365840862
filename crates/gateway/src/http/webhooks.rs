use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use aegis_common::types::{RetryPolicy, WebhookEndpoint, WebhookEventType};
use aegis_common::{EndpointId, EventId, GatewayError};

use crate::webhooks::events;

use super::{authenticate, ApiError, ApiResult, AppState};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEndpointBody {
    pub url: String,
    pub secret: String,
    pub events: Vec<WebhookEventType>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub retry_config: Option<RetryPolicy>,
    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,
}

fn default_enabled() -> bool {
    true
}

/// GET /v1/webhooks — tenant endpoints.
pub async fn list(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<WebhookEndpoint>>> {
    let auth = authenticate(&state, &headers).await?;
    let endpoints = state.webhooks.list_endpoints(&auth.org_id).await?;
    Ok(Json(endpoints))
}

/// POST /v1/webhooks — register an endpoint.
pub async fn create(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateEndpointBody>,
) -> ApiResult<Json<WebhookEndpoint>> {
    let auth = authenticate(&state, &headers).await?;

    let endpoint = WebhookEndpoint {
        id: EndpointId::new(),
        org_id: auth.org_id.clone(),
        url: body.url,
        secret: body.secret,
        events: body.events,
        enabled: body.enabled,
        retry_config: body.retry_config.unwrap_or_default(),
        headers: body.headers,
    };

    let endpoint = state.webhooks.create_endpoint(endpoint).await?;
    Ok(Json(endpoint))
}

/// DELETE /v1/webhooks/{id}.
pub async fn remove(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let auth = authenticate(&state, &headers).await?;

    let removed = state
        .webhooks
        .delete_endpoint(&auth.org_id, EndpointId::from_uuid(id))
        .await?;
    if !removed {
        return Err(ApiError(GatewayError::NotFound(format!("endpoint {}", id))));
    }
    Ok(Json(serde_json::json!({ "removed": true })))
}

/// POST /v1/webhooks/{id}/test — synthetic evaluation.completed, delivered
/// inline with no retry scheduling.
pub async fn test_fire(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let auth = authenticate(&state, &headers).await?;

    let endpoint = state
        .webhooks
        .get_endpoint(&auth.org_id, EndpointId::from_uuid(id))
        .await?
        .ok_or_else(|| ApiError(GatewayError::NotFound(format!("endpoint {}", id))))?;

    let event = events::test_event(&auth.org_id);
    let delivery = state.webhooks.deliver_test(&endpoint, &event).await;

    Ok(Json(serde_json::json!({
        "eventId": event.id,
        "delivered": delivery.is_ok(),
        "error": delivery.err(),
    })))
}

/// POST /v1/webhooks/{id}/replay/{event_id} — re-deliver one stored failed
/// event.
pub async fn replay(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((id, event_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<serde_json::Value>> {
    let auth = authenticate(&state, &headers).await?;

    state
        .webhooks
        .replay(
            &auth.org_id,
            EndpointId::from_uuid(id),
            EventId::from_uuid(event_id),
        )
        .await?;

    Ok(Json(serde_json::json!({ "replayed": true })))
}
