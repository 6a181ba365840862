use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;

use super::AppState;

/// GET /healthz — liveness. The process answering is the signal.
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "alive" })))
}

/// GET /readyz — per-component readiness.
pub async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let store_ok = state.store.get("readyz:probe").await.is_ok();

    let breakers: Vec<serde_json::Value> = state
        .relay
        .breakers()
        .states()
        .into_iter()
        .map(|(provider, breaker_state)| {
            serde_json::json!({
                "provider": provider,
                "breaker": breaker_state.as_str(),
            })
        })
        .collect();

    let providers_registered = !state.relay.registry().is_empty();
    let any_breaker_open = state
        .relay
        .breakers()
        .states()
        .iter()
        .any(|(_, s)| *s == crate::relay::CircuitState::Open);

    let ready = store_ok && providers_registered && !any_breaker_open;

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let body = serde_json::json!({
        "status": if ready { "ready" } else { "degraded" },
        "components": {
            "store": if store_ok { "ready" } else { "unreachable" },
            "providers": if providers_registered { "ready" } else { "none_configured" },
            "breakers": breakers,
            "embeddings": if state.embedding_enabled { "ready" } else { "disabled" },
        }
    });

    (status, Json(body))
}

/// GET /metrics — Prometheus render.
pub async fn metrics(State(state): State<Arc<AppState>>) -> String {
    state.metrics_handle.render()
}
