use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;

use aegis_common::types::{LlmRequest, LlmResponse};

use super::{authenticate, ApiResult, AppState};

/// POST /v1/chat/completions — the pipeline entrypoint. OpenAI-compatible
/// request and response; `X-Return-Audit: 1` appends the governance
/// verdict.
pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<LlmRequest>,
) -> ApiResult<Json<LlmResponse>> {
    let auth = authenticate(&state, &headers).await?;

    let return_audit = headers
        .get("x-return-audit")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"));

    let response = state
        .orchestrator
        .handle_chat(&auth, request, return_audit)
        .await?;

    Ok(Json(response))
}
