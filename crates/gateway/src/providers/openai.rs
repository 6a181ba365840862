use serde::{Deserialize, Serialize};

use aegis_common::types::{ChatMessage, ChatRole, Choice, FinishReason, LlmRequest, LlmResponse, Usage};

use super::{resync_from_headers, ProviderError, ProviderRateLimiter};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub(super) fn models_url(base_url: Option<&str>) -> String {
    format!("{}/models", base_url.unwrap_or(DEFAULT_BASE_URL))
}

// ---------------------------------------------------------------------------
// Request wire types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub(super) struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<&'a str>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

/// Build the wire request from the canonical form. Shared with the Azure
/// adapter, which speaks the same dialect at a different URL.
pub(super) fn to_wire_request(request: &LlmRequest) -> ChatRequest<'_> {
    ChatRequest {
        model: &request.model,
        messages: request
            .messages
            .iter()
            .map(|m| WireMessage {
                role: role_str(m.role),
                content: &m.content,
            })
            .collect(),
        temperature: request.temperature,
        max_tokens: request.max_tokens,
        user: request.user.as_deref(),
    }
}

// ---------------------------------------------------------------------------
// Response wire types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub(super) struct ChatResponse {
    id: String,
    created: i64,
    model: String,
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct WireChoice {
    index: u32,
    message: WireResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct WireUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
    total_tokens: u64,
}

#[derive(Deserialize)]
struct WireError {
    error: WireErrorDetail,
}

#[derive(Deserialize)]
struct WireErrorDetail {
    message: String,
}

// ---------------------------------------------------------------------------
// Conversion helpers
// ---------------------------------------------------------------------------

fn role_str(role: ChatRole) -> &'static str {
    match role {
        ChatRole::System => "system",
        ChatRole::User => "user",
        ChatRole::Assistant => "assistant",
    }
}

/// Normalize an OpenAI finish_reason string to the canonical enum.
pub(super) fn normalize_finish_reason(raw: Option<&str>) -> FinishReason {
    match raw {
        Some("stop") => FinishReason::Stop,
        Some("length") => FinishReason::Length,
        Some("content_filter") => FinishReason::ContentFilter,
        Some(_) | None => FinishReason::Stop,
    }
}

pub(super) fn from_wire_response(resp: ChatResponse) -> LlmResponse {
    let choices = resp
        .choices
        .into_iter()
        .map(|c| Choice {
            index: c.index,
            message: ChatMessage::assistant(c.message.content.unwrap_or_default()),
            finish_reason: normalize_finish_reason(c.finish_reason.as_deref()),
        })
        .collect();

    let usage = resp
        .usage
        .map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        })
        .unwrap_or_default();

    LlmResponse {
        id: resp.id,
        created: resp.created,
        model: resp.model,
        choices,
        usage,
        audit_info: None,
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Send a chat completion request to the OpenAI API.
pub async fn send_chat_completion(
    http: &reqwest::Client,
    api_key: &str,
    base_url: Option<&str>,
    request: &LlmRequest,
    limiter: &ProviderRateLimiter,
) -> Result<LlmResponse, ProviderError> {
    let start = std::time::Instant::now();

    let wire = to_wire_request(request);

    let url = format!("{}/chat/completions", base_url.unwrap_or(DEFAULT_BASE_URL));
    let response = http
        .post(&url)
        .bearer_auth(api_key)
        .json(&wire)
        .send()
        .await
        .map_err(|e| ProviderError::Http(e.to_string()))?;

    let status = response.status();
    metrics::histogram!("provider.latency", "provider" => "openai", "model" => request.model.clone())
        .record(start.elapsed().as_secs_f64());

    resync_from_headers(
        response.headers(),
        limiter,
        "x-ratelimit-remaining-requests",
        "x-ratelimit-remaining-tokens",
    );

    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        let body = response.text().await.unwrap_or_default();
        return Err(ProviderError::Auth(format!("{}: {}", status, body)));
    }

    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok());
        return Err(ProviderError::RateLimited { retry_after });
    }

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let msg = match serde_json::from_str::<WireError>(&body) {
            Ok(e) => e.error.message,
            Err(_) => body,
        };
        return Err(ProviderError::Api(format!("{}: {}", status, msg)));
    }

    let body: ChatResponse = response
        .json()
        .await
        .map_err(|e| ProviderError::Parse(format!("Failed to parse OpenAI response: {}", e)))?;

    let llm_response = from_wire_response(body);

    metrics::counter!("provider.input_tokens", "provider" => "openai")
        .increment(llm_response.usage.prompt_tokens);
    metrics::counter!("provider.output_tokens", "provider" => "openai")
        .increment(llm_response.usage.completion_tokens);

    Ok(llm_response)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
