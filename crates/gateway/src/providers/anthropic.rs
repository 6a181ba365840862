use serde::{Deserialize, Serialize};

use aegis_common::types::{ChatMessage, ChatRole, Choice, FinishReason, LlmRequest, LlmResponse, Usage};

use super::{resync_from_headers, ProviderError, ProviderRateLimiter};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
pub(super) const API_VERSION: &str = "2023-06-01";

pub(super) fn models_url(base_url: Option<&str>) -> String {
    format!("{}/models", base_url.unwrap_or(DEFAULT_BASE_URL))
}

// ---------------------------------------------------------------------------
// Request wire types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

// ---------------------------------------------------------------------------
// Response wire types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct MessagesResponse {
    id: String,
    model: String,
    content: Vec<WireContentBlock>,
    stop_reason: Option<String>,
    usage: WireUsage,
}

#[derive(Deserialize)]
struct WireContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct WireUsage {
    input_tokens: u64,
    output_tokens: u64,
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

/// Split the canonical conversation into Anthropic's shape: system prompt
/// pulled out, only user/assistant turns in `messages`.
fn to_wire_request(request: &LlmRequest) -> MessagesRequest<'_> {
    let system_parts: Vec<&str> = request
        .messages
        .iter()
        .filter(|m| m.role == ChatRole::System)
        .map(|m| m.content.as_str())
        .collect();

    let messages = request
        .messages
        .iter()
        .filter(|m| m.role != ChatRole::System)
        .map(|m| WireMessage {
            role: match m.role {
                ChatRole::Assistant => "assistant",
                _ => "user",
            },
            content: &m.content,
        })
        .collect();

    MessagesRequest {
        model: &request.model,
        max_tokens: request.max_tokens.unwrap_or(1024),
        messages,
        system: if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n"))
        },
        temperature: request.temperature,
    }
}

fn normalize_stop_reason(raw: Option<&str>) -> FinishReason {
    match raw {
        Some("end_turn") | Some("stop_sequence") => FinishReason::Stop,
        Some("max_tokens") => FinishReason::Length,
        Some("refusal") => FinishReason::ContentFilter,
        Some(_) | None => FinishReason::Stop,
    }
}

fn from_wire_response(resp: MessagesResponse) -> LlmResponse {
    let text: String = resp
        .content
        .iter()
        .filter(|b| b.block_type == "text")
        .map(|b| b.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    LlmResponse {
        id: resp.id,
        created: chrono::Utc::now().timestamp(),
        model: resp.model,
        choices: vec![Choice {
            index: 0,
            message: ChatMessage::assistant(text),
            finish_reason: normalize_stop_reason(resp.stop_reason.as_deref()),
        }],
        usage: Usage {
            prompt_tokens: resp.usage.input_tokens,
            completion_tokens: resp.usage.output_tokens,
            total_tokens: resp.usage.input_tokens + resp.usage.output_tokens,
        },
        audit_info: None,
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Send a messages request to the Anthropic API.
pub async fn send_messages(
    http: &reqwest::Client,
    api_key: &str,
    base_url: Option<&str>,
    request: &LlmRequest,
    limiter: &ProviderRateLimiter,
) -> Result<LlmResponse, ProviderError> {
    let start = std::time::Instant::now();
    let wire = to_wire_request(request);

    let url = format!("{}/messages", base_url.unwrap_or(DEFAULT_BASE_URL));
    let response = http
        .post(&url)
        .header("x-api-key", api_key)
        .header("anthropic-version", API_VERSION)
        .json(&wire)
        .send()
        .await
        .map_err(|e| ProviderError::Http(e.to_string()))?;

    let status = response.status();
    metrics::histogram!("provider.latency", "provider" => "anthropic", "model" => request.model.clone())
        .record(start.elapsed().as_secs_f64());

    resync_from_headers(
        response.headers(),
        limiter,
        "anthropic-ratelimit-requests-remaining",
        "anthropic-ratelimit-tokens-remaining",
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

    let body: MessagesResponse = response
        .json()
        .await
        .map_err(|e| ProviderError::Parse(format!("Failed to parse Anthropic response: {}", e)))?;

    let llm_response = from_wire_response(body);

    metrics::counter!("provider.input_tokens", "provider" => "anthropic")
        .increment(llm_response.usage.prompt_tokens);
    metrics::counter!("provider.output_tokens", "provider" => "anthropic")
        .increment(llm_response.usage.completion_tokens);

    Ok(llm_response)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
