use serde::{Deserialize, Serialize};

use aegis_common::types::{ChatMessage, ChatRole, Choice, FinishReason, LlmRequest, LlmResponse, Usage};

use super::ProviderError;

const DEFAULT_BASE_URL: &str = "https://api.cohere.com/v1";

pub(super) fn models_url(base_url: Option<&str>) -> String {
    format!("{}/models", base_url.unwrap_or(DEFAULT_BASE_URL))
}

// ---------------------------------------------------------------------------
// Request wire types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    /// The latest user message; earlier turns travel in chat_history.
    message: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    chat_history: Vec<HistoryTurn<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    preamble: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Serialize)]
struct HistoryTurn<'a> {
    role: &'static str,
    message: &'a str,
}

// ---------------------------------------------------------------------------
// Response wire types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    generation_id: Option<String>,
    text: String,
    finish_reason: Option<String>,
    #[serde(default)]
    meta: Option<WireMeta>,
}

#[derive(Deserialize)]
struct WireMeta {
    #[serde(default)]
    tokens: Option<WireTokens>,
}

#[derive(Deserialize)]
struct WireTokens {
    #[serde(default)]
    input_tokens: Option<f64>,
    #[serde(default)]
    output_tokens: Option<f64>,
}

#[derive(Deserialize)]
struct WireError {
    message: String,
}

// ---------------------------------------------------------------------------
// Conversion helpers
// ---------------------------------------------------------------------------

/// Split the canonical conversation into Cohere's shape: the trailing user
/// message rides alone, prior turns become chat_history, system prompts
/// join into the preamble.
fn to_wire_request(request: &LlmRequest) -> ChatRequest<'_> {
    let last_user_index = request
        .messages
        .iter()
        .rposition(|m| m.role == ChatRole::User)
        .unwrap_or(request.messages.len().saturating_sub(1));

    let system_parts: Vec<&str> = request
        .messages
        .iter()
        .filter(|m| m.role == ChatRole::System)
        .map(|m| m.content.as_str())
        .collect();

    let chat_history = request
        .messages
        .iter()
        .enumerate()
        .filter(|(i, m)| *i != last_user_index && m.role != ChatRole::System)
        .map(|(_, m)| HistoryTurn {
            role: match m.role {
                ChatRole::Assistant => "CHATBOT",
                _ => "USER",
            },
            message: &m.content,
        })
        .collect();

    ChatRequest {
        model: &request.model,
        message: request
            .messages
            .get(last_user_index)
            .map(|m| m.content.as_str())
            .unwrap_or_default(),
        chat_history,
        preamble: if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n"))
        },
        temperature: request.temperature,
        max_tokens: request.max_tokens,
    }
}

fn normalize_finish_reason(raw: Option<&str>) -> FinishReason {
    match raw {
        Some("COMPLETE") => FinishReason::Stop,
        Some("MAX_TOKENS") => FinishReason::Length,
        Some("ERROR_TOXIC") => FinishReason::ContentFilter,
        Some("ERROR") | Some("ERROR_LIMIT") => FinishReason::Error,
        Some(_) | None => FinishReason::Stop,
    }
}

fn from_wire_response(resp: ChatResponse, model: &str) -> LlmResponse {
    let usage = resp
        .meta
        .and_then(|m| m.tokens)
        .map(|t| {
            let prompt = t.input_tokens.unwrap_or(0.0) as u64;
            let completion = t.output_tokens.unwrap_or(0.0) as u64;
            Usage {
                prompt_tokens: prompt,
                completion_tokens: completion,
                total_tokens: prompt + completion,
            }
        })
        .unwrap_or_default();

    LlmResponse {
        id: resp
            .generation_id
            .unwrap_or_else(|| format!("cohere-{}", uuid::Uuid::new_v4())),
        created: chrono::Utc::now().timestamp(),
        model: model.to_string(),
        choices: vec![Choice {
            index: 0,
            message: ChatMessage::assistant(resp.text),
            finish_reason: normalize_finish_reason(resp.finish_reason.as_deref()),
        }],
        usage,
        audit_info: None,
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Send a chat request to the Cohere API.
pub async fn send_chat(
    http: &reqwest::Client,
    api_key: &str,
    base_url: Option<&str>,
    request: &LlmRequest,
) -> Result<LlmResponse, ProviderError> {
    let start = std::time::Instant::now();
    let wire = to_wire_request(request);

    let url = format!("{}/chat", base_url.unwrap_or(DEFAULT_BASE_URL));
    let response = http
        .post(&url)
        .bearer_auth(api_key)
        .json(&wire)
        .send()
        .await
        .map_err(|e| ProviderError::Http(e.to_string()))?;

    let status = response.status();
    metrics::histogram!("provider.latency", "provider" => "cohere", "model" => request.model.clone())
        .record(start.elapsed().as_secs_f64());

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
            Ok(e) => e.message,
            Err(_) => body,
        };
        return Err(ProviderError::Api(format!("{}: {}", status, msg)));
    }

    let body: ChatResponse = response
        .json()
        .await
        .map_err(|e| ProviderError::Parse(format!("Failed to parse Cohere response: {}", e)))?;

    let llm_response = from_wire_response(body, &request.model);

    metrics::counter!("provider.input_tokens", "provider" => "cohere")
        .increment(llm_response.usage.prompt_tokens);
    metrics::counter!("provider.output_tokens", "provider" => "cohere")
        .increment(llm_response.usage.completion_tokens);

    Ok(llm_response)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_split_keeps_last_user_message_out() {
        let request = LlmRequest {
            model: "command-r".into(),
            messages: vec![
                ChatMessage::system("Be brief."),
                ChatMessage::user("First question"),
                ChatMessage::assistant("First answer"),
                ChatMessage::user("Second question"),
            ],
            temperature: None,
            max_tokens: None,
            stream: None,
            user: None,
            metadata: None,
        };

        let wire = to_wire_request(&request);
        assert_eq!(wire.message, "Second question");
        assert_eq!(wire.chat_history.len(), 2);
        assert_eq!(wire.chat_history[0].role, "USER");
        assert_eq!(wire.chat_history[1].role, "CHATBOT");
        assert_eq!(wire.preamble.as_deref(), Some("Be brief."));
    }

    #[test]
    fn test_parse_chat_response() {
        let json = r#"{
            "generation_id": "gen-1",
            "text": "Answer",
            "finish_reason": "COMPLETE",
            "meta": {"tokens": {"input_tokens": 10, "output_tokens": 2}}
        }"#;

        let resp: ChatResponse = serde_json::from_str(json).unwrap();
        let parsed = from_wire_response(resp, "command-r");

        assert_eq!(parsed.primary_content(), "Answer");
        assert_eq!(parsed.choices[0].finish_reason, FinishReason::Stop);
        assert_eq!(parsed.usage.total_tokens, 12);
    }

    #[test]
    fn test_toxic_finish_maps_to_content_filter() {
        assert_eq!(
            normalize_finish_reason(Some("ERROR_TOXIC")),
            FinishReason::ContentFilter
        );
        assert_eq!(normalize_finish_reason(Some("ERROR")), FinishReason::Error);
    }
}
