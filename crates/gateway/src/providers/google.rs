use serde::{Deserialize, Serialize};

use aegis_common::types::{ChatMessage, ChatRole, Choice, FinishReason, LlmRequest, LlmResponse, Usage};

use super::ProviderError;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub(super) fn models_url(base_url: Option<&str>) -> String {
    format!("{}/models", base_url.unwrap_or(DEFAULT_BASE_URL))
}

// ---------------------------------------------------------------------------
// Request wire types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<WireContent<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<WireContent<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Serialize)]
struct WireContent<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<WirePart<'a>>,
}

#[derive(Serialize)]
struct WirePart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

// ---------------------------------------------------------------------------
// Response wire types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<WireCandidate>,
    #[serde(default)]
    usage_metadata: Option<WireUsage>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireCandidate {
    content: Option<WireCandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireCandidateContent {
    #[serde(default)]
    parts: Vec<WireCandidatePart>,
}

#[derive(Deserialize)]
struct WireCandidatePart {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireUsage {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
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

fn to_wire_request(request: &LlmRequest) -> GenerateRequest<'_> {
    let system_parts: Vec<WirePart> = request
        .messages
        .iter()
        .filter(|m| m.role == ChatRole::System)
        .map(|m| WirePart { text: &m.content })
        .collect();

    let contents = request
        .messages
        .iter()
        .filter(|m| m.role != ChatRole::System)
        .map(|m| WireContent {
            role: Some(match m.role {
                ChatRole::Assistant => "model",
                _ => "user",
            }),
            parts: vec![WirePart { text: &m.content }],
        })
        .collect();

    GenerateRequest {
        contents,
        system_instruction: if system_parts.is_empty() {
            None
        } else {
            Some(WireContent {
                role: None,
                parts: system_parts,
            })
        },
        generation_config: if request.temperature.is_some() || request.max_tokens.is_some() {
            Some(GenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_tokens,
            })
        } else {
            None
        },
    }
}

fn normalize_finish_reason(raw: Option<&str>) -> FinishReason {
    match raw {
        Some("STOP") => FinishReason::Stop,
        Some("MAX_TOKENS") => FinishReason::Length,
        Some("SAFETY") | Some("PROHIBITED_CONTENT") | Some("BLOCKLIST") => {
            FinishReason::ContentFilter
        }
        Some(_) | None => FinishReason::Stop,
    }
}

fn from_wire_response(resp: GenerateResponse, model: &str) -> LlmResponse {
    let choices = resp
        .candidates
        .into_iter()
        .enumerate()
        .map(|(i, c)| {
            let text = c
                .content
                .map(|content| {
                    content
                        .parts
                        .iter()
                        .map(|p| p.text.as_str())
                        .collect::<Vec<_>>()
                        .join("")
                })
                .unwrap_or_default();
            Choice {
                index: i as u32,
                message: ChatMessage::assistant(text),
                finish_reason: normalize_finish_reason(c.finish_reason.as_deref()),
            }
        })
        .collect();

    let usage = resp
        .usage_metadata
        .map(|u| Usage {
            prompt_tokens: u.prompt_token_count,
            completion_tokens: u.candidates_token_count,
            total_tokens: u.prompt_token_count + u.candidates_token_count,
        })
        .unwrap_or_default();

    LlmResponse {
        id: format!("gemini-{}", uuid::Uuid::new_v4()),
        created: chrono::Utc::now().timestamp(),
        model: model.to_string(),
        choices,
        usage,
        audit_info: None,
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Send a generateContent request to the Google Gemini API.
pub async fn send_generate_content(
    http: &reqwest::Client,
    api_key: &str,
    base_url: Option<&str>,
    request: &LlmRequest,
) -> Result<LlmResponse, ProviderError> {
    let start = std::time::Instant::now();
    let wire = to_wire_request(request);

    let url = format!(
        "{}/models/{}:generateContent",
        base_url.unwrap_or(DEFAULT_BASE_URL),
        request.model
    );
    let response = http
        .post(&url)
        .query(&[("key", api_key)])
        .json(&wire)
        .send()
        .await
        .map_err(|e| ProviderError::Http(e.to_string()))?;

    let status = response.status();
    metrics::histogram!("provider.latency", "provider" => "google", "model" => request.model.clone())
        .record(start.elapsed().as_secs_f64());

    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        let body = response.text().await.unwrap_or_default();
        return Err(ProviderError::Auth(format!("{}: {}", status, body)));
    }

    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(ProviderError::RateLimited { retry_after: None });
    }

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let msg = match serde_json::from_str::<WireError>(&body) {
            Ok(e) => e.error.message,
            Err(_) => body,
        };
        return Err(ProviderError::Api(format!("{}: {}", status, msg)));
    }

    let body: GenerateResponse = response
        .json()
        .await
        .map_err(|e| ProviderError::Parse(format!("Failed to parse Gemini response: {}", e)))?;

    let llm_response = from_wire_response(body, &request.model);

    metrics::counter!("provider.input_tokens", "provider" => "google")
        .increment(llm_response.usage.prompt_tokens);
    metrics::counter!("provider.output_tokens", "provider" => "google")
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
    fn test_roles_map_to_gemini_contents() {
        let request = LlmRequest {
            model: "gemini-pro".into(),
            messages: vec![
                ChatMessage::system("Be helpful."),
                ChatMessage::user("Hi"),
                ChatMessage::assistant("Hello!"),
            ],
            temperature: None,
            max_tokens: None,
            stream: None,
            user: None,
            metadata: None,
        };

        let wire = to_wire_request(&request);
        assert!(wire.system_instruction.is_some());
        assert_eq!(wire.contents.len(), 2);
        assert_eq!(wire.contents[0].role, Some("user"));
        assert_eq!(wire.contents[1].role, Some("model"));
        assert!(wire.generation_config.is_none());
    }

    #[test]
    fn test_parse_generate_response_with_safety_stop() {
        let json = r#"{
            "candidates": [{
                "content": {"parts": [{"text": "partial"}]},
                "finishReason": "SAFETY"
            }],
            "usageMetadata": {"promptTokenCount": 5, "candidatesTokenCount": 2}
        }"#;

        let resp: GenerateResponse = serde_json::from_str(json).unwrap();
        let parsed = from_wire_response(resp, "gemini-pro");

        assert_eq!(parsed.choices[0].finish_reason, FinishReason::ContentFilter);
        assert_eq!(parsed.usage.total_tokens, 7);
    }

    #[test]
    fn test_empty_candidates_produce_no_choices() {
        let resp: GenerateResponse = serde_json::from_str("{}").unwrap();
        let parsed = from_wire_response(resp, "gemini-pro");
        assert!(parsed.choices.is_empty());
        assert_eq!(parsed.primary_content(), "");
    }
}
