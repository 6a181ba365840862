use aegis_common::config::ProviderConfig;
use aegis_common::types::{LlmRequest, LlmResponse};

use super::openai::{from_wire_response, to_wire_request};
use super::ProviderError;

const API_VERSION: &str = "2024-06-01";

/// Azure deployments live under the tenant's resource endpoint; there is no
/// usable default. Configured via `base_url` or `AZURE_OPENAI_ENDPOINT`.
fn endpoint(config: &ProviderConfig) -> Option<String> {
    config
        .base_url
        .clone()
        .or_else(|| std::env::var("AZURE_OPENAI_ENDPOINT").ok())
        .filter(|s| !s.is_empty())
}

pub(super) fn deployments_url(config: &ProviderConfig) -> Option<String> {
    endpoint(config).map(|base| format!("{}/openai/deployments?api-version={}", base, API_VERSION))
}

/// Send a chat completion to an Azure OpenAI deployment. The wire dialect
/// is OpenAI's; the model name doubles as the deployment name.
pub async fn send_chat_completion(
    http: &reqwest::Client,
    api_key: &str,
    config: &ProviderConfig,
    request: &LlmRequest,
) -> Result<LlmResponse, ProviderError> {
    let base = endpoint(config).ok_or_else(|| {
        ProviderError::Api("Azure endpoint not configured (base_url or AZURE_OPENAI_ENDPOINT)".into())
    })?;

    let start = std::time::Instant::now();
    let wire = to_wire_request(request);

    let url = format!(
        "{}/openai/deployments/{}/chat/completions?api-version={}",
        base, request.model, API_VERSION
    );
    let response = http
        .post(&url)
        .header("api-key", api_key)
        .json(&wire)
        .send()
        .await
        .map_err(|e| ProviderError::Http(e.to_string()))?;

    let status = response.status();
    metrics::histogram!("provider.latency", "provider" => "azure", "model" => request.model.clone())
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
        return Err(ProviderError::Api(format!("{}: {}", status, body)));
    }

    let body = response
        .json()
        .await
        .map_err(|e| ProviderError::Parse(format!("Failed to parse Azure response: {}", e)))?;

    let llm_response = from_wire_response(body);

    metrics::counter!("provider.input_tokens", "provider" => "azure")
        .increment(llm_response.usage.prompt_tokens);
    metrics::counter!("provider.output_tokens", "provider" => "azure")
        .increment(llm_response.usage.completion_tokens);

    Ok(llm_response)
}
