mod anthropic;
mod azure;
mod cohere;
mod google;
mod openai;
pub mod rate_limit;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use aegis_common::config::{ProviderConfig, ProvidersConfig, RetryConfig};
use aegis_common::types::{LlmRequest, LlmResponse};
use aegis_common::GatewayError;

pub use rate_limit::{ProviderRateLimiter, RateLimitStatus};

/// Which upstream family an adapter speaks to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProviderType {
    OpenAi,
    Anthropic,
    Google,
    Cohere,
    Azure,
}

impl ProviderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Google => "google",
            Self::Cohere => "cohere",
            Self::Azure => "azure",
        }
    }
}

/// Errors from upstream provider calls.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Provider HTTP error: {0}")]
    Http(String),

    #[error("Provider auth error: {0}")]
    Auth(String),

    #[error("Provider rate limited (retry after {retry_after:?}s)")]
    RateLimited { retry_after: Option<u64> },

    #[error("Provider API error: {0}")]
    Api(String),

    #[error("Provider response parse error: {0}")]
    Parse(String),
}

impl ProviderError {
    /// Whether this error should not be retried.
    fn is_non_retryable(&self) -> bool {
        matches!(self, ProviderError::Auth(_))
    }
}

impl From<ProviderError> for GatewayError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::RateLimited { retry_after } => GatewayError::RateLimited { retry_after },
            other => GatewayError::UpstreamFailed(other.to_string()),
        }
    }
}

/// Upstream adapter contract: translate the canonical request, call the
/// provider, translate back. Object-safe via boxed futures so the registry
/// and tests can dyn-dispatch.
pub trait ProviderAdapter: Send + Sync {
    fn provider_type(&self) -> ProviderType;

    fn call<'a>(
        &'a self,
        request: &'a LlmRequest,
    ) -> Pin<Box<dyn Future<Output = Result<LlmResponse, ProviderError>> + Send + 'a>>;

    fn health_check<'a>(&'a self) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>>;

    fn rate_limit_status(&self) -> RateLimitStatus;
}

/// Production adapter: one per configured provider, with retry logic and
/// token-bucket accounting in front of the wire call.
pub struct ProviderClient {
    provider: ProviderType,
    http: reqwest::Client,
    config: ProviderConfig,
    retry_config: RetryConfig,
    api_key: String,
    limiter: ProviderRateLimiter,
}

impl ProviderClient {
    /// Create a provider client.
    /// Reads the API key from the configured env var.
    /// Returns None if the key is not set (provider disabled).
    pub fn new(
        provider: ProviderType,
        config: ProviderConfig,
        retry_config: RetryConfig,
    ) -> Option<Self> {
        let api_key = match std::env::var(&config.api_key_env) {
            Ok(key) if !key.is_empty() => key,
            _ => {
                tracing::warn!(
                    env_var = config.api_key_env.as_str(),
                    provider = provider.as_str(),
                    "API key not set — provider disabled"
                );
                return None;
            }
        };

        let limiter =
            ProviderRateLimiter::new(config.requests_per_minute, config.tokens_per_minute);

        Some(Self {
            provider,
            http: reqwest::Client::new(),
            config,
            retry_config,
            api_key,
            limiter,
        })
    }

    /// Rough upstream token estimate for bucket accounting: prompt chars / 4
    /// plus the completion budget.
    fn estimate_tokens(request: &LlmRequest) -> u32 {
        let prompt: usize = request.messages.iter().map(|m| m.content.len() / 4).sum();
        prompt as u32 + request.max_tokens.unwrap_or(1000)
    }

    /// Send the request with retry logic. Rate-limit exhaustion fails
    /// immediately with the bucket's own retry-after.
    pub async fn send(&self, request: &LlmRequest) -> Result<LlmResponse, ProviderError> {
        if let Err(wait) = self.limiter.try_acquire(Self::estimate_tokens(request)) {
            metrics::counter!("provider.rate_limited", "provider" => self.provider.as_str())
                .increment(1);
            return Err(ProviderError::RateLimited {
                retry_after: Some(wait.as_secs().max(1)),
            });
        }

        let mut attempt = 0u32;
        let mut backoff_ms = self.retry_config.initial_backoff_ms;

        loop {
            attempt += 1;
            let result = self.send_once(request).await;

            match result {
                Ok(response) => return Ok(response),
                Err(ref e) if e.is_non_retryable() => {
                    metrics::counter!("provider.errors", "provider" => self.provider.as_str())
                        .increment(1);
                    return result;
                }
                Err(ProviderError::RateLimited { retry_after }) => {
                    if attempt >= self.retry_config.max_attempts {
                        metrics::counter!("provider.errors", "provider" => self.provider.as_str())
                            .increment(1);
                        return Err(ProviderError::RateLimited { retry_after });
                    }
                    let wait = retry_after.map(|s| s * 1000).unwrap_or(backoff_ms);
                    tracing::warn!(
                        provider = self.provider.as_str(),
                        attempt,
                        wait_ms = wait,
                        "Provider rate limited, retrying"
                    );
                    tokio::time::sleep(std::time::Duration::from_millis(wait)).await;
                }
                Err(e) => {
                    if attempt >= self.retry_config.max_attempts {
                        metrics::counter!("provider.errors", "provider" => self.provider.as_str())
                            .increment(1);
                        return Err(e);
                    }
                    let jitter = if self.retry_config.jitter {
                        compute_jitter(attempt, backoff_ms)
                    } else {
                        0
                    };
                    let wait = backoff_ms + jitter;
                    tracing::warn!(
                        provider = self.provider.as_str(),
                        attempt,
                        wait_ms = wait,
                        error = %e,
                        "Provider call failed, retrying"
                    );
                    tokio::time::sleep(std::time::Duration::from_millis(wait)).await;
                    backoff_ms = (backoff_ms as f64 * self.retry_config.backoff_multiplier) as u64;
                    backoff_ms = backoff_ms.min(self.retry_config.max_backoff_ms);
                }
            }
        }
    }

    /// Single attempt — routes to the provider-specific wire module.
    async fn send_once(&self, request: &LlmRequest) -> Result<LlmResponse, ProviderError> {
        match self.provider {
            ProviderType::OpenAi => {
                openai::send_chat_completion(
                    &self.http,
                    &self.api_key,
                    self.config.base_url.as_deref(),
                    request,
                    &self.limiter,
                )
                .await
            }
            ProviderType::Anthropic => {
                anthropic::send_messages(
                    &self.http,
                    &self.api_key,
                    self.config.base_url.as_deref(),
                    request,
                    &self.limiter,
                )
                .await
            }
            ProviderType::Google => {
                google::send_generate_content(
                    &self.http,
                    &self.api_key,
                    self.config.base_url.as_deref(),
                    request,
                )
                .await
            }
            ProviderType::Cohere => {
                cohere::send_chat(
                    &self.http,
                    &self.api_key,
                    self.config.base_url.as_deref(),
                    request,
                )
                .await
            }
            ProviderType::Azure => {
                azure::send_chat_completion(&self.http, &self.api_key, &self.config, request).await
            }
        }
    }

    async fn probe_health(&self) -> bool {
        let url = match self.provider {
            ProviderType::OpenAi => openai::models_url(self.config.base_url.as_deref()),
            ProviderType::Anthropic => anthropic::models_url(self.config.base_url.as_deref()),
            ProviderType::Google => google::models_url(self.config.base_url.as_deref()),
            ProviderType::Cohere => cohere::models_url(self.config.base_url.as_deref()),
            ProviderType::Azure => match azure::deployments_url(&self.config) {
                Some(url) => url,
                None => return false,
            },
        };

        let request = match self.provider {
            ProviderType::Anthropic => self
                .http
                .get(&url)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", anthropic::API_VERSION),
            ProviderType::Azure => self.http.get(&url).header("api-key", &self.api_key),
            ProviderType::Google => self.http.get(&url).query(&[("key", self.api_key.as_str())]),
            _ => self.http.get(&url).bearer_auth(&self.api_key),
        };

        match request
            .timeout(std::time::Duration::from_secs(5))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::warn!(
                    provider = self.provider.as_str(),
                    error = %e,
                    "Provider health probe failed"
                );
                false
            }
        }
    }
}

impl ProviderAdapter for ProviderClient {
    fn provider_type(&self) -> ProviderType {
        self.provider
    }

    fn call<'a>(
        &'a self,
        request: &'a LlmRequest,
    ) -> Pin<Box<dyn Future<Output = Result<LlmResponse, ProviderError>> + Send + 'a>> {
        Box::pin(self.send(request))
    }

    fn health_check<'a>(&'a self) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        Box::pin(self.probe_health())
    }

    fn rate_limit_status(&self) -> RateLimitStatus {
        self.limiter.status()
    }
}

/// Compute jitter for retry backoff using simple hash-based approach.
fn compute_jitter(attempt: u32, backoff_ms: u64) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::hash::DefaultHasher::new();
    attempt.hash(&mut hasher);
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos()
        .hash(&mut hasher);
    hasher.finish() % (backoff_ms / 2 + 1)
}

/// Resync a limiter from authoritative remaining-count headers when the
/// provider sends them.
fn resync_from_headers(
    headers: &reqwest::header::HeaderMap,
    limiter: &ProviderRateLimiter,
    requests_header: &str,
    tokens_header: &str,
) {
    let parse = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u32>().ok())
    };

    if let (Some(requests), Some(tokens)) = (parse(requests_header), parse(tokens_header)) {
        limiter.resync(requests, tokens);
    }
}

/// Routing table from model name prefixes to adapters.
pub struct ProviderRegistry {
    routes: Vec<(String, Arc<dyn ProviderAdapter>)>,
    adapters: Vec<Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    /// Build adapters for every provider whose API key is present.
    pub fn from_config(providers: &ProvidersConfig, retry: &RetryConfig) -> Self {
        let configured: [(ProviderType, &ProviderConfig); 5] = [
            (ProviderType::OpenAi, &providers.openai),
            (ProviderType::Anthropic, &providers.anthropic),
            (ProviderType::Google, &providers.google),
            (ProviderType::Cohere, &providers.cohere),
            (ProviderType::Azure, &providers.azure),
        ];

        let mut registry = Self {
            routes: Vec::new(),
            adapters: Vec::new(),
        };

        for (provider, config) in configured {
            if let Some(client) = ProviderClient::new(provider, config.clone(), retry.clone()) {
                registry.register(config.model_prefixes.clone(), Arc::new(client));
            }
        }

        tracing::info!(
            providers = registry.adapters.len(),
            routes = registry.routes.len(),
            "Provider registry built"
        );
        registry
    }

    /// Register an adapter under the given model prefixes. Test seams
    /// register mock adapters here.
    pub fn register(&mut self, prefixes: Vec<String>, adapter: Arc<dyn ProviderAdapter>) {
        for prefix in prefixes {
            self.routes.push((prefix, Arc::clone(&adapter)));
        }
        self.adapters.push(adapter);
    }

    /// Resolve the adapter for a model name — longest matching prefix wins.
    pub fn route(&self, model: &str) -> Option<Arc<dyn ProviderAdapter>> {
        self.routes
            .iter()
            .filter(|(prefix, _)| model.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, adapter)| Arc::clone(adapter))
    }

    pub fn adapters(&self) -> &[Arc<dyn ProviderAdapter>] {
        &self.adapters
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}
