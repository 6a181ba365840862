use serde::{Deserialize, Serialize};

/// Top-level system configuration, deserialized from gateway.toml.
///
/// Every section has serde defaults so the gateway can start with no config
/// file at all; a file that exists but fails to parse is a fatal startup
/// error.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub server: ServerConfig,
    pub providers: ProvidersConfig,
    pub cache: CacheConfig,
    pub breaker: BreakerConfig,
    pub retry: RetryConfig,
    pub retrieval: RetrievalConfig,
    pub evaluators: EvaluatorsConfig,
    pub webhooks: WebhookDefaults,
    pub alerting: AlertingConfig,
    pub limits: TenantLimits,
}

/// Request-handling parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Hard per-request deadline. On expiry all in-flight stages cancel.
    pub request_deadline_seconds: u64,
    /// Max concurrently executing pipeline requests before ServerBusy.
    pub max_in_flight_requests: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            request_deadline_seconds: 60,
            max_in_flight_requests: 512,
        }
    }
}

/// Per-provider adapter configuration, keyed by provider name.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub openai: ProviderConfig,
    pub anthropic: ProviderConfig,
    pub google: ProviderConfig,
    pub cohere: ProviderConfig,
    pub azure: ProviderConfig,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            openai: ProviderConfig {
                model_prefixes: vec!["gpt-".into(), "o1".into(), "o3".into()],
                api_key_env: "OPENAI_API_KEY".into(),
                ..ProviderConfig::default()
            },
            anthropic: ProviderConfig {
                model_prefixes: vec!["claude-".into()],
                api_key_env: "ANTHROPIC_API_KEY".into(),
                ..ProviderConfig::default()
            },
            google: ProviderConfig {
                model_prefixes: vec!["gemini-".into()],
                api_key_env: "GOOGLE_API_KEY".into(),
                ..ProviderConfig::default()
            },
            cohere: ProviderConfig {
                model_prefixes: vec!["command".into()],
                api_key_env: "COHERE_API_KEY".into(),
                ..ProviderConfig::default()
            },
            azure: ProviderConfig {
                // Azure routes explicit deployment names only.
                model_prefixes: vec![],
                api_key_env: "AZURE_OPENAI_API_KEY".into(),
                ..ProviderConfig::default()
            },
        }
    }
}

/// Configuration for a single provider adapter.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Model name prefixes routed to this provider (e.g. "gpt-", "claude-").
    pub model_prefixes: Vec<String>,
    /// Base URL for the API. Defaults to the provider's standard URL.
    /// Override for proxies or Azure resource endpoints.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Environment variable name for the API key.
    pub api_key_env: String,
    /// Token-bucket seed when the provider sends no rate-limit headers.
    pub requests_per_minute: u32,
    pub tokens_per_minute: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            model_prefixes: Vec::new(),
            base_url: None,
            api_key_env: String::new(),
            requests_per_minute: 600,
            tokens_per_minute: 200_000,
        }
    }
}

/// Response cache parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cached response TTL in seconds.
    pub ttl_seconds: u64,
    /// Max entries kept by the in-memory backend.
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 3600,
            max_entries: 10_000,
        }
    }
}

/// Circuit breaker thresholds, shared by all provider breakers.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures before the breaker opens.
    pub failure_threshold: u32,
    /// Seconds before an open breaker allows a half-open probe.
    pub reset_timeout_seconds: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_seconds: 30,
        }
    }
}

/// Retry configuration for upstream calls.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 10_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Context retrieval parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Max characters per document chunk.
    pub chunk_max_chars: usize,
    /// Default result count for searches.
    pub default_limit: usize,
    /// Default cosine similarity floor.
    pub default_threshold: f64,
    pub embedding: EmbeddingConfig,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            chunk_max_chars: 1000,
            default_limit: 10,
            default_threshold: 0.7,
            embedding: EmbeddingConfig::default(),
        }
    }
}

/// Embedding provider configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Provider name ("openai").
    pub provider: String,
    /// Model identifier (e.g. "text-embedding-3-small").
    pub model: String,
    /// Embedding vector dimensions.
    pub dimensions: u32,
    /// Max texts per batch API call.
    pub batch_size: u32,
    /// Entries held by the per-text memoization cache.
    pub cache_capacity: usize,
    /// Base URL for the embedding API.
    pub base_url: String,
    /// Environment variable name for the API key.
    pub api_key_env: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "openai".into(),
            model: "text-embedding-3-small".into(),
            dimensions: 1536,
            batch_size: 128,
            cache_capacity: 10_000,
            base_url: "https://api.openai.com/v1".into(),
            api_key_env: "OPENAI_API_KEY".into(),
        }
    }
}

/// Evaluator mesh parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluatorsConfig {
    /// Wall-clock budget per built-in evaluator.
    pub timeout_seconds: u64,
    /// Directory scanned for third-party plugin manifests at startup.
    pub plugin_dir: Option<String>,
}

impl Default for EvaluatorsConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 10,
            plugin_dir: None,
        }
    }
}

/// Webhook delivery defaults, overridable per endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookDefaults {
    /// Per-attempt delivery timeout.
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub backoff_multiplier: f64,
    pub max_backoff_seconds: u64,
}

impl Default for WebhookDefaults {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            max_retries: 5,
            backoff_multiplier: 2.0,
            max_backoff_seconds: 3600,
        }
    }
}

/// Alert engine cadence and metric retention.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertingConfig {
    /// Seconds between alert rule evaluation passes.
    pub evaluation_interval_seconds: u64,
    /// Metric samples older than this are pruned.
    pub sample_retention_minutes: u64,
    /// Seconds between prune sweeps.
    pub prune_interval_seconds: u64,
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            evaluation_interval_seconds: 60,
            sample_retention_minutes: 60,
            prune_interval_seconds: 300,
        }
    }
}

/// Per-tenant quota limits.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TenantLimits {
    /// Pipeline requests per tenant per minute.
    pub requests_per_minute: u32,
}

impl Default for TenantLimits {
    fn default() -> Self {
        Self {
            requests_per_minute: 600,
        }
    }
}
