mod fallback;
mod openai;

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use base64::Engine;
use lru::LruCache;

use aegis_common::config::{EmbeddingConfig, RetryConfig};

pub use fallback::pseudo_embedding;

/// A query vector plus whether it came from the deterministic fallback
/// instead of the provider.
pub struct QueryEmbedding {
    pub vector: Vec<f32>,
    pub degraded: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Embedding API HTTP error: {0}")]
    Http(String),

    #[error("Embedding API auth error: {0}")]
    Auth(String),

    #[error("Embedding API rate limited (retry after {retry_after:?}s)")]
    RateLimited { retry_after: Option<u64> },

    #[error("Embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: u32, got: usize },

    #[error("Embedding API error: {0}")]
    Api(String),

    #[error("Embedding provider disabled (no API key)")]
    Disabled,
}

impl From<EmbeddingError> for aegis_common::GatewayError {
    fn from(e: EmbeddingError) -> Self {
        aegis_common::GatewayError::EmbeddingUnavailable(e.to_string())
    }
}

/// Client for computing text embeddings via an external API, with a
/// transparent per-text LRU memoization cache.
pub struct EmbeddingClient {
    http: reqwest::Client,
    config: EmbeddingConfig,
    retry_config: RetryConfig,
    /// None when the API key env var is unset — every call degrades.
    api_key: Option<String>,
    /// std Mutex — lookups are quick and never held across await points.
    cache: Mutex<LruCache<String, Arc<Vec<f32>>>>,
}

impl EmbeddingClient {
    /// Create an embedding client. A missing API key does not fail
    /// construction: ingestion will error and search will degrade.
    pub fn new(config: EmbeddingConfig, retry_config: RetryConfig) -> Self {
        let api_key = match std::env::var(&config.api_key_env) {
            Ok(key) if !key.is_empty() => Some(key),
            _ => {
                tracing::warn!(
                    env_var = config.api_key_env.as_str(),
                    "Embedding API key not set — ingestion disabled, search will degrade"
                );
                None
            }
        };

        let capacity = NonZeroUsize::new(config.cache_capacity.max(1)).unwrap();

        Self {
            http: reqwest::Client::new(),
            config,
            retry_config,
            api_key,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.api_key.is_some()
    }

    pub fn dimensions(&self) -> u32 {
        self.config.dimensions
    }

    /// Memoization key: base64 of the text, truncated. Collisions between
    /// long texts sharing a 96-char prefix are accepted.
    fn cache_key(text: &str) -> String {
        let mut key = base64::engine::general_purpose::STANDARD.encode(text.as_bytes());
        key.truncate(96);
        key
    }

    /// Seed the memoization cache directly. Test seam: lets retrieval
    /// tests run ingestion and search without a live provider.
    #[cfg(test)]
    pub(crate) fn prime_cache(&self, text: &str, vector: Vec<f32>) {
        self.cache
            .lock()
            .unwrap()
            .put(Self::cache_key(text), Arc::new(vector));
    }

    /// Embed a single text string.
    pub async fn embed_single(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let results = self.embed_batch(&[text.to_string()]).await?;
        results
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::Api("Empty response from embedding API".into()))
    }

    /// Embed a batch of texts, consulting the cache per text and splitting
    /// API calls per config.batch_size. Fails when the provider fails —
    /// ingestion callers surface this, search callers use `embed_query`.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut results: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut missing: Vec<usize> = Vec::new();

        {
            let mut cache = self.cache.lock().unwrap();
            for (i, text) in texts.iter().enumerate() {
                match cache.get(&Self::cache_key(text)) {
                    Some(vector) => results[i] = Some(vector.as_ref().clone()),
                    None => missing.push(i),
                }
            }
        }

        if !missing.is_empty() {
            metrics::counter!("retrieval.embedding.cache_miss").increment(missing.len() as u64);

            let pending: Vec<String> = missing.iter().map(|&i| texts[i].clone()).collect();
            let mut fetched = Vec::with_capacity(pending.len());

            for batch in pending.chunks(self.config.batch_size as usize) {
                fetched.extend(self.call_api(batch).await?);
            }

            let mut cache = self.cache.lock().unwrap();
            for (&i, vector) in missing.iter().zip(fetched.into_iter()) {
                cache.put(Self::cache_key(&texts[i]), Arc::new(vector.clone()));
                results[i] = Some(vector);
            }
        } else {
            metrics::counter!("retrieval.embedding.cache_hit").increment(texts.len() as u64);
        }

        Ok(results.into_iter().map(|r| r.unwrap_or_default()).collect())
    }

    /// Embed a search query. Never fails: provider errors fall back to the
    /// deterministic pseudo-embedding and flag the result as degraded.
    pub async fn embed_query(&self, query: &str) -> QueryEmbedding {
        match self.embed_batch(&[query.to_string()]).await {
            Ok(mut vectors) if !vectors.is_empty() => QueryEmbedding {
                vector: vectors.remove(0),
                degraded: false,
            },
            Ok(_) => QueryEmbedding {
                vector: pseudo_embedding(query, self.config.dimensions as usize),
                degraded: true,
            },
            Err(e) => {
                tracing::warn!(error = %e, "Embedding provider failed, using fallback vector");
                metrics::counter!("retrieval.embedding.fallback").increment(1);
                QueryEmbedding {
                    vector: pseudo_embedding(query, self.config.dimensions as usize),
                    degraded: true,
                }
            }
        }
    }

    /// Call the embedding API with retry logic.
    async fn call_api(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let api_key = self.api_key.as_deref().ok_or(EmbeddingError::Disabled)?;

        let mut attempt = 0u32;
        let mut backoff_ms = self.retry_config.initial_backoff_ms;

        loop {
            attempt += 1;
            match openai::call_embeddings(
                &self.http,
                api_key,
                &self.config.base_url,
                &self.config.model,
                self.config.dimensions,
                texts,
            )
            .await
            {
                Ok(embeddings) => return Ok(embeddings),
                Err(e @ EmbeddingError::Auth(_))
                | Err(e @ EmbeddingError::DimensionMismatch { .. }) => {
                    // Non-retryable errors.
                    metrics::counter!("retrieval.embedding.errors").increment(1);
                    return Err(e);
                }
                Err(EmbeddingError::RateLimited { retry_after }) => {
                    if attempt >= self.retry_config.max_attempts {
                        metrics::counter!("retrieval.embedding.errors").increment(1);
                        return Err(EmbeddingError::RateLimited { retry_after });
                    }
                    let wait = retry_after.map(|s| s * 1000).unwrap_or(backoff_ms);
                    tracing::warn!(attempt, wait_ms = wait, "Embedding rate limited, retrying");
                    tokio::time::sleep(std::time::Duration::from_millis(wait)).await;
                }
                Err(e) => {
                    if attempt >= self.retry_config.max_attempts {
                        metrics::counter!("retrieval.embedding.errors").increment(1);
                        return Err(e);
                    }
                    tracing::warn!(attempt, wait_ms = backoff_ms, error = %e, "Embedding API error, retrying");
                    tokio::time::sleep(std::time::Duration::from_millis(backoff_ms)).await;
                    backoff_ms = (backoff_ms as f64 * self.retry_config.backoff_multiplier) as u64;
                    backoff_ms = backoff_ms.min(self.retry_config.max_backoff_ms);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> EmbeddingClient {
        // Key env var that is never set: the client is disabled and every
        // query takes the fallback path.
        let config = EmbeddingConfig {
            api_key_env: "AEGIS_TEST_UNSET_EMBEDDING_KEY".into(),
            dimensions: 64,
            ..EmbeddingConfig::default()
        };
        EmbeddingClient::new(config, RetryConfig::default())
    }

    #[tokio::test]
    async fn test_disabled_client_fails_batch_embedding() {
        let err = client().embed_batch(&["text".into()]).await.unwrap_err();
        assert!(matches!(err, EmbeddingError::Disabled));
    }

    #[tokio::test]
    async fn test_disabled_client_degrades_query_embedding() {
        let embedded = client().embed_query("some query").await;
        assert!(embedded.degraded);
        assert_eq!(embedded.vector.len(), 64);

        // Deterministic: the same query always produces the same vector.
        let again = client().embed_query("some query").await;
        assert_eq!(embedded.vector, again.vector);
    }

    #[test]
    fn test_cache_key_truncates() {
        let long = "x".repeat(10_000);
        assert!(EmbeddingClient::cache_key(&long).len() <= 96);
        assert_ne!(
            EmbeddingClient::cache_key("abc"),
            EmbeddingClient::cache_key("abd")
        );
    }
}
