use thiserror::Error;

/// Top-level error type for gateway operations.
#[derive(Debug, Error)]
pub enum GatewayError {
    // --- Caller errors (reported, never retried) ---
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    // --- Load shedding ---
    #[error("Rate limited (retry after {retry_after:?}s)")]
    RateLimited { retry_after: Option<u64> },

    #[error("Server busy")]
    ServerBusy,

    #[error("Deadline exceeded: {0}")]
    Deadline(String),

    // --- Upstream errors (retried at the adapter, then surfaced) ---
    #[error("Upstream provider failed: {0}")]
    UpstreamFailed(String),

    #[error("No healthy provider for {0}")]
    NoHealthyProvider(String),

    #[error("Embedding service unavailable: {0}")]
    EmbeddingUnavailable(String),

    // --- Pipeline errors ---
    #[error("Evaluation error: {0}")]
    Evaluation(String),

    #[error("Audit persistence failed: {0}")]
    AuditFailure(String),

    #[error("Store error: {0}")]
    Store(String),

    // --- Operational errors ---
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Internal(String),
}

impl GatewayError {
    /// Whether the request fails closed — these must never be swallowed
    /// into a degraded-but-successful response.
    pub fn is_fatal_to_request(&self) -> bool {
        matches!(
            self,
            Self::AuditFailure(_) | Self::Deadline(_) | Self::NoHealthyProvider(_)
        )
    }

    /// Whether this error is recovered locally (neutral result, cache miss,
    /// fallback embedding) without failing the request.
    pub fn is_locally_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Evaluation(_) | Self::EmbeddingUnavailable(_) | Self::Store(_)
        )
    }
}

/// Result type alias for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;
