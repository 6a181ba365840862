pub mod breaker;
pub mod cache;
pub mod dedup;

pub use breaker::{BreakerRegistry, CircuitBreaker, CircuitState};
pub use cache::{request_fingerprint, ResponseCache};
pub use dedup::Deduplicator;

use aegis_common::types::{LlmRequest, LlmResponse};
use aegis_common::{GatewayError, OrgId};

use crate::providers::{ProviderError, ProviderRegistry};

/// Result of a relayed provider call.
#[derive(Debug)]
pub struct RelayOutcome {
    pub response: LlmResponse,
    pub cached: bool,
}

/// The provider call pipeline: cache lookup, then dedup coalescing, then
/// the circuit breaker, then the adapter itself. The three wrappers are
/// orthogonal; this type owns their composition order.
pub struct ProviderRelay {
    registry: ProviderRegistry,
    cache: ResponseCache,
    dedup: Deduplicator,
    breakers: BreakerRegistry,
}

impl ProviderRelay {
    pub fn new(registry: ProviderRegistry, cache: ResponseCache, breakers: BreakerRegistry) -> Self {
        Self {
            registry,
            cache,
            dedup: Deduplicator::new(),
            breakers,
        }
    }

    /// Execute a request through cache, dedup, and breaker.
    pub async fn execute(
        &self,
        org_id: &OrgId,
        request: &LlmRequest,
    ) -> Result<RelayOutcome, GatewayError> {
        let fingerprint = request_fingerprint(org_id, request);
        let cacheable = request.is_cacheable();

        if cacheable {
            if let Some(response) = self.cache.get(&fingerprint).await {
                return Ok(RelayOutcome {
                    response,
                    cached: true,
                });
            }
        }

        let adapter = self.registry.route(&request.model).ok_or_else(|| {
            GatewayError::BadRequest(format!("no provider routes model '{}'", request.model))
        })?;

        let breaker = self.breakers.for_provider(adapter.provider_type());
        if !breaker.admit() {
            metrics::counter!("relay.breaker_rejections", "provider" => adapter.provider_type().as_str())
                .increment(1);
            return Err(GatewayError::NoHealthyProvider(
                adapter.provider_type().as_str().into(),
            ));
        }

        let response = self
            .dedup
            .execute(&fingerprint, async {
                let result = adapter.call(request).await;
                match &result {
                    Ok(_) => breaker.on_success(),
                    // Rate limiting is back-pressure, not provider sickness.
                    Err(ProviderError::RateLimited { .. }) => {}
                    Err(_) => breaker.on_failure(),
                }
                result.map_err(Into::into)
            })
            .await?;

        if cacheable {
            self.cache.insert(&fingerprint, &response).await;
        }

        Ok(RelayOutcome {
            response,
            cached: false,
        })
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn breakers(&self) -> &BreakerRegistry {
        &self.breakers
    }
}
