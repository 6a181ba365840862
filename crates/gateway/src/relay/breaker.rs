use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use aegis_common::config::BreakerConfig;

use crate::providers::ProviderType;

/// Observable breaker position, reported on /readyz and as a gauge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half-open",
        }
    }

    fn gauge_value(&self) -> f64 {
        match self {
            Self::Closed => 0.0,
            Self::HalfOpen => 0.5,
            Self::Open => 1.0,
        }
    }
}

/// Internal phase machine. Unlike the public snapshot, each variant
/// carries the data that drives its transitions.
enum Phase {
    /// Counting consecutive failures toward the trip threshold.
    Closed { failure_streak: u32 },
    /// Shedding calls until the reset timeout elapses.
    Open { tripped_at: Instant },
    /// A probe call has been admitted; its outcome decides the next phase.
    HalfOpen,
}

/// Per-provider circuit breaker.
///
/// Trips open after a run of consecutive failures, sheds traffic for the
/// reset timeout, then admits a single probe. A successful probe closes
/// the circuit; a failed one re-opens it immediately.
pub struct CircuitBreaker {
    provider: String,
    threshold: u32,
    reset_timeout: Duration,
    /// std Mutex — transitions are quick and never span an await point.
    phase: Mutex<Phase>,
}

impl CircuitBreaker {
    pub fn new(provider: &str, config: &BreakerConfig) -> Self {
        Self {
            provider: provider.to_string(),
            threshold: config.failure_threshold,
            reset_timeout: Duration::from_secs(config.reset_timeout_seconds),
            phase: Mutex::new(Phase::Closed { failure_streak: 0 }),
        }
    }

    /// Whether the next call may go upstream. An open breaker whose reset
    /// timeout has elapsed flips to half-open and admits the probe.
    pub fn admit(&self) -> bool {
        let mut phase = self.phase.lock().unwrap();
        match *phase {
            Phase::Closed { .. } | Phase::HalfOpen => true,
            Phase::Open { tripped_at } => {
                if tripped_at.elapsed() < self.reset_timeout {
                    return false;
                }
                tracing::info!(
                    provider = self.provider.as_str(),
                    "Circuit breaker admitting half-open probe"
                );
                *phase = Phase::HalfOpen;
                true
            }
        }
    }

    /// A successful call clears the streak and closes the circuit from any
    /// phase.
    pub fn on_success(&self) {
        let mut phase = self.phase.lock().unwrap();
        if matches!(*phase, Phase::Open { .. } | Phase::HalfOpen) {
            tracing::info!(
                provider = self.provider.as_str(),
                "Circuit breaker closed after successful call"
            );
            metrics::counter!("breaker.recoveries", "provider" => self.provider.clone())
                .increment(1);
        }
        *phase = Phase::Closed { failure_streak: 0 };
    }

    /// A failed call extends the streak. Reaching the threshold trips the
    /// circuit, as does any failure of the half-open probe. A failure while
    /// already open restarts the cooldown.
    pub fn on_failure(&self) {
        let mut phase = self.phase.lock().unwrap();
        match *phase {
            Phase::Closed { failure_streak } => {
                let streak = failure_streak + 1;
                if streak >= self.threshold {
                    self.trip(&mut phase, streak);
                } else {
                    *phase = Phase::Closed {
                        failure_streak: streak,
                    };
                }
            }
            Phase::HalfOpen => self.trip(&mut phase, self.threshold),
            Phase::Open { .. } => {
                *phase = Phase::Open {
                    tripped_at: Instant::now(),
                };
            }
        }
    }

    fn trip(&self, phase: &mut Phase, streak: u32) {
        tracing::warn!(
            provider = self.provider.as_str(),
            failures = streak,
            threshold = self.threshold,
            "Circuit breaker tripped open"
        );
        metrics::counter!("breaker.trips", "provider" => self.provider.clone()).increment(1);
        *phase = Phase::Open {
            tripped_at: Instant::now(),
        };
    }

    /// Snapshot of the current phase.
    pub fn state(&self) -> CircuitState {
        match *self.phase.lock().unwrap() {
            Phase::Closed { .. } => CircuitState::Closed,
            Phase::Open { .. } => CircuitState::Open,
            Phase::HalfOpen => CircuitState::HalfOpen,
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }
}

/// One circuit breaker per registered provider.
pub struct BreakerRegistry {
    breakers: Mutex<HashMap<ProviderType, Arc<CircuitBreaker>>>,
    config: BreakerConfig,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            breakers: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Breaker for the given provider, created on first use.
    pub fn for_provider(&self, provider: ProviderType) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().unwrap();
        Arc::clone(
            breakers
                .entry(provider)
                .or_insert_with(|| Arc::new(CircuitBreaker::new(provider.as_str(), &self.config))),
        )
    }

    /// Snapshot of every breaker's state, for readiness reporting.
    pub fn states(&self) -> Vec<(String, CircuitState)> {
        let breakers = self.breakers.lock().unwrap();
        breakers
            .values()
            .map(|b| (b.provider().to_string(), b.state()))
            .collect()
    }

    /// Emit one gauge per breaker.
    pub fn report_metrics(&self) {
        let breakers = self.breakers.lock().unwrap();
        for breaker in breakers.values() {
            metrics::gauge!("breaker.state", "provider" => breaker.provider().to_string())
                .set(breaker.state().gauge_value());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, reset_timeout_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            &BreakerConfig {
                failure_threshold: threshold,
                reset_timeout_seconds: 0,
            },
        )
        .with_reset_timeout(Duration::from_millis(reset_timeout_ms))
    }

    impl CircuitBreaker {
        fn with_reset_timeout(mut self, reset_timeout: Duration) -> Self {
            self.reset_timeout = reset_timeout;
            self
        }
    }

    #[test]
    fn test_trips_open_at_threshold() {
        let cb = breaker(3, 60_000);
        assert!(cb.admit());

        cb.on_failure();
        cb.on_failure();
        assert_eq!(cb.state(), CircuitState::Closed);

        cb.on_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.admit());
    }

    #[test]
    fn test_success_clears_the_streak() {
        let cb = breaker(3, 60_000);
        cb.on_failure();
        cb.on_failure();
        cb.on_success();
        cb.on_failure();
        cb.on_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_cooldown_admits_probe_and_success_closes() {
        let cb = breaker(1, 1);
        cb.on_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        std::thread::sleep(Duration::from_millis(10));
        assert!(cb.admit());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.on_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_probe_failure_reopens_immediately() {
        let cb = breaker(5, 1);
        for _ in 0..5 {
            cb.on_failure();
        }
        assert_eq!(cb.state(), CircuitState::Open);

        std::thread::sleep(Duration::from_millis(10));
        assert!(cb.admit());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        // One probe failure is enough — no second streak is required.
        cb.on_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.admit());
    }

    #[test]
    fn test_failure_while_open_restarts_cooldown() {
        let cb = breaker(1, 50);
        cb.on_failure();
        assert!(!cb.admit());

        std::thread::sleep(Duration::from_millis(30));
        cb.on_failure();

        // The original cooldown would have expired by now; the refreshed
        // one has not.
        std::thread::sleep(Duration::from_millis(30));
        assert!(!cb.admit());
    }

    #[test]
    fn test_registry_reuses_breakers() {
        let registry = BreakerRegistry::new(BreakerConfig::default());
        let a = registry.for_provider(ProviderType::OpenAi);
        let b = registry.for_provider(ProviderType::OpenAi);
        a.on_failure();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_states_snapshot() {
        let registry = BreakerRegistry::new(BreakerConfig {
            failure_threshold: 1,
            reset_timeout_seconds: 60,
        });
        registry.for_provider(ProviderType::OpenAi).on_failure();
        registry.for_provider(ProviderType::Cohere);

        let mut states = registry.states();
        states.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(
            states,
            vec![
                ("cohere".to_string(), CircuitState::Closed),
                ("openai".to_string(), CircuitState::Open),
            ]
        );
    }
}
