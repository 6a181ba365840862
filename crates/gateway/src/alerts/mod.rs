mod engine;
mod metrics;

pub use engine::AlertEngine;
pub use metrics::MetricsBuffer;

/// Metric names the orchestrator records per request. Alert rule
/// conditions reference these.
pub const METRIC_VIOLATION_RATE: &str = "violation_rate";
pub const METRIC_BLOCKED_COUNT: &str = "blocked_content_count";
pub const METRIC_EVALUATION_FAILURE_RATE: &str = "evaluation_failure_rate";
pub const METRIC_LATENCY_MS: &str = "latency_ms";
