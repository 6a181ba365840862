use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};

/// One recorded metric observation.
#[derive(Clone, Copy, Debug)]
pub struct Sample {
    pub value: f64,
    pub at: DateTime<Utc>,
}

/// In-memory per-tenant metric samples feeding alert threshold evaluation.
/// Retention is bounded; the pruner sweeps on a fixed cadence.
pub struct MetricsBuffer {
    /// std Mutex — never held across await points.
    samples: Mutex<HashMap<(aegis_common::OrgId, String), Vec<Sample>>>,
    retention: chrono::Duration,
}

impl MetricsBuffer {
    pub fn new(retention_minutes: u64) -> Self {
        Self {
            samples: Mutex::new(HashMap::new()),
            retention: chrono::Duration::minutes(retention_minutes as i64),
        }
    }

    /// Record one observation for a tenant metric.
    pub fn record(&self, org_id: &aegis_common::OrgId, metric: &str, value: f64) {
        let mut samples = self.samples.lock().unwrap();
        samples
            .entry((org_id.clone(), metric.to_string()))
            .or_default()
            .push(Sample {
                value,
                at: Utc::now(),
            });
    }

    /// Sample values for a tenant metric within the trailing window.
    pub fn window(
        &self,
        org_id: &aegis_common::OrgId,
        metric: &str,
        window_minutes: u64,
    ) -> Vec<f64> {
        let cutoff = Utc::now() - chrono::Duration::minutes(window_minutes as i64);
        let samples = self.samples.lock().unwrap();
        samples
            .get(&(org_id.clone(), metric.to_string()))
            .map(|entries| {
                entries
                    .iter()
                    .filter(|s| s.at >= cutoff)
                    .map(|s| s.value)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Tenants with any recorded samples — the evaluation scope for
    /// GLOBAL alert rules.
    pub fn organizations(&self) -> Vec<aegis_common::OrgId> {
        let samples = self.samples.lock().unwrap();
        let mut orgs: Vec<aegis_common::OrgId> =
            samples.keys().map(|(org, _)| org.clone()).collect();
        orgs.sort();
        orgs.dedup();
        orgs
    }

    /// Drop samples older than the retention horizon.
    pub fn prune(&self) {
        let cutoff = Utc::now() - self.retention;
        let mut samples = self.samples.lock().unwrap();
        samples.retain(|_, entries| {
            entries.retain(|s| s.at >= cutoff);
            !entries.is_empty()
        });
    }

    /// Spawn the periodic pruner task.
    pub fn spawn_pruner(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let buffer = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                buffer.prune();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_common::OrgId;

    #[test]
    fn test_record_and_window() {
        let buffer = MetricsBuffer::new(60);
        let org = OrgId::new("acme");

        buffer.record(&org, "violation_rate", 1.0);
        buffer.record(&org, "violation_rate", 0.0);
        buffer.record(&org, "latency_ms", 120.0);

        assert_eq!(buffer.window(&org, "violation_rate", 5).len(), 2);
        assert_eq!(buffer.window(&org, "latency_ms", 5), vec![120.0]);
        assert!(buffer.window(&org, "missing", 5).is_empty());
    }

    #[test]
    fn test_tenant_isolation() {
        let buffer = MetricsBuffer::new(60);
        buffer.record(&OrgId::new("acme"), "latency_ms", 1.0);
        assert!(buffer.window(&OrgId::new("globex"), "latency_ms", 5).is_empty());
        assert_eq!(buffer.organizations(), vec![OrgId::new("acme")]);
    }

    #[test]
    fn test_prune_removes_only_stale_samples() {
        let buffer = MetricsBuffer::new(0); // everything is stale
        let org = OrgId::new("acme");
        buffer.record(&org, "latency_ms", 1.0);
        buffer.prune();
        assert!(buffer.window(&org, "latency_ms", 60).is_empty());
        assert!(buffer.organizations().is_empty());
    }
}
