use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;

use aegis_common::types::{
    Aggregation, Alert, AlertChannel, AlertCondition, AlertRule, RuleScope, Severity,
    WebhookEvent, WebhookEventType,
};
use aegis_common::{AlertId, AlertRuleId, GatewayError, OrgId, Result};

use crate::store::{get_json, scan_json, set_json, KeyValueStore};
use crate::webhooks::WebhookDispatcher;

use super::metrics::MetricsBuffer;

fn rule_key(rule: &AlertRule) -> String {
    let scope = match &rule.scope {
        RuleScope::Global(_) => "GLOBAL".to_string(),
        RuleScope::Org(org) => org.to_string(),
    };
    format!("alertrules:{}:{}", scope, rule.id)
}

fn alert_key(org_id: &OrgId, id: AlertId) -> String {
    format!("alerts:{}:{}", org_id, id)
}

/// Periodically evaluates alert rules against the metric buffer, creates
/// alerts, and fans them out to their channels.
pub struct AlertEngine {
    store: Arc<dyn KeyValueStore>,
    buffer: Arc<MetricsBuffer>,
    dispatcher: Arc<WebhookDispatcher>,
}

impl AlertEngine {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        buffer: Arc<MetricsBuffer>,
        dispatcher: Arc<WebhookDispatcher>,
    ) -> Self {
        Self {
            store,
            buffer,
            dispatcher,
        }
    }

    // --- Rule CRUD ---------------------------------------------------------

    pub async fn create_rule(&self, rule: AlertRule) -> Result<AlertRule> {
        if rule.name.trim().is_empty() {
            return Err(GatewayError::BadRequest("alert rule name must not be empty".into()));
        }
        if rule.conditions.is_empty() {
            return Err(GatewayError::BadRequest(
                "alert rule requires at least one condition".into(),
            ));
        }
        set_json(self.store.as_ref(), &rule_key(&rule), &rule).await?;
        tracing::info!(rule = rule.name.as_str(), rule_id = %rule.id, "Alert rule created");
        Ok(rule)
    }

    pub async fn rules_for(&self, org_id: &OrgId) -> Result<Vec<AlertRule>> {
        let mut rules: Vec<AlertRule> = scan_json(self.store.as_ref(), "alertrules:GLOBAL:").await?;
        rules.extend(
            scan_json::<AlertRule>(self.store.as_ref(), &format!("alertrules:{}:", org_id))
                .await?,
        );
        Ok(rules)
    }

    pub async fn delete_rule(&self, org_id: &OrgId, id: AlertRuleId) -> Result<bool> {
        Ok(self
            .store
            .delete(&format!("alertrules:{}:{}", org_id, id))
            .await?)
    }

    // --- Alert queries -----------------------------------------------------

    /// Alerts for a tenant, newest first, with optional filters. Resolved
    /// alerts stay queryable forever.
    pub async fn alerts(
        &self,
        org_id: &OrgId,
        resolved: Option<bool>,
        severity: Option<Severity>,
        limit: Option<usize>,
    ) -> Result<Vec<Alert>> {
        let mut alerts: Vec<Alert> =
            scan_json(self.store.as_ref(), &format!("alerts:{}:", org_id)).await?;
        alerts.retain(|a| {
            resolved.is_none_or(|r| a.resolved == r)
                && severity.is_none_or(|s| a.severity == s)
        });
        alerts.sort_by_key(|a| std::cmp::Reverse(a.timestamp));
        if let Some(limit) = limit {
            alerts.truncate(limit);
        }
        Ok(alerts)
    }

    /// Mark an alert resolved. The record is never deleted.
    pub async fn resolve(&self, org_id: &OrgId, id: AlertId) -> Result<Alert> {
        let key = alert_key(org_id, id);
        let mut alert: Alert = get_json(self.store.as_ref(), &key)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("alert {}", id)))?;
        alert.resolved = true;
        set_json(self.store.as_ref(), &key, &alert).await?;
        Ok(alert)
    }

    // --- Evaluation --------------------------------------------------------

    /// One evaluation pass over every enabled rule for every active tenant.
    /// Rules evaluate serially — cooldown stamping requires it.
    pub async fn evaluate_all(&self) -> Result<Vec<Alert>> {
        let mut triggered = Vec::new();

        for org_id in self.buffer.organizations() {
            for rule in self.rules_for(&org_id).await? {
                if !rule.enabled {
                    continue;
                }
                if let Some(last) = rule.last_triggered {
                    let cooldown = chrono::Duration::minutes(rule.cooldown_minutes as i64);
                    if Utc::now() < last + cooldown {
                        continue;
                    }
                }

                if self.conditions_hold(&org_id, &rule.conditions) {
                    let alert = self.trigger(&org_id, rule).await?;
                    triggered.push(alert);
                }
            }
        }

        Ok(triggered)
    }

    /// All conditions must hold on the tenant's samples.
    fn conditions_hold(&self, org_id: &OrgId, conditions: &[AlertCondition]) -> bool {
        !conditions.is_empty()
            && conditions.iter().all(|condition| {
                let samples =
                    self.buffer
                        .window(org_id, &condition.metric, condition.time_window_minutes);
                match aggregate(&samples, condition.aggregation) {
                    Some(value) => condition.operator.compare(value, condition.value),
                    None => false,
                }
            })
    }

    async fn trigger(&self, org_id: &OrgId, mut rule: AlertRule) -> Result<Alert> {
        let alert = Alert {
            id: AlertId::new(),
            org_id: org_id.clone(),
            alert_type: rule.name.clone(),
            severity: severity_for(&rule),
            title: format!("Alert: {}", rule.name),
            description: describe_conditions(&rule.conditions),
            timestamp: Utc::now(),
            resolved: false,
            channels: rule.actions.clone(),
        };

        set_json(self.store.as_ref(), &alert_key(org_id, alert.id), &alert).await?;
        metrics::counter!("alerts.triggered", "rule" => rule.name.clone()).increment(1);
        tracing::warn!(
            org_id = %org_id,
            rule = rule.name.as_str(),
            severity = ?alert.severity,
            "Alert triggered"
        );

        for channel in &alert.channels {
            self.notify(channel, &alert).await;
        }

        // Stamp the cooldown origin.
        rule.last_triggered = Some(alert.timestamp);
        set_json(self.store.as_ref(), &rule_key(&rule), &rule).await?;

        Ok(alert)
    }

    /// Deliver to one channel. Email/slack/sms/dashboard go to external
    /// collaborators; the webhook channel reuses the dispatcher.
    async fn notify(&self, channel: &AlertChannel, alert: &Alert) {
        match channel {
            AlertChannel::Webhook => {
                let event = WebhookEvent::new(
                    WebhookEventType::ThresholdExceeded,
                    alert.org_id.clone(),
                    json!({
                        "alertId": alert.id,
                        "type": alert.alert_type,
                        "severity": alert.severity,
                        "title": alert.title,
                        "description": alert.description,
                    }),
                );
                if let Err(e) = self.dispatcher.dispatch(event).await {
                    tracing::warn!(error = %e, "Alert webhook dispatch failed");
                }
            }
            other => {
                // External notification collaborators (email, slack, sms,
                // dashboard socket) are outside the core.
                tracing::info!(
                    channel = ?other,
                    alert_id = %alert.id,
                    title = alert.title.as_str(),
                    "Alert routed to notification channel"
                );
            }
        }
    }

    /// Spawn the periodic evaluation task.
    pub fn spawn(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if let Err(e) = self.evaluate_all().await {
                    tracing::error!(error = %e, "Alert evaluation pass failed");
                }
            }
        })
    }
}

fn aggregate(samples: &[f64], aggregation: Aggregation) -> Option<f64> {
    if samples.is_empty() {
        // count of an empty window is 0; everything else is undefined.
        return match aggregation {
            Aggregation::Count => Some(0.0),
            _ => None,
        };
    }
    Some(match aggregation {
        Aggregation::Avg => samples.iter().sum::<f64>() / samples.len() as f64,
        Aggregation::Sum => samples.iter().sum(),
        Aggregation::Count => samples.len() as f64,
        Aggregation::Max => samples.iter().fold(f64::MIN, |a, &b| a.max(b)),
        Aggregation::Min => samples.iter().fold(f64::MAX, |a, &b| a.min(b)),
    })
}

/// Multi-condition rules fire only when several thresholds cross at once,
/// which warrants the higher severity.
fn severity_for(rule: &AlertRule) -> Severity {
    if rule.conditions.len() >= 2 {
        Severity::Critical
    } else {
        Severity::High
    }
}

fn describe_conditions(conditions: &[AlertCondition]) -> String {
    conditions
        .iter()
        .map(|c| {
            format!(
                "{:?}({}) over {}m crossed {}",
                c.aggregation, c.metric, c.time_window_minutes, c.value
            )
        })
        .collect::<Vec<_>>()
        .join("; ")
}
