use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{AlertId, AlertRuleId, OrgId};
use crate::types::{RuleScope, Severity};

/// Comparison operator for alert thresholds and DSL score comparisons.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CmpOperator {
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "==", alias = "=")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
}

impl CmpOperator {
    /// Apply the operator as written; equality is exact.
    pub fn compare(&self, left: f64, right: f64) -> bool {
        match self {
            Self::Lt => left < right,
            Self::Le => left <= right,
            Self::Gt => left > right,
            Self::Ge => left >= right,
            Self::Eq => left == right,
            Self::Ne => left != right,
        }
    }
}

/// How samples inside the window collapse to one value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    Avg,
    Sum,
    Count,
    Max,
    Min,
}

/// One metric threshold. All of a rule's conditions must hold to trigger.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertCondition {
    /// Metric name ("violation_rate", "blocked_content_count", ...).
    pub metric: String,
    pub operator: CmpOperator,
    pub value: f64,
    pub time_window_minutes: u64,
    pub aggregation: Aggregation,
}

/// Delivery channel for a triggered alert.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertChannel {
    Email,
    Slack,
    Webhook,
    Sms,
    Dashboard,
}

/// A threshold rule evaluated on a fixed cadence against recent samples.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRule {
    pub id: AlertRuleId,
    #[serde(rename = "orgId")]
    pub scope: RuleScope,
    pub name: String,
    pub enabled: bool,
    pub conditions: Vec<AlertCondition>,
    pub actions: Vec<AlertChannel>,
    pub cooldown_minutes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_triggered: Option<DateTime<Utc>>,
}

/// A triggered alert. Append-only; resolution flips a flag, never deletes.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: AlertId,
    pub org_id: OrgId,
    /// Rule name that produced this alert.
    #[serde(rename = "type")]
    pub alert_type: String,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub timestamp: DateTime<Utc>,
    pub resolved: bool,
    pub channels: Vec<AlertChannel>,
}
