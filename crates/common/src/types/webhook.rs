use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{EndpointId, EventId, OrgId};

/// Pipeline outcomes a tenant endpoint can subscribe to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WebhookEventType {
    #[serde(rename = "content.blocked")]
    ContentBlocked,
    #[serde(rename = "content.rewritten")]
    ContentRewritten,
    #[serde(rename = "policy.violation")]
    PolicyViolation,
    #[serde(rename = "threshold.exceeded")]
    ThresholdExceeded,
    #[serde(rename = "evaluation.completed")]
    EvaluationCompleted,
}

impl WebhookEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ContentBlocked => "content.blocked",
            Self::ContentRewritten => "content.rewritten",
            Self::PolicyViolation => "policy.violation",
            Self::ThresholdExceeded => "threshold.exceeded",
            Self::EvaluationCompleted => "evaluation.completed",
        }
    }
}

/// Retry schedule for an endpoint. Delay for attempt n is
/// `min(backoff_multiplier^n * 60s, max_backoff_seconds)`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_multiplier: f64,
    pub max_backoff_seconds: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff_multiplier: 2.0,
            max_backoff_seconds: 3600,
        }
    }
}

/// A tenant-registered delivery target.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEndpoint {
    pub id: EndpointId,
    pub org_id: OrgId,
    pub url: String,
    /// HMAC key for the X-Signature header. Never logged.
    pub secret: String,
    pub events: Vec<WebhookEventType>,
    pub enabled: bool,
    #[serde(default)]
    pub retry_config: RetryPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
}

impl WebhookEndpoint {
    /// Whether this endpoint should receive the given event type.
    pub fn subscribes_to(&self, event_type: WebhookEventType) -> bool {
        self.enabled && self.events.contains(&event_type)
    }
}

/// An outbound event, signed and POSTed to matching endpoints.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    pub id: EventId,
    #[serde(rename = "type")]
    pub event_type: WebhookEventType,
    pub timestamp: DateTime<Utc>,
    pub organization_id: OrgId,
    pub data: serde_json::Value,
}

impl WebhookEvent {
    pub fn new(event_type: WebhookEventType, org_id: OrgId, data: serde_json::Value) -> Self {
        Self {
            id: EventId::new(),
            event_type,
            timestamp: Utc::now(),
            organization_id: org_id,
            data,
        }
    }
}

/// Delivery lifecycle for one event × endpoint pairing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Delivered,
    Failed,
}

/// Stored record of a delivery attempt chain, kept for manual replay after
/// exhausting retries.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryRecord {
    pub event: WebhookEvent,
    pub endpoint_id: EndpointId,
    pub status: DeliveryStatus,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<DateTime<Utc>>,
}
