pub mod events;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use aegis_common::canonical::canonical_json;
use aegis_common::config::WebhookDefaults;
use aegis_common::types::{
    DeliveryRecord, DeliveryStatus, RetryPolicy, WebhookEndpoint, WebhookEvent,
};
use aegis_common::{EndpointId, EventId, GatewayError, OrgId, Result};

use crate::store::{get_json, scan_json, set_json, KeyValueStore};

type HmacSha256 = Hmac<Sha256>;

fn endpoint_key(org_id: &OrgId, id: EndpointId) -> String {
    format!("webhooks:{}:{}", org_id, id)
}

fn endpoint_prefix(org_id: &OrgId) -> String {
    format!("webhooks:{}:", org_id)
}

fn failed_key(org_id: &OrgId, event_id: EventId, endpoint_id: EndpointId) -> String {
    format!("deliveries:failed:{}:{}:{}", org_id, event_id, endpoint_id)
}

/// Hex HMAC-SHA-256 of the body under the endpoint secret — the
/// `X-Signature` header value, byte-for-byte reproducible by the receiver.
pub fn sign_body(secret: &str, body: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Delay before retry `attempt` (1-based): multiplier^attempt minutes,
/// capped by the endpoint's max backoff.
pub fn retry_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let seconds = policy.backoff_multiplier.powi(attempt as i32) * 60.0;
    Duration::from_secs_f64(seconds.min(policy.max_backoff_seconds as f64))
}

/// Signs and delivers events to tenant endpoints, retrying with
/// exponential backoff and keeping exhausted deliveries for manual replay.
pub struct WebhookDispatcher {
    store: Arc<dyn KeyValueStore>,
    http: reqwest::Client,
    defaults: WebhookDefaults,
}

impl WebhookDispatcher {
    pub fn new(store: Arc<dyn KeyValueStore>, defaults: WebhookDefaults) -> Self {
        Self {
            store,
            http: reqwest::Client::new(),
            defaults,
        }
    }

    // --- Endpoint CRUD -----------------------------------------------------

    pub async fn create_endpoint(&self, endpoint: WebhookEndpoint) -> Result<WebhookEndpoint> {
        if endpoint.url.is_empty() || !endpoint.url.starts_with("http") {
            return Err(GatewayError::BadRequest("endpoint url must be http(s)".into()));
        }
        if endpoint.secret.is_empty() {
            return Err(GatewayError::BadRequest("endpoint secret is required".into()));
        }
        set_json(
            self.store.as_ref(),
            &endpoint_key(&endpoint.org_id, endpoint.id),
            &endpoint,
        )
        .await?;
        tracing::info!(org_id = %endpoint.org_id, endpoint_id = %endpoint.id, "Webhook endpoint created");
        Ok(endpoint)
    }

    pub async fn delete_endpoint(&self, org_id: &OrgId, id: EndpointId) -> Result<bool> {
        Ok(self.store.delete(&endpoint_key(org_id, id)).await?)
    }

    pub async fn list_endpoints(&self, org_id: &OrgId) -> Result<Vec<WebhookEndpoint>> {
        Ok(scan_json(self.store.as_ref(), &endpoint_prefix(org_id)).await?)
    }

    pub async fn get_endpoint(
        &self,
        org_id: &OrgId,
        id: EndpointId,
    ) -> Result<Option<WebhookEndpoint>> {
        Ok(get_json(self.store.as_ref(), &endpoint_key(org_id, id)).await?)
    }

    // --- Delivery ----------------------------------------------------------

    /// Fan an event out to every subscribed endpoint. Deliveries run as
    /// background tasks; this returns once they are spawned.
    pub async fn dispatch(self: &Arc<Self>, event: WebhookEvent) -> Result<usize> {
        let endpoints = self.list_endpoints(&event.organization_id).await?;
        let matching: Vec<WebhookEndpoint> = endpoints
            .into_iter()
            .filter(|e| e.subscribes_to(event.event_type))
            .collect();

        let spawned = matching.len();
        for endpoint in matching {
            let dispatcher = Arc::clone(self);
            let event = event.clone();
            tokio::spawn(async move {
                dispatcher.deliver_with_retry(endpoint, event).await;
            });
        }

        if spawned > 0 {
            metrics::counter!("webhooks.dispatched", "event" => event.event_type.as_str())
                .increment(spawned as u64);
        }
        Ok(spawned)
    }

    /// Deliver once, synchronously — used by endpoint test fires where the
    /// caller wants the result inline and no retry scheduling.
    pub async fn deliver_test(
        &self,
        endpoint: &WebhookEndpoint,
        event: &WebhookEvent,
    ) -> std::result::Result<(), String> {
        self.deliver_once(endpoint, event).await
    }

    /// Replay one stored failed delivery, reusing the original event (same
    /// id, same body bytes). Removes the failure record on success.
    pub async fn replay(
        &self,
        org_id: &OrgId,
        endpoint_id: EndpointId,
        event_id: EventId,
    ) -> Result<()> {
        let key = failed_key(org_id, event_id, endpoint_id);
        let record: DeliveryRecord = get_json(self.store.as_ref(), &key)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("failed delivery {}", event_id)))?;

        let endpoint = self
            .get_endpoint(org_id, endpoint_id)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("endpoint {}", endpoint_id)))?;

        self.deliver_once(&endpoint, &record.event)
            .await
            .map_err(GatewayError::UpstreamFailed)?;

        self.store.delete(&key).await?;
        metrics::counter!("webhooks.replayed").increment(1);
        Ok(())
    }

    pub async fn failed_deliveries(&self, org_id: &OrgId) -> Result<Vec<DeliveryRecord>> {
        Ok(scan_json(
            self.store.as_ref(),
            &format!("deliveries:failed:{}:", org_id),
        )
        .await?)
    }

    async fn deliver_with_retry(&self, endpoint: WebhookEndpoint, event: WebhookEvent) {
        let max_retries = endpoint.retry_config.max_retries;
        let mut attempts = 0u32;
        let mut last_error = String::new();

        loop {
            attempts += 1;
            match self.deliver_once(&endpoint, &event).await {
                Ok(()) => {
                    metrics::counter!("webhooks.delivered", "event" => event.event_type.as_str())
                        .increment(1);
                    return;
                }
                Err(error) => {
                    tracing::warn!(
                        endpoint_id = %endpoint.id,
                        event_id = %event.id,
                        attempt = attempts,
                        error = error.as_str(),
                        "Webhook delivery failed"
                    );
                    last_error = error;
                }
            }

            // First attempt + max_retries retries.
            if attempts > max_retries {
                break;
            }
            tokio::time::sleep(retry_delay(&endpoint.retry_config, attempts)).await;
        }

        metrics::counter!("webhooks.exhausted").increment(1);

        // Keep the event for manual replay; the endpoint stays enabled.
        let record = DeliveryRecord {
            endpoint_id: endpoint.id,
            status: DeliveryStatus::Failed,
            attempts,
            last_error: Some(last_error),
            delivered_at: None,
            event: event.clone(),
        };
        let key = failed_key(&event.organization_id, event.id, endpoint.id);
        if let Err(e) = set_json(self.store.as_ref(), &key, &record).await {
            tracing::error!(error = %e, "Failed to persist exhausted webhook delivery");
        }
    }

    /// One signed POST with the per-attempt timeout.
    async fn deliver_once(
        &self,
        endpoint: &WebhookEndpoint,
        event: &WebhookEvent,
    ) -> std::result::Result<(), String> {
        let value = serde_json::to_value(event).map_err(|e| e.to_string())?;
        let body = canonical_json(&value);
        let signature = sign_body(&endpoint.secret, &body);

        let mut request = self
            .http
            .post(&endpoint.url)
            .header("X-Signature", signature)
            .header("X-Event", event.event_type.as_str())
            .header("X-Delivery", event.id.to_string())
            .header("X-Timestamp", Utc::now().to_rfc3339())
            .header("Content-Type", "application/json")
            .timeout(Duration::from_secs(self.defaults.timeout_seconds))
            .body(body);

        if let Some(ref headers) = endpoint.headers {
            for (name, value) in headers {
                request = request.header(name, value);
            }
        }

        let response = request.send().await.map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("endpoint returned {}", response.status()));
        }
        Ok(())
    }
}
