use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde_json::json;

use aegis_common::canonical::{canonical_json, sha256_hex};
use aegis_common::types::{LlmRequest, LlmResponse};
use aegis_common::OrgId;

use ::redis::aio::ConnectionManager;

/// Deterministic fingerprint of a request for caching and deduplication.
///
/// Covers tenant, model, the ordered messages, and the effective sampling
/// parameters (temperature defaulted to 0.7, max_tokens to 1000) so that
/// unspecified fields hash identically to their defaults.
pub fn request_fingerprint(org_id: &OrgId, request: &LlmRequest) -> String {
    let value = json!({
        "orgId": org_id,
        "model": request.model,
        "messages": request.messages,
        "temperature": request.temperature.unwrap_or(0.7),
        "max_tokens": request.max_tokens.unwrap_or(1000),
    });
    sha256_hex(canonical_json(&value).as_bytes())
}

enum Backend {
    Memory {
        /// std Mutex — never held across await points.
        entries: Mutex<HashMap<String, MemoryEntry>>,
        max_entries: usize,
    },
    Redis(ConnectionManager),
}

struct MemoryEntry {
    payload: String,
    inserted_at: Instant,
}

/// TTL response cache in front of the provider call. Redis in production,
/// in-memory map otherwise.
pub struct ResponseCache {
    backend: Backend,
    ttl: Duration,
}

impl ResponseCache {
    pub fn in_memory(ttl_seconds: u64, max_entries: usize) -> Self {
        Self {
            backend: Backend::Memory {
                entries: Mutex::new(HashMap::new()),
                max_entries,
            },
            ttl: Duration::from_secs(ttl_seconds),
        }
    }

    pub fn redis(conn: ConnectionManager, ttl_seconds: u64) -> Self {
        Self {
            backend: Backend::Redis(conn),
            ttl: Duration::from_secs(ttl_seconds),
        }
    }

    /// Look up a cached response by fingerprint.
    pub async fn get(&self, key: &str) -> Option<LlmResponse> {
        let payload = match &self.backend {
            Backend::Memory { entries, .. } => {
                let entries = entries.lock().unwrap();
                entries.get(key).and_then(|entry| {
                    if entry.inserted_at.elapsed() < self.ttl {
                        Some(entry.payload.clone())
                    } else {
                        None
                    }
                })
            }
            Backend::Redis(conn) => {
                let mut conn = conn.clone();
                let fetched: Result<Option<String>, ::redis::RedisError> = ::redis::cmd("GET")
                    .arg(format!("cache:{}", key))
                    .query_async(&mut conn)
                    .await;
                match fetched {
                    Ok(payload) => payload,
                    Err(e) => {
                        // Cache backend failure is a miss, never an error.
                        tracing::warn!(error = %e, "Cache backend GET failed");
                        None
                    }
                }
            }
        };

        match payload.and_then(|p| serde_json::from_str(&p).ok()) {
            Some(response) => {
                metrics::counter!("relay.cache.hit").increment(1);
                Some(response)
            }
            None => {
                metrics::counter!("relay.cache.miss").increment(1);
                None
            }
        }
    }

    /// Insert a response, evicting expired entries on the memory backend.
    pub async fn insert(&self, key: &str, response: &LlmResponse) {
        let payload = match serde_json::to_string(response) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize response for cache");
                return;
            }
        };

        match &self.backend {
            Backend::Memory {
                entries,
                max_entries,
            } => {
                let mut entries = entries.lock().unwrap();
                entries.retain(|_, entry| entry.inserted_at.elapsed() < self.ttl);

                // Full and nothing expired: drop the insert rather than grow.
                if entries.len() >= *max_entries {
                    metrics::counter!("relay.cache.full_drop").increment(1);
                    return;
                }

                entries.insert(
                    key.to_string(),
                    MemoryEntry {
                        payload,
                        inserted_at: Instant::now(),
                    },
                );
            }
            Backend::Redis(conn) => {
                let mut conn = conn.clone();
                let result: Result<(), ::redis::RedisError> = ::redis::cmd("SET")
                    .arg(format!("cache:{}", key))
                    .arg(payload)
                    .arg("EX")
                    .arg(self.ttl.as_secs())
                    .query_async(&mut conn)
                    .await;
                if let Err(e) = result {
                    tracing::warn!(error = %e, "Cache backend SET failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_common::types::{ChatMessage, Choice, FinishReason, Usage};

    fn request(model: &str, content: &str) -> LlmRequest {
        LlmRequest {
            model: model.into(),
            messages: vec![ChatMessage::user(content)],
            temperature: None,
            max_tokens: None,
            stream: None,
            user: None,
            metadata: None,
        }
    }

    fn response() -> LlmResponse {
        LlmResponse {
            id: "resp-1".into(),
            created: 0,
            model: "gpt-4".into(),
            choices: vec![Choice {
                index: 0,
                message: ChatMessage::assistant("cached"),
                finish_reason: FinishReason::Stop,
            }],
            usage: Usage::default(),
            audit_info: None,
        }
    }

    #[test]
    fn test_fingerprint_defaults_unspecified_sampling_params() {
        let org = OrgId::new("acme");
        let mut explicit = request("gpt-4", "hi");
        explicit.temperature = Some(0.7);
        explicit.max_tokens = Some(1000);

        assert_eq!(
            request_fingerprint(&org, &request("gpt-4", "hi")),
            request_fingerprint(&org, &explicit)
        );
    }

    #[test]
    fn test_fingerprint_sensitive_to_message_order() {
        let org = OrgId::new("acme");
        let mut a = request("gpt-4", "first");
        a.messages.push(ChatMessage::user("second"));
        let mut b = request("gpt-4", "second");
        b.messages.push(ChatMessage::user("first"));

        assert_ne!(request_fingerprint(&org, &a), request_fingerprint(&org, &b));
    }

    #[test]
    fn test_fingerprint_isolates_tenants() {
        let req = request("gpt-4", "hi");
        assert_ne!(
            request_fingerprint(&OrgId::new("acme"), &req),
            request_fingerprint(&OrgId::new("globex"), &req)
        );
    }

    #[tokio::test]
    async fn test_memory_cache_round_trip() {
        let cache = ResponseCache::in_memory(3600, 100);
        assert!(cache.get("k1").await.is_none());

        cache.insert("k1", &response()).await;
        let hit = cache.get("k1").await.unwrap();
        assert_eq!(hit.primary_content(), "cached");
    }

    #[tokio::test]
    async fn test_memory_cache_expiry() {
        let cache = ResponseCache::in_memory(0, 100);
        cache.insert("k1", &response()).await;
        assert!(cache.get("k1").await.is_none());
    }
}
