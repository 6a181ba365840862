mod export;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::Sha256;

use aegis_common::canonical::{content_hash, hash_canonical};
use aegis_common::types::{
    AuditEntry, AuditEntryType, AuditQuery, AuditStatistics, ChainVerification, EvaluationScores,
    LlmRequest, PolicyAction, Violation,
};
use aegis_common::{AuditEntryId, GatewayError, OrgId, RequestId, Result};

use crate::store::KeyValueStore;

pub use export::ExportFormat;

type HmacSha256 = Hmac<Sha256>;

/// Chain anchor for a tenant's first entry.
const GENESIS: &str = "genesis";

/// Everything logged when a request finishes the pipeline.
pub struct CompletionRecord<'a> {
    pub org_id: &'a OrgId,
    pub user_id: Option<&'a str>,
    pub request: &'a LlmRequest,
    pub original_response: &'a str,
    pub final_response: &'a str,
    pub action: PolicyAction,
    pub scores: &'a EvaluationScores,
    pub violations: &'a [Violation],
    pub applied_rules: &'a [String],
    pub latency_ms: u64,
    pub documents_used: Vec<String>,
    pub cached: bool,
}

/// Per-tenant chain position, persisted so restarts keep appending to the
/// same chain.
#[derive(Serialize, Deserialize, Clone)]
struct ChainTail {
    next_seq: u64,
    last_hash: String,
}

/// Tamper-evident audit log: per-tenant hash chains with HMAC-signed
/// entries, persisted through the key/value collaborator.
pub struct AuditLog {
    store: Arc<dyn KeyValueStore>,
    /// The integration key. Loaded from secure config at startup; never
    /// logged.
    key: Vec<u8>,
    /// Serializes appends per tenant. tokio Mutex — the critical section
    /// spans store I/O.
    tails: tokio::sync::Mutex<HashMap<OrgId, ChainTail>>,
}

fn entry_key(org_id: &OrgId, seq: u64) -> String {
    format!("audit:{}:{:010}", org_id, seq)
}

fn entry_prefix(org_id: &OrgId) -> String {
    format!("audit:{}:", org_id)
}

fn tail_key(org_id: &OrgId) -> String {
    format!("audittail:{}", org_id)
}

impl AuditLog {
    pub fn new(store: Arc<dyn KeyValueStore>, integration_key: &[u8]) -> Self {
        Self {
            store,
            key: integration_key.to_vec(),
            tails: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Log the arrival of a request. Must succeed before the pipeline may
    /// continue — failures here fail the request closed.
    pub async fn log_request(
        &self,
        request_id: RequestId,
        org_id: &OrgId,
        request: &LlmRequest,
        user_id: Option<&str>,
    ) -> Result<AuditEntry> {
        let prompt_joined = request
            .messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        let data = json!({
            "model": request.model,
            "messageCount": request.messages.len(),
            "promptHash": content_hash(&prompt_joined),
            "temperature": request.temperature,
            "maxTokens": request.max_tokens,
        });

        self.append(org_id, user_id, request_id, AuditEntryType::Request, data)
            .await
    }

    /// Log the terminal outcome of a request. Durable before webhook
    /// fan-out is triggered.
    pub async fn log_complete(
        &self,
        request_id: RequestId,
        record: CompletionRecord<'_>,
    ) -> Result<AuditEntry> {
        let entry_type = match record.action {
            PolicyAction::Block => AuditEntryType::Block,
            PolicyAction::Rewrite => AuditEntryType::Rewrite,
            // A flagged response still reaches the caller.
            PolicyAction::Pass | PolicyAction::Flag => AuditEntryType::Pass,
        };

        let data = json!({
            "action": record.action,
            "scores": record.scores,
            "score": record.scores.overall,
            "violationCount": record.violations.len(),
            "violationTypes": record.violations.iter()
                .map(|v| v.violation_type.as_str())
                .collect::<Vec<_>>(),
            "appliedRules": record.applied_rules,
            "originalResponseHash": content_hash(record.original_response),
            "finalResponseHash": content_hash(record.final_response),
            "latencyMs": record.latency_ms,
            "documentsUsed": record.documents_used,
            "cached": record.cached,
        });

        self.append(
            record.org_id,
            record.user_id,
            request_id,
            entry_type,
            data,
        )
        .await
    }

    /// Log a pipeline failure for the request.
    pub async fn log_error(
        &self,
        request_id: RequestId,
        org_id: &OrgId,
        user_id: Option<&str>,
        error: &GatewayError,
    ) -> Result<AuditEntry> {
        let data = json!({ "error": error.to_string() });
        self.append(org_id, user_id, request_id, AuditEntryType::Error, data)
            .await
    }

    /// Log a rejected authentication attempt.
    pub async fn log_auth_failure(&self, org_id: &OrgId, detail: &str) -> Result<AuditEntry> {
        let data = json!({ "error": "authentication failed", "detail": detail });
        self.append(org_id, None, RequestId::new(), AuditEntryType::Error, data)
            .await
    }

    /// Append one entry to the tenant's chain. The tail lock serializes
    /// appends so hashes link without gaps.
    async fn append(
        &self,
        org_id: &OrgId,
        user_id: Option<&str>,
        request_id: RequestId,
        entry_type: AuditEntryType,
        data: Value,
    ) -> Result<AuditEntry> {
        let mut tails = self.tails.lock().await;

        let tail = match tails.get(org_id) {
            Some(tail) => tail.clone(),
            None => self.load_tail(org_id).await?,
        };

        let mut entry = AuditEntry {
            id: AuditEntryId::new(),
            timestamp: Utc::now(),
            org_id: org_id.clone(),
            user_id: user_id.map(|u| u.to_string()),
            request_id,
            entry_type,
            data,
            previous_hash: tail.last_hash.clone(),
            hash: String::new(),
            signature: String::new(),
        };

        entry.hash = self.entry_hash(&entry)?;
        entry.signature = self.sign(&entry.hash);

        let payload = serde_json::to_string(&entry)
            .map_err(|e| GatewayError::AuditFailure(e.to_string()))?;
        self.store
            .set(&entry_key(org_id, tail.next_seq), payload)
            .await
            .map_err(|e| GatewayError::AuditFailure(e.to_string()))?;

        let new_tail = ChainTail {
            next_seq: tail.next_seq + 1,
            last_hash: entry.hash.clone(),
        };
        let tail_payload = serde_json::to_string(&new_tail)
            .map_err(|e| GatewayError::AuditFailure(e.to_string()))?;
        self.store
            .set(&tail_key(org_id), tail_payload)
            .await
            .map_err(|e| GatewayError::AuditFailure(e.to_string()))?;

        tails.insert(org_id.clone(), new_tail);

        metrics::counter!("audit.entries", "type" => format!("{:?}", entry_type)).increment(1);
        Ok(entry)
    }

    async fn load_tail(&self, org_id: &OrgId) -> Result<ChainTail> {
        let raw = self
            .store
            .get(&tail_key(org_id))
            .await
            .map_err(|e| GatewayError::AuditFailure(e.to_string()))?;

        Ok(match raw {
            Some(raw) => serde_json::from_str(&raw)
                .map_err(|e| GatewayError::AuditFailure(e.to_string()))?,
            None => ChainTail {
                next_seq: 0,
                last_hash: GENESIS.to_string(),
            },
        })
    }

    /// SHA-256 over the canonical form of the entry minus hash + signature.
    fn entry_hash(&self, entry: &AuditEntry) -> Result<String> {
        let mut value = serde_json::to_value(entry)?;
        if let Some(map) = value.as_object_mut() {
            map.remove("hash");
            map.remove("signature");
        }
        Ok(hash_canonical(&value))
    }

    /// HMAC-SHA-256 of the entry hash under the integration key, hex.
    fn sign(&self, hash: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.key).expect("HMAC accepts any key length");
        mac.update(hash.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// All entries for a tenant in chain order.
    async fn chain(&self, org_id: &OrgId) -> Result<Vec<(String, AuditEntry)>> {
        let pairs = self
            .store
            .scan_by_prefix(&entry_prefix(org_id))
            .await
            .map_err(|e| GatewayError::AuditFailure(e.to_string()))?;

        let mut entries = Vec::with_capacity(pairs.len());
        for (key, raw) in pairs {
            let entry: AuditEntry = serde_json::from_str(&raw)
                .map_err(|e| GatewayError::AuditFailure(e.to_string()))?;
            entries.push((key, entry));
        }
        Ok(entries)
    }

    /// Replay hashes and signatures over the whole chain. Any mutation or
    /// reordering of historic entries surfaces as the first bad index.
    pub async fn verify_chain(&self, org_id: &OrgId) -> Result<ChainVerification> {
        let entries = self.chain(org_id).await?;

        let mut previous_hash: Option<String> = None;
        for (index, (_, entry)) in entries.iter().enumerate() {
            let expected_hash = self.entry_hash(entry)?;
            let link_ok = match &previous_hash {
                Some(prior) => entry.previous_hash == *prior,
                // The first entry anchors the chain (genesis, or the
                // recorded anchor after archiving).
                None => true,
            };

            if entry.hash != expected_hash
                || entry.signature != self.sign(&entry.hash)
                || !link_ok
            {
                return Ok(ChainVerification {
                    ok: false,
                    first_bad_index: Some(index),
                    entries_checked: entries.len(),
                });
            }
            previous_hash = Some(entry.hash.clone());
        }

        Ok(ChainVerification {
            ok: true,
            first_bad_index: None,
            entries_checked: entries.len(),
        })
    }

    /// Filtered trail query, chain-ordered. `limit` keeps the most recent
    /// entries.
    pub async fn get_audit_trail(
        &self,
        org_id: &OrgId,
        query: &AuditQuery,
    ) -> Result<Vec<AuditEntry>> {
        let mut entries: Vec<AuditEntry> = self
            .chain(org_id)
            .await?
            .into_iter()
            .map(|(_, entry)| entry)
            .filter(|entry| {
                query.start_date.is_none_or(|start| entry.timestamp >= start)
                    && query.end_date.is_none_or(|end| entry.timestamp <= end)
                    && query.request_id.is_none_or(|id| entry.request_id == id)
                    && query.entry_type.is_none_or(|t| entry.entry_type == t)
            })
            .collect();

        if let Some(limit) = query.limit {
            if entries.len() > limit {
                entries.drain(..entries.len() - limit);
            }
        }
        Ok(entries)
    }

    /// Free-form search across entry data.
    pub async fn search(
        &self,
        org_id: &OrgId,
        content_substring: Option<&str>,
        with_violations: Option<bool>,
        score_range: Option<(f64, f64)>,
        date_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> Result<Vec<AuditEntry>> {
        Ok(self
            .chain(org_id)
            .await?
            .into_iter()
            .map(|(_, entry)| entry)
            .filter(|entry| {
                if let Some(needle) = content_substring {
                    if !entry.data.to_string().contains(needle) {
                        return false;
                    }
                }
                if let Some(wanted) = with_violations {
                    let count = entry
                        .data
                        .get("violationCount")
                        .and_then(Value::as_u64)
                        .unwrap_or(0);
                    if wanted != (count > 0) {
                        return false;
                    }
                }
                if let Some((min, max)) = score_range {
                    match entry.data.get("score").and_then(Value::as_f64) {
                        Some(score) if score >= min && score <= max => {}
                        _ => return false,
                    }
                }
                if let Some((start, end)) = date_range {
                    if entry.timestamp < start || entry.timestamp > end {
                        return false;
                    }
                }
                true
            })
            .collect())
    }

    /// Per-tenant statistics.
    pub async fn statistics(&self, org_id: &OrgId) -> Result<AuditStatistics> {
        let entries = self.chain(org_id).await?;

        let mut stats = AuditStatistics::default();
        let mut latency_sum = 0u64;
        let mut latency_count = 0usize;

        for (_, entry) in &entries {
            stats.total += 1;
            match entry.entry_type {
                AuditEntryType::Request => stats.requests += 1,
                AuditEntryType::Block => stats.blocked += 1,
                AuditEntryType::Rewrite => stats.rewritten += 1,
                AuditEntryType::Pass => stats.passed += 1,
                AuditEntryType::Error => stats.errors += 1,
                AuditEntryType::Evaluation => {}
            }
            if entry
                .data
                .get("action")
                .and_then(Value::as_str)
                .is_some_and(|a| a == "FLAG")
            {
                stats.flagged += 1;
            }
            if let Some(latency) = entry.data.get("latencyMs").and_then(Value::as_u64) {
                latency_sum += latency;
                latency_count += 1;
            }
        }

        stats.average_latency_ms = if latency_count > 0 {
            Some(latency_sum as f64 / latency_count as f64)
        } else {
            None
        };
        stats.first_timestamp = entries.first().map(|(_, e)| e.timestamp);
        stats.last_timestamp = entries.last().map(|(_, e)| e.timestamp);

        Ok(stats)
    }

    /// Serialize the tenant's trail for download.
    pub async fn export(&self, org_id: &OrgId, format: ExportFormat) -> Result<String> {
        let entries: Vec<AuditEntry> = self
            .chain(org_id)
            .await?
            .into_iter()
            .map(|(_, entry)| entry)
            .collect();
        export::render(&entries, format)
    }

    /// Remove entries older than the cutoff from the live store; the
    /// remaining chain re-anchors at its first survivor. Returns the count
    /// removed.
    pub async fn archive(&self, org_id: &OrgId, older_than_days: u64) -> Result<usize> {
        let cutoff = Utc::now() - Duration::days(older_than_days as i64);
        let entries = self.chain(org_id).await?;

        let mut removed = 0usize;
        for (key, entry) in entries {
            if entry.timestamp < cutoff {
                self.store
                    .delete(&key)
                    .await
                    .map_err(|e| GatewayError::AuditFailure(e.to_string()))?;
                removed += 1;
            }
        }

        if removed > 0 {
            tracing::info!(org_id = %org_id, removed, "Audit entries archived out of live store");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use aegis_common::types::ChatMessage;

    const KEY: &[u8] = b"test-integration-key";

    fn log() -> AuditLog {
        AuditLog::new(Arc::new(MemoryStore::new()), KEY)
    }

    fn request() -> LlmRequest {
        LlmRequest {
            model: "gpt-4".into(),
            messages: vec![ChatMessage::user("What is our vacation policy?")],
            temperature: None,
            max_tokens: None,
            stream: None,
            user: None,
            metadata: None,
        }
    }

    fn completion<'a>(
        org_id: &'a OrgId,
        request: &'a LlmRequest,
        scores: &'a EvaluationScores,
        action: PolicyAction,
    ) -> CompletionRecord<'a> {
        CompletionRecord {
            org_id,
            user_id: Some("user-1"),
            request,
            original_response: "Twenty days.",
            final_response: "Twenty days.",
            action,
            scores,
            violations: &[],
            applied_rules: &[],
            latency_ms: 120,
            documents_used: Vec::new(),
            cached: false,
        }
    }

    #[tokio::test]
    async fn test_chain_links_and_verifies() {
        let log = log();
        let org = OrgId::new("acme");
        let req = request();
        let scores = EvaluationScores::perfect();

        let request_id = RequestId::new();
        let first = log
            .log_request(request_id, &org, &req, Some("user-1"))
            .await
            .unwrap();
        let second = log
            .log_complete(request_id, completion(&org, &req, &scores, PolicyAction::Pass))
            .await
            .unwrap();

        assert_eq!(first.previous_hash, GENESIS);
        assert_eq!(second.previous_hash, first.hash);

        let verification = log.verify_chain(&org).await.unwrap();
        assert!(verification.ok);
        assert_eq!(verification.entries_checked, 2);
    }

    #[tokio::test]
    async fn test_bodies_stored_as_hashes() {
        let log = log();
        let org = OrgId::new("acme");
        let req = request();

        let entry = log
            .log_request(RequestId::new(), &org, &req, None)
            .await
            .unwrap();

        let serialized = serde_json::to_string(&entry).unwrap();
        assert!(!serialized.contains("vacation policy"));
        assert_eq!(
            entry.data.get("promptHash").and_then(Value::as_str).unwrap(),
            content_hash("What is our vacation policy?")
        );
    }

    #[tokio::test]
    async fn test_tamper_detected_at_index() {
        let log = log();
        let org = OrgId::new("acme");
        let req = request();
        let scores = EvaluationScores::perfect();

        for _ in 0..3 {
            let request_id = RequestId::new();
            log.log_request(request_id, &org, &req, None).await.unwrap();
            log.log_complete(request_id, completion(&org, &req, &scores, PolicyAction::Pass))
                .await
                .unwrap();
        }

        // Mutate entry at index 2 in place.
        let key = entry_key(&org, 2);
        let raw = log.store.get(&key).await.unwrap().unwrap();
        let mut tampered: AuditEntry = serde_json::from_str(&raw).unwrap();
        tampered.data = json!({"model": "forged"});
        log.store
            .set(&key, serde_json::to_string(&tampered).unwrap())
            .await
            .unwrap();

        let verification = log.verify_chain(&org).await.unwrap();
        assert!(!verification.ok);
        assert_eq!(verification.first_bad_index, Some(2));
    }

    #[tokio::test]
    async fn test_reordering_detected() {
        let log = log();
        let org = OrgId::new("acme");
        let req = request();

        for _ in 0..3 {
            log.log_request(RequestId::new(), &org, &req, None)
                .await
                .unwrap();
        }

        // Swap entries 0 and 1.
        let a = log.store.get(&entry_key(&org, 0)).await.unwrap().unwrap();
        let b = log.store.get(&entry_key(&org, 1)).await.unwrap().unwrap();
        log.store.set(&entry_key(&org, 0), b).await.unwrap();
        log.store.set(&entry_key(&org, 1), a).await.unwrap();

        let verification = log.verify_chain(&org).await.unwrap();
        assert!(!verification.ok);
        assert_eq!(verification.first_bad_index, Some(1));
    }

    #[tokio::test]
    async fn test_tenant_chains_are_independent(){
        let log = log();
        let req = request();

        let acme_entry = log
            .log_request(RequestId::new(), &OrgId::new("acme"), &req, None)
            .await
            .unwrap();
        let globex_entry = log
            .log_request(RequestId::new(), &OrgId::new("globex"), &req, None)
            .await
            .unwrap();

        // Both are chain heads.
        assert_eq!(acme_entry.previous_hash, GENESIS);
        assert_eq!(globex_entry.previous_hash, GENESIS);
    }

    #[tokio::test]
    async fn test_trail_query_filters() {
        let log = log();
        let org = OrgId::new("acme");
        let req = request();
        let scores = EvaluationScores::perfect();

        let request_id = RequestId::new();
        log.log_request(request_id, &org, &req, None).await.unwrap();
        log.log_complete(request_id, completion(&org, &req, &scores, PolicyAction::Block))
            .await
            .unwrap();
        log.log_request(RequestId::new(), &org, &req, None)
            .await
            .unwrap();

        let blocks = log
            .get_audit_trail(
                &org,
                &AuditQuery {
                    entry_type: Some(AuditEntryType::Block),
                    ..AuditQuery::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(blocks.len(), 1);

        let by_request = log
            .get_audit_trail(
                &org,
                &AuditQuery {
                    request_id: Some(request_id),
                    ..AuditQuery::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(by_request.len(), 2);

        let limited = log
            .get_audit_trail(
                &org,
                &AuditQuery {
                    limit: Some(1),
                    ..AuditQuery::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_statistics() {
        let log = log();
        let org = OrgId::new("acme");
        let req = request();
        let scores = EvaluationScores::perfect();

        let request_id = RequestId::new();
        log.log_request(request_id, &org, &req, None).await.unwrap();
        log.log_complete(request_id, completion(&org, &req, &scores, PolicyAction::Block))
            .await
            .unwrap();

        let stats = log.statistics(&org).await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.requests, 1);
        assert_eq!(stats.blocked, 1);
        assert_eq!(stats.average_latency_ms, Some(120.0));
    }

    #[tokio::test]
    async fn test_archive_keeps_recent_entries_and_chain_verifies() {
        let log = log();
        let org = OrgId::new("acme");
        let req = request();

        log.log_request(RequestId::new(), &org, &req, None)
            .await
            .unwrap();
        log.log_request(RequestId::new(), &org, &req, None)
            .await
            .unwrap();

        // Nothing is older than one day.
        let removed = log.archive(&org, 1).await.unwrap();
        assert_eq!(removed, 0);

        // Everything is older than "zero days ago" except entries from the
        // future; cutoff == now removes both.
        let removed = log.archive(&org, 0).await.unwrap();
        assert_eq!(removed, 2);

        let verification = log.verify_chain(&org).await.unwrap();
        assert!(verification.ok);
        assert_eq!(verification.entries_checked, 0);
    }
}
