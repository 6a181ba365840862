use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{AuditEntryId, OrgId, RequestId};

/// What a chain entry records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditEntryType {
    Request,
    Evaluation,
    Rewrite,
    Block,
    Pass,
    Error,
}

/// One tamper-evident audit record.
///
/// `hash` covers the canonical form of the entry minus `hash` and
/// `signature`; `signature` is HMAC-SHA-256 of `hash` under the
/// integration key; `previous_hash` links to the prior entry of the same
/// tenant. Prompt and response bodies appear only as content hashes inside
/// `data`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: AuditEntryId,
    pub timestamp: DateTime<Utc>,
    pub org_id: OrgId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub request_id: RequestId,
    #[serde(rename = "type")]
    pub entry_type: AuditEntryType,
    pub data: Value,
    pub previous_hash: String,
    pub hash: String,
    pub signature: String,
}

/// Filters for trail queries.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_type: Option<AuditEntryType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

/// Chain verification outcome.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainVerification {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_bad_index: Option<usize>,
    pub entries_checked: usize,
}

/// Per-tenant audit statistics.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditStatistics {
    pub total: usize,
    pub requests: usize,
    pub blocked: usize,
    pub rewritten: usize,
    pub flagged: usize,
    pub passed: usize,
    pub errors: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_latency_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_timestamp: Option<DateTime<Utc>>,
}
