use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{DocumentId, OrgId};

/// Document sensitivity tier. Chunks inherit the document's tier.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Sensitivity {
    Public,
    Internal,
    Confidential,
    Restricted,
}

/// Metadata for an ingested tenant document.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextDocument {
    pub id: DocumentId,
    pub org_id: OrgId,
    pub filename: String,
    #[serde(default)]
    pub department: Option<String>,
    pub sensitivity: Sensitivity,
    pub last_updated: DateTime<Utc>,
}

/// One embedded slice of a document. Chunks are immutable — re-ingesting a
/// document replaces its whole chunk set.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentChunk {
    pub chunk_id: String,
    pub document_id: DocumentId,
    pub chunk_index: u32,
    pub content: String,
    pub vector: Vec<f32>,
}

/// Filters applied after similarity scoring.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensitivity: Option<Sensitivity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_after: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_before: Option<DateTime<Utc>>,
}

/// A document-granular search hit at its best-matching chunk.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievedDocument {
    pub document: ContextDocument,
    /// Content of the best-matching chunk.
    pub excerpt: String,
    pub chunk_index: u32,
    pub score: f64,
    /// True when the query vector came from the deterministic fallback
    /// rather than the embedding provider.
    #[serde(default)]
    pub degraded: bool,
}

/// Per-tenant retrieval store counters.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalStats {
    pub document_count: usize,
    pub chunk_count: usize,
    pub total_content_chars: usize,
}
