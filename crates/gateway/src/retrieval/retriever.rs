use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use aegis_common::config::RetrievalConfig;
use aegis_common::types::{
    ContextDocument, DocumentChunk, RetrievalStats, RetrievedDocument, SearchFilters, Sensitivity,
};
use aegis_common::{DocumentId, GatewayError, OrgId, Result};

use crate::store::{get_json, set_json, KeyValueStore, StoredVector, VectorStore};

use super::chunker::chunk_content;
use super::embeddings::EmbeddingClient;

/// Ingestion request for a tenant document.
pub struct NewDocument {
    /// Reuse an id to replace a previously ingested document.
    pub id: Option<DocumentId>,
    pub content: String,
    pub filename: String,
    pub department: Option<String>,
    pub sensitivity: Sensitivity,
}

/// Search parameters; unset fields take configured defaults.
#[derive(Default)]
pub struct SearchOptions {
    pub limit: Option<usize>,
    pub threshold: Option<f64>,
    pub filters: SearchFilters,
}

/// Stored alongside the document metadata so stats don't rescan chunks.
#[derive(Serialize, Deserialize)]
struct DocumentRecord {
    document: ContextDocument,
    chunk_count: usize,
    content_chars: usize,
}

/// Per-tenant semantic search over chunked, embedded documents.
pub struct ContextRetriever {
    store: Arc<dyn KeyValueStore>,
    vectors: Arc<dyn VectorStore>,
    embeddings: Arc<EmbeddingClient>,
    config: RetrievalConfig,
}

fn doc_key(org_id: &OrgId, id: DocumentId) -> String {
    format!("docs:{}:{}", org_id, id)
}

fn doc_prefix(org_id: &OrgId) -> String {
    format!("docs:{}:", org_id)
}

fn chunk_key(org_id: &OrgId, id: DocumentId, index: u32) -> String {
    format!("chunks:{}:{}:{:05}", org_id, id, index)
}

fn chunk_prefix(org_id: &OrgId, id: DocumentId) -> String {
    format!("chunks:{}:{}:", org_id, id)
}

fn org_chunk_prefix(org_id: &OrgId) -> String {
    format!("chunks:{}:", org_id)
}

impl ContextRetriever {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        vectors: Arc<dyn VectorStore>,
        embeddings: Arc<EmbeddingClient>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            store,
            vectors,
            embeddings,
            config,
        }
    }

    /// Ingest a document: chunk, embed, and replace any prior chunk set for
    /// the same id. Embedding provider failure surfaces to the caller.
    pub async fn add_document(&self, org_id: &OrgId, new: NewDocument) -> Result<ContextDocument> {
        let id = new.id.unwrap_or_default();
        let chunks = chunk_content(&new.content, self.config.chunk_max_chars);
        let vectors = self.embeddings.embed_batch(&chunks).await?;

        // Re-ingest replaces the whole chunk set.
        self.vectors
            .delete_by_prefix(&chunk_prefix(org_id, id))
            .await?;

        let document = ContextDocument {
            id,
            org_id: org_id.clone(),
            filename: new.filename,
            department: new.department,
            sensitivity: new.sensitivity,
            last_updated: Utc::now(),
        };

        for (index, (content, vector)) in chunks.iter().zip(vectors.into_iter()).enumerate() {
            let chunk = DocumentChunk {
                chunk_id: format!("{}-{}", id, index),
                document_id: id,
                chunk_index: index as u32,
                content: content.clone(),
                vector: Vec::new(), // the vector lives in the vector store
            };
            let payload = serde_json::to_string(&chunk)?;
            self.vectors
                .set(
                    &chunk_key(org_id, id, index as u32),
                    StoredVector { vector, payload },
                )
                .await?;
        }

        let record = DocumentRecord {
            document: document.clone(),
            chunk_count: chunks.len(),
            content_chars: new.content.len(),
        };
        set_json(self.store.as_ref(), &doc_key(org_id, id), &record).await?;

        metrics::counter!("retrieval.documents.ingested").increment(1);
        tracing::info!(
            org_id = %org_id,
            document_id = %id,
            chunks = chunks.len(),
            "Document ingested"
        );

        Ok(document)
    }

    /// Replace an existing document. NotFound when the id was never ingested.
    pub async fn update_document(
        &self,
        org_id: &OrgId,
        id: DocumentId,
        new: NewDocument,
    ) -> Result<ContextDocument> {
        if self.get_document(org_id, id).await?.is_none() {
            return Err(GatewayError::NotFound(format!("document {}", id)));
        }
        self.add_document(org_id, NewDocument { id: Some(id), ..new }).await
    }

    /// Remove a document and all its chunks. Returns false if absent.
    pub async fn remove_document(&self, org_id: &OrgId, id: DocumentId) -> Result<bool> {
        let existed = self.store.delete(&doc_key(org_id, id)).await?;
        let removed = self
            .vectors
            .delete_by_prefix(&chunk_prefix(org_id, id))
            .await?;

        if existed {
            tracing::info!(org_id = %org_id, document_id = %id, chunks = removed, "Document removed");
        }
        Ok(existed)
    }

    pub async fn get_document(
        &self,
        org_id: &OrgId,
        id: DocumentId,
    ) -> Result<Option<ContextDocument>> {
        let record: Option<DocumentRecord> =
            get_json(self.store.as_ref(), &doc_key(org_id, id)).await?;
        Ok(record.map(|r| r.document))
    }

    /// Semantic search. Always returns (possibly empty) results — embedding
    /// outages degrade to the fallback vector rather than erroring.
    pub async fn search(
        &self,
        org_id: &OrgId,
        query: &str,
        options: SearchOptions,
    ) -> Result<Vec<RetrievedDocument>> {
        let start = std::time::Instant::now();
        let limit = options.limit.unwrap_or(self.config.default_limit);
        let threshold = options.threshold.unwrap_or(self.config.default_threshold);

        let embedded = self.embeddings.embed_query(query).await;

        // Overfetch so document-granular grouping and filters still fill
        // the requested page.
        let candidates = self
            .vectors
            .search_by_vector(&org_chunk_prefix(org_id), &embedded.vector, limit * 8 + 32)
            .await?;

        let mut results: Vec<RetrievedDocument> = Vec::new();
        let mut seen_documents = std::collections::HashSet::new();

        for candidate in candidates {
            if candidate.score < threshold || results.len() >= limit {
                break;
            }

            let Some(stored) = self.vectors.get(&candidate.key).await? else {
                continue;
            };
            let chunk: DocumentChunk = serde_json::from_str(&stored.payload)?;

            // One hit per document, at its best-matching chunk (candidates
            // arrive score-descending).
            if !seen_documents.insert(chunk.document_id) {
                continue;
            }

            let Some(document) = self.get_document(org_id, chunk.document_id).await? else {
                continue;
            };

            if !matches_filters(&document, &options.filters) {
                seen_documents.remove(&chunk.document_id);
                continue;
            }

            results.push(RetrievedDocument {
                document,
                excerpt: chunk.content,
                chunk_index: chunk.chunk_index,
                score: candidate.score,
                degraded: embedded.degraded,
            });
        }

        metrics::histogram!("retrieval.search.latency").record(start.elapsed().as_secs_f64());
        metrics::histogram!("retrieval.search.results").record(results.len() as f64);

        Ok(results)
    }

    /// Documents similar to an already ingested one, excluding itself.
    pub async fn similar_documents(
        &self,
        org_id: &OrgId,
        id: DocumentId,
        limit: usize,
    ) -> Result<Vec<RetrievedDocument>> {
        let Some(anchor) = self.vectors.get(&chunk_key(org_id, id, 0)).await? else {
            return Err(GatewayError::NotFound(format!("document {}", id)));
        };

        let candidates = self
            .vectors
            .search_by_vector(&org_chunk_prefix(org_id), &anchor.vector, limit * 8 + 32)
            .await?;

        let mut results = Vec::new();
        let mut seen_documents = std::collections::HashSet::from([id]);

        for candidate in candidates {
            if results.len() >= limit {
                break;
            }
            let Some(stored) = self.vectors.get(&candidate.key).await? else {
                continue;
            };
            let chunk: DocumentChunk = serde_json::from_str(&stored.payload)?;
            if !seen_documents.insert(chunk.document_id) {
                continue;
            }
            let Some(document) = self.get_document(org_id, chunk.document_id).await? else {
                continue;
            };
            results.push(RetrievedDocument {
                document,
                excerpt: chunk.content,
                chunk_index: chunk.chunk_index,
                score: candidate.score,
                degraded: false,
            });
        }

        Ok(results)
    }

    /// Per-tenant counters.
    pub async fn stats(&self, org_id: &OrgId) -> Result<RetrievalStats> {
        let records: Vec<DocumentRecord> =
            crate::store::scan_json(self.store.as_ref(), &doc_prefix(org_id)).await?;

        Ok(RetrievalStats {
            document_count: records.len(),
            chunk_count: records.iter().map(|r| r.chunk_count).sum(),
            total_content_chars: records.iter().map(|r| r.content_chars).sum(),
        })
    }

    /// All documents for a tenant (admin listing).
    pub async fn list_documents(&self, org_id: &OrgId) -> Result<Vec<ContextDocument>> {
        let records: Vec<DocumentRecord> =
            crate::store::scan_json(self.store.as_ref(), &doc_prefix(org_id)).await?;
        Ok(records.into_iter().map(|r| r.document).collect())
    }
}

fn matches_filters(document: &ContextDocument, filters: &SearchFilters) -> bool {
    if let Some(ref department) = filters.department {
        if document.department.as_deref() != Some(department.as_str()) {
            return false;
        }
    }
    if let Some(sensitivity) = filters.sensitivity {
        if document.sensitivity != sensitivity {
            return false;
        }
    }
    if let Some(after) = filters.updated_after {
        if document.last_updated < after {
            return false;
        }
    }
    if let Some(before) = filters.updated_before {
        if document.last_updated > before {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, MemoryVectorStore};
    use aegis_common::config::{EmbeddingConfig, RetryConfig};

    /// Retriever wired against in-memory stores. The embedding client has
    /// no API key; tests that ingest prime its memoization cache instead.
    fn retriever() -> (ContextRetriever, Arc<EmbeddingClient>) {
        let embedding_config = EmbeddingConfig {
            api_key_env: "AEGIS_TEST_UNSET_EMBEDDING_KEY".into(),
            dimensions: 4,
            ..EmbeddingConfig::default()
        };
        let embeddings = Arc::new(EmbeddingClient::new(
            embedding_config,
            RetryConfig::default(),
        ));
        (
            ContextRetriever::new(
                Arc::new(MemoryStore::new()),
                Arc::new(MemoryVectorStore::new()),
                Arc::clone(&embeddings),
                RetrievalConfig::default(),
            ),
            embeddings,
        )
    }

    fn doc(content: &str) -> NewDocument {
        NewDocument {
            id: None,
            content: content.into(),
            filename: "handbook.md".into(),
            department: Some("people".into()),
            sensitivity: Sensitivity::Internal,
        }
    }

    #[tokio::test]
    async fn test_add_document_without_provider_is_unavailable() {
        let (retriever, _) = retriever();
        let err = retriever
            .add_document(&OrgId::new("acme"), doc("Policy text."))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::EmbeddingUnavailable(_)));
    }

    #[tokio::test]
    async fn test_search_degrades_instead_of_failing() {
        let (retriever, _) = retriever();
        let results = retriever
            .search(&OrgId::new("acme"), "anything", SearchOptions::default())
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_ingest_search_round_trip() {
        let (retriever, embeddings) = retriever();
        let org = OrgId::new("acme");

        let content = "Vacation policy grants twenty days annually.";
        embeddings.prime_cache(content, vec![1.0, 0.0, 0.0, 0.0]);
        embeddings.prime_cache("vacation days", vec![0.9, 0.1, 0.0, 0.0]);

        let document = retriever.add_document(&org, doc(content)).await.unwrap();

        let results = retriever
            .search(&org, "vacation days", SearchOptions::default())
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].document.id, document.id);
        assert_eq!(results[0].excerpt, content);
        assert!(!results[0].degraded);
        assert!(results[0].score > 0.7);

        let stats = retriever.stats(&org).await.unwrap();
        assert_eq!(stats.document_count, 1);
        assert_eq!(stats.chunk_count, 1);
    }

    #[tokio::test]
    async fn test_reingest_replaces_chunk_set() {
        let (retriever, embeddings) = retriever();
        let org = OrgId::new("acme");

        let original = "Original content. Second sentence here.";
        embeddings.prime_cache(original, vec![1.0, 0.0, 0.0, 0.0]);
        let document = retriever.add_document(&org, doc(original)).await.unwrap();

        let replacement = "Replacement content.";
        embeddings.prime_cache(replacement, vec![0.0, 1.0, 0.0, 0.0]);
        retriever
            .update_document(
                &org,
                document.id,
                NewDocument {
                    id: None,
                    content: replacement.into(),
                    filename: "handbook.md".into(),
                    department: None,
                    sensitivity: Sensitivity::Internal,
                },
            )
            .await
            .unwrap();

        // Chunk count equals the new ingest's count; the old chunks are gone.
        let stats = retriever.stats(&org).await.unwrap();
        assert_eq!(stats.document_count, 1);
        assert_eq!(stats.chunk_count, 1);

        embeddings.prime_cache("replacement", vec![0.0, 1.0, 0.0, 0.0]);
        let results = retriever
            .search(&org, "replacement", SearchOptions::default())
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].excerpt, replacement);
    }

    #[tokio::test]
    async fn test_sensitivity_filter_excludes_mismatches() {
        let (retriever, embeddings) = retriever();
        let org = OrgId::new("acme");

        let content = "Quarterly revenue summary.";
        embeddings.prime_cache(content, vec![1.0, 0.0, 0.0, 0.0]);
        embeddings.prime_cache("revenue", vec![1.0, 0.0, 0.0, 0.0]);
        retriever.add_document(&org, doc(content)).await.unwrap();

        let restricted_only = SearchOptions {
            limit: None,
            threshold: None,
            filters: SearchFilters {
                sensitivity: Some(Sensitivity::Restricted),
                ..SearchFilters::default()
            },
        };
        let results = retriever
            .search(&org, "revenue", restricted_only)
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_remove_document_absent_returns_false() {
        let (retriever, _) = retriever();
        let removed = retriever
            .remove_document(&OrgId::new("acme"), DocumentId::new())
            .await
            .unwrap();
        assert!(!removed);
    }

    #[tokio::test]
    async fn test_stats_empty_tenant() {
        let (retriever, _) = retriever();
        let stats = retriever.stats(&OrgId::new("acme")).await.unwrap();
        assert_eq!(stats.document_count, 0);
        assert_eq!(stats.chunk_count, 0);
    }
}
