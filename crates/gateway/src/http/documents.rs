use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use aegis_common::types::{ContextDocument, RetrievedDocument, SearchFilters, Sensitivity};
use aegis_common::{DocumentId, GatewayError};

use crate::retrieval::{NewDocument, SearchOptions};

use super::{authenticate, ApiError, ApiResult, AppState};

#[derive(Deserialize)]
pub struct AddDocumentBody {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub content: String,
    pub filename: String,
    #[serde(default)]
    pub department: Option<String>,
    pub sensitivity: Sensitivity,
}

/// POST /v1/documents — ingest (or replace) a tenant context document.
pub async fn add_document(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<AddDocumentBody>,
) -> ApiResult<Json<ContextDocument>> {
    let auth = authenticate(&state, &headers).await?;

    if body.content.is_empty() {
        return Err(ApiError(GatewayError::BadRequest(
            "document content must not be empty".into(),
        )));
    }

    let document = state
        .retriever
        .add_document(
            &auth.org_id,
            NewDocument {
                id: body.id.map(DocumentId::from_uuid),
                content: body.content,
                filename: body.filename,
                department: body.department,
                sensitivity: body.sensitivity,
            },
        )
        .await?;

    Ok(Json(document))
}

/// DELETE /v1/documents/{id} — remove a document and all its chunks.
pub async fn remove_document(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let auth = authenticate(&state, &headers).await?;

    let removed = state
        .retriever
        .remove_document(&auth.org_id, DocumentId::from_uuid(id))
        .await?;

    if !removed {
        return Err(ApiError(GatewayError::NotFound(format!("document {}", id))));
    }
    Ok(Json(serde_json::json!({ "removed": true })))
}

#[derive(Deserialize)]
pub struct SearchParams {
    pub q: String,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub threshold: Option<f64>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub sensitivity: Option<Sensitivity>,
}

/// GET /v1/search — tenant semantic search over ingested documents.
pub async fn search(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<SearchParams>,
) -> ApiResult<Json<Vec<RetrievedDocument>>> {
    let auth = authenticate(&state, &headers).await?;

    let results = state
        .retriever
        .search(
            &auth.org_id,
            &params.q,
            SearchOptions {
                limit: params.limit,
                threshold: params.threshold,
                filters: SearchFilters {
                    department: params.department,
                    sensitivity: params.sensitivity,
                    updated_after: None,
                    updated_before: None,
                },
            },
        )
        .await?;

    Ok(Json(results))
}
