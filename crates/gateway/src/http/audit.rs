use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use aegis_common::types::{AuditEntryType, AuditQuery, AuditStatistics, ChainVerification};
use aegis_common::{GatewayError, RequestId};

use crate::audit::ExportFormat;

use super::{authenticate, ApiError, ApiResult, AppState};

#[derive(Deserialize)]
pub struct TrailParams {
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub request_id: Option<Uuid>,
    #[serde(default)]
    pub r#type: Option<AuditEntryType>,
    #[serde(default)]
    pub limit: Option<usize>,
    /// `json` (default) or `csv`.
    #[serde(default)]
    pub format: Option<String>,
}

/// GET /v1/audit — trail query; `format=csv` downloads the export.
pub async fn trail(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<TrailParams>,
) -> ApiResult<Response> {
    let auth = authenticate(&state, &headers).await?;

    if let Some(ref format) = params.format {
        let format = ExportFormat::parse(format).ok_or_else(|| {
            ApiError(GatewayError::BadRequest(format!(
                "unsupported export format '{}'",
                format
            )))
        })?;
        let rendered = state.audit.export(&auth.org_id, format).await?;
        let content_type = match format {
            ExportFormat::Json => "application/json",
            ExportFormat::Csv => "text/csv",
        };
        return Ok((
            StatusCode::OK,
            [(header::CONTENT_TYPE, content_type)],
            rendered,
        )
            .into_response());
    }

    let query = AuditQuery {
        start_date: params.start_date,
        end_date: params.end_date,
        request_id: params.request_id.map(RequestId::from_uuid),
        entry_type: params.r#type,
        limit: params.limit,
    };

    let entries = state.audit.get_audit_trail(&auth.org_id, &query).await?;
    Ok(Json(entries).into_response())
}

/// GET /v1/audit/verify — replay the tenant's hash chain.
pub async fn verify(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<ChainVerification>> {
    let auth = authenticate(&state, &headers).await?;
    let verification = state.audit.verify_chain(&auth.org_id).await?;
    Ok(Json(verification))
}

/// GET /v1/audit/stats — per-tenant statistics.
pub async fn stats(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<AuditStatistics>> {
    let auth = authenticate(&state, &headers).await?;
    let statistics = state.audit.statistics(&auth.org_id).await?;
    Ok(Json(statistics))
}
