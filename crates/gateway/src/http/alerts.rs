use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use aegis_common::types::{Alert, AlertChannel, AlertCondition, AlertRule, RuleScope, Severity};
use aegis_common::{AlertId, AlertRuleId, GatewayError};

use super::{authenticate, ApiError, ApiResult, AppState};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAlertRuleBody {
    pub name: String,
    pub conditions: Vec<AlertCondition>,
    pub actions: Vec<AlertChannel>,
    pub cooldown_minutes: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub global: bool,
}

fn default_enabled() -> bool {
    true
}

/// GET /v1/alerts/rules.
pub async fn list_rules(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<AlertRule>>> {
    let auth = authenticate(&state, &headers).await?;
    let rules = state.alerts.rules_for(&auth.org_id).await?;
    Ok(Json(rules))
}

/// POST /v1/alerts/rules.
pub async fn create_rule(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateAlertRuleBody>,
) -> ApiResult<Json<AlertRule>> {
    let auth = authenticate(&state, &headers).await?;

    let scope = if body.global {
        if auth.role != "admin" {
            return Err(ApiError(GatewayError::Forbidden(
                "only admins may create global alert rules".into(),
            )));
        }
        RuleScope::global()
    } else {
        RuleScope::org(auth.org_id.clone())
    };

    let rule = AlertRule {
        id: AlertRuleId::new(),
        scope,
        name: body.name,
        enabled: body.enabled,
        conditions: body.conditions,
        actions: body.actions,
        cooldown_minutes: body.cooldown_minutes,
        last_triggered: None,
    };

    let rule = state.alerts.create_rule(rule).await?;
    Ok(Json(rule))
}

#[derive(Deserialize)]
pub struct AlertListParams {
    #[serde(default)]
    pub resolved: Option<bool>,
    #[serde(default)]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// GET /v1/alerts — newest first, filterable.
pub async fn list(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<AlertListParams>,
) -> ApiResult<Json<Vec<Alert>>> {
    let auth = authenticate(&state, &headers).await?;
    let alerts = state
        .alerts
        .alerts(&auth.org_id, params.resolved, params.severity, params.limit)
        .await?;
    Ok(Json(alerts))
}

/// POST /v1/alerts/{id}/resolve — resolve, never delete.
pub async fn resolve(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Alert>> {
    let auth = authenticate(&state, &headers).await?;
    let alert = state
        .alerts
        .resolve(&auth.org_id, AlertId::from_uuid(id))
        .await?;
    Ok(Json(alert))
}
