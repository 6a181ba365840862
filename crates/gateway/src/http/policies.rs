use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use aegis_common::types::{PolicyAction, PolicyRule, RuleScope, Severity};
use aegis_common::{GatewayError, RuleId};

use super::{authenticate, ApiError, ApiResult, AppState};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRuleBody {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub condition: String,
    pub action: PolicyAction,
    pub severity: Severity,
    #[serde(default)]
    pub rewrite_template: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Admins may create GLOBAL rules.
    #[serde(default)]
    pub global: bool,
}

fn default_enabled() -> bool {
    true
}

/// GET /v1/policies/rules — global + tenant rules.
pub async fn list(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<PolicyRule>>> {
    let auth = authenticate(&state, &headers).await?;
    let rules = state.policy.rules_for(&auth.org_id).await?;
    Ok(Json(rules))
}

/// POST /v1/policies/rules — create a rule.
pub async fn create(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateRuleBody>,
) -> ApiResult<Json<PolicyRule>> {
    let auth = authenticate(&state, &headers).await?;

    let scope = if body.global {
        if auth.role != "admin" {
            return Err(ApiError(GatewayError::Forbidden(
                "only admins may create global rules".into(),
            )));
        }
        RuleScope::global()
    } else {
        RuleScope::org(auth.org_id.clone())
    };

    let mut rule = PolicyRule::new(scope, body.name, body.condition, body.action, body.severity);
    rule.description = body.description;
    rule.rewrite_template = body.rewrite_template;
    rule.enabled = body.enabled;

    let rule = state.policy.create_rule(rule).await?;
    Ok(Json(rule))
}

/// DELETE /v1/policies/rules/{id} — delete a tenant rule.
pub async fn remove(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let auth = authenticate(&state, &headers).await?;

    let removed = state
        .policy
        .delete_rule(&auth.org_id, RuleId::from_uuid(id))
        .await?;
    if !removed {
        return Err(ApiError(GatewayError::NotFound(format!("rule {}", id))));
    }
    Ok(Json(serde_json::json!({ "removed": true })))
}
