use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{OrgId, RuleId};
use crate::types::{PolicyAction, Severity};

/// Whether a rule applies to every tenant or one tenant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RuleScope {
    /// Applies to every tenant. Serialized as the literal "GLOBAL".
    Global(GlobalTag),
    Org(OrgId),
}

/// Marker for the GLOBAL scope literal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GlobalTag {
    #[serde(rename = "GLOBAL")]
    Global,
}

impl RuleScope {
    pub fn global() -> Self {
        Self::Global(GlobalTag::Global)
    }

    pub fn org(org_id: OrgId) -> Self {
        Self::Org(org_id)
    }

    /// Whether a rule with this scope applies to the given tenant.
    pub fn applies_to(&self, org_id: &OrgId) -> bool {
        match self {
            Self::Global(_) => true,
            Self::Org(owner) => owner == org_id,
        }
    }
}

/// A governance rule: a DSL condition over the evaluation plus the action
/// taken when it matches.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRule {
    pub id: RuleId,
    #[serde(rename = "orgId")]
    pub scope: RuleScope,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Boolean DSL over scores, violations, time, and user properties.
    pub condition: String,
    pub action: PolicyAction,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rewrite_template: Option<String>,
    pub enabled: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl PolicyRule {
    pub fn new(
        scope: RuleScope,
        name: impl Into<String>,
        condition: impl Into<String>,
        action: PolicyAction,
        severity: Severity,
    ) -> Self {
        Self {
            id: RuleId::new(),
            scope,
            name: name.into(),
            description: String::new(),
            condition: condition.into(),
            action,
            severity,
            rewrite_template: None,
            enabled: true,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_serialization() {
        let global = RuleScope::global();
        assert_eq!(serde_json::to_string(&global).unwrap(), "\"GLOBAL\"");

        let org = RuleScope::org(OrgId::new("acme"));
        assert_eq!(serde_json::to_string(&org).unwrap(), "\"acme\"");

        let parsed: RuleScope = serde_json::from_str("\"GLOBAL\"").unwrap();
        assert_eq!(parsed, RuleScope::global());
        let parsed: RuleScope = serde_json::from_str("\"acme\"").unwrap();
        assert_eq!(parsed, RuleScope::org(OrgId::new("acme")));
    }

    #[test]
    fn test_scope_applies_to() {
        let tenant = OrgId::new("acme");
        assert!(RuleScope::global().applies_to(&tenant));
        assert!(RuleScope::org(OrgId::new("acme")).applies_to(&tenant));
        assert!(!RuleScope::org(OrgId::new("other")).applies_to(&tenant));
    }
}
