use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! define_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_id!(
    RequestId,
    "Typed wrapper for gateway request UUIDs — one per pipeline invocation."
);
define_id!(
    DocumentId,
    "Typed wrapper for context document UUIDs in the retrieval store."
);
define_id!(RuleId, "Typed wrapper for policy rule UUIDs.");
define_id!(EndpointId, "Typed wrapper for webhook endpoint UUIDs.");
define_id!(EventId, "Typed wrapper for webhook event UUIDs.");
define_id!(AlertRuleId, "Typed wrapper for alert rule UUIDs.");
define_id!(AlertId, "Typed wrapper for alert UUIDs.");
define_id!(AuditEntryId, "Typed wrapper for audit entry UUIDs.");

/// Tenant identifier. Opaque string assigned by the external org store —
/// namespaces policies, documents, endpoints, audit chains, and rate limits.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrgId(pub String);

impl OrgId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for OrgId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for OrgId {
    fn from(s: String) -> Self {
        Self(s)
    }
}
