use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use aegis_common::canonical::sha256_hex;
use aegis_common::{GatewayError, OrgId, Result};

use crate::store::{get_json, KeyValueStore};

/// Identity resolved by the auth collaborator.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthContext {
    pub user_id: String,
    pub org_id: OrgId,
    pub role: String,
}

/// External authentication collaborator. The gateway hands it whatever
/// credentials the request carried; it returns the caller's identity or
/// rejects. Object-safe via boxed futures so tests can stub it.
pub trait AuthValidator: Send + Sync {
    fn validate<'a>(
        &'a self,
        bearer: Option<&'a str>,
        api_key: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = Result<AuthContext>> + Send + 'a>>;
}

/// JWT claims the gateway understands.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: String,
    /// Tenant id.
    pub org: String,
    #[serde(default = "default_role")]
    pub role: String,
    /// Expiry, seconds since epoch.
    pub exp: i64,
}

fn default_role() -> String {
    "member".to_string()
}

/// Production validator: HS256 bearer tokens under `JWT_SECRET`, or API
/// keys looked up (by content hash) through the key/value collaborator.
pub struct TokenAuthValidator {
    decoding_key: DecodingKey,
    store: Arc<dyn KeyValueStore>,
}

fn api_key_record(key: &str) -> String {
    // Keys are stored hashed; a leaked store dump reveals no usable keys.
    format!("apikeys:{}", sha256_hex(key.as_bytes()))
}

impl TokenAuthValidator {
    pub fn new(jwt_secret: &str, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(jwt_secret.as_bytes()),
            store,
        }
    }

    /// Register an API key for a tenant (admin bootstrap path).
    pub async fn register_api_key(&self, key: &str, identity: &AuthContext) -> Result<()> {
        crate::store::set_json(self.store.as_ref(), &api_key_record(key), identity).await?;
        Ok(())
    }

    fn validate_bearer(&self, token: &str) -> Result<AuthContext> {
        let data = decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map_err(|e| GatewayError::Unauthorized(format!("invalid bearer token: {}", e)))?;

        Ok(AuthContext {
            user_id: data.claims.sub,
            org_id: OrgId::new(data.claims.org),
            role: data.claims.role,
        })
    }

    async fn validate_api_key(&self, key: &str) -> Result<AuthContext> {
        get_json::<AuthContext>(self.store.as_ref(), &api_key_record(key))
            .await?
            .ok_or_else(|| GatewayError::Unauthorized("unknown API key".into()))
    }
}

impl AuthValidator for TokenAuthValidator {
    fn validate<'a>(
        &'a self,
        bearer: Option<&'a str>,
        api_key: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = Result<AuthContext>> + Send + 'a>> {
        Box::pin(async move {
            if let Some(token) = bearer {
                return self.validate_bearer(token);
            }
            if let Some(key) = api_key {
                return self.validate_api_key(key).await;
            }
            Err(GatewayError::Unauthorized("missing credentials".into()))
        })
    }
}
