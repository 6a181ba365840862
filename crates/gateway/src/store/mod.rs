mod memory;
mod redis;
mod vector;

use std::future::Future;
use std::pin::Pin;

pub use memory::{MemoryStore, MemoryVectorStore};
pub use redis::RedisStore;
pub use vector::{cosine_similarity, ScoredKey, StoredVector, VectorStore};

/// Errors from the persistence collaborators.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store backend error: {0}")]
    Backend(String),

    #[error("Store serialization error: {0}")]
    Serialization(String),
}

impl From<StoreError> for aegis_common::GatewayError {
    fn from(e: StoreError) -> Self {
        aegis_common::GatewayError::Store(e.to_string())
    }
}

/// Opaque key/value persistence collaborator.
///
/// Audit chains, policy rules, endpoints, alerts, and document metadata all
/// persist through this interface; the gateway never assumes a concrete
/// backend. Object-safe via boxed futures (dyn dispatch).
pub trait KeyValueStore: Send + Sync {
    fn get<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<String>, StoreError>> + Send + 'a>>;

    fn set<'a>(
        &'a self,
        key: &'a str,
        value: String,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>>;

    fn delete<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<bool, StoreError>> + Send + 'a>>;

    /// All `(key, value)` pairs whose key starts with `prefix`, key-ordered.
    fn scan_by_prefix<'a>(
        &'a self,
        prefix: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<(String, String)>, StoreError>> + Send + 'a>>;
}

/// Typed JSON helpers over the raw string interface.
pub async fn get_json<T: serde::de::DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>, StoreError> {
    match store.get(key).await? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| StoreError::Serialization(e.to_string())),
        None => Ok(None),
    }
}

pub async fn set_json<T: serde::Serialize>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> Result<(), StoreError> {
    let raw = serde_json::to_string(value).map_err(|e| StoreError::Serialization(e.to_string()))?;
    store.set(key, raw).await
}

pub async fn scan_json<T: serde::de::DeserializeOwned>(
    store: &dyn KeyValueStore,
    prefix: &str,
) -> Result<Vec<T>, StoreError> {
    let mut out = Vec::new();
    for (_, raw) in store.scan_by_prefix(prefix).await? {
        out.push(
            serde_json::from_str(&raw).map_err(|e| StoreError::Serialization(e.to_string()))?,
        );
    }
    Ok(out)
}
