use std::future::Future;
use std::pin::Pin;

use ::redis::aio::ConnectionManager;

use super::{KeyValueStore, StoreError};

/// Redis-backed key/value store, used when `REDIS_URL` is configured.
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect and verify the connection with a PING.
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        tracing::info!("Connecting to Redis");

        let client =
            ::redis::Client::open(redis_url).map_err(|e| StoreError::Backend(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let store = Self { conn };
        store.health_check().await?;
        tracing::info!("Redis connection established");
        Ok(store)
    }

    /// Get a clone of the managed connection for direct use (the response
    /// cache shares the backend).
    pub fn connection(&self) -> ConnectionManager {
        self.conn.clone()
    }

    /// Verify the connection is alive (PING).
    pub async fn health_check(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let pong: String = ::redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        if pong != "PONG" {
            return Err(StoreError::Backend(format!(
                "Unexpected PING response: {}",
                pong
            )));
        }
        Ok(())
    }
}

impl KeyValueStore for RedisStore {
    fn get<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<String>, StoreError>> + Send + 'a>> {
        Box::pin(async move {
            let mut conn = self.conn.clone();
            ::redis::cmd("GET")
                .arg(key)
                .query_async(&mut conn)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))
        })
    }

    fn set<'a>(
        &'a self,
        key: &'a str,
        value: String,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>> {
        Box::pin(async move {
            let mut conn = self.conn.clone();
            let _: () = ::redis::cmd("SET")
                .arg(key)
                .arg(value)
                .query_async(&mut conn)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            Ok(())
        })
    }

    fn delete<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<bool, StoreError>> + Send + 'a>> {
        Box::pin(async move {
            let mut conn = self.conn.clone();
            let removed: u32 = ::redis::cmd("DEL")
                .arg(key)
                .query_async(&mut conn)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            Ok(removed > 0)
        })
    }

    fn scan_by_prefix<'a>(
        &'a self,
        prefix: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<(String, String)>, StoreError>> + Send + 'a>> {
        Box::pin(async move {
            let mut conn = self.conn.clone();
            let pattern = format!("{}*", prefix);
            let mut cursor: u64 = 0;
            let mut keys: Vec<String> = Vec::new();

            // SCAN, not KEYS — never block the server on large keyspaces.
            loop {
                let (next, batch): (u64, Vec<String>) = ::redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(&pattern)
                    .arg("COUNT")
                    .arg(500)
                    .query_async(&mut conn)
                    .await
                    .map_err(|e| StoreError::Backend(e.to_string()))?;

                keys.extend(batch);
                cursor = next;
                if cursor == 0 {
                    break;
                }
            }

            keys.sort();

            let mut out = Vec::with_capacity(keys.len());
            for key in keys {
                let value: Option<String> = ::redis::cmd("GET")
                    .arg(&key)
                    .query_async(&mut conn)
                    .await
                    .map_err(|e| StoreError::Backend(e.to_string()))?;
                if let Some(value) = value {
                    out.push((key, value));
                }
            }
            Ok(out)
        })
    }
}
