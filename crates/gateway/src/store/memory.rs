use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use super::vector::{cosine_similarity, ScoredKey, StoredVector, VectorStore};
use super::{KeyValueStore, StoreError};

/// In-memory key/value store. The default backend for tests and single-node
/// deployments without Redis.
#[derive(Default)]
pub struct MemoryStore {
    /// BTreeMap so prefix scans return key-ordered results.
    /// std Mutex — never held across await points.
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<String>, StoreError>> + Send + 'a>> {
        Box::pin(async move { Ok(self.entries.lock().unwrap().get(key).cloned()) })
    }

    fn set<'a>(
        &'a self,
        key: &'a str,
        value: String,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>> {
        Box::pin(async move {
            self.entries.lock().unwrap().insert(key.to_string(), value);
            Ok(())
        })
    }

    fn delete<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<bool, StoreError>> + Send + 'a>> {
        Box::pin(async move { Ok(self.entries.lock().unwrap().remove(key).is_some()) })
    }

    fn scan_by_prefix<'a>(
        &'a self,
        prefix: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<(String, String)>, StoreError>> + Send + 'a>> {
        Box::pin(async move {
            let entries = self.entries.lock().unwrap();
            Ok(entries
                .range(prefix.to_string()..)
                .take_while(|(k, _)| k.starts_with(prefix))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect())
        })
    }
}

/// In-memory vector store with brute-force cosine search.
#[derive(Default)]
pub struct MemoryVectorStore {
    entries: Mutex<BTreeMap<String, StoredVector>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VectorStore for MemoryVectorStore {
    fn set<'a>(
        &'a self,
        key: &'a str,
        vector: StoredVector,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>> {
        Box::pin(async move {
            self.entries.lock().unwrap().insert(key.to_string(), vector);
            Ok(())
        })
    }

    fn get<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<StoredVector>, StoreError>> + Send + 'a>> {
        Box::pin(async move { Ok(self.entries.lock().unwrap().get(key).cloned()) })
    }

    fn delete_by_prefix<'a>(
        &'a self,
        prefix: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<usize, StoreError>> + Send + 'a>> {
        Box::pin(async move {
            let mut entries = self.entries.lock().unwrap();
            let doomed: Vec<String> = entries
                .range(prefix.to_string()..)
                .take_while(|(k, _)| k.starts_with(prefix))
                .map(|(k, _)| k.clone())
                .collect();
            for key in &doomed {
                entries.remove(key);
            }
            Ok(doomed.len())
        })
    }

    fn search_by_vector<'a>(
        &'a self,
        prefix: &'a str,
        query: &'a [f32],
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ScoredKey>, StoreError>> + Send + 'a>> {
        Box::pin(async move {
            let entries = self.entries.lock().unwrap();
            let mut scored: Vec<ScoredKey> = entries
                .range(prefix.to_string()..)
                .take_while(|(k, _)| k.starts_with(prefix))
                .map(|(k, v)| ScoredKey {
                    key: k.clone(),
                    score: cosine_similarity(query, &v.vector),
                })
                .collect();

            scored.sort_by(|a, b| b.score.total_cmp(&a.score));
            scored.truncate(limit);
            Ok(scored)
        })
    }
}
