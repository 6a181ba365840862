use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use super::StoreError;

/// A persisted embedding plus the serialized chunk it belongs to.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoredVector {
    pub vector: Vec<f32>,
    /// Serialized chunk payload (content + metadata), opaque to the store.
    pub payload: String,
}

/// A search hit: the stored key and its cosine similarity to the query.
#[derive(Clone, Debug)]
pub struct ScoredKey {
    pub key: String,
    pub score: f64,
}

/// Vector persistence collaborator — the key/value interface plus
/// similarity search. Object-safe via boxed futures.
pub trait VectorStore: Send + Sync {
    fn set<'a>(
        &'a self,
        key: &'a str,
        vector: StoredVector,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>>;

    fn get<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<StoredVector>, StoreError>> + Send + 'a>>;

    /// Remove every vector whose key starts with `prefix`; returns the count.
    fn delete_by_prefix<'a>(
        &'a self,
        prefix: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<usize, StoreError>> + Send + 'a>>;

    /// Keys under `prefix` ranked by cosine similarity to `query`,
    /// descending, at most `limit`.
    fn search_by_vector<'a>(
        &'a self,
        prefix: &'a str,
        query: &'a [f32],
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ScoredKey>, StoreError>> + Send + 'a>>;
}

/// Cosine similarity between two vectors. Zero-magnitude or
/// mismatched-length inputs score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut mag_a = 0.0f64;
    let mut mag_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += *x as f64 * *y as f64;
        mag_a += *x as f64 * *x as f64;
        mag_b += *y as f64 * *y as f64;
    }

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    dot / (mag_a.sqrt() * mag_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_self_similarity_is_one() {
        let v = vec![0.3f32, -0.7, 0.64, 0.12];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal_is_zero() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-9);
    }

    #[test]
    fn test_cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }
}
