//! Vector Index abstraction and the in-process cosine implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::qdrant::QdrantError;

/// Errors surfaced by Vector Index implementations.
#[derive(Debug, Error)]
pub enum VectorIndexError {
    /// Qdrant transport or status failure.
    #[error("Qdrant request failed: {0}")]
    Qdrant(#[from] QdrantError),
    /// Vector length does not match the index dimension.
    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension the index was created with.
        expected: usize,
        /// Dimension of the rejected vector.
        actual: usize,
    },
    /// Stored payload could not be mapped back into [`VectorMetadata`].
    #[error("Malformed vector payload for {id}: {reason}")]
    MalformedPayload {
        /// Identifier of the offending point.
        id: String,
        /// What was missing or invalid.
        reason: String,
    },
    /// Backend is unreachable.
    #[error("Vector index unavailable: {0}")]
    Unavailable(String),
}

/// Metadata attached to every vector, linking it back to its document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorMetadata {
    /// Owning document.
    pub document_id: String,
    /// Bounded excerpt of the embedded text.
    pub snippet: String,
    /// RFC3339 time of registration.
    pub timestamp: String,
    /// Scope key used to partition search results.
    pub transaction_id: Option<String>,
}

/// Vector registered in the index.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorEntry {
    /// Unique identifier, fresh per document and invocation.
    pub id: String,
    /// Fixed-length embedding.
    pub embedding: Vec<f32>,
    /// Payload returned with matches.
    pub metadata: VectorMetadata,
}

/// Scored nearest-neighbour result.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorMatch {
    /// Identifier of the matched vector.
    pub id: String,
    /// Similarity score (higher is closer).
    pub score: f32,
    /// Payload stored with the vector.
    pub metadata: VectorMetadata,
}

/// Nearest-neighbour search over document embeddings.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace a vector.
    async fn upsert(&self, entry: VectorEntry) -> Result<(), VectorIndexError>;

    /// Return up to `limit` matches ordered by descending score. When `scope` is present only
    /// vectors registered with that transaction id are considered.
    async fn search(
        &self,
        vector: Vec<f32>,
        limit: usize,
        scope: Option<&str>,
    ) -> Result<Vec<VectorMatch>, VectorIndexError>;

    /// Confirm the backend is reachable.
    async fn health_check(&self) -> Result<(), VectorIndexError>;
}

/// Brute-force cosine index kept in memory.
pub struct MemoryVectorIndex {
    dimension: usize,
    entries: RwLock<HashMap<String, VectorEntry>>,
}

impl MemoryVectorIndex {
    /// Create an empty index accepting vectors of `dimension` components.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored vectors.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the index holds no vectors.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    fn check_dimension(&self, actual: usize) -> Result<(), VectorIndexError> {
        if actual != self.dimension {
            return Err(VectorIndexError::DimensionMismatch {
                expected: self.dimension,
                actual,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn upsert(&self, entry: VectorEntry) -> Result<(), VectorIndexError> {
        self.check_dimension(entry.embedding.len())?;
        self.entries.write().await.insert(entry.id.clone(), entry);
        Ok(())
    }

    async fn search(
        &self,
        vector: Vec<f32>,
        limit: usize,
        scope: Option<&str>,
    ) -> Result<Vec<VectorMatch>, VectorIndexError> {
        self.check_dimension(vector.len())?;
        let entries = self.entries.read().await;
        let mut matches: Vec<VectorMatch> = entries
            .values()
            .filter(|entry| match scope {
                Some(scope) => entry.metadata.transaction_id.as_deref() == Some(scope),
                None => true,
            })
            .map(|entry| VectorMatch {
                id: entry.id.clone(),
                score: cosine_similarity(&vector, &entry.embedding),
                metadata: entry.metadata.clone(),
            })
            .collect();
        matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        matches.truncate(limit);
        Ok(matches)
    }

    async fn health_check(&self) -> Result<(), VectorIndexError> {
        Ok(())
    }
}

/// Cosine similarity; zero vectors score `0.0`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, embedding: Vec<f32>, transaction_id: Option<&str>) -> VectorEntry {
        VectorEntry {
            id: id.to_string(),
            embedding,
            metadata: VectorMetadata {
                document_id: format!("doc-{id}"),
                snippet: "snippet".into(),
                timestamp: "2025-01-01T00:00:00Z".into(),
                transaction_id: transaction_id.map(str::to_string),
            },
        }
    }

    #[tokio::test]
    async fn search_orders_by_similarity_and_truncates() {
        let index = MemoryVectorIndex::new(2);
        index.upsert(entry("a", vec![1.0, 0.0], None)).await.expect("a");
        index.upsert(entry("b", vec![0.7, 0.7], None)).await.expect("b");
        index.upsert(entry("c", vec![0.0, 1.0], None)).await.expect("c");

        let matches = index.search(vec![1.0, 0.1], 2, None).await.expect("search");
        let ids: Vec<_> = matches.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(matches[0].score >= matches[1].score);
    }

    #[tokio::test]
    async fn scope_filter_excludes_other_transactions() {
        let index = MemoryVectorIndex::new(2);
        index.upsert(entry("a", vec![1.0, 0.0], Some("tx-1"))).await.expect("a");
        index.upsert(entry("b", vec![1.0, 0.0], Some("tx-2"))).await.expect("b");
        index.upsert(entry("c", vec![1.0, 0.0], None)).await.expect("c");

        let matches = index.search(vec![1.0, 0.0], 10, Some("tx-1")).await.expect("search");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].metadata.transaction_id.as_deref(), Some("tx-1"));
    }

    #[tokio::test]
    async fn rejects_wrong_dimension() {
        let index = MemoryVectorIndex::new(3);
        let error = index
            .upsert(entry("a", vec![1.0], None))
            .await
            .expect_err("dimension mismatch");
        assert!(matches!(
            error,
            VectorIndexError::DimensionMismatch { expected: 3, actual: 1 }
        ));
    }

    #[test]
    fn cosine_handles_zero_vectors() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-6);
    }
}
