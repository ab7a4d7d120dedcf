use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::embedding::EmbeddingClientError;
use crate::generation::GenerationClientError;
use crate::storage::StoreError;
use crate::vector::VectorIndexError;

/// Retrieval parameters.
#[derive(Debug, Clone)]
pub struct QuerySettings {
    /// Nearest neighbours retrieved per query.
    pub top_k: usize,
    /// Token budget for the context block.
    pub context_max_tokens: usize,
    /// Generation model identifier.
    pub model: String,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            top_k: 5,
            context_max_tokens: 4000,
            model: "llama3.1".into(),
        }
    }
}

/// Question about the ingested corpus.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    /// Natural-language question.
    #[serde(default)]
    pub query: String,
    /// Restrict sources to one transaction.
    #[serde(default, alias = "scope")]
    pub transaction_id: Option<String>,
}

/// Document cited in an answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    /// Cited document.
    pub document_id: String,
    /// Similarity score of the match.
    pub confidence: f32,
    /// Excerpt stored with the matched vector.
    pub snippet: String,
}

/// Answer with attributed sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryAnswer {
    /// Generated answer.
    pub answer: String,
    /// Documents the context was drawn from, best match first.
    pub sources: Vec<Source>,
    /// Highest match score, `0.0` without sources.
    pub confidence: f32,
}

/// Underlying cause of a failed query.
#[derive(Debug, Error)]
pub enum QueryFailure {
    /// Query could not be embedded.
    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbeddingClientError),
    /// Nearest-neighbour search failed.
    #[error("vector search failed: {0}")]
    VectorSearch(#[from] VectorIndexError),
    /// Search entries could not be read.
    #[error("search index lookup failed: {0}")]
    Index(#[from] StoreError),
    /// The generator failed.
    #[error("answer generation failed: {0}")]
    Generation(#[from] GenerationClientError),
}

/// Errors returned by the query agent.
#[derive(Debug, Error)]
pub enum QueryError {
    /// The question was missing or blank.
    #[error("query must not be empty")]
    EmptyQuery,
    /// A retrieval or generation step failed; no partial answer is produced.
    #[error("Query failed: {0}")]
    Failed(#[from] QueryFailure),
}
