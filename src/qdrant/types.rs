//! Error type and REST wire shapes for the Qdrant client.

use reqwest::{Response, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors returned while interacting with Qdrant.
#[derive(Debug, Error)]
pub enum QdrantError {
    /// Base URL failed to parse or normalize.
    #[error("Invalid Qdrant URL: {0}")]
    InvalidUrl(String),
    /// HTTP layer failed before receiving a response.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Qdrant responded with an unexpected status code.
    #[error("Unexpected Qdrant response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status returned from Qdrant.
        status: StatusCode,
        /// Body payload associated with the failing response.
        body: String,
    },
}

impl QdrantError {
    /// Capture status and body of a non-success response.
    pub(crate) async fn from_response(response: Response) -> Self {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Self::UnexpectedStatus { status, body }
    }
}

/// Point returned by a similarity query, with its id rendered as a string.
#[derive(Debug, Clone)]
pub struct ScoredPoint {
    /// Point id (UUID or integer).
    pub id: String,
    /// Similarity score computed by Qdrant.
    pub score: f32,
    /// Stored payload, if requested.
    pub payload: Option<Map<String, Value>>,
}

/// `{ "result": ... }` wrapper used by every Qdrant endpoint.
#[derive(Deserialize)]
pub(crate) struct Envelope<T> {
    pub(crate) result: T,
}

#[derive(Deserialize)]
pub(crate) struct CollectionList {
    pub(crate) collections: Vec<CollectionName>,
}

#[derive(Deserialize)]
pub(crate) struct CollectionName {
    pub(crate) name: String,
}

/// `points/query` answers with a bare list on older servers and `{ points }` on newer ones.
#[derive(Deserialize)]
#[serde(untagged)]
pub(crate) enum QueryResult {
    Points(Vec<QueryPoint>),
    Wrapped {
        #[serde(default)]
        points: Vec<QueryPoint>,
    },
}

impl QueryResult {
    pub(crate) fn into_points(self) -> Vec<QueryPoint> {
        match self {
            Self::Points(points) | Self::Wrapped { points } => points,
        }
    }
}

#[derive(Deserialize)]
pub(crate) struct QueryPoint {
    pub(crate) id: Value,
    pub(crate) score: f32,
    #[serde(default)]
    pub(crate) payload: Option<Map<String, Value>>,
}
