//! HTTP client wrapper for interacting with Qdrant.

use crate::qdrant::{
    filters::build_scope_filter,
    payload::{build_payload, parse_payload},
    types::{CollectionList, Envelope, QdrantError, QueryResult, ScoredPoint},
};
use crate::vector::{VectorEntry, VectorIndex, VectorIndexError, VectorMatch};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde_json::{Value, json};

/// Lightweight HTTP client for one Qdrant collection.
pub struct QdrantService {
    pub(crate) client: Client,
    pub(crate) base_url: String,
    pub(crate) api_key: Option<String>,
    pub(crate) collection: String,
}

impl QdrantService {
    /// Construct a client for `collection` at `url`.
    pub fn new(
        url: &str,
        collection: impl Into<String>,
        api_key: Option<String>,
    ) -> Result<Self, QdrantError> {
        let client = Client::builder().user_agent("rusty-docs/0.1").build()?;
        let base_url = normalize_base_url(url).map_err(QdrantError::InvalidUrl)?;
        let collection = collection.into();
        tracing::debug!(
            url = %base_url,
            collection = %collection,
            has_api_key = %api_key
                .as_deref()
                .map(|value| !value.is_empty())
                .unwrap_or(false),
            "Initialized Qdrant HTTP client"
        );

        Ok(Self {
            client,
            base_url,
            api_key,
            collection,
        })
    }

    /// Name of the collection this client writes to.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Make sure the collection and its payload indexes exist.
    pub async fn ensure_collection(&self, vector_size: u64) -> Result<(), QdrantError> {
        if !self.collection_exists().await? {
            tracing::debug!(
                collection = %self.collection,
                vector_size,
                "Creating collection"
            );
            self.create_collection(vector_size).await?;
        }
        self.ensure_payload_indexes().await
    }

    /// Create or update the collection with the specified vector size.
    pub async fn create_collection(&self, vector_size: u64) -> Result<(), QdrantError> {
        let body = json!({
            "vectors": {
                "size": vector_size,
                "distance": "Cosine"
            }
        });

        let response = self
            .request(Method::PUT, &format!("collections/{}", self.collection))?
            .json(&body)
            .send()
            .await?;

        self.ensure_success(response, || {
            tracing::debug!(collection = %self.collection, "Collection ensured/created");
        })
        .await
    }

    /// Retrieve the names of all collections present in Qdrant.
    pub async fn list_collections(&self) -> Result<Vec<String>, QdrantError> {
        let response = self.request(Method::GET, "collections")?.send().await?;

        if response.status().is_success() {
            let payload: Envelope<CollectionList> = response.json().await?;
            let names = payload
                .result
                .collections
                .into_iter()
                .map(|collection| collection.name)
                .collect();
            Ok(names)
        } else {
            let error = QdrantError::from_response(response).await;
            tracing::error!(error = %error, "Failed to list collections");
            Err(error)
        }
    }

    /// Upload a single point and wait for it to be applied.
    pub async fn upsert_point(&self, entry: &VectorEntry) -> Result<(), QdrantError> {
        let point = json!({
            "id": entry.id,
            "vector": entry.embedding,
            "payload": build_payload(&entry.metadata),
        });

        let response = self
            .request(
                Method::PUT,
                &format!("collections/{}/points", self.collection),
            )?
            .query(&[("wait", true)])
            .json(&json!({ "points": [point] }))
            .send()
            .await?;

        self.ensure_success(response, || {
            tracing::debug!(
                collection = %self.collection,
                point_id = %entry.id,
                document_id = %entry.metadata.document_id,
                "Point indexed"
            );
        })
        .await
    }

    /// Perform a similarity search, returning scored payloads.
    pub async fn search_points(
        &self,
        vector: Vec<f32>,
        filter: Option<Value>,
        limit: usize,
    ) -> Result<Vec<ScoredPoint>, QdrantError> {
        let mut body = json!({
            "query": vector,
            "limit": limit,
            "with_payload": true,
        });
        if let (Some(filter_value), Some(obj)) = (filter, body.as_object_mut()) {
            obj.insert("filter".into(), filter_value);
        }

        let response = self
            .request(
                Method::POST,
                &format!("collections/{}/points/query", self.collection),
            )?
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let error = QdrantError::from_response(response).await;
            tracing::error!(collection = %self.collection, error = %error, "Qdrant search failed");
            return Err(error);
        }

        let payload: Envelope<QueryResult> = response.json().await?;
        Ok(payload
            .result
            .into_points()
            .into_iter()
            .map(|point| ScoredPoint {
                id: stringify_point_id(point.id),
                score: point.score,
                payload: point.payload,
            })
            .collect())
    }

    /// Ensure payload indexes exist for the fields used in filters.
    pub async fn ensure_payload_indexes(&self) -> Result<(), QdrantError> {
        let fields: [(&str, &str); 3] = [
            ("document_id", "keyword"),
            ("transaction_id", "keyword"),
            ("timestamp", "datetime"),
        ];

        for (field, schema) in fields {
            let body = json!({
                "field_name": field,
                "field_schema": schema,
            });

            let response = self
                .request(
                    Method::PUT,
                    &format!("collections/{}/index", self.collection),
                )?
                .json(&body)
                .send()
                .await?;

            if response.status().is_success() {
                tracing::debug!(collection = %self.collection, field, schema, "Payload index ensured");
            } else if response.status() == StatusCode::CONFLICT {
                tracing::debug!(collection = %self.collection, field, schema, "Payload index already exists");
            } else {
                let error = QdrantError::from_response(response).await;
                tracing::warn!(collection = %self.collection, field, schema, error = %error, "Failed to ensure payload index");
            }
        }

        Ok(())
    }

    async fn collection_exists(&self) -> Result<bool, QdrantError> {
        let response = self
            .request(Method::GET, &format!("collections/{}", self.collection))?
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => {
                let error = QdrantError::from_response(response).await;
                tracing::error!(collection = %self.collection, error = %error, "Collection existence check failed");
                Err(error)
            }
        }
    }

    fn request(&self, method: Method, path: &str) -> Result<reqwest::RequestBuilder, QdrantError> {
        let url = format_endpoint(&self.base_url, path);
        let mut req = self.client.request(method, url);
        if let Some(api_key) = &self.api_key
            && !api_key.is_empty()
        {
            req = req.header("api-key", api_key);
        }
        Ok(req)
    }

    async fn ensure_success<F>(
        &self,
        response: reqwest::Response,
        on_success: F,
    ) -> Result<(), QdrantError>
    where
        F: FnOnce(),
    {
        if response.status().is_success() {
            on_success();
            Ok(())
        } else {
            let error = QdrantError::from_response(response).await;
            tracing::error!(error = %error, "Qdrant request failed");
            Err(error)
        }
    }
}

#[async_trait]
impl VectorIndex for QdrantService {
    async fn upsert(&self, entry: VectorEntry) -> Result<(), VectorIndexError> {
        self.upsert_point(&entry).await.map_err(VectorIndexError::from)
    }

    async fn search(
        &self,
        vector: Vec<f32>,
        limit: usize,
        scope: Option<&str>,
    ) -> Result<Vec<VectorMatch>, VectorIndexError> {
        let points = self
            .search_points(vector, build_scope_filter(scope), limit)
            .await?;
        points
            .into_iter()
            .map(|point| {
                let metadata = parse_payload(&point.id, point.payload)?;
                Ok(VectorMatch {
                    id: point.id,
                    score: point.score,
                    metadata,
                })
            })
            .collect()
    }

    async fn health_check(&self) -> Result<(), VectorIndexError> {
        let collections = self.list_collections().await?;
        if collections.iter().any(|name| name == &self.collection) {
            Ok(())
        } else {
            Err(VectorIndexError::Unavailable(format!(
                "collection {} is missing",
                self.collection
            )))
        }
    }
}

fn normalize_base_url(url: &str) -> Result<String, String> {
    let mut parsed = reqwest::Url::parse(url).map_err(|err| err.to_string())?;
    let path = parsed.path().trim_end_matches('/').to_string();
    parsed.set_path(&path);
    Ok(parsed.to_string())
}

fn format_endpoint(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}

fn stringify_point_id(id: Value) -> String {
    match id {
        Value::String(text) => text,
        Value::Number(number) => number.to_string(),
        Value::Object(map) => map
            .get("uuid")
            .map(|value| match value {
                Value::String(uuid) => uuid.clone(),
                other => other.to_string(),
            })
            .unwrap_or_else(|| Value::Object(map).to_string()),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
