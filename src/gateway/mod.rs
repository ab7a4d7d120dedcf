//! Request-facing coordination of uploads, status lookups, downloads, audits, and queries.
//!
//! The gateway holds no per-request state. Uploads are read in bounded chunks and rejected as
//! soon as they pass the size limit, before anything is written.

mod types;

use bytes::{Bytes, BytesMut};
use futures_core::Stream;
use futures_util::StreamExt;
use serde_json::Map;
use std::fmt::Display;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    metrics::{MetricsSnapshot, PipelineMetrics},
    rag::{QueryAnswer, QueryError, QueryRequest, RagAgent},
    storage::{
        BlobStore, BlobStoreError, Document, DocumentStatus, MetadataStore,
        current_timestamp_rfc3339, document_blob_path,
    },
    vector::VectorIndex,
    workflow::{WorkflowDispatcher, audit},
};

pub use types::{
    AuditView, DocumentView, Download, GatewayError, HealthReport, UploadReceipt, UploadRequest,
};

/// Stateless service behind the HTTP surface.
#[derive(Clone)]
pub struct DocumentGateway {
    blobs: Arc<dyn BlobStore>,
    metadata: Arc<dyn MetadataStore>,
    vectors: Arc<dyn VectorIndex>,
    dispatcher: WorkflowDispatcher,
    agent: Arc<RagAgent>,
    metrics: Arc<PipelineMetrics>,
    max_upload_bytes: usize,
}

impl DocumentGateway {
    /// Build a gateway over the injected collaborators.
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        metadata: Arc<dyn MetadataStore>,
        vectors: Arc<dyn VectorIndex>,
        dispatcher: WorkflowDispatcher,
        agent: Arc<RagAgent>,
        metrics: Arc<PipelineMetrics>,
        max_upload_bytes: usize,
    ) -> Self {
        Self {
            blobs,
            metadata,
            vectors,
            dispatcher,
            agent,
            metrics,
            max_upload_bytes,
        }
    }

    /// Largest accepted upload in bytes.
    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_bytes
    }

    /// Read an upload body chunk by chunk, failing as soon as it exceeds the size limit.
    ///
    /// A body stream error means the client went away; nothing is persisted in that case.
    pub async fn stage_upload<S, E>(&self, body: S) -> Result<Bytes, GatewayError>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: Display,
    {
        let mut body = std::pin::pin!(body);
        let mut buffer = BytesMut::new();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|error| {
                tracing::warn!(error = %error, "Upload stream aborted");
                GatewayError::Validation(format!("upload aborted: {error}"))
            })?;
            if buffer.len() + chunk.len() > self.max_upload_bytes {
                self.metrics.record_upload_rejected();
                tracing::warn!(
                    limit = self.max_upload_bytes,
                    received = buffer.len() + chunk.len(),
                    "Upload rejected: size limit exceeded"
                );
                return Err(GatewayError::PayloadTooLarge {
                    limit: self.max_upload_bytes,
                });
            }
            buffer.extend_from_slice(&chunk);
        }
        Ok(buffer.freeze())
    }

    /// Persist a staged upload, create its record, and dispatch the workflow.
    pub async fn commit_upload(
        &self,
        request: UploadRequest,
        bytes: Bytes,
    ) -> Result<UploadReceipt, GatewayError> {
        let file_name = request.file_name.trim().to_string();
        if file_name.is_empty() {
            self.metrics.record_upload_rejected();
            return Err(GatewayError::Validation("file name is required".into()));
        }

        let document_id = Uuid::new_v4().to_string();
        let workflow_id = format!("wf-{}", Uuid::new_v4());
        let storage_path = document_blob_path(&document_id, &file_name);
        let content_type = request
            .content_type
            .filter(|value| !value.trim().is_empty() && value != "application/octet-stream")
            .unwrap_or_else(|| {
                mime_guess::from_path(&file_name)
                    .first_or_octet_stream()
                    .essence_str()
                    .to_string()
            });
        let size_bytes = bytes.len() as u64;

        self.blobs.put(&storage_path, bytes).await?;

        let now = current_timestamp_rfc3339();
        let document = Document {
            id: document_id.clone(),
            original_name: file_name,
            content_type,
            size_bytes,
            storage_path: storage_path.clone(),
            transaction_id: request
                .transaction_id
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
            metadata: request.metadata,
            status: DocumentStatus::Uploaded,
            workflow_id: workflow_id.clone(),
            processing_results: Map::new(),
            created_at: now.clone(),
            updated_at: now,
        };
        if let Err(error) = self.metadata.create_document(document).await {
            if let Err(cleanup) = self.blobs.delete(&storage_path).await {
                tracing::warn!(path = %storage_path, error = %cleanup, "Failed to remove orphaned blob");
            }
            return Err(error.into());
        }

        self.dispatcher.dispatch(document_id.clone());
        self.metrics.record_upload_accepted();
        tracing::info!(
            document_id = %document_id,
            workflow_id = %workflow_id,
            size_bytes,
            "Upload accepted"
        );

        Ok(UploadReceipt {
            document_id,
            workflow_id,
            status: DocumentStatus::Processing,
        })
    }

    /// Stage and commit in one call.
    pub async fn upload<S, E>(
        &self,
        request: UploadRequest,
        body: S,
    ) -> Result<UploadReceipt, GatewayError>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: Display,
    {
        let bytes = self.stage_upload(body).await?;
        self.commit_upload(request, bytes).await
    }

    /// Look up a document's status and recorded results.
    pub async fn status(&self, document_id: &str) -> Result<DocumentView, GatewayError> {
        Ok(self.require_document(document_id).await?.into())
    }

    /// Open the stored file for streaming.
    pub async fn download(&self, document_id: &str) -> Result<Download, GatewayError> {
        let document = self.require_document(document_id).await?;
        let body = match self.blobs.open(&document.storage_path).await {
            Ok(body) => body,
            Err(BlobStoreError::NotFound(_)) => {
                return Err(GatewayError::NotFound(format!(
                    "stored file for document {document_id} not found"
                )));
            }
            Err(error) => return Err(error.into()),
        };
        Ok(Download {
            file_name: document.original_name,
            content_type: document.content_type,
            size_bytes: document.size_bytes,
            body,
        })
    }

    /// Fetch the audit record and verify its hash.
    pub async fn audit(&self, document_id: &str) -> Result<AuditView, GatewayError> {
        self.require_document(document_id).await?;
        let record = self
            .metadata
            .get_audit_record(document_id)
            .await?
            .ok_or_else(|| {
                GatewayError::NotFound(format!("audit record for document {document_id} not found"))
            })?;
        let verified = audit::verify(&record);
        if !verified {
            tracing::error!(document_id, "Audit record failed verification");
        }
        Ok(AuditView { record, verified })
    }

    /// Forward a query to the RAG agent.
    pub async fn search(&self, request: &QueryRequest) -> Result<QueryAnswer, GatewayError> {
        let result = self.agent.answer(request).await;
        self.metrics.record_query(result.is_ok());
        result.map_err(|error| match error {
            QueryError::EmptyQuery => GatewayError::Validation(error.to_string()),
            QueryError::Failed(failure) => {
                tracing::error!(error = %failure, "Query failed");
                GatewayError::QueryFailed(failure)
            }
        })
    }

    /// Check every backend.
    pub async fn health(&self) -> HealthReport {
        let blobs_ok = self.blobs.health_check().await.is_ok();
        let metadata_ok = self.metadata.ping().await.is_ok();
        let vectors_ok = match self.vectors.health_check().await {
            Ok(()) => true,
            Err(error) => {
                tracing::warn!(error = %error, "Vector index health check failed");
                false
            }
        };
        let storage_connected = blobs_ok && metadata_ok;
        HealthReport {
            status: if storage_connected && vectors_ok {
                "healthy"
            } else {
                "unhealthy"
            },
            storage_connected,
            vector_index_connected: vectors_ok,
            timestamp: current_timestamp_rfc3339(),
        }
    }

    /// Current pipeline counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    async fn require_document(&self, document_id: &str) -> Result<Document, GatewayError> {
        self.metadata
            .get_document(document_id)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("document {document_id} not found")))
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{in_memory, wait_for_terminal};
    use super::*;
    use futures_util::stream;
    use std::convert::Infallible;

    fn chunks(parts: &[&'static [u8]]) -> impl Stream<Item = Result<Bytes, Infallible>> {
        stream::iter(
            parts
                .iter()
                .map(|part| Ok(Bytes::from_static(part)))
                .collect::<Vec<_>>(),
        )
    }

    fn request(name: &str) -> UploadRequest {
        UploadRequest {
            file_name: name.into(),
            transaction_id: Some(" tx-1 ".into()),
            ..UploadRequest::default()
        }
    }

    #[tokio::test]
    async fn upload_creates_record_and_runs_workflow() {
        let stack = in_memory(1024);
        let receipt = stack
            .gateway
            .upload(request("offer.txt"), chunks(&[b"Approved loan ", b"amount is 250,000"]))
            .await
            .expect("upload");
        assert_eq!(receipt.status, DocumentStatus::Processing);
        assert!(receipt.workflow_id.starts_with("wf-"));

        let view = wait_for_terminal(&stack.gateway, &receipt.document_id).await;
        assert_eq!(view.status, DocumentStatus::Processed);
        assert_eq!(view.transaction_id.as_deref(), Some("tx-1"));

        let audit = stack.gateway.audit(&receipt.document_id).await.expect("audit");
        assert!(audit.verified);
        assert_eq!(stack.gateway.metrics().uploads_accepted, 1);
    }

    #[tokio::test]
    async fn oversized_upload_is_rejected_before_any_write() {
        let stack = in_memory(8);
        let error = stack
            .gateway
            .upload(request("big.txt"), chunks(&[b"12345", b"67890"]))
            .await
            .expect_err("too large");
        assert!(matches!(error, GatewayError::PayloadTooLarge { limit: 8 }));
        assert!(stack.blobs.is_empty().await);
        assert!(stack.metadata.list_unfinished().await.expect("list").is_empty());
        assert_eq!(stack.gateway.metrics().uploads_rejected, 1);
    }

    #[tokio::test]
    async fn aborted_stream_creates_nothing() {
        let stack = in_memory(1024);
        let body = stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err("connection reset"),
        ]);
        let error = stack
            .gateway
            .upload(request("offer.txt"), body)
            .await
            .expect_err("aborted");
        assert!(matches!(error, GatewayError::Validation(_)));
        assert!(stack.blobs.is_empty().await);
    }

    #[tokio::test]
    async fn content_type_is_guessed_from_name() {
        let stack = in_memory(1024);
        let receipt = stack
            .gateway
            .upload(request("scan.png"), chunks(&[b"\x89PNG"]))
            .await
            .expect("upload");
        let download = stack
            .gateway
            .download(&receipt.document_id)
            .await
            .expect("download");
        assert_eq!(download.content_type, "image/png");
        assert_eq!(download.file_name, "scan.png");
    }

    #[tokio::test]
    async fn unknown_documents_are_not_found() {
        let stack = in_memory(1024);
        assert!(matches!(
            stack.gateway.status("missing").await,
            Err(GatewayError::NotFound(_))
        ));
        assert!(matches!(
            stack.gateway.download("missing").await,
            Err(GatewayError::NotFound(_))
        ));
        assert!(matches!(
            stack.gateway.audit("missing").await,
            Err(GatewayError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn missing_blob_is_not_found_on_download() {
        let stack = in_memory(1024);
        let receipt = stack
            .gateway
            .upload(request("offer.txt"), chunks(&[b"Approved loan amount is 250,000"]))
            .await
            .expect("upload");
        wait_for_terminal(&stack.gateway, &receipt.document_id).await;
        let path = document_blob_path(&receipt.document_id, "offer.txt");
        stack.blobs.delete(&path).await.expect("delete");

        assert!(matches!(
            stack.gateway.download(&receipt.document_id).await,
            Err(GatewayError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn health_reports_connected_backends() {
        let stack = in_memory(1024);
        let report = stack.gateway.health().await;
        assert_eq!(report.status, "healthy");
        assert!(report.storage_connected);
        assert!(report.vector_index_connected);
    }
}
