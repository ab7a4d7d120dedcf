use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::rag::QueryFailure;
use crate::storage::{
    AuditRecord, BlobStoreError, BlobStream, Document, DocumentStatus, StoreError,
};

/// Errors returned by the gateway; each maps onto one HTTP status.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Missing or malformed input.
    #[error("{0}")]
    Validation(String),
    /// Upload exceeded the configured size limit.
    #[error("File exceeds the maximum upload size of {limit} bytes")]
    PayloadTooLarge {
        /// Configured limit in bytes.
        limit: usize,
    },
    /// Document, blob, or audit record is missing.
    #[error("{0}")]
    NotFound(String),
    /// Query could not be answered.
    #[error("Query failed: {0}")]
    QueryFailed(#[source] QueryFailure),
    /// Object Store failure.
    #[error("Object store error: {0}")]
    Blob(#[from] BlobStoreError),
    /// Metadata Store failure.
    #[error("Metadata store error: {0}")]
    Metadata(#[from] StoreError),
}

/// Caller-supplied attributes of an upload.
#[derive(Debug, Clone, Default)]
pub struct UploadRequest {
    /// Original file name.
    pub file_name: String,
    /// Declared MIME type; guessed from the name when absent.
    pub content_type: Option<String>,
    /// Scope key for search.
    pub transaction_id: Option<String>,
    /// Caller metadata stored with the document and hashed into its audit record.
    pub metadata: Map<String, Value>,
}

/// Acknowledgement returned once the workflow has been dispatched.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadReceipt {
    /// New document id.
    pub document_id: String,
    /// Handle of the dispatched workflow.
    pub workflow_id: String,
    /// Always `processing`; poll the status lookup for progress.
    pub status: DocumentStatus,
}

/// Status lookup response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentView {
    /// Document id.
    pub document_id: String,
    /// Original file name.
    pub original_name: String,
    /// Scope key.
    pub transaction_id: Option<String>,
    /// Workflow handle.
    pub workflow_id: String,
    /// Current status.
    pub status: DocumentStatus,
    /// Caller metadata.
    pub metadata: Map<String, Value>,
    /// Step outputs recorded so far.
    pub processing_results: Map<String, Value>,
    /// Creation time.
    pub created_at: String,
    /// Last update time.
    pub updated_at: String,
}

impl From<Document> for DocumentView {
    fn from(document: Document) -> Self {
        Self {
            document_id: document.id,
            original_name: document.original_name,
            transaction_id: document.transaction_id,
            workflow_id: document.workflow_id,
            status: document.status,
            metadata: document.metadata,
            processing_results: document.processing_results,
            created_at: document.created_at,
            updated_at: document.updated_at,
        }
    }
}

/// Audit record together with the result of re-hashing its payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditView {
    /// Stored record.
    #[serde(flatten)]
    pub record: AuditRecord,
    /// Whether the stored hash matches the stored payload.
    pub verified: bool,
}

/// Stored file ready to be streamed back.
pub struct Download {
    /// Original file name.
    pub file_name: String,
    /// MIME type recorded at upload.
    pub content_type: String,
    /// Size in bytes.
    pub size_bytes: u64,
    /// File contents.
    pub body: BlobStream,
}

/// Reachability of the pipeline's backing services.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    /// `healthy` when every backend answered, otherwise `unhealthy`.
    pub status: &'static str,
    /// Object Store and Metadata Store both reachable.
    pub storage_connected: bool,
    /// Vector Index reachable.
    pub vector_index_connected: bool,
    /// Time of the check.
    pub timestamp: String,
}
