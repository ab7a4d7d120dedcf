//! Records persisted by the Metadata Store.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use time::OffsetDateTime;

/// Errors returned by Metadata Store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The referenced document does not exist.
    #[error("Document not found: {0}")]
    NotFound(String),
    /// A record with the same key but different content already exists.
    #[error("Conflicting record: {0}")]
    Conflict(String),
    /// The requested status change would move a document backwards.
    #[error("Invalid status transition for {document_id}: {from} -> {to}")]
    InvalidTransition {
        /// Document whose status was being changed.
        document_id: String,
        /// Status currently stored.
        from: DocumentStatus,
        /// Status that was requested.
        to: DocumentStatus,
    },
    /// The backing store could not be reached.
    #[error("Metadata store unavailable: {0}")]
    Unavailable(String),
    /// Snapshot file could not be read or written.
    #[error("Metadata snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),
    /// Snapshot contents could not be encoded or decoded.
    #[error("Metadata snapshot encoding failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Lifecycle of an uploaded document. Status only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    /// Blob stored and record created; workflow not yet started.
    Uploaded,
    /// Workflow running.
    Processing,
    /// Workflow completed every fatal step.
    Processed,
    /// A fatal step exhausted its retry budget.
    Failed,
}

impl DocumentStatus {
    fn rank(self) -> u8 {
        match self {
            Self::Uploaded => 0,
            Self::Processing => 1,
            Self::Processed | Self::Failed => 2,
        }
    }

    /// Whether the workflow has reached an end state.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Processed | Self::Failed)
    }

    /// Whether moving to `next` keeps the status sequence monotonic.
    ///
    /// Re-applying the current status is accepted so resumed workflows can
    /// re-enter `processing` without special casing.
    pub fn can_transition_to(self, next: Self) -> bool {
        next == self || (!self.is_terminal() && next.rank() > self.rank())
    }

    /// Lowercase wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uploaded => "uploaded",
            Self::Processing => "processing",
            Self::Processed => "processed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Uploaded document record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// Identifier generated at upload time.
    pub id: String,
    /// File name supplied by the client.
    pub original_name: String,
    /// MIME type used when streaming the file back.
    pub content_type: String,
    /// Size of the stored blob.
    pub size_bytes: u64,
    /// Location of the blob in the Object Store.
    pub storage_path: String,
    /// Optional scope key partitioning search results.
    pub transaction_id: Option<String>,
    /// Caller-supplied metadata.
    pub metadata: Map<String, Value>,
    /// Current lifecycle status.
    pub status: DocumentStatus,
    /// Handle of the workflow instance driving this document.
    pub workflow_id: String,
    /// Step outputs merged in as the workflow progresses.
    pub processing_results: Map<String, Value>,
    /// RFC3339 creation timestamp.
    pub created_at: String,
    /// RFC3339 timestamp of the last mutation.
    pub updated_at: String,
}

/// Append-only, content-addressed proof of a document's extracted content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    /// Identifier derived from the content hash.
    pub id: String,
    /// Document this record attests to.
    pub document_id: String,
    /// Hex SHA-256 digest of `payload`.
    pub content_hash: String,
    /// Exact bytes that were hashed, kept for verification.
    pub payload: String,
    /// RFC3339 timestamp of the first write.
    pub created_at: String,
}

/// Queryable row backing scope filtering and context assembly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchIndexEntry {
    /// Document this entry describes.
    pub document_id: String,
    /// Scope key copied from the document.
    pub transaction_id: Option<String>,
    /// Extracted text, truncated to the configured bound.
    pub content: String,
    /// Identifier of the vector registered for the document.
    pub vector_id: String,
    /// Extraction confidence.
    pub confidence: f32,
    /// RFC3339 timestamp of the write.
    pub indexed_at: String,
    /// Only searchable entries are visible to queries.
    pub searchable: bool,
}

/// Current timestamp formatted for record storage.
pub fn current_timestamp_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_moves_forward_only() {
        use DocumentStatus::*;
        assert!(Uploaded.can_transition_to(Processing));
        assert!(Uploaded.can_transition_to(Failed));
        assert!(Processing.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Processed));
        assert!(Processing.can_transition_to(Failed));
        assert!(!Processing.can_transition_to(Uploaded));
        assert!(!Processed.can_transition_to(Processing));
        assert!(!Processed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Processed));
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&DocumentStatus::Processing).expect("json");
        assert_eq!(json, "\"processing\"");
    }

    #[test]
    fn timestamp_is_rfc3339_like() {
        let ts = current_timestamp_rfc3339();
        assert!(ts.contains('T') && ts.ends_with('Z'));
    }
}
