//! Settings, step names, outputs, and errors shared by the ingestion workflow.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::extraction::ExtractionKind;
use crate::storage::StoreError;

/// Retry and truncation parameters for each workflow instance.
#[derive(Debug, Clone)]
pub struct WorkflowSettings {
    /// Attempts granted to each retryable step.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubled after each further failure.
    pub base_backoff: Duration,
    /// Texts shorter than this many characters are not embedded.
    pub min_embed_text_chars: usize,
    /// Maximum snippet length stored with each vector.
    pub snippet_max_chars: usize,
    /// Maximum content length stored in a search index entry.
    pub index_content_max_chars: usize,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(200),
            min_embed_text_chars: 10,
            snippet_max_chars: 500,
            index_content_max_chars: 20_000,
        }
    }
}

/// Ordered workflow steps; each completed step is checkpointed under its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepName {
    /// Text extraction.
    Extract,
    /// Embedding and vector registration.
    Embed,
    /// Immutable audit record.
    Audit,
    /// Search index entry.
    Index,
}

impl StepName {
    /// Checkpoint key for the step.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Extract => "extract",
            Self::Embed => "embed",
            Self::Audit => "audit",
            Self::Index => "index",
        }
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by the ingestion workflow.
///
/// `ExtractionDegraded` and `EmbeddingUnavailable` are recorded as warnings. Audit and index
/// failures fail the document. `State` fails nothing: the run stops and the document waits for resume.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// Extraction used a fallback branch.
    #[error("Extraction degraded to {0:?}")]
    ExtractionDegraded(ExtractionKind),
    /// No embedding was registered; a placeholder vector id was used instead.
    #[error("Embedding unavailable: {0}")]
    EmbeddingUnavailable(String),
    /// The audit record could not be written within the retry budget.
    #[error("Audit write failed: {0}")]
    AuditWriteFailed(String),
    /// The search index entry could not be written within the retry budget.
    #[error("Index write failed: {0}")]
    IndexWriteFailed(String),
    /// The workflow could not read or update its own bookkeeping.
    #[error("Workflow state unavailable: {0}")]
    State(#[from] StoreError),
}

impl WorkflowError {
    /// Stable code written to `processingResults`.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ExtractionDegraded(_) => "ExtractionDegraded",
            Self::EmbeddingUnavailable(_) => "EmbeddingUnavailable",
            Self::AuditWriteFailed(_) => "AuditWriteFailed",
            Self::IndexWriteFailed(_) => "IndexWriteFailed",
            Self::State(_) => "WorkflowStateUnavailable",
        }
    }

    /// Whether the error moves the document to `failed`.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::AuditWriteFailed(_) | Self::IndexWriteFailed(_))
    }
}

/// Checkpointed result of the embed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbedOutput {
    /// Registered vector id, or a `-fallback` placeholder.
    pub vector_id: String,
    /// Whether a real vector was registered.
    pub embedding_present: bool,
    /// Why a placeholder was used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// Checkpointed result of the audit step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditOutput {
    /// Identifier of the stored audit record.
    pub audit_record_id: String,
    /// Hex digest of the audited payload.
    pub content_hash: String,
}

/// Checkpointed result of the index step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexOutput {
    /// Whether the entry was published.
    pub indexed: bool,
}

/// Final state reported by one workflow run.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowOutcome {
    /// Every fatal step completed.
    Processed,
    /// A fatal step exhausted its budget; the error code is recorded.
    Failed {
        /// Step that failed.
        step: StepName,
        /// Stable error code.
        code: &'static str,
    },
    /// The document had already reached a terminal status.
    AlreadyFinished,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification_follows_taxonomy() {
        assert!(!WorkflowError::ExtractionDegraded(ExtractionKind::Fallback).is_fatal());
        assert!(!WorkflowError::EmbeddingUnavailable("down".into()).is_fatal());
        assert!(WorkflowError::AuditWriteFailed("down".into()).is_fatal());
        assert!(WorkflowError::IndexWriteFailed("down".into()).is_fatal());
        assert!(!WorkflowError::State(StoreError::Unavailable("down".into())).is_fatal());
        assert_eq!(
            WorkflowError::AuditWriteFailed(String::new()).code(),
            "AuditWriteFailed"
        );
    }

    #[test]
    fn step_outputs_use_camel_case() {
        let value = serde_json::to_value(EmbedOutput {
            vector_id: "doc-1-fallback".into(),
            embedding_present: false,
            warning: None,
        })
        .expect("json");
        assert_eq!(value["vectorId"], "doc-1-fallback");
        assert_eq!(value["embeddingPresent"], false);
    }
}
