//! Orchestration of one document's ingestion run.

use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value, json};
use std::sync::Arc;

use crate::{
    embedding::EmbeddingClient,
    extraction::DocumentExtractor,
    metrics::PipelineMetrics,
    storage::{
        BlobStore, Document, DocumentStatus, MetadataStore, StoreError, current_timestamp_rfc3339,
    },
    vector::VectorIndex,
    workflow::{
        retry::retry_with_backoff,
        types::{StepName, WorkflowError, WorkflowOutcome, WorkflowSettings},
    },
};

/// Collaborators injected into the workflow.
#[derive(Clone)]
pub struct WorkflowServices {
    /// Source of uploaded file bytes.
    pub blobs: Arc<dyn BlobStore>,
    /// Document records, checkpoints, audit records, and search entries.
    pub metadata: Arc<dyn MetadataStore>,
    /// Destination for document embeddings.
    pub vectors: Arc<dyn VectorIndex>,
    /// Embedding model.
    pub embedder: Arc<dyn EmbeddingClient>,
    /// Extraction policy.
    pub extractor: DocumentExtractor,
    /// Pipeline counters.
    pub metrics: Arc<PipelineMetrics>,
}

/// Checkpointed pipeline turning one uploaded document into a processed, audited, indexed one.
///
/// Every completed step stores its output under `(document_id, step)`. A resumed run loads
/// those outputs instead of repeating the step, so only work after the last checkpoint is redone.
#[derive(Clone)]
pub struct IngestionWorkflow {
    pub(super) services: WorkflowServices,
    pub(super) settings: WorkflowSettings,
}

/// Failure of a fatal step, carried to finalization.
pub(super) struct StepFailure {
    pub(super) step: StepName,
    pub(super) error: WorkflowError,
}

impl IngestionWorkflow {
    /// Build a workflow over the supplied collaborators.
    pub fn new(services: WorkflowServices, settings: WorkflowSettings) -> Self {
        Self { services, settings }
    }

    /// Settings this workflow runs with.
    pub fn settings(&self) -> &WorkflowSettings {
        &self.settings
    }

    /// Drive `document_id` to a terminal status.
    ///
    /// `Err` is returned only when the workflow cannot read or write its own bookkeeping; the
    /// document then stays non-terminal and is picked up again by the next resume.
    pub async fn run(&self, document_id: &str) -> Result<WorkflowOutcome, WorkflowError> {
        let document = self
            .services
            .metadata
            .get_document(document_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(document_id.to_string()))?;

        if document.status.is_terminal() {
            tracing::debug!(document_id, status = %document.status, "Workflow already finished");
            return Ok(WorkflowOutcome::AlreadyFinished);
        }

        tracing::info!(
            document_id,
            workflow_id = %document.workflow_id,
            "Ingestion workflow started"
        );
        self.update(document_id, DocumentStatus::Processing, Map::new())
            .await?;

        let extraction = self.extract_step(&document).await?;
        let mut warnings = Vec::new();
        if extraction.is_degraded() {
            warnings.push(warning(&WorkflowError::ExtractionDegraded(
                extraction.extraction_kind,
            )));
        }
        self.update(
            document_id,
            DocumentStatus::Processing,
            results([
                ("ocrConfidence", json!(extraction.confidence)),
                ("extractionKind", json!(extraction.extraction_kind)),
            ]),
        )
        .await?;

        let (embed, audit) = tokio::join!(
            self.embed_step(&document, &extraction),
            self.audit_step(&document, &extraction)
        );
        let embed = embed?;
        if let Some(reason) = &embed.warning {
            warnings.push(warning(&WorkflowError::EmbeddingUnavailable(reason.clone())));
        }
        let mut progress = results([
            ("vectorId", json!(embed.vector_id)),
            ("embeddingPresent", json!(embed.embedding_present)),
        ]);

        let audit = match audit {
            Ok(audit) => audit,
            Err(error) if !error.is_fatal() => return Err(error),
            Err(error) => {
                self.update(document_id, DocumentStatus::Processing, progress)
                    .await?;
                return self
                    .finalize_failed(
                        &document,
                        StepFailure {
                            step: StepName::Audit,
                            error,
                        },
                        warnings,
                    )
                    .await;
            }
        };
        progress.insert("auditRecordId".into(), json!(audit.audit_record_id));
        progress.insert("contentHash".into(), json!(audit.content_hash));
        self.update(document_id, DocumentStatus::Processing, progress)
            .await?;

        match self.index_step(&document, &extraction, &embed).await {
            Ok(index) => self.finalize_processed(&document, index.indexed, warnings).await,
            Err(error) if !error.is_fatal() => Err(error),
            Err(error) => {
                self.finalize_failed(
                    &document,
                    StepFailure {
                        step: StepName::Index,
                        error,
                    },
                    warnings,
                )
                .await
            }
        }
    }

    async fn finalize_processed(
        &self,
        document: &Document,
        indexed: bool,
        warnings: Vec<Value>,
    ) -> Result<WorkflowOutcome, WorkflowError> {
        let mut fields = results([
            ("searchIndexed", json!(indexed)),
            ("completedAt", json!(current_timestamp_rfc3339())),
        ]);
        if !warnings.is_empty() {
            fields.insert("warnings".into(), Value::Array(warnings));
        }
        self.update(&document.id, DocumentStatus::Processed, fields)
            .await?;
        self.services.metrics.record_processed();
        tracing::info!(document_id = %document.id, "Document processed");
        Ok(WorkflowOutcome::Processed)
    }

    async fn finalize_failed(
        &self,
        document: &Document,
        failure: StepFailure,
        warnings: Vec<Value>,
    ) -> Result<WorkflowOutcome, WorkflowError> {
        let code = failure.error.code();
        tracing::error!(
            document_id = %document.id,
            step = %failure.step,
            code,
            error = %failure.error,
            "Document failed"
        );
        let mut fields = results([
            ("error", json!(code)),
            ("failedStep", json!(failure.step)),
            ("errorMessage", json!(failure.error.to_string())),
            ("completedAt", json!(current_timestamp_rfc3339())),
        ]);
        if !warnings.is_empty() {
            fields.insert("warnings".into(), Value::Array(warnings));
        }
        self.update(&document.id, DocumentStatus::Failed, fields)
            .await?;
        self.services.metrics.record_failed();
        Ok(WorkflowOutcome::Failed {
            step: failure.step,
            code,
        })
    }

    /// Transition the document, retrying transient store failures.
    pub(super) async fn update(
        &self,
        document_id: &str,
        status: DocumentStatus,
        fields: Map<String, Value>,
    ) -> Result<Document, WorkflowError> {
        let metadata = &self.services.metadata;
        let updated = retry_with_backoff(
            "update-document",
            self.settings.max_attempts,
            self.settings.base_backoff,
            || metadata.transition(document_id, status, fields.clone()),
        )
        .await?;
        Ok(updated)
    }

    /// Load a step's checkpoint; unreadable checkpoints are treated as absent.
    pub(super) async fn checkpoint<T: DeserializeOwned>(
        &self,
        document_id: &str,
        step: StepName,
    ) -> Result<Option<T>, WorkflowError> {
        let metadata = &self.services.metadata;
        let stored = retry_with_backoff(
            "load-checkpoint",
            self.settings.max_attempts,
            self.settings.base_backoff,
            || metadata.load_checkpoint(document_id, step.as_str()),
        )
        .await?;
        let Some(value) = stored else {
            return Ok(None);
        };
        match serde_json::from_value(value) {
            Ok(output) => {
                tracing::debug!(document_id, step = %step, "Checkpoint hit; skipping step");
                Ok(Some(output))
            }
            Err(error) => {
                tracing::warn!(document_id, step = %step, error = %error, "Discarding unreadable checkpoint");
                Ok(None)
            }
        }
    }

    /// Persist a step's output.
    pub(super) async fn record_checkpoint<T: Serialize>(
        &self,
        document_id: &str,
        step: StepName,
        output: &T,
    ) -> Result<(), WorkflowError> {
        let value = serde_json::to_value(output).map_err(StoreError::from)?;
        let metadata = &self.services.metadata;
        retry_with_backoff(
            "save-checkpoint",
            self.settings.max_attempts,
            self.settings.base_backoff,
            || metadata.save_checkpoint(document_id, step.as_str(), value.clone()),
        )
        .await?;
        Ok(())
    }
}

fn warning(error: &WorkflowError) -> Value {
    json!({ "code": error.code(), "message": error.to_string() })
}

fn results<const N: usize>(fields: [(&str, Value); N]) -> Map<String, Value> {
    fields
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbeddingClient;
    use crate::extraction::ExtractionKind;
    use crate::storage::{MemoryBlobStore, MemoryMetadataStore};
    use crate::vector::MemoryVectorIndex;
    use bytes::Bytes;
    use std::time::Duration;

    struct Harness {
        workflow: IngestionWorkflow,
        blobs: Arc<MemoryBlobStore>,
        metadata: Arc<MemoryMetadataStore>,
        vectors: Arc<MemoryVectorIndex>,
    }

    fn harness() -> Harness {
        let blobs = Arc::new(MemoryBlobStore::new());
        let metadata = Arc::new(MemoryMetadataStore::new());
        let vectors = Arc::new(MemoryVectorIndex::new(16));
        let workflow = IngestionWorkflow::new(
            WorkflowServices {
                blobs: blobs.clone(),
                metadata: metadata.clone(),
                vectors: vectors.clone(),
                embedder: Arc::new(HashEmbeddingClient::new(16)),
                extractor: DocumentExtractor::default(),
                metrics: Arc::new(PipelineMetrics::new()),
            },
            WorkflowSettings {
                base_backoff: Duration::ZERO,
                ..WorkflowSettings::default()
            },
        );
        Harness {
            workflow,
            blobs,
            metadata,
            vectors,
        }
    }

    async fn seed(harness: &Harness, id: &str, name: &str, body: &'static [u8]) {
        let path = format!("documents/{id}/{name}");
        harness
            .blobs
            .put(&path, Bytes::from_static(body))
            .await
            .expect("blob");
        let now = current_timestamp_rfc3339();
        harness
            .metadata
            .create_document(Document {
                id: id.to_string(),
                original_name: name.to_string(),
                content_type: "text/plain".into(),
                size_bytes: body.len() as u64,
                storage_path: path,
                transaction_id: Some("tx-1".into()),
                metadata: Map::new(),
                status: DocumentStatus::Uploaded,
                workflow_id: format!("wf-{id}"),
                processing_results: Map::new(),
                created_at: now.clone(),
                updated_at: now,
            })
            .await
            .expect("document");
    }

    #[tokio::test]
    async fn text_document_is_processed_end_to_end() {
        let harness = harness();
        seed(&harness, "doc-1", "offer.txt", b"The approved loan amount is 250,000 USD.").await;

        let outcome = harness.workflow.run("doc-1").await.expect("run");
        assert_eq!(outcome, WorkflowOutcome::Processed);

        let document = harness
            .metadata
            .get_document("doc-1")
            .await
            .expect("get")
            .expect("exists");
        assert_eq!(document.status, DocumentStatus::Processed);
        let results = &document.processing_results;
        assert_eq!(results["extractionKind"], "fallback");
        assert_eq!(results["embeddingPresent"], true);
        assert_eq!(results["searchIndexed"], true);
        assert!(results["auditRecordId"].as_str().is_some());
        assert_eq!(harness.vectors.len().await, 1);

        let entry = harness
            .metadata
            .get_searchable_entry("doc-1")
            .await
            .expect("entry")
            .expect("published");
        assert_eq!(entry.vector_id, results["vectorId"].as_str().expect("id"));
        assert_eq!(entry.transaction_id.as_deref(), Some("tx-1"));
    }

    #[tokio::test]
    async fn short_text_gets_placeholder_vector() {
        let harness = harness();
        seed(&harness, "doc-2", "note.txt", b"ok").await;

        harness.workflow.run("doc-2").await.expect("run");
        let document = harness
            .metadata
            .get_document("doc-2")
            .await
            .expect("get")
            .expect("exists");
        assert_eq!(document.status, DocumentStatus::Processed);
        assert_eq!(document.processing_results["vectorId"], "doc-2-fallback");
        assert_eq!(
            document.processing_results["warnings"][0]["code"],
            "EmbeddingUnavailable"
        );
        assert!(harness.vectors.is_empty().await);
    }

    #[tokio::test]
    async fn completed_steps_are_not_repeated() {
        let harness = harness();
        seed(&harness, "doc-3", "offer.txt", b"placeholder bytes never read").await;
        let checkpointed = crate::extraction::Extraction {
            text: "Checkpointed text about the loan".into(),
            confidence: 0.95,
            extraction_kind: ExtractionKind::Model,
        };
        harness
            .metadata
            .save_checkpoint(
                "doc-3",
                "extract",
                serde_json::to_value(&checkpointed).expect("json"),
            )
            .await
            .expect("checkpoint");
        harness
            .blobs
            .delete("documents/doc-3/offer.txt")
            .await
            .expect("delete");

        harness.workflow.run("doc-3").await.expect("run");

        let entry = harness
            .metadata
            .get_searchable_entry("doc-3")
            .await
            .expect("entry")
            .expect("published");
        assert_eq!(entry.content, checkpointed.text);
        assert_eq!(entry.confidence, 0.95);
    }

    #[tokio::test]
    async fn terminal_documents_are_left_alone() {
        let harness = harness();
        seed(&harness, "doc-4", "offer.txt", b"The approved loan amount is 250,000.").await;
        harness.workflow.run("doc-4").await.expect("first run");
        let before = harness
            .metadata
            .get_audit_record("doc-4")
            .await
            .expect("audit")
            .expect("exists");

        let outcome = harness.workflow.run("doc-4").await.expect("second run");
        assert_eq!(outcome, WorkflowOutcome::AlreadyFinished);
        let after = harness
            .metadata
            .get_audit_record("doc-4")
            .await
            .expect("audit")
            .expect("exists");
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn missing_document_is_a_state_error() {
        let harness = harness();
        let error = harness.workflow.run("ghost").await.expect_err("missing");
        assert!(matches!(error, WorkflowError::State(StoreError::NotFound(_))));
    }
}
