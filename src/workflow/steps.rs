//! Bodies of the extract, embed, audit, and index steps.

use uuid::Uuid;

use crate::{
    extraction::{Extraction, ExtractionKind},
    storage::{Document, SearchIndexEntry, current_timestamp_rfc3339},
    vector::{VectorEntry, VectorMetadata},
    workflow::{
        audit,
        retry::retry_with_backoff,
        service::IngestionWorkflow,
        types::{AuditOutput, EmbedOutput, IndexOutput, StepName, WorkflowError},
    },
};

impl IngestionWorkflow {
    /// Extract text from the stored blob. Never fails on content problems.
    pub(super) async fn extract_step(
        &self,
        document: &Document,
    ) -> Result<Extraction, WorkflowError> {
        if let Some(done) = self.checkpoint(&document.id, StepName::Extract).await? {
            return Ok(done);
        }

        let blobs = &self.services.blobs;
        let bytes = retry_with_backoff(
            "read-blob",
            self.settings.max_attempts,
            self.settings.base_backoff,
            || blobs.get(&document.storage_path),
        )
        .await;

        let extraction = match bytes {
            Ok(bytes) => {
                self.services
                    .extractor
                    .extract(&document.original_name, bytes)
                    .await
            }
            Err(error) => {
                tracing::error!(
                    document_id = %document.id,
                    path = %document.storage_path,
                    error = %error,
                    "Stored file unavailable for extraction"
                );
                Extraction::error_fallback(
                    &document.original_name,
                    document.size_bytes,
                    &format!("stored file unavailable: {error}"),
                )
            }
        };

        if extraction.is_degraded() {
            self.services.metrics.record_degraded_extraction();
            tracing::warn!(
                document_id = %document.id,
                kind = extraction.extraction_kind.as_str(),
                confidence = extraction.confidence,
                "Extraction degraded"
            );
        }

        self.record_checkpoint(&document.id, StepName::Extract, &extraction)
            .await?;
        Ok(extraction)
    }

    /// Embed the extracted text and register it; failures yield a placeholder vector id.
    pub(super) async fn embed_step(
        &self,
        document: &Document,
        extraction: &Extraction,
    ) -> Result<EmbedOutput, WorkflowError> {
        if let Some(done) = self.checkpoint(&document.id, StepName::Embed).await? {
            return Ok(done);
        }

        let output = match self.register_embedding(document, extraction).await {
            Ok(vector_id) => {
                tracing::debug!(document_id = %document.id, vector_id = %vector_id, "Embedding registered");
                EmbedOutput {
                    vector_id,
                    embedding_present: true,
                    warning: None,
                }
            }
            Err(reason) => {
                tracing::warn!(document_id = %document.id, reason = %reason, "Using placeholder vector id");
                self.services.metrics.record_embedding_placeholder();
                EmbedOutput {
                    vector_id: placeholder_vector_id(&document.id),
                    embedding_present: false,
                    warning: Some(reason),
                }
            }
        };

        self.record_checkpoint(&document.id, StepName::Embed, &output)
            .await?;
        Ok(output)
    }

    async fn register_embedding(
        &self,
        document: &Document,
        extraction: &Extraction,
    ) -> Result<String, String> {
        if extraction.extraction_kind == ExtractionKind::ErrorFallback {
            return Err("no content was extracted".into());
        }
        let text = extraction.text.trim();
        if text.chars().count() < self.settings.min_embed_text_chars {
            return Err(format!(
                "extracted text is shorter than {} characters",
                self.settings.min_embed_text_chars
            ));
        }

        let embedder = &self.services.embedder;
        let mut embeddings = retry_with_backoff(
            "embed",
            self.settings.max_attempts,
            self.settings.base_backoff,
            || embedder.generate_embeddings(vec![text.to_string()]),
        )
        .await
        .map_err(|error| error.to_string())?;
        let embedding = embeddings
            .pop()
            .ok_or_else(|| "embedding provider returned no vectors".to_string())?;

        let entry = VectorEntry {
            id: Uuid::new_v4().to_string(),
            embedding,
            metadata: VectorMetadata {
                document_id: document.id.clone(),
                snippet: truncate_chars(text, self.settings.snippet_max_chars),
                timestamp: current_timestamp_rfc3339(),
                transaction_id: document.transaction_id.clone(),
            },
        };
        let vector_id = entry.id.clone();
        let vectors = &self.services.vectors;
        retry_with_backoff(
            "vector-upsert",
            self.settings.max_attempts,
            self.settings.base_backoff,
            || vectors.upsert(entry.clone()),
        )
        .await
        .map_err(|error| error.to_string())?;
        Ok(vector_id)
    }

    /// Append the audit record for the extracted text.
    pub(super) async fn audit_step(
        &self,
        document: &Document,
        extraction: &Extraction,
    ) -> Result<AuditOutput, WorkflowError> {
        if let Some(done) = self.checkpoint(&document.id, StepName::Audit).await? {
            return Ok(done);
        }

        // The creation time anchors the hash so retried runs reproduce it.
        let record = audit::build_record(
            &document.id,
            &extraction.text,
            &document.metadata,
            &document.created_at,
        )
        .map_err(|error| WorkflowError::AuditWriteFailed(error.to_string()))?;

        let metadata = &self.services.metadata;
        let stored = retry_with_backoff(
            "audit-append",
            self.settings.max_attempts,
            self.settings.base_backoff,
            || metadata.append_audit_record(record.clone()),
        )
        .await
        .map_err(|error| WorkflowError::AuditWriteFailed(error.to_string()))?;

        let output = AuditOutput {
            audit_record_id: stored.id,
            content_hash: stored.content_hash,
        };
        tracing::debug!(document_id = %document.id, content_hash = %output.content_hash, "Audit record written");
        self.record_checkpoint(&document.id, StepName::Audit, &output)
            .await?;
        Ok(output)
    }

    /// Write the search entry hidden, then publish it.
    pub(super) async fn index_step(
        &self,
        document: &Document,
        extraction: &Extraction,
        embed: &EmbedOutput,
    ) -> Result<IndexOutput, WorkflowError> {
        if let Some(done) = self.checkpoint(&document.id, StepName::Index).await? {
            return Ok(done);
        }

        let entry = SearchIndexEntry {
            document_id: document.id.clone(),
            transaction_id: document.transaction_id.clone(),
            content: truncate_chars(&extraction.text, self.settings.index_content_max_chars),
            vector_id: embed.vector_id.clone(),
            confidence: extraction.confidence,
            indexed_at: current_timestamp_rfc3339(),
            searchable: false,
        };

        let metadata = &self.services.metadata;
        let entry = &entry;
        retry_with_backoff(
            "index-write",
            self.settings.max_attempts,
            self.settings.base_backoff,
            || async move {
                if metadata.get_searchable_entry(&entry.document_id).await?.is_some() {
                    return Ok(());
                }
                metadata.insert_search_entry(entry.clone()).await?;
                metadata.publish_search_entry(&entry.document_id).await
            },
        )
        .await
        .map_err(|error| WorkflowError::IndexWriteFailed(error.to_string()))?;

        let output = IndexOutput { indexed: true };
        tracing::debug!(document_id = %document.id, "Search entry published");
        self.record_checkpoint(&document.id, StepName::Index, &output)
            .await?;
        Ok(output)
    }
}

/// Vector id recorded when no embedding could be registered.
pub fn placeholder_vector_id(document_id: &str) -> String {
    format!("{document_id}-fallback")
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => text[..end].to_string(),
        None => text.to_string(),
    }
}
