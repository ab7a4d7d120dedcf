//! Metadata Store: document records, step checkpoints, audit records, and search index rows.
//!
//! [`MemoryMetadataStore`] keeps everything behind a single async lock. When a snapshot path is
//! configured, every mutation is applied to a staged copy, written as a JSON snapshot (temp file +
//! rename), and only then made visible. A failed write leaves memory and disk in agreement.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::sync::RwLock;

use super::types::{
    AuditRecord, Document, DocumentStatus, SearchIndexEntry, StoreError, current_timestamp_rfc3339,
};

/// Persistence contract for everything the pipeline records about a document.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Insert a new document record. Fails with `Conflict` if the id is taken.
    async fn create_document(&self, document: Document) -> Result<(), StoreError>;

    /// Fetch a document by id.
    async fn get_document(&self, document_id: &str) -> Result<Option<Document>, StoreError>;

    /// Move a document to `status` and merge `results` into `processingResults`.
    ///
    /// Regressions (see [`DocumentStatus::can_transition_to`]) are rejected with
    /// `InvalidTransition` and leave the record untouched.
    async fn transition(
        &self,
        document_id: &str,
        status: DocumentStatus,
        results: Map<String, Value>,
    ) -> Result<Document, StoreError>;

    /// Documents that have not reached a terminal status.
    async fn list_unfinished(&self) -> Result<Vec<Document>, StoreError>;

    /// Load the recorded output of a completed workflow step.
    async fn load_checkpoint(
        &self,
        document_id: &str,
        step: &str,
    ) -> Result<Option<Value>, StoreError>;

    /// Record the output of a completed workflow step.
    async fn save_checkpoint(
        &self,
        document_id: &str,
        step: &str,
        output: Value,
    ) -> Result<(), StoreError>;

    /// Append an audit record. Re-appending an identical record returns the stored one;
    /// a different hash for the same document is a `Conflict`.
    async fn append_audit_record(&self, record: AuditRecord) -> Result<AuditRecord, StoreError>;

    /// Fetch the audit record of a document.
    async fn get_audit_record(&self, document_id: &str) -> Result<Option<AuditRecord>, StoreError>;

    /// Insert a fully populated search entry in its hidden state (`searchable = false`).
    async fn insert_search_entry(&self, entry: SearchIndexEntry) -> Result<(), StoreError>;

    /// Flip a previously inserted entry to `searchable = true`.
    async fn publish_search_entry(&self, document_id: &str) -> Result<(), StoreError>;

    /// Fetch a search entry only if it is visible to queries.
    async fn get_searchable_entry(
        &self,
        document_id: &str,
    ) -> Result<Option<SearchIndexEntry>, StoreError>;

    /// Confirm the store is reachable.
    async fn ping(&self) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreState {
    documents: BTreeMap<String, Document>,
    checkpoints: BTreeMap<String, BTreeMap<String, Value>>,
    audit_records: BTreeMap<String, AuditRecord>,
    search_entries: BTreeMap<String, SearchIndexEntry>,
}

/// In-process Metadata Store with optional JSON snapshot persistence.
#[derive(Default)]
pub struct MemoryMetadataStore {
    state: RwLock<StoreState>,
    snapshot_path: Option<PathBuf>,
}

impl MemoryMetadataStore {
    /// Create an empty, purely in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a store persisted at `path`, loading the previous snapshot when present.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let state = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => StoreState::default(),
            Err(error) => return Err(error.into()),
        };
        tracing::debug!(
            path = %path.display(),
            documents = state.documents.len(),
            "Metadata snapshot loaded"
        );
        Ok(Self {
            state: RwLock::new(state),
            snapshot_path: Some(path),
        })
    }

    async fn persist(&self, state: &StoreState) -> Result<(), StoreError> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let encoded = serde_json::to_vec(state)?;
        let staging = path.with_extension("json.tmp");
        tokio::fs::write(&staging, encoded).await?;
        tokio::fs::rename(&staging, path).await?;
        Ok(())
    }

    /// Apply `change` and make it visible only once the snapshot holds it.
    async fn commit<T>(
        &self,
        state: &mut StoreState,
        change: impl FnOnce(&mut StoreState) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        if self.snapshot_path.is_none() {
            return change(state);
        }
        let mut staged = state.clone();
        let value = change(&mut staged)?;
        self.persist(&staged).await?;
        *state = staged;
        Ok(value)
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn create_document(&self, document: Document) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if state.documents.contains_key(&document.id) {
            return Err(StoreError::Conflict(format!(
                "document {} already exists",
                document.id
            )));
        }
        self.commit(&mut state, |state| {
            state.documents.insert(document.id.clone(), document);
            Ok(())
        })
        .await
    }

    async fn get_document(&self, document_id: &str) -> Result<Option<Document>, StoreError> {
        Ok(self.state.read().await.documents.get(document_id).cloned())
    }

    async fn transition(
        &self,
        document_id: &str,
        status: DocumentStatus,
        results: Map<String, Value>,
    ) -> Result<Document, StoreError> {
        let mut state = self.state.write().await;
        self.commit(&mut state, |state| {
            let document = state
                .documents
                .get_mut(document_id)
                .ok_or_else(|| StoreError::NotFound(document_id.to_string()))?;
            if !document.status.can_transition_to(status) {
                return Err(StoreError::InvalidTransition {
                    document_id: document_id.to_string(),
                    from: document.status,
                    to: status,
                });
            }
            document.status = status;
            document.processing_results.extend(results);
            document.updated_at = current_timestamp_rfc3339();
            Ok(document.clone())
        })
        .await
    }

    async fn list_unfinished(&self) -> Result<Vec<Document>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .documents
            .values()
            .filter(|document| !document.status.is_terminal())
            .cloned()
            .collect())
    }

    async fn load_checkpoint(
        &self,
        document_id: &str,
        step: &str,
    ) -> Result<Option<Value>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .checkpoints
            .get(document_id)
            .and_then(|steps| steps.get(step))
            .cloned())
    }

    async fn save_checkpoint(
        &self,
        document_id: &str,
        step: &str,
        output: Value,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        self.commit(&mut state, |state| {
            state
                .checkpoints
                .entry(document_id.to_string())
                .or_default()
                .insert(step.to_string(), output);
            Ok(())
        })
        .await
    }

    async fn append_audit_record(&self, record: AuditRecord) -> Result<AuditRecord, StoreError> {
        let mut state = self.state.write().await;
        if let Some(existing) = state.audit_records.get(&record.document_id) {
            if existing.content_hash == record.content_hash {
                return Ok(existing.clone());
            }
            return Err(StoreError::Conflict(format!(
                "audit record for {} already exists with a different hash",
                record.document_id
            )));
        }
        self.commit(&mut state, |state| {
            state
                .audit_records
                .insert(record.document_id.clone(), record.clone());
            Ok(record)
        })
        .await
    }

    async fn get_audit_record(&self, document_id: &str) -> Result<Option<AuditRecord>, StoreError> {
        Ok(self.state.read().await.audit_records.get(document_id).cloned())
    }

    async fn insert_search_entry(&self, mut entry: SearchIndexEntry) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if let Some(existing) = state.search_entries.get(&entry.document_id)
            && existing.searchable
        {
            return Err(StoreError::Conflict(format!(
                "search entry for {} is already published",
                entry.document_id
            )));
        }
        entry.searchable = false;
        self.commit(&mut state, |state| {
            state.search_entries.insert(entry.document_id.clone(), entry);
            Ok(())
        })
        .await
    }

    async fn publish_search_entry(&self, document_id: &str) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        self.commit(&mut state, |state| {
            let entry = state
                .search_entries
                .get_mut(document_id)
                .ok_or_else(|| StoreError::NotFound(document_id.to_string()))?;
            entry.searchable = true;
            Ok(())
        })
        .await
    }

    async fn get_searchable_entry(
        &self,
        document_id: &str,
    ) -> Result<Option<SearchIndexEntry>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .search_entries
            .get(document_id)
            .filter(|entry| entry.searchable)
            .cloned())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
