use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing pipeline activity.
#[derive(Default)]
pub struct PipelineMetrics {
    uploads_accepted: AtomicU64,
    uploads_rejected: AtomicU64,
    documents_processed: AtomicU64,
    documents_failed: AtomicU64,
    degraded_extractions: AtomicU64,
    embedding_placeholders: AtomicU64,
    queries_answered: AtomicU64,
    queries_failed: AtomicU64,
}

impl PipelineMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an upload that produced a document record.
    pub fn record_upload_accepted(&self) {
        self.uploads_accepted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an upload rejected before any record was created.
    pub fn record_upload_rejected(&self) {
        self.uploads_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a workflow that finished with `processed`.
    pub fn record_processed(&self) {
        self.documents_processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a workflow that finished with `failed`.
    pub fn record_failed(&self) {
        self.documents_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an extraction produced by a fallback branch.
    pub fn record_degraded_extraction(&self) {
        self.degraded_extractions.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a placeholder vector id.
    pub fn record_embedding_placeholder(&self) {
        self.embedding_placeholders.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a query outcome.
    pub fn record_query(&self, answered: bool) {
        let counter = if answered {
            &self.queries_answered
        } else {
            &self.queries_failed
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uploads_accepted: self.uploads_accepted.load(Ordering::Relaxed),
            uploads_rejected: self.uploads_rejected.load(Ordering::Relaxed),
            documents_processed: self.documents_processed.load(Ordering::Relaxed),
            documents_failed: self.documents_failed.load(Ordering::Relaxed),
            degraded_extractions: self.degraded_extractions.load(Ordering::Relaxed),
            embedding_placeholders: self.embedding_placeholders.load(Ordering::Relaxed),
            queries_answered: self.queries_answered.load(Ordering::Relaxed),
            queries_failed: self.queries_failed.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of pipeline counters used for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    /// Uploads that produced a document record.
    pub uploads_accepted: u64,
    /// Uploads rejected by validation or the size limit.
    pub uploads_rejected: u64,
    /// Documents that reached `processed`.
    pub documents_processed: u64,
    /// Documents that reached `failed`.
    pub documents_failed: u64,
    /// Extractions produced by a fallback branch.
    pub degraded_extractions: u64,
    /// Documents registered with a placeholder vector id.
    pub embedding_placeholders: u64,
    /// Queries answered successfully.
    pub queries_answered: u64,
    /// Queries that surfaced an error.
    pub queries_failed: u64,
}
