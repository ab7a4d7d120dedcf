//! Asynchronous dispatch of workflow instances with bounded concurrency.

use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::storage::StoreError;
use crate::workflow::{service::IngestionWorkflow, types::WorkflowOutcome};

/// Spawns workflow runs on the Tokio runtime, capping how many execute at once.
#[derive(Clone)]
pub struct WorkflowDispatcher {
    workflow: Arc<IngestionWorkflow>,
    permits: Arc<Semaphore>,
}

impl WorkflowDispatcher {
    /// Build a dispatcher allowing `concurrency` simultaneous runs (at least one).
    pub fn new(workflow: IngestionWorkflow, concurrency: usize) -> Self {
        Self {
            workflow: Arc::new(workflow),
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    /// Start the workflow for `document_id` in the background.
    ///
    /// The run continues to a terminal status even if the caller goes away.
    pub fn dispatch(&self, document_id: String) -> JoinHandle<Option<WorkflowOutcome>> {
        let workflow = Arc::clone(&self.workflow);
        let permits = Arc::clone(&self.permits);
        tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                tracing::error!(document_id = %document_id, "Workflow semaphore closed");
                return None;
            };
            match workflow.run(&document_id).await {
                Ok(outcome) => {
                    tracing::info!(document_id = %document_id, outcome = ?outcome, "Workflow finished");
                    Some(outcome)
                }
                Err(error) => {
                    tracing::error!(
                        document_id = %document_id,
                        error = %error,
                        "Workflow interrupted; document left for resume"
                    );
                    None
                }
            }
        })
    }

    /// Re-dispatch every document that has not reached a terminal status.
    ///
    /// Completed steps are skipped through their checkpoints. Returns the number of runs started.
    pub async fn resume_unfinished(&self) -> Result<usize, StoreError> {
        let pending = self.workflow.services.metadata.list_unfinished().await?;
        let count = pending.len();
        for document in pending {
            tracing::info!(
                document_id = %document.id,
                status = %document.status,
                "Resuming unfinished workflow"
            );
            self.dispatch(document.id);
        }
        Ok(count)
    }
}
