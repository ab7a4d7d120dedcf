//! Checkpointed ingestion workflow.
//!
//! Step order is extract, then embed and audit concurrently, then index, then finalize. Embed
//! degrades to a placeholder vector id; audit and index fail the document once their retry
//! budget is spent.

pub mod audit;
mod dispatcher;
pub mod retry;
mod service;
mod steps;
mod types;

pub use dispatcher::WorkflowDispatcher;
pub use service::{IngestionWorkflow, WorkflowServices};
pub use steps::placeholder_vector_id;
pub use types::{
    AuditOutput, EmbedOutput, IndexOutput, StepName, WorkflowError, WorkflowOutcome,
    WorkflowSettings,
};
