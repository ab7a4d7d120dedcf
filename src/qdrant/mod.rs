//! Qdrant-backed [`crate::vector::VectorIndex`].

pub mod client;
pub mod filters;
mod payload;
pub mod types;

pub use client::QdrantService;
pub use filters::build_scope_filter;
pub use types::{QdrantError, ScoredPoint};
