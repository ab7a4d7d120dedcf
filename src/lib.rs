#![deny(missing_docs)]

//! Core library for Rusty Docs: document ingestion, audit, indexing, and grounded search.

/// HTTP routing and REST handlers.
pub mod api;
/// Environment-driven configuration management.
pub mod config;
/// Embedding client abstraction and adapters.
pub mod embedding;
/// Text extraction with model and local fallbacks.
pub mod extraction;
/// Request-facing service behind the HTTP surface.
pub mod gateway;
/// Chat-completion client used to phrase answers.
pub mod generation;
/// Structured logging and tracing setup.
pub mod logging;
/// Pipeline counters.
pub mod metrics;
/// Qdrant vector store integration.
pub mod qdrant;
/// Retrieval-augmented question answering.
pub mod rag;
/// Object Store and Metadata Store.
pub mod storage;
/// Vector Index abstraction and the in-process implementation.
pub mod vector;
/// Vision model client for image text extraction.
pub mod vision;
/// Checkpointed ingestion workflow.
pub mod workflow;
