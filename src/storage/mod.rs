//! Object Store and Metadata Store abstractions with local implementations.

pub mod blob;
pub mod metadata;
pub mod types;

pub use blob::{
    BlobStore, BlobStoreError, BlobStream, FsBlobStore, MemoryBlobStore, document_blob_path,
};
pub use metadata::{MemoryMetadataStore, MetadataStore};
pub use types::{
    AuditRecord, Document, DocumentStatus, SearchIndexEntry, StoreError, current_timestamp_rfc3339,
};
