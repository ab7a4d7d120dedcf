//! Content-addressed audit records.
//!
//! The payload is the canonical JSON encoding of `{documentId, text, metadata, timestamp}`:
//! struct fields serialize in declaration order and `serde_json::Map` keeps keys sorted, so
//! equal inputs always produce byte-identical payloads and therefore identical hashes.

use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::storage::{AuditRecord, current_timestamp_rfc3339};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AuditPayload<'a> {
    document_id: &'a str,
    text: &'a str,
    metadata: &'a Map<String, Value>,
    timestamp: &'a str,
}

/// Hex SHA-256 digest of `payload`.
pub fn content_hash(payload: &str) -> String {
    hex::encode(Sha256::digest(payload.as_bytes()))
}

/// Build the audit record for a document's extracted text.
pub fn build_record(
    document_id: &str,
    text: &str,
    metadata: &Map<String, Value>,
    timestamp: &str,
) -> Result<AuditRecord, serde_json::Error> {
    let payload = serde_json::to_string(&AuditPayload {
        document_id,
        text,
        metadata,
        timestamp,
    })?;
    let hash = content_hash(&payload);
    Ok(AuditRecord {
        id: format!("audit_{}", &hash[..16]),
        document_id: document_id.to_string(),
        content_hash: hash,
        payload,
        created_at: current_timestamp_rfc3339(),
    })
}

/// Recompute the digest over the stored payload and compare.
pub fn verify(record: &AuditRecord) -> bool {
    content_hash(&record.payload) == record.content_hash
}
