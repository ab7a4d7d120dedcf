//! Mapping between [`VectorMetadata`] and Qdrant point payloads.

use serde_json::{Map, Value};

use crate::vector::{VectorIndexError, VectorMetadata};

/// Build the payload object stored alongside each vector.
pub(crate) fn build_payload(metadata: &VectorMetadata) -> Value {
    let mut payload = Map::new();
    payload.insert(
        "document_id".into(),
        Value::String(metadata.document_id.clone()),
    );
    payload.insert("snippet".into(), Value::String(metadata.snippet.clone()));
    payload.insert(
        "timestamp".into(),
        Value::String(metadata.timestamp.clone()),
    );
    if let Some(transaction_id) = metadata
        .transaction_id
        .as_ref()
        .filter(|value| !value.trim().is_empty())
    {
        payload.insert(
            "transaction_id".into(),
            Value::String(transaction_id.clone()),
        );
    }
    Value::Object(payload)
}

/// Recover vector metadata from a stored payload.
pub(crate) fn parse_payload(
    id: &str,
    payload: Option<Map<String, Value>>,
) -> Result<VectorMetadata, VectorIndexError> {
    let mut map = payload.ok_or_else(|| VectorIndexError::MalformedPayload {
        id: id.to_string(),
        reason: "payload missing".into(),
    })?;

    let document_id = match map.remove("document_id") {
        Some(Value::String(value)) if !value.trim().is_empty() => value,
        _ => {
            return Err(VectorIndexError::MalformedPayload {
                id: id.to_string(),
                reason: "document_id missing".into(),
            });
        }
    };
    let snippet = take_string(&mut map, "snippet").unwrap_or_default();
    let timestamp = take_string(&mut map, "timestamp").unwrap_or_default();
    let transaction_id = take_string(&mut map, "transaction_id").filter(|value| !value.is_empty());

    Ok(VectorMetadata {
        document_id,
        snippet,
        timestamp,
        transaction_id,
    })
}

fn take_string(map: &mut Map<String, Value>, key: &str) -> Option<String> {
    match map.remove(key) {
        Some(Value::String(value)) => Some(value.trim().to_string()),
        _ => None,
    }
}
