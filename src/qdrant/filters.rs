//! Filter helpers for scoping Qdrant queries to a transaction.

use serde_json::{Value, json};

/// Compose the Qdrant filter restricting matches to a single transaction.
///
/// Returns `None` for an absent or blank scope, which searches the whole collection.
pub fn build_scope_filter(transaction_id: Option<&str>) -> Option<Value> {
    let scope = transaction_id.and_then(non_empty)?;
    Some(json!({
        "must": [
            {
                "key": "transaction_id",
                "match": { "value": scope }
            }
        ]
    }))
}

fn non_empty(input: &str) -> Option<&str> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_filter_matches_transaction_id() {
        let filter = build_scope_filter(Some(" tx-1 ")).expect("filter");
        assert_eq!(
            filter,
            json!({
                "must": [
                    { "key": "transaction_id", "match": { "value": "tx-1" } }
                ]
            })
        );
    }

    #[test]
    fn blank_scope_yields_no_filter() {
        assert!(build_scope_filter(None).is_none());
        assert!(build_scope_filter(Some("   ")).is_none());
    }
}
