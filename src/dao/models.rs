use serde_json::{Map, Value};

/// Field-addressable document as stored by any match store backend.
pub type Document = Map<String, Value>;

/// Set of top-level fields written (or compared) in a single store operation.
pub type FieldMap = Map<String, Value>;

/// Namespace under which match documents live in every backend.
pub const MATCH_NAMESPACE: &str = "match";

/// Result of a guarded write against a match store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Preconditions held and every field was written atomically.
    Applied,
    /// The document is missing or one of the expected fields differed.
    PreconditionFailed,
}

/// Check that every `expected` field equals the document's value.
///
/// A missing field compares equal to `null`, so `"joiner_id": null` matches
/// both an explicit null and an absent key.
pub fn preconditions_hold(document: &Document, expected: &FieldMap) -> bool {
    expected
        .iter()
        .all(|(key, value)| document.get(key).unwrap_or(&Value::Null) == value)
}

/// Overwrite the top-level fields of `document` with `fields` (last write wins).
pub fn merge_fields(document: &mut Document, fields: FieldMap) {
    for (key, value) in fields {
        document.insert(key, value);
    }
}

/// Drop backend bookkeeping keys (`_id`, `_rev`, ...) from a raw document.
pub fn strip_metadata(mut document: Document) -> Document {
    document.retain(|key, _| !key.starts_with('_'));
    document
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn fields(value: Value) -> FieldMap {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other:?}"),
        }
    }

    #[test]
    fn absent_field_matches_null_precondition() {
        let doc = fields(json!({ "state": "waiting" }));
        assert!(preconditions_hold(
            &doc,
            &fields(json!({ "state": "waiting", "joiner_id": null }))
        ));
        assert!(!preconditions_hold(
            &doc,
            &fields(json!({ "joiner_id": "someone" }))
        ));
    }

    #[test]
    fn merge_overwrites_only_given_fields() {
        let mut doc = fields(json!({ "host_lives": 3, "joiner_lives": 3 }));
        merge_fields(&mut doc, fields(json!({ "joiner_lives": 2 })));
        assert_eq!(doc, fields(json!({ "host_lives": 3, "joiner_lives": 2 })));
    }

    #[test]
    fn strip_metadata_removes_underscore_keys() {
        let doc = fields(json!({ "_id": "match::1", "_rev": "1-a", "state": "waiting" }));
        assert_eq!(strip_metadata(doc), fields(json!({ "state": "waiting" })));
    }
}
