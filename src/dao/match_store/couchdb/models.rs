use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dao::models::Document;

pub const END_SUFFIX: &str = "\u{ffff}";

#[derive(Debug, Deserialize)]
pub struct AllDocsResponse {
    pub rows: Vec<AllDocsRow>,
}

#[derive(Debug, Deserialize)]
pub struct AllDocsRow {
    pub id: String,
    #[serde(default)]
    pub doc: Option<Document>,
}

/// Body of a `_changes` response filtered with `_doc_ids`.
#[derive(Debug, Deserialize)]
pub struct ChangesResponse {
    pub results: Vec<ChangeRow>,
    /// Opaque sequence token (string on CouchDB 2+, integer on 1.x).
    pub last_seq: Value,
}

#[derive(Debug, Deserialize)]
pub struct ChangeRow {
    pub id: String,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub doc: Option<Document>,
}

/// Request body restricting a `_changes` feed to a set of documents.
#[derive(Debug, Serialize)]
pub struct DocIdsFilter {
    pub doc_ids: Vec<String>,
}

pub fn doc_id(namespace: &str, id: &str) -> String {
    format!("{namespace}::{id}")
}

pub fn namespace_prefix(namespace: &str) -> String {
    format!("{namespace}::")
}

/// Render a sequence token as the `since` query parameter.
pub fn seq_param(seq: &Value) -> String {
    match seq {
        Value::String(value) => value.clone(),
        other => other.to_string(),
    }
}
