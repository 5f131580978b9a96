//! Conversion between the store-agnostic JSON documents and BSON.

use mongodb::bson::{Bson, Document as BsonDocument, doc};
use serde_json::{Map, Number, Value};

use crate::dao::models::{Document, FieldMap};

pub fn doc_id(id: &str) -> BsonDocument {
    doc! { "_id": id }
}

pub fn to_bson(value: Value) -> Bson {
    match value {
        Value::Null => Bson::Null,
        Value::Bool(flag) => Bson::Boolean(flag),
        Value::Number(number) => match number.as_i64() {
            Some(int) => Bson::Int64(int),
            None => Bson::Double(number.as_f64().unwrap_or_default()),
        },
        Value::String(text) => Bson::String(text),
        Value::Array(items) => Bson::Array(items.into_iter().map(to_bson).collect()),
        Value::Object(map) => Bson::Document(to_bson_document(map)),
    }
}

pub fn to_bson_document(fields: FieldMap) -> BsonDocument {
    let mut document = BsonDocument::new();
    for (key, value) in fields {
        document.insert(key, to_bson(value));
    }
    document
}

pub fn to_json(value: Bson) -> Value {
    match value {
        Bson::Null | Bson::Undefined => Value::Null,
        Bson::Boolean(flag) => Value::Bool(flag),
        Bson::Int32(int) => Value::from(int),
        Bson::Int64(int) => Value::from(int),
        Bson::Double(float) => Number::from_f64(float).map_or(Value::Null, Value::Number),
        Bson::String(text) => Value::String(text),
        Bson::Array(items) => Value::Array(items.into_iter().map(to_json).collect()),
        Bson::Document(document) => Value::Object(to_json_document(document)),
        other => Value::String(other.to_string()),
    }
}

/// Convert a stored document, dropping `_id` and other underscore keys.
pub fn to_json_document(document: BsonDocument) -> Document {
    document
        .into_iter()
        .filter(|(key, _)| !key.starts_with('_'))
        .map(|(key, value)| (key, to_json(value)))
        .collect::<Map<String, Value>>()
}

/// Filter selecting `id` whose fields equal `expected`.
///
/// MongoDB's `{field: null}` also matches a missing field, which gives the
/// "absent equals null" rule of guarded writes for free.
pub fn guarded_filter(id: &str, expected: FieldMap) -> BsonDocument {
    let mut filter = doc_id(id);
    for (key, value) in expected {
        filter.insert(key, to_bson(value));
    }
    filter
}
