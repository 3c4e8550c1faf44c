//! Fixed tantivy schema for schemaless records.
//!
//! Every string (or stringified scalar) under every key is indexed into one
//! untokenized `terms` field as `key:value`, so arbitrary keys such as
//! `reading_17` need no schema change. The record itself rides along as a
//! stored JSON `_source`.

use tantivy::schema::{Field, Schema, Value, STORED, STRING};
use tantivy::TantivyDocument;

use suggest_core::error::{Result, SuggestError};
use suggest_core::types::{keys, string_list, Record};

pub const ID: &str = "id";
pub const TERMS: &str = "terms";
pub const SOURCE: &str = "_source";

const SEPARATOR: char = ':';

#[derive(Debug, Clone, Copy)]
pub struct StoreFields {
    pub id: Field,
    pub terms: Field,
    pub source: Field,
}

pub fn build_schema() -> Schema {
    let mut builder = Schema::builder();
    builder.add_text_field(ID, STRING | STORED);
    builder.add_text_field(TERMS, STRING);
    builder.add_text_field(SOURCE, STORED);
    builder.build()
}

pub fn fields_of(schema: &Schema) -> Result<StoreFields> {
    let field = |name: &str| {
        schema
            .get_field(name)
            .map_err(|e| SuggestError::Backend(format!("schema is missing '{name}': {e}")))
    };
    Ok(StoreFields { id: field(ID)?, terms: field(TERMS)?, source: field(SOURCE)? })
}

/// Indexed form of one `key = value` pair.
pub fn packed_term(key: &str, value: &str) -> String {
    format!("{key}{SEPARATOR}{value}")
}

pub fn record_id(record: &Record) -> Option<&str> {
    record.get(keys::ID).and_then(serde_json::Value::as_str)
}

pub fn to_document(fields: &StoreFields, record: &Record) -> Result<TantivyDocument> {
    let id = record_id(record)
        .ok_or_else(|| SuggestError::Backend("record has no id".to_string()))?;
    let mut doc = TantivyDocument::default();
    doc.add_text(fields.id, id);
    for (key, value) in record {
        for item in string_list(value) {
            doc.add_text(fields.terms, packed_term(key, &item));
        }
    }
    doc.add_text(fields.source, serde_json::to_string(record)?);
    Ok(doc)
}

pub fn from_document(fields: &StoreFields, doc: &TantivyDocument) -> Result<Record> {
    let source = doc
        .get_first(fields.source)
        .and_then(|v| v.as_str())
        .ok_or_else(|| SuggestError::Backend("document has no stored source".to_string()))?;
    Ok(serde_json::from_str(source)?)
}
