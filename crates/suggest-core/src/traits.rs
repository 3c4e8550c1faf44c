use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::query::{QueryExpr, SearchHits, SearchRequest};
use crate::types::{Record, SuggestItem};

/// One token produced by a tokenizer. `reading` carries a phonetic form when
/// the tokenizer knows one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub term: String,
    pub reading: Option<String>,
}

impl Token {
    pub fn new(term: impl Into<String>) -> Self {
        Self { term: term.into(), reading: None }
    }

    pub fn with_reading(term: impl Into<String>, reading: impl Into<String>) -> Self {
        Self { term: term.into(), reading: Some(reading.into()) }
    }
}

/// Splits text into words. `field` and `lang` let an implementation pick a
/// different analysis per source field or language.
pub trait Tokenizer: Send + Sync {
    fn tokenize(&self, text: &str, field: &str, lang: Option<&str>) -> Result<Vec<Token>>;
}

/// Maps text to its canonical form (width folding, case folding, ...).
pub trait Normalizer: Send + Sync {
    fn normalize(&self, text: &str, field: &str, langs: &[String]) -> String;
}

/// Expands a word into phonetic or alternate-script variants.
pub trait ReadingConverter: Send + Sync {
    fn convert(&self, text: &str, field: &str, langs: &[String]) -> Result<Vec<String>>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AliasAction {
    Add { index: String, alias: String },
    Remove { index: String, alias: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum BulkOp {
    /// Overwrite the document whose id is the record's `id` key.
    Put(Record),
    /// Fold the item into whatever is stored under its id, or insert it.
    /// The read and the write happen under the backend's write lock.
    Merge(SuggestItem),
    Delete(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkFailure {
    pub id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkResponse {
    pub succeeded: usize,
    pub failures: Vec<BulkFailure>,
}

/// Document store the engine writes suggest items to and searches.
///
/// A `target` is either a physical index or an alias. Reads through an alias
/// cover every index it resolves to; writes require exactly one. Writes are
/// visible to `get` immediately and to `search`/`count` after `refresh`.
#[async_trait]
pub trait SuggestBackend: Send + Sync {
    /// Create a physical index with the given aliases attached in one step.
    async fn create_index(&self, name: &str, aliases: &[String]) -> Result<()>;
    async fn delete_index(&self, name: &str) -> Result<()>;
    async fn list_indices(&self, prefix: &str) -> Result<Vec<String>>;
    async fn exists(&self, target: &str) -> Result<bool>;
    async fn resolve_alias(&self, alias: &str) -> Result<Vec<String>>;
    /// Apply every action or none of them.
    async fn update_aliases(&self, actions: &[AliasAction]) -> Result<()>;

    async fn get(&self, target: &str, ids: &[String]) -> Result<Vec<Record>>;
    async fn bulk(&self, target: &str, ops: Vec<BulkOp>) -> Result<BulkResponse>;
    async fn delete_by_query(&self, target: &str, query: &QueryExpr) -> Result<u64>;
    async fn search(&self, target: &str, request: &SearchRequest) -> Result<SearchHits>;
    async fn count(&self, target: &str, query: &QueryExpr) -> Result<u64>;
    async fn refresh(&self, target: &str) -> Result<()>;
}
