//! Persisted per-instance settings: bad words and elevate words.
//!
//! Entries live as records in the `<id>.settings` index of the same backend.
//! The index and its metadata record are created lazily on first use, and
//! bad words are cached in-process because every write consults them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use suggest_core::error::{Result, SuggestError};
use suggest_core::query::{QueryExpr, SearchRequest, Sort};
use suggest_core::traits::{BulkOp, SuggestBackend};
use suggest_core::types::{keys, now_millis, Record};

use crate::deadline::with_deadline;

const TYPE: &str = "type";
const VALUE: &str = "value";
const BAD_WORD: &str = "badword";
const ELEVATE_WORD: &str = "elevate";
const META_ID: &str = "_meta";
/// Upper bound on entries read back per array setting.
const MAX_ENTRIES: usize = 10_000;

/// A phrase registered with a boost override.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElevateWord {
    pub word: String,
    pub boost: f32,
    #[serde(default)]
    pub readings: Vec<String>,
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl ElevateWord {
    pub fn new(word: impl Into<String>, boost: f32) -> Self {
        Self {
            word: word.into(),
            boost,
            readings: Vec::new(),
            fields: Vec::new(),
            tags: Vec::new(),
            roles: Vec::new(),
        }
    }
}

pub struct SuggestSettings {
    backend: Arc<dyn SuggestBackend>,
    index: String,
    timeout: Duration,
    ready: AtomicBool,
    bad_words: RwLock<Option<Vec<String>>>,
}

impl SuggestSettings {
    pub fn new(backend: Arc<dyn SuggestBackend>, index: impl Into<String>, timeout: Duration) -> Self {
        Self {
            backend,
            index: index.into(),
            timeout,
            ready: AtomicBool::new(false),
            bad_words: RwLock::new(None),
        }
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    async fn ensure(&self) -> Result<()> {
        if self.ready.load(Ordering::Acquire) {
            return Ok(());
        }
        let exists = with_deadline("settings.exists", self.timeout, self.backend.exists(&self.index)).await?;
        if !exists {
            let created = self.backend.create_index(&self.index, &[]).await;
            match created {
                Ok(()) => {
                    let meta = entry_record(META_ID.to_string(), "meta", Value::from(now_millis()));
                    self.put(vec![BulkOp::Put(meta)]).await?;
                    tracing::info!(index = %self.index, "initialized settings index");
                }
                // Another handle created it first.
                Err(_) if self.backend.exists(&self.index).await.unwrap_or(false) => {}
                Err(e) => return Err(e),
            }
        }
        self.ready.store(true, Ordering::Release);
        Ok(())
    }

    async fn put(&self, ops: Vec<BulkOp>) -> Result<()> {
        let response = with_deadline("settings.bulk", self.timeout, self.backend.bulk(&self.index, ops)).await?;
        if let Some(failure) = response.failures.first() {
            return Err(SuggestError::Backend(format!("settings write failed: {}", failure.reason)));
        }
        with_deadline("settings.refresh", self.timeout, self.backend.refresh(&self.index)).await
    }

    async fn values(&self, kind: &str) -> Result<Vec<Value>> {
        self.ensure().await?;
        let request = SearchRequest::new(QueryExpr::term(TYPE, kind))
            .with_sort(Sort::FieldDesc(keys::TIMESTAMP.to_string()))
            .with_page(0, MAX_ENTRIES);
        let hits = with_deadline("settings.search", self.timeout, self.backend.search(&self.index, &request)).await?;
        Ok(hits.hits.into_iter().filter_map(|mut h| h.source.remove(VALUE)).collect())
    }

    pub async fn bad_words(&self) -> Result<Vec<String>> {
        if let Some(cached) = self.bad_words.read().clone() {
            return Ok(cached);
        }
        let mut words: Vec<String> = self
            .values(BAD_WORD)
            .await?
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect();
        words.sort();
        *self.bad_words.write() = Some(words.clone());
        Ok(words)
    }

    pub async fn add_bad_word(&self, word: &str) -> Result<()> {
        self.ensure().await?;
        let record = entry_record(entry_id(BAD_WORD, word), BAD_WORD, Value::from(word));
        self.put(vec![BulkOp::Put(record)]).await?;
        *self.bad_words.write() = None;
        Ok(())
    }

    pub async fn delete_bad_word(&self, word: &str) -> Result<()> {
        self.ensure().await?;
        self.put(vec![BulkOp::Delete(entry_id(BAD_WORD, word))]).await?;
        *self.bad_words.write() = None;
        Ok(())
    }

    pub async fn elevate_words(&self) -> Result<Vec<ElevateWord>> {
        let mut out = Vec::new();
        for value in self.values(ELEVATE_WORD).await? {
            match serde_json::from_value::<ElevateWord>(value) {
                Ok(word) => out.push(word),
                Err(e) => tracing::warn!(error = %e, "skipping malformed elevate word setting"),
            }
        }
        Ok(out)
    }

    pub async fn add_elevate_word(&self, word: &ElevateWord) -> Result<()> {
        self.ensure().await?;
        let record = entry_record(entry_id(ELEVATE_WORD, &word.word), ELEVATE_WORD, serde_json::to_value(word)?);
        self.put(vec![BulkOp::Put(record)]).await
    }

    pub async fn delete_elevate_word(&self, word: &str) -> Result<()> {
        self.ensure().await?;
        self.put(vec![BulkOp::Delete(entry_id(ELEVATE_WORD, word))]).await
    }
}

fn entry_id(kind: &str, word: &str) -> String {
    format!("{kind}:{word}")
}

fn entry_record(id: String, kind: &str, value: Value) -> Record {
    let mut record = Record::new();
    record.insert(keys::ID.into(), Value::from(id));
    record.insert(TYPE.into(), Value::from(kind));
    record.insert(VALUE.into(), value);
    record.insert(keys::TIMESTAMP.into(), Value::from(now_millis()));
    record
}
