//! Buffered upsert-with-merge writer in front of the update alias.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use suggest_core::error::Result;
use suggest_core::query::QueryExpr;
use suggest_core::traits::{BulkOp, BulkResponse, SuggestBackend};
use suggest_core::types::SuggestItem;

use crate::deadline::with_deadline;
use crate::settings::SuggestSettings;

/// Collects items keyed by id, merging duplicates in memory, and writes them
/// as a merge against whatever the backend already stores.
///
/// The buffer lock only guards the in-memory map; it is released before any
/// remote call.
pub struct SuggestWriter {
    backend: Arc<dyn SuggestBackend>,
    target: String,
    settings: Arc<SuggestSettings>,
    bulk_size: usize,
    timeout: Duration,
    buffer: Mutex<BTreeMap<String, SuggestItem>>,
}

impl SuggestWriter {
    pub fn new(
        backend: Arc<dyn SuggestBackend>,
        target: impl Into<String>,
        settings: Arc<SuggestSettings>,
        bulk_size: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            backend,
            target: target.into(),
            settings,
            bulk_size: bulk_size.max(1),
            timeout,
            buffer: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Distinct items waiting for the next flush.
    pub fn pending_terms(&self) -> usize {
        self.buffer.lock().len()
    }

    /// `items` minus those containing a registered bad word.
    pub async fn without_bad_words(&self, items: Vec<SuggestItem>) -> Result<Vec<SuggestItem>> {
        let bad_words = self.settings.bad_words().await?;
        Ok(items
            .into_iter()
            .filter(|item| {
                let bad = item.is_bad_word(&bad_words);
                if bad {
                    debug!(text = %item.text(), "dropping bad word");
                }
                !bad
            })
            .collect())
    }

    /// Buffer items, dropping bad words. Flushes once the buffer reaches the
    /// bulk size and returns that flush's response; otherwise the response
    /// is empty.
    pub async fn add(&self, items: Vec<SuggestItem>) -> Result<BulkResponse> {
        if items.is_empty() {
            return Ok(BulkResponse::default());
        }
        let items = self.without_bad_words(items).await?;
        let full = {
            let mut buffer = self.buffer.lock();
            for item in items {
                match buffer.get_mut(item.id()) {
                    Some(existing) => existing.merge_from(&item)?,
                    None => {
                        buffer.insert(item.id().to_string(), item);
                    }
                }
            }
            buffer.len() >= self.bulk_size
        };
        if full {
            self.flush().await
        } else {
            Ok(BulkResponse::default())
        }
    }

    /// Write the buffer as merges against whatever the backend stores.
    /// Per-item failures are reported in the response. If the bulk call
    /// itself fails the batch goes back into the buffer.
    pub async fn flush(&self) -> Result<BulkResponse> {
        let batch = std::mem::take(&mut *self.buffer.lock());
        if batch.is_empty() {
            return Ok(BulkResponse::default());
        }
        let count = batch.len();
        let ops: Vec<BulkOp> = batch.values().cloned().map(BulkOp::Merge).collect();
        let response = match with_deadline("writer.bulk", self.timeout, self.backend.bulk(&self.target, ops)).await {
            Ok(response) => response,
            Err(e) => {
                warn!(target = %self.target, count, error = %e, "bulk write failed, keeping items buffered");
                self.requeue(batch);
                return Err(e);
            }
        };
        for failure in &response.failures {
            warn!(id = %failure.id, reason = %failure.reason, "suggest item write failed");
        }
        debug!(target = %self.target, count, failed = response.failures.len(), "flushed suggest items");
        Ok(response)
    }

    /// Put an unwritten batch back, ahead of anything buffered since.
    fn requeue(&self, batch: BTreeMap<String, SuggestItem>) {
        let mut buffer = self.buffer.lock();
        for (id, mut item) in batch {
            let item = match buffer.remove(&id) {
                Some(newer) => match item.merge_from(&newer) {
                    Ok(()) => item,
                    Err(_) => newer,
                },
                None => item,
            };
            buffer.insert(id, item);
        }
    }

    /// Flush, then make everything written so far searchable.
    pub async fn commit(&self) -> Result<BulkResponse> {
        let response = self.flush().await?;
        with_deadline("writer.refresh", self.timeout, self.backend.refresh(&self.target)).await?;
        Ok(response)
    }

    /// Flush first so buffered items are subject to the delete too.
    pub async fn delete_by_query(&self, query: &QueryExpr) -> Result<u64> {
        self.flush().await?;
        with_deadline("writer.delete_by_query", self.timeout, self.backend.delete_by_query(&self.target, query)).await
    }

    /// Drop buffered items without writing them.
    pub fn discard(&self) -> usize {
        let mut buffer = self.buffer.lock();
        let n = buffer.len();
        buffer.clear();
        n
    }
}
