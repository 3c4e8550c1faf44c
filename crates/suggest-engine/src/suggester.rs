//! The suggestion engine facade: ingestion, administration and serving over
//! one suggestion set.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use suggest_core::analysis::Analyzer;
use suggest_core::config::SuggestConfig;
use suggest_core::error::{Result, SuggestError};
use suggest_core::query::{BoolQuery, QueryExpr, SearchHits, SearchRequest, Sort};
use suggest_core::query_string;
use suggest_core::traits::{BulkFailure, BulkOp, BulkResponse, SuggestBackend};
use suggest_core::types::{item_id, keys, Kind, Record, SuggestItem};

use crate::deadline::with_deadline;
use crate::lifecycle::IndexLifecycle;
use crate::parser::{ContentsParser, QueryLog};
use crate::pipeline::IngestionPipeline;
use crate::ranking::{self, split_query, PopularWordsRequest, SuggestRequest};
use crate::replicator::LogReplicator;
use crate::settings::{ElevateWord, SuggestSettings};
use crate::writer::SuggestWriter;

/// Page size used when walking items to demote them.
const SCAN_PAGE: usize = 500;

/// Outcome of an indexing call. Partial failure is reported, not raised.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SuggestIndexResponse {
    pub num_input_docs: usize,
    pub num_suggest_words: usize,
    pub errors: Vec<BulkFailure>,
    pub took: Duration,
}

impl SuggestIndexResponse {
    pub fn has_error(&self) -> bool {
        !self.errors.is_empty()
    }

    fn absorb(&mut self, response: BulkResponse) {
        self.errors.extend(response.failures);
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SuggestResponse {
    pub words: Vec<String>,
    /// Filled only when details were requested.
    pub items: Vec<SuggestItem>,
    /// Matches before truncation.
    pub total: u64,
    pub num: usize,
    pub took: Duration,
}

pub struct Suggester {
    config: SuggestConfig,
    backend: Arc<dyn SuggestBackend>,
    parser: ContentsParser,
    settings: Arc<SuggestSettings>,
    writer: Arc<SuggestWriter>,
    lifecycle: IndexLifecycle,
    pipeline: Mutex<Option<Arc<IngestionPipeline>>>,
    replicator: Mutex<Option<Arc<LogReplicator>>>,
}

impl Suggester {
    pub fn new(config: SuggestConfig, backend: Arc<dyn SuggestBackend>, analyzer: Arc<Analyzer>) -> Result<Self> {
        config.validate()?;
        let settings = Arc::new(SuggestSettings::new(
            backend.clone(),
            config.settings_index(),
            config.timeouts.admin(),
        ));
        let writer = Arc::new(SuggestWriter::new(
            backend.clone(),
            config.update_alias(),
            settings.clone(),
            config.pipeline.bulk_size,
            config.timeouts.index(),
        ));
        let lifecycle = IndexLifecycle::new(backend.clone(), &config);
        Ok(Self {
            parser: ContentsParser::new(analyzer),
            config,
            backend,
            settings,
            writer,
            lifecycle,
            pipeline: Mutex::new(None),
            replicator: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &SuggestConfig {
        &self.config
    }

    pub fn parser(&self) -> &ContentsParser {
        &self.parser
    }

    pub fn settings(&self) -> &SuggestSettings {
        &self.settings
    }

    pub fn writer(&self) -> &SuggestWriter {
        &self.writer
    }

    pub fn lifecycle(&self) -> &IndexLifecycle {
        &self.lifecycle
    }

    // ---- indexing ----

    /// Merge items into the update index.
    pub async fn index(&self, items: Vec<SuggestItem>) -> Result<SuggestIndexResponse> {
        let started = Instant::now();
        let num_input_docs = items.len();
        let items = self.writer.without_bad_words(items).await?;
        let mut response = SuggestIndexResponse {
            num_input_docs,
            num_suggest_words: items.len(),
            ..Default::default()
        };
        response.absorb(self.writer.add(items).await?);
        response.absorb(self.writer.flush().await?);
        response.took = started.elapsed();
        Ok(response)
    }

    /// Harvest words from documents with every configured field family.
    /// Documents that fail to parse are reported and skipped.
    pub async fn index_from_documents(&self, docs: &[Record]) -> Result<SuggestIndexResponse> {
        let started = Instant::now();
        let mut items = Vec::new();
        let mut errors = Vec::new();
        for doc in docs {
            for family in &self.config.document {
                match self.parser.parse_document(doc, family) {
                    Ok(parsed) => items.extend(parsed),
                    Err(e) => {
                        warn!(error = %e, "skipping document that failed to parse");
                        errors.push(BulkFailure { id: doc_id(doc), reason: e.to_string() });
                    }
                }
            }
        }
        let mut response = self.index(items).await?;
        response.num_input_docs = docs.len();
        errors.append(&mut response.errors);
        response.errors = errors;
        response.took = started.elapsed();
        Ok(response)
    }

    pub async fn index_from_query_logs(&self, entries: &[QueryLog]) -> Result<SuggestIndexResponse> {
        let started = Instant::now();
        let mut items = Vec::new();
        let mut errors = Vec::new();
        for entry in entries {
            match self.parser.parse_query_log(entry, &self.config.query_log) {
                Ok(parsed) => items.extend(parsed),
                Err(e) => {
                    warn!(q = %entry.q, error = %e, "skipping unparsable query log");
                    errors.push(BulkFailure { id: entry.q.clone(), reason: e.to_string() });
                }
            }
        }
        let mut response = self.index(items).await?;
        response.num_input_docs = entries.len();
        errors.append(&mut response.errors);
        response.errors = errors;
        response.took = started.elapsed();
        Ok(response)
    }

    /// Register a phrase as if it had been searched `num` times.
    pub async fn index_from_search_word(
        &self,
        word: &str,
        fields: &[String],
        tags: &[String],
        roles: &[String],
        num: u64,
        langs: &[String],
    ) -> Result<SuggestIndexResponse> {
        let (words, _) = split_query(word);
        let item = self.parser.parse_search_words(&words, None, fields, tags, roles, 1.0, langs)?;
        let items = item
            .map(|i| i.with_kinds([Kind::Query]).with_query_freq(num))
            .into_iter()
            .collect::<Vec<_>>();
        let mut response = self.index(items).await?;
        response.num_input_docs = 1;
        Ok(response)
    }

    // ---- elevate words ----

    fn elevate_item(&self, word: &ElevateWord) -> Result<Option<SuggestItem>> {
        let (words, _) = split_query(&word.word);
        let readings: Vec<Vec<String>> = word.readings.iter().map(|r| vec![r.clone()]).collect();
        let readings = (!readings.is_empty()).then_some(readings.as_slice());
        self.parser
            .parse_search_words(&words, readings, &word.fields, &word.tags, &word.roles, word.boost, &[])
    }

    /// Persist an elevate word and, when `apply` is set, write its item.
    pub async fn add_elevate_word(&self, word: &ElevateWord, apply: bool) -> Result<SuggestIndexResponse> {
        let Some(item) = self.elevate_item(word)? else {
            return Err(SuggestError::InvalidWord(format!("elevate word '{}' is blank", word.word)));
        };
        self.settings.add_elevate_word(word).await?;
        info!(word = %item.text(), boost = word.boost, "elevate word added");
        if !apply {
            return Ok(SuggestIndexResponse::default());
        }
        self.index(vec![item]).await
    }

    /// Forget an elevate word. With `apply`, its item loses the USER kind and
    /// is deleted if nothing else backs it.
    pub async fn delete_elevate_word(&self, word: &str, apply: bool) -> Result<()> {
        self.settings.delete_elevate_word(word).await?;
        if !apply {
            return Ok(());
        }
        let (words, _) = split_query(word);
        let normalized: Vec<String> = words.iter().map(|w| self.parser.analyzer().normalize(w, "", &[])).collect();
        let id = item_id(&normalized.join(" "));
        self.writer.flush().await?;
        let stored = with_deadline(
            "suggester.get",
            self.config.timeouts.index(),
            self.backend.get(&self.config.update_alias(), &[id]),
        )
        .await?;
        let mut ops = Vec::new();
        for record in stored {
            let mut item = SuggestItem::parse_record(&record)?;
            if !item.has_kind(Kind::User) {
                continue;
            }
            ops.push(if item.demote(Kind::User) {
                BulkOp::Put(item.to_record())
            } else {
                BulkOp::Delete(item.id().to_string())
            });
        }
        self.bulk(ops).await?;
        Ok(())
    }

    /// Re-apply every persisted elevate word.
    pub async fn restore_elevate_words(&self) -> Result<SuggestIndexResponse> {
        let started = Instant::now();
        let words = self.settings.elevate_words().await?;
        let mut items = Vec::with_capacity(words.len());
        for word in &words {
            if let Some(item) = self.elevate_item(word)? {
                items.push(item);
            }
        }
        let mut response = self.index(items).await?;
        response.num_input_docs = words.len();
        response.took = started.elapsed();
        Ok(response)
    }

    // ---- bad words ----

    fn normalize_bad_word(&self, word: &str) -> Result<String> {
        let trimmed = word.trim();
        if trimmed.is_empty() || trimmed.contains(char::is_whitespace) {
            return Err(SuggestError::InvalidWord(format!("bad word '{word}' must be one non-blank word")));
        }
        let normalized = self.parser.analyzer().normalize(trimmed, "", &[]);
        if normalized.trim().is_empty() || normalized.contains(char::is_whitespace) {
            return Err(SuggestError::InvalidWord(format!("bad word '{word}' normalizes to '{normalized}'")));
        }
        Ok(normalized)
    }

    /// Register a bad word. With `apply`, stored items containing it are
    /// deleted as well; either way it is filtered from ingestion and serving.
    pub async fn add_bad_word(&self, word: &str, apply: bool) -> Result<()> {
        let normalized = self.normalize_bad_word(word)?;
        self.settings.add_bad_word(&normalized).await?;
        info!(word = %normalized, apply, "bad word added");
        if apply {
            let deleted = self.writer.delete_by_query(&QueryExpr::contains(keys::TEXT, normalized)).await?;
            self.refresh_update().await?;
            debug!(deleted, "purged items containing bad word");
        }
        Ok(())
    }

    pub async fn delete_bad_word(&self, word: &str) -> Result<()> {
        let normalized = self.normalize_bad_word(word)?;
        self.settings.delete_bad_word(&normalized).await
    }

    // ---- deletes ----

    pub async fn delete(&self, id: &str) -> Result<()> {
        self.writer.flush().await?;
        self.bulk(vec![BulkOp::Delete(id.to_string())]).await
    }

    pub async fn delete_by_query(&self, query: &QueryExpr) -> Result<u64> {
        self.writer.delete_by_query(query).await
    }

    /// Bare terms in the query string apply to `text`.
    pub async fn delete_by_query_string(&self, query: &str) -> Result<u64> {
        let expr = query_string::parse(query)?.to_query_expr(keys::TEXT);
        self.delete_by_query(&expr).await
    }

    pub async fn delete_all(&self) -> Result<u64> {
        self.delete_by_query(&QueryExpr::All).await
    }

    pub async fn delete_document_words(&self) -> Result<u64> {
        self.delete_kind(Kind::Document).await
    }

    pub async fn delete_query_words(&self) -> Result<u64> {
        self.delete_kind(Kind::Query).await
    }

    /// Delete items older than `timestamp` (epoch millis). USER items are
    /// administrative and survive.
    pub async fn delete_older_than(&self, timestamp: i64) -> Result<u64> {
        let query = BoolQuery::new()
            .must(QueryExpr::lt(keys::TIMESTAMP, timestamp as f64))
            .must_not(QueryExpr::term(keys::KINDS, Kind::User.as_str()))
            .build();
        self.delete_by_query(&query).await
    }

    /// Remove `kind` from every item: items backed by nothing else are
    /// deleted, mixed items are demoted. Returns the number of items touched.
    async fn delete_kind(&self, kind: Kind) -> Result<u64> {
        let others: Vec<&str> =
            [Kind::Document, Kind::Query, Kind::User].iter().filter(|k| **k != kind).map(|k| k.as_str()).collect();
        let only = BoolQuery::new()
            .must(QueryExpr::term(keys::KINDS, kind.as_str()))
            .must_not(QueryExpr::terms(keys::KINDS, others.iter().copied()))
            .build();
        let deleted = self.writer.delete_by_query(&only).await?;
        self.refresh_update().await?;

        let mixed = BoolQuery::new()
            .must(QueryExpr::term(keys::KINDS, kind.as_str()))
            .must(QueryExpr::terms(keys::KINDS, others.iter().copied()))
            .build();
        let mut demoted = 0u64;
        let mut from = 0;
        loop {
            let request = SearchRequest::new(mixed.clone())
                .with_sort(Sort::FieldDesc(keys::TIMESTAMP.into()))
                .with_page(from, SCAN_PAGE);
            let hits = self.search_target(&self.config.update_alias(), &request).await?;
            let mut ops = Vec::with_capacity(hits.hits.len());
            for hit in &hits.hits {
                let mut item = SuggestItem::parse_record(&hit.source)?;
                ops.push(if item.demote(kind) {
                    BulkOp::Put(item.to_record())
                } else {
                    BulkOp::Delete(item.id().to_string())
                });
            }
            demoted += ops.len() as u64;
            self.bulk(ops).await?;
            from += SCAN_PAGE;
            if hits.hits.len() < SCAN_PAGE {
                break;
            }
        }
        self.refresh_update().await?;
        info!(kind = %kind, deleted, demoted, "removed kind from suggest items");
        Ok(deleted + demoted)
    }

    // ---- counts ----

    pub async fn all_words_num(&self) -> Result<u64> {
        self.count(&QueryExpr::All).await
    }

    pub async fn document_words_num(&self) -> Result<u64> {
        self.count(&QueryExpr::term(keys::KINDS, Kind::Document.as_str())).await
    }

    pub async fn query_words_num(&self) -> Result<u64> {
        self.count(&QueryExpr::term(keys::KINDS, Kind::Query.as_str())).await
    }

    async fn count(&self, query: &QueryExpr) -> Result<u64> {
        with_deadline(
            "suggester.count",
            self.config.timeouts.search(),
            self.backend.count(&self.config.search_alias(), query),
        )
        .await
    }

    // ---- lifecycle ----

    pub async fn create_if_nothing(&self) -> Result<bool> {
        self.lifecycle.create_if_nothing().await
    }

    /// Flushes first so buffered items land in the generation they were
    /// written for.
    pub async fn create_next_index(&self) -> Result<String> {
        self.writer.flush().await?;
        self.lifecycle.create_next().await
    }

    pub async fn switch_index(&self) -> Result<bool> {
        self.lifecycle.switch_index().await
    }

    pub async fn remove_disabled_index(&self) -> Result<Vec<String>> {
        self.lifecycle.remove_disabled().await
    }

    /// Flush buffered items and make them searchable.
    pub async fn refresh(&self) -> Result<()> {
        self.writer.flush().await?;
        self.refresh_update().await
    }

    async fn refresh_update(&self) -> Result<()> {
        with_deadline(
            "suggester.refresh",
            self.config.timeouts.index(),
            self.backend.refresh(&self.config.update_alias()),
        )
        .await
    }

    // ---- serving ----

    pub async fn suggest(&self, request: &SuggestRequest) -> Result<SuggestResponse> {
        let started = Instant::now();
        let bad_words = self.settings.bad_words().await?;
        let analyzed = ranking::analyze_request(request, self.parser.analyzer())?;
        let search = ranking::suggest_query(request, &analyzed, &bad_words);
        let hits = self.search_target(&self.config.search_alias(), &search).await?;

        let mut items = to_items(hits.hits.iter().map(|h| &h.source));
        let query_text = analyzed.text();
        if request.match_word_first && !query_text.is_empty() {
            // Stable: score order is kept within each group.
            items.sort_by_key(|item| !item.text().starts_with(query_text.as_str()));
        }
        if request.skip_duplicate_words {
            let mut seen = std::collections::HashSet::new();
            items.retain(|item| seen.insert(item.text().to_string()));
        }
        items.truncate(request.size);
        Ok(assemble(items, hits.total, request.suggest_detail, started))
    }

    pub async fn popular_words(&self, request: &PopularWordsRequest) -> Result<SuggestResponse> {
        let started = Instant::now();
        let bad_words = self.settings.bad_words().await?;
        let search =
            ranking::popular_words_query(request, self.config.ranking.popular_words_query_freq_threshold, &bad_words);
        let hits = self.search_target(&self.config.search_alias(), &search).await?;
        let items = to_items(hits.hits.iter().map(|h| &h.source));
        Ok(assemble(items, hits.total, request.suggest_detail, started))
    }

    async fn search_target(&self, target: &str, request: &SearchRequest) -> Result<SearchHits> {
        with_deadline("suggester.search", self.config.timeouts.search(), self.backend.search(target, request)).await
    }

    async fn bulk(&self, ops: Vec<BulkOp>) -> Result<()> {
        if ops.is_empty() {
            return Ok(());
        }
        let response = with_deadline(
            "suggester.bulk",
            self.config.timeouts.index(),
            self.backend.bulk(&self.config.update_alias(), ops),
        )
        .await?;
        match response.failures.first() {
            Some(failure) => Err(SuggestError::Backend(format!(
                "{} of {} writes failed, first: {}",
                response.failures.len(),
                response.failures.len() + response.succeeded,
                failure.reason
            ))),
            None => Ok(()),
        }
    }

    // ---- workers ----

    /// Start the ingestion pipeline, or return the running one.
    pub fn start_pipeline(&self) -> Arc<IngestionPipeline> {
        let mut slot = self.pipeline.lock();
        if let Some(pipeline) = slot.as_ref().filter(|p| p.is_alive()) {
            return pipeline.clone();
        }
        let pipeline = Arc::new(IngestionPipeline::start(
            self.parser.clone(),
            self.writer.clone(),
            self.config.document.clone(),
            self.config.pipeline.clone(),
        ));
        *slot = Some(pipeline.clone());
        pipeline
    }

    /// Start the log replicator feeding the pipeline, starting that too.
    pub fn start_replicator(&self) -> Arc<LogReplicator> {
        let pipeline = self.start_pipeline();
        let mut slot = self.replicator.lock();
        if let Some(replicator) = slot.as_ref() {
            return replicator.clone();
        }
        let replicator = Arc::new(LogReplicator::start(pipeline, self.config.replication.idle_wait()));
        *slot = Some(replicator.clone());
        replicator
    }

    /// Close both workers, discarding their queues.
    pub fn shutdown(&self) {
        if let Some(replicator) = self.replicator.lock().take() {
            replicator.close();
        }
        if let Some(pipeline) = self.pipeline.lock().take() {
            pipeline.close();
        }
    }
}

fn to_items<'a>(records: impl Iterator<Item = &'a Record>) -> Vec<SuggestItem> {
    records
        .filter_map(|record| match SuggestItem::parse_record(record) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!(error = %e, "skipping unreadable suggest item");
                None
            }
        })
        .collect()
}

fn assemble(items: Vec<SuggestItem>, total: u64, detail: bool, started: Instant) -> SuggestResponse {
    let words: Vec<String> = items.iter().map(|i| i.text().to_string()).collect();
    SuggestResponse {
        num: words.len(),
        words,
        items: if detail { items } else { Vec::new() },
        total,
        took: started.elapsed(),
    }
}

fn doc_id(doc: &Record) -> String {
    doc.get(keys::ID).and_then(|v| v.as_str()).unwrap_or_default().to_string()
}
