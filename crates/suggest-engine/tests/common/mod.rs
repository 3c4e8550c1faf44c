#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use suggest_analysis::normalize::{LowerCaseNormalizer, NfkcNormalizer};
use suggest_analysis::reading::{DictionaryReadingConverter, KatakanaReadingConverter, RomajiReadingConverter};
use suggest_analysis::tokenize::ScriptTokenizer;
use suggest_core::analysis::{Analyzer, NormalizerChain, ReadingConverterChain};
use suggest_core::config::SuggestConfig;
use suggest_core::error::{Result, SuggestError};
use suggest_core::memory::MemoryBackend;
use suggest_core::query::{QueryExpr, SearchHits, SearchRequest};
use suggest_core::traits::{AliasAction, BulkOp, BulkResponse, SuggestBackend};
use suggest_core::types::{Kind, Record, SuggestItem};
use suggest_engine::Suggester;

pub fn analyzer() -> Arc<Analyzer> {
    let dictionary = DictionaryReadingConverter::from_entries([("検索", "けんさく"), ("全文", "ぜんぶん")]);
    Arc::new(Analyzer::new(
        Arc::new(ScriptTokenizer),
        NormalizerChain::new(vec![Arc::new(NfkcNormalizer), Arc::new(LowerCaseNormalizer)]),
        ReadingConverterChain::new(
            vec![Arc::new(dictionary), Arc::new(KatakanaReadingConverter), Arc::new(RomajiReadingConverter)],
            10,
        ),
    ))
}

pub fn config() -> SuggestConfig {
    let mut config = SuggestConfig::default();
    config.pipeline.interval_ms = 20;
    config.pipeline.backoff_ms = 10;
    config.replication.idle_wait_ms = 50;
    config
}

pub async fn suggester_on(backend: Arc<dyn SuggestBackend>, config: SuggestConfig) -> Suggester {
    let suggester = Suggester::new(config, backend, analyzer()).unwrap();
    assert!(suggester.create_if_nothing().await.unwrap());
    suggester
}

pub async fn suggester() -> (Suggester, Arc<MemoryBackend>) {
    let backend = Arc::new(MemoryBackend::new());
    (suggester_on(backend.clone(), config()).await, backend)
}

/// An item whose readings come from the test analyzer.
pub fn item(words: &[&str], kind: Kind) -> SuggestItem {
    let analyzer = analyzer();
    let readings = words.iter().map(|w| analyzer.readings(w, "content", &[]).unwrap()).collect();
    SuggestItem::new(words, readings, kind)
}

pub fn doc(value: serde_json::Value) -> Record {
    value.as_object().cloned().unwrap()
}

pub async fn wait_until<F: Fn() -> bool>(what: &str, check: F) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

/// Memory backend whose refreshes of `*.update` wait for a permit, and
/// whose bulk calls fail while `fail_bulk` is set.
pub struct GatedBackend {
    pub inner: MemoryBackend,
    pub gate: Semaphore,
    pub fail_bulk: AtomicBool,
}

impl GatedBackend {
    pub fn new() -> Self {
        Self { inner: MemoryBackend::new(), gate: Semaphore::new(0), fail_bulk: AtomicBool::new(false) }
    }

    pub fn set_fail_bulk(&self, fail: bool) {
        self.fail_bulk.store(fail, Ordering::Release);
    }

    pub fn open(&self) {
        self.gate.add_permits(Semaphore::MAX_PERMITS / 2);
    }
}

#[async_trait]
impl SuggestBackend for GatedBackend {
    async fn create_index(&self, name: &str, aliases: &[String]) -> Result<()> {
        self.inner.create_index(name, aliases).await
    }

    async fn delete_index(&self, name: &str) -> Result<()> {
        self.inner.delete_index(name).await
    }

    async fn list_indices(&self, prefix: &str) -> Result<Vec<String>> {
        self.inner.list_indices(prefix).await
    }

    async fn exists(&self, target: &str) -> Result<bool> {
        self.inner.exists(target).await
    }

    async fn resolve_alias(&self, alias: &str) -> Result<Vec<String>> {
        self.inner.resolve_alias(alias).await
    }

    async fn update_aliases(&self, actions: &[AliasAction]) -> Result<()> {
        self.inner.update_aliases(actions).await
    }

    async fn get(&self, target: &str, ids: &[String]) -> Result<Vec<Record>> {
        self.inner.get(target, ids).await
    }

    async fn bulk(&self, target: &str, ops: Vec<BulkOp>) -> Result<BulkResponse> {
        if self.fail_bulk.load(Ordering::Acquire) {
            return Err(SuggestError::Backend(format!("bulk to {target} refused")));
        }
        self.inner.bulk(target, ops).await
    }

    async fn delete_by_query(&self, target: &str, query: &QueryExpr) -> Result<u64> {
        self.inner.delete_by_query(target, query).await
    }

    async fn search(&self, target: &str, request: &SearchRequest) -> Result<SearchHits> {
        self.inner.search(target, request).await
    }

    async fn count(&self, target: &str, query: &QueryExpr) -> Result<u64> {
        self.inner.count(target, query).await
    }

    async fn refresh(&self, target: &str) -> Result<()> {
        if target.ends_with(".update") {
            let _permit = self.gate.acquire().await.map_err(|_| SuggestError::Closed("gate"))?;
        }
        self.inner.refresh(target).await
    }
}
