mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;

use common::{config, doc, suggester, suggester_on, wait_until, GatedBackend};
use suggest_analysis::normalize::LowerCaseNormalizer;
use suggest_analysis::reading::RomajiReadingConverter;
use suggest_analysis::tokenize::ScriptTokenizer;
use suggest_core::analysis::{Analyzer, NormalizerChain, ReadingConverterChain};
use suggest_core::memory::MemoryBackend;
use suggest_core::query::QueryExpr;
use suggest_core::traits::{Token, Tokenizer};
use suggest_core::SuggestError;
use suggest_engine::translog::{DeleteFilter, Operation, TranslogCursor};
use suggest_engine::{FileTranslog, LogEntry, MemoryTranslog, ReplicatorState, SuggestRequest, Suggester, Translog};

#[tokio::test]
async fn pipeline_ingests_documents_and_commits() {
    let (suggester, _) = suggester().await;
    let pipeline = suggester.start_pipeline();
    pipeline.add(doc(json!({"content": "rust エンジン"}))).await.unwrap();
    pipeline.add(doc(json!({"content": "エンジン", "title": "ignored"}))).await.unwrap();
    pipeline.add(doc(json!({"title": "no content"}))).await.unwrap();
    pipeline.commit().await.unwrap();
    wait_until("pipeline to drain", || pipeline.processed() == 4).await;

    let response = suggester.suggest(&SuggestRequest::new("enj")).await.unwrap();
    assert_eq!(response.words, vec!["エンジン"]);
    assert_eq!(response.items[0].doc_freq(), 2);
    assert_eq!(suggester.all_words_num().await.unwrap(), 2);
    suggester.shutdown();
}

#[tokio::test]
async fn submit_blocks_at_the_queue_ceiling_and_never_drops() {
    let backend = Arc::new(GatedBackend::new());
    let mut config = config();
    config.pipeline.max_queued_requests = 2;
    let suggester = suggester_on(backend.clone(), config).await;
    let pipeline = suggester.start_pipeline();

    // The worker takes this commit and parks on the gated refresh.
    pipeline.commit().await.unwrap();
    wait_until("worker to take the commit", || pipeline.queued() == 0).await;
    pipeline.add(doc(json!({"content": "一"}))).await.unwrap();
    pipeline.add(doc(json!({"content": "二"}))).await.unwrap();
    assert_eq!(pipeline.queued(), 2);

    let producer = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move { pipeline.add(doc(json!({"content": "三"}))).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!producer.is_finished());
    assert_eq!(pipeline.queued(), 2);

    backend.open();
    producer.await.unwrap().unwrap();
    pipeline.commit().await.unwrap();
    wait_until("pipeline to drain", || pipeline.processed() == 5).await;
    assert_eq!(suggester.all_words_num().await.unwrap(), 3);
}

#[tokio::test]
async fn close_discards_the_queue_and_releases_producers() {
    let backend = Arc::new(GatedBackend::new());
    let mut config = config();
    config.pipeline.max_queued_requests = 1;
    let suggester = suggester_on(backend.clone(), config).await;
    let pipeline = suggester.start_pipeline();

    pipeline.commit().await.unwrap();
    wait_until("worker to take the commit", || pipeline.queued() == 0).await;
    pipeline.add(doc(json!({"content": "一"}))).await.unwrap();
    let producer = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move { pipeline.add(doc(json!({"content": "二"}))).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    pipeline.close();
    assert!(matches!(producer.await.unwrap(), Err(SuggestError::Closed(_))));
    assert_eq!(pipeline.queued(), 0);
    assert!(!pipeline.is_alive());
    assert!(matches!(pipeline.commit().await, Err(SuggestError::Closed(_))));
}

/// Tokenizes like `ScriptTokenizer` but fails on any text containing the marker.
struct FailsOn(&'static str);

impl Tokenizer for FailsOn {
    fn tokenize(&self, text: &str, field: &str, lang: Option<&str>) -> suggest_core::Result<Vec<Token>> {
        if text.contains(self.0) {
            return Err(SuggestError::Parse(format!("cannot tokenize '{text}'")));
        }
        ScriptTokenizer.tokenize(text, field, lang)
    }
}

#[tokio::test]
async fn documents_that_fail_to_tokenize_are_skipped_and_the_worker_survives() {
    let analyzer = Arc::new(Analyzer::new(
        Arc::new(FailsOn("boom")),
        NormalizerChain::new(vec![Arc::new(LowerCaseNormalizer)]),
        ReadingConverterChain::new(vec![Arc::new(RomajiReadingConverter)], 10),
    ));
    let suggester = Suggester::new(config(), Arc::new(MemoryBackend::new()), analyzer).unwrap();
    assert!(suggester.create_if_nothing().await.unwrap());
    let pipeline = suggester.start_pipeline();

    pipeline.add(doc(json!({"content": "boom rust"}))).await.unwrap();
    pipeline.add(doc(json!({"content": "rust"}))).await.unwrap();
    pipeline.add(doc(json!({"content": "tokio"}))).await.unwrap();
    pipeline.commit().await.unwrap();
    wait_until("pipeline to drain", || pipeline.processed() == 4).await;
    assert!(pipeline.is_alive());

    let response = suggester.suggest(&SuggestRequest::new("")).await.unwrap();
    let mut words = response.words.clone();
    words.sort();
    assert_eq!(words, vec!["rust", "tokio"]);
    assert!(response.items.iter().all(|item| item.doc_freq() == 1));
    suggester.shutdown();
}

#[tokio::test]
async fn closing_mid_drain_releases_the_log_being_replayed() {
    let backend = Arc::new(GatedBackend::new());
    let mut config = config();
    config.pipeline.max_queued_requests = 1;
    let suggester = suggester_on(backend.clone(), config).await;
    let replicator = suggester.start_replicator();
    let pipeline = suggester.start_pipeline();

    // The worker parks on the gated refresh, so the replicator's second add blocks.
    pipeline.commit().await.unwrap();
    wait_until("worker to take the commit", || pipeline.queued() == 0).await;
    let log = Arc::new(MemoryTranslog::new("translog-9"));
    log.append(&LogEntry::add(1, &doc(json!({"content": "一"}))).unwrap());
    log.append(&LogEntry::add(2, &doc(json!({"content": "二"}))).unwrap());
    replicator.enqueue(log.clone()).unwrap();
    wait_until("replicator to block on the pipeline", || {
        pipeline.queued() == 1 && replicator.state() == ReplicatorState::Draining
    })
    .await;
    assert_eq!(replicator.queued(), 0);
    assert_eq!(log.ref_count(), 1);

    replicator.close();
    wait_until("in-flight log to be released", || log.ref_count() == 0).await;
    assert_eq!(replicator.stats().logs, 0);
}

#[tokio::test]
async fn replicator_replays_logs_and_skips_unknown_ops() {
    let (suggester, _) = suggester().await;
    let replicator = suggester.start_replicator();
    let pipeline = suggester.start_pipeline();

    let log = Arc::new(MemoryTranslog::new("translog-1"));
    log.append(&LogEntry::add(1, &doc(json!({"content": "rust エンジン"}))).unwrap());
    log.append(&LogEntry { op: 42, version: 2, payload: b"{}".to_vec() });
    log.append(&LogEntry::delete_by_query(3, &DeleteFilter::QueryString("text:rust".into())).unwrap());
    log.append(&LogEntry::commit(4));
    replicator.enqueue(log.clone()).unwrap();

    wait_until("log to be drained", || replicator.stats().logs == 1).await;
    wait_until("pipeline to drain", || pipeline.processed() == 3).await;
    let stats = replicator.stats();
    assert_eq!(stats.entries, 3);
    assert_eq!(stats.anomalies, 1);
    assert_eq!(log.ref_count(), 0);
    wait_until("replicator to idle", || replicator.state() == ReplicatorState::Idle).await;

    let words = suggester.suggest(&SuggestRequest::new("")).await.unwrap().words;
    assert_eq!(words, vec!["エンジン"]);

    replicator.close();
    assert_eq!(replicator.state(), ReplicatorState::Closed);
    assert!(matches!(replicator.enqueue(log), Err(SuggestError::Closed(_))));
}

#[tokio::test]
async fn file_translog_reads_frames_and_tolerates_a_torn_tail() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("translog-7.log");
    let filter = DeleteFilter::Query(QueryExpr::term("kinds", "document"));
    FileTranslog::append(
        &path,
        &[
            LogEntry::add(1, &doc(json!({"content": "x"}))).unwrap(),
            LogEntry::delete_by_query(2, &filter).unwrap(),
            LogEntry::commit(3),
        ],
    )
    .unwrap();
    {
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[0, 0]).unwrap();
    }

    let log = FileTranslog::open(&path).unwrap();
    assert_eq!(log.name(), "translog-7.log");
    let mut cursor = log.cursor().unwrap();
    let mut ops = Vec::new();
    while let Some(entry) = cursor.next_entry().unwrap() {
        if entry.operation() == Some(Operation::DeleteByQuery) {
            assert_eq!(entry.filter().unwrap(), filter);
        }
        ops.push((entry.operation(), entry.version));
    }
    assert_eq!(
        ops,
        vec![(Some(Operation::Add), 1), (Some(Operation::DeleteByQuery), 2), (Some(Operation::Commit), 3)]
    );
    assert!(FileTranslog::open(dir.path().join("missing.log")).is_err());
}
