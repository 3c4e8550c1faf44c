use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;

use suggest_core::query::{BoolQuery, QueryExpr, SearchRequest, Sort};
use suggest_core::traits::{AliasAction, BulkOp, SuggestBackend};
use suggest_core::types::Record;
use suggest_core::{Kind, SuggestError, SuggestItem};
use suggest_store::TantivyBackend;

const HEAP: usize = 15_000_000;

fn rec(value: serde_json::Value) -> Record {
    value.as_object().cloned().unwrap()
}

fn item(words: &[&str], readings: &[&[&str]], kind: Kind) -> SuggestItem {
    let readings = readings.iter().map(|r| r.iter().map(|s| s.to_string()).collect()).collect();
    SuggestItem::new(words, readings, kind).with_doc_freq(1)
}

#[tokio::test]
async fn puts_are_gettable_before_refresh_and_searchable_after() {
    let backend = TantivyBackend::in_ram(HEAP);
    backend.create_index("s.1", &["s.update".into(), "s.search".into()]).await.unwrap();
    let a = item(&["検索", "エンジン"], &[&["けんさく", "kensaku"], &["enjin"]], Kind::Document);
    backend.bulk("s.update", vec![BulkOp::Put(a.to_record())]).await.unwrap();

    let got = backend.get("s.update", &[a.id().to_string()]).await.unwrap();
    assert_eq!(got.len(), 1);
    assert_eq!(SuggestItem::parse_record(&got[0]).unwrap(), a);
    assert_eq!(backend.count("s.search", &QueryExpr::All).await.unwrap(), 0);

    backend.refresh("s.update").await.unwrap();
    let hits = backend
        .search("s.search", &SearchRequest::new(QueryExpr::prefix("reading_0", "kens")))
        .await
        .unwrap();
    assert_eq!(hits.total, 1);
    assert_eq!(hits.hits[0].id, a.id());
}

#[tokio::test]
async fn overwrite_and_delete_keep_one_document_per_id() {
    let backend = TantivyBackend::in_ram(HEAP);
    backend.create_index("s.1", &[]).await.unwrap();
    backend.bulk("s.1", vec![BulkOp::Put(rec(json!({"id": "a", "text": "one"})))]).await.unwrap();
    backend.refresh("s.1").await.unwrap();
    backend.bulk("s.1", vec![BulkOp::Put(rec(json!({"id": "a", "text": "two"})))]).await.unwrap();
    backend.bulk("s.1", vec![BulkOp::Put(rec(json!({"id": "b", "text": "three"})))]).await.unwrap();
    backend.bulk("s.1", vec![BulkOp::Delete("b".into())]).await.unwrap();
    assert!(backend.get("s.1", &["b".to_string()]).await.unwrap().is_empty());
    backend.refresh("s.1").await.unwrap();

    let hits = backend.search("s.1", &SearchRequest::new(QueryExpr::All)).await.unwrap();
    assert_eq!(hits.total, 1);
    assert_eq!(hits.hits[0].source.get("text"), Some(&json!("two")));
}

#[tokio::test]
async fn records_without_id_are_reported_per_item() {
    let backend = TantivyBackend::in_ram(HEAP);
    backend.create_index("s.1", &[]).await.unwrap();
    let response = backend
        .bulk("s.1", vec![BulkOp::Put(rec(json!({"text": "orphan"}))), BulkOp::Put(rec(json!({"id": "x"})))])
        .await
        .unwrap();
    assert_eq!(response.succeeded, 1);
    assert_eq!(response.failures.len(), 1);
}

#[tokio::test]
async fn boolean_range_and_substring_queries_post_filter_exactly() {
    let backend = TantivyBackend::in_ram(HEAP);
    backend.create_index("s.1", &[]).await.unwrap();
    let ops = vec![
        BulkOp::Put(rec(json!({"id": "1", "text": "全文 検索", "timestamp": 10, "kinds": ["document"]}))),
        BulkOp::Put(rec(json!({"id": "2", "text": "検索 エンジン", "timestamp": 20, "kinds": ["query"]}))),
        BulkOp::Put(rec(json!({"id": "3", "text": "rust", "timestamp": 30, "kinds": ["user"]}))),
    ];
    backend.bulk("s.1", ops).await.unwrap();
    backend.refresh("s.1").await.unwrap();

    let old = QueryExpr::lt("timestamp", 25.0);
    assert_eq!(backend.count("s.1", &old).await.unwrap(), 2);

    let q = BoolQuery::new()
        .must(QueryExpr::contains("text", "検索"))
        .must_not(QueryExpr::term("kinds", "query"))
        .build();
    let hits = backend.search("s.1", &SearchRequest::new(q)).await.unwrap();
    assert_eq!(hits.hits.iter().map(|h| h.id.as_str()).collect::<Vec<_>>(), vec!["1"]);

    let q = BoolQuery::new().must(QueryExpr::All).must_not(old).build();
    let hits = backend
        .search("s.1", &SearchRequest::new(q).with_sort(Sort::FieldDesc("timestamp".into())))
        .await
        .unwrap();
    assert_eq!(hits.hits.iter().map(|h| h.id.as_str()).collect::<Vec<_>>(), vec!["3"]);

    assert_eq!(backend.delete_by_query("s.1", &QueryExpr::term("kinds", "document")).await.unwrap(), 1);
    backend.refresh("s.1").await.unwrap();
    assert_eq!(backend.count("s.1", &QueryExpr::All).await.unwrap(), 2);
}

#[tokio::test]
async fn ambiguous_alias_rejects_writes() {
    let backend = TantivyBackend::in_ram(HEAP);
    backend.create_index("s.1", &["s.update".into()]).await.unwrap();
    backend.create_index("s.2", &[]).await.unwrap();
    backend
        .update_aliases(&[AliasAction::Add { index: "s.2".into(), alias: "s.update".into() }])
        .await
        .unwrap();
    let err = backend.bulk("s.update", vec![BulkOp::Delete("x".into())]).await;
    assert!(matches!(err, Err(SuggestError::AliasConflict { .. })));
}

#[tokio::test]
async fn on_disk_store_survives_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let backend = TantivyBackend::open(dir.path(), HEAP).unwrap();
        backend.create_index("s.1", &["s.search".into()]).await.unwrap();
        backend.bulk("s.1", vec![BulkOp::Put(rec(json!({"id": "a", "text": "kept"})))]).await.unwrap();
        backend.refresh("s.1").await.unwrap();
        backend.create_index("s.2", &[]).await.unwrap();
        backend.delete_index("s.2").await.unwrap();
    }
    let backend = TantivyBackend::open(dir.path(), HEAP).unwrap();
    assert_eq!(backend.list_indices("s.").await.unwrap(), vec!["s.1"]);
    assert_eq!(backend.resolve_alias("s.search").await.unwrap(), vec!["s.1"]);
    let hits = backend.search("s.search", &SearchRequest::new(QueryExpr::term("text", "kept"))).await.unwrap();
    assert_eq!(hits.total, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_merges_fold_into_pending_and_committed_documents() {
    let backend = Arc::new(TantivyBackend::in_ram(HEAP));
    backend.create_index("s.1", &["s.update".into()]).await.unwrap();
    let rust = item(&["rust"], &[&["rasuto"]], Kind::Document);
    backend.bulk("s.update", vec![BulkOp::Merge(rust.clone())]).await.unwrap();
    backend.refresh("s.update").await.unwrap();

    let tasks: Vec<_> = (0..20)
        .map(|_| {
            let backend = backend.clone();
            let rust = rust.clone();
            tokio::spawn(async move { backend.bulk("s.update", vec![BulkOp::Merge(rust)]).await })
        })
        .collect();
    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap().succeeded, 1);
    }

    let got = backend.get("s.update", &[rust.id().to_string()]).await.unwrap();
    assert_eq!(SuggestItem::parse_record(&got[0]).unwrap().doc_freq(), 21);
    backend.refresh("s.update").await.unwrap();
    assert_eq!(backend.count("s.1", &QueryExpr::All).await.unwrap(), 1);
}
