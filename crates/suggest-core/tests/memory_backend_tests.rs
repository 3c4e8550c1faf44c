use serde_json::json;

use suggest_core::config::Config;
use suggest_core::memory::MemoryBackend;
use suggest_core::query::{QueryExpr, SearchRequest};
use suggest_core::traits::{AliasAction, BulkOp, SuggestBackend};
use suggest_core::types::{Kind, Record, SuggestItem};
use suggest_core::SuggestError;

fn rec(id: &str, text: &str) -> Record {
    json!({"id": id, "text": text}).as_object().cloned().unwrap()
}

#[tokio::test]
async fn writes_are_gettable_at_once_and_searchable_after_refresh() {
    let backend = MemoryBackend::new();
    backend.create_index("s.1", &["s.update".to_string()]).await.unwrap();
    backend
        .bulk("s.update", vec![BulkOp::Put(rec("a", "alpha")), BulkOp::Put(rec("b", "beta"))])
        .await
        .unwrap();

    let got = backend.get("s.update", &["a".to_string(), "zz".to_string()]).await.unwrap();
    assert_eq!(got.len(), 1);
    assert_eq!(backend.count("s.1", &QueryExpr::All).await.unwrap(), 0);

    backend.refresh("s.update").await.unwrap();
    let hits = backend.search("s.1", &SearchRequest::new(QueryExpr::prefix("text", "al"))).await.unwrap();
    assert_eq!(hits.total, 1);
    assert_eq!(hits.hits[0].id, "a");
}

#[tokio::test]
async fn alias_updates_are_all_or_nothing() {
    let backend = MemoryBackend::new();
    backend.create_index("s.1", &["s.search".to_string()]).await.unwrap();
    backend.create_index("s.2", &[]).await.unwrap();

    let err = backend
        .update_aliases(&[
            AliasAction::Add { index: "s.2".into(), alias: "s.search".into() },
            AliasAction::Remove { index: "s.2".into(), alias: "s.update".into() },
        ])
        .await;
    assert!(err.is_err());
    assert_eq!(backend.resolve_alias("s.search").await.unwrap(), vec!["s.1"]);

    backend
        .update_aliases(&[
            AliasAction::Add { index: "s.2".into(), alias: "s.search".into() },
            AliasAction::Remove { index: "s.1".into(), alias: "s.search".into() },
        ])
        .await
        .unwrap();
    assert_eq!(backend.resolve_alias("s.search").await.unwrap(), vec!["s.2"]);
}

#[tokio::test]
async fn writes_through_an_ambiguous_alias_fail() {
    let backend = MemoryBackend::new();
    backend.create_index("s.1", &["s.update".to_string()]).await.unwrap();
    backend.create_index("s.2", &["s.update".to_string()]).await.unwrap();
    let result = backend.bulk("s.update", vec![BulkOp::Put(rec("a", "x"))]).await;
    assert!(matches!(result, Err(SuggestError::AliasConflict { .. })));
}

#[tokio::test]
async fn delete_index_detaches_aliases() {
    let backend = MemoryBackend::new();
    backend.create_index("s.1", &["s.search".to_string()]).await.unwrap();
    backend.delete_index("s.1").await.unwrap();
    assert!(!backend.exists("s.search").await.unwrap());
    assert!(backend.list_indices("s.").await.unwrap().is_empty());
}

#[tokio::test]
async fn delete_by_query_acts_on_live_data() {
    let backend = MemoryBackend::new();
    backend.create_index("s.1", &[]).await.unwrap();
    backend
        .bulk("s.1", vec![BulkOp::Put(rec("a", "alpha")), BulkOp::Put(rec("b", "beta"))])
        .await
        .unwrap();
    backend.refresh("s.1").await.unwrap();
    let removed = backend.delete_by_query("s.1", &QueryExpr::term("text", "beta")).await.unwrap();
    assert_eq!(removed, 1);
    assert_eq!(backend.count("s.1", &QueryExpr::All).await.unwrap(), 2);
    backend.refresh("s.1").await.unwrap();
    assert_eq!(backend.count("s.1", &QueryExpr::All).await.unwrap(), 1);
}

#[test]
fn config_defaults_apply_when_section_is_missing() {
    let config = Config::from_toml_str("").unwrap();
    let suggest = config.suggest().unwrap();
    assert_eq!(suggest.id, "suggest");
    assert_eq!(suggest.search_alias(), "suggest.search");
    assert_eq!(suggest.update_alias(), "suggest.update");
    assert_eq!(suggest.pipeline.max_queued_requests, 1000);
    assert_eq!(suggest.timeouts.search_ms, 15_000);
}

#[test]
fn config_overrides_and_validation() {
    let config = Config::from_toml_str(
        r#"
        [suggest]
        id = "docs"
        [suggest.pipeline]
        bulk_size = 7
        [suggest.ranking]
        match_word_first = false
        "#,
    )
    .unwrap();
    let suggest = config.suggest().unwrap();
    assert_eq!(suggest.id, "docs");
    assert_eq!(suggest.pipeline.bulk_size, 7);
    assert_eq!(suggest.pipeline.max_queued_terms, 10_000);
    assert!(!suggest.ranking.match_word_first);

    assert!(Config::from_toml_str("[suggest]\nid = \"a.b\"").is_err());
    assert!(Config::from_toml_str("[suggest.pipeline]\nbulk_size = 0").is_err());
}

#[tokio::test]
async fn merge_folds_into_the_stored_item_or_replaces_an_unreadable_one() {
    let backend = MemoryBackend::new();
    backend.create_index("s.1", &["s.update".to_string()]).await.unwrap();
    let rust = SuggestItem::new(&["rust"], vec![vec!["rasuto".to_string()]], Kind::Document).with_doc_freq(1);
    let searched = SuggestItem::new(&["rust"], vec![], Kind::Query).with_query_freq(2);
    let response = backend
        .bulk("s.update", vec![BulkOp::Merge(rust.clone()), BulkOp::Merge(searched)])
        .await
        .unwrap();
    assert_eq!(response.succeeded, 2);

    let stored = backend.get("s.update", &[rust.id().to_string()]).await.unwrap();
    let stored = SuggestItem::parse_record(&stored[0]).unwrap();
    assert_eq!((stored.doc_freq(), stored.query_freq()), (1, 2));
    assert!(stored.has_kind(Kind::Document) && stored.has_kind(Kind::Query));

    let mut broken = Record::new();
    broken.insert("id".into(), json!(rust.id()));
    backend.bulk("s.update", vec![BulkOp::Put(broken), BulkOp::Merge(rust.clone())]).await.unwrap();
    let stored = backend.get("s.update", &[rust.id().to_string()]).await.unwrap();
    assert_eq!(SuggestItem::parse_record(&stored[0]).unwrap().doc_freq(), 1);
}
