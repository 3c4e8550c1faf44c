mod common;

use std::sync::Arc;

use common::config;
use suggest_core::memory::MemoryBackend;
use suggest_core::traits::{AliasAction, SuggestBackend};
use suggest_core::SuggestError;
use suggest_engine::lifecycle::IndexLifecycle;

#[tokio::test]
async fn rollover_moves_search_to_the_new_generation() {
    let backend = Arc::new(MemoryBackend::new());
    backend.create_index("suggest.settings", &[]).await.unwrap();
    backend.create_index("other.20240101000000000", &[]).await.unwrap();
    let lifecycle = IndexLifecycle::new(backend.clone(), &config());

    assert!(lifecycle.create_if_nothing().await.unwrap());
    assert!(!lifecycle.create_if_nothing().await.unwrap());
    let first = backend.resolve_alias("suggest.search").await.unwrap();
    assert_eq!(backend.resolve_alias("suggest.update").await.unwrap(), first);
    assert!(!lifecycle.switch_index().await.unwrap());

    let next = lifecycle.create_next().await.unwrap();
    assert_ne!(vec![next.clone()], first);
    assert_eq!(backend.resolve_alias("suggest.search").await.unwrap(), first);
    assert_eq!(backend.resolve_alias("suggest.update").await.unwrap(), vec![next.clone()]);

    assert!(lifecycle.switch_index().await.unwrap());
    assert_eq!(backend.resolve_alias("suggest.search").await.unwrap(), vec![next.clone()]);

    assert_eq!(lifecycle.remove_disabled().await.unwrap(), first);
    assert_eq!(lifecycle.indices().await.unwrap(), vec![next]);
    assert!(backend.exists("suggest.settings").await.unwrap());
    assert!(backend.exists("other.20240101000000000").await.unwrap());
}

#[tokio::test]
async fn back_to_back_generations_get_distinct_names() {
    let backend = Arc::new(MemoryBackend::new());
    let lifecycle = IndexLifecycle::new(backend.clone(), &config());
    lifecycle.create_if_nothing().await.unwrap();
    let a = lifecycle.create_next().await.unwrap();
    let b = lifecycle.create_next().await.unwrap();
    assert_ne!(a, b);
    assert_eq!(lifecycle.indices().await.unwrap().len(), 3);
    assert_eq!(lifecycle.remove_disabled().await.unwrap().len(), 1);
}

#[tokio::test]
async fn switch_refuses_an_ambiguous_alias() {
    let backend = Arc::new(MemoryBackend::new());
    let lifecycle = IndexLifecycle::new(backend.clone(), &config());
    lifecycle.create_if_nothing().await.unwrap();
    let next = lifecycle.create_next().await.unwrap();
    let stray = "suggest.19990101000000000".to_string();
    backend.create_index(&stray, &[]).await.unwrap();
    backend
        .update_aliases(&[AliasAction::Add { index: stray.clone(), alias: "suggest.update".into() }])
        .await
        .unwrap();

    match lifecycle.switch_index().await {
        Err(SuggestError::AliasConflict { alias, indices }) => {
            assert_eq!(alias, "suggest.update");
            assert!(indices.contains(&next) && indices.contains(&stray));
        }
        other => panic!("expected an alias conflict, got {other:?}"),
    }
    assert!(matches!(lifecycle.create_next().await, Err(SuggestError::AliasConflict { .. })));
}
