mod helpers;

use std::sync::Arc;

use chrono::{Duration, Utc};
use helpers::{project_dir, test_engine};
use strata::memory::search::{HitSource, SearchOptions};
use strata::memory::tier::NewMemory;
use strata::memory::types::{Category, Scope, Status, Tier};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn results_are_active_unexpired_and_in_scope() {
    let dir = tempfile::tempdir().unwrap();
    let engine = test_engine(dir.path());
    let cancel = CancellationToken::new();
    engine.set_project(Some(project_dir(dir.path(), "svc"))).unwrap();

    let add = |category, title: &'static str, scope| {
        NewMemory::new(category, title, format!("deployment notes: {title} uses blue green deploys")).scope(scope)
    };
    let global = engine.add(add(Category::Knowledge, "global deploys", Scope::Global), &cancel).await.unwrap();
    let project = engine.add(add(Category::Project, "project deploys", Scope::Project), &cancel).await.unwrap();
    let archived = engine.add(add(Category::Decision, "old deploys", Scope::Global), &cancel).await.unwrap();
    engine.archive(&archived.id).unwrap();
    let expired = engine
        .short_term()
        .add(add(Category::Note, "stale deploys", Scope::Global).expires_at(Some(Utc::now() - Duration::minutes(1))))
        .unwrap();
    let task = engine.add(add(Category::Task, "task deploys", Scope::Project), &cancel).await.unwrap();

    let all = engine.search("blue green deploys", &SearchOptions::default(), &cancel).await.unwrap();
    let ids: Vec<_> = all.iter().map(|h| h.memory.id.clone()).collect();
    assert!(ids.contains(&global.id) && ids.contains(&project.id) && ids.contains(&task.id));
    assert!(!ids.contains(&archived.id));
    assert!(!ids.contains(&expired.id));
    let now = Utc::now();
    for hit in &all {
        assert_eq!(hit.memory.status, Status::Active);
        assert!(!hit.memory.is_expired(now));
    }

    let scoped = engine
        .search("blue green deploys", &SearchOptions::default().scope(Some(Scope::Global)), &cancel)
        .await
        .unwrap();
    assert_eq!(scoped.len(), 1);
    assert_eq!(scoped[0].memory.id, global.id);

    let long_term_only = engine
        .search_tier(Tier::LongTerm, "blue green deploys", 10, &cancel)
        .await
        .unwrap();
    assert!(long_term_only.iter().all(|h| h.memory.tier == Tier::LongTerm));
    assert_eq!(long_term_only.len(), 2);
}

#[tokio::test]
async fn hits_are_ranked_and_access_is_recorded() {
    let dir = tempfile::tempdir().unwrap();
    let engine = test_engine(dir.path());
    let cancel = CancellationToken::new();
    let exact = engine
        .add(
            NewMemory::new(Category::Knowledge, "tokio runtime", "the tokio runtime drives every async task").importance(5),
            &cancel,
        )
        .await
        .unwrap();
    engine
        .add(NewMemory::new(Category::Knowledge, "threads", "worker threads are sized to the cpu count").importance(1), &cancel)
        .await
        .unwrap();

    let hits = engine.search("tokio runtime", &SearchOptions::default(), &cancel).await.unwrap();
    assert_eq!(hits[0].memory.id, exact.id);
    assert_eq!(hits[0].source, HitSource::Hybrid);
    assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));

    let row = engine.roots().stores(Scope::Global).unwrap().index.get(&exact.id).unwrap().unwrap();
    assert_eq!(row.access_count, 1);
    assert_eq!(engine.get(&exact.id).unwrap().access_count, 1);
}

#[tokio::test]
async fn embedding_outage_degrades_to_keyword_search() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = helpers::test_config(dir.path());
    config.embedding.max_attempts = 1;
    let engine = helpers::engine_with(
        config,
        strata::EngineOptions {
            embedding: Some(Arc::new(helpers::DeadEmbedding)),
            ..helpers::options()
        },
    );
    let cancel = CancellationToken::new();
    let m = engine
        .long_term()
        .add_decision("logging", "we decided on tracing with json output", Scope::Global, &cancel)
        .await
        .unwrap();
    assert_eq!(engine.stats().unwrap().pending_embeddings, 1);

    let hits = engine.search("tracing json", &SearchOptions::default(), &cancel).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].memory.id, m.id);
    assert_eq!(hits[0].source, HitSource::Keyword);
}

#[tokio::test]
async fn cancelled_search_returns_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let engine = test_engine(dir.path());
    let cancel = CancellationToken::new();
    engine
        .long_term()
        .add_knowledge("k", "cancellation stops retrieval", vec![], &cancel)
        .await
        .unwrap();
    cancel.cancel();
    let err = engine
        .search("cancellation", &SearchOptions::default(), &cancel)
        .await
        .unwrap_err();
    assert_eq!(err.kind, strata::ErrorKind::Cancelled);
}
