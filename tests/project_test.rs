mod helpers;

use helpers::{project_dir, test_engine};
use strata::memory::search::SearchOptions;
use strata::memory::tier::TierManager;
use strata::memory::types::{Scope, Tier};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn project_memories_live_in_their_own_root() {
    let dir = tempfile::tempdir().unwrap();
    let engine = test_engine(dir.path());
    let a = project_dir(dir.path(), "alpha");
    let b = project_dir(dir.path(), "beta");

    engine.set_project(Some(a.clone())).unwrap();
    let in_a = engine
        .short_term()
        .add_task("migrate", "migrate alpha to the new schema", Scope::Project)
        .unwrap();
    engine.set_project(Some(b.clone())).unwrap();
    let in_b = engine
        .short_term()
        .add_task("migrate", "migrate beta to the new schema", Scope::Project)
        .unwrap();

    assert_ne!(in_a.file_path, in_b.file_path);
    assert!(in_a.file_path.starts_with(a.join(".strata")));
    assert!(in_b.file_path.starts_with(b.join(".strata")));
    assert_eq!(in_a.project_path.as_deref(), Some(a.to_string_lossy().as_ref()));
}

#[tokio::test]
async fn switching_projects_hides_the_other_projects_memories() {
    let dir = tempfile::tempdir().unwrap();
    let engine = test_engine(dir.path());
    let cancel = CancellationToken::new();
    let a = project_dir(dir.path(), "alpha");
    let b = project_dir(dir.path(), "beta");

    engine.set_project(Some(a)).unwrap();
    engine
        .long_term()
        .add_project("stack", "alpha renders templates with askama", &cancel)
        .await
        .unwrap();
    engine
        .long_term()
        .add_knowledge("askama", "askama compiles templates at build time", vec![], &cancel)
        .await
        .unwrap();

    let hits = engine.search("askama templates", &SearchOptions::default(), &cancel).await.unwrap();
    assert_eq!(hits.len(), 2);

    engine.set_project(Some(b)).unwrap();
    let hits = engine.search("askama templates", &SearchOptions::default(), &cancel).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].memory.scope, Scope::Global);

    engine.set_project(None).unwrap();
    assert_eq!(engine.list(Tier::LongTerm).unwrap().len(), 1);
}

#[tokio::test]
async fn detect_project_walks_up_to_the_marker() {
    let dir = tempfile::tempdir().unwrap();
    let engine = test_engine(dir.path());
    let root = project_dir(dir.path(), "gamma");
    let nested = root.join("src/deep");
    std::fs::create_dir_all(&nested).unwrap();

    let detected = engine.detect_project(&nested).unwrap();
    assert_eq!(detected, root);
    assert_eq!(engine.project_root().unwrap(), Some(root.clone()));
    assert!(root.join(".strata/long_term/knowledge").is_dir());
    assert!(engine.core().load_all().unwrap().is_empty());
}
