//! Integration tests for the graph layer: bi-temporal rebuilds, diffs,
//! claims, episodes and docs against the in-memory store and a real
//! temp-dir workspace.

use chrono::Utc;
use mnemograph_core::ProjectContext;
use mnemograph_graph::builder::{BuildMode, BuildRequest, GraphBuilder, IgnoreSet};
use mnemograph_graph::docs;
use mnemograph_graph::model::*;
use mnemograph_graph::store::{ClaimOutcome, EpisodeFilter, GraphStore, ReleaseOutcome};
use mnemograph_graph::summary::NoSummarizer;
use mnemograph_graph::MemoryGraph;
use std::path::Path;
use std::sync::Arc;

fn workspace_with(files: &[(&str, &str)]) -> (tempfile::TempDir, ProjectContext) {
    let dir = tempfile::tempdir().unwrap();
    for (rel, content) in files {
        let path = dir.path().join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }
    let ctx = ProjectContext {
        workspace_root: dir.path().to_path_buf(),
        source_dir: dir.path().join("src"),
        project_id: "demo".to_string(),
    };
    (dir, ctx)
}

fn builder(store: &Arc<dyn GraphStore>) -> GraphBuilder {
    GraphBuilder::new(store.clone(), Arc::new(NoSummarizer))
}

fn memory_store() -> Arc<dyn GraphStore> {
    Arc::new(MemoryGraph::new())
}

async fn full_rebuild(store: &Arc<dyn GraphStore>, ctx: &ProjectContext) -> mnemograph_graph::BuildReport {
    builder(store)
        .rebuild(ctx, &IgnoreSet::default(), BuildMode::Full, BuildRequest::default())
        .await
        .unwrap()
}

// ===========================================================================
// Full rebuild (end-to-end scenario 1)
// ===========================================================================

#[tokio::test]
async fn full_rebuild_creates_file_and_function_nodes() {
    let (_dir, ctx) = workspace_with(&[("src/a.ts", "export function hello(){ return 1 }\n")]);
    let store = memory_store();
    let report = full_rebuild(&store, &ctx).await;

    assert_eq!(report.files_changed.len(), 1);
    assert!(report.nodes_written >= 2);

    let files = store.current_code_nodes("demo", &[CodeKind::File]).await.unwrap();
    assert_eq!(files.len(), 1);
    let functions = store
        .current_code_nodes("demo", &[CodeKind::Function])
        .await
        .unwrap();
    assert_eq!(functions.len(), 1);
    assert_eq!(functions[0].name, "hello");
    assert!(functions[0].summary.is_some());

    let tx = store.latest_tx("demo").await.unwrap().unwrap();
    assert_eq!(tx.mode, "full");
    assert_eq!(store.tx_count("demo").await.unwrap(), 1);
    assert_eq!(tx.files_affected.len(), 1);
}

#[tokio::test]
async fn file_paths_are_absolute_and_ids_scip_shaped() {
    let (_dir, ctx) = workspace_with(&[("src/a.ts", "export function hello(){ return 1 }\n")]);
    let store = memory_store();
    full_rebuild(&store, &ctx).await;

    for node in store.current_code_nodes("demo", &[]).await.unwrap() {
        assert!(
            Path::new(&node.path).is_absolute(),
            "non-absolute path on {}",
            node.id
        );
        assert!(node.id.starts_with("demo:"), "bad id {}", node.id);
    }
    let file = store
        .current_code_node("demo:file:src/a.ts")
        .await
        .unwrap()
        .expect("file node by scip id");
    assert!(file.content_hash.is_some());
}

#[tokio::test]
async fn rebuild_without_source_dir_fails_before_any_write() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = ProjectContext {
        workspace_root: dir.path().to_path_buf(),
        source_dir: dir.path().join("src"),
        project_id: "demo".to_string(),
    };
    let store = memory_store();
    let err = builder(&store)
        .rebuild(&ctx, &IgnoreSet::default(), BuildMode::Full, BuildRequest::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "SOURCE_DIR_NOT_FOUND");
    // No dangling GRAPH_TX.
    assert_eq!(store.tx_count("demo").await.unwrap(), 0);
}

// ===========================================================================
// Idempotence and incremental rebuilds (scenario 2)
// ===========================================================================

#[tokio::test]
async fn unchanged_source_rebuild_supersedes_nothing() {
    let (_dir, ctx) = workspace_with(&[("src/a.ts", "export function hello(){ return 1 }\n")]);
    let store = memory_store();
    full_rebuild(&store, &ctx).await;
    let second = full_rebuild(&store, &ctx).await;

    assert_eq!(second.superseded, 0);
    assert!(second.files_changed.is_empty());
    assert_eq!(store.tx_count("demo").await.unwrap(), 2);
    let versions = store.versions_of("demo:file:src/a.ts").await.unwrap();
    assert_eq!(versions.len(), 1);
}

#[tokio::test]
async fn incremental_rebuild_supersedes_changed_file() {
    let (dir, ctx) = workspace_with(&[("src/a.ts", "export function hello(){ return 1 }\n")]);
    let store = memory_store();
    let first = full_rebuild(&store, &ctx).await;

    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    std::fs::write(
        dir.path().join("src/a.ts"),
        "export function hello(){ return 2 }\n",
    )
    .unwrap();
    let report = builder(&store)
        .rebuild(
            &ctx,
            &IgnoreSet::default(),
            BuildMode::Incremental,
            BuildRequest {
                changed_files: vec![dir.path().join("src/a.ts")],
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(report.files_changed.len(), 1);
    assert!(report.superseded >= 1);

    // Exactly one current version; supersedes monotonicity holds.
    let versions = store.versions_of("demo:file:src/a.ts").await.unwrap();
    assert_eq!(versions.len(), 2);
    let current = &versions[0];
    let old = &versions[1];
    assert!(current.is_current());
    assert_eq!(old.valid_to, Some(current.valid_from));
    assert_ne!(current.tx_id, old.tx_id);

    // diff_since the first tx lists the file as modified.
    let anchor = store.tx_by_id("demo", &first.tx_id).await.unwrap().unwrap();
    let changes = store.file_changes_since("demo", anchor.timestamp).await.unwrap();
    assert_eq!(changes.modified.len(), 1);
    assert!(changes.modified[0].ends_with("src/a.ts"));
    assert!(changes.added.is_empty());
}

#[tokio::test]
async fn incremental_rebuild_of_unchanged_file_writes_nothing() {
    let (dir, ctx) = workspace_with(&[("src/a.ts", "export function hello(){ return 1 }\n")]);
    let store = memory_store();
    full_rebuild(&store, &ctx).await;

    let report = builder(&store)
        .rebuild(
            &ctx,
            &IgnoreSet::default(),
            BuildMode::Incremental,
            BuildRequest {
                changed_files: vec![dir.path().join("src/a.ts")],
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(report.files_changed.is_empty());
    assert_eq!(store.versions_of("demo:file:src/a.ts").await.unwrap().len(), 1);
}

#[tokio::test]
async fn deleted_file_is_retired_not_deleted() {
    let (dir, ctx) = workspace_with(&[
        ("src/a.ts", "export function hello(){ return 1 }\n"),
        ("src/b.ts", "export function other(){ return 2 }\n"),
    ]);
    let store = memory_store();
    full_rebuild(&store, &ctx).await;

    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    std::fs::remove_file(dir.path().join("src/b.ts")).unwrap();
    full_rebuild(&store, &ctx).await;

    assert!(store
        .current_code_node("demo:file:src/b.ts")
        .await
        .unwrap()
        .is_none());
    let versions = store.versions_of("demo:file:src/b.ts").await.unwrap();
    assert_eq!(versions.len(), 1);
    assert!(versions[0].valid_to.is_some());
}

#[tokio::test]
async fn as_of_queries_see_the_retired_version() {
    let (dir, ctx) = workspace_with(&[("src/a.ts", "export function hello(){ return 1 }\n")]);
    let store = memory_store();
    full_rebuild(&store, &ctx).await;
    let old = store
        .current_code_node("demo:file:src/a.ts")
        .await
        .unwrap()
        .unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    std::fs::write(
        dir.path().join("src/a.ts"),
        "export function hello(){ return 2 }\n",
    )
    .unwrap();
    full_rebuild(&store, &ctx).await;

    let mid = old.valid_from + chrono::Duration::milliseconds(1);
    let as_of = store
        .code_node_as_of("demo:file:src/a.ts", mid)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(as_of.content_hash, old.content_hash);
    let now = store
        .code_node_as_of("demo:file:src/a.ts", Utc::now())
        .await
        .unwrap()
        .unwrap();
    assert_ne!(now.content_hash, old.content_hash);
}

// ===========================================================================
// Import resolution
// ===========================================================================

#[tokio::test]
async fn relative_imports_resolve_to_references_edges() {
    let (_dir, ctx) = workspace_with(&[
        ("src/a.ts", "import { util } from './util'\nexport function hello(){ return util() }\n"),
        ("src/util.ts", "export function util(){ return 1 }\n"),
    ]);
    let store = memory_store();
    full_rebuild(&store, &ctx).await;

    let references = store
        .project_edges("demo", &[EdgeKind::References])
        .await
        .unwrap();
    assert!(references
        .iter()
        .any(|e| e.to == "demo:file:src/util.ts"));
    let imports = store.project_edges("demo", &[EdgeKind::Imports]).await.unwrap();
    assert!(!imports.is_empty());
}

// ===========================================================================
// Claims
// ===========================================================================

fn claim(agent: &str, target: &str) -> Claim {
    Claim {
        id: uuid::Uuid::new_v4().to_string(),
        project_id: "demo".to_string(),
        agent_id: agent.to_string(),
        session_id: "s1".to_string(),
        task_id: None,
        claim_type: ClaimType::File,
        target_id: target.to_string(),
        intent: "refactor".to_string(),
        valid_from: Utc::now(),
        valid_to: None,
        invalidation_reason: None,
        target_version_sha: None,
    }
}

#[tokio::test]
async fn second_agent_claim_conflicts_without_writing() {
    let store = memory_store();
    let first = claim("A", "demo:file:src/a.ts");
    assert!(matches!(
        store.try_create_claim(&first).await.unwrap(),
        ClaimOutcome::Created(_)
    ));

    let second = claim("B", "demo:file:src/a.ts");
    match store.try_create_claim(&second).await.unwrap() {
        ClaimOutcome::Conflict { existing } => assert_eq!(existing.agent_id, "A"),
        other => panic!("expected conflict, got {:?}", other),
    }
    assert!(store.claim_by_id(&second.id).await.unwrap().is_none());
    assert_eq!(store.active_claims("demo").await.unwrap().len(), 1);
}

#[tokio::test]
async fn release_is_terminal() {
    let store = memory_store();
    let c = claim("A", "demo:file:src/a.ts");
    store.try_create_claim(&c).await.unwrap();

    match store.close_claim(&c.id, Utc::now(), "released").await.unwrap() {
        ReleaseOutcome::Released(closed) => {
            assert_eq!(closed.invalidation_reason.as_deref(), Some("released"));
        }
        other => panic!("expected released, got {:?}", other),
    }
    assert!(matches!(
        store.close_claim(&c.id, Utc::now(), "released").await.unwrap(),
        ReleaseOutcome::AlreadyClosed(_)
    ));
    assert!(matches!(
        store.close_claim("nope", Utc::now(), "released").await.unwrap(),
        ReleaseOutcome::NotFound
    ));

    // A second agent can claim after release.
    assert!(matches!(
        store.try_create_claim(&claim("B", "demo:file:src/a.ts")).await.unwrap(),
        ClaimOutcome::Created(_)
    ));
}

#[tokio::test]
async fn rebuild_invalidates_claims_on_changed_targets() {
    let (dir, ctx) = workspace_with(&[("src/a.ts", "export function hello(){ return 1 }\n")]);
    let store = memory_store();
    full_rebuild(&store, &ctx).await;

    let c = claim("A", "demo:file:src/a.ts");
    store.try_create_claim(&c).await.unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    std::fs::write(
        dir.path().join("src/a.ts"),
        "export function hello(){ return 2 }\n",
    )
    .unwrap();
    full_rebuild(&store, &ctx).await;

    let closed = store
        .invalidate_stale_claims("demo", Utc::now(), 24)
        .await
        .unwrap();
    assert_eq!(closed.len(), 1);
    let stored = store.claim_by_id(&c.id).await.unwrap().unwrap();
    assert!(stored.valid_to.is_some());
    assert_eq!(stored.invalidation_reason.as_deref(), Some("code_changed"));
}

// ===========================================================================
// Episodes
// ===========================================================================

fn episode(agent: &str, session: &str, content: &str, sensitive: bool) -> Episode {
    Episode {
        id: uuid::Uuid::new_v4().to_string(),
        project_id: "demo".to_string(),
        agent_id: agent.to_string(),
        session_id: session.to_string(),
        task_id: None,
        episode_type: EpisodeType::Observation,
        content: content.to_string(),
        timestamp: Utc::now(),
        outcome: None,
        sensitive,
        metadata: serde_json::json!({}),
        entities: Vec::new(),
        derived_from: Vec::new(),
    }
}

#[tokio::test]
async fn episodes_chain_within_a_session() {
    let store = memory_store();
    let first = episode("A", "s1", "first", false);
    store.insert_episode(&first).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let second = episode("A", "s1", "second", false);
    store.insert_episode(&second).await.unwrap();

    let chain = store
        .edges_from(&first.id, &[EdgeKind::NextEpisode])
        .await
        .unwrap();
    assert_eq!(chain.len(), 1);
    assert_eq!(chain[0].to, second.id);

    let last = store.last_episode("demo", "A", "s1").await.unwrap().unwrap();
    assert_eq!(last.id, second.id);
}

#[tokio::test]
async fn sensitive_episodes_stay_visible_to_their_author_only() {
    let store = memory_store();
    store
        .insert_episode(&episode("A", "s1", "secret detail", true))
        .await
        .unwrap();

    let visible_to_author = store
        .episodes(&EpisodeFilter {
            project_id: "demo".to_string(),
            caller: Some("A".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(visible_to_author.len(), 1);

    let visible_to_other = store
        .episodes(&EpisodeFilter {
            project_id: "demo".to_string(),
            caller: Some("B".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(visible_to_other.is_empty());
}

// ===========================================================================
// Docs
// ===========================================================================

#[tokio::test]
async fn docs_index_creates_sections_with_relative_paths() {
    let (_dir, ctx) = workspace_with(&[
        ("src/a.ts", "export function hello(){ return 1 }\n"),
        ("README.md", "# Guide\n\nIntro.\n\n## Setup\n\nInstall things.\n"),
    ]);
    let store = memory_store();
    let report = docs::index_docs(&store, &ctx, &IgnoreSet::default(), None)
        .await
        .unwrap();
    assert_eq!(report.indexed, vec!["README.md"]);
    assert!(report.errors.is_empty());

    let sections = store.current_sections("demo").await.unwrap();
    assert!(!sections.is_empty());
    for section in &sections {
        assert_eq!(section.relative_path, "README.md");
        assert!(section.start_line.is_some());
    }

    // Unchanged re-ingest writes nothing new.
    let second = docs::index_docs(&store, &ctx, &IgnoreSet::default(), None)
        .await
        .unwrap();
    assert!(second.indexed.is_empty());
    assert_eq!(second.unchanged, vec!["README.md"]);

    let hits = docs::search_docs(&store, "demo", "install", 5).await.unwrap();
    assert!(!hits.is_empty());
    assert_eq!(hits[0].heading, "Setup");
}
