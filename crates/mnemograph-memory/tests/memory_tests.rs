//! Integration tests for the episode engine: add/recall round trips,
//! decision rationale enforcement, reflection output.

use mnemograph_core::ProjectContext;
use mnemograph_graph::model::EpisodeType;
use mnemograph_graph::store::GraphStore;
use mnemograph_graph::MemoryGraph;
use mnemograph_memory::{reflect, EpisodeEngine, EpisodeInput, RecallQuery};
use mnemograph_retrieval::{HashEmbedder, MemoryVectorStore};
use serde_json::json;
use std::sync::Arc;

fn engine() -> (EpisodeEngine, Arc<dyn GraphStore>, ProjectContext) {
    let store: Arc<dyn GraphStore> = Arc::new(MemoryGraph::new());
    let engine = EpisodeEngine::new(
        store.clone(),
        Arc::new(MemoryVectorStore::new()),
        Arc::new(HashEmbedder::default()),
    );
    let ctx = ProjectContext {
        workspace_root: std::env::temp_dir(),
        source_dir: std::env::temp_dir(),
        project_id: "demo".to_string(),
    };
    (engine, store, ctx)
}

fn input(kind: &str, content: &str) -> EpisodeInput {
    EpisodeInput {
        agent_id: "A".to_string(),
        session_id: "s1".to_string(),
        episode_type: kind.to_string(),
        content: content.to_string(),
        entities: Vec::new(),
        task_id: None,
        outcome: None,
        metadata: json!({}),
        sensitive: false,
    }
}

#[tokio::test]
async fn add_then_recall_returns_the_episode() {
    let (engine, _store, ctx) = engine();
    let added = engine
        .add(&ctx, input("observation", "checked the retry backoff logic"))
        .await
        .unwrap();

    let recalled = engine
        .recall(
            &ctx,
            Some("A"),
            RecallQuery {
                query: "retry backoff logic".to_string(),
                agent_id: None,
                task_id: None,
                types: Vec::new(),
                entities: Vec::new(),
                limit: 5,
                since: None,
            },
        )
        .await
        .unwrap();
    assert!(!recalled.is_empty());
    assert_eq!(recalled[0].episode.id, added.id);
    assert!(recalled[0].score > 0.0);
    assert!(recalled[0].vector_score > 0.0);
}

#[tokio::test]
async fn episode_type_is_normalized_from_any_casing() {
    let (engine, _store, ctx) = engine();
    let added = engine.add(&ctx, input("Test_Result", "suite green")).await.unwrap();
    assert_eq!(added.episode_type, EpisodeType::TestResult);
}

#[tokio::test]
async fn decision_without_rationale_is_rejected() {
    let (engine, store, ctx) = engine();
    let err = engine.add(&ctx, input("DECISION", "x")).await.unwrap_err();
    assert_eq!(err.code(), "EPISODE_DECISION_REQUIRES_RATIONALE");
    assert!(err.recoverable());
    // Nothing was written.
    let all = store
        .episodes(&mnemograph_graph::store::EpisodeFilter {
            project_id: "demo".to_string(),
            include_sensitive: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(all.is_empty());
}

#[tokio::test]
async fn decision_with_reason_synonym_is_accepted() {
    let (engine, _store, ctx) = engine();
    let mut decision = input("DECISION", "Chose A over B");
    decision.metadata = json!({ "reason": "A simpler" });
    assert!(engine.add(&ctx, decision).await.is_ok());
}

#[tokio::test]
async fn decision_query_finds_the_decision() {
    let (engine, _store, ctx) = engine();
    let mut decision = input("DECISION", "Chose A over B");
    decision.metadata = json!({ "rationale": "A simpler" });
    engine.add(&ctx, decision).await.unwrap();
    engine
        .add(&ctx, input("observation", "unrelated noise about parsing"))
        .await
        .unwrap();

    let hits = engine
        .decision_query(&ctx, Some("A"), "Chose A", &[], 5)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert!(hits[0].episode.content.contains("Chose A over B"));
}

#[tokio::test]
async fn recall_filters_sensitive_for_other_agents() {
    let (engine, _store, ctx) = engine();
    let mut secret = input("observation", "internal credentials rotated");
    secret.sensitive = true;
    engine.add(&ctx, secret).await.unwrap();

    let as_other = engine
        .recall(
            &ctx,
            Some("B"),
            RecallQuery {
                query: "credentials".to_string(),
                agent_id: None,
                task_id: None,
                types: Vec::new(),
                entities: Vec::new(),
                limit: 5,
                since: None,
            },
        )
        .await
        .unwrap();
    assert!(as_other.is_empty());
}

#[tokio::test]
async fn reflect_promotes_hotspots_to_learnings() {
    let (engine, store, ctx) = engine();
    // Entities must resolve; register a code node first.
    store
        .replace_version(mnemograph_graph::model::CodeNode {
            id: "demo:file:src/a.ts".to_string(),
            kind: mnemograph_graph::model::CodeKind::File,
            project_id: "demo".to_string(),
            name: "a.ts".to_string(),
            path: "/w/src/a.ts".to_string(),
            language: Some("typescript".to_string()),
            start_line: None,
            end_line: None,
            is_exported: false,
            is_abstract: false,
            summary: None,
            content_hash: Some("h".to_string()),
            valid_from: chrono::Utc::now(),
            valid_to: None,
            created_at: chrono::Utc::now(),
            tx_id: "tx".to_string(),
        })
        .await
        .unwrap();

    for idx in 0..3 {
        let mut edit = input("EDIT", &format!("edit {}", idx));
        edit.entities = vec!["demo:file:src/a.ts".to_string()];
        engine.add(&ctx, edit).await.unwrap();
    }

    let report = reflect(engine.store(), &ctx, Some("A".to_string()), None, 20)
        .await
        .unwrap();
    assert!(report.reflection_id.is_some());
    assert!(report.patterns.iter().any(|p| p.kind == "hotspot"));
    assert!(report.learnings_created >= 1);

    let learnings = store
        .learnings_for("demo", &["demo:file:src/a.ts".to_string()])
        .await
        .unwrap();
    assert!(!learnings.is_empty());
    assert!(learnings[0].confidence >= 0.7);
}
