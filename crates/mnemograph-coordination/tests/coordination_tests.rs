//! Integration tests for the coordination engine: claim lifecycle,
//! conflicts, task completion, stale sweeps.

use mnemograph_coordination::{ClaimRequest, ClaimResult, CoordinationEngine};
use mnemograph_core::ProjectContext;
use mnemograph_graph::store::{GraphStore, ReleaseOutcome};
use mnemograph_graph::MemoryGraph;
use std::sync::Arc;

fn setup() -> (CoordinationEngine, Arc<dyn GraphStore>, ProjectContext) {
    let store: Arc<dyn GraphStore> = Arc::new(MemoryGraph::new());
    let engine = CoordinationEngine::new(store.clone());
    let ctx = ProjectContext {
        workspace_root: std::env::temp_dir(),
        source_dir: std::env::temp_dir(),
        project_id: "demo".to_string(),
    };
    (engine, store, ctx)
}

fn request(agent: &str, target: &str) -> ClaimRequest {
    ClaimRequest {
        agent_id: agent.to_string(),
        session_id: "s1".to_string(),
        task_id: Some("task-1".to_string()),
        claim_type: "file".to_string(),
        target_id: target.to_string(),
        intent: "refactor".to_string(),
    }
}

#[tokio::test]
async fn claim_conflict_release_reclaim_lifecycle() {
    let (engine, _store, ctx) = setup();

    let first = engine.claim(&ctx, request("A", "demo:file:src/a.ts")).await.unwrap();
    let claim_id = match first {
        ClaimResult::Ok { claim_id, .. } => claim_id,
        other => panic!("expected ok, got {:?}", other),
    };

    match engine.claim(&ctx, request("B", "demo:file:src/a.ts")).await.unwrap() {
        ClaimResult::Conflict { conflict } => {
            assert_eq!(conflict.agent_id, "A");
            assert_eq!(conflict.intent, "refactor");
        }
        other => panic!("expected conflict, got {:?}", other),
    }

    match engine.release(&claim_id).await.unwrap() {
        ReleaseOutcome::Released(claim) => {
            assert_eq!(claim.invalidation_reason.as_deref(), Some("released"));
        }
        other => panic!("expected released, got {:?}", other),
    }
    assert!(matches!(
        engine.release(&claim_id).await.unwrap(),
        ReleaseOutcome::AlreadyClosed(_)
    ));
    assert!(matches!(
        engine.release("missing").await.unwrap(),
        ReleaseOutcome::NotFound
    ));

    assert!(matches!(
        engine.claim(&ctx, request("B", "demo:file:src/a.ts")).await.unwrap(),
        ClaimResult::Ok { .. }
    ));
}

#[tokio::test]
async fn reclaim_by_holder_is_idempotent() {
    let (engine, _store, ctx) = setup();
    let first = match engine.claim(&ctx, request("A", "demo:file:src/a.ts")).await.unwrap() {
        ClaimResult::Ok { claim_id, .. } => claim_id,
        other => panic!("expected ok, got {:?}", other),
    };
    let second = match engine.claim(&ctx, request("A", "demo:file:src/a.ts")).await.unwrap() {
        ClaimResult::Ok { claim_id, .. } => claim_id,
        other => panic!("expected ok, got {:?}", other),
    };
    assert_eq!(first, second);
    assert_eq!(engine.overview(&ctx).await.unwrap().active_claims.len(), 1);
}

#[tokio::test]
async fn invalid_claim_type_is_rejected() {
    let (engine, _store, ctx) = setup();
    let mut bad = request("A", "demo:file:src/a.ts");
    bad.claim_type = "module".to_string();
    let err = engine.claim(&ctx, bad).await.unwrap_err();
    assert_eq!(err.code(), "INVALID_ARGUMENT");
}

#[tokio::test]
async fn completing_a_task_closes_its_claims() {
    let (engine, store, ctx) = setup();
    engine.claim(&ctx, request("A", "demo:file:src/a.ts")).await.unwrap();
    engine.claim(&ctx, request("A", "demo:file:src/b.ts")).await.unwrap();

    let closed = engine.complete_task(&ctx, "task-1").await.unwrap();
    assert_eq!(closed.len(), 2);
    for claim in &closed {
        assert_eq!(claim.invalidation_reason.as_deref(), Some("task_completed"));
    }
    assert!(store.active_claims("demo").await.unwrap().is_empty());
}

#[tokio::test]
async fn agent_status_partitions_active_and_closed() {
    let (engine, _store, ctx) = setup();
    let id = match engine.claim(&ctx, request("A", "demo:file:src/a.ts")).await.unwrap() {
        ClaimResult::Ok { claim_id, .. } => claim_id,
        other => panic!("expected ok, got {:?}", other),
    };
    engine.claim(&ctx, request("A", "demo:file:src/b.ts")).await.unwrap();
    engine.release(&id).await.unwrap();

    let status = engine.agent_status(&ctx, "A").await.unwrap();
    assert_eq!(status.active_claims.len(), 1);
    assert_eq!(status.closed_claims.len(), 1);

    let overview = engine.overview(&ctx).await.unwrap();
    assert_eq!(overview.by_agent.get("A"), Some(&1));
}
