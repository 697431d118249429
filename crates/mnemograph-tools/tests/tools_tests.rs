//! End-to-end tests for the tool surface: dispatcher behavior, envelopes,
//! and the full workspace → rebuild → query → memory → coordination flows
//! against the in-memory stores and a real temp-dir workspace.

use mnemograph_core::{estimate_tokens, Envelope, Settings};
use mnemograph_graph::store::GraphStore;
use mnemograph_graph::summary::NoSummarizer;
use mnemograph_graph::MemoryGraph;
use mnemograph_retrieval::{HashEmbedder, MemoryVectorStore};
use mnemograph_tools::{Engines, ToolContext, ToolRegistry};
use serde_json::{json, Value};
use std::sync::Arc;

struct Harness {
    registry: ToolRegistry,
    engines: Arc<Engines>,
    _dir: tempfile::TempDir,
}

impl Harness {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(
            dir.path().join("src/a.ts"),
            "export function hello(){ return 1 }\n",
        )
        .unwrap();
        let engines = Engines::new(
            Settings::default(),
            Arc::new(MemoryGraph::new()),
            Arc::new(MemoryVectorStore::new()),
            Arc::new(HashEmbedder::default()),
            Arc::new(NoSummarizer),
        );
        engines.sessions.register("test");
        engines
            .sessions
            .set_workspace("test", dir.path().to_str().unwrap(), None, Some("demo"))
            .unwrap();
        Self {
            registry: ToolRegistry::with_defaults(),
            engines,
            _dir: dir,
        }
    }

    async fn call(&self, name: &str, args: Value) -> Envelope {
        self.registry
            .call_tool(ToolContext::new(self.engines.clone(), "test"), name, args)
            .await
    }

    async fn rebuild_full(&self) -> Envelope {
        self.call("graph_rebuild", json!({ "mode": "full" })).await
    }

    fn workspace(&self) -> &std::path::Path {
        self._dir.path()
    }

    fn write_source(&self, rel: &str, content: &str) {
        let path = self.workspace().join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }
}

fn data<'a>(envelope: &'a Envelope) -> &'a Value {
    envelope.data.as_ref().expect("envelope has data")
}

// ===========================================================================
// Dispatcher
// ===========================================================================

#[tokio::test]
async fn unknown_tool_yields_tool_not_found() {
    let h = Harness::new();
    let envelope = h.call("nonexistent_tool", json!({})).await;
    assert!(!envelope.ok);
    assert_eq!(envelope.error_code.as_deref(), Some("TOOL_NOT_FOUND"));
    assert!(envelope.error.as_ref().unwrap().recoverable);
    assert!(envelope.hint.is_some());
}

#[tokio::test]
async fn missing_required_argument_names_the_field() {
    let h = Harness::new();
    let envelope = h.call("semantic_search", json!({})).await;
    assert!(!envelope.ok);
    assert_eq!(envelope.error_code.as_deref(), Some("INVALID_ARGUMENT"));
    assert!(envelope.summary.contains("query"));
}

#[tokio::test]
async fn synonym_arguments_map_with_a_contract_warning() {
    let h = Harness::new();
    h.rebuild_full().await;
    let envelope = h
        .call("impact_analyze", json!({ "changedFiles": ["src/a.ts"] }))
        .await;
    assert!(envelope.ok, "{}", envelope.summary);
    assert!(envelope
        .contract_warnings
        .iter()
        .any(|w| w == "mapped changedFiles -> files"));
}

#[tokio::test]
async fn every_envelope_carries_a_consistent_token_estimate() {
    let h = Harness::new();
    for (tool, args) in [
        ("tools_list", json!({})),
        ("graph_health", json!({})),
        ("nonexistent", json!({})),
    ] {
        let envelope = h.call(tool, args).await;
        assert_eq!(envelope.token_estimate, estimate_tokens(&envelope));
        assert!(!envelope.summary.is_empty());
    }
}

#[tokio::test]
async fn tools_list_covers_the_whole_surface() {
    let h = Harness::new();
    let envelope = h.call("tools_list", json!({})).await;
    assert!(envelope.ok);
    let d = data(&envelope);
    assert_eq!(d["count"], json!(39));
    let names: Vec<&str> = d["tools"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|t| t["name"].as_str())
        .collect();
    for expected in [
        "graph_query",
        "graph_rebuild",
        "graph_set_workspace",
        "graph_health",
        "diff_since",
        "semantic_search",
        "episode_add",
        "episode_recall",
        "decision_query",
        "reflect",
        "agent_claim",
        "agent_release",
        "agent_status",
        "coordination_overview",
        "context_pack",
        "index_docs",
        "search_docs",
        "contract_validate",
        "impact_analyze",
        "test_run",
    ] {
        assert!(names.contains(&expected), "missing tool {}", expected);
    }
}

#[tokio::test]
async fn contract_validate_reports_shape_without_executing() {
    let h = Harness::new();
    let envelope = h
        .call(
            "contract_validate",
            json!({
                "toolName": "impact_analyze",
                "arguments": { "changedFiles": ["a.ts"], "bogus": 1 },
            }),
        )
        .await;
    assert!(envelope.ok);
    let d = data(&envelope);
    assert_eq!(d["valid"], json!(true));
    assert!(d["extraFields"].as_array().unwrap().contains(&json!("bogus")));
    assert!(d["warnings"]
        .as_array()
        .unwrap()
        .iter()
        .any(|w| w.as_str().unwrap().contains("changedFiles -> files")));

    let invalid = h
        .call("contract_validate", json!({ "tool": "impact_analyze", "arguments": {} }))
        .await;
    assert_eq!(data(&invalid)["valid"], json!(false));
    assert!(data(&invalid)["missingRequired"]
        .as_array()
        .unwrap()
        .contains(&json!("files")));
}

// ===========================================================================
// Workspace → rebuild → health
// ===========================================================================

#[tokio::test]
async fn fresh_workspace_rebuild_reports_at_least_file_and_function() {
    let h = Harness::new();
    let rebuild = h.rebuild_full().await;
    assert!(rebuild.ok, "{}", rebuild.summary);
    let status = data(&rebuild)["status"].as_str().unwrap().to_string();
    assert!(status == "COMPLETED" || status == "QUEUED");
    assert!(data(&rebuild)["txId"].as_str().is_some());

    let health = h.call("graph_health", json!({ "projectId": "demo" })).await;
    assert!(health.ok);
    let d = data(&health);
    assert!(d["graphIndex"]["totalNodes"].as_u64().unwrap() >= 2);
    assert_eq!(d["projectId"], json!("demo"));
    assert!(d["latestTxId"].as_str().is_some());
    assert_eq!(d["driftDetected"], json!(false));
}

#[tokio::test]
async fn set_workspace_rejects_missing_directory() {
    let h = Harness::new();
    let envelope = h
        .call(
            "graph_set_workspace",
            json!({ "workspaceRoot": "/definitely/not/here" }),
        )
        .await;
    assert!(!envelope.ok);
    assert_eq!(envelope.error_code.as_deref(), Some("WORKSPACE_NOT_FOUND"));
    assert!(envelope.error.as_ref().unwrap().recoverable);
}

#[tokio::test]
async fn incremental_rebuild_then_diff_since_lists_the_modification() {
    let h = Harness::new();
    let first = h.rebuild_full().await;
    let tx1 = data(&first)["txId"].as_str().unwrap().to_string();

    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    h.write_source("src/a.ts", "export function hello(){ return 2 }\n");
    let abs = h.workspace().join("src/a.ts").display().to_string();
    let second = h
        .call(
            "graph_rebuild",
            json!({ "mode": "incremental", "changedFiles": [abs] }),
        )
        .await;
    assert!(second.ok, "{}", second.summary);

    // One new FILE version superseding the old one.
    let versions = h
        .engines
        .store
        .versions_of("demo:file:src/a.ts")
        .await
        .unwrap();
    assert_eq!(versions.len(), 2);
    assert_eq!(versions[1].valid_to, Some(versions[0].valid_from));
    assert_ne!(versions[0].tx_id, versions[1].tx_id);

    let diff = h.call("diff_since", json!({ "since": tx1 })).await;
    assert!(diff.ok);
    let modified = data(&diff)["modified"].as_array().unwrap();
    assert_eq!(modified.len(), 1);
    assert!(modified[0].as_str().unwrap().ends_with("src/a.ts"));
}

#[tokio::test]
async fn diff_since_unknown_anchor_is_recoverable() {
    let h = Harness::new();
    h.rebuild_full().await;
    let envelope = h.call("diff_since", json!({ "since": "no-such-tx" })).await;
    assert!(!envelope.ok);
    assert_eq!(
        envelope.error_code.as_deref(),
        Some("DIFF_SINCE_ANCHOR_NOT_FOUND")
    );
    assert!(envelope.error.as_ref().unwrap().recoverable);
    assert!(envelope.hint.is_some());
}

#[tokio::test]
async fn raw_cypher_against_the_memory_store_reports_unavailable() {
    let h = Harness::new();
    let envelope = h
        .call("graph_query", json!({ "query": "MATCH (n) RETURN n" }))
        .await;
    assert!(!envelope.ok);
    assert_eq!(envelope.error_code.as_deref(), Some("GRAPH_DB_UNAVAILABLE"));
    assert!(!envelope.error.as_ref().unwrap().recoverable);
}

// ===========================================================================
// Search and code intelligence
// ===========================================================================

#[tokio::test]
async fn semantic_search_finds_the_function_after_rebuild() {
    let h = Harness::new();
    h.rebuild_full().await;
    let envelope = h
        .call("semantic_search", json!({ "query": "hello", "limit": 5 }))
        .await;
    assert!(envelope.ok);
    let results = data(&envelope)["results"].as_array().unwrap();
    assert!(!results.is_empty());
    assert!(results
        .iter()
        .any(|r| r["name"].as_str() == Some("hello")));
}

#[tokio::test]
async fn code_explain_returns_source_and_neighbours() {
    let h = Harness::new();
    h.rebuild_full().await;
    let envelope = h.call("code_explain", json!({ "target": "hello" })).await;
    assert!(envelope.ok, "{}", envelope.summary);
    let d = data(&envelope);
    assert!(d["source"].as_str().unwrap().contains("return 1"));
    assert!(!d["incoming"].as_array().unwrap().is_empty());

    let missing = h.call("code_explain", json!({ "target": "nope" })).await;
    assert!(!missing.ok);
    assert_eq!(missing.error_code.as_deref(), Some("ELEMENT_NOT_FOUND"));
}

#[tokio::test]
async fn find_pattern_detects_circular_imports() {
    let h = Harness::new();
    h.write_source(
        "src/x.ts",
        "import { y } from './y'\nexport function x(){ return y() }\n",
    );
    h.write_source(
        "src/y.ts",
        "import { x } from './x'\nexport function y(){ return x() }\n",
    );
    h.rebuild_full().await;
    let envelope = h.call("find_pattern", json!({ "type": "circular" })).await;
    assert!(envelope.ok);
    assert!(data(&envelope)["count"].as_u64().unwrap() >= 1);

    let bad = h.call("find_pattern", json!({ "type": "spaghetti" })).await;
    assert!(!bad.ok);
    assert_eq!(bad.error_code.as_deref(), Some("INVALID_ARGUMENT"));
}

#[tokio::test]
async fn compact_profile_keeps_required_fields_and_truncates_arrays() {
    let h = Harness::new();
    for idx in 0..30 {
        h.write_source(
            &format!("src/module{:02}.ts", idx),
            &format!("export function handle_{:02}(){{ return {} }}\n", idx, idx),
        );
    }
    h.rebuild_full().await;
    let envelope = h
        .call(
            "semantic_search",
            json!({ "query": "handle", "limit": 30, "profile": "compact" }),
        )
        .await;
    assert!(envelope.ok);
    let d = data(&envelope);
    // Required fields survive compaction; arrays are capped at 10.
    assert!(d.get("results").is_some());
    assert!(d.get("count").is_some());
    assert!(d["results"].as_array().unwrap().len() <= 10);
    assert_eq!(envelope.token_estimate, estimate_tokens(&envelope));
}

// ===========================================================================
// Episodes and decisions
// ===========================================================================

#[tokio::test]
async fn decision_episode_requires_rationale() {
    let h = Harness::new();
    let rejected = h
        .call("episode_add", json!({ "type": "DECISION", "content": "x" }))
        .await;
    assert!(!rejected.ok);
    assert_eq!(
        rejected.error_code.as_deref(),
        Some("EPISODE_DECISION_REQUIRES_RATIONALE")
    );

    let accepted = h
        .call(
            "episode_add",
            json!({
                "type": "DECISION",
                "content": "Chose A over B",
                "metadata": { "rationale": "A simpler" },
            }),
        )
        .await;
    assert!(accepted.ok, "{}", accepted.summary);

    let decisions = h.call("decision_query", json!({ "query": "Chose A" })).await;
    assert!(decisions.ok);
    let rows = data(&decisions)["decisions"].as_array().unwrap();
    assert!(!rows.is_empty());
    assert!(rows[0]["content"].as_str().unwrap().contains("Chose A over B"));
}

#[tokio::test]
async fn episode_recall_round_trip() {
    let h = Harness::new();
    h.call(
        "episode_add",
        json!({ "type": "observation", "content": "profiled the hot path in the parser" }),
    )
    .await;
    let recall = h
        .call("episode_recall", json!({ "query": "hot path parser" }))
        .await;
    assert!(recall.ok);
    let rows = data(&recall)["episodes"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert!(rows[0]["score"].as_f64().unwrap() > 0.0);
}

// ===========================================================================
// Claims through the tool surface
// ===========================================================================

#[tokio::test]
async fn claim_conflict_release_reclaim_via_tools() {
    let h = Harness::new();
    h.rebuild_full().await;
    let target = h.workspace().join("src/a.ts").display().to_string();

    let granted = h
        .call(
            "agent_claim",
            json!({ "agentId": "A", "targetId": target, "claimType": "file", "intent": "refactor" }),
        )
        .await;
    assert!(granted.ok, "{}", granted.summary);
    let claim_id = data(&granted)["claimId"].as_str().unwrap().to_string();
    assert_eq!(data(&granted)["status"], json!("ok"));
    assert!(data(&granted)["targetVersionSHA"].as_str().is_some());

    let conflicted = h
        .call(
            "agent_claim",
            json!({ "agentId": "B", "targetId": target, "claimType": "file", "intent": "rewrite" }),
        )
        .await;
    assert!(!conflicted.ok);
    assert_eq!(conflicted.error_code.as_deref(), Some("CLAIM_CONFLICT"));
    assert_eq!(data(&conflicted)["status"], json!("CONFLICT"));
    assert_eq!(data(&conflicted)["conflict"]["agentId"], json!("A"));

    let released = h.call("agent_release", json!({ "claimId": claim_id })).await;
    assert!(released.ok);
    assert_eq!(data(&released)["released"], json!(true));

    let again = h.call("agent_release", json!({ "claimId": claim_id })).await;
    assert!(!again.ok);
    assert_eq!(data(&again)["alreadyClosed"], json!(true));

    let unknown = h.call("agent_release", json!({ "claimId": "missing" })).await;
    assert!(!unknown.ok);
    assert_eq!(unknown.error_code.as_deref(), Some("ELEMENT_NOT_FOUND"));
    assert_eq!(data(&unknown)["notFound"], json!(true));

    let reclaimed = h
        .call(
            "agent_claim",
            json!({ "agentId": "B", "targetId": target, "claimType": "file", "intent": "rewrite" }),
        )
        .await;
    assert!(reclaimed.ok);
}

#[tokio::test]
async fn code_change_invalidates_standing_claims() {
    let h = Harness::new();
    h.rebuild_full().await;
    let target = h.workspace().join("src/a.ts").display().to_string();
    let granted = h
        .call(
            "agent_claim",
            json!({ "agentId": "A", "targetId": target, "claimType": "file", "intent": "refactor" }),
        )
        .await;
    let claim_id = data(&granted)["claimId"].as_str().unwrap().to_string();

    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    h.write_source("src/a.ts", "export function hello(){ return 2 }\n");
    let abs = h.workspace().join("src/a.ts").display().to_string();
    h.call(
        "graph_rebuild",
        json!({ "mode": "incremental", "files": [abs] }),
    )
    .await;
    // The sweep normally runs as a background follow-up; run it directly so
    // the assertion is deterministic.
    h.engines.coordination.sweep_stale("demo").await.unwrap();

    let claim = h.engines.store.claim_by_id(&claim_id).await.unwrap().unwrap();
    assert!(claim.valid_to.is_some());
    assert_eq!(claim.invalidation_reason.as_deref(), Some("code_changed"));
}

// ===========================================================================
// Tasks and progress
// ===========================================================================

#[tokio::test]
async fn task_update_of_unknown_task_writes_nothing() {
    let h = Harness::new();
    let envelope = h
        .call("task_update", json!({ "taskId": "ghost", "status": "completed" }))
        .await;
    assert!(!envelope.ok);
    assert_eq!(envelope.error_code.as_deref(), Some("ELEMENT_NOT_FOUND"));
    let episodes = h
        .engines
        .store
        .episodes(&mnemograph_graph::store::EpisodeFilter {
            project_id: "demo".to_string(),
            include_sensitive: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(episodes.is_empty());
}

#[tokio::test]
async fn completing_a_task_closes_claims_and_reflects() {
    let h = Harness::new();
    h.rebuild_full().await;
    let target = h.workspace().join("src/a.ts").display().to_string();
    h.call(
        "agent_claim",
        json!({
            "agentId": "A",
            "targetId": target,
            "claimType": "file",
            "intent": "implement",
            "taskId": "task-9",
        }),
    )
    .await;

    let envelope = h
        .call("task_update", json!({ "taskId": "task-9", "status": "completed" }))
        .await;
    assert!(envelope.ok, "{}", envelope.summary);
    assert_eq!(data(&envelope)["claimsClosed"], json!(1));

    let progress = h.call("progress_query", json!({})).await;
    let tasks = data(&progress)["tasks"].as_array().unwrap();
    assert!(tasks.iter().any(|t| t["taskId"] == json!("task-9")
        && t["completed"] == json!(true)));
}

// ===========================================================================
// Context pack and docs
// ===========================================================================

#[tokio::test]
async fn context_pack_selects_code_and_names_an_entry_point() {
    let h = Harness::new();
    h.rebuild_full().await;
    let envelope = h
        .call("context_pack", json!({ "task": "change the hello function" }))
        .await;
    assert!(envelope.ok, "{}", envelope.summary);
    let d = data(&envelope);
    let core = d["coreCode"].as_array().unwrap();
    assert!(!core.is_empty());
    assert!(core[0]["source"].as_str().unwrap().contains("hello"));
    assert!(!d["plan"].as_array().unwrap().is_empty());
    assert!(envelope.summary.contains("src/a.ts") || d["summary"].as_str().is_some());
}

#[tokio::test]
async fn docs_flow_through_the_tool_surface() {
    let h = Harness::new();
    std::fs::write(
        h.workspace().join("README.md"),
        "# Guide\n\n## Setup\n\nInstall the dependencies first.\n",
    )
    .unwrap();
    let indexed = h.call("index_docs", json!({})).await;
    assert!(indexed.ok, "{}", indexed.summary);
    assert_eq!(data(&indexed)["indexed"], json!(["README.md"]));

    let search = h.call("search_docs", json!({ "query": "install" })).await;
    assert!(search.ok);
    assert!(data(&search)["count"].as_u64().unwrap() >= 1);
}
