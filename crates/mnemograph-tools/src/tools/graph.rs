//! Graph tools: workspace setup, rebuilds, health, diff, raw queries

use crate::args::*;
use crate::context::{require_project, ToolContext};
use crate::registry::{handler, ToolOutput, ToolSpec};
use crate::schema::{ArgSpec, ArgType, InputShape};
use mnemograph_core::{
    project_fingerprint, Error, FieldRule, OutputSchema, Priority, Result,
};
use mnemograph_graph::builder::{BuildMode, BuildRequest};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;

pub fn specs() -> Vec<ToolSpec> {
    vec![
        set_workspace_spec(),
        rebuild_spec(),
        health_spec(),
        diff_since_spec(),
        query_spec(),
    ]
}

// ---------------------------------------------------------------------------
// graph_set_workspace
// ---------------------------------------------------------------------------

fn set_workspace_spec() -> ToolSpec {
    ToolSpec {
        name: "graph_set_workspace",
        category: "graph",
        description: "Bind this session to a workspace: resolves the root, derives the project id, and scopes every later call to it.",
        input: InputShape::new(&[
            ArgSpec { name: "workspaceRoot", ty: ArgType::String, required: true, description: "Absolute path to the workspace root directory" },
            ArgSpec { name: "sourceDir", ty: ArgType::String, required: false, description: "Source directory (default <workspaceRoot>/src)" },
            ArgSpec { name: "projectId", ty: ArgType::String, required: false, description: "Project id (default: basename of workspaceRoot)" },
        ]),
        output: OutputSchema::new(&[
            FieldRule { key: "projectId", priority: Priority::Required },
            FieldRule { key: "workspaceRoot", priority: Priority::Required },
            FieldRule { key: "sourceDir", priority: Priority::High },
            FieldRule { key: "projectFingerprint", priority: Priority::Medium },
        ]),
        synonyms: &[("root", "workspaceRoot"), ("workspace", "workspaceRoot")],
        handler: handler(set_workspace),
    }
}

async fn set_workspace(ctx: ToolContext, args: Value) -> Result<ToolOutput> {
    let root = require_str(&args, "workspaceRoot")?;
    let source_dir = opt_str(&args, "sourceDir");
    let project_id = opt_str(&args, "projectId");
    let (project, old) = ctx.engines.sessions.set_workspace(
        &ctx.session_id,
        &root,
        source_dir.as_deref(),
        project_id.as_deref(),
    )?;
    if let Some(old) = old {
        if old.project_id != project.project_id {
            ctx.engines.on_workspace_changed(&old);
        }
    }
    ctx.engines
        .embeddings_ready
        .insert(project.project_id.clone(), false);
    let fingerprint = project_fingerprint(&project.workspace_root);
    Ok(ToolOutput::new(format!(
        "Session now targets project '{}' at {}.",
        project.project_id,
        project.workspace_root.display()
    ))
    .with_data(json!({
        "projectId": project.project_id,
        "workspaceRoot": project.workspace_root,
        "sourceDir": project.source_dir,
        "projectFingerprint": fingerprint,
    }))
    .with_hint("run graph_rebuild(mode='full') to build or refresh the graph"))
}

// ---------------------------------------------------------------------------
// graph_rebuild
// ---------------------------------------------------------------------------

fn rebuild_spec() -> ToolSpec {
    ToolSpec {
        name: "graph_rebuild",
        category: "graph",
        description: "Rebuild the bi-temporal code graph, fully or for a provided change set. Long rebuilds continue in the background and report QUEUED.",
        input: InputShape::new(&[
            ArgSpec { name: "mode", ty: ArgType::String, required: false, description: "'full' (default) or 'incremental'" },
            ArgSpec { name: "files", ty: ArgType::Array, required: false, description: "Changed files for incremental mode (absolute paths)" },
        ]),
        output: OutputSchema::new(&[
            FieldRule { key: "status", priority: Priority::Required },
            FieldRule { key: "txId", priority: Priority::Required },
            FieldRule { key: "projectId", priority: Priority::Required },
            FieldRule { key: "filesChanged", priority: Priority::High },
            FieldRule { key: "nodesWritten", priority: Priority::Medium },
            FieldRule { key: "superseded", priority: Priority::Medium },
            FieldRule { key: "durationMs", priority: Priority::Low },
        ]),
        synonyms: &[("changedFiles", "files")],
        handler: handler(rebuild),
    }
}

async fn rebuild(ctx: ToolContext, args: Value) -> Result<ToolOutput> {
    let project = require_project(&ctx)?;
    let mode = match opt_str(&args, "mode").as_deref() {
        None | Some("full") => BuildMode::Full,
        Some("incremental") => BuildMode::Incremental,
        Some(other) => return Err(Error::invalid_argument(format!("mode '{}'", other))),
    };
    let changed_files: Vec<PathBuf> = str_array(&args, "files").into_iter().map(PathBuf::from).collect();
    if mode == BuildMode::Incremental && changed_files.is_empty() {
        return Err(Error::invalid_argument(
            "files (incremental mode needs the changed file list)",
        ));
    }

    let tx_id = uuid::Uuid::new_v4().to_string();
    let request = BuildRequest {
        changed_files,
        agent_id: Some(ctx.agent_id(&args)),
        session_id: Some(ctx.session_id.clone()),
        tx_id: Some(tx_id.clone()),
    };

    let engines = ctx.engines.clone();
    let build_ctx = project.clone();
    let task = tokio::spawn(async move {
        let report = engines.run_rebuild(&build_ctx, mode, request).await;
        if report.is_ok() {
            let engines = engines.clone();
            let follow_ctx = build_ctx.clone();
            tokio::spawn(async move {
                engines
                    .post_rebuild(&follow_ctx, mode == BuildMode::Full)
                    .await;
            });
        }
        report
    });

    let threshold = Duration::from_millis(ctx.engines.settings.sync_rebuild_threshold_ms);
    match tokio::time::timeout(threshold, task).await {
        Ok(Ok(Ok(report))) => Ok(ToolOutput::new(format!(
            "Rebuild completed: {} of {} files changed, {} nodes written.",
            report.files_changed.len(),
            report.files_seen,
            report.nodes_written
        ))
        .with_data(json!({
            "status": "COMPLETED",
            "txId": report.tx_id,
            "projectId": report.project_id,
            "mode": report.mode,
            "filesChanged": report.files_changed,
            "filesRemoved": report.files_removed,
            "nodesWritten": report.nodes_written,
            "superseded": report.superseded,
            "durationMs": report.duration_ms,
        }))),
        Ok(Ok(Err(e))) => Err(e),
        Ok(Err(join_err)) => Err(Error::internal(format!("rebuild task failed: {}", join_err))),
        Err(_) => Ok(ToolOutput::new(
            "Rebuild is taking longer than the sync threshold and continues in the background.",
        )
        .with_data(json!({
            "status": "QUEUED",
            "txId": tx_id,
            "projectId": project.project_id,
        }))
        .with_hint("poll graph_health for latestTxId to observe completion")),
    }
}

// ---------------------------------------------------------------------------
// graph_health
// ---------------------------------------------------------------------------

fn health_spec() -> ToolSpec {
    ToolSpec {
        name: "graph_health",
        category: "graph",
        description: "Graph and index health: latest transaction, node counts, cache drift, watcher and embedding state.",
        input: InputShape::new(&[ArgSpec {
            name: "projectId",
            ty: ArgType::String,
            required: false,
            description: "Project to inspect (default: session project)",
        }]),
        output: OutputSchema::new(&[
            FieldRule { key: "projectId", priority: Priority::Required },
            FieldRule { key: "graphIndex", priority: Priority::Required },
            FieldRule { key: "latestTxId", priority: Priority::High },
            FieldRule { key: "txCount", priority: Priority::High },
            FieldRule { key: "driftDetected", priority: Priority::High },
            FieldRule { key: "memgraphNodes", priority: Priority::Medium },
            FieldRule { key: "cachedNodes", priority: Priority::Medium },
            FieldRule { key: "embeddingsReady", priority: Priority::Medium },
            FieldRule { key: "watcherState", priority: Priority::Medium },
            FieldRule { key: "pendingChanges", priority: Priority::Medium },
            FieldRule { key: "projectFingerprint", priority: Priority::Low },
            FieldRule { key: "labelCounts", priority: Priority::Low },
            FieldRule { key: "backend", priority: Priority::Low },
        ]),
        synonyms: &[],
        handler: handler(health),
    }
}

async fn health(ctx: ToolContext, args: Value) -> Result<ToolOutput> {
    let session_project = require_project(&ctx)?;
    let project_id = opt_str(&args, "projectId").unwrap_or_else(|| session_project.project_id.clone());

    let label_counts = ctx.engines.store.label_counts(&project_id).await?;
    let code_labels = ["FILE", "FUNCTION", "CLASS"];
    let memgraph_nodes: u64 = label_counts
        .iter()
        .filter(|(label, _)| code_labels.contains(&label.as_str()))
        .map(|(_, n)| n)
        .sum();
    let snapshot = ctx.engines.index.snapshot(&project_id);
    let cached_nodes = snapshot.as_ref().map(|s| s.total_nodes()).unwrap_or(0) as u64;
    let drift = cached_nodes > 0 && cached_nodes != memgraph_nodes;

    let latest_tx = ctx.engines.store.latest_tx(&project_id).await?;
    let tx_count = ctx.engines.store.tx_count(&project_id).await?;
    let embeddings_ready = ctx
        .engines
        .embeddings_ready
        .get(&project_id)
        .map(|v| *v)
        .unwrap_or(false);

    let watcher = ctx
        .engines
        .watchers
        .get(&session_project.workspace_root)
        .map(|w| w.status());
    let (watcher_state, pending) = match watcher {
        Some(status) => (json!(status.state), status.pending_changes),
        None => (json!("disabled"), 0),
    };

    let counts: Value = label_counts
        .iter()
        .map(|(label, n)| (label.clone(), json!(n)))
        .collect::<serde_json::Map<String, Value>>()
        .into();

    Ok(ToolOutput::new(format!(
        "Project '{}': {} code nodes in store, {} cached, {} transactions{}.",
        project_id,
        memgraph_nodes,
        cached_nodes,
        tx_count,
        if drift { ", drift detected" } else { "" }
    ))
    .with_data(json!({
        "projectId": project_id,
        "projectFingerprint": project_fingerprint(&session_project.workspace_root),
        "backend": ctx.engines.store.backend(),
        "latestTxId": latest_tx.map(|t| t.id),
        "txCount": tx_count,
        "memgraphNodes": memgraph_nodes,
        "cachedNodes": cached_nodes,
        "driftDetected": drift,
        "embeddingsReady": embeddings_ready,
        "watcherState": watcher_state,
        "pendingChanges": pending,
        "labelCounts": counts,
        "graphIndex": {
            "totalNodes": cached_nodes,
            "files": snapshot.as_ref().map(|s| s.files.len()).unwrap_or(0),
            "symbols": snapshot.as_ref().map(|s| s.symbols.len()).unwrap_or(0),
        },
    })))
}

// ---------------------------------------------------------------------------
// diff_since
// ---------------------------------------------------------------------------

fn diff_since_spec() -> ToolSpec {
    ToolSpec {
        name: "diff_since",
        category: "graph",
        description: "Files added, modified and removed since a GRAPH_TX anchor.",
        input: InputShape::new(&[ArgSpec {
            name: "since",
            ty: ArgType::String,
            required: true,
            description: "GRAPH_TX id from a rebuild result or graph_health",
        }]),
        output: OutputSchema::new(&[
            FieldRule { key: "added", priority: Priority::Required },
            FieldRule { key: "modified", priority: Priority::Required },
            FieldRule { key: "removed", priority: Priority::Required },
            FieldRule { key: "since", priority: Priority::High },
            FieldRule { key: "anchorTimestamp", priority: Priority::Medium },
        ]),
        synonyms: &[("txId", "since"), ("anchor", "since")],
        handler: handler(diff_since),
    }
}

async fn diff_since(ctx: ToolContext, args: Value) -> Result<ToolOutput> {
    let project = require_project(&ctx)?;
    let since = require_str(&args, "since")?;
    let Some(anchor) = ctx.engines.store.tx_by_id(&project.project_id, &since).await? else {
        return Err(Error::DiffAnchorNotFound(since));
    };
    let changes = ctx
        .engines
        .store
        .file_changes_since(&project.project_id, anchor.timestamp)
        .await?;
    Ok(ToolOutput::new(format!(
        "Since tx {}: {} added, {} modified, {} removed.",
        anchor.id,
        changes.added.len(),
        changes.modified.len(),
        changes.removed.len()
    ))
    .with_data(json!({
        "since": anchor.id,
        "anchorTimestamp": anchor.timestamp,
        "added": changes.added,
        "modified": changes.modified,
        "removed": changes.removed,
    })))
}

// ---------------------------------------------------------------------------
// graph_query
// ---------------------------------------------------------------------------

fn query_spec() -> ToolSpec {
    ToolSpec {
        name: "graph_query",
        category: "graph",
        description: "Raw Cypher escape hatch against the graph store. Prefer semantic_search for natural-language queries.",
        input: InputShape::new(&[
            ArgSpec { name: "query", ty: ArgType::String, required: true, description: "Cypher query text" },
            ArgSpec { name: "language", ty: ArgType::String, required: false, description: "Query language; only 'cypher' is supported" },
            ArgSpec { name: "params", ty: ArgType::Object, required: false, description: "Query parameters" },
            ArgSpec { name: "asOf", ty: ArgType::String, required: false, description: "RFC3339 timestamp exposed to the query as $asOf (epoch millis)" },
        ]),
        output: OutputSchema::new(&[
            FieldRule { key: "results", priority: Priority::Required },
            FieldRule { key: "count", priority: Priority::Required },
            FieldRule { key: "warnings", priority: Priority::Low },
        ]),
        synonyms: &[("cypher", "query")],
        handler: handler(graph_query),
    }
}

async fn graph_query(ctx: ToolContext, args: Value) -> Result<ToolOutput> {
    let _project = require_project(&ctx)?;
    let query = require_str(&args, "query")?;
    if let Some(language) = opt_str(&args, "language") {
        if !language.eq_ignore_ascii_case("cypher") {
            return Err(Error::invalid_argument(format!(
                "language '{}' (only 'cypher' is supported)",
                language
            )));
        }
    }
    let mut params: Vec<(String, Value)> = args
        .get("params")
        .and_then(|v| v.as_object())
        .map(|map| map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default();
    if let Some(as_of) = opt_datetime(&args, "asOf")? {
        params.push(("asOf".to_string(), json!(as_of.timestamp_millis())));
    }

    let rows = ctx.engines.store.execute_cypher(&query, &params).await?;
    let count = rows.len();
    Ok(ToolOutput::new(format!("Query returned {} rows.", count)).with_data(json!({
        "results": rows,
        "count": count,
    })))
}
