//! Setup tools: one-call project bootstrap and assistant-instructions scaffold

use crate::args::*;
use crate::context::{require_project, ToolContext};
use crate::registry::{handler, ToolOutput, ToolSpec};
use crate::schema::{ArgSpec, ArgType, InputShape};
use mnemograph_core::{Error, FieldRule, OutputSchema, Priority, Result};
use mnemograph_graph::builder::{BuildMode, BuildRequest};
use mnemograph_graph::docs;
use serde_json::{json, Value};

pub fn specs() -> Vec<ToolSpec> {
    vec![init_spec(), copilot_spec()]
}

fn init_spec() -> ToolSpec {
    ToolSpec {
        name: "init_project_setup",
        category: "setup",
        description: "One-call bootstrap: bind the workspace, run a full rebuild, and ingest documentation.",
        input: InputShape::new(&[
            ArgSpec { name: "workspaceRoot", ty: ArgType::String, required: false, description: "Workspace root (default: MNEMOGRAPH_WORKSPACE_ROOT)" },
            ArgSpec { name: "sourceDir", ty: ArgType::String, required: false, description: "Source directory" },
            ArgSpec { name: "projectId", ty: ArgType::String, required: false, description: "Project id" },
        ]),
        output: OutputSchema::new(&[
            FieldRule { key: "steps", priority: Priority::Required },
            FieldRule { key: "projectId", priority: Priority::Required },
            FieldRule { key: "txId", priority: Priority::High },
        ]),
        synonyms: &[("root", "workspaceRoot")],
        handler: handler(init_project_setup),
    }
}

async fn init_project_setup(ctx: ToolContext, args: Value) -> Result<ToolOutput> {
    let root = opt_str(&args, "workspaceRoot")
        .or_else(|| {
            ctx.engines
                .settings
                .workspace_root
                .as_ref()
                .map(|p| p.display().to_string())
        })
        .ok_or_else(|| {
            Error::invalid_argument("workspaceRoot (none given and MNEMOGRAPH_WORKSPACE_ROOT unset)")
        })?;

    let mut steps: Vec<Value> = Vec::new();
    let (project, old) = ctx.engines.sessions.set_workspace(
        &ctx.session_id,
        &root,
        opt_str(&args, "sourceDir").as_deref(),
        opt_str(&args, "projectId").as_deref(),
    )?;
    if let Some(old) = old {
        if old.project_id != project.project_id {
            ctx.engines.on_workspace_changed(&old);
        }
    }
    steps.push(json!({ "step": "set_workspace", "ok": true, "projectId": project.project_id }));

    let report = ctx
        .engines
        .run_rebuild(
            &project,
            BuildMode::Full,
            BuildRequest {
                agent_id: Some(ctx.agent_id(&args)),
                session_id: Some(ctx.session_id.clone()),
                ..Default::default()
            },
        )
        .await?;
    steps.push(json!({
        "step": "graph_rebuild",
        "ok": true,
        "txId": report.tx_id,
        "filesChanged": report.files_changed.len(),
        "nodesWritten": report.nodes_written,
    }));
    {
        let engines = ctx.engines.clone();
        let follow_ctx = project.clone();
        tokio::spawn(async move {
            engines.post_rebuild(&follow_ctx, true).await;
        });
    }

    let ignore = ctx.engines.ignore_set(&project);
    match docs::index_docs(&ctx.engines.store, &project, &ignore, None).await {
        Ok(docs_report) => steps.push(json!({
            "step": "index_docs",
            "ok": true,
            "indexed": docs_report.indexed.len(),
            "errors": docs_report.errors.len(),
        })),
        Err(e) => steps.push(json!({ "step": "index_docs", "ok": false, "error": e.to_string() })),
    }

    Ok(ToolOutput::new(format!(
        "Project '{}' initialized: graph built ({} nodes), docs ingested.",
        project.project_id, report.nodes_written
    ))
    .with_data(json!({
        "projectId": project.project_id,
        "txId": report.tx_id,
        "steps": steps,
    })))
}

fn copilot_spec() -> ToolSpec {
    ToolSpec {
        name: "setup_copilot_instructions",
        category: "setup",
        description: "Write a minimal .github/copilot-instructions.md scaffold describing this project's tool surface.",
        input: InputShape::new(&[ArgSpec {
            name: "overwrite",
            ty: ArgType::Boolean,
            required: false,
            description: "Replace an existing file (default false)",
        }]),
        output: OutputSchema::new(&[
            FieldRule { key: "path", priority: Priority::Required },
            FieldRule { key: "written", priority: Priority::Required },
        ]),
        synonyms: &[],
        handler: handler(setup_copilot_instructions),
    }
}

async fn setup_copilot_instructions(ctx: ToolContext, args: Value) -> Result<ToolOutput> {
    let project = require_project(&ctx)?;
    let dir = project.workspace_root.join(".github");
    let path = dir.join("copilot-instructions.md");
    if path.exists() && !opt_bool(&args, "overwrite").unwrap_or(false) {
        return Ok(ToolOutput::new(format!(
            "{} already exists; pass overwrite=true to replace it.",
            path.display()
        ))
        .with_data(json!({ "path": path, "written": false })));
    }
    std::fs::create_dir_all(&dir)?;
    let content = format!(
        "# Agent instructions for {project}\n\n\
         This workspace is indexed by a code-graph and agent-memory service.\n\n\
         - Discover structure with `semantic_search` and `code_explain` instead of grepping.\n\
         - Record decisions with `episode_add(type='DECISION', metadata={{rationale: ...}})`.\n\
         - Claim files before editing them with `agent_claim`, release with `agent_release`.\n\
         - Fetch a task briefing with `context_pack` before larger changes.\n\
         - After editing, `graph_rebuild(mode='incremental', files=[...])` keeps the graph fresh.\n",
        project = project.project_id
    );
    std::fs::write(&path, content)?;
    Ok(ToolOutput::new(format!("Wrote {}.", path.display()))
        .with_data(json!({ "path": path, "written": true })))
}
