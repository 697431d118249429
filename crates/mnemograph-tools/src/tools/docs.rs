//! Documentation tools: ingest and section search

use crate::args::*;
use crate::context::{require_project, ToolContext};
use crate::registry::{handler, ToolOutput, ToolSpec};
use crate::schema::{ArgSpec, ArgType, InputShape};
use mnemograph_core::{FieldRule, OutputSchema, Priority, Result};
use mnemograph_graph::docs;
use serde_json::{json, Value};

pub fn specs() -> Vec<ToolSpec> {
    vec![index_spec(), search_spec()]
}

fn index_spec() -> ToolSpec {
    ToolSpec {
        name: "index_docs",
        category: "docs",
        description: "Ingest Markdown into DOCUMENT/SECTION nodes; unchanged files are skipped, changed ones superseded.",
        input: InputShape::new(&[ArgSpec {
            name: "path",
            ty: ArgType::String,
            required: false,
            description: "File or subtree to ingest (default: whole workspace)",
        }]),
        output: OutputSchema::new(&[
            FieldRule { key: "indexed", priority: Priority::Required },
            FieldRule { key: "errors", priority: Priority::Required },
            FieldRule { key: "unchanged", priority: Priority::High },
            FieldRule { key: "txId", priority: Priority::Medium },
        ]),
        synonyms: &[("dir", "path")],
        handler: handler(index_docs),
    }
}

async fn index_docs(ctx: ToolContext, args: Value) -> Result<ToolOutput> {
    let project = require_project(&ctx)?;
    let ignore = ctx.engines.ignore_set(&project);
    let path = opt_str(&args, "path");
    let report =
        docs::index_docs(&ctx.engines.store, &project, &ignore, path.as_deref()).await?;

    let data = json!({
        "txId": report.tx_id,
        "indexed": report.indexed,
        "unchanged": report.unchanged,
        "errors": report.errors,
    });
    // All-errors is a failure even though the call itself went through.
    if report.indexed.is_empty() && !report.errors.is_empty() {
        return Ok(ToolOutput::failing(
            format!("All {} documents failed to index.", report.errors.len()),
            "INTERNAL_ERROR",
        )
        .with_data(data));
    }
    Ok(ToolOutput::new(format!(
        "Indexed {} documents ({} unchanged, {} errors).",
        report.indexed.len(),
        report.unchanged.len(),
        report.errors.len()
    ))
    .with_data(data))
}

fn search_spec() -> ToolSpec {
    ToolSpec {
        name: "search_docs",
        category: "docs",
        description: "Search indexed documentation sections; heading matches weigh double.",
        input: InputShape::new(&[
            ArgSpec { name: "query", ty: ArgType::String, required: true, description: "Search terms" },
            ArgSpec { name: "limit", ty: ArgType::Number, required: false, description: "Max sections (default 10)" },
        ]),
        output: OutputSchema::new(&[
            FieldRule { key: "sections", priority: Priority::Required },
            FieldRule { key: "count", priority: Priority::Required },
        ]),
        synonyms: &[("text", "query")],
        handler: handler(search_docs),
    }
}

async fn search_docs(ctx: ToolContext, args: Value) -> Result<ToolOutput> {
    let project = require_project(&ctx)?;
    let query = require_str(&args, "query")?;
    let limit = opt_u64(&args, "limit").unwrap_or(10) as usize;
    let hits = docs::search_docs(&ctx.engines.store, &project.project_id, &query, limit).await?;
    let mut output = ToolOutput::new(format!("{} matching sections.", hits.len())).with_data(json!({
        "sections": hits,
        "count": hits.len(),
    }));
    if hits.is_empty() {
        output = output.with_hint("run index_docs first if documentation has not been ingested");
    }
    Ok(output)
}
