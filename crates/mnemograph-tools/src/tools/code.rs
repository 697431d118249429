//! Code intelligence tools: search, explain, patterns, similarity, slices

use crate::args::*;
use crate::context::{require_project, ToolContext};
use crate::registry::{handler, ToolOutput, ToolSpec};
use crate::schema::{ArgSpec, ArgType, InputShape};
use mnemograph_core::{Error, FieldRule, OutputSchema, Priority, Result};
use mnemograph_graph::index::ProjectSnapshot;
use mnemograph_graph::model::EdgeKind;
use mnemograph_retrieval::SearchMode;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};

pub fn specs() -> Vec<ToolSpec> {
    vec![
        semantic_search_spec(),
        code_explain_spec(),
        find_pattern_spec(),
        find_similar_spec(),
        code_clusters_spec(),
        semantic_diff_spec(),
        semantic_slice_spec(),
        ref_query_spec(),
    ]
}

fn read_slice(path: &str, start: u32, end: u32) -> Result<String> {
    let source = std::fs::read_to_string(path)
        .map_err(|e| Error::ElementNotFound(format!("{} ({})", path, e)))?;
    let lines: Vec<&str> = source.lines().collect();
    let from = (start.max(1) as usize - 1).min(lines.len());
    let to = (end as usize).min(lines.len());
    Ok(lines[from..to].join("\n"))
}

/// file → files it references, derived from IMPORTS (file→import) and
/// REFERENCES (import→file) edges.
fn file_import_graph(snapshot: &ProjectSnapshot) -> HashMap<String, Vec<String>> {
    let import_owner: HashMap<&str, &str> = snapshot
        .edges
        .iter()
        .filter(|e| e.kind == EdgeKind::Imports)
        .map(|e| (e.to.as_str(), e.from.as_str()))
        .collect();
    let mut graph: HashMap<String, Vec<String>> = HashMap::new();
    for edge in snapshot.edges.iter().filter(|e| e.kind == EdgeKind::References) {
        if let Some(owner) = import_owner.get(edge.from.as_str()) {
            let targets = graph.entry(owner.to_string()).or_default();
            if !targets.contains(&edge.to) {
                targets.push(edge.to.clone());
            }
        }
    }
    graph
}

fn neighbor_rows(snapshot: &ProjectSnapshot, id: &str) -> (Vec<Value>, Vec<Value>) {
    let mut incoming = Vec::new();
    let mut outgoing = Vec::new();
    for edge in &snapshot.edges {
        if edge.to == id {
            incoming.push(json!({ "id": edge.from, "edge": edge.kind.as_type() }));
        } else if edge.from == id {
            outgoing.push(json!({ "id": edge.to, "edge": edge.kind.as_type() }));
        }
    }
    (incoming, outgoing)
}

// ---------------------------------------------------------------------------
// semantic_search
// ---------------------------------------------------------------------------

fn semantic_search_spec() -> ToolSpec {
    ToolSpec {
        name: "semantic_search",
        category: "code",
        description: "Hybrid search over the code graph: vector similarity + lexical BM25 + graph expansion, fused with reciprocal rank fusion.",
        input: InputShape::new(&[
            ArgSpec { name: "query", ty: ArgType::String, required: true, description: "Natural-language query" },
            ArgSpec { name: "mode", ty: ArgType::String, required: false, description: "'local' (symbols, default), 'global' (communities) or 'hybrid'" },
            ArgSpec { name: "limit", ty: ArgType::Number, required: false, description: "Max hits (default 10)" },
            ArgSpec { name: "asOf", ty: ArgType::String, required: false, description: "RFC3339 timestamp for temporal filtering" },
        ]),
        output: OutputSchema::new(&[
            FieldRule { key: "results", priority: Priority::Required },
            FieldRule { key: "count", priority: Priority::Required },
            FieldRule { key: "communities", priority: Priority::High },
            FieldRule { key: "mode", priority: Priority::Medium },
        ]),
        synonyms: &[("text", "query"), ("q", "query")],
        handler: handler(semantic_search),
    }
}

async fn semantic_search(ctx: ToolContext, args: Value) -> Result<ToolOutput> {
    let project = require_project(&ctx)?;
    let query = require_str(&args, "query")?;
    let mode = SearchMode::parse(opt_str(&args, "mode").as_deref());
    let limit = opt_u64(&args, "limit").unwrap_or(10) as usize;
    let as_of = opt_datetime(&args, "asOf")?;

    let result = ctx
        .engines
        .retriever
        .search(&project, &query, mode, limit, as_of)
        .await?;
    let count = result.hits.len();
    let summary = match mode {
        SearchMode::Global => format!("{} matching communities.", result.communities.len()),
        _ => format!("{} matching symbols for '{}'.", count, query),
    };
    let mut output = ToolOutput::new(summary).with_data(json!({
        "results": result.hits,
        "communities": result.communities,
        "count": count,
        "mode": mode,
    }));
    if count == 0 && result.communities.is_empty() {
        output = output.with_hint("run graph_rebuild first if the project has not been indexed yet");
    }
    Ok(output)
}

// ---------------------------------------------------------------------------
// code_explain
// ---------------------------------------------------------------------------

fn code_explain_spec() -> ToolSpec {
    ToolSpec {
        name: "code_explain",
        category: "code",
        description: "Explain one symbol: summary, source, and one-hop neighbourhood.",
        input: InputShape::new(&[ArgSpec {
            name: "target",
            ty: ArgType::String,
            required: true,
            description: "SCIP id, symbol name, or path suffix",
        }]),
        output: OutputSchema::new(&[
            FieldRule { key: "id", priority: Priority::Required },
            FieldRule { key: "summary", priority: Priority::Required },
            FieldRule { key: "name", priority: Priority::High },
            FieldRule { key: "path", priority: Priority::High },
            FieldRule { key: "source", priority: Priority::High },
            FieldRule { key: "incoming", priority: Priority::Medium },
            FieldRule { key: "outgoing", priority: Priority::Medium },
            FieldRule { key: "learnings", priority: Priority::Low },
        ]),
        synonyms: &[("symbol", "target"), ("element", "target")],
        handler: handler(code_explain),
    }
}

async fn code_explain(ctx: ToolContext, args: Value) -> Result<ToolOutput> {
    let project = require_project(&ctx)?;
    let target = require_str(&args, "target")?;
    let Some(symbol) = ctx.engines.resolve_symbol(&project, &target).await? else {
        return Err(Error::ElementNotFound(target));
    };
    let snapshot = ctx.engines.snapshot(&project).await?;
    let source = read_slice(&symbol.path, symbol.start_line, symbol.end_line).unwrap_or_default();
    let (incoming, outgoing) = neighbor_rows(&snapshot, &symbol.id);
    let learnings = ctx
        .engines
        .store
        .learnings_for(&project.project_id, std::slice::from_ref(&symbol.id))
        .await?;
    Ok(ToolOutput::new(format!(
        "{} {} in {} (lines {}-{}): {}",
        symbol.kind.label(),
        symbol.name,
        symbol.path,
        symbol.start_line,
        symbol.end_line,
        symbol.summary
    ))
    .with_data(json!({
        "id": symbol.id,
        "kind": symbol.kind.label(),
        "name": symbol.name,
        "path": symbol.path,
        "startLine": symbol.start_line,
        "endLine": symbol.end_line,
        "isExported": symbol.is_exported,
        "summary": symbol.summary,
        "source": source,
        "incoming": incoming,
        "outgoing": outgoing,
        "learnings": learnings.iter().map(|l| json!({ "content": l.content, "confidence": l.confidence })).collect::<Vec<_>>(),
    })))
}

// ---------------------------------------------------------------------------
// find_pattern
// ---------------------------------------------------------------------------

fn find_pattern_spec() -> ToolSpec {
    ToolSpec {
        name: "find_pattern",
        category: "code",
        description: "Structural patterns over the import graph: circular dependencies, hub files, orphan files.",
        input: InputShape::new(&[
            ArgSpec { name: "type", ty: ArgType::String, required: true, description: "'circular', 'hub' or 'orphan'" },
            ArgSpec { name: "threshold", ty: ArgType::Number, required: false, description: "Fan-in threshold for 'hub' (default 5)" },
        ]),
        output: OutputSchema::new(&[
            FieldRule { key: "matches", priority: Priority::Required },
            FieldRule { key: "count", priority: Priority::Required },
            FieldRule { key: "patternType", priority: Priority::High },
        ]),
        synonyms: &[("pattern", "type")],
        handler: handler(find_pattern),
    }
}

async fn find_pattern(ctx: ToolContext, args: Value) -> Result<ToolOutput> {
    let project = require_project(&ctx)?;
    let pattern = require_str(&args, "type")?;
    let snapshot = ctx.engines.snapshot(&project).await?;
    let graph = file_import_graph(&snapshot);

    let matches: Vec<Value> = match pattern.as_str() {
        "circular" => find_cycles(&graph)
            .into_iter()
            .map(|cycle| json!({ "cycle": cycle }))
            .collect(),
        "hub" => {
            let threshold = opt_u64(&args, "threshold").unwrap_or(5) as usize;
            let mut fan_in: HashMap<&str, usize> = HashMap::new();
            for targets in graph.values() {
                for target in targets {
                    *fan_in.entry(target.as_str()).or_default() += 1;
                }
            }
            let mut hubs: Vec<(&str, usize)> = fan_in
                .into_iter()
                .filter(|(_, n)| *n >= threshold)
                .collect();
            hubs.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
            hubs.into_iter()
                .map(|(id, n)| json!({ "id": id, "fanIn": n }))
                .collect()
        }
        "orphan" => {
            let referenced: HashSet<&str> = graph
                .values()
                .flatten()
                .map(|s| s.as_str())
                .collect();
            snapshot
                .files
                .iter()
                .filter(|f| !referenced.contains(f.id.as_str()) && !graph.contains_key(&f.id))
                .map(|f| json!({ "id": f.id, "path": f.rel_path }))
                .collect()
        }
        other => {
            return Err(Error::invalid_argument(format!(
                "type '{}' (expected circular, hub or orphan)",
                other
            )))
        }
    };

    let count = matches.len();
    Ok(ToolOutput::new(format!("{} '{}' pattern matches.", count, pattern)).with_data(json!({
        "patternType": pattern,
        "matches": matches,
        "count": count,
    })))
}

/// DFS cycle collection over the file import graph, capped at 20 cycles.
fn find_cycles(graph: &HashMap<String, Vec<String>>) -> Vec<Vec<String>> {
    let mut cycles: Vec<Vec<String>> = Vec::new();
    let mut done: HashSet<&str> = HashSet::new();
    let mut roots: Vec<&String> = graph.keys().collect();
    roots.sort();
    for root in roots {
        if cycles.len() >= 20 {
            break;
        }
        if done.contains(root.as_str()) {
            continue;
        }
        let mut stack: Vec<(String, Vec<String>)> = vec![(root.clone(), vec![root.clone()])];
        while let Some((node, path)) = stack.pop() {
            if cycles.len() >= 20 {
                break;
            }
            for next in graph.get(&node).into_iter().flatten() {
                if let Some(pos) = path.iter().position(|p| p == next) {
                    let mut cycle = path[pos..].to_vec();
                    cycle.push(next.clone());
                    if !cycles.contains(&cycle) {
                        cycles.push(cycle);
                    }
                } else if path.len() < 16 {
                    let mut extended = path.clone();
                    extended.push(next.clone());
                    stack.push((next.clone(), extended));
                }
            }
        }
        done.insert(root.as_str());
    }
    cycles
}

// ---------------------------------------------------------------------------
// find_similar_code
// ---------------------------------------------------------------------------

fn find_similar_spec() -> ToolSpec {
    ToolSpec {
        name: "find_similar_code",
        category: "code",
        description: "Vector neighbours of an existing symbol, ranked by summary similarity.",
        input: InputShape::new(&[
            ArgSpec { name: "target", ty: ArgType::String, required: true, description: "SCIP id or symbol name" },
            ArgSpec { name: "limit", ty: ArgType::Number, required: false, description: "Max results (default 5)" },
        ]),
        output: OutputSchema::new(&[
            FieldRule { key: "results", priority: Priority::Required },
            FieldRule { key: "count", priority: Priority::Required },
            FieldRule { key: "target", priority: Priority::High },
        ]),
        synonyms: &[("symbol", "target")],
        handler: handler(find_similar),
    }
}

async fn find_similar(ctx: ToolContext, args: Value) -> Result<ToolOutput> {
    let project = require_project(&ctx)?;
    let target = require_str(&args, "target")?;
    let limit = opt_u64(&args, "limit").unwrap_or(5) as usize;
    let Some(symbol) = ctx.engines.resolve_symbol(&project, &target).await? else {
        return Err(Error::ElementNotFound(target));
    };
    let hits = ctx.engines.retriever.similar_to(&project, &symbol, limit).await?;
    let ready = ctx
        .engines
        .embeddings_ready
        .get(&project.project_id)
        .map(|v| *v)
        .unwrap_or(false);
    let mut output = ToolOutput::new(format!(
        "{} symbols similar to {}.",
        hits.len(),
        symbol.name
    ))
    .with_data(json!({
        "target": symbol.id,
        "results": hits,
        "count": hits.len(),
    }));
    if !ready {
        output = output
            .with_hint("embeddings are still regenerating after the last rebuild; results may be partial");
    }
    Ok(output)
}

// ---------------------------------------------------------------------------
// code_clusters
// ---------------------------------------------------------------------------

fn code_clusters_spec() -> ToolSpec {
    ToolSpec {
        name: "code_clusters",
        category: "code",
        description: "Module communities detected over the import graph.",
        input: InputShape::new(&[]),
        output: OutputSchema::new(&[
            FieldRule { key: "clusters", priority: Priority::Required },
            FieldRule { key: "count", priority: Priority::Required },
        ]),
        synonyms: &[],
        handler: handler(code_clusters),
    }
}

async fn code_clusters(ctx: ToolContext, _args: Value) -> Result<ToolOutput> {
    let project = require_project(&ctx)?;
    let communities = ctx.engines.store.communities(&project.project_id).await?;
    let mut output = ToolOutput::new(format!("{} communities.", communities.len())).with_data(json!({
        "clusters": communities,
        "count": communities.len(),
    }));
    if communities.is_empty() {
        output = output.with_hint("communities are computed after a full graph_rebuild");
    }
    Ok(output)
}

// ---------------------------------------------------------------------------
// semantic_diff
// ---------------------------------------------------------------------------

fn semantic_diff_spec() -> ToolSpec {
    ToolSpec {
        name: "semantic_diff",
        category: "code",
        description: "Compare the current version of a symbol with its superseded predecessor.",
        input: InputShape::new(&[ArgSpec {
            name: "target",
            ty: ArgType::String,
            required: true,
            description: "SCIP id or symbol name",
        }]),
        output: OutputSchema::new(&[
            FieldRule { key: "changes", priority: Priority::Required },
            FieldRule { key: "current", priority: Priority::High },
            FieldRule { key: "previous", priority: Priority::High },
            FieldRule { key: "target", priority: Priority::Medium },
        ]),
        synonyms: &[("symbol", "target")],
        handler: handler(semantic_diff),
    }
}

async fn semantic_diff(ctx: ToolContext, args: Value) -> Result<ToolOutput> {
    let project = require_project(&ctx)?;
    let target = require_str(&args, "target")?;
    let Some(symbol) = ctx.engines.resolve_symbol(&project, &target).await? else {
        return Err(Error::SemanticDiffElementNotFound(target));
    };
    let versions = ctx.engines.store.versions_of(&symbol.id).await?;
    if versions.len() < 2 {
        return Err(Error::SemanticDiffElementNotFound(format!(
            "{} has no superseded version",
            symbol.id
        )));
    }
    let current = &versions[0];
    let previous = &versions[1];
    let mut changes = Vec::new();
    if current.summary != previous.summary {
        changes.push(json!({ "field": "summary", "from": previous.summary, "to": current.summary }));
    }
    if current.start_line != previous.start_line || current.end_line != previous.end_line {
        changes.push(json!({
            "field": "span",
            "from": [previous.start_line, previous.end_line],
            "to": [current.start_line, current.end_line],
        }));
    }
    if current.is_exported != previous.is_exported {
        changes.push(json!({ "field": "isExported", "from": previous.is_exported, "to": current.is_exported }));
    }
    let version_row = |node: &mnemograph_graph::model::CodeNode| {
        json!({
            "validFrom": node.valid_from,
            "validTo": node.valid_to,
            "txId": node.tx_id,
            "summary": node.summary,
            "span": [node.start_line, node.end_line],
        })
    };
    Ok(ToolOutput::new(format!(
        "{} changed in {} field(s) between its last two versions.",
        symbol.name,
        changes.len()
    ))
    .with_data(json!({
        "target": symbol.id,
        "current": version_row(current),
        "previous": version_row(previous),
        "changes": changes,
    })))
}

// ---------------------------------------------------------------------------
// semantic_slice
// ---------------------------------------------------------------------------

fn semantic_slice_spec() -> ToolSpec {
    ToolSpec {
        name: "semantic_slice",
        category: "code",
        description: "Exact source slice of a symbol plus its direct dependencies.",
        input: InputShape::new(&[ArgSpec {
            name: "target",
            ty: ArgType::String,
            required: true,
            description: "SCIP id or symbol name",
        }]),
        output: OutputSchema::new(&[
            FieldRule { key: "source", priority: Priority::Required },
            FieldRule { key: "id", priority: Priority::High },
            FieldRule { key: "path", priority: Priority::High },
            FieldRule { key: "dependencies", priority: Priority::Medium },
        ]),
        synonyms: &[("symbol", "target")],
        handler: handler(semantic_slice),
    }
}

async fn semantic_slice(ctx: ToolContext, args: Value) -> Result<ToolOutput> {
    let project = require_project(&ctx)?;
    let target = require_str(&args, "target")?;
    let Some(symbol) = ctx.engines.resolve_symbol(&project, &target).await? else {
        return Err(Error::SemanticSliceNotFound(target));
    };
    let source = read_slice(&symbol.path, symbol.start_line, symbol.end_line)
        .map_err(|_| Error::SemanticSliceNotFound(symbol.id.clone()))?;
    let snapshot = ctx.engines.snapshot(&project).await?;
    let file_id = snapshot
        .files
        .iter()
        .find(|f| f.path == symbol.path)
        .map(|f| f.id.clone());
    let dependencies: Vec<Value> = file_id
        .map(|fid| {
            snapshot
                .edges
                .iter()
                .filter(|e| e.kind == EdgeKind::Imports && e.from == fid)
                .map(|e| json!(e.to))
                .collect()
        })
        .unwrap_or_default();
    Ok(ToolOutput::new(format!(
        "Source of {} ({} lines) with {} direct imports.",
        symbol.name,
        symbol.end_line - symbol.start_line + 1,
        dependencies.len()
    ))
    .with_data(json!({
        "id": symbol.id,
        "path": symbol.path,
        "startLine": symbol.start_line,
        "endLine": symbol.end_line,
        "source": source,
        "dependencies": dependencies,
    })))
}

// ---------------------------------------------------------------------------
// ref_query
// ---------------------------------------------------------------------------

fn ref_query_spec() -> ToolSpec {
    ToolSpec {
        name: "ref_query",
        category: "code",
        description: "Incoming and outgoing references for a symbol or file.",
        input: InputShape::new(&[ArgSpec {
            name: "symbol",
            ty: ArgType::String,
            required: true,
            description: "SCIP id, symbol name, or path suffix",
        }]),
        output: OutputSchema::new(&[
            FieldRule { key: "incoming", priority: Priority::Required },
            FieldRule { key: "outgoing", priority: Priority::Required },
            FieldRule { key: "symbol", priority: Priority::High },
        ]),
        synonyms: &[("target", "symbol"), ("name", "symbol")],
        handler: handler(ref_query),
    }
}

async fn ref_query(ctx: ToolContext, args: Value) -> Result<ToolOutput> {
    let project = require_project(&ctx)?;
    let target = require_str(&args, "symbol")?;
    let snapshot = ctx.engines.snapshot(&project).await?;
    let id = if let Some(symbol) = ctx.engines.resolve_symbol(&project, &target).await? {
        symbol.id
    } else if let Some(file) = snapshot
        .files
        .iter()
        .find(|f| f.id == target || f.rel_path == target || f.path.ends_with(&target))
    {
        file.id.clone()
    } else {
        return Err(Error::ElementNotFound(target));
    };
    let (incoming, outgoing) = neighbor_rows(&snapshot, &id);
    Ok(ToolOutput::new(format!(
        "{}: {} incoming, {} outgoing references.",
        id,
        incoming.len(),
        outgoing.len()
    ))
    .with_data(json!({
        "symbol": id,
        "incoming": incoming,
        "outgoing": outgoing,
    })))
}
