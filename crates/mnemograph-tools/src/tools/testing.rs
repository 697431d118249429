//! Test-impact tools: impact analysis, selection, categorization, execution

use crate::args::*;
use crate::context::{require_project, ToolContext};
use crate::registry::{handler, ToolOutput, ToolSpec};
use crate::schema::{ArgSpec, ArgType, InputShape};
use mnemograph_core::{Error, FieldRule, OutputSchema, Priority, Result, WorkspaceConfig};
use mnemograph_graph::index::ProjectSnapshot;
use mnemograph_graph::model::EdgeKind;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::process::Stdio;
use std::time::Duration;

pub fn specs() -> Vec<ToolSpec> {
    vec![
        impact_spec(),
        select_spec(),
        categorize_spec(),
        run_spec(),
        suggest_spec(),
    ]
}

fn is_test_path(path: &str) -> bool {
    let lowered = path.to_ascii_lowercase();
    lowered.contains(".test.")
        || lowered.contains(".spec.")
        || lowered.contains("_test.")
        || lowered.contains("/tests/")
        || lowered.contains("/__tests__/")
        || lowered.ends_with("_test.rs")
}

/// Reverse import closure: which files (transitively) import the given set.
fn impacted_files(
    snapshot: &ProjectSnapshot,
    roots: &[String],
    max_depth: usize,
) -> Vec<(String, usize)> {
    let import_owner: HashMap<&str, &str> = snapshot
        .edges
        .iter()
        .filter(|e| e.kind == EdgeKind::Imports)
        .map(|e| (e.to.as_str(), e.from.as_str()))
        .collect();
    // target file → importer files
    let mut reverse: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in snapshot.edges.iter().filter(|e| e.kind == EdgeKind::References) {
        if let Some(owner) = import_owner.get(edge.from.as_str()) {
            reverse.entry(edge.to.as_str()).or_default().push(owner);
        }
    }

    let resolve = |input: &str| -> Option<String> {
        snapshot
            .files
            .iter()
            .find(|f| f.id == input || f.path == input || f.rel_path == input || f.path.ends_with(input))
            .map(|f| f.id.clone())
    };

    let mut depth_of: HashMap<String, usize> = HashMap::new();
    let mut queue: VecDeque<(String, usize)> = VecDeque::new();
    for root in roots {
        if let Some(id) = resolve(root) {
            depth_of.entry(id.clone()).or_insert(0);
            queue.push_back((id, 0));
        }
    }
    while let Some((node, depth)) = queue.pop_front() {
        if depth >= max_depth {
            continue;
        }
        for importer in reverse.get(node.as_str()).into_iter().flatten() {
            let importer = importer.to_string();
            if !depth_of.contains_key(&importer) {
                depth_of.insert(importer.clone(), depth + 1);
                queue.push_back((importer, depth + 1));
            }
        }
    }
    let mut out: Vec<(String, usize)> = depth_of.into_iter().collect();
    out.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
    out
}

// ---------------------------------------------------------------------------
// impact_analyze
// ---------------------------------------------------------------------------

fn impact_spec() -> ToolSpec {
    ToolSpec {
        name: "impact_analyze",
        category: "testing",
        description: "Reverse-dependency closure of a change set: every file that transitively imports the changed files.",
        input: InputShape::new(&[
            ArgSpec { name: "files", ty: ArgType::Array, required: true, description: "Changed files (paths or SCIP ids)" },
            ArgSpec { name: "depth", ty: ArgType::Number, required: false, description: "Max traversal depth (default 3)" },
        ]),
        output: OutputSchema::new(&[
            FieldRule { key: "impacted", priority: Priority::Required },
            FieldRule { key: "count", priority: Priority::Required },
            FieldRule { key: "roots", priority: Priority::Medium },
        ]),
        synonyms: &[("changedFiles", "files")],
        handler: handler(impact_analyze),
    }
}

async fn impact_analyze(ctx: ToolContext, args: Value) -> Result<ToolOutput> {
    let project = require_project(&ctx)?;
    let files = str_array(&args, "files");
    if files.is_empty() {
        return Err(Error::invalid_argument("files"));
    }
    let depth = opt_u64(&args, "depth").unwrap_or(3) as usize;
    let snapshot = ctx.engines.snapshot(&project).await?;
    let impacted = impacted_files(&snapshot, &files, depth);
    let rows: Vec<Value> = impacted
        .iter()
        .filter_map(|(id, depth)| {
            snapshot
                .file(id)
                .map(|f| json!({ "id": id, "path": f.rel_path, "depth": depth }))
        })
        .collect();
    Ok(ToolOutput::new(format!(
        "{} files impacted by {} changed files (depth ≤ {}).",
        rows.len(),
        files.len(),
        depth
    ))
    .with_data(json!({
        "roots": files,
        "impacted": rows,
        "count": rows.len(),
    })))
}

// ---------------------------------------------------------------------------
// test_select
// ---------------------------------------------------------------------------

fn select_spec() -> ToolSpec {
    ToolSpec {
        name: "test_select",
        category: "testing",
        description: "Test files worth running for a change set, from the impact closure plus name-stem matches.",
        input: InputShape::new(&[ArgSpec {
            name: "files",
            ty: ArgType::Array,
            required: true,
            description: "Changed files (paths or SCIP ids)",
        }]),
        output: OutputSchema::new(&[
            FieldRule { key: "tests", priority: Priority::Required },
            FieldRule { key: "count", priority: Priority::Required },
        ]),
        synonyms: &[("changedFiles", "files")],
        handler: handler(test_select),
    }
}

async fn test_select(ctx: ToolContext, args: Value) -> Result<ToolOutput> {
    let project = require_project(&ctx)?;
    let files = str_array(&args, "files");
    if files.is_empty() {
        return Err(Error::invalid_argument("files"));
    }
    let snapshot = ctx.engines.snapshot(&project).await?;
    let impacted: HashSet<String> = impacted_files(&snapshot, &files, 5)
        .into_iter()
        .map(|(id, _)| id)
        .collect();

    let stems: Vec<String> = files
        .iter()
        .filter_map(|f| {
            std::path::Path::new(f)
                .file_stem()
                .map(|s| s.to_string_lossy().to_ascii_lowercase())
        })
        .collect();

    let mut tests: Vec<String> = snapshot
        .files
        .iter()
        .filter(|f| is_test_path(&f.rel_path))
        .filter(|f| {
            impacted.contains(&f.id)
                || stems
                    .iter()
                    .any(|stem| f.rel_path.to_ascii_lowercase().contains(stem.as_str()))
        })
        .map(|f| f.rel_path.clone())
        .collect();
    tests.sort();
    tests.dedup();

    Ok(ToolOutput::new(format!("{} test files selected.", tests.len())).with_data(json!({
        "tests": tests,
        "count": tests.len(),
    })))
}

// ---------------------------------------------------------------------------
// test_categorize
// ---------------------------------------------------------------------------

fn categorize_spec() -> ToolSpec {
    ToolSpec {
        name: "test_categorize",
        category: "testing",
        description: "Classify the project's test files as unit, integration or e2e by path markers.",
        input: InputShape::new(&[]),
        output: OutputSchema::new(&[
            FieldRule { key: "categories", priority: Priority::Required },
            FieldRule { key: "total", priority: Priority::High },
        ]),
        synonyms: &[],
        handler: handler(test_categorize),
    }
}

async fn test_categorize(ctx: ToolContext, _args: Value) -> Result<ToolOutput> {
    let project = require_project(&ctx)?;
    let snapshot = ctx.engines.snapshot(&project).await?;
    let mut unit = Vec::new();
    let mut integration = Vec::new();
    let mut e2e = Vec::new();
    for file in snapshot.files.iter().filter(|f| is_test_path(&f.rel_path)) {
        let rel = file.rel_path.to_ascii_lowercase();
        if rel.contains("e2e") || rel.contains("end-to-end") {
            e2e.push(file.rel_path.clone());
        } else if rel.contains("/tests/") || rel.contains("integration") {
            integration.push(file.rel_path.clone());
        } else {
            unit.push(file.rel_path.clone());
        }
    }
    let total = unit.len() + integration.len() + e2e.len();
    Ok(ToolOutput::new(format!(
        "{} test files: {} unit, {} integration, {} e2e.",
        total,
        unit.len(),
        integration.len(),
        e2e.len()
    ))
    .with_data(json!({
        "categories": { "unit": unit, "integration": integration, "e2e": e2e },
        "total": total,
    })))
}

// ---------------------------------------------------------------------------
// test_run
// ---------------------------------------------------------------------------

fn run_spec() -> ToolSpec {
    ToolSpec {
        name: "test_run",
        category: "testing",
        description: "Run the configured test command with a wall-clock timeout and an output-size cap.",
        input: InputShape::new(&[ArgSpec {
            name: "command",
            ty: ArgType::String,
            required: false,
            description: "Shell command (default: testCommand from .mnemograph.json)",
        }]),
        output: OutputSchema::new(&[
            FieldRule { key: "exitCode", priority: Priority::Required },
            FieldRule { key: "passed", priority: Priority::Required },
            FieldRule { key: "output", priority: Priority::High },
            FieldRule { key: "truncated", priority: Priority::Medium },
            FieldRule { key: "durationMs", priority: Priority::Low },
        ]),
        synonyms: &[("cmd", "command")],
        handler: handler(test_run),
    }
}

async fn test_run(ctx: ToolContext, args: Value) -> Result<ToolOutput> {
    let project = require_project(&ctx)?;
    let workspace = WorkspaceConfig::load(&project.workspace_root);
    let command = opt_str(&args, "command")
        .or(workspace.test_command)
        .ok_or_else(|| Error::invalid_argument("command (no testCommand configured)"))?;

    let timeout = Duration::from_millis(ctx.engines.settings.command_timeout_ms);
    let cap = ctx.engines.settings.command_output_limit_bytes as usize;
    let started = std::time::Instant::now();

    let child = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(&command)
        .current_dir(&project.workspace_root)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    let output = match tokio::time::timeout(timeout, child).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return Err(Error::internal(format!("command failed to start: {}", e))),
        Err(_) => return Err(Error::CommandTimeout(ctx.engines.settings.command_timeout_ms)),
    };

    let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    let truncated = combined.len() > cap;
    if truncated {
        combined.truncate(cap);
    }
    let exit_code = output.status.code().unwrap_or(-1);
    let passed = output.status.success();

    let mut result = ToolOutput::new(format!(
        "Command {} with exit code {} in {} ms.",
        if passed { "passed" } else { "failed" },
        exit_code,
        started.elapsed().as_millis()
    ))
    .with_data(json!({
        "command": command,
        "exitCode": exit_code,
        "passed": passed,
        "output": combined,
        "truncated": truncated,
        "durationMs": started.elapsed().as_millis() as u64,
    }));
    if truncated {
        result = result.with_hint(format!(
            "output exceeded the {} byte cap and was truncated",
            cap
        ));
    }
    Ok(result)
}

// ---------------------------------------------------------------------------
// suggest_tests
// ---------------------------------------------------------------------------

fn suggest_spec() -> ToolSpec {
    ToolSpec {
        name: "suggest_tests",
        category: "testing",
        description: "Exported symbols of a file that no test file mentions.",
        input: InputShape::new(&[ArgSpec {
            name: "file",
            ty: ArgType::String,
            required: true,
            description: "File path (absolute, relative, or SCIP id)",
        }]),
        output: OutputSchema::new(&[
            FieldRule { key: "untested", priority: Priority::Required },
            FieldRule { key: "count", priority: Priority::Required },
            FieldRule { key: "file", priority: Priority::High },
        ]),
        synonyms: &[("path", "file")],
        handler: handler(suggest_tests),
    }
}

async fn suggest_tests(ctx: ToolContext, args: Value) -> Result<ToolOutput> {
    let project = require_project(&ctx)?;
    let file_arg = require_str(&args, "file")?;
    let snapshot = ctx.engines.snapshot(&project).await?;
    let Some(file) = snapshot
        .files
        .iter()
        .find(|f| f.id == file_arg || f.path == file_arg || f.rel_path == file_arg || f.path.ends_with(&file_arg))
    else {
        return Err(Error::ElementNotFound(file_arg));
    };

    let exported: Vec<&str> = snapshot
        .symbols
        .iter()
        .filter(|s| s.path == file.path && s.is_exported)
        .map(|s| s.name.as_str())
        .collect();

    let mut test_sources = String::new();
    for test_file in snapshot
        .files
        .iter()
        .filter(|f| is_test_path(&f.rel_path))
        .take(200)
    {
        if let Ok(source) = std::fs::read_to_string(&test_file.path) {
            test_sources.push_str(&source);
            test_sources.push('\n');
        }
    }

    let untested: Vec<&str> = exported
        .iter()
        .filter(|name| !test_sources.contains(*name))
        .copied()
        .collect();

    Ok(ToolOutput::new(format!(
        "{} of {} exported symbols in {} have no test references.",
        untested.len(),
        exported.len(),
        file.rel_path
    ))
    .with_data(json!({
        "file": file.rel_path,
        "exported": exported,
        "untested": untested,
        "count": untested.len(),
    })))
}
