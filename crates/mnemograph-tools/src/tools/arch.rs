//! Architecture tools: layering validation and structural suggestions

use crate::args::*;
use crate::context::{require_project, ToolContext};
use crate::registry::{handler, ToolOutput, ToolSpec};
use crate::schema::{ArgSpec, ArgType, InputShape};
use mnemograph_core::{Error, FieldRule, OutputSchema, Priority, Result};
use mnemograph_graph::model::EdgeKind;
use serde_json::{json, Value};
use std::collections::HashMap;

pub fn specs() -> Vec<ToolSpec> {
    vec![validate_spec(), suggest_spec()]
}

fn validate_spec() -> ToolSpec {
    ToolSpec {
        name: "arch_validate",
        category: "architecture",
        description: "Validate layering rules (forbidden path-prefix dependencies) and report import cycles.",
        input: InputShape::new(&[ArgSpec {
            name: "rules",
            ty: ArgType::Array,
            required: false,
            description: "Rules like {\"forbid\": {\"from\": \"src/ui\", \"to\": \"src/db\"}}",
        }]),
        output: OutputSchema::new(&[
            FieldRule { key: "ok", priority: Priority::Required },
            FieldRule { key: "violations", priority: Priority::Required },
            FieldRule { key: "cycles", priority: Priority::High },
            FieldRule { key: "rulesChecked", priority: Priority::Medium },
        ]),
        synonyms: &[("constraints", "rules")],
        handler: handler(arch_validate),
    }
}

#[derive(Debug)]
struct ForbidRule {
    from: String,
    to: String,
}

fn parse_rules(args: &Value) -> Result<Vec<ForbidRule>> {
    let Some(rules) = args.get("rules").and_then(|v| v.as_array()) else {
        return Ok(Vec::new());
    };
    rules
        .iter()
        .map(|rule| {
            let forbid = rule
                .get("forbid")
                .ok_or_else(|| Error::invalid_argument("rules (each rule needs a 'forbid' object)"))?;
            let from = forbid
                .get("from")
                .and_then(|v| v.as_str())
                .ok_or_else(|| Error::invalid_argument("rules[].forbid.from"))?;
            let to = forbid
                .get("to")
                .and_then(|v| v.as_str())
                .ok_or_else(|| Error::invalid_argument("rules[].forbid.to"))?;
            Ok(ForbidRule {
                from: from.to_string(),
                to: to.to_string(),
            })
        })
        .collect()
}

async fn arch_validate(ctx: ToolContext, args: Value) -> Result<ToolOutput> {
    let project = require_project(&ctx)?;
    let rules = parse_rules(&args)?;
    let snapshot = ctx.engines.snapshot(&project).await?;
    if snapshot.files.is_empty() {
        return Err(Error::ArchEngineUnavailable(
            "no graph for this project; run graph_rebuild first".into(),
        ));
    }

    let rel_of: HashMap<&str, &str> = snapshot
        .files
        .iter()
        .map(|f| (f.id.as_str(), f.rel_path.as_str()))
        .collect();
    let import_owner: HashMap<&str, &str> = snapshot
        .edges
        .iter()
        .filter(|e| e.kind == EdgeKind::Imports)
        .map(|e| (e.to.as_str(), e.from.as_str()))
        .collect();

    let mut file_edges: Vec<(&str, &str)> = Vec::new();
    for edge in snapshot.edges.iter().filter(|e| e.kind == EdgeKind::References) {
        if let Some(owner) = import_owner.get(edge.from.as_str()) {
            if let (Some(from_rel), Some(to_rel)) =
                (rel_of.get(owner), rel_of.get(edge.to.as_str()))
            {
                file_edges.push((from_rel, to_rel));
            }
        }
    }

    let mut violations = Vec::new();
    for rule in &rules {
        for (from, to) in &file_edges {
            if from.starts_with(&rule.from) && to.starts_with(&rule.to) {
                violations.push(json!({
                    "rule": { "forbid": { "from": rule.from, "to": rule.to } },
                    "from": from,
                    "to": to,
                }));
            }
        }
    }

    // Cycles count as structural violations regardless of explicit rules.
    let mut graph: HashMap<String, Vec<String>> = HashMap::new();
    for (from, to) in &file_edges {
        graph.entry(from.to_string()).or_default().push(to.to_string());
    }
    let cycles = find_rel_cycles(&graph);

    let ok = violations.is_empty() && cycles.is_empty();
    Ok(ToolOutput::new(format!(
        "Architecture check: {} rule violations, {} import cycles.",
        violations.len(),
        cycles.len()
    ))
    .with_data(json!({
        "ok": ok,
        "violations": violations,
        "cycles": cycles,
        "rulesChecked": rules.len(),
    })))
}

fn find_rel_cycles(graph: &HashMap<String, Vec<String>>) -> Vec<Vec<String>> {
    let mut cycles = Vec::new();
    let mut keys: Vec<&String> = graph.keys().collect();
    keys.sort();
    for root in keys {
        if cycles.len() >= 10 {
            break;
        }
        let mut stack = vec![(root.clone(), vec![root.clone()])];
        while let Some((node, path)) = stack.pop() {
            for next in graph.get(&node).into_iter().flatten() {
                if let Some(pos) = path.iter().position(|p| p == next) {
                    let mut cycle = path[pos..].to_vec();
                    cycle.push(next.clone());
                    if !cycles.contains(&cycle) {
                        cycles.push(cycle);
                    }
                } else if path.len() < 12 {
                    let mut extended = path.clone();
                    extended.push(next.clone());
                    stack.push((next.clone(), extended));
                }
            }
        }
    }
    cycles
}

fn suggest_spec() -> ToolSpec {
    ToolSpec {
        name: "arch_suggest",
        category: "architecture",
        description: "Structural suggestions derived from communities, hub files and cycles.",
        input: InputShape::new(&[]),
        output: OutputSchema::new(&[
            FieldRule { key: "suggestions", priority: Priority::Required },
            FieldRule { key: "count", priority: Priority::High },
        ]),
        synonyms: &[],
        handler: handler(arch_suggest),
    }
}

async fn arch_suggest(ctx: ToolContext, _args: Value) -> Result<ToolOutput> {
    let project = require_project(&ctx)?;
    let snapshot = ctx.engines.snapshot(&project).await?;
    if snapshot.files.is_empty() {
        return Err(Error::ArchEngineUnavailable(
            "no graph for this project; run graph_rebuild first".into(),
        ));
    }
    let communities = ctx.engines.store.communities(&project.project_id).await?;

    let import_owner: HashMap<&str, &str> = snapshot
        .edges
        .iter()
        .filter(|e| e.kind == EdgeKind::Imports)
        .map(|e| (e.to.as_str(), e.from.as_str()))
        .collect();
    let mut fan_in: HashMap<&str, usize> = HashMap::new();
    let mut graph: HashMap<String, Vec<String>> = HashMap::new();
    for edge in snapshot.edges.iter().filter(|e| e.kind == EdgeKind::References) {
        *fan_in.entry(edge.to.as_str()).or_default() += 1;
        if let Some(owner) = import_owner.get(edge.from.as_str()) {
            graph
                .entry(owner.to_string())
                .or_default()
                .push(edge.to.clone());
        }
    }

    let mut suggestions: Vec<String> = Vec::new();
    let mut hubs: Vec<(&str, usize)> = fan_in.into_iter().filter(|(_, n)| *n >= 5).collect();
    hubs.sort_by(|a, b| b.1.cmp(&a.1));
    for (id, n) in hubs.into_iter().take(3) {
        suggestions.push(format!(
            "{} is imported by {} files; consider splitting it into narrower modules",
            id, n
        ));
    }
    for cycle in find_rel_cycles(&graph).into_iter().take(3) {
        suggestions.push(format!(
            "break the import cycle {}",
            cycle.join(" -> ")
        ));
    }
    for community in communities.iter().filter(|c| c.member_count == 1) {
        suggestions.push(format!(
            "community '{}' has a single member; it may belong in a neighbouring module",
            community.label
        ));
    }
    if suggestions.is_empty() {
        suggestions.push("no structural problems detected at current thresholds".to_string());
    }

    Ok(ToolOutput::new(format!("{} architecture suggestions.", suggestions.len())).with_data(
        json!({
            "suggestions": suggestions,
            "count": suggestions.len(),
        }),
    ))
}
