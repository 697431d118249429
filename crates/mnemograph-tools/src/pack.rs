//! Context pack builder
//!
//! A single-call task briefing: hybrid-search seeds, interface expansion,
//! personalized-PageRank relevance propagation over an arena keyed by SCIP
//! id, then greedy slot filling against the profile budget (coreCode 40%,
//! dependencies 25%, decisions 20%, plan 10%, episodeHistory 5%).

use crate::context::ToolContext;
use mnemograph_core::{ProjectContext, Profile, Result};
use mnemograph_graph::index::ProjectSnapshot;
use mnemograph_graph::model::EdgeKind;
use mnemograph_graph::store::EpisodeFilter;
use mnemograph_retrieval::SearchMode;
use serde_json::{json, Value};
use std::collections::HashMap;

const PPR_ITERATIONS: usize = 20;
const PPR_DAMPING: f64 = 0.85;
const PPR_NODE_CAP: usize = 50;

const SLOT_CORE_CODE: f64 = 0.40;
const SLOT_DEPENDENCIES: f64 = 0.25;
const SLOT_DECISIONS: f64 = 0.20;
const SLOT_PLAN: f64 = 0.10;
const SLOT_EPISODES: f64 = 0.05;

/// Budget used when the profile is unbounded (debug).
const FALLBACK_BUDGET: usize = 4800;

#[derive(Debug, Clone)]
pub struct PackRequest {
    pub task: String,
    pub task_id: Option<String>,
    pub agent_id: Option<String>,
    pub include_decisions: bool,
    pub include_episodes: bool,
    pub include_learnings: bool,
    pub profile: Profile,
}

fn edge_weight(kind: EdgeKind) -> f64 {
    match kind {
        EdgeKind::Calls => 0.9,
        EdgeKind::Imports => 0.7,
        EdgeKind::Contains => 0.5,
        EdgeKind::AppliesTo => 0.4,
        EdgeKind::Involves => 0.3,
        _ => 0.0,
    }
}

fn json_cost(value: &Value) -> usize {
    serde_json::to_string(value).map(|s| s.len()).unwrap_or(0).div_ceil(4)
}

/// Personalized PageRank over an arena of string-keyed node records.
/// References between records are arena keys, never pointers.
fn propagate_relevance(
    seeds: &[String],
    edges: &[(String, String, EdgeKind)],
) -> Vec<(String, f64)> {
    let mut arena: Vec<String> = Vec::new();
    let mut slot: HashMap<String, usize> = HashMap::new();
    let mut intern = |arena: &mut Vec<String>, id: &String| -> usize {
        if let Some(&idx) = slot.get(id) {
            return idx;
        }
        arena.push(id.clone());
        let idx = arena.len() - 1;
        slot.insert(id.clone(), idx);
        idx
    };

    let mut adjacency: Vec<Vec<(usize, f64)>> = Vec::new();
    let mut ensure_len = |adjacency: &mut Vec<Vec<(usize, f64)>>, idx: usize| {
        while adjacency.len() <= idx {
            adjacency.push(Vec::new());
        }
    };
    for (from, to, kind) in edges {
        let weight = edge_weight(*kind);
        if weight == 0.0 {
            continue;
        }
        let from_idx = intern(&mut arena, from);
        let to_idx = intern(&mut arena, to);
        ensure_len(&mut adjacency, from_idx.max(to_idx));
        // Relevance flows both ways along an edge.
        adjacency[from_idx].push((to_idx, weight));
        adjacency[to_idx].push((from_idx, weight));
    }
    let seed_indices: Vec<usize> = seeds.iter().map(|s| intern(&mut arena, s)).collect();
    ensure_len(&mut adjacency, arena.len().saturating_sub(1));

    let n = arena.len();
    if n == 0 {
        return Vec::new();
    }
    let mut personalization = vec![0.0f64; n];
    for idx in &seed_indices {
        personalization[*idx] = 1.0 / seed_indices.len().max(1) as f64;
    }
    let out_weight: Vec<f64> = adjacency
        .iter()
        .map(|neighbors| neighbors.iter().map(|(_, w)| w).sum::<f64>())
        .collect();

    let mut scores = personalization.clone();
    for _ in 0..PPR_ITERATIONS {
        let mut next = vec![0.0f64; n];
        for (idx, neighbors) in adjacency.iter().enumerate() {
            if scores[idx] == 0.0 || out_weight[idx] == 0.0 {
                continue;
            }
            let share = scores[idx] / out_weight[idx];
            for (neighbor, weight) in neighbors {
                next[*neighbor] += share * weight;
            }
        }
        for idx in 0..n {
            scores[idx] = (1.0 - PPR_DAMPING) * personalization[idx] + PPR_DAMPING * next[idx];
        }
    }

    let mut ranked: Vec<(String, f64)> = arena
        .into_iter()
        .zip(scores)
        .filter(|(_, score)| *score > 0.0)
        .collect();
    ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    ranked.truncate(PPR_NODE_CAP);
    ranked
}

fn read_slice(path: &str, start: u32, end: u32) -> Option<String> {
    let source = std::fs::read_to_string(path).ok()?;
    let lines: Vec<&str> = source.lines().collect();
    let from = (start.max(1) as usize - 1).min(lines.len());
    let to = (end as usize).min(lines.len());
    Some(lines[from..to].join("\n"))
}

/// Expand interface-like seeds with their implementors.
fn expand_interfaces(snapshot: &ProjectSnapshot, seeds: &mut Vec<String>) {
    let mut extra = Vec::new();
    for seed in seeds.iter() {
        let Some(symbol) = snapshot.symbol(seed) else { continue };
        if !symbol.is_abstract {
            continue;
        }
        for edge in snapshot
            .edges
            .iter()
            .filter(|e| e.kind == EdgeKind::ImplementedBy && e.from == *seed)
        {
            extra.push(edge.to.clone());
        }
        // Name-based fallback: concrete symbols mentioning the interface.
        for candidate in &snapshot.symbols {
            if !candidate.is_abstract
                && candidate.id != symbol.id
                && candidate.name.contains(&symbol.name)
            {
                extra.push(candidate.id.clone());
            }
        }
    }
    for id in extra {
        if !seeds.contains(&id) {
            seeds.push(id);
        }
    }
}

pub async fn build_pack(
    ctx: &ToolContext,
    project: &ProjectContext,
    request: PackRequest,
) -> Result<Value> {
    let engines = &ctx.engines;
    let snapshot = engines.snapshot(project).await?;

    // 1-2. Seeds from hybrid retrieval, then interface expansion.
    let retrieval = engines
        .retriever
        .search(project, &request.task, SearchMode::Local, 5, None)
        .await?;
    let mut seeds: Vec<String> = retrieval.hits.iter().map(|h| h.id.clone()).collect();
    expand_interfaces(&snapshot, &mut seeds);

    // 3. Relevance propagation over code edges plus INVOLVES/APPLIES_TO.
    let mut edges: Vec<(String, String, EdgeKind)> = snapshot
        .edges
        .iter()
        .map(|e| (e.from.clone(), e.to.clone(), e.kind))
        .collect();
    for kind in [EdgeKind::Involves, EdgeKind::AppliesTo] {
        for edge in engines
            .store
            .project_edges(&project.project_id, &[kind])
            .await?
        {
            edges.push((edge.from, edge.to, kind));
        }
    }
    let ranked = propagate_relevance(&seeds, &edges);

    // 4-5. Slot filling against the profile budget.
    let budget = request.profile.budget().unwrap_or(FALLBACK_BUDGET);
    let core_budget = (budget as f64 * SLOT_CORE_CODE) as usize;
    let deps_budget = (budget as f64 * SLOT_DEPENDENCIES) as usize;
    let decisions_budget = (budget as f64 * SLOT_DECISIONS) as usize;
    let plan_budget = (budget as f64 * SLOT_PLAN) as usize;
    let episodes_budget = (budget as f64 * SLOT_EPISODES) as usize;

    let mut core_code: Vec<Value> = Vec::new();
    let mut core_cost = 0usize;
    let mut selected_ids: Vec<String> = Vec::new();
    for (id, score) in &ranked {
        let Some(symbol) = snapshot.symbol(id) else { continue };
        let Some(source) = read_slice(&symbol.path, symbol.start_line, symbol.end_line) else {
            continue;
        };
        let entry = json!({
            "id": id,
            "name": symbol.name,
            "path": symbol.path,
            "startLine": symbol.start_line,
            "endLine": symbol.end_line,
            "score": score,
            "summary": symbol.summary,
            "source": source,
        });
        let cost = json_cost(&entry);
        if core_cost + cost > core_budget && !core_code.is_empty() {
            continue;
        }
        core_cost += cost;
        selected_ids.push(id.clone());
        core_code.push(entry);
    }

    let mut dependencies: Vec<Value> = Vec::new();
    let mut deps_cost = 0usize;
    for id in &selected_ids {
        for edge in snapshot.edges.iter().filter(|e| e.from == *id || e.to == *id) {
            let other = if edge.from == *id { &edge.to } else { &edge.from };
            if selected_ids.contains(other) {
                continue;
            }
            let entry = json!({ "id": other, "edge": edge.kind.as_type(), "anchor": id });
            let cost = json_cost(&entry);
            if deps_cost + cost > deps_budget {
                break;
            }
            deps_cost += cost;
            dependencies.push(entry);
        }
    }

    // 6. Blocking claims from other agents against selected nodes.
    let me = request.agent_id.clone().unwrap_or_default();
    let blockers: Vec<Value> = engines
        .store
        .active_claims(&project.project_id)
        .await?
        .into_iter()
        .filter(|c| c.agent_id != me && selected_ids.contains(&c.target_id))
        .map(|c| {
            json!({
                "claimId": c.id,
                "agentId": c.agent_id,
                "targetId": c.target_id,
                "intent": c.intent,
                "since": c.valid_from,
            })
        })
        .collect();

    // 7. Decisions and learnings scoped to the selected entities.
    let mut decisions: Vec<Value> = Vec::new();
    if request.include_decisions {
        let mut cost = 0usize;
        for entry in engines
            .episodes
            .decision_query(project, request.agent_id.as_deref(), &request.task, &selected_ids, 10)
            .await?
        {
            let row = json!({
                "id": entry.episode.id,
                "content": entry.episode.content,
                "rationale": entry.episode.metadata.get("rationale")
                    .or_else(|| entry.episode.metadata.get("reason")),
                "timestamp": entry.episode.timestamp,
                "score": entry.score,
            });
            let row_cost = json_cost(&row);
            if cost + row_cost > decisions_budget {
                break;
            }
            cost += row_cost;
            decisions.push(row);
        }
    }

    let mut learnings: Vec<Value> = Vec::new();
    if request.include_learnings {
        for learning in engines
            .store
            .learnings_for(&project.project_id, &selected_ids)
            .await?
        {
            learnings.push(json!({
                "content": learning.content,
                "confidence": learning.confidence,
                "appliesTo": learning.applies_to,
            }));
        }
    }

    let mut episode_history: Vec<Value> = Vec::new();
    if request.include_episodes {
        let mut cost = 0usize;
        for episode in engines
            .store
            .episodes(&EpisodeFilter {
                project_id: project.project_id.clone(),
                task_id: request.task_id.clone(),
                limit: Some(10),
                include_sensitive: false,
                caller: request.agent_id.clone(),
                ..Default::default()
            })
            .await?
        {
            let row = json!({
                "type": episode.episode_type.as_str(),
                "content": episode.content,
                "timestamp": episode.timestamp,
            });
            let row_cost = json_cost(&row);
            if cost + row_cost > episodes_budget {
                break;
            }
            cost += row_cost;
            episode_history.push(row);
        }
    }

    // 8. Plan and summary around the entry point.
    let entry_point = core_code
        .first()
        .and_then(|c| c.get("path"))
        .and_then(|p| p.as_str())
        .unwrap_or("the workspace");
    let mut plan: Vec<String> = vec![format!("start from {}", entry_point)];
    for entry in core_code.iter().skip(1).take(3) {
        if let Some(name) = entry.get("name").and_then(|n| n.as_str()) {
            plan.push(format!("review {}", name));
        }
    }
    if !blockers.is_empty() {
        plan.push(format!("resolve {} blocking claims first", blockers.len()));
    }
    plan.truncate(plan_budget.max(1));

    let summary = format!(
        "Task '{}' centers on {}. {} relevant code slices selected{}{}.",
        request.task,
        entry_point,
        core_code.len(),
        if decisions.is_empty() {
            String::new()
        } else {
            format!(", {} prior decisions attached", decisions.len())
        },
        if blockers.is_empty() {
            String::new()
        } else {
            format!(", {} blocking claims present", blockers.len())
        },
    );

    Ok(json!({
        "summary": summary,
        "task": request.task,
        "seeds": seeds,
        "coreCode": core_code,
        "dependencies": dependencies,
        "decisions": decisions,
        "learnings": learnings,
        "episodeHistory": episode_history,
        "blockers": blockers,
        "plan": plan,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ppr_favors_seed_neighbourhood() {
        let edges = vec![
            ("a".to_string(), "b".to_string(), EdgeKind::Calls),
            ("b".to_string(), "c".to_string(), EdgeKind::Calls),
            ("x".to_string(), "y".to_string(), EdgeKind::Calls),
        ];
        let ranked = propagate_relevance(&["a".to_string()], &edges);
        let score_of = |id: &str| {
            ranked
                .iter()
                .find(|(n, _)| n == id)
                .map(|(_, s)| *s)
                .unwrap_or(0.0)
        };
        assert!(score_of("a") > 0.0);
        assert!(score_of("b") > score_of("y"));
    }

    #[test]
    fn ppr_empty_seeds_is_empty() {
        assert!(propagate_relevance(&[], &[]).is_empty());
    }
}
