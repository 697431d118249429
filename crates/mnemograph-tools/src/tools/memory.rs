//! Memory tools: episodes, recall, decisions, reflection

use crate::args::*;
use crate::context::{require_project, ToolContext};
use crate::registry::{handler, ToolOutput, ToolSpec};
use crate::schema::{ArgSpec, ArgType, InputShape};
use mnemograph_core::{FieldRule, OutputSchema, Priority, Result};
use mnemograph_graph::model::EpisodeType;
use mnemograph_memory::{reflect as run_reflect, EpisodeInput, RecallQuery, ScoredEpisode};
use serde_json::{json, Value};

pub fn specs() -> Vec<ToolSpec> {
    vec![add_spec(), recall_spec(), decision_spec(), reflect_spec()]
}

fn episode_row(entry: &ScoredEpisode) -> Value {
    json!({
        "id": entry.episode.id,
        "type": entry.episode.episode_type.as_str(),
        "content": entry.episode.content,
        "agentId": entry.episode.agent_id,
        "taskId": entry.episode.task_id,
        "timestamp": entry.episode.timestamp,
        "entities": entry.episode.entities,
        "outcome": entry.episode.outcome,
        "score": entry.score,
        "scores": {
            "vector": entry.vector_score,
            "recency": entry.recency,
            "entityOverlap": entry.entity_overlap,
        },
    })
}

// ---------------------------------------------------------------------------
// episode_add
// ---------------------------------------------------------------------------

fn add_spec() -> ToolSpec {
    ToolSpec {
        name: "episode_add",
        category: "memory",
        description: "Record an immutable episode (observation, decision, edit, test result, error). DECISION episodes require metadata.rationale.",
        input: InputShape::new(&[
            ArgSpec { name: "type", ty: ArgType::String, required: true, description: "OBSERVATION | DECISION | EDIT | TEST_RESULT | ERROR | REFLECTION | LEARNING (any casing)" },
            ArgSpec { name: "content", ty: ArgType::String, required: true, description: "What happened" },
            ArgSpec { name: "entities", ty: ArgType::Array, required: false, description: "Involved SCIP ids" },
            ArgSpec { name: "taskId", ty: ArgType::String, required: false, description: "Task this belongs to" },
            ArgSpec { name: "outcome", ty: ArgType::String, required: false, description: "Outcome note" },
            ArgSpec { name: "metadata", ty: ArgType::Object, required: false, description: "Free-form metadata; DECISION needs rationale (or reason)" },
            ArgSpec { name: "sensitive", ty: ArgType::Boolean, required: false, description: "Hide from other agents' recalls (default false)" },
            ArgSpec { name: "agentId", ty: ArgType::String, required: false, description: "Author agent (default: derived from session)" },
        ]),
        output: OutputSchema::new(&[
            FieldRule { key: "episodeId", priority: Priority::Required },
            FieldRule { key: "type", priority: Priority::High },
            FieldRule { key: "entities", priority: Priority::Medium },
            FieldRule { key: "timestamp", priority: Priority::Low },
        ]),
        synonyms: &[("episodeType", "type"), ("text", "content")],
        handler: handler(episode_add),
    }
}

async fn episode_add(ctx: ToolContext, args: Value) -> Result<ToolOutput> {
    let project = require_project(&ctx)?;
    let input = EpisodeInput {
        agent_id: ctx.agent_id(&args),
        session_id: ctx.session_id.clone(),
        episode_type: require_str(&args, "type")?,
        content: require_str(&args, "content")?,
        entities: str_array(&args, "entities"),
        task_id: opt_str(&args, "taskId"),
        outcome: opt_str(&args, "outcome"),
        metadata: args.get("metadata").cloned().unwrap_or_else(|| json!({})),
        sensitive: opt_bool(&args, "sensitive").unwrap_or(false),
    };
    let episode = ctx.engines.episodes.add(&project, input).await?;
    Ok(ToolOutput::new(format!(
        "Recorded {} episode {}.",
        episode.episode_type.as_str(),
        episode.id
    ))
    .with_data(json!({
        "episodeId": episode.id,
        "type": episode.episode_type.as_str(),
        "entities": episode.entities,
        "timestamp": episode.timestamp,
    })))
}

// ---------------------------------------------------------------------------
// episode_recall
// ---------------------------------------------------------------------------

fn recall_spec() -> ToolSpec {
    ToolSpec {
        name: "episode_recall",
        category: "memory",
        description: "Recall episodes by blended vector similarity, recency and entity overlap.",
        input: InputShape::new(&[
            ArgSpec { name: "query", ty: ArgType::String, required: true, description: "What to look for" },
            ArgSpec { name: "agentId", ty: ArgType::String, required: false, description: "Restrict to one author" },
            ArgSpec { name: "taskId", ty: ArgType::String, required: false, description: "Restrict to one task" },
            ArgSpec { name: "types", ty: ArgType::Array, required: false, description: "Episode types to include" },
            ArgSpec { name: "entities", ty: ArgType::Array, required: false, description: "SCIP ids for the overlap term" },
            ArgSpec { name: "limit", ty: ArgType::Number, required: false, description: "Max results (default 5)" },
            ArgSpec { name: "since", ty: ArgType::String, required: false, description: "RFC3339 lower bound" },
        ]),
        output: OutputSchema::new(&[
            FieldRule { key: "episodes", priority: Priority::Required },
            FieldRule { key: "count", priority: Priority::Required },
        ]),
        synonyms: &[("text", "query")],
        handler: handler(episode_recall),
    }
}

async fn episode_recall(ctx: ToolContext, args: Value) -> Result<ToolOutput> {
    let project = require_project(&ctx)?;
    let caller = ctx.agent_id(&args);
    let types: Vec<EpisodeType> = str_array(&args, "types")
        .iter()
        .filter_map(|t| EpisodeType::parse(t))
        .collect();
    let query = RecallQuery {
        query: require_str(&args, "query")?,
        agent_id: opt_str(&args, "agentId"),
        task_id: opt_str(&args, "taskId"),
        types,
        entities: str_array(&args, "entities"),
        limit: opt_u64(&args, "limit").unwrap_or(5) as usize,
        since: opt_datetime(&args, "since")?,
    };
    let scored = ctx
        .engines
        .episodes
        .recall(&project, Some(&caller), query)
        .await?;
    let rows: Vec<Value> = scored.iter().map(episode_row).collect();
    Ok(
        ToolOutput::new(format!("Recalled {} episodes.", rows.len())).with_data(json!({
            "episodes": rows,
            "count": rows.len(),
        })),
    )
}

// ---------------------------------------------------------------------------
// decision_query
// ---------------------------------------------------------------------------

fn decision_spec() -> ToolSpec {
    ToolSpec {
        name: "decision_query",
        category: "memory",
        description: "Recall past DECISION episodes; proximity to affected files dominates when provided.",
        input: InputShape::new(&[
            ArgSpec { name: "query", ty: ArgType::String, required: true, description: "Decision topic" },
            ArgSpec { name: "affectedFiles", ty: ArgType::Array, required: false, description: "Files/SCIP ids being touched" },
            ArgSpec { name: "limit", ty: ArgType::Number, required: false, description: "Max results (default 5)" },
        ]),
        output: OutputSchema::new(&[
            FieldRule { key: "decisions", priority: Priority::Required },
            FieldRule { key: "count", priority: Priority::Required },
        ]),
        synonyms: &[("files", "affectedFiles")],
        handler: handler(decision_query),
    }
}

async fn decision_query(ctx: ToolContext, args: Value) -> Result<ToolOutput> {
    let project = require_project(&ctx)?;
    let caller = ctx.agent_id(&args);
    let query = require_str(&args, "query")?;
    let affected = str_array(&args, "affectedFiles");
    let limit = opt_u64(&args, "limit").unwrap_or(5) as usize;
    let scored = ctx
        .engines
        .episodes
        .decision_query(&project, Some(&caller), &query, &affected, limit)
        .await?;
    let rows: Vec<Value> = scored.iter().map(episode_row).collect();
    let mut output = ToolOutput::new(format!("Found {} relevant decisions.", rows.len()))
        .with_data(json!({
            "decisions": rows,
            "count": rows.len(),
        }));
    if rows.is_empty() {
        output = output.with_hint(
            "record decisions with episode_add(type='DECISION', metadata={rationale: ...})",
        );
    }
    Ok(output)
}

// ---------------------------------------------------------------------------
// reflect
// ---------------------------------------------------------------------------

fn reflect_spec() -> ToolSpec {
    ToolSpec {
        name: "reflect",
        category: "memory",
        description: "Mine recent episodes for patterns (hotspots, risky decisions, wasted reading) and promote them to learnings.",
        input: InputShape::new(&[
            ArgSpec { name: "taskId", ty: ArgType::String, required: false, description: "Restrict to one task" },
            ArgSpec { name: "agentId", ty: ArgType::String, required: false, description: "Restrict to one agent" },
            ArgSpec { name: "limit", ty: ArgType::Number, required: false, description: "Episodes to examine (default 20)" },
        ]),
        output: OutputSchema::new(&[
            FieldRule { key: "patterns", priority: Priority::Required },
            FieldRule { key: "reflectionId", priority: Priority::High },
            FieldRule { key: "learningsCreated", priority: Priority::High },
            FieldRule { key: "episodesExamined", priority: Priority::Low },
        ]),
        synonyms: &[],
        handler: handler(reflect_tool),
    }
}

async fn reflect_tool(ctx: ToolContext, args: Value) -> Result<ToolOutput> {
    let project = require_project(&ctx)?;
    let report = run_reflect(
        ctx.engines.episodes.store(),
        &project,
        opt_str(&args, "agentId"),
        opt_str(&args, "taskId"),
        opt_u64(&args, "limit").unwrap_or(20) as usize,
    )
    .await?;
    Ok(ToolOutput::new(format!(
        "Reflection over {} episodes found {} patterns and created {} learnings.",
        report.episodes_examined,
        report.patterns.len(),
        report.learnings_created
    ))
    .with_data(serde_json::to_value(&report)?))
}
