//! Progress tools: task rollups, task updates, feature status, blockers

use crate::args::*;
use crate::context::{require_project, ToolContext};
use crate::registry::{handler, ToolOutput, ToolSpec};
use crate::schema::{ArgSpec, ArgType, InputShape};
use chrono::{Duration, Utc};
use mnemograph_core::{FieldRule, OutputSchema, Priority, Result};
use mnemograph_graph::model::EpisodeType;
use mnemograph_graph::store::EpisodeFilter;
use mnemograph_memory::{reflect as run_reflect, EpisodeInput};
use serde_json::{json, Value};
use std::collections::BTreeMap;

pub fn specs() -> Vec<ToolSpec> {
    vec![
        progress_query_spec(),
        task_update_spec(),
        feature_status_spec(),
        blocking_issues_spec(),
    ]
}

/// Claims older than this count as potentially blocking.
const BLOCKING_CLAIM_AGE_MINUTES: i64 = 60;

// ---------------------------------------------------------------------------
// progress_query
// ---------------------------------------------------------------------------

fn progress_query_spec() -> ToolSpec {
    ToolSpec {
        name: "progress_query",
        category: "progress",
        description: "Episode-derived progress rollup per task.",
        input: InputShape::new(&[ArgSpec {
            name: "taskId",
            ty: ArgType::String,
            required: false,
            description: "Restrict to one task",
        }]),
        output: OutputSchema::new(&[
            FieldRule { key: "tasks", priority: Priority::Required },
            FieldRule { key: "count", priority: Priority::High },
        ]),
        synonyms: &[("task", "taskId")],
        handler: handler(progress_query),
    }
}

async fn progress_query(ctx: ToolContext, args: Value) -> Result<ToolOutput> {
    let project = require_project(&ctx)?;
    let task_filter = opt_str(&args, "taskId");
    let episodes = ctx
        .engines
        .store
        .episodes(&EpisodeFilter {
            project_id: project.project_id.clone(),
            task_id: task_filter.clone(),
            include_sensitive: true,
            ..Default::default()
        })
        .await?;

    let mut by_task: BTreeMap<String, Vec<&mnemograph_graph::model::Episode>> = BTreeMap::new();
    for episode in &episodes {
        if let Some(task_id) = &episode.task_id {
            by_task.entry(task_id.clone()).or_default().push(episode);
        }
    }

    let tasks: Vec<Value> = by_task
        .iter()
        .map(|(task_id, eps)| {
            let decisions = eps
                .iter()
                .filter(|e| e.episode_type == EpisodeType::Decision)
                .count();
            let errors = eps
                .iter()
                .filter(|e| e.episode_type == EpisodeType::Error)
                .count();
            let completed = eps.iter().any(|e| {
                e.metadata
                    .get("taskUpdate")
                    .and_then(|v| v.as_str())
                    .map(|s| s == "completed")
                    .unwrap_or(false)
            });
            // Episodes arrive newest-first from the store.
            let last = eps.first();
            json!({
                "taskId": task_id,
                "episodes": eps.len(),
                "decisions": decisions,
                "errors": errors,
                "completed": completed,
                "lastActivity": last.map(|e| e.timestamp),
                "lastEpisodeType": last.map(|e| e.episode_type.as_str()),
            })
        })
        .collect();

    Ok(
        ToolOutput::new(format!("Progress for {} tasks.", tasks.len())).with_data(json!({
            "tasks": tasks,
            "count": tasks.len(),
        })),
    )
}

// ---------------------------------------------------------------------------
// task_update
// ---------------------------------------------------------------------------

fn task_update_spec() -> ToolSpec {
    ToolSpec {
        name: "task_update",
        category: "progress",
        description: "Record a task status change. Completing a task releases its claims and triggers reflection.",
        input: InputShape::new(&[
            ArgSpec { name: "taskId", ty: ArgType::String, required: true, description: "Task to update" },
            ArgSpec { name: "status", ty: ArgType::String, required: true, description: "e.g. in_progress, blocked, completed" },
            ArgSpec { name: "note", ty: ArgType::String, required: false, description: "Why the status changed" },
            ArgSpec { name: "agentId", ty: ArgType::String, required: false, description: "Acting agent" },
        ]),
        output: OutputSchema::new(&[
            FieldRule { key: "taskId", priority: Priority::Required },
            FieldRule { key: "status", priority: Priority::Required },
            FieldRule { key: "claimsClosed", priority: Priority::High },
            FieldRule { key: "reflection", priority: Priority::Medium },
            FieldRule { key: "episodeId", priority: Priority::Low },
        ]),
        synonyms: &[("task", "taskId"), ("state", "status")],
        handler: handler(task_update),
    }
}

async fn task_update(ctx: ToolContext, args: Value) -> Result<ToolOutput> {
    let project = require_project(&ctx)?;
    let task_id = require_str(&args, "taskId")?;
    let status = require_str(&args, "status")?;
    let note = opt_str(&args, "note");

    // The task must be known before anything is written: no episode and no
    // claim referencing it means there is nothing to update.
    let known_by_episode = !ctx
        .engines
        .store
        .episodes(&EpisodeFilter {
            project_id: project.project_id.clone(),
            task_id: Some(task_id.clone()),
            limit: Some(1),
            include_sensitive: true,
            ..Default::default()
        })
        .await?
        .is_empty();
    let known_by_claim = !ctx
        .engines
        .store
        .claims_for_task(&project.project_id, &task_id)
        .await?
        .is_empty();
    if !known_by_episode && !known_by_claim {
        return Ok(ToolOutput::failing(
            format!("Task {} is unknown; nothing was written.", task_id),
            "ELEMENT_NOT_FOUND",
        )
        .with_hint("start a task by claiming it (agent_claim claimType='task') or recording an episode with taskId"));
    }

    let rationale = note
        .clone()
        .unwrap_or_else(|| format!("task status changed to {}", status));
    let episode = ctx
        .engines
        .episodes
        .add(
            &project,
            EpisodeInput {
                agent_id: ctx.agent_id(&args),
                session_id: ctx.session_id.clone(),
                episode_type: "DECISION".to_string(),
                content: format!("Task {} -> {}", task_id, status),
                entities: Vec::new(),
                task_id: Some(task_id.clone()),
                outcome: Some(status.clone()),
                metadata: json!({ "taskUpdate": status, "rationale": rationale }),
                sensitive: false,
            },
        )
        .await?;

    let mut claims_closed = 0;
    let mut reflection = Value::Null;
    if status == "completed" {
        claims_closed = ctx
            .engines
            .coordination
            .complete_task(&project, &task_id)
            .await?
            .len();
        let report = run_reflect(
            ctx.engines.episodes.store(),
            &project,
            None,
            Some(task_id.clone()),
            20,
        )
        .await?;
        reflection = serde_json::to_value(&report)?;
    }

    Ok(ToolOutput::new(format!(
        "Task {} marked {}{}.",
        task_id,
        status,
        if claims_closed > 0 {
            format!(", {} claims closed", claims_closed)
        } else {
            String::new()
        }
    ))
    .with_data(json!({
        "taskId": task_id,
        "status": status,
        "episodeId": episode.id,
        "claimsClosed": claims_closed,
        "reflection": reflection,
    })))
}

// ---------------------------------------------------------------------------
// feature_status
// ---------------------------------------------------------------------------

fn feature_status_spec() -> ToolSpec {
    ToolSpec {
        name: "feature_status",
        category: "progress",
        description: "Episodes and claims attached to one feature/task id.",
        input: InputShape::new(&[ArgSpec {
            name: "featureId",
            ty: ArgType::String,
            required: true,
            description: "Feature or task id",
        }]),
        output: OutputSchema::new(&[
            FieldRule { key: "featureId", priority: Priority::Required },
            FieldRule { key: "status", priority: Priority::Required },
            FieldRule { key: "episodes", priority: Priority::High },
            FieldRule { key: "claims", priority: Priority::High },
        ]),
        synonyms: &[("feature", "featureId"), ("taskId", "featureId")],
        handler: handler(feature_status),
    }
}

async fn feature_status(ctx: ToolContext, args: Value) -> Result<ToolOutput> {
    let project = require_project(&ctx)?;
    let feature_id = require_str(&args, "featureId")?;
    let episodes = ctx
        .engines
        .store
        .episodes(&EpisodeFilter {
            project_id: project.project_id.clone(),
            task_id: Some(feature_id.clone()),
            include_sensitive: true,
            ..Default::default()
        })
        .await?;
    let claims = ctx
        .engines
        .store
        .claims_for_task(&project.project_id, &feature_id)
        .await?;
    if episodes.is_empty() && claims.is_empty() {
        return Ok(ToolOutput::failing(
            format!("No episodes or claims reference feature {}.", feature_id),
            "ELEMENT_NOT_FOUND",
        )
        .with_hint("pass a featureId from a progress_query result"));
    }

    let completed = episodes.iter().any(|e| {
        e.metadata
            .get("taskUpdate")
            .and_then(|v| v.as_str())
            .map(|s| s == "completed")
            .unwrap_or(false)
    });
    let active_claims = claims.iter().filter(|c| c.is_active()).count();
    let status = if completed {
        "completed"
    } else if active_claims > 0 {
        "in_progress"
    } else {
        "idle"
    };

    let episode_rows: Vec<Value> = episodes
        .iter()
        .take(20)
        .map(|e| {
            json!({
                "id": e.id,
                "type": e.episode_type.as_str(),
                "content": e.content,
                "timestamp": e.timestamp,
            })
        })
        .collect();

    Ok(ToolOutput::new(format!(
        "Feature {} is {} ({} episodes, {} claims).",
        feature_id,
        status,
        episodes.len(),
        claims.len()
    ))
    .with_data(json!({
        "featureId": feature_id,
        "status": status,
        "episodes": episode_rows,
        "claims": claims,
    })))
}

// ---------------------------------------------------------------------------
// blocking_issues
// ---------------------------------------------------------------------------

fn blocking_issues_spec() -> ToolSpec {
    ToolSpec {
        name: "blocking_issues",
        category: "progress",
        description: "Long-held claims and unresolved errors that may block other agents.",
        input: InputShape::new(&[]),
        output: OutputSchema::new(&[
            FieldRule { key: "staleClaims", priority: Priority::Required },
            FieldRule { key: "unresolvedErrors", priority: Priority::Required },
            FieldRule { key: "count", priority: Priority::High },
        ]),
        synonyms: &[],
        handler: handler(blocking_issues),
    }
}

async fn blocking_issues(ctx: ToolContext, _args: Value) -> Result<ToolOutput> {
    let project = require_project(&ctx)?;
    let now = Utc::now();
    let active = ctx.engines.store.active_claims(&project.project_id).await?;
    let stale: Vec<Value> = active
        .iter()
        .filter(|c| now - c.valid_from > Duration::minutes(BLOCKING_CLAIM_AGE_MINUTES))
        .map(|c| {
            json!({
                "claimId": c.id,
                "agentId": c.agent_id,
                "targetId": c.target_id,
                "heldForMinutes": (now - c.valid_from).num_minutes(),
            })
        })
        .collect();

    let episodes = ctx
        .engines
        .store
        .episodes(&EpisodeFilter {
            project_id: project.project_id.clone(),
            include_sensitive: true,
            ..Default::default()
        })
        .await?;
    // Newest-first: an error is unresolved when nothing succeeded for the
    // same task after it.
    let mut unresolved: Vec<Value> = Vec::new();
    for (idx, episode) in episodes.iter().enumerate() {
        if episode.episode_type != EpisodeType::Error {
            continue;
        }
        let resolved = episodes[..idx].iter().any(|later| {
            later.task_id == episode.task_id
                && matches!(
                    later.episode_type,
                    EpisodeType::Edit | EpisodeType::TestResult
                )
                && later
                    .outcome
                    .as_deref()
                    .map(|o| o.contains("pass") || o.contains("ok") || o.contains("success"))
                    .unwrap_or(false)
        });
        if !resolved {
            unresolved.push(json!({
                "episodeId": episode.id,
                "taskId": episode.task_id,
                "content": episode.content,
                "timestamp": episode.timestamp,
            }));
        }
    }

    let count = stale.len() + unresolved.len();
    Ok(ToolOutput::new(format!(
        "{} potential blockers: {} stale claims, {} unresolved errors.",
        count,
        stale.len(),
        unresolved.len()
    ))
    .with_data(json!({
        "staleClaims": stale,
        "unresolvedErrors": unresolved,
        "count": count,
    })))
}
