//! Coordination tools: claims, releases, agent status, overview

use crate::args::*;
use crate::context::{require_project, ToolContext};
use crate::registry::{handler, ToolOutput, ToolSpec};
use crate::schema::{ArgSpec, ArgType, InputShape};
use mnemograph_core::{FieldRule, OutputSchema, Priority, Result};
use mnemograph_coordination::{ClaimRequest, ClaimResult};
use mnemograph_graph::model::file_id;
use mnemograph_graph::store::{EpisodeFilter, ReleaseOutcome};
use serde_json::{json, Value};

pub fn specs() -> Vec<ToolSpec> {
    vec![claim_spec(), release_spec(), status_spec(), overview_spec()]
}

// ---------------------------------------------------------------------------
// agent_claim
// ---------------------------------------------------------------------------

fn claim_spec() -> ToolSpec {
    ToolSpec {
        name: "agent_claim",
        category: "coordination",
        description: "Claim exclusive work on a file, function, task or feature. Conflicts with another agent's active claim are reported, not overwritten.",
        input: InputShape::new(&[
            ArgSpec { name: "targetId", ty: ArgType::String, required: true, description: "SCIP id, path, symbol name, or task/feature id" },
            ArgSpec { name: "claimType", ty: ArgType::String, required: true, description: "task | file | function | feature" },
            ArgSpec { name: "intent", ty: ArgType::String, required: true, description: "What the agent is about to do" },
            ArgSpec { name: "taskId", ty: ArgType::String, required: false, description: "Task this claim belongs to" },
            ArgSpec { name: "agentId", ty: ArgType::String, required: false, description: "Claiming agent (default: derived from session)" },
        ]),
        output: OutputSchema::new(&[
            FieldRule { key: "status", priority: Priority::Required },
            FieldRule { key: "claimId", priority: Priority::Required },
            FieldRule { key: "conflict", priority: Priority::Required },
            FieldRule { key: "targetVersionSHA", priority: Priority::Medium },
            FieldRule { key: "targetId", priority: Priority::Low },
        ]),
        synonyms: &[("target", "targetId"), ("type", "claimType")],
        handler: handler(agent_claim),
    }
}

async fn agent_claim(ctx: ToolContext, args: Value) -> Result<ToolOutput> {
    let project = require_project(&ctx)?;
    let raw_target = require_str(&args, "targetId")?;
    let claim_type = require_str(&args, "claimType")?;
    let intent = require_str(&args, "intent")?;

    // Resolve paths and names onto SCIP ids where possible; task/feature
    // targets stay verbatim.
    let target_id = resolve_claim_target(&ctx, &project, &raw_target, &claim_type).await?;

    let request = ClaimRequest {
        agent_id: ctx.agent_id(&args),
        session_id: ctx.session_id.clone(),
        task_id: opt_str(&args, "taskId"),
        claim_type,
        target_id: target_id.clone(),
        intent,
    };
    match ctx.engines.coordination.claim(&project, request).await? {
        ClaimResult::Ok {
            claim_id,
            target_version_sha,
        } => Ok(ToolOutput::new(format!("Claim granted on {}.", target_id)).with_data(json!({
            "status": "ok",
            "claimId": claim_id,
            "targetId": target_id,
            "targetVersionSHA": target_version_sha,
        }))),
        ClaimResult::Conflict { conflict } => Ok(ToolOutput::failing(
            format!(
                "Target {} is already claimed by agent {}.",
                target_id, conflict.agent_id
            ),
            "CLAIM_CONFLICT",
        )
        .with_data(json!({
            "status": "CONFLICT",
            "targetId": target_id,
            "conflict": {
                "agentId": conflict.agent_id,
                "intent": conflict.intent,
                "since": conflict.since,
            },
        }))
        .with_hint("wait for the holder to release, or coordinate via coordination_overview")),
    }
}

async fn resolve_claim_target(
    ctx: &ToolContext,
    project: &mnemograph_core::ProjectContext,
    raw: &str,
    claim_type: &str,
) -> Result<String> {
    if matches!(claim_type, "task" | "feature") {
        return Ok(raw.to_string());
    }
    if ctx.engines.store.current_code_node(raw).await?.is_some() {
        return Ok(raw.to_string());
    }
    let snapshot = ctx.engines.snapshot(project).await?;
    if let Some(file) = snapshot
        .files
        .iter()
        .find(|f| f.path == raw || f.rel_path == raw || f.path.ends_with(raw))
    {
        return Ok(file.id.clone());
    }
    if let Some(symbol) = ctx.engines.resolve_symbol(project, raw).await? {
        return Ok(symbol.id);
    }
    // Fall back to a deterministic file id so claims can precede the first
    // rebuild of the file.
    let rel = raw
        .strip_prefix(&project.workspace_root.display().to_string())
        .map(|r| r.trim_start_matches('/').to_string())
        .unwrap_or_else(|| raw.to_string());
    Ok(file_id(&project.project_id, &rel))
}

// ---------------------------------------------------------------------------
// agent_release
// ---------------------------------------------------------------------------

fn release_spec() -> ToolSpec {
    ToolSpec {
        name: "agent_release",
        category: "coordination",
        description: "Release a claim. Releasing an unknown or already-closed claim is an error, not a success.",
        input: InputShape::new(&[
            ArgSpec { name: "claimId", ty: ArgType::String, required: true, description: "Claim id returned by agent_claim" },
            ArgSpec { name: "outcome", ty: ArgType::String, required: false, description: "Optional outcome note" },
        ]),
        output: OutputSchema::new(&[
            FieldRule { key: "released", priority: Priority::Required },
            FieldRule { key: "alreadyClosed", priority: Priority::High },
            FieldRule { key: "notFound", priority: Priority::High },
            FieldRule { key: "claimId", priority: Priority::Medium },
        ]),
        synonyms: &[("claim", "claimId"), ("id", "claimId")],
        handler: handler(agent_release),
    }
}

async fn agent_release(ctx: ToolContext, args: Value) -> Result<ToolOutput> {
    let _project = require_project(&ctx)?;
    let claim_id = require_str(&args, "claimId")?;
    match ctx.engines.coordination.release(&claim_id).await? {
        ReleaseOutcome::Released(claim) => {
            Ok(ToolOutput::new(format!("Released claim {}.", claim.id)).with_data(json!({
                "released": true,
                "claimId": claim.id,
                "targetId": claim.target_id,
            })))
        }
        ReleaseOutcome::AlreadyClosed(claim) => Ok(ToolOutput::failing(
            format!(
                "Claim {} was already closed ({}).",
                claim.id,
                claim.invalidation_reason.as_deref().unwrap_or("unknown reason")
            ),
            "INVALID_ARGUMENT",
        )
        .with_data(json!({
            "released": false,
            "alreadyClosed": true,
            "claimId": claim.id,
            "invalidationReason": claim.invalidation_reason,
        }))),
        ReleaseOutcome::NotFound => Ok(ToolOutput::failing(
            format!("No claim with id {} exists.", claim_id),
            "ELEMENT_NOT_FOUND",
        )
        .with_data(json!({
            "released": false,
            "notFound": true,
            "claimId": claim_id,
        }))
        .with_hint("pass a claimId from an agent_claim result or agent_status")),
    }
}

// ---------------------------------------------------------------------------
// agent_status
// ---------------------------------------------------------------------------

fn status_spec() -> ToolSpec {
    ToolSpec {
        name: "agent_status",
        category: "coordination",
        description: "One agent's claims and recent episodes, straight from the store.",
        input: InputShape::new(&[ArgSpec {
            name: "agentId",
            ty: ArgType::String,
            required: true,
            description: "Agent to inspect",
        }]),
        output: OutputSchema::new(&[
            FieldRule { key: "agentId", priority: Priority::Required },
            FieldRule { key: "activeClaims", priority: Priority::Required },
            FieldRule { key: "recentEpisodes", priority: Priority::High },
            FieldRule { key: "closedClaims", priority: Priority::Medium },
        ]),
        synonyms: &[("agent", "agentId")],
        handler: handler(agent_status),
    }
}

async fn agent_status(ctx: ToolContext, args: Value) -> Result<ToolOutput> {
    let project = require_project(&ctx)?;
    let agent_id = require_str(&args, "agentId")?;
    let status = ctx.engines.coordination.agent_status(&project, &agent_id).await?;
    let episodes = ctx
        .engines
        .store
        .episodes(&EpisodeFilter {
            project_id: project.project_id.clone(),
            agent_id: Some(agent_id.clone()),
            limit: Some(10),
            caller: Some(agent_id.clone()),
            ..Default::default()
        })
        .await?;
    let episode_rows: Vec<Value> = episodes
        .iter()
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
        "Agent {} holds {} active claims; {} recent episodes.",
        agent_id,
        status.active_claims.len(),
        episode_rows.len()
    ))
    .with_data(json!({
        "agentId": agent_id,
        "activeClaims": status.active_claims,
        "closedClaims": status.closed_claims,
        "recentEpisodes": episode_rows,
    })))
}

// ---------------------------------------------------------------------------
// coordination_overview
// ---------------------------------------------------------------------------

fn overview_spec() -> ToolSpec {
    ToolSpec {
        name: "coordination_overview",
        category: "coordination",
        description: "All active claims for the project, grouped by agent.",
        input: InputShape::new(&[]),
        output: OutputSchema::new(&[
            FieldRule { key: "activeClaims", priority: Priority::Required },
            FieldRule { key: "byAgent", priority: Priority::High },
            FieldRule { key: "count", priority: Priority::Medium },
        ]),
        synonyms: &[],
        handler: handler(coordination_overview),
    }
}

async fn coordination_overview(ctx: ToolContext, _args: Value) -> Result<ToolOutput> {
    let project = require_project(&ctx)?;
    let overview = ctx.engines.coordination.overview(&project).await?;
    Ok(ToolOutput::new(format!(
        "{} active claims across {} agents.",
        overview.active_claims.len(),
        overview.by_agent.len()
    ))
    .with_data(json!({
        "activeClaims": overview.active_claims,
        "byAgent": overview.by_agent,
        "count": overview.active_claims.len(),
    })))
}
