//! context_pack tool — single-call task briefing

use crate::args::*;
use crate::context::{require_project, ToolContext};
use crate::pack::{build_pack, PackRequest};
use crate::registry::{handler, ToolOutput, ToolSpec};
use crate::schema::{ArgSpec, ArgType, InputShape};
use mnemograph_core::{FieldRule, OutputSchema, Priority, Profile, Result};
use serde_json::Value;

pub fn specs() -> Vec<ToolSpec> {
    vec![pack_spec()]
}

fn pack_spec() -> ToolSpec {
    ToolSpec {
        name: "context_pack",
        category: "context",
        description: "Token-budgeted task briefing: relevance-ranked code slices, dependencies, prior decisions, learnings, blockers and a short plan.",
        input: InputShape::new(&[
            ArgSpec { name: "task", ty: ArgType::String, required: true, description: "What the agent is about to do" },
            ArgSpec { name: "taskId", ty: ArgType::String, required: false, description: "Task id for episode scoping" },
            ArgSpec { name: "agentId", ty: ArgType::String, required: false, description: "Requesting agent (blockers exclude own claims)" },
            ArgSpec { name: "includeDecisions", ty: ArgType::Boolean, required: false, description: "Attach prior decisions (default true)" },
            ArgSpec { name: "includeEpisodes", ty: ArgType::Boolean, required: false, description: "Attach recent episode history (default true)" },
            ArgSpec { name: "includeLearnings", ty: ArgType::Boolean, required: false, description: "Attach applicable learnings (default true)" },
        ]),
        output: OutputSchema::new(&[
            FieldRule { key: "coreCode", priority: Priority::Required },
            FieldRule { key: "summary", priority: Priority::Required },
            FieldRule { key: "plan", priority: Priority::High },
            FieldRule { key: "blockers", priority: Priority::High },
            FieldRule { key: "decisions", priority: Priority::High },
            FieldRule { key: "dependencies", priority: Priority::Medium },
            FieldRule { key: "learnings", priority: Priority::Medium },
            FieldRule { key: "episodeHistory", priority: Priority::Low },
            FieldRule { key: "seeds", priority: Priority::Low },
            FieldRule { key: "task", priority: Priority::Low },
        ]),
        synonyms: &[("goal", "task"), ("query", "task")],
        handler: handler(context_pack),
    }
}

async fn context_pack(ctx: ToolContext, args: Value) -> Result<ToolOutput> {
    let project = require_project(&ctx)?;
    let profile = Profile::parse(args.get("profile").and_then(|v| v.as_str()));
    let request = PackRequest {
        task: require_str(&args, "task")?,
        task_id: opt_str(&args, "taskId"),
        agent_id: opt_str(&args, "agentId").or_else(|| Some(ctx.agent_id(&args))),
        include_decisions: opt_bool(&args, "includeDecisions").unwrap_or(true),
        include_episodes: opt_bool(&args, "includeEpisodes").unwrap_or(true),
        include_learnings: opt_bool(&args, "includeLearnings").unwrap_or(true),
        profile,
    };
    let pack = build_pack(&ctx, &project, request).await?;
    let summary = pack
        .get("summary")
        .and_then(|s| s.as_str())
        .unwrap_or("Context pack assembled.")
        .to_string();
    Ok(ToolOutput::new(summary).with_data(pack))
}
