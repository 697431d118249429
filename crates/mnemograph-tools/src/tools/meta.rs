//! Meta tools: contract validation and the tool catalogue

use crate::args::*;
use crate::context::ToolContext;
use crate::registry::{handler, ToolOutput, ToolSpec};
use crate::schema::{ArgSpec, ArgType, InputShape};
use mnemograph_core::{Error, FieldRule, OutputSchema, Priority, Result};
use serde_json::{json, Value};

pub fn specs() -> Vec<ToolSpec> {
    vec![contract_validate_spec(), tools_list_spec()]
}

fn contract_validate_spec() -> ToolSpec {
    ToolSpec {
        name: "contract_validate",
        category: "meta",
        description: "Validate candidate arguments against a tool's input shape without executing it.",
        input: InputShape::new(&[
            ArgSpec { name: "tool", ty: ArgType::String, required: true, description: "Tool name" },
            ArgSpec { name: "arguments", ty: ArgType::Object, required: false, description: "Candidate argument object" },
        ]),
        output: OutputSchema::new(&[
            FieldRule { key: "valid", priority: Priority::Required },
            FieldRule { key: "missingRequired", priority: Priority::Required },
            FieldRule { key: "errors", priority: Priority::High },
            FieldRule { key: "extraFields", priority: Priority::Medium },
            FieldRule { key: "warnings", priority: Priority::Medium },
        ]),
        synonyms: &[("toolName", "tool"), ("args", "arguments")],
        handler: handler(contract_validate),
    }
}

async fn contract_validate(_ctx: ToolContext, args: Value) -> Result<ToolOutput> {
    let tool_name = require_str(&args, "tool")?;
    let specs = crate::tools::specs();
    let Some(spec) = specs.iter().find(|s| s.name == tool_name) else {
        return Err(Error::ToolNotFound(tool_name));
    };

    let mut candidate = args
        .get("arguments")
        .cloned()
        .unwrap_or_else(|| json!({}));
    let mut warnings: Vec<String> = Vec::new();
    if let Value::Object(map) = &mut candidate {
        for (alias, canonical) in spec.synonyms {
            if map.contains_key(*canonical) {
                continue;
            }
            if let Some(value) = map.remove(*alias) {
                map.insert(canonical.to_string(), value);
                warnings.push(format!("mapped {} -> {}", alias, canonical));
            }
        }
    }

    let mut report = spec.input.validate(&candidate);
    report.warnings.extend(warnings);

    Ok(ToolOutput::new(format!(
        "Arguments for {} are {}.",
        spec.name,
        if report.valid { "valid" } else { "invalid" }
    ))
    .with_data(serde_json::to_value(&report)?))
}

fn tools_list_spec() -> ToolSpec {
    ToolSpec {
        name: "tools_list",
        category: "meta",
        description: "Catalogue of every tool with category, description and argument shapes.",
        input: InputShape::new(&[ArgSpec {
            name: "category",
            ty: ArgType::String,
            required: false,
            description: "Filter to one category",
        }]),
        output: OutputSchema::new(&[
            FieldRule { key: "tools", priority: Priority::Required },
            FieldRule { key: "count", priority: Priority::Required },
            FieldRule { key: "categories", priority: Priority::Medium },
        ]),
        synonyms: &[],
        handler: handler(tools_list),
    }
}

async fn tools_list(_ctx: ToolContext, args: Value) -> Result<ToolOutput> {
    let category_filter = opt_str(&args, "category");
    let specs = crate::tools::specs();
    let mut categories: Vec<&str> = specs.iter().map(|s| s.category).collect();
    categories.sort();
    categories.dedup();

    let rows: Vec<Value> = specs
        .iter()
        .filter(|s| {
            category_filter
                .as_deref()
                .map(|c| s.category == c)
                .unwrap_or(true)
        })
        .map(|s| {
            json!({
                "name": s.name,
                "category": s.category,
                "description": s.description,
                "arguments": s.input.describe(),
            })
        })
        .collect();

    Ok(ToolOutput::new(format!("{} tools available.", rows.len())).with_data(json!({
        "tools": rows,
        "count": rows.len(),
        "categories": categories,
    })))
}
