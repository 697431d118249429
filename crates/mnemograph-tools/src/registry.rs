//! Tool registry and dispatcher
//!
//! The registry is a flat value map, not a type hierarchy: each entry owns
//! its metadata, input shape, output field priorities, synonym table and a
//! boxed async handler. `call_tool` normalizes arguments, validates the
//! input shape, runs the handler, and shapes the result through the
//! response budget — handler errors become envelopes, never panics.

use crate::context::ToolContext;
use crate::schema::InputShape;
use futures::future::BoxFuture;
use mnemograph_core::{shape, Envelope, Error, OutputSchema, Profile, Result};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error};

#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub summary: String,
    pub data: Option<Value>,
    pub hint: Option<String>,
    /// `false` marks a semantic failure that still carries data (e.g. a
    /// claim conflict); the envelope reflects it together with `error_code`.
    pub ok: bool,
    pub error_code: Option<&'static str>,
    pub recoverable: bool,
}

impl ToolOutput {
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            data: None,
            hint: None,
            ok: true,
            error_code: None,
            recoverable: true,
        }
    }

    /// Semantic failure with a payload: `ok=false` plus an error code, while
    /// `data` still describes what happened.
    pub fn failing(summary: impl Into<String>, error_code: &'static str) -> Self {
        Self {
            summary: summary.into(),
            data: None,
            hint: None,
            ok: false,
            error_code: Some(error_code),
            recoverable: true,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

pub type Handler = Arc<dyn Fn(ToolContext, Value) -> BoxFuture<'static, Result<ToolOutput>> + Send + Sync>;

/// Wrap a plain async fn as a boxed handler.
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(ToolContext, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ToolOutput>> + Send + 'static,
{
    Arc::new(move |ctx, args| Box::pin(f(ctx, args)))
}

pub struct ToolSpec {
    pub name: &'static str,
    pub category: &'static str,
    pub description: &'static str,
    pub input: InputShape,
    pub output: OutputSchema,
    /// Accepted argument aliases: `(alias, canonical)`.
    pub synonyms: &'static [(&'static str, &'static str)],
    pub handler: Handler,
}

pub struct ToolRegistry {
    tools: BTreeMap<&'static str, ToolSpec>,
}

impl ToolRegistry {
    pub fn with_defaults() -> Self {
        let mut tools = BTreeMap::new();
        for spec in crate::tools::specs() {
            tools.insert(spec.name, spec);
        }
        Self { tools }
    }

    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.get(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.tools.keys().copied().collect()
    }

    /// Catalogue rows for `tools_list` and the MCP `tools/list` method.
    pub fn catalogue(&self) -> Vec<Value> {
        self.tools
            .values()
            .map(|spec| {
                json!({
                    "name": spec.name,
                    "category": spec.category,
                    "description": spec.description,
                    "arguments": spec.input.describe(),
                })
            })
            .collect()
    }

    /// Dispatch one tool call and shape the response for the requested
    /// profile.
    pub async fn call_tool(&self, ctx: ToolContext, name: &str, raw_args: Value) -> Envelope {
        let profile = Profile::parse(raw_args.get("profile").and_then(|v| v.as_str()));

        let Some(spec) = self.get(name) else {
            let err = Error::ToolNotFound(name.to_string());
            return shape(Envelope::failure(&err), OutputSchema::default(), profile);
        };

        let (args, warnings) = normalize_arguments(spec, raw_args);

        let validation = spec.input.validate(&args);
        if let Some(missing) = validation.missing_required.first() {
            let err = Error::invalid_argument(missing.clone());
            let mut envelope = Envelope::failure(&err).with_hint(format!(
                "{} requires '{}'; call contract_validate(tool='{}') to see the full shape",
                spec.name, missing, spec.name
            ));
            envelope.contract_warnings = warnings;
            return shape(envelope, spec.output, profile);
        }
        if let Some(problem) = validation.errors.first() {
            let err = Error::invalid_argument(problem.clone());
            let mut envelope = Envelope::failure(&err);
            envelope.contract_warnings = warnings;
            return shape(envelope, spec.output, profile);
        }

        debug!(tool = spec.name, session = %ctx.session_id, "dispatching tool call");
        let mut envelope = match (spec.handler)(ctx, args).await {
            Ok(output) => {
                let mut envelope = Envelope::success(output.summary);
                envelope.data = output.data;
                envelope.hint = output.hint;
                if !output.ok {
                    envelope.ok = false;
                    envelope.error_code = output.error_code.map(|c| c.to_string());
                    envelope.error = Some(mnemograph_core::ErrorDetail {
                        recoverable: output.recoverable,
                    });
                }
                envelope
            }
            Err(err) => {
                if !err.recoverable() {
                    error!(tool = spec.name, "tool failed: {}", err);
                }
                Envelope::failure(&err)
            }
        };
        envelope.contract_warnings.extend(warnings);
        shape(envelope, spec.output, profile)
    }
}

/// Apply the per-tool synonym table: move aliased keys onto their canonical
/// names, recording one contract warning per substitution. Unknown keys pass
/// through untouched.
fn normalize_arguments(spec: &ToolSpec, raw: Value) -> (Value, Vec<String>) {
    let Value::Object(mut map) = raw else {
        return (json!({}), Vec::new());
    };
    let mut warnings = Vec::new();
    for (alias, canonical) in spec.synonyms {
        if map.contains_key(*canonical) {
            continue;
        }
        if let Some(value) = map.remove(*alias) {
            map.insert(canonical.to_string(), value);
            warnings.push(format!("mapped {} -> {}", alias, canonical));
        }
    }
    (Value::Object(map), warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ArgSpec, ArgType};
    use mnemograph_core::{FieldRule, Priority};

    fn spec_with_synonym() -> ToolSpec {
        ToolSpec {
            name: "demo",
            category: "test",
            description: "demo tool",
            input: InputShape::new(&[ArgSpec {
                name: "files",
                ty: ArgType::Array,
                required: true,
                description: "files",
            }]),
            output: OutputSchema::new(&[FieldRule {
                key: "files",
                priority: Priority::Required,
            }]),
            synonyms: &[("changedFiles", "files")],
            handler: handler(|_ctx, args| async move {
                Ok(ToolOutput::new("ok").with_data(json!({ "files": args["files"] })))
            }),
        }
    }

    #[test]
    fn synonyms_map_and_warn() {
        let spec = spec_with_synonym();
        let (args, warnings) = normalize_arguments(&spec, json!({ "changedFiles": ["a"] }));
        assert_eq!(args["files"], json!(["a"]));
        assert!(args.get("changedFiles").is_none());
        assert_eq!(warnings, vec!["mapped changedFiles -> files"]);
    }

    #[test]
    fn canonical_key_wins_over_alias() {
        let spec = spec_with_synonym();
        let (args, warnings) =
            normalize_arguments(&spec, json!({ "files": ["a"], "changedFiles": ["b"] }));
        assert_eq!(args["files"], json!(["a"]));
        assert!(warnings.is_empty());
    }
}
