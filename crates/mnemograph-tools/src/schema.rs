//! Tool input shapes and contract validation
//!
//! Every tool declares its argument table once; the dispatcher validates
//! required presence and basic types before the handler runs, and
//! `contract_validate` reports the same check without executing.

use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgType {
    String,
    Number,
    Boolean,
    Array,
    Object,
}

impl ArgType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }

    fn matches(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ArgSpec {
    pub name: &'static str,
    pub ty: ArgType,
    pub required: bool,
    pub description: &'static str,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct InputShape {
    pub args: &'static [ArgSpec],
}

impl InputShape {
    pub const fn new(args: &'static [ArgSpec]) -> Self {
        Self { args }
    }

    pub fn arg(&self, name: &str) -> Option<&ArgSpec> {
        self.args.iter().find(|a| a.name == name)
    }

    pub fn validate(&self, args: &Value) -> ValidationReport {
        let mut report = ValidationReport::default();
        let Some(map) = args.as_object() else {
            report.valid = false;
            report.errors.push("arguments must be a JSON object".into());
            return report;
        };
        for spec in self.args {
            match map.get(spec.name) {
                None | Some(Value::Null) => {
                    if spec.required {
                        report.missing_required.push(spec.name.to_string());
                    }
                }
                Some(value) => {
                    if !spec.ty.matches(value) {
                        report.errors.push(format!(
                            "{} should be a {}, got {}",
                            spec.name,
                            spec.ty.as_str(),
                            json_type(value)
                        ));
                    }
                }
            }
        }
        for key in map.keys() {
            if key != "profile" && self.arg(key).is_none() {
                report.extra_fields.push(key.clone());
            }
        }
        report.valid = report.missing_required.is_empty() && report.errors.is_empty();
        if !report.extra_fields.is_empty() {
            report
                .warnings
                .push(format!("unrecognized fields: {}", report.extra_fields.join(", ")));
        }
        report
    }

    /// JSON Schema object for protocol-level tool listings.
    pub fn json_schema(&self) -> Value {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for arg in self.args {
            properties.insert(
                arg.name.to_string(),
                serde_json::json!({ "type": arg.ty.as_str(), "description": arg.description }),
            );
            if arg.required {
                required.push(Value::String(arg.name.to_string()));
            }
        }
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Argument summary for the tool catalogue.
    pub fn describe(&self) -> Vec<Value> {
        self.args
            .iter()
            .map(|a| {
                serde_json::json!({
                    "name": a.name,
                    "type": a.ty.as_str(),
                    "required": a.required,
                    "description": a.description,
                })
            })
            .collect()
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    #[serde(rename = "missingRequired")]
    pub missing_required: Vec<String>,
    #[serde(rename = "extraFields")]
    pub extra_fields: Vec<String>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SHAPE: InputShape = InputShape::new(&[
        ArgSpec { name: "query", ty: ArgType::String, required: true, description: "" },
        ArgSpec { name: "limit", ty: ArgType::Number, required: false, description: "" },
    ]);

    #[test]
    fn valid_args_pass() {
        let report = SHAPE.validate(&json!({ "query": "x", "limit": 5 }));
        assert!(report.valid);
        assert!(report.missing_required.is_empty());
    }

    #[test]
    fn missing_required_is_reported() {
        let report = SHAPE.validate(&json!({ "limit": 5 }));
        assert!(!report.valid);
        assert_eq!(report.missing_required, vec!["query"]);
    }

    #[test]
    fn type_mismatch_is_an_error() {
        let report = SHAPE.validate(&json!({ "query": 7 }));
        assert!(!report.valid);
        assert!(report.errors[0].contains("query"));
    }

    #[test]
    fn extra_fields_warn_but_do_not_fail() {
        let report = SHAPE.validate(&json!({ "query": "x", "bogus": true }));
        assert!(report.valid);
        assert_eq!(report.extra_fields, vec!["bogus"]);
    }
}
