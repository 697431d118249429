//! Response envelope and the budget-aware shaper
//!
//! Every tool result travels inside an [`Envelope`]. The shaper enforces the
//! per-profile token budget by dropping `data` keys in priority order and
//! truncating arrays; `summary` and `required` fields always survive, even
//! when that pushes the estimate over the nominal budget.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Response-shaping profile with its hard token budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    Compact,
    Balanced,
    Debug,
}

impl Profile {
    /// Token budget; `None` means unbounded.
    pub fn budget(self) -> Option<usize> {
        match self {
            Self::Compact => Some(300),
            Self::Balanced => Some(1200),
            Self::Debug => None,
        }
    }

    /// Max items per array inside `data`; `None` means untrimmed.
    pub fn array_cap(self) -> Option<usize> {
        match self {
            Self::Compact => Some(10),
            Self::Balanced => Some(50),
            Self::Debug => None,
        }
    }

    pub fn parse(s: Option<&str>) -> Self {
        match s.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            Some("compact") => Self::Compact,
            Some("debug") => Self::Debug,
            _ => Self::Balanced,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Compact => "compact",
            Self::Balanced => "balanced",
            Self::Debug => "debug",
        }
    }
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error detail attached to failure envelopes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub recoverable: bool,
}

/// The uniform tool-response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub ok: bool,
    /// 1-3 sentence natural-language summary; never pruned.
    pub summary: String,
    pub profile: Profile,
    #[serde(rename = "_tokenEstimate")]
    pub token_estimate: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(rename = "errorCode", skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(rename = "contractWarnings", skip_serializing_if = "Vec::is_empty", default)]
    pub contract_warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
}

impl Envelope {
    pub fn success(summary: impl Into<String>) -> Self {
        Self {
            ok: true,
            summary: summary.into(),
            profile: Profile::Balanced,
            token_estimate: 0,
            data: None,
            hint: None,
            error_code: None,
            contract_warnings: Vec::new(),
            error: None,
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

    /// Build a failure envelope from an [`Error`].
    pub fn failure(err: &Error) -> Self {
        Self {
            ok: false,
            summary: err.to_string(),
            profile: Profile::Balanced,
            token_estimate: 0,
            data: None,
            hint: err.hint(),
            error_code: Some(err.code().to_string()),
            contract_warnings: Vec::new(),
            error: Some(ErrorDetail {
                recoverable: err.recoverable(),
            }),
        }
    }
}

/// Field drop priority. `Required` fields are never dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Required,
    High,
    Medium,
    Low,
}

/// One `data` key with its drop priority.
#[derive(Debug, Clone, Copy)]
pub struct FieldRule {
    pub key: &'static str,
    pub priority: Priority,
}

/// Ordered field-priority declaration for one tool's `data` payload.
///
/// Keys present in `data` but absent from the schema are treated as `Low`
/// and dropped first.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputSchema {
    pub fields: &'static [FieldRule],
}

impl OutputSchema {
    pub const fn new(fields: &'static [FieldRule]) -> Self {
        Self { fields }
    }

    fn priority_of(&self, key: &str) -> Option<Priority> {
        self.fields.iter().find(|f| f.key == key).map(|f| f.priority)
    }
}

/// Conservative token estimate for an envelope: `ceil(len(json)/4)` over the
/// canonical encoding with `_tokenEstimate` zeroed (so the estimate does not
/// depend on its own digits).
pub fn estimate_tokens(envelope: &Envelope) -> usize {
    let mut probe = envelope.clone();
    probe.token_estimate = 0;
    let encoded = serde_json::to_string(&probe).unwrap_or_default();
    encoded.len().div_ceil(4)
}

/// Shape an envelope to a profile: truncate arrays, drop prunable fields
/// low → medium → high until within budget, then stamp the token estimate.
pub fn shape(mut envelope: Envelope, schema: OutputSchema, profile: Profile) -> Envelope {
    envelope.profile = profile;

    let Some(budget) = profile.budget() else {
        envelope.token_estimate = estimate_tokens(&envelope);
        return envelope;
    };

    if let (Some(cap), Some(data)) = (profile.array_cap(), envelope.data.as_mut()) {
        truncate_arrays(data, cap);
    }

    loop {
        let estimate = estimate_tokens(&envelope);
        if estimate <= budget {
            envelope.token_estimate = estimate;
            return envelope;
        }
        let Some(key) = next_droppable(&envelope, schema) else {
            break;
        };
        if let Some(Value::Object(map)) = envelope.data.as_mut() {
            map.remove(&key);
        }
    }

    // Only required fields remain. They are preserved even over budget.
    let estimate = estimate_tokens(&envelope);
    if estimate > budget {
        envelope.contract_warnings.push(format!(
            "required fields exceed the {} budget ({} tokens)",
            profile, estimate
        ));
        if envelope.hint.is_none() {
            envelope.hint =
                Some("retry with profile='balanced' or 'debug' for the full payload".to_string());
        }
    }
    envelope.token_estimate = estimate_tokens(&envelope);
    envelope
}

/// Pick the next key to drop: undeclared keys first, then declared fields by
/// ascending priority (schema order reversed within a tier, so trailing
/// low-value fields go before leading ones).
fn next_droppable(envelope: &Envelope, schema: OutputSchema) -> Option<String> {
    let Some(Value::Object(map)) = envelope.data.as_ref() else {
        return None;
    };
    for key in map.keys() {
        if schema.priority_of(key).is_none() {
            return Some(key.clone());
        }
    }
    for tier in [Priority::Low, Priority::Medium, Priority::High] {
        for rule in schema.fields.iter().rev() {
            if rule.priority == tier && map.contains_key(rule.key) {
                return Some(rule.key.to_string());
            }
        }
    }
    None
}

/// Deterministic first-N truncation of every array under `value`, recursing
/// into surviving elements.
fn truncate_arrays(value: &mut Value, cap: usize) {
    match value {
        Value::Array(items) => {
            items.truncate(cap);
            for item in items.iter_mut() {
                truncate_arrays(item, cap);
            }
        }
        Value::Object(map) => {
            for (_, v) in map.iter_mut() {
                truncate_arrays(v, cap);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SCHEMA: OutputSchema = OutputSchema::new(&[
        FieldRule { key: "results", priority: Priority::Required },
        FieldRule { key: "count", priority: Priority::Required },
        FieldRule { key: "timings", priority: Priority::Medium },
        FieldRule { key: "warnings", priority: Priority::Low },
    ]);

    fn big_string(n: usize) -> String {
        "x".repeat(n)
    }

    #[test]
    fn debug_profile_is_untrimmed() {
        let rows: Vec<Value> = (0..100).map(|i| json!({ "i": i })).collect();
        let env = Envelope::success("ok").with_data(json!({ "results": rows, "count": 100 }));
        let shaped = shape(env, SCHEMA, Profile::Debug);
        let data = shaped.data.unwrap();
        assert_eq!(data["results"].as_array().unwrap().len(), 100);
        assert!(shaped.token_estimate > 0);
    }

    #[test]
    fn compact_truncates_arrays_to_ten() {
        let rows: Vec<Value> = (0..50).map(|i| json!(i)).collect();
        let env = Envelope::success("ok").with_data(json!({ "results": rows, "count": 50 }));
        let shaped = shape(env, SCHEMA, Profile::Compact);
        let data = shaped.data.unwrap();
        assert_eq!(data["results"].as_array().unwrap().len(), 10);
        // count is required and survives compaction
        assert_eq!(data["count"], json!(50));
    }

    #[test]
    fn drops_low_before_medium() {
        let env = Envelope::success("ok").with_data(json!({
            "results": [1, 2, 3],
            "count": 3,
            "timings": big_string(600),
            "warnings": big_string(600),
        }));
        let shaped = shape(env, SCHEMA, Profile::Compact);
        let data = shaped.data.unwrap();
        assert!(!data.as_object().unwrap().contains_key("warnings"));
        assert!(data.as_object().unwrap().contains_key("results"));
    }

    #[test]
    fn required_fields_survive_over_budget() {
        let rows: Vec<Value> = (0..10).map(|_| json!(big_string(200))).collect();
        let env = Envelope::success("ok").with_data(json!({ "results": rows, "count": 10 }));
        let shaped = shape(env, SCHEMA, Profile::Compact);
        let data = shaped.data.as_ref().unwrap();
        assert!(data.as_object().unwrap().contains_key("results"));
        assert!(data.as_object().unwrap().contains_key("count"));
        assert!(shaped.token_estimate > 300);
        assert!(shaped
            .contract_warnings
            .iter()
            .any(|w| w.contains("required fields exceed")));
    }

    #[test]
    fn estimate_matches_helper() {
        let env = Envelope::success("hello").with_data(json!({ "results": [1], "count": 1 }));
        let shaped = shape(env, SCHEMA, Profile::Balanced);
        assert_eq!(shaped.token_estimate, estimate_tokens(&shaped));
    }

    #[test]
    fn undeclared_keys_drop_first() {
        let env = Envelope::success("ok").with_data(json!({
            "results": [1],
            "count": 1,
            "extraBlob": big_string(2000),
        }));
        let shaped = shape(env, SCHEMA, Profile::Compact);
        let data = shaped.data.unwrap();
        assert!(!data.as_object().unwrap().contains_key("extraBlob"));
    }

    #[test]
    fn failure_envelope_carries_code_and_recoverable() {
        let err = Error::ToolNotFound("nope".into());
        let env = Envelope::failure(&err);
        assert!(!env.ok);
        assert_eq!(env.error_code.as_deref(), Some("TOOL_NOT_FOUND"));
        assert!(env.error.as_ref().unwrap().recoverable);
    }
}
