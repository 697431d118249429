//! Tests for the core crate's public surface: envelope shaping across
//! profiles, protocol framing, settings, and fingerprints.

use mnemograph_core::*;
use serde_json::json;

const QUERY_SCHEMA: OutputSchema = OutputSchema::new(&[
    FieldRule { key: "results", priority: Priority::Required },
    FieldRule { key: "count", priority: Priority::Required },
    FieldRule { key: "warnings", priority: Priority::Low },
]);

#[test]
fn profiles_have_documented_budgets() {
    assert_eq!(Profile::Compact.budget(), Some(300));
    assert_eq!(Profile::Balanced.budget(), Some(1200));
    assert_eq!(Profile::Debug.budget(), None);
    assert_eq!(Profile::parse(Some("COMPACT")), Profile::Compact);
    assert_eq!(Profile::parse(None), Profile::Balanced);
    assert_eq!(Profile::parse(Some("nonsense")), Profile::Balanced);
}

#[test]
fn compact_fifty_rows_keeps_results_and_count() {
    let rows: Vec<serde_json::Value> = (0..50)
        .map(|i| json!({ "label": format!("LABEL{}", i), "cnt": i }))
        .collect();
    let envelope = Envelope::success("50 rows").with_data(json!({
        "results": rows,
        "count": 50,
        "warnings": ["w1", "w2"],
    }));
    let shaped = shape(envelope, QUERY_SCHEMA, Profile::Compact);
    let data = shaped.data.as_ref().unwrap().as_object().unwrap();
    assert!(data.contains_key("results"));
    assert_eq!(data["count"], json!(50));
    // Arrays cap at 10 in compact.
    assert_eq!(data["results"].as_array().unwrap().len(), 10);
    assert_eq!(shaped.token_estimate, estimate_tokens(&shaped));
}

#[test]
fn oversized_required_fields_survive_with_a_warning() {
    let rows: Vec<serde_json::Value> = (0..10).map(|_| json!("x".repeat(300))).collect();
    let envelope = Envelope::success("big").with_data(json!({ "results": rows, "count": 10 }));
    let shaped = shape(envelope, QUERY_SCHEMA, Profile::Compact);
    let data = shaped.data.as_ref().unwrap().as_object().unwrap();
    assert!(data.contains_key("results"));
    assert!(data.contains_key("count"));
    assert!(shaped.token_estimate > 300);
    assert!(!shaped.contract_warnings.is_empty());
    assert!(shaped.ok);
}

#[test]
fn envelope_serializes_with_wire_field_names() {
    let envelope = Envelope::failure(&Error::ClaimConflict("held".into()));
    let wire = serde_json::to_value(&envelope).unwrap();
    assert_eq!(wire["errorCode"], json!("CLAIM_CONFLICT"));
    assert!(wire["_tokenEstimate"].is_number());
    assert_eq!(wire["error"]["recoverable"], json!(true));
    assert!(wire.get("data").is_none());
}

#[test]
fn error_codes_cover_the_taxonomy() {
    let cases: Vec<(Error, &str, bool)> = vec![
        (Error::ToolNotFound("t".into()), "TOOL_NOT_FOUND", true),
        (Error::InvalidArgument("f".into()), "INVALID_ARGUMENT", true),
        (Error::WorkspaceNotFound("w".into()), "WORKSPACE_NOT_FOUND", true),
        (Error::SourceDirNotFound("s".into()), "SOURCE_DIR_NOT_FOUND", true),
        (Error::GraphUnavailable("g".into()), "GRAPH_DB_UNAVAILABLE", false),
        (Error::GraphQueryFailed("q".into()), "GRAPH_QUERY_FAILED", false),
        (
            Error::RetrieverUnavailable("r".into()),
            "HYBRID_RETRIEVER_UNAVAILABLE",
            false,
        ),
        (Error::ElementNotFound("e".into()), "ELEMENT_NOT_FOUND", true),
        (
            Error::DecisionRequiresRationale,
            "EPISODE_DECISION_REQUIRES_RATIONALE",
            true,
        ),
        (Error::DiffAnchorNotFound("d".into()), "DIFF_SINCE_ANCHOR_NOT_FOUND", true),
        (Error::CommandTimeout(30_000), "COMMAND_TIMEOUT", false),
    ];
    for (error, code, recoverable) in cases {
        assert_eq!(error.code(), code);
        assert_eq!(error.recoverable(), recoverable, "{}", code);
    }
}

#[test]
fn jsonrpc_roundtrip_and_error_shapes() {
    let request: JsonRpcRequest = serde_json::from_str(
        r#"{"jsonrpc":"2.0","id":7,"method":"tools/call","params":{"name":"graph_health"}}"#,
    )
    .unwrap();
    assert_eq!(request.method, "tools/call");
    assert!(!request.is_notification());

    let ok = JsonRpcResponse::ok(json!(7), json!({ "fine": true }));
    let wire = serde_json::to_value(&ok).unwrap();
    assert_eq!(wire["jsonrpc"], json!("2.0"));
    assert!(wire.get("error").is_none());

    let err = JsonRpcResponse::invalid_session(json!(7));
    let wire = serde_json::to_value(&err).unwrap();
    assert_eq!(wire["error"]["code"], json!(-32000));
}

#[test]
fn session_manager_scopes_projects_per_session() {
    let a = tempfile::tempdir().unwrap();
    let b = tempfile::tempdir().unwrap();
    let sessions = SessionManager::new();
    sessions
        .set_workspace("s1", a.path().to_str().unwrap(), None, Some("alpha"))
        .unwrap();
    sessions
        .set_workspace("s2", b.path().to_str().unwrap(), None, Some("beta"))
        .unwrap();
    assert_eq!(sessions.context("s1").unwrap().project_id, "alpha");
    assert_eq!(sessions.context("s2").unwrap().project_id, "beta");
    assert_ne!(
        project_fingerprint(&sessions.context("s1").unwrap().workspace_root),
        project_fingerprint(&sessions.context("s2").unwrap().workspace_root),
    );
}
