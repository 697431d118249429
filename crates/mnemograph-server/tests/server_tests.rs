//! Request-routing tests for the server state shared by both transports.

use mnemograph_core::{JsonRpcRequest, Settings, STDIO_SESSION};
use mnemograph_server::ServerState;
use serde_json::{json, Value};

fn request(method: &str, params: Value) -> JsonRpcRequest {
    serde_json::from_value(json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": method,
        "params": params,
    }))
    .unwrap()
}

async fn state() -> std::sync::Arc<ServerState> {
    // Default settings point at localhost stores; unreachable ones fall back
    // to the in-memory implementations, which is exactly what tests want.
    ServerState::init(Settings::default(), false).await
}

#[tokio::test]
async fn initialize_reports_server_info_and_session() {
    let state = state().await;
    let response = state
        .handle_request(STDIO_SESSION, request("initialize", json!({})))
        .await
        .unwrap();
    let result = response.result.unwrap();
    assert_eq!(result["serverInfo"]["name"], json!("mnemograph"));
    assert_eq!(result["sessionId"], json!(STDIO_SESSION));
    assert!(result["capabilities"]["tools"].is_object());
}

#[tokio::test]
async fn tools_list_returns_schemas() {
    let state = state().await;
    let response = state
        .handle_request(STDIO_SESSION, request("tools/list", json!({})))
        .await
        .unwrap();
    let tools = response.result.unwrap()["tools"].as_array().unwrap().clone();
    assert_eq!(tools.len(), 39);
    for tool in &tools {
        assert!(tool["name"].as_str().is_some());
        assert!(tool["inputSchema"]["type"] == json!("object"));
    }
}

#[tokio::test]
async fn tools_call_wraps_the_envelope() {
    let state = state().await;
    let response = state
        .handle_request(
            STDIO_SESSION,
            request("tools/call", json!({ "name": "tools_list", "arguments": {} })),
        )
        .await
        .unwrap();
    let result = response.result.unwrap();
    assert_eq!(result["isError"], json!(false));
    assert_eq!(result["envelope"]["ok"], json!(true));
    assert!(result["content"][0]["text"].as_str().unwrap().contains("tools"));
}

#[tokio::test]
async fn tools_call_with_unknown_tool_is_an_error_envelope_not_a_crash() {
    let state = state().await;
    let response = state
        .handle_request(
            STDIO_SESSION,
            request("tools/call", json!({ "name": "bogus", "arguments": {} })),
        )
        .await
        .unwrap();
    let result = response.result.unwrap();
    assert_eq!(result["isError"], json!(true));
    assert_eq!(result["envelope"]["errorCode"], json!("TOOL_NOT_FOUND"));
}

#[tokio::test]
async fn unknown_method_is_method_not_found() {
    let state = state().await;
    let response = state
        .handle_request(STDIO_SESSION, request("chat/send", json!({})))
        .await
        .unwrap();
    let error = response.error.unwrap();
    assert_eq!(error.code, -32601);
    assert!(error.message.contains("chat/send"));
}

#[tokio::test]
async fn notifications_get_no_response() {
    let state = state().await;
    let notification: JsonRpcRequest = serde_json::from_value(json!({
        "jsonrpc": "2.0",
        "method": "notifications/initialized",
    }))
    .unwrap();
    assert!(state.handle_request(STDIO_SESSION, notification).await.is_none());
}

#[tokio::test]
async fn full_session_flow_over_the_router() {
    let state = state().await;
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("src")).unwrap();
    std::fs::write(
        dir.path().join("src/a.ts"),
        "export function hello(){ return 1 }\n",
    )
    .unwrap();

    let set = state
        .handle_request(
            STDIO_SESSION,
            request(
                "tools/call",
                json!({
                    "name": "graph_set_workspace",
                    "arguments": { "workspaceRoot": dir.path().to_str().unwrap(), "projectId": "demo" },
                }),
            ),
        )
        .await
        .unwrap();
    assert_eq!(set.result.unwrap()["envelope"]["ok"], json!(true));

    let rebuild = state
        .handle_request(
            STDIO_SESSION,
            request(
                "tools/call",
                json!({ "name": "graph_rebuild", "arguments": { "mode": "full" } }),
            ),
        )
        .await
        .unwrap();
    let envelope = rebuild.result.unwrap()["envelope"].clone();
    assert_eq!(envelope["ok"], json!(true));

    let health = state
        .handle_request(
            STDIO_SESSION,
            request("tools/call", json!({ "name": "graph_health", "arguments": {} })),
        )
        .await
        .unwrap();
    let health_envelope = health.result.unwrap()["envelope"].clone();
    assert!(health_envelope["data"]["graphIndex"]["totalNodes"].as_u64().unwrap() >= 2);
}
