//! JSON-RPC 2.0 framing types
//!
//! Wire format (one message per line under stdio, one per POST body under
//! HTTP):
//!
//! Client → Server:
//!   { "jsonrpc": "2.0", "id": 1, "method": "tools/call",
//!     "params": { "name": "graph_health", "arguments": {} } }
//!
//! Server → Client:
//!   { "jsonrpc": "2.0", "id": 1, "result": { ... } }
//!   { "jsonrpc": "2.0", "id": 1, "error": { "code": -32601, "message": "..." } }
//!
//! Requests without an `id` are notifications and receive no response.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

/// Standard JSON-RPC error codes used by the server.
pub mod codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
    /// Missing or unknown `mcp-session-id` on the HTTP transport.
    pub const INVALID_SESSION: i64 = -32000;
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl JsonRpcRequest {
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcResponse {
    pub fn ok(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    pub fn method_not_found(id: Value, method: &str) -> Self {
        Self::err(
            id,
            codes::METHOD_NOT_FOUND,
            format!("Method not found: {}", method),
        )
    }

    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::err(Value::Null, codes::PARSE_ERROR, message)
    }

    pub fn invalid_session(id: Value) -> Self {
        Self::err(
            id,
            codes::INVALID_SESSION,
            "Missing or unknown mcp-session-id header; call initialize first",
        )
    }
}
