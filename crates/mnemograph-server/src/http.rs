//! HTTP transport — streamable JSON-RPC with SSE
//!
//! `initialize` mints a session echoed through the `mcp-session-id` header;
//! every other request must present a known session or gets HTTP 400 with
//! JSON-RPC error -32000. `GET /mcp` opens a keepalive SSE stream;
//! `/health` and the A2A agent card are plain GETs.

use crate::state::ServerState;
use axum::{
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::sse::{Event, KeepAlive, Sse},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures::stream::Stream;
use mnemograph_core::{JsonRpcRequest, JsonRpcResponse};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::StreamExt;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

const SESSION_HEADER: &str = "mcp-session-id";

pub async fn run_http(state: Arc<ServerState>, port: u16) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/", post(rpc_handler))
        .route("/mcp", post(rpc_handler).get(sse_handler))
        .route("/health", get(health_handler))
        .route("/.well-known/agent.json", get(agent_card_handler))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(state);

    let bind_addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;
    info!("HTTP transport listening on {}", bind_addr);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn rpc_handler(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    body: String,
) -> impl IntoResponse {
    let request: JsonRpcRequest = match serde_json::from_str(&body) {
        Ok(request) => request,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                HeaderMap::new(),
                Json(serde_json::to_value(JsonRpcResponse::parse_error(e.to_string())).unwrap_or_default()),
            );
        }
    };

    let header_session = headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let (session_id, mut response_headers) = if request.method == "initialize" {
        let session_id = state.engines.sessions.open_session();
        state.engines.sessions.register(&session_id);
        let mut response_headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&session_id) {
            response_headers.insert(SESSION_HEADER, value);
        }
        (session_id, response_headers)
    } else {
        match header_session {
            Some(session_id) if state.engines.sessions.has(&session_id) => {
                (session_id, HeaderMap::new())
            }
            _ => {
                let id = request.id.clone().unwrap_or(Value::Null);
                return (
                    StatusCode::BAD_REQUEST,
                    HeaderMap::new(),
                    Json(
                        serde_json::to_value(JsonRpcResponse::invalid_session(id))
                            .unwrap_or_default(),
                    ),
                );
            }
        }
    };

    match state.handle_request(&session_id, request).await {
        Some(response) => (
            StatusCode::OK,
            std::mem::take(&mut response_headers),
            Json(serde_json::to_value(&response).unwrap_or_default()),
        ),
        None => (
            StatusCode::ACCEPTED,
            std::mem::take(&mut response_headers),
            Json(json!({})),
        ),
    }
}

/// Keepalive SSE stream for clients that hold a server-push channel open.
async fn sse_handler(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, StatusCode> {
    let session_known = headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| state.engines.sessions.has(s))
        .unwrap_or(false);
    if !session_known {
        return Err(StatusCode::BAD_REQUEST);
    }
    let stream = tokio_stream::wrappers::IntervalStream::new(tokio::time::interval(
        Duration::from_secs(15),
    ))
    .map(|_| Ok(Event::default().event("ping").data("{}")));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok", "transport": "http" }))
}

/// Static A2A Agent Card advertising this server's capabilities.
async fn agent_card_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    Json(json!({
        "name": "mnemograph",
        "description": "Agent-memory and code-intelligence service over a bi-temporal code graph",
        "version": env!("CARGO_PKG_VERSION"),
        "capabilities": [
            "code-graph",
            "agent-memory",
            "agent-coordination",
            "context-packing",
            "architecture-validation",
            "test-impact-analysis",
        ],
        "interfaces": {
            "jsonrpc": "/mcp",
            "sse": "/mcp",
            "health": "/health",
        },
        "tools": state.registry.len(),
    }))
}
