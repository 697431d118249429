//! Server state — store selection, request routing, watcher wiring
//!
//! One [`ServerState`] per process, shared by both transports. Stores are
//! probed at startup: the Bolt and Qdrant backends are preferred, with the
//! in-memory implementations as a degraded offline fallback so the server
//! stays useful without infrastructure.

use mnemograph_core::{
    JsonRpcRequest, JsonRpcResponse, ProjectContext, Settings, STDIO_SESSION,
};
use mnemograph_graph::builder::{BuildMode, BuildRequest};
use mnemograph_graph::store::GraphStore;
use mnemograph_graph::summary::{HttpSummarizer, NoSummarizer, Summarize};
use mnemograph_graph::watch::{spawn_watcher, RebuildFn};
use mnemograph_graph::{BoltGraph, MemoryGraph};
use mnemograph_retrieval::{
    HashEmbedder, MemoryVectorStore, QdrantStore, VectorStore, DEFAULT_DIMENSION,
};
use mnemograph_tools::{Engines, ToolContext, ToolRegistry};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub struct ServerState {
    pub engines: Arc<Engines>,
    pub registry: ToolRegistry,
    pub watcher_enabled: bool,
}

impl ServerState {
    /// Probe the external stores and assemble the engines.
    pub async fn init(settings: Settings, watcher_enabled: bool) -> Arc<Self> {
        let store: Arc<dyn GraphStore> = match BoltGraph::connect(&settings.memgraph_uri()).await {
            Ok(graph) => {
                info!(uri = %settings.memgraph_uri(), "connected to graph store over Bolt");
                Arc::new(graph)
            }
            Err(e) => {
                warn!(
                    "graph store unreachable ({}); falling back to the in-memory store",
                    e
                );
                Arc::new(MemoryGraph::new())
            }
        };

        let qdrant = QdrantStore::new(settings.qdrant_url(), DEFAULT_DIMENSION);
        let vectors: Arc<dyn VectorStore> = match qdrant.ping().await {
            Ok(()) => {
                info!(url = %settings.qdrant_url(), "connected to vector store");
                Arc::new(qdrant)
            }
            Err(e) => {
                warn!(
                    "vector store unreachable ({}); falling back to the in-memory store",
                    e
                );
                Arc::new(MemoryVectorStore::new())
            }
        };

        let summarizer: Arc<dyn Summarize> = match settings.summarizer_url.as_deref() {
            Some(url) => {
                info!(url, "remote summarizer configured");
                Arc::new(HttpSummarizer::new(url))
            }
            None => Arc::new(NoSummarizer),
        };

        let embedder = Arc::new(HashEmbedder::default());
        let engines = Engines::new(settings, store, vectors, embedder, summarizer);
        engines.sessions.register(STDIO_SESSION);
        engines.sessions.seed_from_settings(&engines.settings);

        let state = Arc::new(Self {
            engines,
            registry: ToolRegistry::with_defaults(),
            watcher_enabled,
        });

        // A pre-seeded workspace gets its watcher immediately.
        if let Ok(ctx) = state.engines.sessions.context(STDIO_SESSION) {
            state.ensure_watcher(&ctx);
        }
        state
    }

    /// Handle one JSON-RPC request for a session. Notifications return
    /// `None`.
    pub async fn handle_request(
        self: &Arc<Self>,
        session_id: &str,
        request: JsonRpcRequest,
    ) -> Option<JsonRpcResponse> {
        let id = request.id.clone().unwrap_or(Value::Null);
        let is_notification = request.is_notification();
        let response = match request.method.as_str() {
            "initialize" => JsonRpcResponse::ok(
                id,
                json!({
                    "protocolVersion": "2024-11-05",
                    "serverInfo": {
                        "name": "mnemograph",
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                    "capabilities": { "tools": {} },
                    "sessionId": session_id,
                }),
            ),
            "ping" => JsonRpcResponse::ok(id, json!({})),
            "shutdown" => JsonRpcResponse::ok(id, json!({})),
            "tools/list" => {
                let tools: Vec<Value> = self
                    .registry
                    .names()
                    .iter()
                    .filter_map(|name| self.registry.get(name))
                    .map(|spec| {
                        json!({
                            "name": spec.name,
                            "description": spec.description,
                            "inputSchema": spec.input.json_schema(),
                        })
                    })
                    .collect();
                JsonRpcResponse::ok(id, json!({ "tools": tools }))
            }
            "tools/call" => {
                let name = request
                    .params
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();
                let arguments = request
                    .params
                    .get("arguments")
                    .cloned()
                    .unwrap_or_else(|| json!({}));
                let tool_ctx = ToolContext::new(self.engines.clone(), session_id);
                let envelope = self.registry.call_tool(tool_ctx, &name, arguments).await;

                // Workspace changes may need a watcher.
                if envelope.ok && matches!(name.as_str(), "graph_set_workspace" | "init_project_setup") {
                    if let Ok(ctx) = self.engines.sessions.context(session_id) {
                        self.ensure_watcher(&ctx);
                    }
                }

                let text = serde_json::to_string(&envelope).unwrap_or_default();
                JsonRpcResponse::ok(
                    id,
                    json!({
                        "content": [{ "type": "text", "text": text }],
                        "isError": !envelope.ok,
                        "envelope": envelope,
                    }),
                )
            }
            other => JsonRpcResponse::method_not_found(id, other),
        };
        if is_notification {
            None
        } else {
            Some(response)
        }
    }

    /// Register the debounced watcher for a workspace (idempotent).
    pub fn ensure_watcher(self: &Arc<Self>, ctx: &ProjectContext) {
        if !self.watcher_enabled {
            return;
        }
        if self.engines.watchers.contains_key(&ctx.workspace_root) {
            return;
        }
        let ignore = self.engines.ignore_set(ctx);
        let debounce = Duration::from_millis(self.engines.settings.watcher_debounce_ms);
        let engines = self.engines.clone();
        let project = ctx.clone();
        let rebuild: RebuildFn = Arc::new(move |paths| {
            let engines = engines.clone();
            let project = project.clone();
            Box::pin(async move {
                let request = BuildRequest {
                    changed_files: paths,
                    ..Default::default()
                };
                match engines
                    .run_rebuild(&project, BuildMode::Incremental, request)
                    .await
                {
                    Ok(report) => {
                        info!(
                            project = %project.project_id,
                            files = report.files_changed.len(),
                            "watcher rebuild finished"
                        );
                        engines.post_rebuild(&project, false).await;
                    }
                    Err(e) => warn!("watcher rebuild failed: {}", e),
                }
            })
        });
        match spawn_watcher(ctx.clone(), ignore, debounce, rebuild) {
            Ok(watcher) => {
                self.engines
                    .watchers
                    .insert(ctx.workspace_root.clone(), watcher);
            }
            Err(e) => warn!("watcher registration failed: {}", e),
        }
    }
}
