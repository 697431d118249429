//! Engine wiring shared by every tool handler
//!
//! One [`Engines`] value per server process: stores, builder, retriever,
//! episode and coordination engines, the shared graph index, per-project
//! rebuild locks, and the watcher registry. Handlers receive it inside a
//! [`ToolContext`] together with the calling session id.

use dashmap::DashMap;
use mnemograph_coordination::CoordinationEngine;
use mnemograph_core::{
    Error, ProjectContext, Result, SessionManager, Settings, WorkspaceConfig,
};
use mnemograph_graph::builder::{BuildMode, BuildReport, BuildRequest, GraphBuilder, IgnoreSet};
use mnemograph_graph::index::{load_snapshot, GraphIndex, ProjectSnapshot, SymbolEntry};
use mnemograph_graph::store::GraphStore;
use mnemograph_graph::summary::Summarize;
use mnemograph_graph::watch::WorkspaceWatcher;
use mnemograph_graph::community::detect_communities;
use mnemograph_graph::model::EdgeKind;
use mnemograph_memory::EpisodeEngine;
use mnemograph_retrieval::{Embedder, HybridRetriever, VectorStore};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

pub struct Engines {
    pub settings: Settings,
    pub sessions: Arc<SessionManager>,
    pub store: Arc<dyn GraphStore>,
    pub vectors: Arc<dyn VectorStore>,
    pub embedder: Arc<dyn Embedder>,
    pub builder: Arc<GraphBuilder>,
    pub index: Arc<GraphIndex>,
    pub retriever: Arc<HybridRetriever>,
    pub episodes: Arc<EpisodeEngine>,
    pub coordination: Arc<CoordinationEngine>,
    /// projectId → embeddings synced with the latest rebuild.
    pub embeddings_ready: DashMap<String, bool>,
    /// Serializes rebuilds per project; cross-project builds stay concurrent.
    rebuild_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    /// One OS watch handle per workspace; registration is idempotent.
    pub watchers: DashMap<PathBuf, WorkspaceWatcher>,
}

impl Engines {
    pub fn new(
        settings: Settings,
        store: Arc<dyn GraphStore>,
        vectors: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        summarizer: Arc<dyn Summarize>,
    ) -> Arc<Self> {
        let sessions = Arc::new(SessionManager::new());
        let index = Arc::new(GraphIndex::new());
        let builder = Arc::new(GraphBuilder::new(store.clone(), summarizer));
        let retriever = Arc::new(HybridRetriever::new(
            store.clone(),
            vectors.clone(),
            embedder.clone(),
            index.clone(),
        ));
        let episodes = Arc::new(EpisodeEngine::new(
            store.clone(),
            vectors.clone(),
            embedder.clone(),
        ));
        let coordination = Arc::new(CoordinationEngine::new(store.clone()));
        Arc::new(Self {
            settings,
            sessions,
            store,
            vectors,
            embedder,
            builder,
            index,
            retriever,
            episodes,
            coordination,
            embeddings_ready: DashMap::new(),
            rebuild_locks: DashMap::new(),
            watchers: DashMap::new(),
        })
    }

    /// Ignore patterns for a workspace: built-ins + env + `.mnemograph.json`.
    pub fn ignore_set(&self, ctx: &ProjectContext) -> IgnoreSet {
        let workspace = WorkspaceConfig::load(&ctx.workspace_root);
        IgnoreSet::new(&self.settings.merged_ignore_patterns(&workspace))
    }

    fn rebuild_lock(&self, project: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.rebuild_locks
            .entry(project.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Run a rebuild under the per-project lock, then sync the shared index
    /// and mark embeddings stale.
    pub async fn run_rebuild(
        self: &Arc<Self>,
        ctx: &ProjectContext,
        mode: BuildMode,
        request: BuildRequest,
    ) -> Result<BuildReport> {
        let lock = self.rebuild_lock(&ctx.project_id);
        let _guard = lock.lock().await;
        let ignore = self.ignore_set(ctx);
        let report = self.builder.rebuild(ctx, &ignore, mode, request).await?;
        self.sync_index(ctx).await?;
        self.embeddings_ready.insert(ctx.project_id.clone(), false);
        self.retriever.invalidate(&ctx.project_id);
        Ok(report)
    }

    /// Refresh the in-memory index from the authoritative store.
    pub async fn sync_index(&self, ctx: &ProjectContext) -> Result<()> {
        let snapshot = load_snapshot(&self.store, &ctx.project_id, &ctx.workspace_root).await?;
        self.index.replace(&ctx.project_id, snapshot);
        Ok(())
    }

    /// Post-rebuild follow-ups. The stale-claim sweep runs after every
    /// rebuild; embedding regeneration and community recomputation only
    /// after full ones.
    pub async fn post_rebuild(self: &Arc<Self>, ctx: &ProjectContext, full: bool) {
        if let Err(e) = self.coordination.sweep_stale(&ctx.project_id).await {
            warn!("stale-claim sweep failed: {}", e);
        }
        if !full {
            return;
        }
        match self.retriever.reindex_embeddings(ctx).await {
            Ok(count) => {
                self.embeddings_ready.insert(ctx.project_id.clone(), true);
                info!(project = %ctx.project_id, points = count, "embeddings ready");
            }
            Err(e) => warn!("embedding regeneration failed: {}", e),
        }
        if let Err(e) = self.recompute_communities(ctx).await {
            warn!("community recomputation failed: {}", e);
        }
    }

    pub async fn recompute_communities(&self, ctx: &ProjectContext) -> Result<usize> {
        let snapshot = self.snapshot(ctx).await?;
        let edges = self
            .store
            .project_edges(&ctx.project_id, &[EdgeKind::Imports, EdgeKind::References])
            .await?;
        let communities = detect_communities(&ctx.project_id, &snapshot.files, &edges);
        let count = communities.len();
        self.store
            .replace_communities(&ctx.project_id, &communities)
            .await?;
        Ok(count)
    }

    pub async fn snapshot(&self, ctx: &ProjectContext) -> Result<Arc<ProjectSnapshot>> {
        self.retriever.ensure_snapshot(ctx).await
    }

    /// Caches keyed by a replaced project are dropped when a session's
    /// workspace changes.
    pub fn on_workspace_changed(&self, old: &ProjectContext) {
        self.index.invalidate(&old.project_id);
        self.retriever.invalidate(&old.project_id);
        self.embeddings_ready.insert(old.project_id.clone(), false);
    }

    /// Resolve a tool `target` argument to a symbol: exact SCIP id, exact
    /// name, case-insensitive name, then path suffix.
    pub async fn resolve_symbol(
        &self,
        ctx: &ProjectContext,
        target: &str,
    ) -> Result<Option<SymbolEntry>> {
        let snapshot = self.snapshot(ctx).await?;
        if let Some(symbol) = snapshot.symbol(target) {
            return Ok(Some(symbol.clone()));
        }
        if let Some(symbol) = snapshot.symbols.iter().find(|s| s.name == target) {
            return Ok(Some(symbol.clone()));
        }
        let lowered = target.to_ascii_lowercase();
        if let Some(symbol) = snapshot
            .symbols
            .iter()
            .find(|s| s.name.to_ascii_lowercase() == lowered)
        {
            return Ok(Some(symbol.clone()));
        }
        Ok(snapshot
            .symbols
            .iter()
            .find(|s| s.path.ends_with(target))
            .cloned())
    }
}

#[derive(Clone)]
pub struct ToolContext {
    pub engines: Arc<Engines>,
    pub session_id: String,
}

impl ToolContext {
    pub fn new(engines: Arc<Engines>, session_id: impl Into<String>) -> Self {
        Self {
            engines,
            session_id: session_id.into(),
        }
    }

    /// Active project for the calling session.
    pub fn project(&self) -> Result<ProjectContext> {
        self.engines.sessions.context(&self.session_id)
    }

    pub fn agent_id(&self, args: &serde_json::Value) -> String {
        args.get("agentId")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("session:{}", self.session_id))
    }
}

impl std::fmt::Debug for Engines {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engines")
            .field("graph_backend", &self.store.backend())
            .field("vector_backend", &self.vectors.backend())
            .finish()
    }
}

/// Convenience for error paths that need a non-empty context.
pub fn require_project(ctx: &ToolContext) -> Result<ProjectContext> {
    ctx.project().map_err(|_| {
        Error::WorkspaceNotFound(
            "no workspace configured for this session; call graph_set_workspace first".into(),
        )
    })
}
