//! Hybrid retrieval: vector + lexical + graph expansion, fused with RRF
//!
//! All natural-language queries route through here. The three rankers run
//! against the project snapshot and the vector store, the union of their
//! top-5 seeds is expanded one hop along weighted edges, and the ranked
//! lists are fused with reciprocal rank fusion (k=60).

use crate::embed::Embedder;
use crate::fuse::{rank_of, reciprocal_rank_fusion};
use crate::lexical::{LexicalDoc, LexicalIndex};
use crate::vector::{symbols_collection, SearchFilter, VectorPoint, VectorStore};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use mnemograph_core::{ProjectContext, Result};
use mnemograph_graph::index::{load_snapshot, GraphIndex, ProjectSnapshot, SymbolEntry};
use mnemograph_graph::model::EdgeKind;
use mnemograph_graph::store::GraphStore;
use serde::Serialize;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Candidates considered per ranker before fusion.
const CANDIDATE_LIMIT: usize = 20;
/// Seeds taken from each ranker for graph expansion.
const SEED_LIMIT: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Local,
    Global,
    Hybrid,
}

impl SearchMode {
    pub fn parse(s: Option<&str>) -> Self {
        match s.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            Some("global") => Self::Global,
            Some("hybrid") => Self::Hybrid,
            _ => Self::Local,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RankerRanks {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lexical: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SymbolHit {
    pub id: String,
    pub kind: String,
    pub name: String,
    pub path: String,
    pub summary: String,
    pub score: f64,
    pub ranks: RankerRanks,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommunityHit {
    pub id: String,
    pub label: String,
    pub summary: String,
    #[serde(rename = "memberCount")]
    pub member_count: u64,
    pub score: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RetrievalResult {
    pub hits: Vec<SymbolHit>,
    pub communities: Vec<CommunityHit>,
}

pub struct HybridRetriever {
    store: Arc<dyn GraphStore>,
    vectors: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    index: Arc<GraphIndex>,
    /// Lexical index per project, invalidated when the latest tx moves.
    lexical_cache: DashMap<String, (Option<String>, Arc<LexicalIndex>)>,
}

impl HybridRetriever {
    pub fn new(
        store: Arc<dyn GraphStore>,
        vectors: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        index: Arc<GraphIndex>,
    ) -> Self {
        Self {
            store,
            vectors,
            embedder,
            index,
            lexical_cache: DashMap::new(),
        }
    }

    pub fn invalidate(&self, project: &str) {
        self.lexical_cache.remove(project);
    }

    /// Snapshot from the shared index, loading from the store on first use
    /// after a restart.
    pub async fn ensure_snapshot(&self, ctx: &ProjectContext) -> Result<Arc<ProjectSnapshot>> {
        if let Some(snapshot) = self.index.snapshot(&ctx.project_id) {
            return Ok(snapshot);
        }
        let snapshot = load_snapshot(&self.store, &ctx.project_id, &ctx.workspace_root).await?;
        self.index.replace(&ctx.project_id, snapshot);
        Ok(self
            .index
            .snapshot(&ctx.project_id)
            .expect("snapshot present after replace"))
    }

    fn lexical_for(&self, project: &str, snapshot: &ProjectSnapshot) -> Arc<LexicalIndex> {
        if let Some(entry) = self.lexical_cache.get(project) {
            if entry.0 == snapshot.latest_tx {
                return entry.1.clone();
            }
        }
        let docs: Vec<LexicalDoc> = snapshot
            .symbols
            .iter()
            .map(|s| LexicalDoc {
                id: s.id.clone(),
                name: s.name.clone(),
                summary: s.summary.clone(),
                path: s.path.clone(),
            })
            .chain(snapshot.files.iter().map(|f| LexicalDoc {
                id: f.id.clone(),
                name: f.rel_path.clone(),
                summary: String::new(),
                path: f.path.clone(),
            }))
            .collect();
        let index = Arc::new(LexicalIndex::build(&docs));
        self.lexical_cache
            .insert(project.to_string(), (snapshot.latest_tx.clone(), index.clone()));
        index
    }

    /// Re-embed every symbol summary into `symbols_{project}`. Returns the
    /// number of points written.
    pub async fn reindex_embeddings(&self, ctx: &ProjectContext) -> Result<usize> {
        let snapshot = self.ensure_snapshot(ctx).await?;
        let points: Vec<VectorPoint> = snapshot
            .symbols
            .iter()
            .filter(|s| !s.summary.is_empty())
            .map(|s| VectorPoint {
                id: s.id.clone(),
                vector: self.embedder.embed(&s.summary),
                payload: json!({
                    "projectId": ctx.project_id,
                    "kind": s.kind.label(),
                    "name": s.name,
                    "path": s.path,
                    "summary": s.summary,
                }),
            })
            .collect();
        let count = points.len();
        self.vectors
            .upsert(&symbols_collection(&ctx.project_id), points)
            .await?;
        debug!(project = %ctx.project_id, points = count, "embeddings reindexed");
        Ok(count)
    }

    pub async fn search(
        &self,
        ctx: &ProjectContext,
        query: &str,
        mode: SearchMode,
        limit: usize,
        as_of: Option<DateTime<Utc>>,
    ) -> Result<RetrievalResult> {
        let mut result = RetrievalResult::default();
        if matches!(mode, SearchMode::Local | SearchMode::Hybrid) {
            result.hits = self.symbol_search(ctx, query, limit, as_of).await?;
        }
        if matches!(mode, SearchMode::Global | SearchMode::Hybrid) {
            result.communities = self.community_search(ctx, query, limit).await?;
        }
        Ok(result)
    }

    async fn symbol_search(
        &self,
        ctx: &ProjectContext,
        query: &str,
        limit: usize,
        as_of: Option<DateTime<Utc>>,
    ) -> Result<Vec<SymbolHit>> {
        let snapshot = self.ensure_snapshot(ctx).await?;

        let query_vector = self.embedder.embed(query);
        let vector_hits = self
            .vectors
            .search(
                &symbols_collection(&ctx.project_id),
                &query_vector,
                CANDIDATE_LIMIT,
                &SearchFilter::project(&ctx.project_id),
            )
            .await
            .unwrap_or_default();
        let mut vector_ids: Vec<String> = vector_hits
            .into_iter()
            .map(|h| h.point.id)
            .filter(|id| snapshot.symbol(id).is_some())
            .collect();

        let lexical = self.lexical_for(&ctx.project_id, &snapshot);
        let mut lexical_ids: Vec<String> = lexical
            .search(query, CANDIDATE_LIMIT)
            .into_iter()
            .map(|(id, _)| id)
            .collect();

        if let Some(at) = as_of {
            vector_ids = self.filter_as_of(vector_ids, at).await;
            lexical_ids = self.filter_as_of(lexical_ids, at).await;
        }

        let graph_ids = self.expand_seeds(&snapshot, &vector_ids, &lexical_ids);

        let fused = reciprocal_rank_fusion(&[
            vector_ids.clone(),
            lexical_ids.clone(),
            graph_ids.clone(),
        ]);

        let mut hits = Vec::new();
        for (id, score) in fused {
            if hits.len() >= limit {
                break;
            }
            let ranks = RankerRanks {
                vector: rank_of(&vector_ids, &id),
                lexical: rank_of(&lexical_ids, &id),
                graph: rank_of(&graph_ids, &id),
            };
            if let Some(symbol) = snapshot.symbol(&id) {
                hits.push(SymbolHit {
                    id,
                    kind: symbol.kind.label().to_string(),
                    name: symbol.name.clone(),
                    path: symbol.path.clone(),
                    summary: symbol.summary.clone(),
                    score,
                    ranks,
                });
            } else if let Some(file) = snapshot.file(&id) {
                hits.push(SymbolHit {
                    id,
                    kind: "FILE".to_string(),
                    name: file.rel_path.clone(),
                    path: file.path.clone(),
                    summary: String::new(),
                    score,
                    ranks,
                });
            }
        }
        Ok(hits)
    }

    async fn filter_as_of(&self, ids: Vec<String>, at: DateTime<Utc>) -> Vec<String> {
        let mut kept = Vec::new();
        for id in ids {
            if let Ok(Some(_)) = self.store.code_node_as_of(&id, at).await {
                kept.push(id);
            }
        }
        kept
    }

    /// One weighted hop from the union of the top seeds of each ranker.
    fn expand_seeds(
        &self,
        snapshot: &ProjectSnapshot,
        vector_ids: &[String],
        lexical_ids: &[String],
    ) -> Vec<String> {
        let mut seeds: Vec<String> = Vec::new();
        for id in vector_ids.iter().take(SEED_LIMIT).chain(lexical_ids.iter().take(SEED_LIMIT)) {
            if !seeds.contains(id) {
                seeds.push(id.clone());
            }
        }
        let weight = |kind: EdgeKind| match kind {
            EdgeKind::Calls => 0.9,
            EdgeKind::Imports | EdgeKind::References => 0.7,
            EdgeKind::Contains => 0.5,
            _ => 0.0,
        };
        let mut out = seeds.clone();
        let mut seen: HashSet<String> = seeds.iter().cloned().collect();
        for seed in &seeds {
            let mut neighbors: Vec<(f64, String)> = snapshot
                .edges
                .iter()
                .filter_map(|e| {
                    let w = weight(e.kind);
                    if w == 0.0 {
                        return None;
                    }
                    if &e.from == seed {
                        Some((w, e.to.clone()))
                    } else if &e.to == seed {
                        Some((w, e.from.clone()))
                    } else {
                        None
                    }
                })
                .collect();
            neighbors.sort_by(|a, b| {
                b.0.partial_cmp(&a.0)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.1.cmp(&b.1))
            });
            for (_, id) in neighbors {
                if seen.insert(id.clone()) {
                    out.push(id);
                }
            }
        }
        out
    }

    async fn community_search(
        &self,
        ctx: &ProjectContext,
        query: &str,
        limit: usize,
    ) -> Result<Vec<CommunityHit>> {
        let communities = self.store.communities(&ctx.project_id).await?;
        if communities.is_empty() {
            return Ok(Vec::new());
        }
        let docs: Vec<LexicalDoc> = communities
            .iter()
            .map(|c| LexicalDoc {
                id: c.id.clone(),
                name: c.label.clone(),
                summary: c.summary.clone(),
                path: String::new(),
            })
            .collect();
        let index = LexicalIndex::build(&docs);
        let ranked = index.search(query, limit);
        Ok(ranked
            .into_iter()
            .filter_map(|(id, score)| {
                communities.iter().find(|c| c.id == id).map(|c| CommunityHit {
                    id: c.id.clone(),
                    label: c.label.clone(),
                    summary: c.summary.clone(),
                    member_count: c.member_count,
                    score,
                })
            })
            .collect())
    }

    /// Vector neighbours of an existing symbol, excluding itself.
    pub async fn similar_to(
        &self,
        ctx: &ProjectContext,
        target: &SymbolEntry,
        limit: usize,
    ) -> Result<Vec<SymbolHit>> {
        let snapshot = self.ensure_snapshot(ctx).await?;
        let vector = self.embedder.embed(&target.summary);
        let hits = self
            .vectors
            .search(
                &symbols_collection(&ctx.project_id),
                &vector,
                limit + 1,
                &SearchFilter::project(&ctx.project_id),
            )
            .await?;
        Ok(hits
            .into_iter()
            .filter(|h| h.point.id != target.id)
            .take(limit)
            .filter_map(|h| {
                snapshot.symbol(&h.point.id).map(|s| SymbolHit {
                    id: s.id.clone(),
                    kind: s.kind.label().to_string(),
                    name: s.name.clone(),
                    path: s.path.clone(),
                    summary: s.summary.clone(),
                    score: h.score as f64,
                    ranks: RankerRanks {
                        vector: Some(1),
                        ..Default::default()
                    },
                })
            })
            .collect())
    }
}
