//! Episode engine — add, recall, decision query
//!
//! Episodes are immutable memory records chained per (agent, session) via
//! NEXT_EPISODE. Recall blends vector similarity, recency decay and entity
//! overlap:
//!
//!   score = 0.50·cosine + 0.30·exp(-0.05·age_days) + 0.20·jaccard(entities)

use chrono::{DateTime, Utc};
use mnemograph_core::{Error, ProjectContext, Result};
use mnemograph_graph::model::{Episode, EpisodeType};
use mnemograph_graph::store::{EpisodeFilter, GraphStore};
use mnemograph_retrieval::embed::{cosine, Embedder};
use mnemograph_retrieval::vector::{episodes_collection, VectorPoint, VectorStore};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

const VECTOR_WEIGHT: f64 = 0.50;
const RECENCY_WEIGHT: f64 = 0.30;
const ENTITY_WEIGHT: f64 = 0.20;
/// decision_query raises the proximity weight when affected files overlap.
const DECISION_PROXIMITY_WEIGHT: f64 = 0.50;

pub struct EpisodeEngine {
    store: Arc<dyn GraphStore>,
    vectors: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
}

#[derive(Debug, Clone)]
pub struct EpisodeInput {
    pub agent_id: String,
    pub session_id: String,
    /// Any casing; normalized to upper case.
    pub episode_type: String,
    pub content: String,
    pub entities: Vec<String>,
    pub task_id: Option<String>,
    pub outcome: Option<String>,
    pub metadata: Value,
    pub sensitive: bool,
}

#[derive(Debug, Clone)]
pub struct RecallQuery {
    pub query: String,
    pub agent_id: Option<String>,
    pub task_id: Option<String>,
    pub types: Vec<EpisodeType>,
    pub entities: Vec<String>,
    pub limit: usize,
    pub since: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoredEpisode {
    pub episode: Episode,
    pub score: f64,
    /// Per-term breakdown, surfaced in debug profile.
    #[serde(rename = "vectorScore")]
    pub vector_score: f64,
    pub recency: f64,
    #[serde(rename = "entityOverlap")]
    pub entity_overlap: f64,
}

fn jaccard(a: &[String], b: &[String]) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let sa: HashSet<&String> = a.iter().collect();
    let sb: HashSet<&String> = b.iter().collect();
    let intersection = sa.intersection(&sb).count() as f64;
    let union = sa.union(&sb).count() as f64;
    if union == 0.0 {
        0.0
    } else {
        intersection / union
    }
}

impl EpisodeEngine {
    pub fn new(
        store: Arc<dyn GraphStore>,
        vectors: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            store,
            vectors,
            embedder,
        }
    }

    pub fn store(&self) -> &Arc<dyn GraphStore> {
        &self.store
    }

    /// Persist a new episode. DECISION episodes must carry a rationale in
    /// their metadata (`rationale`, or the synonym `reason`).
    pub async fn add(&self, ctx: &ProjectContext, input: EpisodeInput) -> Result<Episode> {
        let episode_type = EpisodeType::parse(&input.episode_type)
            .ok_or_else(|| Error::invalid_argument(format!("type '{}'", input.episode_type)))?;
        if episode_type == EpisodeType::Decision {
            let has_rationale = input
                .metadata
                .get("rationale")
                .or_else(|| input.metadata.get("reason"))
                .and_then(|v| v.as_str())
                .map(|s| !s.trim().is_empty())
                .unwrap_or(false);
            if !has_rationale {
                return Err(Error::DecisionRequiresRationale);
            }
        }
        if input.content.trim().is_empty() {
            return Err(Error::invalid_argument("content"));
        }

        // Keep only entities that resolve to a known node.
        let mut entities = Vec::new();
        for entity in &input.entities {
            if self.store.current_code_node(entity).await?.is_some() {
                entities.push(entity.clone());
            } else {
                debug!("dropping unresolvable episode entity {}", entity);
            }
        }

        let episode = Episode {
            id: uuid::Uuid::new_v4().to_string(),
            project_id: ctx.project_id.clone(),
            agent_id: input.agent_id,
            session_id: input.session_id,
            task_id: input.task_id,
            episode_type,
            content: input.content,
            timestamp: Utc::now(),
            outcome: input.outcome,
            sensitive: input.sensitive,
            metadata: input.metadata,
            entities,
            derived_from: Vec::new(),
        };
        self.store.insert_episode(&episode).await?;

        let point = VectorPoint {
            id: episode.id.clone(),
            vector: self.embedder.embed(&episode.content),
            payload: json!({
                "projectId": ctx.project_id,
                "agentId": episode.agent_id,
                "type": episode.episode_type.as_str(),
                "sensitive": episode.sensitive,
            }),
        };
        // Vector persistence is best-effort; the graph row is authoritative.
        if let Err(e) = self
            .vectors
            .upsert(&episodes_collection(&ctx.project_id), vec![point])
            .await
        {
            debug!("episode embedding not persisted: {}", e);
        }
        Ok(episode)
    }

    pub async fn recall(
        &self,
        ctx: &ProjectContext,
        caller: Option<&str>,
        query: RecallQuery,
    ) -> Result<Vec<ScoredEpisode>> {
        let candidates = self
            .store
            .episodes(&EpisodeFilter {
                project_id: ctx.project_id.clone(),
                agent_id: query.agent_id.clone(),
                session_id: None,
                task_id: query.task_id.clone(),
                types: query.types.clone(),
                since: query.since,
                limit: None,
                include_sensitive: false,
                caller: caller.map(|c| c.to_string()),
            })
            .await?;
        let query_vector = self.embedder.embed(&query.query);
        let now = Utc::now();
        let mut scored: Vec<ScoredEpisode> = candidates
            .into_iter()
            .map(|episode| {
                let vector_score =
                    cosine(&query_vector, &self.embedder.embed(&episode.content)) as f64;
                let age_days = (now - episode.timestamp).num_seconds().max(0) as f64 / 86_400.0;
                let recency = (-0.05 * age_days).exp();
                let entity_overlap = jaccard(&query.entities, &episode.entities);
                let score = VECTOR_WEIGHT * vector_score
                    + RECENCY_WEIGHT * recency
                    + ENTITY_WEIGHT * entity_overlap;
                ScoredEpisode {
                    episode,
                    score,
                    vector_score,
                    recency,
                    entity_overlap,
                }
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(query.limit);
        Ok(scored)
    }

    /// Recall restricted to DECISION episodes. When `affected_files`
    /// overlaps an episode's entities the proximity term takes half the
    /// weight.
    pub async fn decision_query(
        &self,
        ctx: &ProjectContext,
        caller: Option<&str>,
        query: &str,
        affected_files: &[String],
        limit: usize,
    ) -> Result<Vec<ScoredEpisode>> {
        let mut scored = self
            .recall(
                ctx,
                caller,
                RecallQuery {
                    query: query.to_string(),
                    agent_id: None,
                    task_id: None,
                    types: vec![EpisodeType::Decision],
                    entities: affected_files.to_vec(),
                    limit: usize::MAX,
                    since: None,
                },
            )
            .await?;
        if !affected_files.is_empty() {
            for entry in scored.iter_mut() {
                entry.score = DECISION_PROXIMITY_WEIGHT * entry.entity_overlap
                    + RECENCY_WEIGHT * entry.vector_score
                    + ENTITY_WEIGHT * entry.recency;
            }
            scored.sort_by(|a, b| {
                b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal)
            });
        }
        scored.truncate(limit);
        Ok(scored)
    }
}
