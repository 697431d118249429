//! The graph-store seam
//!
//! Everything above this trait works the same against Memgraph (Bolt) and
//! the in-memory reference store. Structured operations cover what the
//! engines need; `execute_cypher` is the raw escape hatch for the
//! `graph_query` tool.

use crate::model::{
    Claim, CodeKind, CodeNode, Community, DocNode, Edge, EdgeKind, Episode, EpisodeType, Learning,
    TxRecord,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mnemograph_core::Result;
use serde_json::Value;

/// One result row of a raw Cypher query.
pub type Row = serde_json::Map<String, Value>;

#[derive(Debug, Clone, Default)]
pub struct EpisodeFilter {
    pub project_id: String,
    pub agent_id: Option<String>,
    pub session_id: Option<String>,
    pub task_id: Option<String>,
    pub types: Vec<EpisodeType>,
    pub since: Option<DateTime<Utc>>,
    /// Newest-first cap.
    pub limit: Option<usize>,
    /// When false, `sensitive=true` episodes are excluded unless `caller`
    /// matches the author.
    pub include_sensitive: bool,
    /// Agent on whose behalf the query runs; governs sensitive visibility.
    pub caller: Option<String>,
}

#[derive(Debug, Clone)]
pub enum ClaimOutcome {
    /// The claim is active for the caller (freshly created, or the caller's
    /// own still-active claim on the same target).
    Created(Claim),
    /// Another agent holds an active claim; nothing was written.
    Conflict { existing: Claim },
}

#[derive(Debug, Clone)]
pub enum ReleaseOutcome {
    Released(Claim),
    AlreadyClosed(Claim),
    NotFound,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct FileChanges {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub removed: Vec<String>,
}

#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Liveness check against the backend.
    async fn ping(&self) -> Result<()>;

    fn backend(&self) -> &'static str;

    // -- transactions -------------------------------------------------------

    async fn create_tx(&self, tx: &TxRecord) -> Result<()>;
    async fn finalize_tx(
        &self,
        project: &str,
        tx_id: &str,
        files_affected: &[String],
        node_count: u64,
        duration_ms: u64,
    ) -> Result<()>;
    async fn tx_by_id(&self, project: &str, tx_id: &str) -> Result<Option<TxRecord>>;
    async fn latest_tx(&self, project: &str) -> Result<Option<TxRecord>>;
    async fn tx_count(&self, project: &str) -> Result<u64>;

    // -- code nodes (bi-temporal) ------------------------------------------

    async fn current_code_node(&self, id: &str) -> Result<Option<CodeNode>>;
    async fn code_node_as_of(&self, id: &str, at: DateTime<Utc>) -> Result<Option<CodeNode>>;
    async fn current_code_nodes(&self, project: &str, kinds: &[CodeKind]) -> Result<Vec<CodeNode>>;
    /// Current FUNCTION/CLASS/IMPORT/EXPORT nodes whose `path` matches.
    async fn current_symbols_for_file(&self, project: &str, path: &str) -> Result<Vec<CodeNode>>;
    /// All versions of an id, newest first.
    async fn versions_of(&self, id: &str) -> Result<Vec<CodeNode>>;
    /// Retire the current version at `node.valid_from` (when one exists),
    /// insert `node` as the new current version, and link
    /// `(new)-[:SUPERSEDES]->(old)`. Returns `true` when a version was
    /// superseded. SUPERSEDES monotonicity holds by construction:
    /// `new.validFrom = old.validTo`.
    async fn replace_version(&self, node: CodeNode) -> Result<bool>;
    /// Retire the current version without a successor (file deleted).
    async fn close_version(&self, id: &str, at: DateTime<Utc>) -> Result<Option<CodeNode>>;

    // -- edges --------------------------------------------------------------

    async fn upsert_edges(&self, edges: &[Edge]) -> Result<()>;
    async fn drop_edges_from(&self, from: &str, kinds: &[EdgeKind]) -> Result<()>;
    async fn edges_from(&self, from: &str, kinds: &[EdgeKind]) -> Result<Vec<Edge>>;
    async fn edges_to(&self, to: &str, kinds: &[EdgeKind]) -> Result<Vec<Edge>>;
    async fn project_edges(&self, project: &str, kinds: &[EdgeKind]) -> Result<Vec<Edge>>;

    // -- episodes & learnings ----------------------------------------------

    /// Insert an immutable episode; INVOLVES edges are derived from
    /// `episode.entities` and the NEXT_EPISODE chain from the author's last
    /// episode in the same session.
    async fn insert_episode(&self, episode: &Episode) -> Result<()>;
    async fn episode_by_id(&self, id: &str) -> Result<Option<Episode>>;
    async fn episodes(&self, filter: &EpisodeFilter) -> Result<Vec<Episode>>;
    async fn last_episode(
        &self,
        project: &str,
        agent: &str,
        session: &str,
    ) -> Result<Option<Episode>>;
    async fn insert_learning(&self, learning: &Learning) -> Result<()>;
    async fn learnings_for(&self, project: &str, targets: &[String]) -> Result<Vec<Learning>>;
    async fn learnings(&self, project: &str, limit: usize) -> Result<Vec<Learning>>;

    // -- claims -------------------------------------------------------------

    /// Conflict check and CREATE as one atomic step: at most one active
    /// claim per (targetId, claimType) across agents.
    async fn try_create_claim(&self, claim: &Claim) -> Result<ClaimOutcome>;
    async fn close_claim(
        &self,
        claim_id: &str,
        at: DateTime<Utc>,
        reason: &str,
    ) -> Result<ReleaseOutcome>;
    async fn claim_by_id(&self, claim_id: &str) -> Result<Option<Claim>>;
    async fn active_claims(&self, project: &str) -> Result<Vec<Claim>>;
    async fn claims_for_agent(&self, project: &str, agent: &str) -> Result<Vec<Claim>>;
    async fn claims_for_task(&self, project: &str, task: &str) -> Result<Vec<Claim>>;
    /// Close active claims whose target gained a newer version
    /// (`code_changed`) or whose TTL elapsed (`expired`). Returns the claims
    /// that were closed.
    async fn invalidate_stale_claims(
        &self,
        project: &str,
        at: DateTime<Utc>,
        ttl_hours: i64,
    ) -> Result<Vec<Claim>>;

    // -- documents -----------------------------------------------------------

    /// Supersede the current DOCUMENT (if any), retire its sections, insert
    /// the new document + sections and their SECTION_OF / NEXT_SECTION edges.
    async fn replace_document(&self, doc: &DocNode, sections: &[DocNode]) -> Result<()>;
    async fn current_documents(&self, project: &str) -> Result<Vec<DocNode>>;
    async fn current_sections(&self, project: &str) -> Result<Vec<DocNode>>;

    // -- communities ----------------------------------------------------------

    /// Drop the previous generation of COMMUNITY nodes for the project and
    /// write the new one (BELONGS_TO edges included).
    async fn replace_communities(&self, project: &str, communities: &[Community]) -> Result<()>;
    async fn communities(&self, project: &str) -> Result<Vec<Community>>;

    // -- health / diff --------------------------------------------------------

    /// Current-node counts per label.
    async fn label_counts(&self, project: &str) -> Result<Vec<(String, u64)>>;
    /// Files added/modified/removed after `since` (diff_since anchor).
    async fn file_changes_since(&self, project: &str, since: DateTime<Utc>) -> Result<FileChanges>;

    // -- escape hatch ---------------------------------------------------------

    /// Raw Cypher. The in-memory store returns `GRAPH_DB_UNAVAILABLE`.
    async fn execute_cypher(&self, query: &str, params: &[(String, Value)]) -> Result<Vec<Row>>;
}
