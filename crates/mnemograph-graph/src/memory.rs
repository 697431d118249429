//! In-memory reference implementation of [`GraphStore`]
//!
//! Carries the authoritative bi-temporal semantics without an external
//! service: used by the test suite and as a degraded offline mode when the
//! Bolt store is unreachable. Raw Cypher is the one operation it refuses.

use crate::model::*;
use crate::store::*;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use mnemograph_core::{Error, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Default)]
struct State {
    /// Versions per SCIP id, oldest first.
    code: HashMap<String, Vec<CodeNode>>,
    /// Versions per doc id, oldest first.
    docs: HashMap<String, Vec<DocNode>>,
    edges: Vec<Edge>,
    episodes: Vec<Episode>,
    learnings: Vec<Learning>,
    claims: HashMap<String, Claim>,
    communities: HashMap<String, Vec<Community>>,
    txs: Vec<TxRecord>,
}

#[derive(Default)]
pub struct MemoryGraph {
    state: RwLock<State>,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, State> {
        self.state.read().expect("memory graph lock poisoned")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, State> {
        self.state.write().expect("memory graph lock poisoned")
    }
}

fn episode_visible(ep: &Episode, filter: &EpisodeFilter) -> bool {
    if ep.project_id != filter.project_id {
        return false;
    }
    if let Some(agent) = &filter.agent_id {
        if &ep.agent_id != agent {
            return false;
        }
    }
    if let Some(session) = &filter.session_id {
        if &ep.session_id != session {
            return false;
        }
    }
    if let Some(task) = &filter.task_id {
        if ep.task_id.as_deref() != Some(task.as_str()) {
            return false;
        }
    }
    if !filter.types.is_empty() && !filter.types.contains(&ep.episode_type) {
        return false;
    }
    if let Some(since) = filter.since {
        if ep.timestamp < since {
            return false;
        }
    }
    if ep.sensitive && !filter.include_sensitive {
        // Sensitive episodes stay visible to their author.
        if filter.caller.as_deref() != Some(ep.agent_id.as_str()) {
            return false;
        }
    }
    true
}

#[async_trait]
impl GraphStore for MemoryGraph {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }

    // -- transactions -------------------------------------------------------

    async fn create_tx(&self, tx: &TxRecord) -> Result<()> {
        self.write().txs.push(tx.clone());
        Ok(())
    }

    async fn finalize_tx(
        &self,
        project: &str,
        tx_id: &str,
        files_affected: &[String],
        node_count: u64,
        duration_ms: u64,
    ) -> Result<()> {
        let mut state = self.write();
        let Some(tx) = state
            .txs
            .iter_mut()
            .find(|t| t.project_id == project && t.id == tx_id)
        else {
            return Err(Error::internal(format!("finalize of unknown tx {}", tx_id)));
        };
        tx.files_affected = files_affected.to_vec();
        tx.node_count = node_count;
        tx.duration_ms = duration_ms;
        let affects: Vec<Edge> = files_affected
            .iter()
            .map(|f| Edge::new(project, tx_id, f.clone(), EdgeKind::Affects))
            .collect();
        for edge in affects {
            if !state.edges.contains(&edge) {
                state.edges.push(edge);
            }
        }
        Ok(())
    }

    async fn tx_by_id(&self, project: &str, tx_id: &str) -> Result<Option<TxRecord>> {
        Ok(self
            .read()
            .txs
            .iter()
            .find(|t| t.project_id == project && t.id == tx_id)
            .cloned())
    }

    async fn latest_tx(&self, project: &str) -> Result<Option<TxRecord>> {
        Ok(self
            .read()
            .txs
            .iter()
            .filter(|t| t.project_id == project)
            .max_by_key(|t| t.timestamp)
            .cloned())
    }

    async fn tx_count(&self, project: &str) -> Result<u64> {
        Ok(self.read().txs.iter().filter(|t| t.project_id == project).count() as u64)
    }

    // -- code nodes ---------------------------------------------------------

    async fn current_code_node(&self, id: &str) -> Result<Option<CodeNode>> {
        Ok(self
            .read()
            .code
            .get(id)
            .and_then(|versions| versions.iter().find(|n| n.is_current()))
            .cloned())
    }

    async fn code_node_as_of(&self, id: &str, at: DateTime<Utc>) -> Result<Option<CodeNode>> {
        Ok(self
            .read()
            .code
            .get(id)
            .and_then(|versions| versions.iter().find(|n| n.valid_at(at)))
            .cloned())
    }

    async fn current_code_nodes(&self, project: &str, kinds: &[CodeKind]) -> Result<Vec<CodeNode>> {
        Ok(self
            .read()
            .code
            .values()
            .flatten()
            .filter(|n| {
                n.project_id == project && n.is_current() && (kinds.is_empty() || kinds.contains(&n.kind))
            })
            .cloned()
            .collect())
    }

    async fn current_symbols_for_file(&self, project: &str, path: &str) -> Result<Vec<CodeNode>> {
        Ok(self
            .read()
            .code
            .values()
            .flatten()
            .filter(|n| {
                n.project_id == project
                    && n.is_current()
                    && n.path == path
                    && n.kind != CodeKind::File
            })
            .cloned()
            .collect())
    }

    async fn versions_of(&self, id: &str) -> Result<Vec<CodeNode>> {
        let mut versions = self.read().code.get(id).cloned().unwrap_or_default();
        versions.reverse();
        Ok(versions)
    }

    async fn replace_version(&self, node: CodeNode) -> Result<bool> {
        let mut state = self.write();
        let versions = state.code.entry(node.id.clone()).or_default();
        let mut superseded = false;
        if let Some(old) = versions.iter_mut().find(|n| n.is_current()) {
            old.valid_to = Some(node.valid_from);
            superseded = true;
        }
        versions.push(node);
        Ok(superseded)
    }

    async fn close_version(&self, id: &str, at: DateTime<Utc>) -> Result<Option<CodeNode>> {
        let mut state = self.write();
        let Some(versions) = state.code.get_mut(id) else {
            return Ok(None);
        };
        let Some(current) = versions.iter_mut().find(|n| n.is_current()) else {
            return Ok(None);
        };
        current.valid_to = Some(at);
        Ok(Some(current.clone()))
    }

    // -- edges --------------------------------------------------------------

    async fn upsert_edges(&self, edges: &[Edge]) -> Result<()> {
        let mut state = self.write();
        for edge in edges {
            if !state.edges.contains(edge) {
                state.edges.push(edge.clone());
            }
        }
        Ok(())
    }

    async fn drop_edges_from(&self, from: &str, kinds: &[EdgeKind]) -> Result<()> {
        self.write()
            .edges
            .retain(|e| !(e.from == from && kinds.contains(&e.kind)));
        Ok(())
    }

    async fn edges_from(&self, from: &str, kinds: &[EdgeKind]) -> Result<Vec<Edge>> {
        Ok(self
            .read()
            .edges
            .iter()
            .filter(|e| e.from == from && (kinds.is_empty() || kinds.contains(&e.kind)))
            .cloned()
            .collect())
    }

    async fn edges_to(&self, to: &str, kinds: &[EdgeKind]) -> Result<Vec<Edge>> {
        Ok(self
            .read()
            .edges
            .iter()
            .filter(|e| e.to == to && (kinds.is_empty() || kinds.contains(&e.kind)))
            .cloned()
            .collect())
    }

    async fn project_edges(&self, project: &str, kinds: &[EdgeKind]) -> Result<Vec<Edge>> {
        Ok(self
            .read()
            .edges
            .iter()
            .filter(|e| e.project_id == project && (kinds.is_empty() || kinds.contains(&e.kind)))
            .cloned()
            .collect())
    }

    // -- episodes & learnings ----------------------------------------------

    async fn insert_episode(&self, episode: &Episode) -> Result<()> {
        let mut state = self.write();
        let prev = state
            .episodes
            .iter()
            .filter(|e| {
                e.project_id == episode.project_id
                    && e.agent_id == episode.agent_id
                    && e.session_id == episode.session_id
            })
            .max_by_key(|e| e.timestamp)
            .map(|e| e.id.clone());
        if let Some(prev_id) = prev {
            let chain = Edge::new(&episode.project_id, prev_id, episode.id.clone(), EdgeKind::NextEpisode);
            state.edges.push(chain);
        }
        for entity in &episode.entities {
            state.edges.push(Edge::new(
                &episode.project_id,
                episode.id.clone(),
                entity.clone(),
                EdgeKind::Involves,
            ));
        }
        for source in &episode.derived_from {
            state.edges.push(Edge::new(
                &episode.project_id,
                episode.id.clone(),
                source.clone(),
                EdgeKind::DerivedFrom,
            ));
        }
        state.episodes.push(episode.clone());
        Ok(())
    }

    async fn episode_by_id(&self, id: &str) -> Result<Option<Episode>> {
        Ok(self.read().episodes.iter().find(|e| e.id == id).cloned())
    }

    async fn episodes(&self, filter: &EpisodeFilter) -> Result<Vec<Episode>> {
        let state = self.read();
        let mut hits: Vec<Episode> = state
            .episodes
            .iter()
            .filter(|e| episode_visible(e, filter))
            .cloned()
            .collect();
        hits.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if let Some(limit) = filter.limit {
            hits.truncate(limit);
        }
        Ok(hits)
    }

    async fn last_episode(
        &self,
        project: &str,
        agent: &str,
        session: &str,
    ) -> Result<Option<Episode>> {
        Ok(self
            .read()
            .episodes
            .iter()
            .filter(|e| e.project_id == project && e.agent_id == agent && e.session_id == session)
            .max_by_key(|e| e.timestamp)
            .cloned())
    }

    async fn insert_learning(&self, learning: &Learning) -> Result<()> {
        let mut state = self.write();
        for target in &learning.applies_to {
            state.edges.push(Edge::new(
                &learning.project_id,
                learning.id.clone(),
                target.clone(),
                EdgeKind::AppliesTo,
            ));
        }
        state.learnings.push(learning.clone());
        Ok(())
    }

    async fn learnings_for(&self, project: &str, targets: &[String]) -> Result<Vec<Learning>> {
        Ok(self
            .read()
            .learnings
            .iter()
            .filter(|l| {
                l.project_id == project && l.applies_to.iter().any(|t| targets.contains(t))
            })
            .cloned()
            .collect())
    }

    async fn learnings(&self, project: &str, limit: usize) -> Result<Vec<Learning>> {
        let state = self.read();
        let mut out: Vec<Learning> = state
            .learnings
            .iter()
            .filter(|l| l.project_id == project)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.extracted_at.cmp(&a.extracted_at));
        out.truncate(limit);
        Ok(out)
    }

    // -- claims -------------------------------------------------------------

    async fn try_create_claim(&self, claim: &Claim) -> Result<ClaimOutcome> {
        let mut state = self.write();
        let existing = state
            .claims
            .values()
            .find(|c| {
                c.project_id == claim.project_id
                    && c.target_id == claim.target_id
                    && c.claim_type == claim.claim_type
                    && c.is_active()
            })
            .cloned();
        if let Some(existing) = existing {
            if existing.agent_id == claim.agent_id {
                // Idempotent re-claim by the holder.
                return Ok(ClaimOutcome::Created(existing));
            }
            return Ok(ClaimOutcome::Conflict { existing });
        }
        state.claims.insert(claim.id.clone(), claim.clone());
        let targets = Edge::new(
            &claim.project_id,
            claim.id.clone(),
            claim.target_id.clone(),
            EdgeKind::Targets,
        );
        state.edges.push(targets);
        Ok(ClaimOutcome::Created(claim.clone()))
    }

    async fn close_claim(
        &self,
        claim_id: &str,
        at: DateTime<Utc>,
        reason: &str,
    ) -> Result<ReleaseOutcome> {
        let mut state = self.write();
        let Some(claim) = state.claims.get_mut(claim_id) else {
            return Ok(ReleaseOutcome::NotFound);
        };
        if !claim.is_active() {
            return Ok(ReleaseOutcome::AlreadyClosed(claim.clone()));
        }
        claim.valid_to = Some(at);
        claim.invalidation_reason = Some(reason.to_string());
        Ok(ReleaseOutcome::Released(claim.clone()))
    }

    async fn claim_by_id(&self, claim_id: &str) -> Result<Option<Claim>> {
        Ok(self.read().claims.get(claim_id).cloned())
    }

    async fn active_claims(&self, project: &str) -> Result<Vec<Claim>> {
        Ok(self
            .read()
            .claims
            .values()
            .filter(|c| c.project_id == project && c.is_active())
            .cloned()
            .collect())
    }

    async fn claims_for_agent(&self, project: &str, agent: &str) -> Result<Vec<Claim>> {
        Ok(self
            .read()
            .claims
            .values()
            .filter(|c| c.project_id == project && c.agent_id == agent)
            .cloned()
            .collect())
    }

    async fn claims_for_task(&self, project: &str, task: &str) -> Result<Vec<Claim>> {
        Ok(self
            .read()
            .claims
            .values()
            .filter(|c| c.project_id == project && c.task_id.as_deref() == Some(task))
            .cloned()
            .collect())
    }

    async fn invalidate_stale_claims(
        &self,
        project: &str,
        at: DateTime<Utc>,
        ttl_hours: i64,
    ) -> Result<Vec<Claim>> {
        let mut state = self.write();
        let mut closed = Vec::new();
        let targets_newer: Vec<(String, String)> = state
            .claims
            .values()
            .filter(|c| c.project_id == project && c.is_active())
            .filter_map(|c| {
                let target_changed = state
                    .code
                    .get(&c.target_id)
                    .and_then(|versions| versions.iter().find(|n| n.is_current()))
                    .map(|n| n.valid_from > c.valid_from)
                    .unwrap_or(false);
                if target_changed {
                    Some((c.id.clone(), "code_changed".to_string()))
                } else if at - c.valid_from > Duration::hours(ttl_hours) {
                    Some((c.id.clone(), "expired".to_string()))
                } else {
                    None
                }
            })
            .collect();
        for (id, reason) in targets_newer {
            if let Some(claim) = state.claims.get_mut(&id) {
                claim.valid_to = Some(at);
                claim.invalidation_reason = Some(reason);
                closed.push(claim.clone());
            }
        }
        Ok(closed)
    }

    // -- documents -----------------------------------------------------------

    async fn replace_document(&self, doc: &DocNode, sections: &[DocNode]) -> Result<()> {
        let mut state = self.write();
        let old_section_ids: Vec<String> = state
            .docs
            .values()
            .flatten()
            .filter(|d| {
                d.project_id == doc.project_id
                    && d.kind == DocKind::Section
                    && d.relative_path == doc.relative_path
                    && d.is_current()
            })
            .map(|d| d.id.clone())
            .collect();
        for id in &old_section_ids {
            if let Some(versions) = state.docs.get_mut(id) {
                if let Some(current) = versions.iter_mut().find(|d| d.is_current()) {
                    current.valid_to = Some(doc.valid_from);
                }
            }
        }
        let versions = state.docs.entry(doc.id.clone()).or_default();
        if let Some(current) = versions.iter_mut().find(|d| d.is_current()) {
            current.valid_to = Some(doc.valid_from);
        }
        versions.push(doc.clone());

        let mut prev_section: Option<String> = None;
        for section in sections {
            state
                .docs
                .entry(section.id.clone())
                .or_default()
                .push(section.clone());
            let section_of = Edge::new(
                &doc.project_id,
                section.id.clone(),
                doc.id.clone(),
                EdgeKind::SectionOf,
            );
            state.edges.push(section_of);
            if let Some(prev) = prev_section.take() {
                state
                    .edges
                    .push(Edge::new(&doc.project_id, prev, section.id.clone(), EdgeKind::NextSection));
            }
            prev_section = Some(section.id.clone());
        }
        Ok(())
    }

    async fn current_documents(&self, project: &str) -> Result<Vec<DocNode>> {
        Ok(self
            .read()
            .docs
            .values()
            .flatten()
            .filter(|d| d.project_id == project && d.kind == DocKind::Document && d.is_current())
            .cloned()
            .collect())
    }

    async fn current_sections(&self, project: &str) -> Result<Vec<DocNode>> {
        Ok(self
            .read()
            .docs
            .values()
            .flatten()
            .filter(|d| d.project_id == project && d.kind == DocKind::Section && d.is_current())
            .cloned()
            .collect())
    }

    // -- communities ----------------------------------------------------------

    async fn replace_communities(&self, project: &str, communities: &[Community]) -> Result<()> {
        let mut state = self.write();
        state
            .edges
            .retain(|e| !(e.project_id == project && e.kind == EdgeKind::BelongsTo));
        let mut belongs = Vec::new();
        for community in communities {
            for member in &community.members {
                belongs.push(Edge::new(project, member.clone(), community.id.clone(), EdgeKind::BelongsTo));
            }
        }
        state.edges.extend(belongs);
        state
            .communities
            .insert(project.to_string(), communities.to_vec());
        Ok(())
    }

    async fn communities(&self, project: &str) -> Result<Vec<Community>> {
        Ok(self.read().communities.get(project).cloned().unwrap_or_default())
    }

    // -- health / diff --------------------------------------------------------

    async fn label_counts(&self, project: &str) -> Result<Vec<(String, u64)>> {
        let state = self.read();
        let mut counts: HashMap<&'static str, u64> = HashMap::new();
        for node in state.code.values().flatten() {
            if node.project_id == project && node.is_current() {
                *counts.entry(node.kind.label()).or_default() += 1;
            }
        }
        for doc in state.docs.values().flatten() {
            if doc.project_id == project && doc.is_current() {
                *counts.entry(doc.kind.label()).or_default() += 1;
            }
        }
        counts.insert(
            "EPISODE",
            state.episodes.iter().filter(|e| e.project_id == project).count() as u64,
        );
        counts.insert(
            "LEARNING",
            state.learnings.iter().filter(|l| l.project_id == project).count() as u64,
        );
        counts.insert(
            "CLAIM",
            state
                .claims
                .values()
                .filter(|c| c.project_id == project && c.is_active())
                .count() as u64,
        );
        counts.insert(
            "COMMUNITY",
            state.communities.get(project).map(|c| c.len()).unwrap_or(0) as u64,
        );
        counts.insert(
            "GRAPH_TX",
            state.txs.iter().filter(|t| t.project_id == project).count() as u64,
        );
        let mut out: Vec<(String, u64)> = counts
            .into_iter()
            .filter(|(_, n)| *n > 0)
            .map(|(k, n)| (k.to_string(), n))
            .collect();
        out.sort();
        Ok(out)
    }

    async fn file_changes_since(&self, project: &str, since: DateTime<Utc>) -> Result<FileChanges> {
        let state = self.read();
        let mut changes = FileChanges::default();
        for versions in state.code.values() {
            let Some(first) = versions.first() else { continue };
            if first.project_id != project || first.kind != CodeKind::File {
                continue;
            }
            let has_current = versions.iter().any(|n| n.is_current());
            let newest_from = versions.iter().map(|n| n.valid_from).max().unwrap_or(first.valid_from);
            let first_from = first.valid_from;
            if has_current {
                if first_from > since {
                    changes.added.push(first.path.clone());
                } else if newest_from > since {
                    changes.modified.push(first.path.clone());
                }
            } else {
                let closed_at = versions.iter().filter_map(|n| n.valid_to).max();
                if closed_at.map(|t| t > since).unwrap_or(false) {
                    changes.removed.push(first.path.clone());
                }
            }
        }
        changes.added.sort();
        changes.modified.sort();
        changes.removed.sort();
        Ok(changes)
    }

    // -- escape hatch ---------------------------------------------------------

    async fn execute_cypher(&self, _query: &str, _params: &[(String, Value)]) -> Result<Vec<Row>> {
        Err(Error::GraphUnavailable(
            "raw Cypher requires the Bolt backend; the in-memory store serves structured queries only"
                .into(),
        ))
    }
}
