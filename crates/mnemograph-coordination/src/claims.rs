//! Claim lifecycle
//!
//! A claim is an exclusive-work marker: active while `validTo` is null,
//! closed terminally by release, task completion, code change or expiry.
//! The conflict check and CREATE are a single atomic store operation, so
//! two agents cannot both land a claim on one target.

use chrono::Utc;
use mnemograph_core::{Error, ProjectContext, Result};
use mnemograph_graph::model::{Claim, ClaimType};
use mnemograph_graph::store::{ClaimOutcome, GraphStore, ReleaseOutcome};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// Active claims older than this are closed as `expired` by the sweep.
pub const CLAIM_TTL_HOURS: i64 = 24;

pub struct CoordinationEngine {
    store: Arc<dyn GraphStore>,
}

#[derive(Debug, Clone)]
pub struct ClaimRequest {
    pub agent_id: String,
    pub session_id: String,
    pub task_id: Option<String>,
    pub claim_type: String,
    pub target_id: String,
    pub intent: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status")]
pub enum ClaimResult {
    #[serde(rename = "ok")]
    Ok {
        #[serde(rename = "claimId")]
        claim_id: String,
        #[serde(rename = "targetVersionSHA", skip_serializing_if = "Option::is_none")]
        target_version_sha: Option<String>,
    },
    #[serde(rename = "CONFLICT")]
    Conflict { conflict: ConflictInfo },
}

#[derive(Debug, Clone, Serialize)]
pub struct ConflictInfo {
    #[serde(rename = "agentId")]
    pub agent_id: String,
    pub intent: String,
    pub since: chrono::DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentStatus {
    #[serde(rename = "agentId")]
    pub agent_id: String,
    #[serde(rename = "activeClaims")]
    pub active_claims: Vec<Claim>,
    #[serde(rename = "closedClaims")]
    pub closed_claims: Vec<Claim>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Overview {
    #[serde(rename = "activeClaims")]
    pub active_claims: Vec<Claim>,
    #[serde(rename = "byAgent")]
    pub by_agent: BTreeMap<String, usize>,
}

impl CoordinationEngine {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn GraphStore> {
        &self.store
    }

    pub async fn claim(&self, ctx: &ProjectContext, request: ClaimRequest) -> Result<ClaimResult> {
        let claim_type = ClaimType::parse(&request.claim_type)
            .ok_or_else(|| Error::invalid_argument(format!("claimType '{}'", request.claim_type)))?;
        if request.target_id.trim().is_empty() {
            return Err(Error::invalid_argument("targetId"));
        }

        // Snapshot the target's current content hash so later invalidation
        // can tell which version the claim was made against.
        let target_version_sha = self
            .store
            .current_code_node(&request.target_id)
            .await?
            .map(|node| {
                node.content_hash
                    .unwrap_or_else(|| node.valid_from.timestamp_millis().to_string())
            });

        let claim = Claim {
            id: uuid::Uuid::new_v4().to_string(),
            project_id: ctx.project_id.clone(),
            agent_id: request.agent_id.clone(),
            session_id: request.session_id,
            task_id: request.task_id,
            claim_type,
            target_id: request.target_id.clone(),
            intent: request.intent,
            valid_from: Utc::now(),
            valid_to: None,
            invalidation_reason: None,
            target_version_sha,
        };

        match self.store.try_create_claim(&claim).await? {
            ClaimOutcome::Created(created) => {
                info!(
                    agent = %request.agent_id,
                    target = %request.target_id,
                    claim = %created.id,
                    "claim granted"
                );
                Ok(ClaimResult::Ok {
                    claim_id: created.id,
                    target_version_sha: created.target_version_sha,
                })
            }
            ClaimOutcome::Conflict { existing } => Ok(ClaimResult::Conflict {
                conflict: ConflictInfo {
                    agent_id: existing.agent_id,
                    intent: existing.intent,
                    since: existing.valid_from,
                },
            }),
        }
    }

    pub async fn release(&self, claim_id: &str) -> Result<ReleaseOutcome> {
        self.store.close_claim(claim_id, Utc::now(), "released").await
    }

    pub async fn agent_status(&self, ctx: &ProjectContext, agent_id: &str) -> Result<AgentStatus> {
        let claims = self.store.claims_for_agent(&ctx.project_id, agent_id).await?;
        let (active, closed): (Vec<Claim>, Vec<Claim>) =
            claims.into_iter().partition(|c| c.is_active());
        Ok(AgentStatus {
            agent_id: agent_id.to_string(),
            active_claims: active,
            closed_claims: closed,
        })
    }

    pub async fn overview(&self, ctx: &ProjectContext) -> Result<Overview> {
        let mut active = self.store.active_claims(&ctx.project_id).await?;
        active.sort_by(|a, b| a.valid_from.cmp(&b.valid_from));
        let mut by_agent: BTreeMap<String, usize> = BTreeMap::new();
        for claim in &active {
            *by_agent.entry(claim.agent_id.clone()).or_default() += 1;
        }
        Ok(Overview {
            active_claims: active,
            by_agent,
        })
    }

    /// Post-rebuild sweep: close claims whose target changed under them and
    /// claims past their TTL.
    pub async fn sweep_stale(&self, project: &str) -> Result<Vec<Claim>> {
        let closed = self
            .store
            .invalidate_stale_claims(project, Utc::now(), CLAIM_TTL_HOURS)
            .await?;
        if !closed.is_empty() {
            info!(project, closed = closed.len(), "stale claims invalidated");
        }
        Ok(closed)
    }

    /// Task-completion hook: close every active claim on the task with
    /// reason `task_completed`; reflection is the caller's follow-up.
    pub async fn complete_task(&self, ctx: &ProjectContext, task_id: &str) -> Result<Vec<Claim>> {
        let now = Utc::now();
        let claims = self.store.claims_for_task(&ctx.project_id, task_id).await?;
        let mut closed = Vec::new();
        for claim in claims.into_iter().filter(|c| c.is_active()) {
            if let ReleaseOutcome::Released(claim) = self
                .store
                .close_claim(&claim.id, now, "task_completed")
                .await?
            {
                closed.push(claim);
            }
        }
        Ok(closed)
    }
}
