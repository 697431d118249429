//! Bolt-backed [`GraphStore`] for Memgraph
//!
//! Every structured operation is a Cypher template. Wire encoding keeps all
//! parameters primitive: timestamps travel as epoch milliseconds, a
//! `validTo` of `-1` means "current", and optional strings travel as `''`.
//! Connection-class failures are retried up to 3 attempts with exponential
//! backoff; query/constraint errors fail fast.

use crate::model::*;
use crate::store::*;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use mnemograph_core::{Error, Result};
use neo4rs::{query, Graph, Query};
use serde_json::Value;
use std::time::Duration;

const QUERY_TIMEOUT: Duration = Duration::from_secs(10);
const LIVENESS_TIMEOUT: Duration = Duration::from_secs(5);
const RETRY_ATTEMPTS: u32 = 3;

const CODE_LABELS: &[&str] = &["FILE", "FUNCTION", "CLASS", "IMPORT", "EXPORT", "FOLDER"];

/// Fields returned for every code-node query, aliased to stable column names.
const CODE_RETURN: &str = "n.id AS id, n.kind AS kind, n.projectId AS projectId, \
     n.name AS name, n.path AS path, n.language AS language, \
     n.startLine AS startLine, n.endLine AS endLine, n.isExported AS isExported, \
     n.isAbstract AS isAbstract, n.summary AS summary, n.contentHash AS contentHash, \
     n.validFrom AS validFrom, n.validTo AS validTo, n.createdAt AS createdAt, n.txId AS txId";

const CLAIM_RETURN: &str = "c.id AS id, c.projectId AS projectId, c.agentId AS agentId, \
     c.sessionId AS sessionId, c.taskId AS taskId, c.claimType AS claimType, \
     c.targetId AS targetId, c.intent AS intent, c.validFrom AS validFrom, \
     c.validTo AS validTo, c.invalidationReason AS invalidationReason, \
     c.targetVersionSHA AS targetVersionSHA";

const EPISODE_RETURN: &str = "e.id AS id, e.projectId AS projectId, e.agentId AS agentId, \
     e.sessionId AS sessionId, e.taskId AS taskId, e.type AS type, e.content AS content, \
     e.timestamp AS timestamp, e.outcome AS outcome, e.sensitive AS sensitive, \
     e.metadata AS metadata, e.entities AS entities, e.derivedFrom AS derivedFrom";

pub struct BoltGraph {
    graph: Graph,
}

fn millis(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

fn opt_from_millis(ms: i64) -> Option<DateTime<Utc>> {
    (ms >= 0).then(|| from_millis(ms))
}

fn opt_str(s: Option<&str>) -> String {
    s.unwrap_or("").to_string()
}

fn none_if_empty(s: String) -> Option<String> {
    (!s.is_empty()).then_some(s)
}

fn opt_line(n: Option<u32>) -> i64 {
    n.map(|v| v as i64).unwrap_or(-1)
}

fn line_from(n: i64) -> Option<u32> {
    (n >= 0).then_some(n as u32)
}

fn is_transient(err: &neo4rs::Error) -> bool {
    let text = err.to_string().to_ascii_lowercase();
    text.contains("connect")
        || text.contains("io error")
        || text.contains("broken pipe")
        || text.contains("timed out")
        || text.contains("reset")
}

fn map_err(err: neo4rs::Error) -> Error {
    if is_transient(&err) {
        Error::GraphUnavailable(err.to_string())
    } else {
        Error::GraphQueryFailed(err.to_string())
    }
}

impl BoltGraph {
    /// Connect to a Bolt endpoint, e.g. `localhost:7687`. Memgraph accepts
    /// empty credentials by default.
    pub async fn connect(uri: &str) -> Result<Self> {
        let graph = Graph::new(uri, "", "")
            .await
            .map_err(|e| Error::GraphUnavailable(e.to_string()))?;
        let store = Self { graph };
        store.ping().await?;
        Ok(store)
    }

    /// Run a write query with retry on connection-class failures only.
    async fn run(&self, build: impl Fn() -> Query) -> Result<()> {
        let mut attempt = 0;
        loop {
            let result = tokio::time::timeout(QUERY_TIMEOUT, self.graph.run(build())).await;
            match result {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(e)) if attempt + 1 < RETRY_ATTEMPTS && is_transient(&e) => {
                    attempt += 1;
                    tokio::time::sleep(Duration::from_millis(100 * 2u64.pow(attempt))).await;
                }
                Ok(Err(e)) => return Err(map_err(e)),
                Err(_) => return Err(Error::GraphUnavailable("query timed out".into())),
            }
        }
    }

    /// Execute a read query and collect all rows.
    async fn fetch(&self, build: impl Fn() -> Query) -> Result<Vec<neo4rs::Row>> {
        let mut attempt = 0;
        loop {
            let outcome = tokio::time::timeout(QUERY_TIMEOUT, async {
                let mut stream = self.graph.execute(build()).await?;
                let mut rows = Vec::new();
                while let Some(row) = stream.next().await? {
                    rows.push(row);
                }
                Ok::<_, neo4rs::Error>(rows)
            })
            .await;
            match outcome {
                Ok(Ok(rows)) => return Ok(rows),
                Ok(Err(e)) if attempt + 1 < RETRY_ATTEMPTS && is_transient(&e) => {
                    attempt += 1;
                    tokio::time::sleep(Duration::from_millis(100 * 2u64.pow(attempt))).await;
                }
                Ok(Err(e)) => return Err(map_err(e)),
                Err(_) => return Err(Error::GraphUnavailable("query timed out".into())),
            }
        }
    }

    fn code_row(row: &neo4rs::Row) -> Result<CodeNode> {
        let get_str = |key: &str| -> Result<String> {
            row.get::<String>(key)
                .map_err(|e| Error::GraphQueryFailed(format!("bad column {}: {}", key, e)))
        };
        let get_i64 = |key: &str| -> Result<i64> {
            row.get::<i64>(key)
                .map_err(|e| Error::GraphQueryFailed(format!("bad column {}: {}", key, e)))
        };
        let kind_segment = get_str("kind")?;
        let kind = match kind_segment.as_str() {
            "file" => CodeKind::File,
            "function" => CodeKind::Function,
            "class" => CodeKind::Class,
            "import" => CodeKind::Import,
            "export" => CodeKind::Export,
            "folder" => CodeKind::Folder,
            other => {
                return Err(Error::GraphQueryFailed(format!("unknown code kind {}", other)))
            }
        };
        Ok(CodeNode {
            id: get_str("id")?,
            kind,
            project_id: get_str("projectId")?,
            name: get_str("name")?,
            path: get_str("path")?,
            language: none_if_empty(get_str("language")?),
            start_line: line_from(get_i64("startLine")?),
            end_line: line_from(get_i64("endLine")?),
            is_exported: row.get::<bool>("isExported").unwrap_or(false),
            is_abstract: row.get::<bool>("isAbstract").unwrap_or(false),
            summary: none_if_empty(get_str("summary")?),
            content_hash: none_if_empty(get_str("contentHash")?),
            valid_from: from_millis(get_i64("validFrom")?),
            valid_to: opt_from_millis(get_i64("validTo")?),
            created_at: from_millis(get_i64("createdAt")?),
            tx_id: get_str("txId")?,
        })
    }

    fn claim_row(row: &neo4rs::Row) -> Result<Claim> {
        let get_str = |key: &str| -> Result<String> {
            row.get::<String>(key)
                .map_err(|e| Error::GraphQueryFailed(format!("bad column {}: {}", key, e)))
        };
        let get_i64 = |key: &str| -> Result<i64> {
            row.get::<i64>(key)
                .map_err(|e| Error::GraphQueryFailed(format!("bad column {}: {}", key, e)))
        };
        let claim_type = ClaimType::parse(&get_str("claimType")?)
            .ok_or_else(|| Error::GraphQueryFailed("unknown claim type".into()))?;
        Ok(Claim {
            id: get_str("id")?,
            project_id: get_str("projectId")?,
            agent_id: get_str("agentId")?,
            session_id: get_str("sessionId")?,
            task_id: none_if_empty(get_str("taskId")?),
            claim_type,
            target_id: get_str("targetId")?,
            intent: get_str("intent")?,
            valid_from: from_millis(get_i64("validFrom")?),
            valid_to: opt_from_millis(get_i64("validTo")?),
            invalidation_reason: none_if_empty(get_str("invalidationReason")?),
            target_version_sha: none_if_empty(get_str("targetVersionSHA")?),
        })
    }

    fn episode_row(row: &neo4rs::Row) -> Result<Episode> {
        let get_str = |key: &str| -> Result<String> {
            row.get::<String>(key)
                .map_err(|e| Error::GraphQueryFailed(format!("bad column {}: {}", key, e)))
        };
        let episode_type = EpisodeType::parse(&get_str("type")?)
            .ok_or_else(|| Error::GraphQueryFailed("unknown episode type".into()))?;
        let metadata_text = get_str("metadata")?;
        let metadata =
            serde_json::from_str(&metadata_text).unwrap_or(Value::Object(Default::default()));
        Ok(Episode {
            id: get_str("id")?,
            project_id: get_str("projectId")?,
            agent_id: get_str("agentId")?,
            session_id: get_str("sessionId")?,
            task_id: none_if_empty(get_str("taskId")?),
            episode_type,
            content: get_str("content")?,
            timestamp: from_millis(
                row.get::<i64>("timestamp")
                    .map_err(|e| Error::GraphQueryFailed(e.to_string()))?,
            ),
            outcome: none_if_empty(get_str("outcome")?),
            sensitive: row.get::<bool>("sensitive").unwrap_or(false),
            metadata,
            entities: row.get::<Vec<String>>("entities").unwrap_or_default(),
            derived_from: row.get::<Vec<String>>("derivedFrom").unwrap_or_default(),
        })
    }

    fn tx_row(row: &neo4rs::Row) -> Result<TxRecord> {
        let get_str = |key: &str| -> Result<String> {
            row.get::<String>(key)
                .map_err(|e| Error::GraphQueryFailed(format!("bad column {}: {}", key, e)))
        };
        let get_i64 = |key: &str| -> Result<i64> {
            row.get::<i64>(key)
                .map_err(|e| Error::GraphQueryFailed(format!("bad column {}: {}", key, e)))
        };
        Ok(TxRecord {
            id: get_str("id")?,
            project_id: get_str("projectId")?,
            tx_type: get_str("type")?,
            mode: get_str("mode")?,
            agent_id: none_if_empty(get_str("agentId")?),
            session_id: none_if_empty(get_str("sessionId")?),
            git_commit: none_if_empty(get_str("gitCommit")?),
            timestamp: from_millis(get_i64("timestamp")?),
            files_affected: row.get::<Vec<String>>("filesAffected").unwrap_or_default(),
            node_count: get_i64("nodeCount")?.max(0) as u64,
            duration_ms: get_i64("durationMs")?.max(0) as u64,
        })
    }
}

const TX_RETURN: &str = "t.id AS id, t.projectId AS projectId, t.type AS type, t.mode AS mode, \
     t.agentId AS agentId, t.sessionId AS sessionId, t.gitCommit AS gitCommit, \
     t.timestamp AS timestamp, t.filesAffected AS filesAffected, t.nodeCount AS nodeCount, \
     t.durationMs AS durationMs";

#[async_trait]
impl GraphStore for BoltGraph {
    async fn ping(&self) -> Result<()> {
        tokio::time::timeout(LIVENESS_TIMEOUT, self.graph.run(query("RETURN 1")))
            .await
            .map_err(|_| Error::GraphUnavailable("liveness check timed out".into()))?
            .map_err(|e| Error::GraphUnavailable(e.to_string()))
    }

    fn backend(&self) -> &'static str {
        "bolt"
    }

    // -- transactions -------------------------------------------------------

    async fn create_tx(&self, tx: &TxRecord) -> Result<()> {
        let tx = tx.clone();
        self.run(move || {
            query(
                "CREATE (t:GRAPH_TX {id: $id, projectId: $project, type: $type, mode: $mode, \
                 agentId: $agent, sessionId: $session, gitCommit: $commit, timestamp: $ts, \
                 filesAffected: $files, nodeCount: $nodes, durationMs: $duration})",
            )
            .param("id", tx.id.clone())
            .param("project", tx.project_id.clone())
            .param("type", tx.tx_type.clone())
            .param("mode", tx.mode.clone())
            .param("agent", opt_str(tx.agent_id.as_deref()))
            .param("session", opt_str(tx.session_id.as_deref()))
            .param("commit", opt_str(tx.git_commit.as_deref()))
            .param("ts", millis(tx.timestamp))
            .param("files", tx.files_affected.clone())
            .param("nodes", tx.node_count as i64)
            .param("duration", tx.duration_ms as i64)
        })
        .await
    }

    async fn finalize_tx(
        &self,
        project: &str,
        tx_id: &str,
        files_affected: &[String],
        node_count: u64,
        duration_ms: u64,
    ) -> Result<()> {
        let (project, tx_id) = (project.to_string(), tx_id.to_string());
        let files = files_affected.to_vec();
        self.run(|| {
            query(
                "MATCH (t:GRAPH_TX {id: $id, projectId: $project}) \
                 SET t.filesAffected = $files, t.nodeCount = $nodes, t.durationMs = $duration",
            )
            .param("id", tx_id.clone())
            .param("project", project.clone())
            .param("files", files.clone())
            .param("nodes", node_count as i64)
            .param("duration", duration_ms as i64)
        })
        .await?;
        for path in files_affected {
            let (tx_id, project, path) = (tx_id.clone(), project.clone(), path.clone());
            self.run(move || {
                query(
                    "MATCH (t:GRAPH_TX {id: $id}) \
                     MATCH (f:FILE {projectId: $project, path: $path}) WHERE f.validTo = -1 \
                     MERGE (t)-[:AFFECTS]->(f)",
                )
                .param("id", tx_id.clone())
                .param("project", project.clone())
                .param("path", path.clone())
            })
            .await?;
        }
        Ok(())
    }

    async fn tx_by_id(&self, project: &str, tx_id: &str) -> Result<Option<TxRecord>> {
        let (project, tx_id) = (project.to_string(), tx_id.to_string());
        let rows = self
            .fetch(|| {
                query(&format!(
                    "MATCH (t:GRAPH_TX {{id: $id, projectId: $project}}) RETURN {}",
                    TX_RETURN
                ))
                .param("id", tx_id.clone())
                .param("project", project.clone())
            })
            .await?;
        rows.first().map(Self::tx_row).transpose()
    }

    async fn latest_tx(&self, project: &str) -> Result<Option<TxRecord>> {
        let project = project.to_string();
        let rows = self
            .fetch(|| {
                query(&format!(
                    "MATCH (t:GRAPH_TX {{projectId: $project}}) RETURN {} \
                     ORDER BY t.timestamp DESC LIMIT 1",
                    TX_RETURN
                ))
                .param("project", project.clone())
            })
            .await?;
        rows.first().map(Self::tx_row).transpose()
    }

    async fn tx_count(&self, project: &str) -> Result<u64> {
        let project = project.to_string();
        let rows = self
            .fetch(|| {
                query("MATCH (t:GRAPH_TX {projectId: $project}) RETURN count(t) AS cnt")
                    .param("project", project.clone())
            })
            .await?;
        let count = rows
            .first()
            .and_then(|r| r.get::<i64>("cnt").ok())
            .unwrap_or(0);
        Ok(count.max(0) as u64)
    }

    // -- code nodes ---------------------------------------------------------

    async fn current_code_node(&self, id: &str) -> Result<Option<CodeNode>> {
        let id = id.to_string();
        let rows = self
            .fetch(|| {
                query(&format!(
                    "MATCH (n {{id: $id}}) WHERE n.validTo = -1 AND n.kind IS NOT NULL RETURN {}",
                    CODE_RETURN
                ))
                .param("id", id.clone())
            })
            .await?;
        rows.first().map(Self::code_row).transpose()
    }

    async fn code_node_as_of(&self, id: &str, at: DateTime<Utc>) -> Result<Option<CodeNode>> {
        let id = id.to_string();
        let at = millis(at);
        let rows = self
            .fetch(|| {
                query(&format!(
                    "MATCH (n {{id: $id}}) WHERE n.kind IS NOT NULL AND n.validFrom <= $at \
                     AND (n.validTo = -1 OR n.validTo > $at) RETURN {}",
                    CODE_RETURN
                ))
                .param("id", id.clone())
                .param("at", at)
            })
            .await?;
        rows.first().map(Self::code_row).transpose()
    }

    async fn current_code_nodes(&self, project: &str, kinds: &[CodeKind]) -> Result<Vec<CodeNode>> {
        let labels: Vec<&str> = if kinds.is_empty() {
            CODE_LABELS.to_vec()
        } else {
            kinds.iter().map(|k| k.label()).collect()
        };
        let mut out = Vec::new();
        for label in labels {
            let project = project.to_string();
            let rows = self
                .fetch(|| {
                    query(&format!(
                        "MATCH (n:{} {{projectId: $project}}) WHERE n.validTo = -1 RETURN {}",
                        label, CODE_RETURN
                    ))
                    .param("project", project.clone())
                })
                .await?;
            for row in &rows {
                out.push(Self::code_row(row)?);
            }
        }
        Ok(out)
    }

    async fn current_symbols_for_file(&self, project: &str, path: &str) -> Result<Vec<CodeNode>> {
        let (project, path) = (project.to_string(), path.to_string());
        let rows = self
            .fetch(|| {
                query(&format!(
                    "MATCH (n {{projectId: $project, path: $path}}) \
                     WHERE n.validTo = -1 AND n.kind IN ['function', 'class', 'import', 'export'] \
                     RETURN {}",
                    CODE_RETURN
                ))
                .param("project", project.clone())
                .param("path", path.clone())
            })
            .await?;
        rows.iter().map(Self::code_row).collect()
    }

    async fn versions_of(&self, id: &str) -> Result<Vec<CodeNode>> {
        let id = id.to_string();
        let rows = self
            .fetch(|| {
                query(&format!(
                    "MATCH (n {{id: $id}}) WHERE n.kind IS NOT NULL RETURN {} \
                     ORDER BY n.validFrom DESC",
                    CODE_RETURN
                ))
                .param("id", id.clone())
            })
            .await?;
        rows.iter().map(Self::code_row).collect()
    }

    async fn replace_version(&self, node: CodeNode) -> Result<bool> {
        let label = node.kind.label();
        let text = format!(
            "OPTIONAL MATCH (old:{label} {{id: $id}}) WHERE old.validTo = -1 \
             WITH old LIMIT 1 \
             FOREACH (o IN CASE WHEN old IS NULL THEN [] ELSE [old] END | SET o.validTo = $validFrom) \
             CREATE (new:{label} {{id: $id, kind: $kind, projectId: $project, name: $name, \
             path: $path, language: $language, startLine: $startLine, endLine: $endLine, \
             isExported: $isExported, isAbstract: $isAbstract, summary: $summary, \
             contentHash: $contentHash, validFrom: $validFrom, validTo: -1, \
             createdAt: $createdAt, txId: $txId}}) \
             FOREACH (o IN CASE WHEN old IS NULL THEN [] ELSE [old] END | \
             CREATE (new)-[:SUPERSEDES]->(o)) \
             RETURN CASE WHEN old IS NULL THEN 0 ELSE 1 END AS superseded",
        );
        let rows = self
            .fetch(move || {
                query(&text)
                    .param("id", node.id.clone())
                    .param("kind", node.kind.id_segment())
                    .param("project", node.project_id.clone())
                    .param("name", node.name.clone())
                    .param("path", node.path.clone())
                    .param("language", opt_str(node.language.as_deref()))
                    .param("startLine", opt_line(node.start_line))
                    .param("endLine", opt_line(node.end_line))
                    .param("isExported", node.is_exported)
                    .param("isAbstract", node.is_abstract)
                    .param("summary", opt_str(node.summary.as_deref()))
                    .param("contentHash", opt_str(node.content_hash.as_deref()))
                    .param("validFrom", millis(node.valid_from))
                    .param("createdAt", millis(node.created_at))
                    .param("txId", node.tx_id.clone())
            })
            .await?;
        Ok(rows
            .first()
            .and_then(|r| r.get::<i64>("superseded").ok())
            .unwrap_or(0)
            == 1)
    }

    async fn close_version(&self, id: &str, at: DateTime<Utc>) -> Result<Option<CodeNode>> {
        let id = id.to_string();
        let at = millis(at);
        let rows = self
            .fetch(|| {
                query(&format!(
                    "MATCH (n {{id: $id}}) WHERE n.validTo = -1 AND n.kind IS NOT NULL \
                     SET n.validTo = $at RETURN {}",
                    CODE_RETURN
                ))
                .param("id", id.clone())
                .param("at", at)
            })
            .await?;
        rows.first().map(Self::code_row).transpose()
    }

    // -- edges --------------------------------------------------------------

    async fn upsert_edges(&self, edges: &[Edge]) -> Result<()> {
        for edge in edges {
            let text = format!(
                "MATCH (a {{id: $from}}) WHERE coalesce(a.validTo, -1) = -1 \
                 MATCH (b {{id: $to}}) WHERE coalesce(b.validTo, -1) = -1 \
                 MERGE (a)-[:{} {{projectId: $project}}]->(b)",
                edge.kind.as_type()
            );
            let edge = edge.clone();
            self.run(move || {
                query(&text)
                    .param("from", edge.from.clone())
                    .param("to", edge.to.clone())
                    .param("project", edge.project_id.clone())
            })
            .await?;
        }
        Ok(())
    }

    async fn drop_edges_from(&self, from: &str, kinds: &[EdgeKind]) -> Result<()> {
        for kind in kinds {
            let text = format!(
                "MATCH (a {{id: $from}})-[r:{}]->() WHERE coalesce(a.validTo, -1) = -1 DELETE r",
                kind.as_type()
            );
            let from = from.to_string();
            self.run(move || query(&text).param("from", from.clone())).await?;
        }
        Ok(())
    }

    async fn edges_from(&self, from: &str, kinds: &[EdgeKind]) -> Result<Vec<Edge>> {
        let mut out = Vec::new();
        for kind in kinds {
            let text = format!(
                "MATCH (a {{id: $from}})-[r:{}]->(b) RETURN a.id AS fromId, b.id AS toId, \
                 r.projectId AS projectId",
                kind.as_type()
            );
            let from_owned = from.to_string();
            let rows = self
                .fetch(move || query(&text).param("from", from_owned.clone()))
                .await?;
            for row in rows {
                out.push(Edge {
                    project_id: row.get::<String>("projectId").unwrap_or_default(),
                    from: row.get::<String>("fromId").unwrap_or_default(),
                    to: row.get::<String>("toId").unwrap_or_default(),
                    kind: *kind,
                });
            }
        }
        Ok(out)
    }

    async fn edges_to(&self, to: &str, kinds: &[EdgeKind]) -> Result<Vec<Edge>> {
        let mut out = Vec::new();
        for kind in kinds {
            let text = format!(
                "MATCH (a)-[r:{}]->(b {{id: $to}}) RETURN a.id AS fromId, b.id AS toId, \
                 r.projectId AS projectId",
                kind.as_type()
            );
            let to_owned = to.to_string();
            let rows = self
                .fetch(move || query(&text).param("to", to_owned.clone()))
                .await?;
            for row in rows {
                out.push(Edge {
                    project_id: row.get::<String>("projectId").unwrap_or_default(),
                    from: row.get::<String>("fromId").unwrap_or_default(),
                    to: row.get::<String>("toId").unwrap_or_default(),
                    kind: *kind,
                });
            }
        }
        Ok(out)
    }

    async fn project_edges(&self, project: &str, kinds: &[EdgeKind]) -> Result<Vec<Edge>> {
        let mut out = Vec::new();
        for kind in kinds {
            let text = format!(
                "MATCH (a)-[r:{} {{projectId: $project}}]->(b) \
                 RETURN a.id AS fromId, b.id AS toId",
                kind.as_type()
            );
            let project_owned = project.to_string();
            let rows = self
                .fetch(move || query(&text).param("project", project_owned.clone()))
                .await?;
            for row in rows {
                out.push(Edge {
                    project_id: project.to_string(),
                    from: row.get::<String>("fromId").unwrap_or_default(),
                    to: row.get::<String>("toId").unwrap_or_default(),
                    kind: *kind,
                });
            }
        }
        Ok(out)
    }

    // -- episodes & learnings ----------------------------------------------

    async fn insert_episode(&self, episode: &Episode) -> Result<()> {
        let prev = self
            .last_episode(&episode.project_id, &episode.agent_id, &episode.session_id)
            .await?;
        let ep = episode.clone();
        let metadata = serde_json::to_string(&ep.metadata).unwrap_or_else(|_| "{}".into());
        self.run(move || {
            query(
                "CREATE (e:EPISODE {id: $id, projectId: $project, agentId: $agent, \
                 sessionId: $session, taskId: $task, type: $type, content: $content, \
                 timestamp: $ts, outcome: $outcome, sensitive: $sensitive, metadata: $metadata, \
                 entities: $entities, derivedFrom: $derivedFrom})",
            )
            .param("id", ep.id.clone())
            .param("project", ep.project_id.clone())
            .param("agent", ep.agent_id.clone())
            .param("session", ep.session_id.clone())
            .param("task", opt_str(ep.task_id.as_deref()))
            .param("type", ep.episode_type.as_str())
            .param("content", ep.content.clone())
            .param("ts", millis(ep.timestamp))
            .param("outcome", opt_str(ep.outcome.as_deref()))
            .param("sensitive", ep.sensitive)
            .param("metadata", metadata.clone())
            .param("entities", ep.entities.clone())
            .param("derivedFrom", ep.derived_from.clone())
        })
        .await?;

        let mut edges = Vec::new();
        if let Some(prev) = prev {
            edges.push(Edge::new(
                &episode.project_id,
                prev.id,
                episode.id.clone(),
                EdgeKind::NextEpisode,
            ));
        }
        for entity in &episode.entities {
            edges.push(Edge::new(
                &episode.project_id,
                episode.id.clone(),
                entity.clone(),
                EdgeKind::Involves,
            ));
        }
        for source in &episode.derived_from {
            edges.push(Edge::new(
                &episode.project_id,
                episode.id.clone(),
                source.clone(),
                EdgeKind::DerivedFrom,
            ));
        }
        self.upsert_edges(&edges).await
    }

    async fn episode_by_id(&self, id: &str) -> Result<Option<Episode>> {
        let id = id.to_string();
        let rows = self
            .fetch(|| {
                query(&format!("MATCH (e:EPISODE {{id: $id}}) RETURN {}", EPISODE_RETURN))
                    .param("id", id.clone())
            })
            .await?;
        rows.first().map(Self::episode_row).transpose()
    }

    async fn episodes(&self, filter: &EpisodeFilter) -> Result<Vec<Episode>> {
        let mut conditions = vec!["e.projectId = $project".to_string()];
        if filter.agent_id.is_some() {
            conditions.push("e.agentId = $agent".into());
        }
        if filter.session_id.is_some() {
            conditions.push("e.sessionId = $session".into());
        }
        if filter.task_id.is_some() {
            conditions.push("e.taskId = $task".into());
        }
        if !filter.types.is_empty() {
            conditions.push("e.type IN $types".into());
        }
        if filter.since.is_some() {
            conditions.push("e.timestamp >= $since".into());
        }
        if !filter.include_sensitive {
            conditions.push("(e.sensitive = false OR e.agentId = $caller)".into());
        }
        let text = format!(
            "MATCH (e:EPISODE) WHERE {} RETURN {} ORDER BY e.timestamp DESC{}",
            conditions.join(" AND "),
            EPISODE_RETURN,
            filter
                .limit
                .map(|l| format!(" LIMIT {}", l))
                .unwrap_or_default()
        );
        let filter = filter.clone();
        let rows = self
            .fetch(move || {
                let mut q = query(&text).param("project", filter.project_id.clone());
                if let Some(agent) = &filter.agent_id {
                    q = q.param("agent", agent.clone());
                }
                if let Some(session) = &filter.session_id {
                    q = q.param("session", session.clone());
                }
                if let Some(task) = &filter.task_id {
                    q = q.param("task", task.clone());
                }
                if !filter.types.is_empty() {
                    let types: Vec<String> =
                        filter.types.iter().map(|t| t.as_str().to_string()).collect();
                    q = q.param("types", types);
                }
                if let Some(since) = filter.since {
                    q = q.param("since", millis(since));
                }
                if !filter.include_sensitive {
                    q = q.param("caller", opt_str(filter.caller.as_deref()));
                }
                q
            })
            .await?;
        rows.iter().map(Self::episode_row).collect()
    }

    async fn last_episode(
        &self,
        project: &str,
        agent: &str,
        session: &str,
    ) -> Result<Option<Episode>> {
        let (project, agent, session) =
            (project.to_string(), agent.to_string(), session.to_string());
        let rows = self
            .fetch(|| {
                query(&format!(
                    "MATCH (e:EPISODE {{projectId: $project, agentId: $agent, sessionId: $session}}) \
                     RETURN {} ORDER BY e.timestamp DESC LIMIT 1",
                    EPISODE_RETURN
                ))
                .param("project", project.clone())
                .param("agent", agent.clone())
                .param("session", session.clone())
            })
            .await?;
        rows.first().map(Self::episode_row).transpose()
    }

    async fn insert_learning(&self, learning: &Learning) -> Result<()> {
        let l = learning.clone();
        self.run(move || {
            query(
                "CREATE (l:LEARNING {id: $id, projectId: $project, content: $content, \
                 confidence: $confidence, extractedAt: $at, appliesTo: $appliesTo})",
            )
            .param("id", l.id.clone())
            .param("project", l.project_id.clone())
            .param("content", l.content.clone())
            .param("confidence", l.confidence)
            .param("at", millis(l.extracted_at))
            .param("appliesTo", l.applies_to.clone())
        })
        .await?;
        let edges: Vec<Edge> = learning
            .applies_to
            .iter()
            .map(|t| {
                Edge::new(
                    &learning.project_id,
                    learning.id.clone(),
                    t.clone(),
                    EdgeKind::AppliesTo,
                )
            })
            .collect();
        self.upsert_edges(&edges).await
    }

    async fn learnings_for(&self, project: &str, targets: &[String]) -> Result<Vec<Learning>> {
        let project = project.to_string();
        let targets = targets.to_vec();
        let rows = self
            .fetch(|| {
                query(
                    "MATCH (l:LEARNING {projectId: $project}) \
                     WHERE any(t IN l.appliesTo WHERE t IN $targets) \
                     RETURN l.id AS id, l.projectId AS projectId, l.content AS content, \
                     l.confidence AS confidence, l.extractedAt AS extractedAt, \
                     l.appliesTo AS appliesTo",
                )
                .param("project", project.clone())
                .param("targets", targets.clone())
            })
            .await?;
        rows.iter()
            .map(|row| {
                Ok(Learning {
                    id: row.get::<String>("id").unwrap_or_default(),
                    project_id: row.get::<String>("projectId").unwrap_or_default(),
                    content: row.get::<String>("content").unwrap_or_default(),
                    confidence: row.get::<f64>("confidence").unwrap_or(0.0),
                    extracted_at: from_millis(row.get::<i64>("extractedAt").unwrap_or(0)),
                    applies_to: row.get::<Vec<String>>("appliesTo").unwrap_or_default(),
                })
            })
            .collect()
    }

    async fn learnings(&self, project: &str, limit: usize) -> Result<Vec<Learning>> {
        let project = project.to_string();
        let rows = self
            .fetch(|| {
                query(&format!(
                    "MATCH (l:LEARNING {{projectId: $project}}) \
                     RETURN l.id AS id, l.projectId AS projectId, l.content AS content, \
                     l.confidence AS confidence, l.extractedAt AS extractedAt, \
                     l.appliesTo AS appliesTo ORDER BY l.extractedAt DESC LIMIT {}",
                    limit
                ))
                .param("project", project.clone())
            })
            .await?;
        rows.iter()
            .map(|row| {
                Ok(Learning {
                    id: row.get::<String>("id").unwrap_or_default(),
                    project_id: row.get::<String>("projectId").unwrap_or_default(),
                    content: row.get::<String>("content").unwrap_or_default(),
                    confidence: row.get::<f64>("confidence").unwrap_or(0.0),
                    extracted_at: from_millis(row.get::<i64>("extractedAt").unwrap_or(0)),
                    applies_to: row.get::<Vec<String>>("appliesTo").unwrap_or_default(),
                })
            })
            .collect()
    }

    // -- claims -------------------------------------------------------------

    async fn try_create_claim(&self, claim: &Claim) -> Result<ClaimOutcome> {
        // Conflict check and CREATE are one statement, so two racing agents
        // cannot both land an active claim on the same target.
        let c = claim.clone();
        let rows = self
            .fetch(move || {
                query(
                    "OPTIONAL MATCH (c:CLAIM {projectId: $project, targetId: $target, \
                     claimType: $ctype}) WHERE c.validTo = -1 \
                     WITH c ORDER BY c.validFrom LIMIT 1 \
                     FOREACH (x IN CASE WHEN c IS NULL THEN [1] ELSE [] END | \
                     CREATE (:CLAIM {id: $id, projectId: $project, agentId: $agent, \
                     sessionId: $session, taskId: $task, claimType: $ctype, targetId: $target, \
                     intent: $intent, validFrom: $from, validTo: -1, invalidationReason: '', \
                     targetVersionSHA: $sha})) \
                     RETURN CASE WHEN c IS NULL THEN '' ELSE c.id END AS id, \
                     CASE WHEN c IS NULL THEN '' ELSE c.agentId END AS agentId, \
                     CASE WHEN c IS NULL THEN '' ELSE c.sessionId END AS sessionId, \
                     CASE WHEN c IS NULL THEN '' ELSE c.intent END AS intent, \
                     CASE WHEN c IS NULL THEN '' ELSE c.taskId END AS taskId, \
                     CASE WHEN c IS NULL THEN '' ELSE c.targetVersionSHA END AS targetVersionSHA, \
                     CASE WHEN c IS NULL THEN -1 ELSE c.validFrom END AS validFrom",
                )
                .param("project", c.project_id.clone())
                .param("target", c.target_id.clone())
                .param("ctype", c.claim_type.as_str())
                .param("id", c.id.clone())
                .param("agent", c.agent_id.clone())
                .param("session", c.session_id.clone())
                .param("task", opt_str(c.task_id.as_deref()))
                .param("intent", c.intent.clone())
                .param("from", millis(c.valid_from))
                .param("sha", opt_str(c.target_version_sha.as_deref()))
            })
            .await?;

        let existing_id = rows
            .first()
            .and_then(|r| r.get::<String>("id").ok())
            .unwrap_or_default();
        if existing_id.is_empty() {
            let edge = Edge::new(
                &claim.project_id,
                claim.id.clone(),
                claim.target_id.clone(),
                EdgeKind::Targets,
            );
            self.upsert_edges(std::slice::from_ref(&edge)).await?;
            return Ok(ClaimOutcome::Created(claim.clone()));
        }

        let row = rows.first().expect("row present when existing_id set");
        let existing = Claim {
            id: existing_id,
            project_id: claim.project_id.clone(),
            agent_id: row.get::<String>("agentId").unwrap_or_default(),
            session_id: row.get::<String>("sessionId").unwrap_or_default(),
            task_id: none_if_empty(row.get::<String>("taskId").unwrap_or_default()),
            claim_type: claim.claim_type,
            target_id: claim.target_id.clone(),
            intent: row.get::<String>("intent").unwrap_or_default(),
            valid_from: from_millis(row.get::<i64>("validFrom").unwrap_or(-1)),
            valid_to: None,
            invalidation_reason: None,
            target_version_sha: none_if_empty(
                row.get::<String>("targetVersionSHA").unwrap_or_default(),
            ),
        };
        if existing.agent_id == claim.agent_id {
            return Ok(ClaimOutcome::Created(existing));
        }
        Ok(ClaimOutcome::Conflict { existing })
    }

    async fn close_claim(
        &self,
        claim_id: &str,
        at: DateTime<Utc>,
        reason: &str,
    ) -> Result<ReleaseOutcome> {
        let (id, reason_owned) = (claim_id.to_string(), reason.to_string());
        let at_ms = millis(at);
        let rows = self
            .fetch(move || {
                query(&format!(
                    "MATCH (c:CLAIM {{id: $id}}) WHERE c.validTo = -1 \
                     SET c.validTo = $at, c.invalidationReason = $reason RETURN {}",
                    CLAIM_RETURN
                ))
                .param("id", id.clone())
                .param("at", at_ms)
                .param("reason", reason_owned.clone())
            })
            .await?;
        if let Some(row) = rows.first() {
            return Ok(ReleaseOutcome::Released(Self::claim_row(row)?));
        }
        match self.claim_by_id(claim_id).await? {
            Some(claim) => Ok(ReleaseOutcome::AlreadyClosed(claim)),
            None => Ok(ReleaseOutcome::NotFound),
        }
    }

    async fn claim_by_id(&self, claim_id: &str) -> Result<Option<Claim>> {
        let id = claim_id.to_string();
        let rows = self
            .fetch(|| {
                query(&format!("MATCH (c:CLAIM {{id: $id}}) RETURN {}", CLAIM_RETURN))
                    .param("id", id.clone())
            })
            .await?;
        rows.first().map(Self::claim_row).transpose()
    }

    async fn active_claims(&self, project: &str) -> Result<Vec<Claim>> {
        let project = project.to_string();
        let rows = self
            .fetch(|| {
                query(&format!(
                    "MATCH (c:CLAIM {{projectId: $project}}) WHERE c.validTo = -1 RETURN {}",
                    CLAIM_RETURN
                ))
                .param("project", project.clone())
            })
            .await?;
        rows.iter().map(Self::claim_row).collect()
    }

    async fn claims_for_agent(&self, project: &str, agent: &str) -> Result<Vec<Claim>> {
        let (project, agent) = (project.to_string(), agent.to_string());
        let rows = self
            .fetch(|| {
                query(&format!(
                    "MATCH (c:CLAIM {{projectId: $project, agentId: $agent}}) RETURN {}",
                    CLAIM_RETURN
                ))
                .param("project", project.clone())
                .param("agent", agent.clone())
            })
            .await?;
        rows.iter().map(Self::claim_row).collect()
    }

    async fn claims_for_task(&self, project: &str, task: &str) -> Result<Vec<Claim>> {
        let (project, task) = (project.to_string(), task.to_string());
        let rows = self
            .fetch(|| {
                query(&format!(
                    "MATCH (c:CLAIM {{projectId: $project, taskId: $task}}) RETURN {}",
                    CLAIM_RETURN
                ))
                .param("project", project.clone())
                .param("task", task.clone())
            })
            .await?;
        rows.iter().map(Self::claim_row).collect()
    }

    async fn invalidate_stale_claims(
        &self,
        project: &str,
        at: DateTime<Utc>,
        ttl_hours: i64,
    ) -> Result<Vec<Claim>> {
        let project = project.to_string();
        let at_ms = millis(at);
        let cutoff = at_ms - ttl_hours * 3_600_000;
        let rows = self
            .fetch(move || {
                query(&format!(
                    "MATCH (c:CLAIM {{projectId: $project}}) WHERE c.validTo = -1 \
                     OPTIONAL MATCH (t {{id: c.targetId}}) WHERE t.validTo = -1 \
                     WITH c, t \
                     WHERE (t IS NOT NULL AND t.validFrom > c.validFrom) OR c.validFrom < $cutoff \
                     SET c.validTo = $at, c.invalidationReason = \
                     CASE WHEN t IS NOT NULL AND t.validFrom > c.validFrom \
                     THEN 'code_changed' ELSE 'expired' END \
                     RETURN {}",
                    CLAIM_RETURN
                ))
                .param("project", project.clone())
                .param("at", at_ms)
                .param("cutoff", cutoff)
            })
            .await?;
        rows.iter().map(Self::claim_row).collect()
    }

    // -- documents -----------------------------------------------------------

    async fn replace_document(&self, doc: &DocNode, sections: &[DocNode]) -> Result<()> {
        let d = doc.clone();
        self.run(move || {
            query(
                "MATCH (s:SECTION {projectId: $project, relativePath: $rel}) \
                 WHERE s.validTo = -1 SET s.validTo = $at",
            )
            .param("project", d.project_id.clone())
            .param("rel", d.relative_path.clone())
            .param("at", millis(d.valid_from))
        })
        .await?;

        let d = doc.clone();
        self.run(move || {
            query(
                "OPTIONAL MATCH (old:DOCUMENT {id: $id}) WHERE old.validTo = -1 \
                 WITH old LIMIT 1 \
                 FOREACH (o IN CASE WHEN old IS NULL THEN [] ELSE [old] END | \
                 SET o.validTo = $validFrom) \
                 CREATE (new:DOCUMENT {id: $id, projectId: $project, relativePath: $rel, \
                 title: $title, contentHash: $hash, validFrom: $validFrom, validTo: -1, \
                 createdAt: $createdAt, txId: $txId}) \
                 FOREACH (o IN CASE WHEN old IS NULL THEN [] ELSE [old] END | \
                 CREATE (new)-[:SUPERSEDES]->(o))",
            )
            .param("id", d.id.clone())
            .param("project", d.project_id.clone())
            .param("rel", d.relative_path.clone())
            .param("title", opt_str(d.title.as_deref()))
            .param("hash", opt_str(d.content_hash.as_deref()))
            .param("validFrom", millis(d.valid_from))
            .param("createdAt", millis(d.created_at))
            .param("txId", d.tx_id.clone())
        })
        .await?;

        let mut prev: Option<String> = None;
        for section in sections {
            let s = section.clone();
            let doc_id = doc.id.clone();
            self.run(move || {
                query(
                    "MATCH (d:DOCUMENT {id: $docId}) WHERE d.validTo = -1 \
                     CREATE (s:SECTION {id: $id, projectId: $project, relativePath: $rel, \
                     heading: $heading, startLine: $startLine, endLine: $endLine, \
                     content: $content, validFrom: $validFrom, validTo: -1, \
                     createdAt: $createdAt, txId: $txId}) \
                     CREATE (s)-[:SECTION_OF]->(d)",
                )
                .param("docId", doc_id.clone())
                .param("id", s.id.clone())
                .param("project", s.project_id.clone())
                .param("rel", s.relative_path.clone())
                .param("heading", opt_str(s.heading.as_deref()))
                .param("startLine", opt_line(s.start_line))
                .param("endLine", opt_line(s.end_line))
                .param("content", opt_str(s.content.as_deref()))
                .param("validFrom", millis(s.valid_from))
                .param("createdAt", millis(s.created_at))
                .param("txId", s.tx_id.clone())
            })
            .await?;
            if let Some(prev_id) = prev.take() {
                let edge = Edge::new(
                    &doc.project_id,
                    prev_id,
                    section.id.clone(),
                    EdgeKind::NextSection,
                );
                self.upsert_edges(std::slice::from_ref(&edge)).await?;
            }
            prev = Some(section.id.clone());
        }
        Ok(())
    }

    async fn current_documents(&self, project: &str) -> Result<Vec<DocNode>> {
        self.fetch_docs(project, "DOCUMENT").await
    }

    async fn current_sections(&self, project: &str) -> Result<Vec<DocNode>> {
        self.fetch_docs(project, "SECTION").await
    }

    // -- communities ----------------------------------------------------------

    async fn replace_communities(&self, project: &str, communities: &[Community]) -> Result<()> {
        let project_owned = project.to_string();
        self.run(move || {
            query("MATCH (c:COMMUNITY {projectId: $project}) DETACH DELETE c")
                .param("project", project_owned.clone())
        })
        .await?;
        for community in communities {
            let c = community.clone();
            self.run(move || {
                query(
                    "CREATE (:COMMUNITY {id: $id, projectId: $project, label: $label, \
                     summary: $summary, memberCount: $count, members: $members})",
                )
                .param("id", c.id.clone())
                .param("project", c.project_id.clone())
                .param("label", c.label.clone())
                .param("summary", c.summary.clone())
                .param("count", c.member_count as i64)
                .param("members", c.members.clone())
            })
            .await?;
            let edges: Vec<Edge> = community
                .members
                .iter()
                .map(|m| Edge::new(project, m.clone(), community.id.clone(), EdgeKind::BelongsTo))
                .collect();
            self.upsert_edges(&edges).await?;
        }
        Ok(())
    }

    async fn communities(&self, project: &str) -> Result<Vec<Community>> {
        let project = project.to_string();
        let rows = self
            .fetch(|| {
                query(
                    "MATCH (c:COMMUNITY {projectId: $project}) RETURN c.id AS id, \
                     c.projectId AS projectId, c.label AS label, c.summary AS summary, \
                     c.memberCount AS memberCount, c.members AS members",
                )
                .param("project", project.clone())
            })
            .await?;
        Ok(rows
            .iter()
            .map(|row| Community {
                id: row.get::<String>("id").unwrap_or_default(),
                project_id: row.get::<String>("projectId").unwrap_or_default(),
                label: row.get::<String>("label").unwrap_or_default(),
                summary: row.get::<String>("summary").unwrap_or_default(),
                member_count: row.get::<i64>("memberCount").unwrap_or(0).max(0) as u64,
                members: row.get::<Vec<String>>("members").unwrap_or_default(),
            })
            .collect())
    }

    // -- health / diff --------------------------------------------------------

    async fn label_counts(&self, project: &str) -> Result<Vec<(String, u64)>> {
        let project = project.to_string();
        let rows = self
            .fetch(|| {
                query(
                    "MATCH (n {projectId: $project}) WHERE coalesce(n.validTo, -1) = -1 \
                     RETURN labels(n)[0] AS label, count(n) AS cnt",
                )
                .param("project", project.clone())
            })
            .await?;
        let mut out: Vec<(String, u64)> = rows
            .iter()
            .map(|row| {
                (
                    row.get::<String>("label").unwrap_or_default(),
                    row.get::<i64>("cnt").unwrap_or(0).max(0) as u64,
                )
            })
            .collect();
        out.sort();
        Ok(out)
    }

    async fn file_changes_since(&self, project: &str, since: DateTime<Utc>) -> Result<FileChanges> {
        let project = project.to_string();
        let rows = self
            .fetch(|| {
                query(
                    "MATCH (f:FILE {projectId: $project}) \
                     WITH f.id AS fid, head(collect(f.path)) AS path, \
                     min(f.validFrom) AS firstFrom, max(f.validFrom) AS newestFrom, \
                     max(CASE WHEN f.validTo = -1 THEN 1 ELSE 0 END) AS hasCurrent, \
                     max(f.validTo) AS lastClosed \
                     RETURN fid, path, firstFrom, newestFrom, hasCurrent, lastClosed",
                )
                .param("project", project.clone())
            })
            .await?;
        let since_ms = millis(since);
        let mut changes = FileChanges::default();
        for row in rows {
            let path = row.get::<String>("path").unwrap_or_default();
            let first_from = row.get::<i64>("firstFrom").unwrap_or(0);
            let newest_from = row.get::<i64>("newestFrom").unwrap_or(0);
            let has_current = row.get::<i64>("hasCurrent").unwrap_or(0) == 1;
            let last_closed = row.get::<i64>("lastClosed").unwrap_or(-1);
            if has_current {
                if first_from > since_ms {
                    changes.added.push(path);
                } else if newest_from > since_ms {
                    changes.modified.push(path);
                }
            } else if last_closed > since_ms {
                changes.removed.push(path);
            }
        }
        changes.added.sort();
        changes.modified.sort();
        changes.removed.sort();
        Ok(changes)
    }

    // -- escape hatch ---------------------------------------------------------

    async fn execute_cypher(&self, text: &str, params: &[(String, Value)]) -> Result<Vec<Row>> {
        let text = text.to_string();
        let params = params.to_vec();
        let rows = self
            .fetch(move || {
                let mut q = query(&text);
                for (key, value) in &params {
                    q = match value {
                        Value::String(s) => q.param(key.as_str(), s.clone()),
                        Value::Bool(b) => q.param(key.as_str(), *b),
                        Value::Number(n) if n.is_i64() => {
                            q.param(key.as_str(), n.as_i64().unwrap_or_default())
                        }
                        Value::Number(n) => q.param(key.as_str(), n.as_f64().unwrap_or_default()),
                        other => q.param(key.as_str(), other.to_string()),
                    };
                }
                q
            })
            .await?;
        rows.iter()
            .map(|row| {
                row.to::<Row>().map_err(|e| {
                    Error::GraphQueryFailed(format!(
                        "result row could not be converted to JSON: {}",
                        e
                    ))
                })
            })
            .collect()
    }
}

impl BoltGraph {
    async fn fetch_docs(&self, project: &str, label: &str) -> Result<Vec<DocNode>> {
        let text = format!(
            "MATCH (d:{} {{projectId: $project}}) WHERE d.validTo = -1 \
             RETURN d.id AS id, d.projectId AS projectId, d.relativePath AS relativePath, \
             d.title AS title, d.heading AS heading, d.startLine AS startLine, \
             d.endLine AS endLine, d.content AS content, d.contentHash AS contentHash, \
             d.validFrom AS validFrom, d.validTo AS validTo, d.createdAt AS createdAt, \
             d.txId AS txId",
            label
        );
        let kind = if label == "DOCUMENT" {
            DocKind::Document
        } else {
            DocKind::Section
        };
        let project = project.to_string();
        let rows = self
            .fetch(move || query(&text).param("project", project.clone()))
            .await?;
        Ok(rows
            .iter()
            .map(|row| DocNode {
                id: row.get::<String>("id").unwrap_or_default(),
                kind,
                project_id: row.get::<String>("projectId").unwrap_or_default(),
                relative_path: row.get::<String>("relativePath").unwrap_or_default(),
                title: none_if_empty(row.get::<String>("title").unwrap_or_default()),
                heading: none_if_empty(row.get::<String>("heading").unwrap_or_default()),
                start_line: line_from(row.get::<i64>("startLine").unwrap_or(-1)),
                end_line: line_from(row.get::<i64>("endLine").unwrap_or(-1)),
                content: none_if_empty(row.get::<String>("content").unwrap_or_default()),
                content_hash: none_if_empty(row.get::<String>("contentHash").unwrap_or_default()),
                valid_from: from_millis(row.get::<i64>("validFrom").unwrap_or(0)),
                valid_to: opt_from_millis(row.get::<i64>("validTo").unwrap_or(-1)),
                created_at: from_millis(row.get::<i64>("createdAt").unwrap_or(0)),
                tx_id: row.get::<String>("txId").unwrap_or_default(),
            })
            .collect())
    }
}
