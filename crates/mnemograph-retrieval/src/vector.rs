//! The vector-store seam
//!
//! `upsert`, `search`, `count` against named collections. The in-memory
//! store does brute-force cosine over the collection; the Qdrant store talks
//! to the REST API on port 6333. Collections are per concern and project,
//! e.g. `symbols_{projectId}` and `episodes_{projectId}`.

use crate::embed::cosine;
use async_trait::async_trait;
use dashmap::DashMap;
use mnemograph_core::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: Value,
}

#[derive(Debug, Clone)]
pub struct ScoredPoint {
    pub score: f32,
    pub point: VectorPoint,
}

/// Payload equality filter applied server-side where the backend supports it.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub equals: Vec<(String, Value)>,
}

impl SearchFilter {
    pub fn project(project: &str) -> Self {
        Self {
            equals: vec![("projectId".to_string(), json!(project))],
        }
    }

    fn matches(&self, payload: &Value) -> bool {
        self.equals
            .iter()
            .all(|(key, expected)| payload.get(key) == Some(expected))
    }
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    fn backend(&self) -> &'static str;
    async fn ping(&self) -> Result<()>;
    async fn upsert(&self, collection: &str, points: Vec<VectorPoint>) -> Result<()>;
    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<ScoredPoint>>;
    async fn count(&self, collection: &str) -> Result<u64>;
    async fn drop_collection(&self, collection: &str) -> Result<()>;
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryVectorStore {
    collections: DashMap<String, Vec<VectorPoint>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn upsert(&self, collection: &str, points: Vec<VectorPoint>) -> Result<()> {
        let mut entry = self.collections.entry(collection.to_string()).or_default();
        for point in points {
            if let Some(existing) = entry.iter_mut().find(|p| p.id == point.id) {
                *existing = point;
            } else {
                entry.push(point);
            }
        }
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<ScoredPoint>> {
        let Some(points) = self.collections.get(collection) else {
            return Ok(Vec::new());
        };
        let mut scored: Vec<ScoredPoint> = points
            .iter()
            .filter(|p| filter.matches(&p.payload))
            .map(|p| ScoredPoint {
                score: cosine(vector, &p.vector),
                point: p.clone(),
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }

    async fn count(&self, collection: &str) -> Result<u64> {
        Ok(self
            .collections
            .get(collection)
            .map(|c| c.len() as u64)
            .unwrap_or(0))
    }

    async fn drop_collection(&self, collection: &str) -> Result<()> {
        self.collections.remove(collection);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Qdrant (REST)
// ---------------------------------------------------------------------------

pub struct QdrantStore {
    client: reqwest::Client,
    base_url: String,
    dimension: usize,
}

fn point_id(id: &str) -> u64 {
    // FNV-1a; the string id stays in the payload under "id".
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in id.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

#[derive(Deserialize)]
struct QdrantSearchResponse {
    #[serde(default)]
    result: Vec<QdrantScoredPoint>,
}

#[derive(Deserialize)]
struct QdrantScoredPoint {
    score: f32,
    #[serde(default)]
    payload: Value,
}

#[derive(Deserialize)]
struct QdrantCountResponse {
    result: QdrantCount,
}

#[derive(Deserialize)]
struct QdrantCount {
    count: u64,
}

impl QdrantStore {
    pub fn new(base_url: impl Into<String>, dimension: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            dimension,
        }
    }

    async fn ensure_collection(&self, collection: &str) -> Result<()> {
        let url = format!("{}/collections/{}", self.base_url, collection);
        let body = json!({
            "vectors": { "size": self.dimension, "distance": "Cosine" }
        });
        // Creating an existing collection is a no-op conflict; both are fine.
        let response = self
            .client
            .put(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::RetrieverUnavailable(format!("qdrant unreachable: {}", e)))?;
        if response.status().is_success() || response.status().as_u16() == 409 {
            Ok(())
        } else {
            Err(Error::RetrieverUnavailable(format!(
                "qdrant collection setup failed: {}",
                response.status()
            )))
        }
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    fn backend(&self) -> &'static str {
        "qdrant"
    }

    async fn ping(&self) -> Result<()> {
        let url = format!("{}/collections", self.base_url);
        self.client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::RetrieverUnavailable(format!("qdrant unreachable: {}", e)))?
            .error_for_status()
            .map_err(|e| Error::RetrieverUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn upsert(&self, collection: &str, points: Vec<VectorPoint>) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }
        self.ensure_collection(collection).await?;
        let body = json!({
            "points": points
                .iter()
                .map(|p| {
                    let mut payload = p.payload.clone();
                    if let Value::Object(map) = &mut payload {
                        map.insert("id".to_string(), json!(p.id));
                    }
                    json!({ "id": point_id(&p.id), "vector": p.vector, "payload": payload })
                })
                .collect::<Vec<_>>()
        });
        let url = format!("{}/collections/{}/points?wait=true", self.base_url, collection);
        self.client
            .put(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::RetrieverUnavailable(format!("qdrant upsert failed: {}", e)))?
            .error_for_status()
            .map_err(|e| Error::RetrieverUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<ScoredPoint>> {
        let mut body = json!({
            "vector": vector,
            "limit": limit,
            "with_payload": true,
        });
        if !filter.equals.is_empty() {
            let must: Vec<Value> = filter
                .equals
                .iter()
                .map(|(key, value)| json!({ "key": key, "match": { "value": value } }))
                .collect();
            body["filter"] = json!({ "must": must });
        }
        let url = format!("{}/collections/{}/points/search", self.base_url, collection);
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::RetrieverUnavailable(format!("qdrant search failed: {}", e)))?;
        if response.status().as_u16() == 404 {
            return Ok(Vec::new());
        }
        let parsed: QdrantSearchResponse = response
            .error_for_status()
            .map_err(|e| Error::RetrieverUnavailable(e.to_string()))?
            .json()
            .await
            .map_err(|e| Error::RetrieverUnavailable(format!("qdrant response invalid: {}", e)))?;
        Ok(parsed
            .result
            .into_iter()
            .map(|p| {
                let id = p
                    .payload
                    .get("id")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                ScoredPoint {
                    score: p.score,
                    point: VectorPoint {
                        id,
                        vector: Vec::new(),
                        payload: p.payload,
                    },
                }
            })
            .collect())
    }

    async fn count(&self, collection: &str) -> Result<u64> {
        let url = format!("{}/collections/{}/points/count", self.base_url, collection);
        let response = self
            .client
            .post(&url)
            .json(&json!({ "exact": true }))
            .send()
            .await
            .map_err(|e| Error::RetrieverUnavailable(format!("qdrant count failed: {}", e)))?;
        if response.status().as_u16() == 404 {
            return Ok(0);
        }
        let parsed: QdrantCountResponse = response
            .error_for_status()
            .map_err(|e| Error::RetrieverUnavailable(e.to_string()))?
            .json()
            .await
            .map_err(|e| Error::RetrieverUnavailable(format!("qdrant response invalid: {}", e)))?;
        Ok(parsed.result.count)
    }

    async fn drop_collection(&self, collection: &str) -> Result<()> {
        let url = format!("{}/collections/{}", self.base_url, collection);
        self.client
            .delete(&url)
            .send()
            .await
            .map_err(|e| Error::RetrieverUnavailable(format!("qdrant delete failed: {}", e)))?;
        Ok(())
    }
}

pub fn symbols_collection(project: &str) -> String {
    format!("symbols_{}", project)
}

pub fn episodes_collection(project: &str) -> String {
    format!("episodes_{}", project)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::{Embedder, HashEmbedder};

    #[tokio::test]
    async fn memory_store_upsert_replaces_by_id() {
        let store = MemoryVectorStore::new();
        let embedder = HashEmbedder::default();
        let point = |id: &str, text: &str| VectorPoint {
            id: id.into(),
            vector: embedder.embed(text),
            payload: json!({ "projectId": "p" }),
        };
        store.upsert("c", vec![point("a", "one"), point("a", "two")]).await.unwrap();
        assert_eq!(store.count("c").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn memory_store_search_filters_and_ranks() {
        let store = MemoryVectorStore::new();
        let embedder = HashEmbedder::default();
        store
            .upsert(
                "c",
                vec![
                    VectorPoint {
                        id: "match".into(),
                        vector: embedder.embed("database pool handling"),
                        payload: json!({ "projectId": "p" }),
                    },
                    VectorPoint {
                        id: "other-project".into(),
                        vector: embedder.embed("database pool handling"),
                        payload: json!({ "projectId": "q" }),
                    },
                ],
            )
            .await
            .unwrap();
        let hits = store
            .search("c", &embedder.embed("database pool"), 10, &SearchFilter::project("p"))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].point.id, "match");
    }
}
