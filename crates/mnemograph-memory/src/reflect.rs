//! Reflection — pattern mining over recent episodes
//!
//! Derives simple behavioral patterns from an agent's episode stream,
//! records one REFLECTION episode linked to its sources, and promotes
//! high-confidence patterns to LEARNING nodes with APPLIES_TO edges.

use chrono::Utc;
use mnemograph_core::{ProjectContext, Result};
use mnemograph_graph::model::{Episode, EpisodeType, Learning};
use mnemograph_graph::store::{EpisodeFilter, GraphStore};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

const LEARNING_CONFIDENCE_THRESHOLD: f64 = 0.7;
/// Files edited at least this often count as hotspots.
const HOTSPOT_EDITS: usize = 3;
/// Identical observations repeated this often count as wasted reading.
const REPEAT_OBSERVATIONS: usize = 3;

#[derive(Debug, Clone, Serialize)]
pub struct Pattern {
    pub kind: String,
    pub description: String,
    pub confidence: f64,
    pub entities: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReflectReport {
    #[serde(rename = "reflectionId")]
    pub reflection_id: Option<String>,
    pub patterns: Vec<Pattern>,
    #[serde(rename = "learningsCreated")]
    pub learnings_created: usize,
    #[serde(rename = "episodesExamined")]
    pub episodes_examined: usize,
}

pub async fn reflect(
    store: &Arc<dyn GraphStore>,
    ctx: &ProjectContext,
    agent_id: Option<String>,
    task_id: Option<String>,
    limit: usize,
) -> Result<ReflectReport> {
    let mut episodes = store
        .episodes(&EpisodeFilter {
            project_id: ctx.project_id.clone(),
            agent_id: agent_id.clone(),
            session_id: None,
            task_id,
            types: Vec::new(),
            since: None,
            limit: Some(limit),
            include_sensitive: true,
            caller: agent_id.clone(),
        })
        .await?;
    // Oldest first, so adjacency checks read forward in time.
    episodes.reverse();

    let patterns = derive_patterns(&episodes);
    if patterns.is_empty() {
        return Ok(ReflectReport {
            reflection_id: None,
            patterns,
            learnings_created: 0,
            episodes_examined: episodes.len(),
        });
    }

    let now = Utc::now();
    let content = patterns
        .iter()
        .map(|p| format!("[{}] {}", p.kind, p.description))
        .collect::<Vec<_>>()
        .join("\n");
    let reflection = Episode {
        id: uuid::Uuid::new_v4().to_string(),
        project_id: ctx.project_id.clone(),
        agent_id: agent_id.clone().unwrap_or_else(|| "reflector".to_string()),
        session_id: "reflection".to_string(),
        task_id: None,
        episode_type: EpisodeType::Reflection,
        content,
        timestamp: now,
        outcome: None,
        sensitive: false,
        metadata: serde_json::json!({ "patternCount": patterns.len() }),
        entities: Vec::new(),
        derived_from: episodes.iter().map(|e| e.id.clone()).collect(),
    };
    store.insert_episode(&reflection).await?;

    let mut learnings_created = 0;
    for pattern in &patterns {
        if pattern.confidence < LEARNING_CONFIDENCE_THRESHOLD || pattern.entities.is_empty() {
            continue;
        }
        let learning = Learning {
            id: uuid::Uuid::new_v4().to_string(),
            project_id: ctx.project_id.clone(),
            content: pattern.description.clone(),
            confidence: pattern.confidence,
            extracted_at: now,
            applies_to: pattern.entities.clone(),
        };
        store.insert_learning(&learning).await?;
        learnings_created += 1;
    }

    Ok(ReflectReport {
        reflection_id: Some(reflection.id),
        patterns,
        learnings_created,
        episodes_examined: episodes.len(),
    })
}

/// Pattern mining over a time-ordered episode slice.
fn derive_patterns(episodes: &[Episode]) -> Vec<Pattern> {
    let mut patterns = Vec::new();

    // Hotspots: the same entity edited repeatedly.
    let mut edit_counts: HashMap<&String, usize> = HashMap::new();
    for episode in episodes.iter().filter(|e| e.episode_type == EpisodeType::Edit) {
        for entity in &episode.entities {
            *edit_counts.entry(entity).or_default() += 1;
        }
    }
    let mut hotspots: Vec<(&String, usize)> = edit_counts
        .into_iter()
        .filter(|(_, count)| *count >= HOTSPOT_EDITS)
        .collect();
    hotspots.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    for (entity, count) in hotspots {
        patterns.push(Pattern {
            kind: "hotspot".to_string(),
            description: format!("{} edited {} times in this window", entity, count),
            confidence: 0.8,
            entities: vec![entity.clone()],
        });
    }

    // Risky decisions: a DECISION immediately followed by an ERROR.
    for window in episodes.windows(2) {
        if window[0].episode_type == EpisodeType::Decision
            && window[1].episode_type == EpisodeType::Error
        {
            patterns.push(Pattern {
                kind: "risky-decision".to_string(),
                description: format!(
                    "decision '{}' was immediately followed by an error",
                    truncate(&window[0].content, 80)
                ),
                confidence: 0.75,
                entities: window[0].entities.clone(),
            });
        }
    }

    // Wasted reading: identical observations repeated.
    let mut observation_counts: HashMap<&str, usize> = HashMap::new();
    for episode in episodes
        .iter()
        .filter(|e| e.episode_type == EpisodeType::Observation)
    {
        *observation_counts.entry(episode.content.as_str()).or_default() += 1;
    }
    let mut repeats: Vec<(&str, usize)> = observation_counts
        .into_iter()
        .filter(|(_, count)| *count >= REPEAT_OBSERVATIONS)
        .collect();
    repeats.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    for (content, count) in repeats {
        patterns.push(Pattern {
            kind: "wasted-reading".to_string(),
            description: format!("observation '{}' repeated {} times", truncate(content, 80), count),
            confidence: 0.7,
            entities: Vec::new(),
        });
    }

    patterns
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max).collect();
        format!("{}…", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn episode(kind: EpisodeType, content: &str, entities: &[&str]) -> Episode {
        Episode {
            id: uuid::Uuid::new_v4().to_string(),
            project_id: "p".into(),
            agent_id: "a".into(),
            session_id: "s".into(),
            task_id: None,
            episode_type: kind,
            content: content.to_string(),
            timestamp: Utc::now(),
            outcome: None,
            sensitive: false,
            metadata: serde_json::json!({}),
            entities: entities.iter().map(|e| e.to_string()).collect(),
            derived_from: Vec::new(),
        }
    }

    #[test]
    fn detects_hotspot_after_three_edits() {
        let eps = vec![
            episode(EpisodeType::Edit, "e1", &["p:file:src/a.ts"]),
            episode(EpisodeType::Edit, "e2", &["p:file:src/a.ts"]),
            episode(EpisodeType::Edit, "e3", &["p:file:src/a.ts"]),
        ];
        let patterns = derive_patterns(&eps);
        assert!(patterns.iter().any(|p| p.kind == "hotspot"));
    }

    #[test]
    fn detects_decision_followed_by_error() {
        let eps = vec![
            episode(EpisodeType::Decision, "use plan A", &["p:file:src/a.ts"]),
            episode(EpisodeType::Error, "plan A broke", &[]),
        ];
        let patterns = derive_patterns(&eps);
        assert!(patterns.iter().any(|p| p.kind == "risky-decision"));
    }

    #[test]
    fn detects_repeated_observations() {
        let eps = vec![
            episode(EpisodeType::Observation, "read config", &[]),
            episode(EpisodeType::Observation, "read config", &[]),
            episode(EpisodeType::Observation, "read config", &[]),
        ];
        let patterns = derive_patterns(&eps);
        assert!(patterns.iter().any(|p| p.kind == "wasted-reading"));
    }

    #[test]
    fn quiet_stream_yields_no_patterns() {
        let eps = vec![episode(EpisodeType::Observation, "looked once", &[])];
        assert!(derive_patterns(&eps).is_empty());
    }
}
