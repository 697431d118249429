//! Documentation ingest and section search
//!
//! Markdown files become DOCUMENT nodes with SECTION children chained via
//! NEXT_SECTION. Sections always carry the parent document's relative path.
//! Re-ingesting an unchanged file writes nothing; changed files supersede
//! the previous generation.

use crate::builder::IgnoreSet;
use crate::model::{document_id, section_id, DocKind, DocNode, TxRecord};
use crate::parse::content_hash;
use crate::store::GraphStore;
use mnemograph_core::{Error, ProjectContext, Result};
use pulldown_cmark::{Event, HeadingLevel, Options, Parser as MarkdownParser, Tag};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Serialize)]
pub struct DocsReport {
    pub tx_id: String,
    pub indexed: Vec<String>,
    pub unchanged: Vec<String>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SectionHit {
    pub heading: String,
    #[serde(rename = "relativePath")]
    pub relative_path: String,
    #[serde(rename = "startLine")]
    pub start_line: u32,
    pub snippet: String,
    pub score: f64,
}

/// Ingest Markdown under the workspace root (or a single file/subtree when
/// `path` is given). Returns `Err` only on setup problems; per-file failures
/// land in the report.
pub async fn index_docs(
    store: &Arc<dyn GraphStore>,
    ctx: &ProjectContext,
    ignore: &IgnoreSet,
    path: Option<&str>,
) -> Result<DocsReport> {
    let root = match path {
        Some(p) => {
            let candidate = if Path::new(p).is_absolute() {
                Path::new(p).to_path_buf()
            } else {
                ctx.workspace_root.join(p)
            };
            if !candidate.exists() {
                return Err(Error::ElementNotFound(format!("docs path {}", p)));
            }
            candidate
        }
        None => ctx.workspace_root.clone(),
    };

    let mut tx = TxRecord::begin(&ctx.project_id, "docs_index", "full");
    tx.mode = "full".into();
    store.create_tx(&tx).await?;

    let mut report = DocsReport {
        tx_id: tx.id.clone(),
        indexed: Vec::new(),
        unchanged: Vec::new(),
        errors: Vec::new(),
    };

    let files: Vec<std::path::PathBuf> = if root.is_file() {
        vec![root]
    } else {
        walkdir::WalkDir::new(&root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| {
                e.path()
                    .strip_prefix(&ctx.workspace_root)
                    .map(|rel| !ignore.is_ignored(rel))
                    .unwrap_or(true)
            })
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| {
                matches!(
                    e.path().extension().and_then(|x| x.to_str()),
                    Some("md") | Some("markdown")
                )
            })
            .map(|e| e.path().to_path_buf())
            .collect()
    };

    for file in files {
        let Ok(rel) = file
            .strip_prefix(&ctx.workspace_root)
            .map(|r| r.to_string_lossy().replace('\\', "/"))
        else {
            continue;
        };
        let source = match std::fs::read_to_string(&file) {
            Ok(s) => s,
            Err(e) => {
                report.errors.push(format!("{}: {}", rel, e));
                continue;
            }
        };
        let hash = content_hash(&source);
        let doc_id = document_id(&ctx.project_id, &rel);
        let existing = store
            .current_documents(&ctx.project_id)
            .await?
            .into_iter()
            .find(|d| d.id == doc_id);
        if existing
            .as_ref()
            .and_then(|d| d.content_hash.as_deref())
            .map(|h| h == hash)
            .unwrap_or(false)
        {
            report.unchanged.push(rel);
            continue;
        }

        let (title, sections) = split_sections(&source);
        let doc = DocNode {
            id: doc_id,
            kind: DocKind::Document,
            project_id: ctx.project_id.clone(),
            relative_path: rel.clone(),
            title: title.or_else(|| Some(rel.clone())),
            heading: None,
            start_line: None,
            end_line: None,
            content: None,
            content_hash: Some(hash),
            valid_from: tx.timestamp,
            valid_to: None,
            created_at: tx.timestamp,
            tx_id: tx.id.clone(),
        };
        let section_nodes: Vec<DocNode> = sections
            .iter()
            .map(|s| DocNode {
                id: section_id(&ctx.project_id, &rel, s.start_line),
                kind: DocKind::Section,
                project_id: ctx.project_id.clone(),
                relative_path: rel.clone(),
                title: None,
                heading: Some(s.heading.clone()),
                start_line: Some(s.start_line),
                end_line: Some(s.end_line),
                content: Some(s.body.clone()),
                content_hash: None,
                valid_from: tx.timestamp,
                valid_to: None,
                created_at: tx.timestamp,
                tx_id: tx.id.clone(),
            })
            .collect();
        match store.replace_document(&doc, &section_nodes).await {
            Ok(()) => report.indexed.push(rel),
            Err(e) => report.errors.push(format!("{}: {}", rel, e)),
        }
    }

    let node_count = report.indexed.len() as u64;
    let affected = report.indexed.clone();
    store
        .finalize_tx(&ctx.project_id, &tx.id, &affected, node_count, 0)
        .await?;
    debug!(
        indexed = report.indexed.len(),
        unchanged = report.unchanged.len(),
        errors = report.errors.len(),
        "docs index complete"
    );
    Ok(report)
}

/// Token-overlap scoring over current sections: heading hits weigh double.
pub async fn search_docs(
    store: &Arc<dyn GraphStore>,
    project: &str,
    query: &str,
    limit: usize,
) -> Result<Vec<SectionHit>> {
    let terms: Vec<String> = query
        .split_whitespace()
        .map(|t| t.to_ascii_lowercase())
        .filter(|t| t.len() >= 2)
        .collect();
    if terms.is_empty() {
        return Ok(Vec::new());
    }
    let sections = store.current_sections(project).await?;
    let mut hits: Vec<SectionHit> = sections
        .into_iter()
        .filter_map(|section| {
            let heading = section.heading.clone().unwrap_or_default();
            let body = section.content.clone().unwrap_or_default();
            let heading_lower = heading.to_ascii_lowercase();
            let body_lower = body.to_ascii_lowercase();
            let mut score = 0.0;
            for term in &terms {
                if heading_lower.contains(term.as_str()) {
                    score += 2.0;
                }
                score += body_lower.matches(term.as_str()).count() as f64 * 0.5;
            }
            if score <= 0.0 {
                return None;
            }
            let snippet: String = body.chars().take(240).collect();
            Some(SectionHit {
                heading,
                relative_path: section.relative_path,
                start_line: section.start_line.unwrap_or(1),
                snippet,
                score,
            })
        })
        .collect();
    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    hits.truncate(limit);
    Ok(hits)
}

struct RawSection {
    heading: String,
    start_line: u32,
    end_line: u32,
    body: String,
}

/// Split Markdown into heading-delimited sections with 1-based line spans.
/// Returns the first H1 as the document title.
fn split_sections(source: &str) -> (Option<String>, Vec<RawSection>) {
    // Byte offset → line number table.
    let mut line_starts = vec![0usize];
    for (idx, byte) in source.bytes().enumerate() {
        if byte == b'\n' {
            line_starts.push(idx + 1);
        }
    }
    let line_of = |offset: usize| -> u32 {
        match line_starts.binary_search(&offset) {
            Ok(i) => (i + 1) as u32,
            Err(i) => i as u32,
        }
    };

    let parser = MarkdownParser::new_ext(source, Options::empty());
    let mut headings: Vec<(String, HeadingLevel, u32)> = Vec::new();
    let mut in_heading = false;
    let mut current_text = String::new();
    let mut current_level = HeadingLevel::H1;
    let mut current_line = 1u32;
    for (event, range) in parser.into_offset_iter() {
        match event {
            Event::Start(Tag::Heading { level, .. }) => {
                in_heading = true;
                current_text.clear();
                current_level = level;
                current_line = line_of(range.start);
            }
            Event::Text(text) | Event::Code(text) if in_heading => {
                current_text.push_str(&text);
            }
            Event::End(_) if in_heading => {
                in_heading = false;
                headings.push((current_text.trim().to_string(), current_level, current_line));
            }
            _ => {}
        }
    }

    let total_lines = source.lines().count() as u32;
    let title = headings
        .iter()
        .find(|(_, level, _)| *level == HeadingLevel::H1)
        .map(|(text, _, _)| text.clone());

    let lines: Vec<&str> = source.lines().collect();
    let mut sections = Vec::new();
    for (idx, (heading, _, start)) in headings.iter().enumerate() {
        let end = headings
            .get(idx + 1)
            .map(|(_, _, next)| next.saturating_sub(1))
            .unwrap_or(total_lines);
        let body = lines[(*start as usize).min(lines.len())..(end as usize).min(lines.len())]
            .join("\n");
        sections.push(RawSection {
            heading: heading.clone(),
            start_line: *start,
            end_line: end.max(*start),
            body,
        });
    }
    (title, sections)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_sections_extracts_title_and_spans() {
        let src = "# Guide\n\nIntro text.\n\n## Setup\n\nInstall things.\n\n## Usage\n\nRun things.\n";
        let (title, sections) = split_sections(src);
        assert_eq!(title.as_deref(), Some("Guide"));
        assert_eq!(sections.len(), 3);
        assert_eq!(sections[0].heading, "Guide");
        assert_eq!(sections[1].heading, "Setup");
        assert_eq!(sections[1].start_line, 5);
        assert!(sections[1].body.contains("Install things."));
        assert_eq!(sections[2].heading, "Usage");
    }

    #[test]
    fn split_sections_handles_no_headings() {
        let (title, sections) = split_sections("just prose\nno headings\n");
        assert!(title.is_none());
        assert!(sections.is_empty());
    }
}
