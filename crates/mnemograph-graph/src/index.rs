//! Read-mostly in-memory graph index
//!
//! One snapshot per project, replaced wholesale after a rebuild and read
//! concurrently by the retrieval and analysis paths. This is one of the two
//! pieces of shared mutable state in the server (the other is the session
//! map); all access goes through the named operations here.

use crate::model::{CodeKind, CodeNode, Edge, EdgeKind};
use crate::store::GraphStore;
use chrono::{DateTime, Utc};
use mnemograph_core::Result;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone)]
pub struct FileEntry {
    pub id: String,
    pub path: String,
    pub rel_path: String,
    pub language: Option<String>,
    pub content_hash: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SymbolEntry {
    pub id: String,
    pub kind: CodeKind,
    pub name: String,
    pub path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub is_exported: bool,
    pub is_abstract: bool,
    pub summary: String,
}

#[derive(Debug, Clone, Default)]
pub struct ProjectSnapshot {
    pub files: Vec<FileEntry>,
    pub symbols: Vec<SymbolEntry>,
    pub edges: Vec<Edge>,
    pub built_at: Option<DateTime<Utc>>,
    pub latest_tx: Option<String>,
}

impl ProjectSnapshot {
    pub fn total_nodes(&self) -> usize {
        self.files.len() + self.symbols.len()
    }

    pub fn symbol(&self, id: &str) -> Option<&SymbolEntry> {
        self.symbols.iter().find(|s| s.id == id)
    }

    pub fn file(&self, id: &str) -> Option<&FileEntry> {
        self.files.iter().find(|f| f.id == id)
    }
}

#[derive(Default)]
pub struct GraphIndex {
    projects: RwLock<HashMap<String, Arc<ProjectSnapshot>>>,
}

impl GraphIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace(&self, project: &str, snapshot: ProjectSnapshot) {
        self.projects
            .write()
            .expect("graph index lock poisoned")
            .insert(project.to_string(), Arc::new(snapshot));
    }

    pub fn snapshot(&self, project: &str) -> Option<Arc<ProjectSnapshot>> {
        self.projects
            .read()
            .expect("graph index lock poisoned")
            .get(project)
            .cloned()
    }

    pub fn invalidate(&self, project: &str) {
        self.projects
            .write()
            .expect("graph index lock poisoned")
            .remove(project);
    }

    pub fn total_nodes(&self, project: &str) -> usize {
        self.snapshot(project).map(|s| s.total_nodes()).unwrap_or(0)
    }
}

/// Load a fresh snapshot from the authoritative store.
pub async fn load_snapshot(
    store: &Arc<dyn GraphStore>,
    project: &str,
    workspace_root: &std::path::Path,
) -> Result<ProjectSnapshot> {
    let nodes = store.current_code_nodes(project, &[]).await?;
    let edges = store
        .project_edges(
            project,
            &[
                EdgeKind::Contains,
                EdgeKind::Imports,
                EdgeKind::References,
                EdgeKind::Calls,
                EdgeKind::Exports,
            ],
        )
        .await?;
    let latest_tx = store.latest_tx(project).await?.map(|t| t.id);

    let mut files = Vec::new();
    let mut symbols = Vec::new();
    for node in nodes {
        match node.kind {
            CodeKind::File => files.push(file_entry(workspace_root, &node)),
            CodeKind::Function | CodeKind::Class => symbols.push(SymbolEntry {
                id: node.id,
                kind: node.kind,
                name: node.name,
                path: node.path,
                start_line: node.start_line.unwrap_or(1),
                end_line: node.end_line.unwrap_or(1),
                is_exported: node.is_exported,
                is_abstract: node.is_abstract,
                summary: node.summary.unwrap_or_default(),
            }),
            _ => {}
        }
    }
    files.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    symbols.sort_by(|a, b| a.id.cmp(&b.id));

    Ok(ProjectSnapshot {
        files,
        symbols,
        edges,
        built_at: Some(Utc::now()),
        latest_tx,
    })
}

fn file_entry(workspace_root: &std::path::Path, node: &CodeNode) -> FileEntry {
    let rel_path = std::path::Path::new(&node.path)
        .strip_prefix(workspace_root)
        .map(|r| r.to_string_lossy().replace('\\', "/"))
        .unwrap_or_else(|_| node.path.clone());
    FileEntry {
        id: node.id.clone(),
        path: node.path.clone(),
        rel_path,
        language: node.language.clone(),
        content_hash: node.content_hash.clone(),
    }
}
