//! Bi-temporal graph build pipeline
//!
//! Rebuilds never delete code nodes. For every changed file the current
//! versions are retired (`validTo = tx.timestamp`), new versions are merged
//! with `validFrom = tx.timestamp`, SUPERSEDES edges link the generations,
//! and CONTAINS / IMPORTS / EXPORTS edges are re-emitted anchored to the new
//! versions. Unchanged files induce zero writes.

use crate::model::*;
use crate::parse::{content_hash, ParsedSymbol, ParserRegistry, SymbolKind};
use crate::store::GraphStore;
use crate::summary::{heuristic_summary, Summarize};
use dashmap::DashMap;
use globset::{Glob, GlobSet, GlobSetBuilder};
use mnemograph_core::config::MAX_PARSE_FILE_BYTES;
use mnemograph_core::{Error, ProjectContext, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    Full,
    Incremental,
}

impl BuildMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Incremental => "incremental",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BuildRequest {
    pub changed_files: Vec<PathBuf>,
    pub agent_id: Option<String>,
    pub session_id: Option<String>,
    /// Pre-allocated GRAPH_TX id, so callers that queue the rebuild can hand
    /// the anchor out before it completes.
    pub tx_id: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct BuildReport {
    pub tx_id: String,
    pub project_id: String,
    pub mode: String,
    pub files_seen: usize,
    pub files_changed: Vec<String>,
    pub files_removed: Vec<String>,
    pub nodes_written: u64,
    pub superseded: u64,
    pub duration_ms: u64,
}

/// Ignore matcher: bare names skip matching path components anywhere in the
/// tree; patterns with glob characters match against the workspace-relative
/// path.
#[derive(Clone)]
pub struct IgnoreSet {
    names: HashSet<String>,
    globs: GlobSet,
}

impl Default for IgnoreSet {
    fn default() -> Self {
        Self {
            names: HashSet::new(),
            globs: GlobSet::empty(),
        }
    }
}

impl IgnoreSet {
    pub fn new(patterns: &[String]) -> Self {
        let mut names = HashSet::new();
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            if pattern.contains(['*', '?', '[']) {
                match Glob::new(pattern) {
                    Ok(glob) => {
                        builder.add(glob);
                    }
                    Err(e) => warn!("ignoring invalid glob pattern '{}': {}", pattern, e),
                }
            } else {
                names.insert(pattern.clone());
            }
        }
        let globs = builder.build().unwrap_or_else(|_| GlobSet::empty());
        Self { names, globs }
    }

    pub fn is_ignored(&self, relative: &Path) -> bool {
        if relative
            .components()
            .any(|c| self.names.contains(&c.as_os_str().to_string_lossy().to_string()))
        {
            return true;
        }
        self.globs.is_match(relative)
    }
}

pub struct GraphBuilder {
    store: Arc<dyn GraphStore>,
    parsers: ParserRegistry,
    summarizer: Arc<dyn Summarize>,
    /// Symbol-hash → summary, so unchanged symbols never hit the remote
    /// summarizer twice.
    summary_cache: DashMap<String, String>,
}

impl GraphBuilder {
    pub fn new(store: Arc<dyn GraphStore>, summarizer: Arc<dyn Summarize>) -> Self {
        Self {
            store,
            parsers: ParserRegistry::with_defaults(),
            summarizer,
            summary_cache: DashMap::new(),
        }
    }

    pub fn parsers(&self) -> &ParserRegistry {
        &self.parsers
    }

    /// Run a rebuild. The workspace is validated before any write so a bad
    /// setup never leaves a dangling GRAPH_TX behind.
    pub async fn rebuild(
        &self,
        ctx: &ProjectContext,
        ignore: &IgnoreSet,
        mode: BuildMode,
        request: BuildRequest,
    ) -> Result<BuildReport> {
        if !ctx.workspace_root.is_dir() {
            return Err(Error::WorkspaceNotFound(
                ctx.workspace_root.display().to_string(),
            ));
        }
        if !ctx.source_dir.is_dir() {
            return Err(Error::SourceDirNotFound(ctx.source_dir.display().to_string()));
        }

        let started = Instant::now();
        let mut tx = TxRecord::begin(&ctx.project_id, "rebuild", mode.as_str());
        if let Some(id) = request.tx_id.clone() {
            tx.id = id;
        }
        tx.agent_id = request.agent_id.clone();
        tx.session_id = request.session_id.clone();
        self.store.create_tx(&tx).await?;

        let candidates: Vec<PathBuf> = match mode {
            BuildMode::Full => self.scan_source_files(ctx, ignore),
            BuildMode::Incremental => request
                .changed_files
                .iter()
                .filter(|p| p.starts_with(&ctx.workspace_root))
                .filter(|p| {
                    relative_path(ctx, p)
                        .map(|rel| !ignore.is_ignored(Path::new(&rel)))
                        .unwrap_or(false)
                })
                .cloned()
                .collect(),
        };

        let files_seen = candidates.len();
        let mut changed: Vec<String> = Vec::new();
        let mut removed: Vec<String> = Vec::new();
        let mut nodes_written: u64 = 0;
        let mut superseded: u64 = 0;

        for path in &candidates {
            if !path.exists() {
                if self.retire_file(ctx, path, &tx).await? {
                    removed.push(path.display().to_string());
                }
                continue;
            }
            let Some(extension) = path.extension().and_then(|e| e.to_str()) else {
                continue;
            };
            let Some(parser) = self.parsers.parser_for(extension) else {
                continue;
            };
            if std::fs::metadata(path).map(|m| m.len()).unwrap_or(0) > MAX_PARSE_FILE_BYTES {
                debug!("skipping oversized file {}", path.display());
                continue;
            }
            let Ok(source) = std::fs::read_to_string(path) else {
                continue;
            };
            let Some(rel) = relative_path(ctx, path) else {
                continue;
            };

            let hash = content_hash(&source);
            let fid = file_id(&ctx.project_id, &rel);
            let current = self.store.current_code_node(&fid).await?;
            if current
                .as_ref()
                .and_then(|c| c.content_hash.as_deref())
                .map(|h| h == hash)
                .unwrap_or(false)
            {
                continue;
            }

            let parsed = parser.parse(&source);
            let stats = self
                .write_file_version(ctx, &tx, path, &rel, &hash, &source, parsed.language, &parsed.symbols, &parsed.imports, &parsed.exports)
                .await?;
            nodes_written += stats.0;
            superseded += stats.1;
            changed.push(path.display().to_string());
        }

        if mode == BuildMode::Full {
            let current_files = self
                .store
                .current_code_nodes(&ctx.project_id, &[CodeKind::File])
                .await?;
            for file in current_files {
                if !Path::new(&file.path).exists() {
                    if self.retire_file(ctx, Path::new(&file.path), &tx).await? {
                        removed.push(file.path.clone());
                    }
                }
            }
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        let mut affected = changed.clone();
        affected.extend(removed.iter().cloned());
        self.store
            .finalize_tx(&ctx.project_id, &tx.id, &affected, nodes_written, duration_ms)
            .await?;

        info!(
            project = %ctx.project_id,
            mode = mode.as_str(),
            changed = changed.len(),
            removed = removed.len(),
            nodes = nodes_written,
            duration_ms,
            "rebuild complete"
        );

        Ok(BuildReport {
            tx_id: tx.id,
            project_id: ctx.project_id.clone(),
            mode: mode.as_str().to_string(),
            files_seen,
            files_changed: changed,
            files_removed: removed,
            nodes_written,
            superseded,
            duration_ms,
        })
    }

    fn scan_source_files(&self, ctx: &ProjectContext, ignore: &IgnoreSet) -> Vec<PathBuf> {
        let mut out = Vec::new();
        for entry in walkdir::WalkDir::new(&ctx.source_dir)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| {
                relative_path_of(&ctx.workspace_root, e.path())
                    .map(|rel| !ignore.is_ignored(Path::new(&rel)))
                    .unwrap_or(true)
            })
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(ext) = entry.path().extension().and_then(|e| e.to_str()) else {
                continue;
            };
            if self.parsers.supports(ext) {
                out.push(entry.path().to_path_buf());
            }
        }
        out.sort();
        out
    }

    /// Close the FILE version and every symbol anchored to it. Returns true
    /// when a current version existed.
    async fn retire_file(&self, ctx: &ProjectContext, path: &Path, tx: &TxRecord) -> Result<bool> {
        let Some(rel) = relative_path(ctx, path) else {
            return Ok(false);
        };
        let fid = file_id(&ctx.project_id, &rel);
        let abs = path.display().to_string();
        let symbols = self
            .store
            .current_symbols_for_file(&ctx.project_id, &abs)
            .await?;
        for symbol in symbols {
            self.store.close_version(&symbol.id, tx.timestamp).await?;
        }
        Ok(self.store.close_version(&fid, tx.timestamp).await?.is_some())
    }

    #[allow(clippy::too_many_arguments)]
    async fn write_file_version(
        &self,
        ctx: &ProjectContext,
        tx: &TxRecord,
        path: &Path,
        rel: &str,
        hash: &str,
        source: &str,
        language: &'static str,
        symbols: &[ParsedSymbol],
        imports: &[String],
        exports: &[String],
    ) -> Result<(u64, u64)> {
        let project = ctx.project_id.as_str();
        let abs = path.display().to_string();
        let fid = file_id(project, rel);
        let lines: Vec<&str> = source.lines().collect();
        let mut nodes_written: u64 = 0;
        let mut superseded: u64 = 0;

        // Retire symbols whose structural position is gone in the new parse.
        let new_ids: HashSet<String> = symbols
            .iter()
            .map(|s| symbol_id(project, code_kind(s.kind), rel, &s.name, s.start_line))
            .chain(imports.iter().map(|i| import_id(project, rel, i)))
            .chain(exports.iter().map(|e| export_id(project, rel, e)))
            .collect();
        for old in self.store.current_symbols_for_file(project, &abs).await? {
            if !new_ids.contains(&old.id) {
                self.store.close_version(&old.id, tx.timestamp).await?;
            }
        }

        let file_node = CodeNode {
            id: fid.clone(),
            kind: CodeKind::File,
            project_id: project.to_string(),
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| rel.to_string()),
            path: abs.clone(),
            language: Some(language.to_string()),
            start_line: None,
            end_line: None,
            is_exported: false,
            is_abstract: false,
            summary: None,
            content_hash: Some(hash.to_string()),
            valid_from: tx.timestamp,
            valid_to: None,
            created_at: tx.timestamp,
            tx_id: tx.id.clone(),
        };
        if self.store.replace_version(file_node).await? {
            superseded += 1;
        }
        nodes_written += 1;

        self.store
            .drop_edges_from(&fid, &[EdgeKind::Contains, EdgeKind::Imports, EdgeKind::Exports])
            .await?;
        let mut edges: Vec<Edge> = Vec::new();

        for symbol in symbols {
            let sid = symbol_id(project, code_kind(symbol.kind), rel, &symbol.name, symbol.start_line);
            let body = slice_lines(&lines, symbol.start_line, symbol.end_line);
            let summary = self.summary_for(symbol, &body).await;
            let node = CodeNode {
                id: sid.clone(),
                kind: code_kind(symbol.kind),
                project_id: project.to_string(),
                name: symbol.name.clone(),
                path: abs.clone(),
                language: Some(language.to_string()),
                start_line: Some(symbol.start_line),
                end_line: Some(symbol.end_line),
                is_exported: symbol.is_exported,
                is_abstract: symbol.is_abstract,
                summary: Some(summary),
                content_hash: None,
                valid_from: tx.timestamp,
                valid_to: None,
                created_at: tx.timestamp,
                tx_id: tx.id.clone(),
            };
            if self.store.replace_version(node).await? {
                superseded += 1;
            }
            nodes_written += 1;
            edges.push(Edge::new(project, fid.clone(), sid, EdgeKind::Contains));
        }

        for import in imports {
            let iid = import_id(project, rel, import);
            let node = CodeNode {
                id: iid.clone(),
                kind: CodeKind::Import,
                project_id: project.to_string(),
                name: import.clone(),
                path: abs.clone(),
                language: Some(language.to_string()),
                start_line: None,
                end_line: None,
                is_exported: false,
                is_abstract: false,
                summary: None,
                content_hash: None,
                valid_from: tx.timestamp,
                valid_to: None,
                created_at: tx.timestamp,
                tx_id: tx.id.clone(),
            };
            if self.store.replace_version(node).await? {
                superseded += 1;
            }
            nodes_written += 1;
            edges.push(Edge::new(project, fid.clone(), iid.clone(), EdgeKind::Imports));
            if let Some(target) = resolve_import(ctx, rel, import) {
                edges.push(Edge::new(project, iid, target, EdgeKind::References));
            }
        }

        for export in exports {
            let eid = export_id(project, rel, export);
            let node = CodeNode {
                id: eid.clone(),
                kind: CodeKind::Export,
                project_id: project.to_string(),
                name: export.clone(),
                path: abs.clone(),
                language: Some(language.to_string()),
                start_line: None,
                end_line: None,
                is_exported: true,
                is_abstract: false,
                summary: None,
                content_hash: None,
                valid_from: tx.timestamp,
                valid_to: None,
                created_at: tx.timestamp,
                tx_id: tx.id.clone(),
            };
            if self.store.replace_version(node).await? {
                superseded += 1;
            }
            nodes_written += 1;
            edges.push(Edge::new(project, fid.clone(), eid, EdgeKind::Exports));
        }

        self.store.upsert_edges(&edges).await?;
        Ok((nodes_written, superseded))
    }

    async fn summary_for(&self, symbol: &ParsedSymbol, body: &str) -> String {
        let key = content_hash(body);
        if let Some(cached) = self.summary_cache.get(&key) {
            return cached.clone();
        }
        let summary = if self.summarizer.available() {
            match self.summarizer.summarize(body).await {
                Ok(s) => s,
                Err(e) => {
                    debug!("summarizer fell back to heuristic: {}", e);
                    heuristic_summary(&symbol.name, symbol.doc.as_deref(), body)
                }
            }
        } else {
            heuristic_summary(&symbol.name, symbol.doc.as_deref(), body)
        };
        self.summary_cache.insert(key, summary.clone());
        summary
    }
}

fn code_kind(kind: SymbolKind) -> CodeKind {
    match kind {
        SymbolKind::Function => CodeKind::Function,
        SymbolKind::Class => CodeKind::Class,
    }
}

fn slice_lines(lines: &[&str], start: u32, end: u32) -> String {
    let start = (start.max(1) - 1) as usize;
    let end = (end as usize).min(lines.len());
    lines[start.min(end)..end].join("\n")
}

fn relative_path(ctx: &ProjectContext, path: &Path) -> Option<String> {
    relative_path_of(&ctx.workspace_root, path)
}

fn relative_path_of(root: &Path, path: &Path) -> Option<String> {
    path.strip_prefix(root)
        .ok()
        .map(|rel| rel.to_string_lossy().replace('\\', "/"))
}

/// Resolve a relative import to a FILE SCIP id by probing the filesystem:
/// strip `.js`/`.jsx`/`.ts`/`.tsx`, then try `base`, `base.ts`, `base.tsx`,
/// `base/index.ts`, `base/index.tsx`. Package imports stay unresolved.
pub fn resolve_import(ctx: &ProjectContext, importer_rel: &str, source: &str) -> Option<String> {
    if !source.starts_with('.') {
        return None;
    }
    let importer_dir = Path::new(importer_rel).parent().unwrap_or(Path::new(""));
    let joined = importer_dir.join(source);
    let mut normalized: Vec<String> = Vec::new();
    for component in joined.components() {
        match component {
            std::path::Component::ParentDir => {
                normalized.pop();
            }
            std::path::Component::CurDir => {}
            other => normalized.push(other.as_os_str().to_string_lossy().to_string()),
        }
    }
    let mut base = normalized.join("/");
    for extension in [".js", ".jsx", ".ts", ".tsx"] {
        if let Some(stripped) = base.strip_suffix(extension) {
            base = stripped.to_string();
            break;
        }
    }
    let candidates = [
        base.clone(),
        format!("{}.ts", base),
        format!("{}.tsx", base),
        format!("{}/index.ts", base),
        format!("{}/index.tsx", base),
    ];
    for candidate in candidates {
        let abs = ctx.workspace_root.join(&candidate);
        if abs.is_file() {
            return Some(file_id(&ctx.project_id, &candidate));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignore_set_skips_names_anywhere() {
        let ignore = IgnoreSet::new(&["node_modules".to_string(), "*.gen.ts".to_string()]);
        assert!(ignore.is_ignored(Path::new("src/node_modules/x.ts")));
        assert!(ignore.is_ignored(Path::new("api.gen.ts")));
        assert!(!ignore.is_ignored(Path::new("src/app.ts")));
    }

    #[test]
    fn resolve_import_probes_candidates() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/util.ts"), "export const x = 1\n").unwrap();
        let ctx = ProjectContext {
            workspace_root: dir.path().to_path_buf(),
            source_dir: dir.path().join("src"),
            project_id: "demo".into(),
        };
        let resolved = resolve_import(&ctx, "src/a.ts", "./util.js");
        assert_eq!(resolved.as_deref(), Some("demo:file:src/util.ts"));
        assert!(resolve_import(&ctx, "src/a.ts", "lodash").is_none());
    }
}
