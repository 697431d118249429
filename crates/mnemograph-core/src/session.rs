//! Per-session project context
//!
//! Sessions scope the active project. The HTTP transport mints a session id
//! on `initialize`; stdio uses the fixed singleton. No global "current
//! project" exists — two sessions may point at different projects against
//! the same stores.

use crate::config::Settings;
use crate::error::{Error, Result};
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// The implicit session id under the stdio transport.
pub const STDIO_SESSION: &str = "stdio";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectContext {
    pub workspace_root: PathBuf,
    pub source_dir: PathBuf,
    pub project_id: String,
}

#[derive(Default)]
pub struct SessionManager {
    sessions: DashMap<String, ProjectContext>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a fresh session id (HTTP `initialize`).
    pub fn open_session(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }

    pub fn has(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    /// Register a session id without a project context yet.
    pub fn register(&self, session_id: &str) {
        self.sessions
            .entry(session_id.to_string())
            .or_insert_with(|| ProjectContext {
                workspace_root: PathBuf::new(),
                source_dir: PathBuf::new(),
                project_id: String::new(),
            });
    }

    /// Resolve and store the workspace for a session. Returns the new
    /// context plus the previous one (if any) so callers can invalidate
    /// caches keyed by the old project id.
    pub fn set_workspace(
        &self,
        session_id: &str,
        workspace_root: &str,
        source_dir: Option<&str>,
        project_id: Option<&str>,
    ) -> Result<(ProjectContext, Option<ProjectContext>)> {
        let root = std::fs::canonicalize(workspace_root)
            .map_err(|_| Error::WorkspaceNotFound(workspace_root.to_string()))?;
        if !root.is_dir() {
            return Err(Error::WorkspaceNotFound(workspace_root.to_string()));
        }

        let source_dir = match source_dir {
            Some(dir) => {
                let p = Path::new(dir);
                if p.is_absolute() {
                    p.to_path_buf()
                } else {
                    root.join(p)
                }
            }
            None => root.join("src"),
        };

        let project_id = project_id
            .map(|p| p.to_string())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| {
                root.file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| "default".to_string())
            });

        let ctx = ProjectContext {
            workspace_root: root,
            source_dir,
            project_id,
        };
        let old = self
            .sessions
            .insert(session_id.to_string(), ctx.clone())
            .filter(|c| !c.project_id.is_empty());
        Ok((ctx, old))
    }

    /// Active project context for a session; `Err(WORKSPACE_NOT_FOUND)` when
    /// the session has not called `graph_set_workspace` yet.
    pub fn context(&self, session_id: &str) -> Result<ProjectContext> {
        self.sessions
            .get(session_id)
            .map(|c| c.clone())
            .filter(|c| !c.project_id.is_empty())
            .ok_or_else(|| {
                Error::WorkspaceNotFound(format!(
                    "no workspace configured for session {}; call graph_set_workspace",
                    session_id
                ))
            })
    }

    pub fn remove(&self, session_id: &str) {
        self.sessions.remove(session_id);
    }

    /// Pre-seed the stdio session from `MNEMOGRAPH_WORKSPACE_ROOT` /
    /// `MNEMOGRAPH_PROJECT_ID` so single-project deployments work without an
    /// explicit `graph_set_workspace` call.
    pub fn seed_from_settings(&self, settings: &Settings) {
        if let Some(root) = settings.workspace_root.as_ref() {
            match self.set_workspace(
                STDIO_SESSION,
                &root.to_string_lossy(),
                None,
                settings.project_id.as_deref(),
            ) {
                Ok((ctx, _)) => {
                    tracing::info!(project = %ctx.project_id, root = %ctx.workspace_root.display(), "seeded default workspace");
                }
                Err(e) => {
                    tracing::warn!("ignoring MNEMOGRAPH_WORKSPACE_ROOT: {}", e);
                }
            }
        }
    }
}

/// Stable 4-character fingerprint of a workspace location: base36 of the
/// first 24 bits of `sha256(path)`, zero-padded. Used to detect workspace
/// moves across rebuilds.
pub fn project_fingerprint(workspace_root: &Path) -> String {
    let digest = Sha256::digest(workspace_root.to_string_lossy().as_bytes());
    let bits = ((digest[0] as u32) << 16) | ((digest[1] as u32) << 8) | digest[2] as u32;
    let mut n = bits;
    let alphabet = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut out = Vec::new();
    while n > 0 {
        out.push(alphabet[(n % 36) as usize]);
        n /= 36;
    }
    while out.len() < 4 {
        out.push(b'0');
    }
    out.reverse();
    String::from_utf8(out).expect("base36 output is ascii")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_four_chars_and_stable() {
        let a = project_fingerprint(Path::new("/workspaces/demo"));
        let b = project_fingerprint(Path::new("/workspaces/demo"));
        let c = project_fingerprint(Path::new("/workspaces/other"));
        assert_eq!(a.len(), 4);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn set_workspace_rejects_missing_dir() {
        let mgr = SessionManager::new();
        let err = mgr
            .set_workspace("s1", "/definitely/not/a/dir", None, None)
            .unwrap_err();
        assert_eq!(err.code(), "WORKSPACE_NOT_FOUND");
    }

    #[test]
    fn set_workspace_defaults_source_and_project() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = SessionManager::new();
        let (ctx, old) = mgr
            .set_workspace("s1", &dir.path().to_string_lossy(), None, None)
            .unwrap();
        assert!(old.is_none());
        assert!(ctx.source_dir.ends_with("src"));
        assert!(!ctx.project_id.is_empty());
        assert!(ctx.workspace_root.is_absolute());
    }

    #[test]
    fn set_workspace_returns_previous_context() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        let mgr = SessionManager::new();
        mgr.set_workspace("s1", &a.path().to_string_lossy(), None, Some("one"))
            .unwrap();
        let (_, old) = mgr
            .set_workspace("s1", &b.path().to_string_lossy(), None, Some("two"))
            .unwrap();
        assert_eq!(old.unwrap().project_id, "one");
    }

    #[test]
    fn context_requires_configured_workspace() {
        let mgr = SessionManager::new();
        mgr.register("fresh");
        assert!(mgr.context("fresh").is_err());
    }
}
