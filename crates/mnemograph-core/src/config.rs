//! Runtime settings — environment variables plus the optional per-workspace
//! `.mnemograph.json` file.
//!
//! The `MNEMOGRAPH_` prefix is the single canonical namespace. Missing or
//! malformed values fall back to defaults; configuration never aborts the
//! server.

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Built-in directory names skipped by every scan regardless of config.
pub const DEFAULT_IGNORES: &[&str] = &["node_modules", ".git", "dist", "target", "build", ".mnemograph"];

/// Hard ceiling: source files larger than this are never parsed.
pub const MAX_PARSE_FILE_BYTES: u64 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Stdio,
    Http,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub transport: Transport,
    pub port: u16,
    pub memgraph_host: String,
    pub memgraph_port: u16,
    pub qdrant_host: String,
    pub qdrant_port: u16,
    pub workspace_root: Option<PathBuf>,
    pub project_id: Option<String>,
    pub summarizer_url: Option<String>,
    pub enable_watcher: bool,
    pub ignore_patterns: Vec<String>,
    pub watcher_debounce_ms: u64,
    pub sync_rebuild_threshold_ms: u64,
    pub command_timeout_ms: u64,
    pub command_output_limit_bytes: u64,
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            transport: Transport::Stdio,
            port: 9000,
            memgraph_host: "localhost".into(),
            memgraph_port: 7687,
            qdrant_host: "localhost".into(),
            qdrant_port: 6333,
            workspace_root: None,
            project_id: None,
            summarizer_url: None,
            enable_watcher: false,
            ignore_patterns: Vec::new(),
            watcher_debounce_ms: 500,
            sync_rebuild_threshold_ms: 12_000,
            command_timeout_ms: 30_000,
            command_output_limit_bytes: 10_485_760,
            log_level: "info".into(),
        }
    }
}

fn env_str(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env_str(name).and_then(|v| v.parse().ok())
}

fn env_bool(name: &str) -> Option<bool> {
    env_str(name).map(|v| matches!(v.to_ascii_lowercase().as_str(), "true" | "1" | "yes"))
}

impl Settings {
    pub fn from_env() -> Self {
        let mut s = Self::default();
        if let Some(t) = env_str("MNEMOGRAPH_TRANSPORT") {
            if t.eq_ignore_ascii_case("http") {
                s.transport = Transport::Http;
            }
        }
        if let Some(p) = env_parse("MNEMOGRAPH_PORT") {
            s.port = p;
        }
        if let Some(h) = env_str("MEMGRAPH_HOST") {
            s.memgraph_host = h;
        }
        if let Some(p) = env_parse("MEMGRAPH_PORT") {
            s.memgraph_port = p;
        }
        if let Some(h) = env_str("QDRANT_HOST") {
            s.qdrant_host = h;
        }
        if let Some(p) = env_parse("QDRANT_PORT") {
            s.qdrant_port = p;
        }
        s.workspace_root = env_str("MNEMOGRAPH_WORKSPACE_ROOT").map(PathBuf::from);
        s.project_id = env_str("MNEMOGRAPH_PROJECT_ID");
        s.summarizer_url = env_str("MNEMOGRAPH_SUMMARIZER_URL");
        if let Some(b) = env_bool("MNEMOGRAPH_ENABLE_WATCHER") {
            s.enable_watcher = b;
        }
        if let Some(patterns) = env_str("MNEMOGRAPH_IGNORE_PATTERNS") {
            s.ignore_patterns = patterns
                .split(',')
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect();
        }
        if let Some(ms) = env_parse("MNEMOGRAPH_WATCHER_DEBOUNCE_MS") {
            s.watcher_debounce_ms = ms;
        }
        if let Some(ms) = env_parse("MNEMOGRAPH_SYNC_REBUILD_THRESHOLD_MS") {
            s.sync_rebuild_threshold_ms = ms;
        }
        if let Some(ms) = env_parse("MNEMOGRAPH_COMMAND_EXECUTION_TIMEOUT_MS") {
            s.command_timeout_ms = ms;
        }
        if let Some(b) = env_parse("MNEMOGRAPH_COMMAND_OUTPUT_SIZE_LIMIT_BYTES") {
            s.command_output_limit_bytes = b;
        }
        if let Some(level) = env_str("MNEMOGRAPH_LOG_LEVEL") {
            s.log_level = level.to_ascii_lowercase();
        }
        s
    }

    /// Bolt URI for the graph store.
    pub fn memgraph_uri(&self) -> String {
        format!("{}:{}", self.memgraph_host, self.memgraph_port)
    }

    /// REST base URL for the vector store.
    pub fn qdrant_url(&self) -> String {
        format!("http://{}:{}", self.qdrant_host, self.qdrant_port)
    }

    /// Ignore patterns merged with a workspace config's additions.
    pub fn merged_ignore_patterns(&self, workspace: &WorkspaceConfig) -> Vec<String> {
        let mut out: Vec<String> = DEFAULT_IGNORES.iter().map(|s| s.to_string()).collect();
        out.extend(self.ignore_patterns.iter().cloned());
        out.extend(workspace.ignore_patterns.iter().cloned());
        out.sort();
        out.dedup();
        out
    }
}

/// Optional `.mnemograph.json` at the workspace root.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    #[serde(rename = "sourceDir")]
    pub source_dir: Option<String>,
    #[serde(rename = "ignorePatterns")]
    pub ignore_patterns: Vec<String>,
    #[serde(rename = "summarizerUrl")]
    pub summarizer_url: Option<String>,
    #[serde(rename = "testCommand")]
    pub test_command: Option<String>,
}

impl WorkspaceConfig {
    pub fn load(workspace_root: &Path) -> Self {
        let path = workspace_root.join(".mnemograph.json");
        let Ok(text) = std::fs::read_to_string(&path) else {
            return Self::default();
        };
        serde_json::from_str(&text).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let s = Settings::default();
        assert_eq!(s.port, 9000);
        assert_eq!(s.memgraph_port, 7687);
        assert_eq!(s.qdrant_port, 6333);
        assert_eq!(s.watcher_debounce_ms, 500);
        assert_eq!(s.sync_rebuild_threshold_ms, 12_000);
        assert_eq!(s.command_timeout_ms, 30_000);
        assert_eq!(s.command_output_limit_bytes, 10_485_760);
    }

    #[test]
    fn workspace_config_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = WorkspaceConfig::load(dir.path());
        assert!(cfg.source_dir.is_none());
        assert!(cfg.ignore_patterns.is_empty());
    }

    #[test]
    fn workspace_config_parses_camel_case() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(".mnemograph.json"),
            r#"{ "sourceDir": "lib", "ignorePatterns": ["generated"] }"#,
        )
        .unwrap();
        let cfg = WorkspaceConfig::load(dir.path());
        assert_eq!(cfg.source_dir.as_deref(), Some("lib"));
        assert_eq!(cfg.ignore_patterns, vec!["generated"]);
    }
}
