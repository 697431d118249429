//! Graph data model — node records, edge kinds, SCIP-style identifiers
//!
//! Every code node carries a stable human-readable identifier of the form
//! `{projectId}:{kind}:{relativePath}[:{symbolName}[:{startLine}]]`.
//! Identifiers are content-addressed by structural position, not by hash: a
//! rename produces a new id and the old one is retired via temporal
//! invalidation, never deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Node kinds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeKind {
    File,
    Function,
    Class,
    Import,
    Export,
    Folder,
}

impl CodeKind {
    /// Graph label, e.g. `FILE`.
    pub fn label(self) -> &'static str {
        match self {
            Self::File => "FILE",
            Self::Function => "FUNCTION",
            Self::Class => "CLASS",
            Self::Import => "IMPORT",
            Self::Export => "EXPORT",
            Self::Folder => "FOLDER",
        }
    }

    /// Lowercase segment used inside SCIP ids, e.g. `file`.
    pub fn id_segment(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Function => "function",
            Self::Class => "class",
            Self::Import => "import",
            Self::Export => "export",
            Self::Folder => "folder",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "FILE" => Some(Self::File),
            "FUNCTION" => Some(Self::Function),
            "CLASS" => Some(Self::Class),
            "IMPORT" => Some(Self::Import),
            "EXPORT" => Some(Self::Export),
            "FOLDER" => Some(Self::Folder),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocKind {
    Document,
    Section,
}

impl DocKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Document => "DOCUMENT",
            Self::Section => "SECTION",
        }
    }
}

// ---------------------------------------------------------------------------
// SCIP-style identifiers
// ---------------------------------------------------------------------------

/// Id of a FILE node: `{project}:file:{relPath}`.
pub fn file_id(project: &str, rel_path: &str) -> String {
    format!("{}:file:{}", project, rel_path)
}

/// Id of a symbol node: `{project}:{kind}:{relPath}:{name}:{startLine}`.
pub fn symbol_id(project: &str, kind: CodeKind, rel_path: &str, name: &str, line: u32) -> String {
    format!("{}:{}:{}:{}:{}", project, kind.id_segment(), rel_path, name, line)
}

/// Id of an IMPORT node: `{project}:import:{relPath}:{source}`.
pub fn import_id(project: &str, rel_path: &str, source: &str) -> String {
    format!("{}:import:{}:{}", project, rel_path, source)
}

/// Id of an EXPORT node: `{project}:export:{relPath}:{name}`.
pub fn export_id(project: &str, rel_path: &str, name: &str) -> String {
    format!("{}:export:{}:{}", project, rel_path, name)
}

pub fn document_id(project: &str, rel_path: &str) -> String {
    format!("{}:document:{}", project, rel_path)
}

pub fn section_id(project: &str, rel_path: &str, start_line: u32) -> String {
    format!("{}:section:{}:{}", project, rel_path, start_line)
}

// ---------------------------------------------------------------------------
// Code nodes (bi-temporal)
// ---------------------------------------------------------------------------

/// One version of a FILE / FUNCTION / CLASS / IMPORT / EXPORT node.
///
/// Bi-temporal: `valid_from`/`valid_to` say when the fact was true in the
/// workspace; `created_at`/`tx_id` say when we learned it. At most one
/// version per id has `valid_to = None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeNode {
    pub id: String,
    pub kind: CodeKind,
    pub project_id: String,
    /// Symbol or file basename; verbatim module string for IMPORT nodes.
    pub name: String,
    /// Absolute filesystem path of the file this node lives in. Relative
    /// paths here are a build bug.
    pub path: String,
    pub language: Option<String>,
    pub start_line: Option<u32>,
    pub end_line: Option<u32>,
    pub is_exported: bool,
    /// Interface/trait-like symbols; used for interface expansion.
    pub is_abstract: bool,
    pub summary: Option<String>,
    /// FILE nodes: sha256 of the file contents.
    pub content_hash: Option<String>,
    pub valid_from: DateTime<Utc>,
    pub valid_to: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub tx_id: String,
}

impl CodeNode {
    pub fn is_current(&self) -> bool {
        self.valid_to.is_none()
    }

    /// Bi-temporal validity: `validFrom ≤ t < validTo ∨ validTo = null`.
    pub fn valid_at(&self, t: DateTime<Utc>) -> bool {
        self.valid_from <= t && self.valid_to.map(|end| t < end).unwrap_or(true)
    }
}

// ---------------------------------------------------------------------------
// Documents and sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocNode {
    pub id: String,
    pub kind: DocKind,
    pub project_id: String,
    /// Always the parent DOCUMENT's path, for SECTION nodes too.
    pub relative_path: String,
    pub title: Option<String>,
    pub heading: Option<String>,
    pub start_line: Option<u32>,
    pub end_line: Option<u32>,
    /// Section body text, used for section search.
    pub content: Option<String>,
    pub content_hash: Option<String>,
    pub valid_from: DateTime<Utc>,
    pub valid_to: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub tx_id: String,
}

impl DocNode {
    pub fn is_current(&self) -> bool {
        self.valid_to.is_none()
    }
}

// ---------------------------------------------------------------------------
// Episodes and learnings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EpisodeType {
    Observation,
    Decision,
    Edit,
    TestResult,
    Error,
    Reflection,
    Learning,
}

impl EpisodeType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Observation => "OBSERVATION",
            Self::Decision => "DECISION",
            Self::Edit => "EDIT",
            Self::TestResult => "TEST_RESULT",
            Self::Error => "ERROR",
            Self::Reflection => "REFLECTION",
            Self::Learning => "LEARNING",
        }
    }

    /// Accepts any casing (`decision`, `Decision`, `DECISION`, …).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "OBSERVATION" => Some(Self::Observation),
            "DECISION" => Some(Self::Decision),
            "EDIT" => Some(Self::Edit),
            "TEST_RESULT" => Some(Self::TestResult),
            "ERROR" => Some(Self::Error),
            "REFLECTION" => Some(Self::Reflection),
            "LEARNING" => Some(Self::Learning),
            _ => None,
        }
    }
}

/// Immutable memory record. Corrections are new episodes, never rewrites.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub id: String,
    pub project_id: String,
    pub agent_id: String,
    pub session_id: String,
    pub task_id: Option<String>,
    pub episode_type: EpisodeType,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub outcome: Option<String>,
    pub sensitive: bool,
    pub metadata: serde_json::Value,
    /// SCIP ids this episode INVOLVES.
    pub entities: Vec<String>,
    /// Episodes this one was DERIVED_FROM (reflection output).
    pub derived_from: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Learning {
    pub id: String,
    pub project_id: String,
    pub content: String,
    pub confidence: f64,
    pub extracted_at: DateTime<Utc>,
    /// SCIP ids this learning APPLIES_TO.
    pub applies_to: Vec<String>,
}

// ---------------------------------------------------------------------------
// Claims
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaimType {
    Task,
    File,
    Function,
    Feature,
}

impl ClaimType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::File => "file",
            Self::Function => "function",
            Self::Feature => "feature",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "task" => Some(Self::Task),
            "file" => Some(Self::File),
            "function" => Some(Self::Function),
            "feature" => Some(Self::Feature),
            _ => None,
        }
    }
}

/// Exclusive-work marker. States are terminal: once `valid_to` is set with a
/// reason (`released`, `code_changed`, `task_completed`, `expired`) the claim
/// never reopens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub id: String,
    pub project_id: String,
    pub agent_id: String,
    pub session_id: String,
    pub task_id: Option<String>,
    pub claim_type: ClaimType,
    pub target_id: String,
    pub intent: String,
    pub valid_from: DateTime<Utc>,
    pub valid_to: Option<DateTime<Utc>>,
    pub invalidation_reason: Option<String>,
    pub target_version_sha: Option<String>,
}

impl Claim {
    pub fn is_active(&self) -> bool {
        self.valid_to.is_none()
    }
}

// ---------------------------------------------------------------------------
// Communities and transactions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Community {
    pub id: String,
    pub project_id: String,
    pub label: String,
    pub summary: String,
    pub member_count: u64,
    /// SCIP ids with BELONGS_TO edges into this community.
    pub members: Vec<String>,
}

/// Audit-trail record written once per rebuild or incremental update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxRecord {
    pub id: String,
    pub project_id: String,
    pub tx_type: String,
    pub mode: String,
    pub agent_id: Option<String>,
    pub session_id: Option<String>,
    pub git_commit: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub files_affected: Vec<String>,
    pub node_count: u64,
    pub duration_ms: u64,
}

impl TxRecord {
    pub fn begin(project: &str, tx_type: &str, mode: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            project_id: project.to_string(),
            tx_type: tx_type.to_string(),
            mode: mode.to_string(),
            agent_id: None,
            session_id: None,
            git_commit: None,
            timestamp: Utc::now(),
            files_affected: Vec::new(),
            node_count: 0,
            duration_ms: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Edges
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeKind {
    Contains,
    SectionOf,
    NextSection,
    Imports,
    References,
    Calls,
    Exports,
    Involves,
    NextEpisode,
    AppliesTo,
    Targets,
    Supersedes,
    BelongsTo,
    Affects,
    DocDescribes,
    DerivedFrom,
    ImplementedBy,
}

impl EdgeKind {
    pub fn as_type(self) -> &'static str {
        match self {
            Self::Contains => "CONTAINS",
            Self::SectionOf => "SECTION_OF",
            Self::NextSection => "NEXT_SECTION",
            Self::Imports => "IMPORTS",
            Self::References => "REFERENCES",
            Self::Calls => "CALLS",
            Self::Exports => "EXPORTS",
            Self::Involves => "INVOLVES",
            Self::NextEpisode => "NEXT_EPISODE",
            Self::AppliesTo => "APPLIES_TO",
            Self::Targets => "TARGETS",
            Self::Supersedes => "SUPERSEDES",
            Self::BelongsTo => "BELONGS_TO",
            Self::Affects => "AFFECTS",
            Self::DocDescribes => "DOC_DESCRIBES",
            Self::DerivedFrom => "DERIVED_FROM",
            Self::ImplementedBy => "IMPLEMENTED_BY",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub project_id: String,
    pub from: String,
    pub to: String,
    pub kind: EdgeKind,
}

impl Edge {
    pub fn new(project: &str, from: impl Into<String>, to: impl Into<String>, kind: EdgeKind) -> Self {
        Self {
            project_id: project.to_string(),
            from: from.into(),
            to: to.into(),
            kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scip_ids_follow_the_scheme() {
        assert_eq!(file_id("demo", "src/a.ts"), "demo:file:src/a.ts");
        assert_eq!(
            symbol_id("demo", CodeKind::Function, "src/a.ts", "hello", 1),
            "demo:function:src/a.ts:hello:1"
        );
        assert_eq!(
            import_id("demo", "src/a.ts", "./util"),
            "demo:import:src/a.ts:./util"
        );
    }

    #[test]
    fn episode_type_parses_any_casing() {
        assert_eq!(EpisodeType::parse("decision"), Some(EpisodeType::Decision));
        assert_eq!(EpisodeType::parse("Test_Result"), Some(EpisodeType::TestResult));
        assert_eq!(EpisodeType::parse("bogus"), None);
    }

    #[test]
    fn valid_at_matches_half_open_interval() {
        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::seconds(10);
        let node = CodeNode {
            id: "p:file:a".into(),
            kind: CodeKind::File,
            project_id: "p".into(),
            name: "a".into(),
            path: "/w/a".into(),
            language: None,
            start_line: None,
            end_line: None,
            is_exported: false,
            is_abstract: false,
            summary: None,
            content_hash: None,
            valid_from: t0,
            valid_to: Some(t1),
            created_at: t0,
            tx_id: "tx".into(),
        };
        assert!(node.valid_at(t0));
        assert!(!node.valid_at(t1));
        assert!(node.valid_at(t0 + chrono::Duration::seconds(5)));
    }
}
