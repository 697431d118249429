//! Error types for Mnemograph
//!
//! Every variant maps to a machine-readable `errorCode` string that ends up
//! in the response envelope. Handlers return these as values; nothing here
//! is ever raised across the transport boundary.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("budget exceeded: {0}")]
    BudgetExceeded(String),

    #[error("workspace not found: {0}")]
    WorkspaceNotFound(String),

    #[error("source dir not found: {0}")]
    SourceDirNotFound(String),

    #[error("graph store unavailable: {0}")]
    GraphUnavailable(String),

    #[error("graph query failed: {0}")]
    GraphQueryFailed(String),

    #[error("hybrid retriever unavailable: {0}")]
    RetrieverUnavailable(String),

    #[error("element not found: {0}")]
    ElementNotFound(String),

    #[error("semantic diff element not found: {0}")]
    SemanticDiffElementNotFound(String),

    #[error("semantic slice target not found: {0}")]
    SemanticSliceNotFound(String),

    #[error("DECISION episodes require metadata.rationale")]
    DecisionRequiresRationale,

    #[error("claim conflict: {0}")]
    ClaimConflict(String),

    #[error("diff anchor not found: {0}")]
    DiffAnchorNotFound(String),

    #[error("architecture engine unavailable: {0}")]
    ArchEngineUnavailable(String),

    #[error("command timed out after {0}ms")]
    CommandTimeout(u64),

    #[error("command output truncated at {0} bytes")]
    CommandOutputTruncated(u64),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Machine-readable code for the `errorCode` envelope field.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ToolNotFound(_) => "TOOL_NOT_FOUND",
            Self::InvalidArgument(_) => "INVALID_ARGUMENT",
            Self::BudgetExceeded(_) => "BUDGET_EXCEEDED",
            Self::WorkspaceNotFound(_) => "WORKSPACE_NOT_FOUND",
            Self::SourceDirNotFound(_) => "SOURCE_DIR_NOT_FOUND",
            Self::GraphUnavailable(_) => "GRAPH_DB_UNAVAILABLE",
            Self::GraphQueryFailed(_) => "GRAPH_QUERY_FAILED",
            Self::RetrieverUnavailable(_) => "HYBRID_RETRIEVER_UNAVAILABLE",
            Self::ElementNotFound(_) => "ELEMENT_NOT_FOUND",
            Self::SemanticDiffElementNotFound(_) => "SEMANTIC_DIFF_ELEMENT_NOT_FOUND",
            Self::SemanticSliceNotFound(_) => "SEMANTIC_SLICE_NOT_FOUND",
            Self::DecisionRequiresRationale => "EPISODE_DECISION_REQUIRES_RATIONALE",
            Self::ClaimConflict(_) => "CLAIM_CONFLICT",
            Self::DiffAnchorNotFound(_) => "DIFF_SINCE_ANCHOR_NOT_FOUND",
            Self::ArchEngineUnavailable(_) => "ARCH_ENGINE_UNAVAILABLE",
            Self::CommandTimeout(_) => "COMMAND_TIMEOUT",
            Self::CommandOutputTruncated(_) => "COMMAND_OUTPUT_TRUNCATED",
            Self::Io(_) | Self::Json(_) | Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// `true` when the caller can fix the input and retry; `false` for
    /// infrastructure faults.
    pub fn recoverable(&self) -> bool {
        !matches!(
            self,
            Self::GraphUnavailable(_)
                | Self::GraphQueryFailed(_)
                | Self::RetrieverUnavailable(_)
                | Self::ArchEngineUnavailable(_)
                | Self::CommandTimeout(_)
                | Self::Io(_)
                | Self::Json(_)
                | Self::Internal(_)
        )
    }

    /// Concrete next action for the `hint` envelope field, where one exists.
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::ToolNotFound(_) => {
                Some("call tools_list for the catalogue of available tools".into())
            }
            Self::WorkspaceNotFound(_) => Some(
                "call graph_set_workspace with an absolute path to an existing directory".into(),
            ),
            Self::DecisionRequiresRationale => {
                Some("pass metadata.rationale explaining why the decision was taken".into())
            }
            Self::DiffAnchorNotFound(_) => {
                Some("pass a txId from a graph_rebuild result or graph_health.latestTxId".into())
            }
            Self::ElementNotFound(_) => {
                Some("pass a SCIP id or symbol name from a semantic_search result".into())
            }
            Self::SemanticDiffElementNotFound(_) => {
                Some("the symbol has no superseded version yet; rebuild after editing it".into())
            }
            Self::GraphUnavailable(_) => {
                Some("check MEMGRAPH_HOST/MEMGRAPH_PORT and that the store is running".into())
            }
            _ => None,
        }
    }

    pub fn invalid_argument(field: impl Into<String>) -> Self {
        Self::InvalidArgument(field.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
