//! Mnemograph core — envelopes, errors, config, protocol, sessions
//!
//! Shared foundation for every other crate: the response envelope and its
//! budget-aware shaper, the error taxonomy, runtime settings, JSON-RPC 2.0
//! framing types, and the per-session project-context manager.

pub mod config;
pub mod envelope;
pub mod error;
pub mod protocol;
pub mod session;

pub use config::{Settings, Transport, WorkspaceConfig};
pub use envelope::{
    estimate_tokens, shape, Envelope, ErrorDetail, FieldRule, OutputSchema, Priority, Profile,
};
pub use error::{Error, Result};
pub use protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
pub use session::{project_fingerprint, ProjectContext, SessionManager, STDIO_SESSION};
