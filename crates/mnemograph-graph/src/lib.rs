//! Mnemograph graph layer — bi-temporal model, stores, build pipeline
//!
//! The data model and the [`store::GraphStore`] seam live here, together
//! with everything that writes through it: the parser registry, the rebuild
//! pipeline, documentation ingest, community detection, and the debounced
//! file watcher. Two store implementations ship: Bolt (Memgraph) and the
//! in-memory reference store.

pub mod bolt;
pub mod builder;
pub mod community;
pub mod docs;
pub mod index;
pub mod memory;
pub mod model;
pub mod parse;
pub mod store;
pub mod summary;
pub mod watch;

pub use bolt::BoltGraph;
pub use builder::{BuildMode, BuildReport, BuildRequest, GraphBuilder, IgnoreSet};
pub use index::{GraphIndex, ProjectSnapshot};
pub use memory::MemoryGraph;
pub use model::*;
pub use store::{ClaimOutcome, EpisodeFilter, FileChanges, GraphStore, ReleaseOutcome, Row};
pub use summary::{HttpSummarizer, NoSummarizer, Summarize};
pub use watch::{spawn_watcher, RebuildFn, WatcherState, WatcherStatus, WorkspaceWatcher};
