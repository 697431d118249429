//! Debounced file watcher
//!
//! Per-workspace state machine: idle → detecting → debouncing → rebuilding →
//! idle. Events under the source dir (and not ignored) reset the debounce
//! timer; on fire the pending set becomes one incremental rebuild. Events
//! that land during a rebuild are picked up immediately afterwards without a
//! second debounce.

use crate::builder::IgnoreSet;
use futures::future::BoxFuture;
use mnemograph_core::{Error, ProjectContext, Result};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WatcherState {
    Idle,
    Detecting,
    Debouncing,
    Rebuilding,
}

#[derive(Debug, Clone, Serialize)]
pub struct WatcherStatus {
    pub state: WatcherState,
    #[serde(rename = "pendingChanges")]
    pub pending_changes: usize,
}

struct Shared {
    state: WatcherState,
    pending: HashSet<PathBuf>,
}

/// Rebuild callback: receives the drained pending set.
pub type RebuildFn = Arc<dyn Fn(Vec<PathBuf>) -> BoxFuture<'static, ()> + Send + Sync>;

pub struct WorkspaceWatcher {
    shared: Arc<Mutex<Shared>>,
    // Dropping the notify handle stops the OS watch.
    _watcher: RecommendedWatcher,
    task: tokio::task::JoinHandle<()>,
}

impl WorkspaceWatcher {
    pub fn status(&self) -> WatcherStatus {
        let shared = self.shared.lock().expect("watcher lock poisoned");
        WatcherStatus {
            state: shared.state,
            pending_changes: shared.pending.len(),
        }
    }

    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for WorkspaceWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Start watching a workspace's source dir. One OS watch handle per
/// workspace; callers keep the returned watcher in a registry so repeat
/// registration stays idempotent.
pub fn spawn_watcher(
    ctx: ProjectContext,
    ignore: IgnoreSet,
    debounce: Duration,
    rebuild: RebuildFn,
) -> Result<WorkspaceWatcher> {
    let (tx, rx) = mpsc::unbounded_channel::<PathBuf>();
    let workspace_root = ctx.workspace_root.clone();
    let source_dir = ctx.source_dir.clone();

    let event_tx = tx.clone();
    let event_root = workspace_root.clone();
    let event_source = source_dir.clone();
    let event_ignore = ignore.clone();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        let Ok(event) = res else { return };
        if !matches!(
            event.kind,
            notify::EventKind::Create(_) | notify::EventKind::Modify(_) | notify::EventKind::Remove(_)
        ) {
            return;
        }
        for path in event.paths {
            if !path.starts_with(&event_source) {
                continue;
            }
            let ignored = path
                .strip_prefix(&event_root)
                .map(|rel| event_ignore.is_ignored(rel))
                .unwrap_or(true);
            if !ignored {
                let _ = event_tx.send(path);
            }
        }
    })
    .map_err(|e| Error::internal(format!("watcher init failed: {}", e)))?;
    watcher
        .watch(&source_dir, RecursiveMode::Recursive)
        .map_err(|e| Error::internal(format!("watch registration failed: {}", e)))?;

    let shared = Arc::new(Mutex::new(Shared {
        state: WatcherState::Idle,
        pending: HashSet::new(),
    }));
    let task = tokio::spawn(debounce_loop(shared.clone(), rx, debounce, rebuild));

    info!(source = %source_dir.display(), "file watcher started");
    Ok(WorkspaceWatcher {
        shared,
        _watcher: watcher,
        task,
    })
}

async fn debounce_loop(
    shared: Arc<Mutex<Shared>>,
    mut rx: mpsc::UnboundedReceiver<PathBuf>,
    debounce: Duration,
    rebuild: RebuildFn,
) {
    loop {
        set_state(&shared, WatcherState::Idle);
        let Some(first) = rx.recv().await else {
            debug!("watcher channel closed");
            return;
        };
        set_state(&shared, WatcherState::Detecting);
        add_pending(&shared, first);

        set_state(&shared, WatcherState::Debouncing);
        loop {
            match tokio::time::timeout(debounce, rx.recv()).await {
                Ok(Some(path)) => add_pending(&shared, path),
                Ok(None) => return,
                Err(_) => break,
            }
        }

        loop {
            let batch = drain_pending(&shared);
            if batch.is_empty() {
                break;
            }
            set_state(&shared, WatcherState::Rebuilding);
            rebuild(batch).await;
            // Changes that arrived mid-rebuild skip the debounce window.
            while let Ok(path) = rx.try_recv() {
                add_pending(&shared, path);
            }
        }
    }
}

fn set_state(shared: &Arc<Mutex<Shared>>, state: WatcherState) {
    match shared.lock() {
        Ok(mut guard) => guard.state = state,
        Err(e) => warn!("watcher state update failed: {}", e),
    }
}

fn add_pending(shared: &Arc<Mutex<Shared>>, path: PathBuf) {
    if let Ok(mut guard) = shared.lock() {
        guard.pending.insert(path);
    }
}

fn drain_pending(shared: &Arc<Mutex<Shared>>) -> Vec<PathBuf> {
    shared
        .lock()
        .map(|mut guard| guard.pending.drain().collect())
        .unwrap_or_default()
}
