//! Filesystem watcher for the install root.
//!
//! Every directory is registered individually (non-recursive) so that the
//! set of watched directories is explicit. Directories created or moved in
//! while running are registered as soon as their event arrives, including
//! whatever they already contain. Registrations are never removed; a
//! deleted directory only surfaces as ordinary remove events.
//!
//! ```text
//! notify callback thread
//!   → unbounded raw channel
//!   → watch task: filter create/modify/remove, extend registrations,
//!     drain queued events into one batch
//!   → WatchBatch channel → orchestrator
//! ```

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use walkdir::WalkDir;

use crate::error::{DeployError, DeployResult};

/// Capacity of the batch channel towards the orchestrator.
const BATCH_CHANNEL_CAPACITY: usize = 64;

/// Kind of a filesystem change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// A file or directory appeared.
    Created,
    /// Content, metadata, or name changed.
    Modified,
    /// A file or directory disappeared.
    Removed,
}

/// One changed path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    /// Affected path.
    pub path: PathBuf,
    /// What happened.
    pub kind: ChangeKind,
}

/// Changes delivered together.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchBatch {
    /// Changes in arrival order.
    pub changes: Vec<FileChange>,
}

/// Watcher lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    /// Not watching.
    Stopped,
    /// Delivering batches.
    Running,
}

struct Running {
    task: JoinHandle<()>,
    cancel: CancellationToken,
}

/// Watches an install root and every directory below it.
pub struct DirectoryWatcher {
    root: PathBuf,
    watched: Arc<Mutex<BTreeSet<PathBuf>>>,
    running: Option<Running>,
}

impl DirectoryWatcher {
    /// Create a stopped watcher for `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            watched: Arc::new(Mutex::new(BTreeSet::new())),
            running: None,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> WatcherState {
        if self.running.is_some() {
            WatcherState::Running
        } else {
            WatcherState::Stopped
        }
    }

    /// Directories registered so far.
    #[must_use]
    pub fn watched_directories(&self) -> Vec<PathBuf> {
        self.watched
            .lock()
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Register the root and its subdirectories and start delivering batches.
    ///
    /// Must be called within a Tokio runtime. Starting a running watcher
    /// returns [`DeployError::WatcherSetup`].
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::WatcherSetup`] if the root is not a directory
    /// or cannot be registered.
    pub fn start(&mut self) -> DeployResult<mpsc::Receiver<WatchBatch>> {
        if self.running.is_some() {
            return Err(self.setup_error("watcher is already running"));
        }
        if !self.root.is_dir() {
            return Err(self.setup_error("install root is not a directory"));
        }

        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let watcher = RecommendedWatcher::new(
            move |res| {
                let _ = raw_tx.send(res);
            },
            notify::Config::default(),
        )
        .map_err(|e| self.setup_error(format!("filesystem watcher: {e}")))?;

        let mut registry = WatchRegistry {
            watcher,
            watched: Arc::clone(&self.watched),
        };
        registry
            .register(&self.root)
            .map_err(|e| self.setup_error(e.to_string()))?;
        let count = registry.register_tree(&self.root);
        info!(
            root = %self.root.display(),
            directories = count.saturating_add(1),
            "Watching install root"
        );

        let (batch_tx, batch_rx) = mpsc::channel(BATCH_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(watch_loop(registry, raw_rx, batch_tx, cancel.clone()));
        self.running = Some(Running { task, cancel });
        Ok(batch_rx)
    }

    /// Stop watching and release the notification subscription.
    ///
    /// Interrupts the watch task even while it waits for events. Stopping a
    /// stopped watcher does nothing.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        running.cancel.cancel();
        if let Err(e) = running.task.await {
            warn!(error = %e, "Watch task ended abnormally");
        }
        debug!(root = %self.root.display(), "Stopped watching install root");
    }

    fn setup_error(&self, message: impl Into<String>) -> DeployError {
        DeployError::WatcherSetup {
            path: self.root.clone(),
            message: message.into(),
        }
    }
}

impl Drop for DirectoryWatcher {
    fn drop(&mut self) {
        if let Some(running) = &self.running {
            running.cancel.cancel();
        }
    }
}

/// The notify handle plus the append-only set of registered directories.
struct WatchRegistry {
    watcher: RecommendedWatcher,
    watched: Arc<Mutex<BTreeSet<PathBuf>>>,
}

impl WatchRegistry {
    /// Register one directory. Returns `false` if it was already registered.
    fn register(&mut self, dir: &Path) -> notify::Result<bool> {
        let key = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
        if self
            .watched
            .lock()
            .map(|set| set.contains(&key))
            .unwrap_or(false)
        {
            return Ok(false);
        }

        self.watcher.watch(dir, RecursiveMode::NonRecursive)?;
        if let Ok(mut set) = self.watched.lock() {
            set.insert(key);
        }
        trace!(dir = %dir.display(), "Registered directory");
        Ok(true)
    }

    /// Register every directory below `dir`. Returns how many were new.
    fn register_tree(&mut self, dir: &Path) -> usize {
        let mut added = 0usize;
        for entry in WalkDir::new(dir).min_depth(1).follow_links(true) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!(error = %e, "Skipping unreadable directory");
                    continue;
                },
            };
            if !entry.file_type().is_dir() {
                continue;
            }
            match self.register(entry.path()) {
                Ok(true) => added = added.saturating_add(1),
                Ok(false) => {},
                Err(e) => warn!(
                    dir = %entry.path().display(),
                    error = %e,
                    "Failed to watch directory"
                ),
            }
        }
        added
    }

    /// Translate a raw event into changes, extending registrations for new
    /// directories.
    fn absorb(&mut self, event: &Event, changes: &mut Vec<FileChange>) {
        let kind = match event.kind {
            EventKind::Create(_) => ChangeKind::Created,
            EventKind::Modify(_) => ChangeKind::Modified,
            EventKind::Remove(_) => ChangeKind::Removed,
            _ => return,
        };
        let may_add_directory = matches!(
            event.kind,
            EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(_))
        );

        for path in &event.paths {
            if may_add_directory && path.is_dir() {
                match self.register(path) {
                    Ok(true) => {
                        let nested = self.register_tree(path);
                        debug!(
                            dir = %path.display(),
                            nested,
                            "Watching new directory"
                        );
                    },
                    Ok(false) => {},
                    Err(e) => warn!(dir = %path.display(), error = %e, "Failed to watch directory"),
                }
            }
            changes.push(FileChange {
                path: path.clone(),
                kind,
            });
        }
    }
}

async fn watch_loop(
    mut registry: WatchRegistry,
    mut raw_rx: mpsc::UnboundedReceiver<notify::Result<Event>>,
    batch_tx: mpsc::Sender<WatchBatch>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => break,

            event = raw_rx.recv() => {
                let Some(first) = event else {
                    debug!("Filesystem watcher channel closed, stopping");
                    break;
                };

                let mut changes = Vec::new();
                let mut next = Some(first);
                while let Some(raw) = next.take() {
                    match raw {
                        Ok(ev) => registry.absorb(&ev, &mut changes),
                        Err(e) => warn!(error = %e, "Filesystem watcher error"),
                    }
                    next = raw_rx.try_recv().ok();
                }

                if changes.is_empty() {
                    continue;
                }
                trace!(changes = changes.len(), "Delivering watch batch");
                // A busy consumer must not keep stop() waiting.
                tokio::select! {
                    biased;

                    () = cancel.cancelled() => break,

                    sent = batch_tx.send(WatchBatch { changes }) => {
                        if sent.is_err() {
                            debug!("Batch receiver dropped, stopping watcher");
                            break;
                        }
                    }
                }
            }
        }
    }
    // Dropping the registry releases the notify subscription.
    drop(registry);
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, RemoveKind};
    use std::time::Duration;

    fn idle_registry() -> WatchRegistry {
        let watcher =
            RecommendedWatcher::new(|_: notify::Result<Event>| {}, notify::Config::default())
                .unwrap();
        WatchRegistry {
            watcher,
            watched: Arc::new(Mutex::new(BTreeSet::new())),
        }
    }

    fn watched(registry: &WatchRegistry) -> BTreeSet<PathBuf> {
        registry.watched.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn test_created_directory_registers_its_subtree() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let mut registry = idle_registry();
        registry.register(&root).unwrap();

        let new = root.join("new");
        std::fs::create_dir_all(new.join("inner")).unwrap();
        let mut changes = Vec::new();
        registry.absorb(
            &Event::new(EventKind::Create(CreateKind::Folder)).add_path(new.clone()),
            &mut changes,
        );

        let set = watched(&registry);
        assert!(set.contains(&new));
        assert!(set.contains(&new.join("inner")));
        assert_eq!(set.len(), 3);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeKind::Created);

        std::fs::remove_dir_all(&new).unwrap();
        registry.absorb(
            &Event::new(EventKind::Remove(RemoveKind::Folder)).add_path(new.clone()),
            &mut changes,
        );
        assert_eq!(watched(&registry).len(), 3);
        assert_eq!(changes[1].kind, ChangeKind::Removed);
    }

    #[tokio::test]
    async fn test_stop_not_blocked_by_stalled_consumer() {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let (batch_tx, _batch_rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(watch_loop(idle_registry(), raw_rx, batch_tx, cancel.clone()));

        // The first batch fills the channel; the second waits for room.
        for name in ["a.pkg", "b.pkg"] {
            let event = Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Any)))
                .add_path(PathBuf::from("/deploy").join(name));
            raw_tx.send(Ok(event)).unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("watch task ignored cancellation")
            .unwrap();
    }

    #[tokio::test]
    async fn test_missing_root_fails_setup() {
        let dir = tempfile::tempdir().unwrap();
        let mut watcher = DirectoryWatcher::new(dir.path().join("missing"));

        let err = watcher.start().unwrap_err();
        assert!(matches!(err, DeployError::WatcherSetup { .. }));
        assert_eq!(watcher.state(), WatcherState::Stopped);
    }

    #[tokio::test]
    async fn test_start_registers_existing_tree_and_stop() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("10/inner")).unwrap();
        std::fs::create_dir_all(dir.path().join("lib")).unwrap();

        let mut watcher = DirectoryWatcher::new(dir.path());
        let _rx = watcher.start().unwrap();
        assert_eq!(watcher.state(), WatcherState::Running);
        assert_eq!(watcher.watched_directories().len(), 4);

        assert!(watcher.start().is_err());

        watcher.stop().await;
        assert_eq!(watcher.state(), WatcherState::Stopped);
        watcher.stop().await;
    }

    #[tokio::test]
    async fn test_stop_closes_batch_channel() {
        let dir = tempfile::tempdir().unwrap();
        let mut watcher = DirectoryWatcher::new(dir.path());
        let mut rx = watcher.start().unwrap();

        tokio::time::timeout(Duration::from_secs(5), watcher.stop())
            .await
            .unwrap();
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    #[ignore = "depends on real filesystem notification timing"]
    async fn test_new_subdirectory_is_watched() {
        let dir = tempfile::tempdir().unwrap();
        let mut watcher = DirectoryWatcher::new(dir.path());
        let mut rx = watcher.start().unwrap();

        std::fs::create_dir(dir.path().join("20")).unwrap();
        let batch = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(batch.changes.iter().any(|c| c.kind == ChangeKind::Created));

        std::fs::write(dir.path().join("20/app.pkg"), b"module").unwrap();
        let seen = tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(batch) = rx.recv().await {
                if batch.changes.iter().any(|c| c.path.ends_with("app.pkg")) {
                    return true;
                }
            }
            false
        })
        .await
        .unwrap();
        assert!(seen);

        watcher.stop().await;
    }
}
