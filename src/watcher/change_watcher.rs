//! Change watcher that keeps a registry in sync with files on disk.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use notify::event::ModifyKind;
use notify::{Event, EventKind, RecursiveMode, Watcher};
use parking_lot::Mutex;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::{self, JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::config::WatcherConfig;
use crate::documents::{Discovery, DocumentError, DocumentParser, FileAccessCause};
use crate::registry::Registry;

use super::debouncer::{Debouncer, Fired};
use super::error::WatchError;
use super::path_index::PathIndex;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Lifecycle of a [`ChangeWatcher`]. There is no way back from `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    Idle,
    Watching,
    Stopped,
}

impl fmt::Display for WatcherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WatcherState::Idle => "idle",
            WatcherState::Watching => "watching",
            WatcherState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Counters describing watcher activity since creation.
#[derive(Debug, Default)]
pub struct WatcherStats {
    reparsed: AtomicU64,
    upserted: AtomicU64,
    deleted: AtomicU64,
    parse_failures: AtomicU64,
}

impl WatcherStats {
    /// Files read and parsed after a debounced change.
    pub fn reparsed(&self) -> u64 {
        self.reparsed.load(Ordering::Relaxed)
    }

    pub fn upserted(&self) -> u64 {
        self.upserted.load(Ordering::Relaxed)
    }

    pub fn deleted(&self) -> u64 {
        self.deleted.load(Ordering::Relaxed)
    }

    /// Changes that left the registry untouched because the file was invalid.
    pub fn parse_failures(&self) -> u64 {
        self.parse_failures.load(Ordering::Relaxed)
    }
}

enum Lifecycle {
    Idle,
    Watching {
        cancel: CancellationToken,
        scheduler: JoinHandle<()>,
        watcher: notify::RecommendedWatcher,
    },
    Stopped,
}

impl Lifecycle {
    fn state(&self) -> WatcherState {
        match self {
            Lifecycle::Idle => WatcherState::Idle,
            Lifecycle::Watching { .. } => WatcherState::Watching,
            Lifecycle::Stopped => WatcherState::Stopped,
        }
    }
}

/// Watches document roots and applies changes to a shared [`Registry`].
///
/// Notifications are debounced per path. When a path settles, its terminal
/// state is processed once: an existing file is re-parsed and upserted, a
/// missing file has its document deleted. Invalid files are logged and the
/// registry keeps whatever it had before.
pub struct ChangeWatcher {
    context: Arc<WorkerContext>,
    discovery: Discovery,
    debounce: Duration,
    workers: usize,
    lifecycle: Mutex<Lifecycle>,
}

impl ChangeWatcher {
    /// Create a builder for configuring the watcher.
    pub fn builder() -> ChangeWatcherBuilder {
        ChangeWatcherBuilder::new()
    }

    pub fn state(&self) -> WatcherState {
        self.lifecycle.lock().state()
    }

    pub fn stats(&self) -> &WatcherStats {
        &self.context.stats
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.context.registry
    }

    /// Subscribe to changes under `roots` and start applying them.
    ///
    /// Does not scan: the registry is expected to be loaded already. Must be
    /// called from within a Tokio runtime and only while `Idle`.
    pub fn start_watching(&self, roots: &[PathBuf]) -> Result<(), WatchError> {
        let mut lifecycle = self.lifecycle.lock();
        let actual = lifecycle.state();
        if actual != WatcherState::Idle {
            return Err(WatchError::InvalidState {
                expected: WatcherState::Idle,
                actual,
            });
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| WatchError::NoRuntime)?;

        let roots = roots
            .iter()
            .map(|root| {
                root.canonicalize()
                    .map_err(|e| WatchError::PathWatchFailed {
                        path: root.clone(),
                        reason: e.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = event_tx.blocking_send(res);
        })?;

        for root in &roots {
            watcher
                .watch(root, RecursiveMode::Recursive)
                .map_err(|e| WatchError::PathWatchFailed {
                    path: root.clone(),
                    reason: e.to_string(),
                })?;
            crate::debug_event!("watcher", "watching", "{}", root.display());
        }

        let tracked = {
            let mut index = self.context.index.lock();
            index.rebuild(self.context.registry.source_paths());
            index.len()
        };

        let cancel = CancellationToken::new();
        let (fire_tx, fire_rx) = mpsc::unbounded_channel();
        let (scan_tx, scan_rx) = mpsc::unbounded_channel();
        let scheduler = Scheduler {
            context: Arc::clone(&self.context),
            discovery: self.discovery.clone(),
            roots,
            debouncer: Debouncer::new(self.debounce, fire_tx),
            workers: Arc::new(Semaphore::new(self.workers.max(1))),
            tasks: JoinSet::new(),
            task_paths: HashMap::new(),
            in_flight: HashSet::new(),
            rerun: HashSet::new(),
            scan_tx,
        };
        let root_count = scheduler.roots.len();
        let handle = runtime.spawn(scheduler.run(event_rx, fire_rx, scan_rx, cancel.clone()));

        *lifecycle = Lifecycle::Watching {
            cancel,
            scheduler: handle,
            watcher,
        };

        crate::log_event!(
            "watcher",
            "started",
            "{root_count} roots, {tracked} tracked files"
        );
        Ok(())
    }

    /// Stop watching. Pending debounce timers are cancelled, in-flight
    /// workers are aborted and awaited, and the filesystem subscription is
    /// released. No registry mutation happens after this returns. Idempotent.
    pub async fn stop(&self) {
        let previous = std::mem::replace(&mut *self.lifecycle.lock(), Lifecycle::Stopped);
        if let Lifecycle::Watching {
            cancel,
            scheduler,
            watcher,
        } = previous
        {
            drop(watcher);
            cancel.cancel();
            if let Err(e) = scheduler.await {
                tracing::warn!(target: "watcher", "scheduler ended abnormally: {e}");
            }
            crate::log_event!("watcher", "stopped");
        }
    }
}

impl Drop for ChangeWatcher {
    fn drop(&mut self) {
        if let Lifecycle::Watching { cancel, .. } = self.lifecycle.get_mut() {
            cancel.cancel();
        }
    }
}

/// State shared by the scheduler and its workers.
struct WorkerContext {
    registry: Arc<Registry>,
    parser: DocumentParser,
    index: Mutex<PathIndex>,
    read_timeout: Duration,
    stats: WatcherStats,
}

impl WorkerContext {
    /// Apply the current state of `path` to the registry.
    async fn process(&self, path: &Path) {
        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_file() => self.reparse(path).await,
            Ok(_) => {
                crate::debug_event!("watcher", "skipped", "{} is not a file", path.display());
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => self.remove(path),
            Err(e) => {
                tracing::warn!(target: "watcher", "cannot stat {}: {e}", path.display());
            }
        }
    }

    async fn reparse(&self, path: &Path) {
        self.stats.reparsed.fetch_add(1, Ordering::Relaxed);

        let doc = match self
            .parser
            .parse_file_with_timeout(path, self.read_timeout)
            .await
        {
            Ok(doc) => doc,
            Err(DocumentError::FileAccess {
                cause: FileAccessCause::NotFound,
                ..
            }) => {
                // Removed between stat and read
                self.remove(path);
                return;
            }
            Err(e) => {
                self.stats.parse_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(target: "watcher", "keeping previous state: {e}");
                return;
            }
        };

        let id = doc.id().to_string();
        let previous_id = self.index.lock().insert(path.to_path_buf(), id.clone());
        if let Some(old) = previous_id.filter(|old| *old != id) {
            crate::log_event!("watcher", "re-identified", "{}: {old} -> {id}", path.display());
            self.delete_if_owned(&old, path);
        }

        let outcome = self.registry.upsert(doc);
        self.stats.upserted.fetch_add(1, Ordering::Relaxed);
        for warning in &outcome.warnings {
            tracing::warn!(target: "watcher", "{warning}");
        }
        crate::log_event!(
            "watcher",
            if outcome.is_created() { "created" } else { "updated" },
            "{id} from {}",
            path.display()
        );
    }

    fn remove(&self, path: &Path) {
        let id = self
            .index
            .lock()
            .remove(path)
            .or_else(|| {
                self.registry
                    .find_by_source_path(path)
                    .map(|doc| doc.id().to_string())
            });

        match id {
            Some(id) => self.delete_if_owned(&id, path),
            None => {
                crate::debug_event!("watcher", "untracked removal", "{}", path.display());
            }
        }
    }

    /// Delete `id` unless another file has claimed it since.
    fn delete_if_owned(&self, id: &str, path: &Path) {
        let owned = self
            .registry
            .get(id)
            .is_some_and(|doc| doc.source_path() == Some(path));
        if !owned {
            crate::debug_event!("watcher", "not owned", "{id} no longer comes from {}", path.display());
            return;
        }

        self.registry.delete(id);
        self.stats.deleted.fetch_add(1, Ordering::Relaxed);
        crate::log_event!("watcher", "deleted", "{id}");
    }
}

/// Single task that drains notifications and timer expiries.
struct Scheduler {
    context: Arc<WorkerContext>,
    discovery: Discovery,
    roots: Vec<PathBuf>,
    debouncer: Debouncer,
    workers: Arc<Semaphore>,
    /// Worker tasks, shut down with the scheduler.
    tasks: JoinSet<()>,
    task_paths: HashMap<task::Id, PathBuf>,
    /// Paths currently being processed by a worker.
    in_flight: HashSet<PathBuf>,
    /// In-flight paths that fired again and must run once more.
    rerun: HashSet<PathBuf>,
    /// Paths found by blocking directory scans.
    scan_tx: mpsc::UnboundedSender<PathBuf>,
}

impl Scheduler {
    async fn run(
        mut self,
        mut events: mpsc::Receiver<notify::Result<Event>>,
        mut fired: mpsc::UnboundedReceiver<Fired>,
        mut scanned: mpsc::UnboundedReceiver<PathBuf>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                Some(joined) = self.tasks.join_next_with_id(), if !self.tasks.is_empty() => {
                    self.finish(joined);
                }

                Some(path) = scanned.recv() => self.debouncer.record(path),

                Some(expiry) = fired.recv() => {
                    if let Some(path) = self.debouncer.accept(expiry) {
                        self.dispatch(path);
                    }
                }

                event = events.recv() => match event {
                    Some(Ok(event)) => self.handle_event(event),
                    Some(Err(e)) => {
                        tracing::error!(target: "watcher", "file watch error: {e}");
                    }
                    None => break,
                },
            }
        }

        let pending = self.debouncer.pending_count();
        self.debouncer.cancel_all();
        let running = self.tasks.len();
        self.tasks.shutdown().await;
        crate::debug_event!(
            "watcher",
            "scheduler exited",
            "{pending} pending timers cancelled, {running} workers aborted"
        );
    }

    fn handle_event(&mut self, event: Event) {
        if matches!(event.kind, EventKind::Access(_)) {
            return;
        }

        for path in event.paths {
            if self.is_hidden(&path) {
                continue;
            }

            if self.discovery.matcher().matches(&path) {
                crate::debug_event!("watcher", "changed", "{:?} {}", event.kind, path.display());
                self.debouncer.record(path);
                continue;
            }

            // Possibly a directory removed, renamed away or moved in
            let tracked = self.context.index.lock().paths_under(&path);
            let structural = matches!(
                event.kind,
                EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(_))
            );
            if tracked.is_empty() && !structural {
                continue;
            }

            let discovery = self.discovery.clone();
            let found_tx = self.scan_tx.clone();
            task::spawn_blocking(move || {
                for file in inspect_directory(&discovery, &path, tracked, structural) {
                    if found_tx.send(file).is_err() {
                        break; // Scheduler gone
                    }
                }
            });
        }
    }

    /// True if any component below the watched root is hidden.
    fn is_hidden(&self, path: &Path) -> bool {
        let Some(relative) = self
            .roots
            .iter()
            .find_map(|root| path.strip_prefix(root).ok())
        else {
            return false;
        };
        relative
            .components()
            .any(|c| c.as_os_str().to_str().is_some_and(|s| s.starts_with('.')))
    }

    fn dispatch(&mut self, path: PathBuf) {
        if !self.in_flight.insert(path.clone()) {
            self.rerun.insert(path);
            return;
        }

        let context = Arc::clone(&self.context);
        let workers = Arc::clone(&self.workers);
        let target = path.clone();
        let handle = self.tasks.spawn(async move {
            if let Ok(_permit) = workers.acquire_owned().await {
                context.process(&target).await;
            }
        });
        self.task_paths.insert(handle.id(), path);
    }

    fn finish(&mut self, joined: Result<(task::Id, ()), JoinError>) {
        let id = match joined {
            Ok((id, ())) => id,
            Err(e) => {
                tracing::error!(target: "watcher", "worker failed: {e}");
                e.id()
            }
        };
        let Some(path) = self.task_paths.remove(&id) else {
            return;
        };
        self.in_flight.remove(&path);
        if self.rerun.remove(&path) {
            self.dispatch(path);
        }
    }
}

/// Blocking filesystem check for a non-document path.
///
/// A path that no longer exists yields the tracked files beneath it. A new
/// directory yields the documents discovered inside it.
fn inspect_directory(
    discovery: &Discovery,
    path: &Path,
    tracked: Vec<PathBuf>,
    structural: bool,
) -> Vec<PathBuf> {
    if !tracked.is_empty() && !path.exists() {
        crate::debug_event!(
            "watcher",
            "directory gone",
            "{} ({} tracked files)",
            path.display(),
            tracked.len()
        );
        return tracked;
    }
    if !structural || !path.is_dir() {
        return Vec::new();
    }
    match discovery.discover(path) {
        Ok(found) => found.collect(),
        Err(e) => {
            crate::debug_event!("watcher", "scan skipped", "{e}");
            Vec::new()
        }
    }
}

/// Builder for constructing a ChangeWatcher.
pub struct ChangeWatcherBuilder {
    registry: Option<Arc<Registry>>,
    parser: DocumentParser,
    discovery: Discovery,
    debounce: Duration,
    read_timeout: Duration,
    workers: usize,
}

impl ChangeWatcherBuilder {
    /// Create a new builder with defaults.
    pub fn new() -> Self {
        let config = WatcherConfig::default();
        Self {
            registry: None,
            parser: DocumentParser::default(),
            discovery: Discovery::default(),
            debounce: config.debounce(),
            read_timeout: config.read_timeout(),
            workers: config.workers,
        }
    }

    /// Set the registry to keep in sync. Required.
    pub fn registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn parser(mut self, parser: DocumentParser) -> Self {
        self.parser = parser;
        self
    }

    /// Set the naming convention used to match changed paths.
    pub fn discovery(mut self, discovery: Discovery) -> Self {
        self.discovery = discovery;
        self
    }

    /// Apply debounce, read timeout and worker count from settings.
    pub fn config(mut self, config: &WatcherConfig) -> Self {
        self.debounce = config.debounce();
        self.read_timeout = config.read_timeout();
        self.workers = config.workers;
        self
    }

    pub fn debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Build the ChangeWatcher.
    pub fn build(self) -> Result<ChangeWatcher, WatchError> {
        let registry = self.registry.ok_or_else(|| WatchError::InitFailed {
            reason: "Registry is required".to_string(),
        })?;

        Ok(ChangeWatcher {
            context: Arc::new(WorkerContext {
                registry,
                parser: self.parser,
                index: Mutex::new(PathIndex::new()),
                read_timeout: self.read_timeout,
                stats: WatcherStats::default(),
            }),
            discovery: self.discovery,
            debounce: self.debounce,
            workers: self.workers,
            lifecycle: Mutex::new(Lifecycle::Idle),
        })
    }
}

impl Default for ChangeWatcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn watcher() -> ChangeWatcher {
        ChangeWatcher::builder()
            .registry(Arc::new(Registry::new()))
            .debounce(Duration::from_millis(20))
            .build()
            .unwrap()
    }

    #[test]
    fn test_registry_required() {
        assert!(matches!(
            ChangeWatcher::builder().build(),
            Err(WatchError::InitFailed { .. })
        ));
    }

    #[test]
    fn test_start_outside_runtime() {
        let dir = TempDir::new().unwrap();
        let watcher = watcher();
        let result = watcher.start_watching(&[dir.path().to_path_buf()]);
        assert!(matches!(result, Err(WatchError::NoRuntime)));
        assert_eq!(watcher.state(), WatcherState::Idle);
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let dir = TempDir::new().unwrap();
        let roots = vec![dir.path().to_path_buf()];
        let watcher = watcher();
        assert_eq!(watcher.state(), WatcherState::Idle);

        watcher.start_watching(&roots).unwrap();
        assert_eq!(watcher.state(), WatcherState::Watching);

        let again = watcher.start_watching(&roots);
        assert!(matches!(
            again,
            Err(WatchError::InvalidState {
                expected: WatcherState::Idle,
                actual: WatcherState::Watching
            })
        ));

        watcher.stop().await;
        assert_eq!(watcher.state(), WatcherState::Stopped);
        watcher.stop().await;
        assert_eq!(watcher.state(), WatcherState::Stopped);

        assert!(matches!(
            watcher.start_watching(&roots),
            Err(WatchError::InvalidState {
                actual: WatcherState::Stopped,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_missing_root_rejected() {
        let dir = TempDir::new().unwrap();
        let watcher = watcher();
        let result = watcher.start_watching(&[dir.path().join("missing")]);
        assert!(matches!(result, Err(WatchError::PathWatchFailed { .. })));
        assert_eq!(watcher.state(), WatcherState::Idle);
    }

    #[tokio::test]
    async fn test_stop_from_idle() {
        let watcher = watcher();
        watcher.stop().await;
        assert_eq!(watcher.state(), WatcherState::Stopped);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(WatcherState::Watching.to_string(), "watching");
    }
}
