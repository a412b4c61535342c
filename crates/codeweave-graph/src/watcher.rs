//! File system watcher feeding incremental graph updates.
//!
//! [`FileWatcher`] turns debounced notify events into [`FileEvent`]s for
//! source files, and [`ChangeBatcher`] coalesces those events into one
//! batch of modified and deleted paths once the tree has been quiet for a
//! while.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError, channel};
use std::time::{Duration, Instant};

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{DebouncedEvent, Debouncer, new_debouncer};
use tracing::{debug, warn};

use crate::parser::Parser;
use crate::watch::{self, Result};

/// Events emitted by the file watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEvent {
    /// A file appeared that the watcher had not seen before.
    Created(PathBuf),
    /// A known file was written.
    Modified(PathBuf),
    /// A file no longer exists.
    Deleted(PathBuf),
}

impl FileEvent {
    /// Get the path associated with this event.
    pub fn path(&self) -> &Path {
        match self {
            FileEvent::Created(p) | FileEvent::Modified(p) | FileEvent::Deleted(p) => p,
        }
    }
}

/// Configuration for the file watcher.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Debounce duration for rapid events.
    pub debounce_duration: Duration,
    /// File extensions to watch (e.g., "ts", "py").
    pub extensions: Vec<String>,
    /// Whether to respect .gitignore files.
    pub use_gitignore: bool,
    /// Additional ignore patterns.
    pub ignore_patterns: Vec<String>,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_duration: Duration::from_millis(300),
            extensions: Parser::supported_extensions()
                .into_iter()
                .map(str::to_string)
                .collect(),
            use_gitignore: true,
            ignore_patterns: vec![
                "node_modules".to_string(),
                ".git".to_string(),
                "__pycache__".to_string(),
                ".codeweave".to_string(),
                "*.pyc".to_string(),
            ],
        }
    }
}

type DebounceResult = std::result::Result<Vec<DebouncedEvent>, notify::Error>;

/// File system watcher with debouncing and filtering.
pub struct FileWatcher {
    _debouncer: Debouncer<RecommendedWatcher>,
    rx: Receiver<DebounceResult>,
    config: WatcherConfig,
    gitignore: Option<Gitignore>,
    root: PathBuf,
    known: RefCell<HashSet<PathBuf>>,
    pending: RefCell<VecDeque<FileEvent>>,
}

impl FileWatcher {
    /// Create a new file watcher for the given root directory.
    pub fn new(root: &Path) -> Result<Self> {
        Self::with_config(root, WatcherConfig::default())
    }

    /// Create a new file watcher with custom configuration.
    pub fn with_config(root: &Path, config: WatcherConfig) -> Result<Self> {
        let (tx, rx) = channel();

        let mut debouncer = new_debouncer(config.debounce_duration, tx)?;
        debouncer.watcher().watch(root, RecursiveMode::Recursive)?;

        let gitignore = if config.use_gitignore {
            match Self::build_gitignore(root, &config.ignore_patterns) {
                Ok(gitignore) => Some(gitignore),
                Err(e) => {
                    warn!(error = %e, "Failed to build ignore matcher, watching everything");
                    None
                }
            }
        } else {
            None
        };

        // Files already on disk report later writes as modifications.
        let known = watch::enumerate_files(root, &config.extensions)
            .into_iter()
            .collect();

        Ok(Self {
            _debouncer: debouncer,
            rx,
            config,
            gitignore,
            root: root.to_path_buf(),
            known: RefCell::new(known),
            pending: RefCell::new(VecDeque::new()),
        })
    }

    /// Build a gitignore matcher from ignore files and custom patterns.
    fn build_gitignore(root: &Path, extra_patterns: &[String]) -> Result<Gitignore> {
        let mut builder = GitignoreBuilder::new(root);

        for name in [".gitignore", ".codeweaveignore"] {
            let path = root.join(name);
            if path.exists() {
                if let Some(e) = builder.add(&path) {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable ignore file");
                }
            }
        }

        for pattern in extra_patterns {
            builder.add_line(None, pattern)?;
        }

        Ok(builder.build()?)
    }

    /// Check if a path should be ignored.
    fn should_ignore(&self, path: &Path) -> bool {
        if let Some(ref gi) = self.gitignore {
            if path.starts_with(gi.path())
                && gi
                    .matched_path_or_any_parents(path, path.is_dir())
                    .is_ignore()
            {
                return true;
            }
        }

        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => !self
                .config
                .extensions
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(ext)),
            None => true,
        }
    }

    fn classify(&self, path: PathBuf) -> FileEvent {
        let mut known = self.known.borrow_mut();
        if path.exists() {
            if known.insert(path.clone()) {
                FileEvent::Created(path)
            } else {
                FileEvent::Modified(path)
            }
        } else {
            known.remove(&path);
            FileEvent::Deleted(path)
        }
    }

    fn enqueue(&self, result: DebounceResult) {
        match result {
            Ok(events) => {
                for event in events {
                    if self.should_ignore(&event.path) {
                        continue;
                    }
                    let file_event = self.classify(event.path);
                    debug!(event = ?file_event, "File event");
                    self.pending.borrow_mut().push_back(file_event);
                }
            }
            Err(e) => warn!(error = %e, "Watch error"),
        }
    }

    /// Get the next file event, blocking until one is available.
    ///
    /// Returns `None` if the watcher has been stopped.
    pub fn next_event(&self) -> Option<FileEvent> {
        loop {
            if let Some(event) = self.pending.borrow_mut().pop_front() {
                return Some(event);
            }
            match self.rx.recv() {
                Ok(result) => self.enqueue(result),
                Err(_) => return None,
            }
        }
    }

    /// Wait up to `timeout` for the next file event.
    pub fn next_event_timeout(&self, timeout: Duration) -> Option<FileEvent> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(event) = self.pending.borrow_mut().pop_front() {
                return Some(event);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(remaining) {
                Ok(result) => self.enqueue(result),
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                    return None;
                }
            }
        }
    }

    /// Try to get the next file event without blocking.
    pub fn try_next_event(&self) -> Option<FileEvent> {
        loop {
            if let Some(event) = self.pending.borrow_mut().pop_front() {
                return Some(event);
            }
            match self.rx.try_recv() {
                Ok(result) => self.enqueue(result),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return None,
            }
        }
    }

    /// Get the root directory being watched.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// One flushed set of changes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeBatch {
    /// Created or modified paths, sorted.
    pub modified: Vec<PathBuf>,
    /// Deleted paths, sorted.
    pub deleted: Vec<PathBuf>,
}

impl ChangeBatch {
    pub fn is_empty(&self) -> bool {
        self.modified.is_empty() && self.deleted.is_empty()
    }

    pub fn len(&self) -> usize {
        self.modified.len() + self.deleted.len()
    }
}

/// Coalesces file events until no event has arrived for `quiet_period`.
///
/// Every event restarts the quiet timer. A path appears in at most one of
/// the two sets; the latest event for it decides which.
#[derive(Debug, Clone)]
pub struct ChangeBatcher {
    quiet_period: Duration,
    changes: BTreeMap<PathBuf, bool>,
    last_event: Option<Instant>,
}

impl ChangeBatcher {
    pub fn new(quiet_period: Duration) -> Self {
        Self {
            quiet_period,
            changes: BTreeMap::new(),
            last_event: None,
        }
    }

    pub fn push(&mut self, event: FileEvent) {
        self.push_at(event, Instant::now());
    }

    pub fn push_at(&mut self, event: FileEvent, now: Instant) {
        let (path, deleted) = match event {
            FileEvent::Created(path) | FileEvent::Modified(path) => (path, false),
            FileEvent::Deleted(path) => (path, true),
        };
        self.changes.insert(path, deleted);
        self.last_event = Some(now);
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Returns true once events are pending and the quiet period has elapsed.
    pub fn is_ready(&self, now: Instant) -> bool {
        match self.last_event {
            Some(last) => {
                !self.changes.is_empty() && now.saturating_duration_since(last) >= self.quiet_period
            }
            None => false,
        }
    }

    /// Time left until the pending batch becomes ready.
    pub fn time_until_ready(&self, now: Instant) -> Option<Duration> {
        let last = self.last_event?;
        if self.changes.is_empty() {
            return None;
        }
        Some(
            self.quiet_period
                .saturating_sub(now.saturating_duration_since(last)),
        )
    }

    /// Drain the pending changes regardless of timing.
    pub fn take(&mut self) -> ChangeBatch {
        let mut batch = ChangeBatch::default();
        for (path, deleted) in std::mem::take(&mut self.changes) {
            if deleted {
                batch.deleted.push(path);
            } else {
                batch.modified.push(path);
            }
        }
        self.last_event = None;
        batch
    }

    /// Drain the pending changes if the quiet period has elapsed.
    pub fn flush_if_ready(&mut self, now: Instant) -> Option<ChangeBatch> {
        if self.is_ready(now) {
            Some(self.take())
        } else {
            None
        }
    }
}

/// Watch loop delivering coalesced batches until `should_stop` returns true
/// or the watcher shuts down.
///
/// Errors from `on_batch` are logged and the loop carries on.
pub fn watch_batches<S, F, E>(
    watcher: &FileWatcher,
    quiet_period: Duration,
    should_stop: S,
    mut on_batch: F,
) where
    S: Fn() -> bool,
    F: FnMut(ChangeBatch) -> std::result::Result<(), E>,
    E: std::fmt::Display,
{
    let poll = Duration::from_millis(100);
    let mut batcher = ChangeBatcher::new(quiet_period);

    while !should_stop() {
        let wait = batcher
            .time_until_ready(Instant::now())
            .map_or(poll, |left| left.min(poll));
        if let Some(event) = watcher.next_event_timeout(wait) {
            batcher.push(event);
            while let Some(event) = watcher.try_next_event() {
                batcher.push(event);
            }
        }

        if let Some(batch) = batcher.flush_if_ready(Instant::now()) {
            debug!(
                modified = batch.modified.len(),
                deleted = batch.deleted.len(),
                "Flushing change batch"
            );
            if let Err(e) = on_batch(batch) {
                warn!(error = %e, "Failed to apply change batch");
            }
        }
    }

    if !batcher.is_empty() {
        if let Err(e) = on_batch(batcher.take()) {
            warn!(error = %e, "Failed to apply final change batch");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::thread;
    use tempfile::tempdir;

    #[test]
    fn test_watcher_config_default() {
        let config = WatcherConfig::default();
        assert_eq!(config.debounce_duration, Duration::from_millis(300));
        assert!(config.extensions.contains(&"ts".to_string()));
        assert!(config.extensions.contains(&"py".to_string()));
        assert!(config.use_gitignore);
    }

    #[test]
    fn test_file_event_path() {
        let path = PathBuf::from("/test/file.ts");

        let created = FileEvent::Created(path.clone());
        assert_eq!(created.path(), path.as_path());

        let modified = FileEvent::Modified(path.clone());
        assert_eq!(modified.path(), path.as_path());

        let deleted = FileEvent::Deleted(path.clone());
        assert_eq!(deleted.path(), path.as_path());
    }

    #[test]
    fn test_watcher_creation() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let watcher = FileWatcher::new(temp_dir.path()).expect("Should create watcher");
        assert_eq!(watcher.root(), temp_dir.path());
    }

    #[test]
    fn test_watcher_detects_file_changes() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let watcher = FileWatcher::new(temp_dir.path()).expect("Should create watcher");

        let file_path = temp_dir.path().join("app.ts");
        fs::write(&file_path, "export const x = 1;").expect("Failed to write file");

        thread::sleep(Duration::from_millis(500));

        let mut found = false;
        for _ in 0..10 {
            if let Some(event) = watcher.try_next_event() {
                // Canonicalize to handle symlinked temp dirs (macOS /var vs /private/var)
                let event_path = event.path().canonicalize().ok();
                let expected_path = file_path.canonicalize().ok();

                if event_path == expected_path {
                    found = true;
                    if let FileEvent::Deleted(_) = event {
                        panic!("Expected Created/Modified, got Deleted");
                    }
                    break;
                }
            }
            thread::sleep(Duration::from_millis(100));
        }

        assert!(found, "Should detect file creation");
    }

    #[test]
    fn test_watcher_ignores_non_source_files() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let watcher = FileWatcher::new(temp_dir.path()).expect("Should create watcher");

        fs::write(temp_dir.path().join("readme.txt"), "Hello").expect("Failed to write file");

        thread::sleep(Duration::from_millis(500));

        while let Some(event) = watcher.try_next_event() {
            let path = event.path();
            assert!(
                path.extension().map(|e| e != "txt").unwrap_or(true),
                "Should ignore .txt files, got event for: {:?}",
                path
            );
        }
    }

    #[test]
    fn test_should_ignore() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        fs::write(temp_dir.path().join(".codeweaveignore"), "generated/\n")
            .expect("Failed to write ignore file");

        let config = WatcherConfig {
            extensions: vec!["ts".to_string()],
            ..Default::default()
        };
        let watcher =
            FileWatcher::with_config(temp_dir.path(), config).expect("Should create watcher");

        assert!(!watcher.should_ignore(&temp_dir.path().join("src/app.ts")));
        assert!(watcher.should_ignore(&temp_dir.path().join("notes.txt")));
        assert!(watcher.should_ignore(&temp_dir.path().join("Makefile")));
        assert!(watcher.should_ignore(&temp_dir.path().join("node_modules/pkg/index.ts")));
        assert!(watcher.should_ignore(&temp_dir.path().join("generated/api.ts")));
    }

    #[test]
    fn test_classify_tracks_known_files() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let existing = temp_dir.path().join("old.py");
        fs::write(&existing, "x = 1").unwrap();
        let watcher = FileWatcher::new(temp_dir.path()).expect("Should create watcher");

        assert_eq!(
            watcher.classify(existing.clone()),
            FileEvent::Modified(existing.clone())
        );

        let fresh = temp_dir.path().join("new.py");
        fs::write(&fresh, "y = 2").unwrap();
        assert_eq!(watcher.classify(fresh.clone()), FileEvent::Created(fresh.clone()));
        assert_eq!(watcher.classify(fresh.clone()), FileEvent::Modified(fresh.clone()));

        fs::remove_file(&fresh).unwrap();
        assert_eq!(watcher.classify(fresh.clone()), FileEvent::Deleted(fresh));
    }

    #[test]
    fn test_batcher_waits_for_quiet_period() {
        let start = Instant::now();
        let quiet = Duration::from_millis(200);
        let mut batcher = ChangeBatcher::new(quiet);
        assert!(!batcher.is_ready(start));

        batcher.push_at(FileEvent::Modified(PathBuf::from("/a.ts")), start);
        assert!(!batcher.is_ready(start + Duration::from_millis(150)));

        // A second event restarts the timer.
        let later = start + Duration::from_millis(150);
        batcher.push_at(FileEvent::Created(PathBuf::from("/b.ts")), later);
        assert!(batcher.flush_if_ready(start + Duration::from_millis(250)).is_none());
        assert_eq!(
            batcher.time_until_ready(start + Duration::from_millis(250)),
            Some(Duration::from_millis(100))
        );

        let batch = batcher.flush_if_ready(later + quiet).unwrap();
        assert_eq!(
            batch.modified,
            vec![PathBuf::from("/a.ts"), PathBuf::from("/b.ts")]
        );
        assert!(batch.deleted.is_empty());
        assert!(batcher.is_empty());
        assert!(!batcher.is_ready(later + quiet * 10));
    }

    #[test]
    fn test_batcher_latest_event_wins() {
        let now = Instant::now();
        let mut batcher = ChangeBatcher::new(Duration::ZERO);
        let path = PathBuf::from("/ws/a.ts");

        batcher.push_at(FileEvent::Modified(path.clone()), now);
        batcher.push_at(FileEvent::Deleted(path.clone()), now);
        batcher.push_at(FileEvent::Deleted(PathBuf::from("/ws/b.ts")), now);
        batcher.push_at(FileEvent::Deleted(PathBuf::from("/ws/c.ts")), now);
        batcher.push_at(FileEvent::Created(PathBuf::from("/ws/c.ts")), now);
        assert_eq!(batcher.len(), 3);

        let batch = batcher.take();
        assert_eq!(batch.modified, vec![PathBuf::from("/ws/c.ts")]);
        assert_eq!(
            batch.deleted,
            vec![path, PathBuf::from("/ws/b.ts")]
        );
        assert_eq!(batch.len(), 3);
    }
}
