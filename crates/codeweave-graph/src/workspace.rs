//! Workspace context tying extraction, the two graph stores and the watch
//! service together.
//!
//! A [`Workspace`] is the single writer for one source tree. Every mutating
//! operation runs one cycle: it updates the tracked-file state, re-extracts
//! the affected files, folds the results into the stores (a file's nodes
//! before its edges) and saves both stores.

use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::convert::{GraphFragment, artifact_to_graph};
use crate::lang::{ExtractError, ExtractorRegistry};
use crate::paths;
use crate::store::{GraphStore, StoreError, StoreKind};
use crate::tree::FolderTree;
use crate::watch::{WatchError, WatchService};

/// Default watch state file name.
pub const WATCH_STATE_FILE: &str = "watch-state.json";

/// Error type for workspace operations.
#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Watch error: {0}")]
    Watch(#[from] WatchError),
    #[error("Extraction error: {0}")]
    Extract(#[from] ExtractError),
    #[error("Invalid workspace root {path}: {source}")]
    Root {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, WorkspaceError>;

/// Where a workspace lives and where it persists its documents.
///
/// A `None` path keeps that document in memory only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceConfig {
    pub root: PathBuf,
    pub import_graph_path: Option<PathBuf>,
    pub call_graph_path: Option<PathBuf>,
    pub watch_state_path: Option<PathBuf>,
}

impl WorkspaceConfig {
    /// A workspace that persists nothing.
    pub fn in_memory(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            import_graph_path: None,
            call_graph_path: None,
            watch_state_path: None,
        }
    }

    /// A workspace persisting the default document names in `state_dir`.
    pub fn persisted(root: impl Into<PathBuf>, state_dir: &Path) -> Self {
        Self {
            root: root.into(),
            import_graph_path: Some(state_dir.join(StoreKind::Import.default_file_name())),
            call_graph_path: Some(state_dir.join(StoreKind::Call.default_file_name())),
            watch_state_path: Some(state_dir.join(WATCH_STATE_FILE)),
        }
    }
}

/// Outcome of one workspace cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Files extracted and folded into the stores.
    pub indexed: usize,
    /// Files that were unsupported, unreadable or unparseable.
    pub skipped: usize,
    /// Files whose extraction failed.
    pub failed: usize,
    /// Files untracked and dropped from the stores.
    pub removed: usize,
    /// Nodes added across both stores.
    pub nodes: usize,
    /// Import and call edges added.
    pub edges: usize,
    /// Unresolved call sites recorded.
    pub unresolved: usize,
}

impl SyncReport {
    /// Merge another report into this one.
    pub fn merge(&mut self, other: &SyncReport) {
        self.indexed += other.indexed;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.removed += other.removed;
        self.nodes += other.nodes;
        self.edges += other.edges;
        self.unresolved += other.unresolved;
    }

    /// Returns true if the cycle changed nothing.
    pub fn is_noop(&self) -> bool {
        self.indexed == 0 && self.removed == 0
    }
}

/// One source tree with its graphs and tracked files.
#[derive(Debug)]
pub struct Workspace {
    root: PathBuf,
    registry: ExtractorRegistry,
    imports: GraphStore,
    calls: GraphStore,
    watch: WatchService,
}

impl Workspace {
    /// Open a workspace with the built-in extractors.
    pub fn open(config: WorkspaceConfig) -> Result<Self> {
        Self::with_registry(config, ExtractorRegistry::with_defaults())
    }

    /// Open a workspace with a custom extractor set.
    pub fn with_registry(config: WorkspaceConfig, registry: ExtractorRegistry) -> Result<Self> {
        let root = std::path::absolute(&config.root).map_err(|source| WorkspaceError::Root {
            path: config.root.clone(),
            source,
        })?;

        let imports = match config.import_graph_path {
            Some(path) => GraphStore::open(StoreKind::Import, path),
            None => GraphStore::in_memory(StoreKind::Import),
        };
        let calls = match config.call_graph_path {
            Some(path) => GraphStore::open(StoreKind::Call, path),
            None => GraphStore::in_memory(StoreKind::Call),
        };
        let watch = match config.watch_state_path {
            Some(path) => WatchService::open(path)?,
            None => WatchService::in_memory(),
        }
        .with_extensions(registry.extensions());

        info!(
            root = %root.display(),
            files = watch.file_count(),
            nodes = imports.stats().node_count + calls.stats().node_count,
            "Opened workspace"
        );

        Ok(Self {
            root,
            registry,
            imports,
            calls,
            watch,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn import_store(&self) -> &GraphStore {
        &self.imports
    }

    pub fn call_store(&self) -> &GraphStore {
        &self.calls
    }

    pub fn watch_service(&self) -> &WatchService {
        &self.watch
    }

    pub fn registry(&self) -> &ExtractorRegistry {
        &self.registry
    }

    /// Workspace-relative id of `path`, if it lies inside the root.
    pub fn file_id(&self, path: &Path) -> Option<String> {
        paths::file_id(&self.root, &self.absolute(path))
    }

    fn absolute(&self, path: &Path) -> PathBuf {
        paths::absolutize(&self.root, path)
    }

    /// Track one file and index it.
    pub fn add_file(&mut self, path: &Path) -> Result<SyncReport> {
        let path = self.absolute(path);
        let mut report = SyncReport::default();

        if !self.registry.is_supported(&path) {
            debug!(path = %path.display(), "Unsupported file, not tracking");
            report.skipped += 1;
            return Ok(report);
        }

        self.watch.add_file(&path)?;
        if !self.watch.is_file_watched(&path) {
            report.skipped += 1;
            return Ok(report);
        }

        self.index_file(&path, &mut report);
        self.save()?;
        Ok(report)
    }

    /// Track every supported file under `folder` and index the new ones.
    pub fn add_folder(&mut self, folder: &Path) -> Result<SyncReport> {
        let folder = self.absolute(folder);
        let start = Instant::now();
        let mut report = SyncReport::default();

        let added = self.watch.add_folder(&folder)?;
        for path in &added {
            self.index_file(path, &mut report);
        }
        self.save()?;

        info!(
            folder = %folder.display(),
            indexed = report.indexed,
            skipped = report.skipped,
            failed = report.failed,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Indexed folder"
        );
        Ok(report)
    }

    /// Untrack one file and drop it from both graphs.
    pub fn remove_file(&mut self, path: &Path) -> Result<SyncReport> {
        let path = self.absolute(path);
        let mut report = SyncReport::default();

        if self.watch.remove_file(&path)? {
            report.removed += 1;
        }
        if let Some(file_id) = paths::file_id(&self.root, &path) {
            self.imports.remove_by_file(&file_id);
            self.calls.remove_by_file(&file_id);
        }
        self.save()?;
        Ok(report)
    }

    /// Untrack every file under `folder` and drop them from both graphs.
    pub fn remove_folder(&mut self, folder: &Path) -> Result<SyncReport> {
        let folder = self.absolute(folder);
        let mut report = SyncReport::default();

        let removed = self.watch.remove_folder(&folder)?;
        report.removed = removed.len();

        // The root itself has no file id and scopes everything.
        if folder == self.root {
            self.imports.remove_by_folder("");
            self.calls.remove_by_folder("");
        } else if let Some(folder_id) = paths::file_id(&self.root, &folder) {
            self.imports.remove_by_folder(&folder_id);
            self.calls.remove_by_folder(&folder_id);
        }
        self.save()?;

        info!(folder = %folder.display(), removed = report.removed, "Removed folder");
        Ok(report)
    }

    /// Re-extract every tracked file whose content hash changed.
    pub fn sync_changed(&mut self) -> Result<SyncReport> {
        let start = Instant::now();
        let mut report = SyncReport::default();

        let changed = self.watch.get_changed_files()?;
        for path in &changed {
            self.index_file(path, &mut report);
        }
        if !changed.is_empty() {
            self.save()?;
        }

        info!(
            changed = changed.len(),
            indexed = report.indexed,
            failed = report.failed,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Sync complete"
        );
        Ok(report)
    }

    /// Apply one batch of filesystem changes.
    ///
    /// Tracked files that changed are re-extracted. New files anywhere
    /// below a folder that directly holds tracked files start being
    /// tracked. Deleted tracked files are untracked and dropped from both
    /// graphs.
    pub fn apply_changes(
        &mut self,
        modified: &[PathBuf],
        deleted: &[PathBuf],
    ) -> Result<SyncReport> {
        let mut report = SyncReport::default();

        for path in deleted {
            let path = self.absolute(path);
            if !self.watch.remove_file(&path)? {
                continue;
            }
            if let Some(file_id) = paths::file_id(&self.root, &path) {
                self.imports.remove_by_file(&file_id);
                self.calls.remove_by_file(&file_id);
            }
            report.removed += 1;
            debug!(path = %path.display(), "Dropped deleted file");
        }

        for path in modified {
            let path = self.absolute(path);
            if self.watch.is_file_watched(&path) {
                if self.watch.refresh_file(&path)? {
                    self.index_file(&path, &mut report);
                }
                continue;
            }

            if self.watch.covers_path(&path)
                && self.registry.is_supported(&path)
                && self.watch.is_candidate(&self.root, &path)
                && self.watch.add_file(&path)?
            {
                self.index_file(&path, &mut report);
            }
        }

        if !report.is_noop() {
            self.save()?;
        }
        Ok(report)
    }

    /// Rebuild both graphs from every tracked file.
    pub fn reindex_all(&mut self) -> Result<SyncReport> {
        let start = Instant::now();
        let mut report = SyncReport::default();

        self.imports.clear();
        self.calls.clear();
        for path in self.watch.watched_files() {
            self.index_file(&path, &mut report);
        }
        self.save()?;

        info!(
            indexed = report.indexed,
            skipped = report.skipped,
            failed = report.failed,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Reindex complete"
        );
        Ok(report)
    }

    /// Folder tree of every tracked file inside the root.
    pub fn folder_tree(&self) -> FolderTree {
        let ids: Vec<String> = self
            .watch
            .watched_files()
            .iter()
            .filter_map(|path| paths::file_id(&self.root, path))
            .collect();
        FolderTree::from_paths(ids)
    }

    /// Extract one file and replace its slice of both graphs.
    ///
    /// Unparseable and failing files leave the stores untouched.
    fn index_file(&mut self, path: &Path, report: &mut SyncReport) {
        let Some(file_id) = paths::file_id(&self.root, path) else {
            warn!(path = %path.display(), "File outside workspace root, skipping");
            report.skipped += 1;
            return;
        };

        let artifact = match self.registry.extract(&self.root, path, None) {
            Ok(Some(artifact)) => artifact,
            Ok(None) => {
                warn!(file = %file_id, "Unparseable file, skipping");
                report.skipped += 1;
                return;
            }
            Err(ExtractError::Unsupported(_)) => {
                report.skipped += 1;
                return;
            }
            Err(e) => {
                warn!(file = %file_id, error = %e, "Extraction failed");
                report.failed += 1;
                return;
            }
        };

        let fragment = artifact_to_graph(&artifact, &file_id);
        self.apply_fragment(&file_id, fragment, report);
        report.indexed += 1;
    }

    fn apply_fragment(&mut self, file_id: &str, fragment: GraphFragment, report: &mut SyncReport) {
        self.imports.remove_by_file(file_id);
        self.calls.remove_by_file(file_id);

        let GraphFragment {
            nodes,
            import_edges,
            call_edges,
            unresolved,
        } = fragment;

        let (file_nodes, entity_nodes): (Vec<_>, Vec<_>) = nodes
            .into_iter()
            .partition(|node| node.kind == crate::graph::NodeKind::File);

        let node_count = file_nodes.len() + entity_nodes.len();
        let edge_count = import_edges.len() + call_edges.len();
        let unresolved_count = unresolved.len();

        self.imports.add_nodes(file_nodes);
        self.calls.add_nodes(entity_nodes);
        self.imports.add_edges(import_edges);
        self.calls.add_edges(call_edges);
        self.calls.add_unresolved(unresolved);

        debug!(
            file = %file_id,
            nodes = node_count,
            edges = edge_count,
            unresolved = unresolved_count,
            "Indexed file"
        );
        report.nodes += node_count;
        report.edges += edge_count;
        report.unresolved += unresolved_count;
    }

    fn save(&mut self) -> Result<()> {
        self.imports.save()?;
        self.calls.save()?;
        Ok(())
    }
}
