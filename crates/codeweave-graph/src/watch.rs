//! Tracked-file state and content-hash change detection.
//!
//! The watch service owns the set of files that are in scope and the last
//! content hash seen for each. Only files are ever stored: adding a folder
//! expands it to the matching files beneath it, and whether a folder is
//! watched is derived from the tracked paths.
//!
//! State persists after every mutation as a v2 document:
//!
//! ```json
//! { "version": "2.0.0", "timestamp": "...", "watchedFiles": [...], "fileHashes": {...} }
//! ```
//!
//! Legacy v1 documents (`watchedPaths` entries that may name directories)
//! are migrated on load and immediately rewritten as v2.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::parser::Parser;
use crate::paths;

/// Version written to watch state documents.
pub const WATCH_STATE_VERSION: &str = "2.0.0";

/// Directory names never descended into during folder expansion.
pub const SKIPPED_DIRS: &[&str] = &[
    "node_modules",
    "bower_components",
    "__pycache__",
    "site-packages",
    "venv",
    "target",
];

/// Error type for watch state and file watcher operations.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Notify error: {0}")]
    Notify(#[from] notify::Error),
    #[error("Gitignore error: {0}")]
    Gitignore(#[from] ignore::Error),
}

pub type Result<T> = std::result::Result<T, WatchError>;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WatchStateDocument {
    version: String,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    watched_files: BTreeSet<String>,
    #[serde(default)]
    file_hashes: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyWatchStateDocument {
    #[serde(default)]
    watched_paths: Vec<LegacyWatchedPath>,
    #[serde(default)]
    file_hashes: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct LegacyWatchedPath {
    path: String,
    #[serde(rename = "type")]
    kind: LegacyPathKind,
    #[serde(default)]
    hash: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum LegacyPathKind {
    File,
    #[serde(alias = "folder", alias = "dir")]
    Directory,
}

/// Tracked files and their last-seen content hashes.
#[derive(Debug, Clone)]
pub struct WatchService {
    state_path: Option<PathBuf>,
    extensions: Vec<String>,
    watched: BTreeSet<String>,
    hashes: BTreeMap<String, String>,
}

impl WatchService {
    /// A service whose state is never persisted.
    pub fn in_memory() -> Self {
        Self {
            state_path: None,
            extensions: Parser::supported_extensions()
                .into_iter()
                .map(str::to_string)
                .collect(),
            watched: BTreeSet::new(),
            hashes: BTreeMap::new(),
        }
    }

    /// Load the state persisted at `state_path`.
    ///
    /// Absent or corrupt documents start empty. Legacy documents are
    /// migrated and saved back immediately, so only that save can fail.
    pub fn open(state_path: impl Into<PathBuf>) -> Result<Self> {
        let mut service = Self::in_memory();
        service.state_path = Some(state_path.into());
        if service.load() {
            service.save()?;
        }
        Ok(service)
    }

    /// Restrict folder expansion to these extensions (without dots).
    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extensions = extensions.into_iter().map(Into::into).collect();
        self
    }

    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    /// Returns true if the state came from a legacy document.
    fn load(&mut self) -> bool {
        let Some(path) = self.state_path.clone() else {
            return false;
        };
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return false,
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Failed to read watch state, starting empty"
                );
                return false;
            }
        };

        let value: serde_json::Value = match serde_json::from_str(&content) {
            Ok(value) => value,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Corrupt watch state, starting empty");
                return false;
            }
        };
        let version = value
            .get("version")
            .and_then(|v| v.as_str())
            .unwrap_or("1.0.0")
            .to_string();

        if version.starts_with("1.") || version == "1" {
            match serde_json::from_value::<LegacyWatchStateDocument>(value) {
                Ok(legacy) => {
                    self.migrate(legacy);
                    info!(
                        path = %path.display(),
                        from = %version,
                        files = self.watched.len(),
                        "Migrated legacy watch state"
                    );
                    return true;
                }
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "Corrupt legacy watch state, starting empty"
                    );
                    return false;
                }
            }
        }

        match serde_json::from_value::<WatchStateDocument>(value) {
            Ok(document) => {
                self.watched = document.watched_files;
                self.hashes = document
                    .file_hashes
                    .into_iter()
                    .filter(|(file, _)| self.watched.contains(file))
                    .collect();
                debug!(path = %path.display(), files = self.watched.len(), "Loaded watch state");
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Corrupt watch state, starting empty");
            }
        }
        false
    }

    /// Expand legacy directory entries into the files they contain.
    ///
    /// Stored hashes carry over; newly expanded files get none, so the next
    /// change scan reports them once.
    fn migrate(&mut self, legacy: LegacyWatchStateDocument) {
        let LegacyWatchStateDocument {
            watched_paths,
            file_hashes,
        } = legacy;

        for entry in watched_paths {
            let entry_path = PathBuf::from(&entry.path);
            match entry.kind {
                LegacyPathKind::File => {
                    let key = paths::normalize(&entry_path);
                    if let Some(hash) = entry.hash.or_else(|| file_hashes.get(&key).cloned()) {
                        self.hashes.insert(key.clone(), hash);
                    }
                    self.watched.insert(key);
                }
                LegacyPathKind::Directory => {
                    for file in enumerate_files(&entry_path, &self.extensions) {
                        let key = paths::normalize(&file);
                        if let Some(hash) = file_hashes.get(&key) {
                            self.hashes.insert(key.clone(), hash.clone());
                        }
                        self.watched.insert(key);
                    }
                }
            }
        }
    }

    fn save(&self) -> Result<()> {
        let Some(path) = self.state_path.as_deref() else {
            return Ok(());
        };
        let document = WatchStateDocument {
            version: WATCH_STATE_VERSION.to_string(),
            timestamp: Utc::now(),
            watched_files: self.watched.clone(),
            file_hashes: self.hashes.clone(),
        };
        let json = serde_json::to_string_pretty(&document)?;

        let io_err = |source: std::io::Error| WatchError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        std::fs::write(path, json).map_err(io_err)?;
        Ok(())
    }

    /// Start tracking one file and record its hash.
    ///
    /// Returns false if the file was already tracked or could not be read.
    pub fn add_file(&mut self, path: &Path) -> Result<bool> {
        let key = paths::normalize(path);
        if self.watched.contains(&key) {
            return Ok(false);
        }
        let hash = match hash_file(path) {
            Ok(hash) => hash,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cannot track file");
                return Ok(false);
            }
        };

        self.hashes.insert(key.clone(), hash);
        self.watched.insert(key);
        self.save()?;
        debug!(path = %path.display(), "Tracking file");
        Ok(true)
    }

    /// Track every matching file under `folder`; returns the newly tracked ones.
    pub fn add_folder(&mut self, folder: &Path) -> Result<Vec<PathBuf>> {
        let mut added = Vec::new();
        for file in enumerate_files(folder, &self.extensions) {
            let key = paths::normalize(&file);
            if self.watched.contains(&key) {
                continue;
            }
            match hash_file(&file) {
                Ok(hash) => {
                    self.hashes.insert(key.clone(), hash);
                    self.watched.insert(key);
                    added.push(file);
                }
                Err(e) => warn!(path = %file.display(), error = %e, "Cannot track file"),
            }
        }

        if !added.is_empty() {
            self.save()?;
        }
        info!(folder = %folder.display(), added = added.len(), "Added folder");
        Ok(added)
    }

    /// Stop tracking one file. Returns false if it was not tracked.
    pub fn remove_file(&mut self, path: &Path) -> Result<bool> {
        let key = paths::normalize(path);
        if !self.watched.remove(&key) {
            return Ok(false);
        }
        self.hashes.remove(&key);
        self.save()?;
        Ok(true)
    }

    /// Stop tracking every file under `folder`; returns the removed ones.
    pub fn remove_folder(&mut self, folder: &Path) -> Result<Vec<PathBuf>> {
        let prefix = paths::normalize(folder);
        let removed: Vec<String> = self
            .watched
            .iter()
            .filter(|file| paths::is_within(file, &prefix))
            .cloned()
            .collect();

        for file in &removed {
            self.watched.remove(file);
            self.hashes.remove(file);
        }
        if !removed.is_empty() {
            self.save()?;
        }
        Ok(removed.into_iter().map(PathBuf::from).collect())
    }

    /// Rehash every tracked file and report the ones whose content changed.
    ///
    /// Stored hashes are updated, so an immediate second call reports
    /// nothing. Files that cannot be read are skipped, not reported.
    pub fn get_changed_files(&mut self) -> Result<Vec<PathBuf>> {
        let mut changed = Vec::new();
        for file in &self.watched {
            let hash = match hash_file(Path::new(file)) {
                Ok(hash) => hash,
                Err(e) => {
                    debug!(path = %file, error = %e, "Skipping unreadable tracked file");
                    continue;
                }
            };
            if self.hashes.get(file) != Some(&hash) {
                self.hashes.insert(file.clone(), hash);
                changed.push(PathBuf::from(file));
            }
        }

        if !changed.is_empty() {
            self.save()?;
        }
        Ok(changed)
    }

    /// Rehash one tracked file. Returns true if its content changed.
    ///
    /// Untracked or unreadable files report no change.
    pub fn refresh_file(&mut self, path: &Path) -> Result<bool> {
        let key = paths::normalize(path);
        if !self.watched.contains(&key) {
            return Ok(false);
        }
        let hash = match hash_file(path) {
            Ok(hash) => hash,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Skipping unreadable tracked file");
                return Ok(false);
            }
        };
        if self.hashes.get(&key) == Some(&hash) {
            return Ok(false);
        }
        self.hashes.insert(key, hash);
        self.save()?;
        Ok(true)
    }

    pub fn is_file_watched(&self, path: &Path) -> bool {
        self.watched.contains(&paths::normalize(path))
    }

    /// Returns true if any tracked file lies under `folder`.
    pub fn is_folder_watched(&self, folder: &Path) -> bool {
        let prefix = paths::normalize(folder);
        self.watched.iter().any(|file| paths::is_within(file, &prefix))
    }

    /// Returns true if `path` lies under a directory that directly holds
    /// a tracked file. New files in fresh subfolders of a tracked folder
    /// qualify; files in untracked siblings do not.
    pub fn covers_path(&self, path: &Path) -> bool {
        let path = paths::normalize(path);
        self.watched.iter().any(|file| {
            let dir = paths::parent_dir(file);
            !dir.is_empty() && paths::is_within(&path, dir)
        })
    }

    /// All tracked files, sorted.
    pub fn watched_files(&self) -> Vec<PathBuf> {
        self.watched.iter().map(PathBuf::from).collect()
    }

    pub fn file_count(&self) -> usize {
        self.watched.len()
    }

    /// Last recorded hash of a tracked file.
    pub fn stored_hash(&self, path: &Path) -> Option<&str> {
        self.hashes.get(&paths::normalize(path)).map(String::as_str)
    }

    /// Returns true if folder expansion from `base` would pick up `path`.
    pub fn is_candidate(&self, base: &Path, path: &Path) -> bool {
        let extension_ok = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)));
        let Ok(relative) = path.strip_prefix(base) else {
            return false;
        };
        extension_ok
            && relative
                .iter()
                .all(|part| !is_skipped_name(&part.to_string_lossy()))
    }
}

fn is_skipped_name(name: &str) -> bool {
    name.starts_with('.') || SKIPPED_DIRS.contains(&name)
}

/// SHA-256 of a file's bytes, hex encoded.
pub fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Files under `folder` with one of `extensions`, sorted.
///
/// Hidden entries and dependency directories are skipped. `.gitignore`
/// files are not consulted.
pub fn enumerate_files(folder: &Path, extensions: &[String]) -> Vec<PathBuf> {
    if folder.is_file() {
        return vec![folder.to_path_buf()];
    }

    let walker = WalkBuilder::new(folder)
        .hidden(true)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .ignore(false)
        .parents(false)
        .filter_entry(|entry| {
            entry.depth() == 0 || !is_skipped_name(&entry.file_name().to_string_lossy())
        })
        .build();

    let mut files: Vec<PathBuf> = walker
        .filter_map(|result| match result {
            Ok(entry) => Some(entry),
            Err(e) => {
                debug!(error = %e, "Walk error");
                None
            }
        })
        .filter(|entry| entry.file_type().is_some_and(|ft| ft.is_file()))
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
        })
        .collect();

    files.sort();
    files
}
