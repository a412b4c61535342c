//! Configuration file support for codeweave.
//!
//! All codeweave data is stored in a `.codeweave/` directory:
//! - `.codeweave/config.toml` - Configuration file
//! - `.codeweave/import-graph.json`, `.codeweave/call-graph.json` - Graph documents
//! - `.codeweave/watch-state.json` - Tracked files and content hashes
//! - `.codeweave/logs/` - Log files from watch mode
//!
//! Config discovery searches for `.codeweave/config.toml` starting from the
//! current directory and walking up to parent directories.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use codeweave_graph::WorkspaceConfig;
use serde::{Deserialize, Serialize};

/// The codeweave data directory name.
pub const CODEWEAVE_DIR: &str = ".codeweave";
/// The config file name within the codeweave directory.
pub const CONFIG_FILE: &str = "config.toml";

/// Written by `codeweave init`.
pub const DEFAULT_CONFIG: &str = r#"# codeweave configuration
# Storage paths are relative to this .codeweave/ directory unless absolute

[project]
root = "."  # Relative to the directory holding .codeweave/

[storage]
import_graph = "import-graph.json"
call_graph = "call-graph.json"
watch_state = "watch-state.json"

[watch]
debounce_ms = 300
use_gitignore = true
"#;

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub project: ProjectConfig,
    pub storage: StorageConfig,
    pub watch: WatchConfig,
}

/// Project configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Root directory of the project.
    pub root: PathBuf,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
        }
    }
}

/// Where the persisted documents live.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    pub import_graph: PathBuf,
    pub call_graph: PathBuf,
    pub watch_state: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            import_graph: PathBuf::from("import-graph.json"),
            call_graph: PathBuf::from("call-graph.json"),
            watch_state: PathBuf::from("watch-state.json"),
        }
    }
}

/// Watch mode settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Quiet period before a batch of changes is applied.
    pub debounce_ms: u64,
    /// Whether to respect .gitignore files.
    pub use_gitignore: bool,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 300,
            use_gitignore: true,
        }
    }
}

impl WatchConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl Config {
    /// Load configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Find and load configuration from current or parent directories.
    pub fn find_and_load() -> Result<Option<(Self, PathBuf)>> {
        let current = std::env::current_dir()?;
        Self::find_and_load_from(&current)
    }

    /// Find and load configuration starting from a specific directory.
    ///
    /// Returns the config and the `.codeweave` directory it was found in.
    pub fn find_and_load_from(start: &Path) -> Result<Option<(Self, PathBuf)>> {
        let mut dir = start.to_path_buf();

        loop {
            let codeweave_dir = dir.join(CODEWEAVE_DIR);
            let config_path = codeweave_dir.join(CONFIG_FILE);
            if config_path.exists() {
                let config = Self::from_file(&config_path)?;
                return Ok(Some((config, codeweave_dir)));
            }

            if !dir.pop() {
                break;
            }
        }

        Ok(None)
    }

    /// Resolve the project root against the directory holding `.codeweave/`.
    pub fn resolve_root(&self, codeweave_dir: &Path) -> PathBuf {
        if self.project.root.is_absolute() {
            return self.project.root.clone();
        }
        let base = codeweave_dir.parent().unwrap_or(Path::new("."));
        let root = base.join(&self.project.root);
        root.canonicalize().unwrap_or(root)
    }

    /// Resolve a storage path relative to the `.codeweave` directory.
    pub fn resolve_storage(&self, codeweave_dir: &Path, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            codeweave_dir.join(path)
        }
    }

    /// Workspace settings for the graph library.
    pub fn workspace_config(&self, codeweave_dir: &Path) -> WorkspaceConfig {
        let storage = |path: &Path| Some(self.resolve_storage(codeweave_dir, path));
        WorkspaceConfig {
            root: self.resolve_root(codeweave_dir),
            import_graph_path: storage(&self.storage.import_graph),
            call_graph_path: storage(&self.storage.call_graph),
            watch_state_path: storage(&self.storage.watch_state),
        }
    }

    /// Validate the configuration, returning one message per problem.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        let storage = [
            ("storage.import_graph", &self.storage.import_graph),
            ("storage.call_graph", &self.storage.call_graph),
            ("storage.watch_state", &self.storage.watch_state),
        ];
        for (field, path) in storage {
            if path.as_os_str().is_empty() {
                errors.push(format!("{field}: path cannot be empty"));
            }
        }
        if self.storage.import_graph == self.storage.call_graph {
            errors.push("storage: import_graph and call_graph must differ".to_string());
        }
        if self.watch.debounce_ms == 0 {
            errors.push("watch.debounce_ms: must be greater than zero".to_string());
        }

        errors
    }
}
