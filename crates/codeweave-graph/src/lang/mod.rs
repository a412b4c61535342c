//! Language-specific extractors.
//!
//! Each language module turns a parsed syntax tree into a [`FileArtifact`]:
//! imports, declared entities, and the calls those entities make. Call
//! sites are bound to definitions by the shared [`resolver`] before the
//! artifact is returned.

pub mod python;
pub mod resolver;
pub mod typescript;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use crate::artifact::{FileArtifact, FileIdentity};
use crate::parser::ParseError;
use crate::paths;

pub use python::PythonExtractor;
pub use resolver::{Resolution, Resolver};
pub use typescript::TypeScriptExtractor;

/// Errors that can occur while extracting a file.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} is outside the workspace root")]
    OutsideRoot(PathBuf),

    #[error("No extractor registered for {0}")]
    Unsupported(PathBuf),

    #[error(transparent)]
    Parse(#[from] ParseError),
}

pub type Result<T> = std::result::Result<T, ExtractError>;

/// A per-language extraction adapter.
pub trait Extractor: Send + Sync {
    /// Language tag stamped on produced artifacts.
    fn id(&self) -> &'static str;

    /// File extensions (without the dot) this extractor claims.
    fn extensions(&self) -> &'static [&'static str];

    fn supports_async(&self) -> bool {
        true
    }

    fn supports_classes(&self) -> bool {
        true
    }

    /// Extract an artifact from source text.
    ///
    /// Returns `Ok(None)` when the grammar cannot parse the file.
    fn extract_source(&self, file: FileIdentity, source: &str) -> Result<Option<FileArtifact>>;

    /// Extract the file at `path`, reading it when `content` is `None`.
    fn extract(
        &self,
        root: &Path,
        path: &Path,
        content: Option<&str>,
    ) -> Result<Option<FileArtifact>> {
        let id = paths::file_id(root, path)
            .ok_or_else(|| ExtractError::OutsideRoot(path.to_path_buf()))?;

        let owned;
        let source = match content {
            Some(content) => content,
            None => {
                owned = std::fs::read_to_string(path).map_err(|source| ExtractError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                owned.as_str()
            }
        };

        let identity = FileIdentity {
            id,
            path: paths::normalize(path),
            language: self.id().to_string(),
        };
        self.extract_source(identity, source)
    }
}

/// Extension-keyed lookup of extractors.
#[derive(Clone, Default)]
pub struct ExtractorRegistry {
    by_extension: HashMap<String, Arc<dyn Extractor>>,
}

impl ExtractorRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in language.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(TypeScriptExtractor::typescript()));
        registry.register(Arc::new(TypeScriptExtractor::tsx()));
        registry.register(Arc::new(TypeScriptExtractor::javascript()));
        registry.register(Arc::new(PythonExtractor::new()));
        registry
    }

    /// Register an extractor for all of its extensions, replacing any
    /// previous claim on the same extension.
    pub fn register(&mut self, extractor: Arc<dyn Extractor>) {
        for ext in extractor.extensions() {
            self.by_extension
                .insert(ext.to_ascii_lowercase(), Arc::clone(&extractor));
        }
    }

    pub fn for_extension(&self, ext: &str) -> Option<&dyn Extractor> {
        self.by_extension
            .get(&ext.to_ascii_lowercase())
            .map(|extractor| extractor.as_ref())
    }

    pub fn for_path(&self, path: &Path) -> Option<&dyn Extractor> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| self.for_extension(ext))
    }

    pub fn is_supported(&self, path: &Path) -> bool {
        self.for_path(path).is_some()
    }

    /// All claimed extensions, sorted.
    pub fn extensions(&self) -> Vec<String> {
        let mut exts: Vec<String> = self.by_extension.keys().cloned().collect();
        exts.sort();
        exts
    }

    /// Dispatch to the extractor claiming `path`.
    pub fn extract(
        &self,
        root: &Path,
        path: &Path,
        content: Option<&str>,
    ) -> Result<Option<FileArtifact>> {
        let extractor = self
            .for_path(path)
            .ok_or_else(|| ExtractError::Unsupported(path.to_path_buf()))?;
        extractor.extract(root, path, content)
    }
}

impl std::fmt::Debug for ExtractorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractorRegistry")
            .field("extensions", &self.extensions())
            .finish()
    }
}

/// Line (1-indexed) a node starts on.
pub(crate) fn start_line(node: &tree_sitter::Node) -> usize {
    node.start_position().row + 1
}

/// Line (1-indexed) a node ends on.
pub(crate) fn end_line(node: &tree_sitter::Node) -> usize {
    node.end_position().row + 1
}

pub(crate) fn node_text<'a>(node: &tree_sitter::Node, source: &'a str) -> &'a str {
    &source[node.byte_range()]
}

/// Strip the quotes from a string literal.
pub(crate) fn unquote(text: &str) -> String {
    text.trim_matches(|c| c == '"' || c == '\'' || c == '`')
        .to_string()
}

/// Collapse runs of whitespace so multi-line signatures display on one line.
pub(crate) fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Returns true if `node` has an anonymous keyword child such as `async`.
pub(crate) fn has_token(node: &tree_sitter::Node, token: &str) -> bool {
    let mut cursor = node.walk();
    node.children(&mut cursor)
        .any(|child| !child.is_named() && child.kind() == token)
}

/// First direct child of the given kind.
pub(crate) fn child_of_kind<'t>(
    node: &tree_sitter::Node<'t>,
    kind: &str,
) -> Option<tree_sitter::Node<'t>> {
    let mut cursor = node.walk();
    node.children(&mut cursor).find(|child| child.kind() == kind)
}

/// Store the file-unique id on every entity.
pub(crate) fn assign_entity_ids(artifact: &mut FileArtifact) {
    let ids = artifact.entity_ids();
    for (entity, id) in artifact.entities.iter_mut().zip(ids) {
        entity.id = id;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_dispatch() {
        let registry = ExtractorRegistry::with_defaults();
        assert_eq!(
            registry.for_path(Path::new("src/a.ts")).map(|e| e.id()),
            Some("typescript")
        );
        assert_eq!(
            registry.for_path(Path::new("web/App.TSX")).map(|e| e.id()),
            Some("tsx")
        );
        assert_eq!(
            registry.for_path(Path::new("lib/index.mjs")).map(|e| e.id()),
            Some("javascript")
        );
        assert_eq!(
            registry.for_path(Path::new("tool.py")).map(|e| e.id()),
            Some("python")
        );
        assert!(registry.for_path(Path::new("README.md")).is_none());
        assert!(!registry.is_supported(Path::new("Cargo.toml")));
    }

    #[test]
    fn test_registry_extensions() {
        let exts = ExtractorRegistry::with_defaults().extensions();
        for ext in ["cjs", "cts", "js", "jsx", "mjs", "mts", "py", "pyi", "ts", "tsx"] {
            assert!(exts.contains(&ext.to_string()), "missing {ext}");
        }
    }

    #[test]
    fn test_unsupported_extension_is_an_error() {
        let registry = ExtractorRegistry::with_defaults();
        let result = registry.extract(Path::new("/ws"), Path::new("/ws/notes.txt"), Some(""));
        assert!(matches!(result, Err(ExtractError::Unsupported(_))));
    }

    #[test]
    fn test_extract_outside_root_is_an_error() {
        let registry = ExtractorRegistry::with_defaults();
        let result = registry.extract(Path::new("/ws"), Path::new("/other/a.ts"), Some(""));
        assert!(matches!(result, Err(ExtractError::OutsideRoot(_))));
    }

    #[test]
    fn test_extract_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ExtractorRegistry::with_defaults();
        let result = registry.extract(dir.path(), &dir.path().join("gone.ts"), None);
        assert!(matches!(result, Err(ExtractError::Read { .. })));
    }

    #[test]
    fn test_extract_sets_identity() {
        let registry = ExtractorRegistry::with_defaults();
        let artifact = registry
            .extract(
                Path::new("/ws"),
                Path::new("/ws/src/util.js"),
                Some("export function id(x) { return x; }\n"),
            )
            .unwrap()
            .unwrap();
        assert_eq!(artifact.file.id, "src/util.js");
        assert_eq!(artifact.file.path, "/ws/src/util.js");
        assert_eq!(artifact.file.language, "javascript");
    }

    #[test]
    fn test_helpers() {
        assert_eq!(unquote("'./a'"), "./a");
        assert_eq!(unquote("\"react\""), "react");
        assert_eq!(collapse_whitespace("f(a,\n    b)"), "f(a, b)");
    }
}
