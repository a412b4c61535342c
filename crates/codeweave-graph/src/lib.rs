//! codeweave-graph: Dependency and call graph infrastructure
//!
//! This crate builds and incrementally maintains the graphs for codeweave:
//! - Per-file artifact extraction for TypeScript, JavaScript and Python via tree-sitter
//! - Import and call resolution into local, imported, builtin or unresolved targets
//! - Conversion into an import graph and a call graph with persisted stores
//! - Content-hash change tracking and file watching for incremental updates

pub mod artifact;
pub mod convert;
pub mod graph;
pub mod lang;
pub mod modules;
pub mod parser;
pub mod paths;
pub mod store;
pub mod tree;
pub mod watch;
pub mod watcher;
pub mod workspace;

pub use artifact::{
    CallKind, CallSite, Entity, EntityKind, FileArtifact, FileIdentity, ImportSpec,
    ImportSpecifier, Location, ResolvedDefinition,
};
pub use convert::{GraphFragment, artifact_to_graph, artifacts_to_edge_list};
pub use graph::{Edge, EdgeKind, Node, NodeKind, UnresolvedCall};
pub use lang::{
    ExtractError, Extractor, ExtractorRegistry, PythonExtractor, Resolution, Resolver,
    TypeScriptExtractor,
};
pub use parser::{Language, ParseError, ParsedFile, Parser};
pub use store::{GraphDocument, GraphStats, GraphStore, StoreError, StoreKind};
pub use tree::{FolderTree, TreeNode, TreeNodeKind};
pub use watch::{WatchError, WatchService};
pub use watcher::{ChangeBatch, ChangeBatcher, FileEvent, FileWatcher, WatcherConfig};
pub use workspace::{SyncReport, Workspace, WorkspaceConfig, WorkspaceError};
