//! Persistent graph storage as whole JSON documents.
//!
//! Two stores share this type: the import store (file nodes and import
//! edges) and the call store (entity nodes, call edges and the unresolved
//! call list). Each persists to a single `{version, timestamp, nodes,
//! edges}` document that is read and written in full.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::graph::{Edge, Node, UnresolvedCall};
use crate::paths;

/// Version stamped on persisted graph documents.
pub const GRAPH_DOCUMENT_VERSION: &str = "1.0.0";

/// Error type for graph store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Which of the two graphs a store holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKind {
    Import,
    Call,
}

impl StoreKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreKind::Import => "import",
            StoreKind::Call => "call",
        }
    }

    /// Default document file name.
    pub fn default_file_name(&self) -> &'static str {
        match self {
            StoreKind::Import => "import-graph.json",
            StoreKind::Call => "call-graph.json",
        }
    }
}

/// On-disk shape of a store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphDocument {
    pub version: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    /// Present in call store documents only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unresolved: Option<Vec<UnresolvedCall>>,
}

/// Graph statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphStats {
    pub node_count: usize,
    pub edge_count: usize,
    pub unresolved_count: usize,
}

/// What a scoped removal took out of the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Removed {
    pub nodes: usize,
    pub edges: usize,
    pub unresolved: usize,
}

/// In-memory graph with whole-document persistence.
#[derive(Debug, Clone)]
pub struct GraphStore {
    kind: StoreKind,
    path: Option<PathBuf>,
    timestamp: Option<DateTime<Utc>>,
    nodes: BTreeMap<String, Node>,
    edges: Vec<Edge>,
    unresolved: Vec<UnresolvedCall>,
}

impl GraphStore {
    /// A store that is never persisted.
    pub fn in_memory(kind: StoreKind) -> Self {
        Self {
            kind,
            path: None,
            timestamp: None,
            nodes: BTreeMap::new(),
            edges: Vec::new(),
            unresolved: Vec::new(),
        }
    }

    /// Open the store persisted at `path`, starting empty if the document
    /// is absent or unreadable.
    pub fn open(kind: StoreKind, path: impl Into<PathBuf>) -> Self {
        let mut store = Self::in_memory(kind);
        store.path = Some(path.into());
        store.load();
        store
    }

    pub fn kind(&self) -> StoreKind {
        self.kind
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// When the document was last saved.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp
    }

    /// Replace in-memory state with the persisted document.
    ///
    /// Corruption is logged and leaves the store empty.
    pub fn load(&mut self) {
        self.nodes.clear();
        self.edges.clear();
        self.unresolved.clear();
        self.timestamp = None;

        let Some(path) = self.path.as_deref() else {
            return;
        };
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(store = self.kind.as_str(), path = %path.display(), "No graph document yet");
                return;
            }
            Err(e) => {
                warn!(
                    store = self.kind.as_str(),
                    path = %path.display(),
                    error = %e,
                    "Failed to read graph document, starting empty"
                );
                return;
            }
        };

        let document: GraphDocument = match serde_json::from_str(&content) {
            Ok(document) => document,
            Err(e) => {
                warn!(
                    store = self.kind.as_str(),
                    path = %path.display(),
                    error = %e,
                    "Corrupt graph document, starting empty"
                );
                return;
            }
        };

        self.timestamp = Some(document.timestamp);
        self.add_nodes(document.nodes);
        self.edges = document.edges;
        self.unresolved = document.unresolved.unwrap_or_default();
        debug!(
            store = self.kind.as_str(),
            nodes = self.nodes.len(),
            edges = self.edges.len(),
            "Loaded graph document"
        );
    }

    /// Snapshot of the store as its persisted document.
    pub fn to_document(&self) -> GraphDocument {
        GraphDocument {
            version: GRAPH_DOCUMENT_VERSION.to_string(),
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            nodes: self.nodes.values().cloned().collect(),
            edges: self.edges.clone(),
            unresolved: match self.kind {
                StoreKind::Call => Some(self.unresolved.clone()),
                StoreKind::Import => None,
            },
        }
    }

    /// Write the whole document. A no-op for in-memory stores.
    pub fn save(&mut self) -> Result<()> {
        let Some(path) = self.path.clone() else {
            return Ok(());
        };
        self.timestamp = Some(Utc::now());
        let json = serde_json::to_string_pretty(&self.to_document())?;

        let io_err = |source: std::io::Error| StoreError::Io {
            path: path.clone(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(io_err)?;
        std::fs::rename(&tmp, &path).map_err(io_err)?;

        debug!(store = self.kind.as_str(), path = %path.display(), "Saved graph document");
        Ok(())
    }

    /// Insert or replace a node by id.
    pub fn add_node(&mut self, node: Node) {
        self.nodes.insert(node.id.clone(), node);
    }

    pub fn add_nodes(&mut self, nodes: impl IntoIterator<Item = Node>) {
        for node in nodes {
            self.add_node(node);
        }
    }

    /// Append edges. Replacing a file's edges is the caller's job
    /// ([`GraphStore::remove_by_file`] first).
    pub fn add_edges(&mut self, edges: impl IntoIterator<Item = Edge>) {
        self.edges.extend(edges);
    }

    pub fn add_unresolved(&mut self, calls: impl IntoIterator<Item = UnresolvedCall>) {
        self.unresolved.extend(calls);
    }

    pub fn get_node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// All nodes, ordered by id.
    pub fn get_nodes(&self) -> Vec<&Node> {
        self.nodes.values().collect()
    }

    pub fn get_edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn get_unresolved(&self) -> &[UnresolvedCall] {
        &self.unresolved
    }

    pub fn get_nodes_by_file(&self, file_id: &str) -> Vec<&Node> {
        self.nodes
            .values()
            .filter(|node| node.file_id == file_id)
            .collect()
    }

    /// Nodes whose file is `folder` or lies beneath it.
    pub fn get_nodes_by_folder(&self, folder: &str) -> Vec<&Node> {
        self.nodes
            .values()
            .filter(|node| paths::is_within(&node.file_id, folder))
            .collect()
    }

    /// Edges leaving `node_id`.
    pub fn edges_from(&self, node_id: &str) -> Vec<&Edge> {
        self.edges.iter().filter(|e| e.source == node_id).collect()
    }

    /// Edges arriving at `node_id`.
    pub fn edges_to(&self, node_id: &str) -> Vec<&Edge> {
        self.edges.iter().filter(|e| e.target == node_id).collect()
    }

    /// Remove everything belonging to one file.
    pub fn remove_by_file(&mut self, file_id: &str) -> Removed {
        self.remove_where(|file| file == file_id)
    }

    /// Remove everything belonging to files under `folder`.
    pub fn remove_by_folder(&mut self, folder: &str) -> Removed {
        self.remove_where(|file| paths::is_within(file, folder))
    }

    fn remove_where(&mut self, owned: impl Fn(&str) -> bool) -> Removed {
        let nodes_before = self.nodes.len();
        let edges_before = self.edges.len();
        let unresolved_before = self.unresolved.len();

        self.nodes.retain(|_, node| !owned(&node.file_id));
        self.edges.retain(|edge| !owned(edge.source_file()));
        self.unresolved.retain(|call| !owned(call.source_file()));

        Removed {
            nodes: nodes_before - self.nodes.len(),
            edges: edges_before - self.edges.len(),
            unresolved: unresolved_before - self.unresolved.len(),
        }
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.edges.clear();
        self.unresolved.clear();
    }

    pub fn stats(&self) -> GraphStats {
        GraphStats {
            node_count: self.nodes.len(),
            edge_count: self.edges.len(),
            unresolved_count: self.unresolved.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NodeKind;
    use tempfile::tempdir;

    fn store_with_files(files: &[&str]) -> GraphStore {
        let mut store = GraphStore::in_memory(StoreKind::Import);
        store.add_nodes(files.iter().map(|f| Node::file(*f)));
        store
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let mut store = GraphStore::in_memory(StoreKind::Call);
        store.add_node(
            Node::entity("a.ts", "helper", "helper", NodeKind::Function).with_lines(1, 3),
        );
        store.add_node(
            Node::entity("a.ts", "helper", "helper", NodeKind::Function).with_lines(5, 9),
        );

        assert_eq!(store.stats().node_count, 1);
        let node = store.get_node("a.ts::helper").unwrap();
        assert_eq!(node.start_line, Some(5));
    }

    #[test]
    fn test_folder_query_is_separator_aware() {
        let store = store_with_files(&["src/parser/a.x", "src/parsers/b.x", "src/main.x"]);
        let ids: Vec<_> = store
            .get_nodes_by_folder("src/parser")
            .iter()
            .map(|n| n.id.as_str())
            .collect();
        assert_eq!(ids, vec!["src/parser/a.x"]);
        assert_eq!(store.get_nodes_by_folder("src").len(), 3);
        assert_eq!(store.get_nodes_by_file("src/main.x").len(), 1);
    }

    #[test]
    fn test_remove_by_file() {
        let mut store = GraphStore::in_memory(StoreKind::Call);
        store.add_nodes([
            Node::entity("a.ts", "helper", "helper", NodeKind::Function),
            Node::entity("b.ts", "run", "run", NodeKind::Function),
        ]);
        store.add_edges([
            Edge::call("b.ts::run", "a.ts::helper"),
            Edge::call("a.ts::helper", "<builtin>::console.log"),
        ]);
        store.add_unresolved([
            UnresolvedCall::new("b.ts::run", "mystery", 1),
            UnresolvedCall::new("a.ts::helper", "other", 0),
        ]);

        let removed = store.remove_by_file("b.ts");
        assert_eq!(
            removed,
            Removed {
                nodes: 1,
                edges: 1,
                unresolved: 1
            }
        );
        assert!(store.get_node("b.ts::run").is_none());
        assert_eq!(store.get_edges().len(), 1);
        assert_eq!(store.get_unresolved()[0].from, "a.ts::helper");
    }

    #[test]
    fn test_remove_by_folder_keeps_siblings() {
        let mut store = store_with_files(&["src/parser/a.ts", "src/parsers/b.ts"]);
        store.add_edges([
            Edge::import("src/parser/a.ts", "src/parsers/b.ts"),
            Edge::import("src/parsers/b.ts", "src/parser/a.ts"),
        ]);

        let removed = store.remove_by_folder("src/parser");
        assert_eq!(removed.nodes, 1);
        assert_eq!(removed.edges, 1);
        assert!(store.get_node("src/parsers/b.ts").is_some());
        assert_eq!(store.get_edges()[0].source, "src/parsers/b.ts");
    }

    #[test]
    fn test_neighbours() {
        let mut store = store_with_files(&["a.ts", "b.ts", "c.ts"]);
        store.add_edges([Edge::import("b.ts", "a.ts"), Edge::import("c.ts", "a.ts")]);
        assert_eq!(store.edges_to("a.ts").len(), 2);
        assert_eq!(store.edges_from("b.ts").len(), 1);
        assert!(store.edges_from("a.ts").is_empty());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("graphs").join("call-graph.json");

        let mut store = GraphStore::open(StoreKind::Call, &path);
        assert_eq!(store.stats(), GraphStats::default());
        store.add_node(Node::entity("a.ts", "helper", "helper", NodeKind::Function));
        store.add_edges([Edge::call("b.ts::<module>", "a.ts::helper")]);
        store.add_unresolved([UnresolvedCall::new("b.ts::<module>", "mystery", 1)]);
        store.save().unwrap();

        let reopened = GraphStore::open(StoreKind::Call, &path);
        assert_eq!(
            reopened.stats(),
            GraphStats {
                node_count: 1,
                edge_count: 1,
                unresolved_count: 1
            }
        );
        assert!(reopened.timestamp().is_some());

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["version"], GRAPH_DOCUMENT_VERSION);
        assert_eq!(raw["nodes"][0]["fileId"], "a.ts");
        assert_eq!(raw["unresolved"][0]["calleeName"], "mystery");
    }

    #[test]
    fn test_import_document_has_no_unresolved_list() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("import-graph.json");
        let mut store = GraphStore::open(StoreKind::Import, &path);
        store.add_node(Node::file("a.ts"));
        store.save().unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(raw.get("unresolved").is_none());
        assert_eq!(raw["nodes"][0]["kind"], "file");
    }

    #[test]
    fn test_corrupt_document_loads_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("import-graph.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = GraphStore::open(StoreKind::Import, &path);
        assert_eq!(store.stats().node_count, 0);
        assert!(store.timestamp().is_none());
    }

    #[test]
    fn test_save_error_propagates() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "file, not a directory").unwrap();

        let mut store = GraphStore::open(StoreKind::Import, blocker.join("graph.json"));
        store.add_node(Node::file("a.ts"));
        assert!(matches!(store.save(), Err(StoreError::Io { .. })));
    }

    #[test]
    fn test_clear() {
        let mut store = store_with_files(&["a.ts"]);
        store.add_edges([Edge::import("a.ts", "b.ts")]);
        store.clear();
        assert_eq!(store.stats(), GraphStats::default());
    }
}
