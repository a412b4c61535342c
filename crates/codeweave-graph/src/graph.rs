//! Node and edge types of the persisted graphs.
//!
//! Two graphs share these types: the import graph (file nodes joined by
//! import edges) and the call graph (entity nodes joined by call edges).
//! Calls that could not be bound to any definition are kept as
//! [`UnresolvedCall`] records instead of edges.

use serde::{Deserialize, Serialize};

use crate::artifact::EntityKind;

/// Separator between a file id and an entity name in node ids.
pub const NODE_ID_SEPARATOR: &str = "::";

/// The kind of a graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    File,
    Function,
    Method,
    Arrow,
    Const,
    Class,
    Constructor,
    Getter,
    Setter,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::File => "file",
            NodeKind::Function => "function",
            NodeKind::Method => "method",
            NodeKind::Arrow => "arrow",
            NodeKind::Const => "const",
            NodeKind::Class => "class",
            NodeKind::Constructor => "constructor",
            NodeKind::Getter => "getter",
            NodeKind::Setter => "setter",
        }
    }

    /// Returns true if nodes of this kind can appear as call endpoints.
    pub fn is_callable(&self) -> bool {
        !matches!(self, NodeKind::File | NodeKind::Const)
    }
}

impl From<EntityKind> for NodeKind {
    fn from(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Function => NodeKind::Function,
            EntityKind::Method => NodeKind::Method,
            EntityKind::Arrow => NodeKind::Arrow,
            EntityKind::Const => NodeKind::Const,
            EntityKind::Class => NodeKind::Class,
            EntityKind::Constructor => NodeKind::Constructor,
            EntityKind::Getter => NodeKind::Getter,
            EntityKind::Setter => NodeKind::Setter,
        }
    }
}

/// A node in either graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// `fileId` for file nodes, `fileId::qualifiedName` for entities.
    pub id: String,
    pub name: String,
    pub kind: NodeKind,
    pub file_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_line: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_line: Option<usize>,
}

impl Node {
    /// Create the node representing a whole file.
    pub fn file(file_id: impl Into<String>) -> Self {
        let file_id = file_id.into();
        let name = file_id
            .rsplit('/')
            .next()
            .unwrap_or(&file_id)
            .to_string();
        Self {
            id: file_id.clone(),
            name,
            kind: NodeKind::File,
            file_id,
            signature: None,
            start_line: None,
            end_line: None,
        }
    }

    /// Create an entity node; `qualified_name` becomes part of the id.
    pub fn entity(
        file_id: impl Into<String>,
        qualified_name: &str,
        name: impl Into<String>,
        kind: NodeKind,
    ) -> Self {
        let file_id = file_id.into();
        Self {
            id: entity_node_id(&file_id, qualified_name),
            name: name.into(),
            kind,
            file_id,
            signature: None,
            start_line: None,
            end_line: None,
        }
    }

    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        let signature = signature.into();
        if !signature.is_empty() {
            self.signature = Some(signature);
        }
        self
    }

    pub fn with_lines(mut self, start_line: usize, end_line: usize) -> Self {
        self.start_line = Some(start_line);
        self.end_line = Some(end_line);
        self
    }
}

/// Build the node id of an entity.
pub fn entity_node_id(file_id: &str, qualified_name: &str) -> String {
    format!("{file_id}{NODE_ID_SEPARATOR}{qualified_name}")
}

/// The file part of a node id (`src/a.ts` for `src/a.ts::helper`).
pub fn owning_file(node_id: &str) -> &str {
    node_id
        .split_once(NODE_ID_SEPARATOR)
        .map(|(file, _)| file)
        .unwrap_or(node_id)
}

/// The kind of relationship an edge represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// File imports file
    Import,
    /// Entity calls entity
    Call,
}

impl EdgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeKind::Import => "import",
            EdgeKind::Call => "call",
        }
    }
}

/// A directed edge between two node ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub source: String,
    pub target: String,
    pub kind: EdgeKind,
}

impl Edge {
    pub fn new(source: impl Into<String>, target: impl Into<String>, kind: EdgeKind) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            kind,
        }
    }

    /// Create an import edge (file -> file).
    pub fn import(source_file: impl Into<String>, target_file: impl Into<String>) -> Self {
        Self::new(source_file, target_file, EdgeKind::Import)
    }

    /// Create a call edge (entity -> entity).
    pub fn call(caller_id: impl Into<String>, callee_id: impl Into<String>) -> Self {
        Self::new(caller_id, callee_id, EdgeKind::Call)
    }

    /// File the edge originates from.
    pub fn source_file(&self) -> &str {
        owning_file(&self.source)
    }

    /// File the edge points into.
    pub fn target_file(&self) -> &str {
        owning_file(&self.target)
    }
}

/// A call site that could not be bound to a definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnresolvedCall {
    /// Node id of the calling entity.
    pub from: String,
    pub callee_name: String,
    /// Stable id of the call site within its caller (`from#index`).
    pub call_site_id: String,
}

impl UnresolvedCall {
    pub fn new(from: impl Into<String>, callee_name: impl Into<String>, index: usize) -> Self {
        let from = from.into();
        Self {
            call_site_id: format!("{from}#{index}"),
            from,
            callee_name: callee_name.into(),
        }
    }

    /// File the unresolved call was made from.
    pub fn source_file(&self) -> &str {
        owning_file(&self.from)
    }
}
