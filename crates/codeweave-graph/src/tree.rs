//! Folder tree built from flat file paths.
//!
//! Nodes live in an arena and refer to each other by index. Each path is
//! inserted once; directories are created on demand while walking its
//! components.

use std::collections::HashMap;

use serde::Serialize;
use tracing::debug;

/// Index of a node within a [`FolderTree`].
pub type TreeIndex = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TreeNodeKind {
    Folder,
    File,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeNode {
    /// Last path component; empty for the root.
    pub name: String,
    /// Normalized path from the tree root.
    pub path: String,
    pub kind: TreeNodeKind,
    pub parent: Option<TreeIndex>,
    pub children: Vec<TreeIndex>,
}

/// Arena of folders and files.
#[derive(Debug, Clone)]
pub struct FolderTree {
    nodes: Vec<TreeNode>,
    by_path: HashMap<String, TreeIndex>,
}

impl FolderTree {
    pub const ROOT: TreeIndex = 0;

    pub fn new() -> Self {
        let root = TreeNode {
            name: String::new(),
            path: String::new(),
            kind: TreeNodeKind::Folder,
            parent: None,
            children: Vec::new(),
        };
        let mut by_path = HashMap::new();
        by_path.insert(String::new(), Self::ROOT);
        Self {
            nodes: vec![root],
            by_path,
        }
    }

    /// Build a tree from `/`-separated relative paths.
    ///
    /// Children are ordered folders first, then by name.
    pub fn from_paths<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut tree = Self::new();
        for path in paths {
            tree.insert_file(path.as_ref());
        }
        tree.sort_children();
        debug!(nodes = tree.nodes.len(), "Folder tree built");
        tree
    }

    /// Insert a file path, creating its folders. Returns the file's index.
    pub fn insert_file(&mut self, path: &str) -> TreeIndex {
        let parts: Vec<&str> = path
            .split('/')
            .filter(|part| !part.is_empty() && *part != ".")
            .collect();
        let Some((file_name, folders)) = parts.split_last() else {
            return Self::ROOT;
        };

        let mut parent = Self::ROOT;
        let mut current = String::new();
        for folder in folders {
            if !current.is_empty() {
                current.push('/');
            }
            current.push_str(folder);
            parent = self.ensure(&current, folder, TreeNodeKind::Folder, parent);
        }

        if !current.is_empty() {
            current.push('/');
        }
        current.push_str(file_name);
        self.ensure(&current, file_name, TreeNodeKind::File, parent)
    }

    fn ensure(
        &mut self,
        path: &str,
        name: &str,
        kind: TreeNodeKind,
        parent: TreeIndex,
    ) -> TreeIndex {
        if let Some(&index) = self.by_path.get(path) {
            return index;
        }
        let index = self.nodes.len();
        self.nodes.push(TreeNode {
            name: name.to_string(),
            path: path.to_string(),
            kind,
            parent: Some(parent),
            children: Vec::new(),
        });
        self.nodes[parent].children.push(index);
        self.by_path.insert(path.to_string(), index);
        index
    }

    fn sort_children(&mut self) {
        for i in 0..self.nodes.len() {
            let mut children = std::mem::take(&mut self.nodes[i].children);
            children.sort_by(|&a, &b| {
                let (a, b) = (&self.nodes[a], &self.nodes[b]);
                let a_key = (a.kind != TreeNodeKind::Folder, &a.name);
                let b_key = (b.kind != TreeNodeKind::Folder, &b.name);
                a_key.cmp(&b_key)
            });
            self.nodes[i].children = children;
        }
    }

    pub fn root(&self) -> &TreeNode {
        &self.nodes[Self::ROOT]
    }

    pub fn node(&self, index: TreeIndex) -> Option<&TreeNode> {
        self.nodes.get(index)
    }

    pub fn lookup(&self, path: &str) -> Option<TreeIndex> {
        self.by_path.get(path.trim_matches('/')).copied()
    }

    pub fn children(&self, index: TreeIndex) -> impl Iterator<Item = &TreeNode> {
        self.nodes
            .get(index)
            .into_iter()
            .flat_map(|node| node.children.iter().filter_map(|&child| self.nodes.get(child)))
    }

    /// Every file path at or below `index`, in tree order.
    pub fn files_under(&self, index: TreeIndex) -> Vec<&str> {
        let mut files = Vec::new();
        let mut stack = vec![index];
        while let Some(current) = stack.pop() {
            let Some(node) = self.nodes.get(current) else {
                continue;
            };
            if node.kind == TreeNodeKind::File {
                files.push(node.path.as_str());
            }
            stack.extend(node.children.iter().rev());
        }
        files
    }

    pub fn file_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|node| node.kind == TreeNodeKind::File)
            .count()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
    }

    /// Indented listing, two spaces per level, folders suffixed with `/`.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let mut stack: Vec<(TreeIndex, usize)> = self
            .root()
            .children
            .iter()
            .rev()
            .map(|&child| (child, 0))
            .collect();
        while let Some((index, depth)) = stack.pop() {
            let node = &self.nodes[index];
            out.push_str(&"  ".repeat(depth));
            out.push_str(&node.name);
            if node.kind == TreeNodeKind::Folder {
                out.push('/');
            }
            out.push('\n');
            stack.extend(node.children.iter().rev().map(|&child| (child, depth + 1)));
        }
        out
    }
}

impl Default for FolderTree {
    fn default() -> Self {
        Self::new()
    }
}
