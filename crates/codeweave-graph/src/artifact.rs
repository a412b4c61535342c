//! Language-neutral artifact model produced by every extractor.
//!
//! A [`FileArtifact`] describes one source file: what it imports, which
//! entities it declares, and which calls each entity makes. Artifacts are
//! transient; the graph converter turns them into nodes and edges and the
//! artifact itself is dropped afterwards.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Schema version stamped on every artifact.
pub const ARTIFACT_SCHEMA_VERSION: &str = "1.0.0";

/// Pseudo file id used as the target of calls into language builtins.
pub const BUILTIN_FILE: &str = "<builtin>";

/// Pseudo entity name for calls made at module scope.
pub const MODULE_SCOPE: &str = "<module>";

/// The kind of a declared entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// A standalone function declaration
    Function,
    /// A method attached to a class
    Method,
    /// An arrow function or lambda bound to a name
    Arrow,
    /// A module-level constant
    Const,
    /// A class definition
    Class,
    /// A class constructor (`constructor`, `__init__`)
    Constructor,
    /// A property getter
    Getter,
    /// A property setter
    Setter,
}

impl EntityKind {
    /// Returns the string representation used in documents and display.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Function => "function",
            EntityKind::Method => "method",
            EntityKind::Arrow => "arrow",
            EntityKind::Const => "const",
            EntityKind::Class => "class",
            EntityKind::Constructor => "constructor",
            EntityKind::Getter => "getter",
            EntityKind::Setter => "setter",
        }
    }

    /// Returns true for kinds that only exist inside a class body.
    pub fn is_member(&self) -> bool {
        matches!(
            self,
            EntityKind::Method | EntityKind::Constructor | EntityKind::Getter | EntityKind::Setter
        )
    }
}

/// How a call expression invokes its callee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallKind {
    /// Plain call: `foo()`
    Function,
    /// Member call: `obj.foo()`
    Method,
    /// Instantiation: `new Foo()`
    Constructor,
}

/// A line span (1-indexed, inclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub start_line: usize,
    pub end_line: usize,
}

impl Location {
    pub fn new(start_line: usize, end_line: usize) -> Self {
        Self {
            start_line,
            end_line,
        }
    }

    /// Returns true if `other` lies inside this span and is not the same span.
    pub fn strictly_contains(&self, other: &Location) -> bool {
        self.start_line <= other.start_line
            && other.end_line <= self.end_line
            && (self.start_line, self.end_line) != (other.start_line, other.end_line)
    }

    /// Number of lines covered.
    pub fn line_count(&self) -> usize {
        self.end_line.saturating_sub(self.start_line) + 1
    }
}

/// Identity of the file an artifact describes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileIdentity {
    /// Workspace-relative, forward-slash path. The join key for the graph.
    pub id: String,
    /// Absolute path on disk.
    pub path: String,
    /// Language tag of the extractor that produced the artifact.
    pub language: String,
}

/// One imported name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSpecifier {
    /// Imported name. `*` binds the whole module, `default` the default export.
    pub name: String,
    /// Local alias, if the import renames the binding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl ImportSpecifier {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: None,
        }
    }

    pub fn aliased(name: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: Some(alias.into()),
        }
    }

    /// The name this specifier binds in the importing file, if any.
    ///
    /// A bare wildcard (`from x import *`) binds nothing.
    pub fn local_name(&self) -> Option<&str> {
        match (&self.alias, self.name.as_str()) {
            (Some(alias), _) => Some(alias),
            (None, "*") => None,
            (None, name) => Some(name),
        }
    }
}

/// One import statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSpec {
    /// Module specifier as written (`./a`, `react`, `..helpers`).
    pub source: String,
    #[serde(default)]
    pub specifiers: Vec<ImportSpecifier>,
    /// Target already resolved by the extractor when statically known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_path: Option<String>,
    /// `export ... from` statements produce an edge but no local binding.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub reexport: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
}

impl ImportSpec {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            specifiers: Vec::new(),
            resolved_path: None,
            reexport: false,
            line: None,
        }
    }

    pub fn with_specifier(mut self, specifier: ImportSpecifier) -> Self {
        self.specifiers.push(specifier);
        self
    }

    pub fn with_resolved_path(mut self, path: impl Into<String>) -> Self {
        self.resolved_path = Some(path.into());
        self
    }

    pub fn with_line(mut self, line: usize) -> Self {
        self.line = Some(line);
        self
    }

    pub fn as_reexport(mut self) -> Self {
        self.reexport = true;
        self
    }

    /// Returns true for specifiers that resolve against the importing file.
    pub fn is_relative(&self) -> bool {
        self.source.starts_with('.')
    }
}

/// Where a call site was bound during extraction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResolvedDefinition {
    /// File id of the definition, or [`BUILTIN_FILE`].
    pub file: String,
    /// Entity name within that file.
    pub name: String,
}

impl ResolvedDefinition {
    pub fn new(file: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            name: name.into(),
        }
    }

    pub fn builtin(name: impl Into<String>) -> Self {
        Self::new(BUILTIN_FILE, name)
    }

    pub fn is_builtin(&self) -> bool {
        self.file == BUILTIN_FILE
    }

    /// Graph node id of the definition.
    pub fn node_id(&self) -> String {
        format!("{}::{}", self.file, self.name)
    }
}

/// One call expression inside an entity body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSite {
    /// Callee as written, possibly dotted (`obj.method`).
    pub callee_name: String,
    pub kind: CallKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loc: Option<Location>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_definition: Option<ResolvedDefinition>,
}

impl CallSite {
    pub fn new(callee_name: impl Into<String>, kind: CallKind) -> Self {
        Self {
            callee_name: callee_name.into(),
            kind,
            loc: None,
            resolved_definition: None,
        }
    }

    pub fn at_line(mut self, line: usize) -> Self {
        self.loc = Some(Location::new(line, line));
        self
    }

    /// The identifier a dotted callee is resolved by (`obj` for `obj.method`).
    pub fn base_identifier(&self) -> &str {
        self.callee_name
            .split('.')
            .next()
            .unwrap_or(&self.callee_name)
    }

    /// Everything after the base identifier, if the callee is dotted.
    pub fn member_path(&self) -> Option<&str> {
        self.callee_name.split_once('.').map(|(_, rest)| rest)
    }
}

/// A declared function, method, class, or constant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    /// Unique within the file.
    pub id: String,
    pub name: String,
    pub kind: EntityKind,
    /// Display signature (e.g. `function helper(x: number): number`).
    #[serde(default)]
    pub signature: String,
    pub loc: Location,
    #[serde(default)]
    pub is_exported: bool,
    #[serde(default)]
    pub is_async: bool,
    #[serde(default)]
    pub calls: Vec<CallSite>,
}

impl Entity {
    pub fn new(name: impl Into<String>, kind: EntityKind, loc: Location) -> Self {
        let name = name.into();
        Self {
            id: name.clone(),
            name,
            kind,
            signature: String::new(),
            loc,
            is_exported: false,
            is_async: false,
            calls: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = signature.into();
        self
    }

    pub fn exported(mut self, is_exported: bool) -> Self {
        self.is_exported = is_exported;
        self
    }

    pub fn asynchronous(mut self, is_async: bool) -> Self {
        self.is_async = is_async;
        self
    }
}

/// Structured description of one source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileArtifact {
    pub schema_version: String,
    pub file: FileIdentity,
    #[serde(default)]
    pub imports: Vec<ImportSpec>,
    #[serde(default)]
    pub entities: Vec<Entity>,
    /// Calls made outside of any entity body.
    #[serde(default)]
    pub module_calls: Vec<CallSite>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exports: Option<Vec<String>>,
}

impl FileArtifact {
    pub fn new(file: FileIdentity) -> Self {
        Self {
            schema_version: ARTIFACT_SCHEMA_VERSION.to_string(),
            file,
            imports: Vec::new(),
            entities: Vec::new(),
            module_calls: Vec::new(),
            exports: None,
        }
    }

    /// Name used for `entity` in node ids: members are prefixed with the
    /// innermost class whose span contains them (`Parser.parse`).
    pub fn qualified_name(&self, entity: &Entity) -> String {
        if entity.kind == EntityKind::Class {
            return entity.name.clone();
        }
        let owner = self
            .entities
            .iter()
            .filter(|candidate| {
                candidate.kind == EntityKind::Class && candidate.loc.strictly_contains(&entity.loc)
            })
            .min_by_key(|candidate| candidate.loc.line_count());
        match owner {
            Some(class) => format!("{}.{}", class.name, entity.name),
            None => entity.name.clone(),
        }
    }

    /// File-unique id of every entity, in order: the qualified name,
    /// suffixed with the start line when an earlier entity already took it
    /// (overloads, getter/setter pairs).
    pub fn entity_ids(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.entities
            .iter()
            .map(|entity| {
                let qualified = self.qualified_name(entity);
                if seen.insert(qualified.clone()) {
                    qualified
                } else {
                    format!("{qualified}@{}", entity.loc.start_line)
                }
            })
            .collect()
    }

    /// Total number of call sites, module scope included.
    pub fn call_count(&self) -> usize {
        self.module_calls.len() + self.entities.iter().map(|e| e.calls.len()).sum::<usize>()
    }

    /// Iterates over every call site with the entity id of its caller.
    pub fn calls_by_caller(&self) -> impl Iterator<Item = (String, &CallSite)> {
        let module = self
            .module_calls
            .iter()
            .map(|call| (MODULE_SCOPE.to_string(), call));
        let entities = self
            .entities
            .iter()
            .zip(self.entity_ids())
            .flat_map(|(entity, caller)| {
                entity.calls.iter().map(move |call| (caller.clone(), call))
            });
        module.chain(entities)
    }
}
