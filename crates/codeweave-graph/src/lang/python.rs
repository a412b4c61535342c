//! Python-specific extraction using tree-sitter.
//!
//! Imports are located with a compiled query; entities and calls come from
//! a walk of the module so calls can be attributed to their enclosing
//! definition.

use std::sync::OnceLock;

use streaming_iterator::StreamingIterator;
use tracing::debug;
use tree_sitter::{Node, Query, Tree};

use super::resolver::{self, PYTHON_BUILTINS};
use super::{
    Extractor, Result, assign_entity_ids, child_of_kind, collapse_whitespace, end_line,
    has_token, node_text, start_line, unquote,
};
use crate::artifact::{
    CallKind, CallSite, Entity, EntityKind, FileArtifact, FileIdentity, ImportSpec,
    ImportSpecifier, Location,
};
use crate::parser::{Language, ParseError, Parser};

static IMPORTS_QUERY: OnceLock<std::result::Result<Query, String>> = OnceLock::new();

fn imports_query() -> std::result::Result<&'static Query, ParseError> {
    IMPORTS_QUERY
        .get_or_init(|| {
            Query::new(
                &Language::Python.tree_sitter_language(),
                r#"
                (import_statement) @import
                (import_from_statement) @from_import
                "#,
            )
            .map_err(|e| e.to_string())
        })
        .as_ref()
        .map_err(|e| ParseError::QueryError(e.clone()))
}

/// Python-specific extractor.
#[derive(Debug, Clone, Copy, Default)]
pub struct PythonExtractor;

impl PythonExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Extract import statements anywhere in the module.
    pub fn extract_imports(tree: &Tree, source: &str) -> Result<Vec<ImportSpec>> {
        let query = imports_query()?;
        let mut imports = Vec::new();

        let mut cursor = tree_sitter::QueryCursor::new();
        let mut matches = cursor.matches(query, tree.root_node(), source.as_bytes());

        while let Some(match_) = matches.next() {
            for capture in match_.captures {
                let node = capture.node;
                match query.capture_names()[capture.index as usize] {
                    "import" => imports.extend(Self::plain_import(node, source)),
                    "from_import" => imports.extend(Self::from_import(node, source)),
                    _ => {}
                }
            }
        }

        Ok(imports)
    }

    /// `import a.b` and `import a as b`: one whole-module binding per name.
    fn plain_import(node: Node<'_>, source: &str) -> Vec<ImportSpec> {
        let line = start_line(&node);
        let mut cursor = node.walk();
        node.children_by_field_name("name", &mut cursor)
            .filter_map(|name| match name.kind() {
                "dotted_name" => {
                    let module = node_text(&name, source);
                    let local = module.split('.').next().unwrap_or(module);
                    Some(
                        ImportSpec::new(module)
                            .with_specifier(ImportSpecifier::aliased("*", local))
                            .with_line(line),
                    )
                }
                "aliased_import" => {
                    let module = node_text(&name.child_by_field_name("name")?, source);
                    let alias = node_text(&name.child_by_field_name("alias")?, source);
                    Some(
                        ImportSpec::new(module)
                            .with_specifier(ImportSpecifier::aliased("*", alias))
                            .with_line(line),
                    )
                }
                _ => None,
            })
            .collect()
    }

    /// `from x import y as z`, `from . import y` and `from x import *`.
    ///
    /// Relative modules get a `resolved_path`: `.utils` maps to
    /// `./utils.py`, `..helpers` to `../helpers.py`. A bare `from . import
    /// name` treats each name as a sibling module.
    fn from_import(node: Node<'_>, source: &str) -> Vec<ImportSpec> {
        let line = start_line(&node);
        let Some(module_node) = node.child_by_field_name("module_name") else {
            return Vec::new();
        };
        let module = node_text(&module_node, source);

        let mut specifiers = Vec::new();
        let mut cursor = node.walk();
        for name in node.children_by_field_name("name", &mut cursor) {
            match name.kind() {
                "dotted_name" => {
                    specifiers.push(ImportSpecifier::named(node_text(&name, source)));
                }
                "aliased_import" => {
                    let imported = name.child_by_field_name("name");
                    let alias = name.child_by_field_name("alias");
                    if let (Some(imported), Some(alias)) = (imported, alias) {
                        specifiers.push(ImportSpecifier::aliased(
                            node_text(&imported, source),
                            node_text(&alias, source),
                        ));
                    }
                }
                _ => {}
            }
        }
        if child_of_kind(&node, "wildcard_import").is_some() {
            specifiers.push(ImportSpecifier::named("*"));
        }

        if module_node.kind() != "relative_import" {
            let mut import = ImportSpec::new(module).with_line(line);
            import.specifiers = specifiers;
            return vec![import];
        }

        let dots = module.chars().take_while(|c| *c == '.').count();
        let prefix = if dots <= 1 {
            "./".to_string()
        } else {
            "../".repeat(dots - 1)
        };
        let rest = module[dots..].replace('.', "/");

        if !rest.is_empty() {
            let mut import = ImportSpec::new(module)
                .with_resolved_path(format!("{prefix}{rest}.py"))
                .with_line(line);
            import.specifiers = specifiers;
            return vec![import];
        }

        specifiers
            .into_iter()
            .filter(|spec| spec.name != "*")
            .map(|spec| {
                let local = spec.local_name().unwrap_or(&spec.name).to_string();
                ImportSpec::new(module)
                    .with_resolved_path(format!("{prefix}{}.py", spec.name.replace('.', "/")))
                    .with_specifier(ImportSpecifier::aliased("*", local))
                    .with_line(line)
            })
            .collect()
    }

    /// Public by naming convention: no leading underscore, dunders excepted.
    fn is_public_name(name: &str) -> bool {
        !name.starts_with('_') || (name.starts_with("__") && name.ends_with("__"))
    }

    fn is_constant_name(name: &str) -> bool {
        name.chars().any(|c| c.is_ascii_uppercase())
            && name
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
    }
}

impl Extractor for PythonExtractor {
    fn id(&self) -> &'static str {
        Language::Python.id()
    }

    fn extensions(&self) -> &'static [&'static str] {
        Language::Python.extensions()
    }

    fn extract_source(&self, file: FileIdentity, source: &str) -> Result<Option<FileArtifact>> {
        let mut parser = Parser::new();
        let parsed = parser.parse_source(source, Language::Python)?;
        if parsed.has_errors() {
            debug!(file = %file.id, "Skipping unparseable Python file");
            return Ok(None);
        }

        let imports = Self::extract_imports(&parsed.tree, source)?;

        let mut walker = Walker::new(source);
        walker.walk_module(parsed.root_node());

        let mut artifact = FileArtifact::new(file);
        artifact.imports = imports;
        walker.finish(&mut artifact);
        resolver::resolve_artifact(&mut artifact, PYTHON_BUILTINS);
        Ok(Some(artifact))
    }
}

struct Walker<'s> {
    source: &'s str,
    entities: Vec<Entity>,
    module_calls: Vec<CallSite>,
    dunder_all: Option<Vec<String>>,
}

impl<'s> Walker<'s> {
    fn new(source: &'s str) -> Self {
        Self {
            source,
            entities: Vec::new(),
            module_calls: Vec::new(),
            dunder_all: None,
        }
    }

    fn text(&self, node: Node<'_>) -> &'s str {
        node_text(&node, self.source)
    }

    fn walk_module(&mut self, root: Node<'_>) {
        let mut cursor = root.walk();
        for child in root.named_children(&mut cursor) {
            match child.kind() {
                "function_definition" => self.handle_function(child, child, false),
                "class_definition" => self.handle_class(child, child),
                "decorated_definition" => self.handle_decorated(child, false),
                "expression_statement" => self.handle_module_assignment(child),
                "import_statement" | "import_from_statement" | "future_import_statement"
                | "comment" => {}
                _ => self.collect_calls(child, None),
            }
        }
    }

    fn handle_decorated(&mut self, node: Node<'_>, in_class: bool) {
        let Some(definition) = node.child_by_field_name("definition") else {
            return;
        };
        match definition.kind() {
            "function_definition" => self.handle_function(definition, node, in_class),
            "class_definition" => self.handle_class(definition, node),
            _ => {}
        }
    }

    /// `span` is the decorated wrapper when present, so decorator calls and
    /// line ranges include the decorators.
    fn handle_function(&mut self, node: Node<'_>, span: Node<'_>, in_class: bool) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = self.text(name_node);
        let decorators = self.decorators(span);

        let kind = if !in_class {
            EntityKind::Function
        } else if name == "__init__" {
            EntityKind::Constructor
        } else if decorators
            .iter()
            .any(|d| *d == "property" || d.ends_with(".getter") || d.ends_with("cached_property"))
        {
            EntityKind::Getter
        } else if decorators.iter().any(|d| d.ends_with(".setter")) {
            EntityKind::Setter
        } else {
            EntityKind::Method
        };

        let is_async = has_token(&node, "async");
        let params = node
            .child_by_field_name("parameters")
            .map(|p| self.text(p))
            .unwrap_or("()");
        let signature = match node.child_by_field_name("return_type") {
            Some(ret) => format!(
                "{}def {}{} -> {}",
                if is_async { "async " } else { "" },
                name,
                params,
                self.text(ret)
            ),
            None => format!("{}def {}{}", if is_async { "async " } else { "" }, name, params),
        };

        let entity = Entity::new(name, kind, location(&span))
            .with_signature(collapse_whitespace(&signature))
            .exported(PythonExtractor::is_public_name(name))
            .asynchronous(is_async);
        let index = self.push_entity(entity);

        if span.id() != node.id() {
            let mut cursor = span.walk();
            for decorator in span.named_children(&mut cursor) {
                if decorator.kind() == "decorator" {
                    self.collect_calls(decorator, Some(index));
                }
            }
        }
        if let Some(params) = node.child_by_field_name("parameters") {
            self.collect_calls(params, Some(index));
        }
        if let Some(body) = node.child_by_field_name("body") {
            self.collect_calls(body, Some(index));
        }
    }

    fn handle_class(&mut self, node: Node<'_>, span: Node<'_>) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = self.text(name_node);
        let signature = match node.child_by_field_name("superclasses") {
            Some(bases) => format!("class {}{}", name, self.text(bases)),
            None => format!("class {name}"),
        };

        let entity = Entity::new(name, EntityKind::Class, location(&span))
            .with_signature(collapse_whitespace(&signature))
            .exported(PythonExtractor::is_public_name(name));
        let class_index = self.push_entity(entity);

        if span.id() != node.id() {
            let mut cursor = span.walk();
            for decorator in span.named_children(&mut cursor) {
                if decorator.kind() == "decorator" {
                    self.collect_calls(decorator, Some(class_index));
                }
            }
        }
        if let Some(bases) = node.child_by_field_name("superclasses") {
            self.collect_calls(bases, Some(class_index));
        }

        let Some(body) = node.child_by_field_name("body") else {
            return;
        };
        let mut cursor = body.walk();
        for statement in body.named_children(&mut cursor) {
            match statement.kind() {
                "function_definition" => self.handle_function(statement, statement, true),
                "decorated_definition" => self.handle_decorated(statement, true),
                "class_definition" => self.handle_class(statement, statement),
                _ => self.collect_calls(statement, Some(class_index)),
            }
        }
    }

    /// Top-level assignments: `__all__`, UPPER_CASE constants and lambdas
    /// become entities; anything else only contributes module calls.
    fn handle_module_assignment(&mut self, statement: Node<'_>) {
        let assignment = statement
            .named_child(0)
            .filter(|expr| expr.kind() == "assignment");
        let Some(assignment) = assignment else {
            self.collect_calls(statement, None);
            return;
        };
        let left = assignment
            .child_by_field_name("left")
            .filter(|left| left.kind() == "identifier");
        let right = assignment.child_by_field_name("right");
        let (Some(left), Some(right)) = (left, right) else {
            self.collect_calls(statement, None);
            return;
        };

        let name = self.text(left);
        if name == "__all__" {
            let mut names = Vec::new();
            let mut cursor = right.walk();
            for item in right.named_children(&mut cursor) {
                if item.kind() == "string" {
                    names.push(unquote(self.text(item)));
                }
            }
            self.dunder_all = Some(names);
            return;
        }

        if right.kind() == "lambda" {
            let params = right
                .child_by_field_name("parameters")
                .map(|p| self.text(p))
                .unwrap_or("");
            let signature = format!("{name} = lambda {params}");
            let entity = Entity::new(name, EntityKind::Arrow, location(&statement))
                .with_signature(collapse_whitespace(signature.trim_end()))
                .exported(PythonExtractor::is_public_name(name));
            let index = self.push_entity(entity);
            self.collect_calls(right, Some(index));
            return;
        }

        if PythonExtractor::is_constant_name(name) {
            let signature = match assignment.child_by_field_name("type") {
                Some(ty) => format!("{}: {}", name, self.text(ty)),
                None => name.to_string(),
            };
            let entity = Entity::new(name, EntityKind::Const, location(&statement))
                .with_signature(signature)
                .exported(PythonExtractor::is_public_name(name));
            let index = self.push_entity(entity);
            self.collect_calls(right, Some(index));
            return;
        }

        self.collect_calls(statement, None);
    }

    /// Decorator names without the `@` or call arguments.
    fn decorators(&self, span: Node<'_>) -> Vec<&'s str> {
        if span.kind() != "decorated_definition" {
            return Vec::new();
        }
        let mut cursor = span.walk();
        span.named_children(&mut cursor)
            .filter(|child| child.kind() == "decorator")
            .filter_map(|decorator| decorator.named_child(0))
            .map(|expr| match expr.kind() {
                "call" => expr
                    .child_by_field_name("function")
                    .map(|f| self.text(f))
                    .unwrap_or(""),
                _ => self.text(expr),
            })
            .collect()
    }

    fn collect_calls(&mut self, node: Node<'_>, owner: Option<usize>) {
        if node.kind() == "call" {
            if let Some(function) = node.child_by_field_name("function") {
                let callee = match function.kind() {
                    "identifier" => Some((self.text(function).to_string(), CallKind::Function)),
                    "attribute" => self
                        .attribute_path(function)
                        .or_else(|| {
                            function
                                .child_by_field_name("attribute")
                                .map(|attr| self.text(attr).to_string())
                        })
                        .map(|name| (name, CallKind::Method)),
                    _ => None,
                };
                if let Some((name, kind)) = callee {
                    self.push_call(owner, CallSite::new(name, kind).at_line(start_line(&node)));
                }
            }
        }

        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            self.collect_calls(child, owner);
        }
    }

    /// Dotted path of an attribute chain; `super().x` renders as `super.x`.
    fn attribute_path(&self, node: Node<'_>) -> Option<String> {
        match node.kind() {
            "identifier" => Some(self.text(node).to_string()),
            "attribute" => {
                let object = self.attribute_path(node.child_by_field_name("object")?)?;
                let attribute = self.text(node.child_by_field_name("attribute")?);
                Some(format!("{object}.{attribute}"))
            }
            "call" => self.attribute_path(node.child_by_field_name("function")?),
            "parenthesized_expression" => self.attribute_path(node.named_child(0)?),
            _ => None,
        }
    }

    fn push_entity(&mut self, entity: Entity) -> usize {
        self.entities.push(entity);
        self.entities.len() - 1
    }

    fn push_call(&mut self, owner: Option<usize>, call: CallSite) {
        match owner.and_then(|index| self.entities.get_mut(index)) {
            Some(entity) => entity.calls.push(call),
            None => self.module_calls.push(call),
        }
    }

    fn finish(self, artifact: &mut FileArtifact) {
        let Walker {
            mut entities,
            module_calls,
            dunder_all,
            ..
        } = self;

        let exports = match dunder_all {
            Some(names) => {
                for entity in entities.iter_mut().filter(|e| !e.kind.is_member()) {
                    entity.is_exported = names.contains(&entity.name);
                }
                names
            }
            None => entities
                .iter()
                .filter(|e| e.is_exported && !e.kind.is_member())
                .map(|e| e.name.clone())
                .collect(),
        };

        artifact.entities = entities;
        artifact.module_calls = module_calls;
        artifact.exports = Some(exports);
        assign_entity_ids(artifact);
    }
}

fn location(node: &Node<'_>) -> Location {
    Location::new(start_line(node), end_line(node))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ResolvedDefinition;

    const SAMPLE: &str = r#"
import os
import json as j
from pathlib import Path
from typing import List, Optional
from collections import defaultdict, Counter as C
from . import utils
from ..helpers import format_string

MAX_SIZE = 100


def greet(name: str) -> str:
    """Return a greeting."""
    return format_string("Hello, {}", name)


async def fetch(url):
    data = await utils.download(url)
    return j.loads(data)


class DataProcessor(Base):
    def __init__(self, items):
        super().__init__()
        self.items = list(items)

    @staticmethod
    def validate(item):
        return isinstance(item, str)

    @classmethod
    def create(cls):
        return cls([])

    @property
    def size(self):
        return len(self.items)

    @size.setter
    def size(self, value):
        self._resize(value)

    def _resize(self, value):
        self.validate(value)


def main():
    processor = DataProcessor.create()
    print(greet("world"))


if __name__ == '__main__':
    main()
"#;

    fn extract(id: &str, source: &str) -> FileArtifact {
        PythonExtractor::new()
            .extract_source(
                FileIdentity {
                    id: id.to_string(),
                    path: format!("/ws/{id}"),
                    language: "python".to_string(),
                },
                source,
            )
            .unwrap()
            .expect("source should parse")
    }

    fn entity<'a>(artifact: &'a FileArtifact, id: &str) -> &'a Entity {
        artifact
            .entities
            .iter()
            .find(|e| e.id == id)
            .unwrap_or_else(|| panic!("no entity with id {id}"))
    }

    #[test]
    fn test_extract_imports() {
        let artifact = extract("pkg/sample.py", SAMPLE);
        let imports = &artifact.imports;
        assert_eq!(imports.len(), 7);

        assert_eq!(imports[0].source, "os");
        assert_eq!(imports[0].specifiers, vec![ImportSpecifier::aliased("*", "os")]);
        assert_eq!(imports[1].specifiers, vec![ImportSpecifier::aliased("*", "j")]);
        assert_eq!(imports[2].specifiers, vec![ImportSpecifier::named("Path")]);
        assert_eq!(
            imports[4].specifiers,
            vec![
                ImportSpecifier::named("defaultdict"),
                ImportSpecifier::aliased("Counter", "C")
            ]
        );

        assert_eq!(imports[5].source, ".");
        assert_eq!(imports[5].resolved_path.as_deref(), Some("./utils.py"));
        assert_eq!(
            imports[5].specifiers,
            vec![ImportSpecifier::aliased("*", "utils")]
        );

        assert_eq!(imports[6].source, "..helpers");
        assert_eq!(imports[6].resolved_path.as_deref(), Some("../helpers.py"));
        assert!(imports[0].resolved_path.is_none());
    }

    #[test]
    fn test_extract_entities() {
        let artifact = extract("pkg/sample.py", SAMPLE);

        let max = entity(&artifact, "MAX_SIZE");
        assert_eq!(max.kind, EntityKind::Const);

        let greet = entity(&artifact, "greet");
        assert_eq!(greet.kind, EntityKind::Function);
        assert_eq!(greet.signature, "def greet(name: str) -> str");
        assert!(greet.is_exported);

        let fetch = entity(&artifact, "fetch");
        assert!(fetch.is_async);
        assert_eq!(fetch.signature, "async def fetch(url)");

        let class = entity(&artifact, "DataProcessor");
        assert_eq!(class.kind, EntityKind::Class);
        assert_eq!(class.signature, "class DataProcessor(Base)");

        assert_eq!(
            entity(&artifact, "DataProcessor.__init__").kind,
            EntityKind::Constructor
        );
        assert_eq!(
            entity(&artifact, "DataProcessor.validate").kind,
            EntityKind::Method
        );
        assert_eq!(
            entity(&artifact, "DataProcessor.size").kind,
            EntityKind::Getter
        );
        let setter = artifact
            .entities
            .iter()
            .find(|e| e.kind == EntityKind::Setter)
            .unwrap();
        assert!(setter.id.starts_with("DataProcessor.size@"));

        let resize = entity(&artifact, "DataProcessor._resize");
        assert!(!resize.is_exported);
    }

    #[test]
    fn test_call_resolution() {
        let artifact = extract("pkg/sample.py", SAMPLE);

        let greet = entity(&artifact, "greet");
        assert_eq!(
            greet.calls[0].resolved_definition,
            Some(ResolvedDefinition::new("helpers.py", "format_string"))
        );

        let fetch = entity(&artifact, "fetch");
        assert_eq!(fetch.calls[0].callee_name, "utils.download");
        assert_eq!(
            fetch.calls[0].resolved_definition,
            Some(ResolvedDefinition::new("pkg/utils.py", "download"))
        );
        assert_eq!(fetch.calls[1].callee_name, "j.loads");
        assert!(fetch.calls[1].resolved_definition.is_none());

        let init = entity(&artifact, "DataProcessor.__init__");
        assert_eq!(init.calls[0].callee_name, "super.__init__");
        assert_eq!(init.calls[1].callee_name, "super");
        assert_eq!(init.calls[2].callee_name, "list");
        assert!(init.calls.iter().all(|c| c
            .resolved_definition
            .as_ref()
            .is_some_and(|d| d.is_builtin())));

        let resize = entity(&artifact, "DataProcessor._resize");
        assert_eq!(
            resize.calls[0].resolved_definition,
            Some(ResolvedDefinition::new("pkg/sample.py", "DataProcessor.validate"))
        );

        let main = entity(&artifact, "main");
        assert_eq!(main.calls[0].callee_name, "DataProcessor.create");
        assert_eq!(
            main.calls[0].resolved_definition,
            Some(ResolvedDefinition::new("pkg/sample.py", "DataProcessor.create"))
        );

        assert_eq!(artifact.module_calls.len(), 1);
        assert_eq!(
            artifact.module_calls[0].resolved_definition,
            Some(ResolvedDefinition::new("pkg/sample.py", "main"))
        );
    }

    #[test]
    fn test_dunder_all_controls_exports() {
        let source =
            "__all__ = ['public_api']\n\ndef public_api():\n    pass\n\ndef other():\n    pass\n";
        let artifact = extract("api.py", source);
        assert_eq!(artifact.exports, Some(vec!["public_api".to_string()]));
        assert!(entity(&artifact, "public_api").is_exported);
        assert!(!entity(&artifact, "other").is_exported);
    }

    #[test]
    fn test_lambda_and_wildcard() {
        let source = "from os.path import *\nsquare = lambda x: x * x\n";
        let artifact = extract("m.py", source);
        assert_eq!(
            artifact.imports[0].specifiers,
            vec![ImportSpecifier::named("*")]
        );
        let square = entity(&artifact, "square");
        assert_eq!(square.kind, EntityKind::Arrow);
        assert_eq!(square.signature, "square = lambda x");
    }

    #[test]
    fn test_unparseable_returns_none() {
        let result = PythonExtractor::new()
            .extract_source(
                FileIdentity {
                    id: "bad.py".to_string(),
                    path: "/ws/bad.py".to_string(),
                    language: "python".to_string(),
                },
                "def broken(:\n    pass\n",
            )
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_naming_conventions() {
        assert!(PythonExtractor::is_public_name("public"));
        assert!(!PythonExtractor::is_public_name("_private"));
        assert!(!PythonExtractor::is_public_name("__mangled"));
        assert!(PythonExtractor::is_public_name("__dunder__"));
        assert!(PythonExtractor::is_constant_name("MAX_SIZE"));
        assert!(PythonExtractor::is_constant_name("V2"));
        assert!(!PythonExtractor::is_constant_name("value"));
        assert!(!PythonExtractor::is_constant_name("_"));
    }
}
