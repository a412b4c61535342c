//! TypeScript and JavaScript extraction using tree-sitter.
//!
//! One extractor type serves `.ts`, `.tsx` and the JavaScript family; only
//! the grammar differs. The walk is manual rather than query driven so that
//! every call site can be attributed to the entity whose body contains it:
//! calls inside nested callbacks count against the enclosing function, and
//! calls outside any entity land in the file's module scope.

use tracing::debug;
use tree_sitter::Node;

use super::resolver::{self, JS_BUILTINS};
use super::{
    Extractor, Result, assign_entity_ids, child_of_kind, collapse_whitespace, end_line,
    has_token, node_text, start_line, unquote,
};
use crate::artifact::{
    CallKind, CallSite, Entity, EntityKind, FileArtifact, FileIdentity, ImportSpec,
    ImportSpecifier, Location,
};
use crate::parser::{Language, Parser};

/// Extractor for TypeScript, TSX and JavaScript sources.
#[derive(Debug, Clone, Copy)]
pub struct TypeScriptExtractor {
    language: Language,
}

impl TypeScriptExtractor {
    pub fn typescript() -> Self {
        Self {
            language: Language::TypeScript,
        }
    }

    pub fn tsx() -> Self {
        Self {
            language: Language::Tsx,
        }
    }

    pub fn javascript() -> Self {
        Self {
            language: Language::JavaScript,
        }
    }

    pub fn language(&self) -> Language {
        self.language
    }
}

impl Extractor for TypeScriptExtractor {
    fn id(&self) -> &'static str {
        self.language.id()
    }

    fn extensions(&self) -> &'static [&'static str] {
        self.language.extensions()
    }

    fn extract_source(&self, file: FileIdentity, source: &str) -> Result<Option<FileArtifact>> {
        let mut parser = Parser::new();
        let parsed = parser.parse_source(source, self.language)?;
        if parsed.has_errors() {
            debug!(file = %file.id, language = self.language.name(), "Skipping unparseable file");
            return Ok(None);
        }

        let mut walker = Walker::new(source);
        walker.walk_program(parsed.root_node());

        let mut artifact = FileArtifact::new(file);
        walker.finish(&mut artifact);
        resolver::resolve_artifact(&mut artifact, JS_BUILTINS);
        Ok(Some(artifact))
    }
}

/// Accumulates one file's imports, entities and calls during the walk.
struct Walker<'s> {
    source: &'s str,
    imports: Vec<ImportSpec>,
    entities: Vec<Entity>,
    module_calls: Vec<CallSite>,
    exported_names: Vec<String>,
}

impl<'s> Walker<'s> {
    fn new(source: &'s str) -> Self {
        Self {
            source,
            imports: Vec::new(),
            entities: Vec::new(),
            module_calls: Vec::new(),
            exported_names: Vec::new(),
        }
    }

    fn text(&self, node: Node<'_>) -> &'s str {
        node_text(&node, self.source)
    }

    fn walk_program(&mut self, root: Node<'_>) {
        let mut cursor = root.walk();
        for child in root.named_children(&mut cursor) {
            self.walk_statement(child, false);
        }
    }

    fn walk_statement(&mut self, node: Node<'_>, exported: bool) {
        match node.kind() {
            "import_statement" => self.handle_import(node),
            "export_statement" => self.handle_export(node),
            "function_declaration" | "generator_function_declaration" => {
                self.handle_function(node, exported);
            }
            "class_declaration" | "abstract_class_declaration" => {
                self.handle_class(node, None, exported);
            }
            "lexical_declaration" | "variable_declaration" => {
                self.handle_variables(node, exported);
            }
            "expression_statement" => self.handle_expression_statement(node),
            "comment" | "interface_declaration" | "type_alias_declaration"
            | "ambient_declaration" | "function_signature" | "empty_statement" => {}
            _ => self.collect_calls(node, None),
        }
    }

    fn handle_import(&mut self, node: Node<'_>) {
        let require_clause = child_of_kind(&node, "import_require_clause");
        let source_node = node
            .child_by_field_name("source")
            .or_else(|| require_clause.and_then(|clause| clause.child_by_field_name("source")));
        let Some(source_node) = source_node else {
            return;
        };

        let mut import =
            ImportSpec::new(unquote(self.text(source_node))).with_line(start_line(&node));

        if let Some(clause) = require_clause {
            if let Some(local) = child_of_kind(&clause, "identifier") {
                import = import.with_specifier(ImportSpecifier::aliased("*", self.text(local)));
            }
        }

        if let Some(clause) = child_of_kind(&node, "import_clause") {
            let mut cursor = clause.walk();
            for part in clause.named_children(&mut cursor) {
                match part.kind() {
                    "identifier" => {
                        import = import
                            .with_specifier(ImportSpecifier::aliased("default", self.text(part)));
                    }
                    "namespace_import" => {
                        if let Some(local) = child_of_kind(&part, "identifier") {
                            import = import
                                .with_specifier(ImportSpecifier::aliased("*", self.text(local)));
                        }
                    }
                    "named_imports" => {
                        let mut inner = part.walk();
                        for specifier in part.named_children(&mut inner) {
                            if specifier.kind() == "import_specifier" {
                                if let Some(spec) = self.specifier(specifier) {
                                    import = import.with_specifier(spec);
                                }
                            }
                        }
                    }
                    _ => {}
                }
            }
        }

        self.imports.push(import);
    }

    /// `name` / `name as alias` inside import or export braces.
    fn specifier(&self, node: Node<'_>) -> Option<ImportSpecifier> {
        let name = unquote(self.text(node.child_by_field_name("name")?));
        Some(match node.child_by_field_name("alias") {
            Some(alias) => ImportSpecifier::aliased(name, unquote(self.text(alias))),
            None => ImportSpecifier::named(name),
        })
    }

    fn handle_export(&mut self, node: Node<'_>) {
        let clause = child_of_kind(&node, "export_clause");

        if let Some(source_node) = node.child_by_field_name("source") {
            let mut import = ImportSpec::new(unquote(self.text(source_node)))
                .with_line(start_line(&node))
                .as_reexport();
            match clause {
                Some(clause) => {
                    for spec in self.export_specifiers(clause) {
                        self.exported_names
                            .push(spec.local_name().unwrap_or(&spec.name).to_string());
                        import = import.with_specifier(spec);
                    }
                }
                None => {
                    let namespace = child_of_kind(&node, "namespace_export")
                        .and_then(|ns| ns.named_child(0))
                        .map(|name| self.text(name));
                    import = match namespace {
                        Some(alias) => {
                            self.exported_names.push(alias.to_string());
                            import.with_specifier(ImportSpecifier::aliased("*", alias))
                        }
                        None => import.with_specifier(ImportSpecifier::named("*")),
                    };
                }
            }
            self.imports.push(import);
            return;
        }

        let mut cursor = node.walk();
        for decorator in node.children_by_field_name("decorator", &mut cursor) {
            self.collect_calls(decorator, None);
        }

        if let Some(declaration) = node.child_by_field_name("declaration") {
            self.walk_statement(declaration, true);
            return;
        }

        if let Some(clause) = clause {
            for spec in self.export_specifiers(clause) {
                self.exported_names.push(spec.name);
            }
            return;
        }

        if let Some(value) = node.child_by_field_name("value") {
            match value.kind() {
                "identifier" => self.exported_names.push(self.text(value).to_string()),
                "arrow_function" | "function_expression" | "function" => {
                    let kind = if value.kind() == "arrow_function" {
                        EntityKind::Arrow
                    } else {
                        EntityKind::Function
                    };
                    self.handle_callable_value("default", kind, value, "export default", true);
                }
                "class" => self.handle_class(value, Some("default"), true),
                _ => self.collect_calls(value, None),
            }
        }
    }

    fn export_specifiers(&self, clause: Node<'_>) -> Vec<ImportSpecifier> {
        let mut cursor = clause.walk();
        clause
            .named_children(&mut cursor)
            .filter(|child| child.kind() == "export_specifier")
            .filter_map(|child| self.specifier(child))
            .collect()
    }

    fn handle_function(&mut self, node: Node<'_>, exported: bool) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = self.text(name_node);
        let is_async = has_token(&node, "async");
        let signature = format!(
            "{}function {}{}{}",
            if is_async { "async " } else { "" },
            name,
            self.parameters(node),
            self.return_type(node),
        );

        let entity = Entity::new(name, EntityKind::Function, location(&node))
            .with_signature(collapse_whitespace(&signature))
            .exported(exported)
            .asynchronous(is_async);
        let index = self.push_entity(entity);
        if let Some(body) = node.child_by_field_name("body") {
            self.collect_calls(body, Some(index));
        }
    }

    /// Class declarations and class expressions. `fallback_name` names
    /// anonymous class expressions.
    fn handle_class(&mut self, node: Node<'_>, fallback_name: Option<&str>, exported: bool) {
        let name = match node.child_by_field_name("name") {
            Some(name_node) => self.text(name_node).to_string(),
            None => match fallback_name {
                Some(name) => name.to_string(),
                None => return,
            },
        };

        let heritage = child_of_kind(&node, "class_heritage");
        let signature = match heritage {
            Some(heritage) => format!("class {} {}", name, self.text(heritage)),
            None => format!("class {name}"),
        };
        let entity = Entity::new(name, EntityKind::Class, location(&node))
            .with_signature(collapse_whitespace(&signature))
            .exported(exported);
        let class_index = self.push_entity(entity);

        if let Some(heritage) = heritage {
            self.collect_calls(heritage, Some(class_index));
        }
        let mut cursor = node.walk();
        for decorator in node.children_by_field_name("decorator", &mut cursor) {
            self.collect_calls(decorator, Some(class_index));
        }

        let Some(body) = node.child_by_field_name("body") else {
            return;
        };
        let mut cursor = body.walk();
        for member in body.named_children(&mut cursor) {
            match member.kind() {
                "method_definition" => self.handle_method(member),
                "public_field_definition" | "field_definition" => {
                    self.handle_field(member, class_index);
                }
                "class_static_block" | "decorator" => {
                    self.collect_calls(member, Some(class_index));
                }
                _ => {}
            }
        }
    }

    fn handle_method(&mut self, node: Node<'_>) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = self.text(name_node);

        let (kind, accessor) = if name == "constructor" {
            (EntityKind::Constructor, "")
        } else if has_token(&node, "get") {
            (EntityKind::Getter, "get ")
        } else if has_token(&node, "set") {
            (EntityKind::Setter, "set ")
        } else {
            (EntityKind::Method, "")
        };
        let is_async = has_token(&node, "async");
        let is_static = has_token(&node, "static");

        let signature = format!(
            "{}{}{}{}{}{}",
            if is_static { "static " } else { "" },
            if is_async { "async " } else { "" },
            accessor,
            name,
            self.parameters(node),
            self.return_type(node),
        );
        let entity = Entity::new(name, kind, location(&node))
            .with_signature(collapse_whitespace(&signature))
            .exported(!name.starts_with('#'))
            .asynchronous(is_async);
        let index = self.push_entity(entity);
        if let Some(body) = node.child_by_field_name("body") {
            self.collect_calls(body, Some(index));
        }
    }

    /// Class fields: arrow/function initializers become entities of their
    /// own, any other initializer's calls belong to the class.
    fn handle_field(&mut self, node: Node<'_>, class_index: usize) {
        let name_node = node
            .child_by_field_name("name")
            .or_else(|| node.child_by_field_name("property"));
        let value = node.child_by_field_name("value");

        match (name_node, value) {
            (Some(name_node), Some(value))
                if matches!(
                    value.kind(),
                    "arrow_function" | "function_expression" | "function"
                ) =>
            {
                let name = self.text(name_node);
                let kind = if value.kind() == "arrow_function" {
                    EntityKind::Arrow
                } else {
                    EntityKind::Function
                };
                let exported = !name.starts_with('#');
                let index = self.handle_callable_value(name, kind, value, "", exported);
                // Field spans start at the name, which keeps the entity inside the class.
                self.entities[index].loc = location(&node);
            }
            (_, Some(value)) => self.collect_calls(value, Some(class_index)),
            _ => {}
        }
    }

    fn handle_variables(&mut self, node: Node<'_>, exported: bool) {
        let keyword = node
            .child_by_field_name("kind")
            .map(|kind| self.text(kind))
            .unwrap_or("var");

        let mut cursor = node.walk();
        for declarator in node.named_children(&mut cursor) {
            if declarator.kind() != "variable_declarator" {
                continue;
            }
            let Some(name_node) = declarator.child_by_field_name("name") else {
                continue;
            };
            let value = declarator.child_by_field_name("value");

            if let Some(value) = value {
                if self.handle_require(name_node, value) {
                    continue;
                }
            }
            if name_node.kind() != "identifier" {
                if let Some(value) = value {
                    self.collect_calls(value, None);
                }
                continue;
            }

            let name = self.text(name_node);
            match value {
                Some(value) if value.kind() == "arrow_function" => {
                    let prefix = format!("{keyword} {name} =");
                    let index = self.handle_callable_value(
                        name,
                        EntityKind::Arrow,
                        value,
                        &prefix,
                        exported,
                    );
                    self.entities[index].loc = location(&declarator);
                }
                Some(value)
                    if matches!(
                        value.kind(),
                        "function_expression" | "function" | "generator_function"
                    ) =>
                {
                    let index =
                        self.handle_callable_value(name, EntityKind::Function, value, "", exported);
                    self.entities[index].loc = location(&declarator);
                }
                Some(value) if value.kind() == "class" => {
                    self.handle_class(value, Some(name), exported);
                }
                Some(value) if keyword != "const" => self.collect_calls(value, None),
                _ if keyword == "const" => {
                    let type_annotation = declarator
                        .child_by_field_name("type")
                        .map(|ty| self.text(ty))
                        .unwrap_or("");
                    let signature = format!("const {name}{type_annotation}");
                    let entity = Entity::new(name, EntityKind::Const, location(&declarator))
                        .with_signature(collapse_whitespace(&signature))
                        .exported(exported);
                    let index = self.push_entity(entity);
                    if let Some(value) = value {
                        self.collect_calls(value, Some(index));
                    }
                }
                _ => {}
            }
        }
    }

    /// Entity for a function-valued expression bound to `name`.
    fn handle_callable_value(
        &mut self,
        name: &str,
        kind: EntityKind,
        value: Node<'_>,
        prefix: &str,
        exported: bool,
    ) -> usize {
        let is_async = has_token(&value, "async");
        let params = match value.child_by_field_name("parameter") {
            Some(single) => format!("({})", self.text(single)),
            None => self.parameters(value).to_string(),
        };
        let body = match kind {
            EntityKind::Arrow => format!("{}{} =>", params, self.return_type(value)),
            _ => format!("function {}{}{}", name, params, self.return_type(value)),
        };
        let signature = [prefix, if is_async { "async" } else { "" }, body.as_str()]
            .iter()
            .filter(|part| !part.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join(" ");

        let entity = Entity::new(name, kind, location(&value))
            .with_signature(collapse_whitespace(&signature))
            .exported(exported)
            .asynchronous(is_async);
        let index = self.push_entity(entity);
        if let Some(body) = value.child_by_field_name("body") {
            self.collect_calls(body, Some(index));
        }
        index
    }

    /// `const x = require('y')` and `const { a, b: c } = require('y')`.
    fn handle_require(&mut self, name_node: Node<'_>, value: Node<'_>) -> bool {
        let Some(source) = self.require_source(value) else {
            return false;
        };
        let mut import = ImportSpec::new(source).with_line(start_line(&value));

        match name_node.kind() {
            "identifier" => {
                import = import.with_specifier(ImportSpecifier::aliased("*", self.text(name_node)));
            }
            "object_pattern" => {
                let mut cursor = name_node.walk();
                for property in name_node.named_children(&mut cursor) {
                    match property.kind() {
                        "shorthand_property_identifier_pattern" => {
                            let name = self.text(property);
                            import = import.with_specifier(ImportSpecifier::named(name));
                        }
                        "pair_pattern" => {
                            let key = property.child_by_field_name("key").map(|k| self.text(k));
                            let alias = property.child_by_field_name("value").map(|v| self.text(v));
                            if let (Some(key), Some(alias)) = (key, alias) {
                                import =
                                    import.with_specifier(ImportSpecifier::aliased(key, alias));
                            }
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }

        self.imports.push(import);
        true
    }

    /// Module string of a `require("...")` call.
    fn require_source(&self, node: Node<'_>) -> Option<String> {
        if node.kind() != "call_expression" {
            return None;
        }
        let function = node.child_by_field_name("function")?;
        if function.kind() != "identifier" || self.text(function) != "require" {
            return None;
        }
        let arguments = node.child_by_field_name("arguments")?;
        let first = arguments.named_child(0)?;
        (first.kind() == "string").then(|| unquote(self.text(first)))
    }

    fn handle_expression_statement(&mut self, node: Node<'_>) {
        let Some(expression) = node.named_child(0) else {
            return;
        };

        if let Some(source) = self.require_source(expression) {
            self.imports
                .push(ImportSpec::new(source).with_line(start_line(&node)));
            return;
        }

        if expression.kind() == "assignment_expression" {
            self.handle_commonjs_export(expression);
        }
        self.collect_calls(node, None);
    }

    /// `module.exports = {...}` and `exports.name = ...` mark names exported.
    fn handle_commonjs_export(&mut self, assignment: Node<'_>) {
        let (Some(left), Some(right)) = (
            assignment.child_by_field_name("left"),
            assignment.child_by_field_name("right"),
        ) else {
            return;
        };
        let target = self.text(left);

        if let Some(name) = target.strip_prefix("exports.") {
            self.exported_names.push(name.to_string());
        } else if let Some(name) = target.strip_prefix("module.exports.") {
            self.exported_names.push(name.to_string());
        } else if target == "module.exports" {
            match right.kind() {
                "identifier" => self.exported_names.push(self.text(right).to_string()),
                "object" => {
                    let mut cursor = right.walk();
                    for property in right.named_children(&mut cursor) {
                        let name = match property.kind() {
                            "shorthand_property_identifier" => Some(self.text(property)),
                            "pair" => property.child_by_field_name("key").map(|k| self.text(k)),
                            _ => None,
                        };
                        if let Some(name) = name {
                            self.exported_names.push(name.to_string());
                        }
                    }
                }
                _ => {}
            }
        }
    }

    /// Record every call and `new` expression under `node`.
    fn collect_calls(&mut self, node: Node<'_>, owner: Option<usize>) {
        match node.kind() {
            "call_expression" => {
                if let Some(function) = node.child_by_field_name("function") {
                    if let Some((name, kind)) = self.callee(function) {
                        self.push_call(owner, CallSite::new(name, kind).at_line(start_line(&node)));
                    }
                }
            }
            "new_expression" => {
                if let Some(constructor) = node.child_by_field_name("constructor") {
                    if let Some(name) = self.member_path(constructor) {
                        self.push_call(
                            owner,
                            CallSite::new(name, CallKind::Constructor).at_line(start_line(&node)),
                        );
                    }
                }
            }
            _ => {}
        }

        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            self.collect_calls(child, owner);
        }
    }

    fn callee(&self, function: Node<'_>) -> Option<(String, CallKind)> {
        match function.kind() {
            "identifier" | "super" => Some((self.text(function).to_string(), CallKind::Function)),
            "member_expression" => {
                let name = self.member_path(function).or_else(|| {
                    function
                        .child_by_field_name("property")
                        .map(|property| self.text(property).to_string())
                })?;
                Some((name, CallKind::Method))
            }
            _ => None,
        }
    }

    /// Dotted path of an identifier/member chain (`a.b.c`, `this.x`).
    fn member_path(&self, node: Node<'_>) -> Option<String> {
        match node.kind() {
            "identifier" | "this" | "super" | "property_identifier"
            | "private_property_identifier" | "type_identifier" => {
                Some(self.text(node).to_string())
            }
            "member_expression" => {
                let object = self.member_path(node.child_by_field_name("object")?)?;
                let property = self.text(node.child_by_field_name("property")?);
                Some(format!("{object}.{property}"))
            }
            "call_expression" => self.member_path(node.child_by_field_name("function")?),
            "non_null_expression" | "parenthesized_expression" => {
                self.member_path(node.named_child(0)?)
            }
            _ => None,
        }
    }

    fn parameters(&self, node: Node<'_>) -> &'s str {
        node.child_by_field_name("parameters")
            .map(|params| self.text(params))
            .unwrap_or("()")
    }

    fn return_type(&self, node: Node<'_>) -> &'s str {
        node.child_by_field_name("return_type")
            .map(|ty| self.text(ty))
            .unwrap_or("")
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
            imports,
            mut entities,
            module_calls,
            exported_names,
            ..
        } = self;

        for entity in entities.iter_mut() {
            if !entity.kind.is_member() && exported_names.iter().any(|n| n == &entity.name) {
                entity.is_exported = true;
            }
        }

        let mut exports: Vec<String> = Vec::new();
        let top_level_exports = entities
            .iter()
            .filter(|entity| entity.is_exported && !entity.kind.is_member())
            .map(|entity| entity.name.clone());
        for name in top_level_exports.chain(exported_names) {
            if !exports.contains(&name) {
                exports.push(name);
            }
        }

        artifact.imports = imports;
        artifact.entities = entities;
        artifact.module_calls = module_calls;
        artifact.exports = Some(exports);
        assign_entity_ids(artifact);
    }
}

fn location(node: &Node<'_>) -> Location {
    Location::new(start_line(node), end_line(node))
}
