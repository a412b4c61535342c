//! Call-site resolution shared by every extractor.
//!
//! A [`Resolver`] is built per file from its artifact and thrown away after
//! the file's call sites are bound. It holds two tables:
//!
//! - local definitions: qualified entity name to entity id
//! - import bindings: local name to the imported name and its module
//!
//! A callee is looked up in that order, then against the language's builtin
//! set. Anything left over is unresolved. Dotted callees resolve through
//! their base identifier; there is no type inference.

use std::collections::HashMap;

use tracing::trace;

use crate::artifact::{CallSite, Entity, EntityKind, FileArtifact, ResolvedDefinition};
use crate::modules;

/// Receivers that refer to the enclosing class instance.
const SELF_RECEIVERS: &[&str] = &["this", "self", "cls"];

/// Globals and builtins of JavaScript runtimes (browser and Node).
pub const JS_BUILTINS: &[&str] = &[
    "Array",
    "ArrayBuffer",
    "BigInt",
    "Boolean",
    "Buffer",
    "Date",
    "Error",
    "Intl",
    "JSON",
    "Map",
    "Math",
    "Number",
    "Object",
    "Promise",
    "Proxy",
    "Reflect",
    "RegExp",
    "Set",
    "String",
    "Symbol",
    "TypeError",
    "URL",
    "URLSearchParams",
    "WeakMap",
    "WeakSet",
    "alert",
    "atob",
    "btoa",
    "clearInterval",
    "clearTimeout",
    "console",
    "decodeURIComponent",
    "document",
    "encodeURIComponent",
    "fetch",
    "globalThis",
    "isFinite",
    "isNaN",
    "module",
    "parseFloat",
    "parseInt",
    "process",
    "queueMicrotask",
    "require",
    "setImmediate",
    "setInterval",
    "setTimeout",
    "structuredClone",
    "super",
    "window",
];

/// Python builtin functions and types.
pub const PYTHON_BUILTINS: &[&str] = &[
    "abs",
    "all",
    "any",
    "bool",
    "bytes",
    "callable",
    "classmethod",
    "delattr",
    "dict",
    "dir",
    "divmod",
    "enumerate",
    "Exception",
    "filter",
    "float",
    "format",
    "frozenset",
    "getattr",
    "hasattr",
    "hash",
    "id",
    "input",
    "int",
    "isinstance",
    "issubclass",
    "iter",
    "KeyError",
    "len",
    "list",
    "map",
    "max",
    "min",
    "next",
    "object",
    "open",
    "print",
    "property",
    "range",
    "repr",
    "reversed",
    "round",
    "RuntimeError",
    "set",
    "setattr",
    "sorted",
    "staticmethod",
    "str",
    "sum",
    "super",
    "tuple",
    "type",
    "TypeError",
    "ValueError",
    "vars",
    "zip",
];

/// Outcome of resolving one call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Defined in the same file
    Local(ResolvedDefinition),
    /// Defined in an imported workspace file
    Imported(ResolvedDefinition),
    /// A language builtin
    Builtin(ResolvedDefinition),
    /// No definition found
    Unresolved,
}

impl Resolution {
    pub fn definition(&self) -> Option<&ResolvedDefinition> {
        match self {
            Resolution::Local(def) | Resolution::Imported(def) | Resolution::Builtin(def) => {
                Some(def)
            }
            Resolution::Unresolved => None,
        }
    }

    pub fn into_definition(self) -> Option<ResolvedDefinition> {
        match self {
            Resolution::Local(def) | Resolution::Imported(def) | Resolution::Builtin(def) => {
                Some(def)
            }
            Resolution::Unresolved => None,
        }
    }
}

/// A name bound by an import statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportBinding {
    /// Name in the exporting module (`*` for namespaces, `default`).
    pub imported_name: String,
    /// Module specifier as written.
    pub module_path: String,
    /// Workspace file id the module maps to, if any.
    pub target: Option<String>,
}

/// Counts of each resolution outcome for one file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveStats {
    pub local: usize,
    pub imported: usize,
    pub builtin: usize,
    pub unresolved: usize,
}

impl ResolveStats {
    fn record(&mut self, resolution: &Resolution) {
        match resolution {
            Resolution::Local(_) => self.local += 1,
            Resolution::Imported(_) => self.imported += 1,
            Resolution::Builtin(_) => self.builtin += 1,
            Resolution::Unresolved => self.unresolved += 1,
        }
    }
}

/// Per-file symbol tables.
#[derive(Debug, Clone)]
pub struct Resolver {
    file_id: String,
    locals: HashMap<String, String>,
    bindings: HashMap<String, ImportBinding>,
    builtins: &'static [&'static str],
}

impl Resolver {
    /// Build the local and import tables of `artifact`.
    pub fn new(artifact: &FileArtifact, builtins: &'static [&'static str]) -> Self {
        let file_id = artifact.file.id.clone();
        let root = modules::workspace_root_of(&artifact.file.path, &file_id);

        let mut locals = HashMap::new();
        for entity in &artifact.entities {
            locals
                .entry(artifact.qualified_name(entity))
                .or_insert_with(|| entity.id.clone());
        }

        let mut bindings = HashMap::new();
        for import in artifact.imports.iter().filter(|import| !import.reexport) {
            let target = modules::resolve_import(&file_id, import, root.as_deref());
            for specifier in &import.specifiers {
                let Some(local) = specifier.local_name() else {
                    continue;
                };
                bindings.insert(
                    local.to_string(),
                    ImportBinding {
                        imported_name: specifier.name.clone(),
                        module_path: import.source.clone(),
                        target: target.clone(),
                    },
                );
            }
        }

        Self {
            file_id,
            locals,
            bindings,
            builtins,
        }
    }

    /// Entity id of a local definition.
    pub fn local(&self, qualified_name: &str) -> Option<&str> {
        self.locals.get(qualified_name).map(String::as_str)
    }

    pub fn binding(&self, local_name: &str) -> Option<&ImportBinding> {
        self.bindings.get(local_name)
    }

    /// Resolve one call site.
    ///
    /// `enclosing_class` lets `this.m()` and `self.m()` bind to `Class.m`.
    pub fn resolve(&self, call: &CallSite, enclosing_class: Option<&str>) -> Resolution {
        let callee = call.callee_name.as_str();
        let base = call.base_identifier();

        if let (Some(class), Some(member)) = (enclosing_class, call.member_path()) {
            let qualified = format!("{class}.{member}");
            if SELF_RECEIVERS.contains(&base) && self.locals.contains_key(&qualified) {
                return Resolution::Local(ResolvedDefinition::new(&self.file_id, qualified));
            }
        }

        for candidate in [callee, base] {
            if self.locals.contains_key(candidate) {
                return Resolution::Local(ResolvedDefinition::new(&self.file_id, candidate));
            }
        }

        if let Some(binding) = self.bindings.get(base) {
            let Some(target) = binding.target.as_deref() else {
                return Resolution::Unresolved;
            };
            let name = match binding.imported_name.as_str() {
                "*" => call.member_path().unwrap_or(base),
                "default" => base,
                imported => imported,
            };
            return Resolution::Imported(ResolvedDefinition::new(target, name));
        }

        if self.builtins.contains(&base) {
            return Resolution::Builtin(ResolvedDefinition::builtin(callee));
        }

        Resolution::Unresolved
    }
}

/// Class whose members `entity` can reach through `this`/`self`.
fn enclosing_class(artifact: &FileArtifact, entity: &Entity) -> Option<String> {
    if entity.kind == EntityKind::Class {
        return Some(entity.name.clone());
    }
    artifact
        .qualified_name(entity)
        .rsplit_once('.')
        .map(|(class, _)| class.to_string())
}

/// Bind every call site of `artifact` in place.
pub fn resolve_artifact(
    artifact: &mut FileArtifact,
    builtins: &'static [&'static str],
) -> ResolveStats {
    let resolver = Resolver::new(artifact, builtins);
    let classes: Vec<Option<String>> = artifact
        .entities
        .iter()
        .map(|entity| enclosing_class(artifact, entity))
        .collect();

    let mut stats = ResolveStats::default();
    for (entity, class) in artifact.entities.iter_mut().zip(classes) {
        for call in &mut entity.calls {
            let resolution = resolver.resolve(call, class.as_deref());
            stats.record(&resolution);
            call.resolved_definition = resolution.into_definition();
        }
    }
    for call in &mut artifact.module_calls {
        let resolution = resolver.resolve(call, None);
        stats.record(&resolution);
        call.resolved_definition = resolution.into_definition();
    }

    trace!(
        file = %artifact.file.id,
        local = stats.local,
        imported = stats.imported,
        builtin = stats.builtin,
        unresolved = stats.unresolved,
        "Resolved call sites"
    );
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{
        CallKind, FileIdentity, ImportSpec, ImportSpecifier, Location, BUILTIN_FILE,
    };

    fn artifact(id: &str) -> FileArtifact {
        FileArtifact::new(FileIdentity {
            id: id.to_string(),
            path: format!("/ws/{id}"),
            language: "typescript".to_string(),
        })
    }

    fn call(name: &str) -> CallSite {
        CallSite::new(name, CallKind::Function)
    }

    #[test]
    fn test_local_shadows_import() {
        let mut file = artifact("src/b.ts");
        file.imports.push(
            ImportSpec::new("./a").with_specifier(ImportSpecifier::named("foo")),
        );
        file.entities
            .push(Entity::new("foo", EntityKind::Function, Location::new(3, 5)));

        let resolver = Resolver::new(&file, JS_BUILTINS);
        assert_eq!(
            resolver.resolve(&call("foo"), None),
            Resolution::Local(ResolvedDefinition::new("src/b.ts", "foo"))
        );
    }

    #[test]
    fn test_named_and_aliased_imports() {
        let mut file = artifact("src/b.ts");
        file.imports.push(
            ImportSpec::new("./a")
                .with_specifier(ImportSpecifier::named("helper"))
                .with_specifier(ImportSpecifier::aliased("format", "fmt")),
        );
        let resolver = Resolver::new(&file, JS_BUILTINS);

        assert_eq!(
            resolver.resolve(&call("helper"), None),
            Resolution::Imported(ResolvedDefinition::new("src/a.ts", "helper"))
        );
        assert_eq!(
            resolver.resolve(&call("fmt"), None),
            Resolution::Imported(ResolvedDefinition::new("src/a.ts", "format"))
        );
        assert_eq!(
            resolver.binding("fmt").map(|b| b.module_path.as_str()),
            Some("./a")
        );
    }

    #[test]
    fn test_namespace_and_default_imports() {
        let mut file = artifact("app.ts");
        file.imports.push(
            ImportSpec::new("./utils").with_specifier(ImportSpecifier::aliased("*", "utils")),
        );
        file.imports.push(
            ImportSpec::new("./logger")
                .with_specifier(ImportSpecifier::aliased("default", "log")),
        );
        let resolver = Resolver::new(&file, JS_BUILTINS);

        assert_eq!(
            resolver.resolve(&CallSite::new("utils.slugify", CallKind::Method), None),
            Resolution::Imported(ResolvedDefinition::new("utils.ts", "slugify"))
        );
        assert_eq!(
            resolver.resolve(&call("log"), None),
            Resolution::Imported(ResolvedDefinition::new("logger.ts", "log"))
        );
    }

    #[test]
    fn test_external_import_is_unresolved() {
        let mut file = artifact("app.ts");
        file.imports
            .push(ImportSpec::new("lodash").with_specifier(ImportSpecifier::named("map")));
        let resolver = Resolver::new(&file, JS_BUILTINS);
        assert_eq!(resolver.resolve(&call("map"), None), Resolution::Unresolved);
    }

    #[test]
    fn test_reexport_binds_nothing() {
        let mut file = artifact("index.ts");
        file.imports.push(
            ImportSpec::new("./a")
                .with_specifier(ImportSpecifier::named("helper"))
                .as_reexport(),
        );
        let resolver = Resolver::new(&file, JS_BUILTINS);
        assert!(resolver.binding("helper").is_none());
        assert_eq!(resolver.resolve(&call("helper"), None), Resolution::Unresolved);
    }

    #[test]
    fn test_builtins_and_unresolved() {
        let file = artifact("a.ts");
        let resolver = Resolver::new(&file, JS_BUILTINS);

        let resolution = resolver.resolve(&CallSite::new("console.log", CallKind::Method), None);
        let def = resolution.definition().unwrap();
        assert_eq!(def.file, BUILTIN_FILE);
        assert_eq!(def.name, "console.log");

        assert_eq!(resolver.resolve(&call("mystery"), None), Resolution::Unresolved);
    }

    #[test]
    fn test_self_receiver_resolves_to_sibling_method() {
        let mut file = artifact("svc.ts");
        file.entities = vec![
            Entity::new("Service", EntityKind::Class, Location::new(1, 20)),
            Entity::new("start", EntityKind::Method, Location::new(2, 5)),
            Entity::new("stop", EntityKind::Method, Location::new(6, 9)),
        ];
        let resolver = Resolver::new(&file, JS_BUILTINS);

        let this_call = CallSite::new("this.stop", CallKind::Method);
        assert_eq!(
            resolver.resolve(&this_call, Some("Service")),
            Resolution::Local(ResolvedDefinition::new("svc.ts", "Service.stop"))
        );
        assert_eq!(resolver.resolve(&this_call, None), Resolution::Unresolved);
        assert_eq!(resolver.local("Service.start"), Some("start"));
    }

    #[test]
    fn test_resolve_artifact_fills_definitions() {
        let mut file = artifact("main.py");
        let mut main = Entity::new("main", EntityKind::Function, Location::new(1, 4));
        main.calls.push(call("print"));
        main.calls.push(call("unknown_helper"));
        file.entities.push(main);
        file.module_calls.push(call("main"));

        let stats = resolve_artifact(&mut file, PYTHON_BUILTINS);
        assert_eq!(
            stats,
            ResolveStats {
                local: 1,
                imported: 0,
                builtin: 1,
                unresolved: 1
            }
        );
        assert!(file.entities[0].calls[0]
            .resolved_definition
            .as_ref()
            .is_some_and(|d| d.is_builtin()));
        assert!(file.entities[0].calls[1].resolved_definition.is_none());
        assert_eq!(
            file.module_calls[0].resolved_definition,
            Some(ResolvedDefinition::new("main.py", "main"))
        );
    }
}
