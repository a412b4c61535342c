//! Artifact to graph conversion.
//!
//! Conversion is a pure function of one artifact: it never touches the
//! filesystem or the stores. Cross-file call targets are referenced by node
//! id only and are joined up when fragments are merged into a store.

use std::collections::{HashMap, HashSet};

use crate::artifact::FileArtifact;
use crate::graph::{Edge, Node, UnresolvedCall, entity_node_id};
use crate::modules;

/// Nodes and edges derived from one or more artifacts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphFragment {
    /// File nodes followed by entity nodes.
    pub nodes: Vec<Node>,
    /// File to file.
    pub import_edges: Vec<Edge>,
    /// Entity to entity (or `<builtin>`).
    pub call_edges: Vec<Edge>,
    pub unresolved: Vec<UnresolvedCall>,
}

impl GraphFragment {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
            && self.import_edges.is_empty()
            && self.call_edges.is_empty()
            && self.unresolved.is_empty()
    }

    /// Append another fragment.
    pub fn extend(&mut self, other: GraphFragment) {
        self.nodes.extend(other.nodes);
        self.import_edges.extend(other.import_edges);
        self.call_edges.extend(other.call_edges);
        self.unresolved.extend(other.unresolved);
    }

    /// File nodes only (the import graph's node set).
    pub fn file_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes
            .iter()
            .filter(|node| node.kind == crate::graph::NodeKind::File)
    }

    /// Entity nodes only (the call graph's node set).
    pub fn entity_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes
            .iter()
            .filter(|node| node.kind != crate::graph::NodeKind::File)
    }
}

/// Convert one artifact into its graph fragment.
///
/// Duplicate import or call edges within the file collapse into one. Every
/// unresolved call site is kept as its own entry.
pub fn artifact_to_graph(artifact: &FileArtifact, file_id: &str) -> GraphFragment {
    let mut fragment = GraphFragment::default();
    let root = modules::workspace_root_of(&artifact.file.path, &artifact.file.id);

    fragment.nodes.push(Node::file(file_id));
    for (entity, id) in artifact.entities.iter().zip(artifact.entity_ids()) {
        fragment.nodes.push(
            Node::entity(file_id, &id, entity.name.as_str(), entity.kind.into())
                .with_signature(entity.signature.as_str())
                .with_lines(entity.loc.start_line, entity.loc.end_line),
        );
    }

    let mut seen_imports = HashSet::new();
    for import in &artifact.imports {
        let Some(target) = modules::resolve_import(file_id, import, root.as_deref()) else {
            continue;
        };
        if target != file_id && seen_imports.insert(target.clone()) {
            fragment.import_edges.push(Edge::import(file_id, target));
        }
    }

    let mut seen_calls = HashSet::new();
    let mut call_index: HashMap<String, usize> = HashMap::new();
    for (caller, call) in artifact.calls_by_caller() {
        let caller_id = entity_node_id(file_id, &caller);
        let index = call_index.entry(caller_id.clone()).or_insert(0);
        let site = *index;
        *index += 1;

        match &call.resolved_definition {
            Some(definition) => {
                let edge = Edge::call(caller_id, definition.node_id());
                if seen_calls.insert(edge.clone()) {
                    fragment.call_edges.push(edge);
                }
            }
            None => fragment.unresolved.push(UnresolvedCall::new(
                caller_id,
                call.callee_name.as_str(),
                site,
            )),
        }
    }

    fragment
}

/// Convert many artifacts by concatenating their fragments.
pub fn artifacts_to_edge_list(artifacts: &[FileArtifact]) -> GraphFragment {
    let mut fragment = GraphFragment::default();
    for artifact in artifacts {
        fragment.extend(artifact_to_graph(artifact, &artifact.file.id));
    }
    fragment
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{
        CallKind, CallSite, Entity, EntityKind, FileIdentity, ImportSpec, Location,
        ResolvedDefinition,
    };
    use crate::graph::NodeKind;
    use crate::lang::{Extractor, TypeScriptExtractor};

    fn identity(id: &str) -> FileIdentity {
        FileIdentity {
            id: id.to_string(),
            path: format!("/ws/{id}"),
            language: "typescript".to_string(),
        }
    }

    fn extract(id: &str, source: &str) -> FileArtifact {
        TypeScriptExtractor::typescript()
            .extract_source(identity(id), source)
            .unwrap()
            .unwrap()
    }

    #[test]
    fn test_two_file_scenario() {
        let a = extract("a.ts", "export function helper() {\n  return 1;\n}\n");
        let b = extract("b.ts", "import { helper } from './a';\nhelper();\n");

        let fragment = artifacts_to_edge_list(&[a, b]);

        let mut ids: Vec<_> = fragment.nodes.iter().map(|n| n.id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["a.ts", "a.ts::helper", "b.ts"]);
        assert_eq!(fragment.import_edges, vec![Edge::import("b.ts", "a.ts")]);
        assert_eq!(
            fragment.call_edges,
            vec![Edge::call("b.ts::<module>", "a.ts::helper")]
        );
        assert!(fragment.unresolved.is_empty());
    }

    #[test]
    fn test_entity_nodes_are_qualified() {
        let mut artifact = FileArtifact::new(identity("src/svc.ts"));
        artifact.entities = vec![
            Entity::new("Service", EntityKind::Class, Location::new(1, 10))
                .with_signature("class Service"),
            Entity::new("start", EntityKind::Method, Location::new(2, 4)),
        ];

        let fragment = artifact_to_graph(&artifact, "src/svc.ts");
        let method = fragment
            .entity_nodes()
            .find(|n| n.name == "start")
            .unwrap();
        assert_eq!(method.id, "src/svc.ts::Service.start");
        assert_eq!(method.kind, NodeKind::Method);
        assert_eq!(method.start_line, Some(2));
        assert!(method.signature.is_none());
        assert_eq!(fragment.file_nodes().count(), 1);
    }

    #[test]
    fn test_external_imports_produce_no_edge() {
        let mut artifact = FileArtifact::new(identity("src/app.ts"));
        artifact.imports = vec![
            ImportSpec::new("react"),
            ImportSpec::new("./util"),
            ImportSpec::new("./util.ts"),
            ImportSpec::new("./app"),
        ];

        let fragment = artifact_to_graph(&artifact, "src/app.ts");
        assert_eq!(
            fragment.import_edges,
            vec![Edge::import("src/app.ts", "src/util.ts")]
        );
    }

    #[test]
    fn test_calls_split_into_edges_builtins_and_unresolved() {
        let mut artifact = FileArtifact::new(identity("main.ts"));
        let mut run = Entity::new("run", EntityKind::Function, Location::new(1, 5));
        let mut local = CallSite::new("helper", CallKind::Function);
        local.resolved_definition = Some(ResolvedDefinition::new("main.ts", "helper"));
        let mut builtin = CallSite::new("console.log", CallKind::Method);
        builtin.resolved_definition = Some(ResolvedDefinition::builtin("console.log"));
        run.calls = vec![
            local.clone(),
            local,
            builtin,
            CallSite::new("mystery", CallKind::Function),
            CallSite::new("mystery", CallKind::Function),
        ];
        artifact.entities.push(run);
        artifact
            .entities
            .push(Entity::new("helper", EntityKind::Function, Location::new(7, 9)));

        let fragment = artifact_to_graph(&artifact, "main.ts");
        assert_eq!(
            fragment.call_edges,
            vec![
                Edge::call("main.ts::run", "main.ts::helper"),
                Edge::call("main.ts::run", "<builtin>::console.log"),
            ]
        );
        let sites: Vec<_> = fragment
            .unresolved
            .iter()
            .map(|u| u.call_site_id.as_str())
            .collect();
        assert_eq!(sites, vec!["main.ts::run#3", "main.ts::run#4"]);
    }

    #[test]
    fn test_same_named_entities_keep_separate_nodes() {
        let artifact = extract(
            "p.ts",
            "class P {\n  get length() { a(); }\n  set length(v) { b(); }\n}\n\
             function dup() { c(); }\nfunction dup() { d(); }\n",
        );

        let fragment = artifact_to_graph(&artifact, "p.ts");
        let mut ids: Vec<_> = fragment.entity_nodes().map(|n| n.id.as_str()).collect();
        ids.sort();
        assert_eq!(
            ids,
            vec!["p.ts::P", "p.ts::P.length", "p.ts::P.length@3", "p.ts::dup", "p.ts::dup@6"]
        );

        let callers: Vec<_> = fragment
            .unresolved
            .iter()
            .map(|u| (u.callee_name.as_str(), u.call_site_id.as_str()))
            .collect();
        assert_eq!(
            callers,
            vec![
                ("a", "p.ts::P.length#0"),
                ("b", "p.ts::P.length@3#0"),
                ("c", "p.ts::dup#0"),
                ("d", "p.ts::dup@6#0"),
            ]
        );
    }

    #[test]
    fn test_conversion_is_deterministic() {
        let artifact = extract(
            "x.ts",
            "import { a } from './a';\nexport function f() { a(); g(); }\n",
        );
        assert_eq!(
            artifact_to_graph(&artifact, "x.ts"),
            artifact_to_graph(&artifact, "x.ts")
        );
    }
}
