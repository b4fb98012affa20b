//! Graph construction: from a step sequence to a validated execution
//! graph.
//!
//! The build runs in four phases: node creation, producer/consumer
//! indexing, edge emission, and acyclicity validation. The inverted
//! indices keep edge emission linear in the number of edges instead of
//! quadratic in the number of steps.

use crate::error::Error;
use crate::graph::{DependencyEdge, EdgeKind, ExecutionGraph, StepNode};
use crate::resource::{extract_effect, is_parent_directory, parent_dir};
use crate::step::Step;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Path -> ordered `(index, node_id)` producer/consumer lists.
type ResourceIndex = BTreeMap<String, Vec<(usize, String)>>;

/// Outcome of a graph build.
#[derive(Debug, Default)]
pub struct GraphBuildOutcome {
    /// The validated graph; `None` when validation failed
    pub graph: Option<ExecutionGraph>,
    /// Build errors (principally cycles)
    pub errors: Vec<Error>,
    /// Non-fatal notes from effect extraction
    pub warnings: Vec<String>,
}

impl GraphBuildOutcome {
    /// Whether a usable graph was produced
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.errors.is_empty() && self.graph.is_some()
    }
}

/// Build the dependency graph for a step sequence.
///
/// No partial graph is returned when a cycle is detected; the cycle
/// trace lands in `errors`.
#[must_use]
pub fn build_graph(steps: &[Step]) -> GraphBuildOutcome {
    let mut outcome = GraphBuildOutcome::default();
    let mut graph = ExecutionGraph::new();

    // Phase 1: nodes, positionally identified.
    for (index, step) in steps.iter().enumerate() {
        let (effect, warnings) = extract_effect(step);
        outcome.warnings.extend(warnings);
        graph.add_node(StepNode::new(
            format!("step_{index}"),
            step.clone(),
            effect,
            index,
        ));
    }

    // Phase 2: inverted indices over the four resource sets.
    let file_creators = index_resources(&graph, |node| &node.effect().creates_files);
    let dir_creators = index_resources(&graph, |node| &node.effect().creates_dirs);
    let file_readers = index_resources(&graph, |node| &node.effect().reads_files);
    let dir_requirers = index_resources(&graph, |node| &node.effect().requires_dirs);

    // Phase 3: edge emission, in a fixed order.
    emit_creation_edges(
        &mut graph,
        &file_creators,
        &file_readers,
        EdgeKind::FileCreation,
        |path| format!("File {path} must be created before being read"),
    );
    emit_creation_edges(
        &mut graph,
        &dir_creators,
        &dir_requirers,
        EdgeKind::DirectoryCreation,
        |path| format!("Directory {path} must be created before being used"),
    );
    emit_parent_directory_edges(&mut graph, &dir_creators);
    emit_execution_order_edges(&mut graph);

    debug!(
        nodes = graph.len(),
        edges = graph.edges().len(),
        "graph constructed"
    );

    // Phase 4: validation. A cycle aborts the build.
    if let Some(trace) = graph.detect_cycle() {
        outcome.errors.push(graph.cycle_error(&trace));
        return outcome;
    }

    outcome.graph = Some(graph);
    outcome
}

fn index_resources(
    graph: &ExecutionGraph,
    resources: impl Fn(&StepNode) -> &BTreeSet<String>,
) -> ResourceIndex {
    let mut index = ResourceIndex::new();
    for node in graph.nodes() {
        for path in resources(node) {
            index
                .entry(path.clone())
                .or_default()
                .push((node.original_index(), node.id().to_string()));
        }
    }
    index
}

/// Producer -> consumer edges for every resource present in both
/// indices; only forward pairs (producer before consumer) are linked,
/// which also rules out self-edges.
fn emit_creation_edges(
    graph: &mut ExecutionGraph,
    creators: &ResourceIndex,
    consumers: &ResourceIndex,
    kind: EdgeKind,
    describe: impl Fn(&str) -> String,
) {
    for (path, creator_entries) in creators {
        let Some(consumer_entries) = consumers.get(path) else {
            continue;
        };
        for (creator_index, creator_id) in creator_entries {
            for (consumer_index, consumer_id) in consumer_entries {
                if creator_index < consumer_index {
                    graph.add_edge(DependencyEdge {
                        from: creator_id.clone(),
                        to: consumer_id.clone(),
                        kind,
                        resource_path: Some(path.clone()),
                        description: describe(path),
                    });
                }
            }
        }
    }
}

/// Link file-creating nodes to the earlier creators of their parent
/// directories (or of any ancestor of those parents). At most one edge
/// per `(parent, consumer)` pair.
fn emit_parent_directory_edges(graph: &mut ExecutionGraph, dir_creators: &ResourceIndex) {
    let mut edges = Vec::new();

    for node in graph.nodes() {
        if node.effect().creates_files.is_empty() {
            continue;
        }
        let parents: BTreeSet<String> = node
            .effect()
            .creates_files
            .iter()
            .map(|file| parent_dir(file))
            .filter(|parent| parent != "." && parent != "/")
            .collect();

        for parent in parents {
            'search: for (dir_path, creators) in dir_creators {
                if dir_path != &parent && !is_parent_directory(dir_path, &parent) {
                    continue;
                }
                for (creator_index, creator_id) in creators {
                    if *creator_index < node.original_index() {
                        edges.push(DependencyEdge {
                            from: creator_id.clone(),
                            to: node.id().to_string(),
                            kind: EdgeKind::DirectoryCreation,
                            resource_path: Some(dir_path.clone()),
                            description: format!(
                                "Parent directory {dir_path} must exist before creating files"
                            ),
                        });
                        break 'search;
                    }
                }
            }
        }
    }

    for edge in edges {
        graph.add_edge(edge);
    }
}

/// Preserve the original order of adjacent steps that conflict on a
/// resource and are not already related by an edge.
fn emit_execution_order_edges(graph: &mut ExecutionGraph) {
    let ids = graph.node_ids();
    let mut edges = Vec::new();

    for pair in ids.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        if graph.has_edge_between(a, b) {
            continue;
        }
        let (Some(first), Some(second)) = (graph.node(a), graph.node(b)) else {
            continue;
        };
        if first.effect().conflicts_with(second.effect()) {
            edges.push(DependencyEdge {
                from: a.clone(),
                to: b.clone(),
                kind: EdgeKind::ExecutionOrder,
                resource_path: None,
                description: "Preserve original execution order due to resource conflict"
                    .to_string(),
            });
        }
    }

    for edge in edges {
        graph.add_edge(edge);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::StepKind;

    fn step(kind: StepKind, args: &[&str]) -> Step {
        Step::builder(kind).args(args.iter().copied()).build().unwrap()
    }

    #[test]
    fn test_mkdir_before_copy_gets_directory_edge() {
        let steps = vec![
            step(StepKind::Mkdir, &["out"]),
            step(StepKind::Copy, &["src.txt", "out/result.txt"]),
        ];
        let outcome = build_graph(&steps);
        let graph = outcome.graph.expect("graph expected");

        assert_eq!(graph.len(), 2);
        let edge = graph
            .edges()
            .iter()
            .find(|e| e.from == "step_0" && e.to == "step_1")
            .expect("edge expected");
        assert_eq!(edge.kind, EdgeKind::DirectoryCreation);
        assert_eq!(edge.resource_path.as_deref(), Some("out"));
    }

    #[test]
    fn test_file_creation_edge() {
        let steps = vec![
            step(StepKind::Copy, &["src.txt", "mid.txt"]),
            step(StepKind::Copy, &["mid.txt", "final.txt"]),
        ];
        let outcome = build_graph(&steps);
        let graph = outcome.graph.unwrap();

        let edge = graph
            .edges()
            .iter()
            .find(|e| e.kind == EdgeKind::FileCreation)
            .expect("file creation edge expected");
        assert_eq!(edge.from, "step_0");
        assert_eq!(edge.to, "step_1");
        assert_eq!(edge.resource_path.as_deref(), Some("mid.txt"));
    }

    #[test]
    fn test_ancestor_directory_edge() {
        // mkdir of "out" also satisfies files created under "out/sub".
        let steps = vec![
            step(StepKind::Mkdir, &["out"]),
            step(StepKind::Touch, &["out/sub/flag.txt"]),
        ];
        let outcome = build_graph(&steps);
        let graph = outcome.graph.unwrap();

        assert!(graph
            .edges()
            .iter()
            .any(|e| e.from == "step_0" && e.to == "step_1" && e.kind == EdgeKind::DirectoryCreation));
    }

    #[test]
    fn test_self_copy_emits_no_self_edge() {
        let steps = vec![step(StepKind::Copy, &["same.txt", "same.txt"])];
        let outcome = build_graph(&steps);
        let graph = outcome.graph.unwrap();
        assert_eq!(graph.len(), 1);
        assert!(graph.edges().is_empty());
        let effect = graph.node("step_0").unwrap().effect();
        assert!(effect.creates_files.contains("same.txt"));
        assert!(effect.reads_files.contains("same.txt"));
    }

    #[test]
    fn test_execution_order_edge_for_adjacent_conflict() {
        // Both steps create the same file and nothing else relates them.
        let steps = vec![
            step(StepKind::Touch, &["shared.txt"]),
            step(StepKind::Touch, &["shared.txt"]),
        ];
        let outcome = build_graph(&steps);
        let graph = outcome.graph.unwrap();

        let edge = graph
            .edges()
            .iter()
            .find(|e| e.kind == EdgeKind::ExecutionOrder)
            .expect("execution order edge expected");
        assert_eq!(edge.from, "step_0");
        assert_eq!(edge.to, "step_1");
    }

    #[test]
    fn test_no_order_edge_without_conflict() {
        let steps = vec![
            step(StepKind::Mkdir, &["a"]),
            step(StepKind::Mkdir, &["b"]),
        ];
        let outcome = build_graph(&steps);
        let graph = outcome.graph.unwrap();
        assert!(graph.edges().is_empty());
    }

    #[test]
    fn test_edges_are_monotone_in_original_index() {
        let steps = vec![
            step(StepKind::Mkdir, &["out"]),
            step(StepKind::Copy, &["a.txt", "out/a.txt"]),
            step(StepKind::Copy, &["out/a.txt", "out/b.txt"]),
            step(StepKind::Remove, &["out/b.txt"]),
        ];
        let outcome = build_graph(&steps);
        let graph = outcome.graph.unwrap();
        assert!(!graph.edges().is_empty());
        for edge in graph.edges() {
            let from = graph.node(&edge.from).unwrap().original_index();
            let to = graph.node(&edge.to).unwrap().original_index();
            assert!(from < to, "edge {} -> {} not monotone", edge.from, edge.to);
        }
    }

    #[test]
    fn test_cycle_aborts_build() {
        // Two shell steps cannot cycle through their effects alone, so
        // wire the cycle through copy steps reading each other's output.
        let steps = vec![
            step(StepKind::Copy, &["b.txt", "a.txt"]),
            step(StepKind::Copy, &["a.txt", "b.txt"]),
        ];
        // step_0 creates a.txt which step_1 reads (0 -> 1); step_1
        // creates b.txt which step_0 reads, but only forward pairs link,
        // so this particular shape stays acyclic.
        let outcome = build_graph(&steps);
        assert!(outcome.is_success());

        // A genuine cycle requires handcrafted edges; the graph module
        // covers that path. Here we assert the builder's forward-only
        // rule held.
        let graph = outcome.graph.unwrap();
        assert!(graph.detect_cycle().is_none());
    }
}
