//! The execution graph: nodes, dependency edges, topological order, and
//! parallel levels.
//!
//! The graph is immutable after construction except for node status,
//! node results, and the append-only execution-results index — all of
//! which only the executor writes.

use crate::driver::StepResult;
use crate::error::{Error, Result};
use crate::resource::ResourceEffect;
use crate::step::Step;
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap, HashSet};
use tracing::trace;

/// Lifecycle of a graph node. Transitions are monotonic:
/// `Pending -> Running -> (Completed | Failed | Skipped)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    /// Not yet considered
    Pending,
    /// Submitted to a driver
    Running,
    /// Driver reported success (or a tolerated failure)
    Completed,
    /// Driver reported failure
    Failed,
    /// Short-circuited by a guard or an upstream failure
    Skipped,
}

/// Why a dependency edge exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    /// A file must be created before it is read
    FileCreation,
    /// A directory must be created before it is used
    DirectoryCreation,
    /// Two steps touch the same resource
    ResourceAccess,
    /// Original ordering preserved because of a resource conflict
    ExecutionOrder,
}

impl EdgeKind {
    /// Short wire name for diagnostics
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FileCreation => "file_creation",
            Self::DirectoryCreation => "dir_creation",
            Self::ResourceAccess => "resource_access",
            Self::ExecutionOrder => "exec_order",
        }
    }
}

impl std::fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A directed constraint between two nodes.
#[derive(Debug, Clone)]
pub struct DependencyEdge {
    /// Producer node id
    pub from: String,
    /// Consumer node id
    pub to: String,
    /// Why the edge exists
    pub kind: EdgeKind,
    /// The resource that induced the edge, if any
    pub resource_path: Option<String>,
    /// Human-readable explanation
    pub description: String,
}

/// A graph vertex: one step plus its effect and execution state.
#[derive(Debug, Clone)]
pub struct StepNode {
    id: String,
    step: Step,
    effect: ResourceEffect,
    original_index: usize,
    status: NodeStatus,
    result: Option<StepResult>,
}

impl StepNode {
    /// Create a pending node.
    #[must_use]
    pub fn new(id: impl Into<String>, step: Step, effect: ResourceEffect, original_index: usize) -> Self {
        Self {
            id: id.into(),
            step,
            effect,
            original_index,
            status: NodeStatus::Pending,
            result: None,
        }
    }

    /// The node id (`step_i`)
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The step this node executes
    #[must_use]
    pub fn step(&self) -> &Step {
        &self.step
    }

    /// The step's resource effect
    #[must_use]
    pub fn effect(&self) -> &ResourceEffect {
        &self.effect
    }

    /// Position of the step in the pre-graph sequence
    #[must_use]
    pub fn original_index(&self) -> usize {
        self.original_index
    }

    /// Current execution status
    #[must_use]
    pub fn status(&self) -> NodeStatus {
        self.status
    }

    /// The recorded result, if the node has finished
    #[must_use]
    pub fn result(&self) -> Option<&StepResult> {
        self.result.as_ref()
    }

    pub(crate) fn set_status(&mut self, status: NodeStatus) {
        self.status = status;
    }

    pub(crate) fn set_result(&mut self, result: StepResult) {
        self.result = Some(result);
    }
}

/// A cycle found during validation.
#[derive(Debug, Clone)]
pub struct CycleTrace {
    /// The nodes on the cycle, in traversal order
    pub nodes: Vec<String>,
    /// The edges closing the cycle, as `(from, to)` pairs
    pub edges: Vec<(String, String)>,
}

/// Directed acyclic execution graph over step nodes.
#[derive(Debug, Default)]
pub struct ExecutionGraph {
    nodes: Vec<StepNode>,
    index: HashMap<String, usize>,
    edges: Vec<DependencyEdge>,
    edge_pairs: HashSet<(String, String)>,
    adjacency: HashMap<String, BTreeSet<String>>,
    reverse: HashMap<String, BTreeSet<String>>,
    execution_results: HashMap<String, StepResult>,
}

impl ExecutionGraph {
    /// Create an empty graph
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no nodes
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Add a node. Node ids must be unique.
    pub fn add_node(&mut self, node: StepNode) {
        let id = node.id().to_string();
        self.adjacency.entry(id.clone()).or_default();
        self.reverse.entry(id.clone()).or_default();
        self.index.insert(id, self.nodes.len());
        self.nodes.push(node);
    }

    /// Add an edge. Edges are a set keyed on `(from, to)`; a repeated
    /// pair is ignored and `false` is returned.
    pub fn add_edge(&mut self, edge: DependencyEdge) -> bool {
        let pair = (edge.from.clone(), edge.to.clone());
        if !self.edge_pairs.insert(pair) {
            return false;
        }
        trace!(from = %edge.from, to = %edge.to, kind = %edge.kind, "edge added");
        self.adjacency
            .entry(edge.from.clone())
            .or_default()
            .insert(edge.to.clone());
        self.reverse
            .entry(edge.to.clone())
            .or_default()
            .insert(edge.from.clone());
        self.edges.push(edge);
        true
    }

    /// Look up a node by id
    #[must_use]
    pub fn node(&self, id: &str) -> Option<&StepNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub(crate) fn node_mut(&mut self, id: &str) -> Option<&mut StepNode> {
        self.index.get(id).copied().map(move |i| &mut self.nodes[i])
    }

    /// Nodes in insertion order
    pub fn nodes(&self) -> impl Iterator<Item = &StepNode> {
        self.nodes.iter()
    }

    /// Node ids in insertion order
    #[must_use]
    pub fn node_ids(&self) -> Vec<String> {
        self.nodes.iter().map(|n| n.id().to_string()).collect()
    }

    /// All edges in insertion order
    #[must_use]
    pub fn edges(&self) -> &[DependencyEdge] {
        &self.edges
    }

    /// Whether an edge exists between the two nodes in either direction
    #[must_use]
    pub fn has_edge_between(&self, a: &str, b: &str) -> bool {
        self.edge_pairs.contains(&(a.to_string(), b.to_string()))
            || self.edge_pairs.contains(&(b.to_string(), a.to_string()))
    }

    /// Direct dependencies (producers) of a node
    #[must_use]
    pub fn dependencies_of(&self, id: &str) -> Vec<String> {
        self.reverse
            .get(id)
            .map(|deps| deps.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Direct dependents (consumers) of a node
    #[must_use]
    pub fn dependents_of(&self, id: &str) -> Vec<String> {
        self.adjacency
            .get(id)
            .map(|deps| deps.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Every node reachable through dependent edges, nearest first,
    /// deduplicated, ordered by original index.
    #[must_use]
    pub fn transitive_dependents(&self, id: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut queue: Vec<String> = self.dependents_of(id);
        let mut result = Vec::new();

        while let Some(current) = queue.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            queue.extend(self.dependents_of(&current));
            result.push(current);
        }

        result.sort_by_key(|id| self.node(id).map_or(usize::MAX, StepNode::original_index));
        result
    }

    /// Record a finished node: status, result, and the append-only
    /// execution-results index used by result substitution.
    pub(crate) fn record_result(&mut self, id: &str, status: NodeStatus, result: StepResult) {
        if let Some(node) = self.node_mut(id) {
            node.set_status(status);
            node.set_result(result.clone());
        }
        self.execution_results.insert(id.to_string(), result);
    }

    /// Results recorded so far, keyed by node id
    #[must_use]
    pub fn execution_results(&self) -> &HashMap<String, StepResult> {
        &self.execution_results
    }

    /// Detect a cycle with a three-colour DFS.
    ///
    /// The trace is reconstructed from the recursion stack at the moment
    /// the closing edge is seen.
    #[must_use]
    pub fn detect_cycle(&self) -> Option<CycleTrace> {
        let mut color: HashMap<&str, u8> = HashMap::new();
        let mut stack: Vec<String> = Vec::new();

        for node in &self.nodes {
            if color.get(node.id()).copied().unwrap_or(0) == 0 {
                if let Some(trace) = self.dfs_cycle(node.id(), &mut color, &mut stack) {
                    return Some(trace);
                }
            }
        }
        None
    }

    fn dfs_cycle<'a>(
        &'a self,
        node: &'a str,
        color: &mut HashMap<&'a str, u8>,
        stack: &mut Vec<String>,
    ) -> Option<CycleTrace> {
        color.insert(node, 1);
        stack.push(node.to_string());

        if let Some(neighbors) = self.adjacency.get(node) {
            for next in neighbors {
                match color.get(next.as_str()).copied().unwrap_or(0) {
                    1 => {
                        // Closing edge: the chain from `next` to the top
                        // of the stack is the cycle.
                        let start = stack.iter().position(|n| n == next).unwrap_or(0);
                        let nodes: Vec<String> = stack[start..].to_vec();
                        let mut edges: Vec<(String, String)> = nodes
                            .windows(2)
                            .map(|pair| (pair[0].clone(), pair[1].clone()))
                            .collect();
                        if let (Some(last), Some(first)) = (nodes.last(), nodes.first()) {
                            edges.push((last.clone(), first.clone()));
                        }
                        return Some(CycleTrace { nodes, edges });
                    }
                    2 => {}
                    _ => {
                        if let Some(trace) = self.dfs_cycle(next.as_str(), color, stack) {
                            return Some(trace);
                        }
                    }
                }
            }
        }

        stack.pop();
        color.insert(node, 2);
        None
    }

    /// Build the circular-dependency error for a detected cycle.
    #[must_use]
    pub fn cycle_error(&self, trace: &CycleTrace) -> Error {
        Error::circular_dependency(self.format_cycle_trace(trace))
    }

    /// Human-readable cycle description: the node chain, the edges on it
    /// (with their kinds and resources), and a suggestion block.
    #[must_use]
    pub fn format_cycle_trace(&self, trace: &CycleTrace) -> String {
        let mut lines = vec![
            "Circular dependency detected in the workflow graph!".to_string(),
            String::new(),
            format!("Cycle ({} nodes):", trace.nodes.len()),
        ];

        let chain: Vec<String> = trace
            .nodes
            .iter()
            .map(|id| match self.node(id) {
                Some(node) => format!("{id} ({})", node.step().kind()),
                None => id.clone(),
            })
            .collect();
        let first = chain.first().cloned().unwrap_or_default();
        lines.push(format!("  {} -> {first}", chain.join(" -> ")));
        lines.push(String::new());

        let cycle_pairs: HashSet<(String, String)> = trace.edges.iter().cloned().collect();
        let details: Vec<String> = self
            .edges
            .iter()
            .filter(|edge| cycle_pairs.contains(&(edge.from.clone(), edge.to.clone())))
            .map(|edge| {
                let mut line = format!("  {} -> {} ({})", edge.from, edge.to, edge.kind);
                if let Some(resource) = &edge.resource_path {
                    line.push_str(&format!(" [resource: {resource}]"));
                }
                if !edge.description.is_empty() {
                    line.push_str(&format!(" - {}", edge.description));
                }
                line
            })
            .collect();
        if !details.is_empty() {
            lines.push("Dependencies in this cycle:".to_string());
            lines.extend(details);
            lines.push(String::new());
        }

        lines.extend([
            "Resolution suggestions:".to_string(),
            "1. Remove or modify one of the dependencies in the cycle".to_string(),
            "2. Check whether the dependencies are actually necessary".to_string(),
            "3. Consider conditional execution or different resources".to_string(),
        ]);

        lines.join("\n")
    }

    /// Topological order by Kahn's algorithm; ties are broken by the
    /// node's original index, ascending.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CircularDependency`] when the graph has a cycle.
    pub fn execution_order(&self) -> Result<Vec<String>> {
        if let Some(trace) = self.detect_cycle() {
            return Err(self.cycle_error(&trace));
        }

        let mut in_degree: HashMap<&str, usize> = self
            .nodes
            .iter()
            .map(|n| (n.id(), self.reverse.get(n.id()).map_or(0, BTreeSet::len)))
            .collect();

        let mut ready: BinaryHeap<Reverse<(usize, String)>> = self
            .nodes
            .iter()
            .filter(|n| in_degree[n.id()] == 0)
            .map(|n| Reverse((n.original_index(), n.id().to_string())))
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(Reverse((_, id))) = ready.pop() {
            if let Some(neighbors) = self.adjacency.get(&id) {
                for next in neighbors {
                    if let Some(degree) = in_degree.get_mut(next.as_str()) {
                        *degree -= 1;
                        if *degree == 0 {
                            let index = self.node(next).map_or(usize::MAX, StepNode::original_index);
                            ready.push(Reverse((index, next.clone())));
                        }
                    }
                }
            }
            order.push(id);
        }

        if order.len() != self.nodes.len() {
            return Err(Error::custom(
                "graph has cycles or disconnected components",
            ));
        }
        Ok(order)
    }

    /// Partition the nodes into parallel levels: each level is the set
    /// of remaining nodes whose predecessors have all been emitted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CircularDependency`] for cyclic graphs. A
    /// non-empty remainder with no ready node indicates a builder bug
    /// and raises a custom error.
    pub fn parallel_levels(&self) -> Result<Vec<Vec<String>>> {
        if let Some(trace) = self.detect_cycle() {
            return Err(self.cycle_error(&trace));
        }

        let mut remaining: Vec<&StepNode> = self.nodes.iter().collect();
        let mut completed: HashSet<&str> = HashSet::new();
        let mut levels = Vec::new();

        while !remaining.is_empty() {
            let (ready, rest): (Vec<&StepNode>, Vec<&StepNode>) =
                remaining.into_iter().partition(|node| {
                    self.reverse
                        .get(node.id())
                        .is_none_or(|deps| deps.iter().all(|d| completed.contains(d.as_str())))
                });

            if ready.is_empty() {
                return Err(Error::custom(
                    "unable to find executable nodes - possible deadlock",
                ));
            }

            let mut level: Vec<&StepNode> = ready;
            level.sort_by_key(|node| node.original_index());
            completed.extend(level.iter().map(|node| node.id()));
            levels.push(level.iter().map(|node| node.id().to_string()).collect());
            remaining = rest;
        }

        Ok(levels)
    }
}
