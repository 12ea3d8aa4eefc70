//! Task graph: a DAG of [`Task`] vertices with validation, cycle
//! detection, and a deterministic execution order.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::IntoNodeReferences;
use petgraph::Direction;
use tracing::debug;

use crate::error::{Error, Result};
use crate::task::Task;

/// A graph that has not yet had [`Graph::validate`] called on it.
///
/// Mirrors the `Unvalidated -> Validated | Rejected` state machine: only a
/// [`ValidatedGraph`] exposes [`ValidatedGraph::walk`] and
/// [`ValidatedGraph::dependents_of`].
pub struct Graph {
    root: PathBuf,
    inner: DiGraph<Task, ()>,
    name_to_node: HashMap<String, NodeIndex>,
}

/// A [`Graph`] that has passed [`Graph::validate`]: acyclic, every
/// dependency resolved, with a pinned deterministic topological order and a
/// precomputed dependents index.
pub struct ValidatedGraph {
    root: PathBuf,
    inner: DiGraph<Task, ()>,
    name_to_node: HashMap<String, NodeIndex>,
    order: Vec<NodeIndex>,
    dependents: HashMap<NodeIndex, BTreeSet<NodeIndex>>,
}

impl Graph {
    /// Creates an empty graph rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            inner: DiGraph::new(),
            name_to_node: HashMap::new(),
        }
    }

    /// The workspace root this graph was built for.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Adds a task to the graph.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TaskAlreadyExists`] if a task with the same name was
    /// already added, and propagates [`Task::validate_self`] failures.
    pub fn add_task(&mut self, task: Task) -> Result<()> {
        task.validate_self()?;
        if self.name_to_node.contains_key(&task.name) {
            return Err(Error::TaskAlreadyExists(task.name));
        }
        let name = task.name.clone();
        let idx = self.inner.add_node(task);
        self.name_to_node.insert(name.clone(), idx);
        debug!(task = %name, "added task to graph");
        Ok(())
    }

    /// Wires dependency edges, detects cycles, and computes the
    /// deterministic topological order (Kahn's algorithm, alphabetical
    /// tie-break) and the per-task dependents index.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingDependency`] if any task names a dependency
    /// that was never added, and [`Error::CycleDetected`] if the resulting
    /// graph is not acyclic.
    pub fn validate(mut self) -> Result<ValidatedGraph> {
        let mut edges = Vec::new();
        for (idx, task) in self.inner.node_references() {
            for dep in &task.dependencies {
                let Some(&dep_idx) = self.name_to_node.get(dep) else {
                    return Err(Error::MissingDependency {
                        task: task.name.clone(),
                        dependency: dep.clone(),
                    });
                };
                edges.push((dep_idx, idx));
            }
        }
        for (from, to) in edges {
            self.inner.add_edge(from, to, ());
        }

        if is_cyclic_directed(&self.inner) {
            return Err(Error::CycleDetected(describe_cycle(&self.inner, &self.name_to_node)));
        }

        let order = deterministic_toposort(&self.inner, &self.name_to_node)?;
        let dependents = compute_dependents(&self.inner);

        Ok(ValidatedGraph {
            root: self.root,
            inner: self.inner,
            name_to_node: self.name_to_node,
            order,
            dependents,
        })
    }
}

/// Kahn's algorithm with an alphabetical tie-break among simultaneously
/// ready nodes, so `validate` is deterministic for a given graph shape.
fn deterministic_toposort(
    graph: &DiGraph<Task, ()>,
    name_to_node: &HashMap<String, NodeIndex>,
) -> Result<Vec<NodeIndex>> {
    let mut in_degree: HashMap<NodeIndex, usize> = graph
        .node_indices()
        .map(|idx| (idx, graph.neighbors_directed(idx, Direction::Incoming).count()))
        .collect();

    let mut ready: BTreeSet<(String, NodeIndex)> = in_degree
        .iter()
        .filter(|(_, &deg)| deg == 0)
        .map(|(&idx, _)| (graph[idx].name.clone(), idx))
        .collect();

    let mut order = Vec::with_capacity(graph.node_count());
    while let Some((name, idx)) = ready.iter().next().cloned() {
        ready.remove(&(name, idx));
        order.push(idx);
        for next in graph.neighbors_directed(idx, Direction::Outgoing) {
            let deg = in_degree.get_mut(&next).expect("node present in in_degree map");
            *deg -= 1;
            if *deg == 0 {
                ready.insert((graph[next].name.clone(), next));
            }
        }
    }

    if order.len() != graph.node_count() {
        return Err(Error::TopologicalSortFailed(
            "not all tasks were reachable during topological sort".to_string(),
        ));
    }
    let _ = name_to_node;
    Ok(order)
}

fn compute_dependents(graph: &DiGraph<Task, ()>) -> HashMap<NodeIndex, BTreeSet<NodeIndex>> {
    let mut dependents: HashMap<NodeIndex, BTreeSet<NodeIndex>> = HashMap::new();
    for idx in graph.node_indices() {
        for dep in graph.neighbors_directed(idx, Direction::Incoming) {
            dependents.entry(dep).or_default().insert(idx);
        }
    }
    dependents
}

/// Best-effort human-readable description of one offending cycle, found via
/// a three-color DFS re-entry check.
fn describe_cycle(graph: &DiGraph<Task, ()>, name_to_node: &HashMap<String, NodeIndex>) -> String {
    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Gray,
        Black,
    }
    let mut color: HashMap<NodeIndex, Color> =
        graph.node_indices().map(|idx| (idx, Color::White)).collect();
    let mut stack = Vec::new();

    fn visit(
        idx: NodeIndex,
        graph: &DiGraph<Task, ()>,
        color: &mut HashMap<NodeIndex, Color>,
        stack: &mut Vec<NodeIndex>,
    ) -> Option<Vec<NodeIndex>> {
        color.insert(idx, Color::Gray);
        stack.push(idx);
        for next in graph.neighbors_directed(idx, Direction::Outgoing) {
            match color.get(&next).copied().unwrap_or(Color::White) {
                Color::White => {
                    if let Some(cycle) = visit(next, graph, color, stack) {
                        return Some(cycle);
                    }
                }
                Color::Gray => {
                    let start = stack.iter().position(|&n| n == next).unwrap_or(0);
                    let mut cycle = stack[start..].to_vec();
                    cycle.push(next);
                    return Some(cycle);
                }
                Color::Black => {}
            }
        }
        stack.pop();
        color.insert(idx, Color::Black);
        None
    }

    for idx in graph.node_indices() {
        if color[&idx] == Color::White {
            if let Some(cycle) = visit(idx, graph, &mut color, &mut stack) {
                return cycle
                    .iter()
                    .map(|&idx| graph[idx].name.clone())
                    .collect::<Vec<_>>()
                    .join(" -> ");
            }
        }
    }
    let _ = name_to_node;
    "cycle detected but could not be reconstructed".to_string()
}

impl ValidatedGraph {
    /// The workspace root this graph was built for.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Looks up a task by name.
    #[must_use]
    pub fn get_task(&self, name: &str) -> Option<&Task> {
        self.name_to_node.get(name).map(|&idx| &self.inner[idx])
    }

    /// Walks tasks in the stored deterministic execution order.
    pub fn walk(&self) -> impl Iterator<Item = &Task> {
        self.order.iter().map(|&idx| &self.inner[idx])
    }

    /// Direct dependents (tasks that depend on `name`), in alphabetical
    /// order.
    #[must_use]
    pub fn dependents_of(&self, name: &str) -> Vec<&Task> {
        let Some(&idx) = self.name_to_node.get(name) else {
            return Vec::new();
        };
        let mut tasks: Vec<&Task> = self
            .dependents
            .get(&idx)
            .into_iter()
            .flatten()
            .map(|&dep_idx| &self.inner[dep_idx])
            .collect();
        tasks.sort_by(|a, b| a.name.cmp(&b.name));
        tasks
    }

    /// Direct dependencies of `name`, in declaration order.
    #[must_use]
    pub fn dependencies_of(&self, name: &str) -> Vec<&Task> {
        self.get_task(name)
            .map(|task| {
                task.dependencies
                    .iter()
                    .filter_map(|dep| self.get_task(dep))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The transitive closure of targets and their dependencies,
    /// topologically ordered.
    #[must_use]
    pub fn subgraph_for(&self, targets: &[String]) -> Vec<&Task> {
        let mut needed: BTreeSet<NodeIndex> = BTreeSet::new();
        let mut stack: Vec<NodeIndex> = targets
            .iter()
            .filter_map(|name| self.name_to_node.get(name).copied())
            .collect();
        while let Some(idx) = stack.pop() {
            if needed.insert(idx) {
                for dep in self.inner.neighbors_directed(idx, Direction::Incoming) {
                    stack.push(dep);
                }
            }
        }
        self.order
            .iter()
            .filter(|idx| needed.contains(idx))
            .map(|&idx| &self.inner[idx])
            .collect()
    }

    /// Total number of tasks in the graph.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.node_count()
    }

    /// True when the graph holds no tasks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.node_count() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn task(name: &str, deps: &[&str]) -> Task {
        Task {
            name: name.to_string(),
            command: vec!["true".to_string()],
            inputs: Vec::new(),
            outputs: Vec::new(),
            tools: BTreeMap::new(),
            dependencies: deps.iter().map(|s| s.to_string()).collect(),
            environment: BTreeMap::new(),
            working_dir: PathBuf::from("."),
            rebuild: Default::default(),
        }
    }

    #[test]
    fn topological_order_respects_edges() {
        let mut graph = Graph::new("/workspace");
        graph.add_task(task("a", &[])).unwrap();
        graph.add_task(task("b", &["a"])).unwrap();
        graph.add_task(task("c", &["a"])).unwrap();
        let validated = graph.validate().unwrap();
        let names: Vec<&str> = validated.walk().map(|t| t.name.as_str()).collect();
        assert_eq!(names[0], "a");
        assert!(names[1..].contains(&"b"));
        assert!(names[1..].contains(&"c"));
        // alphabetical tie-break at equal depth
        assert_eq!(&names[1..], &["b", "c"]);
    }

    #[test]
    fn validate_is_deterministic() {
        let build = || {
            let mut graph = Graph::new("/workspace");
            graph.add_task(task("z", &[])).unwrap();
            graph.add_task(task("y", &[])).unwrap();
            graph.add_task(task("x", &["y", "z"])).unwrap();
            graph.validate().unwrap()
        };
        let first: Vec<String> = build().walk().map(|t| t.name.clone()).collect();
        let second: Vec<String> = build().walk().map(|t| t.name.clone()).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn missing_dependency_is_rejected() {
        let mut graph = Graph::new("/workspace");
        graph.add_task(task("a", &["ghost"])).unwrap();
        let err = graph.validate().unwrap_err();
        assert!(matches!(err, Error::MissingDependency { .. }));
    }

    #[test]
    fn cycle_is_rejected() {
        let mut graph = Graph::new("/workspace");
        graph.add_task(task("a", &["b"])).unwrap();
        graph.add_task(task("b", &["a"])).unwrap();
        let err = graph.validate().unwrap_err();
        assert!(matches!(err, Error::CycleDetected(_)));
    }

    #[test]
    fn duplicate_task_name_is_rejected() {
        let mut graph = Graph::new("/workspace");
        graph.add_task(task("a", &[])).unwrap();
        let err = graph.add_task(task("a", &[])).unwrap_err();
        assert!(matches!(err, Error::TaskAlreadyExists(_)));
    }

    #[test]
    fn dependents_are_tracked() {
        let mut graph = Graph::new("/workspace");
        graph.add_task(task("a", &[])).unwrap();
        graph.add_task(task("b", &["a"])).unwrap();
        graph.add_task(task("c", &["a"])).unwrap();
        let validated = graph.validate().unwrap();
        let names: Vec<&str> = validated
            .dependents_of("a")
            .iter()
            .map(|t| t.name.as_str())
            .collect();
        assert_eq!(names, vec!["b", "c"]);
    }
}
