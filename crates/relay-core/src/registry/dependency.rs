//! Dependency graph for managing task prerequisites.
//!
//! Design:
//! - Forward edges: task -> prerequisites it still waits for
//! - Reverse edges: task -> tasks that wait for it
//! - Invariant: edges and reverse_edges must be kept in sync

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

use crate::domain::TaskId;

/// Dependency graph for tracking unresolved prerequisites.
///
/// An edge is removed as soon as its prerequisite completes, so a task with
/// no forward edges left is ready to run.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    /// Forward edges: task -> tasks it depends on (waits for)
    edges: HashMap<TaskId, HashSet<TaskId>>,

    /// Reverse edges: task -> tasks that depend on it (waiting tasks)
    reverse_edges: HashMap<TaskId, HashSet<TaskId>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    /// On the current DFS path.
    Gray,
    /// Fully explored.
    Black,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// `task` depends on `depends_on` ("B waits for A" is `add_dependency(b, a)`).
    pub fn add_dependency(&mut self, task: TaskId, depends_on: TaskId) {
        self.edges.entry(task).or_default().insert(depends_on);
        self.reverse_edges
            .entry(depends_on)
            .or_default()
            .insert(task);
    }

    /// `task` no longer depends on `depends_on`.
    pub fn remove_dependency(&mut self, task: TaskId, depends_on: TaskId) {
        if let Entry::Occupied(mut e) = self.edges.entry(task) {
            e.get_mut().remove(&depends_on);
            if e.get().is_empty() {
                e.remove_entry();
            }
        }
        if let Entry::Occupied(mut e) = self.reverse_edges.entry(depends_on) {
            e.get_mut().remove(&task);
            if e.get().is_empty() {
                e.remove_entry();
            }
        }
    }

    /// Drop every edge touching `task`, in both directions.
    pub fn remove_task(&mut self, task: TaskId) {
        for dep in self.get_dependencies(task) {
            self.remove_dependency(task, dep);
        }
        for waiting in self.get_waiting_tasks(task) {
            self.remove_dependency(waiting, task);
        }
    }

    /// Tasks waiting for `task`. Some may still wait for other prerequisites.
    pub fn get_waiting_tasks(&self, task: TaskId) -> Vec<TaskId> {
        let mut waiting: Vec<TaskId> = self
            .reverse_edges
            .get(&task)
            .map(|waiting| waiting.iter().copied().collect())
            .unwrap_or_default();
        waiting.sort();
        waiting
    }

    pub fn has_dependencies(&self, task: TaskId) -> bool {
        self.edges
            .get(&task)
            .map(|deps| !deps.is_empty())
            .unwrap_or(false)
    }

    pub fn get_dependencies(&self, task: TaskId) -> Vec<TaskId> {
        let mut deps: Vec<TaskId> = self
            .edges
            .get(&task)
            .map(|deps| deps.iter().copied().collect())
            .unwrap_or_default();
        deps.sort();
        deps
    }

    /// Every task that transitively waits for `task`, nearest first.
    pub fn transitive_dependents(&self, task: TaskId) -> Vec<TaskId> {
        let mut seen = HashSet::new();
        let mut order = Vec::new();
        let mut frontier = std::collections::VecDeque::from([task]);
        while let Some(current) = frontier.pop_front() {
            for waiting in self.get_waiting_tasks(current) {
                if seen.insert(waiting) {
                    order.push(waiting);
                    frontier.push_back(waiting);
                }
            }
        }
        order
    }

    /// Detect a cycle in the dependency graph.
    ///
    /// Returns the nodes of the first cycle found in edge order
    /// (`[a, b, a]` for `a -> b -> a`), or `None` for a DAG.
    ///
    /// 3 色 DFS: Gray = 探索中のパス上, Black = 探索済み。
    /// Gray への辺が見つかったらそこが閉路。O(V + E)。
    pub fn detect_cycle(&self) -> Option<Vec<TaskId>> {
        let mut colors: HashMap<TaskId, Color> = HashMap::new();
        let mut starts: Vec<TaskId> = self.edges.keys().copied().collect();
        starts.sort();

        for start in starts {
            if colors.contains_key(&start) {
                continue;
            }
            let mut path = Vec::new();
            if let Some(cycle) = self.dfs_cycle(start, &mut colors, &mut path) {
                return Some(cycle);
            }
        }
        None
    }

    fn dfs_cycle(
        &self,
        node: TaskId,
        colors: &mut HashMap<TaskId, Color>,
        path: &mut Vec<TaskId>,
    ) -> Option<Vec<TaskId>> {
        colors.insert(node, Color::Gray);
        path.push(node);

        for dep in self.get_dependencies(node) {
            match colors.get(&dep) {
                Some(Color::Gray) => {
                    let start = path.iter().position(|&n| n == dep).unwrap_or(0);
                    let mut cycle = path[start..].to_vec();
                    cycle.push(dep);
                    return Some(cycle);
                }
                Some(Color::Black) => {}
                None => {
                    if let Some(cycle) = self.dfs_cycle(dep, colors, path) {
                        return Some(cycle);
                    }
                }
            }
        }

        colors.insert(node, Color::Black);
        path.pop();
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u128) -> TaskId {
        TaskId::from_u128(n)
    }

    #[test]
    fn new_graph_is_empty() {
        let graph = DependencyGraph::new();
        assert!(!graph.has_dependencies(id(1)));
    }

    #[test]
    fn add_dependency_creates_forward_and_reverse_edges() {
        let mut graph = DependencyGraph::new();
        let (a, b) = (id(1), id(2));

        graph.add_dependency(b, a); // B depends on A

        assert!(graph.has_dependencies(b));
        assert!(!graph.has_dependencies(a));
        assert_eq!(graph.get_dependencies(b), vec![a]);
        assert_eq!(graph.get_waiting_tasks(a), vec![b]);
    }

    #[test]
    fn remove_dependency_removes_both_edges() {
        let mut graph = DependencyGraph::new();
        let (a, b) = (id(1), id(2));

        graph.add_dependency(b, a);
        graph.remove_dependency(b, a);

        assert!(!graph.has_dependencies(b));
        assert!(graph.get_waiting_tasks(a).is_empty());
    }

    #[test]
    fn multiple_dependencies() {
        let mut graph = DependencyGraph::new();
        let (a, b, c) = (id(1), id(2), id(3));

        // C depends on both A and B
        graph.add_dependency(c, a);
        graph.add_dependency(c, b);
        graph.remove_dependency(c, a);

        assert!(graph.has_dependencies(c));
        assert_eq!(graph.get_dependencies(c), vec![b]);
    }

    #[test]
    fn transitive_dependents_follow_the_chain() {
        let mut graph = DependencyGraph::new();
        let (a, b, c, d) = (id(1), id(2), id(3), id(4));
        graph.add_dependency(b, a);
        graph.add_dependency(c, b);
        graph.add_dependency(d, c);

        assert_eq!(graph.transitive_dependents(a), vec![b, c, d]);
        assert!(graph.transitive_dependents(d).is_empty());
    }

    #[test]
    fn detect_simple_cycle() {
        let mut graph = DependencyGraph::new();
        let (a, b) = (id(1), id(2));

        graph.add_dependency(a, b);
        graph.add_dependency(b, a);

        assert_eq!(graph.detect_cycle(), Some(vec![a, b, a]));
    }

    #[test]
    fn detect_self_dependency() {
        let mut graph = DependencyGraph::new();
        let a = id(1);
        graph.add_dependency(a, a);

        assert_eq!(graph.detect_cycle(), Some(vec![a, a]));
    }

    #[test]
    fn detect_longer_cycle() {
        let mut graph = DependencyGraph::new();
        let (a, b, c, d) = (id(1), id(2), id(3), id(4));

        // cycle: B -> C -> D -> B, A hangs off it
        graph.add_dependency(b, a);
        graph.add_dependency(c, b);
        graph.add_dependency(d, c);
        graph.add_dependency(b, d);

        let cycle = graph.detect_cycle().unwrap();
        assert_eq!(cycle.first(), cycle.last());
        assert_eq!(cycle.len(), 4);
        assert!(!cycle.contains(&a));
    }

    #[test]
    fn no_cycle_in_chain() {
        let mut graph = DependencyGraph::new();
        let (a, b, c) = (id(1), id(2), id(3));
        graph.add_dependency(b, a);
        graph.add_dependency(c, b);

        assert!(graph.detect_cycle().is_none());
    }

    #[test]
    fn diamond_is_not_a_cycle() {
        let mut graph = DependencyGraph::new();
        let (a, b, c, d) = (id(1), id(2), id(3), id(4));

        // A -> B -> D, A -> C -> D (paths converge at D)
        graph.add_dependency(b, a);
        graph.add_dependency(c, a);
        graph.add_dependency(d, b);
        graph.add_dependency(d, c);

        assert!(graph.detect_cycle().is_none());
    }

    #[test]
    fn complex_dag_with_cross_edges_is_not_a_cycle() {
        let mut graph = DependencyGraph::new();
        let (a, b, c, d, e) = (id(1), id(2), id(3), id(4), id(5));

        graph.add_dependency(b, a);
        graph.add_dependency(c, a);
        graph.add_dependency(d, b);
        graph.add_dependency(e, b);
        graph.add_dependency(d, c);
        graph.add_dependency(e, c);
        graph.add_dependency(e, a);

        assert!(graph.detect_cycle().is_none());
    }
}
