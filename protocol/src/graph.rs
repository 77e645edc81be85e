//! Task dependency graph.
//!
//! A [`TaskGraph`] records the "depends on" relationships between the tasks
//! of a job, each task represented by its position. Cycles are rejected at
//! construction, making the graph a DAG. The graph tracks which positions
//! are *available* — not yet done and with every dependency done — which is
//! exactly the set the dispatch layer may group into a bundle.

use {
    crate::error::{ProtocolError, Result},
    std::collections::{BTreeSet, HashMap, HashSet, VecDeque},
};

/// A DAG over task positions with done-propagation.
#[derive(Debug, Clone, Default)]
pub struct TaskGraph {
    /// Position → its declared dependencies.
    dependencies: HashMap<u32, Vec<u32>>,
    /// Position → the positions that depend on it.
    dependants: HashMap<u32, Vec<u32>>,
    /// Position → its not-yet-done dependencies.
    remaining: HashMap<u32, HashSet<u32>>,
    /// Not-done positions with no pending dependencies, in position order.
    available: BTreeSet<u32>,
    /// Positions that have completed or been cancelled.
    done: HashSet<u32>,
}

impl TaskGraph {
    /// Build a graph from `(position, dependency positions)` pairs.
    ///
    /// Every position referenced as a dependency must itself appear as a
    /// node. Returns an error on unknown positions or dependency cycles.
    pub fn new(nodes: &[(u32, Vec<u32>)]) -> Result<Self> {
        let mut graph = Self::default();
        for (position, deps) in nodes {
            graph.dependencies.insert(*position, deps.clone());
        }
        for (position, deps) in nodes {
            for dep in deps {
                if !graph.dependencies.contains_key(dep) {
                    return Err(ProtocolError::UnknownPosition(*dep));
                }
                graph
                    .dependants
                    .entry(*dep)
                    .or_default()
                    .push(*position);
                graph
                    .remaining
                    .entry(*position)
                    .or_default()
                    .insert(*dep);
            }
            if deps.is_empty() {
                graph.available.insert(*position);
            }
        }
        graph.check_acyclic()?;
        Ok(graph)
    }

    /// Kahn-style topological pass; any node left unvisited sits on a cycle.
    fn check_acyclic(&self) -> Result<()> {
        let mut in_degree: HashMap<u32, usize> = self
            .dependencies
            .iter()
            .map(|(pos, deps)| (*pos, deps.len()))
            .collect();
        let mut queue: VecDeque<u32> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(pos, _)| *pos)
            .collect();
        let mut visited = 0usize;
        while let Some(pos) = queue.pop_front() {
            visited = visited.saturating_add(1);
            if let Some(dependants) = self.dependants.get(&pos) {
                for dependant in dependants {
                    let degree = in_degree.entry(*dependant).or_insert(0);
                    *degree = degree.saturating_sub(1);
                    if *degree == 0 {
                        queue.push_back(*dependant);
                    }
                }
            }
        }
        if visited < self.dependencies.len() {
            let on_cycle = self
                .dependencies
                .keys()
                .find(|pos| in_degree.get(pos).is_some_and(|d| *d > 0))
                .copied()
                .unwrap_or_default();
            return Err(ProtocolError::DependencyCycle(on_cycle));
        }
        Ok(())
    }

    /// Number of nodes in the graph.
    pub fn len(&self) -> usize {
        self.dependencies.len()
    }

    /// Whether the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }

    /// Mark a task as done (completed or cancelled) and release any
    /// dependants whose last pending dependency it was.
    pub fn node_done(&mut self, position: u32) {
        if !self.dependencies.contains_key(&position) || !self.done.insert(position) {
            return;
        }
        self.available.remove(&position);
        if let Some(dependants) = self.dependants.get(&position) {
            for dependant in dependants.clone() {
                let released = match self.remaining.get_mut(&dependant) {
                    Some(pending) => {
                        pending.remove(&position);
                        pending.is_empty()
                    }
                    None => false,
                };
                if released && !self.done.contains(&dependant) {
                    self.available.insert(dependant);
                }
            }
        }
    }

    /// Not-done positions whose dependencies are all done, in position order.
    pub fn available(&self) -> impl Iterator<Item = u32> + '_ {
        self.available.iter().copied()
    }

    /// Whether `position` may currently be dispatched.
    pub fn is_available(&self, position: u32) -> bool {
        self.available.contains(&position)
    }

    /// Whether `position` is a node of this graph. Positions outside the
    /// graph are not dependency-gated.
    pub fn contains(&self, position: u32) -> bool {
        self.dependencies.contains_key(&position)
    }

    /// The declared dependencies of `position`.
    pub fn dependencies_of(&self, position: u32) -> &[u32] {
        self.dependencies
            .get(&position)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Whether any other task depends on `position`.
    pub fn has_dependants(&self, position: u32) -> bool {
        self.dependants
            .get(&position)
            .is_some_and(|d| !d.is_empty())
    }

    /// Whether every node in the graph is done.
    pub fn is_done(&self) -> bool {
        self.done.len() >= self.dependencies.len()
    }

    /// The count of completed tasks.
    pub fn done_count(&self) -> usize {
        self.done.len()
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
