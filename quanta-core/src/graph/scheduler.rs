//! Update Scheduler
//!
//! The scheduler determines the order in which invalidated atoms are
//! refreshed. It ensures that dependencies are always refreshed before their
//! dependents.
//!
//! # Algorithm
//!
//! 1. When atoms change, collect all their transitive dependents (BFS over
//!    dependent edges). These are the dirty atoms.
//! 2. Sort the dirty atoms topologically (Kahn's algorithm, counting only
//!    edges inside the dirty set).
//! 3. The transaction refreshes each in order: it recomputes only if one of
//!    its dependencies actually changed, so an unchanged result stops the
//!    branch.

use std::collections::{HashMap, HashSet, VecDeque};

use super::GraphView;
use crate::atom::AtomId;

/// Orders invalidated atoms over a read-only view of the graph.
pub(crate) struct UpdateScheduler<'g, G> {
    graph: &'g G,
}

impl<'g, G: GraphView> UpdateScheduler<'g, G> {
    pub(crate) fn new(graph: &'g G) -> Self {
        Self { graph }
    }

    /// Collect every transitive dependent of `sources`.
    ///
    /// The sources themselves are not included.
    pub(crate) fn collect_dependents<I>(&self, sources: I) -> Vec<AtomId>
    where
        I: IntoIterator<Item = AtomId>,
    {
        let mut found = Vec::new();
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();

        for source in sources {
            if let Some(state) = self.graph.node(source) {
                queue.extend(state.dependents().iter().copied());
            }
        }

        while let Some(atom) = queue.pop_front() {
            if !visited.insert(atom) {
                continue;
            }
            if let Some(state) = self.graph.node(atom) {
                found.push(atom);
                queue.extend(state.dependents().iter().copied());
            }
        }

        found
    }

    /// Perform a topological sort of the given atoms.
    ///
    /// Returns atoms in order such that dependencies come before dependents.
    /// Atoms caught in a cycle are appended last in their input order.
    pub(crate) fn topological_order(&self, atoms: Vec<AtomId>) -> Vec<AtomId> {
        let atom_set: HashSet<_> = atoms.iter().copied().collect();
        let mut in_degree: HashMap<AtomId, usize> = HashMap::new();
        let mut result = Vec::with_capacity(atoms.len());
        let mut queue = VecDeque::new();

        // Calculate in-degrees (only counting edges within the atom set)
        for &atom in &atoms {
            if let Some(state) = self.graph.node(atom) {
                let degree = state
                    .dependencies()
                    .iter()
                    .filter(|d| atom_set.contains(d))
                    .count();
                in_degree.insert(atom, degree);
                if degree == 0 {
                    queue.push_back(atom);
                }
            }
        }

        // Kahn's algorithm
        while let Some(atom) = queue.pop_front() {
            result.push(atom);

            if let Some(state) = self.graph.node(atom) {
                for dependent in state.dependents() {
                    if let Some(degree) = in_degree.get_mut(dependent) {
                        if *degree == 0 {
                            continue;
                        }
                        *degree -= 1;
                        if *degree == 0 {
                            queue.push_back(*dependent);
                        }
                    }
                }
            }
        }

        if result.len() < in_degree.len() {
            let placed: HashSet<_> = result.iter().copied().collect();
            result.extend(
                atoms
                    .iter()
                    .copied()
                    .filter(|a| in_degree.contains_key(a) && !placed.contains(a)),
            );
        }

        result
    }
}
