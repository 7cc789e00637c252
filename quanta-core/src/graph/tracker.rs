//! Dependency Tracker
//!
//! After each computation the set of atoms actually read is diffed against
//! the previous dependency set. Only the difference touches the graph:
//! dropped edges are removed from both ends, new edges are added to both
//! ends. Dependencies can change between computations (conditional reads),
//! so the diff is recomputed every time.

use indexmap::IndexSet;
use smallvec::SmallVec;

use super::{GraphStore, GraphView};
use crate::atom::AtomId;

/// Edges changed by one dependency update.
#[derive(Debug, Default)]
pub(crate) struct EdgeDiff {
    pub(crate) added: SmallVec<[AtomId; 4]>,
    pub(crate) removed: SmallVec<[AtomId; 4]>,
}

impl EdgeDiff {
    pub(crate) fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// A broken mirror between dependencies and dependents.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("graph invariant violated at atom {atom}: {detail}")]
pub struct GraphViolation {
    pub atom: AtomId,
    pub detail: String,
}

/// Replace `atom`'s dependencies with `observed`, mirroring every change on
/// the other end of the edge.
///
/// Every observed atom must already have a state.
pub(crate) fn update_dependencies<G, I>(graph: &mut G, atom: AtomId, observed: I) -> EdgeDiff
where
    G: GraphStore,
    I: IntoIterator<Item = AtomId>,
{
    let next: IndexSet<AtomId> = observed.into_iter().filter(|d| *d != atom).collect();
    let Some(state) = graph.node_mut(atom) else {
        return EdgeDiff::default();
    };

    let previous = state.dependencies().clone();
    let mut diff = EdgeDiff::default();
    for dep in &previous {
        if !next.contains(dep) {
            diff.removed.push(*dep);
        }
    }
    for dep in &next {
        if !previous.contains(dep) {
            diff.added.push(*dep);
        }
    }
    state.set_dependencies(next);

    for dep in &diff.removed {
        if let Some(dep_state) = graph.node_mut(*dep) {
            dep_state.remove_dependent(atom);
        }
    }
    for dep in &diff.added {
        graph
            .node_mut(*dep)
            .unwrap_or_else(|| panic!("dependency {dep} of atom {atom} has no state"))
            .add_dependent(atom);
    }

    if !diff.is_empty() {
        tracing::trace!(
            atom = %atom,
            added = ?diff.added,
            removed = ?diff.removed,
            "dependencies updated"
        );
    }
    diff
}

/// Check that every edge among `atoms` is mirrored on both ends.
pub(crate) fn check_edges<G, I>(graph: &G, atoms: I) -> Result<(), GraphViolation>
where
    G: GraphView,
    I: IntoIterator<Item = AtomId>,
{
    for atom in atoms {
        let Some(state) = graph.node(atom) else {
            continue;
        };
        for dep in state.dependencies() {
            let mirrored = graph
                .node(*dep)
                .map(|d| d.dependents().contains(&atom))
                .unwrap_or(false);
            if !mirrored {
                return Err(GraphViolation {
                    atom,
                    detail: format!("dependency {dep} does not list it as a dependent"),
                });
            }
        }
        for dependent in state.dependents() {
            let mirrored = graph
                .node(*dependent)
                .map(|d| d.dependencies().contains(&atom))
                .unwrap_or(false);
            if !mirrored {
                return Err(GraphViolation {
                    atom,
                    detail: format!("dependent {dependent} does not list it as a dependency"),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::Atom;
    use crate::graph::AtomState;
    use std::collections::HashMap;

    fn graph_of(n: usize) -> (HashMap<AtomId, AtomState>, Vec<AtomId>) {
        let mut graph = HashMap::new();
        let mut ids = Vec::new();
        for i in 0..n {
            let atom = Atom::new(i);
            ids.push(atom.id());
            graph.insert(atom.id(), AtomState::new(atom.def().clone()));
        }
        (graph, ids)
    }

    #[test]
    fn adds_mirrored_edges() {
        let (mut graph, ids) = graph_of(3);
        let diff = update_dependencies(&mut graph, ids[2], [ids[0], ids[1]]);

        assert_eq!(diff.added.as_slice(), &[ids[0], ids[1]]);
        assert!(diff.removed.is_empty());
        assert!(graph[&ids[0]].dependents().contains(&ids[2]));
        assert!(graph[&ids[1]].dependents().contains(&ids[2]));
        assert!(check_edges(&graph, ids.clone()).is_ok());
    }

    #[test]
    fn diff_removes_dropped_edges_only() {
        let (mut graph, ids) = graph_of(4);
        update_dependencies(&mut graph, ids[3], [ids[0], ids[1]]);
        let diff = update_dependencies(&mut graph, ids[3], [ids[1], ids[2]]);

        assert_eq!(diff.added.as_slice(), &[ids[2]]);
        assert_eq!(diff.removed.as_slice(), &[ids[0]]);
        assert!(!graph[&ids[0]].dependents().contains(&ids[3]));
        assert!(graph[&ids[1]].dependents().contains(&ids[3]));
        assert!(check_edges(&graph, ids.clone()).is_ok());
    }

    #[test]
    fn self_reads_are_not_edges() {
        let (mut graph, ids) = graph_of(1);
        let diff = update_dependencies(&mut graph, ids[0], [ids[0]]);
        assert!(diff.is_empty());
        assert!(graph[&ids[0]].dependencies().is_empty());
    }

    #[test]
    fn check_edges_reports_one_sided_edge() {
        let (mut graph, ids) = graph_of(2);
        graph
            .get_mut(&ids[0])
            .unwrap()
            .add_dependent(ids[1]);

        let err = check_edges(&graph, ids.clone()).unwrap_err();
        assert_eq!(err.atom, ids[0]);
    }
}
