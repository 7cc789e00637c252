//! Dependency Graph
//!
//! This module implements the graph that tracks relationships between atoms.
//!
//! # Overview
//!
//! The dependency graph is a directed acyclic graph (DAG) where:
//!
//! - Nodes are live atoms, one `AtomState` each
//! - Edges are dependencies: if A read B during its last computation, A
//!   lists B as a dependency and B lists A as a dependent
//!
//! Both directions are kept so invalidation can walk dependents and garbage
//! collection can walk dependencies. Every edge change goes through the
//! tracker, which updates both ends together.
//!
//! The graph itself lives inside store snapshots; the traits here let the
//! tracker and scheduler run over a committed snapshot or over a transaction
//! in progress.

mod scheduler;
mod state;
pub(crate) mod tracker;

pub use state::{AtomState, AtomStatus};
pub use tracker::GraphViolation;

pub(crate) use scheduler::UpdateScheduler;
pub(crate) use state::Status;

use crate::atom::AtomId;

/// Read access to atom states.
pub(crate) trait GraphView {
    fn node(&self, atom: AtomId) -> Option<&AtomState>;
}

/// Mutable access to atom states.
pub(crate) trait GraphStore: GraphView {
    fn node_mut(&mut self, atom: AtomId) -> Option<&mut AtomState>;
}

#[cfg(test)]
impl GraphView for std::collections::HashMap<AtomId, AtomState> {
    fn node(&self, atom: AtomId) -> Option<&AtomState> {
        self.get(&atom)
    }
}

#[cfg(test)]
impl GraphStore for std::collections::HashMap<AtomId, AtomState> {
    fn node_mut(&mut self, atom: AtomId) -> Option<&mut AtomState> {
        self.get_mut(&atom)
    }
}
