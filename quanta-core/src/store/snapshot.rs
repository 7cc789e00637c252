//! Snapshots
//!
//! A snapshot is one immutable mapping from atom to state. Transactions never
//! mutate a published snapshot: they copy the entries they touch and commit a
//! new map that shares every other entry with its predecessor.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::loadable::{load, Loadable};
use crate::atom::{Atom, AtomId, AtomValue};
use crate::graph::tracker::check_edges;
use crate::graph::{AtomState, GraphView, GraphViolation};

pub(crate) type StateMap = HashMap<AtomId, Arc<AtomState>>;

/// The store's state at one instant.
#[derive(Clone, Default)]
pub struct Snapshot {
    revision: u64,
    states: Arc<StateMap>,
}

impl Snapshot {
    pub(crate) fn new(revision: u64, states: Arc<StateMap>) -> Self {
        Self { revision, states }
    }

    /// Monotonic revision; every commit produces a higher one.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Number of live atoms.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Whether the atom currently has state.
    pub fn contains<T>(&self, atom: &Atom<T>) -> bool {
        self.states.contains_key(&atom.id())
    }

    /// Get the state of an atom by ID.
    pub fn state(&self, atom: AtomId) -> Option<&AtomState> {
        self.states.get(&atom).map(|state| &**state)
    }

    /// IDs of all live atoms.
    pub fn atoms(&self) -> impl Iterator<Item = AtomId> + '_ {
        self.states.keys().copied()
    }

    /// Read an atom's value as of this snapshot.
    pub fn read<T: AtomValue>(&self, atom: &Atom<T>) -> Loadable<T> {
        load(atom.def(), self.state(atom.id()))
    }

    /// Verify that every edge is mirrored on both ends.
    pub fn check_consistency(&self) -> Result<(), GraphViolation> {
        check_edges(self, self.atoms())
    }

    pub(crate) fn states(&self) -> &Arc<StateMap> {
        &self.states
    }

    /// Whether both snapshots hold the very same state entry for `atom`.
    pub fn shares_state_with(&self, other: &Snapshot, atom: AtomId) -> bool {
        match (self.states.get(&atom), other.states.get(&atom)) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl GraphView for Snapshot {
    fn node(&self, atom: AtomId) -> Option<&AtomState> {
        self.state(atom)
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("revision", &self.revision)
            .field("atoms", &self.states.len())
            .finish()
    }
}
