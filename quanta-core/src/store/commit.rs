//! Commit notifications handed to the binding layer.

use std::sync::Arc;

use super::snapshot::Snapshot;
use crate::atom::{Atom, AtomId};

/// A newly published snapshot and the atoms it changed.
#[derive(Debug, Clone)]
pub struct Commit {
    snapshot: Arc<Snapshot>,
    changed: Arc<[AtomId]>,
}

impl Default for Commit {
    fn default() -> Self {
        Self::new(Arc::new(Snapshot::default()), Vec::new())
    }
}

impl Commit {
    pub(crate) fn new(snapshot: Arc<Snapshot>, changed: Vec<AtomId>) -> Self {
        Self {
            snapshot,
            changed: changed.into(),
        }
    }

    pub fn revision(&self) -> u64 {
        self.snapshot.revision()
    }

    pub fn snapshot(&self) -> &Arc<Snapshot> {
        &self.snapshot
    }

    /// Atoms whose value or status changed, or that were created or removed.
    pub fn changed(&self) -> &[AtomId] {
        &self.changed
    }

    /// Whether consumers of `atom` need to re-render.
    pub fn affects<T>(&self, atom: &Atom<T>) -> bool {
        self.changed.contains(&atom.id())
    }
}
