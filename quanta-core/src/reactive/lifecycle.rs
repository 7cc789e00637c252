//! Atom Lifecycle
//!
//! An atom has state only while something justifies it: a consumer attached
//! to it, or a dependent whose last computation read it. Attaching
//! materializes the atom and its dependencies; losing the last reference
//! makes it an orphan, and orphans are swept when the transaction commits.
//!
//! Sweeping cascades. Removing an atom drops its edges, which can leave its
//! dependencies unreferenced in turn.

use std::collections::VecDeque;
use std::sync::Arc;

use super::transaction::Transaction;
use crate::atom::{AtomDef, AtomId, ConsumerId};
use crate::error::AtomError;
use crate::graph::{GraphStore, GraphView};

impl Transaction {
    /// Retain `def` on behalf of `consumer`, materializing it if needed.
    ///
    /// Fails when a freshly created atom could not compute its first value.
    pub(crate) fn attach(&mut self, def: &Arc<AtomDef>, consumer: ConsumerId) -> Result<(), AtomError> {
        let created = self.materialize(def)?;
        if created {
            if let Some(err) = self.node(def.id).and_then(|state| state.error()) {
                return Err(err.clone());
            }
        }

        let state = self.state_mut(def.id);
        let first = state.consumers().is_empty();
        if state.add_consumer(consumer) && first {
            tracing::debug!(atom = %def.id, consumer = %consumer, "retained");
        }
        Ok(())
    }

    /// Release `consumer`'s hold on `atom`.
    ///
    /// Releasing an atom or consumer that is not attached is ignored.
    pub(crate) fn detach(&mut self, atom: AtomId, consumer: ConsumerId) {
        let Some(state) = self.node_mut(atom) else {
            tracing::warn!(atom = %atom, consumer = %consumer, "detach from atom without state");
            return;
        };
        if !state.remove_consumer(consumer) {
            tracing::warn!(atom = %atom, consumer = %consumer, "detach by unknown consumer");
            return;
        }
        if state.consumers().is_empty() {
            tracing::debug!(atom = %atom, "released by last consumer");
        }
        self.orphans.insert(atom);
    }

    /// Remove every orphan that is still unreferenced, cascading into its
    /// dependencies. Atoms written in this transaction are kept.
    pub(super) fn sweep(&mut self) {
        let mut queue: VecDeque<AtomId> = self.orphans.drain(..).collect();
        while let Some(atom) = queue.pop_front() {
            let Some(state) = self.node(atom) else {
                continue;
            };
            if state.is_referenced() || self.written.contains(&atom) {
                continue;
            }
            let deps: Vec<AtomId> = state.dependencies().iter().copied().collect();
            for dep in deps {
                if let Some(dep_state) = self.node_mut(dep) {
                    dep_state.remove_dependent(atom);
                }
                queue.push_back(dep);
            }
            if let Some(state) = self.node_mut(atom) {
                state.set_dependencies(Default::default());
            }
            self.remove_state(atom);
        }
    }

    fn remove_state(&mut self, atom: AtomId) {
        if let Some(state) = self.node(atom) {
            assert!(
                !state.is_referenced(),
                "removing atom {atom} while it is still referenced"
            );
        }
        self.touched.remove(&atom);
        self.removed.insert(atom);
        self.dirty.shift_remove(&atom);
        tracing::trace!(atom = %atom, "collected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::Atom;
    use crate::config::EngineConfig;
    use crate::reactive::action::UpdateFn;
    use crate::store::Snapshot;

    fn tx() -> Transaction {
        Transaction::new(Arc::new(Snapshot::default()), EngineConfig::default())
    }

    fn chain() -> (Atom<i32>, Atom<i32>, Atom<i32>) {
        let base = Atom::new(1);
        let mid = Atom::derived({
            let base = base.clone();
            move |get| Ok(get.get(&base)? + 1)
        });
        let top = Atom::derived({
            let mid = mid.clone();
            move |get| Ok(get.get(&mid)? * 10)
        });
        (base, mid, top)
    }

    #[test]
    fn attach_materializes_dependencies() {
        let (base, mid, top) = chain();
        let mut tx = tx();
        tx.attach(top.def(), ConsumerId::new()).unwrap();

        for atom in [base.id(), mid.id(), top.id()] {
            assert!(tx.node(atom).is_some());
        }
    }

    #[test]
    fn detach_collects_whole_chain() {
        let (base, mid, top) = chain();
        let consumer = ConsumerId::new();
        let mut tx = tx();
        tx.attach(top.def(), consumer).unwrap();
        tx.detach(top.id(), consumer);
        tx.sweep();

        for atom in [base.id(), mid.id(), top.id()] {
            assert!(tx.node(atom).is_none());
        }
    }

    #[test]
    fn shared_dependency_survives_partial_detach() {
        let (base, mid, top) = chain();
        let other = Atom::derived({
            let base = base.clone();
            move |get| get.get(&base)
        });
        let consumer = ConsumerId::new();
        let mut tx = tx();
        tx.attach(top.def(), consumer).unwrap();
        tx.attach(other.def(), consumer).unwrap();
        tx.detach(top.id(), consumer);
        tx.sweep();

        assert!(tx.node(top.id()).is_none());
        assert!(tx.node(mid.id()).is_none());
        let base_state = tx.node(base.id()).unwrap();
        assert_eq!(base_state.dependents().len(), 1);
        assert!(base_state.dependents().contains(&other.id()));
    }

    #[test]
    fn unknown_detach_is_ignored() {
        let atom = Atom::new(0);
        let mut tx = tx();
        tx.detach(atom.id(), ConsumerId::new());
        tx.attach(atom.def(), ConsumerId::new()).unwrap();
        tx.detach(atom.id(), ConsumerId::new());
        tx.sweep();
        assert!(tx.node(atom.id()).is_some());
    }

    #[test]
    fn written_atoms_survive_sweep() {
        let atom = Atom::new(0);
        let mut tx = tx();
        tx.update(atom.def(), UpdateFn::Replace(crate::atom::erase(5)))
            .unwrap();
        tx.sweep();
        assert!(tx.node(atom.id()).is_some());
    }

    #[test]
    fn attach_surfaces_first_computation_error() {
        let failing = Atom::<i32>::derived(|_get| Err(AtomError::message("boom")));
        let mut tx = tx();
        let err = tx.attach(failing.def(), ConsumerId::new()).unwrap_err();
        assert_eq!(err, AtomError::message("boom"));
    }
}
