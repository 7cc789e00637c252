//! Transactions
//!
//! Every store operation runs as one transaction over the current snapshot.
//! The transaction copies each state it mutates into a private overlay, so
//! the published snapshot is never touched. Committing folds the overlay into
//! a new snapshot; dropping the transaction instead discards every effect.
//!
//! # Propagation
//!
//! A write marks the written atom's transitive dependents dirty. Propagation
//! then refreshes the dirty atoms in topological order. Refreshing an atom
//! first refreshes its dirty dependencies, then recomputes only if one of
//! them changed after the atom was last computed. A recomputation that
//! yields an equal value is not a change, so the branch below it stops there.
//!
//! Reads during a computation pull their dependencies fresh the same way,
//! so a computation never sees a value from before the current write.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use indexmap::IndexSet;
use smallvec::SmallVec;

use super::action::UpdateFn;
use super::context::{Batch, ReadContext, WriteContext};
use crate::atom::{downcast, AtomDef, AtomId, AtomValue, Computation, Reader, Value, Writer};
use crate::config::{EngineConfig, PendingReadPolicy};
use crate::error::AtomError;
use crate::graph::tracker::update_dependencies;
use crate::graph::{AtomState, GraphStore, GraphView, Status, UpdateScheduler};
use crate::store::{load, Commit, Loadable, Snapshot};

/// An async computation waiting to be driven.
pub(crate) struct PendingTask {
    pub(crate) atom: AtomId,
    pub(crate) epoch: u64,
    pub(crate) future: BoxFuture<'static, Result<Value, AtomError>>,
}

/// The asynchronous remainder of a write.
pub(crate) struct DeferredWrite {
    pub(crate) origin: AtomId,
    pub(crate) future: BoxFuture<'static, Result<Batch, AtomError>>,
}

/// What a committed transaction leaves for the store to do.
pub(crate) struct Outcome {
    /// `None` when the transaction changed nothing.
    pub(crate) commit: Option<Commit>,
    pub(crate) tasks: Vec<PendingTask>,
    pub(crate) deferred: Vec<DeferredWrite>,
}

pub(crate) struct Transaction {
    pub(super) base: Arc<Snapshot>,
    pub(super) config: EngineConfig,

    /// Copy-on-write overlay of states mutated or created here.
    pub(super) touched: HashMap<AtomId, AtomState>,
    pub(super) removed: HashSet<AtomId>,

    pub(super) dirty: IndexSet<AtomId>,
    pub(super) changed: IndexSet<AtomId>,

    /// Logical clock ordering changes and computations within this
    /// transaction. An atom is stale when a dependency changed after it was
    /// last computed.
    clock: u64,
    changed_at: HashMap<AtomId, u64>,
    computed_at: HashMap<AtomId, u64>,

    pub(super) created: IndexSet<AtomId>,
    pub(super) written: HashSet<AtomId>,

    /// Atoms that may have lost their last reference.
    pub(super) orphans: IndexSet<AtomId>,

    /// Atoms whose read function is on the stack.
    pub(super) computing: HashSet<AtomId>,

    /// First cycle detected. Fails the transaction even when a reader
    /// swallowed the error.
    cycle: Option<AtomError>,

    pub(super) tasks: Vec<PendingTask>,
    pub(super) deferred: Vec<DeferredWrite>,
}

impl GraphView for Transaction {
    fn node(&self, atom: AtomId) -> Option<&AtomState> {
        if self.removed.contains(&atom) {
            return None;
        }
        self.touched.get(&atom).or_else(|| self.base.state(atom))
    }
}

impl GraphStore for Transaction {
    fn node_mut(&mut self, atom: AtomId) -> Option<&mut AtomState> {
        if self.removed.contains(&atom) {
            return None;
        }
        if !self.touched.contains_key(&atom) {
            let copy = self.base.state(atom)?.clone();
            self.touched.insert(atom, copy);
        }
        self.touched.get_mut(&atom)
    }
}

impl Transaction {
    pub(crate) fn new(base: Arc<Snapshot>, config: EngineConfig) -> Self {
        Self {
            base,
            config,
            touched: HashMap::new(),
            removed: HashSet::new(),
            dirty: IndexSet::new(),
            changed: IndexSet::new(),
            clock: 0,
            changed_at: HashMap::new(),
            computed_at: HashMap::new(),
            created: IndexSet::new(),
            written: HashSet::new(),
            orphans: IndexSet::new(),
            computing: HashSet::new(),
            cycle: None,
            tasks: Vec::new(),
            deferred: Vec::new(),
        }
    }

    pub(super) fn state_mut(&mut self, atom: AtomId) -> &mut AtomState {
        self.node_mut(atom)
            .unwrap_or_else(|| panic!("atom {atom} has no state"))
    }

    pub(super) fn note_change(&mut self, atom: AtomId) {
        self.clock += 1;
        self.changed.insert(atom);
        self.changed_at.insert(atom, self.clock);
    }

    /// Create state for `def` if it has none, computing its first value.
    /// Returns whether a state was created.
    pub(crate) fn materialize(&mut self, def: &Arc<AtomDef>) -> Result<bool, AtomError> {
        if self.node(def.id).is_some() {
            return Ok(false);
        }
        self.removed.remove(&def.id);
        self.touched.insert(def.id, AtomState::new(Arc::clone(def)));
        self.created.insert(def.id);
        // Unreferenced until someone attaches or reads it.
        self.orphans.insert(def.id);
        tracing::trace!(atom = %def.id, label = ?def.label, "materialized");
        self.compute(def.id)?;
        Ok(true)
    }

    /// Run the atom's read function and store the result.
    ///
    /// Only a dependency cycle is returned as an error; every other failure
    /// is stored on the atom.
    pub(super) fn compute(&mut self, atom: AtomId) -> Result<(), AtomError> {
        let Some(state) = self.node(atom) else {
            return Ok(());
        };
        let def = Arc::clone(state.def());
        let read = match &def.reader {
            Reader::Stored => return Ok(()),
            Reader::Compute(read) => Arc::clone(read),
        };

        if !self.computing.insert(atom) {
            return Err(self.cycle_at(atom));
        }
        let (result, observed) = {
            let mut ctx = ReadContext::new(self, &def);
            let result = read(&mut ctx);
            (result, ctx.into_observed())
        };
        self.computing.remove(&atom);
        self.computed_at.insert(atom, self.clock);

        for dropped in update_dependencies(self, atom, observed).removed {
            self.orphans.insert(dropped);
        }

        let epoch = self.state_mut(atom).next_epoch();
        let mut cycle = None;
        let changed = match result {
            Ok(Computation::Ready(value)) => self.state_mut(atom).settle(value),
            Ok(Computation::Async(future)) => {
                self.tasks.push(PendingTask {
                    atom,
                    epoch,
                    future,
                });
                self.state_mut(atom).suspend(None)
            }
            Err(AtomError::Pending(on)) => self.state_mut(atom).suspend(Some(on)),
            Err(err) => {
                if matches!(err, AtomError::Cycle(_)) {
                    cycle = Some(err.clone());
                }
                self.state_mut(atom).reject(err)
            }
        };
        tracing::trace!(atom = %atom, epoch, changed, "computed");
        if changed {
            self.note_change(atom);
        }
        match cycle {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Bring a dirty atom up to date.
    pub(super) fn refresh(&mut self, atom: AtomId) -> Result<(), AtomError> {
        if !self.dirty.shift_remove(&atom) {
            return Ok(());
        }
        let deps: SmallVec<[AtomId; 4]> = match self.node(atom) {
            Some(state) => state.dependencies().iter().copied().collect(),
            None => return Ok(()),
        };
        for dep in &deps {
            if self.computing.contains(dep) {
                return Err(self.cycle_at(*dep));
            }
            self.refresh(*dep)?;
        }
        let since = self.computed_at.get(&atom).copied().unwrap_or(0);
        let stale = deps
            .iter()
            .any(|dep| self.changed_at.get(dep).is_some_and(|at| *at > since));
        if stale {
            self.compute(atom)?;
        }
        Ok(())
    }

    fn cycle_at(&mut self, atom: AtomId) -> AtomError {
        let err = AtomError::Cycle(atom);
        self.cycle.get_or_insert_with(|| err.clone());
        err
    }

    /// Fail if a cycle was detected anywhere in this transaction.
    pub(crate) fn check_cycles(&self) -> Result<(), AtomError> {
        match &self.cycle {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    /// Make sure `def` has an up-to-date state.
    fn read_fresh(&mut self, def: &Arc<AtomDef>) -> Result<(), AtomError> {
        if self.computing.contains(&def.id) {
            return Err(self.cycle_at(def.id));
        }
        self.materialize(def)?;
        self.refresh(def.id)
    }

    /// Value an atom sees when reading itself: the last value or the init.
    pub(super) fn load_own<T: AtomValue>(&self, def: &AtomDef) -> Loadable<T> {
        match self
            .node(def.id)
            .and_then(AtomState::value)
            .or(def.init.as_ref())
        {
            Some(value) => Loadable::Ready(downcast(value)),
            None => Loadable::Failed(AtomError::Uninitialized(def.id)),
        }
    }

    pub(super) fn load_tracked<T: AtomValue>(&mut self, def: &Arc<AtomDef>) -> Loadable<T> {
        if let Err(err) = self.read_fresh(def) {
            return Loadable::Failed(err);
        }
        load(def, self.node(def.id))
    }

    /// Current value of `def` as seen by a write function.
    pub(crate) fn current_for_write(&mut self, def: &Arc<AtomDef>) -> Result<Value, AtomError> {
        self.read_fresh(def)?;
        let state = self
            .node(def.id)
            .unwrap_or_else(|| panic!("atom {} has no state", def.id));
        match state.status_raw() {
            Status::Settled => state
                .value()
                .cloned()
                .ok_or(AtomError::Uninitialized(def.id)),
            Status::Pending { .. } => match (self.config.pending_reads_in_write, state.value()) {
                (PendingReadPolicy::Stale, Some(value)) => Ok(Arc::clone(value)),
                _ => Err(AtomError::Pending(def.id)),
            },
            Status::Rejected(err) => Err(err.clone()),
        }
    }

    /// Store `value` in the atom's own slot.
    pub(crate) fn assign(&mut self, def: &Arc<AtomDef>, value: Value) -> Result<(), AtomError> {
        self.materialize(def)?;
        let atom = def.id;
        let state = self.state_mut(atom);
        let epoch = state.next_epoch();
        let changed = state.settle(value);
        self.written.insert(atom);
        tracing::trace!(atom = %atom, epoch, changed, "assigned");
        if changed {
            self.note_change(atom);
            self.mark_dirty([atom]);
        }
        Ok(())
    }

    /// Route `value` through the atom's write function.
    pub(crate) fn write(
        &mut self,
        def: &Arc<AtomDef>,
        value: Value,
        depth: usize,
    ) -> Result<(), AtomError> {
        if depth >= self.config.max_write_depth {
            return Err(AtomError::WriteDepthExceeded {
                atom: def.id,
                depth: self.config.max_write_depth,
            });
        }
        match &def.writer {
            None => Err(AtomError::NotWritable(def.id)),
            Some(Writer::Replace) => self.assign(def, value),
            Some(Writer::Custom(write)) => {
                let write = Arc::clone(write);
                let mut ctx = WriteContext::new(self, def, depth);
                write(&mut ctx, value)
            }
        }
    }

    pub(crate) fn defer(&mut self, origin: AtomId, future: BoxFuture<'static, Result<Batch, AtomError>>) {
        self.deferred.push(DeferredWrite { origin, future });
    }

    fn mark_dirty<I>(&mut self, sources: I)
    where
        I: IntoIterator<Item = AtomId>,
    {
        let dependents = UpdateScheduler::new(&*self).collect_dependents(sources);
        self.dirty.extend(dependents);
    }

    /// Refresh every dirty atom, dependencies first.
    pub(crate) fn propagate(&mut self) -> Result<(), AtomError> {
        while !self.dirty.is_empty() {
            let dirty: Vec<AtomId> = self.dirty.iter().copied().collect();
            let order = UpdateScheduler::new(&*self).topological_order(dirty);
            if order.is_empty() {
                // Dirty atoms without state; nothing left to refresh.
                self.dirty.clear();
            }
            for atom in order {
                self.refresh(atom)?;
            }
        }
        Ok(())
    }

    /// Apply a value or a function of the current value to `def`.
    pub(crate) fn update(&mut self, def: &Arc<AtomDef>, update: UpdateFn) -> Result<(), AtomError> {
        if !def.is_writable() {
            return Err(AtomError::NotWritable(def.id));
        }
        let value = match update {
            UpdateFn::Replace(value) => value,
            UpdateFn::With(f) => {
                let current = self.current_for_write(def)?;
                f(&current)
            }
        };
        self.write(def, value, 0)?;
        self.propagate()
    }

    /// Apply every write of a batch, then propagate once.
    pub(crate) fn apply_batch(&mut self, batch: Batch) -> Result<(), AtomError> {
        for (def, value) in batch.into_sets() {
            self.write(&def, value, 0)?;
        }
        self.propagate()
    }

    /// Fold the result of an async computation back in.
    ///
    /// The result is dropped when the atom was collected, recomputed or
    /// assigned since the computation started.
    pub(crate) fn settle(
        &mut self,
        atom: AtomId,
        epoch: u64,
        outcome: Result<Value, AtomError>,
    ) -> Result<(), AtomError> {
        let current = match self.node(atom) {
            None => {
                tracing::debug!(atom = %atom, epoch, "settlement for collected atom discarded");
                return Ok(());
            }
            Some(state) => {
                let awaiting_own = matches!(state.status_raw(), Status::Pending { awaiting: None });
                (state.epoch(), awaiting_own)
            }
        };
        if current != (epoch, true) {
            tracing::debug!(
                atom = %atom,
                epoch,
                current = current.0,
                "stale settlement discarded"
            );
            return Ok(());
        }

        let rejected = outcome.is_err();
        let changed = match outcome {
            Ok(value) => self.state_mut(atom).settle(value),
            Err(err) => self.state_mut(atom).reject(err),
        };
        tracing::debug!(atom = %atom, epoch, rejected, "settled");
        if changed {
            self.note_change(atom);
            self.mark_dirty([atom]);
        }
        self.propagate()
    }

    /// Collect unreferenced atoms and publish the result.
    pub(crate) fn commit(mut self) -> Outcome {
        self.sweep();

        let mut changed: IndexSet<AtomId> = IndexSet::new();
        changed.extend(self.changed.iter().copied());
        changed.extend(self.created.iter().copied());
        changed.extend(self.removed.iter().copied());
        // Transient states created and collected here were never visible.
        changed.retain(|atom| {
            !(self.created.contains(atom) && self.removed.contains(atom))
                && (self.touched.contains_key(atom) || self.base.state(*atom).is_some())
        });

        let removed = std::mem::take(&mut self.removed);
        let tasks: Vec<PendingTask> = std::mem::take(&mut self.tasks)
            .into_iter()
            .filter(|task| self.touched.contains_key(&task.atom) && !removed.contains(&task.atom))
            .collect();
        let deferred = std::mem::take(&mut self.deferred);

        if self.touched.is_empty() && removed.is_empty() {
            return Outcome {
                commit: None,
                tasks,
                deferred,
            };
        }

        let mut states = (**self.base.states()).clone();
        for atom in &removed {
            states.remove(atom);
        }
        for (atom, state) in self.touched.drain() {
            states.insert(atom, Arc::new(state));
        }
        let snapshot = Snapshot::new(self.base.revision() + 1, Arc::new(states));

        if self.config.check_invariants {
            if let Err(violation) = snapshot.check_consistency() {
                panic!("{violation}");
            }
        }

        Outcome {
            commit: Some(Commit::new(Arc::new(snapshot), changed.into_iter().collect())),
            tasks,
            deferred,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::{erase, Atom, ConsumerId};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn tx() -> Transaction {
        Transaction::new(Arc::new(Snapshot::default()), EngineConfig::default())
    }

    fn next(outcome: Outcome) -> Transaction {
        let commit = outcome.commit.expect("transaction changed something");
        Transaction::new(Arc::clone(commit.snapshot()), EngineConfig::default())
    }

    #[test]
    fn materialize_computes_and_links() {
        let count = Atom::new(2);
        let doubled = Atom::derived({
            let count = count.clone();
            move |get| Ok(get.get(&count)? * 2)
        });

        let mut tx = tx();
        assert!(tx.materialize(doubled.def()).unwrap());
        assert!(!tx.materialize(doubled.def()).unwrap());

        let state = tx.node(doubled.id()).unwrap();
        assert_eq!(downcast::<i32>(state.value().unwrap()), 4);
        assert!(state.dependencies().contains(&count.id()));
        assert!(tx.node(count.id()).unwrap().dependents().contains(&doubled.id()));
    }

    #[test]
    fn assign_propagates_to_dependents() {
        let count = Atom::new(1);
        let doubled = Atom::derived({
            let count = count.clone();
            move |get| Ok(get.get(&count)? * 2)
        });

        let mut tx = tx();
        tx.attach(doubled.def(), ConsumerId::new()).unwrap();
        tx.update(count.def(), UpdateFn::Replace(erase(5))).unwrap();

        let state = tx.node(doubled.id()).unwrap();
        assert_eq!(downcast::<i32>(state.value().unwrap()), 10);
    }

    #[test]
    fn equal_result_stops_propagation() {
        let count = Atom::new(1);
        let parity = Atom::derived({
            let count = count.clone();
            move |get| Ok(get.get(&count)? % 2)
        });
        let runs = Arc::new(AtomicUsize::new(0));
        let label = Atom::derived({
            let parity = parity.clone();
            let runs = runs.clone();
            move |get| {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(if get.get(&parity)? == 0 { "even" } else { "odd" })
            }
        });

        let mut tx = tx();
        tx.attach(label.def(), ConsumerId::new()).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        // 1 -> 3 keeps the parity, so `label` is not recomputed.
        tx.update(count.def(), UpdateFn::Replace(erase(3))).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        tx.update(count.def(), UpdateFn::Replace(erase(4))).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn update_with_reads_current_value() {
        let count = Atom::new(10);
        let mut tx = tx();
        tx.update(
            count.def(),
            UpdateFn::With(Box::new(|v: &Value| erase(downcast::<i32>(v) + 1))),
        )
        .unwrap();
        assert_eq!(tx.load_own::<i32>(count.def()), Loadable::Ready(11));
    }

    #[test]
    fn write_depth_is_bounded() {
        let config = EngineConfig {
            max_write_depth: 3,
            ..EngineConfig::default()
        };
        let mut tx = Transaction::new(Arc::new(Snapshot::default()), config);

        let a = Atom::new(0);
        let b = Atom::writable(|_get| Ok(0), {
            let a = a.clone();
            move |set, v: i32| set.set(&a, v)
        });
        let c = Atom::writable(|_get| Ok(0), {
            let b = b.clone();
            move |set, v: i32| set.set(&b, v)
        });
        let d = Atom::writable(|_get| Ok(0), {
            let c = c.clone();
            move |set, v: i32| set.set(&c, v)
        });

        assert!(tx.write(c.def(), erase(1), 0).is_ok());
        let err = tx.write(d.def(), erase(1), 0).unwrap_err();
        assert!(matches!(err, AtomError::WriteDepthExceeded { depth: 3, .. }));
    }

    #[test]
    fn self_cycle_fails_materialization() {
        let slot: Arc<parking_lot::Mutex<Option<Atom<i32>>>> = Arc::default();
        let looped = Atom::derived({
            let slot = slot.clone();
            move |get| {
                let other = slot.lock().clone().expect("set below");
                get.get(&other)
            }
        });
        let wrapper = Atom::derived({
            let looped = looped.clone();
            move |get| get.get(&looped)
        });
        *slot.lock() = Some(wrapper.clone());

        let mut tx = tx();
        let err = tx.materialize(wrapper.def()).unwrap_err();
        assert!(matches!(err, AtomError::Cycle(_)));
    }

    #[test]
    fn swallowed_cycle_still_fails_transaction() {
        let slot: Arc<parking_lot::Mutex<Option<Atom<i32>>>> = Arc::default();
        let inner = Atom::derived({
            let slot = slot.clone();
            move |get| {
                let outer = slot.lock().clone().expect("set below");
                get.get(&outer)
            }
        });
        let outer = Atom::derived({
            let inner = inner.clone();
            move |get| Ok(get.get_loadable(&inner).latest().unwrap_or(0))
        });
        *slot.lock() = Some(outer.clone());

        let mut tx = tx();
        tx.attach(outer.def(), ConsumerId::new()).unwrap();
        assert!(matches!(tx.check_cycles(), Err(AtomError::Cycle(_))));
    }

    #[test]
    fn stale_settlement_is_discarded() {
        let atom = Atom::<i32>::derived_async(|_get| Ok(async { Ok::<_, AtomError>(1) }));
        let mut tx = tx();
        tx.attach(atom.def(), ConsumerId::new()).unwrap();
        let first = tx.node(atom.id()).unwrap().epoch();

        tx.settle(atom.id(), first + 1, Ok(erase(9))).unwrap();
        assert!(tx.node(atom.id()).unwrap().value().is_none());

        tx.settle(atom.id(), first, Ok(erase(1))).unwrap();
        assert_eq!(tx.load_own::<i32>(atom.def()), Loadable::Ready(1));
    }

    #[test]
    fn commit_publishes_new_revision_and_shares_untouched_states() {
        let a = Atom::new(1);
        let b = Atom::new(2);
        let consumer = ConsumerId::new();

        let mut first = tx();
        first.attach(a.def(), consumer).unwrap();
        first.attach(b.def(), consumer).unwrap();
        let base = first.commit().commit.unwrap();
        assert_eq!(base.revision(), 1);

        let mut second = Transaction::new(Arc::clone(base.snapshot()), EngineConfig::default());
        second.update(a.def(), UpdateFn::Replace(erase(5))).unwrap();
        let outcome = second.commit().commit.unwrap();

        assert_eq!(outcome.revision(), 2);
        assert_eq!(outcome.changed(), &[a.id()]);
        assert!(outcome.snapshot().shares_state_with(base.snapshot(), b.id()));
        assert!(!outcome.snapshot().shares_state_with(base.snapshot(), a.id()));
        assert_eq!(base.snapshot().read(&a), Loadable::Ready(1));
    }

    #[test]
    fn empty_transaction_commits_nothing() {
        let outcome = tx().commit();
        assert!(outcome.commit.is_none());
        assert!(outcome.tasks.is_empty());
    }

    #[test]
    fn async_computation_yields_task() {
        let atom = Atom::<i32>::derived_async(|_get| Ok(async { Ok::<_, AtomError>(1) }));
        let mut tx = tx();
        tx.attach(atom.def(), ConsumerId::new()).unwrap();
        let outcome = tx.commit();
        assert_eq!(outcome.tasks.len(), 1);
        assert_eq!(outcome.tasks[0].atom, atom.id());

        let tx = next(outcome);
        assert_eq!(
            tx.base.read(&atom),
            Loadable::Pending {
                atom: atom.id(),
                previous: None
            }
        );
    }
}
