//! Computation Contexts
//!
//! Atom functions never see the store. A read function receives a
//! `ReadContext`, a write function a `WriteContext`; both carry the running
//! transaction explicitly, so a computation always reads the state of the
//! transaction that invoked it.
//!
//! `ReadContext` records every atom read during the computation. When the
//! computation finishes, the recorded set becomes the atom's dependencies.
//!
//! A thread-local stack of active dispatches catches atom functions that call
//! back into the store running them, which would otherwise deadlock.

use std::cell::RefCell;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::FutureExt;
use smallvec::SmallVec;

use super::transaction::Transaction;
use crate::atom::{downcast, erase, Atom, AtomDef, AtomId, AtomValue, Value};
use crate::error::AtomError;
use crate::store::Loadable;

thread_local! {
    static ACTIVE_DISPATCHES: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

/// Marks a store as dispatching on this thread until dropped.
pub(crate) struct DispatchGuard {
    store: usize,
}

impl DispatchGuard {
    pub(crate) fn enter(store: usize) -> Result<Self, AtomError> {
        ACTIVE_DISPATCHES.with(|stack| {
            let mut stack = stack.borrow_mut();
            if stack.contains(&store) {
                return Err(AtomError::Reentrant);
            }
            stack.push(store);
            Ok(Self { store })
        })
    }
}

impl Drop for DispatchGuard {
    fn drop(&mut self) {
        ACTIVE_DISPATCHES.with(|stack| {
            let popped = stack.borrow_mut().pop();
            debug_assert_eq!(popped, Some(self.store), "dispatch guard mismatch");
        });
    }
}

/// Handed to read functions.
pub struct ReadContext<'a> {
    tx: &'a mut Transaction,
    atom: &'a Arc<AtomDef>,
    observed: SmallVec<[AtomId; 4]>,
}

impl<'a> ReadContext<'a> {
    pub(crate) fn new(tx: &'a mut Transaction, atom: &'a Arc<AtomDef>) -> Self {
        Self {
            tx,
            atom,
            observed: SmallVec::new(),
        }
    }

    /// The atom being computed.
    pub fn atom(&self) -> AtomId {
        self.atom.id
    }

    /// Read another atom and depend on it.
    ///
    /// Fails with `AtomError::Pending` while the atom is pending; propagate
    /// it with `?` to suspend this computation until the atom settles.
    /// Reading the atom being computed returns its current value or init.
    pub fn get<T: AtomValue>(&mut self, atom: &Atom<T>) -> Result<T, AtomError> {
        self.get_loadable(atom).into_result()
    }

    /// Like [`ReadContext::get`], but hands suspension and failure back to
    /// the caller instead of failing.
    pub fn get_loadable<T: AtomValue>(&mut self, atom: &Atom<T>) -> Loadable<T> {
        if atom.id() == self.atom.id {
            return self.tx.load_own(atom.def());
        }
        self.observed.push(atom.id());
        self.tx.load_tracked(atom.def())
    }

    pub(crate) fn into_observed(self) -> SmallVec<[AtomId; 4]> {
        self.observed
    }
}

/// Handed to write functions.
pub struct WriteContext<'a> {
    tx: &'a mut Transaction,
    atom: &'a Arc<AtomDef>,
    depth: usize,
}

impl<'a> WriteContext<'a> {
    pub(crate) fn new(tx: &'a mut Transaction, atom: &'a Arc<AtomDef>, depth: usize) -> Self {
        Self { tx, atom, depth }
    }

    /// The atom being written.
    pub fn atom(&self) -> AtomId {
        self.atom.id
    }

    /// Read an atom's current value without depending on it.
    ///
    /// Reads see every `set` made earlier in this write.
    pub fn get<T: AtomValue>(&mut self, atom: &Atom<T>) -> Result<T, AtomError> {
        let value = self.tx.current_for_write(atom.def())?;
        Ok(downcast(&value))
    }

    /// Write `value` to `atom`.
    ///
    /// Setting the atom being written stores the value in its slot. Setting
    /// any other atom runs that atom's own write function.
    pub fn set<T: AtomValue>(&mut self, atom: &Atom<T>, value: T) -> Result<(), AtomError> {
        if atom.id() == self.atom.id {
            self.tx.assign(self.atom, erase(value))
        } else {
            self.tx.write(atom.def(), erase(value), self.depth + 1)
        }
    }

    /// Finish this write asynchronously.
    ///
    /// When `future` resolves, its batch is applied as a new transaction.
    pub fn defer<F>(&mut self, future: F)
    where
        F: Future<Output = Result<Batch, AtomError>> + Send + 'static,
    {
        self.tx.defer(self.atom.id, future.boxed());
    }
}

/// A list of writes applied together.
#[derive(Default)]
pub struct Batch {
    sets: Vec<(Arc<AtomDef>, Value)>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `value` for `atom`.
    pub fn set<T: AtomValue>(mut self, atom: &Atom<T>, value: T) -> Self {
        self.sets.push((atom.def().clone(), erase(value)));
        self
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    pub(crate) fn into_sets(self) -> Vec<(Arc<AtomDef>, Value)> {
        self.sets
    }
}

impl std::fmt::Debug for Batch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.sets.iter().map(|(def, _)| def.id))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_guard_rejects_reentry() {
        let guard = DispatchGuard::enter(1).unwrap();
        assert_eq!(DispatchGuard::enter(1).err(), Some(AtomError::Reentrant));
        drop(guard);
        assert!(DispatchGuard::enter(1).is_ok());
    }

    #[test]
    fn nested_dispatch_into_other_store_is_allowed() {
        let _outer = DispatchGuard::enter(1).unwrap();
        {
            let _inner = DispatchGuard::enter(2).unwrap();
        }
        assert_eq!(DispatchGuard::enter(1).err(), Some(AtomError::Reentrant));
    }

    #[test]
    fn batch_collects_sets() {
        let a = Atom::new(0);
        let b = Atom::new("x".to_string());
        let batch = Batch::new().set(&a, 1).set(&b, "y".to_string());
        assert_eq!(batch.len(), 2);
        assert!(!batch.is_empty());
    }
}
