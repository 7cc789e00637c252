//! Atom State
//!
//! One `AtomState` exists per live atom. It holds the last settled value,
//! the computation status, and both directions of every dependency edge the
//! atom takes part in.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexSet;

use crate::atom::{AtomDef, AtomId, ConsumerId, Value};
use crate::error::AtomError;

/// Computation status, stored next to the value rather than inside it.
#[derive(Debug, Clone)]
pub(crate) enum Status {
    Settled,

    /// Waiting on this atom's own future (`awaiting` is `None`) or on a
    /// pending dependency.
    Pending { awaiting: Option<AtomId> },

    Rejected(AtomError),
}

/// Public view of an atom's status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtomStatus {
    /// The value is available.
    Settled,

    /// The value is being computed asynchronously.
    Pending,

    /// The last computation failed.
    Rejected,
}

/// The state of one live atom.
#[derive(Clone)]
pub struct AtomState {
    def: Arc<AtomDef>,

    /// Last settled value, or the init before first settlement.
    value: Option<Value>,

    status: Status,

    /// Generation counter. Bumped on every recomputation and assignment so a
    /// late async settlement can tell it has been superseded. Drawn from a
    /// process-wide sequence, so a re-created state never reuses an epoch
    /// from an earlier lifetime of the same atom.
    epoch: u64,

    /// Atoms read during the most recent computation.
    dependencies: IndexSet<AtomId>,

    /// Atoms whose last computation read this one.
    dependents: IndexSet<AtomId>,

    /// Consumers retaining this atom.
    consumers: IndexSet<ConsumerId>,
}

impl AtomState {
    pub(crate) fn new(def: Arc<AtomDef>) -> Self {
        let value = def.init.clone();
        let status = if value.is_some() {
            Status::Settled
        } else {
            Status::Pending { awaiting: None }
        };
        Self {
            def,
            value,
            status,
            epoch: 0,
            dependencies: IndexSet::new(),
            dependents: IndexSet::new(),
            consumers: IndexSet::new(),
        }
    }

    /// Get the atom's ID.
    pub fn id(&self) -> AtomId {
        self.def.id
    }

    /// Get the current status.
    pub fn status(&self) -> AtomStatus {
        match self.status {
            Status::Settled => AtomStatus::Settled,
            Status::Pending { .. } => AtomStatus::Pending,
            Status::Rejected(_) => AtomStatus::Rejected,
        }
    }

    /// Get the error of a rejected atom.
    pub fn error(&self) -> Option<&AtomError> {
        match &self.status {
            Status::Rejected(err) => Some(err),
            _ => None,
        }
    }

    /// Get the current epoch.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Get all dependencies.
    pub fn dependencies(&self) -> &IndexSet<AtomId> {
        &self.dependencies
    }

    /// Get all dependents.
    pub fn dependents(&self) -> &IndexSet<AtomId> {
        &self.dependents
    }

    /// Get all consumers.
    pub fn consumers(&self) -> &IndexSet<ConsumerId> {
        &self.consumers
    }

    /// Whether anything still justifies keeping this state.
    pub fn is_referenced(&self) -> bool {
        !self.consumers.is_empty() || !self.dependents.is_empty()
    }

    pub(crate) fn def(&self) -> &Arc<AtomDef> {
        &self.def
    }

    pub(crate) fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    pub(crate) fn status_raw(&self) -> &Status {
        &self.status
    }

    pub(crate) fn next_epoch(&mut self) -> u64 {
        static EPOCHS: AtomicU64 = AtomicU64::new(1);
        self.epoch = EPOCHS.fetch_add(1, Ordering::Relaxed);
        self.epoch
    }

    /// Store a settled value. Returns whether readers can observe a change.
    pub(crate) fn settle(&mut self, value: Value) -> bool {
        let changed = match (&self.status, &self.value) {
            (Status::Settled, Some(previous)) => !self.def.values_equal(previous, &value),
            _ => true,
        };
        self.value = Some(value);
        self.status = Status::Settled;
        changed
    }

    /// Mark the atom pending. Returns whether it was not pending before.
    pub(crate) fn suspend(&mut self, awaiting: Option<AtomId>) -> bool {
        let changed = !matches!(self.status, Status::Pending { .. });
        self.status = Status::Pending { awaiting };
        changed
    }

    pub(crate) fn reject(&mut self, error: AtomError) -> bool {
        self.status = Status::Rejected(error);
        true
    }

    pub(crate) fn set_dependencies(&mut self, dependencies: IndexSet<AtomId>) {
        self.dependencies = dependencies;
    }

    pub(crate) fn add_dependent(&mut self, atom: AtomId) {
        self.dependents.insert(atom);
    }

    pub(crate) fn remove_dependent(&mut self, atom: AtomId) {
        self.dependents.shift_remove(&atom);
    }

    pub(crate) fn add_consumer(&mut self, consumer: ConsumerId) -> bool {
        self.consumers.insert(consumer)
    }

    pub(crate) fn remove_consumer(&mut self, consumer: ConsumerId) -> bool {
        self.consumers.shift_remove(&consumer)
    }
}

impl fmt::Debug for AtomState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AtomState")
            .field("id", &self.def.id)
            .field("label", &self.def.label)
            .field("status", &self.status)
            .field("epoch", &self.epoch)
            .field("dependencies", &self.dependencies)
            .field("dependents", &self.dependents)
            .field("consumers", &self.consumers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::{downcast, erase, Atom};

    #[test]
    fn primitive_state_starts_settled_with_init() {
        let atom = Atom::new(5);
        let state = AtomState::new(atom.def().clone());
        assert_eq!(state.status(), AtomStatus::Settled);
        assert_eq!(downcast::<i32>(state.value().unwrap()), 5);
        assert!(!state.is_referenced());
    }

    #[test]
    fn derived_state_starts_pending_without_init() {
        let atom = Atom::derived(|_get| Ok(1));
        let state = AtomState::new(atom.def().clone());
        assert_eq!(state.status(), AtomStatus::Pending);
        assert!(state.value().is_none());
    }

    #[test]
    fn settle_reports_changes_by_equality() {
        let atom = Atom::new(1);
        let mut state = AtomState::new(atom.def().clone());

        assert!(!state.settle(erase(1)));
        assert!(state.settle(erase(2)));

        state.suspend(None);
        assert_eq!(state.status(), AtomStatus::Pending);
        // Leaving pending always counts as a change.
        assert!(state.settle(erase(2)));
    }

    #[test]
    fn suspend_only_changes_once() {
        let atom = Atom::new(1);
        let mut state = AtomState::new(atom.def().clone());
        assert!(state.suspend(None));
        assert!(!state.suspend(Some(AtomId::from(3))));
    }

    #[test]
    fn reject_exposes_error() {
        let atom = Atom::new(1);
        let mut state = AtomState::new(atom.def().clone());
        state.reject(AtomError::message("nope"));
        assert_eq!(state.status(), AtomStatus::Rejected);
        assert_eq!(state.error().unwrap().to_string(), "nope");
    }

    #[test]
    fn consumer_and_dependent_management() {
        let atom = Atom::new(1);
        let mut state = AtomState::new(atom.def().clone());
        let consumer = ConsumerId::new();
        let dependent = AtomId::from(99);

        assert!(state.add_consumer(consumer));
        assert!(!state.add_consumer(consumer));
        state.add_dependent(dependent);
        assert!(state.is_referenced());

        assert!(state.remove_consumer(consumer));
        state.remove_dependent(dependent);
        assert!(!state.is_referenced());
    }

    #[test]
    fn epochs_increase() {
        let atom = Atom::new(1);
        let mut state = AtomState::new(atom.def().clone());
        let first = state.next_epoch();
        let second = state.next_epoch();
        assert!(second > first);
        assert_eq!(state.epoch(), second);
    }

    #[test]
    fn recreated_state_never_reuses_epochs() {
        let atom = Atom::new(1);
        let mut first_life = AtomState::new(atom.def().clone());
        let old = first_life.next_epoch();

        let mut second_life = AtomState::new(atom.def().clone());
        assert_eq!(second_life.epoch(), 0);
        assert!(second_life.next_epoch() > old);
    }
}
