//! Store Actions
//!
//! Every state change enters the store as an `Action`. The store runs each
//! action as one transaction; the variant decides which handler runs.

use std::fmt;
use std::sync::Arc;

use super::context::Batch;
use super::transaction::Transaction;
use crate::atom::{erase, Atom, AtomDef, AtomId, AtomValue, ConsumerId, Value};
use crate::error::AtomError;

/// Type-erased atom handle carried by actions.
#[derive(Clone)]
pub struct AnyAtom {
    def: Arc<AtomDef>,
}

impl AnyAtom {
    pub fn id(&self) -> AtomId {
        self.def.id
    }
}

impl<T> From<&Atom<T>> for AnyAtom {
    fn from(atom: &Atom<T>) -> Self {
        Self {
            def: Arc::clone(atom.def()),
        }
    }
}

impl fmt::Debug for AnyAtom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.def, f)
    }
}

pub(crate) enum UpdateFn {
    Replace(Value),
    With(Box<dyn FnOnce(&Value) -> Value + Send>),
}

/// A new value, or a function of the current one.
pub struct Update(pub(crate) UpdateFn);

impl Update {
    pub fn replace<T: AtomValue>(value: T) -> Self {
        Self(UpdateFn::Replace(erase(value)))
    }

    pub fn with<T, F>(f: F) -> Self
    where
        T: AtomValue,
        F: FnOnce(&T) -> T + Send + 'static,
    {
        Self(UpdateFn::With(Box::new(move |current: &Value| {
            let current = current
                .downcast_ref::<T>()
                .expect("atom value type mismatch");
            erase(f(current))
        })))
    }
}

/// The result of an async computation, addressed to the epoch that started it.
pub struct Settlement {
    pub(crate) atom: AtomId,
    pub(crate) epoch: u64,
    pub(crate) outcome: Result<Value, AtomError>,
}

/// A state change requested of the store.
pub enum Action {
    /// Retain an atom for a consumer.
    Attach(AnyAtom, ConsumerId),

    /// Release a consumer's hold on an atom.
    Detach(AtomId, ConsumerId),

    /// Dispatch an update through the atom's write function.
    Update(AnyAtom, Update),

    /// Write several atoms, propagating once.
    Apply(Batch),

    /// Fold in the result of an async computation.
    Settle(Settlement),
}

impl Action {
    pub fn attach<T>(atom: &Atom<T>, consumer: ConsumerId) -> Self {
        Self::Attach(atom.into(), consumer)
    }

    pub fn detach<T>(atom: &Atom<T>, consumer: ConsumerId) -> Self {
        Self::Detach(atom.id(), consumer)
    }

    pub fn set<T: AtomValue>(atom: &Atom<T>, value: T) -> Self {
        Self::Update(atom.into(), Update::replace(value))
    }

    pub fn update<T, F>(atom: &Atom<T>, f: F) -> Self
    where
        T: AtomValue,
        F: FnOnce(&T) -> T + Send + 'static,
    {
        Self::Update(atom.into(), Update::with(f))
    }

    pub(crate) fn settle(atom: AtomId, epoch: u64, outcome: Result<Value, AtomError>) -> Self {
        Self::Settle(Settlement {
            atom,
            epoch,
            outcome,
        })
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Attach(..) => "attach",
            Self::Detach(..) => "detach",
            Self::Update(..) => "update",
            Self::Apply(_) => "apply",
            Self::Settle(_) => "settle",
        }
    }

    pub(crate) fn apply(self, tx: &mut Transaction) -> Result<(), AtomError> {
        self.run(tx)?;
        tx.check_cycles()
    }

    fn run(self, tx: &mut Transaction) -> Result<(), AtomError> {
        match self {
            Self::Attach(atom, consumer) => tx.attach(&atom.def, consumer),
            Self::Detach(atom, consumer) => {
                tx.detach(atom, consumer);
                Ok(())
            }
            Self::Update(atom, update) => tx.update(&atom.def, update.0),
            Self::Apply(batch) => tx.apply_batch(batch),
            Self::Settle(settlement) => {
                tx.settle(settlement.atom, settlement.epoch, settlement.outcome)
            }
        }
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Attach(atom, consumer) => f
                .debug_tuple("Attach")
                .field(&atom.id())
                .field(consumer)
                .finish(),
            Self::Detach(atom, consumer) => {
                f.debug_tuple("Detach").field(atom).field(consumer).finish()
            }
            Self::Update(atom, _) => f.debug_tuple("Update").field(&atom.id()).finish(),
            Self::Apply(batch) => f.debug_tuple("Apply").field(batch).finish(),
            Self::Settle(settlement) => f
                .debug_struct("Settle")
                .field("atom", &settlement.atom)
                .field("epoch", &settlement.epoch)
                .field("rejected", &settlement.outcome.is_err())
                .finish(),
        }
    }
}
