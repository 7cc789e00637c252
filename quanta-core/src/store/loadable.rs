//! The result of reading an atom.

use crate::atom::{downcast, AtomDef, AtomId, AtomValue};
use crate::error::AtomError;
use crate::graph::{AtomState, Status};

/// Current value of an atom, or why there is none.
#[derive(Debug, Clone, PartialEq)]
pub enum Loadable<T> {
    /// The value is available.
    Ready(T),

    /// The value is being computed asynchronously. `previous` is the last
    /// settled value (or the init) if there is one; callers that cannot show
    /// stale data should suspend until the atom settles.
    Pending { atom: AtomId, previous: Option<T> },

    /// The computation failed.
    Failed(AtomError),
}

impl<T> Loadable<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending { .. })
    }

    /// The value, if ready.
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Ready(value) => Some(value),
            _ => None,
        }
    }

    /// The ready value, or the previous value of a pending atom.
    pub fn latest(self) -> Option<T> {
        match self {
            Self::Ready(value) => Some(value),
            Self::Pending { previous, .. } => previous,
            Self::Failed(_) => None,
        }
    }

    /// Convert into a result, reporting suspension as `AtomError::Pending`.
    pub fn into_result(self) -> Result<T, AtomError> {
        match self {
            Self::Ready(value) => Ok(value),
            Self::Pending { atom, .. } => Err(AtomError::Pending(atom)),
            Self::Failed(err) => Err(err),
        }
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Loadable<U> {
        match self {
            Self::Ready(value) => Loadable::Ready(f(value)),
            Self::Pending { atom, previous } => Loadable::Pending {
                atom,
                previous: previous.map(f),
            },
            Self::Failed(err) => Loadable::Failed(err),
        }
    }
}

/// Read `def` out of an optional state. A missing state falls back to the
/// init without creating anything.
pub(crate) fn load<T: AtomValue>(def: &AtomDef, state: Option<&AtomState>) -> Loadable<T> {
    let Some(state) = state else {
        return match &def.init {
            Some(init) => Loadable::Ready(downcast(init)),
            None => Loadable::Failed(AtomError::Uninitialized(def.id)),
        };
    };
    match state.status_raw() {
        Status::Settled => match state.value() {
            Some(value) => Loadable::Ready(downcast(value)),
            None => Loadable::Failed(AtomError::Uninitialized(def.id)),
        },
        Status::Pending { .. } => Loadable::Pending {
            atom: def.id,
            previous: state.value().map(downcast::<T>),
        },
        Status::Rejected(err) => Loadable::Failed(err.clone()),
    }
}
