//! Atoms
//!
//! Atoms are the addressable units of state. This module holds their
//! identities and definitions; the values live in the store.

mod definition;
mod id;

pub use definition::{Atom, AtomValue};
pub use id::{AtomId, ConsumerId};

pub(crate) use definition::{downcast, erase, AtomDef, Computation, Reader, Value, Writer};
