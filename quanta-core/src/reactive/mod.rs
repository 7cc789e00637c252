//! Propagation Engine
//!
//! This module implements the store: the transactions that compute, write
//! and collect atoms, and the runtime that publishes their results.
//!
//! # Concepts
//!
//! ## Transactions
//!
//! Every change runs as one transaction over an immutable snapshot. Either
//! the whole transaction commits into a new snapshot, or nothing happens.
//!
//! ## Contexts
//!
//! Atom functions receive the running transaction through a `ReadContext`
//! or `WriteContext`. A read through `ReadContext` records a dependency, so
//! the graph always reflects what each atom actually read last time.
//!
//! ## Suspension
//!
//! An atom whose value comes from a future is pending until the future
//! settles. Readers propagate `AtomError::Pending` with `?` and are
//! recomputed once the atom settles. Each computation carries the atom's
//! epoch, and a settlement from an outdated epoch is dropped.
//!
//! # Implementation Notes
//!
//! Propagation is push-then-pull: a write pushes dirty marks to every
//! transitive dependent, then dirty atoms are refreshed in topological order
//! and pull fresh values from their dependencies. An atom recomputes only
//! when a dependency really changed, so diamonds recompute the join once.

mod action;
mod context;
mod lifecycle;
mod runtime;
mod subscriber;
mod transaction;

pub use action::{Action, AnyAtom, Settlement, Update};
pub use context::{Batch, ReadContext, WriteContext};
pub use runtime::Store;
