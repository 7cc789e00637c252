//! Value Store
//!
//! The authoritative mapping from atom to state, published as immutable
//! snapshots.

mod commit;
mod loadable;
mod snapshot;

pub use commit::Commit;
pub use loadable::Loadable;
pub use snapshot::Snapshot;

pub(crate) use loadable::load;
pub(crate) use snapshot::StateMap;
