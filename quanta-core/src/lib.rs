//! Quanta Core
//!
//! This crate provides an atomic state-management engine. Application state
//! is split into atoms: primitive atoms hold values, derived atoms compute
//! from other atoms, sync or async. The store keeps every live atom's value,
//! tracks which atoms each computation read, and propagates changes through
//! the resulting graph.
//!
//! It implements:
//!
//! - Typed atom handles with type-erased storage
//! - Dynamic dependency tracking
//! - Transactional, glitch-free propagation with change short-circuiting
//! - Async atoms with suspension and monotonic settlement
//! - Reference-based garbage collection of unused atoms
//! - Immutable snapshots with structural sharing
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `atom`: Atom identities and definitions
//! - `graph`: Per-atom state and the dependency graph
//! - `store`: Snapshots, commits and loadable reads
//! - `reactive`: Transactions, contexts and the `Store` runtime
//! - `config`: Engine settings
//! - `error`: Error types
//!
//! # Example
//!
//! ```rust,ignore
//! use quanta_core::{Atom, ConsumerId, Store};
//!
//! let store = Store::new();
//!
//! // A primitive atom
//! let count = Atom::new(0);
//!
//! // A derived atom
//! let doubled = Atom::derived({
//!     let count = count.clone();
//!     move |get| Ok(get.get(&count)? * 2)
//! });
//!
//! // Keep `doubled` alive and computed
//! store.attach(&doubled, ConsumerId::new())?;
//!
//! // Update the primitive; `doubled` follows in the same transaction
//! store.set(&count, 5)?;
//! assert_eq!(store.get(&doubled)?, 10);
//! ```

pub mod atom;
pub mod config;
pub mod error;
pub mod graph;
pub mod reactive;
pub mod store;

pub use atom::{Atom, AtomId, AtomValue, ConsumerId};
pub use config::{EngineConfig, PendingReadPolicy};
pub use error::{AtomError, ConfigError};
pub use graph::{AtomState, AtomStatus};
pub use reactive::{Action, Batch, ReadContext, Store, WriteContext};
pub use store::{Commit, Loadable, Snapshot};
