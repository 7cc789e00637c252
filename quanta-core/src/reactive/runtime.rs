//! Store Runtime
//!
//! The store is the single coordinator. It owns the current snapshot and
//! runs every state change as a transaction over it.
//!
//! # How It Works
//!
//! 1. An action is dispatched. The store takes the writer lock, builds a
//!    transaction on the current snapshot and applies the action.
//!
//! 2. If the action succeeds, the transaction commits into a new snapshot,
//!    which replaces the current one atomically. If it fails, the
//!    transaction is dropped and the current snapshot is unchanged.
//!
//! 3. Still under the lock, the commit is sent to watchers and queued for
//!    listeners, so both observe commits in revision order.
//!
//! 4. After the lock is released, queued commits are delivered to listeners
//!    and any async work the transaction produced is spawned. Each async
//!    computation settles later as its own `Settle` action.
//!
//! # Thread Safety
//!
//! Reads never lock: they load the current snapshot, which is immutable.
//! Transactions are serialized by the writer lock. Async computations run
//! outside it, so slow computations on independent atoms proceed in
//! parallel and only their settlement is serialized.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::watch;

use super::action::Action;
use super::context::DispatchGuard;
use super::subscriber::{Listener, Listeners};
use super::transaction::{DeferredWrite, Outcome, PendingTask, Transaction};
use crate::atom::{Atom, AtomValue, ConsumerId};
use crate::config::EngineConfig;
use crate::error::{AtomError, ConfigError};
use crate::store::{Commit, Loadable, Snapshot};

struct Shared {
    config: EngineConfig,
    current: ArcSwap<Snapshot>,
    writer: Mutex<()>,
    commits: watch::Sender<Commit>,
    listeners: Listeners,

    /// Commits not yet delivered to listeners, in revision order.
    outbox: Mutex<VecDeque<Commit>>,
    delivering: AtomicBool,
}

/// Clears the delivering flag even if a listener panics.
struct Delivery<'a>(&'a AtomicBool);

impl Drop for Delivery<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// A handle to one atom store.
///
/// Cloning the handle shares the store.
///
/// # Example
///
/// ```rust,ignore
/// let store = Store::new();
/// let count = Atom::new(0);
/// let doubled = Atom::derived({
///     let count = count.clone();
///     move |get| Ok(get.get(&count)? * 2)
/// });
///
/// store.attach(&doubled, ConsumerId::new())?;
/// store.set(&count, 21)?;
/// assert_eq!(store.get(&doubled)?, 42);
/// ```
#[derive(Clone)]
pub struct Store {
    shared: Arc<Shared>,
}

impl Store {
    /// Create a store with the default configuration.
    pub fn new() -> Self {
        Self::build(EngineConfig::default())
    }

    /// Create a store with a validated configuration.
    pub fn with_config(config: EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: EngineConfig) -> Self {
        let (commits, _) = watch::channel(Commit::default());
        Self {
            shared: Arc::new(Shared {
                config,
                current: ArcSwap::from_pointee(Snapshot::default()),
                writer: Mutex::new(()),
                commits,
                listeners: Listeners::default(),
                outbox: Mutex::new(VecDeque::new()),
                delivering: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.shared.current.load_full()
    }

    /// Read an atom from the current snapshot.
    ///
    /// Reading never computes. An atom without state reads as its init.
    pub fn read<T: AtomValue>(&self, atom: &Atom<T>) -> Loadable<T> {
        self.shared.current.load().read(atom)
    }

    /// Like [`Store::read`], reporting suspension as `AtomError::Pending`.
    pub fn get<T: AtomValue>(&self, atom: &Atom<T>) -> Result<T, AtomError> {
        self.read(atom).into_result()
    }

    /// Retain `atom` for `consumer`, computing it if it has no state yet.
    pub fn attach<T>(&self, atom: &Atom<T>, consumer: ConsumerId) -> Result<(), AtomError> {
        self.dispatch(Action::attach(atom, consumer))
    }

    /// Release `consumer`'s hold on `atom`. Atoms nothing references any
    /// longer are collected.
    pub fn detach<T>(&self, atom: &Atom<T>, consumer: ConsumerId) -> Result<(), AtomError> {
        self.dispatch(Action::detach(atom, consumer))
    }

    /// Dispatch `value` through the atom's write function.
    pub fn set<T: AtomValue>(&self, atom: &Atom<T>, value: T) -> Result<(), AtomError> {
        self.dispatch(Action::set(atom, value))
    }

    /// Dispatch a function of the atom's current value.
    pub fn update<T, F>(&self, atom: &Atom<T>, f: F) -> Result<(), AtomError>
    where
        T: AtomValue,
        F: FnOnce(&T) -> T + Send + 'static,
    {
        self.dispatch(Action::update(atom, f))
    }

    /// Run one action as a transaction.
    pub fn dispatch(&self, action: Action) -> Result<(), AtomError> {
        let kind = action.kind();
        let outcome = self.transact(action).map_err(|err| {
            tracing::debug!(action = kind, error = %err, "transaction aborted");
            err
        })?;

        if let Some(commit) = &outcome.commit {
            tracing::debug!(
                action = kind,
                revision = commit.revision(),
                changed = commit.changed().len(),
                "committed"
            );
        }
        self.deliver();
        for task in outcome.tasks {
            self.spawn_settlement(task);
        }
        for write in outcome.deferred {
            self.spawn_deferred(write);
        }
        Ok(())
    }

    fn transact(&self, action: Action) -> Result<Outcome, AtomError> {
        let _guard = DispatchGuard::enter(self.key())?;
        let _writer = self.shared.writer.lock();

        let mut tx = Transaction::new(self.shared.current.load_full(), self.shared.config.clone());
        action.apply(&mut tx)?;
        let outcome = tx.commit();
        if let Some(commit) = &outcome.commit {
            self.shared.current.store(Arc::clone(commit.snapshot()));
            self.shared.commits.send_replace(commit.clone());
            self.shared.outbox.lock().push_back(commit.clone());
        }
        Ok(outcome)
    }

    /// Drain queued commits to listeners, oldest first.
    ///
    /// Only one thread delivers at a time. Commits queued while another
    /// thread delivers, including those dispatched by a listener, are
    /// delivered by that thread in order.
    fn deliver(&self) {
        let shared = &self.shared;
        loop {
            if shared
                .delivering
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return;
            }
            {
                let _delivery = Delivery(&shared.delivering);
                loop {
                    let next = shared.outbox.lock().pop_front();
                    let Some(commit) = next else {
                        break;
                    };
                    shared.listeners.notify_all(&commit);
                }
            }
            // A commit queued after the drain but before the flag cleared
            // would otherwise wait for the next dispatch.
            if shared.outbox.lock().is_empty() {
                return;
            }
        }
    }

    fn spawn_settlement(&self, task: PendingTask) {
        let PendingTask {
            atom,
            epoch,
            future,
        } = task;

        let Ok(handle) = Handle::try_current() else {
            tracing::warn!(atom = %atom, "no tokio runtime to drive async atom");
            if let Err(err) = self.dispatch(Action::settle(atom, epoch, Err(AtomError::NoRuntime(atom)))) {
                tracing::warn!(atom = %atom, error = %err, "failed to reject async atom");
            }
            return;
        };

        tracing::trace!(atom = %atom, epoch, "spawning async computation");
        let store = self.downgrade();
        handle.spawn(async move {
            let outcome = future.await;
            let Some(store) = Store::upgrade(&store) else {
                return;
            };
            if let Err(err) = store.dispatch(Action::settle(atom, epoch, outcome)) {
                tracing::warn!(atom = %atom, epoch, error = %err, "settlement failed");
            }
        });
    }

    fn spawn_deferred(&self, write: DeferredWrite) {
        let DeferredWrite { origin, future } = write;

        let Ok(handle) = Handle::try_current() else {
            tracing::warn!(atom = %origin, "no tokio runtime to finish deferred write");
            return;
        };

        let store = self.downgrade();
        handle.spawn(async move {
            let batch = match future.await {
                Ok(batch) => batch,
                Err(err) => {
                    tracing::warn!(atom = %origin, error = %err, "deferred write failed");
                    return;
                }
            };
            let Some(store) = Store::upgrade(&store) else {
                return;
            };
            if let Err(err) = store.dispatch(Action::Apply(batch)) {
                tracing::warn!(atom = %origin, error = %err, "deferred write rejected");
            }
        });
    }

    /// Wait until `atom` is no longer pending and return its value.
    ///
    /// The atom must be attached, or nothing will drive it.
    pub async fn resolve<T: AtomValue>(&self, atom: &Atom<T>) -> Result<T, AtomError> {
        let mut commits = self.subscribe();
        loop {
            match self.read(atom) {
                Loadable::Pending { .. } => {}
                loaded => return loaded.into_result(),
            }
            commits.changed().await.map_err(|_| AtomError::Closed)?;
        }
    }

    /// Watch the latest commit.
    pub fn subscribe(&self) -> watch::Receiver<Commit> {
        self.shared.commits.subscribe()
    }

    /// Call `listener` after every commit until `remove_listener(consumer)`.
    pub fn on_commit<F>(&self, consumer: ConsumerId, listener: F)
    where
        F: Fn(&Commit) + Send + Sync + 'static,
    {
        self.shared.listeners.add(Listener::new(consumer, listener));
    }

    pub fn remove_listener(&self, consumer: ConsumerId) -> bool {
        self.shared.listeners.remove(consumer)
    }

    fn key(&self) -> usize {
        Arc::as_ptr(&self.shared) as usize
    }

    fn downgrade(&self) -> Weak<Shared> {
        Arc::downgrade(&self.shared)
    }

    fn upgrade(shared: &Weak<Shared>) -> Option<Self> {
        shared.upgrade().map(|shared| Self { shared })
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.shared.current.load();
        f.debug_struct("Store")
            .field("revision", &snapshot.revision())
            .field("atoms", &snapshot.len())
            .field("listeners", &self.shared.listeners.len())
            .finish()
    }
}
