//! Commit listeners.
//!
//! A listener is a callback registered under a consumer ID. After every
//! commit the store hands the commit to each listener, outside the store's
//! locks, so a listener may read the store or dispatch new actions.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::atom::ConsumerId;
use crate::store::Commit;

/// A callback notified of every commit.
#[derive(Clone)]
pub(crate) struct Listener {
    consumer: ConsumerId,
    notify: Arc<dyn Fn(&Commit) + Send + Sync>,
}

impl Listener {
    pub(crate) fn new<F>(consumer: ConsumerId, notify: F) -> Self
    where
        F: Fn(&Commit) + Send + Sync + 'static,
    {
        Self {
            consumer,
            notify: Arc::new(notify),
        }
    }

    pub(crate) fn consumer(&self) -> ConsumerId {
        self.consumer
    }

    pub(crate) fn notify(&self, commit: &Commit) {
        (self.notify)(commit);
    }
}

/// The listeners of one store.
#[derive(Default)]
pub(crate) struct Listeners {
    entries: RwLock<Vec<Listener>>,
}

impl Listeners {
    pub(crate) fn add(&self, listener: Listener) {
        self.entries.write().push(listener);
    }

    /// Remove every listener registered by `consumer`.
    pub(crate) fn remove(&self, consumer: ConsumerId) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|listener| listener.consumer() != consumer);
        entries.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Notify every listener. The list is copied first so callbacks can
    /// register or remove listeners.
    pub(crate) fn notify_all(&self, commit: &Commit) {
        let entries = self.entries.read().clone();
        for listener in &entries {
            listener.notify(commit);
        }
    }
}
