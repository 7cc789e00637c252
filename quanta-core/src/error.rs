//! Error types.
//!
//! `AtomError` is what atom functions return and what readers observe. It is
//! `Clone` because a single failed computation is handed to every reader that
//! awaits it.

use std::fmt;
use std::sync::Arc;

use crate::atom::AtomId;

/// Errors raised while computing, writing or reading atoms.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AtomError {
    /// The atom has no stored value and no initial value to fall back on.
    #[error("atom {0} has no value and no initial value")]
    Uninitialized(AtomId),

    /// An update was dispatched against an atom without a write function.
    #[error("atom {0} is read-only")]
    NotWritable(AtomId),

    /// The value depends on an asynchronous computation that has not settled.
    ///
    /// Returning this from a read function suspends the reading atom until
    /// the named atom settles.
    #[error("atom {0} is pending")]
    Pending(AtomId),

    /// The atom transitively read itself while computing.
    #[error("dependency cycle detected at atom {0}")]
    Cycle(AtomId),

    /// Write forwarding went deeper than `EngineConfig::max_write_depth`.
    #[error("write forwarding exceeded depth {depth} at atom {atom}")]
    WriteDepthExceeded { atom: AtomId, depth: usize },

    /// An atom function dispatched back into the store that is running it.
    #[error("store dispatch from inside an atom function")]
    Reentrant,

    /// An asynchronous computation was produced outside a tokio runtime.
    #[error("no async runtime available to drive atom {0}")]
    NoRuntime(AtomId),

    /// The store went away while a reader was waiting on it.
    #[error("store closed")]
    Closed,

    /// A computation failed with a caller-provided error.
    #[error(transparent)]
    Failed(Arc<dyn std::error::Error + Send + Sync>),

    /// A computation failed with a plain message.
    #[error("{0}")]
    Message(Arc<str>),
}

impl AtomError {
    /// Wrap an arbitrary error raised by an atom function.
    pub fn failed<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Failed(Arc::new(error))
    }

    /// Build an error from a message.
    pub fn message(message: impl fmt::Display) -> Self {
        Self::Message(message.to_string().into())
    }

    /// Whether this error only signals suspension on a pending atom.
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }
}

impl PartialEq for AtomError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Uninitialized(a), Self::Uninitialized(b))
            | (Self::NotWritable(a), Self::NotWritable(b))
            | (Self::Pending(a), Self::Pending(b))
            | (Self::Cycle(a), Self::Cycle(b))
            | (Self::NoRuntime(a), Self::NoRuntime(b)) => a == b,
            (
                Self::WriteDepthExceeded { atom: a, depth: x },
                Self::WriteDepthExceeded { atom: b, depth: y },
            ) => a == b && x == y,
            (Self::Reentrant, Self::Reentrant) | (Self::Closed, Self::Closed) => true,
            // Caller errors compare by identity.
            (Self::Failed(a), Self::Failed(b)) => Arc::ptr_eq(a, b),
            (Self::Message(a), Self::Message(b)) => a == b,
            _ => false,
        }
    }
}

/// Errors raised while loading or validating an `EngineConfig`.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse engine config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid engine config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("backend unreachable")]
    struct Backend;

    #[test]
    fn failed_wraps_source_error() {
        let err = AtomError::failed(Backend);
        assert_eq!(err.to_string(), "backend unreachable");
        assert!(!err.is_pending());
    }

    #[test]
    fn pending_is_recognised() {
        let id = AtomId::from(7);
        assert!(AtomError::Pending(id).is_pending());
        assert_eq!(AtomError::Pending(id).to_string(), "atom #7 is pending");
    }

    #[test]
    fn message_clones_cheaply() {
        let err = AtomError::message("boom");
        let copy = err.clone();
        assert_eq!(err.to_string(), copy.to_string());
    }
}
