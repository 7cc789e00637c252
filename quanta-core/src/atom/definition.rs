//! Atom Definitions
//!
//! An atom is an immutable descriptor of a state cell: how to read its value,
//! and optionally how to translate an update into writes. Constructing an
//! atom never runs anything; the store decides when to compute.
//!
//! # Forms
//!
//! - Primitive: holds a value, written by replacement.
//! - Derived: a read-only function of other atoms, sync or async.
//! - Writable derived: a derived read plus a write function that turns an
//!   incoming value into `set` calls on itself or on other atoms.
//!
//! # Type Erasure
//!
//! The store keeps atoms of every value type in one graph, so internally a
//! definition stores values as `Arc<dyn Any>` and carries a monomorphized
//! equality function. `Atom<T>` is the typed handle on top of that.

use std::any::{type_name, Any};
use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};

use super::id::AtomId;
use crate::error::AtomError;
use crate::reactive::{ReadContext, WriteContext};

/// Bound for values stored in atoms.
///
/// `PartialEq` is the atom's equality semantics: a recomputation that yields
/// an equal value does not propagate further.
pub trait AtomValue: Clone + PartialEq + Send + Sync + 'static {}

impl<T> AtomValue for T where T: Clone + PartialEq + Send + Sync + 'static {}

/// Type-erased atom value.
pub(crate) type Value = Arc<dyn Any + Send + Sync>;

/// Result of running a read function.
pub(crate) enum Computation {
    Ready(Value),
    Async(BoxFuture<'static, Result<Value, AtomError>>),
}

pub(crate) type ReadFn =
    Arc<dyn Fn(&mut ReadContext<'_>) -> Result<Computation, AtomError> + Send + Sync>;

pub(crate) type WriteFn =
    Arc<dyn Fn(&mut WriteContext<'_>, Value) -> Result<(), AtomError> + Send + Sync>;

#[derive(Clone)]
pub(crate) enum Reader {
    /// The value is whatever was last stored in the slot, or the init.
    Stored,
    Compute(ReadFn),
}

#[derive(Clone)]
pub(crate) enum Writer {
    /// Replace the stored value.
    Replace,
    Custom(WriteFn),
}

/// The type-erased descriptor shared by all handles of one atom.
#[derive(Clone)]
pub(crate) struct AtomDef {
    pub(crate) id: AtomId,
    pub(crate) label: Option<Cow<'static, str>>,
    pub(crate) init: Option<Value>,
    pub(crate) reader: Reader,
    pub(crate) writer: Option<Writer>,
    eq: fn(&Value, &Value) -> bool,
    type_name: &'static str,
}

impl AtomDef {
    pub(crate) fn is_writable(&self) -> bool {
        self.writer.is_some()
    }

    pub(crate) fn values_equal(&self, a: &Value, b: &Value) -> bool {
        Arc::ptr_eq(a, b) || (self.eq)(a, b)
    }
}

impl fmt::Debug for AtomDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AtomDef")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("type", &self.type_name)
            .field("derived", &matches!(self.reader, Reader::Compute(_)))
            .field("writable", &self.is_writable())
            .finish()
    }
}

fn erased_eq<T: AtomValue>(a: &Value, b: &Value) -> bool {
    match (a.downcast_ref::<T>(), b.downcast_ref::<T>()) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

pub(crate) fn erase<T: AtomValue>(value: T) -> Value {
    Arc::new(value)
}

/// Recover a typed value. Handles are typed, so a mismatch is a broken
/// invariant rather than a caller error.
pub(crate) fn downcast<T: AtomValue>(value: &Value) -> T {
    value
        .downcast_ref::<T>()
        .cloned()
        .expect("atom value type mismatch")
}

fn sync_reader<T, F>(read: F) -> Reader
where
    T: AtomValue,
    F: Fn(&mut ReadContext<'_>) -> Result<T, AtomError> + Send + Sync + 'static,
{
    let read: ReadFn = Arc::new(move |ctx: &mut ReadContext<'_>| {
        read(ctx).map(|value| Computation::Ready(erase(value)))
    });
    Reader::Compute(read)
}

fn async_reader<T, F, Fut>(read: F) -> Reader
where
    T: AtomValue,
    F: Fn(&mut ReadContext<'_>) -> Result<Fut, AtomError> + Send + Sync + 'static,
    Fut: Future<Output = Result<T, AtomError>> + Send + 'static,
{
    let read: ReadFn = Arc::new(move |ctx: &mut ReadContext<'_>| {
        let pending = read(ctx)?;
        Ok(Computation::Async(
            pending.map(|result| result.map(erase::<T>)).boxed(),
        ))
    });
    Reader::Compute(read)
}

fn custom_writer<T, W>(write: W) -> Writer
where
    T: AtomValue,
    W: Fn(&mut WriteContext<'_>, T) -> Result<(), AtomError> + Send + Sync + 'static,
{
    let write: WriteFn = Arc::new(move |ctx: &mut WriteContext<'_>, value: Value| {
        write(ctx, downcast::<T>(&value))
    });
    Writer::Custom(write)
}

/// A typed handle to an atom.
///
/// Handles are cheap to clone and compare by identity.
///
/// # Example
///
/// ```rust,ignore
/// let count = Atom::new(0);
///
/// let doubled = Atom::derived({
///     let count = count.clone();
///     move |get| Ok(get.get(&count)? * 2)
/// });
/// ```
pub struct Atom<T> {
    def: Arc<AtomDef>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: AtomValue> Atom<T> {
    fn from_parts(init: Option<T>, reader: Reader, writer: Option<Writer>) -> Self {
        Self {
            def: Arc::new(AtomDef {
                id: AtomId::next(),
                label: None,
                init: init.map(erase),
                reader,
                writer,
                eq: erased_eq::<T>,
                type_name: type_name::<T>(),
            }),
            _marker: PhantomData,
        }
    }

    /// Create a primitive atom holding `init` until it is written.
    pub fn new(init: T) -> Self {
        Self::from_parts(Some(init), Reader::Stored, Some(Writer::Replace))
    }

    /// Create a read-only atom computed from other atoms.
    pub fn derived<F>(read: F) -> Self
    where
        F: Fn(&mut ReadContext<'_>) -> Result<T, AtomError> + Send + Sync + 'static,
    {
        Self::from_parts(None, sync_reader(read), None)
    }

    /// Create a read-only atom whose value is produced asynchronously.
    ///
    /// `read` reads its dependencies through the context and returns the
    /// future that finishes the computation. The future cannot read atoms
    /// itself, so everything it needs must be captured up front.
    pub fn derived_async<F, Fut>(read: F) -> Self
    where
        F: Fn(&mut ReadContext<'_>) -> Result<Fut, AtomError> + Send + Sync + 'static,
        Fut: Future<Output = Result<T, AtomError>> + Send + 'static,
    {
        Self::from_parts(None, async_reader(read), None)
    }

    /// Create a derived atom with an explicit write function.
    pub fn writable<R, W>(read: R, write: W) -> Self
    where
        R: Fn(&mut ReadContext<'_>) -> Result<T, AtomError> + Send + Sync + 'static,
        W: Fn(&mut WriteContext<'_>, T) -> Result<(), AtomError> + Send + Sync + 'static,
    {
        Self::from_parts(None, sync_reader(read), Some(custom_writer(write)))
    }

    /// Like [`Atom::writable`], with an asynchronous read.
    pub fn writable_async<R, Fut, W>(read: R, write: W) -> Self
    where
        R: Fn(&mut ReadContext<'_>) -> Result<Fut, AtomError> + Send + Sync + 'static,
        Fut: Future<Output = Result<T, AtomError>> + Send + 'static,
        W: Fn(&mut WriteContext<'_>, T) -> Result<(), AtomError> + Send + Sync + 'static,
    {
        Self::from_parts(None, async_reader(read), Some(custom_writer(write)))
    }

    /// Set the value reported before the first computation settles.
    ///
    /// On a handle that has already been cloned this returns a new atom;
    /// the other handles keep the original.
    pub fn with_init(mut self, init: T) -> Self {
        self.def_mut().init = Some(erase(init));
        self
    }

    /// Attach a debug label, used in logs.
    ///
    /// Like [`Atom::with_init`], a shared handle yields a new atom.
    pub fn with_label(mut self, label: impl Into<Cow<'static, str>>) -> Self {
        self.def_mut().label = Some(label.into());
        self
    }

    /// One identity never maps to two descriptors: a shared descriptor is
    /// copied under a fresh ID before it is changed.
    fn def_mut(&mut self) -> &mut AtomDef {
        if Arc::get_mut(&mut self.def).is_none() {
            let mut copy = AtomDef::clone(&self.def);
            copy.id = AtomId::next();
            self.def = Arc::new(copy);
        }
        Arc::make_mut(&mut self.def)
    }
}

impl<T> Atom<T> {
    /// Get the atom's unique ID.
    pub fn id(&self) -> AtomId {
        self.def.id
    }

    /// Get the debug label, if any.
    pub fn label(&self) -> Option<&str> {
        self.def.label.as_deref()
    }

    /// Whether updates can be dispatched against this atom.
    pub fn is_writable(&self) -> bool {
        self.def.is_writable()
    }

    pub(crate) fn def(&self) -> &Arc<AtomDef> {
        &self.def
    }
}

impl<T> Clone for Atom<T> {
    fn clone(&self) -> Self {
        Self {
            def: Arc::clone(&self.def),
            _marker: PhantomData,
        }
    }
}

impl<T> PartialEq for Atom<T> {
    fn eq(&self, other: &Self) -> bool {
        self.def.id == other.def.id
    }
}

impl<T> Eq for Atom<T> {}

impl<T> Hash for Atom<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.def.id.hash(state);
    }
}

impl<T> fmt::Debug for Atom<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Atom")
            .field("id", &self.def.id)
            .field("label", &self.def.label)
            .field("writable", &self.def.is_writable())
            .finish()
    }
}
