//! In-vat capability values.
//!
//! A [`CapRef`] is a cheap cloneable handle to one of the five value shapes
//! that can sit in a capability position: a remotable (exported in-vat
//! object), a presence (proxy for a kernel-allocated object elsewhere), a
//! promise, a device node, or a virtual-object representative. Handle
//! identity, not structure, is what the slot tables key on: every inner
//! allocation carries a [`CapKey`] drawn from a monotonic counter, so a dead
//! value's key is never mistaken for a fresh allocation at the same address.

use crate::promise::{LocalPromise, PromiseCell};
use std::cell::Cell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};
use vatrun_core::{Method, Vref};
use vatrun_marshal::Passable;

/// A passable with [`CapRef`] capability leaves; the value type user code
/// and liveslots exchange.
pub type Value = Passable<CapRef>;

/// A never-reused identity for an in-vat value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CapKey(u64);

static NEXT_CAP_KEY: AtomicU64 = AtomicU64::new(1);

impl CapKey {
    pub(crate) fn fresh() -> Self {
        CapKey(NEXT_CAP_KEY.fetch_add(1, Ordering::Relaxed))
    }
}

/// What a user-level method invocation produced.
pub enum InvokeOutcome {
    /// A settled value.
    Return(Value),
    /// A promise the caller should follow.
    Defer(LocalPromise),
    /// A thrown error, as a passable.
    Throw(Value),
}

/// The dispatch seam into user code: "invoke any method on this value".
pub trait MethodHandler {
    fn invoke(&self, method: &Method, args: Vec<Value>) -> InvokeOutcome;
}

impl<F> MethodHandler for F
where
    F: Fn(&Method, Vec<Value>) -> InvokeOutcome,
{
    fn invoke(&self, method: &Method, args: Vec<Value>) -> InvokeOutcome {
        self(method, args)
    }
}

struct RemotableInner {
    key: CapKey,
    iface: String,
    handler: Rc<dyn MethodHandler>,
}

/// A sealed in-vat pass-by-capability object this vat may export.
#[derive(Clone)]
pub struct Remotable {
    inner: Rc<RemotableInner>,
}

impl Remotable {
    pub fn new(iface: impl Into<String>, handler: impl MethodHandler + 'static) -> Self {
        Self {
            inner: Rc::new(RemotableInner {
                key: CapKey::fresh(),
                iface: iface.into(),
                handler: Rc::new(handler),
            }),
        }
    }

    pub fn iface(&self) -> &str {
        &self.inner.iface
    }

    pub(crate) fn handler(&self) -> Rc<dyn MethodHandler> {
        self.inner.handler.clone()
    }
}

struct PresenceInner {
    key: CapKey,
    vref: Vref,
    iface: Option<String>,
    disavowed: Cell<bool>,
}

/// A proxy for a kernel-allocated object living in some other vat.
#[derive(Clone)]
pub struct Presence {
    inner: Rc<PresenceInner>,
}

impl Presence {
    pub(crate) fn new(vref: Vref, iface: Option<String>) -> Self {
        Self {
            inner: Rc::new(PresenceInner {
                key: CapKey::fresh(),
                vref,
                iface,
                disavowed: Cell::new(false),
            }),
        }
    }

    pub fn vref(&self) -> Vref {
        self.inner.vref
    }

    pub fn iface(&self) -> Option<&str> {
        self.inner.iface.as_deref()
    }

    pub fn is_disavowed(&self) -> bool {
        self.inner.disavowed.get()
    }

    pub(crate) fn mark_disavowed(&self) {
        self.inner.disavowed.set(true);
    }
}

struct DeviceInner {
    key: CapKey,
    vref: Vref,
}

/// A proxy for a kernel device reachable through synchronous calls.
#[derive(Clone)]
pub struct DeviceNode {
    inner: Rc<DeviceInner>,
}

impl DeviceNode {
    pub(crate) fn new(vref: Vref) -> Self {
        Self {
            inner: Rc::new(DeviceInner {
                key: CapKey::fresh(),
                vref,
            }),
        }
    }

    pub fn vref(&self) -> Vref {
        self.inner.vref
    }
}

struct RepresentativeInner {
    key: CapKey,
    vref: Vref,
    handler: Option<Rc<dyn MethodHandler>>,
}

/// A transient in-vat handle for a virtual object whose canonical state
/// lives in the virtual-object store. Representatives are cheap to
/// materialize and may exist in several incarnations over a vat's life.
#[derive(Clone)]
pub struct Representative {
    inner: Rc<RepresentativeInner>,
}

impl Representative {
    /// Built by virtual-object stores when reanimating a paged-out object.
    pub fn new(vref: Vref, handler: Option<Rc<dyn MethodHandler>>) -> Self {
        Self {
            inner: Rc::new(RepresentativeInner {
                key: CapKey::fresh(),
                vref,
                handler,
            }),
        }
    }

    pub fn vref(&self) -> Vref {
        self.inner.vref
    }

    pub(crate) fn handler(&self) -> Option<Rc<dyn MethodHandler>> {
        self.inner.handler.clone()
    }
}

/// A cloneable handle to any in-vat capability value.
#[derive(Clone)]
pub enum CapRef {
    Remotable(Remotable),
    Presence(Presence),
    Promise(LocalPromise),
    Device(DeviceNode),
    Virtual(Representative),
}

impl CapRef {
    pub(crate) fn key(&self) -> CapKey {
        match self {
            CapRef::Remotable(r) => r.inner.key,
            CapRef::Presence(p) => p.inner.key,
            CapRef::Promise(p) => p.key(),
            CapRef::Device(d) => d.inner.key,
            CapRef::Virtual(v) => v.inner.key,
        }
    }

    pub(crate) fn downgrade(&self) -> WeakCap {
        let handle = match self {
            CapRef::Remotable(r) => WeakHandle::Remotable(Rc::downgrade(&r.inner)),
            CapRef::Presence(p) => WeakHandle::Presence(Rc::downgrade(&p.inner)),
            CapRef::Promise(p) => WeakHandle::Promise(p.downgrade()),
            CapRef::Device(d) => WeakHandle::Device(Rc::downgrade(&d.inner)),
            CapRef::Virtual(v) => WeakHandle::Virtual(Rc::downgrade(&v.inner)),
        };
        WeakCap {
            key: self.key(),
            handle,
        }
    }

    /// The advisory interface label serialized alongside this value.
    pub fn iface(&self) -> Option<String> {
        match self {
            CapRef::Remotable(r) => Some(r.iface().to_string()),
            CapRef::Presence(p) => p.iface().map(str::to_string),
            _ => None,
        }
    }

    /// The vref baked into the handle itself, for shapes that carry one.
    pub(crate) fn intrinsic_vref(&self) -> Option<Vref> {
        match self {
            CapRef::Presence(p) => Some(p.vref()),
            CapRef::Device(d) => Some(d.vref()),
            CapRef::Virtual(v) => Some(v.vref()),
            _ => None,
        }
    }

    pub fn as_promise(&self) -> Option<&LocalPromise> {
        match self {
            CapRef::Promise(p) => Some(p),
            _ => None,
        }
    }

    fn shape(&self) -> &'static str {
        match self {
            CapRef::Remotable(_) => "remotable",
            CapRef::Presence(_) => "presence",
            CapRef::Promise(_) => "promise",
            CapRef::Device(_) => "device",
            CapRef::Virtual(_) => "virtual",
        }
    }
}

impl PartialEq for CapRef {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl fmt::Debug for CapRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CapRef::{}({:?})", self.shape(), self.key())
    }
}

enum WeakHandle {
    Remotable(Weak<RemotableInner>),
    Presence(Weak<PresenceInner>),
    Promise(Weak<PromiseCell>),
    Device(Weak<DeviceInner>),
    Virtual(Weak<RepresentativeInner>),
}

/// A downgraded [`CapRef`] whose upgrade may fail once the value dies. The
/// identity key outlives the value so stale table entries stay detectable.
pub(crate) struct WeakCap {
    key: CapKey,
    handle: WeakHandle,
}

impl WeakCap {
    pub fn key(&self) -> CapKey {
        self.key
    }

    pub fn upgrade(&self) -> Option<CapRef> {
        match &self.handle {
            WeakHandle::Remotable(w) => w.upgrade().map(|inner| CapRef::Remotable(Remotable { inner })),
            WeakHandle::Presence(w) => w.upgrade().map(|inner| CapRef::Presence(Presence { inner })),
            WeakHandle::Promise(w) => w.upgrade().map(|cell| CapRef::Promise(LocalPromise { cell })),
            WeakHandle::Device(w) => w.upgrade().map(|inner| CapRef::Device(DeviceNode { inner })),
            WeakHandle::Virtual(w) => w.upgrade().map(|inner| CapRef::Virtual(Representative { inner })),
        }
    }

    pub fn is_live(&self) -> bool {
        match &self.handle {
            WeakHandle::Remotable(w) => w.strong_count() > 0,
            WeakHandle::Presence(w) => w.strong_count() > 0,
            WeakHandle::Promise(w) => w.strong_count() > 0,
            WeakHandle::Device(w) => w.strong_count() > 0,
            WeakHandle::Virtual(w) => w.strong_count() > 0,
        }
    }
}
