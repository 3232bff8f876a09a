//! The per-vat liveslots instance.
//!
//! [`Liveslots`] is a cheap cloneable handle over the single owned record of
//! vat state. Long-lived callbacks (promise watchers, user-held collections)
//! hold a [`WeakLiveslots`] so the vat can be torn down without chasing
//! cycles through its own tables.

use crate::config::VatConfig;
use crate::gc_tools::FinalizationRegistry;
use crate::powers::VatPowers;
use crate::queue::TaskQueue;
use crate::slots::SlotTables;
use crate::syscall::Syscall;
use crate::values::{CapRef, Remotable, Value};
use crate::virtual_store::{NullVirtualStore, VirtualObjectStore};
use crate::weak_store::RecognizerRegistry;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeSet, HashSet};
use std::rc::{Rc, Weak};
use tracing::error;
use vatrun_core::{CapData, VatError, Vref};

pub(crate) struct Inner {
    pub(crate) config: VatConfig,
    pub(crate) syscall: Rc<dyn Syscall>,
    pub(crate) store: Rc<dyn VirtualObjectStore>,
    pub(crate) queue: TaskQueue,
    pub(crate) tables: SlotTables,
    pub(crate) finalizers: FinalizationRegistry,
    /// Vrefs whose values were observed finalized; drained by the GC engine.
    pub(crate) dead_set: RefCell<BTreeSet<Vref>>,
    pub(crate) recognizers: RecognizerRegistry,
    /// Promise vrefs awaiting a `subscribe`, flushed per crank.
    pub(crate) pending_subscribes: RefCell<Vec<Vref>>,
    /// Promise vrefs ever subscribed; each is subscribed at most once.
    pub(crate) subscribed: RefCell<HashSet<Vref>>,
    /// The root object, held strongly for the vat's whole life.
    pub(crate) root: RefCell<Option<CapRef>>,
    pub(crate) terminated: Cell<bool>,
}

/// A handle to one vat's liveslots layer.
#[derive(Clone)]
pub struct Liveslots {
    pub(crate) inner: Rc<Inner>,
}

impl Liveslots {
    pub fn new(
        config: VatConfig,
        syscall: Rc<dyn Syscall>,
        store: Rc<dyn VirtualObjectStore>,
    ) -> Self {
        Self {
            inner: Rc::new(Inner {
                config,
                syscall,
                store,
                queue: TaskQueue::new(),
                tables: SlotTables::default(),
                finalizers: FinalizationRegistry::default(),
                dead_set: RefCell::new(BTreeSet::new()),
                recognizers: RecognizerRegistry::default(),
                pending_subscribes: RefCell::new(Vec::new()),
                subscribed: RefCell::new(HashSet::new()),
                root: RefCell::new(None),
                terminated: Cell::new(false),
            }),
        }
    }

    /// A vat with no virtual-object store.
    pub fn without_virtual_store(config: VatConfig, syscall: Rc<dyn Syscall>) -> Self {
        Self::new(config, syscall, Rc::new(NullVirtualStore))
    }

    /// Builds and registers the root object. The root always exports as
    /// `o+0` and stays reachable for the vat's whole life.
    pub fn build_root(&self, build: impl FnOnce(&VatPowers) -> Remotable) {
        let powers = self.powers();
        let root = CapRef::Remotable(build(&powers));
        self.register_value(Vref::root(), &root);
        self.inner
            .tables
            .pin_export(Vref::root(), root.clone());
        *self.inner.root.borrow_mut() = Some(root);
    }

    /// The capability facade handed to user code.
    pub fn powers(&self) -> VatPowers {
        VatPowers::new(self.clone())
    }

    pub fn vat_name(&self) -> &str {
        &self.inner.config.vat_name
    }

    pub fn is_terminated(&self) -> bool {
        self.inner.terminated.get()
    }

    pub(crate) fn queue(&self) -> &TaskQueue {
        &self.inner.queue
    }

    pub(crate) fn downgrade(&self) -> WeakLiveslots {
        WeakLiveslots(Rc::downgrade(&self.inner))
    }

    /// Terminates the vat over an unrecoverable error, reporting failure to
    /// the kernel. Later deliveries are ignored.
    pub(crate) fn terminate_with_error(&self, err: &VatError) {
        error!(vat = %self.inner.config.vat_name, %err, "terminating vat");
        if self.inner.terminated.replace(true) {
            return;
        }
        let info = self.error_capdata(err);
        self.inner.syscall.exit(true, info);
        // Strong pins (including the root) are what keep user closures, and
        // through them this vat, alive; a failed vat releases them.
        self.inner.tables.clear_strong_pins();
        *self.inner.root.borrow_mut() = None;
    }

    /// Best-effort serialization of an error for `exit`; falls back to a
    /// bare string body if the marshaller itself fails.
    pub(crate) fn error_capdata(&self, err: &VatError) -> CapData {
        let value: Value = vatrun_marshal::Passable::error("VatError", err.to_string());
        self.serialize(&value)
            .unwrap_or_else(|_| CapData::pure(format!("{:?}", err.to_string())))
    }
}

/// A weak handle for callbacks that must not keep the vat alive.
#[derive(Clone)]
pub(crate) struct WeakLiveslots(Weak<Inner>);

impl WeakLiveslots {
    pub fn upgrade(&self) -> Option<Liveslots> {
        self.0.upgrade().map(|inner| Liveslots { inner })
    }
}
