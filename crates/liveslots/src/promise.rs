//! Local promises.
//!
//! A [`LocalPromise`] is the in-vat representation of a not-yet-determined
//! value: either created by user code, allocated as the result of an outbound
//! send, or imported from the kernel. Settlement callbacks never run
//! synchronously with resolution; they are pushed onto the vat task queue,
//! so resolution order is observable only at microtask granularity.

use crate::queue::TaskQueue;
use crate::values::{CapKey, Value};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use vatrun_core::{VatError, VatResult, Vref};

/// The outcome of a settled promise: fulfillment value or rejection reason.
pub type Settlement = Result<Value, Value>;

type Watcher = Box<dyn FnOnce(Settlement)>;

pub(crate) enum PromiseState {
    Pending { watchers: Vec<Watcher> },
    Fulfilled(Value),
    Rejected(Value),
}

pub(crate) struct PromiseCell {
    key: CapKey,
    state: RefCell<PromiseState>,
    /// Present while the promise is unresolved and has a kernel-visible
    /// vref that sends can pipeline through.
    pipeline: RefCell<Option<Rc<UnresolvedHandler>>>,
}

/// A cloneable handle to an in-vat promise.
#[derive(Clone)]
pub struct LocalPromise {
    pub(crate) cell: Rc<PromiseCell>,
}

impl std::fmt::Debug for LocalPromise {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalPromise")
            .field("key", &self.cell.key)
            .finish()
    }
}

impl LocalPromise {
    /// Creates an unresolved promise together with its resolver.
    pub fn pair(queue: &TaskQueue) -> (LocalPromise, Resolver) {
        let cell = Rc::new(PromiseCell {
            key: CapKey::fresh(),
            state: RefCell::new(PromiseState::Pending {
                watchers: Vec::new(),
            }),
            pipeline: RefCell::new(None),
        });
        let promise = LocalPromise { cell: cell.clone() };
        let resolver = Resolver {
            cell,
            queue: queue.clone(),
        };
        (promise, resolver)
    }

    pub(crate) fn key(&self) -> CapKey {
        self.cell.key
    }

    pub(crate) fn downgrade(&self) -> std::rc::Weak<PromiseCell> {
        Rc::downgrade(&self.cell)
    }

    pub fn is_settled(&self) -> bool {
        !matches!(*self.cell.state.borrow(), PromiseState::Pending { .. })
    }

    /// The recorded settlement, if any.
    pub fn settlement(&self) -> Option<Settlement> {
        match &*self.cell.state.borrow() {
            PromiseState::Pending { .. } => None,
            PromiseState::Fulfilled(value) => Some(Ok(value.clone())),
            PromiseState::Rejected(reason) => Some(Err(reason.clone())),
        }
    }

    /// Schedules `watcher` to run (as a queue task) once the promise
    /// settles; immediately schedules it if it already has.
    pub fn when(&self, queue: &TaskQueue, watcher: impl FnOnce(Settlement) + 'static) {
        let mut state = self.cell.state.borrow_mut();
        match &mut *state {
            PromiseState::Pending { watchers } => watchers.push(Box::new(watcher)),
            PromiseState::Fulfilled(value) => {
                let settlement = Ok(value.clone());
                queue.push(move || watcher(settlement));
            }
            PromiseState::Rejected(reason) => {
                let settlement = Err(reason.clone());
                queue.push(move || watcher(settlement));
            }
        }
    }

    /// Installs the pipeline handler carrying this promise's kernel-visible
    /// vref. Replaces any previous handler.
    pub(crate) fn install_pipeline(&self, vpid: Vref) {
        *self.cell.pipeline.borrow_mut() = Some(Rc::new(UnresolvedHandler::new(vpid)));
    }

    pub(crate) fn pipeline(&self) -> Option<Rc<UnresolvedHandler>> {
        self.cell.pipeline.borrow().clone()
    }

    /// Identity comparison; promises have no structural equality.
    pub fn same(&self, other: &LocalPromise) -> bool {
        Rc::ptr_eq(&self.cell, &other.cell)
    }
}

/// The write side of a [`LocalPromise`].
#[derive(Clone)]
pub struct Resolver {
    cell: Rc<PromiseCell>,
    queue: TaskQueue,
}

impl Resolver {
    pub fn resolve(&self, value: Value) {
        self.settle(PromiseState::Fulfilled(value));
    }

    pub fn reject(&self, reason: Value) {
        self.settle(PromiseState::Rejected(reason));
    }

    /// Settles the promise and schedules its watchers. Re-settlement of an
    /// already-settled promise is ignored.
    fn settle(&self, next: PromiseState) {
        let watchers = {
            let mut state = self.cell.state.borrow_mut();
            match &mut *state {
                PromiseState::Pending { watchers } => {
                    let watchers = std::mem::take(watchers);
                    *state = next;
                    watchers
                }
                _ => return,
            }
        };
        if let Some(handler) = self.cell.pipeline.borrow_mut().take() {
            handler.retire();
        }
        let settlement = match &*self.cell.state.borrow() {
            PromiseState::Fulfilled(value) => Ok(value.clone()),
            PromiseState::Rejected(reason) => Err(reason.clone()),
            PromiseState::Pending { .. } => return,
        };
        for watcher in watchers {
            let settlement = settlement.clone();
            self.queue.push(move || watcher(settlement));
        }
    }

    pub(crate) fn promise(&self) -> LocalPromise {
        LocalPromise {
            cell: self.cell.clone(),
        }
    }
}

/// The pre-resolution handler of a pipelinable promise. Sends routed through
/// it target the promise's vref; once the promise settles the handler is
/// dead, and driving it again is a programming error.
pub(crate) struct UnresolvedHandler {
    vpid: Vref,
    done: Cell<bool>,
}

impl UnresolvedHandler {
    fn new(vpid: Vref) -> Self {
        Self {
            vpid,
            done: Cell::new(false),
        }
    }

    /// The vref sends should target, or `HandlerAfterResolution` once the
    /// promise has settled.
    pub fn target(&self) -> VatResult<Vref> {
        if self.done.get() {
            Err(VatError::HandlerAfterResolution)
        } else {
            Ok(self.vpid)
        }
    }

    pub fn retire(&self) {
        self.done.set(true);
    }
}
