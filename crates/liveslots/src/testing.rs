//! Test doubles and introspection hooks.
//!
//! [`RecordingSyscall`] stands in for the kernel: it records every syscall
//! in order and answers device calls and vatstore reads from scripted
//! tables. [`TestHooks`] exposes read-only views of the registry for
//! invariant checks; production code never touches it.

use crate::syscall::{Resolution, Syscall};
use crate::values::CapRef;
use crate::vat::Liveslots;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use vatrun_core::{CapData, VatError, VatResult, Vref};

/// One recorded syscall, in the order the vat issued it.
#[derive(Debug, Clone, PartialEq)]
pub enum SyscallEvent {
    Send {
        target: Vref,
        method: String,
        args: CapData,
        result: Option<Vref>,
    },
    Resolve(Vec<Resolution>),
    Subscribe(Vref),
    DropImports(Vec<Vref>),
    RetireImports(Vec<Vref>),
    RetireExports(Vec<Vref>),
    CallNow {
        target: Vref,
        method: String,
        args: CapData,
    },
    Exit {
        failure: bool,
        info: CapData,
    },
    VatstoreGet(String),
    VatstoreSet(String, String),
    VatstoreDelete(String),
}

/// A kernel double that records everything.
#[derive(Default)]
pub struct RecordingSyscall {
    events: RefCell<Vec<SyscallEvent>>,
    device_results: RefCell<HashMap<String, CapData>>,
    vatstore: RefCell<BTreeMap<String, String>>,
}

impl RecordingSyscall {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Everything recorded so far.
    pub fn events(&self) -> Vec<SyscallEvent> {
        self.events.borrow().clone()
    }

    /// Takes and clears the recorded events.
    pub fn drain(&self) -> Vec<SyscallEvent> {
        std::mem::take(&mut *self.events.borrow_mut())
    }

    /// Scripts the answer for `callNow` invocations of `method`.
    pub fn script_device_result(&self, method: impl Into<String>, result: CapData) {
        self.device_results.borrow_mut().insert(method.into(), result);
    }

    /// Direct view of the backing vatstore.
    pub fn vatstore_snapshot(&self) -> BTreeMap<String, String> {
        self.vatstore.borrow().clone()
    }

    fn record(&self, event: SyscallEvent) {
        self.events.borrow_mut().push(event);
    }
}

impl Syscall for RecordingSyscall {
    fn send(&self, target: Vref, method: &str, args: CapData, result: Option<Vref>) {
        self.record(SyscallEvent::Send {
            target,
            method: method.to_string(),
            args,
            result,
        });
    }

    fn resolve(&self, resolutions: &[Resolution]) {
        self.record(SyscallEvent::Resolve(resolutions.to_vec()));
    }

    fn subscribe(&self, vpid: Vref) {
        self.record(SyscallEvent::Subscribe(vpid));
    }

    fn drop_imports(&self, vrefs: &[Vref]) {
        self.record(SyscallEvent::DropImports(vrefs.to_vec()));
    }

    fn retire_imports(&self, vrefs: &[Vref]) {
        self.record(SyscallEvent::RetireImports(vrefs.to_vec()));
    }

    fn retire_exports(&self, vrefs: &[Vref]) {
        self.record(SyscallEvent::RetireExports(vrefs.to_vec()));
    }

    fn call_now(&self, target: Vref, method: &str, args: CapData) -> VatResult<CapData> {
        self.record(SyscallEvent::CallNow {
            target,
            method: method.to_string(),
            args,
        });
        match self.device_results.borrow().get(method) {
            Some(result) => Ok(result.clone()),
            None => Err(VatError::protocol(format!("no device behind {target}"))),
        }
    }

    fn exit(&self, failure: bool, info: CapData) {
        self.record(SyscallEvent::Exit { failure, info });
    }

    fn vatstore_get(&self, key: &str) -> Option<String> {
        self.record(SyscallEvent::VatstoreGet(key.to_string()));
        self.vatstore.borrow().get(key).cloned()
    }

    fn vatstore_set(&self, key: &str, value: &str) {
        self.record(SyscallEvent::VatstoreSet(key.to_string(), value.to_string()));
        self.vatstore
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
    }

    fn vatstore_delete(&self, key: &str) {
        self.record(SyscallEvent::VatstoreDelete(key.to_string()));
        self.vatstore.borrow_mut().remove(key);
    }
}

/// Read-only registry introspection for tests.
pub struct TestHooks {
    vat: Liveslots,
}

impl TestHooks {
    /// True when `vref` has an entry in the slot table, live or collected.
    pub fn slot_registered(&self, vref: Vref) -> bool {
        self.vat.inner.tables.has_slot(vref)
    }

    /// True when `vref` is backed by a live value right now.
    pub fn slot_live(&self, vref: Vref) -> bool {
        self.vat.get_val_for_slot(vref).is_some()
    }

    pub fn in_dead_set(&self, vref: Vref) -> bool {
        self.vat.inner.dead_set.borrow().contains(&vref)
    }

    pub fn export_pinned(&self, vref: Vref) -> bool {
        self.vat.inner.tables.is_pinned_export(vref)
    }

    pub fn slot_for_val(&self, value: &CapRef) -> Option<Vref> {
        self.vat.get_slot_for_val(value)
    }

    pub fn val_for_slot(&self, vref: Vref) -> Option<CapRef> {
        self.vat.get_val_for_slot(vref)
    }
}

impl Liveslots {
    /// Introspection used by the test suites; not part of the vat contract.
    pub fn test_hooks(&self) -> TestHooks {
        TestHooks { vat: self.clone() }
    }
}
