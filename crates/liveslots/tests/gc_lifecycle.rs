//! Distributed-GC lifecycle coverage: weak recognition, virtual-object
//! store interplay, and kernel protocol edge cases.

mod common;

use common::{args_with_slots, make_vat, no_args, vref};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use vatrun_core::{CapData, Method, VatResult, Vref};
use vatrun_liveslots::testing::{RecordingSyscall, SyscallEvent};
use vatrun_liveslots::{
    CapRef, Delivery, InvokeOutcome, Liveslots, Passable, Remotable, Representative, Value,
    VatConfig, VirtualObjectStore,
};

fn message(target: &str, method: &str, args: CapData, result: Option<&str>) -> Delivery {
    Delivery::Message {
        target: vref(target),
        method: method.to_string(),
        args,
        result: result.map(vref),
    }
}

#[tokio::test]
async fn weak_recognition_defers_import_retirement() {
    let (vat, syscall) = make_vat("weak-recognition");
    let stash: Rc<RefCell<Option<Value>>> = Rc::new(RefCell::new(None));
    let cell = stash.clone();
    vat.build_root(move |powers| {
        let powers = powers.clone();
        let cell = cell.clone();
        let weak_set = Rc::new(powers.make_weak_set());
        Remotable::new("root", move |method: &Method, args: Vec<Value>| {
            match method {
                Method::Name(name) if name == "store" => {
                    let Some(value @ Passable::Cap(_)) = args.into_iter().next() else {
                        return InvokeOutcome::Throw(Passable::error("TypeError", "no cap"));
                    };
                    if let Some(cap) = value.as_cap() {
                        weak_set.insert(cap);
                    }
                    *cell.borrow_mut() = Some(value);
                }
                Method::Name(name) if name == "clear" => {
                    *cell.borrow_mut() = None;
                }
                _ => {}
            }
            InvokeOutcome::Return(Passable::Null)
        })
    });

    vat.dispatch(message("o+0", "store", args_with_slots(&["o-10"]), None))
        .await;
    vat.dispatch(message("o+0", "clear", no_args(), None)).await;

    let events = syscall.events();
    assert!(events.contains(&SyscallEvent::DropImports(vec![vref("o-10")])));
    assert!(
        !events
            .iter()
            .any(|e| matches!(e, SyscallEvent::RetireImports(_))),
        "weak-set membership keeps the import recognizable"
    );
}

/// A scripted virtual-object store: each representative may hold one import
/// reachable until the representative itself is dropped.
#[derive(Default)]
struct FakeStore {
    reachable: RefCell<HashSet<Vref>>,
    holds: RefCell<HashMap<Vref, Vref>>,
    released: RefCell<Vec<Vref>>,
    dropped: RefCell<Vec<Vref>>,
}

impl FakeStore {
    fn hold(&self, representative: Vref, import: Vref) {
        self.reachable.borrow_mut().insert(import);
        self.holds.borrow_mut().insert(representative, import);
    }
}

impl VirtualObjectStore for FakeStore {
    fn reanimate(&self, vref: Vref) -> VatResult<CapRef> {
        Ok(CapRef::Virtual(Representative::new(vref, None)))
    }

    fn is_reachable(&self, vref: Vref) -> bool {
        self.reachable.borrow().contains(&vref)
    }

    fn is_recognizable(&self, _vref: Vref) -> bool {
        false
    }

    fn drop_representative(&self, vref: Vref) -> bool {
        self.dropped.borrow_mut().push(vref);
        match self.holds.borrow_mut().remove(&vref) {
            Some(import) => {
                self.reachable.borrow_mut().remove(&import);
                self.released.borrow_mut().push(import);
                true
            }
            None => false,
        }
    }

    fn drain_released(&self) -> Vec<Vref> {
        std::mem::take(&mut *self.released.borrow_mut())
    }

    fn retire_recognizable(&self, _vref: Vref) {}
}

#[tokio::test]
async fn store_reachability_blocks_then_releases_imports() {
    let syscall = RecordingSyscall::new();
    let store = Rc::new(FakeStore::default());
    store.hold(vref("o+v1"), vref("o-20"));
    let vat = Liveslots::new(VatConfig::named("virtual"), syscall.clone(), store.clone());

    let stash: Rc<RefCell<Vec<Value>>> = Rc::new(RefCell::new(Vec::new()));
    let cell = stash.clone();
    vat.build_root(move |_powers| {
        let cell = cell.clone();
        Remotable::new("root", move |method: &Method, args: Vec<Value>| {
            match method {
                Method::Name(name) if name == "store" => cell.borrow_mut().extend(args),
                Method::Name(name) if name == "clear" => cell.borrow_mut().clear(),
                _ => {}
            }
            InvokeOutcome::Return(Passable::Null)
        })
    });

    // The presence for o-20 comes and goes, but the store still holds the
    // import reachable: no dropImports yet.
    vat.dispatch(message("o+0", "store", args_with_slots(&["o-20"]), None))
        .await;
    vat.dispatch(message("o+0", "clear", no_args(), None)).await;
    assert!(
        !syscall
            .events()
            .iter()
            .any(|e| matches!(e, SyscallEvent::DropImports(_))),
        "paged-out state keeps the import alive"
    );

    // A representative of o+v1 is materialized for the delivery and dropped
    // at end of crank; the store releases o-20 and the same drain reports
    // it.
    vat.dispatch(message("o+0", "touch", args_with_slots(&["o+v1"]), None))
        .await;
    assert_eq!(*store.dropped.borrow(), vec![vref("o+v1")]);
    assert!(syscall
        .events()
        .contains(&SyscallEvent::DropImports(vec![vref("o-20")])));
}

#[tokio::test]
async fn kernel_retiring_pinned_export_is_tolerated() {
    let (vat, syscall) = make_vat("retire-pinned");
    let made: Rc<RefCell<Option<CapRef>>> = Rc::new(RefCell::new(None));
    let cell = made.clone();
    vat.build_root(move |_powers| {
        let cell = cell.clone();
        Remotable::new("root", move |_method: &Method, _args: Vec<Value>| {
            let remotable = CapRef::Remotable(Remotable::new(
                "thing",
                |_m: &Method, _a: Vec<Value>| InvokeOutcome::Return(Passable::Null),
            ));
            *cell.borrow_mut() = Some(remotable.clone());
            InvokeOutcome::Return(Passable::Cap(remotable))
        })
    });

    vat.dispatch(message("o+0", "make", no_args(), Some("p-40")))
        .await;
    assert!(vat.test_hooks().export_pinned(vref("o+1")));

    // retireExports without a preceding dropExports is a kernel protocol
    // violation; the vat logs and keeps going.
    vat.dispatch(Delivery::RetireExports {
        vrefs: vec![vref("o+1")],
    })
    .await;
    assert!(vat.test_hooks().export_pinned(vref("o+1")));
    assert!(!vat.is_terminated());
    assert!(!syscall
        .events()
        .iter()
        .any(|e| matches!(e, SyscallEvent::Exit { .. })));
}

#[tokio::test]
async fn notify_for_unknown_promise_terminates_the_vat() {
    let (vat, syscall) = make_vat("bad-notify");
    vat.build_root(|_powers| {
        Remotable::new("root", |_m: &Method, _a: Vec<Value>| {
            InvokeOutcome::Return(Passable::Null)
        })
    });

    vat.dispatch(Delivery::Notify {
        resolutions: vec![vatrun_liveslots::Resolution::fulfilled(
            vref("p-9"),
            CapData::pure("null"),
        )],
    })
    .await;

    assert!(vat.is_terminated());
    assert!(syscall
        .events()
        .iter()
        .any(|e| matches!(e, SyscallEvent::Exit { failure: true, .. })));

    // Deliveries after termination are ignored.
    syscall.drain();
    vat.dispatch(message("o+0", "poke", no_args(), None)).await;
    assert!(syscall.events().is_empty());
}

#[tokio::test]
async fn result_vpid_reuse_terminates_the_vat() {
    let (vat, syscall) = make_vat("result-reuse");
    vat.build_root(|powers| {
        let powers = powers.clone();
        Remotable::new("root", move |_m: &Method, _a: Vec<Value>| {
            // Never settles, so the result vpid stays registered.
            let (promise, _resolver) = powers.make_promise();
            InvokeOutcome::Defer(promise)
        })
    });

    vat.dispatch(message("o+0", "hold", no_args(), Some("p-40")))
        .await;
    assert!(!vat.is_terminated());

    vat.dispatch(message("o+0", "hold", no_args(), Some("p-40")))
        .await;
    assert!(vat.is_terminated());
    assert!(syscall
        .events()
        .iter()
        .any(|e| matches!(e, SyscallEvent::Exit { failure: true, .. })));
}
