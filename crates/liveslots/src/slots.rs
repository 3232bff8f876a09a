//! The Slot Registry.
//!
//! Bidirectional mapping between in-vat values and vrefs, plus the strength
//! discipline that makes distributed GC sound: both direction tables are
//! weak over the value, exports the kernel may still reach are pinned in
//! `exported_remotables`, unresolved exposed promises are pinned in
//! `pending_promises`, and kernel-decided promises keep their resolver in
//! `imported_promises`. A value observed finalized moves its vref into the
//! dead set; re-introduction of the same vref yields a fresh value under the
//! same token.

use crate::promise::{LocalPromise, Resolver};
use crate::values::{CapKey, CapRef, DeviceNode, Presence, WeakCap};
use crate::vat::Liveslots;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use tracing::{debug, error};
use vatrun_core::constants::{FIRST_EXPORT_ID, FIRST_PROMISE_ID};
use vatrun_core::{Allocator, RefKind, VatError, VatResult, Vref};

pub(crate) struct SlotTables {
    val_to_slot: RefCell<HashMap<CapKey, Vref>>,
    slot_to_val: RefCell<HashMap<Vref, WeakCap>>,
    exported_remotables: RefCell<HashMap<Vref, CapRef>>,
    pending_promises: RefCell<HashMap<Vref, LocalPromise>>,
    imported_promises: RefCell<HashMap<Vref, Resolver>>,
    next_export_id: Cell<u64>,
    next_promise_id: Cell<u64>,
}

impl Default for SlotTables {
    fn default() -> Self {
        Self {
            val_to_slot: RefCell::new(HashMap::new()),
            slot_to_val: RefCell::new(HashMap::new()),
            exported_remotables: RefCell::new(HashMap::new()),
            pending_promises: RefCell::new(HashMap::new()),
            imported_promises: RefCell::new(HashMap::new()),
            next_export_id: Cell::new(FIRST_EXPORT_ID),
            next_promise_id: Cell::new(FIRST_PROMISE_ID),
        }
    }
}

impl SlotTables {
    pub fn slot_for_key(&self, key: CapKey) -> Option<Vref> {
        self.val_to_slot.borrow().get(&key).copied()
    }

    pub fn value_for_slot(&self, vref: Vref) -> Option<CapRef> {
        self.slot_to_val.borrow().get(&vref).and_then(WeakCap::upgrade)
    }

    pub fn has_slot(&self, vref: Vref) -> bool {
        self.slot_to_val.borrow().contains_key(&vref)
    }

    /// Installs a value under a vref in both direction tables. A stale entry
    /// for the same vref (an earlier, collected incarnation) is pruned.
    pub fn register(&self, vref: Vref, value: &CapRef) {
        self.val_to_slot.borrow_mut().insert(value.key(), vref);
        if let Some(old) = self.slot_to_val.borrow_mut().insert(vref, value.downgrade()) {
            if old.key() != value.key() {
                self.val_to_slot.borrow_mut().remove(&old.key());
            }
        }
    }

    /// Removes a vref from both direction tables, keyed prune included.
    pub fn forget_slot(&self, vref: Vref) {
        if let Some(weak) = self.slot_to_val.borrow_mut().remove(&vref) {
            self.val_to_slot.borrow_mut().remove(&weak.key());
        }
    }

    /// Removes a finalized entry, but only when it still belongs to the
    /// incarnation that died. Returns whether the entry was removed.
    pub fn forget_if_dead(&self, vref: Vref, key: CapKey) -> bool {
        let mut slot_to_val = self.slot_to_val.borrow_mut();
        match slot_to_val.get(&vref) {
            Some(weak) if weak.key() == key && !weak.is_live() => {
                slot_to_val.remove(&vref);
                self.val_to_slot.borrow_mut().remove(&key);
                true
            }
            _ => false,
        }
    }

    pub fn pin_export(&self, vref: Vref, value: CapRef) {
        self.exported_remotables.borrow_mut().insert(vref, value);
    }

    pub fn unpin_export(&self, vref: Vref) -> bool {
        self.exported_remotables.borrow_mut().remove(&vref).is_some()
    }

    pub fn is_pinned_export(&self, vref: Vref) -> bool {
        self.exported_remotables.borrow().contains_key(&vref)
    }

    pub fn pin_promise(&self, vref: Vref, promise: LocalPromise) {
        self.pending_promises.borrow_mut().insert(vref, promise);
    }

    pub fn set_imported_resolver(&self, vref: Vref, resolver: Resolver) {
        self.imported_promises.borrow_mut().insert(vref, resolver);
    }

    pub fn imported_resolver(&self, vref: Vref) -> Option<Resolver> {
        self.imported_promises.borrow().get(&vref).cloned()
    }

    /// Drops all promise-table state for a retired vpid.
    pub fn forget_promise(&self, vref: Vref) {
        self.forget_slot(vref);
        self.pending_promises.borrow_mut().remove(&vref);
        self.imported_promises.borrow_mut().remove(&vref);
    }

    /// Drops every strong pin. Only meaningful while tearing the vat down;
    /// nothing is reported to the kernel.
    pub fn clear_strong_pins(&self) {
        self.exported_remotables.borrow_mut().clear();
        self.pending_promises.borrow_mut().clear();
        self.imported_promises.borrow_mut().clear();
    }

    pub fn allocate_export_id(&self) -> u64 {
        let id = self.next_export_id.get();
        self.next_export_id.set(id + 1);
        id
    }

    pub fn allocate_promise_id(&self) -> u64 {
        let id = self.next_promise_id.get();
        self.next_promise_id.set(id + 1);
        id
    }

    #[cfg(test)]
    pub fn pending_promise_count(&self) -> usize {
        self.pending_promises.borrow().len()
    }
}

impl Liveslots {
    /// The vref a value is registered under, if any.
    pub fn get_slot_for_val(&self, value: &CapRef) -> Option<Vref> {
        self.inner.tables.slot_for_key(value.key())
    }

    /// The live value registered under a vref, if any.
    pub fn get_val_for_slot(&self, vref: Vref) -> Option<CapRef> {
        self.inner.tables.value_for_slot(vref)
    }

    pub(crate) fn register_value(&self, vref: Vref, value: &CapRef) {
        self.inner.tables.register(vref, value);
    }

    pub(crate) fn allocate_promise_vref(&self) -> Vref {
        Vref::promise_export(self.inner.tables.allocate_promise_id())
    }

    /// Maps a value to its vref, allocating and registering a fresh export
    /// or promise vref for values not seen before.
    pub(crate) fn convert_val_to_slot(&self, value: &CapRef) -> VatResult<Vref> {
        if let CapRef::Presence(presence) = value {
            if presence.is_disavowed() {
                return Err(VatError::DisavowedReference);
            }
        }
        if let Some(vref) = self.get_slot_for_val(value) {
            return Ok(vref);
        }

        match value {
            CapRef::Promise(promise) => {
                let vpid = self.allocate_promise_vref();
                self.register_value(vpid, value);
                self.export_promise(vpid, promise);
                Ok(vpid)
            }
            CapRef::Remotable(_) => {
                let vref = Vref::object_export(self.inner.tables.allocate_export_id());
                self.register_value(vref, value);
                self.inner.finalizers.register(vref, value);
                debug!(vat = %self.inner.config.vat_name, %vref, "new export");
                Ok(vref)
            }
            CapRef::Virtual(representative) => {
                let vref = representative.vref();
                if !vref.is_virtual() {
                    return Err(VatError::internal(format!(
                        "representative carries non-virtual vref {vref}"
                    )));
                }
                self.register_value(vref, value);
                self.inner.finalizers.register(vref, value);
                Ok(vref)
            }
            CapRef::Presence(_) => Err(VatError::internal(
                "presence not present in the slot tables",
            )),
            CapRef::Device(_) => Err(VatError::internal(
                "device node not present in the slot tables",
            )),
        }
    }

    /// Maps a vref to its in-vat value, materializing a fresh presence,
    /// promise, device node, or virtual representative when the vref is not
    /// (or no longer) backed by a live value.
    pub(crate) fn convert_slot_to_val(
        &self,
        vref: Vref,
        iface: Option<&str>,
    ) -> VatResult<CapRef> {
        let live = {
            let slot_to_val = self.inner.tables.slot_to_val.borrow();
            slot_to_val.get(&vref).and_then(WeakCap::upgrade)
        };
        if let Some(value) = live {
            if vref.is_virtual() {
                // Reanimate-and-discard keeps live and paged-out
                // representatives indistinguishable to user code.
                let _ = self.inner.store.reanimate(vref);
            }
            return Ok(value);
        }
        // Any remaining table entry belongs to a collected, not yet
        // finalized incarnation; registration below replaces it.

        // Re-introduction: any earlier incarnation's finalization record is
        // void from this point on.
        self.inner.dead_set.borrow_mut().remove(&vref);
        self.inner.finalizers.unregister(vref);

        match (vref.kind(), vref.allocator()) {
            (RefKind::Object, Allocator::Vat) if vref.is_virtual() => {
                let value = self.inner.store.reanimate(vref)?;
                self.register_value(vref, &value);
                self.inner.finalizers.register(vref, &value);
                Ok(value)
            }
            (RefKind::Object, Allocator::Vat) => Err(VatError::UnknownExport {
                vref: vref.to_string(),
            }),
            (RefKind::Object, Allocator::Kernel) => {
                let value = CapRef::Presence(Presence::new(vref, iface.map(str::to_string)));
                self.register_value(vref, &value);
                self.inner.finalizers.register(vref, &value);
                debug!(vat = %self.inner.config.vat_name, %vref, "new import");
                Ok(value)
            }
            (RefKind::Promise, Allocator::Kernel) => {
                Ok(CapRef::Promise(self.import_promise(vref)))
            }
            (RefKind::Promise, Allocator::Vat) => Err(VatError::UnknownExport {
                vref: vref.to_string(),
            }),
            (RefKind::Device, Allocator::Kernel) => {
                let value = CapRef::Device(DeviceNode::new(vref));
                self.register_value(vref, &value);
                Ok(value)
            }
            (RefKind::Device, Allocator::Vat) => Err(VatError::UnknownExport {
                vref: vref.to_string(),
            }),
        }
    }

    /// Pins a serialized vat-allocated object export so the kernel can rely
    /// on it until `dropExports`.
    pub(crate) fn retain_exported_remotable(&self, vref: Vref) {
        if !vref.is_object() || !vref.is_export() || vref.is_virtual() {
            return;
        }
        match self.get_val_for_slot(vref) {
            Some(value @ CapRef::Remotable(_)) => {
                self.inner.tables.pin_export(vref, value);
            }
            Some(_) => error!(
                vat = %self.inner.config.vat_name,
                %vref,
                "export vref backed by a non-remotable"
            ),
            None => error!(
                vat = %self.inner.config.vat_name,
                %vref,
                "export vref has no live backing value"
            ),
        }
    }

    /// Wires up a locally-created promise this vat decides: pins it, makes
    /// it pipelinable under its new vref, and reports its settlement to the
    /// kernel.
    pub(crate) fn export_promise(&self, vpid: Vref, promise: &LocalPromise) {
        promise.install_pipeline(vpid);
        self.inner.tables.pin_promise(vpid, promise.clone());
        self.watch_decided_promise(vpid, promise);
    }

    /// Builds the local half of a kernel-decided promise and requests a
    /// notify for it. Used both for deserialized promise imports and for the
    /// result slots of outbound sends.
    pub(crate) fn import_promise(&self, vpid: Vref) -> LocalPromise {
        let (promise, resolver) = LocalPromise::pair(self.queue());
        promise.install_pipeline(vpid);
        let value = CapRef::Promise(promise.clone());
        self.register_value(vpid, &value);
        self.inner.tables.pin_promise(vpid, promise.clone());
        self.inner.tables.set_imported_resolver(vpid, resolver);
        self.buffer_subscribe(vpid);
        promise
    }

    /// Watches a vat-decided promise; on settlement the kernel learns of it
    /// (and everything transitively discoverable) in one `resolve` batch.
    pub(crate) fn watch_decided_promise(&self, vpid: Vref, promise: &LocalPromise) {
        let weak = self.downgrade();
        promise.when(self.queue(), move |_settlement| {
            if let Some(ls) = weak.upgrade() {
                ls.notify_kernel_of_resolution(vpid);
            }
        });
    }

    /// Emits the `resolve` batch rooted at `vpid`, unless the vpid was
    /// already retired by an earlier batch.
    pub(crate) fn notify_kernel_of_resolution(&self, vpid: Vref) {
        if !self.inner.tables.has_slot(vpid) {
            return;
        }
        if let Err(err) = self.emit_resolutions(vec![vpid]) {
            error!(vat = %self.inner.config.vat_name, %err, "resolution report failed");
        }
    }

    /// Locally retires a settled promise vref: all table entries drop and
    /// the vref never appears in syscalls again.
    pub(crate) fn retire_promise(&self, vpid: Vref) {
        if let Some(CapRef::Promise(promise)) = self.get_val_for_slot(vpid) {
            if let Some(handler) = promise.pipeline() {
                handler.retire();
            }
        }
        self.inner.tables.forget_promise(vpid);
    }

    /// Queues a `subscribe` for this crank's flush. Each vpid is subscribed
    /// at most once, and only if still registered when the flush runs.
    pub(crate) fn buffer_subscribe(&self, vpid: Vref) {
        let mut pending = self.inner.pending_subscribes.borrow_mut();
        if !pending.contains(&vpid) {
            pending.push(vpid);
        }
    }

    /// Issues the buffered `subscribe` calls. Vpids settled (and so retired)
    /// before the flush are skipped.
    pub(crate) fn flush_subscriptions(&self) {
        let pending = std::mem::take(&mut *self.inner.pending_subscribes.borrow_mut());
        for vpid in pending {
            if !self.inner.tables.has_slot(vpid) {
                continue;
            }
            if self.inner.subscribed.borrow_mut().insert(vpid) {
                self.inner.syscall.subscribe(vpid);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VatConfig;
    use crate::testing::RecordingSyscall;
    use crate::values::{InvokeOutcome, Remotable, Value};
    use std::rc::Rc;
    use vatrun_core::Method;
    use vatrun_marshal::Passable;

    fn make_vat() -> (Liveslots, Rc<RecordingSyscall>) {
        let syscall = RecordingSyscall::new();
        let vat = Liveslots::without_virtual_store(VatConfig::named("test"), syscall.clone());
        (vat, syscall)
    }

    fn remotable(iface: &str) -> CapRef {
        CapRef::Remotable(Remotable::new(iface, |_m: &Method, _a: Vec<Value>| {
            InvokeOutcome::Return(Passable::Null)
        }))
    }

    #[test]
    fn root_registers_as_object_zero() {
        let (vat, _syscall) = make_vat();
        vat.build_root(|_powers| {
            Remotable::new("root", |_m: &Method, _a: Vec<Value>| {
                InvokeOutcome::Return(Passable::Null)
            })
        });
        let hooks = vat.test_hooks();
        assert!(hooks.slot_live(Vref::root()));
        assert!(hooks.export_pinned(Vref::root()));
    }

    #[test]
    fn export_ids_are_monotonic() {
        let (vat, _syscall) = make_vat();
        let first = remotable("a");
        let second = remotable("b");
        assert_eq!(vat.convert_val_to_slot(&first).unwrap(), Vref::object_export(1));
        assert_eq!(vat.convert_val_to_slot(&second).unwrap(), Vref::object_export(2));
        // Conversion is idempotent per value.
        assert_eq!(vat.convert_val_to_slot(&first).unwrap(), Vref::object_export(1));
    }

    #[test]
    fn exported_promises_are_pinned() {
        let (vat, _syscall) = make_vat();
        let (promise, _resolver) = crate::promise::LocalPromise::pair(vat.queue());
        let value = CapRef::Promise(promise);
        let vpid = vat.convert_val_to_slot(&value).unwrap();
        assert_eq!(vpid, Vref::promise_export(5));
        assert_eq!(vat.inner.tables.pending_promise_count(), 1);
    }

    #[test]
    fn unknown_vat_allocated_vrefs_are_rejected() {
        let (vat, _syscall) = make_vat();
        let err = vat.convert_slot_to_val(Vref::object_export(9), None).unwrap_err();
        assert_eq!(
            err,
            VatError::UnknownExport {
                vref: "o+9".into()
            }
        );
        let err = vat
            .convert_slot_to_val(Vref::promise_export(9), None)
            .unwrap_err();
        assert_eq!(
            err,
            VatError::UnknownExport {
                vref: "p+9".into()
            }
        );
    }

    #[test]
    fn imports_resolve_to_the_same_value() {
        let (vat, _syscall) = make_vat();
        let vref = Vref::object_import(10);
        let first = vat.convert_slot_to_val(vref, Some("thing")).unwrap();
        let second = vat.convert_slot_to_val(vref, None).unwrap();
        assert_eq!(first, second);
        assert_eq!(vat.get_slot_for_val(&first), Some(vref));
    }

    #[test]
    fn exports_are_not_pinned_until_retained() {
        let (vat, _syscall) = make_vat();
        let value = remotable("thing");
        let vref = vat.convert_val_to_slot(&value).unwrap();
        let hooks = vat.test_hooks();
        assert!(!hooks.export_pinned(vref));
        vat.retain_exported_remotable(vref);
        assert!(hooks.export_pinned(vref));
    }

    #[tokio::test]
    async fn collected_imports_reach_the_dead_set() {
        let (vat, _syscall) = make_vat();
        let vref = Vref::object_import(10);
        let value = vat.convert_slot_to_val(vref, None).unwrap();
        drop(value);
        vat.gc_and_finalize().await;
        let hooks = vat.test_hooks();
        assert!(hooks.in_dead_set(vref));
        assert!(!hooks.slot_registered(vref));
    }

    #[tokio::test]
    async fn reintroduction_revives_a_finalized_vref() {
        let (vat, _syscall) = make_vat();
        let vref = Vref::object_import(10);
        let value = vat.convert_slot_to_val(vref, None).unwrap();
        drop(value);
        vat.gc_and_finalize().await;
        assert!(vat.test_hooks().in_dead_set(vref));

        // Re-introduction yields a fresh value under the same vref and
        // clears the finalization record.
        let revived = vat.convert_slot_to_val(vref, None).unwrap();
        let hooks = vat.test_hooks();
        assert!(!hooks.in_dead_set(vref));
        assert_eq!(hooks.slot_for_val(&revived), Some(vref));
        assert!(hooks.slot_live(vref));
    }

    #[test]
    fn disavowed_presences_cannot_be_serialized() {
        let (vat, _syscall) = make_vat();
        let vref = Vref::object_import(7);
        let value = vat.convert_slot_to_val(vref, None).unwrap();
        if let CapRef::Presence(presence) = &value {
            presence.mark_disavowed();
        }
        assert_eq!(
            vat.convert_val_to_slot(&value).unwrap_err(),
            VatError::DisavowedReference
        );
    }

    #[test]
    fn subscriptions_flush_once_per_vpid() {
        let (vat, syscall) = make_vat();
        let vpid = Vref::promise_import(3);
        let _promise = vat.import_promise(vpid);
        vat.buffer_subscribe(vpid);
        vat.flush_subscriptions();
        vat.buffer_subscribe(vpid);
        vat.flush_subscriptions();
        let subscribes = syscall
            .events()
            .into_iter()
            .filter(|event| matches!(event, crate::testing::SyscallEvent::Subscribe(_)))
            .count();
        assert_eq!(subscribes, 1);
    }
}
