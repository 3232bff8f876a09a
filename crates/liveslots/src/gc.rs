//! The distributed GC engine.
//!
//! After user code quiesces, the engine polls the finalization registry,
//! classifies every vref in the dead set, and reports the results: collected
//! remotable exports retire, collected presences drop their imports (and
//! retire too when nothing can even recognize them), and collected virtual
//! representatives are handed to the store, whose own bookkeeping may free
//! further references. The drain iterates until no new finalizations and no
//! store work remain. Each syscall carries its vrefs sorted and
//! duplicate-free.

use crate::values::CapKey;
use crate::vat::Liveslots;
use tracing::debug;
use vatrun_core::vref::sort_vrefs;
use vatrun_core::Vref;

impl Liveslots {
    /// Lets queued turns finish, then sweeps the finalization registry so
    /// every value collected since the last sweep reaches the dead set.
    pub(crate) async fn gc_and_finalize(&self) {
        self.queue().wait_until_quiescent().await;
        self.inner
            .finalizers
            .poll(|vref, key| self.finalize_dead_entry(vref, key));
    }

    /// The FINALIZED transition: the slot entry drops and the vref joins the
    /// dead set, unless the vref was re-introduced under a fresh value in
    /// the meantime (stale callback).
    fn finalize_dead_entry(&self, vref: Vref, key: CapKey) -> bool {
        if !self.inner.tables.forget_if_dead(vref, key) {
            return false;
        }
        self.inner.dead_set.borrow_mut().insert(vref);
        true
    }

    /// Drains the dead set to a fixed point, emitting GC syscalls.
    pub(crate) async fn scan_for_dead_objects(&self) {
        loop {
            self.gc_and_finalize().await;
            let dead: Vec<Vref> = {
                let mut dead_set = self.inner.dead_set.borrow_mut();
                let dead = dead_set.iter().copied().collect();
                dead_set.clear();
                dead
            };
            if dead.is_empty() {
                break;
            }

            let mut imports_to_drop = Vec::new();
            let mut imports_to_retire = Vec::new();
            let mut exports_to_retire = Vec::new();
            let mut store_released = false;

            for vref in dead {
                if !vref.is_object() {
                    tracing::error!(
                        vat = %self.inner.config.vat_name,
                        %vref,
                        "non-object vref in the dead set"
                    );
                    continue;
                }
                if vref.is_export() {
                    if vref.is_virtual() {
                        store_released |= self.inner.store.drop_representative(vref);
                    } else {
                        exports_to_retire.push(vref);
                    }
                } else {
                    if self.inner.store.is_reachable(vref) {
                        continue;
                    }
                    imports_to_drop.push(vref);
                    if !self.is_recognizable(vref) {
                        imports_to_retire.push(vref);
                    }
                }
            }

            sort_vrefs(&mut imports_to_drop);
            sort_vrefs(&mut imports_to_retire);
            sort_vrefs(&mut exports_to_retire);

            if !imports_to_drop.is_empty() {
                debug!(vat = %self.inner.config.vat_name, ?imports_to_drop, "dropImports");
                self.inner.syscall.drop_imports(&imports_to_drop);
            }
            if !imports_to_retire.is_empty() {
                debug!(vat = %self.inner.config.vat_name, ?imports_to_retire, "retireImports");
                self.inner.syscall.retire_imports(&imports_to_retire);
            }
            if !exports_to_retire.is_empty() {
                debug!(vat = %self.inner.config.vat_name, ?exports_to_retire, "retireExports");
                self.inner.syscall.retire_exports(&exports_to_retire);
            }

            if store_released {
                // Imports the store stopped holding reachable re-enter the
                // dead set, unless a live in-memory value still reaches
                // them.
                let released = self.inner.store.drain_released();
                for vref in released {
                    // A live value still reaches the import, and a collected
                    // one is the finalizer sweep's to report.
                    if !self.inner.tables.has_slot(vref) {
                        self.inner.dead_set.borrow_mut().insert(vref);
                    }
                }
            }
        }
    }

    /// A dropped import may still be recognizable, either through a weak
    /// collection in this vat or through paged-out weak data.
    fn is_recognizable(&self, vref: Vref) -> bool {
        self.inner.recognizers.is_recognized(vref) || self.inner.store.is_recognizable(vref)
    }
}
