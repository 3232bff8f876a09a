//! Finalization tracking.
//!
//! Rust has no ambient garbage collector, so observability of "this export
//! was collected" comes from an explicit registry of weak handles, polled
//! between turns: a registered value whose weak handle no longer upgrades
//! has been collected, and its vref is handed to the registry's caller for
//! the FINALIZED transition. Entries carry the value's identity key so a
//! callback arriving after the vref was re-introduced under a fresh value is
//! recognized as stale and dropped without effect.

use crate::values::{CapKey, CapRef, WeakCap};
use std::cell::RefCell;
use vatrun_core::Vref;

struct FinalizerEntry {
    vref: Vref,
    key: CapKey,
    weak: WeakCap,
}

/// Registry of values whose collection must be reported.
#[derive(Default)]
pub(crate) struct FinalizationRegistry {
    entries: RefCell<Vec<FinalizerEntry>>,
}

impl FinalizationRegistry {
    pub fn register(&self, vref: Vref, value: &CapRef) {
        self.entries.borrow_mut().push(FinalizerEntry {
            vref,
            key: value.key(),
            weak: value.downgrade(),
        });
    }

    /// Drops every entry for `vref`, live or stale.
    pub fn unregister(&self, vref: Vref) {
        self.entries.borrow_mut().retain(|entry| entry.vref != vref);
    }

    /// Invokes `on_dead(vref, key)` for every entry whose value has been
    /// collected since the last poll, removing those entries. Returns how
    /// many callbacks reported a state change.
    pub fn poll(&self, mut on_dead: impl FnMut(Vref, CapKey) -> bool) -> usize {
        let entries = std::mem::take(&mut *self.entries.borrow_mut());
        let mut dead = Vec::new();
        let mut kept = Vec::new();
        for entry in entries {
            if entry.weak.is_live() {
                kept.push(entry);
            } else {
                dead.push(entry);
            }
        }
        self.entries.borrow_mut().extend(kept);

        let mut finalized = 0;
        for entry in dead {
            if on_dead(entry.vref, entry.key) {
                finalized += 1;
            }
        }
        finalized
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }
}
