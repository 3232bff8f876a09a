//! Weak collections for user code.
//!
//! The built-in weak types of the host language key on object identity,
//! which breaks for virtual representatives: two representatives of the same
//! virtual object are distinct allocations. These variants key on the vref
//! whenever the value has one, so membership survives re-materialization.
//! Entries never retain their keys; what they do is make a vref
//! *recognizable*, which the GC engine consults before retiring a dropped
//! import.

use crate::values::{CapKey, CapRef};
use crate::vat::{Liveslots, WeakLiveslots};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use vatrun_core::Vref;

/// Shared count of weak-collection entries per vref. A nonzero count keeps a
/// dropped import recognizable.
#[derive(Clone, Default)]
pub(crate) struct RecognizerRegistry {
    counts: Rc<RefCell<HashMap<Vref, usize>>>,
}

impl RecognizerRegistry {
    pub fn add(&self, vref: Vref) {
        *self.counts.borrow_mut().entry(vref).or_insert(0) += 1;
    }

    pub fn remove(&self, vref: Vref) {
        let mut counts = self.counts.borrow_mut();
        if let Some(count) = counts.get_mut(&vref) {
            *count -= 1;
            if *count == 0 {
                counts.remove(&vref);
            }
        }
    }

    /// The kernel retired the vref; nothing recognizes it anymore.
    pub fn retire(&self, vref: Vref) {
        self.counts.borrow_mut().remove(&vref);
    }

    pub fn is_recognized(&self, vref: Vref) -> bool {
        self.counts.borrow().contains_key(&vref)
    }
}

/// How a collection keys one entry: by vref when the value has one, by
/// identity otherwise. Identity keys of dead values are inert residue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum EntryKey {
    Vref(Vref),
    Ident(CapKey),
}

fn entry_key(vat: &WeakLiveslots, value: &CapRef) -> EntryKey {
    if let Some(ls) = vat.upgrade() {
        if let Some(vref) = ls.get_slot_for_val(value).or_else(|| value.intrinsic_vref()) {
            return EntryKey::Vref(vref);
        }
    }
    EntryKey::Ident(value.key())
}

fn is_recognizer_key(key: EntryKey) -> Option<Vref> {
    match key {
        EntryKey::Vref(vref) if vref.is_object() && vref.is_import() => Some(vref),
        _ => None,
    }
}

/// A weak set keyed by capability identity or vref.
pub struct VatWeakSet {
    vat: WeakLiveslots,
    entries: RefCell<HashSet<EntryKey>>,
}

impl VatWeakSet {
    pub(crate) fn new(vat: &Liveslots) -> Self {
        Self {
            vat: vat.downgrade(),
            entries: RefCell::new(HashSet::new()),
        }
    }

    pub fn insert(&self, value: &CapRef) -> bool {
        let key = entry_key(&self.vat, value);
        let added = self.entries.borrow_mut().insert(key);
        if added {
            if let (Some(vref), Some(ls)) = (is_recognizer_key(key), self.vat.upgrade()) {
                ls.inner.recognizers.add(vref);
            }
        }
        added
    }

    pub fn contains(&self, value: &CapRef) -> bool {
        self.entries
            .borrow()
            .contains(&entry_key(&self.vat, value))
    }

    pub fn remove(&self, value: &CapRef) -> bool {
        let key = entry_key(&self.vat, value);
        let removed = self.entries.borrow_mut().remove(&key);
        if removed {
            if let (Some(vref), Some(ls)) = (is_recognizer_key(key), self.vat.upgrade()) {
                ls.inner.recognizers.remove(vref);
            }
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

/// A weak map keyed like [`VatWeakSet`], with owned values.
pub struct VatWeakMap<V> {
    vat: WeakLiveslots,
    entries: RefCell<HashMap<EntryKey, V>>,
}

impl<V: Clone> VatWeakMap<V> {
    pub(crate) fn new(vat: &Liveslots) -> Self {
        Self {
            vat: vat.downgrade(),
            entries: RefCell::new(HashMap::new()),
        }
    }

    pub fn insert(&self, key: &CapRef, value: V) -> Option<V> {
        let entry = entry_key(&self.vat, key);
        let previous = self.entries.borrow_mut().insert(entry, value);
        if previous.is_none() {
            if let (Some(vref), Some(ls)) = (is_recognizer_key(entry), self.vat.upgrade()) {
                ls.inner.recognizers.add(vref);
            }
        }
        previous
    }

    pub fn get(&self, key: &CapRef) -> Option<V> {
        self.entries
            .borrow()
            .get(&entry_key(&self.vat, key))
            .cloned()
    }

    pub fn remove(&self, key: &CapRef) -> Option<V> {
        let entry = entry_key(&self.vat, key);
        let removed = self.entries.borrow_mut().remove(&entry);
        if removed.is_some() {
            if let (Some(vref), Some(ls)) = (is_recognizer_key(entry), self.vat.upgrade()) {
                ls.inner.recognizers.remove(vref);
            }
        }
        removed
    }

    pub fn contains(&self, key: &CapRef) -> bool {
        self.entries
            .borrow()
            .contains_key(&entry_key(&self.vat, key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizer_counts_balance() {
        let registry = RecognizerRegistry::default();
        let vref = Vref::object_import(3);
        registry.add(vref);
        registry.add(vref);
        assert!(registry.is_recognized(vref));
        registry.remove(vref);
        assert!(registry.is_recognized(vref));
        registry.remove(vref);
        assert!(!registry.is_recognized(vref));
    }

    #[test]
    fn retire_clears_all_recognition() {
        let registry = RecognizerRegistry::default();
        let vref = Vref::object_import(3);
        registry.add(vref);
        registry.add(vref);
        registry.retire(vref);
        assert!(!registry.is_recognized(vref));
    }
}
