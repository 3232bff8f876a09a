//! The virtual-object store contract.
//!
//! Virtual objects keep their canonical state in a paged store owned by the
//! host; liveslots only ever sees transient representatives. The store also
//! participates in GC: data paged out may keep an import reachable or
//! recognizable even when no in-memory value does, and dropping a
//! representative may release further references.

use crate::values::{CapRef, Representative};
use vatrun_core::{VatError, VatResult, Vref};

pub trait VirtualObjectStore {
    /// Materializes a fresh representative for a virtual vref. Each call may
    /// return a new incarnation; user code cannot tell.
    fn reanimate(&self, vref: Vref) -> VatResult<CapRef>;

    /// True when paged-out state still holds `vref` reachable.
    fn is_reachable(&self, vref: Vref) -> bool;

    /// True when paged-out weak data can still recognize `vref`.
    fn is_recognizable(&self, vref: Vref) -> bool;

    /// A representative of `vref` was collected. Returns true when the drop
    /// released further references and the GC drain should run again.
    fn drop_representative(&self, vref: Vref) -> bool;

    /// Imports whose paged-out reachability ended since the last call,
    /// typically because a representative drop decremented their last
    /// refcount. The GC drain re-examines them.
    fn drain_released(&self) -> Vec<Vref> {
        Vec::new()
    }

    /// The kernel has retired `vref`; forget any weak recognition of it.
    fn retire_recognizable(&self, vref: Vref);
}

/// A store for vats that use no virtual objects.
#[derive(Debug, Default)]
pub struct NullVirtualStore;

impl VirtualObjectStore for NullVirtualStore {
    fn reanimate(&self, vref: Vref) -> VatResult<CapRef> {
        Err(VatError::UnknownExport {
            vref: vref.to_string(),
        })
    }

    fn is_reachable(&self, _vref: Vref) -> bool {
        false
    }

    fn is_recognizable(&self, _vref: Vref) -> bool {
        false
    }

    fn drop_representative(&self, _vref: Vref) -> bool {
        false
    }

    fn retire_recognizable(&self, _vref: Vref) {}
}

/// Convenience for store implementations: wraps a representative handle in
/// the value enum they must return.
pub fn representative_value(representative: Representative) -> CapRef {
    CapRef::Virtual(representative)
}
