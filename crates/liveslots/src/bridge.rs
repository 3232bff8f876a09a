//! The marshaller bridge.
//!
//! Glue between the pluggable serializer and the Slot Registry: on
//! serialize, previously-unseen pass-by-capability values get export slots
//! allocated and every emitted object export is strongly pinned; on
//! deserialize, slots re-materialize as presences, promises, device nodes,
//! or virtual representatives. The resolution collector also lives here: it
//! turns one settled promise into the full batch of settlements transitively
//! discoverable from it.

use crate::syscall::Resolution;
use crate::values::{CapRef, Value};
use crate::vat::Liveslots;
use std::collections::{HashSet, VecDeque};
use tracing::debug;
use vatrun_core::{CapData, VatError, VatResult, Vref};
use vatrun_marshal::{from_capdata, to_capdata, SlotConverter};

/// Adapts the registry's conversion operations to the marshaller seam.
struct RegistryConverter<'a> {
    vat: &'a Liveslots,
}

impl SlotConverter<CapRef> for RegistryConverter<'_> {
    fn val_to_slot(&self, cap: &CapRef) -> Result<Vref, VatError> {
        self.vat.convert_val_to_slot(cap)
    }

    fn slot_to_val(&self, slot: Vref, iface: Option<&str>) -> Result<CapRef, VatError> {
        self.vat.convert_slot_to_val(slot, iface)
    }

    fn iface_of(&self, cap: &CapRef) -> Option<String> {
        cap.iface()
    }
}

impl Liveslots {
    /// Serializes a value, pinning every object export the body mentions.
    /// A fatal conversion failure (a disavowed presence anywhere in the
    /// value) terminates the vat before the error surfaces to the caller.
    pub(crate) fn serialize(&self, value: &Value) -> VatResult<CapData> {
        let data = match to_capdata(value, &RegistryConverter { vat: self }) {
            Ok(data) => data,
            Err(err) => {
                let err = VatError::from(err);
                if err.is_fatal() {
                    self.terminate_with_error(&err);
                }
                return Err(err);
            }
        };
        for slot in &data.slots {
            self.retain_exported_remotable(*slot);
        }
        Ok(data)
    }

    pub(crate) fn unserialize(&self, data: &CapData) -> VatResult<Value> {
        from_capdata(data, &RegistryConverter { vat: self }).map_err(VatError::from)
    }

    /// The resolution collector: starting from `seed` slots, gathers a
    /// settlement entry for every promise vref whose local promise already
    /// settled, chasing the slots of each serialized settlement value.
    /// Each vpid appears at most once; order is first-discovery order.
    pub(crate) fn gather_resolutions(&self, seed: Vec<Vref>) -> VatResult<Vec<Resolution>> {
        let mut out = Vec::new();
        let mut seen: HashSet<Vref> = HashSet::new();
        let mut work: VecDeque<Vref> = seed.into();

        while let Some(vref) = work.pop_front() {
            if !vref.is_promise() || !seen.insert(vref) {
                continue;
            }
            let Some(CapRef::Promise(promise)) = self.get_val_for_slot(vref) else {
                continue;
            };
            let Some(settlement) = promise.settlement() else {
                continue;
            };
            let (rejected, value) = match settlement {
                Ok(value) => (false, value),
                Err(reason) => (true, reason),
            };
            let data = self.serialize(&value)?;
            work.extend(data.slots.iter().copied());
            out.push(Resolution {
                vpid: vref,
                rejected,
                data,
            });
        }
        Ok(out)
    }

    /// Gathers resolutions from `seed`, reports them to the kernel in one
    /// batch, and retires every reported vpid locally.
    pub(crate) fn emit_resolutions(&self, seed: Vec<Vref>) -> VatResult<()> {
        let resolutions = self.gather_resolutions(seed)?;
        if resolutions.is_empty() {
            return Ok(());
        }
        debug!(
            vat = %self.inner.config.vat_name,
            count = resolutions.len(),
            "reporting promise settlements"
        );
        self.inner.syscall.resolve(&resolutions);
        for resolution in &resolutions {
            self.retire_promise(resolution.vpid);
        }
        Ok(())
    }
}
