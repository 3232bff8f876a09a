//! The downward syscall contract.
//!
//! Everything liveslots asks of the kernel goes through this trait. The
//! kernel (or a test double) implements it; liveslots holds it as a shared
//! trait object and never assumes anything about delivery timing beyond the
//! contract documented per method.

use vatrun_core::{CapData, VatResult, Vref};

/// One entry of a `resolve` batch or an inbound notify batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// The promise being settled.
    pub vpid: Vref,
    /// True for rejection.
    pub rejected: bool,
    /// The settlement value.
    pub data: CapData,
}

impl Resolution {
    pub fn fulfilled(vpid: Vref, data: CapData) -> Self {
        Self {
            vpid,
            rejected: false,
            data,
        }
    }

    pub fn rejected(vpid: Vref, data: CapData) -> Self {
        Self {
            vpid,
            rejected: true,
            data,
        }
    }
}

/// The kernel interface available to a vat.
pub trait Syscall {
    /// Queues a message to `target`. `result`, when present, is a promise
    /// vref this vat allocated for the answer.
    fn send(&self, target: Vref, method: &str, args: CapData, result: Option<Vref>);

    /// Reports settlements for promises this vat decides.
    fn resolve(&self, resolutions: &[Resolution]);

    /// Requests a notify when the kernel settles `vpid`.
    fn subscribe(&self, vpid: Vref);

    /// GC: this vat no longer holds the listed imports reachable.
    fn drop_imports(&self, vrefs: &[Vref]);

    /// GC: this vat can no longer even recognize the listed imports.
    fn retire_imports(&self, vrefs: &[Vref]);

    /// GC: the listed exports are gone and will never be exported again.
    fn retire_exports(&self, vrefs: &[Vref]);

    /// Synchronous device invocation.
    fn call_now(&self, target: Vref, method: &str, args: CapData) -> VatResult<CapData>;

    /// Terminates the vat, `failure` selecting the exit flavor.
    fn exit(&self, failure: bool, info: CapData);

    /// Optional key-value store; keys arrive already namespaced.
    fn vatstore_get(&self, key: &str) -> Option<String>;
    fn vatstore_set(&self, key: &str, value: &str);
    fn vatstore_delete(&self, key: &str);
}
