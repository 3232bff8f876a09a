//! # vatrun
//!
//! A capability-secure vat runtime core. A *vat* is a single-threaded
//! container of capability-style objects; vats communicate only through a
//! message-passing kernel. This umbrella crate re-exports the public
//! surface of the workspace:
//!
//! - [`vatrun_core`]: vrefs, capdata, method names, the error taxonomy.
//! - [`vatrun_marshal`]: slot-aware serialization of passable values.
//! - [`vatrun_liveslots`]: the per-vat translation, lifetime, and
//!   distributed-GC layer between user code and the kernel syscall
//!   interface.

pub use vatrun_core::{Allocator, CapData, Method, RefKind, VatError, VatResult, Vref};
pub use vatrun_liveslots::{
    CapRef, Delivery, DeviceCaller, InvokeOutcome, Liveslots, LocalPromise, MethodHandler,
    NullVirtualStore, Remotable, Representative, Resolution, Resolver, Syscall, TaskQueue, Value,
    VatConfig, VatPowers, VatWeakMap, VatWeakSet, Vatstore, VirtualObjectStore,
};
pub use vatrun_marshal::{from_capdata, to_capdata, MarshalError, Passable, SlotConverter};

/// The liveslots layer, for direct access to submodules.
pub use vatrun_liveslots as liveslots;
/// The marshaller, for direct access to submodules.
pub use vatrun_marshal as marshal;
