//! Per-vat liveslots layer for the vatrun runtime.
//!
//! A vat is a single-threaded container of capability-style objects; the
//! kernel schedules deliveries into it and carries messages between vats.
//! This crate is the translation layer in between: it maps in-vat values to
//! kernel-visible vrefs and back, builds the proxies and promises user code
//! holds, drives each delivery to quiescence, and tells the kernel which
//! references this vat can no longer reach or recognize.
//!
//! The kernel side of the boundary is abstract here: the kernel implements
//! [`Syscall`], calls [`Liveslots::dispatch`], and owns scheduling and
//! persistence. Virtual-object state lives behind [`VirtualObjectStore`].

mod bridge;
pub mod config;
pub mod dispatch;
mod gc;
mod gc_tools;
pub mod powers;
pub mod promise;
pub mod queue;
mod send;
mod slots;
pub mod syscall;
pub mod testing;
pub mod values;
pub mod vat;
pub mod virtual_store;
pub mod weak_store;

pub use config::VatConfig;
pub use dispatch::Delivery;
pub use vatrun_marshal::Passable;
pub use powers::{DeviceCaller, VatPowers, Vatstore};
pub use promise::{LocalPromise, Resolver, Settlement};
pub use queue::TaskQueue;
pub use syscall::{Resolution, Syscall};
pub use values::{
    CapRef, DeviceNode, InvokeOutcome, MethodHandler, Presence, Remotable, Representative, Value,
};
pub use vat::Liveslots;
pub use virtual_store::{NullVirtualStore, VirtualObjectStore};
pub use weak_store::{VatWeakMap, VatWeakSet};
