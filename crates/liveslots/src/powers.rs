//! Vat powers: the capability facade handed to user code.
//!
//! The root-object builder receives a [`VatPowers`]. Everything user code
//! can do to the outside world goes through it: eventual sends, synchronous
//! device calls, vat exit, and (when configured) presence disavowal and the
//! namespaced key-value store.

use crate::promise::{LocalPromise, Resolver};
use crate::values::{CapRef, DeviceNode, Remotable, Value};
use crate::vat::Liveslots;
use crate::weak_store::{VatWeakMap, VatWeakSet};
use tracing::warn;
use vatrun_core::constants::VATSTORE_PREFIX;
use vatrun_core::{Method, VatError, VatResult};

/// The capability facade for one vat's user code.
#[derive(Clone)]
pub struct VatPowers {
    vat: Liveslots,
}

impl VatPowers {
    pub(crate) fn new(vat: Liveslots) -> Self {
        Self { vat }
    }

    /// Eventual send: `target~.method(args)`. Returns a promise for the
    /// result. Method names must be strings (the async-iteration symbol is
    /// bridged); symbol names fail synchronously.
    pub fn send(&self, target: &CapRef, method: Method, args: Vec<Value>) -> VatResult<LocalPromise> {
        self.vat.queue_send(target, method, args)
    }

    /// Wraps a device node for synchronous invocation. Anything that is not
    /// a device node is refused.
    pub fn device(&self, node: &CapRef) -> VatResult<DeviceCaller> {
        match node {
            CapRef::Device(device) => Ok(DeviceCaller {
                vat: self.vat.clone(),
                node: device.clone(),
            }),
            _ => Err(VatError::DeviceOfDevice),
        }
    }

    /// Creates a fresh remotable. Equivalent to [`Remotable::new`], provided
    /// here so user code does not need the type in scope.
    pub fn make_remotable(
        &self,
        iface: impl Into<String>,
        handler: impl crate::values::MethodHandler + 'static,
    ) -> CapRef {
        CapRef::Remotable(Remotable::new(iface, handler))
    }

    /// Creates an unresolved promise and its resolver on the vat's queue.
    pub fn make_promise(&self) -> (LocalPromise, Resolver) {
        LocalPromise::pair(self.vat.queue())
    }

    /// Runs `watcher` on a later turn once `promise` settles.
    pub fn when(
        &self,
        promise: &LocalPromise,
        watcher: impl FnOnce(crate::promise::Settlement) + 'static,
    ) {
        promise.when(self.vat.queue(), watcher);
    }

    /// A weak set that can key on virtual representatives.
    pub fn make_weak_set(&self) -> VatWeakSet {
        VatWeakSet::new(&self.vat)
    }

    /// A weak map that can key on virtual representatives.
    pub fn make_weak_map<V: Clone>(&self) -> VatWeakMap<V> {
        VatWeakMap::new(&self.vat)
    }

    /// Terminates the vat in success, delivering `completion` to whoever
    /// holds the vat's done-promise kernel-side.
    pub fn exit_vat(&self, completion: Value) {
        let info = self
            .vat
            .serialize(&completion)
            .unwrap_or_else(|err| self.vat.error_capdata(&err));
        self.vat.inner.terminated.set(true);
        self.vat.inner.syscall.exit(false, info);
    }

    /// Terminates the vat in failure, with `reason` as the diagnostic.
    pub fn exit_vat_with_failure(&self, reason: Value) {
        let info = self
            .vat
            .serialize(&reason)
            .unwrap_or_else(|err| self.vat.error_capdata(&err));
        self.vat.inner.terminated.set(true);
        self.vat.inner.syscall.exit(true, info);
    }

    /// Severs a presence: the import drops immediately and any later use of
    /// the presence is fatal. Available only when configured.
    pub fn disavow(&self, target: &CapRef) -> VatResult<()> {
        if !self.vat.inner.config.enable_disavow {
            return Err(VatError::DisavowNotEnabled);
        }
        let CapRef::Presence(presence) = target else {
            return Err(VatError::internal("disavow target must be a presence"));
        };
        if presence.is_disavowed() {
            warn!(vat = %self.vat.inner.config.vat_name, "presence disavowed twice");
            return Ok(());
        }
        let vref = presence.vref();
        presence.mark_disavowed();
        self.vat.inner.tables.forget_slot(vref);
        self.vat.inner.finalizers.unregister(vref);
        self.vat.inner.dead_set.borrow_mut().remove(&vref);
        self.vat.inner.syscall.drop_imports(&[vref]);
        Ok(())
    }

    /// The namespaced key-value store, when configured.
    pub fn vatstore(&self) -> Option<Vatstore> {
        if !self.vat.inner.config.enable_vatstore {
            return None;
        }
        Some(Vatstore {
            vat: self.vat.clone(),
        })
    }
}

/// Synchronous caller for one device node.
pub struct DeviceCaller {
    vat: Liveslots,
    node: DeviceNode,
}

impl DeviceCaller {
    /// Invokes a device method. Promises anywhere in the arguments are
    /// refused before any syscall happens.
    pub fn call(&self, method: Method, args: Vec<Value>) -> VatResult<Value> {
        self.vat.call_device(&self.node, &method, args)
    }
}

/// The vat's slice of the kernel key-value store. Keys are transparently
/// namespaced; user code never sees the prefix.
pub struct Vatstore {
    vat: Liveslots,
}

impl Vatstore {
    fn scoped(key: &str) -> String {
        format!("{VATSTORE_PREFIX}{key}")
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.vat.inner.syscall.vatstore_get(&Self::scoped(key))
    }

    pub fn set(&self, key: &str, value: &str) {
        self.vat.inner.syscall.vatstore_set(&Self::scoped(key), value);
    }

    pub fn delete(&self, key: &str) {
        self.vat.inner.syscall.vatstore_delete(&Self::scoped(key));
    }
}
