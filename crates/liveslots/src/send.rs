//! Outbound eventual sends and synchronous device calls.
//!
//! An eventual send always returns a fresh local promise for its result.
//! Sends to presences and pipelinable promises become `syscall.send`; sends
//! to local values are queued as ordinary turns so the caller can never
//! observe a result before quiescence. After each kernel send, settlements
//! already known for any promise mentioned in the arguments are reported
//! opportunistically in one `resolve` batch.

use crate::promise::{LocalPromise, Resolver, Settlement};
use crate::values::{CapRef, DeviceNode, InvokeOutcome, Value};
use crate::vat::Liveslots;
use tracing::{debug, error};
use vatrun_core::{Method, VatError, VatResult, Vref};
use vatrun_marshal::Passable;

impl Liveslots {
    /// Issues an eventual send. Errors are user-side misuse (bad method
    /// name, disavowed target); kernel unavailability is not observable.
    pub(crate) fn queue_send(
        &self,
        target: &CapRef,
        method: Method,
        args: Vec<Value>,
    ) -> VatResult<LocalPromise> {
        match target {
            CapRef::Presence(presence) => {
                if presence.is_disavowed() {
                    let err = VatError::DisavowedReference;
                    self.terminate_with_error(&err);
                    return Err(err);
                }
                let vref = self.convert_val_to_slot(target)?;
                self.send_to_vref(vref, &method, args)
            }
            CapRef::Promise(promise) => self.send_to_promise(promise, method, args),
            CapRef::Remotable(_) | CapRef::Virtual(_) => {
                Ok(self.enqueue_local_send(target.clone(), method, args))
            }
            CapRef::Device(_) => Ok(self.rejected_promise(
                "TypeError",
                "device nodes take synchronous calls, not eventual sends",
            )),
        }
    }

    /// The kernel path: allocate a result vpid, send, subscribe (buffered),
    /// and report any already-known settlements mentioned in the arguments.
    fn send_to_vref(&self, target: Vref, method: &Method, args: Vec<Value>) -> VatResult<LocalPromise> {
        let wire = method.wire_name()?.to_string();
        let data = self.serialize(&Passable::List(args))?;
        let result_vpid = self.allocate_promise_vref();
        let result = self.import_promise(result_vpid);
        debug!(
            vat = %self.inner.config.vat_name,
            %target,
            method = %wire,
            result = %result_vpid,
            "eventual send"
        );
        self.inner
            .syscall
            .send(target, &wire, data.clone(), Some(result_vpid));
        self.emit_resolutions(data.slots)?;
        Ok(result)
    }

    fn send_to_promise(
        &self,
        target: &LocalPromise,
        method: Method,
        args: Vec<Value>,
    ) -> VatResult<LocalPromise> {
        match target.settlement() {
            // Settled to a capability: the send chases the resolution on a
            // later turn.
            Some(Ok(Passable::Cap(cap))) => Ok(self.forward_send_later(cap, method, args)),
            Some(Ok(_)) => Ok(self.rejected_promise(
                "TypeError",
                "cannot deliver a message to a non-capability value",
            )),
            // Rejection is contagious.
            Some(Err(reason)) => Ok(self.rejected_with(reason)),
            None => match target.pipeline() {
                Some(handler) => self.send_to_vref(handler.target()?, &method, args),
                None => {
                    // A purely local pending promise: hold the send until it
                    // settles.
                    let (result, resolver) = LocalPromise::pair(self.queue());
                    let weak = self.downgrade();
                    target.when(self.queue(), move |settlement| {
                        if let Some(ls) = weak.upgrade() {
                            ls.redeliver_settled_send(settlement, method, args, resolver);
                        }
                    });
                    Ok(result)
                }
            },
        }
    }

    /// Re-issues a held-back send now that its target settled.
    pub(crate) fn redeliver_settled_send(
        &self,
        settlement: Settlement,
        method: Method,
        args: Vec<Value>,
        resolver: Resolver,
    ) {
        match settlement {
            Ok(Passable::Cap(cap)) => match self.queue_send(&cap, method, args) {
                Ok(result) => self.chain(result, resolver),
                Err(err) => resolver.reject(error_value(&err)),
            },
            Ok(_) => resolver.reject(Passable::error(
                "TypeError",
                "cannot deliver a message to a non-capability value",
            )),
            Err(reason) => resolver.reject(reason),
        }
    }

    /// Queues a send whose target already settled to `cap`.
    fn forward_send_later(&self, cap: CapRef, method: Method, args: Vec<Value>) -> LocalPromise {
        let (result, resolver) = LocalPromise::pair(self.queue());
        let weak = self.downgrade();
        self.queue().push(move || {
            if let Some(ls) = weak.upgrade() {
                match ls.queue_send(&cap, method, args) {
                    Ok(inner) => ls.chain(inner, resolver),
                    Err(err) => resolver.reject(error_value(&err)),
                }
            }
        });
        result
    }

    /// Delivers a message to a local value on a later turn.
    fn enqueue_local_send(&self, target: CapRef, method: Method, args: Vec<Value>) -> LocalPromise {
        let (result, resolver) = LocalPromise::pair(self.queue());
        let weak = self.downgrade();
        self.queue().push(move || {
            if let Some(ls) = weak.upgrade() {
                let outcome = ls.invoke_local(&target, &method, args);
                ls.bind_outcome(outcome, &resolver);
            }
        });
        result
    }

    /// Synchronous method invocation on an in-vat value.
    pub(crate) fn invoke_local(
        &self,
        target: &CapRef,
        method: &Method,
        args: Vec<Value>,
    ) -> InvokeOutcome {
        let handler = match target {
            CapRef::Remotable(remotable) => Some(remotable.handler()),
            CapRef::Virtual(representative) => representative.handler(),
            _ => None,
        };
        match handler {
            Some(handler) => handler.invoke(method, args),
            None => InvokeOutcome::Throw(Passable::error(
                "TypeError",
                format!("target has no method {method}"),
            )),
        }
    }

    /// Binds what an invocation produced to a result resolver.
    pub(crate) fn bind_outcome(&self, outcome: InvokeOutcome, resolver: &Resolver) {
        match outcome {
            InvokeOutcome::Return(value) => resolver.resolve(value),
            InvokeOutcome::Throw(reason) => resolver.reject(reason),
            InvokeOutcome::Defer(promise) => self.chain(promise, resolver.clone()),
        }
    }

    /// Settles `resolver` however `promise` settles.
    pub(crate) fn chain(&self, promise: LocalPromise, resolver: Resolver) {
        promise.when(self.queue(), move |settlement| match settlement {
            Ok(value) => resolver.resolve(value),
            Err(reason) => resolver.reject(reason),
        });
    }

    pub(crate) fn rejected_promise(&self, name: &str, message: &str) -> LocalPromise {
        self.rejected_with(Passable::error(name, message))
    }

    fn rejected_with(&self, reason: Value) -> LocalPromise {
        let (promise, resolver) = LocalPromise::pair(self.queue());
        resolver.reject(reason);
        promise
    }

    /// Synchronous device invocation. Promises and nested device proxies are
    /// rejected up front, before any slot allocation can happen as a
    /// serialization side effect.
    pub(crate) fn call_device(
        &self,
        node: &DeviceNode,
        method: &Method,
        args: Vec<Value>,
    ) -> VatResult<Value> {
        let args = Passable::List(args);
        let mut has_promise = false;
        let mut has_device = false;
        args.for_each_cap(&mut |cap| match cap {
            CapRef::Promise(_) => has_promise = true,
            CapRef::Device(_) => has_device = true,
            _ => {}
        });
        if has_promise {
            return Err(VatError::PromiseInDeviceCall);
        }
        if has_device {
            return Err(VatError::DeviceOfDevice);
        }

        let wire = method.wire_name()?.to_string();
        let data = self.serialize(&args)?;
        let result = self.inner.syscall.call_now(node.vref(), &wire, data)?;
        if result.mentions_promises() {
            let err = VatError::protocol("device call returned a promise");
            error!(vat = %self.inner.config.vat_name, %err, "bad device result");
            return Err(err);
        }
        self.unserialize(&result)
    }
}

/// An error rendered as a passable rejection reason.
pub(crate) fn error_value(err: &VatError) -> Value {
    Passable::error("VatError", err.to_string())
}
