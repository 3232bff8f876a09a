//! The Dispatch Core.
//!
//! The kernel drives a vat one delivery at a time: `dispatch` schedules the
//! user-visible work as an ordinary turn, waits for the vat to go quiescent,
//! then runs the GC drain until it has nothing more to do. Errors never
//! escape `dispatch`: user errors become promise rejections, benign protocol
//! oddities are logged, and protocol-breaking deliveries terminate the vat.

use crate::promise::Resolver;
use crate::syscall::Resolution;
use crate::values::{CapRef, InvokeOutcome};
use crate::vat::Liveslots;
use tracing::{debug, error, warn};
use vatrun_core::{CapData, Method, VatError, VatResult, Vref};
use vatrun_marshal::Passable;

/// One kernel-initiated delivery.
#[derive(Debug, Clone)]
pub enum Delivery {
    /// Invoke a method on a previously exported value.
    Message {
        target: Vref,
        method: String,
        args: CapData,
        result: Option<Vref>,
    },
    /// The kernel settled promises this vat subscribed to.
    Notify { resolutions: Vec<Resolution> },
    /// The kernel no longer reaches these exports; unpin them.
    DropExports { vrefs: Vec<Vref> },
    /// The kernel will never mention these exports again.
    RetireExports { vrefs: Vec<Vref> },
    /// Imports this vat dropped are now fully retired kernel-side.
    RetireImports { vrefs: Vec<Vref> },
}

impl Delivery {
    fn kind(&self) -> &'static str {
        match self {
            Delivery::Message { .. } => "message",
            Delivery::Notify { .. } => "notify",
            Delivery::DropExports { .. } => "dropExports",
            Delivery::RetireExports { .. } => "retireExports",
            Delivery::RetireImports { .. } => "retireImports",
        }
    }
}

impl Liveslots {
    /// Processes one delivery to quiescence: user work first, then the GC
    /// drain. The kernel awaits completion before the next delivery, which
    /// is what serializes cranks.
    pub async fn dispatch(&self, delivery: Delivery) {
        if self.is_terminated() {
            warn!(
                vat = %self.inner.config.vat_name,
                kind = delivery.kind(),
                "delivery to terminated vat ignored"
            );
            return;
        }
        debug!(vat = %self.inner.config.vat_name, kind = delivery.kind(), "delivery");

        let ls = self.clone();
        self.queue().push(move || ls.run_delivery(delivery));
        self.queue().wait_until_quiescent().await;

        if self.is_terminated() {
            return;
        }
        self.flush_subscriptions();
        self.scan_for_dead_objects().await;
    }

    fn run_delivery(&self, delivery: Delivery) {
        let outcome = match delivery {
            Delivery::Message {
                target,
                method,
                args,
                result,
            } => self.deliver_message(target, &method, args, result),
            Delivery::Notify { resolutions } => self.deliver_notify(resolutions),
            Delivery::DropExports { vrefs } => self.deliver_drop_exports(&vrefs),
            Delivery::RetireExports { vrefs } => self.deliver_retire_exports(&vrefs),
            Delivery::RetireImports { vrefs } => self.deliver_retire_imports(&vrefs),
        };
        if let Err(err) = outcome {
            self.terminate_with_error(&err);
        }
    }

    fn deliver_message(
        &self,
        target: Vref,
        method: &str,
        args: CapData,
        result: Option<Vref>,
    ) -> VatResult<()> {
        let target_value = self
            .convert_slot_to_val(target, None)
            .map_err(|err| VatError::protocol(format!("undeliverable target {target}: {err}")))?;
        if matches!(target_value, CapRef::Presence(_) | CapRef::Device(_)) {
            return Err(VatError::protocol(format!(
                "message delivered to non-exported target {target}"
            )));
        }

        let resolver = match result {
            Some(vpid) => Some(self.register_result_promise(vpid)?),
            None => None,
        };

        let args_value = self.unserialize(&args)?;
        let Passable::List(arg_list) = args_value else {
            return Err(VatError::protocol("message arguments must be a list"));
        };
        let method = Method::from_wire(method);

        self.deliver_to_value(target_value, method, arg_list, resolver);
        Ok(())
    }

    /// Registers the result promise of an inbound message; this vat is now
    /// its decider.
    fn register_result_promise(&self, vpid: Vref) -> VatResult<Resolver> {
        if !vpid.is_promise() {
            return Err(VatError::protocol(format!(
                "result slot {vpid} is not a promise"
            )));
        }
        if self.inner.tables.has_slot(vpid) {
            return Err(VatError::protocol(format!("result slot {vpid} reused")));
        }
        let (promise, resolver) = crate::promise::LocalPromise::pair(self.queue());
        let value = CapRef::Promise(promise.clone());
        self.register_value(vpid, &value);
        self.export_promise(vpid, &promise);
        Ok(resolver)
    }

    fn deliver_to_value(
        &self,
        target: CapRef,
        method: Method,
        args: Vec<crate::values::Value>,
        resolver: Option<Resolver>,
    ) {
        match &target {
            CapRef::Remotable(_) | CapRef::Virtual(_) => {
                let outcome = self.invoke_local(&target, &method, args);
                match resolver {
                    Some(resolver) => self.bind_outcome(outcome, &resolver),
                    None => {
                        if let InvokeOutcome::Throw(reason) = outcome {
                            warn!(
                                vat = %self.inner.config.vat_name,
                                ?reason,
                                "delivery raised with no result promise"
                            );
                        }
                    }
                }
            }
            CapRef::Promise(promise) => {
                // Pipelined delivery to a promise this vat decides: hold the
                // message until the promise settles.
                let weak = self.downgrade();
                promise.when(self.queue(), move |settlement| {
                    let Some(ls) = weak.upgrade() else { return };
                    match resolver {
                        Some(resolver) => {
                            ls.redeliver_settled_send(settlement, method, args, resolver)
                        }
                        None => match settlement {
                            Ok(Passable::Cap(cap)) => {
                                if let Err(err) = ls.queue_send(&cap, method, args) {
                                    warn!(%err, "held-back delivery failed");
                                }
                            }
                            other => {
                                warn!(?other, "held-back delivery had no capability target");
                            }
                        },
                    }
                });
            }
            CapRef::Presence(_) | CapRef::Device(_) => {
                // Shape-checked by the caller.
                error!(vat = %self.inner.config.vat_name, "unreachable delivery target shape");
            }
        }
    }

    fn deliver_notify(&self, resolutions: Vec<Resolution>) -> VatResult<()> {
        let mut settled = Vec::with_capacity(resolutions.len());
        for Resolution {
            vpid,
            rejected,
            data,
        } in resolutions
        {
            let resolver = self.inner.tables.imported_resolver(vpid).ok_or_else(|| {
                VatError::protocol(format!("notify for unknown promise {vpid}"))
            })?;
            let value = self.unserialize(&data)?;
            if rejected {
                resolver.reject(value);
            } else {
                resolver.resolve(value);
            }
            settled.push(vpid);
        }
        // The whole batch settles before any vpid retires, so entries may
        // reference each other.
        for vpid in settled {
            self.retire_promise(vpid);
        }
        // Promise imports that arrived inside the batch get their subscribe
        // now, unless the batch itself already settled them.
        self.flush_subscriptions();
        Ok(())
    }

    fn deliver_drop_exports(&self, vrefs: &[Vref]) -> VatResult<()> {
        for &vref in vrefs {
            if !vref.is_object() || !vref.is_export() {
                warn!(vat = %self.inner.config.vat_name, %vref, "dropExports for non-export");
                continue;
            }
            if vref.is_virtual() {
                // Virtual export reachability is the store's ledger.
                debug!(vat = %self.inner.config.vat_name, %vref, "dropExports for virtual export");
                continue;
            }
            if !self.inner.tables.unpin_export(vref) {
                warn!(vat = %self.inner.config.vat_name, %vref, "dropExports for unpinned export");
            }
        }
        Ok(())
    }

    fn deliver_retire_exports(&self, vrefs: &[Vref]) -> VatResult<()> {
        for &vref in vrefs {
            if !vref.is_object() || !vref.is_export() {
                warn!(vat = %self.inner.config.vat_name, %vref, "retireExports for non-export");
                continue;
            }
            if self.inner.tables.is_pinned_export(vref) {
                // The kernel retired something it never dropped. Out of
                // line, but the vat can keep going.
                error!(
                    vat = %self.inner.config.vat_name,
                    %vref,
                    "kernel retired a still-reachable export"
                );
                continue;
            }
            self.inner.tables.forget_slot(vref);
            self.inner.finalizers.unregister(vref);
            self.inner.dead_set.borrow_mut().remove(&vref);
        }
        Ok(())
    }

    fn deliver_retire_imports(&self, vrefs: &[Vref]) -> VatResult<()> {
        for &vref in vrefs {
            if !vref.is_object() || !vref.is_import() {
                warn!(vat = %self.inner.config.vat_name, %vref, "retireImports for non-import");
                continue;
            }
            self.inner.recognizers.retire(vref);
            self.inner.store.retire_recognizable(vref);
        }
        Ok(())
    }
}
