//! Shared fixtures for the liveslots integration suites.
#![allow(dead_code)]

use std::rc::Rc;
use vatrun_core::{CapData, Vref};
use vatrun_liveslots::testing::RecordingSyscall;
use vatrun_liveslots::{Liveslots, VatConfig};

pub fn make_vat(name: &str) -> (Liveslots, Rc<RecordingSyscall>) {
    make_vat_with(VatConfig::named(name))
}

pub fn make_vat_with(config: VatConfig) -> (Liveslots, Rc<RecordingSyscall>) {
    let syscall = RecordingSyscall::new();
    let vat = Liveslots::without_virtual_store(config, syscall.clone());
    (vat, syscall)
}

pub fn vref(text: &str) -> Vref {
    text.parse().expect("vref literal")
}

/// Argument capdata carrying exactly the given slots, in order.
pub fn args_with_slots(slots: &[&str]) -> CapData {
    let body: Vec<String> = (0..slots.len())
        .map(|index| format!("{{\"$slot\":{index}}}"))
        .collect();
    CapData::new(
        format!("[{}]", body.join(",")),
        slots.iter().map(|slot| vref(slot)).collect(),
    )
}

pub fn no_args() -> CapData {
    CapData::pure("[]")
}
