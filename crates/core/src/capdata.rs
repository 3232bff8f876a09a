//! Serialized capability data.

use crate::vref::Vref;
use serde::{Deserialize, Serialize};

/// A serialized value paired with the references it mentions.
///
/// `body` is the pass-by-copy encoding produced by the marshaller; every
/// capability or promise occurring in it points at exactly one entry of
/// `slots` by index. The structural correspondence between body and slots is
/// the marshaller's responsibility; `CapData` itself is inert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapData {
    /// The pass-by-copy body.
    pub body: String,
    /// The references the body mentions, in first-occurrence order.
    pub slots: Vec<Vref>,
}

impl CapData {
    pub fn new(body: impl Into<String>, slots: Vec<Vref>) -> Self {
        Self {
            body: body.into(),
            slots,
        }
    }

    /// Capdata carrying no references.
    pub fn pure(body: impl Into<String>) -> Self {
        Self::new(body, Vec::new())
    }

    /// True when any slot is a promise reference. Device calls reject such
    /// arguments.
    pub fn mentions_promises(&self) -> bool {
        self.slots.iter().any(|slot| slot.is_promise())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn promise_detection() {
        let data = CapData::new("[]", vec![Vref::object_import(1)]);
        assert!(!data.mentions_promises());

        let data = CapData::new("[]", vec![Vref::promise_export(2)]);
        assert!(data.mentions_promises());
    }

    #[test]
    fn pure_has_no_slots() {
        assert!(CapData::pure("true").slots.is_empty());
    }
}
