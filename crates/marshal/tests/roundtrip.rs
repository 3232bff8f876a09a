//! Property tests: serialize-then-deserialize is the identity on passable
//! trees, and slot lists stay deduplicated.

use proptest::prelude::*;
use vatrun_core::{VatError, Vref};
use vatrun_marshal::{from_capdata, to_capdata, Passable, SlotConverter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TestCap(u64);

struct TestConverter;

impl SlotConverter<TestCap> for TestConverter {
    fn val_to_slot(&self, cap: &TestCap) -> Result<Vref, VatError> {
        Ok(Vref::object_import(cap.0))
    }

    fn slot_to_val(&self, slot: Vref, _iface: Option<&str>) -> Result<TestCap, VatError> {
        Ok(TestCap(slot.id()))
    }
}

fn arb_passable() -> impl Strategy<Value = Passable<TestCap>> {
    let leaf = prop_oneof![
        Just(Passable::Undefined),
        Just(Passable::Null),
        any::<bool>().prop_map(Passable::Bool),
        any::<i64>().prop_map(Passable::Int),
        "[a-z]{0,8}".prop_map(Passable::Str),
        (0u64..8).prop_map(|id| Passable::Cap(TestCap(id))),
        ("[A-Z][a-z]{0,6}", "[a-z ]{0,12}")
            .prop_map(|(name, message)| Passable::error(name, message)),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            proptest::collection::vec(inner.clone(), 0..4).prop_map(Passable::List),
            proptest::collection::vec(("[a-z]{1,6}", inner), 0..4).prop_map(|fields| {
                // Duplicate record keys would not survive the trip.
                let mut seen = std::collections::HashSet::new();
                let fields = fields
                    .into_iter()
                    .filter(|(name, _)| seen.insert(name.clone()))
                    .collect();
                Passable::Record(fields)
            }),
        ]
    })
}

proptest! {
    #[test]
    fn round_trip_is_identity(value in arb_passable()) {
        let data = to_capdata(&value, &TestConverter).unwrap();
        let back = from_capdata(&data, &TestConverter).unwrap();
        prop_assert_eq!(back, value);
    }

    #[test]
    fn slots_are_deduplicated(value in arb_passable()) {
        let data = to_capdata(&value, &TestConverter).unwrap();
        let mut slots = data.slots.clone();
        slots.sort();
        slots.dedup();
        prop_assert_eq!(slots.len(), data.slots.len(), "no duplicate slot entries");
    }
}
