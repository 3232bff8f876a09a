//! Passable → capdata serialization.
//!
//! Copy data maps directly onto JSON. Forms JSON cannot carry natively are
//! encoded as single-key tagged objects:
//!
//! - `{"$undef": true}` — undefined
//! - `{"$f": n}` / `{"$f": "NaN" | "Infinity" | "-Infinity"}` — floats
//! - `{"$rec": {...}}` — records (the wrapper keeps user keys out of tag space)
//! - `{"$err": {"name": n, "message": m}}` — errors
//! - `{"$slot": i}` or `{"$slot": i, "iface": label}` — capability leaves
//!
//! Capability leaves are deduplicated: a handle occurring twice yields one
//! slot entry, referenced by the same index.

use crate::error::{MarshalError, MarshalResult};
use crate::passable::{Passable, SlotConverter};
use serde_json::{json, Map, Value as Json};
use std::collections::HashMap;
use vatrun_core::{CapData, Vref};

struct SlotAccumulator {
    slots: Vec<Vref>,
    indices: HashMap<Vref, usize>,
}

impl SlotAccumulator {
    fn new() -> Self {
        Self {
            slots: Vec::new(),
            indices: HashMap::new(),
        }
    }

    fn index_of(&mut self, vref: Vref) -> usize {
        if let Some(&index) = self.indices.get(&vref) {
            return index;
        }
        let index = self.slots.len();
        self.slots.push(vref);
        self.indices.insert(vref, index);
        index
    }
}

/// Serializes a passable into capdata, routing capability leaves through the
/// converter in body order.
pub fn to_capdata<C>(
    value: &Passable<C>,
    converter: &dyn SlotConverter<C>,
) -> MarshalResult<CapData> {
    let mut acc = SlotAccumulator::new();
    let body = encode_node(value, converter, &mut acc)?;
    let text = serde_json::to_string(&body)
        .map_err(|err| MarshalError::body(format!("body not encodable: {err}")))?;
    Ok(CapData::new(text, acc.slots))
}

fn encode_node<C>(
    value: &Passable<C>,
    converter: &dyn SlotConverter<C>,
    acc: &mut SlotAccumulator,
) -> MarshalResult<Json> {
    let json = match value {
        Passable::Undefined => json!({ "$undef": true }),
        Passable::Null => Json::Null,
        Passable::Bool(b) => Json::Bool(*b),
        Passable::Int(i) => json!(i),
        Passable::Float(f) => encode_float(*f),
        Passable::Str(s) => Json::String(s.clone()),
        Passable::List(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(encode_node(item, converter, acc)?);
            }
            Json::Array(out)
        }
        Passable::Record(fields) => {
            let mut out = Map::new();
            for (name, field) in fields {
                out.insert(name.clone(), encode_node(field, converter, acc)?);
            }
            json!({ "$rec": out })
        }
        Passable::Error { name, message } => {
            json!({ "$err": { "name": name, "message": message } })
        }
        Passable::Cap(cap) => {
            let vref = converter.val_to_slot(cap)?;
            let index = acc.index_of(vref);
            match converter.iface_of(cap) {
                Some(iface) => json!({ "$slot": index, "iface": iface }),
                None => json!({ "$slot": index }),
            }
        }
    };
    Ok(json)
}

fn encode_float(f: f64) -> Json {
    if f.is_nan() {
        json!({ "$f": "NaN" })
    } else if f == f64::INFINITY {
        json!({ "$f": "Infinity" })
    } else if f == f64::NEG_INFINITY {
        json!({ "$f": "-Infinity" })
    } else {
        json!({ "$f": f })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::from_capdata;
    use vatrun_core::VatError;

    /// A toy capability: its vref is just its payload.
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

        fn iface_of(&self, cap: &TestCap) -> Option<String> {
            Some(format!("cap{}", cap.0))
        }
    }

    #[test]
    fn scalars_map_to_plain_json() {
        let value: Passable<TestCap> = Passable::List(vec![
            Passable::Null,
            Passable::Bool(true),
            Passable::Int(-7),
            Passable::string("hi"),
        ]);
        let data = to_capdata(&value, &TestConverter).unwrap();
        assert_eq!(data.body, r#"[null,true,-7,"hi"]"#);
        assert!(data.slots.is_empty());
    }

    #[test]
    fn caps_become_indexed_slots() {
        let value = Passable::List(vec![
            Passable::Cap(TestCap(10)),
            Passable::Cap(TestCap(11)),
            Passable::Cap(TestCap(10)),
        ]);
        let data = to_capdata(&value, &TestConverter).unwrap();
        assert_eq!(
            data.slots,
            vec![Vref::object_import(10), Vref::object_import(11)]
        );
        // The repeated capability reuses index 0.
        assert_eq!(
            data.body,
            r#"[{"$slot":0,"iface":"cap10"},{"$slot":1,"iface":"cap11"},{"$slot":0,"iface":"cap10"}]"#
        );
    }

    #[test]
    fn records_round_trip_in_order() {
        let value: Passable<TestCap> = Passable::record(vec![
            ("z", Passable::Int(1)),
            ("a", Passable::Int(2)),
        ]);
        let data = to_capdata(&value, &TestConverter).unwrap();
        assert_eq!(data.body, r#"{"$rec":{"z":1,"a":2}}"#);
        let back = from_capdata(&data, &TestConverter).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn special_floats_round_trip() {
        for f in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY, 1.5] {
            let value: Passable<TestCap> = Passable::Float(f);
            let data = to_capdata(&value, &TestConverter).unwrap();
            match from_capdata(&data, &TestConverter).unwrap() {
                Passable::Float(back) => {
                    assert!(back == f || (back.is_nan() && f.is_nan()));
                }
                other => panic!("expected float, got {other:?}"),
            }
        }
    }

    #[test]
    fn errors_round_trip() {
        let value: Passable<TestCap> = Passable::error("TypeError", "no such method");
        let data = to_capdata(&value, &TestConverter).unwrap();
        let back = from_capdata(&data, &TestConverter).unwrap();
        assert_eq!(back, value);
    }
}
