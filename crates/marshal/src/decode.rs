//! Capdata → passable deserialization.

use crate::error::{MarshalError, MarshalResult};
use crate::passable::{Passable, SlotConverter};
use serde_json::{Map, Value as Json};
use vatrun_core::CapData;

/// Deserializes capdata, materializing capability leaves through the
/// converter. Slot indices out of range and unknown tagged forms are body
/// errors; converter failures pass through unchanged.
pub fn from_capdata<C>(
    data: &CapData,
    converter: &dyn SlotConverter<C>,
) -> MarshalResult<Passable<C>> {
    let body: Json = serde_json::from_str(&data.body)
        .map_err(|err| MarshalError::body(format!("body not parseable: {err}")))?;
    decode_node(&body, data, converter)
}

fn decode_node<C>(
    json: &Json,
    data: &CapData,
    converter: &dyn SlotConverter<C>,
) -> MarshalResult<Passable<C>> {
    let value = match json {
        Json::Null => Passable::Null,
        Json::Bool(b) => Passable::Bool(*b),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Passable::Int(i)
            } else if let Some(f) = n.as_f64() {
                Passable::Float(f)
            } else {
                return Err(MarshalError::body(format!("unrepresentable number {n}")));
            }
        }
        Json::String(s) => Passable::Str(s.clone()),
        Json::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(decode_node(item, data, converter)?);
            }
            Passable::List(out)
        }
        Json::Object(fields) => decode_tagged(fields, data, converter)?,
    };
    Ok(value)
}

fn decode_tagged<C>(
    fields: &Map<String, Json>,
    data: &CapData,
    converter: &dyn SlotConverter<C>,
) -> MarshalResult<Passable<C>> {
    if fields.contains_key("$undef") {
        return Ok(Passable::Undefined);
    }

    if let Some(tagged) = fields.get("$f") {
        return decode_float(tagged);
    }

    if let Some(Json::Object(inner)) = fields.get("$rec") {
        let mut out = Vec::with_capacity(inner.len());
        for (name, field) in inner {
            out.push((name.clone(), decode_node(field, data, converter)?));
        }
        return Ok(Passable::Record(out));
    }

    if let Some(Json::Object(inner)) = fields.get("$err") {
        let name = inner.get("name").and_then(Json::as_str).unwrap_or("Error");
        let message = inner.get("message").and_then(Json::as_str).unwrap_or("");
        return Ok(Passable::error(name, message));
    }

    if let Some(index) = fields.get("$slot") {
        let index = index
            .as_u64()
            .ok_or_else(|| MarshalError::body("non-numeric slot index"))?
            as usize;
        let slot = *data
            .slots
            .get(index)
            .ok_or(MarshalError::SlotIndex {
                index,
                len: data.slots.len(),
            })?;
        let iface = fields.get("iface").and_then(Json::as_str);
        let cap = converter.slot_to_val(slot, iface)?;
        return Ok(Passable::Cap(cap));
    }

    Err(MarshalError::body(format!(
        "unknown encoding form with keys {:?}",
        fields.keys().collect::<Vec<_>>()
    )))
}

fn decode_float<C>(tagged: &Json) -> MarshalResult<Passable<C>> {
    match tagged {
        Json::Number(n) => n
            .as_f64()
            .map(Passable::Float)
            .ok_or_else(|| MarshalError::body("unrepresentable float")),
        Json::String(s) => match s.as_str() {
            "NaN" => Ok(Passable::Float(f64::NAN)),
            "Infinity" => Ok(Passable::Float(f64::INFINITY)),
            "-Infinity" => Ok(Passable::Float(f64::NEG_INFINITY)),
            other => Err(MarshalError::body(format!("unknown float form {other:?}"))),
        },
        _ => Err(MarshalError::body("malformed float form")),
    }
}
