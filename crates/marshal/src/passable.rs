//! The pass-by-copy value model.

use vatrun_core::{VatError, Vref};

/// A value that can cross the vat boundary.
///
/// `C` is the in-vat capability handle type; the marshaller treats it as an
/// opaque leaf and routes it through the [`SlotConverter`]. Copy data is
/// plain: scalars, strings, lists, string-keyed records, and a minimal error
/// shape. Records preserve insertion order so serialization is deterministic.
#[derive(Debug, Clone, PartialEq)]
pub enum Passable<C> {
    Undefined,
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Passable<C>>),
    Record(Vec<(String, Passable<C>)>),
    /// A pass-by-copy error: name plus message, nothing else survives the
    /// boundary.
    Error {
        name: String,
        message: String,
    },
    /// A pass-by-capability leaf.
    Cap(C),
}

impl<C> Passable<C> {
    pub fn string(s: impl Into<String>) -> Self {
        Passable::Str(s.into())
    }

    pub fn record<S: Into<String>>(fields: Vec<(S, Passable<C>)>) -> Self {
        Passable::Record(
            fields
                .into_iter()
                .map(|(name, value)| (name.into(), value))
                .collect(),
        )
    }

    pub fn error(name: impl Into<String>, message: impl Into<String>) -> Self {
        Passable::Error {
            name: name.into(),
            message: message.into(),
        }
    }

    /// The capability leaf, if this is one.
    pub fn as_cap(&self) -> Option<&C> {
        match self {
            Passable::Cap(cap) => Some(cap),
            _ => None,
        }
    }

    /// Walks the tree, applying `f` to every capability leaf.
    pub fn for_each_cap<'a>(&'a self, f: &mut impl FnMut(&'a C)) {
        match self {
            Passable::Cap(cap) => f(cap),
            Passable::List(items) => {
                for item in items {
                    item.for_each_cap(f);
                }
            }
            Passable::Record(fields) => {
                for (_, value) in fields {
                    value.for_each_cap(f);
                }
            }
            _ => {}
        }
    }
}

/// The seam between the marshaller and whoever owns the slot tables.
///
/// On serialize, every capability leaf is turned into a vref; on deserialize,
/// every slot is turned back into a capability handle. Implementations may
/// allocate fresh vrefs or materialize fresh handles as a side effect; the
/// marshaller only requires that the mapping is stable within one call.
pub trait SlotConverter<C> {
    /// Maps a capability to its vref, allocating one if needed.
    fn val_to_slot(&self, cap: &C) -> Result<Vref, VatError>;

    /// Maps a vref back to a capability, materializing one if needed.
    /// `iface` is the advisory interface label recorded at serialization.
    fn slot_to_val(&self, slot: Vref, iface: Option<&str>) -> Result<C, VatError>;

    /// The advisory interface label to record for a capability, if any.
    fn iface_of(&self, _cap: &C) -> Option<String> {
        None
    }
}
