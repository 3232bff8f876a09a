//! Slot-aware capability serialization.
//!
//! The marshaller turns [`Passable`] value trees into [`CapData`] and back.
//! Pass-by-copy data becomes a JSON body; pass-by-capability leaves become
//! slot indices, resolved through a [`SlotConverter`] supplied by the caller.
//! The marshaller itself knows nothing about presences, promises, or export
//! tables; it only guarantees the structural body/slots correspondence.

pub mod decode;
pub mod encode;
pub mod error;
pub mod passable;

pub use decode::from_capdata;
pub use encode::to_capdata;
pub use error::{MarshalError, MarshalResult};
pub use passable::{Passable, SlotConverter};
