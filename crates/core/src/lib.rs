//! Core reference model for the vatrun vat runtime.
//!
//! This crate defines the vocabulary shared by every layer of the runtime:
//! vat-visible reference identifiers ([`Vref`]), serialized capability data
//! ([`CapData`]), method names crossing the vat boundary ([`Method`]), and
//! the error taxonomy ([`VatError`]).

pub mod capdata;
pub mod constants;
pub mod error;
pub mod method;
pub mod vref;

pub use capdata::CapData;
pub use error::{VatError, VatResult};
pub use method::Method;
pub use vref::{Allocator, RefKind, Vref};
