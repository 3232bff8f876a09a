//! Method names crossing the vat boundary.

use crate::error::VatError;
use std::fmt;

/// The wire spelling of the async-iteration symbol. A send using
/// [`Method::AsyncIterator`] is delivered under this literal name, and an
/// inbound delivery carrying it is recognized as the symbol again.
pub const ASYNC_ITERATOR_NAME: &str = "Symbol.asyncIterator";

/// A method selector for an eventual send or device call.
///
/// Only string names travel across the boundary. The async-iteration symbol
/// is bridged as the literal [`ASYNC_ITERATOR_NAME`]; every other symbol
/// fails with [`VatError::BadMethodName`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    /// An ordinary string method name.
    Name(String),
    /// The async-iteration symbol.
    AsyncIterator,
    /// Some other symbol; never deliverable.
    Symbol(String),
}

impl Method {
    pub fn name(name: impl Into<String>) -> Self {
        Method::Name(name.into())
    }

    /// The string spelling used in syscalls, or `BadMethodName` for symbols
    /// that have none.
    pub fn wire_name(&self) -> Result<&str, VatError> {
        match self {
            Method::Name(name) => Ok(name),
            Method::AsyncIterator => Ok(ASYNC_ITERATOR_NAME),
            Method::Symbol(name) => Err(VatError::BadMethodName { name: name.clone() }),
        }
    }

    /// Recognizes the bridged async-iteration symbol in an inbound method
    /// name.
    pub fn from_wire(name: &str) -> Self {
        if name == ASYNC_ITERATOR_NAME {
            Method::AsyncIterator
        } else {
            Method::Name(name.to_string())
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Name(name) => f.write_str(name),
            Method::AsyncIterator => f.write_str(ASYNC_ITERATOR_NAME),
            Method::Symbol(name) => write!(f, "@@{name}"),
        }
    }
}
