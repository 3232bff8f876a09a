//! Marshalling error type.

use thiserror::Error;
use vatrun_core::VatError;

/// Errors produced while translating between passables and capdata.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MarshalError {
    /// The body text is not well-formed or uses an unknown encoding form.
    #[error("malformed body: {message}")]
    Body {
        /// What was wrong with the body.
        message: String,
    },

    /// A slot index in the body has no entry in the slots list.
    #[error("slot index {index} out of range ({len} slots)")]
    SlotIndex {
        /// The out-of-range index.
        index: usize,
        /// The number of slots available.
        len: usize,
    },

    /// The slot converter refused a capability.
    #[error(transparent)]
    Slot(#[from] VatError),
}

impl MarshalError {
    pub fn body(message: impl Into<String>) -> Self {
        MarshalError::Body {
            message: message.into(),
        }
    }
}

impl From<MarshalError> for VatError {
    fn from(err: MarshalError) -> Self {
        match err {
            MarshalError::Slot(inner) => inner,
            other => VatError::Serialization {
                message: other.to_string(),
            },
        }
    }
}

/// Result alias for marshalling operations.
pub type MarshalResult<T> = Result<T, MarshalError>;
