//! Error taxonomy for the vat runtime.

use thiserror::Error;

/// Errors raised by the liveslots layer and its collaborators.
///
/// The taxonomy distinguishes kernel protocol violations, user-side misuse of
/// vat powers, and broken internal invariants. User code errors (a method
/// throwing, a rejected result) are not represented here; they travel as
/// promise rejections through `syscall.resolve`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VatError {
    /// The kernel delivered a malformed or inconsistent message.
    #[error("protocol violation: {message}")]
    Protocol {
        /// Description of the violated expectation.
        message: String,
    },

    /// A method was invoked on (or a message carried) a disavowed presence.
    #[error("this Presence has been disavowed")]
    DisavowedReference,

    /// An eventual send used a symbol method name other than the
    /// async-iteration symbol.
    #[error("invalid method name: {name}")]
    BadMethodName {
        /// The offending name.
        name: String,
    },

    /// A device call carried a promise in its arguments.
    #[error("device calls cannot accept promises")]
    PromiseInDeviceCall,

    /// A device call attempted to pass or target a nested device proxy.
    #[error("device nodes cannot wrap other device nodes")]
    DeviceOfDevice,

    /// `disavow` was invoked on a vat configured without that power.
    #[error("disavow is not enabled for this vat")]
    DisavowNotEnabled,

    /// The kernel referenced a vat-allocated object this vat never exported.
    #[error("unknown export: {vref}")]
    UnknownExport {
        /// The unrecognized vref token.
        vref: String,
    },

    /// A pre-resolution pipeline handler was driven after its promise
    /// settled.
    #[error("pipeline handler used after resolution")]
    HandlerAfterResolution,

    /// A reference token failed to parse.
    #[error("malformed vref token: {token}")]
    MalformedVref {
        /// The unparseable token.
        token: String,
    },

    /// Serialization or deserialization of capdata failed.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the marshalling failure.
        message: String,
    },

    /// Liveslots detected a broken internal invariant. Logged and, where
    /// possible, survived.
    #[error("internal invariant violated: {message}")]
    InternalInvariant {
        /// Description of the broken invariant.
        message: String,
    },
}

impl VatError {
    /// Shorthand for a protocol violation.
    pub fn protocol(message: impl Into<String>) -> Self {
        VatError::Protocol {
            message: message.into(),
        }
    }

    /// Shorthand for a broken internal invariant.
    pub fn internal(message: impl Into<String>) -> Self {
        VatError::InternalInvariant {
            message: message.into(),
        }
    }

    /// True for errors that must terminate the vat rather than be reported
    /// to the caller alone.
    pub fn is_fatal(&self) -> bool {
        matches!(self, VatError::DisavowedReference)
    }
}

/// Result alias used throughout the runtime.
pub type VatResult<T> = Result<T, VatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_failure() {
        let err = VatError::UnknownExport {
            vref: "o+99".into(),
        };
        assert_eq!(err.to_string(), "unknown export: o+99");

        let err = VatError::protocol("notify for unknown promise p-9");
        assert_eq!(
            err.to_string(),
            "protocol violation: notify for unknown promise p-9"
        );
    }

    #[test]
    fn only_disavowal_is_fatal() {
        assert!(VatError::DisavowedReference.is_fatal());
        assert!(!VatError::PromiseInDeviceCall.is_fatal());
        assert!(!VatError::protocol("x").is_fatal());
    }
}
