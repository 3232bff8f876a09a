//! Shared runtime constants.

/// Key prefix prepended to every user key in the optional vatstore. The
/// namespacing is invisible to user code.
pub const VATSTORE_PREFIX: &str = "vvs.";

/// Export id counters start here; id 0 is reserved for the root object.
pub const FIRST_EXPORT_ID: u64 = 1;

/// Promise id counters start here.
pub const FIRST_PROMISE_ID: u64 = 5;
