//! Invariant checking for leaves and local triangulations.
//!
//! Checks are cheap enough for tests but not for production rounds, so the
//! exchange loop only runs them through [`debug_invariants!`] (debug builds or
//! the `strict-invariants` / `check-invariants` features) or when
//! `DelaunayConfig::check_invariants` is set.

use crate::delaunay_error::DelaunayError;

/// Trait for validating data structure invariants.
pub trait DebugInvariants {
    /// Panic on the first violated invariant when checking is enabled.
    fn debug_assert_invariants(&self);
    /// Validate invariants and return the first error encountered.
    fn validate_invariants(&self) -> Result<(), DelaunayError>;
}

/// Turn a failed invariant into a [`DelaunayError::ProtocolViolation`].
#[inline]
pub(crate) fn ensure(cond: bool, what: impl FnOnce() -> String) -> Result<(), DelaunayError> {
    if cond {
        Ok(())
    } else {
        Err(DelaunayError::ProtocolViolation(what()))
    }
}

/// Run a fallible check and panic on error when invariant checking is enabled.
#[macro_export]
macro_rules! debug_invariants {
    ($expr:expr, $($ctx:tt)*) => {
        #[cfg(any(debug_assertions, feature = "strict-invariants", feature = "check-invariants"))]
        if let Err(e) = $expr {
            panic!(concat!("[invariants] ", $($ctx)*, ": {}"), e);
        }
    };
}
