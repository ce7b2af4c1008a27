use std::fmt;

use crate::native::NativeError;

/// Capability computation failed.
///
/// Once recorded, the failure is returned to every later caller of the same
/// logical device; the query is not retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapsError(pub NativeError);

impl fmt::Display for CapsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "capabilities unavailable: {}", self.0)
    }
}

impl std::error::Error for CapsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.0)
    }
}
