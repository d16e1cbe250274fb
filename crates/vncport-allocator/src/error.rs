//! Allocator error surface

use thiserror::Error;
use vncport_store::StoreError;

/// Errors returned by [`PortAllocator`](crate::PortAllocator) operations
///
/// Exhaustion and store failures are separate variants: a caller must be able
/// to tell "no capacity" from "try again".
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AllocatorError {
    /// Every port in the range holds a live allocation
    #[error("No free port in range {start}-{end}")]
    Exhausted { start: u16, end: u16 },

    /// The backing store could not complete the operation
    #[error("Allocation store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    /// Bad argument from the caller; never worth retrying
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl AllocatorError {
    /// Whether this is the exhaustion condition
    pub fn is_exhausted(&self) -> bool {
        matches!(self, AllocatorError::Exhausted { .. })
    }

    /// Whether retrying the same call later could succeed
    pub fn is_retryable(&self) -> bool {
        !matches!(self, AllocatorError::InvalidInput(_))
    }
}
