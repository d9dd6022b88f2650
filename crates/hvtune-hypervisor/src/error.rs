//! Error types for the hypervisor crate.

use thiserror::Error;

/// Result type alias for hypervisor operations.
pub type Result<T> = std::result::Result<T, HypervisorError>;

/// Errors that can occur while selecting a backend or sizing a guest.
#[derive(Debug, Error)]
pub enum HypervisorError {
    /// No descriptor is registered under the name.
    #[error("hypervisor context not found for name: {0}")]
    NotFound(String),

    /// The overhead ratio is not a non-negative decimal.
    #[error("invalid additional guest memory overhead ratio '{value}': {reason}")]
    InvalidOverheadRatio { value: String, reason: String },
}

impl HypervisorError {
    /// Returns true if this is a lookup miss.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
