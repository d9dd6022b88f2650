//! Error types for the API crate.

use hvtune_error::CommonError;
use thiserror::Error;

/// Result type alias for API operations.
pub type Result<T> = std::result::Result<T, ApiError>;

/// Errors raised while reading guest specifications and quantities.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Common errors (I/O, not found).
    #[error(transparent)]
    Common(#[from] CommonError),

    /// A resource quantity string could not be parsed.
    #[error("invalid quantity '{value}': {reason}")]
    InvalidQuantity { value: String, reason: String },

    /// A guest or domain document is not valid JSON for the model.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ApiError {
    pub(crate) fn invalid_quantity(value: &str, reason: impl Into<String>) -> Self {
        Self::InvalidQuantity {
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        Self::Common(CommonError::Io(err))
    }
}
