//! Error cases shared by the hvtune crates.

use thiserror::Error;

/// Errors that occur in more than one hvtune crate.
///
/// Crate-specific enums wrap this type with `#[from]`.
#[derive(Debug, Error)]
pub enum CommonError {
    /// I/O error from the standard library.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A host entity (process, socket peer) does not exist.
    #[error("not found: {0}")]
    NotFound(String),
}

impl CommonError {
    /// Creates a new not found error.
    #[must_use]
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Returns true if this is an I/O error.
    #[must_use]
    pub const fn is_io(&self) -> bool {
        matches!(self, Self::Io(_))
    }

    /// Returns true if this is a not found error.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
