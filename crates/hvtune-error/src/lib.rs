//! Common error types for `hvtune`.
//!
//! Every hvtune crate defines its own error enum and folds the shared cases
//! into it through [`CommonError`]:
//!
//! ```rust,ignore
//! use hvtune_error::CommonError;
//! use thiserror::Error;
//!
//! #[derive(Debug, Error)]
//! pub enum RuntimeError {
//!     #[error(transparent)]
//!     Common(#[from] CommonError),
//!
//!     #[error("cgroup error: {0}")]
//!     Cgroup(String),
//! }
//! ```

mod common;

pub use common::CommonError;

/// Result type alias using `CommonError`.
pub type Result<T> = std::result::Result<T, CommonError>;
