//! Error types shared by the rebalancer crates.

use thiserror::Error;

/// A result type using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised by the pure pod and selector helpers.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A label selector is malformed.
    #[error("invalid label selector: {0}")]
    InvalidSelector(String),
}
