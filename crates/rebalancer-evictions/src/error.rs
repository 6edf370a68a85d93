//! Error types for the evictions crate.

use thiserror::Error;

/// Errors raised by an eviction backend.
///
/// Budget exhaustion is never reported through this type; it is part of
/// [`EvictOutcome`](crate::EvictOutcome).
#[derive(Error, Debug)]
pub enum EvictionError {
    /// Kubernetes API error.
    #[error("Kubernetes API error: {0}")]
    KubeApi(#[from] kube::Error),

    /// The pod no longer exists.
    #[error("Pod not found: {0}")]
    NotFound(String),

    /// The API server refused the eviction, e.g. because of a disruption budget.
    #[error("Eviction rejected: {0}")]
    Rejected(String),
}

impl EvictionError {
    /// Check if a later attempt could succeed.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::KubeApi(_) | Self::Rejected(_))
    }
}

/// A specialized Result type for eviction operations.
pub type Result<T> = std::result::Result<T, EvictionError>;
