//! Error types for the framework crate.

use thiserror::Error;

/// Errors that abort a descheduling run.
///
/// Budget exhaustion and cancellation are not errors; they are reported in
/// [`DescheduleReport`](crate::DescheduleReport).
#[derive(Error, Debug)]
pub enum FrameworkError {
    /// Invalid strategy configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Strategy arguments could not be decoded.
    #[error("Invalid strategy arguments: {0}")]
    InvalidArgs(#[from] serde_json::Error),

    /// No strategy is registered under the name.
    #[error("Unknown strategy: {0}")]
    UnknownStrategy(String),

    /// Listing the pods of a node failed.
    #[error("Error listing pods on node {node}: {reason}")]
    ListPods {
        /// The node whose pods could not be listed.
        node: String,
        /// Why listing failed.
        reason: String,
    },

    /// A shared helper rejected its input.
    #[error(transparent)]
    Core(#[from] rebalancer_core::CoreError),
}

impl FrameworkError {
    /// Check if the failed run may succeed when retried next cycle.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::ListPods { .. })
    }
}

/// A specialized Result type for framework operations.
pub type Result<T> = std::result::Result<T, FrameworkError>;
