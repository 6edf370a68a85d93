//! Error types for the agent crate.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while running the agent.
#[derive(Error, Debug)]
pub enum AgentError {
    /// Kubernetes API error.
    #[error("Kubernetes API error: {0}")]
    KubeApi(#[from] kube::Error),

    /// The policy file could not be read.
    #[error("Failed to read policy file {path}: {source}")]
    PolicyIo {
        /// Path of the policy file.
        path: PathBuf,
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// The policy file is not a valid policy document.
    #[error("Invalid policy: {0}")]
    PolicyParse(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A strategy could not be built or failed to run.
    #[error(transparent)]
    Framework(#[from] rebalancer_framework::FrameworkError),

    /// A shared helper rejected its input.
    #[error(transparent)]
    Core(#[from] rebalancer_core::CoreError),
}

impl AgentError {
    /// Check if the failed cycle may succeed when retried.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::KubeApi(_) => true,
            Self::Framework(e) => e.is_retriable(),
            Self::PolicyIo { .. } | Self::PolicyParse(_) | Self::Config(_) | Self::Core(_) => false,
        }
    }
}

/// A specialized Result type for agent operations.
pub type Result<T> = std::result::Result<T, AgentError>;
