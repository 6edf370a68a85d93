//! The strategy capability and the collaborators handed to every strategy.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use rebalancer_core::pod_node_name;
use rebalancer_evictions::EvictionGate;
use tokio_util::sync::CancellationToken;

use crate::Result;

/// Per-cycle invocation context.
#[derive(Debug, Clone, Default)]
pub struct CycleContext {
    cancel: CancellationToken,
}

impl CycleContext {
    /// Create a context observing the given cancellation token.
    #[must_use]
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    /// Whether the cycle has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The token observed by this context.
    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// How a descheduling run ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Termination {
    /// Every node was processed.
    #[default]
    Completed,
    /// The total eviction budget ran out.
    TotalLimitReached,
    /// The cycle was cancelled.
    Cancelled,
}

/// Summary of one strategy run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DescheduleReport {
    /// Evictions attempted through the gate.
    pub attempted: u32,
    /// Evictions that succeeded.
    pub evicted: u32,
    /// How the run ended.
    pub termination: Termination,
}

/// A descheduling strategy.
#[async_trait]
pub trait DeschedulePlugin: std::fmt::Debug + Send + Sync {
    /// The strategy name used in the registry and in eviction options.
    fn name(&self) -> &'static str;

    /// Run the strategy against the given nodes.
    ///
    /// # Errors
    ///
    /// Returns an error if the run cannot start, e.g. because pods could not
    /// be listed. No eviction is attempted in that case.
    async fn deschedule(&self, ctx: &CycleContext, nodes: &[Node]) -> Result<DescheduleReport>;
}

/// Source of the pods assigned to a node.
#[async_trait]
pub trait PodSource: Send + Sync {
    /// List the pods assigned to the named node.
    ///
    /// # Errors
    ///
    /// Returns an error if the pods cannot be listed.
    async fn pods_on_node(&self, node_name: &str) -> Result<Vec<Pod>>;
}

/// An in-memory [`PodSource`] built from one cluster-wide pod listing.
#[derive(Debug, Clone, Default)]
pub struct PodIndex {
    by_node: HashMap<String, Vec<Pod>>,
}

impl PodIndex {
    /// Index pods by their assigned node. Unassigned pods are dropped.
    #[must_use]
    pub fn new(pods: impl IntoIterator<Item = Pod>) -> Self {
        let mut by_node: HashMap<String, Vec<Pod>> = HashMap::new();
        for pod in pods {
            if let Some(node) = pod_node_name(&pod) {
                by_node.entry(node.to_string()).or_default().push(pod);
            }
        }
        Self { by_node }
    }

    /// Total number of indexed pods.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_node.values().map(Vec::len).sum()
    }

    /// Whether the index holds no pods.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl PodSource for PodIndex {
    async fn pods_on_node(&self, node_name: &str) -> Result<Vec<Pod>> {
        Ok(self.by_node.get(node_name).cloned().unwrap_or_default())
    }
}

/// Collaborators shared by every strategy of a cycle.
#[derive(Clone)]
pub struct Handle {
    pods: Arc<dyn PodSource>,
    evictor: Arc<dyn EvictionGate>,
}

impl Handle {
    /// Create a handle.
    #[must_use]
    pub fn new(pods: Arc<dyn PodSource>, evictor: Arc<dyn EvictionGate>) -> Self {
        Self { pods, evictor }
    }

    /// The pod source.
    #[must_use]
    pub fn pods(&self) -> &dyn PodSource {
        self.pods.as_ref()
    }

    /// The eviction gate.
    #[must_use]
    pub fn evictor(&self) -> &dyn EvictionGate {
        self.evictor.as_ref()
    }
}
