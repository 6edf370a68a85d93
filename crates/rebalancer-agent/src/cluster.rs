//! Cluster snapshot taken at the start of every cycle.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::{Api, ListParams};
use kube::Client;
use rebalancer_core::{node_name, selector};
use tracing::debug;

use crate::Result;

/// Lists the nodes and pods a descheduling cycle works on.
#[async_trait]
pub trait Cluster: Send + Sync {
    /// List the ready nodes to process, in a stable order.
    ///
    /// # Errors
    ///
    /// Returns an error if the nodes cannot be listed.
    async fn list_nodes(&self) -> Result<Vec<Node>>;

    /// List every pod in the cluster.
    ///
    /// # Errors
    ///
    /// Returns an error if the pods cannot be listed.
    async fn list_pods(&self) -> Result<Vec<Pod>>;
}

/// A [`Cluster`] backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
    node_selector: Option<String>,
}

impl KubeCluster {
    /// Create a cluster view, optionally restricted to nodes matching an
    /// equality selector such as `pool=general,zone=a`.
    ///
    /// # Errors
    ///
    /// Returns an error if the node selector is malformed.
    pub fn new(client: Client, node_selector: Option<String>) -> Result<Self> {
        if let Some(s) = &node_selector {
            selector::parse_equality(s)?;
        }
        Ok(Self {
            client,
            node_selector,
        })
    }
}

#[async_trait]
impl Cluster for KubeCluster {
    async fn list_nodes(&self) -> Result<Vec<Node>> {
        let api: Api<Node> = Api::all(self.client.clone());
        let mut params = ListParams::default();
        if let Some(s) = &self.node_selector {
            params = params.labels(s);
        }

        let nodes = api.list(&params).await?.items;
        let listed = nodes.len();
        let mut ready: Vec<Node> = nodes.into_iter().filter(is_node_ready).collect();
        ready.sort_by(|a, b| node_name(a).cmp(node_name(b)));

        debug!(listed, ready = ready.len(), "Listed nodes");
        Ok(ready)
    }

    async fn list_pods(&self) -> Result<Vec<Pod>> {
        let api: Api<Pod> = Api::all(self.client.clone());
        let pods = api.list(&ListParams::default()).await?.items;
        debug!(count = pods.len(), "Listed pods");
        Ok(pods)
    }
}

/// Whether the node reports a `Ready` condition with status `True`.
#[must_use]
pub fn is_node_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
}

/// A fixed in-memory cluster for testing without an API server.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_util::sync::CancellationToken;

    /// Returns the same nodes and pods on every call.
    #[derive(Default)]
    pub struct StaticCluster {
        nodes: Vec<Node>,
        pods: Vec<Pod>,
        node_lists: AtomicUsize,
        cancel_after: Option<(usize, CancellationToken)>,
    }

    impl StaticCluster {
        /// Create a cluster holding the given objects.
        #[must_use]
        pub fn new(nodes: Vec<Node>, pods: Vec<Pod>) -> Self {
            Self {
                nodes,
                pods,
                ..Default::default()
            }
        }

        /// Cancel `token` when the nodes are listed for the `cycles`-th time.
        #[must_use]
        pub fn cancelling_after(mut self, cycles: usize, token: CancellationToken) -> Self {
            self.cancel_after = Some((cycles, token));
            self
        }

        /// Number of times the nodes were listed.
        #[must_use]
        pub fn node_lists(&self) -> usize {
            self.node_lists.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Cluster for StaticCluster {
        async fn list_nodes(&self) -> Result<Vec<Node>> {
            let count = self.node_lists.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some((cycles, token)) = &self.cancel_after {
                if count >= *cycles {
                    token.cancel();
                }
            }
            Ok(self.nodes.clone())
        }

        async fn list_pods(&self) -> Result<Vec<Pod>> {
            Ok(self.pods.clone())
        }
    }
}
