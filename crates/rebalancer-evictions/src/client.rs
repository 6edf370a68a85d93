//! Backends that carry out an eviction against the cluster.

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, EvictParams};
use kube::Client;
use tracing::{debug, info};

use rebalancer_core::{pod_key, pod_name, pod_namespace};

use crate::gate::EvictOptions;
use crate::{EvictionError, Result};

/// The `EvictionClient` trait removes a single pod from the cluster.
#[async_trait]
pub trait EvictionClient: Send + Sync {
    /// Evict the pod.
    ///
    /// # Errors
    ///
    /// Returns an error if the API server refuses or fails the eviction.
    async fn evict(&self, pod: &Pod, options: &EvictOptions) -> Result<()>;
}

#[async_trait]
impl<T: EvictionClient + ?Sized> EvictionClient for Arc<T> {
    async fn evict(&self, pod: &Pod, options: &EvictOptions) -> Result<()> {
        (**self).evict(pod, options).await
    }
}

/// Evicts pods through the Kubernetes Eviction API, honouring disruption budgets.
#[derive(Clone)]
pub struct KubeEvictionClient {
    client: Client,
}

impl KubeEvictionClient {
    /// Create an eviction client on top of an existing Kubernetes client.
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn pods_api(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl EvictionClient for KubeEvictionClient {
    async fn evict(&self, pod: &Pod, options: &EvictOptions) -> Result<()> {
        let pods = self.pods_api(pod_namespace(pod));
        let key = pod_key(pod);

        debug!(pod = %key, strategy = %options.strategy_name, "Submitting eviction");

        match pods.evict(pod_name(pod), &EvictParams::default()).await {
            Ok(_) => {
                info!(
                    pod = %key,
                    strategy = %options.strategy_name,
                    reason = ?options.reason,
                    "Evicted pod"
                );
                Ok(())
            }
            Err(kube::Error::Api(e)) if e.code == 404 => Err(EvictionError::NotFound(key)),
            // 429 is returned when a PodDisruptionBudget blocks the eviction.
            Err(kube::Error::Api(e)) if e.code == 429 => Err(EvictionError::Rejected(e.message)),
            Err(e) => Err(e.into()),
        }
    }
}

/// An in-memory eviction backend for testing without a cluster.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashSet;

    /// Records evicted pods and fails the ones it is told to.
    #[derive(Default)]
    pub struct MockEvictionClient {
        evicted: Mutex<Vec<String>>,
        failing: Mutex<HashSet<String>>,
    }

    impl MockEvictionClient {
        /// Create a client that evicts every pod successfully.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Make evictions of the pod with `key` (`namespace/name`) fail.
        pub fn fail_pod(&self, key: &str) {
            self.failing.lock().insert(key.to_string());
        }

        /// Keys of the evicted pods, in order.
        #[must_use]
        pub fn evicted(&self) -> Vec<String> {
            self.evicted.lock().clone()
        }
    }

    #[async_trait]
    impl EvictionClient for MockEvictionClient {
        async fn evict(&self, pod: &Pod, _options: &EvictOptions) -> Result<()> {
            let key = pod_key(pod);
            if self.failing.lock().contains(&key) {
                return Err(EvictionError::Rejected(format!(
                    "Cannot evict pod as it would violate the pod's disruption budget: {key}"
                )));
            }
            self.evicted.lock().push(key);
            Ok(())
        }
    }
}
