//! The budget-owning pod evictor.

use std::collections::HashMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use parking_lot::Mutex;
use serde::Deserialize;
use tracing::{error, info, warn};

use rebalancer_core::{pod_key, pod_namespace, pod_node_name};

use crate::client::EvictionClient;
use crate::filter::EvictorFilter;
use crate::gate::{EvictOptions, EvictOutcome, EvictionGate};

/// Eviction budgets for one descheduling cycle. `None` means unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EvictionLimits {
    /// Maximum evictions per node.
    pub max_per_node: Option<u32>,
    /// Maximum evictions per namespace.
    pub max_per_namespace: Option<u32>,
    /// Maximum evictions in total.
    pub max_total: Option<u32>,
}

#[derive(Debug, Default)]
struct EvictionCounters {
    per_node: HashMap<String, u32>,
    per_namespace: HashMap<String, u32>,
    total: u32,
}

/// Evicts pods through an [`EvictionClient`] while enforcing [`EvictionLimits`].
///
/// A new evictor is built for every cycle, so budgets never carry over. The
/// counters are guarded by a mutex and a slot is reserved before the backend is
/// called, so concurrent callers cannot overrun a budget.
pub struct PodEvictor<C> {
    client: C,
    filter: Box<dyn EvictorFilter>,
    limits: EvictionLimits,
    dry_run: bool,
    counters: Mutex<EvictionCounters>,
}

impl<C: EvictionClient> PodEvictor<C> {
    /// Create an evictor.
    pub fn new(client: C, filter: Box<dyn EvictorFilter>, limits: EvictionLimits) -> Self {
        Self {
            client,
            filter,
            limits,
            dry_run: false,
            counters: Mutex::new(EvictionCounters::default()),
        }
    }

    /// Count evictions without calling the backend.
    #[must_use]
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// The backend client.
    #[must_use]
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Number of pods evicted so far.
    #[must_use]
    pub fn total_evicted(&self) -> u32 {
        self.counters.lock().total
    }

    /// Number of pods evicted from a node so far.
    #[must_use]
    pub fn node_evicted(&self, node: &str) -> u32 {
        self.counters.lock().per_node.get(node).copied().unwrap_or(0)
    }

    /// Number of pods evicted from a namespace so far.
    #[must_use]
    pub fn namespace_evicted(&self, namespace: &str) -> u32 {
        self.counters
            .lock()
            .per_namespace
            .get(namespace)
            .copied()
            .unwrap_or(0)
    }

    /// Check every budget and reserve a slot in each on success.
    fn reserve(&self, node: Option<&str>, namespace: &str) -> Result<(), EvictOutcome> {
        let mut counters = self.counters.lock();

        if self.limits.max_total.is_some_and(|max| counters.total + 1 > max) {
            return Err(EvictOutcome::TotalLimitReached);
        }
        if let (Some(max), Some(node)) = (self.limits.max_per_node, node) {
            if counters.per_node.get(node).copied().unwrap_or(0) + 1 > max {
                return Err(EvictOutcome::NodeLimitReached);
            }
        }
        if let Some(max) = self.limits.max_per_namespace {
            if counters.per_namespace.get(namespace).copied().unwrap_or(0) + 1 > max {
                return Err(EvictOutcome::NamespaceLimitReached);
            }
        }

        counters.total += 1;
        if let Some(node) = node {
            *counters.per_node.entry(node.to_string()).or_default() += 1;
        }
        *counters.per_namespace.entry(namespace.to_string()).or_default() += 1;
        Ok(())
    }

    fn release(&self, node: Option<&str>, namespace: &str) {
        let mut counters = self.counters.lock();
        counters.total = counters.total.saturating_sub(1);
        if let Some(count) = node.and_then(|n| counters.per_node.get_mut(n)) {
            *count = count.saturating_sub(1);
        }
        if let Some(count) = counters.per_namespace.get_mut(namespace) {
            *count = count.saturating_sub(1);
        }
    }
}

#[async_trait]
impl<C: EvictionClient> EvictionGate for PodEvictor<C> {
    fn admits(&self, pod: &Pod) -> bool {
        self.filter.filter(pod)
    }

    fn admits_pre_eviction(&self, pod: &Pod) -> bool {
        self.filter.pre_eviction_filter(pod)
    }

    async fn evict(&self, pod: &Pod, options: &EvictOptions) -> EvictOutcome {
        let node = pod_node_name(pod);
        let namespace = pod_namespace(pod);
        let key = pod_key(pod);

        if let Err(outcome) = self.reserve(node, namespace) {
            warn!(
                pod = %key,
                node = ?node,
                namespace,
                outcome = ?outcome,
                "Eviction budget exhausted"
            );
            return outcome;
        }

        if self.dry_run {
            info!(
                pod = %key,
                node = ?node,
                strategy = %options.strategy_name,
                "Evicted pod in dry run mode"
            );
            return EvictOutcome::Evicted;
        }

        match self.client.evict(pod, options).await {
            Ok(()) => EvictOutcome::Evicted,
            Err(e) => {
                self.release(node, namespace);
                error!(pod = %key, error = %e, "Error evicting pod");
                EvictOutcome::Failed(e.to_string())
            }
        }
    }
}
