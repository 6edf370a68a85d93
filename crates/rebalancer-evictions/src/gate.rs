//! The eviction gate consulted by descheduling strategies.
//!
//! A strategy never talks to the cluster directly: it asks the gate whether a
//! pod may be evicted and then asks it to evict. The gate owns every eviction
//! budget and reports exhaustion through [`EvictOutcome`].

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;

/// Result of a single eviction attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvictOutcome {
    /// The pod was evicted (or would have been, in dry-run mode).
    Evicted,
    /// The pod's node may not evict any more pods this cycle.
    NodeLimitReached,
    /// The pod's namespace may not evict any more pods this cycle.
    NamespaceLimitReached,
    /// No more pods may be evicted anywhere this cycle.
    TotalLimitReached,
    /// The eviction failed for a reason unrelated to budgets.
    Failed(String),
}

/// Metadata attached to an eviction request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictOptions {
    /// Name of the strategy requesting the eviction.
    pub strategy_name: String,
    /// Free-form reason, recorded in logs.
    pub reason: Option<String>,
}

impl EvictOptions {
    /// Options for an eviction requested by the named strategy.
    #[must_use]
    pub fn for_strategy(strategy_name: impl Into<String>) -> Self {
        Self {
            strategy_name: strategy_name.into(),
            reason: None,
        }
    }

    /// Attach a reason to the eviction.
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Admission checks plus the evict action.
#[async_trait]
pub trait EvictionGate: Send + Sync {
    /// Coarse eligibility: ownership, criticality, storage and similar rules.
    fn admits(&self, pod: &Pod) -> bool;

    /// Fine eligibility checked right before eviction, e.g. whether the pod
    /// fits another node.
    fn admits_pre_eviction(&self, pod: &Pod) -> bool;

    /// Evict the pod, charging it against the eviction budgets.
    async fn evict(&self, pod: &Pod, options: &EvictOptions) -> EvictOutcome;
}

/// A scripted gate for exercising strategies without a cluster.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use super::*;
    use parking_lot::Mutex;
    use rebalancer_core::pod_key;
    use std::collections::{HashMap, HashSet};

    /// A gate that admits every pod and evicts successfully unless told
    /// otherwise. Every `evict` call is recorded by pod key.
    #[derive(Default)]
    pub struct ScriptedGate {
        outcomes: HashMap<String, EvictOutcome>,
        rejected: HashSet<String>,
        rejected_pre_eviction: HashSet<String>,
        calls: Mutex<Vec<(String, EvictOptions)>>,
    }

    impl ScriptedGate {
        /// Create a gate that admits and evicts everything.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Return `outcome` when the pod with `key` (`namespace/name`) is evicted.
        #[must_use]
        pub fn with_outcome(mut self, key: &str, outcome: EvictOutcome) -> Self {
            self.outcomes.insert(key.to_string(), outcome);
            self
        }

        /// Fail the coarse admission check for the pod with `key`.
        #[must_use]
        pub fn rejecting(mut self, key: &str) -> Self {
            self.rejected.insert(key.to_string());
            self
        }

        /// Fail the pre-eviction check for the pod with `key`.
        #[must_use]
        pub fn rejecting_pre_eviction(mut self, key: &str) -> Self {
            self.rejected_pre_eviction.insert(key.to_string());
            self
        }

        /// Keys of the pods passed to `evict`, in call order.
        #[must_use]
        pub fn evict_calls(&self) -> Vec<String> {
            self.calls.lock().iter().map(|(k, _)| k.clone()).collect()
        }

        /// Options passed to `evict`, in call order.
        #[must_use]
        pub fn evict_options(&self) -> Vec<EvictOptions> {
            self.calls.lock().iter().map(|(_, o)| o.clone()).collect()
        }
    }

    #[async_trait]
    impl EvictionGate for ScriptedGate {
        fn admits(&self, pod: &Pod) -> bool {
            !self.rejected.contains(&pod_key(pod))
        }

        fn admits_pre_eviction(&self, pod: &Pod) -> bool {
            !self.rejected_pre_eviction.contains(&pod_key(pod))
        }

        async fn evict(&self, pod: &Pod, options: &EvictOptions) -> EvictOutcome {
            let key = pod_key(pod);
            self.calls.lock().push((key.clone(), options.clone()));
            self.outcomes
                .get(&key)
                .cloned()
                .unwrap_or(EvictOutcome::Evicted)
        }
    }
}
