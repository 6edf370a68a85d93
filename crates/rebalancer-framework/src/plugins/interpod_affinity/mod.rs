//! Evicts pods whose placement violates required inter-pod affinity or
//! anti-affinity rules.

mod args;
mod oracle;

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use rebalancer_core::{create_node_map, node_name, pod_key, pod_namespace, NodeMap, PodsByNamespace, PodsByNode};
use rebalancer_evictions::{EvictOptions, EvictOutcome, EvictionGate};
use tracing::{debug, error, info};

pub use args::RemovePodsViolatingInterPodAffinityArgs;
pub use oracle::{AffinityOracle, InterPodAffinityChecker};

use crate::plugin::{CycleContext, DeschedulePlugin, DescheduleReport, Handle, Termination};
use crate::podutil::{
    group_by_namespace, group_by_node, list_pods_on_nodes, sort_pods_by_priority_low_to_high,
    PodFilter, PodFilterOptions,
};
use crate::Result;

/// Registry name of the strategy.
pub const PLUGIN_NAME: &str = "RemovePodsViolatingInterPodAffinity";

/// Evicts pods that violate inter-pod affinity, lowest priority first.
pub struct RemovePodsViolatingInterPodAffinity {
    handle: Handle,
    args: RemovePodsViolatingInterPodAffinityArgs,
    pod_filter: PodFilter,
    oracle: Arc<dyn AffinityOracle>,
}

impl std::fmt::Debug for RemovePodsViolatingInterPodAffinity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemovePodsViolatingInterPodAffinity")
            .field("args", &self.args)
            .finish_non_exhaustive()
    }
}

impl RemovePodsViolatingInterPodAffinity {
    /// Create the strategy.
    ///
    /// # Errors
    ///
    /// Returns `FrameworkError::Config` if the arguments are invalid.
    pub fn new(args: RemovePodsViolatingInterPodAffinityArgs, handle: Handle) -> Result<Self> {
        args.validate()?;

        let mut options = PodFilterOptions::new().with_label_selector(args.label_selector.clone());
        if let Some(ns) = &args.namespaces {
            options = options
                .with_namespaces(ns.include.iter().cloned())
                .without_namespaces(ns.exclude.iter().cloned());
        }
        let pod_filter = options.build()?;

        Ok(Self {
            handle,
            args,
            pod_filter,
            oracle: Arc::new(InterPodAffinityChecker),
        })
    }

    /// Replace the affinity oracle.
    #[must_use]
    pub fn with_oracle(mut self, oracle: Arc<dyn AffinityOracle>) -> Self {
        self.oracle = oracle;
        self
    }

    /// Registry factory.
    ///
    /// # Errors
    ///
    /// Returns an error if the arguments cannot be decoded or are invalid.
    pub fn factory(args: serde_json::Value, handle: Handle) -> Result<Box<dyn DeschedulePlugin>> {
        let args = RemovePodsViolatingInterPodAffinityArgs::from_value(args)?;
        Ok(Box::new(Self::new(args, handle)?))
    }
}

#[async_trait]
impl DeschedulePlugin for RemovePodsViolatingInterPodAffinity {
    fn name(&self) -> &'static str {
        PLUGIN_NAME
    }

    async fn deschedule(&self, ctx: &CycleContext, nodes: &[Node]) -> Result<DescheduleReport> {
        let pods = list_pods_on_nodes(nodes, self.handle.pods(), &self.pod_filter).await?;

        let pods_by_namespace = group_by_namespace(&pods);
        let pods_by_node = group_by_node(&pods);
        let node_map = create_node_map(nodes);

        let report = evict_pods_violating_affinity(
            ctx,
            nodes,
            &pods_by_namespace,
            &pods_by_node,
            &node_map,
            self.oracle.as_ref(),
            self.handle.evictor(),
        )
        .await;

        info!(
            strategy = PLUGIN_NAME,
            attempted = report.attempted,
            evicted = report.evicted,
            termination = ?report.termination,
            "Strategy finished"
        );
        Ok(report)
    }
}

/// Walk the nodes in order and evict affinity-violating pods through the gate.
///
/// Pods on a node are visited lowest priority first. A node budget outcome
/// moves on to the next node, a namespace budget outcome skips the rest of
/// that namespace, and a total budget outcome or cancellation ends the run.
pub async fn evict_pods_violating_affinity(
    ctx: &CycleContext,
    nodes: &[Node],
    pods_by_namespace: &PodsByNamespace<'_>,
    pods_by_node: &PodsByNode<'_>,
    node_map: &NodeMap<'_>,
    oracle: &dyn AffinityOracle,
    gate: &dyn EvictionGate,
) -> DescheduleReport {
    let mut report = DescheduleReport::default();
    let mut exhausted_namespaces: HashSet<&str> = HashSet::new();
    let options = EvictOptions::for_strategy(PLUGIN_NAME).with_reason("inter-pod affinity violation");

    'nodes: for node in nodes {
        let name = node_name(node);
        info!(node = %name, "Processing node");

        let Some(pods) = pods_by_node.get(name).filter(|p| !p.is_empty()) else {
            continue;
        };

        for pod in sort_pods_by_priority_low_to_high(pods) {
            if ctx.is_cancelled() {
                info!(node = %name, "Descheduling cancelled");
                report.termination = Termination::Cancelled;
                return report;
            }

            let namespace = pod_namespace(pod);
            if exhausted_namespaces.contains(namespace) {
                continue;
            }

            if !oracle.violates(pod, pods_by_namespace, node_map) {
                continue;
            }

            if !(gate.admits(pod) && gate.admits_pre_eviction(pod)) {
                debug!(pod = %pod_key(pod), "Pod is not evictable");
                continue;
            }

            report.attempted += 1;
            match gate.evict(pod, &options).await {
                EvictOutcome::Evicted => report.evicted += 1,
                EvictOutcome::Failed(reason) => {
                    error!(pod = %pod_key(pod), error = %reason, "Error evicting pod");
                }
                EvictOutcome::NodeLimitReached => continue 'nodes,
                EvictOutcome::NamespaceLimitReached => {
                    exhausted_namespaces.insert(namespace);
                }
                EvictOutcome::TotalLimitReached => {
                    report.termination = Termination::TotalLimitReached;
                    return report;
                }
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::PodIndex;
    use crate::FrameworkError;
    use k8s_openapi::api::core::v1::Pod;
    use rebalancer_core::testing::{
        build_test_node, build_test_pod, set_normal_owner_ref, set_pod_priority, TEST_TOPOLOGY_KEY,
    };
    use rebalancer_evictions::ScriptedGate;

    /// Flags every pod whose name starts with "bad".
    struct NamePrefixOracle;

    impl AffinityOracle for NamePrefixOracle {
        fn violates(&self, pod: &Pod, _: &PodsByNamespace<'_>, _: &NodeMap<'_>) -> bool {
            pod.metadata.name.as_deref().is_some_and(|n| n.starts_with("bad"))
        }
    }

    fn pod(name: &str, node: &str, namespace: &str, priority: i32) -> Pod {
        let mut pod = build_test_pod(name, node);
        pod.metadata.namespace = Some(namespace.to_string());
        set_normal_owner_ref(&mut pod);
        set_pod_priority(&mut pod, priority);
        pod
    }

    async fn run(nodes: &[Node], pods: &[Pod], gate: &ScriptedGate) -> DescheduleReport {
        run_with(&CycleContext::default(), nodes, pods, gate).await
    }

    async fn run_with(
        ctx: &CycleContext,
        nodes: &[Node],
        pods: &[Pod],
        gate: &ScriptedGate,
    ) -> DescheduleReport {
        let by_namespace = group_by_namespace(pods);
        let by_node = group_by_node(pods);
        let node_map = create_node_map(nodes);
        evict_pods_violating_affinity(ctx, nodes, &by_namespace, &by_node, &node_map, &NamePrefixOracle, gate)
            .await
    }

    fn nodes(names: &[&str]) -> Vec<Node> {
        names
            .iter()
            .map(|n| build_test_node(n, &[(TEST_TOPOLOGY_KEY, "north")]))
            .collect()
    }

    #[tokio::test]
    async fn visits_violators_lowest_priority_first() {
        let pods = vec![
            pod("bad-high", "n1", "default", 100),
            pod("good", "n1", "default", 0),
            pod("bad-low", "n1", "default", 1),
        ];
        let gate = ScriptedGate::new();

        let report = run(&nodes(&["n1"]), &pods, &gate).await;

        assert_eq!(gate.evict_calls(), vec!["default/bad-low", "default/bad-high"]);
        assert_eq!(report.attempted, 2);
        assert_eq!(report.evicted, 2);
        assert_eq!(report.termination, Termination::Completed);
        assert!(gate.evict_options().iter().all(|o| o.strategy_name == PLUGIN_NAME));
    }

    #[tokio::test]
    async fn skips_pods_the_gate_refuses() {
        let pods = vec![
            pod("bad-a", "n1", "default", 0),
            pod("bad-b", "n1", "default", 1),
            pod("bad-c", "n1", "default", 2),
        ];
        let gate = ScriptedGate::new()
            .rejecting("default/bad-a")
            .rejecting_pre_eviction("default/bad-b");

        let report = run(&nodes(&["n1"]), &pods, &gate).await;

        assert_eq!(gate.evict_calls(), vec!["default/bad-c"]);
        assert_eq!(report.attempted, 1);
    }

    #[tokio::test]
    async fn failed_eviction_keeps_scanning_node() {
        let pods = vec![pod("bad-a", "n1", "default", 0), pod("bad-b", "n1", "default", 1)];
        let gate = ScriptedGate::new().with_outcome("default/bad-a", EvictOutcome::Failed("conflict".into()));

        let report = run(&nodes(&["n1"]), &pods, &gate).await;

        assert_eq!(gate.evict_calls(), vec!["default/bad-a", "default/bad-b"]);
        assert_eq!(report.attempted, 2);
        assert_eq!(report.evicted, 1);
    }

    #[tokio::test]
    async fn node_limit_moves_to_next_node() {
        let pods = vec![
            pod("bad-a", "n1", "default", 0),
            pod("bad-b", "n1", "default", 1),
            pod("bad-c", "n2", "default", 0),
        ];
        let gate = ScriptedGate::new().with_outcome("default/bad-a", EvictOutcome::NodeLimitReached);

        let report = run(&nodes(&["n1", "n2"]), &pods, &gate).await;

        assert_eq!(gate.evict_calls(), vec!["default/bad-a", "default/bad-c"]);
        assert_eq!(report.evicted, 1);
        assert_eq!(report.termination, Termination::Completed);
    }

    #[tokio::test]
    async fn namespace_limit_skips_namespace() {
        let pods = vec![
            pod("bad-a", "n1", "team-a", 0),
            pod("bad-b", "n1", "team-b", 1),
            pod("bad-c", "n1", "team-a", 2),
            pod("bad-d", "n2", "team-a", 0),
            pod("bad-e", "n2", "team-b", 1),
        ];
        let gate = ScriptedGate::new().with_outcome("team-a/bad-a", EvictOutcome::NamespaceLimitReached);

        let report = run(&nodes(&["n1", "n2"]), &pods, &gate).await;

        assert_eq!(
            gate.evict_calls(),
            vec!["team-a/bad-a", "team-b/bad-b", "team-b/bad-e"]
        );
        assert_eq!(report.evicted, 2);
    }

    #[tokio::test]
    async fn total_limit_stops_run() {
        let pods = vec![
            pod("bad-a", "n1", "default", 0),
            pod("bad-b", "n1", "default", 1),
            pod("bad-c", "n2", "default", 0),
        ];
        let gate = ScriptedGate::new().with_outcome("default/bad-a", EvictOutcome::TotalLimitReached);

        let report = run(&nodes(&["n1", "n2"]), &pods, &gate).await;

        assert_eq!(gate.evict_calls(), vec!["default/bad-a"]);
        assert_eq!(report.attempted, 1);
        assert_eq!(report.evicted, 0);
        assert_eq!(report.termination, Termination::TotalLimitReached);
    }

    #[tokio::test]
    async fn nodes_without_pods_are_skipped() {
        let pods = vec![pod("bad-a", "n3", "default", 0)];
        let gate = ScriptedGate::new();

        let report = run(&nodes(&["n1", "n2", "n3"]), &pods, &gate).await;

        assert_eq!(gate.evict_calls(), vec!["default/bad-a"]);
        assert_eq!(report.evicted, 1);
    }

    #[tokio::test]
    async fn cancelled_context_stops_before_first_pod() {
        let ctx = CycleContext::default();
        ctx.cancellation_token().cancel();
        let pods = vec![pod("bad-a", "n1", "default", 0)];
        let gate = ScriptedGate::new();

        let report = run_with(&ctx, &nodes(&["n1"]), &pods, &gate).await;

        assert!(gate.evict_calls().is_empty());
        assert_eq!(report.termination, Termination::Cancelled);
    }

    #[tokio::test]
    async fn deschedule_applies_namespace_filter() {
        let pods = vec![pod("bad-a", "n1", "keep", 0), pod("bad-b", "n1", "skip", 0)];
        let gate = Arc::new(ScriptedGate::new());
        let handle = Handle::new(Arc::new(PodIndex::new(pods)), gate.clone());
        let args: RemovePodsViolatingInterPodAffinityArgs =
            serde_json::from_value(serde_json::json!({ "namespaces": { "exclude": ["skip"] } })).unwrap();

        let plugin = RemovePodsViolatingInterPodAffinity::new(args, handle)
            .unwrap()
            .with_oracle(Arc::new(NamePrefixOracle));
        let report = plugin
            .deschedule(&CycleContext::default(), &nodes(&["n1"]))
            .await
            .unwrap();

        assert_eq!(gate.evict_calls(), vec!["keep/bad-a"]);
        assert_eq!(report.evicted, 1);
    }

    #[test]
    fn factory_rejects_bad_args() {
        let handle = Handle::new(Arc::new(PodIndex::default()), Arc::new(ScriptedGate::new()));

        let err = RemovePodsViolatingInterPodAffinity::factory(
            serde_json::json!({ "namespaces": { "include": ["a"], "exclude": ["b"] } }),
            handle.clone(),
        )
        .unwrap_err();
        assert!(matches!(err, FrameworkError::Config(_)));

        let err = RemovePodsViolatingInterPodAffinity::factory(serde_json::json!([1, 2]), handle.clone())
            .unwrap_err();
        assert!(matches!(err, FrameworkError::InvalidArgs(_)));

        let plugin = RemovePodsViolatingInterPodAffinity::factory(serde_json::Value::Null, handle).unwrap();
        assert_eq!(plugin.name(), PLUGIN_NAME);
    }
}
