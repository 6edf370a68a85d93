//! The descheduling cycle runner.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rebalancer_evictions::{DefaultEvictorFilter, EvictionClient, PodEvictor};
use rebalancer_framework::{
    CycleContext, DescheduleReport, Handle, PodIndex, Registry, Termination,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::cluster::Cluster;
use crate::config::{AgentConfig, Policy};
use crate::Result;

/// Outcome of one descheduling cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleSummary {
    /// Nodes processed.
    pub nodes: usize,
    /// Report of every strategy that ran, in policy order.
    pub reports: Vec<(String, DescheduleReport)>,
    /// Pods evicted across all strategies.
    pub total_evicted: u32,
}

/// Runs the configured strategies against the cluster.
pub struct Descheduler<K> {
    cluster: K,
    eviction_client: Arc<dyn EvictionClient>,
    registry: Registry,
    policy: Policy,
    config: AgentConfig,
    ready: AtomicBool,
}

impl<K: Cluster> Descheduler<K> {
    /// Create a descheduler.
    ///
    /// Every configured strategy is built once up front so invalid arguments
    /// are reported before any cycle runs.
    ///
    /// # Errors
    ///
    /// Returns an error if the policy names an unknown strategy or a strategy
    /// rejects its arguments.
    pub fn new(
        cluster: K,
        eviction_client: Arc<dyn EvictionClient>,
        registry: Registry,
        policy: Policy,
        config: AgentConfig,
    ) -> Result<Self> {
        policy.validate(&registry)?;

        let descheduler = Self {
            cluster,
            eviction_client,
            registry,
            policy,
            config,
            ready: AtomicBool::new(false),
        };

        let handle = descheduler.cycle_handle(PodIndex::default(), Vec::new())?;
        for strategy in &descheduler.policy.strategies {
            descheduler
                .registry
                .build(&strategy.name, strategy.args.clone(), handle.clone())?;
        }

        Ok(descheduler)
    }

    /// Whether a cycle has completed since startup.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn cycle_handle(
        &self,
        pods: PodIndex,
        nodes: Vec<k8s_openapi::api::core::v1::Node>,
    ) -> Result<Handle> {
        let filter = DefaultEvictorFilter::new(self.config.evictor.clone(), nodes)?;
        let evictor = PodEvictor::new(
            Arc::clone(&self.eviction_client),
            Box::new(filter),
            self.config.limits,
        )
        .with_dry_run(self.config.dry_run);

        Ok(Handle::new(Arc::new(pods), Arc::new(evictor)))
    }

    /// Run every strategy once against a fresh cluster snapshot.
    ///
    /// Budgets start from zero on every cycle. A strategy that fails is
    /// logged and the next one runs; exhausting the total budget or
    /// cancellation ends the cycle early.
    ///
    /// # Errors
    ///
    /// Returns an error if the cluster cannot be listed.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> Result<CycleSummary> {
        let nodes = self.cluster.list_nodes().await?;
        let mut summary = CycleSummary {
            nodes: nodes.len(),
            ..Default::default()
        };

        if nodes.is_empty() {
            warn!("No ready nodes found, skipping cycle");
            return Ok(summary);
        }

        let pods = PodIndex::new(self.cluster.list_pods().await?);
        info!(nodes = nodes.len(), pods = pods.len(), "Starting descheduling cycle");

        let handle = self.cycle_handle(pods, nodes.clone())?;
        let ctx = CycleContext::new(cancel.clone());

        for strategy in &self.policy.strategies {
            let plugin = match self
                .registry
                .build(&strategy.name, strategy.args.clone(), handle.clone())
            {
                Ok(plugin) => plugin,
                Err(e) => {
                    error!(strategy = %strategy.name, error = %e, "Failed to build strategy");
                    continue;
                }
            };

            match plugin.deschedule(&ctx, &nodes).await {
                Ok(report) => {
                    summary.total_evicted += report.evicted;
                    summary.reports.push((strategy.name.clone(), report));

                    match report.termination {
                        Termination::Completed => {}
                        Termination::TotalLimitReached => {
                            info!(strategy = %strategy.name, "Total eviction limit reached, ending cycle");
                            break;
                        }
                        Termination::Cancelled => {
                            info!(strategy = %strategy.name, "Cycle cancelled");
                            break;
                        }
                    }
                }
                Err(e) => {
                    error!(strategy = %strategy.name, error = %e, "Strategy failed");
                }
            }
        }

        info!(
            nodes = summary.nodes,
            total_evicted = summary.total_evicted,
            dry_run = self.config.dry_run,
            "Descheduling cycle finished"
        );
        Ok(summary)
    }

    /// Run cycles until cancelled, or a single cycle when no interval is set.
    ///
    /// # Errors
    ///
    /// In single-cycle mode, returns the cycle's error. With an interval,
    /// failed cycles are logged and retried on the next tick.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        loop {
            match self.run_cycle(&cancel).await {
                Ok(_) => self.ready.store(true, Ordering::SeqCst),
                Err(e) if self.config.single_cycle() => return Err(e),
                Err(e) => error!(error = %e, retriable = e.is_retriable(), "Descheduling cycle failed"),
            }

            if self.config.single_cycle() || cancel.is_cancelled() {
                return Ok(());
            }

            tokio::select! {
                () = cancel.cancelled() => {
                    info!("Descheduler stopped");
                    return Ok(());
                }
                () = tokio::time::sleep(self.config.interval) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::mock::StaticCluster;
    use crate::config::StrategyConfig;
    use crate::AgentError;
    use k8s_openapi::api::core::v1::{Node, Pod};
    use rebalancer_core::testing::{
        build_test_node, build_test_pod, set_labels, set_normal_owner_ref, set_pod_affinity,
        TEST_TOPOLOGY_KEY,
    };
    use rebalancer_evictions::{EvictionLimits, MockEvictionClient};
    use rebalancer_framework::plugins::interpod_affinity::PLUGIN_NAME;
    use rebalancer_framework::{DeschedulePlugin, FrameworkError, RemovePodsViolatingInterPodAffinity};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn cluster() -> (Vec<Node>, Vec<Pod>) {
        let nodes = vec![
            build_test_node("n1", &[(TEST_TOPOLOGY_KEY, "north")]),
            build_test_node("n2", &[(TEST_TOPOLOGY_KEY, "south")]),
        ];

        let mut anchor = build_test_pod("anchor", "n1");
        set_normal_owner_ref(&mut anchor);
        set_labels(&mut anchor, &[("app", "db")]);

        let mut pods = vec![anchor];
        for name in ["web-1", "web-2"] {
            let mut pod = build_test_pod(name, "n2");
            set_normal_owner_ref(&mut pod);
            set_pod_affinity(&mut pod, "app", "db");
            pods.push(pod);
        }
        (nodes, pods)
    }

    fn descheduler(
        cluster: StaticCluster,
        client: &Arc<MockEvictionClient>,
        config: AgentConfig,
    ) -> Descheduler<StaticCluster> {
        Descheduler::new(
            cluster,
            client.clone(),
            Registry::default(),
            Policy::default(),
            config,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn cycle_evicts_violators() {
        let (nodes, pods) = cluster();
        let client = Arc::new(MockEvictionClient::new());
        let descheduler = descheduler(StaticCluster::new(nodes, pods), &client, AgentConfig::default());

        let summary = descheduler.run_cycle(&CancellationToken::new()).await.unwrap();

        assert_eq!(summary.nodes, 2);
        assert_eq!(summary.total_evicted, 2);
        assert_eq!(summary.reports.len(), 1);
        assert_eq!(client.evicted(), vec!["default/web-1", "default/web-2"]);
    }

    #[tokio::test]
    async fn budgets_reset_every_cycle() {
        let (nodes, pods) = cluster();
        let client = Arc::new(MockEvictionClient::new());
        let config = AgentConfig {
            limits: EvictionLimits {
                max_total: Some(1),
                ..Default::default()
            },
            ..Default::default()
        };
        let descheduler = descheduler(StaticCluster::new(nodes, pods), &client, config);

        for _ in 0..2 {
            let summary = descheduler.run_cycle(&CancellationToken::new()).await.unwrap();
            assert_eq!(summary.total_evicted, 1);
            assert_eq!(summary.reports[0].1.termination, Termination::TotalLimitReached);
        }
        assert_eq!(client.evicted().len(), 2);
    }

    #[tokio::test]
    async fn dry_run_never_calls_backend() {
        let (nodes, pods) = cluster();
        let client = Arc::new(MockEvictionClient::new());
        let config = AgentConfig {
            dry_run: true,
            ..Default::default()
        };
        let descheduler = descheduler(StaticCluster::new(nodes, pods), &client, config);

        let summary = descheduler.run_cycle(&CancellationToken::new()).await.unwrap();

        assert_eq!(summary.total_evicted, 2);
        assert!(client.evicted().is_empty());
    }

    #[tokio::test]
    async fn empty_cluster_skips_cycle() {
        let client = Arc::new(MockEvictionClient::new());
        let descheduler = descheduler(StaticCluster::default(), &client, AgentConfig::default());

        let summary = descheduler.run_cycle(&CancellationToken::new()).await.unwrap();
        assert_eq!(summary, CycleSummary::default());
    }

    #[tokio::test]
    async fn single_cycle_mode_runs_once() {
        let (nodes, pods) = cluster();
        let client = Arc::new(MockEvictionClient::new());
        let descheduler = descheduler(StaticCluster::new(nodes, pods), &client, AgentConfig::default());

        assert!(!descheduler.is_ready());
        descheduler.run(CancellationToken::new()).await.unwrap();

        assert!(descheduler.is_ready());
        assert_eq!(descheduler.cluster.node_lists(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn interval_mode_runs_until_cancelled() {
        let (nodes, pods) = cluster();
        let token = CancellationToken::new();
        let client = Arc::new(MockEvictionClient::new());
        let config = AgentConfig {
            interval: Duration::from_secs(60),
            ..Default::default()
        };
        let cluster = StaticCluster::new(nodes, pods).cancelling_after(3, token.clone());
        let descheduler = descheduler(cluster, &client, config);

        descheduler.run(token).await.unwrap();

        assert_eq!(descheduler.cluster.node_lists(), 3);
        // The third cycle starts cancelled and evicts nothing.
        assert_eq!(client.evicted().len(), 4);
    }

    /// Builds the affinity strategy once, then refuses.
    fn build_once(
        args: serde_json::Value,
        handle: Handle,
    ) -> rebalancer_framework::Result<Box<dyn DeschedulePlugin>> {
        static BUILDS: AtomicUsize = AtomicUsize::new(0);
        if BUILDS.fetch_add(1, Ordering::SeqCst) > 0 {
            return Err(FrameworkError::Config("strategy withdrawn".to_string()));
        }
        RemovePodsViolatingInterPodAffinity::factory(args, handle)
    }

    #[tokio::test]
    async fn strategy_build_failure_skips_to_next_strategy() {
        let (nodes, pods) = cluster();
        let client = Arc::new(MockEvictionClient::new());
        let mut registry = Registry::default();
        registry.register("BuildsOnce", build_once);
        let policy = Policy {
            strategies: vec![
                StrategyConfig {
                    name: "BuildsOnce".to_string(),
                    args: serde_json::Value::Null,
                },
                StrategyConfig {
                    name: PLUGIN_NAME.to_string(),
                    args: serde_json::Value::Null,
                },
            ],
        };
        let descheduler = Descheduler::new(
            StaticCluster::new(nodes, pods),
            client.clone(),
            registry,
            policy,
            AgentConfig::default(),
        )
        .unwrap();

        let summary = descheduler.run_cycle(&CancellationToken::new()).await.unwrap();

        assert_eq!(summary.reports.len(), 1);
        assert_eq!(summary.reports[0].0, PLUGIN_NAME);
        assert_eq!(summary.total_evicted, 2);
    }

    #[test]
    fn invalid_strategy_args_fail_at_startup() {
        let client: Arc<dyn EvictionClient> = Arc::new(MockEvictionClient::new());
        let policy = Policy {
            strategies: vec![StrategyConfig {
                name: PLUGIN_NAME.to_string(),
                args: serde_json::json!({ "namespaces": { "include": ["a"], "exclude": ["b"] } }),
            }],
        };

        let result = Descheduler::new(
            StaticCluster::default(),
            client,
            Registry::default(),
            policy,
            AgentConfig::default(),
        );
        assert!(matches!(result, Err(AgentError::Framework(_))));
    }
}
