//! Agent configuration and descheduling policy.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use rebalancer_evictions::{DefaultEvictorArgs, EvictionLimits};
use rebalancer_framework::plugins::interpod_affinity::PLUGIN_NAME;
use rebalancer_framework::Registry;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{AgentError, Result};

/// Configuration for the descheduling agent.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    /// Address of the health and readiness server.
    pub listen_addr: SocketAddr,
    /// Time between descheduling cycles. Zero runs a single cycle.
    pub interval: Duration,
    /// Count evictions without performing them.
    pub dry_run: bool,
    /// Eviction budgets applied to every cycle.
    pub limits: EvictionLimits,
    /// Equality label selector (`k=v,k2=v2`) restricting the processed nodes.
    pub node_selector: Option<String>,
    /// Eligibility rules of the default evictor.
    pub evictor: DefaultEvictorArgs,
    /// Path of the JSON policy file.
    pub policy_file: Option<PathBuf>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            interval: Duration::ZERO,
            dry_run: false,
            limits: EvictionLimits::default(),
            node_selector: None,
            evictor: DefaultEvictorArgs::default(),
            policy_file: None,
        }
    }
}

impl AgentConfig {
    /// Load configuration from environment variables.
    ///
    /// Supported environment variables:
    /// - `LISTEN_ADDR`: Address of the health server
    /// - `DESCHEDULING_INTERVAL_SECS`: Seconds between cycles, 0 for a single cycle
    /// - `DRY_RUN`: Count evictions without performing them
    /// - `MAX_PODS_TO_EVICT_PER_NODE`: Per-node eviction budget
    /// - `MAX_PODS_TO_EVICT_PER_NAMESPACE`: Per-namespace eviction budget
    /// - `MAX_PODS_TO_EVICT_TOTAL`: Total eviction budget per cycle
    /// - `NODE_SELECTOR`: Label selector restricting the processed nodes
    /// - `EVICT_LOCAL_STORAGE_PODS`, `EVICT_SYSTEM_CRITICAL_PODS`, `IGNORE_PVC_PODS`,
    ///   `EVICT_FAILED_BARE_PODS`, `NODE_FIT`: Default evictor rules
    /// - `POLICY_FILE`: Path of the JSON policy file
    ///
    /// Unparseable values are logged and ignored.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = parse_var(&lookup, "LISTEN_ADDR") {
            config.listen_addr = addr;
        }
        if let Some(secs) = parse_var(&lookup, "DESCHEDULING_INTERVAL_SECS") {
            config.interval = Duration::from_secs(secs);
        }
        if let Some(dry_run) = parse_flag(&lookup, "DRY_RUN") {
            config.dry_run = dry_run;
        }

        config.limits.max_per_node = parse_var(&lookup, "MAX_PODS_TO_EVICT_PER_NODE");
        config.limits.max_per_namespace = parse_var(&lookup, "MAX_PODS_TO_EVICT_PER_NAMESPACE");
        config.limits.max_total = parse_var(&lookup, "MAX_PODS_TO_EVICT_TOTAL");

        config.node_selector = lookup("NODE_SELECTOR").filter(|s| !s.trim().is_empty());

        let evictor = &mut config.evictor;
        for (key, field) in [
            ("EVICT_LOCAL_STORAGE_PODS", &mut evictor.evict_local_storage_pods),
            ("EVICT_SYSTEM_CRITICAL_PODS", &mut evictor.evict_system_critical_pods),
            ("IGNORE_PVC_PODS", &mut evictor.ignore_pvc_pods),
            ("EVICT_FAILED_BARE_PODS", &mut evictor.evict_failed_bare_pods),
            ("NODE_FIT", &mut evictor.node_fit),
        ] {
            if let Some(value) = parse_flag(&lookup, key) {
                *field = value;
            }
        }

        config.policy_file = lookup("POLICY_FILE")
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);

        config
    }

    /// Whether the agent runs one cycle and exits.
    #[must_use]
    pub fn single_cycle(&self) -> bool {
        self.interval.is_zero()
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "Ignoring unparseable environment variable");
            None
        }
    }
}

fn parse_flag(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<bool> {
    let raw = lookup(key)?;
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => {
            warn!(key, value = %raw, "Ignoring unparseable boolean environment variable");
            None
        }
    }
}

/// One configured strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Registered strategy name.
    pub name: String,
    /// Strategy arguments, passed to the strategy's factory.
    #[serde(default)]
    pub args: serde_json::Value,
}

/// The strategies run every cycle, in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    /// Configured strategies.
    pub strategies: Vec<StrategyConfig>,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            strategies: vec![StrategyConfig {
                name: PLUGIN_NAME.to_string(),
                args: serde_json::Value::Null,
            }],
        }
    }
}

impl Policy {
    /// Load the policy from `path`, or the default policy when no path is set.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let raw = std::fs::read_to_string(path).map_err(|source| AgentError::PolicyIo {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Check that every configured strategy is registered.
    ///
    /// # Errors
    ///
    /// Returns `AgentError::Config` naming the first unknown strategy.
    pub fn validate(&self, registry: &Registry) -> Result<()> {
        if self.strategies.is_empty() {
            return Err(AgentError::Config("policy has no strategies".to_string()));
        }
        if let Some(unknown) = self.strategies.iter().find(|s| !registry.contains(&s.name)) {
            return Err(AgentError::Config(format!(
                "unknown strategy {:?}, registered strategies: {}",
                unknown.name,
                registry.names().collect::<Vec<_>>().join(", ")
            )));
        }
        Ok(())
    }
}
