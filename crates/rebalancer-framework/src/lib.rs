//! Descheduling strategy framework for the rebalancer.
//!
//! A strategy implements [`DeschedulePlugin`] and is built from its policy
//! arguments through the [`Registry`]. Every strategy of a cycle shares one
//! [`Handle`], which supplies the pods of each node and the [`EvictionGate`]
//! that owns the eviction budgets.
//!
//! The built-in [`RemovePodsViolatingInterPodAffinity`] strategy:
//!
//! 1. Lists and filters the pods of every node ([`list_pods_on_nodes`])
//! 2. Groups them by namespace and by node ([`group_by_namespace`], [`group_by_node`])
//! 3. Visits each node's pods lowest priority first ([`sort_pods_by_priority_low_to_high`])
//! 4. Evicts the pods an [`AffinityOracle`] flags, until a budget runs out
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use rebalancer_framework::{CycleContext, Handle, PodIndex, Registry};
//! # use rebalancer_evictions::EvictionGate;
//!
//! # async fn example(
//! #     pods: Vec<k8s_openapi::api::core::v1::Pod>,
//! #     nodes: Vec<k8s_openapi::api::core::v1::Node>,
//! #     gate: Arc<dyn EvictionGate>,
//! # ) -> Result<(), Box<dyn std::error::Error>> {
//! let handle = Handle::new(Arc::new(PodIndex::new(pods)), gate);
//! let plugin = Registry::default().build(
//!     "RemovePodsViolatingInterPodAffinity",
//!     serde_json::Value::Null,
//!     handle,
//! )?;
//!
//! let report = plugin.deschedule(&CycleContext::default(), &nodes).await?;
//! println!("evicted {} pods", report.evicted);
//! # Ok(())
//! # }
//! ```
//!
//! [`EvictionGate`]: rebalancer_evictions::EvictionGate

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod plugin;
pub mod plugins;
pub mod podutil;
pub mod registry;

pub use error::{FrameworkError, Result};
pub use plugin::{
    CycleContext, DeschedulePlugin, DescheduleReport, Handle, PodIndex, PodSource, Termination,
};
pub use plugins::interpod_affinity::{
    evict_pods_violating_affinity, AffinityOracle, InterPodAffinityChecker,
    RemovePodsViolatingInterPodAffinity, RemovePodsViolatingInterPodAffinityArgs,
};
pub use podutil::{
    group_by_namespace, group_by_node, list_pods_on_nodes, sort_pods_by_priority_low_to_high,
    Namespaces, PodFilter, PodFilterOptions,
};
pub use registry::{PluginFactory, Registry};
