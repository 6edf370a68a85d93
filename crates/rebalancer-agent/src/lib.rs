//! Descheduling agent for the rebalancer.
//!
//! The agent periodically takes a snapshot of the cluster and runs the
//! configured descheduling strategies against it:
//!
//! 1. List the ready nodes (optionally restricted by a node selector)
//! 2. List every pod once and index it by node
//! 3. Build a fresh [`PodEvictor`] so eviction budgets start from zero
//! 4. Run each strategy of the [`Policy`] in order
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use rebalancer_agent::{AgentConfig, Descheduler, KubeCluster, Policy};
//! use rebalancer_evictions::KubeEvictionClient;
//! use rebalancer_framework::Registry;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AgentConfig::from_env();
//! let client = kube::Client::try_default().await?;
//!
//! let descheduler = Descheduler::new(
//!     KubeCluster::new(client.clone(), config.node_selector.clone())?,
//!     Arc::new(KubeEvictionClient::new(client)),
//!     Registry::default(),
//!     Policy::load(config.policy_file.as_deref())?,
//!     config,
//! )?;
//!
//! descheduler.run(CancellationToken::new()).await?;
//! # Ok(())
//! # }
//! ```
//!
//! [`PodEvictor`]: rebalancer_evictions::PodEvictor

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod cluster;
pub mod config;
pub mod descheduler;
pub mod error;

pub use cluster::{is_node_ready, Cluster, KubeCluster};
pub use config::{AgentConfig, Policy, StrategyConfig};
pub use descheduler::{CycleSummary, Descheduler};
pub use error::{AgentError, Result};
