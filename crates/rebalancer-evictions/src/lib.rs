//! Budgeted pod eviction for the rebalancer.
//!
//! This crate provides the [`EvictionGate`] consulted by descheduling
//! strategies and its production implementation, [`PodEvictor`]:
//!
//! - Admission checks through an [`EvictorFilter`] ([`DefaultEvictorFilter`])
//! - Per-node, per-namespace and total eviction budgets ([`EvictionLimits`])
//! - Evictions carried out by an [`EvictionClient`] ([`KubeEvictionClient`])
//! - Dry-run mode
//!
//! Budget exhaustion is reported as an [`EvictOutcome`] variant, never as an
//! error, so callers can switch on it exhaustively.
//!
//! # Example
//!
//! ```no_run
//! use rebalancer_evictions::{
//!     DefaultEvictorArgs, DefaultEvictorFilter, EvictOptions, EvictionGate, EvictionLimits,
//!     KubeEvictionClient, PodEvictor,
//! };
//!
//! # async fn example(pod: k8s_openapi::api::core::v1::Pod) -> Result<(), Box<dyn std::error::Error>> {
//! let client = KubeEvictionClient::new(kube::Client::try_default().await?);
//! let filter = DefaultEvictorFilter::new(DefaultEvictorArgs::default(), Vec::new())?;
//! let limits = EvictionLimits { max_total: Some(10), ..Default::default() };
//! let evictor = PodEvictor::new(client, Box::new(filter), limits);
//!
//! if evictor.admits(&pod) && evictor.admits_pre_eviction(&pod) {
//!     let outcome = evictor.evict(&pod, &EvictOptions::for_strategy("example")).await;
//!     println!("outcome: {outcome:?}");
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod client;
pub mod error;
pub mod evictor;
pub mod filter;
pub mod gate;

pub use client::{EvictionClient, KubeEvictionClient};
pub use error::{EvictionError, Result};
pub use evictor::{EvictionLimits, PodEvictor};
pub use filter::{DefaultEvictorArgs, DefaultEvictorFilter, EvictorFilter};
pub use gate::{EvictOptions, EvictOutcome, EvictionGate};

#[cfg(any(test, feature = "test-utils"))]
pub use client::mock::MockEvictionClient;
#[cfg(any(test, feature = "test-utils"))]
pub use gate::mock::ScriptedGate;
