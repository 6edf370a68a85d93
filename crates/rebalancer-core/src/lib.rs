//! Shared domain helpers for the rebalancer.
//!
//! This crate works directly on the `k8s_openapi` [`Pod`] and [`Node`] types and
//! provides the small, pure helpers every other rebalancer crate needs:
//!
//! - **Pod accessors**: identity, owning node, priority and QoS tier
//! - **Label selectors**: validation and matching of `LabelSelector`s
//! - **Node helpers**: schedulability, node-selector fit and taint toleration
//!
//! # Example
//!
//! ```
//! use k8s_openapi::api::core::v1::Pod;
//! use rebalancer_core::{pod_key, qos_class, QosClass};
//!
//! let mut pod = Pod::default();
//! pod.metadata.name = Some("web-0".to_string());
//! pod.metadata.namespace = Some("default".to_string());
//!
//! assert_eq!(pod_key(&pod), "default/web-0");
//! assert_eq!(qos_class(&pod), QosClass::BestEffort);
//! ```
//!
//! [`Pod`]: k8s_openapi::api::core::v1::Pod
//! [`Node`]: k8s_openapi::api::core::v1::Node

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod node;
pub mod pod;
pub mod selector;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use error::{CoreError, Result};
pub use node::{
    create_node_map, is_node_schedulable, node_labels, node_name, pod_fits_node,
    pod_matches_node_selector, pod_tolerates_node_taints, NodeMap,
};
pub use pod::{
    is_pod_terminated, pod_key, pod_labels, pod_name, pod_namespace, pod_node_name, pod_priority,
    qos_class, PodsByNamespace, PodsByNode, QosClass,
};
