//! Default eviction eligibility rules.
//!
//! The filter decides whether a pod may be evicted at all (`filter`) and
//! whether evicting it right now makes sense (`pre_eviction_filter`).

use chrono::{Duration, Utc};
use k8s_openapi::api::core::v1::{Node, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use rebalancer_core::{node_name, pod_fits_node, pod_key, pod_labels, pod_node_name, pod_priority, selector};
use serde::Deserialize;
use tracing::{debug, warn};

/// Priority from which a pod counts as system-critical.
pub const SYSTEM_CRITICAL_PRIORITY: i32 = 2_000_000_000;

/// Annotation that marks a pod as evictable regardless of the other rules.
pub const EVICT_ANNOTATION: &str = "descheduler.alpha.kubernetes.io/evict";

const MIRROR_POD_ANNOTATION: &str = "kubernetes.io/config.mirror";
const CONFIG_SOURCE_ANNOTATION: &str = "kubernetes.io/config.source";
const CRITICAL_PRIORITY_CLASSES: [&str; 2] = ["system-cluster-critical", "system-node-critical"];

/// Eligibility checks applied before a pod is evicted.
pub trait EvictorFilter: Send + Sync {
    /// Coarse eligibility.
    fn filter(&self, pod: &Pod) -> bool;

    /// Eligibility checked right before eviction.
    fn pre_eviction_filter(&self, pod: &Pod) -> bool;
}

/// Arguments of the default filter.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DefaultEvictorArgs {
    /// Allow evicting pods that use `emptyDir` or `hostPath` volumes.
    pub evict_local_storage_pods: bool,
    /// Allow evicting system-critical pods.
    pub evict_system_critical_pods: bool,
    /// Never evict pods that mount a persistent volume claim.
    pub ignore_pvc_pods: bool,
    /// Allow evicting failed pods that have no owner.
    pub evict_failed_bare_pods: bool,
    /// Only evict pods that fit some other node.
    pub node_fit: bool,
    /// Pods at or above this priority are never evicted.
    pub priority_threshold: Option<i32>,
    /// Pods younger than this are never evicted.
    pub min_pod_age_seconds: Option<u64>,
    /// Only pods matching this selector are evictable.
    pub label_selector: Option<LabelSelector>,
}

/// The default [`EvictorFilter`].
///
/// It holds the node list of the current cycle so the pre-eviction check can
/// look for an alternative placement.
#[derive(Debug, Clone)]
pub struct DefaultEvictorFilter {
    args: DefaultEvictorArgs,
    nodes: Vec<Node>,
}

impl DefaultEvictorFilter {
    /// Create a filter for one descheduling cycle.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured label selector is invalid.
    pub fn new(args: DefaultEvictorArgs, nodes: Vec<Node>) -> rebalancer_core::Result<Self> {
        if let Some(selector) = &args.label_selector {
            selector::validate(selector)?;
        }
        Ok(Self { args, nodes })
    }

    /// Collect every rule the pod breaks. Empty means evictable.
    fn failed_checks(&self, pod: &Pod) -> Vec<String> {
        let mut failed = Vec::new();

        if is_daemon_set_pod(pod) {
            failed.push("pod is related to daemonset".to_string());
        }
        if has_annotation(pod, MIRROR_POD_ANNOTATION) {
            failed.push("pod is a mirror pod".to_string());
        }
        if is_static_pod(pod) {
            failed.push("pod is a static pod".to_string());
        }
        if pod.metadata.deletion_timestamp.is_some() {
            failed.push("pod is terminating".to_string());
        }

        if pod.metadata.owner_references.as_ref().is_none_or(Vec::is_empty) {
            let failed_phase = pod
                .status
                .as_ref()
                .and_then(|s| s.phase.as_deref())
                .is_some_and(|p| p == "Failed");
            if !(self.args.evict_failed_bare_pods && failed_phase) {
                failed.push("pod does not have any ownerRefs".to_string());
            }
        }

        if !self.args.evict_system_critical_pods {
            if is_critical_pod(pod) {
                failed.push("pod has system critical priority".to_string());
            }
            if let Some(threshold) = self.args.priority_threshold {
                if pod_priority(pod).is_some_and(|p| p >= threshold) {
                    failed.push(format!(
                        "pod has higher priority than specified threshold {threshold}"
                    ));
                }
            }
        }

        if !self.args.evict_local_storage_pods && has_local_storage(pod) {
            failed.push("pod has local storage and descheduler is not configured with evictLocalStoragePods".to_string());
        }
        if self.args.ignore_pvc_pods && has_pvc(pod) {
            failed.push("pod has a PVC and descheduler is configured to ignore PVC pods".to_string());
        }

        if let Some(selector) = &self.args.label_selector {
            match selector::matches(selector, pod_labels(pod)) {
                Ok(true) => {}
                Ok(false) => failed.push("pod labels do not match the labelSelector filter".to_string()),
                Err(e) => {
                    warn!(pod = %pod_key(pod), error = %e, "Failed to evaluate label selector");
                    failed.push(e.to_string());
                }
            }
        }

        if let Some(min_age) = self.args.min_pod_age_seconds {
            if is_younger_than(pod, min_age) {
                failed.push(format!("pod is younger than {min_age}s"));
            }
        }

        failed
    }
}

impl EvictorFilter for DefaultEvictorFilter {
    fn filter(&self, pod: &Pod) -> bool {
        if has_annotation(pod, EVICT_ANNOTATION) {
            return true;
        }

        let failed = self.failed_checks(pod);
        if failed.is_empty() {
            true
        } else {
            debug!(pod = %pod_key(pod), checks = ?failed, "Pod fails the following checks");
            false
        }
    }

    fn pre_eviction_filter(&self, pod: &Pod) -> bool {
        if !self.args.node_fit {
            return true;
        }

        let current = pod_node_name(pod);
        let fits = self
            .nodes
            .iter()
            .filter(|n| Some(node_name(n)) != current)
            .any(|n| pod_fits_node(pod, n));

        if !fits {
            debug!(pod = %pod_key(pod), "Pod does not fit on any other node");
        }
        fits
    }
}

fn has_annotation(pod: &Pod, key: &str) -> bool {
    pod.metadata
        .annotations
        .as_ref()
        .is_some_and(|a| a.contains_key(key))
}

fn is_static_pod(pod: &Pod) -> bool {
    pod.metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(CONFIG_SOURCE_ANNOTATION))
        .is_some_and(|source| source != "api")
}

fn is_daemon_set_pod(pod: &Pod) -> bool {
    pod.metadata
        .owner_references
        .iter()
        .flatten()
        .any(|o| o.kind == "DaemonSet")
}

fn is_critical_pod(pod: &Pod) -> bool {
    let class_critical = pod
        .spec
        .as_ref()
        .and_then(|s| s.priority_class_name.as_deref())
        .is_some_and(|c| CRITICAL_PRIORITY_CLASSES.contains(&c));

    class_critical || pod_priority(pod).is_some_and(|p| p >= SYSTEM_CRITICAL_PRIORITY)
}

fn has_local_storage(pod: &Pod) -> bool {
    pod.spec
        .as_ref()
        .and_then(|s| s.volumes.as_ref())
        .into_iter()
        .flatten()
        .any(|v| v.empty_dir.is_some() || v.host_path.is_some())
}

fn has_pvc(pod: &Pod) -> bool {
    pod.spec
        .as_ref()
        .and_then(|s| s.volumes.as_ref())
        .into_iter()
        .flatten()
        .any(|v| v.persistent_volume_claim.is_some())
}

fn is_younger_than(pod: &Pod, seconds: u64) -> bool {
    let started = pod
        .status
        .as_ref()
        .and_then(|s| s.start_time.as_ref())
        .or(pod.metadata.creation_timestamp.as_ref())
        .map(|t| t.0);

    let Some(started) = started else {
        return false;
    };
    let min_age = Duration::seconds(i64::try_from(seconds).unwrap_or(i64::MAX));
    Utc::now().signed_duration_since(started) < min_age
}
