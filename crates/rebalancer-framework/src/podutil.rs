//! Pod listing, filtering, grouping and ordering.

use std::collections::{BTreeSet, HashMap};

use k8s_openapi::api::core::v1::{Node, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use rebalancer_core::{
    is_pod_terminated, node_name, pod_key, pod_labels, pod_namespace, pod_node_name, pod_priority,
    qos_class, selector, PodsByNamespace, PodsByNode,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::plugin::PodSource;
use crate::{FrameworkError, Result};

/// Namespace inclusion or exclusion lists. At most one may be non-empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Namespaces {
    /// Only pods in these namespaces are considered.
    pub include: Vec<String>,
    /// Pods in these namespaces are never considered.
    pub exclude: Vec<String>,
}

/// Builder for a [`PodFilter`].
#[derive(Debug, Clone, Default)]
pub struct PodFilterOptions {
    include: BTreeSet<String>,
    exclude: BTreeSet<String>,
    label_selector: Option<LabelSelector>,
}

impl PodFilterOptions {
    /// Start with a filter that accepts every pod.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to the given namespaces.
    #[must_use]
    pub fn with_namespaces<I, S>(mut self, namespaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include.extend(namespaces.into_iter().map(Into::into));
        self
    }

    /// Skip the given namespaces.
    #[must_use]
    pub fn without_namespaces<I, S>(mut self, namespaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude.extend(namespaces.into_iter().map(Into::into));
        self
    }

    /// Restrict to pods matching the selector.
    #[must_use]
    pub fn with_label_selector(mut self, selector: Option<LabelSelector>) -> Self {
        self.label_selector = selector;
        self
    }

    /// Build the filter.
    ///
    /// # Errors
    ///
    /// Returns `FrameworkError::Config` if both inclusion and exclusion
    /// namespaces are set or the label selector is invalid.
    pub fn build(self) -> Result<PodFilter> {
        if !self.include.is_empty() && !self.exclude.is_empty() {
            return Err(FrameworkError::Config(
                "only one of include or exclude namespaces can be set".to_string(),
            ));
        }

        let label_selector = match self.label_selector {
            Some(s) if selector::is_empty(&s) => None,
            Some(s) => {
                selector::validate(&s)
                    .map_err(|e| FrameworkError::Config(format!("invalid pod filter: {e}")))?;
                Some(s)
            }
            None => None,
        };

        Ok(PodFilter {
            include: self.include,
            exclude: self.exclude,
            label_selector,
        })
    }
}

/// Decides which pods a strategy considers.
#[derive(Debug, Clone, Default)]
pub struct PodFilter {
    include: BTreeSet<String>,
    exclude: BTreeSet<String>,
    label_selector: Option<LabelSelector>,
}

impl PodFilter {
    /// Whether the pod passes the namespace and label criteria.
    #[must_use]
    pub fn matches(&self, pod: &Pod) -> bool {
        let namespace = pod_namespace(pod);
        if !self.include.is_empty() && !self.include.contains(namespace) {
            return false;
        }
        if self.exclude.contains(namespace) {
            return false;
        }

        match &self.label_selector {
            None => true,
            Some(s) => selector::matches(s, pod_labels(pod)).unwrap_or_else(|e| {
                warn!(pod = %pod_key(pod), error = %e, "Label selector evaluation failed");
                false
            }),
        }
    }
}

/// List the pods on every node that pass the filter.
///
/// Pods that have already succeeded or failed are skipped.
///
/// # Errors
///
/// Returns `FrameworkError::ListPods` on the first node that cannot be listed.
pub async fn list_pods_on_nodes(
    nodes: &[Node],
    source: &dyn PodSource,
    filter: &PodFilter,
) -> Result<Vec<Pod>> {
    let mut pods = Vec::new();

    for node in nodes {
        let name = node_name(node);
        let on_node = source.pods_on_node(name).await.map_err(|e| match e {
            e @ FrameworkError::ListPods { .. } => e,
            other => FrameworkError::ListPods {
                node: name.to_string(),
                reason: other.to_string(),
            },
        })?;

        let before = on_node.len();
        pods.extend(
            on_node
                .into_iter()
                .filter(|p| !is_pod_terminated(p) && filter.matches(p)),
        );
        debug!(node = %name, listed = before, "Listed pods on node");
    }

    Ok(pods)
}

/// Group pods by namespace.
#[must_use]
pub fn group_by_namespace(pods: &[Pod]) -> PodsByNamespace<'_> {
    let mut grouped: PodsByNamespace<'_> = HashMap::new();
    for pod in pods {
        grouped
            .entry(pod_namespace(pod).to_string())
            .or_default()
            .push(pod);
    }
    grouped
}

/// Group pods by assigned node name. Unassigned pods share the empty name.
#[must_use]
pub fn group_by_node(pods: &[Pod]) -> PodsByNode<'_> {
    let mut grouped: PodsByNode<'_> = HashMap::new();
    for pod in pods {
        grouped
            .entry(pod_node_name(pod).unwrap_or_default().to_string())
            .or_default()
            .push(pod);
    }
    grouped
}

/// Order pods from most to least evictable.
///
/// Pods without a priority come first, then ascending priority; equal
/// priorities are ordered by QoS tier. The sort is stable.
#[must_use]
pub fn sort_pods_by_priority_low_to_high<'a>(pods: &[&'a Pod]) -> Vec<&'a Pod> {
    let mut sorted = pods.to_vec();
    sorted.sort_by_key(|p| (pod_priority(p), qos_class(p)));
    sorted
}
