//! Node helpers: topology lookup, schedulability and placement fit.

use std::collections::{BTreeMap, HashMap};

use k8s_openapi::api::core::v1::{Node, NodeSelectorRequirement, NodeSelectorTerm, Pod, Taint, Toleration};

/// Nodes keyed by name, used as the topology map for affinity checks.
pub type NodeMap<'a> = HashMap<String, &'a Node>;

/// Name of a node, or an empty string when unset.
#[must_use]
pub fn node_name(node: &Node) -> &str {
    node.metadata.name.as_deref().unwrap_or_default()
}

/// The node's labels, or an empty map.
#[must_use]
pub fn node_labels(node: &Node) -> &BTreeMap<String, String> {
    static EMPTY: BTreeMap<String, String> = BTreeMap::new();
    node.metadata.labels.as_ref().unwrap_or(&EMPTY)
}

/// Build the name → node lookup for a node list.
#[must_use]
pub fn create_node_map(nodes: &[Node]) -> NodeMap<'_> {
    nodes.iter().map(|n| (node_name(n).to_string(), n)).collect()
}

/// Whether new pods may be placed on the node.
#[must_use]
pub fn is_node_schedulable(node: &Node) -> bool {
    !node
        .spec
        .as_ref()
        .and_then(|s| s.unschedulable)
        .unwrap_or(false)
}

/// Whether the node satisfies the pod's `nodeSelector` and required node affinity.
#[must_use]
pub fn pod_matches_node_selector(pod: &Pod, node: &Node) -> bool {
    let Some(spec) = pod.spec.as_ref() else {
        return true;
    };
    let labels = node_labels(node);

    let selector_ok = spec
        .node_selector
        .iter()
        .flatten()
        .all(|(k, v)| labels.get(k) == Some(v));
    if !selector_ok {
        return false;
    }

    let required = spec
        .affinity
        .as_ref()
        .and_then(|a| a.node_affinity.as_ref())
        .and_then(|na| na.required_during_scheduling_ignored_during_execution.as_ref());

    match required {
        // Terms are ORed.
        Some(selector) => selector
            .node_selector_terms
            .iter()
            .any(|term| node_selector_term_matches(term, node)),
        None => true,
    }
}

fn node_selector_term_matches(term: &NodeSelectorTerm, node: &Node) -> bool {
    let expressions = term.match_expressions.as_deref().unwrap_or_default();
    let fields = term.match_fields.as_deref().unwrap_or_default();

    // A term without requirements matches nothing.
    if expressions.is_empty() && fields.is_empty() {
        return false;
    }

    let labels = node_labels(node);
    let name_field = BTreeMap::from([("metadata.name".to_string(), node_name(node).to_string())]);

    expressions
        .iter()
        .all(|r| node_requirement_matches(r, labels))
        && fields
            .iter()
            .all(|r| node_requirement_matches(r, &name_field))
}

fn node_requirement_matches(requirement: &NodeSelectorRequirement, labels: &BTreeMap<String, String>) -> bool {
    let values = requirement.values.as_deref().unwrap_or_default();
    let value = labels.get(&requirement.key);

    match requirement.operator.as_str() {
        "In" => value.is_some_and(|v| values.contains(v)),
        "NotIn" => value.is_none_or(|v| !values.contains(v)),
        "Exists" => value.is_some(),
        "DoesNotExist" => value.is_none(),
        "Gt" | "Lt" => {
            let (Some(actual), Some(bound)) = (
                value.and_then(|v| v.parse::<i64>().ok()),
                values.first().and_then(|v| v.parse::<i64>().ok()),
            ) else {
                return false;
            };
            if requirement.operator == "Gt" {
                actual > bound
            } else {
                actual < bound
            }
        }
        _ => false,
    }
}

/// Whether the pod tolerates every `NoSchedule`/`NoExecute` taint on the node.
#[must_use]
pub fn pod_tolerates_node_taints(pod: &Pod, node: &Node) -> bool {
    let tolerations = pod
        .spec
        .as_ref()
        .and_then(|s| s.tolerations.as_deref())
        .unwrap_or_default();

    node.spec
        .as_ref()
        .and_then(|s| s.taints.as_deref())
        .unwrap_or_default()
        .iter()
        .filter(|t| t.effect == "NoSchedule" || t.effect == "NoExecute")
        .all(|taint| tolerations.iter().any(|t| tolerates(t, taint)))
}

fn tolerates(toleration: &Toleration, taint: &Taint) -> bool {
    if let Some(effect) = toleration.effect.as_deref().filter(|e| !e.is_empty()) {
        if effect != taint.effect {
            return false;
        }
    }

    let key = toleration.key.as_deref().unwrap_or_default();
    match toleration.operator.as_deref().unwrap_or("Equal") {
        // An empty key with Exists tolerates everything.
        "Exists" => key.is_empty() || key == taint.key,
        "Equal" => {
            key == taint.key
                && toleration.value.as_deref().unwrap_or_default()
                    == taint.value.as_deref().unwrap_or_default()
        }
        _ => false,
    }
}

/// Whether the pod could be placed on the node: schedulable, selector fit and
/// tolerated taints. Resource capacity is not considered.
#[must_use]
pub fn pod_fits_node(pod: &Pod, node: &Node) -> bool {
    is_node_schedulable(node) && pod_matches_node_selector(pod, node) && pod_tolerates_node_taints(pod, node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{build_test_node, build_test_pod};
    use k8s_openapi::api::core::v1::{Affinity, NodeAffinity, NodeSelector};

    #[test]
    fn node_map_is_keyed_by_name() {
        let nodes = vec![build_test_node("n1", &[]), build_test_node("n2", &[])];
        let map = create_node_map(&nodes);
        assert_eq!(map.len(), 2);
        assert_eq!(node_name(map["n2"]), "n2");
    }

    #[test]
    fn unschedulable_node() {
        let mut node = build_test_node("n1", &[]);
        assert!(is_node_schedulable(&node));
        node.spec.get_or_insert_with(Default::default).unschedulable = Some(true);
        assert!(!is_node_schedulable(&node));
    }

    #[test]
    fn node_selector_and_required_affinity() {
        let node = build_test_node("n1", &[("zone", "a"), ("disk", "ssd")]);
        let mut pod = build_test_pod("p1", "n2");
        assert!(pod_matches_node_selector(&pod, &node));

        let spec = pod.spec.get_or_insert_with(Default::default);
        spec.node_selector = Some(BTreeMap::from([("zone".to_string(), "b".to_string())]));
        assert!(!pod_matches_node_selector(&pod, &node));

        let spec = pod.spec.get_or_insert_with(Default::default);
        spec.node_selector = Some(BTreeMap::from([("zone".to_string(), "a".to_string())]));
        spec.affinity = Some(Affinity {
            node_affinity: Some(NodeAffinity {
                required_during_scheduling_ignored_during_execution: Some(NodeSelector {
                    node_selector_terms: vec![NodeSelectorTerm {
                        match_expressions: Some(vec![NodeSelectorRequirement {
                            key: "disk".to_string(),
                            operator: "In".to_string(),
                            values: Some(vec!["ssd".to_string()]),
                        }]),
                        match_fields: None,
                    }],
                }),
                ..Default::default()
            }),
            ..Default::default()
        });
        assert!(pod_matches_node_selector(&pod, &node));

        let other = build_test_node("n3", &[("zone", "a"), ("disk", "hdd")]);
        assert!(!pod_matches_node_selector(&pod, &other));
    }

    #[test]
    fn taints_must_be_tolerated() {
        let mut node = build_test_node("n1", &[]);
        node.spec.get_or_insert_with(Default::default).taints = Some(vec![Taint {
            key: "dedicated".to_string(),
            value: Some("gpu".to_string()),
            effect: "NoSchedule".to_string(),
            time_added: None,
        }]);

        let mut pod = build_test_pod("p1", "n2");
        assert!(!pod_tolerates_node_taints(&pod, &node));
        assert!(!pod_fits_node(&pod, &node));

        pod.spec.get_or_insert_with(Default::default).tolerations = Some(vec![Toleration {
            key: Some("dedicated".to_string()),
            operator: Some("Equal".to_string()),
            value: Some("gpu".to_string()),
            effect: Some("NoSchedule".to_string()),
            toleration_seconds: None,
        }]);
        assert!(pod_tolerates_node_taints(&pod, &node));
        assert!(pod_fits_node(&pod, &node));
    }

    #[test]
    fn prefer_no_schedule_taints_are_ignored() {
        let mut node = build_test_node("n1", &[]);
        node.spec.get_or_insert_with(Default::default).taints = Some(vec![Taint {
            key: "soft".to_string(),
            value: None,
            effect: "PreferNoSchedule".to_string(),
            time_added: None,
        }]);
        assert!(pod_tolerates_node_taints(&build_test_pod("p1", "n2"), &node));
    }
}
