//! Detection of pods whose placement breaks inter-pod (anti-)affinity.

use std::collections::BTreeSet;

use k8s_openapi::api::core::v1::{Affinity, Node, Pod, PodAffinityTerm};
use rebalancer_core::{
    node_labels, pod_key, pod_labels, pod_namespace, pod_node_name, selector, NodeMap,
    PodsByNamespace,
};
use tracing::{debug, warn};

/// Decides whether a pod's current placement violates inter-pod affinity.
pub trait AffinityOracle: Send + Sync {
    /// Whether `pod` violates its own or a peer's required affinity rules.
    ///
    /// Must not mutate its inputs.
    fn violates(&self, pod: &Pod, pods_by_namespace: &PodsByNamespace<'_>, nodes: &NodeMap<'_>) -> bool;
}

/// Checks required-during-scheduling pod affinity and anti-affinity terms.
///
/// A pod violates when:
/// - one of its affinity terms has no matching peer in its topology domain,
/// - one of its anti-affinity terms matches a peer in its topology domain, or
/// - a peer in its topology domain has an anti-affinity term matching it.
#[derive(Debug, Clone, Copy, Default)]
pub struct InterPodAffinityChecker;

impl AffinityOracle for InterPodAffinityChecker {
    fn violates(&self, pod: &Pod, pods_by_namespace: &PodsByNamespace<'_>, nodes: &NodeMap<'_>) -> bool {
        let Some(node) = pod_node_name(pod).and_then(|n| nodes.get(n)) else {
            debug!(pod = %pod_key(pod), "Pod node is not in the node map");
            return false;
        };

        match find_violation(pod, node, pods_by_namespace, nodes) {
            Ok(Some(reason)) => {
                debug!(pod = %pod_key(pod), reason, "Pod violates inter-pod affinity");
                true
            }
            Ok(None) => false,
            Err(e) => {
                warn!(pod = %pod_key(pod), error = %e, "Unable to evaluate affinity terms");
                false
            }
        }
    }
}

fn find_violation(
    pod: &Pod,
    node: &Node,
    pods_by_namespace: &PodsByNamespace<'_>,
    nodes: &NodeMap<'_>,
) -> rebalancer_core::Result<Option<&'static str>> {
    let affinity = pod.spec.as_ref().and_then(|s| s.affinity.as_ref());

    for term in affinity_terms(affinity) {
        if !any_peer_matches(pod, term, node, pods_by_namespace, nodes)? {
            return Ok(Some("affinity term has no matching pod in its topology domain"));
        }
    }

    for term in anti_affinity_terms(affinity) {
        if any_peer_matches(pod, term, node, pods_by_namespace, nodes)? {
            return Ok(Some("anti-affinity term matches a pod in its topology domain"));
        }
    }

    let key = pod_key(pod);
    for peer in pods_by_namespace.values().flatten() {
        if pod_key(peer) == key {
            continue;
        }
        let Some(peer_node) = pod_node_name(peer).and_then(|n| nodes.get(n)) else {
            continue;
        };
        let peer_affinity = peer.spec.as_ref().and_then(|s| s.affinity.as_ref());
        for term in anti_affinity_terms(peer_affinity) {
            if term_namespaces(peer, term).contains(pod_namespace(pod))
                && selector_matches(term, pod)?
                && same_topology(node, peer_node, &term.topology_key)
            {
                return Ok(Some("a peer's anti-affinity term matches the pod"));
            }
        }
    }

    Ok(None)
}

/// Whether a pod other than `pod`, selected by `pod`'s term, runs in the
/// same topology domain as `node`.
fn any_peer_matches(
    pod: &Pod,
    term: &PodAffinityTerm,
    node: &Node,
    pods_by_namespace: &PodsByNamespace<'_>,
    nodes: &NodeMap<'_>,
) -> rebalancer_core::Result<bool> {
    let key = pod_key(pod);
    let namespaces = term_namespaces(pod, term);

    let candidates: Box<dyn Iterator<Item = &&Pod> + '_> = match &namespaces {
        TermNamespaces::All => Box::new(pods_by_namespace.values().flatten()),
        TermNamespaces::Set(set) => Box::new(
            set.iter()
                .filter_map(|ns| pods_by_namespace.get(*ns))
                .flatten(),
        ),
    };

    for candidate in candidates {
        if pod_key(candidate) == key || !selector_matches(term, candidate)? {
            continue;
        }
        let Some(candidate_node) = pod_node_name(candidate).and_then(|n| nodes.get(n)) else {
            continue;
        };
        if same_topology(node, candidate_node, &term.topology_key) {
            return Ok(true);
        }
    }

    Ok(false)
}

enum TermNamespaces<'a> {
    All,
    Set(BTreeSet<&'a str>),
}

impl TermNamespaces<'_> {
    fn contains(&self, namespace: &str) -> bool {
        match self {
            Self::All => true,
            Self::Set(set) => set.contains(namespace),
        }
    }
}

/// Namespaces a term applies to. An empty namespace selector means every
/// namespace. Without explicit namespaces the owner's namespace is used;
/// non-empty namespace selectors cannot be evaluated without namespace labels
/// and contribute nothing.
fn term_namespaces<'a>(owner: &'a Pod, term: &'a PodAffinityTerm) -> TermNamespaces<'a> {
    if term.namespace_selector.as_ref().is_some_and(selector::is_empty) {
        return TermNamespaces::All;
    }

    let mut set: BTreeSet<&str> = term
        .namespaces
        .iter()
        .flatten()
        .map(String::as_str)
        .collect();
    if set.is_empty() {
        set.insert(pod_namespace(owner));
    }
    TermNamespaces::Set(set)
}

/// A term without a label selector matches no pods.
fn selector_matches(term: &PodAffinityTerm, pod: &Pod) -> rebalancer_core::Result<bool> {
    match &term.label_selector {
        Some(s) => selector::matches(s, pod_labels(pod)),
        None => Ok(false),
    }
}

fn same_topology(a: &Node, b: &Node, topology_key: &str) -> bool {
    match (node_labels(a).get(topology_key), node_labels(b).get(topology_key)) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

fn affinity_terms(affinity: Option<&Affinity>) -> &[PodAffinityTerm] {
    affinity
        .and_then(|a| a.pod_affinity.as_ref())
        .and_then(|pa| pa.required_during_scheduling_ignored_during_execution.as_deref())
        .unwrap_or_default()
}

fn anti_affinity_terms(affinity: Option<&Affinity>) -> &[PodAffinityTerm] {
    affinity
        .and_then(|a| a.pod_anti_affinity.as_ref())
        .and_then(|pa| pa.required_during_scheduling_ignored_during_execution.as_deref())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::podutil::group_by_namespace;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};
    use rebalancer_core::create_node_map;
    use rebalancer_core::testing::{
        build_test_node, build_test_pod, set_labels, set_pod_affinity, set_pod_anti_affinity,
    };

    fn violates(pod_name: &str, pods: &[Pod], nodes: &[Node]) -> bool {
        let by_ns = group_by_namespace(pods);
        let node_map = create_node_map(nodes);
        let pod = pods
            .iter()
            .find(|p| rebalancer_core::pod_name(p) == pod_name)
            .unwrap();
        InterPodAffinityChecker.violates(pod, &by_ns, &node_map)
    }

    fn region_nodes() -> Vec<Node> {
        vec![
            build_test_node("n1", &[("region", "main-region")]),
            build_test_node("n2", &[("region", "main-region")]),
            build_test_node("n4", &[("region", "south")]),
        ]
    }

    #[test]
    fn unsatisfied_affinity_is_a_violation() {
        let mut target = build_test_pod("target", "n1");
        set_labels(&mut target, &[("foo", "bar")]);
        let mut follower = build_test_pod("follower", "n4");
        set_pod_affinity(&mut follower, "foo", "bar");

        assert!(violates("follower", &[target, follower], &region_nodes()));
    }

    #[test]
    fn satisfied_affinity_in_same_domain() {
        let mut target = build_test_pod("target", "n1");
        set_labels(&mut target, &[("foo", "bar")]);
        let mut follower = build_test_pod("follower", "n2");
        set_pod_affinity(&mut follower, "foo", "bar");

        let pods = [target, follower];
        assert!(!violates("follower", &pods, &region_nodes()));
        assert!(!violates("target", &pods, &region_nodes()));
    }

    #[test]
    fn affinity_does_not_match_itself() {
        let mut lonely = build_test_pod("lonely", "n1");
        set_labels(&mut lonely, &[("foo", "bar")]);
        set_pod_affinity(&mut lonely, "foo", "bar");

        assert!(violates("lonely", &[lonely], &region_nodes()));
    }

    #[test]
    fn affinity_respects_namespaces() {
        let mut target = build_test_pod("target", "n1");
        target.metadata.namespace = Some("other".to_string());
        set_labels(&mut target, &[("foo", "bar")]);
        let mut follower = build_test_pod("follower", "n2");
        set_pod_affinity(&mut follower, "foo", "bar");

        let pods = [target.clone(), follower.clone()];
        assert!(violates("follower", &pods, &region_nodes()));

        let term = &mut follower
            .spec
            .as_mut()
            .unwrap()
            .affinity
            .as_mut()
            .unwrap()
            .pod_affinity
            .as_mut()
            .unwrap()
            .required_during_scheduling_ignored_during_execution
            .as_mut()
            .unwrap()[0];
        term.namespaces = Some(vec!["other".to_string()]);
        assert!(!violates("follower", &[target.clone(), follower.clone()], &region_nodes()));

        term_to_all_namespaces(&mut follower);
        assert!(!violates("follower", &[target, follower], &region_nodes()));
    }

    fn term_to_all_namespaces(pod: &mut Pod) {
        let term = &mut pod
            .spec
            .as_mut()
            .unwrap()
            .affinity
            .as_mut()
            .unwrap()
            .pod_affinity
            .as_mut()
            .unwrap()
            .required_during_scheduling_ignored_during_execution
            .as_mut()
            .unwrap()[0];
        term.namespaces = None;
        term.namespace_selector = Some(LabelSelector::default());
    }

    #[test]
    fn own_anti_affinity_conflict() {
        let mut web = build_test_pod("web", "n1");
        set_labels(&mut web, &[("app", "web")]);
        let mut loner = build_test_pod("loner", "n2");
        set_pod_anti_affinity(&mut loner, "app", "web");

        assert!(violates("loner", &[web.clone(), loner.clone()], &region_nodes()));

        let mut elsewhere = loner;
        elsewhere.spec.as_mut().unwrap().node_name = Some("n4".to_string());
        assert!(!violates("loner", &[web, elsewhere], &region_nodes()));
    }

    #[test]
    fn peer_anti_affinity_conflict() {
        let mut web = build_test_pod("web", "n1");
        set_labels(&mut web, &[("app", "web")]);
        let mut loner = build_test_pod("loner", "n2");
        set_pod_anti_affinity(&mut loner, "app", "web");

        assert!(violates("web", &[web, loner], &region_nodes()));
    }

    #[test]
    fn pods_without_rules_never_violate() {
        let pods = [build_test_pod("a", "n1"), build_test_pod("b", "n4")];
        assert!(!violates("a", &pods, &region_nodes()));
        assert!(!violates("b", &pods, &region_nodes()));
    }

    #[test]
    fn missing_topology_label_is_a_different_domain() {
        let nodes = vec![build_test_node("n1", &[]), build_test_node("n2", &[])];
        let mut target = build_test_pod("target", "n1");
        set_labels(&mut target, &[("foo", "bar")]);
        let mut follower = build_test_pod("follower", "n1");
        set_pod_affinity(&mut follower, "foo", "bar");

        assert!(violates("follower", &[target, follower], &nodes));
    }

    #[test]
    fn unknown_node_is_not_a_violation() {
        let mut follower = build_test_pod("follower", "gone");
        set_pod_affinity(&mut follower, "foo", "bar");
        assert!(!violates("follower", &[follower], &region_nodes()));
    }

    #[test]
    fn invalid_selector_is_not_a_violation() {
        let mut follower = build_test_pod("follower", "n1");
        set_pod_affinity(&mut follower, "foo", "bar");
        follower
            .spec
            .as_mut()
            .unwrap()
            .affinity
            .as_mut()
            .unwrap()
            .pod_affinity
            .as_mut()
            .unwrap()
            .required_during_scheduling_ignored_during_execution
            .as_mut()
            .unwrap()[0]
            .label_selector = Some(LabelSelector {
            match_labels: None,
            match_expressions: Some(vec![LabelSelectorRequirement {
                key: String::new(),
                operator: "In".to_string(),
                values: None,
            }]),
        });
        let other = build_test_pod("other", "n2");

        assert!(!violates("follower", &[follower, other], &region_nodes()));
    }
}
