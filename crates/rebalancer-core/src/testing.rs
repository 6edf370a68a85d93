//! Builders for pods and nodes used in tests across the workspace.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Affinity, Container, Node, NodeSpec, Pod, PodAffinity, PodAffinityTerm, PodAntiAffinity,
    PodSpec, PodStatus, ResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, OwnerReference};

/// Namespace assigned by [`build_test_pod`].
pub const TEST_NAMESPACE: &str = "default";

/// Topology key used by [`set_pod_affinity`] and [`set_pod_anti_affinity`].
pub const TEST_TOPOLOGY_KEY: &str = "region";

/// A running pod in [`TEST_NAMESPACE`] assigned to `node_name`, with one
/// container requesting 100m cpu.
#[must_use]
pub fn build_test_pod(name: &str, node_name: &str) -> Pod {
    let mut pod = Pod::default();
    pod.metadata.name = Some(name.to_string());
    pod.metadata.namespace = Some(TEST_NAMESPACE.to_string());
    pod.metadata.uid = Some(format!("uid-{name}"));
    pod.spec = Some(PodSpec {
        node_name: Some(node_name.to_string()),
        containers: vec![Container {
            name: "app".to_string(),
            resources: Some(ResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "cpu".to_string(),
                    Quantity("100m".to_string()),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }],
        ..Default::default()
    });
    pod.status = Some(PodStatus {
        phase: Some("Running".to_string()),
        ..Default::default()
    });
    pod
}

/// A schedulable node carrying the given labels.
#[must_use]
pub fn build_test_node(name: &str, labels: &[(&str, &str)]) -> Node {
    let mut node = Node::default();
    node.metadata.name = Some(name.to_string());
    node.metadata.labels = Some(
        labels
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect(),
    );
    node.spec = Some(NodeSpec::default());
    node
}

/// Replace the pod's labels.
pub fn set_labels(pod: &mut Pod, labels: &[(&str, &str)]) {
    pod.metadata.labels = Some(
        labels
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect(),
    );
}

/// Make the pod owned by a ReplicaSet.
pub fn set_normal_owner_ref(pod: &mut Pod) {
    set_owner_ref(pod, "ReplicaSet");
}

/// Make the pod owned by a DaemonSet.
pub fn set_daemon_set_owner_ref(pod: &mut Pod) {
    set_owner_ref(pod, "DaemonSet");
}

fn set_owner_ref(pod: &mut Pod, kind: &str) {
    pod.metadata.owner_references = Some(vec![OwnerReference {
        api_version: "apps/v1".to_string(),
        kind: kind.to_string(),
        name: format!("{}-owner", kind.to_lowercase()),
        uid: format!("uid-{}-owner", kind.to_lowercase()),
        controller: Some(true),
        ..Default::default()
    }]);
}

/// Set the pod's declared priority.
pub fn set_pod_priority(pod: &mut Pod, priority: i32) {
    pod.spec.get_or_insert_with(Default::default).priority = Some(priority);
}

/// Set the pod's reported QoS class.
pub fn set_qos_class(pod: &mut Pod, class: &str) {
    pod.status.get_or_insert_with(Default::default).qos_class = Some(class.to_string());
}

/// Require co-location with pods labelled `key=value` in the same
/// [`TEST_TOPOLOGY_KEY`] domain.
pub fn set_pod_affinity(pod: &mut Pod, key: &str, value: &str) {
    let affinity = pod_affinity_spec(pod);
    affinity.pod_affinity = Some(PodAffinity {
        required_during_scheduling_ignored_during_execution: Some(vec![label_term(key, value)]),
        ..Default::default()
    });
}

/// Forbid co-location with pods labelled `key=value` in the same
/// [`TEST_TOPOLOGY_KEY`] domain.
pub fn set_pod_anti_affinity(pod: &mut Pod, key: &str, value: &str) {
    let affinity = pod_affinity_spec(pod);
    affinity.pod_anti_affinity = Some(PodAntiAffinity {
        required_during_scheduling_ignored_during_execution: Some(vec![label_term(key, value)]),
        ..Default::default()
    });
}

fn pod_affinity_spec(pod: &mut Pod) -> &mut Affinity {
    pod.spec
        .get_or_insert_with(Default::default)
        .affinity
        .get_or_insert_with(Default::default)
}

fn label_term(key: &str, value: &str) -> PodAffinityTerm {
    PodAffinityTerm {
        label_selector: Some(LabelSelector {
            match_labels: Some(BTreeMap::from([(key.to_string(), value.to_string())])),
            match_expressions: None,
        }),
        topology_key: TEST_TOPOLOGY_KEY.to_string(),
        ..Default::default()
    }
}
