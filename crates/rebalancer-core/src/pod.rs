//! Pod accessors used throughout the rebalancer.
//!
//! All helpers tolerate partially populated pods (as produced by tests or by
//! listing calls with stripped fields) and fall back to empty values.

use std::collections::{BTreeMap, HashMap};

use k8s_openapi::api::core::v1::{Container, Pod};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

/// Pods grouped by namespace name.
pub type PodsByNamespace<'a> = HashMap<String, Vec<&'a Pod>>;

/// Pods grouped by the name of the node they are assigned to.
pub type PodsByNode<'a> = HashMap<String, Vec<&'a Pod>>;

/// Resources that take part in QoS classification.
const QOS_RESOURCES: [&str; 2] = ["cpu", "memory"];

/// Quality-of-service tier of a pod.
///
/// The ordering is the eviction order: best-effort pods go before burstable
/// pods, which go before guaranteed pods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum QosClass {
    /// No container declares requests or limits.
    BestEffort,
    /// Some requests or limits are declared, but not enough to be guaranteed.
    Burstable,
    /// Every container has equal cpu and memory requests and limits.
    Guaranteed,
}

impl QosClass {
    /// Parse a QoS class from the value reported in `status.qosClass`.
    #[must_use]
    pub fn from_k8s(value: &str) -> Option<Self> {
        match value {
            "BestEffort" => Some(Self::BestEffort),
            "Burstable" => Some(Self::Burstable),
            "Guaranteed" => Some(Self::Guaranteed),
            _ => None,
        }
    }
}

/// The pod name, or an empty string when unset.
#[must_use]
pub fn pod_name(pod: &Pod) -> &str {
    pod.metadata.name.as_deref().unwrap_or_default()
}

/// The pod namespace, or an empty string when unset.
#[must_use]
pub fn pod_namespace(pod: &Pod) -> &str {
    pod.metadata.namespace.as_deref().unwrap_or_default()
}

/// `namespace/name` identity of a pod, used in logs and maps.
#[must_use]
pub fn pod_key(pod: &Pod) -> String {
    format!("{}/{}", pod_namespace(pod), pod_name(pod))
}

/// Name of the node the pod is assigned to, if any.
#[must_use]
pub fn pod_node_name(pod: &Pod) -> Option<&str> {
    pod.spec
        .as_ref()
        .and_then(|s| s.node_name.as_deref())
        .filter(|n| !n.is_empty())
}

/// Declared priority of the pod. Higher values are less evictable.
#[must_use]
pub fn pod_priority(pod: &Pod) -> Option<i32> {
    pod.spec.as_ref().and_then(|s| s.priority)
}

/// Whether the pod has run to completion, successfully or not.
///
/// Terminated pods hold no resources and take no part in placement.
#[must_use]
pub fn is_pod_terminated(pod: &Pod) -> bool {
    matches!(
        pod.status.as_ref().and_then(|s| s.phase.as_deref()),
        Some("Succeeded" | "Failed")
    )
}

/// The pod's labels, or an empty map.
#[must_use]
pub fn pod_labels(pod: &Pod) -> &BTreeMap<String, String> {
    static EMPTY: BTreeMap<String, String> = BTreeMap::new();
    pod.metadata.labels.as_ref().unwrap_or(&EMPTY)
}

/// Determine the QoS tier of a pod.
///
/// The class reported by the kubelet wins; otherwise it is derived from the
/// cpu and memory requests and limits of all containers.
#[must_use]
pub fn qos_class(pod: &Pod) -> QosClass {
    if let Some(class) = pod
        .status
        .as_ref()
        .and_then(|s| s.qos_class.as_deref())
        .and_then(QosClass::from_k8s)
    {
        return class;
    }

    let Some(spec) = pod.spec.as_ref() else {
        return QosClass::BestEffort;
    };

    let containers = spec
        .containers
        .iter()
        .chain(spec.init_containers.iter().flatten());

    let mut any_declared = false;
    let mut guaranteed = true;

    for container in containers {
        let requests = qos_quantities(container, |r| r.requests.as_ref());
        let limits = qos_quantities(container, |r| r.limits.as_ref());

        if !requests.is_empty() || !limits.is_empty() {
            any_declared = true;
        }

        if limits.len() != QOS_RESOURCES.len() {
            guaranteed = false;
            continue;
        }

        // Unset requests default to the limits.
        if requests
            .iter()
            .any(|(name, quantity)| limits.get(name) != Some(quantity))
        {
            guaranteed = false;
        }
    }

    if !any_declared {
        QosClass::BestEffort
    } else if guaranteed {
        QosClass::Guaranteed
    } else {
        QosClass::Burstable
    }
}

fn qos_quantities<'a>(
    container: &'a Container,
    select: impl Fn(
        &'a k8s_openapi::api::core::v1::ResourceRequirements,
    ) -> Option<&'a BTreeMap<String, Quantity>>,
) -> BTreeMap<&'a str, Amount<'a>> {
    container
        .resources
        .as_ref()
        .and_then(select)
        .into_iter()
        .flatten()
        .filter(|(name, _)| QOS_RESOURCES.contains(&name.as_str()))
        .map(|(name, quantity)| (name.as_str(), Amount::of(quantity)))
        .filter(|(_, amount)| *amount != Amount::Exact(0))
        .collect()
}

/// A resource quantity normalised for comparison.
///
/// Quantities that cannot be parsed are compared by their raw text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Amount<'a> {
    Exact(i128),
    Raw(&'a str),
}

impl<'a> Amount<'a> {
    fn of(quantity: &'a Quantity) -> Self {
        parse_quantity_nanos(&quantity.0).map_or(Self::Raw(quantity.0.as_str()), Self::Exact)
    }
}

/// Parse a Kubernetes quantity such as `500m`, `1.5Gi` or `2e3` into
/// billionths of the base unit. Fractions below a billionth are dropped.
fn parse_quantity_nanos(raw: &str) -> Option<i128> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !(c.is_ascii_digit() || matches!(c, '.' | '+' | '-')))
        .unwrap_or(raw.len());
    let (number, suffix) = raw.split_at(split);

    let (base, exponent): (i128, i32) = match suffix {
        "" => (10, 0),
        "n" => (10, -9),
        "u" => (10, -6),
        "m" => (10, -3),
        "k" => (10, 3),
        "M" => (10, 6),
        "G" => (10, 9),
        "T" => (10, 12),
        "P" => (10, 15),
        "E" => (10, 18),
        "Ki" => (2, 10),
        "Mi" => (2, 20),
        "Gi" => (2, 30),
        "Ti" => (2, 40),
        "Pi" => (2, 50),
        "Ei" => (2, 60),
        _ => {
            let exp = suffix.strip_prefix(['e', 'E'])?;
            (10, exp.parse().ok()?)
        }
    };

    let (negative, digits) = match number.as_bytes().first()? {
        b'-' => (true, &number[1..]),
        b'+' => (false, &number[1..]),
        _ => (false, number),
    };
    let (whole, fraction) = digits.split_once('.').unwrap_or((digits, ""));
    if whole.is_empty() && fraction.is_empty() {
        return None;
    }

    let mut mantissa: i128 = 0;
    for c in whole.chars().chain(fraction.chars()) {
        let digit = i128::from(c.to_digit(10)?);
        mantissa = mantissa.checked_mul(10)?.checked_add(digit)?;
    }
    let mut scale = 9 - i32::try_from(fraction.len()).ok()?;

    if base == 2 {
        mantissa = mantissa.checked_mul(2_i128.checked_pow(u32::try_from(exponent).ok()?)?)?;
    } else {
        scale = scale.checked_add(exponent)?;
    }

    let ten = |power: i32| 10_i128.checked_pow(power.unsigned_abs());
    let value = if scale >= 0 {
        mantissa.checked_mul(ten(scale)?)?
    } else {
        mantissa / ten(scale)?
    };

    Some(if negative { -value } else { value })
}
