//! Label selector validation and matching.
//!
//! Selectors follow the Kubernetes `LabelSelector` semantics: every
//! `matchLabels` pair and every `matchExpressions` requirement must hold, and
//! an empty selector matches every label set.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};

use crate::{CoreError, Result};

const OP_IN: &str = "In";
const OP_NOT_IN: &str = "NotIn";
const OP_EXISTS: &str = "Exists";
const OP_DOES_NOT_EXIST: &str = "DoesNotExist";

/// Validate a label selector.
///
/// # Errors
///
/// Returns `CoreError::InvalidSelector` when a requirement has an empty key,
/// an unknown operator, or a value list that does not fit its operator.
pub fn validate(selector: &LabelSelector) -> Result<()> {
    if let Some(labels) = &selector.match_labels {
        if labels.keys().any(String::is_empty) {
            return Err(CoreError::InvalidSelector(
                "matchLabels key must not be empty".to_string(),
            ));
        }
    }

    for requirement in selector.match_expressions.iter().flatten() {
        validate_requirement(requirement)?;
    }

    Ok(())
}

fn validate_requirement(requirement: &LabelSelectorRequirement) -> Result<()> {
    if requirement.key.is_empty() {
        return Err(CoreError::InvalidSelector(format!(
            "requirement with operator {:?} has an empty key",
            requirement.operator
        )));
    }

    let values = requirement.values.as_deref().unwrap_or_default();
    match requirement.operator.as_str() {
        OP_IN | OP_NOT_IN if values.is_empty() => Err(CoreError::InvalidSelector(format!(
            "operator {} on key {} requires at least one value",
            requirement.operator, requirement.key
        ))),
        OP_EXISTS | OP_DOES_NOT_EXIST if !values.is_empty() => {
            Err(CoreError::InvalidSelector(format!(
                "operator {} on key {} must not have values",
                requirement.operator, requirement.key
            )))
        }
        OP_IN | OP_NOT_IN | OP_EXISTS | OP_DOES_NOT_EXIST => Ok(()),
        other => Err(CoreError::InvalidSelector(format!(
            "unknown operator {other:?} on key {}",
            requirement.key
        ))),
    }
}

/// Check whether a label set satisfies a selector.
///
/// # Errors
///
/// Returns `CoreError::InvalidSelector` if the selector does not validate.
pub fn matches(selector: &LabelSelector, labels: &BTreeMap<String, String>) -> Result<bool> {
    validate(selector)?;

    let labels_match = selector
        .match_labels
        .iter()
        .flatten()
        .all(|(k, v)| labels.get(k) == Some(v));

    if !labels_match {
        return Ok(false);
    }

    Ok(selector
        .match_expressions
        .iter()
        .flatten()
        .all(|r| requirement_matches(r, labels)))
}

fn requirement_matches(requirement: &LabelSelectorRequirement, labels: &BTreeMap<String, String>) -> bool {
    let values = requirement.values.as_deref().unwrap_or_default();
    let value = labels.get(&requirement.key);

    match requirement.operator.as_str() {
        OP_IN => value.is_some_and(|v| values.contains(v)),
        OP_NOT_IN => value.is_none_or(|v| !values.contains(v)),
        OP_EXISTS => value.is_some(),
        OP_DOES_NOT_EXIST => value.is_none(),
        _ => false,
    }
}

/// Whether the selector has no requirements at all.
#[must_use]
pub fn is_empty(selector: &LabelSelector) -> bool {
    selector.match_labels.as_ref().is_none_or(BTreeMap::is_empty)
        && selector.match_expressions.as_ref().is_none_or(Vec::is_empty)
}

/// Parse an equality-based selector such as `role=worker,zone=a`.
///
/// # Errors
///
/// Returns `CoreError::InvalidSelector` for pairs without `=` or with an
/// empty key.
pub fn parse_equality(input: &str) -> Result<LabelSelector> {
    let mut match_labels = BTreeMap::new();

    for pair in input.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let Some((key, value)) = pair.split_once('=') else {
            return Err(CoreError::InvalidSelector(format!(
                "expected key=value, got {pair:?}"
            )));
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(CoreError::InvalidSelector(format!(
                "empty key in {pair:?}"
            )));
        }
        match_labels.insert(key.to_string(), value.trim().to_string());
    }

    Ok(LabelSelector {
        match_labels: Some(match_labels),
        match_expressions: None,
    })
}
