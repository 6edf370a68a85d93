//! Arguments of the inter-pod affinity strategy.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use rebalancer_core::selector;
use serde::{Deserialize, Serialize};

use crate::podutil::Namespaces;
use crate::{FrameworkError, Result};

/// Arguments of [`RemovePodsViolatingInterPodAffinity`](super::RemovePodsViolatingInterPodAffinity).
///
/// Absent fields stay absent: no namespace restriction and no label selector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RemovePodsViolatingInterPodAffinityArgs {
    /// Namespace inclusion or exclusion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespaces: Option<Namespaces>,
    /// Only pods matching this selector are considered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label_selector: Option<LabelSelector>,
}

impl RemovePodsViolatingInterPodAffinityArgs {
    /// Decode arguments from a policy document. `null` yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns `FrameworkError::InvalidArgs` if the value has the wrong shape.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        if value.is_null() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Validate the arguments.
    ///
    /// # Errors
    ///
    /// Returns `FrameworkError::Config` if both included and excluded
    /// namespaces are set or the label selector is invalid.
    pub fn validate(&self) -> Result<()> {
        if let Some(ns) = &self.namespaces {
            if !ns.include.is_empty() && !ns.exclude.is_empty() {
                return Err(FrameworkError::Config(
                    "only one of Include/Exclude namespaces can be set".to_string(),
                ));
            }
        }

        if let Some(s) = &self.label_selector {
            selector::validate(s)
                .map_err(|e| FrameworkError::Config(format!("failed to get label selectors: {e}")))?;
        }

        Ok(())
    }
}
