//! Strategy table owned by the orchestrator.

use std::collections::BTreeMap;

use crate::plugin::{DeschedulePlugin, Handle};
use crate::plugins::interpod_affinity::{self, RemovePodsViolatingInterPodAffinity};
use crate::{FrameworkError, Result};

/// Builds a strategy from its policy arguments.
pub type PluginFactory = fn(serde_json::Value, Handle) -> Result<Box<dyn DeschedulePlugin>>;

/// Maps strategy names to factories.
#[derive(Debug, Clone)]
pub struct Registry {
    factories: BTreeMap<&'static str, PluginFactory>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Create a registry holding every built-in strategy.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(
            interpod_affinity::PLUGIN_NAME,
            RemovePodsViolatingInterPodAffinity::factory,
        );
        registry
    }

    /// Register a factory, replacing any previous one with the same name.
    pub fn register(&mut self, name: &'static str, factory: PluginFactory) {
        self.factories.insert(name, factory);
    }

    /// Whether a strategy is registered under the name.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered strategy names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.factories.keys().copied()
    }

    /// Build the named strategy.
    ///
    /// # Errors
    ///
    /// Returns `FrameworkError::UnknownStrategy` if nothing is registered under
    /// the name, or the factory's error if the arguments are rejected.
    pub fn build(
        &self,
        name: &str,
        args: serde_json::Value,
        handle: Handle,
    ) -> Result<Box<dyn DeschedulePlugin>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| FrameworkError::UnknownStrategy(name.to_string()))?;
        factory(args, handle)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
