//! Plugin catalog

use crate::plugin::traits::{Plugin, PluginFactory, PluginPreset};
use nimbus_config::PluginConfig;
use nimbus_core::{Error, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Registry of known plugin factories, used to turn configured plugin names
/// into presets
#[derive(Clone, Default)]
pub struct PluginCatalog {
    factories: HashMap<String, PluginFactory>,
}

impl PluginCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under `name`, replacing any previous one
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(Value) -> Result<Box<dyn Plugin>> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
        self
    }

    /// Whether `name` is known
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Known plugin names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Preset for one configured plugin
    pub fn preset(&self, config: &PluginConfig) -> Result<PluginPreset> {
        let factory = self
            .factories
            .get(&config.name)
            .ok_or_else(|| Error::plugin(&config.name, "unknown plugin"))?;

        Ok(PluginPreset {
            name: config.name.clone(),
            factory: Arc::clone(factory),
            options: config.options.clone(),
        })
    }

    /// Presets for every enabled configured plugin, in config order
    pub fn presets(&self, configs: &[PluginConfig]) -> Result<Vec<PluginPreset>> {
        configs
            .iter()
            .filter(|config| config.enabled)
            .map(|config| self.preset(config))
            .collect()
    }
}

impl fmt::Debug for PluginCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginCatalog")
            .field("plugins", &self.names())
            .finish()
    }
}
