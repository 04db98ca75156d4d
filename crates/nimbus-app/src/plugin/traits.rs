//! Plugin traits and types

use crate::application::{Application, InstallOptions};
use crate::events::{EventKind, Listener, ListenerId};
use async_trait::async_trait;
use nimbus_core::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Plugin metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginMetadata {
    /// Plugin name
    pub name: String,

    /// Plugin version
    pub version: String,

    /// Plugin description
    #[serde(default)]
    pub description: String,

    /// Names of plugins that must be initialized first
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl PluginMetadata {
    /// Create new plugin metadata
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: String::new(),
            dependencies: Vec::new(),
        }
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Declare a dependency
    pub fn depends_on(mut self, plugin: impl Into<String>) -> Self {
        self.dependencies.push(plugin.into());
        self
    }
}

/// Handle given to plugin hooks
///
/// Listeners registered through the context are reinitializable: they are
/// dropped on the next application init, since the plugin instance that
/// registered them is replaced.
pub struct PluginContext<'a> {
    app: &'a Application,
    plugin: &'a str,
}

impl<'a> PluginContext<'a> {
    pub(crate) fn new(app: &'a Application, plugin: &'a str) -> Self {
        Self { app, plugin }
    }

    /// Owning application
    pub fn app(&self) -> &'a Application {
        self.app
    }

    /// Name of the plugin being called
    pub fn plugin(&self) -> &str {
        self.plugin
    }

    /// Subscribe to an application event until the next reinit
    pub fn on(&self, kind: EventKind, listener: Arc<dyn Listener>) -> ListenerId {
        self.app.on_reinitializable(kind, listener)
    }
}

impl fmt::Debug for PluginContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginContext")
            .field("app", &self.app.name())
            .field("plugin", &self.plugin)
            .finish()
    }
}

/// Plugin trait
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Get plugin metadata
    fn metadata(&self) -> &PluginMetadata;

    /// Called once the instance was created and ordered
    async fn after_add(&mut self, _ctx: &PluginContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Called on every plugin before any `load`
    async fn before_load(&mut self, _ctx: &PluginContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Load the plugin
    async fn load(&mut self, _ctx: &PluginContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Install the plugin's data
    async fn install(&mut self, _ctx: &PluginContext<'_>, _options: &InstallOptions) -> Result<()> {
        Ok(())
    }
}

/// Builds a plugin instance from its options
pub type PluginFactory = Arc<dyn Fn(Value) -> Result<Box<dyn Plugin>> + Send + Sync>;

/// A plugin as configured on an application, instantiated on every init
#[derive(Clone)]
pub struct PluginPreset {
    /// Preset name
    pub name: String,
    /// Instance factory
    pub factory: PluginFactory,
    /// Options passed to the factory
    pub options: Value,
}

impl PluginPreset {
    /// Preset from a factory closure
    pub fn new<F>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(Value) -> Result<Box<dyn Plugin>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            factory: Arc::new(factory),
            options: Value::Null,
        }
    }

    /// Set factory options
    pub fn with_options(mut self, options: Value) -> Self {
        self.options = options;
        self
    }

    /// Create an instance
    pub fn build(&self) -> Result<Box<dyn Plugin>> {
        (self.factory)(self.options.clone())
    }
}

impl fmt::Debug for PluginPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginPreset")
            .field("name", &self.name)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
