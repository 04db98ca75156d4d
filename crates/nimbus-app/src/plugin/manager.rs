//! Plugin manager

use crate::application::{Application, InstallOptions};
use crate::plugin::traits::{Plugin, PluginContext, PluginMetadata, PluginPreset};
use nimbus_core::{Error, Result};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

type SharedPlugin = Arc<Mutex<Box<dyn Plugin>>>;

struct PluginEntry {
    metadata: PluginMetadata,
    instance: SharedPlugin,
}

/// Owns the presets of one application and the instances built from them
pub struct PluginManager {
    presets: RwLock<Vec<PluginPreset>>,
    plugins: RwLock<Vec<PluginEntry>>,
    initialized: AtomicBool,
}

impl PluginManager {
    /// Create a manager from presets; no instance is built yet
    pub fn new(presets: Vec<PluginPreset>) -> Self {
        Self {
            presets: RwLock::new(presets),
            plugins: RwLock::new(Vec::new()),
            initialized: AtomicBool::new(false),
        }
    }

    /// Presets this manager was built from, in insertion order
    pub fn presets(&self) -> Vec<PluginPreset> {
        self.presets.read().clone()
    }

    /// Add a preset; refused once instances were initialized
    pub fn add_preset(&self, preset: PluginPreset) -> Result<()> {
        if self.is_initialized() {
            return Err(Error::AddPreset(preset.name));
        }

        let mut presets = self.presets.write();
        if presets.iter().any(|existing| existing.name == preset.name) {
            return Err(Error::plugin(&preset.name, "already added as preset"));
        }

        tracing::debug!(plugin = %preset.name, "Adding plugin preset");
        presets.push(preset);
        Ok(())
    }

    /// Whether `init_plugins` completed
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Whether an instance named `name` exists
    pub fn has(&self, name: &str) -> bool {
        self.plugins
            .read()
            .iter()
            .any(|entry| entry.metadata.name == name)
    }

    /// Metadata of one instance
    pub fn get(&self, name: &str) -> Option<PluginMetadata> {
        self.plugins
            .read()
            .iter()
            .find(|entry| entry.metadata.name == name)
            .map(|entry| entry.metadata.clone())
    }

    /// Metadata of every instance in dependency order
    pub fn list(&self) -> Vec<PluginMetadata> {
        self.plugins
            .read()
            .iter()
            .map(|entry| entry.metadata.clone())
            .collect()
    }

    /// Number of instances
    pub fn len(&self) -> usize {
        self.plugins.read().len()
    }

    /// Whether no instance exists
    pub fn is_empty(&self) -> bool {
        self.plugins.read().is_empty()
    }

    /// Build instances from presets, order them and run `after_add`
    pub async fn init_plugins(&self, app: &Application) -> Result<()> {
        if self.is_initialized() {
            return Ok(());
        }

        let mut entries = Vec::new();
        for preset in self.presets() {
            let instance = preset.build()?;
            let metadata = instance.metadata().clone();
            entries.push(PluginEntry {
                metadata,
                instance: Arc::new(Mutex::new(instance)),
            });
        }

        let ordered = sort_by_dependencies(entries)?;
        tracing::debug!(
            app = %app.name(),
            plugins = ?ordered.iter().map(|e| e.metadata.name.as_str()).collect::<Vec<_>>(),
            "Initialized plugins"
        );

        *self.plugins.write() = ordered;
        self.initialized.store(true, Ordering::SeqCst);

        for (name, plugin) in self.instances() {
            let ctx = PluginContext::new(app, &name);
            plugin.lock().await.after_add(&ctx).await?;
        }

        Ok(())
    }

    /// Run `before_load` on every plugin, then `load` on every plugin
    pub async fn load(&self, app: &Application) -> Result<()> {
        let instances = self.instances();

        for (name, plugin) in &instances {
            let ctx = PluginContext::new(app, name);
            plugin.lock().await.before_load(&ctx).await?;
        }

        for (name, plugin) in &instances {
            tracing::debug!(app = %app.name(), plugin = %name, "Loading plugin");
            let ctx = PluginContext::new(app, name);
            plugin.lock().await.load(&ctx).await?;
        }

        Ok(())
    }

    /// Run `install` hooks in dependency order
    pub async fn install(&self, app: &Application, options: &InstallOptions) -> Result<()> {
        for (name, plugin) in self.instances() {
            tracing::debug!(app = %app.name(), plugin = %name, "Installing plugin");
            let ctx = PluginContext::new(app, &name);
            plugin.lock().await.install(&ctx, options).await?;
        }
        Ok(())
    }

    fn instances(&self) -> Vec<(String, SharedPlugin)> {
        self.plugins
            .read()
            .iter()
            .map(|entry| (entry.metadata.name.clone(), Arc::clone(&entry.instance)))
            .collect()
    }
}

impl fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginManager")
            .field("presets", &self.presets.read().len())
            .field("plugins", &self.list())
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

/// Stable topological order: a plugin comes after all of its dependencies,
/// otherwise insertion order is kept
fn sort_by_dependencies(entries: Vec<PluginEntry>) -> Result<Vec<PluginEntry>> {
    let names: HashSet<String> = entries.iter().map(|e| e.metadata.name.clone()).collect();

    for entry in &entries {
        if let Some(missing) = entry
            .metadata
            .dependencies
            .iter()
            .find(|dep| !names.contains(dep.as_str()))
        {
            return Err(Error::plugin(
                &entry.metadata.name,
                format!("depends on missing plugin {missing}"),
            ));
        }
    }

    let total = entries.len();
    let mut pending: Vec<Option<PluginEntry>> = entries.into_iter().map(Some).collect();
    let mut placed: HashSet<String> = HashSet::with_capacity(total);
    let mut ordered = Vec::with_capacity(total);

    while ordered.len() < total {
        let mut progressed = false;

        for slot in pending.iter_mut() {
            let ready = slot.as_ref().is_some_and(|entry| {
                entry
                    .metadata
                    .dependencies
                    .iter()
                    .all(|dep| placed.contains(dep.as_str()))
            });
            if !ready {
                continue;
            }
            if let Some(entry) = slot.take() {
                placed.insert(entry.metadata.name.clone());
                ordered.push(entry);
                progressed = true;
            }
        }

        if !progressed {
            let stuck = pending
                .iter()
                .flatten()
                .map(|entry| entry.metadata.name.clone())
                .next()
                .unwrap_or_default();
            return Err(Error::plugin(stuck, "dependency cycle"));
        }
    }

    Ok(ordered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct TestPlugin {
        metadata: PluginMetadata,
    }

    #[async_trait]
    impl Plugin for TestPlugin {
        fn metadata(&self) -> &PluginMetadata {
            &self.metadata
        }
    }

    fn entry(name: &str, deps: &[&str]) -> PluginEntry {
        let mut metadata = PluginMetadata::new(name, "1.0.0");
        for dep in deps {
            metadata = metadata.depends_on(*dep);
        }
        PluginEntry {
            metadata: metadata.clone(),
            instance: Arc::new(Mutex::new(Box::new(TestPlugin { metadata }))),
        }
    }

    fn order(entries: Vec<PluginEntry>) -> Vec<String> {
        sort_by_dependencies(entries)
            .unwrap()
            .into_iter()
            .map(|e| e.metadata.name)
            .collect()
    }

    #[test]
    fn test_sort_keeps_insertion_order() {
        let names = order(vec![entry("a", &[]), entry("b", &[]), entry("c", &[])]);
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_sort_places_dependencies_first() {
        let names = order(vec![
            entry("users", &["acl"]),
            entry("acl", &[]),
            entry("workflow", &["users", "acl"]),
        ]);
        assert_eq!(names, vec!["acl", "users", "workflow"]);
    }

    #[test]
    fn test_sort_missing_dependency() {
        let err = sort_by_dependencies(vec![entry("users", &["acl"])]).err().unwrap();
        assert!(err.to_string().contains("depends on missing plugin acl"));
    }

    #[test]
    fn test_sort_cycle() {
        let err = sort_by_dependencies(vec![entry("a", &["b"]), entry("b", &["a"])])
            .err()
            .unwrap();
        assert!(err.to_string().contains("dependency cycle"));
    }

    #[test]
    fn test_duplicate_preset_rejected() {
        let manager = PluginManager::new(Vec::new());
        let preset = || {
            PluginPreset::new("acl", |_| {
                Ok(Box::new(TestPlugin {
                    metadata: PluginMetadata::new("acl", "1.0.0"),
                }) as Box<dyn Plugin>)
            })
        };

        manager.add_preset(preset()).unwrap();
        assert!(manager.add_preset(preset()).is_err());
        assert_eq!(manager.presets().len(), 1);
        assert!(!manager.has("acl"));
    }
}
