//! Plugin system
//!
//! Plugins are added to an application as presets (a factory plus options).
//! Every init of the application builds fresh instances from the presets,
//! orders them by their declared dependencies and runs their hooks:
//! `after_add` when instantiated, `before_load` and `load` during load, and
//! `install` during install.

pub mod catalog;
pub mod manager;
pub mod traits;

pub use catalog::PluginCatalog;
pub use manager::PluginManager;
pub use traits::{Plugin, PluginContext, PluginFactory, PluginMetadata, PluginPreset};
