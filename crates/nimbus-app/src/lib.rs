//! # Nimbus Application
//!
//! One runnable, isolated instance of the platform:
//! - Lifecycle (load, start, stop, reload, restart, destroy, install, upgrade)
//! - Maintaining status tracking for every command run
//! - Async lifecycle events with reinitializable plugin listeners
//! - Plugin presets with dependency-ordered hooks
//! - Database collaborator trait and an in-memory implementation
//! - Built-in `app` resource behind a tagged middleware stack

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod application;
pub mod cache;
pub mod command;
pub mod database;
pub mod events;
pub mod logger;
pub mod maintaining;
pub mod plugin;
pub mod resource;
pub mod version;

pub use application::{
    AppInfo, Application, ApplicationOptions, InstallOptions, LoadOptions, StartOptions,
};
pub use cache::Cache;
pub use command::{AppCommand, CommandHandler, RunOptions};
pub use database::{
    Database, DatabaseConnector, MemoryConnector, MemoryDatabase, MemoryStore, SyncOptions,
};
pub use events::{listener_fn, AppEvent, EventKind, Listener, ListenerId};
pub use logger::RequestLogger;
pub use maintaining::{CommandInfo, MaintainingCommandStatus, MaintainingStatus};
pub use plugin::{
    Plugin, PluginCatalog, PluginContext, PluginFactory, PluginManager, PluginMetadata,
    PluginPreset,
};
pub use resource::{ActionHandler, Resourcer};
pub use version::{check_server_version, ApplicationVersion, PLATFORM_VERSION, VERSION_COLLECTION};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::application::{Application, ApplicationOptions, InstallOptions, StartOptions};
    pub use crate::command::{AppCommand, CommandHandler, RunOptions};
    pub use crate::database::{Database, DatabaseConnector, MemoryConnector};
    pub use crate::events::{listener_fn, AppEvent, EventKind, Listener};
    pub use crate::maintaining::{MaintainingCommandStatus, MaintainingStatus};
    pub use crate::plugin::{Plugin, PluginContext, PluginMetadata, PluginPreset};
}
