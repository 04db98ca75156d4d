//! The application: one isolated platform instance
//!
//! An [`Application`] owns its database handle, plugin manager, middleware
//! stack, resource router and cache. Those are grouped in a runtime that is
//! rebuilt on every reload, while identity, lifecycle flags, listeners and
//! custom commands survive reloads.
//!
//! Lifecycle methods are sequential: each phase awaits its listeners before
//! moving on, and none of the interior locks is held across an await.

use crate::cache::Cache;
use crate::command::CommandHandler;
use crate::database::{Database, DatabaseConnector, SyncOptions};
use crate::events::{AppEvent, EventBus, EventKind, Listener, ListenerId};
use crate::logger::{RequestLogger, LOGGER_TAG};
use crate::maintaining::{MaintainingCommandStatus, MaintainingStatus};
use crate::plugin::{PluginCatalog, PluginManager, PluginPreset};
use crate::resource::{ActionHandler, Resourcer};
use crate::version::{check_server_version, ApplicationVersion, PLATFORM_VERSION, VERSION_COLLECTION};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::FutureExt;
use http::{Request, Response};
use nimbus_config::{AppConfig, DatabaseConfig, SupervisorConfig};
use nimbus_core::middleware::{HandlerFn, Position};
use nimbus_core::response::responses;
use nimbus_core::{Body, Error, Middleware, MiddlewareStack, Next, Result, DEFAULT_APP_NAME};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Collection created by the collection manager plugin once installed
const COLLECTIONS_COLLECTION: &str = "collections";

/// Construction options
#[derive(Debug, Clone)]
pub struct ApplicationOptions {
    /// Unique application name
    pub name: String,
    /// Database descriptor
    pub database: DatabaseConfig,
    /// Plugin presets, instantiated on every init
    pub plugins: Vec<PluginPreset>,
    /// Default language
    pub lang: String,
    /// Database authentication attempts
    pub auth_retries: u32,
    /// Delay between authentication attempts
    pub auth_retry_delay: Duration,
}

impl Default for ApplicationOptions {
    fn default() -> Self {
        Self {
            name: DEFAULT_APP_NAME.to_string(),
            database: DatabaseConfig::default(),
            plugins: Vec::new(),
            lang: "en-US".to_string(),
            auth_retries: 30,
            auth_retry_delay: Duration::from_secs(1),
        }
    }
}

impl ApplicationOptions {
    /// Options for a named application with defaults otherwise
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Options materialized from configuration
    pub fn from_config(
        app: &AppConfig,
        supervisor: &SupervisorConfig,
        catalog: &PluginCatalog,
    ) -> Result<Self> {
        Ok(Self::new(&app.name)
            .with_database(app.database.clone())
            .with_plugins(catalog.presets(&app.plugins)?)
            .with_auth_retry(supervisor.auth_retries, supervisor.auth_retry_delay))
    }

    /// Set the database descriptor
    pub fn with_database(mut self, database: DatabaseConfig) -> Self {
        self.database = database;
        self
    }

    /// Add one plugin preset
    pub fn with_plugin(mut self, preset: PluginPreset) -> Self {
        self.plugins.push(preset);
        self
    }

    /// Add plugin presets
    pub fn with_plugins(mut self, presets: Vec<PluginPreset>) -> Self {
        self.plugins.extend(presets);
        self
    }

    /// Set the default language
    pub fn with_lang(mut self, lang: impl Into<String>) -> Self {
        self.lang = lang.into();
        self
    }

    /// Set authentication retry policy
    pub fn with_auth_retry(mut self, retries: u32, delay: Duration) -> Self {
        self.auth_retries = retries;
        self.auth_retry_delay = delay;
        self
    }
}

/// Options for [`Application::load`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadOptions {
    /// Rebuild the runtime before loading
    pub reload: bool,
}

/// Options for [`Application::start`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StartOptions {
    /// Refuse to start when the database carries no install markers
    pub check_install: bool,
}

/// Options for [`Application::install`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstallOptions {
    /// Drop all data before installing
    pub clean: bool,
    /// Schema sync flags; `force` implies `clean`
    pub sync: SyncOptions,
}

/// Serialized identity of an application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppInfo {
    /// Application name
    pub app_name: String,
    /// Application name
    pub name: String,
}

/// Parts rebuilt on every init
struct Runtime {
    db: Arc<dyn Database>,
    pm: Arc<PluginManager>,
    middleware: MiddlewareStack,
    resourcer: Arc<Resourcer>,
    cache: Arc<Cache>,
}

impl Runtime {
    fn build(
        name: &str,
        database: &DatabaseConfig,
        presets: Vec<PluginPreset>,
        connector: &dyn DatabaseConnector,
    ) -> Result<Self> {
        let db = connector.open(name, database)?;

        let mut middleware = MiddlewareStack::new();
        middleware.add(LOGGER_TAG, Arc::new(RequestLogger::new(name)));

        Ok(Self {
            db,
            pm: Arc::new(PluginManager::new(presets)),
            middleware,
            resourcer: Arc::new(Resourcer::with_app_actions()),
            cache: Arc::new(Cache::new()),
        })
    }
}

/// One runnable, isolated platform instance
pub struct Application {
    name: String,
    options: ApplicationOptions,
    connector: Arc<dyn DatabaseConnector>,
    this: Weak<Application>,
    events: EventBus,
    runtime: RwLock<Runtime>,
    pub(crate) commands: DashMap<String, Arc<dyn CommandHandler>>,
    pub(crate) active_command: Mutex<Option<String>>,
    pub(crate) status_before_command: RwLock<Option<MaintainingCommandStatus>>,
    maintaining_status: RwLock<Option<MaintainingCommandStatus>>,
    maintaining_message: RwLock<String>,
    loaded: AtomicBool,
    started: AtomicBool,
    stopped: AtomicBool,
    authenticated: AtomicBool,
    maintaining: AtomicBool,
    created_at: DateTime<Utc>,
}

impl Application {
    /// Create an application; the database handle is opened lazily
    pub fn new(
        options: ApplicationOptions,
        connector: Arc<dyn DatabaseConnector>,
    ) -> Result<Arc<Self>> {
        if options.name.is_empty() {
            return Err(Error::Config("application name must not be empty".to_string()));
        }

        let runtime = Runtime::build(
            &options.name,
            &options.database,
            options.plugins.clone(),
            connector.as_ref(),
        )?;

        debug!(app = %options.name, dialect = %options.database.dialect, "Creating application");

        Ok(Arc::new_cyclic(|this| Self {
            name: options.name.clone(),
            options,
            connector,
            this: this.clone(),
            events: EventBus::default(),
            runtime: RwLock::new(runtime),
            commands: DashMap::new(),
            active_command: Mutex::new(None),
            status_before_command: RwLock::new(None),
            maintaining_status: RwLock::new(None),
            maintaining_message: RwLock::new(String::new()),
            loaded: AtomicBool::new(false),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            authenticated: AtomicBool::new(false),
            maintaining: AtomicBool::new(false),
            created_at: Utc::now(),
        }))
    }

    /// Application name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Construction options
    pub fn options(&self) -> &ApplicationOptions {
        &self.options
    }

    /// Default language
    pub fn lang(&self) -> &str {
        &self.options.lang
    }

    /// Platform version this application runs
    pub fn version_string(&self) -> &'static str {
        PLATFORM_VERSION
    }

    /// Creation time
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Strong handle to this application
    pub fn shared(&self) -> Result<Arc<Application>> {
        self.this
            .upgrade()
            .ok_or_else(|| Error::Internal(format!("application {} was dropped", self.name)))
    }

    /// `{ appName, name }`
    pub fn info(&self) -> AppInfo {
        AppInfo {
            app_name: self.name.clone(),
            name: self.name.clone(),
        }
    }

    /// Current database handle
    pub fn db(&self) -> Arc<dyn Database> {
        Arc::clone(&self.runtime.read().db)
    }

    /// Current plugin manager
    pub fn pm(&self) -> Arc<PluginManager> {
        Arc::clone(&self.runtime.read().pm)
    }

    /// Current cache
    pub fn cache(&self) -> Arc<Cache> {
        Arc::clone(&self.runtime.read().cache)
    }

    /// Current resource router
    pub fn resourcer(&self) -> Arc<Resourcer> {
        Arc::clone(&self.runtime.read().resourcer)
    }

    /// Version record in the current database
    pub fn version(&self) -> ApplicationVersion {
        ApplicationVersion::new(self.db())
    }

    /// Whether `load` completed
    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    /// Whether `start` completed and no stop happened since
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Whether `stop` ran
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Whether a command is in progress or the last one failed
    pub fn is_maintaining(&self) -> bool {
        self.maintaining.load(Ordering::SeqCst)
    }

    /// Copy of the latest maintaining status
    pub fn maintaining_status(&self) -> Option<MaintainingCommandStatus> {
        self.maintaining_status.read().clone()
    }

    /// Latest maintaining message
    pub fn maintaining_message(&self) -> String {
        self.maintaining_message.read().clone()
    }

    // Events

    /// Subscribe to an event
    pub fn on(&self, kind: EventKind, listener: Arc<dyn Listener>) -> ListenerId {
        self.events.on(kind, listener)
    }

    pub(crate) fn on_reinitializable(
        &self,
        kind: EventKind,
        listener: Arc<dyn Listener>,
    ) -> ListenerId {
        self.events.on_reinitializable(kind, listener)
    }

    /// Unsubscribe; returns whether the listener existed
    pub fn off(&self, kind: EventKind, id: ListenerId) -> bool {
        self.events.off(kind, id)
    }

    /// Number of listeners for an event
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.events.listener_count(kind)
    }

    /// Drop listeners registered by plugins through their context
    pub fn re_init_events(&self) -> usize {
        self.events.remove_reinitializable()
    }

    async fn emit(&self, event: AppEvent) -> Result<()> {
        self.events.emit(self, &event).await
    }

    /// Record a new maintaining status and notify listeners
    pub async fn set_maintaining(&self, status: MaintainingCommandStatus) {
        *self.maintaining_status.write() = Some(status.clone());
        self.maintaining
            .store(status.status != MaintainingStatus::CommandEnd, Ordering::SeqCst);

        debug!(app = %self.name, command = %status.command.name, status = %status.status, "Maintaining status changed");

        if let Err(e) = self.emit(AppEvent::Maintaining(status)).await {
            warn!(app = %self.name, error = %e, "Maintaining listener failed");
        }
    }

    /// Record a new maintaining message and notify listeners
    pub async fn set_maintaining_message(&self, message: impl Into<String>) {
        let message = message.into();
        *self.maintaining_message.write() = message.clone();

        let event = AppEvent::MaintainingMessageChanged {
            message,
            maintaining_status: self.maintaining_status(),
        };
        if let Err(e) = self.emit(event).await {
            warn!(app = %self.name, error = %e, "Maintaining message listener failed");
        }
    }

    // Plugins, middleware, resources

    /// Add a plugin preset; refused once the application was loaded
    pub fn add_preset(&self, preset: PluginPreset) -> Result<()> {
        if self.is_loaded() {
            return Err(Error::AddPreset(preset.name));
        }
        self.pm().add_preset(preset)
    }

    /// Append a tagged middleware
    pub fn use_middleware(&self, tag: impl Into<String>, middleware: Arc<dyn Middleware>) {
        self.runtime.write().middleware.add(tag, middleware);
    }

    /// Insert a tagged middleware relative to another tag
    pub fn use_middleware_at(
        &self,
        tag: impl Into<String>,
        middleware: Arc<dyn Middleware>,
        position: Position,
    ) -> Result<()> {
        self.runtime
            .write()
            .middleware
            .add_at(tag, middleware, position)
    }

    /// Tags of the current middleware stack in order
    pub fn middleware_tags(&self) -> Vec<String> {
        self.runtime
            .read()
            .middleware
            .tags()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    /// Register a `resource:action` handler
    pub fn register_action(&self, resource: &str, action: &str, handler: Arc<dyn ActionHandler>) {
        self.resourcer().register(resource, action, handler);
    }

    /// Run a request through the middleware stack and the resource router
    pub async fn handle(&self, req: Request<Body>) -> Result<Response<Body>> {
        let (chain, resourcer) = {
            let runtime = self.runtime.read();
            (runtime.middleware.compose(), Arc::clone(&runtime.resourcer))
        };
        let app = self.shared()?;

        let handler: HandlerFn = Arc::new(move |req: Request<Body>| {
            let app = Arc::clone(&app);
            let resourcer = Arc::clone(&resourcer);
            async move {
                match resourcer.dispatch(&app, req).await {
                    Ok(response) => Ok(response),
                    Err(e) => responses::from_error(&e, false),
                }
            }
            .boxed()
        });

        Next::with_handler(chain, handler).run(req).await
    }

    // Lifecycle

    /// Authenticate the database once: auth with retry, server version
    /// check, then prepare
    pub async fn authenticate(&self) -> Result<()> {
        if self.authenticated.load(Ordering::SeqCst) {
            return Ok(());
        }

        let db = self.db();
        let retries = self.options.auth_retries.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match db.auth().await {
                Ok(()) => break,
                Err(e) if attempt < retries => {
                    warn!(app = %self.name, attempt, retries, error = %e, "Database authentication failed, retrying");
                    tokio::time::sleep(self.options.auth_retry_delay).await;
                }
                Err(e) => {
                    error!(app = %self.name, attempt, error = %e, "Database authentication failed");
                    return Err(e);
                }
            }
        }

        let server_version = db.server_version().await?;
        check_server_version(db.dialect(), &server_version)?;
        db.prepare().await?;

        self.authenticated.store(true, Ordering::SeqCst);
        debug!(app = %self.name, dialect = %db.dialect(), version = %server_version, "Database authenticated");
        Ok(())
    }

    /// Whether install markers exist in the database
    pub async fn is_installed(&self) -> Result<bool> {
        let db = self.db();
        Ok(db.collection_exists(VERSION_COLLECTION).await?
            || db.collection_exists(COLLECTIONS_COLLECTION).await?)
    }

    /// Rebuild the runtime, returning the previous database handle
    fn reinit(&self) -> Result<Arc<dyn Database>> {
        let removed = self.re_init_events();
        let presets = self.pm().presets();

        let runtime = Runtime::build(
            &self.name,
            &self.options.database,
            presets,
            self.connector.as_ref(),
        )?;
        let previous = std::mem::replace(&mut *self.runtime.write(), runtime);

        debug!(app = %self.name, removed_listeners = removed, "Runtime rebuilt");
        Ok(previous.db)
    }

    /// Initialize plugins and run load hooks; no-op once loaded unless
    /// `options.reload`
    pub async fn load(&self, options: LoadOptions) -> Result<()> {
        if self.is_loaded() {
            return Ok(());
        }

        if options.reload {
            self.set_maintaining_message("app reload").await;
            info!(app = %self.name, "Reloading application");

            let previous = self.reinit()?;
            if !previous.is_closed() {
                if let Err(e) = previous.close().await {
                    warn!(app = %self.name, error = %e, "Failed to close previous database handle");
                }
            }
        }

        self.set_maintaining_message("init plugins").await;
        let pm = self.pm();
        pm.init_plugins(self).await?;

        self.set_maintaining_message("start load").await;

        self.set_maintaining_message("emit beforeLoad").await;
        self.emit(AppEvent::BeforeLoad).await?;

        pm.load(self).await?;

        self.set_maintaining_message("emit afterLoad").await;
        self.emit(AppEvent::AfterLoad).await?;

        self.loaded.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Rebuild the runtime and load again
    pub async fn reload(&self) -> Result<()> {
        debug!(app = %self.name, "Start reload");
        self.loaded.store(false, Ordering::SeqCst);

        self.load(LoadOptions { reload: true }).await?;

        self.set_maintaining_message("emit afterReload").await;
        self.emit(AppEvent::AfterReload).await?;

        debug!(app = %self.name, "Finish reload");
        Ok(())
    }

    /// Start the application; no-op once started
    pub async fn start(&self, options: StartOptions) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let result = self.start_inner(options).await;
        if result.is_err() {
            self.started.store(false, Ordering::SeqCst);
        }
        result
    }

    async fn start_inner(&self, options: StartOptions) -> Result<()> {
        if options.check_install && !self.is_installed().await? {
            return Err(Error::ApplicationNotInstalled(format!(
                "Application {} is not installed, please run the install command first",
                self.name
            )));
        }

        self.set_maintaining_message("starting app...").await;

        let db = self.db();
        if db.is_closed() {
            db.reconnect().await?;
        }

        self.set_maintaining_message("emit beforeStart").await;
        self.emit(AppEvent::BeforeStart).await?;

        self.set_maintaining_message("emit afterStart").await;
        self.emit(AppEvent::AfterStart).await?;

        self.emit(AppEvent::Started {
            maintaining_status: self.maintaining_status(),
        })
        .await?;

        self.stopped.store(false, Ordering::SeqCst);
        info!(app = %self.name, "Application started");
        Ok(())
    }

    /// Restart the application with a reload; no-op unless started
    pub async fn restart(&self, options: StartOptions) -> Result<()> {
        if !self.is_started() {
            return Ok(());
        }

        self.started.store(false, Ordering::SeqCst);
        self.emit(AppEvent::BeforeStop).await?;
        self.reload().await?;
        self.start(options).await?;
        self.emit(AppEvent::Restarted).await?;

        info!(app = %self.name, "Application restarted");
        Ok(())
    }

    /// Restart when started, else reload
    pub async fn try_reload_or_restart(&self) -> Result<()> {
        if self.is_started() {
            self.restart(StartOptions::default()).await
        } else {
            self.reload().await
        }
    }

    /// Stop the application and close its database
    pub async fn stop(&self) -> Result<()> {
        debug!(app = %self.name, "Stop app");
        self.set_maintaining_message("stopping app...").await;

        if self.is_stopped() {
            warn!(app = %self.name, "Application already stopped");
            return Ok(());
        }

        self.emit(AppEvent::BeforeStop).await?;

        let db = self.db();
        if !db.is_closed() {
            info!(app = %self.name, "Closing database");
            if let Err(e) = db.close().await {
                error!(app = %self.name, error = %e, "Failed to close database");
            }
        }

        self.emit(AppEvent::AfterStop).await?;

        self.stopped.store(true, Ordering::SeqCst);
        self.started.store(false, Ordering::SeqCst);
        info!(app = %self.name, "Application stopped");
        Ok(())
    }

    /// Stop the application and emit teardown events
    pub async fn destroy(&self) -> Result<()> {
        debug!(app = %self.name, "Start destroy app");
        self.set_maintaining_message("destroying app...").await;

        self.emit(AppEvent::BeforeDestroy).await?;
        self.stop().await?;

        debug!(app = %self.name, "Emit afterDestroy");
        self.emit(AppEvent::AfterDestroy).await?;

        debug!(app = %self.name, "Finish destroy app");
        Ok(())
    }

    /// Install plugins and record the platform version
    pub async fn install(&self, options: InstallOptions) -> Result<()> {
        self.set_maintaining_message("installing app...").await;
        debug!(app = %self.name, dialect = %self.db().dialect(), "Installing");

        if options.clean || options.sync.force {
            debug!(app = %self.name, "Truncate database");
            self.db().clean(true).await?;
            self.reload().await?;
        } else if self.is_installed().await? {
            warn!(app = %self.name, "Application is installed");
            return Ok(());
        }

        self.set_maintaining_message("call beforeInstall hook...").await;
        self.emit(AppEvent::BeforeInstall).await?;

        self.pm().install(self, &options).await?;
        self.version().update().await?;

        self.set_maintaining_message("call afterInstall hook...").await;
        self.emit(AppEvent::AfterInstall).await?;
        info!(app = %self.name, version = PLATFORM_VERSION, "Application installed");

        let recovering = self
            .status_before_command
            .read()
            .as_ref()
            .is_some_and(MaintainingCommandStatus::has_error);
        if recovering {
            return Ok(());
        }

        if self.is_started() {
            self.restart(StartOptions::default()).await?;
        }

        Ok(())
    }

    /// Run pending migrations, sync the schema and record the version
    pub async fn upgrade(&self) -> Result<()> {
        self.emit(AppEvent::BeforeUpgrade).await?;

        let db = self.db();
        let migrations = db.migrate_up().await?;
        db.sync(SyncOptions {
            force: false,
            alter: true,
            drop: false,
        })
        .await?;
        self.version().update().await?;

        self.emit(AppEvent::AfterUpgrade).await?;
        info!(app = %self.name, version = PLATFORM_VERSION, migrations = migrations.len(), "Application upgraded");

        if self.is_started() {
            self.restart(StartOptions::default()).await?;
        }

        Ok(())
    }
}

impl fmt::Debug for Application {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Application")
            .field("name", &self.name)
            .field("loaded", &self.is_loaded())
            .field("started", &self.is_started())
            .field("stopped", &self.is_stopped())
            .field("maintaining", &self.is_maintaining())
            .finish_non_exhaustive()
    }
}
