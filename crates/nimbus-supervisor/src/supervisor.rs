//! Application supervisor
//!
//! Maps application names to their [`Application`] and [`FsmInterpreter`],
//! bootstraps unknown names through a pluggable [`AppBootstrapper`] and
//! publishes lifecycle notifications. Concurrent bootstraps of one name share
//! a single in-flight attempt, which runs on its own task so callers that
//! give up (timeouts, dropped requests) never cancel it halfway.

use crate::events::{StatusChanged, Subscription, SupervisorEvents, WorkingMessageChanged};
use crate::fsm::{AppState, FsmEvent, FsmInterpreter};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use nimbus_app::{listener_fn, AppEvent, Application, EventKind, ListenerId, MaintainingStatus};
use nimbus_config::SupervisorConfig;
use nimbus_core::{AppErrorInfo, Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, warn};

/// Builds and registers the application for a name on demand
#[async_trait]
pub trait AppBootstrapper: Send + Sync {
    /// Create the application called `name` and add it to `supervisor`;
    /// leaving it unregistered means the name does not exist
    async fn bootstrap(&self, supervisor: &AppSupervisor, name: &str) -> Result<()>;
}

/// Options for [`AppSupervisor::get_app`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GetAppOptions {
    /// Only look up registered applications
    pub without_bootstrap: bool,
}

struct AppEntry {
    app: Arc<Application>,
    fsm: Arc<FsmInterpreter>,
    listeners: Vec<(EventKind, ListenerId)>,
}

impl AppEntry {
    fn detach_listeners(&self) {
        for (kind, id) in &self.listeners {
            self.app.off(*kind, *id);
        }
    }
}

type BootFuture = Shared<BoxFuture<'static, AppState>>;

struct SupervisorInner {
    config: SupervisorConfig,
    apps: DashMap<String, AppEntry>,
    statuses: DashMap<String, AppState>,
    /// In-flight attempts keyed by name, tagged with their attempt id
    booting: Mutex<HashMap<String, (u64, BootFuture)>>,
    next_attempt: AtomicU64,
    bootstrapper: parking_lot::RwLock<Option<Arc<dyn AppBootstrapper>>>,
    events: Arc<SupervisorEvents>,
    accepting: AtomicBool,
}

impl SupervisorInner {
    fn mark_not_found(&self, name: &str) {
        self.statuses.insert(name.to_string(), AppState::NotFound);
        self.events.status_changed(StatusChanged {
            app: name.to_string(),
            state: AppState::NotFound,
            error: None,
        });
    }

    /// Drop the registry entry of `app` if it is still the registered one
    fn detach(&self, name: &str, app: &Arc<Application>) -> bool {
        let removed = self
            .apps
            .remove_if(name, |_, entry| Arc::ptr_eq(&entry.app, app));

        let Some((_, entry)) = removed else {
            return false;
        };

        entry.detach_listeners();
        self.statuses.insert(name.to_string(), AppState::NotFound);
        entry.fsm.apply(FsmEvent::Destroy);
        info!(app = %name, "Application removed from supervisor");
        true
    }
}

/// Process-wide registry and lifecycle coordinator
///
/// Cloning is cheap; clones share the same registry.
#[derive(Clone)]
pub struct AppSupervisor {
    inner: Arc<SupervisorInner>,
}

impl AppSupervisor {
    /// Create a supervisor
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            inner: Arc::new(SupervisorInner {
                config,
                apps: DashMap::new(),
                statuses: DashMap::new(),
                booting: Mutex::new(HashMap::new()),
                next_attempt: AtomicU64::new(0),
                bootstrapper: parking_lot::RwLock::new(None),
                events: Arc::new(SupervisorEvents::default()),
                accepting: AtomicBool::new(true),
            }),
        }
    }

    /// Supervisor configuration
    pub fn config(&self) -> &SupervisorConfig {
        &self.inner.config
    }

    /// Accept bootstraps again after a shutdown
    pub fn init(&self) {
        self.inner.accepting.store(true, Ordering::SeqCst);
        info!(apps = self.inner.apps.len(), "Supervisor initialized");
    }

    /// Refuse new bootstraps and destroy every application
    pub async fn shutdown(&self) {
        self.inner.accepting.store(false, Ordering::SeqCst);
        info!(apps = self.inner.apps.len(), "Supervisor shutting down");
        self.destroy().await;
    }

    /// Install the hook that creates applications on demand
    pub fn set_app_bootstrapper(&self, bootstrapper: Arc<dyn AppBootstrapper>) {
        *self.inner.bootstrapper.write() = Some(bootstrapper);
    }

    /// Subscribe to lifecycle state changes
    pub fn on_status_changed<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&StatusChanged) + Send + Sync + 'static,
    {
        self.inner.events.on_status_changed(Arc::new(handler))
    }

    /// Subscribe to maintaining message changes
    pub fn on_working_message_changed<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&WorkingMessageChanged) + Send + Sync + 'static,
    {
        self.inner.events.on_working_message_changed(Arc::new(handler))
    }

    /// Whether an application is registered under `name`
    pub fn has_app(&self, name: &str) -> bool {
        self.inner.apps.contains_key(name)
    }

    /// Registered application names, sorted
    pub fn app_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .apps
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    /// Registered application, without bootstrapping
    pub fn app(&self, name: &str) -> Option<Arc<Application>> {
        self.inner
            .apps
            .get(name)
            .map(|entry| Arc::clone(&entry.app))
    }

    /// State machine of a registered application
    pub fn fsm(&self, name: &str) -> Option<Arc<FsmInterpreter>> {
        self.inner
            .apps
            .get(name)
            .map(|entry| Arc::clone(&entry.fsm))
    }

    /// Known state of `name`; `None` when the name was never seen
    pub fn app_status(&self, name: &str) -> Option<AppState> {
        if let Some(fsm) = self.fsm(name) {
            return Some(fsm.state());
        }
        self.inner.statuses.get(name).map(|state| *state)
    }

    /// Error kept by the state machine of `name`
    pub fn app_error(&self, name: &str) -> Option<AppErrorInfo> {
        self.fsm(name).and_then(|fsm| fsm.last_error())
    }

    /// States of every known name
    pub fn statuses(&self) -> HashMap<String, AppState> {
        let mut statuses: HashMap<String, AppState> = self
            .inner
            .statuses
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        for entry in self.inner.apps.iter() {
            statuses.insert(entry.key().clone(), entry.fsm.state());
        }
        statuses
    }

    /// Register an application
    ///
    /// Re-adding the registered instance is a no-op; a different instance
    /// under a taken name is refused.
    pub fn add_app(&self, app: Arc<Application>) -> Result<()> {
        let name = app.name().to_string();

        match self.inner.apps.entry(name.clone()) {
            Entry::Occupied(existing) => {
                if Arc::ptr_eq(&existing.get().app, &app) {
                    return Ok(());
                }
                return Err(Error::AppAlreadyExists(name));
            }
            Entry::Vacant(slot) => {
                let fsm = Arc::new(FsmInterpreter::new(
                    Arc::clone(&app),
                    Arc::clone(&self.inner.events),
                ));
                let listeners = self.attach_listeners(&app, &fsm);
                slot.insert(AppEntry {
                    app,
                    fsm,
                    listeners,
                });
            }
        }

        self.inner.statuses.remove(&name);
        info!(app = %name, "Application added to supervisor");
        self.inner.events.status_changed(StatusChanged {
            app: name,
            state: AppState::Initialized,
            error: None,
        });
        Ok(())
    }

    fn attach_listeners(
        &self,
        app: &Arc<Application>,
        fsm: &Arc<FsmInterpreter>,
    ) -> Vec<(EventKind, ListenerId)> {
        let mut listeners = Vec::new();

        let weak_fsm = Arc::downgrade(fsm);
        listeners.push((
            EventKind::Maintaining,
            app.on(
                EventKind::Maintaining,
                listener_fn(move |app, event| {
                    let (Some(fsm), AppEvent::Maintaining(status)) = (weak_fsm.upgrade(), event)
                    else {
                        return;
                    };
                    match status.status {
                        MaintainingStatus::CommandBegin => {
                            fsm.apply(FsmEvent::CommandBegin);
                        }
                        MaintainingStatus::CommandRunning => {}
                        MaintainingStatus::CommandEnd => {
                            fsm.apply(FsmEvent::CommandEnd {
                                started: app.is_started(),
                            });
                        }
                        MaintainingStatus::CommandError => {
                            let error = status.error.clone().unwrap_or_else(|| {
                                AppErrorInfo::new("COMMAND_ERROR", "command failed")
                            });
                            fsm.apply(FsmEvent::CommandFailed(error));
                        }
                    }
                }),
            ),
        ));

        let events = Arc::downgrade(&self.inner.events);
        listeners.push((
            EventKind::MaintainingMessageChanged,
            app.on(
                EventKind::MaintainingMessageChanged,
                listener_fn(move |app, event| {
                    let (
                        Some(events),
                        AppEvent::MaintainingMessageChanged {
                            message,
                            maintaining_status,
                        },
                    ) = (events.upgrade(), event)
                    else {
                        return;
                    };
                    events.working_message_changed(WorkingMessageChanged {
                        app: app.name().to_string(),
                        message: message.clone(),
                        status: maintaining_status.clone(),
                    });
                }),
            ),
        ));

        let weak_fsm = Arc::downgrade(fsm);
        listeners.push((
            EventKind::Started,
            app.on(
                EventKind::Started,
                listener_fn(move |_, _| {
                    if let Some(fsm) = weak_fsm.upgrade() {
                        fsm.apply(FsmEvent::Started);
                    }
                }),
            ),
        ));

        let weak_fsm = Arc::downgrade(fsm);
        listeners.push((
            EventKind::AfterStop,
            app.on(
                EventKind::AfterStop,
                listener_fn(move |_, _| {
                    if let Some(fsm) = weak_fsm.upgrade() {
                        fsm.apply(FsmEvent::Stop);
                    }
                }),
            ),
        ));

        let inner: Weak<SupervisorInner> = Arc::downgrade(&self.inner);
        listeners.push((
            EventKind::AfterDestroy,
            app.on(
                EventKind::AfterDestroy,
                listener_fn(move |app, _| {
                    let Some(inner) = inner.upgrade() else {
                        return;
                    };
                    if let Ok(app) = app.shared() {
                        inner.detach(app.name(), &app);
                    }
                }),
            ),
        ));

        listeners
    }

    /// Look up an application, bootstrapping it when absent
    ///
    /// Waits for the boot to settle, bounded by the configured boot timeout.
    pub async fn get_app(
        &self,
        name: &str,
        options: GetAppOptions,
    ) -> Result<Option<Arc<Application>>> {
        if let Some(app) = self.app(name) {
            return Ok(Some(app));
        }
        if options.without_bootstrap {
            return Ok(None);
        }

        let timeout = self.inner.config.boot_timeout;
        tokio::time::timeout(timeout, self.bootstrap_app(name))
            .await
            .map_err(|_| Error::BootTimeout {
                app: name.to_string(),
                timeout,
            })?;

        Ok(self.app(name))
    }

    /// Bootstrap `name`, joining an attempt already in flight
    ///
    /// Returns the state the attempt settled in.
    pub async fn bootstrap_app(&self, name: &str) -> AppState {
        let attempt = {
            let mut booting = self.inner.booting.lock();
            match booting.get(name) {
                Some((_, attempt)) => attempt.clone(),
                None => {
                    let id = self.inner.next_attempt.fetch_add(1, Ordering::Relaxed);
                    let attempt = self.spawn_bootstrap(name, id);
                    booting.insert(name.to_string(), (id, attempt.clone()));
                    attempt
                }
            }
        };

        attempt.await
    }

    fn spawn_bootstrap(&self, name: &str, id: u64) -> BootFuture {
        let supervisor = self.clone();
        let name = name.to_string();

        let handle = tokio::spawn(async move {
            let state = supervisor.run_bootstrap(&name).await;

            // a later attempt may have replaced this one after `destroy`
            let mut booting = supervisor.inner.booting.lock();
            if booting.get(&name).is_some_and(|(current, _)| *current == id) {
                booting.remove(&name);
            }
            state
        });

        async move {
            match handle.await {
                Ok(state) => state,
                Err(e) => {
                    error!(error = %e, "Bootstrap task failed");
                    AppState::Error
                }
            }
        }
        .boxed()
        .shared()
    }

    async fn run_bootstrap(&self, name: &str) -> AppState {
        if let Some(fsm) = self.fsm(name) {
            return self.settle(&fsm).await;
        }

        if !self.inner.accepting.load(Ordering::SeqCst) {
            debug!(app = %name, "Supervisor shut down, not bootstrapping");
            return AppState::NotFound;
        }

        let bootstrapper = self.inner.bootstrapper.read().clone();
        if let Some(bootstrapper) = bootstrapper {
            if self.app_status(name) != Some(AppState::NotFound) {
                self.inner
                    .statuses
                    .insert(name.to_string(), AppState::Initializing);
            }

            debug!(app = %name, "Bootstrapping application");
            if let Err(e) = bootstrapper.bootstrap(self, name).await {
                warn!(app = %name, error = %e, "Application bootstrapper failed");
            }
        }

        match self.fsm(name) {
            Some(fsm) => self.settle(&fsm).await,
            None => {
                debug!(app = %name, "No application found");
                self.inner.mark_not_found(name);
                AppState::NotFound
            }
        }
    }

    async fn settle(&self, fsm: &FsmInterpreter) -> AppState {
        fsm.settled(self.inner.config.boot_timeout)
            .await
            .unwrap_or_else(|| fsm.state())
    }

    /// Destroy and remove one application
    pub async fn remove_app(&self, name: &str) -> Result<()> {
        let Some(app) = self.app(name) else {
            return Ok(());
        };

        let result = app.destroy().await;
        if let Err(e) = &result {
            error!(app = %name, error = %e, "Failed to destroy application");
            release(&app).await;
        }

        self.inner.detach(name, &app);
        result
    }

    /// Destroy every application and forget every known name
    pub async fn destroy(&self) {
        for name in self.app_names() {
            // already logged by remove_app
            let _ = self.remove_app(&name).await;
        }
        self.inner.statuses.clear();
        self.inner.booting.lock().clear();
    }
}

/// Stop an application whose teardown failed and make sure its database is closed
async fn release(app: &Application) {
    if let Err(e) = app.stop().await {
        warn!(app = %app.name(), error = %e, "Failed to stop application");
    }

    let db = app.db();
    if !db.is_closed() {
        if let Err(e) = db.close().await {
            warn!(app = %app.name(), error = %e, "Failed to close database");
        }
    }
}

impl Default for AppSupervisor {
    fn default() -> Self {
        Self::new(SupervisorConfig::default())
    }
}

impl fmt::Debug for AppSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppSupervisor")
            .field("apps", &self.app_names())
            .field("events", &self.inner.events)
            .field("accepting", &self.inner.accepting.load(Ordering::SeqCst))
            .finish()
    }
}
