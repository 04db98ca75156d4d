//! Per-application lifecycle state machine
//!
//! [`transition`] is a pure, total function over (state, event). The
//! [`FsmInterpreter`] owns the current state of one application, keeps the
//! last error, publishes every change and drives the boot sequence when it
//! receives a start event.

use crate::events::{StatusChanged, SupervisorEvents};
use nimbus_app::{Application, LoadOptions, StartOptions};
use nimbus_core::{AppErrorInfo, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Lifecycle state of one application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppState {
    /// No application is known under the name
    NotFound,
    /// Booting
    Initializing,
    /// Registered but never started
    Initialized,
    /// Serving requests
    Running,
    /// A command is running
    Commanding,
    /// Boot or command failed
    Error,
    /// Stopped
    Stopped,
}

impl AppState {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            AppState::NotFound => "not_found",
            AppState::Initializing => "initializing",
            AppState::Initialized => "initialized",
            AppState::Running => "running",
            AppState::Commanding => "commanding",
            AppState::Error => "error",
            AppState::Stopped => "stopped",
        }
    }

    /// Whether boot or command activity is in progress
    pub fn is_transient(&self) -> bool {
        matches!(self, AppState::Initializing | AppState::Commanding)
    }
}

impl fmt::Display for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input of the state machine
#[derive(Debug, Clone, PartialEq)]
pub enum FsmEvent {
    /// Boot the application
    Start {
        /// Refuse to start an uninstalled application
        check_install: bool,
    },
    /// Boot sequence completed
    Booted,
    /// Boot sequence failed
    BootFailed(AppErrorInfo),
    /// The application reported it started
    Started,
    /// A command began
    CommandBegin,
    /// A command completed
    CommandEnd {
        /// Whether the application is started afterwards
        started: bool,
    },
    /// A command failed
    CommandFailed(AppErrorInfo),
    /// The application stopped
    Stop,
    /// The application was destroyed
    Destroy,
}

impl FsmEvent {
    fn error(&self) -> Option<&AppErrorInfo> {
        match self {
            FsmEvent::BootFailed(error) | FsmEvent::CommandFailed(error) => Some(error),
            _ => None,
        }
    }
}

/// Next state for `event` in `state`; unhandled pairs keep the state
pub fn transition(state: AppState, event: &FsmEvent) -> AppState {
    use AppState::*;

    match (state, event) {
        (_, FsmEvent::Destroy) => NotFound,
        (NotFound, _) => match event {
            FsmEvent::Start { .. } => Initializing,
            _ => NotFound,
        },

        (Initialized | Stopped | Error, FsmEvent::Start { .. }) => Initializing,
        (Initializing, FsmEvent::Booted) => Running,
        (Initializing, FsmEvent::BootFailed(_)) => Error,

        (Initializing | Initialized | Stopped | Error, FsmEvent::Started) => Running,

        (Running | Error | Initialized | Stopped, FsmEvent::CommandBegin) => Commanding,
        (Commanding, FsmEvent::CommandEnd { started: true }) => Running,
        (Commanding, FsmEvent::CommandEnd { started: false }) => Initialized,
        (_, FsmEvent::CommandFailed(_)) => Error,

        (_, FsmEvent::Stop) => Stopped,

        (state, _) => state,
    }
}

/// State machine instance bound to one application
pub struct FsmInterpreter {
    app: Arc<Application>,
    state: watch::Sender<AppState>,
    last_error: RwLock<Option<AppErrorInfo>>,
    events: Arc<SupervisorEvents>,
}

impl FsmInterpreter {
    pub(crate) fn new(app: Arc<Application>, events: Arc<SupervisorEvents>) -> Self {
        let (state, _) = watch::channel(AppState::Initialized);
        Self {
            app,
            state,
            last_error: RwLock::new(None),
            events,
        }
    }

    /// Application this machine drives
    pub fn app(&self) -> &Arc<Application> {
        &self.app
    }

    /// Current state
    pub fn state(&self) -> AppState {
        *self.state.borrow()
    }

    /// Last error, kept until replaced or the machine reaches `running`
    pub fn last_error(&self) -> Option<AppErrorInfo> {
        self.last_error.read().clone()
    }

    /// Apply an event without side effects beyond publishing the change
    pub fn apply(&self, event: FsmEvent) -> AppState {
        self.apply_inner(&event).1
    }

    fn apply_inner(&self, event: &FsmEvent) -> (AppState, AppState) {
        let mut previous = AppState::NotFound;
        let mut next = AppState::NotFound;

        if let Some(error) = event.error() {
            *self.last_error.write() = Some(error.clone());
        }

        self.state.send_if_modified(|state| {
            previous = *state;
            next = transition(previous, event);
            *state = next;
            previous != next
        });

        if next == AppState::Running {
            *self.last_error.write() = None;
        }

        if previous != next || event.error().is_some() {
            debug!(app = %self.app.name(), from = %previous, to = %next, "Application state changed");
            self.events.status_changed(StatusChanged {
                app: self.app.name().to_string(),
                state: next,
                error: self.last_error(),
            });
        }

        (previous, next)
    }

    /// Apply an event; a start event that moves the machine into
    /// `initializing` also runs the boot sequence before returning
    pub async fn send(&self, event: FsmEvent) -> AppState {
        let check_install = match &event {
            FsmEvent::Start { check_install } => Some(*check_install),
            _ => None,
        };

        let (previous, next) = self.apply_inner(&event);

        match check_install {
            Some(check_install)
                if previous != AppState::Initializing && next == AppState::Initializing =>
            {
                self.boot(check_install).await
            }
            _ => next,
        }
    }

    async fn boot(&self, check_install: bool) -> AppState {
        match self.run_boot(check_install).await {
            Ok(()) => self.apply(FsmEvent::Booted),
            Err(e) => {
                warn!(app = %self.app.name(), error = %e, "Application failed to boot");
                self.apply(FsmEvent::BootFailed(e.to_info()))
            }
        }
    }

    async fn run_boot(&self, check_install: bool) -> Result<()> {
        self.app.authenticate().await?;
        self.app.load(LoadOptions::default()).await?;
        self.app.start(StartOptions { check_install }).await
    }

    /// Wait until the state is no longer transient, bounded by `timeout`;
    /// returns `None` on timeout
    pub async fn settled(&self, timeout: Duration) -> Option<AppState> {
        let mut receiver = self.state.subscribe();
        let waited = tokio::time::timeout(
            timeout,
            receiver.wait_for(|state| !state.is_transient()),
        )
        .await;

        match waited {
            Ok(Ok(state)) => Some(*state),
            // sender lives as long as self
            Ok(Err(_)) => Some(self.state()),
            Err(_) => None,
        }
    }
}

impl fmt::Debug for FsmInterpreter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FsmInterpreter")
            .field("app", &self.app.name())
            .field("state", &self.state())
            .field("last_error", &self.last_error())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_app::{ApplicationOptions, InstallOptions, MemoryConnector};

    fn error() -> AppErrorInfo {
        AppErrorInfo::new("APPLICATION_NOT_INSTALL", "not installed")
    }

    const ALL: [AppState; 7] = [
        AppState::NotFound,
        AppState::Initializing,
        AppState::Initialized,
        AppState::Running,
        AppState::Commanding,
        AppState::Error,
        AppState::Stopped,
    ];

    #[test]
    fn test_state_names() {
        assert_eq!(AppState::NotFound.to_string(), "not_found");
        assert_eq!(AppState::Initializing.to_string(), "initializing");
        assert_eq!(AppState::Error.to_string(), "error");
    }

    #[test]
    fn test_start_transitions() {
        let start = FsmEvent::Start {
            check_install: true,
        };
        for state in [
            AppState::NotFound,
            AppState::Initialized,
            AppState::Stopped,
            AppState::Error,
        ] {
            assert_eq!(transition(state, &start), AppState::Initializing);
        }
        assert_eq!(transition(AppState::Running, &start), AppState::Running);
        assert_eq!(transition(AppState::Commanding, &start), AppState::Commanding);
    }

    #[test]
    fn test_boot_outcomes() {
        assert_eq!(
            transition(AppState::Initializing, &FsmEvent::Booted),
            AppState::Running
        );
        assert_eq!(
            transition(AppState::Initializing, &FsmEvent::BootFailed(error())),
            AppState::Error
        );
        assert_eq!(transition(AppState::Stopped, &FsmEvent::Booted), AppState::Stopped);
    }

    #[test]
    fn test_command_transitions() {
        assert_eq!(
            transition(AppState::Running, &FsmEvent::CommandBegin),
            AppState::Commanding
        );
        assert_eq!(
            transition(AppState::Commanding, &FsmEvent::CommandEnd { started: true }),
            AppState::Running
        );
        assert_eq!(
            transition(AppState::Commanding, &FsmEvent::CommandEnd { started: false }),
            AppState::Initialized
        );
        assert_eq!(
            transition(AppState::Commanding, &FsmEvent::CommandFailed(error())),
            AppState::Error
        );
        assert_eq!(
            transition(AppState::Commanding, &FsmEvent::Started),
            AppState::Commanding
        );
    }

    #[test]
    fn test_destroy_from_every_state() {
        for state in ALL {
            assert_eq!(transition(state, &FsmEvent::Destroy), AppState::NotFound);
        }
    }

    #[test]
    fn test_not_found_only_leaves_on_start() {
        for event in [
            FsmEvent::Booted,
            FsmEvent::Started,
            FsmEvent::CommandBegin,
            FsmEvent::CommandFailed(error()),
            FsmEvent::Stop,
        ] {
            assert_eq!(transition(AppState::NotFound, &event), AppState::NotFound);
        }
    }

    fn interpreter() -> FsmInterpreter {
        let app = Application::new(
            ApplicationOptions::new("main"),
            Arc::new(MemoryConnector::new()),
        )
        .unwrap();
        FsmInterpreter::new(app, Arc::new(SupervisorEvents::default()))
    }

    #[tokio::test]
    async fn test_boot_failure_keeps_error() {
        let fsm = interpreter();
        assert_eq!(fsm.state(), AppState::Initialized);

        let state = fsm
            .send(FsmEvent::Start {
                check_install: true,
            })
            .await;

        assert_eq!(state, AppState::Error);
        assert_eq!(fsm.last_error().unwrap().code, "APPLICATION_NOT_INSTALL");

        fsm.apply(FsmEvent::Stop);
        assert_eq!(fsm.state(), AppState::Stopped);
        assert!(fsm.last_error().is_some());
    }

    #[tokio::test]
    async fn test_retry_after_install_reaches_running() {
        let fsm = interpreter();
        fsm.send(FsmEvent::Start {
            check_install: true,
        })
        .await;
        assert_eq!(fsm.state(), AppState::Error);

        fsm.app().install(InstallOptions::default()).await.unwrap();

        let state = fsm
            .send(FsmEvent::Start {
                check_install: true,
            })
            .await;
        assert_eq!(state, AppState::Running);
        assert_eq!(fsm.last_error(), None);
        assert!(fsm.app().is_started());
    }

    #[tokio::test]
    async fn test_settled_returns_stable_state() {
        let fsm = interpreter();
        assert_eq!(
            fsm.settled(Duration::from_millis(10)).await,
            Some(AppState::Initialized)
        );

        fsm.apply(FsmEvent::CommandBegin);
        assert_eq!(fsm.settled(Duration::from_millis(10)).await, None);
    }
}
