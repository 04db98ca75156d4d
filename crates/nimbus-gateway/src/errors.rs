//! Lookup table of the errors the gateway answers with
//!
//! Every lifecycle state maps to a code (`APP_<STATE>`); callers may register
//! additional kinds or override the built-in ones.

use http::StatusCode;
use nimbus_core::{AppErrorInfo, ErrorDetail};
use nimbus_supervisor::AppState;
use std::collections::HashMap;

/// Code used when a lookup misses
pub const UNKNOWN_ERROR: &str = "UNKNOWN_ERROR";

/// One entry of the error table
///
/// `message` is a template: `{app}` is replaced with the application name and
/// `{detail}` with the captured error message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorKind {
    /// Stable code
    pub code: String,
    /// Message template
    pub message: String,
    /// HTTP status
    pub status: StatusCode,
    /// Whether the application counts as under maintenance
    pub maintaining: bool,
}

impl ErrorKind {
    /// Create a new error kind
    pub fn new(
        code: impl Into<String>,
        message: impl Into<String>,
        status: StatusCode,
        maintaining: bool,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            status,
            maintaining,
        }
    }

    /// Render the payload for `app`
    pub fn render(&self, app: &str, detail: Option<&str>) -> ErrorDetail {
        let message = self
            .message
            .replace("{app}", app)
            .replace("{detail}", detail.unwrap_or("unknown error"));

        ErrorDetail {
            code: self.code.clone(),
            message,
            status: self.status.as_u16(),
            maintaining: self.maintaining,
        }
    }
}

/// Error kinds keyed by code
#[derive(Debug, Clone)]
pub struct ErrorTable {
    kinds: HashMap<String, ErrorKind>,
}

impl ErrorTable {
    /// Table without any entry
    pub fn empty() -> Self {
        Self {
            kinds: HashMap::new(),
        }
    }

    /// Add or replace an entry
    pub fn register(&mut self, kind: ErrorKind) -> Option<ErrorKind> {
        self.kinds.insert(kind.code.clone(), kind)
    }

    /// Look up an entry
    pub fn get(&self, code: &str) -> Option<&ErrorKind> {
        self.kinds.get(code)
    }

    /// Registered codes
    pub fn codes(&self) -> Vec<&str> {
        let mut codes: Vec<&str> = self.kinds.keys().map(String::as_str).collect();
        codes.sort_unstable();
        codes
    }

    /// Render `code` for `app`, falling back to a 500 when the code is unknown
    pub fn detail(&self, code: &str, app: &str, detail: Option<&str>) -> ErrorDetail {
        match self.kinds.get(code) {
            Some(kind) => kind.render(app, detail),
            None => ErrorDetail {
                code: UNKNOWN_ERROR.to_string(),
                message: format!("unknown error code {code} for application {app}"),
                status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
                maintaining: false,
            },
        }
    }

    /// Payload describing `app` in `state`
    pub fn for_state(&self, app: &str, state: AppState, error: Option<&AppErrorInfo>) -> ErrorDetail {
        self.detail(state_code(state), app, error.map(|e| e.message.as_str()))
    }
}

/// Error code reported while `app` is in `state`
///
/// A running command looks like a boot in progress to clients.
pub fn state_code(state: AppState) -> &'static str {
    match state {
        AppState::NotFound => "APP_NOT_FOUND",
        AppState::Initializing | AppState::Commanding => "APP_INITIALIZING",
        AppState::Initialized => "APP_INITIALIZED",
        AppState::Running => "APP_RUNNING",
        AppState::Error => "APP_ERROR",
        AppState::Stopped => "APP_STOPPED",
    }
}

impl Default for ErrorTable {
    fn default() -> Self {
        let mut table = Self::empty();
        for kind in [
            ErrorKind::new(
                "APP_NOT_FOUND",
                "application {app} not found",
                StatusCode::NOT_FOUND,
                true,
            ),
            ErrorKind::new(
                "APP_INITIALIZING",
                "application {app} is initializing",
                StatusCode::SERVICE_UNAVAILABLE,
                true,
            ),
            ErrorKind::new(
                "APP_INITIALIZED",
                "application {app} is initialized, waiting for command",
                StatusCode::SERVICE_UNAVAILABLE,
                true,
            ),
            ErrorKind::new(
                "APP_STOPPED",
                "application {app} is stopped",
                StatusCode::SERVICE_UNAVAILABLE,
                true,
            ),
            ErrorKind::new(
                "APP_ERROR",
                "{detail}",
                StatusCode::SERVICE_UNAVAILABLE,
                true,
            ),
            ErrorKind::new(
                "APP_RUNNING",
                "application {app} is running",
                StatusCode::OK,
                false,
            ),
        ] {
            table.register(kind);
        }
        table
    }
}
