//! Error types for the Nimbus platform

use crate::types::AppErrorInfo;
use std::time::Duration;

/// Result type alias using [`Error`]
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Main error type shared across the Nimbus crates
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Transport-level HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    /// Malformed or unsupported request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Resource action not found inside an application
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// No application registered under the name
    #[error("application {0} not found")]
    AppNotFound(String),

    /// A different live application already holds the name
    #[error("application {0} already exists")]
    AppAlreadyExists(String),

    /// `start` with install check on a database without install markers
    #[error("{0}")]
    ApplicationNotInstalled(String),

    /// Bootstrapping did not reach a settled state in time
    #[error("application {app} did not finish booting within {timeout:?}")]
    BootTimeout {
        /// Application name
        app: String,
        /// Configured wait bound
        timeout: Duration,
    },

    /// Database server version is outside the supported range
    #[error("Unsupported database: {0}")]
    UnsupportedDatabase(String),

    /// Database collaborator failure
    #[error("Database error: {0}")]
    Database(String),

    /// Plugin error
    #[error("Plugin error in '{plugin}': {message}")]
    Plugin {
        /// Plugin name
        plugin: String,
        /// Error message
        message: String,
    },

    /// Preset added after the application was loaded
    #[error("plugin {0} can not be added as preset after app loaded")]
    AddPreset(String),

    /// Command failure
    #[error("command '{command}' failed: {message}")]
    Command {
        /// Command name
        command: String,
        /// Error message
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Middleware error
    #[error("Middleware error: {0}")]
    Middleware(String),

    /// Runtime error
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP builder error
    #[error("HTTP error: {0}")]
    HttpError(#[from] http::Error),

    /// Internal error (should not happen in production)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Convert error to HTTP status code
    pub fn to_status_code(&self) -> http::StatusCode {
        use http::StatusCode;
        match self {
            Error::Http(_) | Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) | Error::AppNotFound(_) => StatusCode::NOT_FOUND,
            Error::AppAlreadyExists(_) => StatusCode::CONFLICT,
            Error::ApplicationNotInstalled(_)
            | Error::BootTimeout { .. }
            | Error::UnsupportedDatabase(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Error::Http(_) | Error::HttpError(_) => "HTTP_ERROR",
            Error::InvalidRequest(_) => "INVALID_REQUEST",
            Error::NotFound(_) => "NOT_FOUND",
            Error::AppNotFound(_) => "APP_NOT_FOUND",
            Error::AppAlreadyExists(_) => "APP_ALREADY_EXISTS",
            Error::ApplicationNotInstalled(_) => "APPLICATION_NOT_INSTALL",
            Error::BootTimeout { .. } => "APP_BOOT_TIMEOUT",
            Error::UnsupportedDatabase(_) => "UNSUPPORTED_DATABASE",
            Error::Database(_) => "DATABASE_ERROR",
            Error::Plugin { .. } => "PLUGIN_ERROR",
            Error::AddPreset(_) => "ADD_PRESET_ERROR",
            Error::Command { .. } => "COMMAND_ERROR",
            Error::Config(_) => "CONFIG_ERROR",
            Error::Middleware(_) => "MIDDLEWARE_ERROR",
            Error::Runtime(_) => "RUNTIME_ERROR",
            Error::Serialization(_) => "SERIALIZATION_ERROR",
            Error::Io(_) => "IO_ERROR",
            Error::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Create a plugin error
    pub fn plugin(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Plugin {
            plugin: plugin.into(),
            message: message.into(),
        }
    }

    /// Create a database error
    pub fn database(message: impl std::fmt::Display) -> Self {
        Error::Database(message.to_string())
    }

    /// Snapshot of this error that can be cloned and stored
    pub fn to_info(&self) -> AppErrorInfo {
        AppErrorInfo::new(self.code(), self.to_string())
    }
}

impl From<&Error> for AppErrorInfo {
    fn from(err: &Error) -> Self {
        err.to_info()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            Error::AppNotFound("main".to_string()).to_status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            Error::BootTimeout {
                app: "main".to_string(),
                timeout: Duration::from_secs(1)
            }
            .to_status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            Error::Database("closed".to_string()).to_status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_error_info_snapshot() {
        let err = Error::ApplicationNotInstalled("Application main is not installed".to_string());
        let info = err.to_info();
        assert_eq!(info.code, "APPLICATION_NOT_INSTALL");
        assert_eq!(info.message, "Application main is not installed");
    }

    #[test]
    fn test_plugin_error() {
        let err = Error::plugin("users", "missing collection");
        assert!(matches!(err, Error::Plugin { .. }));
        assert!(err.to_string().contains("users"));
    }
}
