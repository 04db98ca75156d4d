//! Common value types used throughout Nimbus

use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of the application served when a request carries no app hint
pub const DEFAULT_APP_NAME: &str = "main";

/// Clonable snapshot of an error, kept in maintaining status and FSM state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppErrorInfo {
    /// Stable error code
    pub code: String,
    /// Human readable message
    pub message: String,
}

impl AppErrorInfo {
    /// Create a new error snapshot
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for AppErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Body of the uniform error payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Stable error code, e.g. `APP_NOT_FOUND`
    pub code: String,
    /// Rendered message
    pub message: String,
    /// HTTP status associated with the code
    pub status: u16,
    /// Whether the application is under maintenance
    pub maintaining: bool,
}

/// `{ "error": { code, message, status, maintaining } }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Error details
    pub error: ErrorDetail,
}

impl From<ErrorDetail> for ErrorPayload {
    fn from(error: ErrorDetail) -> Self {
        Self { error }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_payload_shape() {
        let payload = ErrorPayload::from(ErrorDetail {
            code: "APP_NOT_FOUND".to_string(),
            message: "application main not found".to_string(),
            status: 404,
            maintaining: true,
        });

        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["error"]["code"], "APP_NOT_FOUND");
        assert_eq!(value["error"]["status"], 404);
        assert_eq!(value["error"]["maintaining"], true);
    }
}
