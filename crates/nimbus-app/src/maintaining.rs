//! Maintaining status of the most recent command

use nimbus_core::AppErrorInfo;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Phase of a command run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaintainingStatus {
    /// Command accepted
    CommandBegin,
    /// Command hooks and action executing
    CommandRunning,
    /// Command finished successfully
    CommandEnd,
    /// Command failed
    CommandError,
}

impl MaintainingStatus {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            MaintainingStatus::CommandBegin => "command_begin",
            MaintainingStatus::CommandRunning => "command_running",
            MaintainingStatus::CommandEnd => "command_end",
            MaintainingStatus::CommandError => "command_error",
        }
    }
}

impl fmt::Display for MaintainingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Command identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandInfo {
    /// Full command name, e.g. `install`
    pub name: String,
}

/// Record of the most recent command's phase and outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintainingCommandStatus {
    /// Command being run
    pub command: CommandInfo,
    /// Current phase
    pub status: MaintainingStatus,
    /// Failure captured on `command_error`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<AppErrorInfo>,
}

impl MaintainingCommandStatus {
    /// Status without error
    pub fn new(command: impl Into<String>, status: MaintainingStatus) -> Self {
        Self {
            command: CommandInfo {
                name: command.into(),
            },
            status,
            error: None,
        }
    }

    /// `command_error` carrying `error`
    pub fn failed(command: impl Into<String>, error: AppErrorInfo) -> Self {
        Self {
            error: Some(error),
            ..Self::new(command, MaintainingStatus::CommandError)
        }
    }

    /// Whether the run failed
    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    /// Whether this status keeps the application in maintenance
    pub fn is_maintaining(&self) -> bool {
        self.status != MaintainingStatus::CommandEnd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_end_clears_maintaining() {
        assert!(!MaintainingCommandStatus::new("install", MaintainingStatus::CommandEnd)
            .is_maintaining());
        assert!(MaintainingCommandStatus::new("install", MaintainingStatus::CommandRunning)
            .is_maintaining());
    }

    #[test]
    fn test_failed_status_serializes_error() {
        let status = MaintainingCommandStatus::failed(
            "start",
            AppErrorInfo::new("APPLICATION_NOT_INSTALL", "not installed"),
        );
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["status"], "command_error");
        assert_eq!(value["command"]["name"], "start");
        assert_eq!(value["error"]["code"], "APPLICATION_NOT_INSTALL");
    }
}
