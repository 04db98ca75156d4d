//! Command runner
//!
//! Every lifecycle operation an operator triggers goes through
//! [`Application::run_command`], which tracks it in the maintaining status:
//! `command_begin` and `command_running` before the action, then
//! `command_end` or `command_error`. Only one command runs at a time per
//! application; a command arriving while another is active is ignored.

use crate::application::{Application, InstallOptions, StartOptions};
use crate::maintaining::{MaintainingCommandStatus, MaintainingStatus};
use async_trait::async_trait;
use nimbus_core::{Error, Result};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// A command an application can run
#[derive(Debug, Clone, PartialEq)]
pub enum AppCommand {
    /// Install plugins and record the version
    Install(InstallOptions),
    /// Run migrations and record the version
    Upgrade,
    /// Start the application
    Start(StartOptions),
    /// Restart a started application
    Restart,
    /// Stop the application
    Stop,
    /// Stop and tear down the application
    Destroy,
    /// Reload plugins and database handle
    Reload,
    /// Command registered by a plugin or embedder
    Custom {
        /// Registered name
        name: String,
        /// Arguments passed to the handler
        args: Value,
    },
}

impl AppCommand {
    /// Command name as recorded in the maintaining status
    pub fn name(&self) -> &str {
        match self {
            AppCommand::Install(_) => "install",
            AppCommand::Upgrade => "upgrade",
            AppCommand::Start(_) => "start",
            AppCommand::Restart => "restart",
            AppCommand::Stop => "stop",
            AppCommand::Destroy => "destroy",
            AppCommand::Reload => "reload",
            AppCommand::Custom { name, .. } => name,
        }
    }

    /// Built-in command by name with default options, or a custom one
    pub fn from_name(name: &str, args: Value) -> Self {
        match name {
            "install" => AppCommand::Install(InstallOptions::default()),
            "upgrade" => AppCommand::Upgrade,
            "start" => AppCommand::Start(StartOptions::default()),
            "restart" => AppCommand::Restart,
            "stop" => AppCommand::Stop,
            "destroy" => AppCommand::Destroy,
            "reload" => AppCommand::Reload,
            other => AppCommand::Custom {
                name: other.to_string(),
                args,
            },
        }
    }
}

/// Options for [`Application::run_command`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Return the command error instead of only recording it
    pub throw_error: bool,
}

impl RunOptions {
    /// Options that rethrow command errors
    pub fn throwing() -> Self {
        Self { throw_error: true }
    }
}

/// Handler behind a custom command
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Run the command against an authenticated, loaded application
    async fn run(&self, app: &Application, args: &Value) -> Result<()>;
}

/// Clears the active command slot when dropped
struct ActiveCommand<'a> {
    app: &'a Application,
}

impl Drop for ActiveCommand<'_> {
    fn drop(&mut self) {
        *self.app.active_command.lock() = None;
    }
}

impl Application {
    /// Register a custom command, replacing any handler with the same name
    pub fn register_command(&self, name: impl Into<String>, handler: Arc<dyn CommandHandler>) {
        let name = name.into();
        debug!(app = %self.name(), command = %name, "Registering command");
        self.commands.insert(name, handler);
    }

    /// Whether a custom command is registered
    pub fn has_command(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }

    /// Name of the command currently running
    pub fn active_command(&self) -> Option<String> {
        self.active_command.lock().clone()
    }

    fn activate_command(&self, name: &str) -> Option<ActiveCommand<'_>> {
        let mut slot = self.active_command.lock();
        if slot.is_some() {
            return None;
        }
        *slot = Some(name.to_string());
        Some(ActiveCommand { app: self })
    }

    /// Run a command with maintaining status tracking
    ///
    /// Errors are recorded as `command_error` and only returned when
    /// `options.throw_error` is set.
    pub async fn run_command(&self, command: AppCommand, options: RunOptions) -> Result<()> {
        let name = command.name().to_string();

        let Some(_active) = self.activate_command(&name) else {
            warn!(
                app = %self.name(),
                command = %name,
                active = ?self.active_command(),
                "Another command is running, ignoring"
            );
            return Ok(());
        };

        let before = self.maintaining_status();
        *self.status_before_command.write() = before;

        match self.execute_command(command).await {
            Ok(()) => {
                self.set_maintaining(MaintainingCommandStatus::new(
                    &name,
                    MaintainingStatus::CommandEnd,
                ))
                .await;
                Ok(())
            }
            Err(e) => {
                warn!(app = %self.name(), command = %name, error = %e, "Command failed");
                self.set_maintaining(MaintainingCommandStatus::failed(&name, e.to_info()))
                    .await;

                if options.throw_error {
                    Err(e)
                } else {
                    Ok(())
                }
            }
        }
    }

    async fn execute_command(&self, command: AppCommand) -> Result<()> {
        let name = command.name().to_string();

        let custom = match &command {
            AppCommand::Custom { name, .. } => Some(self.custom_handler(name)?),
            _ => None,
        };

        self.set_maintaining(MaintainingCommandStatus::new(
            &name,
            MaintainingStatus::CommandBegin,
        ))
        .await;
        self.set_maintaining(MaintainingCommandStatus::new(
            &name,
            MaintainingStatus::CommandRunning,
        ))
        .await;

        self.authenticate().await?;
        self.load(Default::default()).await?;

        match command {
            AppCommand::Install(options) => self.install(options).await?,
            AppCommand::Upgrade => self.upgrade().await?,
            AppCommand::Start(options) => self.start(options).await?,
            AppCommand::Restart => self.restart(StartOptions::default()).await?,
            AppCommand::Stop => self.stop().await?,
            AppCommand::Destroy => self.destroy().await?,
            AppCommand::Reload => self.reload().await?,
            AppCommand::Custom { args, .. } => {
                if let Some(handler) = custom {
                    handler.run(self, &args).await?;
                }
            }
        }

        let recovering = self
            .status_before_command
            .read()
            .as_ref()
            .is_some_and(MaintainingCommandStatus::has_error);
        if recovering && self.is_started() {
            self.restart(StartOptions::default()).await?;
        }

        Ok(())
    }

    fn custom_handler(&self, name: &str) -> Result<Arc<dyn CommandHandler>> {
        self.commands
            .get(name)
            .map(|handler| Arc::clone(handler.value()))
            .ok_or_else(|| Error::Command {
                command: name.to_string(),
                message: "unknown command".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_command_names() {
        assert_eq!(AppCommand::Upgrade.name(), "upgrade");
        assert_eq!(
            AppCommand::Install(InstallOptions::default()).name(),
            "install"
        );
        assert_eq!(AppCommand::from_name("restart", Value::Null), AppCommand::Restart);

        let custom = AppCommand::from_name("pm:enable", json!({ "plugin": "acl" }));
        assert_eq!(custom.name(), "pm:enable");
    }
}
