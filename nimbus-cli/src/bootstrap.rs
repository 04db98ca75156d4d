//! Applications materialized from the configuration file

use async_trait::async_trait;
use nimbus_app::{Application, ApplicationOptions, DatabaseConnector, PluginCatalog};
use nimbus_config::Config;
use nimbus_core::Result;
use nimbus_supervisor::{AppBootstrapper, AppSupervisor, FsmEvent};
use std::sync::Arc;
use tracing::{debug, info};

/// Creates the applications listed under `apps` when first requested
#[derive(Debug)]
pub struct ConfigBootstrapper {
    config: Arc<Config>,
    catalog: PluginCatalog,
    connector: Arc<dyn DatabaseConnector>,
}

impl ConfigBootstrapper {
    pub fn new(
        config: Arc<Config>,
        catalog: PluginCatalog,
        connector: Arc<dyn DatabaseConnector>,
    ) -> Self {
        Self {
            config,
            catalog,
            connector,
        }
    }

    /// Build the application named `name` without registering it
    pub fn build(&self, name: &str) -> Result<Option<Arc<Application>>> {
        let Some(app_config) = self.config.app(name) else {
            return Ok(None);
        };

        let options =
            ApplicationOptions::from_config(app_config, &self.config.supervisor, &self.catalog)?;
        Application::new(options, self.connector.clone()).map(Some)
    }
}

#[async_trait]
impl AppBootstrapper for ConfigBootstrapper {
    async fn bootstrap(&self, supervisor: &AppSupervisor, name: &str) -> Result<()> {
        let Some(app) = self.build(name)? else {
            debug!(app = %name, "No application configured");
            return Ok(());
        };

        supervisor.add_app(app)?;
        info!(app = %name, "Application created from configuration");

        let Some(app_config) = self.config.app(name) else {
            return Ok(());
        };
        if app_config.auto_start {
            if let Some(fsm) = supervisor.fsm(name) {
                let state = fsm
                    .send(FsmEvent::Start {
                        check_install: app_config.check_install,
                    })
                    .await;
                debug!(app = %name, state = %state, "Auto start finished");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_app::MemoryConnector;
    use nimbus_config::{AppConfig, ConfigBuilder, GatewayConfig};
    use nimbus_supervisor::AppState;

    fn app_config(name: &str, check_install: bool) -> AppConfig {
        AppConfig {
            name: name.to_string(),
            database: Default::default(),
            plugins: Vec::new(),
            auto_start: true,
            check_install,
        }
    }

    fn supervisor(apps: Vec<AppConfig>) -> AppSupervisor {
        let mut builder = ConfigBuilder::new().gateway(GatewayConfig::default());
        for app in apps {
            builder = builder.add_app(app);
        }
        let config = Arc::new(builder.build().unwrap());

        let supervisor = AppSupervisor::new(config.supervisor.clone());
        supervisor.set_app_bootstrapper(Arc::new(ConfigBootstrapper::new(
            config,
            PluginCatalog::new(),
            Arc::new(MemoryConnector::new()),
        )));
        supervisor
    }

    #[tokio::test]
    async fn test_configured_app_is_started() {
        let supervisor = supervisor(vec![app_config("main", false)]);
        assert_eq!(supervisor.bootstrap_app("main").await, AppState::Running);
        assert!(supervisor.has_app("main"));
    }

    #[tokio::test]
    async fn test_uninstalled_app_fails_install_check() {
        let supervisor = supervisor(vec![app_config("main", true)]);
        assert_eq!(supervisor.bootstrap_app("main").await, AppState::Error);
    }

    #[tokio::test]
    async fn test_unconfigured_app_is_not_found() {
        let supervisor = supervisor(vec![app_config("main", false)]);
        assert_eq!(supervisor.bootstrap_app("crm").await, AppState::NotFound);
        assert!(!supervisor.has_app("crm"));
    }
}
