//! Configuration validation

use crate::Config;
use nimbus_core::{Error, Result};
use std::collections::HashSet;

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    validate_gateway(config)?;
    validate_supervisor(config)?;
    validate_apps(config)?;
    Ok(())
}

fn validate_gateway(config: &Config) -> Result<()> {
    let gateway = &config.gateway;

    if !gateway.ws_path.starts_with('/') {
        return Err(Error::Config(format!(
            "ws_path must start with '/': {}",
            gateway.ws_path
        )));
    }

    if gateway.app_header.is_empty() {
        return Err(Error::Config("app_header cannot be empty".to_string()));
    }

    if gateway.default_app.is_empty() {
        return Err(Error::Config("default_app cannot be empty".to_string()));
    }

    if gateway.shutdown_timeout.is_zero() {
        return Err(Error::Config("shutdown_timeout must be > 0".to_string()));
    }

    Ok(())
}

fn validate_supervisor(config: &Config) -> Result<()> {
    if config.supervisor.boot_timeout.is_zero() {
        return Err(Error::Config("boot_timeout must be > 0".to_string()));
    }

    if config.supervisor.auth_retries == 0 {
        return Err(Error::Config("auth_retries must be >= 1".to_string()));
    }

    if config.supervisor.boot_timeout.as_secs() > 600 {
        tracing::warn!("boot_timeout is very high (>10 minutes)");
    }

    Ok(())
}

fn validate_apps(config: &Config) -> Result<()> {
    let mut names = HashSet::new();

    for app in &config.apps {
        if app.name.is_empty() {
            return Err(Error::Config("app name cannot be empty".to_string()));
        }

        if !names.insert(app.name.as_str()) {
            return Err(Error::Config(format!("duplicate app name: {}", app.name)));
        }

        if app.database.storage.is_empty() {
            return Err(Error::Config(format!(
                "app {} has an empty database storage",
                app.name
            )));
        }

        let mut plugins = HashSet::new();
        for plugin in &app.plugins {
            if !plugins.insert(plugin.name.as_str()) {
                return Err(Error::Config(format!(
                    "app {} lists plugin {} twice",
                    app.name, plugin.name
                )));
            }
        }
    }

    for (host, app) in &config.gateway.host_map {
        if !config.apps.is_empty() && config.app(app).is_none() {
            tracing::warn!(host = %host, app = %app, "host_map points to an undefined app");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AppConfig, ConfigBuilder};
    use std::time::Duration;

    fn base() -> ConfigBuilder {
        ConfigBuilder::new().listen("127.0.0.1:13000".parse().unwrap())
    }

    #[test]
    fn test_valid_config() {
        let config = base().add_app(AppConfig::new("main")).build().unwrap();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_duplicate_app_names() {
        let config = base()
            .add_app(AppConfig::new("main"))
            .add_app(AppConfig::new("main"))
            .build()
            .unwrap();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_zero_boot_timeout() {
        let mut config = base().build().unwrap();
        config.supervisor.boot_timeout = Duration::ZERO;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_ws_path_must_be_absolute() {
        let mut config = base().build().unwrap();
        config.gateway.ws_path = "ws".to_string();
        assert!(validate_config(&config).is_err());
    }
}
