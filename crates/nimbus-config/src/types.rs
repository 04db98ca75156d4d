//! Configuration types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Gateway (HTTP + WebSocket ingress)
    pub gateway: GatewayConfig,

    /// Application supervisor
    #[serde(default)]
    pub supervisor: SupervisorConfig,

    /// Applications the bootstrapper may materialize on demand
    #[serde(default)]
    pub apps: Vec<AppConfig>,

    /// Logging
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Find an application definition by name
    pub fn app(&self, name: &str) -> Option<&AppConfig> {
        self.apps.iter().find(|app| app.name == name)
    }
}

/// Gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewayConfig {
    /// Listen address
    pub listen: SocketAddr,

    /// WebSocket endpoint path
    #[serde(default = "default_ws_path")]
    pub ws_path: String,

    /// Header carrying the target application name
    #[serde(default = "default_app_header")]
    pub app_header: String,

    /// Host name to application name mapping
    #[serde(default)]
    pub host_map: HashMap<String, String>,

    /// Application served when nothing in the request names one
    #[serde(default = "default_app_name")]
    pub default_app: String,

    /// Graceful shutdown timeout
    #[serde(default = "default_shutdown_timeout", with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 13000)),
            ws_path: default_ws_path(),
            app_header: default_app_header(),
            host_map: HashMap::new(),
            default_app: default_app_name(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

/// Supervisor configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Upper bound for `get_app` waiting on a boot
    #[serde(with = "humantime_serde")]
    pub boot_timeout: Duration,

    /// Database authentication attempts before giving up
    pub auth_retries: u32,

    /// Delay between authentication attempts
    #[serde(with = "humantime_serde")]
    pub auth_retry_delay: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            boot_timeout: Duration::from_secs(30),
            auth_retries: 30,
            auth_retry_delay: Duration::from_secs(1),
        }
    }
}

/// Application definition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    /// Unique application name
    pub name: String,

    /// Database descriptor
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Plugins to add as presets
    #[serde(default)]
    pub plugins: Vec<PluginConfig>,

    /// Start the application right after it is bootstrapped
    #[serde(default = "default_true")]
    pub auto_start: bool,

    /// Refuse to start an application that was never installed
    #[serde(default = "default_true")]
    pub check_install: bool,
}

impl AppConfig {
    /// Application with an in-memory SQLite descriptor
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            database: DatabaseConfig::default(),
            plugins: Vec::new(),
            auto_start: true,
            check_install: true,
        }
    }
}

/// Plugin reference inside an application definition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PluginConfig {
    /// Registered plugin name
    pub name: String,

    /// Enable the plugin
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Plugin options
    #[serde(default)]
    pub options: serde_json::Value,
}

/// Database dialect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// SQLite
    Sqlite,
    /// MySQL
    Mysql,
    /// PostgreSQL
    Postgres,
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dialect::Sqlite => write!(f, "sqlite"),
            Dialect::Mysql => write!(f, "mysql"),
            Dialect::Postgres => write!(f, "postgres"),
        }
    }
}

/// Database connection descriptor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseConfig {
    /// Dialect
    pub dialect: Dialect,

    /// File path, `:memory:` or DSN
    #[serde(default = "default_storage")]
    pub storage: String,

    /// Use snake_case table and column names
    #[serde(default)]
    pub underscored: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            dialect: Dialect::Sqlite,
            storage: default_storage(),
            underscored: false,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level directive
    pub level: String,

    /// Output format
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable
    Pretty,
    /// One JSON object per line
    Json,
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_app_header() -> String {
    "x-app".to_string()
}

fn default_app_name() -> String {
    nimbus_core::DEFAULT_APP_NAME.to_string()
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_storage() -> String {
    ":memory:".to_string()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supervisor_defaults() {
        let config = SupervisorConfig::default();
        assert_eq!(config.boot_timeout, Duration::from_secs(30));
        assert_eq!(config.auth_retries, 30);
    }

    #[test]
    fn test_app_config_defaults_from_yaml() {
        let app: AppConfig = serde_yaml::from_str("name: crm\n").unwrap();
        assert_eq!(app.name, "crm");
        assert_eq!(app.database.dialect, Dialect::Sqlite);
        assert_eq!(app.database.storage, ":memory:");
        assert!(app.auto_start);
        assert!(app.check_install);
    }

    #[test]
    fn test_dialect_display() {
        assert_eq!(Dialect::Postgres.to_string(), "postgres");
    }
}
