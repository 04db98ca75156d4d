//! Configuration builder

use crate::types::{AppConfig, Config, GatewayConfig, LoggingConfig, SupervisorConfig};
use std::net::SocketAddr;

/// Builder for constructing configuration programmatically
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    gateway: Option<GatewayConfig>,
    supervisor: SupervisorConfig,
    apps: Vec<AppConfig>,
    logging: LoggingConfig,
}

impl ConfigBuilder {
    /// Create a new configuration builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set gateway configuration
    pub fn gateway(mut self, gateway: GatewayConfig) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// Set listen address
    pub fn listen(mut self, addr: SocketAddr) -> Self {
        self.gateway.get_or_insert_with(GatewayConfig::default).listen = addr;
        self
    }

    /// Set supervisor configuration
    pub fn supervisor(mut self, supervisor: SupervisorConfig) -> Self {
        self.supervisor = supervisor;
        self
    }

    /// Add an application definition
    pub fn add_app(mut self, app: AppConfig) -> Self {
        self.apps.push(app);
        self
    }

    /// Set logging configuration
    pub fn logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = logging;
        self
    }

    /// Build the configuration
    pub fn build(self) -> nimbus_core::Result<Config> {
        let gateway = self
            .gateway
            .ok_or_else(|| nimbus_core::Error::Config("gateway is required".to_string()))?;

        Ok(Config {
            gateway,
            supervisor: self.supervisor,
            apps: self.apps,
            logging: self.logging,
        })
    }
}
