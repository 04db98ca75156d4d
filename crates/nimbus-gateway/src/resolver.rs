//! Application name resolution

use http::header::{HeaderName, HOST};
use http::{HeaderMap, Request, Uri};
use nimbus_config::GatewayConfig;
use nimbus_core::{Error, Result};
use std::collections::HashMap;

/// Query parameter naming the target application
pub const APP_NAME_QUERY: &str = "__appName";

/// Picks the application a request is meant for
///
/// Order: the app header, the `__appName` query parameter, the host mapping,
/// then the default application.
#[derive(Debug, Clone)]
pub struct AppNameResolver {
    header: HeaderName,
    host_map: HashMap<String, String>,
    default_app: String,
}

impl AppNameResolver {
    /// Build a resolver from the gateway configuration
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        let header = HeaderName::from_bytes(config.app_header.to_ascii_lowercase().as_bytes())
            .map_err(|e| Error::Config(format!("Invalid app header {:?}: {e}", config.app_header)))?;

        let host_map = config
            .host_map
            .iter()
            .map(|(host, app)| (host.to_ascii_lowercase(), app.clone()))
            .collect();

        Ok(Self {
            header,
            host_map,
            default_app: config.default_app.clone(),
        })
    }

    /// Resolve the name for a request
    pub fn resolve<B>(&self, req: &Request<B>) -> String {
        self.resolve_parts(req.uri(), req.headers())
    }

    /// Resolve from a URI and headers
    pub fn resolve_parts(&self, uri: &Uri, headers: &HeaderMap) -> String {
        if let Some(name) = headers
            .get(&self.header)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
        {
            return name.to_string();
        }

        if let Some(query) = uri.query() {
            let from_query = url::form_urlencoded::parse(query.as_bytes())
                .find(|(key, value)| key == APP_NAME_QUERY && !value.is_empty())
                .map(|(_, value)| value.into_owned());
            if let Some(name) = from_query {
                return name;
            }
        }

        let host = headers
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .or_else(|| uri.host());
        if let Some(app) = host.and_then(|host| self.host_map.get(&strip_port(host))) {
            return app.clone();
        }

        self.default_app.clone()
    }
}

fn strip_port(host: &str) -> String {
    let host = match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    };
    host.to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> AppNameResolver {
        let mut config = GatewayConfig::default();
        config
            .host_map
            .insert("crm.example.com".to_string(), "crm".to_string());
        AppNameResolver::new(&config).unwrap()
    }

    fn request(uri: &str, headers: &[(&str, &str)]) -> Request<()> {
        let mut builder = Request::builder().uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(()).unwrap()
    }

    #[test]
    fn test_default_app() {
        assert_eq!(resolver().resolve(&request("/api/app:getInfo", &[])), "main");
    }

    #[test]
    fn test_header_wins() {
        let req = request(
            "/api/app:getInfo?__appName=sub",
            &[("x-app", "crm2"), ("host", "crm.example.com")],
        );
        assert_eq!(resolver().resolve(&req), "crm2");
    }

    #[test]
    fn test_query_before_host() {
        let req = request("/api/app:getInfo?a=1&__appName=sub", &[("host", "crm.example.com")]);
        assert_eq!(resolver().resolve(&req), "sub");
    }

    #[test]
    fn test_host_mapping_ignores_port_and_case() {
        let req = request("/", &[("host", "CRM.example.com:13000")]);
        assert_eq!(resolver().resolve(&req), "crm");

        let req = request("/", &[("host", "other.example.com")]);
        assert_eq!(resolver().resolve(&req), "main");
    }

    #[test]
    fn test_invalid_header_name() {
        let config = GatewayConfig {
            app_header: "bad header".to_string(),
            ..GatewayConfig::default()
        };
        assert!(AppNameResolver::new(&config).is_err());
    }
}
