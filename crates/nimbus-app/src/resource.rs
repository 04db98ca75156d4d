//! Resource router and the built-in `app` resource
//!
//! Requests to `/api/<resource>:<action>` are dispatched to the handler
//! registered for that pair. Each application builds a fresh router on init
//! with the `app` actions pre-registered.

use crate::application::Application;
use crate::command::{AppCommand, RunOptions};
use crate::version::PLATFORM_VERSION;
use async_trait::async_trait;
use http::{Request, Response};
use nimbus_core::response::responses;
use nimbus_core::{Body, Error, Result};
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

const API_PREFIX: &str = "/api/";

/// Handles one `resource:action` pair
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Handle a request for the owning application
    async fn handle(&self, app: &Application, req: Request<Body>) -> Result<Response<Body>>;
}

/// Maps `resource:action` names to handlers
#[derive(Default)]
pub struct Resourcer {
    actions: RwLock<HashMap<String, Arc<dyn ActionHandler>>>,
}

impl Resourcer {
    /// Empty router
    pub fn new() -> Self {
        Self::default()
    }

    /// Router with the built-in `app` actions
    pub fn with_app_actions() -> Self {
        let resourcer = Self::new();
        resourcer.register("app", "getInfo", Arc::new(GetInfo));
        resourcer.register("app", "getLang", Arc::new(GetLang));
        resourcer.register("app", "getPlugins", Arc::new(GetPlugins));
        resourcer.register("app", "clearCache", Arc::new(ClearCache));
        resourcer.register("app", "restart", Arc::new(Restart));
        resourcer
    }

    /// Register or replace a handler
    pub fn register(&self, resource: &str, action: &str, handler: Arc<dyn ActionHandler>) {
        self.actions
            .write()
            .insert(format!("{resource}:{action}"), handler);
    }

    /// Whether a handler exists for the pair
    pub fn has_action(&self, resource: &str, action: &str) -> bool {
        self.actions
            .read()
            .contains_key(&format!("{resource}:{action}"))
    }

    /// Registered `resource:action` names, sorted
    pub fn actions(&self) -> Vec<String> {
        let mut names: Vec<String> = self.actions.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Route a request to its action handler
    pub async fn dispatch(&self, app: &Application, req: Request<Body>) -> Result<Response<Body>> {
        let path = req.uri().path();
        let key = parse_action_path(path)
            .ok_or_else(|| Error::NotFound(path.to_string()))?
            .to_string();

        let handler = self
            .actions
            .read()
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::NotFound(key.clone()))?;

        handler.handle(app, req).await
    }
}

impl fmt::Debug for Resourcer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resourcer")
            .field("actions", &self.actions())
            .finish()
    }
}

/// `/api/app:getInfo` -> `app:getInfo`
fn parse_action_path(path: &str) -> Option<&str> {
    let name = path.strip_prefix(API_PREFIX)?.trim_end_matches('/');
    let (resource, action) = name.split_once(':')?;
    if resource.is_empty() || action.is_empty() || action.contains('/') {
        return None;
    }
    Some(name)
}

fn query_param(req: &Request<Body>, name: &str) -> Option<String> {
    let query = req.uri().query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

struct GetInfo;

#[async_trait]
impl ActionHandler for GetInfo {
    async fn handle(&self, app: &Application, _req: Request<Body>) -> Result<Response<Body>> {
        responses::data(&json!({
            "name": app.name(),
            "version": PLATFORM_VERSION,
            "database": { "dialect": app.db().dialect() },
            "lang": app.lang(),
        }))
    }
}

struct GetLang;

#[async_trait]
impl ActionHandler for GetLang {
    async fn handle(&self, app: &Application, req: Request<Body>) -> Result<Response<Body>> {
        let lang = query_param(&req, "locale").unwrap_or_else(|| app.lang().to_string());
        responses::data(&json!({ "lang": lang }))
    }
}

struct GetPlugins;

#[async_trait]
impl ActionHandler for GetPlugins {
    async fn handle(&self, app: &Application, _req: Request<Body>) -> Result<Response<Body>> {
        let plugins: Vec<Value> = app
            .pm()
            .list()
            .into_iter()
            .map(|plugin| json!({ "name": plugin.name, "version": plugin.version }))
            .collect();
        responses::data(&plugins)
    }
}

struct ClearCache;

#[async_trait]
impl ActionHandler for ClearCache {
    async fn handle(&self, app: &Application, _req: Request<Body>) -> Result<Response<Body>> {
        app.cache().reset();
        tracing::info!(app = %app.name(), "Cache cleared");
        responses::data(&Value::Null)
    }
}

struct Restart;

#[async_trait]
impl ActionHandler for Restart {
    async fn handle(&self, app: &Application, _req: Request<Body>) -> Result<Response<Body>> {
        let app = app.shared()?;
        tokio::spawn(async move {
            if let Err(e) = app.run_command(AppCommand::Restart, RunOptions::default()).await {
                tracing::error!(app = %app.name(), error = %e, "Restart failed");
            }
        });
        responses::data(&Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_action_path() {
        assert_eq!(parse_action_path("/api/app:getInfo"), Some("app:getInfo"));
        assert_eq!(parse_action_path("/api/app:getInfo/"), Some("app:getInfo"));
        assert_eq!(parse_action_path("/api/app"), None);
        assert_eq!(parse_action_path("/api/:getInfo"), None);
        assert_eq!(parse_action_path("/app:getInfo"), None);
    }

    #[test]
    fn test_app_actions_registered() {
        let resourcer = Resourcer::with_app_actions();
        assert!(resourcer.has_action("app", "getInfo"));
        assert!(resourcer.has_action("app", "restart"));
        assert!(!resourcer.has_action("app", "destroy"));
        assert_eq!(resourcer.actions().len(), 5);
    }

    #[test]
    fn test_query_param() {
        let req = Request::builder()
            .uri("/api/app:getLang?locale=zh-CN&x=1")
            .body(Body::new(nimbus_core::Bytes::new()))
            .unwrap();
        assert_eq!(query_param(&req, "locale").as_deref(), Some("zh-CN"));
        assert_eq!(query_param(&req, "missing"), None);
    }
}
