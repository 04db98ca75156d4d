//! Request logging middleware

use async_trait::async_trait;
use http::{Request, Response};
use nimbus_core::{Body, Middleware, Next, Result};
use std::time::Instant;
use tracing::{info, warn};

/// Tag the logger is registered under in every application's stack
pub const LOGGER_TAG: &str = "logger";

/// Logs each request handled by an application
#[derive(Debug, Clone)]
pub struct RequestLogger {
    app: String,
}

impl RequestLogger {
    /// Logger for the application named `app`
    pub fn new(app: impl Into<String>) -> Self {
        Self { app: app.into() }
    }
}

#[async_trait]
impl Middleware for RequestLogger {
    async fn call(&self, req: Request<Body>, next: Next) -> Result<Response<Body>> {
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let started = Instant::now();

        let result = next.run(req).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(response) => info!(
                app = %self.app,
                method = %method,
                path = %path,
                status = response.status().as_u16(),
                elapsed_ms,
                "request"
            ),
            Err(e) => warn!(
                app = %self.app,
                method = %method,
                path = %path,
                error = %e,
                elapsed_ms,
                "request failed"
            ),
        }

        result
    }
}
