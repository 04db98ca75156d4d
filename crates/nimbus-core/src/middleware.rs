//! Tagged middleware stack
//!
//! Every application composes its request pipeline from a [`MiddlewareStack`].
//! Entries carry a tag so plugins can insert their middleware before or after
//! a known neighbour (`logger`, `resourcer`, ...). The composed chain ends in a
//! final handler, usually the application's resource router.

use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use http::{Request, Response};
use http_body_util::Full;
use std::fmt;
use std::sync::Arc;

/// Body type alias
pub type Body = Full<Bytes>;

/// Middleware trait for request/response processing
#[async_trait]
pub trait Middleware: Send + Sync + fmt::Debug {
    /// Process a request, optionally delegating to `next`
    async fn call(&self, req: Request<Body>, next: Next) -> Result<Response<Body>>;
}

/// Final handler at the end of a chain
pub type HandlerFn =
    Arc<dyn Fn(Request<Body>) -> BoxFuture<'static, Result<Response<Body>>> + Send + Sync>;

/// Represents the next middleware/handler in the chain
pub struct Next {
    chain: Arc<[Arc<dyn Middleware>]>,
    index: usize,
    handler: Option<HandlerFn>,
}

impl Next {
    /// Create a chain without a final handler
    pub fn new(chain: Arc<[Arc<dyn Middleware>]>) -> Self {
        Self {
            chain,
            index: 0,
            handler: None,
        }
    }

    /// Create a chain that ends in `handler`
    pub fn with_handler(chain: Arc<[Arc<dyn Middleware>]>, handler: HandlerFn) -> Self {
        Self {
            chain,
            index: 0,
            handler: Some(handler),
        }
    }

    /// Run the next middleware or the final handler
    pub async fn run(self, req: Request<Body>) -> Result<Response<Body>> {
        match self.chain.get(self.index) {
            Some(middleware) => {
                let next = Self {
                    chain: Arc::clone(&self.chain),
                    index: self.index + 1,
                    handler: self.handler.clone(),
                };
                middleware.call(req, next).await
            }
            None => match self.handler {
                Some(handler) => handler(req).await,
                None => Err(Error::Internal(
                    "Middleware chain completed without handler".to_string(),
                )),
            },
        }
    }
}

impl Clone for Next {
    fn clone(&self) -> Self {
        Self {
            chain: Arc::clone(&self.chain),
            index: self.index,
            handler: self.handler.clone(),
        }
    }
}

impl fmt::Debug for Next {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("index", &self.index)
            .field("remaining", &self.chain.len().saturating_sub(self.index))
            .finish()
    }
}

/// Where to insert a middleware
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Position {
    /// Append at the end of the stack
    Last,
    /// Insert right before the entry with this tag
    Before(String),
    /// Insert right after the entry with this tag
    After(String),
}

#[derive(Debug, Clone)]
struct Entry {
    tag: String,
    middleware: Arc<dyn Middleware>,
}

/// Ordered, tagged list of middleware
#[derive(Debug, Clone, Default)]
pub struct MiddlewareStack {
    entries: Vec<Entry>,
}

impl MiddlewareStack {
    /// Create an empty stack
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a middleware under `tag`
    pub fn add(&mut self, tag: impl Into<String>, middleware: Arc<dyn Middleware>) {
        self.entries.push(Entry {
            tag: tag.into(),
            middleware,
        });
    }

    /// Insert a middleware relative to an already registered tag
    pub fn add_at(
        &mut self,
        tag: impl Into<String>,
        middleware: Arc<dyn Middleware>,
        position: Position,
    ) -> Result<()> {
        let entry = Entry {
            tag: tag.into(),
            middleware,
        };

        let index = match &position {
            Position::Last => self.entries.len(),
            Position::Before(anchor) => self.index_of(anchor)?,
            Position::After(anchor) => self.index_of(anchor)? + 1,
        };

        self.entries.insert(index, entry);
        Ok(())
    }

    /// Remove every entry carrying `tag`; returns whether anything was removed
    pub fn remove(&mut self, tag: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.tag != tag);
        before != self.entries.len()
    }

    /// Tags in execution order
    pub fn tags(&self) -> Vec<&str> {
        self.entries.iter().map(|entry| entry.tag.as_str()).collect()
    }

    /// Number of middleware in the stack
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the stack is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Freeze the stack into a shareable chain
    pub fn compose(&self) -> Arc<[Arc<dyn Middleware>]> {
        self.entries
            .iter()
            .map(|entry| Arc::clone(&entry.middleware))
            .collect::<Vec<_>>()
            .into()
    }

    /// Run `req` through the stack, ending in `handler`
    pub async fn dispatch(&self, req: Request<Body>, handler: HandlerFn) -> Result<Response<Body>> {
        Next::with_handler(self.compose(), handler).run(req).await
    }

    fn index_of(&self, tag: &str) -> Result<usize> {
        self.entries
            .iter()
            .position(|entry| entry.tag == tag)
            .ok_or_else(|| Error::Middleware(format!("no middleware tagged '{tag}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use http::StatusCode;

    #[derive(Debug)]
    struct HeaderMiddleware {
        name: &'static str,
    }

    #[async_trait]
    impl Middleware for HeaderMiddleware {
        async fn call(&self, req: Request<Body>, next: Next) -> Result<Response<Body>> {
            let mut response = next.run(req).await?;
            let trail = response
                .headers()
                .get("x-trail")
                .and_then(|v| v.to_str().ok())
                .map(|v| format!("{v},{}", self.name))
                .unwrap_or_else(|| self.name.to_string());
            response
                .headers_mut()
                .insert("x-trail", trail.parse().unwrap());
            Ok(response)
        }
    }

    async fn respond_ok(_req: Request<Body>) -> Result<Response<Body>> {
        Ok(Response::builder()
            .status(StatusCode::OK)
            .body(Body::from("done"))?)
    }

    fn ok_handler() -> HandlerFn {
        Arc::new(|req| respond_ok(req).boxed())
    }

    fn request() -> Request<Body> {
        Request::builder().uri("/test").body(Body::from("test")).unwrap()
    }

    #[tokio::test]
    async fn test_chain_without_handler_errors() {
        let mut stack = MiddlewareStack::new();
        stack.add("first", Arc::new(HeaderMiddleware { name: "first" }));

        let result = Next::new(stack.compose()).run(request()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_dispatch_runs_in_tag_order() {
        let mut stack = MiddlewareStack::new();
        stack.add("logger", Arc::new(HeaderMiddleware { name: "logger" }));
        stack.add("resourcer", Arc::new(HeaderMiddleware { name: "resourcer" }));
        stack
            .add_at(
                "auth",
                Arc::new(HeaderMiddleware { name: "auth" }),
                Position::Before("resourcer".to_string()),
            )
            .unwrap();

        assert_eq!(stack.tags(), vec!["logger", "auth", "resourcer"]);

        let response = stack.dispatch(request(), ok_handler()).await.unwrap();
        // innermost middleware appends first
        assert_eq!(
            response.headers().get("x-trail").unwrap(),
            "resourcer,auth,logger"
        );
    }

    #[test]
    fn test_add_at_unknown_anchor() {
        let mut stack = MiddlewareStack::new();
        let result = stack.add_at(
            "auth",
            Arc::new(HeaderMiddleware { name: "auth" }),
            Position::After("missing".to_string()),
        );
        assert!(result.is_err());
        assert!(stack.is_empty());
    }

    #[test]
    fn test_remove_by_tag() {
        let mut stack = MiddlewareStack::new();
        stack.add("logger", Arc::new(HeaderMiddleware { name: "logger" }));
        assert!(stack.remove("logger"));
        assert!(!stack.remove("logger"));
        assert_eq!(stack.len(), 0);
    }
}
