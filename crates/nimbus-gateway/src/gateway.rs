//! HTTP ingress
//!
//! Requests are routed by application name. A running application handles
//! the request through its own middleware; any other lifecycle state is
//! answered from the error table without touching the application.

use crate::errors::{ErrorKind, ErrorTable};
use crate::resolver::AppNameResolver;
use crate::shutdown::ShutdownSignal;
use crate::ws::WsServer;
use bytes::Bytes;
use http::{Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use nimbus_config::GatewayConfig;
use nimbus_core::response::responses;
use nimbus_core::{Body, Error, ErrorDetail, Result};
use nimbus_supervisor::{AppState, AppSupervisor};
use parking_lot::RwLock;
use std::convert::Infallible;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

/// Path answering with the status of every known application
pub const HEALTH_PATH: &str = "/__health";

/// Gateway in front of the supervised applications
pub struct Gateway {
    config: GatewayConfig,
    supervisor: AppSupervisor,
    resolver: AppNameResolver,
    errors: Arc<RwLock<ErrorTable>>,
    ws: WsServer,
    shutdown: ShutdownSignal,
    request_count: Arc<AtomicUsize>,
}

impl Gateway {
    /// Create a gateway routing to `supervisor`
    pub fn new(config: GatewayConfig, supervisor: AppSupervisor) -> Result<Self> {
        let resolver = AppNameResolver::new(&config)?;
        let errors = Arc::new(RwLock::new(ErrorTable::default()));
        let ws = WsServer::new(supervisor.clone(), resolver.clone(), errors.clone());

        Ok(Self {
            config,
            supervisor,
            resolver,
            errors,
            ws,
            shutdown: ShutdownSignal::new(),
            request_count: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Gateway configuration
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Supervisor the gateway routes to
    pub fn supervisor(&self) -> &AppSupervisor {
        &self.supervisor
    }

    /// WebSocket server
    pub fn ws(&self) -> &WsServer {
        &self.ws
    }

    /// Signal stopping [`Gateway::run`]
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Add or replace an error-table entry
    pub fn register_error(&self, kind: ErrorKind) {
        self.errors.write().register(kind);
    }

    /// Requests currently in flight
    pub fn active_requests(&self) -> usize {
        self.request_count.load(Ordering::Relaxed)
    }

    /// Name of the application `req` is meant for
    pub fn app_name<B>(&self, req: &Request<B>) -> String {
        self.resolver.resolve(req)
    }

    /// Error-table payload for `app` in `state`
    pub fn error_detail(&self, app: &str, state: AppState) -> ErrorDetail {
        let error = self.supervisor.app_error(app);
        self.errors.read().for_state(app, state, error.as_ref())
    }

    /// Route one request
    ///
    /// The state is read before an unknown name triggers its bootstrap, so
    /// the first request for a fresh name is answered `APP_INITIALIZING`.
    pub async fn handle(&self, req: Request<Body>) -> Result<Response<Body>> {
        if req.uri().path() == HEALTH_PATH {
            return responses::data(&self.supervisor.statuses());
        }

        let name = self.resolver.resolve(&req);
        let state = self.supervisor.app_status(&name);

        if !self.supervisor.has_app(&name) {
            self.spawn_bootstrap(&name);
        }

        let state = state.unwrap_or(AppState::Initializing);
        debug!(
            app = %name,
            state = %state,
            method = %req.method(),
            path = %req.uri().path(),
            "Routing request"
        );

        match state {
            AppState::Running => match self.supervisor.app(&name) {
                Some(app) => app.handle(req).await,
                None => responses::error(self.error_detail(&name, AppState::NotFound)),
            },
            state => responses::error(self.error_detail(&name, state)),
        }
    }

    fn spawn_bootstrap(&self, name: &str) {
        let supervisor = self.supervisor.clone();
        let name = name.to_string();
        tokio::spawn(async move {
            supervisor.bootstrap_app(&name).await;
        });
    }

    /// Bind the configured address and serve until shutdown
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let listener = TcpListener::bind(self.config.listen).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until shutdown
    ///
    /// On shutdown, waits for in-flight requests (bounded by the configured
    /// timeout), drops WebSocket clients and shuts the supervisor down.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        let addr = listener.local_addr()?;
        info!(addr = %addr, ws_path = %self.config.ws_path, "Gateway listening");

        let mut shutdown_rx = self.shutdown.subscribe();

        while !self.shutdown.is_triggered() {
            tokio::select! {
                accept = listener.accept() => {
                    match accept {
                        Ok((stream, peer)) => {
                            let gateway = self.clone();
                            tokio::spawn(async move {
                                gateway.serve_connection(stream, peer).await;
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }

                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        drop(listener);
        self.drain().await;
        self.ws.close();
        self.supervisor.shutdown().await;

        info!("Gateway stopped");
        Ok(())
    }

    async fn serve_connection(self: Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        let gateway = self.clone();
        let service = service_fn(move |req: Request<Incoming>| {
            let gateway = gateway.clone();
            async move { Ok::<_, Infallible>(gateway.dispatch(req).await) }
        });

        let io = TokioIo::new(stream);
        if let Err(e) = http1::Builder::new()
            .serve_connection(io, service)
            .with_upgrades()
            .await
        {
            debug!(peer = %peer, error = %e, "HTTP connection error");
        }
    }

    async fn dispatch(&self, mut req: Request<Incoming>) -> Response<Body> {
        let _active = ActiveRequest::new(&self.request_count);

        let result = if req.uri().path() == self.config.ws_path && WsServer::is_upgrade_request(&req) {
            self.ws.upgrade(&mut req)
        } else {
            let (parts, body) = req.into_parts();
            match body.collect().await {
                Ok(collected) => {
                    self.handle(Request::from_parts(parts, Full::new(collected.to_bytes())))
                        .await
                }
                Err(e) => Err(Error::from(e)),
            }
        };

        result.unwrap_or_else(|e| {
            warn!(error = %e, "Request failed");
            error_response(&e)
        })
    }

    async fn drain(&self) {
        let timeout = self.config.shutdown_timeout;
        let start = Instant::now();

        loop {
            let active = self.active_requests();
            if active == 0 {
                debug!("All requests completed");
                break;
            }

            if start.elapsed() >= timeout {
                warn!(active_requests = active, "Shutdown timeout reached, forcing shutdown");
                break;
            }

            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

impl fmt::Debug for Gateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gateway")
            .field("listen", &self.config.listen)
            .field("ws", &self.ws)
            .field("active_requests", &self.active_requests())
            .finish()
    }
}

struct ActiveRequest(Arc<AtomicUsize>);

impl ActiveRequest {
    fn new(count: &Arc<AtomicUsize>) -> Self {
        count.fetch_add(1, Ordering::Relaxed);
        Self(count.clone())
    }
}

impl Drop for ActiveRequest {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

fn error_response(err: &Error) -> Response<Body> {
    responses::from_error(err, false).unwrap_or_else(|_| {
        let mut response = Response::new(Full::new(Bytes::from_static(b"Internal Server Error")));
        *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        response
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> Gateway {
        Gateway::new(GatewayConfig::default(), AppSupervisor::default()).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let gateway = gateway();
        let req = Request::builder()
            .uri(HEALTH_PATH)
            .body(Full::new(Bytes::new()))
            .unwrap();

        let response = gateway.handle(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_register_error_overrides_message() {
        let gateway = gateway();
        gateway.register_error(ErrorKind::new(
            "APP_NOT_FOUND",
            "no such tenant: {app}",
            StatusCode::NOT_FOUND,
            false,
        ));

        let detail = gateway.error_detail("crm", AppState::NotFound);
        assert_eq!(detail.message, "no such tenant: crm");
        assert!(!detail.maintaining);
    }

    #[test]
    fn test_active_request_guard() {
        let count = Arc::new(AtomicUsize::new(0));
        {
            let _a = ActiveRequest::new(&count);
            let _b = ActiveRequest::new(&count);
            assert_eq!(count.load(Ordering::Relaxed), 2);
        }
        assert_eq!(count.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_serve_stops_on_shutdown() {
        let gateway = Arc::new(gateway());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let signal = gateway.shutdown_signal();

        let server = tokio::spawn(gateway.clone().serve(listener));
        signal.trigger();

        let result = tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}
