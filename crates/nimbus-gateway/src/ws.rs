//! WebSocket status push
//!
//! Each connection is tagged `app#<name>` with the application its upgrade
//! request resolved to. Supervisor status and working-message changes are
//! fanned out to the connections carrying the matching tag.

use crate::errors::ErrorTable;
use crate::resolver::AppNameResolver;
use base64::{engine::general_purpose, Engine as _};
use bytes::Bytes;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use http::{header, Request, Response, StatusCode};
use http_body_util::Full;
use hyper_util::rt::TokioIo;
use nimbus_app::MaintainingCommandStatus;
use nimbus_core::{Body, Error, ErrorDetail, Result};
use nimbus_supervisor::{AppState, AppSupervisor, StatusChanged, Subscription, WorkingMessageChanged};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::fmt;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::{Message, Role};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, warn};
use uuid::Uuid;

/// RFC 6455 GUID for the accept key
const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

const NOT_READY_MESSAGE: &str = "app not ready, try booting app";

/// Outbound message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum WsMessage {
    /// Lifecycle status or working message of the client's application
    Maintaining(MaintainingPayload),
    /// The application is not registered yet
    AppStatusChanged {
        /// Human readable message
        message: String,
    },
}

/// Payload of a `maintaining` message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MaintainingPayload {
    /// Error-table entry for the current state
    Status(ErrorDetail),
    /// Progress message of a running command
    Working {
        /// Message text
        message: String,
        /// Maintaining status at the time of the message
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<MaintainingCommandStatus>,
    },
}

struct WsClient {
    app: String,
    tags: Vec<String>,
    sender: mpsc::UnboundedSender<WsMessage>,
}

type Clients = Arc<DashMap<Uuid, WsClient>>;

struct WsInner {
    supervisor: AppSupervisor,
    resolver: AppNameResolver,
    errors: Arc<RwLock<ErrorTable>>,
    clients: Clients,
    subscriptions: Mutex<Vec<Subscription>>,
}

/// WebSocket connection registry
#[derive(Clone)]
pub struct WsServer {
    inner: Arc<WsInner>,
}

impl WsServer {
    /// Create a server and subscribe it to the supervisor
    pub fn new(
        supervisor: AppSupervisor,
        resolver: AppNameResolver,
        errors: Arc<RwLock<ErrorTable>>,
    ) -> Self {
        let clients: Clients = Arc::new(DashMap::new());

        let status = {
            let clients = clients.clone();
            let errors = errors.clone();
            supervisor.on_status_changed(move |event: &StatusChanged| {
                let payload = errors
                    .read()
                    .for_state(&event.app, event.state, event.error.as_ref());
                send_to_tag(
                    &clients,
                    &app_tag(&event.app),
                    WsMessage::Maintaining(MaintainingPayload::Status(payload)),
                );
            })
        };

        let working = {
            let clients = clients.clone();
            supervisor.on_working_message_changed(move |event: &WorkingMessageChanged| {
                send_to_tag(
                    &clients,
                    &app_tag(&event.app),
                    WsMessage::Maintaining(MaintainingPayload::Working {
                        message: event.message.clone(),
                        status: event.status.clone(),
                    }),
                );
            })
        };

        Self {
            inner: Arc::new(WsInner {
                supervisor,
                resolver,
                errors,
                clients,
                subscriptions: Mutex::new(vec![status, working]),
            }),
        }
    }

    /// Whether `req` asks for a WebSocket upgrade
    pub fn is_upgrade_request<B>(req: &Request<B>) -> bool {
        let upgrade = req
            .headers()
            .get(header::UPGRADE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.eq_ignore_ascii_case("websocket"))
            .unwrap_or(false);

        let connection = req
            .headers()
            .get(header::CONNECTION)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(',').any(|s| s.trim().eq_ignore_ascii_case("upgrade")))
            .unwrap_or(false);

        upgrade && connection
    }

    /// Answer the handshake and serve the connection once hyper hands it over
    ///
    /// The connection must be served with upgrades enabled.
    pub fn upgrade<B>(&self, req: &mut Request<B>) -> Result<Response<Body>> {
        if !Self::is_upgrade_request(req) {
            return Err(Error::InvalidRequest(
                "Not a valid WebSocket upgrade request".to_string(),
            ));
        }

        let key = req
            .headers()
            .get(header::SEC_WEBSOCKET_KEY)
            .ok_or_else(|| Error::InvalidRequest("Missing Sec-WebSocket-Key".to_string()))?;

        let version = req
            .headers()
            .get(header::SEC_WEBSOCKET_VERSION)
            .and_then(|v| v.to_str().ok());
        if version != Some("13") {
            return Err(Error::InvalidRequest(format!(
                "Unsupported WebSocket version: {}",
                version.unwrap_or("none")
            )));
        }

        let accept = accept_key(key.as_bytes());
        let app = self.inner.resolver.resolve(req);
        let on_upgrade = hyper::upgrade::on(req);

        let server = self.clone();
        tokio::spawn(async move {
            match on_upgrade.await {
                Ok(upgraded) => {
                    let stream =
                        WebSocketStream::from_raw_socket(TokioIo::new(upgraded), Role::Server, None)
                            .await;
                    server.handle_socket(stream, app).await;
                }
                Err(e) => warn!(app = %app, error = %e, "WebSocket upgrade failed"),
            }
        });

        Ok(Response::builder()
            .status(StatusCode::SWITCHING_PROTOCOLS)
            .header(header::UPGRADE, "websocket")
            .header(header::CONNECTION, "Upgrade")
            .header(header::SEC_WEBSOCKET_ACCEPT, accept)
            .body(Full::new(Bytes::new()))?)
    }

    /// Serve an established connection for `app` until it closes
    pub async fn handle_socket<S>(&self, stream: WebSocketStream<S>, app: String)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let id = Uuid::new_v4();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _guard = self.register(id, &app, tx.clone());
        debug!(client = %id, app = %app, "WebSocket client connected");

        self.greet(&app, &tx);
        drop(tx);

        let (mut sink, mut source) = stream.split();

        let writer = async move {
            while let Some(message) = rx.recv().await {
                let text = match serde_json::to_string(&message) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(error = %e, "Failed to encode WebSocket message");
                        continue;
                    }
                };
                if sink.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        };

        let reader = async move {
            while let Some(frame) = source.next().await {
                match frame {
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        debug!(error = %e, "WebSocket read error");
                        break;
                    }
                }
            }
        };

        tokio::select! {
            _ = writer => {}
            _ = reader => {}
        }

        debug!(client = %id, app = %app, "WebSocket client disconnected");
    }

    fn register(&self, id: Uuid, app: &str, sender: mpsc::UnboundedSender<WsMessage>) -> ClientGuard {
        self.inner.clients.insert(
            id,
            WsClient {
                app: app.to_string(),
                tags: vec![app_tag(app)],
                sender,
            },
        );

        ClientGuard {
            clients: self.inner.clients.clone(),
            id,
        }
    }

    fn greet(&self, app: &str, tx: &mpsc::UnboundedSender<WsMessage>) {
        let supervisor = &self.inner.supervisor;
        let status = match supervisor.fsm(app) {
            Some(fsm) => Some((fsm.state(), fsm.last_error())),
            None if supervisor.app_status(app) == Some(AppState::NotFound) => {
                Some((AppState::NotFound, None))
            }
            None => None,
        };

        match status {
            Some((state, error)) => {
                let payload = self.inner.errors.read().for_state(app, state, error.as_ref());
                let _ = tx.send(WsMessage::Maintaining(MaintainingPayload::Status(payload)));
            }
            None => {
                let _ = tx.send(WsMessage::AppStatusChanged {
                    message: NOT_READY_MESSAGE.to_string(),
                });

                let supervisor = supervisor.clone();
                let app = app.to_string();
                tokio::spawn(async move {
                    supervisor.bootstrap_app(&app).await;
                });
            }
        }
    }

    /// Send `message` to every connection of `app`; returns the number reached
    pub fn send_to_app(&self, app: &str, message: WsMessage) -> usize {
        send_to_tag(&self.inner.clients, &app_tag(app), message)
    }

    /// Open connections
    pub fn client_count(&self) -> usize {
        self.inner.clients.len()
    }

    /// Open connections of `app`
    pub fn app_client_count(&self, app: &str) -> usize {
        self.inner
            .clients
            .iter()
            .filter(|client| client.app == app)
            .count()
    }

    /// Unsubscribe from the supervisor and drop every connection
    pub fn close(&self) {
        for subscription in self.inner.subscriptions.lock().drain(..) {
            subscription.unsubscribe();
        }
        self.inner.clients.clear();
    }
}

impl fmt::Debug for WsServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsServer")
            .field("clients", &self.inner.clients.len())
            .finish()
    }
}

struct ClientGuard {
    clients: Clients,
    id: Uuid,
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        self.clients.remove(&self.id);
    }
}

fn app_tag(app: &str) -> String {
    format!("app#{app}")
}

fn send_to_tag(clients: &DashMap<Uuid, WsClient>, tag: &str, message: WsMessage) -> usize {
    let mut sent = 0;
    for client in clients.iter() {
        if client.tags.iter().any(|t| t == tag) && client.sender.send(message.clone()).is_ok() {
            sent += 1;
        }
    }
    sent
}

/// `Sec-WebSocket-Accept` value for a client key
fn accept_key(key: &[u8]) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key);
    sha1.update(WS_GUID.as_bytes());
    general_purpose::STANDARD.encode(sha1.finalize())
}
