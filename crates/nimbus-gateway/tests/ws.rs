//! WebSocket push tests against a real listener

use futures::StreamExt;
use nimbus_app::prelude::*;
use nimbus_config::GatewayConfig;
use nimbus_gateway::prelude::*;
use nimbus_supervisor::prelude::*;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

async fn serve() -> (Arc<Gateway>, SocketAddr) {
    let gateway = Arc::new(Gateway::new(GatewayConfig::default(), AppSupervisor::default()).unwrap());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(gateway.clone().serve(listener));
    (gateway, addr)
}

async fn connect(addr: SocketAddr, query: &str) -> Client {
    let (client, _) = connect_async(format!("ws://{addr}/ws{query}")).await.unwrap();
    client
}

async fn next_json(client: &mut Client) -> Value {
    tokio::time::timeout(WAIT, async {
        loop {
            match client.next().await {
                Some(Ok(Message::Text(text))) => return serde_json::from_str(&text).unwrap(),
                Some(Ok(_)) => continue,
                other => panic!("connection ended: {other:?}"),
            }
        }
    })
    .await
    .unwrap()
}

async fn wait_for_code(client: &mut Client, code: &str) -> Value {
    tokio::time::timeout(WAIT, async {
        loop {
            let message = next_json(client).await;
            if message["payload"]["code"] == code {
                return message;
            }
        }
    })
    .await
    .unwrap()
}

fn new_app(name: &str) -> Arc<Application> {
    Application::new(ApplicationOptions::new(name), Arc::new(MemoryConnector::new())).unwrap()
}

#[tokio::test]
async fn test_unknown_app_then_boot_error() {
    let (gateway, addr) = serve().await;
    let mut client = connect(addr, "").await;

    let greeting = next_json(&mut client).await;
    assert_eq!(greeting["type"], "appStatusChanged");
    assert_eq!(greeting["payload"]["message"], "app not ready, try booting app");

    let not_found = next_json(&mut client).await;
    assert_eq!(not_found["type"], "maintaining");
    assert_eq!(not_found["payload"]["code"], "APP_NOT_FOUND");
    assert_eq!(not_found["payload"]["message"], "application main not found");

    let supervisor = gateway.supervisor();
    supervisor.add_app(new_app("main")).unwrap();
    supervisor
        .fsm("main")
        .unwrap()
        .send(FsmEvent::Start {
            check_install: true,
        })
        .await;

    let error = wait_for_code(&mut client, "APP_ERROR").await;
    assert_eq!(error["type"], "maintaining");
    assert_eq!(error["payload"]["status"], 503);
    assert_eq!(error["payload"]["maintaining"], true);
}

#[tokio::test]
async fn test_registered_app_reports_current_state() {
    let (gateway, addr) = serve().await;
    gateway.supervisor().add_app(new_app("crm")).unwrap();

    let mut client = connect(addr, "?__appName=crm").await;
    let first = next_json(&mut client).await;
    assert_eq!(first["type"], "maintaining");
    assert_eq!(first["payload"]["code"], "APP_INITIALIZED");
}

#[tokio::test]
async fn test_status_pushed_only_to_tagged_clients() {
    let (gateway, addr) = serve().await;
    let supervisor = gateway.supervisor();
    supervisor.add_app(new_app("main")).unwrap();
    supervisor.add_app(new_app("crm")).unwrap();

    let mut main = connect(addr, "").await;
    let mut crm = connect(addr, "?__appName=crm").await;
    assert_eq!(next_json(&mut main).await["payload"]["code"], "APP_INITIALIZED");
    assert_eq!(next_json(&mut crm).await["payload"]["code"], "APP_INITIALIZED");

    supervisor.fsm("crm").unwrap().apply(FsmEvent::Stop);
    assert_eq!(next_json(&mut crm).await["payload"]["code"], "APP_STOPPED");

    supervisor.fsm("main").unwrap().apply(FsmEvent::Destroy);
    let message = next_json(&mut main).await;
    assert_eq!(message["payload"]["code"], "APP_NOT_FOUND");
}

#[tokio::test]
async fn test_working_message_forwarded() {
    let (gateway, addr) = serve().await;
    let app = new_app("main");
    gateway.supervisor().add_app(app.clone()).unwrap();

    let mut client = connect(addr, "").await;
    next_json(&mut client).await;

    app.set_maintaining_message("installing plugins").await;

    let message = next_json(&mut client).await;
    assert_eq!(message["type"], "maintaining");
    assert_eq!(message["payload"]["message"], "installing plugins");
}

#[tokio::test]
async fn test_closed_client_is_deregistered() {
    let (gateway, addr) = serve().await;
    gateway.supervisor().add_app(new_app("main")).unwrap();

    let mut client = connect(addr, "").await;
    next_json(&mut client).await;
    assert_eq!(gateway.ws().app_client_count("main"), 1);

    client.close(None).await.unwrap();
    drop(client);

    tokio::time::timeout(WAIT, async {
        while gateway.ws().client_count() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_shutdown_closes_connections() {
    let (gateway, addr) = serve().await;
    gateway.supervisor().add_app(new_app("main")).unwrap();

    let mut client = connect(addr, "").await;
    next_json(&mut client).await;

    gateway.shutdown_signal().trigger();

    let ended = tokio::time::timeout(WAIT, async {
        loop {
            match client.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(ended.is_ok());
}
