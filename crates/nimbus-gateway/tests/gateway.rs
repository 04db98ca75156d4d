//! Gateway routing tests

use http_body_util::BodyExt;
use nimbus_app::prelude::*;
use nimbus_config::GatewayConfig;
use nimbus_core::{Body, Bytes, Request, Response, StatusCode};
use nimbus_gateway::prelude::*;
use nimbus_supervisor::prelude::*;
use serde_json::Value;
use std::sync::Arc;

fn gateway() -> Gateway {
    Gateway::new(GatewayConfig::default(), AppSupervisor::default()).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .body(Body::new(Bytes::new()))
        .unwrap()
}

async fn json_body(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn installed_app(name: &str) -> Arc<Application> {
    let app = Application::new(ApplicationOptions::new(name), Arc::new(MemoryConnector::new()))
        .unwrap();
    app.run_command(AppCommand::Install(InstallOptions::default()), RunOptions::throwing())
        .await
        .unwrap();
    app
}

async fn running_app(supervisor: &AppSupervisor, name: &str) -> Arc<Application> {
    let app = installed_app(name).await;
    supervisor.add_app(app.clone()).unwrap();

    let state = supervisor
        .fsm(name)
        .unwrap()
        .send(FsmEvent::Start {
            check_install: true,
        })
        .await;
    assert_eq!(state, AppState::Running);
    app
}

#[tokio::test]
async fn test_fresh_gateway_initializing_then_not_found() {
    let gateway = gateway();

    let response = gateway.handle(get("/api/app:getInfo")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "APP_INITIALIZING");
    assert_eq!(body["error"]["message"], "application main is initializing");
    assert_eq!(body["error"]["maintaining"], true);

    assert_eq!(
        gateway.supervisor().bootstrap_app("main").await,
        AppState::NotFound
    );

    let response = gateway.handle(get("/api/app:getInfo")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "APP_NOT_FOUND");
    assert_eq!(body["error"]["message"], "application main not found");
    assert_eq!(body["error"]["status"], 404);
    assert_eq!(body["error"]["maintaining"], true);
}

#[tokio::test]
async fn test_registered_but_not_started() {
    let gateway = gateway();
    let app = Application::new(ApplicationOptions::new("main"), Arc::new(MemoryConnector::new()))
        .unwrap();
    gateway.supervisor().add_app(app).unwrap();

    let response = gateway.handle(get("/api/app:getInfo")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "APP_INITIALIZED");
}

#[tokio::test]
async fn test_commanding_app_reports_initializing() {
    let gateway = gateway();
    let app = Application::new(ApplicationOptions::new("main"), Arc::new(MemoryConnector::new()))
        .unwrap();
    gateway.supervisor().add_app(app).unwrap();

    let state = gateway
        .supervisor()
        .fsm("main")
        .unwrap()
        .apply(FsmEvent::CommandBegin);
    assert_eq!(state, AppState::Commanding);

    let response = gateway.handle(get("/api/app:getInfo")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "APP_INITIALIZING");
    assert_eq!(body["error"]["message"], "application main is initializing");
    assert_eq!(body["error"]["maintaining"], true);
}

#[tokio::test]
async fn test_running_app_handles_request() {
    let gateway = gateway();
    running_app(gateway.supervisor(), "main").await;

    let response = gateway.handle(get("/api/app:getInfo")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["data"]["name"], "main");
}

#[tokio::test]
async fn test_unknown_action_on_running_app() {
    let gateway = gateway();
    running_app(gateway.supervisor(), "main").await;

    let response = gateway.handle(get("/api/app:nothing")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_destroyed_app_is_not_found() {
    let gateway = gateway();
    running_app(gateway.supervisor(), "main").await;

    gateway.supervisor().remove_app("main").await.unwrap();

    let response = gateway.handle(get("/api/app:getInfo")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "APP_NOT_FOUND");
}

#[tokio::test]
async fn test_boot_error_is_reported() {
    let gateway = gateway();
    let app = Application::new(ApplicationOptions::new("main"), Arc::new(MemoryConnector::new()))
        .unwrap();
    gateway.supervisor().add_app(app).unwrap();

    let state = gateway
        .supervisor()
        .fsm("main")
        .unwrap()
        .send(FsmEvent::Start {
            check_install: true,
        })
        .await;
    assert_eq!(state, AppState::Error);

    let response = gateway.handle(get("/api/app:getInfo")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "APP_ERROR");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("not installed"));
}

#[tokio::test]
async fn test_routes_by_header_and_query() {
    let gateway = gateway();
    running_app(gateway.supervisor(), "crm").await;

    let req = Request::builder()
        .uri("/api/app:getInfo")
        .header("x-app", "crm")
        .body(Body::new(Bytes::new()))
        .unwrap();
    let body = json_body(gateway.handle(req).await.unwrap()).await;
    assert_eq!(body["data"]["name"], "crm");

    let body = json_body(
        gateway
            .handle(get("/api/app:getInfo?__appName=crm"))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(body["data"]["name"], "crm");
}

#[tokio::test]
async fn test_routes_by_host() {
    let mut config = GatewayConfig::default();
    config
        .host_map
        .insert("crm.example.com".to_string(), "crm".to_string());
    let gateway = Gateway::new(config, AppSupervisor::default()).unwrap();
    running_app(gateway.supervisor(), "crm").await;

    let req = Request::builder()
        .uri("/api/app:getInfo")
        .header("host", "crm.example.com:13000")
        .body(Body::new(Bytes::new()))
        .unwrap();
    let body = json_body(gateway.handle(req).await.unwrap()).await;
    assert_eq!(body["data"]["name"], "crm");
}

#[tokio::test]
async fn test_health_lists_statuses() {
    let gateway = gateway();
    running_app(gateway.supervisor(), "main").await;

    let body = json_body(gateway.handle(get("/__health")).await.unwrap()).await;
    assert_eq!(body["data"]["main"], "running");
}
