//! HTTP surface tests for the billing service.
//!
//! The router runs over the in-memory ledger and a mock chain; requests go
//! through `tower::ServiceExt::oneshot`.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use base64::{engine::general_purpose::STANDARD, Engine};
use billing_service::repositories::mock::MockLedger;
use billing_service::repositories::Ledger;
use billing_service::routes::{build_routes, AppState};
use billing_service::services::{ConferenceService, ConfirmationSigner};
use common::chain::mock::MockChainClient;
use common::chain::ChainClient;
use common::signer::{AccountPublicKey, AccountSigner};
use common::types::ConferenceUser;
use http_body_util::BodyExt;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

struct TestApp {
    router: Router,
    ledger: Arc<MockLedger>,
    public_key: AccountPublicKey,
}

fn app(chain: MockChainClient) -> TestApp {
    let ledger = Arc::new(MockLedger::new());
    let signer = Arc::new(AccountSigner::from_seed(&[5u8; 32]).unwrap());
    let public_key = *signer.public_key();
    let chain: Arc<dyn ChainClient> = Arc::new(chain);
    let ledger_dyn: Arc<dyn Ledger> = Arc::clone(&ledger) as Arc<dyn Ledger>;
    let conferences = Arc::new(ConferenceService::new(
        ledger_dyn,
        Arc::clone(&chain),
        ConfirmationSigner::new(signer, chain),
        "nmeet.near".to_string(),
        "https://nmeet.org".to_string(),
    ));
    TestApp {
        router: build_routes(Arc::new(AppState { conferences }), None),
        ledger,
        public_key,
    }
}

fn default_chain() -> MockChainClient {
    MockChainClient::new()
        .with_nodes(&["wss://node-1.example"])
        .with_epoch(321)
}

async fn send(router: &Router, method: Method, uri: &str) -> (StatusCode, Value) {
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

async fn create(app: &TestApp, name: &str) -> ConferenceUser {
    let (status, body) = send(
        &app.router,
        Method::POST,
        &format!("/api/participant/create/{name}"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    serde_json::from_str(body["sid"].as_str().unwrap()).unwrap()
}

#[tokio::test]
async fn test_create_returns_verifiable_credential() {
    let app = app(default_chain());

    let (status, body) = send(&app.router, Method::POST, "/api/participant/create/alice").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["url"], "wss://node-1.example");

    let credential = body["sid"].as_str().unwrap();
    let signature = STANDARD.decode(body["uid"].as_str().unwrap()).unwrap();
    assert!(app.public_key.verify(credential.as_bytes(), &signature));

    let user: ConferenceUser = serde_json::from_str(credential).unwrap();
    assert_eq!(user.account_id, "nmeet.near");
    assert_eq!(user.callback_url, "https://nmeet.org");
    assert!(app.ledger.conference(&user.sid).is_some());
}

#[tokio::test]
async fn test_create_without_nodes_is_503() {
    let app = app(MockChainClient::new());

    let (status, body) = send(&app.router, Method::POST, "/api/participant/create/alice").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "SERVICE_UNAVAILABLE");
}

#[tokio::test]
async fn test_join_flow() {
    let app = app(default_chain());
    let host = create(&app, "alice").await;

    let (status, body) = send(
        &app.router,
        Method::POST,
        &format!("/api/participant/join/{}/bob", host.sid),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let guest: ConferenceUser = serde_json::from_str(body["sid"].as_str().unwrap()).unwrap();
    assert_eq!(guest.sid, host.sid);
    assert_eq!(guest.call_id, host.call_id);

    let (status, _) = send(&app.router, Method::POST, "/api/participant/join/nope/bob").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_join_after_end_is_400_ended() {
    let app = app(default_chain());
    let host = create(&app, "alice").await;

    let (status, _) = send(
        &app.router,
        Method::PUT,
        &format!("/api/conference/remove/{}/2", host.sid),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(
        &app.router,
        Method::POST,
        &format!("/api/participant/join/{}/bob", host.sid),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["message"], "ended");
}

#[tokio::test]
async fn test_callbacks_return_signed_confirmations() {
    let app = app(default_chain());
    let host = create(&app, "alice").await;

    let (status, body) = send(
        &app.router,
        Method::PUT,
        &format!("/api/participant/add/{}/{}/cam/0", host.sid, host.uid),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["epoch"], 321);
    let signature = STANDARD.decode(body["signature"].as_str().unwrap()).unwrap();
    let message = format!("{}:0:321", host.call_id);
    assert!(app.public_key.verify(message.as_bytes(), &signature));

    let (status, body) = send(
        &app.router,
        Method::PUT,
        &format!("/api/participant/remove/{}/{}/1", host.sid, host.uid),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let signature = STANDARD.decode(body["signature"].as_str().unwrap()).unwrap();
    let message = format!("{}:1:321", host.call_id);
    assert!(app.public_key.verify(message.as_bytes(), &signature));

    let (status, body) = send(
        &app.router,
        Method::PUT,
        &format!("/api/conference/remove/{}/1", host.sid),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["epoch"], 321);

    let row = app.ledger.participant(&host.sid, &host.uid).unwrap();
    assert_eq!(row.stream_id.as_deref(), Some("cam"));
    assert!(row.added_at.is_some());
    assert!(row.removed_at.is_some());
    assert_eq!(app.ledger.conference(&host.sid).unwrap().duration, Some(1));
}

#[tokio::test]
async fn test_callbacks_for_unknown_rows_are_404() {
    let app = app(default_chain());
    let host = create(&app, "alice").await;

    for uri in [
        format!("/api/participant/add/{}/ghost/cam/0", host.sid),
        format!("/api/participant/add/missing/{}/cam/0", host.uid),
        format!("/api/participant/remove/{}/ghost/0", host.sid),
        "/api/conference/remove/missing/0".to_string(),
    ] {
        let (status, body) = send(&app.router, Method::PUT, &uri).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
        assert_eq!(body["error"]["code"], "NOT_FOUND");
    }
}

#[tokio::test]
async fn test_non_numeric_duration_is_rejected() {
    let app = app(default_chain());
    let host = create(&app, "alice").await;

    let (status, _) = send(
        &app.router,
        Method::PUT,
        &format!("/api/conference/remove/{}/soon", host.sid),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_list_participants() {
    let app = app(default_chain());
    let host = create(&app, "alice").await;
    send(
        &app.router,
        Method::POST,
        &format!("/api/participant/join/{}/bob", host.sid),
    )
    .await;

    let (status, body) = send(
        &app.router,
        Method::GET,
        &format!("/api/participants?sid={}", host.sid),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["alice", "bob"]);

    let (status, body) = send(&app.router, Method::GET, "/api/participants?sid=none").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, serde_json::json!([]));
}

#[tokio::test]
async fn test_ledger_read_failure_is_500() {
    let app = app(default_chain());
    let host = create(&app, "alice").await;
    app.ledger.set_failing_reads(true);

    let (status, body) = send(
        &app.router,
        Method::GET,
        &format!("/api/participants?sid={}", host.sid),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["code"], "DATABASE_ERROR");
}

#[tokio::test]
async fn test_health_reflects_ledger() {
    let app = app(default_chain());

    let (status, body) = send(&app.router, Method::GET, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    app.ledger.set_failing_reads(true);
    let (status, body) = send(&app.router, Method::GET, "/health").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["database"], "unhealthy");
}
