// Integration tests for `ApiClient` using wiremock.
#![allow(clippy::unwrap_used)]

use pretty_assertions::assert_eq;
use reqwest::Method;
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use url::Url;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use techtrax_api::models::QueueSnapshot;
use techtrax_api::{ApiClient, Error};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, ApiClient) {
    let server = MockServer::start().await;
    let url = Url::parse(&server.uri()).unwrap();
    let client = ApiClient::with_client(reqwest::Client::new(), url);
    (server, client)
}

// ── Auth ────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_login_nested_tokens() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .and(body_json(json!({ "email": "doc@x.com", "password": "pw" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "success",
            "data": { "tokens": { "accessToken": "A1", "refreshToken": "R1" } }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let pair = client
        .login("doc@x.com", &SecretString::from("pw"))
        .await
        .unwrap();
    assert_eq!(pair.access_token.expose_secret(), "A1");
    assert_eq!(pair.refresh_token.expose_secret(), "R1");
}

#[tokio::test]
async fn test_login_without_refresh_token_reuses_access() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "token": "T" })))
        .mount(&server)
        .await;

    let pair = client.login("a@b.c", &SecretString::from("x")).await.unwrap();
    assert_eq!(pair.access_token.expose_secret(), "T");
    assert_eq!(pair.refresh_token.expose_secret(), "T");
}

#[tokio::test]
async fn test_login_data_token_without_refresh() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "success",
            "data": { "token": "D" }
        })))
        .mount(&server)
        .await;

    let pair = client.login("a@b.c", &SecretString::from("x")).await.unwrap();
    assert_eq!(pair.access_token.expose_secret(), "D");
    assert_eq!(pair.refresh_token.expose_secret(), "D");
}

#[tokio::test]
async fn test_login_rejected_carries_server_message() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "status": "fail",
            "message": "Incorrect email or password"
        })))
        .mount(&server)
        .await;

    let err = client
        .login("a@b.c", &SecretString::from("bad"))
        .await
        .unwrap_err();
    match err {
        Error::Authentication { message } => assert_eq!(message, "Incorrect email or password"),
        other => panic!("expected Authentication, got {other:?}"),
    }
}

#[tokio::test]
async fn test_refresh_sends_refresh_token_as_bearer() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api/auth/refresh"))
        .and(header("authorization", "Bearer R1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "success",
            "data": { "tokens": { "accessToken": "A2", "refreshToken": "R2" } }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let pair = client.refresh(&SecretString::from("R1")).await.unwrap();
    assert_eq!(pair.access_token.expose_secret(), "A2");
    assert_eq!(pair.refresh_token.expose_secret(), "R2");
}

#[tokio::test]
async fn test_refresh_without_tokens_is_rejected() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api/auth/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "success",
            "data": {}
        })))
        .mount(&server)
        .await;

    let err = client.refresh(&SecretString::from("R1")).await.unwrap_err();
    assert!(matches!(err, Error::RefreshRejected { .. }));
}

// ── Envelope handling ───────────────────────────────────────────────

#[tokio::test]
async fn test_send_decodes_snapshot() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/queue/my-queue"))
        .and(header("authorization", "Bearer A1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "success",
            "data": {
                "_id": "q1",
                "tenantId": "t1",
                "doctorId": "d1",
                "date": "2026-10-18",
                "status": "active",
                "queueItems": []
            }
        })))
        .mount(&server)
        .await;

    let resp = client
        .send(Method::GET, "/queue/my-queue", Some("A1"), None)
        .await
        .unwrap();
    assert!(resp.envelope.is_success());
    let snap: QueueSnapshot = resp.data().unwrap();
    assert_eq!(snap.id, "q1");
}

#[tokio::test]
async fn test_send_maps_401_to_unauthorized() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/queue/my-queue"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "status": "fail",
            "message": "jwt expired"
        })))
        .mount(&server)
        .await;

    let err = client
        .send(Method::GET, "/queue/my-queue", Some("stale"), None)
        .await
        .unwrap_err();
    assert!(err.is_unauthorized());
    assert!(err.to_string().contains("jwt expired"));
}

#[tokio::test]
async fn test_send_keeps_failure_envelope() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api/queue/call"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "status": "fail",
            "message": "Queue item is locked"
        })))
        .mount(&server)
        .await;

    let body = json!({ "queueItemId": "i1" });
    let resp = client
        .send(Method::POST, "/queue/call", Some("A1"), Some(&body))
        .await
        .unwrap();
    assert!(!resp.envelope.is_success());
    assert_eq!(resp.status.as_u16(), 400);
    assert_eq!(resp.envelope.message.as_deref(), Some("Queue item is locked"));
}

#[tokio::test]
async fn test_send_non_json_error_is_api_error() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/queue/stats/q1"))
        .respond_with(ResponseTemplate::new(502).set_body_string("Bad Gateway"))
        .mount(&server)
        .await;

    let err = client
        .send(Method::GET, "/queue/stats/q1", Some("A1"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Api { status: 502, .. }));
}
