// Push-channel lifecycle against the in-process backend.
#![allow(clippy::unwrap_used)]

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use pretty_assertions::assert_eq;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};

use common::{FakeBackend, pair, test_config, token_expiring_in, tokens_body};
use techtrax_core::credentials::{ACCESS_TOKEN_KEY, CredentialStore, REFRESH_TOKEN_KEY};
use techtrax_core::realtime::{EVENT_CONNECTED, EVENT_DISCONNECT};
use techtrax_core::{
    ConnectionState, CoreError, EndReason, EventKind, MemoryCredentialStore, PushEvent,
    SessionContext, Subscription,
};

const WAIT: Duration = Duration::from_secs(5);

fn no_routes(_: &str, _: &str, _: &Value) -> (u16, Value) {
    (404, json!({ "status": "error", "message": "not found" }))
}

async fn next_event(sub: &mut Subscription) -> Arc<PushEvent> {
    tokio::time::timeout(WAIT, sub.recv())
        .await
        .expect("no event")
        .expect("subscription ended")
}

/// Read events until `name` arrives, returning everything seen.
async fn events_until(sub: &mut Subscription, name: &str) -> Vec<Arc<PushEvent>> {
    let mut seen = Vec::new();
    loop {
        let event = next_event(sub).await;
        let done = event.name == name;
        seen.push(event);
        if done {
            return seen;
        }
    }
}

#[tokio::test]
async fn test_login_stores_pair_and_channel_authenticates_with_it() {
    let a1 = token_expiring_in("A1", 3600);
    let login_token = a1.clone();
    let mut backend = FakeBackend::start(move |method, path, body| {
        if method == "POST" && path == "/api/auth/login" && body["email"] == "doc@clinic.test" {
            (200, tokens_body(&login_token, "R1"))
        } else {
            no_routes(method, path, body)
        }
    })
    .await;

    let store = Arc::new(MemoryCredentialStore::new());
    let ctx = SessionContext::new(test_config(backend.url.clone()), store.clone()).unwrap();
    let session = ctx
        .login("doc@clinic.test", &SecretString::from("pw"))
        .await
        .unwrap();
    assert_eq!(session.user_id, "doc-1");

    assert_eq!(
        store.get(ACCESS_TOKEN_KEY).unwrap().unwrap().expose_secret(),
        a1
    );
    assert_eq!(
        store.get(REFRESH_TOKEN_KEY).unwrap().unwrap().expose_secret(),
        "R1"
    );

    let channel = ctx.open_channel().await.unwrap();
    let peer = backend.next_peer().await;
    assert_eq!(peer.token, a1);

    let session = channel.wait_connected(WAIT).await.unwrap();
    assert_eq!(session.display_name, "Dr. Grey");
    assert_eq!(channel.state(), ConnectionState::Connected);

    ctx.logout().await.unwrap();
    assert!(!store.contains(ACCESS_TOKEN_KEY));
    assert_eq!(channel.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_rotated_token_reconnects_without_disconnect_event() {
    let a1 = token_expiring_in("A1", 3600);
    let a2 = token_expiring_in("A2", 3600);
    let mut backend = FakeBackend::start(no_routes).await;
    let store = Arc::new(MemoryCredentialStore::with_pair(&pair(&a1, "R1")));
    let ctx = SessionContext::new(test_config(backend.url.clone()), store).unwrap();

    let channel = ctx.open_channel().await.unwrap();
    let first = backend.next_peer().await;
    assert_eq!(first.token, a1);
    channel.wait_connected(WAIT).await.unwrap();
    let first_generation = channel.generation();

    let mut events = channel.subscribe_all();
    ctx.tokens().set_tokens(pair(&a2, "R2")).unwrap();
    assert!(channel.rotate_if_needed().await.unwrap());

    let second = backend.next_peer().await;
    assert_eq!(second.token, a2);

    let seen = events_until(&mut events, EVENT_CONNECTED).await;
    assert!(seen.iter().all(|e| e.name != EVENT_DISCONNECT), "{seen:?}");
    let connected = seen.last().unwrap();
    assert_eq!(connected.generation, first_generation + 1);

    second.push("queue:patientAdded", json!({ "queueId": "q1" }));
    let added = next_event(&mut events).await;
    assert_eq!(added.name, "queue:patientAdded");
    assert_eq!(added.kind, EventKind::Server);
    assert_eq!(added.generation, channel.generation());

    // the same token again is not a rotation
    assert!(!channel.rotate_if_needed().await.unwrap());
    channel.close().await;
}

#[tokio::test]
async fn test_timer_refreshes_expiring_token_and_reconnects() {
    let a1 = token_expiring_in("A1", 4);
    let a2 = token_expiring_in("A2", 3600);
    let refreshed = a2.clone();
    let mut backend = FakeBackend::start(move |method, path, body| {
        if method == "POST" && path == "/api/auth/refresh" {
            (200, tokens_body(&refreshed, "R2"))
        } else {
            no_routes(method, path, body)
        }
    })
    .await;

    let mut config = test_config(backend.url.clone());
    config.refresh_window = Duration::from_secs(2);
    config.token_check_interval = Duration::from_millis(250);
    let store = Arc::new(MemoryCredentialStore::with_pair(&pair(&a1, "R1")));
    let ctx = SessionContext::new(config, store).unwrap();

    let channel = ctx.open_channel().await.unwrap();
    assert_eq!(backend.next_peer().await.token, a1);

    let second = backend.next_peer().await;
    assert_eq!(second.token, a2);
    assert_eq!(backend.hits("/api/auth/refresh"), 1);
    channel.wait_connected(WAIT).await.unwrap();
    channel.close().await;
}

#[tokio::test]
async fn test_failed_refresh_tears_the_session_down() {
    let a1 = token_expiring_in("A1", 4);
    let mut backend = FakeBackend::start(|method, path, body| {
        if path == "/api/auth/refresh" {
            (401, json!({ "status": "error", "message": "Refresh token revoked" }))
        } else {
            no_routes(method, path, body)
        }
    })
    .await;

    let mut config = test_config(backend.url.clone());
    config.refresh_window = Duration::from_secs(2);
    config.token_check_interval = Duration::from_millis(250);
    let store = Arc::new(MemoryCredentialStore::with_pair(&pair(&a1, "R1")));
    let ctx = SessionContext::new(config, store.clone()).unwrap();

    let channel = ctx.open_channel().await.unwrap();
    let _peer = backend.next_peer().await;
    let mut ended = channel.ended();

    let reason = tokio::time::timeout(Duration::from_secs(10), ended.wait_for(Option::is_some))
        .await
        .unwrap()
        .unwrap()
        .clone();
    assert!(matches!(reason, Some(EndReason::SessionInvalid { .. })), "{reason:?}");
    assert_eq!(channel.state(), ConnectionState::Disconnected);
    assert!(channel.session().is_none());
    assert!(!store.contains(ACCESS_TOKEN_KEY));

    let err = channel.emit("chat:typing", json!({})).await.unwrap_err();
    assert!(matches!(err, CoreError::ChannelClosed));
}

#[tokio::test]
async fn test_refused_token_is_refreshed_before_reconnecting() {
    // locally valid for an hour, but the server says otherwise
    let a1 = token_expiring_in("A1", 3600);
    let a2 = token_expiring_in("A2", 3600);
    let refreshed = a2.clone();
    let mut backend = FakeBackend::start(move |method, path, body| {
        if method == "POST" && path == "/api/auth/refresh" {
            (200, tokens_body(&refreshed, "R2"))
        } else {
            no_routes(method, path, body)
        }
    })
    .await;
    backend.refuse_token(&a1);

    let store = Arc::new(MemoryCredentialStore::with_pair(&pair(&a1, "R1")));
    let ctx = SessionContext::new(test_config(backend.url.clone()), store.clone()).unwrap();

    let channel = ctx.open_channel().await.unwrap();
    let peer = backend.next_peer().await;
    assert_eq!(peer.token, a2);
    channel.wait_connected(WAIT).await.unwrap();

    assert_eq!(backend.refusals(), 1);
    assert_eq!(backend.hits("/api/auth/refresh"), 1);
    assert_eq!(
        store.get(ACCESS_TOKEN_KEY).unwrap().unwrap().expose_secret(),
        a2
    );
    channel.close().await;
}

#[tokio::test]
async fn test_refused_token_without_refresh_ends_the_session() {
    let a1 = token_expiring_in("A1", 3600);
    let backend = FakeBackend::start(|method, path, body| {
        if path == "/api/auth/refresh" {
            (401, json!({ "status": "error", "message": "Refresh token revoked" }))
        } else {
            no_routes(method, path, body)
        }
    })
    .await;
    backend.refuse_token(&a1);

    let store = Arc::new(MemoryCredentialStore::with_pair(&pair(&a1, "R1")));
    let ctx = SessionContext::new(test_config(backend.url.clone()), store.clone()).unwrap();

    let channel = ctx.open_channel().await.unwrap();
    let err = channel.wait_connected(WAIT).await.unwrap_err();
    assert!(matches!(err, CoreError::SessionInvalid { .. }), "{err:?}");

    let reason = channel.ended().borrow().clone();
    assert!(matches!(reason, Some(EndReason::SessionInvalid { .. })), "{reason:?}");
    assert_eq!(backend.refusals(), 1);
    assert_eq!(backend.hits("/api/auth/refresh"), 1);
    assert!(!store.contains(ACCESS_TOKEN_KEY));
}

#[tokio::test]
async fn test_dropped_transport_reconnects_and_announces_it() {
    let a1 = token_expiring_in("A1", 3600);
    let mut backend = FakeBackend::start(no_routes).await;
    let store = Arc::new(MemoryCredentialStore::with_pair(&pair(&a1, "R1")));
    let ctx = SessionContext::new(test_config(backend.url.clone()), store).unwrap();

    let channel = ctx.open_channel().await.unwrap();
    let first = backend.next_peer().await;
    channel.wait_connected(WAIT).await.unwrap();

    let mut lifecycle = channel.subscribe([EVENT_DISCONNECT, EVENT_CONNECTED]);
    first.kick();

    let disconnect = next_event(&mut lifecycle).await;
    assert_eq!(disconnect.name, EVENT_DISCONNECT);
    assert_eq!(disconnect.kind, EventKind::Lifecycle);

    let second = backend.next_peer().await;
    assert_eq!(second.token, a1);
    assert_eq!(next_event(&mut lifecycle).await.name, EVENT_CONNECTED);
    channel.close().await;
}

#[tokio::test]
async fn test_emit_with_ack_round_trip() {
    let a1 = token_expiring_in("A1", 3600);
    let mut backend = FakeBackend::start(no_routes).await;
    let store = Arc::new(MemoryCredentialStore::with_pair(&pair(&a1, "R1")));
    let ctx = SessionContext::new(test_config(backend.url.clone()), store).unwrap();

    let channel = ctx.open_channel().await.unwrap();
    let mut peer = backend.next_peer().await;
    channel.wait_connected(WAIT).await.unwrap();

    let ack = channel
        .emit_with_ack("chat:join", json!({ "conversationId": "c1" }))
        .await
        .unwrap();
    assert!(ack.success);
    assert_eq!(
        peer.next_frame().await,
        r#"421["chat:join",{"conversationId":"c1"}]"#
    );

    channel.emit("chat:typing", json!({ "conversationId": "c1" })).await.unwrap();
    assert!(peer.next_frame().await.starts_with(r#"42["chat:typing""#));
    channel.close().await;
}

#[tokio::test]
async fn test_subscription_unregisters_on_drop() {
    let a1 = token_expiring_in("A1", 3600);
    let backend = FakeBackend::start(no_routes).await;
    let store = Arc::new(MemoryCredentialStore::with_pair(&pair(&a1, "R1")));
    let ctx = SessionContext::new(test_config(backend.url.clone()), store).unwrap();
    let channel = ctx.open_channel().await.unwrap();

    let before = channel.subscriber_count();
    {
        let _scoped = channel.subscribe(["queue:reordered"]);
        assert_eq!(channel.subscriber_count(), before + 1);
    }
    assert_eq!(channel.subscriber_count(), before);
    channel.close().await;
}

#[tokio::test]
async fn test_queue_engine_follows_channel_events() {
    let a1 = token_expiring_in("A1", 3600);
    let fetches = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fetches);
    let mut backend = FakeBackend::start(move |method, path, body| {
        if method == "GET" && path == "/api/queue/my-queue" {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            let items: Vec<Value> = (1..=n)
                .map(|i| {
                    json!({
                        "_id": format!("i{i}"),
                        "patientName": format!("P{i}"),
                        "type": "walkIn",
                        "status": "waiting",
                        "position": i
                    })
                })
                .collect();
            (200, json!({
                "status": "success",
                "data": {
                    "_id": "q1", "tenantId": "t1", "doctorId": "doc-1",
                    "date": "2026-10-18", "status": "active", "queueItems": items
                }
            }))
        } else {
            no_routes(method, path, body)
        }
    })
    .await;

    let store = Arc::new(MemoryCredentialStore::with_pair(&pair(&a1, "R1")));
    let ctx = SessionContext::new(test_config(backend.url.clone()), store).unwrap();
    let engine = ctx.queue_engine();
    let channel = ctx.open_channel().await.unwrap();
    let tasks = engine.run(&channel, Duration::ZERO);
    let peer = backend.next_peer().await;

    let mut views = engine.view_changes();
    let loaded = tokio::time::timeout(WAIT, views.wait_for(|v| v.is_loaded()))
        .await
        .unwrap()
        .unwrap()
        .clone();
    assert_eq!(loaded.queue_id(), Some("q1"));

    let before = loaded.items().len();
    peer.push("queue:patientAdded", json!({ "queueId": "q1" }));
    let grown = tokio::time::timeout(WAIT, views.wait_for(|v| v.items().len() > before))
        .await
        .unwrap()
        .unwrap()
        .clone();
    assert!(grown.waiting_ids().len() > before);
    assert!(backend.hits("/api/queue/my-queue") >= 2);

    tasks.shutdown().await;
    channel.close().await;
}
