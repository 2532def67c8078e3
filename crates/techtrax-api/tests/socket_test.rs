// Push-channel tests against an in-process Socket.IO speaker.
#![allow(clippy::unwrap_used)]

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use techtrax_api::Error;
use techtrax_api::socket::{Incoming, SocketTransport};

const OPEN: &str = r#"0{"sid":"eio-1","upgrades":[],"pingInterval":300,"pingTimeout":200,"maxPayload":1000000}"#;

type ServerWs = tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>;

async fn text(ws: &mut ServerWs) -> String {
    loop {
        match ws.next().await.unwrap().unwrap() {
            Message::Text(t) => return t.as_str().to_owned(),
            Message::Close(_) => return String::new(),
            _ => {}
        }
    }
}

async fn send(ws: &mut ServerWs, frame: &str) {
    ws.send(Message::Text(frame.to_owned().into())).await.unwrap();
}

/// Accept one client, complete the handshake and report the auth payload.
async fn spawn_server<F, Fut>(script: F) -> (Url, oneshot::Receiver<Value>)
where
    F: FnOnce(ServerWs) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (auth_tx, auth_rx) = oneshot::channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        send(&mut ws, OPEN).await;

        let connect = text(&mut ws).await;
        let auth: Value = serde_json::from_str(connect.strip_prefix("40").unwrap()).unwrap();
        let _ = auth_tx.send(auth);
        script(ws).await;
    });

    let url = Url::parse(&format!(
        "ws://{addr}/socket.io/?EIO=4&transport=websocket"
    ))
    .unwrap();
    (url, auth_rx)
}

#[tokio::test]
async fn test_handshake_sends_token_and_receives_events() {
    let (url, auth_rx) = spawn_server(|mut ws| async move {
        send(&mut ws, r#"40{"sid":"sock-1"}"#).await;
        send(
            &mut ws,
            r#"42["connected",{"user":{"id":"u1","role":"doctor"}}]"#,
        )
        .await;
        // hold the socket open until the client leaves
        let _ = text(&mut ws).await;
    })
    .await;

    let mut transport = SocketTransport::connect(&url, json!({ "token": "A1" }), Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(transport.sid(), "sock-1");
    assert_eq!(auth_rx.await.unwrap(), json!({ "token": "A1" }));

    let incoming = transport.next().await.unwrap();
    assert_eq!(
        incoming,
        Incoming::Event {
            name: "connected".into(),
            args: vec![json!({ "user": { "id": "u1", "role": "doctor" } })],
            ack_id: None,
        }
    );
    transport.close().await.unwrap();
}

#[tokio::test]
async fn test_ping_is_answered_and_ack_is_routed() {
    let (url, _auth) = spawn_server(|mut ws| async move {
        send(&mut ws, r#"40{"sid":"sock-2"}"#).await;
        let emit = text(&mut ws).await;
        assert_eq!(emit, r#"421["chat:join",{"chatId":"c1"}]"#);

        send(&mut ws, "2").await;
        assert_eq!(text(&mut ws).await, "3");
        send(&mut ws, r#"431[{"success":true}]"#).await;
        let _ = text(&mut ws).await;
    })
    .await;

    let mut transport = SocketTransport::connect(&url, json!({ "token": "A1" }), Duration::from_secs(5))
        .await
        .unwrap();
    transport
        .emit("chat:join", vec![json!({ "chatId": "c1" })], Some(1))
        .await
        .unwrap();

    let incoming = transport.next().await.unwrap();
    assert_eq!(
        incoming,
        Incoming::Ack {
            id: 1,
            args: vec![json!({ "success": true })],
        }
    );
}

#[tokio::test]
async fn test_connect_error_is_rejected() {
    let (url, _auth) = spawn_server(|mut ws| async move {
        send(&mut ws, r#"44{"message":"Authentication error"}"#).await;
        let _ = text(&mut ws).await;
    })
    .await;

    let result = SocketTransport::connect(&url, json!({ "token": "bad" }), Duration::from_secs(5)).await;
    match result {
        Err(Error::ConnectRejected { message }) => assert_eq!(message, "Authentication error"),
        Err(other) => panic!("expected ConnectRejected, got {other:?}"),
        Ok(_) => panic!("expected ConnectRejected, got a session"),
    }
}

#[tokio::test]
async fn test_silent_server_trips_heartbeat() {
    let (url, _auth) = spawn_server(|mut ws| async move {
        send(&mut ws, r#"40{"sid":"sock-3"}"#).await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        drop(ws);
    })
    .await;

    let mut transport = SocketTransport::connect(&url, json!({ "token": "A1" }), Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(transport.heartbeat(), Duration::from_millis(500));

    let err = transport.next().await.unwrap_err();
    assert!(matches!(err, Error::HeartbeatTimeout { timeout_ms: 500 }));
}

#[tokio::test]
async fn test_chatty_server_without_pings_still_trips_heartbeat() {
    let (url, _auth) = spawn_server(|mut ws| async move {
        send(&mut ws, r#"40{"sid":"sock-4"}"#).await;
        // events keep arriving well inside the heartbeat, pings never do
        for _ in 0..30 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if ws.send(Message::Text(r#"42["tick"]"#.to_owned().into())).await.is_err() {
                return;
            }
        }
    })
    .await;

    let mut transport = SocketTransport::connect(&url, json!({ "token": "A1" }), Duration::from_secs(5))
        .await
        .unwrap();

    let mut ticks = 0;
    let err = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match transport.next().await {
                Ok(Incoming::Event { name, .. }) if name == "tick" => ticks += 1,
                Ok(other) => panic!("unexpected {other:?}"),
                Err(e) => return e,
            }
        }
    })
    .await
    .expect("heartbeat never tripped");
    assert!(matches!(err, Error::HeartbeatTimeout { timeout_ms: 500 }), "{err:?}");
    assert!(ticks >= 2, "only {ticks} ticks before the timeout");
}

#[tokio::test]
async fn test_pings_keep_the_session_alive() {
    let (url, _auth) = spawn_server(|mut ws| async move {
        send(&mut ws, r#"40{"sid":"sock-5"}"#).await;
        for _ in 0..4 {
            tokio::time::sleep(Duration::from_millis(250)).await;
            send(&mut ws, "2").await;
            assert_eq!(text(&mut ws).await, "3");
        }
        send(&mut ws, r#"42["done"]"#).await;
        let _ = text(&mut ws).await;
    })
    .await;

    let mut transport = SocketTransport::connect(&url, json!({ "token": "A1" }), Duration::from_secs(5))
        .await
        .unwrap();

    // a second of traffic, twice the heartbeat, carried by pings alone
    let incoming = transport.next().await.unwrap();
    assert!(matches!(incoming, Incoming::Event { ref name, .. } if name == "done"));
}
