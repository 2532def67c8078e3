// Shared fixtures: JWT builders and an in-process backend that speaks both
// the REST API and the Socket.IO push channel on one port.
#![allow(clippy::unwrap_used, dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use techtrax_api::TokenPair;
use techtrax_api::socket::ReconnectConfig;
use techtrax_core::SessionConfig;

// ── Tokens ──────────────────────────────────────────────────────────

/// Unsigned JWT around `claims`.
pub fn jwt(claims: &Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#);
    let body = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{body}.sig")
}

/// Doctor token tagged `tag`, expiring `secs` from now.
pub fn token_expiring_in(tag: &str, secs: i64) -> String {
    jwt(&json!({
        "id": "doc-1",
        "role": "doctor",
        "tenantId": "t1",
        "email": "doc@clinic.test",
        "jti": tag,
        "exp": chrono::Utc::now().timestamp() + secs,
    }))
}

pub fn pair(access: &str, refresh: &str) -> TokenPair {
    TokenPair::new(access, refresh)
}

pub fn tokens_body(access: &str, refresh: &str) -> Value {
    json!({
        "status": "success",
        "data": { "tokens": { "accessToken": access, "refreshToken": refresh } }
    })
}

/// Fast timings so tests never wait on production defaults.
pub fn test_config(url: Url) -> SessionConfig {
    let mut config = SessionConfig::new(url);
    config.timeout = Duration::from_secs(5);
    config.token_check_interval = Duration::ZERO;
    config.stats_interval = Duration::ZERO;
    config.ack_timeout = Duration::from_secs(2);
    config.reconnect = ReconnectConfig {
        initial_delay: Duration::from_millis(50),
        max_delay: Duration::from_millis(200),
        max_retries: None,
    };
    config
}

// ── Fake backend ────────────────────────────────────────────────────

const OPEN: &str =
    r#"0{"sid":"eio","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#;
const KICK: &str = "\u{0}kick";

/// `(method, path, body) -> (status, body)`
pub type Router = Arc<dyn Fn(&str, &str, &Value) -> (u16, Value) + Send + Sync>;

pub struct FakeBackend {
    pub url: Url,
    peers: mpsc::UnboundedReceiver<ChannelPeer>,
    hits: Arc<Mutex<Vec<String>>>,
    refused: Refused,
}

/// Tokens the push channel answers with `connect_error`, and how many
/// handshakes it turned away.
#[derive(Clone, Default)]
struct Refused {
    tokens: Arc<Mutex<HashSet<String>>>,
    count: Arc<AtomicUsize>,
}

/// One accepted push-channel client.
pub struct ChannelPeer {
    /// The `token` the client authenticated with.
    pub token: String,
    frames: mpsc::UnboundedSender<String>,
    /// Raw frames the client sent after the handshake.
    pub received: mpsc::UnboundedReceiver<String>,
}

impl ChannelPeer {
    pub fn push(&self, name: &str, payload: Value) {
        let frame = format!("42{}", json!([name, payload]));
        let _ = self.frames.send(frame);
    }

    /// Drop the transport from the server side.
    pub fn kick(&self) {
        let _ = self.frames.send(KICK.to_owned());
    }

    pub async fn next_frame(&mut self) -> String {
        tokio::time::timeout(Duration::from_secs(5), self.received.recv())
            .await
            .expect("no frame from client")
            .unwrap()
    }
}

impl FakeBackend {
    pub async fn start<F>(router: F) -> Self
    where
        F: Fn(&str, &str, &Value) -> (u16, Value) + Send + Sync + 'static,
    {
        let router: Router = Arc::new(router);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (peer_tx, peers) = mpsc::unbounded_channel();
        let hits = Arc::new(Mutex::new(Vec::new()));
        let sockets = Arc::new(AtomicUsize::new(0));
        let refused = Refused::default();

        let task_hits = Arc::clone(&hits);
        let task_refused = refused.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let head = peek_head(&stream).await;
                if head.contains("/socket.io/") {
                    let n = sockets.fetch_add(1, Ordering::Relaxed) + 1;
                    tokio::spawn(serve_socket(stream, n, peer_tx.clone(), task_refused.clone()));
                } else {
                    let router = Arc::clone(&router);
                    let hits = Arc::clone(&task_hits);
                    tokio::spawn(serve_http(stream, router, hits));
                }
            }
        });

        Self {
            url: Url::parse(&format!("http://{addr}")).unwrap(),
            peers,
            hits,
            refused,
        }
    }

    /// Answer handshakes carrying `token` with an authentication error.
    pub fn refuse_token(&self, token: &str) {
        self.refused.tokens.lock().unwrap().insert(token.to_owned());
    }

    /// Handshakes refused so far.
    pub fn refusals(&self) -> usize {
        self.refused.count.load(Ordering::Relaxed)
    }

    /// Wait for the next push-channel client.
    pub async fn next_peer(&mut self) -> ChannelPeer {
        tokio::time::timeout(Duration::from_secs(10), self.peers.recv())
            .await
            .expect("no channel connection")
            .unwrap()
    }

    /// How many HTTP requests hit `path`.
    pub fn hits(&self, path: &str) -> usize {
        self.hits
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.as_str() == path)
            .count()
    }
}

async fn peek_head(stream: &TcpStream) -> String {
    let mut buf = vec![0u8; 8192];
    loop {
        let n = stream.peek(&mut buf).await.unwrap();
        let head = String::from_utf8_lossy(&buf[..n]).into_owned();
        if head.contains("\r\n\r\n") || n == buf.len() {
            return head;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

async fn serve_http(mut stream: TcpStream, router: Router, hits: Arc<Mutex<Vec<String>>>) {
    let mut raw = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = stream.read(&mut chunk).await.unwrap();
        if n == 0 {
            return;
        }
        raw.extend_from_slice(&chunk[..n]);
        if let Some(pos) = raw.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&raw[..header_end]).into_owned();
    let mut lines = head.lines();
    let mut request_line = lines.next().unwrap().split_whitespace();
    let method = request_line.next().unwrap().to_owned();
    let path = request_line.next().unwrap().to_owned();
    let content_length = lines
        .filter_map(|l| l.split_once(':'))
        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        .map_or(0, |(_, v)| v.trim().parse::<usize>().unwrap());

    while raw.len() < header_end + content_length {
        let n = stream.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        raw.extend_from_slice(&chunk[..n]);
    }
    let body: Value = serde_json::from_slice(&raw[header_end..]).unwrap_or(Value::Null);

    hits.lock().unwrap().push(path.clone());
    let (status, reply) = router(&method, &path, &body);
    let reply = reply.to_string();
    let response = format!(
        "HTTP/1.1 {status} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{reply}",
        reply.len()
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

async fn serve_socket(
    stream: TcpStream,
    n: usize,
    peers: mpsc::UnboundedSender<ChannelPeer>,
    refused: Refused,
) {
    let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
    ws.send(Message::Text(OPEN.into())).await.unwrap();

    let connect = loop {
        match ws.next().await {
            Some(Ok(Message::Text(t))) => break t.as_str().to_owned(),
            Some(Ok(_)) => {}
            _ => return,
        }
    };
    let auth: Value = serde_json::from_str(connect.strip_prefix("40").unwrap()).unwrap();
    let token = auth["token"].as_str().unwrap_or_default().to_owned();

    if refused.tokens.lock().unwrap().contains(&token) {
        refused.count.fetch_add(1, Ordering::Relaxed);
        let refusal = r#"44{"message":"Authentication error: jwt expired"}"#;
        let _ = ws.send(Message::Text(refusal.into())).await;
        let _ = ws.close(None).await;
        return;
    }

    ws.send(Message::Text(format!(r#"40{{"sid":"sock-{n}"}}"#).into()))
        .await
        .unwrap();
    let connected = json!(["connected", {
        "user": { "id": "doc-1", "role": "doctor", "tenantId": "t1", "name": "Dr. Grey" }
    }]);
    ws.send(Message::Text(format!("42{connected}").into()))
        .await
        .unwrap();

    let (frames, mut frames_rx) = mpsc::unbounded_channel::<String>();
    let (received_tx, received) = mpsc::unbounded_channel();
    let _ = peers.send(ChannelPeer {
        token,
        frames,
        received,
    });

    loop {
        tokio::select! {
            Some(frame) = frames_rx.recv() => {
                if frame == KICK {
                    let _ = ws.close(None).await;
                    break;
                }
                if ws.send(Message::Text(frame.into())).await.is_err() {
                    break;
                }
            }
            msg = ws.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let text = text.as_str().to_owned();
                    if text == "41" {
                        break;
                    }
                    if let Some(ack_id) = ack_id(&text) {
                        let reply = format!(r#"43{ack_id}[{{"success":true}}]"#);
                        let _ = ws.send(Message::Text(reply.into())).await;
                    }
                    let _ = received_tx.send(text);
                }
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
}

/// Ack id of an `42<id>[...]` event frame.
fn ack_id(frame: &str) -> Option<&str> {
    let rest = frame.strip_prefix("42")?;
    let end = rest.find('[')?;
    let id = &rest[..end];
    (!id.is_empty()).then_some(id)
}
