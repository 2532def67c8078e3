// Single Socket.IO connection over a WebSocket.
//
// Drives one Engine.IO session from handshake to close: performs the
// `open` / namespace `connect` exchange, answers heartbeats and decodes
// inbound packets. Reconnection is the caller's job; a `SocketTransport`
// is single-use.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};
use url::Url;

use super::packet::{DEFAULT_NAMESPACE, EnginePacket, SocketPacket};
use crate::error::Error;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Something the server sent that the caller should act on.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    /// A named event. `ack_id` is set when the server expects a reply.
    Event {
        name: String,
        args: Vec<Value>,
        ack_id: Option<u64>,
    },
    /// Reply to one of our `emit` calls.
    Ack { id: u64, args: Vec<Value> },
    /// The server ended the session (engine close or namespace disconnect).
    Disconnected { reason: String },
}

/// An established, authenticated Socket.IO session.
pub struct SocketTransport {
    ws: WsStream,
    sid: String,
    heartbeat: Duration,
    /// When the server last pinged; the heartbeat deadline counts from here.
    last_ping: Instant,
}

impl SocketTransport {
    /// Open the WebSocket and complete both handshakes.
    ///
    /// `auth` is sent as the namespace connect payload. A `connect_error`
    /// reply surfaces as [`Error::ConnectRejected`].
    pub async fn connect(url: &Url, auth: Value, timeout: Duration) -> Result<Self, Error> {
        debug!(url = %url, "opening push channel");

        tokio::time::timeout(timeout, Self::handshake(url, auth))
            .await
            .map_err(|_| Error::WebSocketConnect(format!("handshake timed out after {timeout:?}")))?
    }

    async fn handshake(url: &Url, auth: Value) -> Result<Self, Error> {
        let (mut ws, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

        let open = match recv_text(&mut ws).await? {
            Some(frame) => match EnginePacket::decode(&frame)? {
                EnginePacket::Open(open) => open,
                other => {
                    return Err(Error::Protocol(format!("expected open packet, got {other:?}")));
                }
            },
            None => return Err(Error::WebSocketConnect("closed during handshake".into())),
        };
        trace!(sid = %open.sid, ping_interval = open.ping_interval, "engine session opened");

        let heartbeat = Duration::from_millis(open.ping_interval + open.ping_timeout);

        let connect = SocketPacket::Connect {
            namespace: DEFAULT_NAMESPACE.into(),
            data: Some(auth),
        };
        send_text(&mut ws, EnginePacket::Message(connect.encode()).encode()).await?;

        loop {
            let Some(frame) = recv_text(&mut ws).await? else {
                return Err(Error::WebSocketConnect("closed during handshake".into()));
            };
            match EnginePacket::decode(&frame)? {
                EnginePacket::Ping(data) => {
                    send_text(&mut ws, EnginePacket::Pong(data).encode()).await?;
                }
                EnginePacket::Message(payload) => match SocketPacket::decode(&payload)? {
                    SocketPacket::Connect { data, .. } => {
                        let sid = data
                            .as_ref()
                            .and_then(|d| d.get("sid"))
                            .and_then(Value::as_str)
                            .unwrap_or(&open.sid)
                            .to_owned();
                        debug!(%sid, "push channel connected");
                        return Ok(Self {
                            ws,
                            sid,
                            heartbeat,
                            last_ping: Instant::now(),
                        });
                    }
                    SocketPacket::ConnectError { data, .. } => {
                        return Err(Error::ConnectRejected {
                            message: connect_error_message(data.as_ref()),
                        });
                    }
                    other => trace!(?other, "ignoring packet before connect"),
                },
                EnginePacket::Close => {
                    return Err(Error::WebSocketConnect("server closed during handshake".into()));
                }
                _ => {}
            }
        }
    }

    /// Socket.IO session id assigned by the server.
    pub fn sid(&self) -> &str {
        &self.sid
    }

    /// Longest silence tolerated before the connection counts as dead.
    pub fn heartbeat(&self) -> Duration {
        self.heartbeat
    }

    /// Wait for the next actionable packet.
    ///
    /// Pings are answered inline. Cancel-safe between frames, so it can sit
    /// in a `select!` next to outbound work. Fails with
    /// [`Error::HeartbeatTimeout`] once no ping has arrived for a full
    /// heartbeat, however often it is called.
    pub async fn next(&mut self) -> Result<Incoming, Error> {
        loop {
            let deadline = self.last_ping + self.heartbeat;
            let frame = tokio::time::timeout_at(deadline, recv_text(&mut self.ws))
                .await
                .map_err(|_| Error::HeartbeatTimeout {
                    timeout_ms: u64::try_from(self.heartbeat.as_millis()).unwrap_or(u64::MAX),
                })??;

            let Some(frame) = frame else {
                return Ok(Incoming::Disconnected {
                    reason: "transport close".into(),
                });
            };

            match EnginePacket::decode(&frame)? {
                EnginePacket::Ping(data) => {
                    trace!("ping");
                    self.last_ping = Instant::now();
                    self.send_engine(EnginePacket::Pong(data)).await?;
                }
                EnginePacket::Close => {
                    return Ok(Incoming::Disconnected {
                        reason: "server close".into(),
                    });
                }
                EnginePacket::Message(payload) => {
                    if let Some(incoming) = Self::dispatch(SocketPacket::decode(&payload)?)? {
                        return Ok(incoming);
                    }
                }
                _ => {}
            }
        }
    }

    fn dispatch(packet: SocketPacket) -> Result<Option<Incoming>, Error> {
        match packet {
            SocketPacket::Event { id, data, .. } => {
                let mut items = data.into_iter();
                let name = match items.next() {
                    Some(Value::String(name)) => name,
                    _ => return Err(Error::Protocol("event without a name".into())),
                };
                Ok(Some(Incoming::Event {
                    name,
                    args: items.collect(),
                    ack_id: id,
                }))
            }
            SocketPacket::Ack { id, data, .. } => Ok(Some(Incoming::Ack { id, args: data })),
            SocketPacket::Disconnect { .. } => Ok(Some(Incoming::Disconnected {
                reason: "io server disconnect".into(),
            })),
            SocketPacket::ConnectError { data, .. } => Err(Error::ConnectRejected {
                message: connect_error_message(data.as_ref()),
            }),
            SocketPacket::Connect { .. } => Ok(None),
        }
    }

    /// Send an event, optionally asking for an ack with `ack_id`.
    pub async fn emit(
        &mut self,
        name: &str,
        args: Vec<Value>,
        ack_id: Option<u64>,
    ) -> Result<(), Error> {
        trace!(%name, ?ack_id, "emit");
        let packet = SocketPacket::event(name, args, ack_id);
        self.send_engine(EnginePacket::Message(packet.encode())).await
    }

    /// Reply to a server event that requested an ack.
    pub async fn ack(&mut self, id: u64, args: Vec<Value>) -> Result<(), Error> {
        let packet = SocketPacket::Ack {
            namespace: DEFAULT_NAMESPACE.into(),
            id,
            data: args,
        };
        self.send_engine(EnginePacket::Message(packet.encode())).await
    }

    /// Leave the namespace and close the WebSocket.
    pub async fn close(mut self) -> Result<(), Error> {
        let leave = SocketPacket::Disconnect {
            namespace: DEFAULT_NAMESPACE.into(),
        };
        self.send_engine(EnginePacket::Message(leave.encode())).await?;
        self.ws
            .close(None)
            .await
            .map_err(|e| Error::WebSocketConnect(e.to_string()))
    }

    async fn send_engine(&mut self, packet: EnginePacket) -> Result<(), Error> {
        send_text(&mut self.ws, packet.encode()).await
    }
}

// ── Frame helpers ────────────────────────────────────────────────────

async fn send_text(ws: &mut WsStream, text: String) -> Result<(), Error> {
    ws.send(Message::Text(text.into()))
        .await
        .map_err(|e| Error::WebSocketConnect(e.to_string()))
}

/// Next text frame, or `None` once the stream is closed.
async fn recv_text(ws: &mut WsStream) -> Result<Option<String>, Error> {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => return Ok(Some(text.as_str().to_owned())),
            Some(Ok(Message::Close(frame))) => {
                if let Some(ref cf) = frame {
                    debug!(code = %cf.code, reason = %cf.reason, "close frame received");
                }
                return Ok(None);
            }
            Some(Ok(Message::Binary(_))) => {
                return Err(Error::Protocol("binary frames are not supported".into()));
            }
            // Ping, Pong, Frame: tungstenite replies to WebSocket pings itself
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(Error::WebSocketConnect(e.to_string())),
            None => return Ok(None),
        }
    }
}

fn connect_error_message(data: Option<&Value>) -> String {
    match data {
        Some(Value::String(s)) => s.clone(),
        Some(v) => v
            .get("message")
            .and_then(Value::as_str)
            .map_or_else(|| v.to_string(), String::from),
        None => "connection refused".into(),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use serde_json::json;

    #[test]
    fn event_dispatch_splits_name_and_args() {
        let packet = SocketPacket::event("queue:reordered", [json!({ "queueId": "q1" })], None);
        let incoming = SocketTransport::dispatch(packet).unwrap();
        assert_eq!(
            incoming,
            Some(Incoming::Event {
                name: "queue:reordered".into(),
                args: vec![json!({ "queueId": "q1" })],
                ack_id: None,
            })
        );
    }

    #[test]
    fn connect_error_surfaces_message() {
        let packet = SocketPacket::ConnectError {
            namespace: "/".into(),
            data: Some(json!({ "message": "Authentication error" })),
        };
        let err = SocketTransport::dispatch(packet).unwrap_err();
        assert!(matches!(err, Error::ConnectRejected { ref message } if message == "Authentication error"));
    }

    #[test]
    fn namespace_disconnect_is_reported() {
        let packet = SocketPacket::Disconnect {
            namespace: "/".into(),
        };
        assert!(matches!(
            SocketTransport::dispatch(packet).unwrap(),
            Some(Incoming::Disconnected { .. })
        ));
    }
}
