// Engine.IO v4 and Socket.IO v5 text framing.
//
// An Engine.IO text frame is a one-digit packet type followed by its
// payload. Message frames (type 4) carry one Socket.IO packet:
//
//   <type>[<namespace>,][<ack id>][<json>]
//
// Binary packets (types 5 and 6) need attachment frames and are not
// supported; the backend never sends them on the queue channel.

use serde::Deserialize;
use serde_json::Value;

use crate::error::Error;

pub const DEFAULT_NAMESPACE: &str = "/";

// ── Engine.IO ────────────────────────────────────────────────────────

/// Handshake payload of the Engine.IO `open` packet.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenPayload {
    pub sid: String,
    /// Milliseconds between server pings.
    pub ping_interval: u64,
    /// Milliseconds the server waits for a pong.
    pub ping_timeout: u64,
    #[serde(default)]
    pub upgrades: Vec<String>,
    #[serde(default)]
    pub max_payload: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnginePacket {
    Open(OpenPayload),
    Close,
    Ping(String),
    Pong(String),
    Message(String),
    Upgrade,
    Noop,
}

impl EnginePacket {
    pub fn decode(frame: &str) -> Result<Self, Error> {
        let mut chars = frame.chars();
        let kind = chars
            .next()
            .ok_or_else(|| Error::Protocol("empty engine frame".into()))?;
        let rest = chars.as_str();

        match kind {
            '0' => serde_json::from_str(rest)
                .map(Self::Open)
                .map_err(|e| Error::Protocol(format!("bad open payload: {e}"))),
            '1' => Ok(Self::Close),
            '2' => Ok(Self::Ping(rest.to_owned())),
            '3' => Ok(Self::Pong(rest.to_owned())),
            '4' => Ok(Self::Message(rest.to_owned())),
            '5' => Ok(Self::Upgrade),
            '6' => Ok(Self::Noop),
            other => Err(Error::Protocol(format!("unknown engine packet type {other:?}"))),
        }
    }

    /// Encode a client-originated packet.
    pub fn encode(&self) -> String {
        match self {
            Self::Open(_) => "0".into(),
            Self::Close => "1".into(),
            Self::Ping(data) => format!("2{data}"),
            Self::Pong(data) => format!("3{data}"),
            Self::Message(data) => format!("4{data}"),
            Self::Upgrade => "5".into(),
            Self::Noop => "6".into(),
        }
    }
}

// ── Socket.IO ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect {
        namespace: String,
        data: Option<Value>,
    },
    Disconnect {
        namespace: String,
    },
    Event {
        namespace: String,
        id: Option<u64>,
        /// `[name, ...args]`
        data: Vec<Value>,
    },
    Ack {
        namespace: String,
        id: u64,
        data: Vec<Value>,
    },
    ConnectError {
        namespace: String,
        data: Option<Value>,
    },
}

impl SocketPacket {
    /// Build an event packet on the default namespace.
    pub fn event(name: &str, args: impl IntoIterator<Item = Value>, id: Option<u64>) -> Self {
        let mut data = vec![Value::String(name.to_owned())];
        data.extend(args);
        Self::Event {
            namespace: DEFAULT_NAMESPACE.into(),
            id,
            data,
        }
    }

    fn kind(&self) -> char {
        match self {
            Self::Connect { .. } => '0',
            Self::Disconnect { .. } => '1',
            Self::Event { .. } => '2',
            Self::Ack { .. } => '3',
            Self::ConnectError { .. } => '4',
        }
    }

    fn namespace(&self) -> &str {
        match self {
            Self::Connect { namespace, .. }
            | Self::Disconnect { namespace }
            | Self::Event { namespace, .. }
            | Self::Ack { namespace, .. }
            | Self::ConnectError { namespace, .. } => namespace,
        }
    }

    pub fn encode(&self) -> String {
        let mut out = String::new();
        out.push(self.kind());

        let ns = self.namespace();
        if ns != DEFAULT_NAMESPACE {
            out.push_str(ns);
            out.push(',');
        }

        match self {
            Self::Event { id: Some(id), .. } | Self::Ack { id, .. } => {
                out.push_str(&id.to_string());
            }
            _ => {}
        }

        match self {
            Self::Connect { data: Some(v), .. } | Self::ConnectError { data: Some(v), .. } => {
                out.push_str(&v.to_string());
            }
            Self::Event { data, .. } | Self::Ack { data, .. } => {
                out.push_str(&Value::Array(data.clone()).to_string());
            }
            _ => {}
        }

        out
    }

    pub fn decode(payload: &str) -> Result<Self, Error> {
        let mut chars = payload.chars();
        let kind = chars
            .next()
            .ok_or_else(|| Error::Protocol("empty socket packet".into()))?;
        let mut rest = chars.as_str();

        if matches!(kind, '5' | '6') {
            return Err(Error::Protocol("binary socket packets are not supported".into()));
        }

        let namespace = if rest.starts_with('/') {
            if let Some(idx) = rest.find(',') {
                let ns = &rest[..idx];
                rest = &rest[idx + 1..];
                ns.to_owned()
            } else {
                let ns = rest.to_owned();
                rest = "";
                ns
            }
        } else {
            DEFAULT_NAMESPACE.to_owned()
        };

        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        let id = if digits > 0 {
            let parsed = rest[..digits]
                .parse::<u64>()
                .map_err(|e| Error::Protocol(format!("bad ack id: {e}")))?;
            rest = &rest[digits..];
            Some(parsed)
        } else {
            None
        };

        let data: Option<Value> = if rest.is_empty() {
            None
        } else {
            Some(
                serde_json::from_str(rest)
                    .map_err(|e| Error::Protocol(format!("bad packet payload: {e}")))?,
            )
        };

        match kind {
            '0' => Ok(Self::Connect { namespace, data }),
            '1' => Ok(Self::Disconnect { namespace }),
            '2' => match data {
                Some(Value::Array(items)) if matches!(items.first(), Some(Value::String(_))) => {
                    Ok(Self::Event {
                        namespace,
                        id,
                        data: items,
                    })
                }
                _ => Err(Error::Protocol("event payload must be [name, ...args]".into())),
            },
            '3' => {
                let id = id.ok_or_else(|| Error::Protocol("ack without id".into()))?;
                let data = match data {
                    Some(Value::Array(items)) => items,
                    Some(other) => vec![other],
                    None => Vec::new(),
                };
                Ok(Self::Ack {
                    namespace,
                    id,
                    data,
                })
            }
            '4' => Ok(Self::ConnectError { namespace, data }),
            other => Err(Error::Protocol(format!("unknown socket packet type {other:?}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn decode_open() {
        let frame = r#"0{"sid":"abc","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#;
        let EnginePacket::Open(open) = EnginePacket::decode(frame).unwrap() else {
            panic!("expected open packet");
        };
        assert_eq!(open.sid, "abc");
        assert_eq!(open.ping_interval, 25_000);
        assert_eq!(open.ping_timeout, 20_000);
    }

    #[test]
    fn ping_is_answered_with_matching_pong() {
        let ping = EnginePacket::decode("2").unwrap();
        assert_eq!(ping, EnginePacket::Ping(String::new()));
        assert_eq!(EnginePacket::Pong(String::new()).encode(), "3");
    }

    #[test]
    fn connect_with_auth() {
        let packet = SocketPacket::Connect {
            namespace: DEFAULT_NAMESPACE.into(),
            data: Some(json!({ "token": "A1" })),
        };
        assert_eq!(packet.encode(), r#"0{"token":"A1"}"#);
    }

    #[test]
    fn event_with_ack_id() {
        let packet = SocketPacket::event("chat:join", [json!({ "chatId": "c1" })], Some(12));
        let encoded = packet.encode();
        assert_eq!(encoded, r#"212["chat:join",{"chatId":"c1"}]"#);
        assert_eq!(SocketPacket::decode(&encoded).unwrap(), packet);
    }

    #[test]
    fn decode_namespaced_ack() {
        let packet = SocketPacket::decode(r#"3/admin,7[{"success":true}]"#).unwrap();
        assert_eq!(
            packet,
            SocketPacket::Ack {
                namespace: "/admin".into(),
                id: 7,
                data: vec![json!({ "success": true })],
            }
        );
    }

    #[test]
    fn decode_connect_error() {
        let packet = SocketPacket::decode(r#"4{"message":"Authentication error"}"#).unwrap();
        assert!(matches!(
            packet,
            SocketPacket::ConnectError { data: Some(ref v), .. } if v["message"] == "Authentication error"
        ));
    }

    #[test]
    fn rejects_binary_and_malformed_events() {
        assert!(SocketPacket::decode(r#"51-["upload",{"_placeholder":true,"num":0}]"#).is_err());
        assert!(SocketPacket::decode(r#"2{"not":"an array"}"#).is_err());
        assert!(SocketPacket::decode("").is_err());
    }
}
