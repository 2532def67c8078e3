use thiserror::Error;

/// Top-level error type for the `techtrax-api` crate.
///
/// Covers every failure mode of the raw transport layer: authentication
/// endpoints, HTTP, the response envelope, and the push channel.
/// `techtrax-core` maps these into user-facing diagnostics.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// Login was rejected (bad credentials, disabled account, etc.)
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// The server answered `401 Unauthorized` to a bearer request.
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    /// The refresh endpoint did not hand back a usable token pair.
    #[error("Token refresh failed: {message}")]
    RefreshRejected { message: String },

    /// A bearer token could not be decoded into claims.
    #[error("Malformed access token: {0}")]
    MalformedToken(String),

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// TLS handshake or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── API ─────────────────────────────────────────────────────────
    /// Non-success HTTP status whose body was not a parsable envelope.
    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    // ── Push channel ────────────────────────────────────────────────
    /// WebSocket connection failed.
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// WebSocket closed unexpectedly.
    #[error("WebSocket closed (code {code}): {reason}")]
    WebSocketClosed { code: u16, reason: String },

    /// The server refused the namespace connect (`connect_error`).
    #[error("Channel connect rejected: {message}")]
    ConnectRejected { message: String },

    /// The server stopped pinging within the negotiated heartbeat window.
    #[error("Heartbeat timed out after {timeout_ms}ms")]
    HeartbeatTimeout { timeout_ms: u64 },

    /// A frame that does not follow the Engine.IO / Socket.IO framing.
    #[error("Protocol error: {0}")]
    Protocol(String),

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if the server refused the bearer credential and a
    /// refresh might resolve it.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::WebSocketConnect(_)
            | Self::WebSocketClosed { .. }
            | Self::HeartbeatTimeout { .. }
            | Self::ConnectRejected { .. } => true,
            _ => false,
        }
    }

    /// HTTP status attached to this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            Self::Unauthorized { .. } => Some(401),
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}
