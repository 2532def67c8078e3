// ── Core error types ──
//
// User-facing errors from techtrax-core. Consumers never see raw HTTP or
// frame-level failures; the `From<techtrax_api::Error>` impl translates
// transport errors into domain variants.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Session errors ───────────────────────────────────────────────
    /// Refresh failed; stored credentials have been cleared and the user
    /// must log in again.
    #[error("Session expired: {reason}")]
    SessionInvalid { reason: String },

    /// The request was still refused after one refresh-and-retry.
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    #[error("Login failed: {message}")]
    AuthenticationFailed { message: String },

    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot reach {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The push channel is closed or was never opened.
    #[error("Push channel is not open")]
    ChannelClosed,

    // ── Domain errors ────────────────────────────────────────────────
    /// The backend answered with a non-success envelope.
    #[error("{message}")]
    Rejected { message: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },

    /// No queue is loaded (or none exists today).
    #[error("No queue loaded")]
    NoQueue,

    // ── API errors (wrapped, not exposed raw) ────────────────────────
    #[error("API error: {message}")]
    Api {
        message: String,
        /// HTTP status code (if applicable).
        status: Option<u16>,
    },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Whether the session is gone and a fresh login is required.
    pub fn requires_login(&self) -> bool {
        matches!(self, Self::SessionInvalid { .. } | Self::Unauthorized { .. })
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<techtrax_api::Error> for CoreError {
    fn from(err: techtrax_api::Error) -> Self {
        use techtrax_api::Error as Api;

        match err {
            Api::Authentication { message } => CoreError::AuthenticationFailed { message },
            Api::Unauthorized { message } => CoreError::Unauthorized { message },
            Api::RefreshRejected { message } => CoreError::SessionInvalid { reason: message },
            Api::MalformedToken(reason) => CoreError::SessionInvalid {
                reason: format!("unreadable access token: {reason}"),
            },
            Api::Transport(ref e) => {
                if e.is_timeout() {
                    CoreError::Timeout { timeout_ms: 0 }
                } else if e.is_connect() {
                    CoreError::ConnectionFailed {
                        url: e
                            .url()
                            .map_or_else(|| "<unknown>".into(), ToString::to_string),
                        reason: e.to_string(),
                    }
                } else {
                    CoreError::Api {
                        message: e.to_string(),
                        status: e.status().map(|s| s.as_u16()),
                    }
                }
            }
            Api::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            Api::Tls(msg) => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("TLS error: {msg}"),
            },
            Api::Api { status, message } => CoreError::Api {
                message,
                status: Some(status),
            },
            Api::WebSocketConnect(reason) => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("WebSocket connection failed: {reason}"),
            },
            Api::WebSocketClosed { code, reason } => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("WebSocket closed (code {code}): {reason}"),
            },
            Api::ConnectRejected { message } => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("channel refused: {message}"),
            },
            Api::HeartbeatTimeout { timeout_ms } => CoreError::Timeout { timeout_ms },
            Api::Protocol(msg) => CoreError::Internal(format!("Protocol error: {msg}")),
            Api::Deserialization { message, body: _ } => {
                CoreError::Internal(format!("Deserialization error: {message}"))
            }
        }
    }
}
