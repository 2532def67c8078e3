// ── Runtime session configuration ──
//
// Describes *how* to talk to a backend: endpoint, TLS, timeouts and the
// cadence of background work. Never touches disk; the CLI builds a
// `SessionConfig` from its profile and hands it in.

use std::time::Duration;

use techtrax_api::socket::ReconnectConfig;
use techtrax_api::transport::{TlsMode, TransportConfig};
use url::Url;

/// TLS verification strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsVerification {
    /// System CA store (strict).
    #[default]
    SystemDefaults,
    /// Custom CA certificate file.
    CustomCa(std::path::PathBuf),
    /// Skip verification (self-signed development backends).
    DangerAcceptInvalid,
}

/// Configuration for one backend session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Server root (e.g. `http://localhost:5000`). REST lives under `/api`.
    pub url: Url,
    pub tls: TlsVerification,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Tokens expiring within this window are refreshed before use.
    pub refresh_window: Duration,
    /// How often the open channel re-checks its token.
    pub token_check_interval: Duration,
    /// Channel reconnect backoff.
    pub reconnect: ReconnectConfig,
    /// How long `emit_with_ack` waits for the server.
    pub ack_timeout: Duration,
    /// Queue stats polling period. Zero disables polling.
    pub stats_interval: Duration,
}

impl SessionConfig {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            tls: TlsVerification::default(),
            timeout: Duration::from_secs(30),
            refresh_window: Duration::from_secs(2 * 60),
            token_check_interval: Duration::from_secs(10 * 60),
            reconnect: ReconnectConfig::default(),
            ack_timeout: Duration::from_secs(10),
            stats_interval: Duration::from_secs(10),
        }
    }

    pub(crate) fn transport(&self) -> TransportConfig {
        TransportConfig {
            tls: match &self.tls {
                TlsVerification::SystemDefaults => TlsMode::System,
                TlsVerification::CustomCa(path) => TlsMode::CustomCa(path.clone()),
                TlsVerification::DangerAcceptInvalid => TlsMode::DangerAcceptInvalid,
            },
            timeout: self.timeout,
        }
    }
}
