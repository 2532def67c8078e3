//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use techtrax_config::ConfigError;
use techtrax_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const REJECTED: i32 = 5;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not reach the server at {url}")]
    #[diagnostic(
        code(techtrax::connection_failed),
        help(
            "Check that the backend is running and reachable.\n\
             {reason}"
        )
    )]
    ConnectionFailed { url: String, reason: String },

    #[error("Push channel closed: {reason}")]
    #[diagnostic(code(techtrax::channel_closed))]
    ChannelClosed { reason: String },

    // ── Authentication ───────────────────────────────────────────────
    #[error("Not logged in")]
    #[diagnostic(
        code(techtrax::not_logged_in),
        help("Run: techtrax login --profile {profile}")
    )]
    NotLoggedIn { profile: String },

    #[error("Session expired: {reason}")]
    #[diagnostic(
        code(techtrax::session_expired),
        help("Stored tokens were cleared. Run: techtrax login --profile {profile}")
    )]
    SessionExpired { profile: String, reason: String },

    #[error("Login failed: {message}")]
    #[diagnostic(code(techtrax::auth_failed), help("Check the email and password."))]
    AuthFailed { message: String },

    // ── Queue ────────────────────────────────────────────────────────
    #[error("No queue for today")]
    #[diagnostic(
        code(techtrax::no_queue),
        help("Clock in or build one with: techtrax queue create")
    )]
    NoQueue,

    #[error("{message}")]
    #[diagnostic(code(techtrax::rejected))]
    Rejected { message: String },

    // ── API ──────────────────────────────────────────────────────────
    #[error("API error: {message}")]
    #[diagnostic(code(techtrax::api_error), help("HTTP status: {status:?}"))]
    ApiError {
        status: Option<u16>,
        message: String,
    },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(techtrax::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(techtrax::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Create one with: techtrax config init"
        )
    )]
    ProfileNotFound { name: String, available: String },

    #[error("No server configured")]
    #[diagnostic(
        code(techtrax::no_config),
        help(
            "Create a profile with: techtrax config init\n\
             Or pass --url. Expected config at: {path}"
        )
    )]
    NoConfig { path: String },

    #[error(transparent)]
    #[diagnostic(code(techtrax::config))]
    Config(ConfigError),

    // ── Interactive ──────────────────────────────────────────────────
    #[error("'{action}' requires confirmation")]
    #[diagnostic(
        code(techtrax::confirmation_required),
        help("Use --yes (-y) to skip confirmation in non-interactive contexts.")
    )]
    NonInteractiveRequiresYes { action: String },

    // ── Timeout ──────────────────────────────────────────────────────
    #[error("Timed out")]
    #[diagnostic(
        code(techtrax::timeout),
        help("Increase the timeout with --timeout or check the server.")
    )]
    Timeout,

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON payload: {0}")]
    #[diagnostic(code(techtrax::json))]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::ChannelClosed { .. } => exit_code::CONNECTION,
            Self::NotLoggedIn { .. } | Self::SessionExpired { .. } | Self::AuthFailed { .. } => {
                exit_code::AUTH
            }
            Self::NoQueue | Self::ProfileNotFound { .. } => exit_code::NOT_FOUND,
            Self::Rejected { .. } => exit_code::REJECTED,
            Self::Timeout => exit_code::TIMEOUT,
            Self::Validation { .. } | Self::NonInteractiveRequiresYes { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }

    /// Rewrite profile-less auth errors for the active profile.
    pub fn for_profile(self, profile: &str) -> Self {
        match self {
            Self::NotLoggedIn { .. } => Self::NotLoggedIn {
                profile: profile.into(),
            },
            Self::SessionExpired { reason, .. } => Self::SessionExpired {
                profile: profile.into(),
                reason,
            },
            other => other,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::SessionInvalid { reason } => {
                if reason.contains("not logged in") {
                    CliError::NotLoggedIn {
                        profile: "default".into(),
                    }
                } else {
                    CliError::SessionExpired {
                        profile: "default".into(),
                        reason,
                    }
                }
            }
            CoreError::Unauthorized { message } => CliError::SessionExpired {
                profile: "default".into(),
                reason: message,
            },
            CoreError::AuthenticationFailed { message } => CliError::AuthFailed { message },
            CoreError::ConnectionFailed { url, reason } => CliError::ConnectionFailed { url, reason },
            CoreError::Timeout { .. } => CliError::Timeout,
            CoreError::ChannelClosed => CliError::ChannelClosed {
                reason: "the push channel is not open".into(),
            },
            CoreError::Rejected { message } => CliError::Rejected { message },
            CoreError::ValidationFailed { message } => CliError::Validation {
                field: "input".into(),
                reason: message,
            },
            CoreError::NoQueue => CliError::NoQueue,
            CoreError::Api { message, status } => CliError::ApiError { status, message },
            CoreError::Config { message } => CliError::Validation {
                field: "config".into(),
                reason: message,
            },
            CoreError::Internal(message) => CliError::Internal(message),
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::ProfileNotFound { name } => CliError::ProfileNotFound {
                name,
                available: String::new(),
            },
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            other => CliError::Config(other),
        }
    }
}
