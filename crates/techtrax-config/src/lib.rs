//! Shared configuration for TechTrax tools.
//!
//! TOML profiles, figment layering (defaults, file, `TECHTRAX_*` env),
//! durable credential stores, and translation to
//! `techtrax_core::SessionConfig`. The CLI adds flag-aware wrappers on top.

mod store;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use techtrax_api::ReconnectConfig;
use techtrax_core::{CredentialStore, SessionConfig, TlsVerification};

pub use store::{FileCredentialStore, KEYRING_SERVICE, KeyringCredentialStore};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("profile '{name}' not found")]
    ProfileNotFound { name: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named backend profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

impl Config {
    /// Look a profile up by name.
    pub fn profile(&self, name: &str) -> Result<&Profile, ConfigError> {
        self.profiles
            .get(name)
            .ok_or_else(|| ConfigError::ProfileNotFound { name: name.into() })
    }

    /// Sorted profile names, for help text.
    pub fn profile_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.profiles.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,

    #[serde(default)]
    pub insecure: bool,

    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
            insecure: false,
            timeout: default_timeout(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}
fn default_timeout() -> u64 {
    30
}

/// Where a profile keeps its token pair between runs.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CredentialBackend {
    /// System keyring (recommended).
    #[default]
    Keyring,
    /// JSON file in the platform data directory.
    File,
}

/// A named backend profile.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Profile {
    /// Server root (e.g., "https://api.clinic.example").
    pub url: String,

    /// Login email, used as the prompt default.
    pub email: Option<String>,

    #[serde(default)]
    pub credentials: CredentialBackend,

    /// Path to custom CA certificate.
    pub ca_cert: Option<PathBuf>,

    /// Override insecure TLS setting.
    pub insecure: Option<bool>,

    /// Request timeout in seconds.
    pub timeout: Option<u64>,

    /// Refresh tokens expiring within this many seconds.
    pub refresh_window: Option<u64>,

    /// Seconds between push-channel token checks.
    pub token_check_interval: Option<u64>,

    /// Seconds between queue stats polls; 0 disables polling.
    pub stats_interval: Option<u64>,

    /// Seconds to wait for a push-channel acknowledgement.
    pub ack_timeout: Option<u64>,

    /// First reconnect delay in milliseconds.
    pub reconnect_initial_ms: Option<u64>,

    /// Reconnect backoff ceiling in milliseconds.
    pub reconnect_max_ms: Option<u64>,

    /// Give up reconnecting after this many attempts.
    pub reconnect_max_retries: Option<u32>,
}

// ── Paths ───────────────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "techtrax", "techtrax")
}

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    project_dirs().map_or_else(
        || home_fallback(".config").join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Directory holding file-backed credentials.
pub fn data_dir() -> PathBuf {
    project_dirs().map_or_else(
        || home_fallback(".local/share"),
        |dirs| dirs.data_dir().to_path_buf(),
    )
}

/// Token file for a profile using the `file` backend.
pub fn credentials_path(profile_name: &str) -> PathBuf {
    data_dir()
        .join("credentials")
        .join(format!("{profile_name}.json"))
}

fn home_fallback(sub: &str) -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(sub);
    p.push("techtrax");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from an explicit file path. A missing file yields the defaults.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("TECHTRAX_").split("_"));

    let config: Config = figment.extract()?;
    tracing::debug!(path = %path.display(), profiles = config.profiles.len(), "config loaded");
    Ok(config)
}

/// Load config, returning a default if the file doesn't exist or is unreadable.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "falling back to default config");
        Config::default()
    })
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<PathBuf, ConfigError> {
    let path = config_path();
    save_config_to(cfg, &path)?;
    Ok(path)
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Translation ─────────────────────────────────────────────────────

/// Parse and check a server root.
pub fn parse_server_url(raw: &str) -> Result<url::Url, ConfigError> {
    let url: url::Url = raw.parse().map_err(|_| ConfigError::Validation {
        field: "url".into(),
        reason: format!("invalid URL: {raw}"),
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ConfigError::Validation {
            field: "url".into(),
            reason: format!("expected http or https, got '{other}'"),
        }),
    }
}

/// Build a `SessionConfig` from a profile and the global defaults.
pub fn profile_to_session_config(
    profile: &Profile,
    defaults: &Defaults,
) -> Result<SessionConfig, ConfigError> {
    let url = parse_server_url(&profile.url)?;
    let mut config = SessionConfig::new(url);

    config.tls = if profile.insecure.unwrap_or(defaults.insecure) {
        TlsVerification::DangerAcceptInvalid
    } else if let Some(ref ca_path) = profile.ca_cert {
        TlsVerification::CustomCa(ca_path.clone())
    } else {
        TlsVerification::SystemDefaults
    };

    config.timeout = Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout));
    if let Some(secs) = profile.refresh_window {
        config.refresh_window = Duration::from_secs(secs);
    }
    if let Some(secs) = profile.token_check_interval {
        config.token_check_interval = Duration::from_secs(secs);
    }
    if let Some(secs) = profile.stats_interval {
        config.stats_interval = Duration::from_secs(secs);
    }
    if let Some(secs) = profile.ack_timeout {
        config.ack_timeout = Duration::from_secs(secs);
    }

    let base = ReconnectConfig::default();
    let reconnect = ReconnectConfig {
        initial_delay: profile
            .reconnect_initial_ms
            .map_or(base.initial_delay, Duration::from_millis),
        max_delay: profile
            .reconnect_max_ms
            .map_or(base.max_delay, Duration::from_millis),
        max_retries: profile.reconnect_max_retries.or(base.max_retries),
    };
    if reconnect.initial_delay > reconnect.max_delay {
        return Err(ConfigError::Validation {
            field: "reconnect_initial_ms".into(),
            reason: "must not exceed reconnect_max_ms".into(),
        });
    }
    config.reconnect = reconnect;

    Ok(config)
}

/// Open the credential store a profile is configured for.
pub fn credential_store(profile: &Profile, profile_name: &str) -> Arc<dyn CredentialStore> {
    match profile.credentials {
        CredentialBackend::Keyring => Arc::new(KeyringCredentialStore::new(profile_name)),
        CredentialBackend::File => {
            Arc::new(FileCredentialStore::new(credentials_path(profile_name)))
        }
    }
}
