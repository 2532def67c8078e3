// REST client for the queue backend.
//
// Wraps `reqwest::Client` with URL construction, bearer injection and
// `{status, data}` envelope handling. The client is stateless with
// respect to credentials: every call receives the bearer it should use,
// so token lifecycle lives one layer up in `techtrax-core`.

use reqwest::{Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, trace};
use url::Url;

use crate::auth::TokenPair;
use crate::error::Error;
use crate::models::Envelope;
use crate::transport::TransportConfig;

/// Engine.IO v4 handshake path (WebSocket transport only).
const SOCKET_PATH: &str = "/socket.io/";

/// A decoded response: HTTP status plus the backend envelope.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub envelope: Envelope,
}

impl ApiResponse {
    /// Deserialize the envelope's `data` member.
    pub fn data<T: serde::de::DeserializeOwned>(&self) -> Result<T, Error> {
        let data = self.envelope.data.as_ref().unwrap_or(&Value::Null);
        T::deserialize(data).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body: data.to_string(),
        })
    }
}

/// Raw HTTP client for the backend's `/api` surface.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a client from a `TransportConfig`.
    ///
    /// `base_url` is the server root (e.g. `http://localhost:5000`); the
    /// `/api` prefix is added per request.
    pub fn new(base_url: Url, transport: &TransportConfig) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self { http, base_url })
    }

    /// Create a client around a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, base_url: Url) -> Self {
        Self { http, base_url }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ── URL builders ─────────────────────────────────────────────────

    /// `{base}/api{path}`. `path` must start with `/`.
    pub fn api_url(&self, path: &str) -> Result<Url, Error> {
        let base = self.base_url.as_str().trim_end_matches('/');
        Ok(Url::parse(&format!("{base}/api{path}"))?)
    }

    /// WebSocket URL of the push channel on the same host.
    pub fn socket_url(&self) -> Result<Url, Error> {
        let mut url = self.base_url.join(SOCKET_PATH)?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|()| Error::WebSocketConnect(format!("cannot derive ws scheme from {url}")))?;
        url.query_pairs_mut()
            .append_pair("EIO", "4")
            .append_pair("transport", "websocket");
        Ok(url)
    }

    // ── Auth endpoints ───────────────────────────────────────────────

    /// Exchange email + password for a token pair.
    ///
    /// Accepts every response layout the backend has used: nested
    /// `data.tokens`, `data.token`, top-level `token`, or
    /// `data.accessToken`. Without a refresh token the access token
    /// doubles as one.
    pub async fn login(&self, email: &str, password: &SecretString) -> Result<TokenPair, Error> {
        let url = self.api_url("/auth/login")?;
        debug!(%email, "logging in");

        let body = serde_json::json!({
            "email": email,
            "password": password.expose_secret(),
        });
        let resp = self
            .http
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(Error::Transport)?;

        let status = resp.status();
        let text = resp.text().await.map_err(Error::Transport)?;
        let value: Value = serde_json::from_str(&text).unwrap_or(Value::Null);

        if !status.is_success() {
            let message = value
                .get("message")
                .and_then(Value::as_str)
                .map_or_else(|| format!("login failed (HTTP {status})"), String::from);
            return Err(Error::Authentication { message });
        }

        let login: LoginResponse =
            serde_json::from_value(value).map_err(|e| Error::Deserialization {
                message: e.to_string(),
                body: text.clone(),
            })?;

        let Some(access) = login.access_token() else {
            return Err(Error::Authentication {
                message: "login succeeded but the response carried no token".into(),
            });
        };
        let refresh = login.refresh_token().unwrap_or_else(|| access.clone());

        debug!("login successful");
        Ok(TokenPair::new(access, refresh))
    }

    /// Trade a refresh token for a fresh pair.
    ///
    /// The refresh token travels as the bearer credential. Anything but a
    /// success envelope with `data.tokens` is a rejection.
    pub async fn refresh(&self, refresh_token: &SecretString) -> Result<TokenPair, Error> {
        let url = self.api_url("/auth/refresh")?;
        debug!("refreshing access token");

        let resp = self
            .http
            .post(url)
            .bearer_auth(refresh_token.expose_secret())
            .send()
            .await
            .map_err(Error::Transport)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::RefreshRejected {
                message: format!("HTTP {status}"),
            });
        }

        let body: RefreshResponse = resp.json().await.map_err(|e| Error::RefreshRejected {
            message: format!("unreadable refresh response: {e}"),
        })?;

        match body {
            RefreshResponse {
                status,
                data: Some(RefreshData { tokens: Some(t) }),
            } if status == "success" => Ok(TokenPair::new(t.access_token, t.refresh_token)),
            _ => Err(Error::RefreshRejected {
                message: "invalid refresh response".into(),
            }),
        }
    }

    // ── Request helpers ──────────────────────────────────────────────

    /// Send one request and decode the envelope.
    ///
    /// `401` always surfaces as [`Error::Unauthorized`] so callers can
    /// refresh and retry. Other non-2xx statuses still return the envelope
    /// when the body is one, leaving the success check to the caller.
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        bearer: Option<&str>,
        body: Option<&Value>,
    ) -> Result<ApiResponse, Error> {
        let url = self.api_url(path)?;
        debug!("{method} {url}");

        let mut builder = self.http.request(method, url);
        if let Some(token) = bearer {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let resp = builder.send().await.map_err(Error::Transport)?;
        let status = resp.status();
        let text = resp.text().await.map_err(Error::Transport)?;
        trace!(%status, len = text.len(), "response received");

        if status == StatusCode::UNAUTHORIZED {
            let message = serde_json::from_str::<Envelope>(&text)
                .ok()
                .and_then(|e| e.message)
                .unwrap_or_else(|| "access token rejected".into());
            return Err(Error::Unauthorized { message });
        }

        match serde_json::from_str::<Envelope>(&text) {
            Ok(envelope) => Ok(ApiResponse { status, envelope }),
            Err(_) if !status.is_success() => Err(Error::Api {
                status: status.as_u16(),
                message: text.chars().take(200).collect(),
            }),
            Err(e) => Err(Error::Deserialization {
                message: e.to_string(),
                body: text,
            }),
        }
    }
}

// ── Response shapes ──────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireTokens {
    access_token: String,
    refresh_token: String,
}

#[derive(Deserialize)]
struct RefreshData {
    tokens: Option<WireTokens>,
}

#[derive(Deserialize)]
struct RefreshResponse {
    #[serde(default)]
    status: String,
    data: Option<RefreshData>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct LoginTokens {
    access_token: Option<String>,
    refresh_token: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct LoginData {
    tokens: Option<LoginTokens>,
    token: Option<String>,
    access_token: Option<String>,
    refresh_token: Option<String>,
}

#[derive(Deserialize, Default)]
struct LoginResponse {
    data: Option<LoginData>,
    token: Option<String>,
}

impl LoginResponse {
    fn access_token(&self) -> Option<String> {
        let data = self.data.as_ref();
        data.and_then(|d| d.tokens.as_ref())
            .and_then(|t| t.access_token.clone())
            .or_else(|| data.and_then(|d| d.token.clone()))
            .or_else(|| self.token.clone())
            .or_else(|| data.and_then(|d| d.access_token.clone()))
            .filter(|t| !t.is_empty())
    }

    fn refresh_token(&self) -> Option<String> {
        let data = self.data.as_ref();
        data.and_then(|d| d.tokens.as_ref())
            .and_then(|t| t.refresh_token.clone())
            .or_else(|| data.and_then(|d| d.refresh_token.clone()))
            .filter(|t| !t.is_empty())
    }
}
